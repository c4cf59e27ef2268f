//! Test harness for in-process role coordination clusters.
//!
//! Nodes share an [`InMemoryCluster`] for locks and maps, and a
//! [`LocalNetwork`] that routes snapshot fetches straight to the
//! target node's snapshot source without sockets.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wolfha::config::HaConfig;
use wolfha::coordination::{CoordinationService, InMemoryCluster};
use wolfha::coordinator::{CoordinatorHandle, CoordinatorService, Role, RoleState};
use wolfha::error::{Error, Result};
use wolfha::identity::NodeIdentity;
use wolfha::subsystem::SimulatedEngine;
use wolfha::transport::{SnapshotClient, SnapshotSource};

/// In-process snapshot routing by management address
#[derive(Default)]
pub struct LocalNetwork {
    sources: Mutex<HashMap<String, Arc<dyn SnapshotSource>>>,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, management: &str, source: Arc<dyn SnapshotSource>) {
        self.sources.lock().unwrap().insert(management.to_string(), source);
    }

    pub fn unregister(&self, management: &str) {
        self.sources.lock().unwrap().remove(management);
    }
}

#[async_trait::async_trait]
impl SnapshotClient for LocalNetwork {
    async fn fetch_snapshot(&self, management: &str) -> Result<Vec<u8>> {
        let source = self.sources.lock().unwrap().get(management).cloned();
        match source {
            Some(source) => source.snapshot().await,
            None => Err(Error::ConnectionFailed {
                address: management.to_string(),
                reason: "no route".into(),
            }),
        }
    }
}

/// A running test node
pub struct TestNode {
    pub handle: CoordinatorHandle,
    pub engine: Arc<SimulatedEngine>,
    pub member_id: String,
    pub identity: NodeIdentity,
}

impl TestNode {
    pub fn role(&self) -> RoleState {
        self.handle.role()
    }
}

pub fn identity(n: usize) -> NodeIdentity {
    NodeIdentity::new(format!("10.0.1.{}:11224", n), format!("10.0.1.{}:10005", n))
}

pub fn ha_config(retry_interval: Duration) -> HaConfig {
    HaConfig {
        retry_interval_ms: retry_interval.as_millis() as u64,
        ..HaConfig::default()
    }
}

/// Start node `n` with a fresh engine
pub async fn start_node(
    cluster: &InMemoryCluster,
    network: &Arc<LocalNetwork>,
    n: usize,
    config: &HaConfig,
) -> TestNode {
    let engine = SimulatedEngine::new(format!("node-{}", n));
    start_node_with(cluster, network, n, config, engine).await
}

/// Start node `n` around a prepared engine
pub async fn start_node_with(
    cluster: &InMemoryCluster,
    network: &Arc<LocalNetwork>,
    n: usize,
    config: &HaConfig,
    engine: Arc<SimulatedEngine>,
) -> TestNode {
    let member = cluster.join().await;
    let member_id = member.member_id().to_string();
    let coordination: Arc<dyn CoordinationService> = Arc::new(member);
    let identity = identity(n);

    let client: Arc<dyn SnapshotClient> = network.clone();
    let service = CoordinatorService::new(
        identity.clone(),
        coordination,
        engine.management(),
        client,
        config,
    );
    network.register(identity.management(), service.snapshot_source());

    let handle = service.start().await.unwrap();
    TestNode {
        handle,
        engine,
        member_id,
        identity,
    }
}

/// Kill a node as if its process died
pub async fn crash(cluster: &InMemoryCluster, network: &LocalNetwork, node: &TestNode) {
    network.unregister(node.identity.management());
    assert!(cluster.remove_member(&node.member_id).await);
    // Its own loop cannot reach the substrate any more
    let _ = node.handle.shutdown().await;
}

/// Identity registered under `role`, read from the substrate directly
pub async fn registered(cluster: &InMemoryCluster, config: &HaConfig, role: Role) -> Option<NodeIdentity> {
    cluster
        .entry(&config.role_map, role.as_str())
        .await
        .map(|bytes| NodeIdentity::from_bytes(&bytes).unwrap())
}

pub fn count_in(nodes: &[TestNode], state: RoleState) -> usize {
    nodes.iter().filter(|n| n.role() == state).count()
}

/// Wait until exactly one of `nodes` is active
pub async fn wait_for_single_active(nodes: &[TestNode], within: Duration) -> Option<usize> {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let active: Vec<usize> = nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.role().is_active())
            .map(|(i, _)| i)
            .collect();
        assert!(active.len() <= 1, "more than one active node: {:?}", active);
        if let [index] = active[..] {
            return Some(index);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
