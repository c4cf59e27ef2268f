//! Snapshot Handoff
//!
//! Drives the managed subsystems through the role entry sequences and
//! through snapshot capture. Receiver and processor are always paused
//! before state is captured or restored and always resumed afterwards.
//! Paused sections are serialized per node, so one capture can never
//! resume the subsystems underneath another.

use std::sync::Arc;
use tokio::sync::Mutex;

use super::Role;
use crate::coordination::RoleRegistry;
use crate::error::{Error, Result};
use crate::identity::NodeIdentity;
use crate::snapshot::Snapshot;
use crate::subsystem::EventManagement;
use crate::transport::SnapshotClient;

/// Role entry and snapshot capture for one node
pub struct Handoff {
    /// This node's identity
    identity: NodeIdentity,
    /// Cluster role registry
    registry: RoleRegistry,
    /// Host engine facades
    subsystems: EventManagement,
    /// Client used to pull the active node's snapshot
    client: Arc<dyn SnapshotClient>,
    /// Held from pause to resume
    paused: Mutex<()>,
}

impl Handoff {
    /// Create a new handoff driver
    pub fn new(
        identity: NodeIdentity,
        registry: RoleRegistry,
        subsystems: EventManagement,
        client: Arc<dyn SnapshotClient>,
    ) -> Self {
        Self {
            identity,
            registry,
            subsystems,
            client,
            paused: Mutex::new(()),
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn registry(&self) -> &RoleRegistry {
        &self.registry
    }

    /// Take over output: advertise as active and open the gates
    pub async fn become_active(&self) -> Result<()> {
        self.registry.publish(Role::Active, &self.identity).await?;

        let receiver = &self.subsystems.receiver;
        receiver.start_server(self.identity.transport()).await?;
        self.subsystems.publisher.set_drop(false).await?;
        receiver.start().await?;

        tracing::info!("Node {} is now ACTIVE", self.identity);
        Ok(())
    }

    /// Enter standby: shadow the active node and load its snapshot
    ///
    /// A missing active entry or a failed fetch/apply leaves the node
    /// passive with whatever state it had.
    pub async fn become_passive(&self) -> Result<()> {
        self.registry.publish(Role::Passive, &self.identity).await?;

        let active = match self.registry.require(Role::Active).await {
            Ok(active) => Some(active),
            Err(e) => {
                tracing::warn!("Cannot resolve active node while entering standby: {}", e);
                None
            }
        };

        let receiver = &self.subsystems.receiver;
        // Drop before anything starts flowing
        self.subsystems.publisher.set_drop(true).await?;
        receiver.start_server(self.identity.transport()).await?;
        if let Some(active) = &active {
            receiver.set_peer(active.transport()).await?;
        }
        receiver.start().await?;

        let _guard = self.paused.lock().await;
        let paused = self.subsystems.pause_all().await;
        if paused.is_ok() {
            match &active {
                Some(active) => {
                    if let Err(e) = self.sync_from(active).await {
                        tracing::error!(
                            "Standby {} continues without snapshot from {}: {}",
                            self.identity,
                            active,
                            e
                        );
                    }
                }
                None => tracing::warn!("Standby {} starts without a snapshot", self.identity),
            }
        }
        let resumed = self.subsystems.resume_all().await;

        paused?;
        resumed?;

        tracing::info!("Node {} is now PASSIVE", self.identity);
        Ok(())
    }

    /// Fetch and apply the active node's snapshot (subsystems paused)
    async fn sync_from(&self, active: &NodeIdentity) -> Result<()> {
        let payload = self
            .client
            .fetch_snapshot(active.management())
            .await
            .map_err(|e| match e {
                Error::SnapshotFetch { .. } => e,
                other => Error::SnapshotFetch {
                    endpoint: active.management().to_string(),
                    reason: other.to_string(),
                },
            })?;

        let snapshot = Snapshot::decode(&payload)?;
        tracing::debug!(
            "Applying snapshot from {} ({} processor bytes, {} receiver bytes)",
            active,
            snapshot.processor.len(),
            snapshot.receiver.len()
        );

        self.subsystems
            .receiver
            .sync_state(&snapshot.receiver)
            .await
            .map_err(|e| Error::StateApply {
                subsystem: "receiver",
                reason: e.to_string(),
            })?;

        self.subsystems
            .processor
            .restore_state(&snapshot.processor)
            .await
            .map_err(|e| Error::StateApply {
                subsystem: "processor",
                reason: e.to_string(),
            })?;

        Ok(())
    }

    /// Capture this node's snapshot for a standby
    ///
    /// Also points the receiver's duplicate-output peer at the
    /// registered passive node.
    pub async fn capture_state(&self) -> Result<Vec<u8>> {
        let _guard = self.paused.lock().await;

        let captured = match self.subsystems.pause_all().await {
            Ok(()) => self.capture_paused().await,
            Err(e) => Err(e),
        };
        let resumed = self.subsystems.resume_all().await;

        let payload = captured?;
        resumed?;
        Ok(payload)
    }

    async fn capture_paused(&self) -> Result<Vec<u8>> {
        match self.registry.lookup(Role::Passive).await? {
            Some(passive) => self.subsystems.receiver.set_peer(passive.transport()).await?,
            None => tracing::warn!("Snapshot requested but no passive node is registered"),
        }

        let processor = self.subsystems.processor.get_state().await?;
        let receiver = self.subsystems.receiver.get_state().await?;
        Snapshot::new(processor, receiver).encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{CoordinationService, InMemoryCluster};
    use crate::subsystem::SimulatedEngine;
    use std::time::Duration;

    /// Client serving a fixed payload or failing
    struct StaticClient(Option<Vec<u8>>);

    #[async_trait::async_trait]
    impl SnapshotClient for StaticClient {
        async fn fetch_snapshot(&self, management: &str) -> Result<Vec<u8>> {
            self.0.clone().ok_or_else(|| Error::ConnectionFailed {
                address: management.to_string(),
                reason: "refused".into(),
            })
        }
    }

    async fn handoff(
        cluster: &InMemoryCluster,
        engine: &Arc<SimulatedEngine>,
        payload: Option<Vec<u8>>,
    ) -> Handoff {
        let member: Arc<dyn CoordinationService> = Arc::new(cluster.join().await);
        Handoff::new(
            NodeIdentity::new("10.0.0.2:11224", "10.0.0.2:10005"),
            RoleRegistry::new(member, "role-membership"),
            engine.management(),
            Arc::new(StaticClient(payload)),
        )
    }

    #[tokio::test]
    async fn test_become_active_sequence() {
        let cluster = InMemoryCluster::new();
        let engine = SimulatedEngine::new("b");
        let handoff = handoff(&cluster, &engine, None).await;

        handoff.become_active().await.unwrap();

        assert_eq!(
            engine.journal().await,
            vec![
                "receiver.start_server(10.0.0.2:11224)",
                "publisher.set_drop(false)",
                "receiver.start",
            ]
        );
        assert_eq!(
            handoff.registry().require(Role::Active).await.unwrap(),
            *handoff.identity()
        );
    }

    #[tokio::test]
    async fn test_become_passive_applies_snapshot_in_order() {
        let cluster = InMemoryCluster::new();
        let engine = SimulatedEngine::new("b");
        let payload = Snapshot::new(b"P".to_vec(), b"RR".to_vec()).encode().unwrap();
        let handoff = handoff(&cluster, &engine, Some(payload)).await;

        let active = NodeIdentity::new("10.0.0.1:11224", "10.0.0.1:10005");
        handoff.registry().publish(Role::Active, &active).await.unwrap();

        handoff.become_passive().await.unwrap();

        assert_eq!(
            engine.journal().await,
            vec![
                "publisher.set_drop(true)",
                "receiver.start_server(10.0.0.2:11224)",
                "receiver.set_peer(10.0.0.1:11224)",
                "receiver.start",
                "receiver.pause",
                "processor.pause",
                "receiver.sync_state(2 bytes)",
                "processor.restore_state(1 bytes)",
                "processor.resume",
                "receiver.resume",
            ]
        );
        assert_eq!(engine.processor_state().await, b"P");
        assert_eq!(engine.receiver_state().await, b"RR");
        assert!(engine.is_dropping().await);
    }

    #[tokio::test]
    async fn test_become_passive_survives_fetch_failure() {
        let cluster = InMemoryCluster::new();
        let engine = SimulatedEngine::new("b");
        engine.set_processor_state(b"stale".to_vec()).await;
        let handoff = handoff(&cluster, &engine, None).await;

        let active = NodeIdentity::new("10.0.0.1:11224", "10.0.0.1:10005");
        handoff.registry().publish(Role::Active, &active).await.unwrap();

        handoff.become_passive().await.unwrap();

        assert_eq!(engine.processor_state().await, b"stale");
        assert!(!engine.is_paused().await);
        assert!(engine.is_dropping().await);
    }

    #[tokio::test]
    async fn test_become_passive_without_active_entry() {
        let cluster = InMemoryCluster::new();
        let engine = SimulatedEngine::new("b");
        let handoff = handoff(&cluster, &engine, None).await;

        handoff.become_passive().await.unwrap();

        let journal = engine.journal().await;
        assert!(!journal.iter().any(|call| call.starts_with("receiver.set_peer")));
        assert!(!journal.iter().any(|call| call.starts_with("receiver.sync_state")));
        assert!(!engine.is_paused().await);
    }

    #[tokio::test]
    async fn test_become_passive_tolerates_restore_failure() {
        let cluster = InMemoryCluster::new();
        let engine = SimulatedEngine::new("b");
        engine.fail_restore(true).await;
        let payload = Snapshot::new(b"P".to_vec(), b"R".to_vec()).encode().unwrap();
        let handoff = handoff(&cluster, &engine, Some(payload)).await;

        let active = NodeIdentity::new("10.0.0.1:11224", "10.0.0.1:10005");
        handoff.registry().publish(Role::Active, &active).await.unwrap();

        handoff.become_passive().await.unwrap();

        // Receiver state applied, processor kept its own, both resumed
        assert_eq!(engine.receiver_state().await, b"R");
        assert!(engine.processor_state().await.is_empty());
        assert!(!engine.is_paused().await);
    }

    #[tokio::test]
    async fn test_capture_state_orders_processor_first() {
        let cluster = InMemoryCluster::new();
        let engine = SimulatedEngine::new("a");
        engine.set_processor_state(b"proc".to_vec()).await;
        engine.set_receiver_state(b"recv".to_vec()).await;
        let handoff = handoff(&cluster, &engine, None).await;

        let passive = NodeIdentity::new("10.0.0.3:11224", "10.0.0.3:10005");
        handoff.registry().publish(Role::Passive, &passive).await.unwrap();

        let snapshot = Snapshot::decode(&handoff.capture_state().await.unwrap()).unwrap();
        assert_eq!(snapshot.processor, b"proc");
        assert_eq!(snapshot.receiver, b"recv");

        assert_eq!(
            engine.journal().await,
            vec![
                "receiver.pause",
                "processor.pause",
                "receiver.set_peer(10.0.0.3:11224)",
                "processor.get_state",
                "receiver.get_state",
                "processor.resume",
                "receiver.resume",
            ]
        );
        assert_eq!(engine.peer().await.as_deref(), Some("10.0.0.3:11224"));
    }

    #[tokio::test]
    async fn test_capture_state_resumes_after_pause_failure() {
        let cluster = InMemoryCluster::new();
        let engine = SimulatedEngine::new("a");
        engine.fail_pause(true).await;
        let handoff = handoff(&cluster, &engine, None).await;

        assert!(matches!(handoff.capture_state().await, Err(Error::Subsystem(_))));
        assert!(!engine.is_paused().await);
        assert_eq!(
            engine.journal().await,
            vec![
                "receiver.pause",
                "processor.pause",
                "receiver.resume",
                "processor.resume",
                "receiver.resume",
            ]
        );

        // Recovers once the processor accepts pauses again
        engine.fail_pause(false).await;
        assert!(handoff.capture_state().await.is_ok());
        assert!(!engine.is_paused().await);
    }

    #[tokio::test]
    async fn test_become_passive_resumes_after_pause_failure() {
        let cluster = InMemoryCluster::new();
        let engine = SimulatedEngine::new("b");
        engine.fail_pause(true).await;
        let payload = Snapshot::new(b"P".to_vec(), b"R".to_vec()).encode().unwrap();
        let handoff = handoff(&cluster, &engine, Some(payload)).await;

        let active = NodeIdentity::new("10.0.0.1:11224", "10.0.0.1:10005");
        handoff.registry().publish(Role::Active, &active).await.unwrap();

        assert!(handoff.become_passive().await.is_err());
        assert!(!engine.is_paused().await);

        // Nothing applied while the pause was refused
        let journal = engine.journal().await;
        assert!(!journal.iter().any(|call| call.starts_with("receiver.sync_state")));
        assert_eq!(journal.last().map(String::as_str), Some("receiver.resume"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_captures_do_not_interleave() {
        let cluster = InMemoryCluster::new();
        let engine = SimulatedEngine::new("a");
        engine.delay_capture(Some(Duration::from_millis(50))).await;
        let handoff = handoff(&cluster, &engine, None).await;

        let (first, second) = tokio::join!(handoff.capture_state(), handoff.capture_state());
        assert!(first.is_ok());
        assert!(second.is_ok());
        assert!(!engine.is_paused().await);

        let one = [
            "receiver.pause",
            "processor.pause",
            "processor.get_state",
            "receiver.get_state",
            "processor.resume",
            "receiver.resume",
        ];
        let expected: Vec<&str> = one.iter().chain(one.iter()).copied().collect();
        assert_eq!(engine.journal().await, expected);
    }
}
