//! Cluster Coordination Module
//!
//! The coordinator relies on an external substrate for named locks,
//! distributed maps and membership notifications. [`CoordinationService`]
//! is the whole contract; any backend that is linearizable across the
//! cluster can implement it.

mod memory;

pub use memory::{InMemoryCluster, InMemoryMember};

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::coordinator::Role;
use crate::error::{Error, Result};
use crate::identity::NodeIdentity;

/// Cluster membership change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberEvent {
    /// A member joined the cluster
    Added(String),
    /// A member left or was declared dead
    Removed(String),
}

/// Removal of a watched distributed map entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRemoved {
    pub map: String,
    pub key: String,
}

/// Cluster coordination substrate
///
/// Locks are advisory tokens owned by the calling member. Only the
/// non-blocking acquire is exposed: callers retry later instead of
/// waiting on an unreachable holder.
#[async_trait::async_trait]
pub trait CoordinationService: Send + Sync {
    /// Identifier of this member within the substrate
    fn member_id(&self) -> &str;

    /// Try to take the named lock without blocking
    async fn try_lock(&self, name: &str) -> Result<bool>;

    /// Release the named lock regardless of owner
    async fn force_unlock(&self, name: &str) -> Result<()>;

    async fn get(&self, map: &str, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, map: &str, key: &str, value: Vec<u8>) -> Result<()>;

    async fn remove(&self, map: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Subscribe to removals of a single map entry
    async fn watch_removal(&self, map: &str, key: &str)
        -> Result<mpsc::UnboundedReceiver<EntryRemoved>>;

    /// Subscribe to cluster membership changes
    async fn watch_members(&self) -> Result<mpsc::UnboundedReceiver<MemberEvent>>;
}

/// Cluster-wide record of which node holds which role
#[derive(Clone)]
pub struct RoleRegistry {
    coordination: Arc<dyn CoordinationService>,
    map: String,
}

impl RoleRegistry {
    /// Create a registry over the given distributed map
    pub fn new(coordination: Arc<dyn CoordinationService>, map: impl Into<String>) -> Self {
        Self {
            coordination,
            map: map.into(),
        }
    }

    /// Record `identity` as the holder of `role`
    pub async fn publish(&self, role: Role, identity: &NodeIdentity) -> Result<()> {
        self.coordination
            .set(&self.map, role.as_str(), identity.to_bytes()?)
            .await
    }

    /// Look up the holder of `role`
    pub async fn lookup(&self, role: Role) -> Result<Option<NodeIdentity>> {
        match self.coordination.get(&self.map, role.as_str()).await? {
            Some(bytes) => Ok(Some(NodeIdentity::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Look up the holder of `role`, treating absence as an error
    pub async fn require(&self, role: Role) -> Result<NodeIdentity> {
        self.lookup(role).await?.ok_or(Error::RoleVacant(role))
    }

    /// Remove the entry for `role`
    pub async fn withdraw(&self, role: Role) -> Result<()> {
        self.coordination.remove(&self.map, role.as_str()).await?;
        Ok(())
    }

    /// Subscribe to removals of the entry for `role`
    pub async fn watch(&self, role: Role) -> Result<mpsc::UnboundedReceiver<EntryRemoved>> {
        self.coordination.watch_removal(&self.map, role.as_str()).await
    }
}

/// Cluster-wide presence bookkeeping
#[derive(Clone)]
pub struct MembershipSet {
    coordination: Arc<dyn CoordinationService>,
    map: String,
}

impl MembershipSet {
    /// Create a membership set over the given distributed map
    pub fn new(coordination: Arc<dyn CoordinationService>, map: impl Into<String>) -> Self {
        Self {
            coordination,
            map: map.into(),
        }
    }

    /// Mark `identity` as present
    pub async fn announce(&self, identity: &NodeIdentity) -> Result<()> {
        self.coordination
            .set(&self.map, &identity.map_key(), bincode::serialize(&true)?)
            .await
    }

    /// Remove the presence entry for `identity`
    pub async fn withdraw(&self, identity: &NodeIdentity) -> Result<()> {
        self.coordination.remove(&self.map, &identity.map_key()).await?;
        Ok(())
    }
}
