//! In-Memory Coordination Substrate
//!
//! A process-local cluster for single-host deployments and tests.
//! Each participant joins as a member with its own session; locks are
//! owned by sessions. Removing a member behaves like a crashed process:
//! its locks are released and every surviving member is notified, while
//! the map entries it wrote stay behind.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use super::{CoordinationService, EntryRemoved, MemberEvent};
use crate::error::{Error, Result};

/// Subscriber to a single map entry
struct EntryWatcher {
    member: String,
    map: String,
    key: String,
    tx: mpsc::UnboundedSender<EntryRemoved>,
}

/// Shared substrate state
#[derive(Default)]
struct ClusterState {
    /// Live members
    members: HashSet<String>,
    /// Lock name -> owning member
    locks: HashMap<String, String>,
    /// Map name -> key -> value
    maps: HashMap<String, HashMap<String, Vec<u8>>>,
    entry_watchers: Vec<EntryWatcher>,
    member_watchers: Vec<(String, mpsc::UnboundedSender<MemberEvent>)>,
}

impl ClusterState {
    fn ensure_member(&self, member: &str) -> Result<()> {
        if self.members.contains(member) {
            Ok(())
        } else {
            Err(Error::Coordination(format!("member {} is not part of the cluster", member)))
        }
    }

    fn notify_members(&mut self, event: MemberEvent, skip: &str) {
        self.member_watchers.retain(|(member, tx)| {
            if member == skip {
                return true;
            }
            tx.send(event.clone()).is_ok()
        });
    }
}

/// Process-local coordination cluster
#[derive(Clone, Default)]
pub struct InMemoryCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl InMemoryCluster {
    /// Create an empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a new member and return its session
    pub async fn join(&self) -> InMemoryMember {
        let member_id = uuid::Uuid::new_v4().to_string();
        let mut state = self.state.lock().await;
        state.members.insert(member_id.clone());
        state.notify_members(MemberEvent::Added(member_id.clone()), &member_id);

        tracing::debug!("Member {} joined in-memory cluster", member_id);

        InMemoryMember {
            member_id,
            state: Arc::clone(&self.state),
        }
    }

    /// Remove a member as if its process died
    ///
    /// Returns false if the member was not part of the cluster.
    pub async fn remove_member(&self, member_id: &str) -> bool {
        let mut state = self.state.lock().await;
        if !state.members.remove(member_id) {
            return false;
        }

        let released: Vec<String> = state
            .locks
            .iter()
            .filter(|(_, owner)| owner.as_str() == member_id)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &released {
            state.locks.remove(name);
        }

        state.entry_watchers.retain(|w| w.member != member_id);
        state.member_watchers.retain(|(member, _)| member != member_id);
        state.notify_members(MemberEvent::Removed(member_id.to_string()), member_id);

        tracing::debug!(
            "Member {} removed from in-memory cluster, released locks {:?}",
            member_id,
            released
        );
        true
    }

    /// Current owner of a lock, if any
    pub async fn lock_owner(&self, name: &str) -> Option<String> {
        self.state.lock().await.locks.get(name).cloned()
    }

    /// Read a map entry without being a member
    pub async fn entry(&self, map: &str, key: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().await;
        state.maps.get(map).and_then(|m| m.get(key)).cloned()
    }

    /// Number of live members
    pub async fn member_count(&self) -> usize {
        self.state.lock().await.members.len()
    }
}

/// One member's session in an [`InMemoryCluster`]
pub struct InMemoryMember {
    member_id: String,
    state: Arc<Mutex<ClusterState>>,
}

#[async_trait::async_trait]
impl CoordinationService for InMemoryMember {
    fn member_id(&self) -> &str {
        &self.member_id
    }

    async fn try_lock(&self, name: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.ensure_member(&self.member_id)?;

        match state.locks.get(name) {
            Some(owner) => Ok(owner == &self.member_id),
            None => {
                state.locks.insert(name.to_string(), self.member_id.clone());
                Ok(true)
            }
        }
    }

    async fn force_unlock(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_member(&self.member_id)?;
        state.locks.remove(name);
        Ok(())
    }

    async fn get(&self, map: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let state = self.state.lock().await;
        state.ensure_member(&self.member_id)?;
        Ok(state.maps.get(map).and_then(|m| m.get(key)).cloned())
    }

    async fn set(&self, map: &str, key: &str, value: Vec<u8>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_member(&self.member_id)?;
        state
            .maps
            .entry(map.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, map: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let mut state = self.state.lock().await;
        state.ensure_member(&self.member_id)?;

        let removed = state.maps.get_mut(map).and_then(|m| m.remove(key));
        if removed.is_some() {
            state.entry_watchers.retain(|w| {
                if w.map != map || w.key != key {
                    return true;
                }
                w.tx.send(EntryRemoved {
                    map: map.to_string(),
                    key: key.to_string(),
                })
                .is_ok()
            });
        }
        Ok(removed)
    }

    async fn watch_removal(
        &self,
        map: &str,
        key: &str,
    ) -> Result<mpsc::UnboundedReceiver<EntryRemoved>> {
        let mut state = self.state.lock().await;
        state.ensure_member(&self.member_id)?;

        let (tx, rx) = mpsc::unbounded_channel();
        state.entry_watchers.push(EntryWatcher {
            member: self.member_id.clone(),
            map: map.to_string(),
            key: key.to_string(),
            tx,
        });
        Ok(rx)
    }

    async fn watch_members(&self) -> Result<mpsc::UnboundedReceiver<MemberEvent>> {
        let mut state = self.state.lock().await;
        state.ensure_member(&self.member_id)?;

        let (tx, rx) = mpsc::unbounded_channel();
        state.member_watchers.push((self.member_id.clone(), tx));
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lock_exclusion() {
        let cluster = InMemoryCluster::new();
        let a = cluster.join().await;
        let b = cluster.join().await;

        assert!(a.try_lock("active").await.unwrap());
        assert!(!b.try_lock("active").await.unwrap());
        // Re-acquire by the owner succeeds
        assert!(a.try_lock("active").await.unwrap());
        assert_eq!(cluster.lock_owner("active").await.as_deref(), Some(a.member_id()));

        b.force_unlock("active").await.unwrap();
        assert!(b.try_lock("active").await.unwrap());
    }

    #[tokio::test]
    async fn test_member_removal_releases_locks_and_notifies() {
        let cluster = InMemoryCluster::new();
        let a = cluster.join().await;
        let b = cluster.join().await;
        let mut events = b.watch_members().await.unwrap();

        assert!(a.try_lock("active").await.unwrap());
        a.set("roles", "active", b"a".to_vec()).await.unwrap();

        assert!(cluster.remove_member(a.member_id()).await);
        assert!(!cluster.remove_member(a.member_id()).await);

        assert_eq!(
            events.try_recv().unwrap(),
            MemberEvent::Removed(a.member_id().to_string())
        );
        assert!(cluster.lock_owner("active").await.is_none());
        // Entries written by a dead member survive it
        assert_eq!(cluster.entry("roles", "active").await, Some(b"a".to_vec()));
        assert_eq!(cluster.member_count().await, 1);

        // A removed member can no longer operate
        assert!(a.try_lock("active").await.is_err());
        assert!(b.try_lock("active").await.unwrap());
    }

    #[tokio::test]
    async fn test_join_notifies_existing_members() {
        let cluster = InMemoryCluster::new();
        let a = cluster.join().await;
        let mut events = a.watch_members().await.unwrap();

        let b = cluster.join().await;
        assert_eq!(
            events.try_recv().unwrap(),
            MemberEvent::Added(b.member_id().to_string())
        );
    }

    #[tokio::test]
    async fn test_removal_of_absent_entry_is_silent() {
        let cluster = InMemoryCluster::new();
        let a = cluster.join().await;
        let mut removals = a.watch_removal("roles", "active").await.unwrap();

        assert!(a.remove("roles", "active").await.unwrap().is_none());
        assert!(removals.try_recv().is_err());
    }
}
