//! Role Election State Machine
//!
//! Two cluster locks decide roles. A node must hold the passive lock
//! before it may try the active one, so at most one challenger per
//! slot races for promotion. The lock is the authority; the registry
//! entry is written only while the matching lock is held.

use std::sync::Arc;
use tokio::sync::watch;

use super::{Handoff, Role, RoleState};
use crate::config::HaConfig;
use crate::coordination::{CoordinationService, MembershipSet};
use crate::error::Result;
use crate::identity::NodeIdentity;

/// Per-process role coordinator
///
/// Every mutating operation takes `&mut self`, so a single owner (the
/// coordinator loop) serializes transition attempts.
pub struct RoleCoordinator {
    /// Coordination substrate session
    coordination: Arc<dyn CoordinationService>,
    /// Presence bookkeeping
    members: MembershipSet,
    /// Role entry sequences
    handoff: Arc<Handoff>,
    /// Name of the active role lock
    active_lock: String,
    /// Name of the passive role lock
    passive_lock: String,
    /// Current state, mirrored to watchers
    state: watch::Sender<RoleState>,
    passive_held: bool,
    active_held: bool,
}

impl RoleCoordinator {
    /// Create a new role coordinator in `Unset`
    pub fn new(
        coordination: Arc<dyn CoordinationService>,
        handoff: Arc<Handoff>,
        config: &HaConfig,
    ) -> Self {
        let (state, _) = watch::channel(RoleState::Unset);

        Self {
            members: MembershipSet::new(Arc::clone(&coordination), config.members_map.clone()),
            coordination,
            handoff,
            active_lock: config.active_lock.clone(),
            passive_lock: config.passive_lock.clone(),
            state,
            passive_held: false,
            active_held: false,
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        self.handoff.identity()
    }

    /// Current state
    pub fn state(&self) -> RoleState {
        *self.state.borrow()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<RoleState> {
        self.state.subscribe()
    }

    pub fn holds_active(&self) -> bool {
        self.active_held
    }

    pub fn holds_passive(&self) -> bool {
        self.passive_held
    }

    /// Register this node in the membership set
    pub async fn announce(&self) -> Result<()> {
        self.members.announce(self.identity()).await
    }

    /// Run one re-election attempt
    ///
    /// Never fails: errors are logged and the coordinator settles back
    /// into whatever role its held locks still justify.
    pub async fn attempt_role_transition(&mut self) -> RoleState {
        if self.state().is_terminal() {
            return RoleState::ShuttingDown;
        }

        if let Err(e) = self.try_transition().await {
            tracing::warn!("Role transition attempt for {} failed: {}", self.identity(), e);
            self.settle();
        }

        self.state()
    }

    async fn try_transition(&mut self) -> Result<()> {
        if self.active_held {
            return Ok(());
        }

        if self.passive_held {
            // Standing by: try for promotion
            self.set_state(RoleState::AcquiringActive);
            if self.coordination.try_lock(&self.active_lock).await? {
                self.promote().await?;
            } else {
                self.set_state(RoleState::Passive);
            }
            return Ok(());
        }

        self.set_state(RoleState::AcquiringPassive);
        if !self.coordination.try_lock(&self.passive_lock).await? {
            tracing::debug!("Passive lock held elsewhere, {} stays unset", self.identity());
            self.set_state(RoleState::Unset);
            return Ok(());
        }
        self.passive_held = true;

        self.set_state(RoleState::AcquiringActive);
        let outcome = match self.coordination.try_lock(&self.active_lock).await {
            Ok(true) => self.promote().await,
            Ok(false) => self.enter_standby().await,
            Err(e) => Err(e),
        };

        if outcome.is_err() && !self.active_held {
            // Never finished entering a role: free the slot for others
            self.release_passive().await;
        }
        outcome
    }

    /// Take the active role; the active lock was just acquired
    async fn promote(&mut self) -> Result<()> {
        self.active_held = true;

        if let Err(e) = self.handoff.become_active().await {
            tracing::error!("Failed to become active, releasing active lock: {}", e);
            self.release_active().await;
            return Err(e);
        }
        self.set_state(RoleState::Active);

        // Passive was only a stepping stone
        self.release_passive().await;
        Ok(())
    }

    async fn enter_standby(&mut self) -> Result<()> {
        self.handoff.become_passive().await?;
        self.set_state(RoleState::Passive);
        Ok(())
    }

    /// Drop the passive lock and our passive entry (if still ours)
    async fn release_passive(&mut self) {
        if !self.passive_held {
            return;
        }

        match self.handoff.registry().lookup(Role::Passive).await {
            Ok(Some(holder)) if &holder == self.identity() => {
                if let Err(e) = self.handoff.registry().withdraw(Role::Passive).await {
                    tracing::warn!("Failed to withdraw passive entry: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Failed to read passive entry: {}", e),
        }

        if let Err(e) = self.coordination.force_unlock(&self.passive_lock).await {
            tracing::warn!("Failed to release passive lock: {}", e);
        }
        self.passive_held = false;
    }

    async fn release_active(&mut self) {
        if !self.active_held {
            return;
        }

        if let Err(e) = self.handoff.registry().withdraw(Role::Active).await {
            tracing::warn!("Failed to withdraw active entry: {}", e);
        }
        if let Err(e) = self.coordination.force_unlock(&self.active_lock).await {
            tracing::warn!("Failed to release active lock: {}", e);
        }
        self.active_held = false;
    }

    /// Give up all roles
    ///
    /// Idempotent: each held lock is released at most once.
    pub async fn shutdown(&mut self) -> Result<()> {
        if self.state().is_terminal() {
            return Ok(());
        }
        self.set_state(RoleState::ShuttingDown);

        let mut first_error = None;

        if self.passive_held {
            self.passive_held = false;
            let result = async {
                self.handoff.registry().withdraw(Role::Passive).await?;
                self.coordination.force_unlock(&self.passive_lock).await
            }
            .await;
            if let Err(e) = result {
                tracing::warn!("Failed to give up passive role: {}", e);
                first_error.get_or_insert(e);
            }
        }

        if self.active_held {
            self.active_held = false;
            let result = async {
                self.handoff.registry().withdraw(Role::Active).await?;
                self.coordination.force_unlock(&self.active_lock).await
            }
            .await;
            if let Err(e) = result {
                tracing::warn!("Failed to give up active role: {}", e);
                first_error.get_or_insert(e);
            }
        }

        if let Err(e) = self.members.withdraw(self.identity()).await {
            tracing::debug!("Failed to withdraw membership entry: {}", e);
        }

        tracing::info!("Role coordinator for {} shut down", self.identity());

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn set_state(&self, next: RoleState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!("{}: {} -> {}", self.identity(), previous, next);
        }
    }

    /// Fall back to the role the held locks justify
    fn settle(&self) {
        let state = if self.active_held {
            RoleState::Active
        } else if self.passive_held {
            RoleState::Passive
        } else {
            RoleState::Unset
        };
        self.set_state(state);
    }
}
