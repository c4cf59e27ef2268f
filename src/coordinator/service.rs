//! Coordinator Service
//!
//! Membership events, active-entry removals, retry ticks and handle
//! commands all arrive on channels consumed by one loop. That loop is
//! the only owner of the [`RoleCoordinator`], so transition attempts
//! never interleave.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use super::{Handoff, RetryScheduler, Role, RoleCoordinator, RoleState};
use crate::config::{HaConfig, WolfHaConfig};
use crate::coordination::{CoordinationService, EntryRemoved, MemberEvent, RoleRegistry};
use crate::error::{Error, Result};
use crate::identity::NodeIdentity;
use crate::subsystem::EventManagement;
use crate::transport::{SnapshotClient, SnapshotSource};

/// What caused a transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Initial attempt when the service starts
    Startup,
    /// A cluster member left
    MemberRemoved(String),
    /// The active registry entry was removed
    ActiveEntryRemoved,
    /// Periodic retry while not active
    Retry,
    /// Explicit request through the handle
    Manual,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::Startup => write!(f, "startup"),
            Trigger::MemberRemoved(member) => write!(f, "member {} removed", member),
            Trigger::ActiveEntryRemoved => write!(f, "active entry removed"),
            Trigger::Retry => write!(f, "retry"),
            Trigger::Manual => write!(f, "manual request"),
        }
    }
}

/// Requests to the coordinator loop
enum Command {
    Attempt {
        trigger: Trigger,
        reply: Option<oneshot::Sender<RoleState>>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Serves snapshots while this node is active
pub struct RoleSnapshotSource {
    handoff: Arc<Handoff>,
    role: watch::Receiver<RoleState>,
}

#[async_trait::async_trait]
impl SnapshotSource for RoleSnapshotSource {
    async fn snapshot(&self) -> Result<Vec<u8>> {
        let role = self.role();
        if !role.is_active() {
            return Err(Error::NotActive(role));
        }
        self.handoff.capture_state().await
    }

    fn role(&self) -> RoleState {
        *self.role.borrow()
    }
}

/// A configured, not yet running coordinator
pub struct CoordinatorService {
    coordinator: RoleCoordinator,
    coordination: Arc<dyn CoordinationService>,
    handoff: Arc<Handoff>,
    retry_interval: Duration,
}

impl CoordinatorService {
    /// Create a new coordinator service
    pub fn new(
        identity: NodeIdentity,
        coordination: Arc<dyn CoordinationService>,
        subsystems: EventManagement,
        client: Arc<dyn SnapshotClient>,
        config: &HaConfig,
    ) -> Self {
        let registry = RoleRegistry::new(Arc::clone(&coordination), config.role_map.clone());
        let handoff = Arc::new(Handoff::new(identity, registry, subsystems, client));
        let coordinator = RoleCoordinator::new(Arc::clone(&coordination), Arc::clone(&handoff), config);

        Self {
            coordinator,
            coordination,
            handoff,
            retry_interval: Duration::from_millis(config.retry_interval_ms),
        }
    }

    /// Create a coordinator service from a node configuration
    pub fn from_config(
        config: &WolfHaConfig,
        coordination: Arc<dyn CoordinationService>,
        subsystems: EventManagement,
        client: Arc<dyn SnapshotClient>,
    ) -> Self {
        Self::new(config.identity(), coordination, subsystems, client, &config.ha)
    }

    /// Snapshot provider for this node's management server
    ///
    /// Available before [`CoordinatorService::start`] so the server can be
    /// listening by the time peers learn about this node.
    pub fn snapshot_source(&self) -> Arc<RoleSnapshotSource> {
        Arc::new(RoleSnapshotSource {
            handoff: Arc::clone(&self.handoff),
            role: self.coordinator.subscribe(),
        })
    }

    /// Announce this node, subscribe to cluster events, and run the
    /// first transition attempt
    pub async fn start(self) -> Result<CoordinatorHandle> {
        let identity = self.coordinator.identity().clone();
        tracing::info!("Starting role coordinator for {}", identity);

        self.coordinator.announce().await?;
        let members = self.coordination.watch_members().await?;
        let removals = self.handoff.registry().watch(Role::Active).await?;

        let source = self.snapshot_source();
        let (commands_tx, commands_rx) = mpsc::channel(64);

        let event_loop = CoordinatorLoop {
            coordinator: self.coordinator,
            commands: commands_rx,
            retry_tx: commands_tx.downgrade(),
            members,
            removals,
            retry_interval: self.retry_interval,
            scheduler: None,
        };
        let task = tokio::spawn(event_loop.run());

        let handle = CoordinatorHandle {
            commands: commands_tx,
            source,
            identity,
            task: Arc::new(Mutex::new(Some(task))),
        };

        let state = handle.attempt(Trigger::Startup).await?;
        tracing::info!("Role coordinator for {} started as {}", handle.identity, state);
        Ok(handle)
    }
}

/// Single consumer of every transition trigger
struct CoordinatorLoop {
    coordinator: RoleCoordinator,
    commands: mpsc::Receiver<Command>,
    /// Weak so that dropping every handle ends the loop
    retry_tx: mpsc::WeakSender<Command>,
    members: mpsc::UnboundedReceiver<MemberEvent>,
    removals: mpsc::UnboundedReceiver<EntryRemoved>,
    retry_interval: Duration,
    scheduler: Option<RetryScheduler>,
}

impl CoordinatorLoop {
    async fn run(mut self) {
        loop {
            let command = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => command,
                    None => {
                        tracing::info!("All coordinator handles dropped, shutting down");
                        if let Err(e) = self.shutdown().await {
                            tracing::warn!("Shutdown after handle drop failed: {}", e);
                        }
                        break;
                    }
                },
                Some(event) = self.members.recv() => match event {
                    MemberEvent::Removed(member) => Command::Attempt {
                        trigger: Trigger::MemberRemoved(member),
                        reply: None,
                    },
                    MemberEvent::Added(member) => {
                        tracing::debug!("Member {} joined", member);
                        continue;
                    }
                },
                Some(_) = self.removals.recv() => Command::Attempt {
                    trigger: Trigger::ActiveEntryRemoved,
                    reply: None,
                },
            };

            match command {
                Command::Attempt { trigger, reply } => {
                    let state = self.handle(trigger).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(state);
                    }
                }
                Command::Shutdown { reply } => {
                    let result = self.shutdown().await;
                    let _ = reply.send(result);
                    break;
                }
            }
        }

        tracing::debug!("Coordinator loop stopped");
    }

    async fn handle(&mut self, trigger: Trigger) -> RoleState {
        if let Trigger::MemberRemoved(member) = &trigger {
            if self.coordinator.holds_active() {
                tracing::debug!("Active node ignores removal of member {}", member);
                return self.coordinator.state();
            }
        }

        tracing::debug!("Role transition triggered by {}", trigger);
        let state = self.coordinator.attempt_role_transition().await;
        self.reconcile_scheduler(state);
        state
    }

    /// Keep exactly one retry task alive while not active
    fn reconcile_scheduler(&mut self, state: RoleState) {
        if state.is_active() || state.is_terminal() {
            if let Some(scheduler) = self.scheduler.take() {
                scheduler.cancel();
            }
            return;
        }

        let running = self
            .scheduler
            .as_ref()
            .map_or(false, |scheduler| !scheduler.is_finished());
        if !running {
            self.scheduler = Some(self.spawn_scheduler());
        }
    }

    fn spawn_scheduler(&self) -> RetryScheduler {
        let commands = self.retry_tx.clone();

        RetryScheduler::spawn(self.retry_interval, move || {
            let commands = commands.clone();
            async move {
                let Some(commands) = commands.upgrade() else {
                    return false;
                };

                let (reply, state) = oneshot::channel();
                let command = Command::Attempt {
                    trigger: Trigger::Retry,
                    reply: Some(reply),
                };
                if commands.send(command).await.is_err() {
                    return false;
                }
                drop(commands);

                match state.await {
                    Ok(state) => !state.is_active() && !state.is_terminal(),
                    Err(_) => false,
                }
            }
        })
    }

    async fn shutdown(&mut self) -> Result<()> {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.cancel();
        }
        self.coordinator.shutdown().await
    }
}

/// Handle to a running coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<Command>,
    source: Arc<RoleSnapshotSource>,
    identity: NodeIdentity,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl CoordinatorHandle {
    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Current role state
    pub fn role(&self) -> RoleState {
        self.source.role()
    }

    /// Watch role state changes
    pub fn subscribe(&self) -> watch::Receiver<RoleState> {
        self.source.role.clone()
    }

    /// Request an immediate transition attempt
    pub async fn trigger(&self) -> Result<RoleState> {
        self.attempt(Trigger::Manual).await
    }

    async fn attempt(&self, trigger: Trigger) -> Result<RoleState> {
        let (reply, state) = oneshot::channel();
        self.commands
            .send(Command::Attempt {
                trigger,
                reply: Some(reply),
            })
            .await
            .map_err(|_| Error::ShuttingDown)?;
        state.await.map_err(|_| Error::ShuttingDown)
    }

    /// Capture this node's snapshot (active nodes only)
    pub async fn snapshot(&self) -> Result<Vec<u8>> {
        self.source.snapshot().await
    }

    /// Snapshot provider for a management server
    pub fn snapshot_source(&self) -> Arc<dyn SnapshotSource> {
        self.source.clone()
    }

    /// Wait until the role reaches `target`, up to `within`
    pub async fn wait_for(&self, target: RoleState, within: Duration) -> bool {
        let mut role = self.subscribe();
        let reached = matches!(
            tokio::time::timeout(within, role.wait_for(|state| *state == target)).await,
            Ok(Ok(_))
        );
        reached
    }

    /// Give up all roles and stop the coordinator loop
    ///
    /// Safe to call more than once; later calls return `Ok(())`.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, result) = oneshot::channel();
        let outcome = match self.commands.send(Command::Shutdown { reply }).await {
            Ok(()) => result.await.unwrap_or(Ok(())),
            Err(_) => Ok(()),
        };

        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
        outcome
    }
}
