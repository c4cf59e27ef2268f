//! WolfHA - Active/Passive Role Coordination
//!
//! Keeps exactly one node of a cluster of event-processing engines
//! active while the others stand by, and hands processing state over
//! when the active node goes away.
//!
//! # Architecture
//!
//! Roles are decided by two cluster-wide locks provided by a
//! coordination substrate. A node first takes the passive lock and only
//! then tries the active one; whoever holds the active lock publishes
//! output, the passive node shadows its input and loads its snapshot.
//!
//! # Features
//!
//! - Direct promotion of a lone node, standby for the next one
//! - Re-election on membership loss and on removal of the active entry
//! - Periodic retry while not active
//! - Pause/snapshot/restore/resume handoff over a TCP management endpoint
//! - Pluggable coordination substrate with an in-memory implementation

pub mod config;
pub mod coordination;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod snapshot;
pub mod subsystem;
pub mod transport;

pub use config::WolfHaConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::WolfHaConfig;
    pub use crate::coordination::{CoordinationService, InMemoryCluster};
    pub use crate::coordinator::{CoordinatorHandle, CoordinatorService, Role, RoleState};
    pub use crate::error::{Error, Result};
    pub use crate::identity::NodeIdentity;
    pub use crate::snapshot::Snapshot;
    pub use crate::subsystem::EventManagement;
    pub use crate::transport::{ManagementServer, TcpSnapshotClient};
}
