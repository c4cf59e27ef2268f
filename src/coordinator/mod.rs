//! Role Coordination Module
//!
//! Active/passive election over cluster locks, the snapshot handoff
//! that brings a standby up to date, and the loop that serializes
//! every trigger into one transition at a time.

mod handoff;
mod machine;
mod role;
mod scheduler;
mod service;

pub use handoff::Handoff;
pub use machine::RoleCoordinator;
pub use role::{Role, RoleState};
pub use scheduler::RetryScheduler;
pub use service::{CoordinatorHandle, CoordinatorService, RoleSnapshotSource, Trigger};
