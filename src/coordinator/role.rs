//! Roles and coordinator states

use serde::{Deserialize, Serialize};

/// Cluster role a node can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Authorized to publish externally-visible output
    Active,
    /// Standby receiving shadow input and snapshots
    Passive,
}

impl Role {
    /// Registry key for this role
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Active => "active",
            Role::Passive => "passive",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coordinator state machine
///
/// `Unset -> {AcquiringPassive, AcquiringActive} -> {Passive, Active} -> ShuttingDown`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleState {
    /// Holding no role lock
    Unset,
    /// Trying the passive lock
    AcquiringPassive,
    /// Holding the passive lock and probing the active one
    AcquiringActive,
    /// Standby
    Passive,
    /// Authoritative
    Active,
    /// Terminal
    ShuttingDown,
}

impl RoleState {
    pub fn is_active(&self) -> bool {
        matches!(self, RoleState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RoleState::ShuttingDown)
    }
}

impl std::fmt::Display for RoleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoleState::Unset => write!(f, "unset"),
            RoleState::AcquiringPassive => write!(f, "acquiring-passive"),
            RoleState::AcquiringActive => write!(f, "acquiring-active"),
            RoleState::Passive => write!(f, "passive"),
            RoleState::Active => write!(f, "active"),
            RoleState::ShuttingDown => write!(f, "shutting-down"),
        }
    }
}
