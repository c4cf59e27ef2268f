//! WolfHA Error Types

use thiserror::Error;

use crate::coordinator::{Role, RoleState};

/// Result type alias for WolfHA operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfHA error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    // Coordination substrate errors
    #[error("Coordination error: {0}")]
    Coordination(String),

    #[error("No node currently registered as {0}")]
    RoleVacant(Role),

    #[error("Node is not active (current role: {0})")]
    NotActive(RoleState),

    // Snapshot handoff errors
    #[error("Snapshot fetch from {endpoint} failed: {reason}")]
    SnapshotFetch { endpoint: String, reason: String },

    #[error("Malformed snapshot: {0}")]
    MalformedSnapshot(String),

    #[error("Failed to apply {subsystem} state: {reason}")]
    StateApply { subsystem: &'static str, reason: String },

    #[error("Subsystem error: {0}")]
    Subsystem(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl Error {
    /// Check if this error is retryable
    ///
    /// Retryable errors leave the node in its current role; the next
    /// trigger or retry tick attempts the transition again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Coordination(_)
                | Error::RoleVacant(_)
                | Error::SnapshotFetch { .. }
                | Error::Network(_)
                | Error::ConnectionFailed { .. }
                | Error::ConnectionTimeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::ConnectionTimeout("10.0.0.2:10005".into()).is_retryable());
        assert!(Error::RoleVacant(Role::Active).is_retryable());
        assert!(!Error::MalformedSnapshot("short".into()).is_retryable());
        assert!(!Error::ShuttingDown.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = Error::StateApply {
            subsystem: "processor",
            reason: "bad blob".into(),
        };
        assert_eq!(err.to_string(), "Failed to apply processor state: bad blob");
        assert_eq!(
            Error::RoleVacant(Role::Passive).to_string(),
            "No node currently registered as passive"
        );
    }
}
