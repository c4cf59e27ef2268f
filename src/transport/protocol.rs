//! Management Protocol
//!
//! Defines the wire protocol spoken on a node's management endpoint.

use serde::{Deserialize, Serialize};

use crate::coordinator::RoleState;

/// Largest frame body accepted from a peer
pub const MAX_FRAME_SIZE: u32 = 256 * 1024 * 1024;

/// Protocol messages for management communication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Ask the active node for its current snapshot
    SnapshotRequest,

    /// Encoded snapshot container
    SnapshotResponse { state: Vec<u8> },

    /// Ask a node for its current role
    RoleRequest,

    /// Current role of the answering node
    RoleResponse { role: RoleState },

    /// Error response
    Error { message: String },
}

impl Message {
    /// Serialize message to bytes
    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize message from bytes
    pub fn deserialize(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Get the message type name (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::SnapshotRequest => "SnapshotRequest",
            Message::SnapshotResponse { .. } => "SnapshotResponse",
            Message::RoleRequest => "RoleRequest",
            Message::RoleResponse { .. } => "RoleResponse",
            Message::Error { .. } => "Error",
        }
    }
}

/// Frame header for length-prefixed messages
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// Message length
    pub length: u32,
    /// Message checksum
    pub checksum: u32,
}

impl FrameHeader {
    /// Header size in bytes
    pub const SIZE: usize = 8;

    /// Create a new frame header
    pub fn new(data: &[u8]) -> Self {
        Self {
            length: data.len() as u32,
            checksum: crc32fast::hash(data),
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let [l0, l1, l2, l3, c0, c1, c2, c3] = *bytes;
        Self {
            length: u32::from_le_bytes([l0, l1, l2, l3]),
            checksum: u32::from_le_bytes([c0, c1, c2, c3]),
        }
    }
}
