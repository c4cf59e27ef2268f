//! Node Identity
//!
//! Every node advertises two endpoints: the transport address where it
//! receives forwarded events, and the management endpoint where peers
//! fetch its snapshot.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Immutable descriptor of one cluster node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Event transport address (host:port)
    transport: String,
    /// Management endpoint (host:port)
    management: String,
}

impl NodeIdentity {
    /// Create a new node identity
    pub fn new(transport: impl Into<String>, management: impl Into<String>) -> Self {
        Self {
            transport: transport.into(),
            management: management.into(),
        }
    }

    /// Address where this node receives forwarded events
    pub fn transport(&self) -> &str {
        &self.transport
    }

    /// Address where this node's snapshot can be fetched
    pub fn management(&self) -> &str {
        &self.management
    }

    /// Key used when this identity indexes a distributed map
    pub fn map_key(&self) -> String {
        format!("{}|{}", self.transport, self.management)
    }

    /// Encode for storage as a distributed map value
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode from a distributed map value
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl std::fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (mgmt {})", self.transport, self.management)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_equality_is_by_value() {
        let a = NodeIdentity::new("10.0.0.1:11224", "10.0.0.1:10005");
        let b = NodeIdentity::new("10.0.0.1:11224".to_string(), "10.0.0.1:10005".to_string());
        let c = NodeIdentity::new("10.0.0.1:11224", "10.0.0.1:10006");

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a.clone(), b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert_eq!(a.map_key(), "10.0.0.1:11224|10.0.0.1:10005");
    }

    #[test]
    fn test_map_value_encoding() {
        let id = NodeIdentity::new("node-a:11224", "node-a:10005");
        let bytes = id.to_bytes().unwrap();
        assert_eq!(NodeIdentity::from_bytes(&bytes).unwrap(), id);
        assert!(NodeIdentity::from_bytes(&[0xff]).is_err());
    }
}
