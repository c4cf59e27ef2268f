//! Snapshot Container
//!
//! The handoff payload shipped from the active node to a passive one.
//! It carries two opaque blobs in a fixed order: processor state first,
//! receiver state second. Producer and consumer may run different builds,
//! so the layout is versioned and checksummed:
//!
//! ```text
//! +-------+-------+----------------------------------------------+
//! | magic | crc32 | bincode((processor: Vec<u8>, receiver: Vec<u8>)) |
//! | 4 B   | 4 B LE| each blob u64-length-prefixed                |
//! +-------+-------+----------------------------------------------+
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Container magic and format version
const MAGIC: [u8; 4] = *b"WHS1";

/// Header size: magic + checksum
const HEADER_SIZE: usize = 8;

/// Ordered pair of opaque subsystem states
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Processor state (always first on the wire)
    pub processor: Vec<u8>,
    /// Receiver state (always second on the wire)
    pub receiver: Vec<u8>,
}

impl Snapshot {
    /// Create a snapshot from the two captured states
    pub fn new(processor: Vec<u8>, receiver: Vec<u8>) -> Self {
        Self { processor, receiver }
    }

    /// Encode into a single self-delimiting payload
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)?;

        let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode a payload produced by [`Snapshot::encode`]
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::MalformedSnapshot(format!(
                "payload is {} bytes, shorter than the {} byte header",
                bytes.len(),
                HEADER_SIZE
            )));
        }

        let (header, body) = bytes.split_at(HEADER_SIZE);
        if header[0..4] != MAGIC {
            return Err(Error::MalformedSnapshot("unknown magic or version".into()));
        }

        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&header[4..8]);
        if crc32fast::hash(body) != u32::from_le_bytes(checksum) {
            return Err(Error::MalformedSnapshot("checksum mismatch".into()));
        }

        let snapshot: Snapshot = bincode::deserialize(body)
            .map_err(|e| Error::MalformedSnapshot(e.to_string()))?;

        // bincode tolerates trailing bytes; the container does not
        let consumed = bincode::serialized_size(&snapshot)? as usize;
        if consumed != body.len() {
            return Err(Error::MalformedSnapshot(format!(
                "{} trailing bytes after state pair",
                body.len() - consumed
            )));
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_survives_encoding() {
        let snapshot = Snapshot::new(b"processor-state".to_vec(), b"receiver-state".to_vec());
        let decoded = Snapshot::decode(&snapshot.encode().unwrap()).unwrap();

        assert_eq!(decoded.processor, b"processor-state");
        assert_eq!(decoded.receiver, b"receiver-state");
    }

    #[test]
    fn test_empty_blobs() {
        for snapshot in [
            Snapshot::default(),
            Snapshot::new(Vec::new(), vec![1, 2, 3]),
            Snapshot::new(vec![0; 4096], Vec::new()),
        ] {
            let decoded = Snapshot::decode(&snapshot.encode().unwrap()).unwrap();
            assert_eq!(decoded, snapshot);
        }
    }

    #[test]
    fn test_binary_content_with_embedded_headers() {
        // Blobs that look like length prefixes or magic must not confuse decoding
        let mut tricky = MAGIC.to_vec();
        tricky.extend_from_slice(&u64::MAX.to_le_bytes());
        let snapshot = Snapshot::new(tricky.clone(), (0..=255u8).collect());

        let decoded = Snapshot::decode(&snapshot.encode().unwrap()).unwrap();
        assert_eq!(decoded.processor, tricky);
        assert_eq!(decoded.receiver.len(), 256);
    }

    #[test]
    fn test_rejects_truncated_payload() {
        let encoded = Snapshot::new(vec![7; 32], vec![9; 32]).encode().unwrap();

        assert!(matches!(
            Snapshot::decode(&encoded[..4]),
            Err(Error::MalformedSnapshot(_))
        ));
        assert!(matches!(
            Snapshot::decode(&encoded[..encoded.len() - 1]),
            Err(Error::MalformedSnapshot(_))
        ));
    }

    #[test]
    fn test_rejects_corruption_and_trailing_bytes() {
        let mut encoded = Snapshot::new(vec![1; 8], vec![2; 8]).encode().unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xff;
        assert!(Snapshot::decode(&encoded).is_err());

        let mut encoded = Snapshot::new(vec![1; 8], vec![2; 8]).encode().unwrap();
        encoded[0] = b'X';
        assert!(Snapshot::decode(&encoded).is_err());

        // Extra bytes with a recomputed checksum are still rejected
        let snapshot = Snapshot::new(vec![1; 8], vec![2; 8]);
        let mut body = bincode::serialize(&snapshot).unwrap();
        body.push(0);
        let mut forged = MAGIC.to_vec();
        forged.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        forged.extend_from_slice(&body);
        assert!(matches!(
            Snapshot::decode(&forged),
            Err(Error::MalformedSnapshot(_))
        ));
    }
}
