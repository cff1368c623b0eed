//! Key encoding and decoding for the notification queue.
//!
//! Key format: `notify:{index_name}:{sequence:020}`. The zero-padded
//! sequence keeps a prefix scan over one index in arrival order.

use indexer_types::IndexType;

use crate::error::StorageError;

/// Key for a pending notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationKey {
    /// Index the notification belongs to
    pub index_type: IndexType,
    /// Monotonic sequence across all indexes
    pub sequence: u64,
}

impl NotificationKey {
    /// Create a key for the given index and sequence
    pub fn new(index_type: IndexType, sequence: u64) -> Self {
        Self {
            index_type,
            sequence,
        }
    }

    /// Prefix shared by every notification key of one index
    pub fn prefix(index_type: IndexType) -> Vec<u8> {
        format!("notify:{}:", index_type.index_name()).into_bytes()
    }

    /// Encode key to bytes for storage
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("notify:{}:{:020}", self.index_type.index_name(), self.sequence).into_bytes()
    }

    /// Decode key from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;

        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 || parts[0] != "notify" {
            return Err(StorageError::Key(format!(
                "Invalid notification key format: {}",
                s
            )));
        }

        let index_type = parts[1]
            .parse::<IndexType>()
            .map_err(|e| StorageError::Key(e.to_string()))?;
        let sequence = parts[2]
            .parse::<u64>()
            .map_err(|e| StorageError::Key(format!("Invalid sequence: {}", e)))?;

        Ok(Self {
            index_type,
            sequence,
        })
    }
}
