//! Index notifications for explicit update, delete, and rebuild requests.
//!
//! Notifications are recorded by other parts of the system when an entity
//! changes in a way the change-date query cannot see (or when an operator
//! asks for a rebuild). They are consumed on the next build of their index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::index::{Identifier, IndexType};

/// Kind of change a notification asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    /// Re-index the affected entity
    Update,
    /// Remove the affected entity from the index
    Delete,
    /// Rebuild the whole index
    Rebuild,
}

impl std::str::FromStr for UpdateType {
    type Err = crate::IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "update" => Ok(UpdateType::Update),
            "delete" => Ok(UpdateType::Delete),
            "rebuild" => Ok(UpdateType::Rebuild),
            other => Err(crate::IndexerError::InvalidInput(format!(
                "unknown update type '{}'",
                other
            ))),
        }
    }
}

/// A pending request against one index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexNotification {
    /// Index affected by this notification
    pub index_type: IndexType,
    /// What to do
    pub update_type: UpdateType,
    /// Entity affected; `None` for index-wide requests
    pub affected_id: Option<Identifier>,
    /// When the notification was recorded (milliseconds since epoch)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl IndexNotification {
    /// Request re-indexing of one entity.
    pub fn update(index_type: IndexType, id: Identifier) -> Self {
        Self::new(index_type, UpdateType::Update, Some(id))
    }

    /// Request removal of one entity.
    pub fn delete(index_type: IndexType, id: Identifier) -> Self {
        Self::new(index_type, UpdateType::Delete, Some(id))
    }

    /// Request a full rebuild.
    pub fn rebuild(index_type: IndexType) -> Self {
        Self::new(index_type, UpdateType::Rebuild, None)
    }

    fn new(index_type: IndexType, update_type: UpdateType, affected_id: Option<Identifier>) -> Self {
        Self {
            index_type,
            update_type,
            affected_id,
            created_at: Utc::now(),
        }
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let n = IndexNotification::update(IndexType::Product, 5);
        assert_eq!(n.update_type, UpdateType::Update);
        assert_eq!(n.affected_id, Some(5));

        let n = IndexNotification::rebuild(IndexType::Category);
        assert_eq!(n.update_type, UpdateType::Rebuild);
        assert!(n.affected_id.is_none());
    }

    #[test]
    fn test_notification_json() {
        let n = IndexNotification::delete(IndexType::Sku, 9);
        let json = String::from_utf8(n.to_bytes().unwrap()).unwrap();
        assert!(json.contains("\"update_type\":\"delete\""));
        assert!(json.contains("\"affected_id\":9"));

        let decoded = IndexNotification::from_bytes(json.as_bytes()).unwrap();
        assert_eq!(decoded.index_type, IndexType::Sku);
        assert_eq!(decoded.affected_id, Some(9));
    }

    #[test]
    fn test_update_type_from_str() {
        assert_eq!("Rebuild".parse::<UpdateType>().unwrap(), UpdateType::Rebuild);
        assert!("purge".parse::<UpdateType>().is_err());
    }
}
