//! Domain model types for the persistence abstraction layer
//!
//! These types are used as return values from the persistence traits,
//! decoupled from specific storage backends.

use serde::{Deserialize, Serialize};

/// Lock row joined with the holder's display info
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStorageData {
    pub record_id: String,
    pub holder_id: String,
    pub holder_name: String,
    pub holder_email: String,
    /// Expiry as epoch milliseconds
    pub expires_at: i64,
}

/// Basic user information returned from persistence
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
}

/// Storage mode for the persistence layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageMode {
    /// External database (MySQL/PostgreSQL via SeaORM)
    ExternalDb,
    /// In-process store (single node, no external DB)
    Embedded,
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageMode::ExternalDb => write!(f, "external-db"),
            StorageMode::Embedded => write!(f, "embedded"),
        }
    }
}

impl std::str::FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "external-db" | "external_db" | "mysql" | "postgresql" => Ok(StorageMode::ExternalDb),
            "embedded" | "memory" => Ok(StorageMode::Embedded),
            _ => Err(format!("unknown storage mode: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_mode_parse() {
        assert_eq!(
            "external-db".parse::<StorageMode>().unwrap(),
            StorageMode::ExternalDb
        );
        assert_eq!("Embedded".parse::<StorageMode>().unwrap(), StorageMode::Embedded);
        assert!("rocksdb".parse::<StorageMode>().is_err());
    }

    #[test]
    fn test_storage_mode_display_round_trip() {
        for mode in [StorageMode::ExternalDb, StorageMode::Embedded] {
            assert_eq!(mode.to_string().parse::<StorageMode>().unwrap(), mode);
        }
    }
}
