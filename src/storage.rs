//! Routing group storage seam.
//!
//! Groups live in external storage as `{service: weight}` mappings. The
//! locator only ever lists group names and loads one mapping at a time; a
//! missing group is a normal condition (`GroupNotFound`), a failing backend
//! is not (`Storage`).
use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{LocatorError, Result};

/// A routing group in persistent form.
pub type GroupMapping = BTreeMap<String, u32>;

#[async_trait]
pub trait GroupStorage: Send + Sync {
    /// Names of all stored groups.
    async fn list_groups(&self) -> Result<Vec<String>>;

    /// Load one group's mapping. `GroupNotFound` when the group does not
    /// exist, `Storage` when the backend itself fails.
    async fn load_group(&self, name: &str) -> Result<GroupMapping>;
}

/// In-memory storage, used by embedders and tests.
#[derive(Debug, Default)]
pub struct MemoryGroupStorage {
    groups: RwLock<BTreeMap<String, GroupMapping>>,
}

impl MemoryGroupStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, mapping: GroupMapping) {
        self.groups.write().insert(name.to_string(), mapping);
    }

    pub fn remove(&self, name: &str) {
        self.groups.write().remove(name);
    }
}

#[async_trait]
impl GroupStorage for MemoryGroupStorage {
    async fn list_groups(&self) -> Result<Vec<String>> {
        Ok(self.groups.read().keys().cloned().collect())
    }

    async fn load_group(&self, name: &str) -> Result<GroupMapping> {
        self.groups
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| LocatorError::GroupNotFound(name.to_string()))
    }
}

/// File-backed storage: one JSON document `{group: {service: weight}}`,
/// re-read on every access so `refresh` picks up edits without a restart.
#[derive(Debug)]
pub struct JsonGroupStorage {
    path: PathBuf,
}

impl JsonGroupStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_all(&self) -> Result<BTreeMap<String, GroupMapping>> {
        let raw = tokio::fs::read(&self.path)
            .await
            .map_err(|e| LocatorError::Storage(format!("{}: {}", self.path.display(), e)))?;

        serde_json::from_slice(&raw)
            .map_err(|e| LocatorError::Storage(format!("{}: {}", self.path.display(), e)))
    }
}

#[async_trait]
impl GroupStorage for JsonGroupStorage {
    async fn list_groups(&self) -> Result<Vec<String>> {
        Ok(self.read_all().await?.into_keys().collect())
    }

    async fn load_group(&self, name: &str) -> Result<GroupMapping> {
        self.read_all()
            .await?
            .remove(name)
            .ok_or_else(|| LocatorError::GroupNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_storage_roundtrip() {
        let storage = MemoryGroupStorage::new();

        let mut mapping = GroupMapping::new();
        mapping.insert("db_a".to_string(), 1);
        mapping.insert("db_b".to_string(), 3);
        storage.insert("db", mapping.clone());

        assert_eq!(storage.list_groups().await.unwrap(), vec!["db"]);
        assert_eq!(storage.load_group("db").await.unwrap(), mapping);

        storage.remove("db");
        assert!(matches!(
            storage.load_group("db").await,
            Err(LocatorError::GroupNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_json_storage_missing_file_is_storage_error() {
        let storage = JsonGroupStorage::new("/nonexistent/groups.json");

        assert!(matches!(
            storage.list_groups().await,
            Err(LocatorError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_json_storage_reads_document() {
        let dir = std::env::temp_dir().join(format!("waypost-groups-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("groups.json");
        tokio::fs::write(&path, br#"{"db": {"db_a": 1, "db_b": 3}}"#)
            .await
            .unwrap();

        let storage = JsonGroupStorage::new(&path);

        assert_eq!(storage.list_groups().await.unwrap(), vec!["db"]);
        let mapping = storage.load_group("db").await.unwrap();
        assert_eq!(mapping.get("db_b"), Some(&3));

        assert!(matches!(
            storage.load_group("absent").await,
            Err(LocatorError::GroupNotFound(_))
        ));

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
