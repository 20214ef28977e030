//! Redb store backend.
//!
//! Persists stored objects in a single unified redb table using
//! namespaced keys of the form `<app-service-key>:<id>`, so one database
//! file can be shared by multiple services.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::object::StoredObject;
use crate::StoreClient;

const STORED_OBJECTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("stored_objects");

/// Create a namespaced key for the unified table.
fn make_key(app_service_key: &str, id: &str) -> String {
    let mut key = String::with_capacity(app_service_key.len() + id.len() + 1);
    key.push_str(app_service_key);
    key.push(':');
    key.push_str(id);
    key
}

/// redb-backed persistent store client.
pub struct RedbStoreClient {
    db: Arc<Database>,
    /// Actual file path for temporary databases (for cleanup).
    temp_path: Option<PathBuf>,
}

impl RedbStoreClient {
    /// Open (or create) a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = if path.exists() {
            Database::open(path)?
        } else {
            Database::create(path)?
        };
        let client = Self {
            db: Arc::new(db),
            temp_path: None,
        };
        client.ensure_table()?;
        Ok(client)
    }

    /// Open a throwaway database backed by a temp file.
    ///
    /// redb has no true in-memory mode; the file is removed on disconnect.
    pub fn temporary() -> Result<Self> {
        let temp_path = std::env::temp_dir().join(format!("edgeflow_store_{}", Uuid::new_v4()));
        let db = Database::create(&temp_path)?;
        let client = Self {
            db: Arc::new(db),
            temp_path: Some(temp_path),
        };
        client.ensure_table()?;
        Ok(client)
    }

    /// Create the table up front so reads before the first write succeed.
    fn ensure_table(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        txn.open_table(STORED_OBJECTS_TABLE)?;
        txn.commit()?;
        Ok(())
    }
}

impl StoreClient for RedbStoreClient {
    fn store(&self, object: &StoredObject) -> Result<String> {
        object.validate_contract(true)?;

        let mut stored = object.clone();
        if stored.id.is_empty() {
            stored.id = Uuid::new_v4().to_string();
        }
        let key = make_key(&stored.app_service_key, &stored.id);
        let value = bincode::serialize(&stored)?;

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(STORED_OBJECTS_TABLE)?;
            if table.get(key.as_str())?.is_some() {
                return Err(StoreError::Duplicate(stored.id));
            }
            table.insert(key.as_str(), value.as_slice())?;
        }
        txn.commit()?;
        Ok(stored.id)
    }

    fn retrieve_from_store(&self, app_service_key: &str) -> Result<Vec<StoredObject>> {
        let prefix = format!("{}:", app_service_key);
        let txn = self.db.begin_read()?;
        let table = txn.open_table(STORED_OBJECTS_TABLE)?;

        let mut objects = Vec::new();
        for entry in table.range(prefix.as_str()..)? {
            let (key, value) = entry?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let object: StoredObject = bincode::deserialize(value.value())?;
            objects.push(object);
        }
        Ok(objects)
    }

    fn update(&self, object: &StoredObject) -> Result<()> {
        object.validate_contract(false)?;

        let key = make_key(&object.app_service_key, &object.id);
        let value = bincode::serialize(object)?;

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(STORED_OBJECTS_TABLE)?;
            if table.get(key.as_str())?.is_none() {
                return Err(StoreError::NotFound(object.id.clone()));
            }
            table.insert(key.as_str(), value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn remove_from_store(&self, object: &StoredObject) -> Result<()> {
        let key = make_key(&object.app_service_key, &object.id);

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(STORED_OBJECTS_TABLE)?;
            if table.remove(key.as_str())?.is_none() {
                return Err(StoreError::NotFound(object.id.clone()));
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        if let Some(path) = &self.temp_path {
            // Best effort; the file lives in the temp dir anyway.
            let _ = std::fs::remove_file(path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_object(key: &str) -> StoredObject {
        let mut context_data = HashMap::new();
        context_data.insert("receivedtopic".to_string(), "events/a".to_string());
        StoredObject::new(
            key,
            b"payload-bytes".to_vec(),
            "default",
            2,
            "hash-v1",
            "corr-42",
            context_data,
        )
    }

    #[test]
    fn test_store_assigns_id_and_round_trips() {
        let client = RedbStoreClient::temporary().unwrap();
        let object = sample_object("app-a");

        let id = client.store(&object).unwrap();
        assert!(!id.is_empty());

        let loaded = client.retrieve_from_store("app-a").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, id);
        assert_eq!(loaded[0].payload, object.payload);
        assert_eq!(loaded[0].pipeline_position, 2);
        assert_eq!(loaded[0].version, "hash-v1");
        assert_eq!(loaded[0].correlation_id, "corr-42");
        assert_eq!(
            loaded[0].context_data.get("receivedtopic").unwrap(),
            "events/a"
        );
        client.disconnect().unwrap();
    }

    #[test]
    fn test_store_duplicate_id_fails() {
        let client = RedbStoreClient::temporary().unwrap();
        let mut object = sample_object("app-a");
        object.id = "fixed-id".to_string();

        client.store(&object).unwrap();
        let err = client.store(&object).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
        client.disconnect().unwrap();
    }

    #[test]
    fn test_partitioned_by_service_key() {
        let client = RedbStoreClient::temporary().unwrap();
        client.store(&sample_object("app-a")).unwrap();
        client.store(&sample_object("app-b")).unwrap();

        assert_eq!(client.retrieve_from_store("app-a").unwrap().len(), 1);
        assert_eq!(client.retrieve_from_store("app-b").unwrap().len(), 1);
        assert!(client.retrieve_from_store("app-c").unwrap().is_empty());
        client.disconnect().unwrap();
    }

    #[test]
    fn test_update_and_remove() {
        let client = RedbStoreClient::temporary().unwrap();
        let mut object = sample_object("app-a");
        object.id = client.store(&object).unwrap();

        object.retry_count = 3;
        client.update(&object).unwrap();
        let loaded = client.retrieve_from_store("app-a").unwrap();
        assert_eq!(loaded[0].retry_count, 3);

        client.remove_from_store(&object).unwrap();
        assert!(client.retrieve_from_store("app-a").unwrap().is_empty());

        let err = client.remove_from_store(&object).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        client.disconnect().unwrap();
    }

    #[test]
    fn test_store_rejects_missing_fields() {
        let client = RedbStoreClient::temporary().unwrap();
        let mut object = sample_object("app-a");
        object.payload.clear();
        assert!(matches!(
            client.store(&object).unwrap_err(),
            StoreError::Validation(_)
        ));
        client.disconnect().unwrap();
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.redb");

        let id = {
            let client = RedbStoreClient::open(&path).unwrap();
            client.store(&sample_object("app-a")).unwrap()
        };

        let client = RedbStoreClient::open(&path).unwrap();
        let loaded = client.retrieve_from_store("app-a").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, id);
    }
}
