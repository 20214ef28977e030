//! In-memory store backend for tests and ephemeral deployments.

use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::object::StoredObject;
use crate::StoreClient;

/// Non-persistent store client backed by a map.
#[derive(Default)]
pub struct MemoryStoreClient {
    /// Keyed by `<app-service-key>:<id>`.
    objects: RwLock<HashMap<String, StoredObject>>,
}

impl MemoryStoreClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn make_key(app_service_key: &str, id: &str) -> String {
        format!("{}:{}", app_service_key, id)
    }
}

impl StoreClient for MemoryStoreClient {
    fn store(&self, object: &StoredObject) -> Result<String> {
        object.validate_contract(true)?;

        let mut stored = object.clone();
        if stored.id.is_empty() {
            stored.id = Uuid::new_v4().to_string();
        }
        let key = Self::make_key(&stored.app_service_key, &stored.id);

        let mut objects = self.objects.write();
        if objects.contains_key(&key) {
            return Err(StoreError::Duplicate(stored.id));
        }
        let id = stored.id.clone();
        objects.insert(key, stored);
        Ok(id)
    }

    fn retrieve_from_store(&self, app_service_key: &str) -> Result<Vec<StoredObject>> {
        let objects = self.objects.read();
        Ok(objects
            .values()
            .filter(|o| o.app_service_key == app_service_key)
            .cloned()
            .collect())
    }

    fn update(&self, object: &StoredObject) -> Result<()> {
        object.validate_contract(false)?;
        let key = Self::make_key(&object.app_service_key, &object.id);
        let mut objects = self.objects.write();
        if !objects.contains_key(&key) {
            return Err(StoreError::NotFound(object.id.clone()));
        }
        objects.insert(key, object.clone());
        Ok(())
    }

    fn remove_from_store(&self, object: &StoredObject) -> Result<()> {
        let key = Self::make_key(&object.app_service_key, &object.id);
        if self.objects.write().remove(&key).is_none() {
            return Err(StoreError::NotFound(object.id.clone()));
        }
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}
