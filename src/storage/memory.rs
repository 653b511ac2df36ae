//! In-memory object store, for local runs and tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{ObjectStore, ObjectSummary};
use crate::Error;

/// Clones share the same objects.
#[derive(Clone, Default)]
pub struct MemoryStore {
    objects: Arc<RwLock<BTreeMap<String, (Vec<u8>, DateTime<Utc>)>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put an object with an explicit modification time
    pub async fn put_at(&self, key: &str, data: Vec<u8>, last_modified: DateTime<Utc>) {
        self.objects
            .write()
            .await
            .insert(key.to_string(), (data, last_modified));
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        Ok(self
            .objects
            .read()
            .await
            .get(key)
            .map(|(data, _)| data.clone()))
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), Error> {
        self.put_at(key, data, Utc::now()).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>, Error> {
        Ok(self
            .objects
            .read()
            .await
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, (_, last_modified))| ObjectSummary {
                key: key.clone(),
                last_modified: *last_modified,
            })
            .collect())
    }
}
