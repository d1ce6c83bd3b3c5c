//! In-memory [`EntityFetcher`] for tests.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    time::Duration,
};

use {
    async_trait::async_trait,
    dbhq_common::{EntityData, EntityKey, Error, Result},
};

use crate::fetch::EntityFetcher;

/// Answers fetches from a map. Keys without an answer are reported as gone.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    entities: Mutex<HashMap<EntityKey, EntityData>>,
    failing: Mutex<HashSet<EntityKey>>,
    fetches: Mutex<HashMap<EntityKey, usize>>,
    latency: Duration,
}

impl MemoryFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every answer by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set(&self, key: EntityKey, data: EntityData) {
        self.entities
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, data);
    }

    pub fn remove(&self, key: &EntityKey) {
        self.entities
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    /// Make fetches of `key` fail with a transient error.
    pub fn fail(&self, key: EntityKey) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key);
    }

    #[must_use]
    pub fn fetches(&self, key: &EntityKey) -> usize {
        self.fetches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn total_fetches(&self) -> usize {
        self.fetches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .sum()
    }
}

#[async_trait]
impl EntityFetcher for MemoryFetcher {
    async fn fetch(&self, key: &EntityKey) -> Result<Option<EntityData>> {
        *self
            .fetches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(*key)
            .or_insert(0) += 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
        {
            return Err(Error::transient(format!("fetch of {key} failed")));
        }
        Ok(self
            .entities
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }
}
