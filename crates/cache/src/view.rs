use std::sync::Arc;

use dbhq_common::{Entity, EntityKey, EntityKind, Result};

use crate::store::StateCache;

/// Read-only handle to the [`StateCache`] given to event handlers.
#[derive(Clone)]
pub struct CacheView {
    cache: Arc<StateCache>,
}

impl CacheView {
    #[must_use]
    pub fn new(cache: Arc<StateCache>) -> Self {
        Self { cache }
    }

    #[must_use]
    pub fn get(&self, key: &EntityKey) -> Option<Arc<Entity>> {
        self.cache.get(key)
    }

    pub async fn fetch_through(&self, key: &EntityKey) -> Result<Option<Arc<Entity>>> {
        self.cache.fetch_through(key).await
    }

    #[must_use]
    pub fn len(&self, kind: EntityKind) -> usize {
        self.cache.len(kind)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl std::fmt::Debug for CacheView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheView").finish_non_exhaustive()
    }
}
