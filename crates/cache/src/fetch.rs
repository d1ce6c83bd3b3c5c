use {
    async_trait::async_trait,
    dbhq_common::{EntityData, EntityKey, Result},
};

/// Reads the authoritative state of one entity from the remote side.
///
/// `Ok(None)` means the remote side says the entity does not exist.
#[async_trait]
pub trait EntityFetcher: Send + Sync {
    async fn fetch(&self, key: &EntityKey) -> Result<Option<EntityData>>;
}
