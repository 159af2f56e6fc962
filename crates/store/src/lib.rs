//! Durable instance registry: `instance_id → InstanceRecord` plus secondary
//! indexes by external handle and expiry.

use chainyard_types::InstanceRecord;
use std::{collections::BTreeMap, sync::Arc};

mod redisdb;
mod sqlitedb;

pub use redisdb::RedisStore;
pub use sqlitedb::SqliteStore;

/// Errors surfaced by [`Store`] operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("instance already exists")]
    AlreadyExists,
    #[error("instance does not exist")]
    UnknownInstance,
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// The instance registry contract.
///
/// `register` and `unregister` are atomic over the record and both secondary
/// indexes; metadata writes are independent per key.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Inserts the record together with its external-id and expiry index
    /// entries. Fails with [`StoreError::AlreadyExists`] when the
    /// `instance_id` (or, improbably, the `external_id`) is taken.
    async fn register(&self, record: &InstanceRecord) -> Result<(), StoreError>;

    /// Removes the record, its index entries, and its metadata. Returns the
    /// removed record so the caller can clean up fabric resources.
    async fn unregister(&self, instance_id: &str) -> Result<Option<InstanceRecord>, StoreError>;

    /// Snapshot of the record with current metadata merged in.
    async fn get(&self, instance_id: &str) -> Result<Option<InstanceRecord>, StoreError>;

    /// Resolves a public handle to its record.
    async fn get_by_external(
        &self,
        external_id: &str,
    ) -> Result<Option<InstanceRecord>, StoreError>;

    /// Every record with `expires_at <= now`. May lag a registration by one
    /// reaper tick; backends without an expiry index return an empty list.
    async fn get_expired(&self, now: u64) -> Result<Vec<InstanceRecord>, StoreError>;

    /// Merges `patch` into the instance's metadata bag, one independent
    /// write per key. Fails with [`StoreError::UnknownInstance`] for ids
    /// that are not registered.
    async fn update_metadata(
        &self,
        instance_id: &str,
        patch: &BTreeMap<String, serde_json::Value>,
    ) -> Result<(), StoreError>;
}

/// Which registry backend to open.
#[derive(Clone, Debug)]
pub enum StoreConfig {
    Sqlite { path: String },
    Redis { url: String },
}

/// Opens the configured store.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn Store>, StoreError> {
    match config {
        StoreConfig::Sqlite { path } => Ok(Arc::new(SqliteStore::open(path)?)),
        StoreConfig::Redis { url } => Ok(Arc::new(RedisStore::connect(url).await?)),
    }
}
