//! Durable key-value stores
//!
//! The chunk store and the replay queue each own one [`DurableStore`]
//! namespace. Two implementations are provided:
//! - [`MemoryStore`]: process-local, used by tests and ephemeral deployments
//! - [`FileStore`]: one checksummed file per key, survives restarts

mod file;
mod memory;

pub use file::FileStore;
pub use memory::{MemoryStore, StoreStats};

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;

/// Namespace holding large-object records and their chunks
pub const OBJECTS_NAMESPACE: &str = "objects";
/// Namespace holding queued write requests
pub const QUEUE_NAMESPACE: &str = "queue";

/// A persistent key-value store
///
/// Implementations must be safe to share between tasks; no locking layer is
/// built on top of them.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Read a value, `None` when the key is absent
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Write a value, replacing any previous one
    async fn set(&self, key: &str, value: Bytes) -> Result<()>;

    /// Remove a key; removing an absent key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// All keys currently stored, in ascending order
    async fn keys(&self) -> Result<Vec<String>>;
}

/// Open the two durable namespaces
///
/// With a base directory both namespaces are [`FileStore`]s in separate
/// subdirectories, otherwise both live in memory.
pub async fn open_namespaces(
    base_dir: Option<&Path>,
) -> Result<(Arc<dyn DurableStore>, Arc<dyn DurableStore>)> {
    match base_dir {
        Some(dir) => {
            let objects = FileStore::open(dir.join(OBJECTS_NAMESPACE)).await?;
            let queue = FileStore::open(dir.join(QUEUE_NAMESPACE)).await?;
            Ok((Arc::new(objects), Arc::new(queue)))
        }
        None => {
            tracing::warn!("No storage directory configured, durable stores are in memory");
            Ok((Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new())))
        }
    }
}
