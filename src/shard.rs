//! Contract to the shard-local storage engine.
//!
//! The routing layer never touches stored data directly; it drives the
//! engine through this interface when partitions are exported, imported or
//! deleted during a move.

use crate::core::{Result, ShardError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{Read, Write};
use tokio::sync::Mutex;
use tracing::info;

/// You must implement this interface in order for balancing to work.
#[async_trait]
pub trait Shard: Send + Sync {
    /// Exports all the data for a specific partition. Returns the total
    /// number of bytes written once the export is complete.
    async fn export_partition(
        &self,
        partition: u32,
        writer: &mut (dyn Write + Send),
    ) -> Result<u64>;

    /// Imports data for a partition from the reader. Returns the total
    /// number of bytes consumed once the import is complete.
    async fn import_partition(
        &self,
        partition: u32,
        reader: &mut (dyn Read + Send),
    ) -> Result<u64>;

    /// Deletes the requested partition. Must be idempotent.
    async fn delete_partition(&self, partition: u32) -> Result<()>;
}

/// A shard that stores nothing. Useful for nodes that only route.
pub struct NoopShard;

#[async_trait]
impl Shard for NoopShard {
    async fn export_partition(
        &self,
        partition: u32,
        _writer: &mut (dyn Write + Send),
    ) -> Result<u64> {
        info!(partition, "export requested from noop shard, ignoring");
        Ok(0)
    }

    async fn import_partition(
        &self,
        partition: u32,
        _reader: &mut (dyn Read + Send),
    ) -> Result<u64> {
        info!(partition, "import requested from noop shard, ignoring");
        Ok(0)
    }

    async fn delete_partition(&self, partition: u32) -> Result<()> {
        info!(partition, "delete requested from noop shard, ignoring");
        Ok(())
    }
}

/// An in-memory shard keyed by partition.
///
/// Simulates a storage engine for tests and examples: exports and imports
/// move opaque byte blobs per partition.
///
/// # Examples
///
/// ```
/// use shardroute::shard::{MemShard, Shard};
///
/// # tokio_test::block_on(async {
/// let shard = MemShard::new();
/// shard.put(0, b"hot".to_vec()).await;
/// let mut buf = Vec::new();
/// shard.export_partition(0, &mut buf).await.unwrap();
/// assert_eq!(buf, b"hot");
/// # });
/// ```
#[derive(Default)]
pub struct MemShard {
    data: Mutex<HashMap<u32, Vec<u8>>>,
}

impl MemShard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a partition with data.
    pub async fn put(&self, partition: u32, bytes: Vec<u8>) {
        self.data.lock().await.insert(partition, bytes);
    }

    /// Current contents of a partition.
    pub async fn get(&self, partition: u32) -> Option<Vec<u8>> {
        self.data.lock().await.get(&partition).cloned()
    }

    /// Partitions that currently hold data, sorted.
    pub async fn partitions(&self) -> Vec<u32> {
        let mut keys: Vec<u32> = self.data.lock().await.keys().copied().collect();
        keys.sort_unstable();
        keys
    }
}

#[async_trait]
impl Shard for MemShard {
    async fn export_partition(
        &self,
        partition: u32,
        writer: &mut (dyn Write + Send),
    ) -> Result<u64> {
        let data = self.data.lock().await;
        let bytes = data
            .get(&partition)
            .ok_or(ShardError::NotMyPartition(partition))?;
        writer.write_all(bytes)?;
        Ok(bytes.len() as u64)
    }

    async fn import_partition(
        &self,
        partition: u32,
        reader: &mut (dyn Read + Send),
    ) -> Result<u64> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let count = bytes.len() as u64;
        self.data.lock().await.insert(partition, bytes);
        Ok(count)
    }

    async fn delete_partition(&self, partition: u32) -> Result<()> {
        self.data.lock().await.remove(&partition);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mem_shard_export_import() {
        let a = MemShard::new();
        a.put(3, b"payload".to_vec()).await;

        let mut buf = Vec::new();
        let exported = a.export_partition(3, &mut buf).await.unwrap();
        assert_eq!(exported, 7);

        let b = MemShard::new();
        let imported = b.import_partition(3, &mut buf.as_slice()).await.unwrap();
        assert_eq!(imported, 7);
        assert_eq!(b.get(3).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_mem_shard_delete_idempotent() {
        let shard = MemShard::new();
        shard.put(1, vec![1, 2, 3]).await;
        shard.delete_partition(1).await.unwrap();
        shard.delete_partition(1).await.unwrap();
        assert!(shard.get(1).await.is_none());
    }

    #[tokio::test]
    async fn test_mem_shard_export_missing_partition() {
        let shard = MemShard::new();
        let mut buf = Vec::new();
        assert!(shard.export_partition(9, &mut buf).await.is_err());
    }
}
