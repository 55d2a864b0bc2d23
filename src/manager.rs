//! Node-side holder of the router table.
//!
//! Every node keeps its last installed table on disk and reloads it before
//! serving traffic, so a restart never comes up blind. Partition locks are
//! local advisory state used while a migration is in flight.

use crate::connection::{ClientCreator, Connections};
use crate::core::{Result, ShardError};
use crate::routing::RouterTable;
use crate::shard::Shard;
use crate::transport::EntryTransport;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Manages the router table, connections and the local shard engine for one
/// node process.
pub struct Manager {
    service: String,
    data_dir: PathBuf,
    my_entry_id: String,
    connections: Connections,
    shard: Arc<dyn Shard>,
    locked_partitions: Mutex<HashSet<u32>>,
}

impl Manager {
    /// Creates a manager, loading the persisted router table if one exists
    /// and falling back to an empty table for the service otherwise.
    pub async fn new(
        shard: Arc<dyn Shard>,
        service: impl Into<String>,
        data_dir: impl AsRef<Path>,
        my_entry_id: impl Into<String>,
        creator: Arc<dyn ClientCreator>,
    ) -> Result<Arc<Self>> {
        let manager = Arc::new(Self {
            service: service.into(),
            data_dir: data_dir.as_ref().to_path_buf(),
            my_entry_id: my_entry_id.into(),
            connections: Connections::new(creator),
            shard,
            locked_partitions: Mutex::new(HashSet::new()),
        });

        match manager.load().await {
            Ok(revision) => {
                info!(
                    service = %manager.service,
                    revision,
                    "loaded persisted router table"
                );
            }
            Err(err) => {
                warn!(
                    service = %manager.service,
                    error = %err,
                    "unable to load router table, starting with an empty one"
                );
                let table = RouterTable::new(manager.service.clone())?;
                manager.connections.set_router_table(table).await?;
            }
        }
        Ok(manager)
    }

    /// Bootstraps the router table from seed urls. The manager stays usable
    /// when this fails; it simply keeps its current (possibly empty) table.
    pub async fn seed(
        &self,
        transport: &dyn EntryTransport,
        seed_urls: &[String],
    ) -> Result<()> {
        let table = crate::sync::table_from_seed(transport, seed_urls).await?;
        self.set_router_table(table).await?;
        Ok(())
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn my_entry_id(&self) -> &str {
        &self.my_entry_id
    }

    pub fn shard(&self) -> Arc<dyn Shard> {
        self.shard.clone()
    }

    pub fn connections(&self) -> &Connections {
        &self.connections
    }

    /// The currently installed router table.
    pub async fn router_table(&self) -> Result<RouterTable> {
        self.connections.router_table().await
    }

    /// Revision reported on checkin; 0 when no table is installed.
    pub async fn checkin_revision(&self) -> i64 {
        self.connections.revision().await
    }

    /// Installs a new router table and persists it.
    ///
    /// The registry's revision check keeps stale tables out; a table for a
    /// different service is rejected outright.
    pub async fn set_router_table(&self, table: RouterTable) -> Result<Option<RouterTable>> {
        if table.service != self.service {
            return Err(ShardError::BadTable(format!(
                "cannot set router table for service {}, this node serves {}",
                table.service, self.service
            )));
        }
        let old = self.connections.set_router_table(table).await?;
        self.save().await?;
        Ok(old)
    }

    /// Puts a lock on the specified partition (locally only).
    pub async fn lock_partition(&self, partition: u32) -> Result<()> {
        self.locked_partitions.lock().await.insert(partition);
        Ok(())
    }

    pub async fn unlock_partition(&self, partition: u32) -> Result<()> {
        self.locked_partitions.lock().await.remove(&partition);
        Ok(())
    }

    /// The partitions this node masters; empty when it masters none.
    pub async fn my_partitions(&self) -> Vec<u32> {
        match self.connections.entry_by_id(&self.my_entry_id).await {
            Some(client) => client.entry().partitions.clone(),
            None => Vec::new(),
        }
    }

    /// Checks whether the partition is this node's responsibility and
    /// whether it is currently locked. Returns (responsible, locked).
    pub async fn my_responsibility(&self, partition: u32) -> (bool, bool) {
        let is_mine = match self.connections.entry_by_id(&self.my_entry_id).await {
            Some(client) => client.entry().masters(partition),
            None => false,
        };
        let locked = self.locked_partitions.lock().await.contains(&partition);
        (is_mine, locked)
    }

    fn table_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.routertable", self.service))
    }

    /// Loads the stored table. Returns its revision.
    async fn load(&self) -> Result<i64> {
        let bytes = fs::read(self.table_path())?;
        let doc: serde_json::Value = serde_json::from_slice(&bytes)?;
        let table = RouterTable::from_document(doc)?;
        let revision = table.revision;
        self.connections.set_router_table(table).await?;
        Ok(revision)
    }

    /// Persists the installed table: write to a temp file, flush, rename.
    async fn save(&self) -> Result<()> {
        let table = self.router_table().await?;
        let doc = table.to_document()?;
        let path = self.table_path();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let temp_path = path.with_extension("routertable.tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(&serde_json::to_vec(&doc)?)?;
        file.flush()?;
        file.sync_all()?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{EntryPorts, RouterEntry};
    use crate::shard::MemShard;
    use crate::transport::InMemoryTransport;
    use tempfile::TempDir;

    async fn manager(dir: &TempDir, entry_id: &str) -> Arc<Manager> {
        Manager::new(
            Arc::new(MemShard::new()),
            "testdb",
            dir.path(),
            entry_id,
            Arc::new(crate::transport::HttpClientCreator::new(
                crate::connection::ClientConfig::new(),
            )),
        )
        .await
        .unwrap()
    }

    fn built_table(address: &str, partitions: Vec<u32>) -> RouterTable {
        let mut entry = RouterEntry::new(address, EntryPorts::new(8009, 8010, 0));
        entry.partitions = partitions;
        let mut table = RouterTable::new("testdb").unwrap();
        table.replication_factor = 1;
        table.entries = vec![entry];
        table.rebuild().unwrap();
        table
    }

    #[tokio::test]
    async fn test_starts_with_empty_table() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir, "a:8009").await;
        assert_eq!(m.checkin_revision().await, m.router_table().await.unwrap().revision);
        assert!(m.my_partitions().await.is_empty());
    }

    #[tokio::test]
    async fn test_persists_and_reloads_table() {
        let dir = TempDir::new().unwrap();
        let table = built_table("a", vec![0, 1, 2]);
        let revision = table.revision;

        {
            let m = manager(&dir, "a:8009").await;
            m.set_router_table(table).await.unwrap();
        }

        let m = manager(&dir, "a:8009").await;
        let loaded = m.router_table().await.unwrap();
        assert_eq!(loaded.revision, revision);
        assert_eq!(m.my_partitions().await, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_rejects_other_service() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir, "a:8009").await;
        let mut table = built_table("a", vec![0]);
        table.service = "otherdb".to_string();
        assert!(matches!(
            m.set_router_table(table).await,
            Err(ShardError::BadTable(_))
        ));
    }

    #[tokio::test]
    async fn test_responsibility_and_locking() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir, "a:8009").await;
        m.set_router_table(built_table("a", vec![0, 1])).await.unwrap();

        assert_eq!(m.my_responsibility(0).await, (true, false));
        m.lock_partition(0).await.unwrap();
        assert_eq!(m.my_responsibility(0).await, (true, true));
        m.unlock_partition(0).await.unwrap();
        assert_eq!(m.my_responsibility(0).await, (true, false));

        // an entry id that is not in the table masters nothing
        let other = manager(&dir, "zzz:1").await;
        assert!(!other.my_responsibility(0).await.0);
    }

    #[tokio::test]
    async fn test_seed_failure_keeps_table() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir, "a:8009").await;
        let transport = InMemoryTransport::new();
        let err = m
            .seed(&transport, &["mem://nope:1".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ShardError::Transport(_)));
        assert!(m.router_table().await.is_ok());
    }
}
