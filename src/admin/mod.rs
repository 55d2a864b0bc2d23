//! Admin-side registry of authoritative router tables.
//!
//! The admin/balancer is the single logical owner of every service's table.
//! Each successful mutation is persisted under the admin data dir before it
//! is propagated to nodes.

use crate::balance::TableSink;
use crate::core::{Result, ShardError};
use crate::routing::{RouterEntry, RouterTable};
use crate::sync::{self, CheckinOutcome};
use crate::transport::EntryTransport;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::info;

const SERVICES_FILE: &str = "services.json";

/// Authoritative router tables, keyed by service name.
pub struct Services {
    data_dir: PathBuf,
    services: RwLock<HashMap<String, RouterTable>>,
}

impl Services {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            services: RwLock::new(HashMap::new()),
        }
    }

    fn path(&self) -> PathBuf {
        self.data_dir.join(SERVICES_FILE)
    }

    /// Loads all service tables from the data dir.
    pub async fn load(&self) -> Result<()> {
        let bytes = fs::read(self.path())?;
        let doc: serde_json::Value = serde_json::from_slice(&bytes)?;
        let map = doc
            .as_object()
            .ok_or_else(|| ShardError::BadTable("services document is not an object".into()))?;

        let mut services = HashMap::new();
        for (name, table_doc) in map {
            let table = RouterTable::from_document(table_doc.clone())?;
            services.insert(name.clone(), table);
        }
        *self.services.write().await = services;
        Ok(())
    }

    /// Persists every service table: write to a temp file, flush, rename.
    pub async fn save(&self) -> Result<()> {
        let services = self.services.read().await;
        let mut doc = serde_json::Map::new();
        for (name, table) in services.iter() {
            doc.insert(name.clone(), table.to_document()?);
        }
        drop(services);

        fs::create_dir_all(&self.data_dir)?;
        let path = self.path();
        let temp_path = path.with_extension("json.tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(&serde_json::to_vec(&serde_json::Value::Object(doc))?)?;
        file.flush()?;
        file.sync_all()?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    /// The table for a service, if the admin knows it.
    pub async fn router_table(&self, service: &str) -> Option<RouterTable> {
        self.services.read().await.get(service).cloned()
    }

    pub async fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Installs a table and persists the registry.
    pub async fn set_router_table(&self, table: RouterTable) -> Result<()> {
        self.services
            .write()
            .await
            .insert(table.service.clone(), table);
        self.save().await
    }

    /// Provisions a new, empty service.
    ///
    /// The declared partition count is the provisioning target; the first
    /// registered shard receives all of them.
    pub async fn create_service(
        &self,
        service: impl Into<String>,
        total_partitions: u32,
        replication_factor: usize,
        partition_keys: Vec<String>,
    ) -> Result<RouterTable> {
        let service = service.into();
        if total_partitions == 0 {
            return Err(ShardError::Config(
                "total_partitions must be >= 1".to_string(),
            ));
        }
        if replication_factor == 0 {
            return Err(ShardError::Config(
                "replication_factor must be >= 1".to_string(),
            ));
        }
        if self.router_table(&service).await.is_some() {
            return Err(ShardError::Config(format!(
                "service {} already exists",
                service
            )));
        }
        let mut table = RouterTable::new(service)?;
        table.total_partitions = total_partitions;
        table.replication_factor = replication_factor;
        table.partition_keys = partition_keys;
        self.set_router_table(table.clone()).await?;
        info!(service = %table.service, total_partitions, "created service");
        Ok(table)
    }

    /// Registers a new shard entry for a service.
    ///
    /// The candidate must answer a checkin first. The first entry of an
    /// empty table is given every partition; later entries join with none
    /// and pick up load through rebalancing. The new table is persisted and
    /// pushed to the new entry.
    pub async fn register_shard(
        &self,
        transport: &dyn EntryTransport,
        service: &str,
        mut entry: RouterEntry,
    ) -> Result<RouterTable> {
        let table = self
            .router_table(service)
            .await
            .ok_or_else(|| ShardError::Config(format!("unknown service {}", service)))?;

        // check that we can connect before touching the table
        transport.checkin(&entry).await.map_err(|err| {
            ShardError::Transport(format!(
                "unable to contact new entry {}: {}",
                entry.id(),
                err
            ))
        })?;

        if table.entries.is_empty() {
            // first entry, give it all the partitions
            info!(
                entry = %entry.id(),
                total_partitions = table.total_partitions,
                "first entry, assigning every partition"
            );
            entry.partitions = (0..table.total_partitions).collect();
        } else {
            entry.partitions = Vec::new();
        }

        let table = table.add_entries(vec![entry.clone()])?;
        self.set_router_table(table.clone()).await?;

        match sync::entry_checkin(transport, &table, &entry).await? {
            CheckinOutcome::UpdatedLocal(_) => Err(ShardError::BadTable(format!(
                "new entry {} already holds a newer table for {}",
                entry.id(),
                service
            ))),
            _ => {
                info!(service, entry = %entry.id(), "registered new shard");
                Ok(table)
            }
        }
    }
}

#[async_trait]
impl TableSink for Services {
    async fn persist(&self, table: &RouterTable) -> Result<()> {
        self.set_router_table(table.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::EntryPorts;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_and_reload_service() {
        let dir = TempDir::new().unwrap();
        let services = Services::new(dir.path());
        let table = services
            .create_service("testdb", 8, 2, vec!["user".into()])
            .await
            .unwrap();

        let reloaded = Services::new(dir.path());
        reloaded.load().await.unwrap();
        let loaded = reloaded.router_table("testdb").await.unwrap();
        assert_eq!(loaded.revision, table.revision);
        assert_eq!(loaded.total_partitions, 8);
        assert_eq!(loaded.partition_keys, vec!["user".to_string()]);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates_and_zeroes() {
        let dir = TempDir::new().unwrap();
        let services = Services::new(dir.path());
        services
            .create_service("testdb", 4, 1, vec![])
            .await
            .unwrap();
        assert!(services.create_service("testdb", 4, 1, vec![]).await.is_err());
        assert!(services.create_service("other", 0, 1, vec![]).await.is_err());
        assert!(services.create_service("other", 4, 0, vec![]).await.is_err());
    }

    #[tokio::test]
    async fn test_register_shard_requires_contact() {
        let dir = TempDir::new().unwrap();
        let services = Services::new(dir.path());
        services
            .create_service("testdb", 4, 1, vec![])
            .await
            .unwrap();

        let transport = crate::transport::InMemoryTransport::new();
        let entry = RouterEntry::new("ghost", EntryPorts::new(1, 2, 0));
        // nothing registered under ghost:1, contact fails, table unchanged
        assert!(
            services
                .register_shard(&transport, "testdb", entry)
                .await
                .is_err()
        );
        assert!(
            services
                .router_table("testdb")
                .await
                .unwrap()
                .entries
                .is_empty()
        );
    }
}
