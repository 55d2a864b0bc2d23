use crate::core::{Result, ShardError};
use crate::manager::Manager;
use crate::routing::{RouterEntry, RouterTable};
use crate::transport::EntryTransport;
use crate::wire::CheckinResponse;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// An in-memory control plane for testing.
///
/// Simulates the wire by invoking peer node managers directly, so whole
/// clusters, including migrations, run inside one test process.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    peers: Arc<Mutex<HashMap<String, Arc<Manager>>>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node under its entry id, enabling it to receive calls.
    pub async fn register_peer(&self, manager: Arc<Manager>) {
        self.peers
            .lock()
            .await
            .insert(manager.my_entry_id().to_string(), manager);
    }

    async fn peer(&self, id: &str) -> Result<Arc<Manager>> {
        self.peers.lock().await.get(id).cloned().ok_or_else(|| {
            ShardError::Transport(format!("target node '{}' is not registered", id))
        })
    }

    fn peer_id(source: &str) -> &str {
        source.strip_prefix("mem://").unwrap_or(source)
    }
}

#[async_trait]
impl EntryTransport for InMemoryTransport {
    async fn checkin(&self, entry: &RouterEntry) -> Result<CheckinResponse> {
        let peer = self.peer(&entry.id()).await?;
        Ok(CheckinResponse {
            rt_revision: peer.checkin_revision().await,
            ts: Utc::now(),
        })
    }

    async fn fetch_router_table(&self, entry: &RouterEntry) -> Result<RouterTable> {
        self.peer(&entry.id()).await?.router_table().await
    }

    async fn fetch_router_table_from(&self, base_url: &str) -> Result<RouterTable> {
        self.peer(Self::peer_id(base_url)).await?.router_table().await
    }

    async fn push_router_table(&self, entry: &RouterEntry, table: &RouterTable) -> Result<()> {
        self.peer(&entry.id())
            .await?
            .set_router_table(table.clone())
            .await
            .map(|_| ())
    }

    async fn lock_partition(&self, entry: &RouterEntry, partition: u32) -> Result<()> {
        self.peer(&entry.id()).await?.lock_partition(partition).await
    }

    async fn unlock_partition(&self, entry: &RouterEntry, partition: u32) -> Result<()> {
        self.peer(&entry.id())
            .await?
            .unlock_partition(partition)
            .await
    }

    async fn delete_partition(&self, entry: &RouterEntry, partition: u32) -> Result<()> {
        self.peer(&entry.id())
            .await?
            .shard()
            .delete_partition(partition)
            .await
    }

    async fn import_partition(
        &self,
        entry: &RouterEntry,
        partition: u32,
        source: &str,
    ) -> Result<u64> {
        let destination = self.peer(&entry.id()).await?;
        let origin = self.peer(Self::peer_id(source)).await?;

        let mut buf = Vec::new();
        origin
            .shard()
            .export_partition(partition, &mut buf)
            .await?;
        destination
            .shard()
            .import_partition(partition, &mut buf.as_slice())
            .await
    }

    fn export_source(&self, entry: &RouterEntry) -> String {
        format!("mem://{}", entry.id())
    }
}
