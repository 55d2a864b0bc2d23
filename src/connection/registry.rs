use crate::connection::{ClientCreator, EntryClient};
use crate::core::{Result, ShardError};
use crate::routing::RouterTable;
use crate::transport::EntryTransport;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Manages the connections to the different shards.
///
/// Keeps exactly one lazy client per distinct entry, reused across every
/// partition that entry serves, and rebuilds the partition index whenever a
/// newer router table is installed.
pub struct Connections {
    creator: Arc<dyn ClientCreator>,
    inner: RwLock<Inner>,
}

struct Inner {
    table: Option<RouterTable>,
    /// Entries organized by entry id.
    entries: HashMap<String, Arc<EntryClient>>,
    /// Connections indexed by partition. `[0]` is the master.
    by_partition: Vec<Vec<Arc<EntryClient>>>,
}

impl Connections {
    pub fn new(creator: Arc<dyn ClientCreator>) -> Self {
        Self {
            creator,
            inner: RwLock::new(Inner {
                table: None,
                entries: HashMap::new(),
                by_partition: Vec::new(),
            }),
        }
    }

    /// Bootstraps a registry by fetching the router table from one or more
    /// seed urls, installing the first table that parses.
    pub async fn from_seed(
        creator: Arc<dyn ClientCreator>,
        transport: &dyn EntryTransport,
        seed_urls: &[String],
    ) -> Result<Self> {
        let connections = Self::new(creator);
        connections.init_from_seed(transport, seed_urls).await?;
        Ok(connections)
    }

    pub async fn init_from_seed(
        &self,
        transport: &dyn EntryTransport,
        seed_urls: &[String],
    ) -> Result<()> {
        let table = crate::sync::table_from_seed(transport, seed_urls).await?;
        self.set_router_table(table).await?;
        Ok(())
    }

    /// The currently installed router table.
    pub async fn router_table(&self) -> Result<RouterTable> {
        let inner = self.inner.read().await;
        inner.table.clone().ok_or(ShardError::NoRouterTable)
    }

    /// Revision of the installed table, 0 when none is installed yet.
    pub async fn revision(&self) -> i64 {
        let inner = self.inner.read().await;
        inner.table.as_ref().map_or(0, |t| t.revision)
    }

    /// Finds an entry client by entry id.
    pub async fn entry_by_id(&self, id: &str) -> Option<Arc<EntryClient>> {
        let inner = self.inner.read().await;
        inner.entries.get(id).cloned()
    }

    /// The clients serving a partition, master at position `[0]`.
    pub async fn entries(&self, partition: u32) -> Result<Vec<Arc<EntryClient>>> {
        let inner = self.inner.read().await;
        let table = inner.table.as_ref().ok_or(ShardError::NoRouterTable)?;
        if partition >= table.total_partitions {
            return Err(ShardError::PartitionOutOfRange(
                partition,
                table.total_partitions,
            ));
        }
        inner
            .by_partition
            .get(partition as usize)
            .cloned()
            .ok_or(ShardError::PartitionOutOfRange(
                partition,
                table.total_partitions,
            ))
    }

    /// Installs a new router table, returning the previous one.
    ///
    /// Rejects any table whose revision is not strictly newer, so the
    /// registry never regresses. Clients are reused for entries that
    /// persist, created for new entries, and closed exactly once for
    /// entries that disappeared. The whole swap happens under one write
    /// lock; readers never observe a half-built partition index.
    pub async fn set_router_table(&self, table: RouterTable) -> Result<Option<RouterTable>> {
        let (old_table, removed) = {
            let mut inner = self.inner.write().await;
            if let Some(current) = &inner.table {
                if table.revision <= current.revision {
                    return Err(ShardError::StaleRevision {
                        proposed: table.revision,
                        current: current.revision,
                    });
                }
            }

            let mut next: HashMap<String, Arc<EntryClient>> = HashMap::new();
            for entry in &table.entries {
                let key = entry.id();
                let client = inner.entries.get(&key).cloned().unwrap_or_else(|| {
                    Arc::new(EntryClient::new(entry.clone(), self.creator.clone()))
                });
                next.insert(key, client);
            }

            let mut by_partition: Vec<Vec<Arc<EntryClient>>> =
                Vec::with_capacity(table.total_partitions as usize);
            for partition in 0..table.total_partitions {
                let owners = table.partition_entries(partition)?;
                let mut clients = Vec::with_capacity(owners.len());
                for owner in owners {
                    let client = next.get(&owner.id()).cloned().ok_or_else(|| {
                        ShardError::BadTable(format!(
                            "no connection for entry {}",
                            owner.id()
                        ))
                    })?;
                    clients.push(client);
                }
                by_partition.push(clients);
            }

            let removed: Vec<Arc<EntryClient>> = inner
                .entries
                .iter()
                .filter(|(id, _)| !next.contains_key(*id))
                .map(|(_, client)| client.clone())
                .collect();

            let old_table = inner.table.replace(table);
            inner.entries = next;
            inner.by_partition = by_partition;
            (old_table, removed)
        };

        for client in removed {
            client.close().await;
        }
        Ok(old_table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ServiceConn;
    use crate::routing::{EntryPorts, RouterEntry};
    use crate::wire::{ShardRequest, ShardResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct NullConn {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ServiceConn for NullConn {
        async fn api_call(
            &self,
            _request: &ShardRequest,
            _timeout: Duration,
        ) -> Result<ShardResponse> {
            Ok(ShardResponse::ok(serde_json::Value::Null))
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct NullCreator {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ClientCreator for NullCreator {
        async fn create(&self, _entry: &RouterEntry) -> Result<Arc<dyn ServiceConn>> {
            Ok(Arc::new(NullConn {
                closes: self.closes.clone(),
            }))
        }
    }

    fn entry(address: &str, partitions: Vec<u32>) -> RouterEntry {
        let mut e = RouterEntry::new(address, EntryPorts::new(8009, 8010, 0));
        e.partitions = partitions;
        e
    }

    fn table(entries: Vec<RouterEntry>) -> RouterTable {
        let mut t = RouterTable::new("testdb").unwrap();
        t.replication_factor = 1;
        t.entries = entries;
        t.rebuild().unwrap();
        t
    }

    fn registry() -> (Connections, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        let creator = Arc::new(NullCreator {
            closes: closes.clone(),
        });
        (Connections::new(creator), closes)
    }

    #[tokio::test]
    async fn test_install_and_lookup() {
        let (conns, _) = registry();
        conns
            .set_router_table(table(vec![entry("a", vec![0, 1]), entry("b", vec![2, 3])]))
            .await
            .unwrap();

        let owners = conns.entries(2).await.unwrap();
        assert_eq!(owners[0].entry().address, "b");
        assert!(conns.entries(9).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_stale_revision() {
        let (conns, _) = registry();
        let t = table(vec![entry("a", vec![0])]);
        let same_revision = t.clone();
        conns.set_router_table(t).await.unwrap();

        assert!(matches!(
            conns.set_router_table(same_revision).await,
            Err(ShardError::StaleRevision { .. })
        ));
    }

    #[tokio::test]
    async fn test_swap_reuses_and_closes_clients() {
        let (conns, closes) = registry();
        let t1 = table(vec![entry("a", vec![0, 1]), entry("b", vec![2, 3])]);
        conns.set_router_table(t1.clone()).await.unwrap();

        // connect both so close is observable
        conns.entries(0).await.unwrap()[0].client().await.unwrap();
        conns.entries(2).await.unwrap()[0].client().await.unwrap();
        let a_before = conns.entry_by_id("a:8009").await.unwrap();

        // "b" leaves, "a" absorbs its partitions
        let mut a = t1.find_entry("a:8009").unwrap().clone();
        a.partitions = vec![0, 1, 2, 3];
        let mut t2 = t1.clone();
        t2.entries = vec![a];
        t2.update_revision();
        t2.rebuild().unwrap();

        let old = conns.set_router_table(t2).await.unwrap();
        assert_eq!(old.unwrap().revision, t1.revision);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        // "a"'s client instance survived the swap
        let a_after = conns.entry_by_id("a:8009").await.unwrap();
        assert!(Arc::ptr_eq(&a_before, &a_after));
        assert!(conns.entry_by_id("b:8009").await.is_none());
    }

    #[tokio::test]
    async fn test_router_table_absent() {
        let (conns, _) = registry();
        assert!(matches!(
            conns.router_table().await,
            Err(ShardError::NoRouterTable)
        ));
        assert_eq!(conns.revision().await, 0);
    }
}
