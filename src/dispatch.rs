//! Partition-aware request router.
//!
//! Hashes the shard key out of a request, fans the request out to the
//! replicas of the owning partition, and reacts to the protocol's stale
//! table and locked partition signals. Retries run in an explicit bounded
//! loop with an attempt counter, never recursion, so the policy is
//! testable on its own.

use crate::connection::{ClientCreator, Connections, EntryClient};
use crate::core::{Result, ShardError};
use crate::routing::shard_hash;
use crate::sync;
use crate::transport::EntryTransport;
use crate::wire::{self, ShardRequest, ShardResponse};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// How a routed request fans out across replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryType {
    /// Return the first successful replica response.
    Single,
    /// Best effort across all replicas, capped retries.
    #[default]
    All,
    /// Retry aggressively; for operations needing all-replica durability.
    AllQ,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Single => "single",
            QueryType::All => "all",
            QueryType::AllQ => "all_q",
        }
    }

    /// Attempt-round budget before giving up and returning what we have.
    fn max_attempts(&self) -> usize {
        match self {
            QueryType::Single | QueryType::All => 5,
            QueryType::AllQ => 100,
        }
    }
}

/// Delay between attempt rounds that made no progress.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Backoff after hitting a locked partition.
const LOCKED_BACKOFF: Duration = Duration::from_secs(5);

/// Per-call timeout on the data plane.
const CALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Aggregated result of one routed request.
#[derive(Debug)]
pub struct RoutedResponse {
    pub partition: u32,
    /// Responses keyed by the entry id that produced them.
    pub responses: BTreeMap<String, ShardResponse>,
}

impl RoutedResponse {
    /// The first response body, for `single` calls.
    pub fn first(&self) -> Option<&ShardResponse> {
        self.responses.values().next()
    }
}

/// A client that maintains connections to all nodes in the cluster and
/// routes each request to the replicas of the partition it hashes to.
pub struct ShardClient {
    connections: Arc<Connections>,
    transport: Arc<dyn EntryTransport>,
}

impl ShardClient {
    pub fn new(connections: Arc<Connections>, transport: Arc<dyn EntryTransport>) -> Self {
        Self {
            connections,
            transport,
        }
    }

    /// Creates a client by fetching the router table from seed urls.
    pub async fn from_seed(
        creator: Arc<dyn ClientCreator>,
        transport: Arc<dyn EntryTransport>,
        seed_urls: &[String],
    ) -> Result<Self> {
        let connections =
            Connections::from_seed(creator, transport.as_ref(), seed_urls).await?;
        Ok(Self::new(Arc::new(connections), transport))
    }

    pub fn connections(&self) -> &Connections {
        &self.connections
    }

    /// Derives the partition for a request from the table's partition keys.
    ///
    /// Key values are joined in declared order; missing values contribute
    /// empty strings. A request carrying none of the keys cannot be routed.
    async fn partition_for(&self, params: &serde_json::Map<String, Value>) -> Result<u32> {
        let table = self.connections.router_table().await?;
        if table.partition_keys.is_empty() {
            return Err(ShardError::Config(
                "router table declares no partition keys".to_string(),
            ));
        }
        let mut found = false;
        let values: Vec<&str> = table
            .partition_keys
            .iter()
            .map(|k| match params.get(k).and_then(|v| v.as_str()) {
                Some(v) => {
                    found = true;
                    v
                }
                None => "",
            })
            .collect();
        if !found {
            return Err(ShardError::Config(format!(
                "request has none of the partition keys {:?}",
                table.partition_keys
            )));
        }
        table.partition_for_key(&shard_hash::shard_key(&values))
    }

    /// Routes one request.
    ///
    /// Replica responses are collected per entry id. Stale-table signals
    /// (432/435) trigger a resync against the offending entry and another
    /// round; 433 pushes our table out; a locked partition (434) backs off
    /// before the next round. Rounds stop when every replica answered, the
    /// attempt budget is spent, or anything answered for `single`.
    pub async fn api_call(
        &self,
        request: &ShardRequest,
        query_type: QueryType,
    ) -> Result<RoutedResponse> {
        let partition = match request.params.get(wire::P_PARTITION).and_then(Value::as_u64) {
            Some(p) => p as u32,
            None => self.partition_for(&request.params).await?,
        };

        let mut responses: BTreeMap<String, ShardResponse> = BTreeMap::new();
        let max = query_type.max_attempts();

        for attempt in 1..=max {
            let revision = self.connections.revision().await;
            let mut request = request.clone();
            request
                .params
                .insert(wire::P_PARTITION.to_string(), partition.into());
            request
                .params
                .insert(wire::P_REVISION.to_string(), revision.into());
            request.params.insert(
                wire::P_QUERY_TYPE.to_string(),
                query_type.as_str().into(),
            );

            let entries = self.connections.entries(partition).await?;
            let expected = entries.len();
            let mut backoff: Option<Duration> = None;

            for entry_client in &entries {
                let id = entry_client.entry().id();
                if responses.contains_key(&id) {
                    continue;
                }
                let conn = match entry_client.client().await {
                    Ok(conn) => conn,
                    Err(err) => {
                        warn!(entry = %id, error = %err, "no client for entry");
                        continue;
                    }
                };
                let response = match conn.api_call(&request, CALL_TIMEOUT).await {
                    Ok(response) => response,
                    Err(err) => {
                        warn!(entry = %id, error = %err, "routed call failed");
                        continue;
                    }
                };

                match response.status {
                    wire::E_ROUTER_TABLE_OLD | wire::E_NOT_MY_PARTITION => {
                        // our table disagrees with the node; adopt theirs
                        self.resync_from(entry_client).await;
                        break;
                    }
                    wire::E_SEND_ROUTER_TABLE => {
                        self.push_table_to(entry_client).await;
                        break;
                    }
                    wire::E_PARTITION_LOCKED => {
                        backoff = Some(LOCKED_BACKOFF);
                        break;
                    }
                    _ => {
                        responses.insert(id, response);
                        if query_type == QueryType::Single {
                            return Ok(RoutedResponse {
                                partition,
                                responses,
                            });
                        }
                    }
                }
            }

            if responses.len() >= expected {
                break;
            }
            if attempt == max {
                warn!(partition, attempts = max, "retry budget spent");
                break;
            }
            sleep(backoff.unwrap_or(RETRY_DELAY)).await;
        }

        if responses.is_empty() {
            return Err(ShardError::Transport(
                "Unable to get a single response".to_string(),
            ));
        }
        Ok(RoutedResponse {
            partition,
            responses,
        })
    }

    async fn resync_from(&self, entry_client: &EntryClient) {
        match self
            .transport
            .fetch_router_table(entry_client.entry())
            .await
        {
            Ok(table) => {
                if let Err(err) = self.connections.set_router_table(table).await {
                    warn!(error = %err, "resynced table was not newer, keeping ours");
                }
            }
            Err(err) => {
                warn!(
                    entry = %entry_client.entry().id(),
                    error = %err,
                    "unable to fetch router table for resync"
                );
            }
        }
    }

    async fn push_table_to(&self, entry_client: &EntryClient) {
        let Ok(table) = self.connections.router_table().await else {
            return;
        };
        if let Err(err) = sync::entry_checkin(
            self.transport.as_ref(),
            &table,
            entry_client.entry(),
        )
        .await
        {
            warn!(
                entry = %entry_client.entry().id(),
                error = %err,
                "unable to push router table"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ServiceConn;
    use crate::routing::{EntryPorts, RouterEntry, RouterTable};
    use crate::transport::InMemoryTransport;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replies with a scripted sequence of statuses, then 200s forever.
    struct ScriptedConn {
        script: Mutex<Vec<u16>>,
        calls: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl ServiceConn for ScriptedConn {
        async fn api_call(
            &self,
            _request: &ShardRequest,
            _timeout: Duration,
        ) -> Result<ShardResponse> {
            self.calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let status = {
                let mut script = self.script.lock().unwrap();
                if script.is_empty() { 200 } else { script.remove(0) }
            };
            Ok(ShardResponse {
                status,
                message: String::new(),
                body: serde_json::json!({"ok": status == 200}),
            })
        }
    }

    struct ScriptedCreator {
        script: Mutex<Option<Vec<u16>>>,
        calls: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl ClientCreator for ScriptedCreator {
        async fn create(&self, _entry: &RouterEntry) -> Result<Arc<dyn ServiceConn>> {
            let script = self.script.lock().unwrap().take().unwrap_or_default();
            Ok(Arc::new(ScriptedConn {
                script: Mutex::new(script),
                calls: self.calls.clone(),
            }))
        }
    }

    fn table(partition_keys: Vec<&str>) -> RouterTable {
        let mut entry = RouterEntry::new("a", EntryPorts::new(8009, 8010, 0));
        entry.partitions = vec![0, 1, 2, 3];
        let mut t = RouterTable::new("testdb").unwrap();
        t.replication_factor = 1;
        t.partition_keys = partition_keys.into_iter().map(String::from).collect();
        t.entries = vec![entry];
        t.rebuild().unwrap();
        t
    }

    async fn client(script: Vec<u16>) -> (ShardClient, Arc<std::sync::atomic::AtomicUsize>) {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let creator = Arc::new(ScriptedCreator {
            script: Mutex::new(Some(script)),
            calls: calls.clone(),
        });
        let connections = Arc::new(Connections::new(creator));
        connections.set_router_table(table(vec!["user"])).await.unwrap();
        let transport: Arc<dyn EntryTransport> = Arc::new(InMemoryTransport::new());
        (ShardClient::new(connections, transport), calls)
    }

    #[tokio::test]
    async fn test_routes_by_partition_key() {
        let (client, _) = client(vec![]).await;
        let request = ShardRequest::new("/things/get", "GET").param("user", "alice");
        let routed = client.api_call(&request, QueryType::Single).await.unwrap();
        assert!(routed.partition < 4);
        assert!(routed.first().unwrap().is_success());
    }

    #[tokio::test]
    async fn test_missing_partition_key_is_an_error() {
        let (client, _) = client(vec![]).await;
        let request = ShardRequest::new("/things/get", "GET").param("other", "x");
        assert!(matches!(
            client.api_call(&request, QueryType::All).await,
            Err(ShardError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_explicit_partition_wins() {
        let (client, _) = client(vec![]).await;
        let request = ShardRequest::new("/things/get", "GET").param(wire::P_PARTITION, 2);
        let routed = client.api_call(&request, QueryType::All).await.unwrap();
        assert_eq!(routed.partition, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_locked_partition_backs_off_and_retries() {
        let (client, calls) = client(vec![wire::E_PARTITION_LOCKED]).await;
        let request = ShardRequest::new("/things/put", "POST").param("user", "bob");
        let routed = client.api_call(&request, QueryType::All).await.unwrap();
        assert_eq!(routed.responses.len(), 1);
        // one locked answer, one success after the backoff
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_is_bounded() {
        // never succeeds: every round sees a locked partition
        let (client, calls) = client(vec![wire::E_PARTITION_LOCKED; 200]).await;
        let request = ShardRequest::new("/things/put", "POST").param("user", "bob");
        let result = client.api_call(&request, QueryType::All).await;
        assert!(result.is_err());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 5);
    }
}
