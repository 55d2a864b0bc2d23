pub mod config;
pub mod registry;

pub use config::{ClientConfig, WireProtocol};
pub use registry::Connections;

use crate::core::{Result, ShardError};
use crate::routing::RouterEntry;
use crate::wire::{ShardRequest, ShardResponse};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Minimum gap between connection attempts against an entry that failed to
/// connect.
pub const CONNECT_COOLDOWN: Duration = Duration::from_secs(5);

/// A live data-plane connection to one entry.
#[async_trait]
pub trait ServiceConn: Send + Sync {
    /// Sends one routed request and waits for the response envelope.
    async fn api_call(&self, request: &ShardRequest, timeout: Duration) -> Result<ShardResponse>;

    /// Releases the connection. Called at most once per created connection.
    async fn close(&self) {}
}

/// Creates a client from a router entry.
///
/// Supplying a custom one makes it easy to change between wire framings, or
/// to substitute an in-memory fabric in tests.
#[async_trait]
pub trait ClientCreator: Send + Sync {
    async fn create(&self, entry: &RouterEntry) -> Result<Arc<dyn ServiceConn>>;
}

/// Matches an entry with its (lazily created) client connection.
///
/// One `EntryClient` exists per distinct entry id and is shared by every
/// partition that entry serves.
pub struct EntryClient {
    entry: RouterEntry,
    creator: Arc<dyn ClientCreator>,
    state: RwLock<ClientState>,
}

struct ClientState {
    conn: Option<Arc<dyn ServiceConn>>,
    last_attempt: Option<Instant>,
}

impl EntryClient {
    pub(crate) fn new(entry: RouterEntry, creator: Arc<dyn ClientCreator>) -> Self {
        Self {
            entry,
            creator,
            state: RwLock::new(ClientState {
                conn: None,
                last_attempt: None,
            }),
        }
    }

    pub fn entry(&self) -> &RouterEntry {
        &self.entry
    }

    /// Gets the client, connecting on first use.
    ///
    /// The fast path is a shared read of an existing connection. On a miss we
    /// take the write lock and check again, since another caller may have
    /// connected in the window between the two locks. A failed attempt is
    /// returned to the caller as-is and starts the cooldown; there is no
    /// internal retry.
    pub async fn client(&self) -> Result<Arc<dyn ServiceConn>> {
        {
            let state = self.state.read().await;
            if let Some(conn) = &state.conn {
                return Ok(conn.clone());
            }
        }

        let mut state = self.state.write().await;
        if let Some(conn) = &state.conn {
            // someone else got to it before we did
            return Ok(conn.clone());
        }
        if let Some(at) = state.last_attempt {
            if at.elapsed() < CONNECT_COOLDOWN {
                return Err(ShardError::Transport(format!(
                    "No client available for {}, will try to connect again in a few seconds",
                    self.entry.id()
                )));
            }
        }
        state.last_attempt = Some(Instant::now());
        let conn = self.creator.create(&self.entry).await?;
        state.conn = Some(conn.clone());
        Ok(conn)
    }

    /// Closes the connection if one was ever created. Safe to call when the
    /// client never connected; the underlying close runs at most once.
    pub async fn close(&self) {
        let conn = { self.state.write().await.conn.take() };
        if let Some(conn) = conn {
            conn.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::EntryPorts;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingConn {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ServiceConn for CountingConn {
        async fn api_call(
            &self,
            _request: &ShardRequest,
            _timeout: Duration,
        ) -> Result<ShardResponse> {
            Ok(ShardResponse::ok(Value::Null))
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountingCreator {
        creates: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl ClientCreator for CountingCreator {
        async fn create(&self, entry: &RouterEntry) -> Result<Arc<dyn ServiceConn>> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ShardError::Transport(format!(
                    "refused by {}",
                    entry.id()
                )));
            }
            Ok(Arc::new(CountingConn {
                closes: self.closes.clone(),
            }))
        }
    }

    fn harness(fail: bool) -> (EntryClient, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let creates = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        let creator = Arc::new(CountingCreator {
            creates: creates.clone(),
            closes: closes.clone(),
            fail,
        });
        let entry = RouterEntry::new("localhost", EntryPorts::new(8009, 8010, 0));
        (EntryClient::new(entry, creator), creates, closes)
    }

    #[tokio::test]
    async fn test_lazy_connect_reuses_connection() {
        let (client, creates, _) = harness(false);
        client.client().await.unwrap();
        client.client().await.unwrap();
        assert_eq!(creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_enters_cooldown() {
        let (client, creates, _) = harness(true);
        assert!(client.client().await.is_err());
        // immediate retry hits the cooldown, not the creator
        assert!(client.client().await.is_err());
        assert_eq!(creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_runs_once() {
        let (client, _, closes) = harness(false);
        client.client().await.unwrap();
        client.close().await;
        client.close().await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_without_connect_is_noop() {
        let (client, _, closes) = harness(false);
        client.close().await;
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }
}
