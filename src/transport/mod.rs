//! Control-plane transport.
//!
//! Everything the sync and migration protocols say to a single entry goes
//! through [`EntryTransport`], so the same orchestration runs over HTTP in
//! production and over the in-memory fabric in tests.

pub mod http;
pub mod in_memory;

pub use http::{HttpClientCreator, HttpTransport};
pub use in_memory::InMemoryTransport;

use crate::core::Result;
use crate::routing::{RouterEntry, RouterTable};
use crate::wire::CheckinResponse;
use async_trait::async_trait;
use std::time::Duration;

/// Timeout for control calls (checkin, lock/unlock, table push and pull).
pub const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// Hard deadline for a partition copy to report completion.
pub const COPY_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for deleting a partition's data on its origin node.
pub const DELETE_TIMEOUT: Duration = Duration::from_secs(300);

/// Control-plane calls against one entry.
#[async_trait]
pub trait EntryTransport: Send + Sync {
    /// Liveness ping returning the entry's router table revision.
    async fn checkin(&self, entry: &RouterEntry) -> Result<CheckinResponse>;

    /// Pulls the entry's full router table.
    async fn fetch_router_table(&self, entry: &RouterEntry) -> Result<RouterTable>;

    /// Pulls a router table from a bare base url (seed bootstrap).
    async fn fetch_router_table_from(&self, base_url: &str) -> Result<RouterTable>;

    /// Pushes the full local table to the entry (authoritative overwrite).
    async fn push_router_table(&self, entry: &RouterEntry, table: &RouterTable) -> Result<()>;

    async fn lock_partition(&self, entry: &RouterEntry, partition: u32) -> Result<()>;

    async fn unlock_partition(&self, entry: &RouterEntry, partition: u32) -> Result<()>;

    /// Removes the partition's data on the entry. Idempotent on the far end.
    async fn delete_partition(&self, entry: &RouterEntry, partition: u32) -> Result<()>;

    /// Asks the entry to import a partition by pulling it from `source`.
    /// Returns the byte count the entry reports as its completion signal.
    async fn import_partition(
        &self,
        entry: &RouterEntry,
        partition: u32,
        source: &str,
    ) -> Result<u64>;

    /// Base url other entries use to pull exports from this entry.
    fn export_source(&self, entry: &RouterEntry) -> String;
}
