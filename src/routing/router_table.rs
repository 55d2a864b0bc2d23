use crate::core::{Result, ShardError};
use crate::routing::entry::RouterEntry;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Partition ownership snapshot for one named service.
///
/// The table is considered generally immutable. If any change occurs a new
/// table is generated (with a higher revision) and propagated; holders never
/// patch a table in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterTable {
    /// The name of the service. Should be unique.
    pub service: String,
    /// Always increasing, so a greater revision means a more up to date
    /// router table. Seeded from the wall clock.
    pub revision: i64,
    pub total_partitions: u32,
    pub replication_factor: usize,
    /// Request params that the shard key is derived from, in order.
    #[serde(default)]
    pub partition_keys: Vec<String>,
    /// The unique entries.
    #[serde(default)]
    pub entries: Vec<RouterEntry>,
    /// Entries organized by partition: `[0]` is the master, the rest are
    /// replicas in walk order. Indices into `entries`; derived on rebuild.
    #[serde(skip)]
    pub(crate) entries_by_partition: Vec<Vec<usize>>,
}

// Router-table behavior is split by concern to keep routing logic maintainable.
include!("router_table/construct_and_validate.rs");
include!("router_table/mutations.rs");
include!("router_table/lookups.rs");
