//! Wire contract shared by nodes, proxies and the admin.
//!
//! Endpoint paths, param names and status codes are stable constants; every
//! endpoint has a typed request/response struct. Only the dispatch envelope
//! (`ShardRequest`/`ShardResponse`) carries a generic map, since it wraps
//! application payloads the routing layer does not interpret.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::ShardError;

// These are the endpoints required for shard coordination to work.

/// Router table get endpoint.
pub const ROUTERTABLE_GET: &str = "/__c/rt/get";

/// Sets the router table on this server.
pub const ROUTERTABLE_SET: &str = "/__c/rt/set";

pub const PARTITION_LOCK: &str = "/__c/pt/lock";
pub const PARTITION_UNLOCK: &str = "/__c/pt/unlock";

/// Delete a partition from this server.
pub const PARTITION_DELETE: &str = "/__c/pt/delete";

/// Ping endpoint to check for liveness and the revision of the router table.
pub const CHECKIN: &str = "/__c/checkin";

/// Streams the data for the given partition.
pub const PARTITION_EXPORT: &str = "/__c/pt/export";

/// Initializes an import request between two shards.
pub const PARTITION_IMPORT: &str = "/__c/pt/import";

// Required return codes for the various coordination situations.

/// Returned when the requester has an old router table.
pub const E_ROUTER_TABLE_OLD: u16 = 432;

/// Requester has a newer router table than us, request they update ours.
pub const E_SEND_ROUTER_TABLE: u16 = 433;

/// The requested partition is locked. Requester should try back in a bit.
pub const E_PARTITION_LOCKED: u16 = 434;

/// The requested partition does not live on this shard.
pub const E_NOT_MY_PARTITION: u16 = 435;

// Param names.

/// The partition val (an integer from 0 to total_partitions).
pub const P_PARTITION: &str = "_p";

/// The version of the router table.
pub const P_REVISION: &str = "_v";

/// The query type. Defines how the request is handled by the router.
pub const P_QUERY_TYPE: &str = "_qt";

/// Maps a non-2xx wire status back into the protocol error it stands for.
pub fn error_from_status(status: u16, partition: u32, message: &str) -> ShardError {
    match status {
        E_ROUTER_TABLE_OLD => ShardError::RouterTableOld,
        E_SEND_ROUTER_TABLE => ShardError::SendRouterTable,
        E_PARTITION_LOCKED => ShardError::PartitionLocked(partition),
        E_NOT_MY_PARTITION => ShardError::NotMyPartition(partition),
        _ => ShardError::Transport(format!("status {}: {}", status, message)),
    }
}

/// Response body of the checkin endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckinResponse {
    pub rt_revision: i64,
    pub ts: DateTime<Utc>,
}

/// Envelope carrying a serialized router table.
///
/// The table document stays a generic value here; `RouterTable::from_document`
/// validates it at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterTableDoc {
    pub router_table: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PartitionParams {
    pub partition: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportParams {
    pub partition: u32,
    /// Base http address to pull data from, in the form http://address:port
    pub source: String,
}

/// Response body of the import endpoint. Receiving it is the explicit
/// completion signal for a copy; stream EOF alone never is.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ImportResponse {
    pub bytes: u64,
}

/// Error body returned alongside non-2xx statuses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

/// Transport envelope for application requests routed by partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardRequest {
    pub endpoint: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Map<String, Value>,
}

impl ShardRequest {
    pub fn new(endpoint: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: method.into(),
            params: serde_json::Map::new(),
        }
    }

    /// Sets a param value, replacing any previous one.
    pub fn param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }
}

/// Transport envelope for a single replica's response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardResponse {
    pub status: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub body: Value,
}

impl ShardResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            message: String::new(),
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
