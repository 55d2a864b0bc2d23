// ============================================================================
// shardroute: client-side sharding layer
// ============================================================================
//
// Tracks which node owns which partition, routes requests to the correct
// replica set, and safely migrates partitions between nodes during
// rebalancing. The router table has a single logical owner (the admin) and
// propagates by last-writer-wins on its revision; there is no consensus
// protocol here.

pub mod admin;
pub mod balance;
pub mod connection;
pub mod core;
pub mod dispatch;
pub mod manager;
pub mod routing;
pub mod shard;
pub mod sync;
pub mod transport;
pub mod web;
pub mod wire;

// Re-export main types for convenience
pub use crate::core::{Result, ShardError};
pub use admin::Services;
pub use balance::{MoveError, MoveReport, TableSink};
pub use connection::{ClientConfig, ClientCreator, Connections, EntryClient, ServiceConn};
pub use dispatch::{QueryType, RoutedResponse, ShardClient};
pub use manager::Manager;
pub use routing::{EntryPorts, RouterEntry, RouterTable};
pub use shard::{MemShard, NoopShard, Shard};
pub use sync::{CheckinOutcome, entry_checkin, router_table_update};
pub use transport::{EntryTransport, HttpClientCreator, HttpTransport, InMemoryTransport};
pub use wire::{ShardRequest, ShardResponse};
