//! Partition migration and rebalancing.
//!
//! Moving a partition is a sequential pipeline: pre-sync, lock, copy,
//! repoint, propagate, delete, with an unconditional unlock on every exit
//! path. Rebalancing picks one overloaded/underloaded pair and performs one
//! such move per call.

pub mod topology;

pub use topology::{
    delete_partition, lock_partition, move_partition, rebalance_single, unlock_partition,
};

use crate::core::{Result, ShardError};
use crate::routing::RouterTable;
use async_trait::async_trait;
use thiserror::Error;

/// Number of entries contacted during the pre-move sync.
pub const PRESYNC_MAX_CHECKS: usize = 3;

/// Where repointed tables are persisted during a move. The admin's service
/// registry is the production sink.
#[async_trait]
pub trait TableSink: Send + Sync {
    async fn persist(&self, table: &RouterTable) -> Result<()>;
}

/// Describes one completed partition move.
#[derive(Debug, Clone)]
pub struct MoveReport {
    pub partition: u32,
    pub from: String,
    pub to: String,
    pub bytes_copied: u64,
    /// Revision of the repointed table.
    pub revision: i64,
}

/// Failure modes of a partition move.
///
/// `Copy` and `Repoint` leave partition ownership untouched; retrying the
/// whole move is safe. `Delete` means the table was already repointed and
/// persisted; the safe recovery is retrying just the delete against the
/// origin, never re-running the move.
#[derive(Debug, Error)]
pub enum MoveError {
    #[error("move precondition failed: {0}")]
    Precondition(ShardError),

    #[error("partition copy failed: {0}")]
    Copy(ShardError),

    #[error("router table repoint failed: {0}")]
    Repoint(ShardError),

    #[error("partition delete on {from} failed after repoint: {source}")]
    Delete {
        from: String,
        source: ShardError,
        /// The repointed table that is already in effect.
        table: Box<RouterTable>,
    },
}
