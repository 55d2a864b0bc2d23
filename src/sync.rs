//! Anti-entropy "checkin" protocol.
//!
//! Any two holders of a router table converge by comparing revisions and
//! shipping the newer table to the older side. Last-writer-wins, symmetric,
//! and idempotent: repeating a round after convergence is a no-op.

use crate::core::{Result, ShardError};
use crate::routing::{RouterEntry, RouterTable};
use crate::transport::EntryTransport;
use chrono::Utc;
use tracing::{info, warn};

/// Outcome of one pairwise checkin.
#[derive(Debug, Clone)]
pub enum CheckinOutcome {
    /// Revisions matched; nothing was updated.
    Current,
    /// The remote was behind and received our table.
    UpdatedRemote,
    /// We were behind; the remote's table should be adopted locally.
    UpdatedLocal(RouterTable),
}

impl CheckinOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, CheckinOutcome::Current)
    }
}

/// Fetches the router table from the first seed url that answers.
pub async fn table_from_seed(
    transport: &dyn EntryTransport,
    seed_urls: &[String],
) -> Result<RouterTable> {
    let mut last_err: Option<ShardError> = None;
    for url in seed_urls {
        match transport.fetch_router_table_from(url).await {
            Ok(table) => return Ok(table),
            Err(err) => {
                warn!(seed = %url, error = %err, "seed did not yield a router table");
                last_err = Some(err);
            }
        }
    }
    Err(ShardError::Transport(format!(
        "Unable to get a router table from {} seed url(s): {}",
        seed_urls.len(),
        last_err.map_or_else(|| "no seeds given".to_string(), |e| e.to_string())
    )))
}

/// Checks in with one entry and converges the two tables.
///
/// Compares the entry's revision with ours: equal is a no-op, a lower remote
/// revision gets our table pushed to it, a higher one has its table pulled
/// for local adoption. The caller installs an `UpdatedLocal` table through
/// its registry.
pub async fn entry_checkin(
    transport: &dyn EntryTransport,
    table: &RouterTable,
    entry: &RouterEntry,
) -> Result<CheckinOutcome> {
    let checkin = transport.checkin(entry).await?;

    if checkin.rt_revision == table.revision {
        return Ok(CheckinOutcome::Current);
    }

    if checkin.rt_revision < table.revision {
        transport.push_router_table(entry, table).await?;
        info!(
            entry = %entry.id(),
            revision = table.revision,
            "updated remote router table"
        );
        return Ok(CheckinOutcome::UpdatedRemote);
    }

    let remote = transport.fetch_router_table(entry).await?;
    info!(
        entry = %entry.id(),
        revision = remote.revision,
        "found updated router table"
    );
    Ok(CheckinOutcome::UpdatedLocal(remote))
}

/// Checks in with up to `max_checks` entries of the table.
///
/// Individual failures are logged and skipped; the sweep keeps going.
/// Returns the (possibly newer) table and whether any side changed.
/// Successful contacts refresh the entry's advisory `last_seen_at`.
pub async fn router_table_update(
    transport: &dyn EntryTransport,
    table: RouterTable,
    max_checks: usize,
) -> (RouterTable, bool) {
    let mut table = table;
    let mut updated = false;
    let contacts: Vec<RouterEntry> = table.entries.clone();

    for entry in contacts.iter().take(max_checks) {
        match entry_checkin(transport, &table, entry).await {
            Ok(outcome) => {
                if let CheckinOutcome::UpdatedLocal(remote) = outcome {
                    table = remote;
                    updated = true;
                } else {
                    updated = updated || outcome.changed();
                }
                if let Some(seen) = table.entries.iter_mut().find(|e| e.id() == entry.id()) {
                    seen.last_seen_at = Utc::now();
                }
            }
            Err(err) => {
                warn!(entry = %entry.id(), error = %err, "checkin failed, skipping entry");
            }
        }
    }
    (table, updated)
}
