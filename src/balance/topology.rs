// All the operations necessary for rebalance and topology changes.

use crate::balance::{MoveError, MoveReport, PRESYNC_MAX_CHECKS, TableSink};
use crate::core::Result;
use crate::routing::{RouterEntry, RouterTable};
use crate::sync::router_table_update;
use crate::transport::EntryTransport;
use rand::seq::SliceRandom;
use tracing::{info, warn};

/// Locks the specified partition on every entry currently serving it.
///
/// Best effort: a failed lock is logged and skipped, never fatal. Assumes
/// the router table is up to date; it is not re-verified here.
pub async fn lock_partition(
    transport: &dyn EntryTransport,
    entries: &[RouterEntry],
    partition: u32,
) {
    for entry in entries {
        if let Err(err) = transport.lock_partition(entry, partition).await {
            warn!(
                entry = %entry.id(),
                partition,
                error = %err,
                "unable to lock partition"
            );
        }
    }
}

/// Unlocks the specified partition on the given entries. Best effort, same
/// as locking.
pub async fn unlock_partition(
    transport: &dyn EntryTransport,
    entries: &[RouterEntry],
    partition: u32,
) {
    for entry in entries {
        if let Err(err) = transport.unlock_partition(entry, partition).await {
            warn!(
                entry = %entry.id(),
                partition,
                error = %err,
                "unable to unlock partition"
            );
        }
    }
}

/// Deletes the partition's data from the entry. Does not lock and does not
/// touch the router table.
pub async fn delete_partition(
    transport: &dyn EntryTransport,
    entry: &RouterEntry,
    partition: u32,
) -> Result<()> {
    info!(entry = %entry.id(), partition, "deleting partition from origin");
    transport.delete_partition(entry, partition).await
}

/// Moves a partition from one entry to another.
///
/// 1. Pre-sync against a bounded number of entries.
/// 2. Lock the partition on the entries serving it.
/// 3. Copy: the destination imports directly from the origin.
/// 4. Repoint ownership and persist the new table.
/// 5. Propagate the new table to all entries.
/// 6. Delete the data from the origin.
/// 7. Unlock, unconditionally, on success and on every error path.
///
/// Returns the repointed table and a report of what moved.
pub async fn move_partition(
    transport: &dyn EntryTransport,
    sink: &dyn TableSink,
    table: &RouterTable,
    partition: u32,
    from_id: &str,
    to_id: &str,
) -> std::result::Result<(RouterTable, MoveReport), MoveError> {
    // 1. best-effort sync so we rarely operate on a stale table
    let (table, _) = router_table_update(transport, table.clone(), PRESYNC_MAX_CHECKS).await;

    let from = table
        .find_entry(from_id)
        .cloned()
        .ok_or_else(|| MoveError::Precondition(not_in_table(from_id)))?;
    let to = table
        .find_entry(to_id)
        .cloned()
        .ok_or_else(|| MoveError::Precondition(not_in_table(to_id)))?;
    let serving: Vec<RouterEntry> = table
        .partition_entries(partition)
        .map_err(MoveError::Precondition)?
        .into_iter()
        .cloned()
        .collect();

    // 2. lock everyone serving the partition
    lock_partition(transport, &serving, partition).await;

    let result = execute_move(transport, sink, &table, partition, &from, &to).await;

    // 7. unlock the same entries we locked, no matter how the move went
    unlock_partition(transport, &serving, partition).await;

    result
}

fn not_in_table(id: &str) -> crate::core::ShardError {
    crate::core::ShardError::BadTable(format!("entry {} is not in the router table", id))
}

/// Steps 3–6. Split out so the unconditional unlock wraps every exit.
async fn execute_move(
    transport: &dyn EntryTransport,
    sink: &dyn TableSink,
    table: &RouterTable,
    partition: u32,
    from: &RouterEntry,
    to: &RouterEntry,
) -> std::result::Result<(RouterTable, MoveReport), MoveError> {
    // 3. copy: destination pulls from the origin's export
    let source = transport.export_source(from);
    let bytes_copied = transport
        .import_partition(to, partition, &source)
        .await
        .map_err(MoveError::Copy)?;
    info!(
        partition,
        from = %from.id(),
        to = %to.id(),
        bytes_copied,
        "partition data copied"
    );

    // 4. repoint ownership and persist
    let mut from_next = from.clone();
    from_next.partitions.retain(|p| *p != partition);
    let mut to_next = to.clone();
    to_next.partitions.push(partition);
    let repointed = table
        .add_entries(vec![from_next, to_next])
        .map_err(MoveError::Repoint)?;
    sink.persist(&repointed).await.map_err(MoveError::Repoint)?;

    // 5. push the new table everywhere rather than waiting on periodic sync
    let contacts = repointed.entries.len();
    let (repointed, pushed) = router_table_update(transport, repointed, contacts).await;
    if !pushed {
        warn!(partition, "no entries accepted the repointed router table");
    }

    // 6. drop the data from the origin
    if let Err(err) = delete_partition(transport, from, partition).await {
        return Err(MoveError::Delete {
            from: from.id(),
            source: err,
            table: Box::new(repointed),
        });
    }

    let report = MoveReport {
        partition,
        from: from.id(),
        to: to.id(),
        bytes_copied,
        revision: repointed.revision,
    };
    info!(
        partition,
        from = %report.from,
        to = %report.to,
        revision = report.revision,
        "partition move complete"
    );
    Ok((repointed, report))
}

/// Moves a single partition from the most loaded entry to the least loaded,
/// if the cluster is out of balance.
///
/// Entries are shuffled before scanning so ties between equally loaded
/// nodes don't always pick the same pair. Returns the (possibly unchanged)
/// table and the report of the move, when one happened. Repeated calls
/// converge: a balanced cluster is a no-op.
pub async fn rebalance_single(
    transport: &dyn EntryTransport,
    sink: &dyn TableSink,
    table: &RouterTable,
) -> std::result::Result<(RouterTable, Option<MoveReport>), MoveError> {
    if table.entries.is_empty() {
        return Ok((table.clone(), None));
    }
    let min = table.total_partitions as usize / table.entries.len();

    let mut shuffled: Vec<&RouterEntry> = table.entries.iter().collect();
    shuffled.shuffle(&mut rand::thread_rng());

    let mut largest: Option<&RouterEntry> = None;
    let mut smallest: Option<&RouterEntry> = None;
    for entry in shuffled {
        if entry.partitions.len() > min
            && largest.is_none_or(|l| entry.partitions.len() > l.partitions.len())
        {
            largest = Some(entry);
        }
        if entry.partitions.len() < min
            && smallest.is_none_or(|s| entry.partitions.len() < s.partitions.len())
        {
            smallest = Some(entry);
        }
    }

    let (Some(largest), Some(smallest)) = (largest, smallest) else {
        info!(service = %table.service, "cluster appears to be balanced");
        return Ok((table.clone(), None));
    };

    let partition = largest.partitions[0];
    info!(
        partition,
        from = %largest.id(),
        to = %smallest.id(),
        "rebalancing one partition"
    );
    let (table, report) = move_partition(
        transport,
        sink,
        table,
        partition,
        &largest.id(),
        &smallest.id(),
    )
    .await?;
    Ok((table, Some(report)))
}
