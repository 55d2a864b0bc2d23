//! Node-side controllers for the wire contract.
//!
//! Every node serves these endpoints so peers, proxies and the admin can
//! check in, exchange router tables, and drive partition migrations.

use crate::manager::Manager;
use crate::routing::RouterTable;
use crate::web::{Result, WebError};
use crate::wire::{
    self, CheckinResponse, ImportParams, ImportResponse, PartitionParams, RouterTableDoc,
};
use axum::Json;
use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use chrono::Utc;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Explicitly constructed node context handed to the listener; there is no
/// process-wide manager.
#[derive(Clone)]
pub struct NodeContext {
    pub manager: Arc<Manager>,
}

/// Builds the control router for a node.
pub fn router(ctx: NodeContext) -> Router {
    Router::new()
        .route(wire::CHECKIN, get(checkin))
        .route(wire::ROUTERTABLE_GET, get(router_table_get))
        .route(wire::ROUTERTABLE_SET, post(router_table_set))
        .route(wire::PARTITION_LOCK, post(lock))
        .route(wire::PARTITION_UNLOCK, post(unlock))
        .route(wire::PARTITION_DELETE, delete(partition_delete))
        .route(wire::PARTITION_EXPORT, get(partition_export))
        .route(wire::PARTITION_IMPORT, post(partition_import))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Guards a data-plane request: the partition must be ours and unlocked.
///
/// Embedding applications call this before serving partitioned traffic; the
/// returned wire errors (434/435) tell callers to back off or resync.
pub async fn partition_guard(manager: &Manager, partition: u32) -> Result<()> {
    let (responsible, locked) = manager.my_responsibility(partition).await;
    if locked {
        return Err(crate::core::ShardError::PartitionLocked(partition).into());
    }
    if !responsible {
        return Err(crate::core::ShardError::NotMyPartition(partition).into());
    }
    Ok(())
}

/// Guards a caller-supplied router table revision.
///
/// An absent revision passes (the param is optional); a mismatch tells the
/// caller to update (432) or to send us their table (433).
pub async fn revision_guard(manager: &Manager, revision: Option<i64>) -> Result<()> {
    let Some(revision) = revision else {
        return Ok(());
    };
    let ours = manager.checkin_revision().await;
    if ours < revision {
        return Err(crate::core::ShardError::SendRouterTable.into());
    }
    if ours > revision {
        return Err(crate::core::ShardError::RouterTableOld.into());
    }
    Ok(())
}

async fn checkin(State(ctx): State<NodeContext>) -> Json<CheckinResponse> {
    Json(CheckinResponse {
        rt_revision: ctx.manager.checkin_revision().await,
        ts: Utc::now(),
    })
}

async fn router_table_get(State(ctx): State<NodeContext>) -> Result<Json<RouterTableDoc>> {
    let table = ctx.manager.router_table().await?;
    Ok(Json(RouterTableDoc {
        router_table: table.to_document()?,
    }))
}

async fn router_table_set(
    State(ctx): State<NodeContext>,
    Json(doc): Json<RouterTableDoc>,
) -> Result<impl IntoResponse> {
    let table = RouterTable::from_document(doc.router_table)?;
    ctx.manager.set_router_table(table).await?;
    Ok(StatusCode::OK)
}

async fn lock(
    State(ctx): State<NodeContext>,
    Query(params): Query<PartitionParams>,
) -> Result<impl IntoResponse> {
    ctx.manager.lock_partition(params.partition).await?;
    Ok(StatusCode::OK)
}

async fn unlock(
    State(ctx): State<NodeContext>,
    Query(params): Query<PartitionParams>,
) -> Result<impl IntoResponse> {
    ctx.manager.unlock_partition(params.partition).await?;
    Ok(StatusCode::OK)
}

async fn partition_delete(
    State(ctx): State<NodeContext>,
    Query(params): Query<PartitionParams>,
) -> Result<impl IntoResponse> {
    ctx.manager
        .shard()
        .delete_partition(params.partition)
        .await?;
    Ok(StatusCode::OK)
}

/// Upper bound on a single exported body chunk.
const EXPORT_CHUNK: usize = 64 * 1024;

async fn partition_export(
    State(ctx): State<NodeContext>,
    Query(params): Query<PartitionParams>,
) -> Result<impl IntoResponse> {
    let mut buf = Vec::new();
    let bytes = ctx
        .manager
        .shard()
        .export_partition(params.partition, &mut buf)
        .await?;
    info!(partition = params.partition, bytes, "exported partition");
    let chunks: Vec<Bytes> = buf.chunks(EXPORT_CHUNK).map(Bytes::copy_from_slice).collect();
    Ok(Body::from_stream(futures::stream::iter(
        chunks.into_iter().map(Ok::<_, std::io::Error>),
    )))
}

/// Pulls a partition from the source's export endpoint and imports it.
///
/// The response body is the explicit completion signal: callers treat its
/// arrival, not stream EOF, as success.
async fn partition_import(
    State(ctx): State<NodeContext>,
    Query(params): Query<ImportParams>,
) -> Result<Json<ImportResponse>> {
    let url = format!(
        "{}{}?partition={}",
        params.source.trim_end_matches('/'),
        wire::PARTITION_EXPORT,
        params.partition
    );
    info!(partition = params.partition, source = %url, "importing partition");

    let response = reqwest::get(&url)
        .await
        .map_err(|e| WebError::Internal(format!("export pull failed: {}", e)))?;
    if !response.status().is_success() {
        return Err(WebError::Internal(format!(
            "export pull from {} returned {}",
            url,
            response.status()
        )));
    }
    let payload = response
        .bytes()
        .await
        .map_err(|e| WebError::Internal(format!("export stream failed: {}", e)))?;

    let bytes = ctx
        .manager
        .shard()
        .import_partition(params.partition, &mut payload.as_ref())
        .await?;
    info!(partition = params.partition, bytes, "imported partition");
    Ok(Json(ImportResponse { bytes }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ClientConfig;
    use crate::shard::MemShard;
    use crate::transport::HttpClientCreator;
    use tempfile::TempDir;

    async fn manager(dir: &TempDir) -> Arc<Manager> {
        Manager::new(
            Arc::new(MemShard::new()),
            "testdb",
            dir.path(),
            "a:8009",
            Arc::new(HttpClientCreator::new(ClientConfig::new())),
        )
        .await
        .unwrap()
    }

    fn built_table() -> RouterTable {
        let mut entry =
            crate::routing::RouterEntry::new("a", crate::routing::EntryPorts::new(8009, 8010, 0));
        entry.partitions = vec![0, 1];
        let mut table = RouterTable::new("testdb").unwrap();
        table.replication_factor = 1;
        table.entries = vec![entry];
        table.rebuild().unwrap();
        table
    }

    #[tokio::test]
    async fn test_partition_guard() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir).await;
        m.set_router_table(built_table()).await.unwrap();

        assert!(partition_guard(&m, 0).await.is_ok());

        m.lock_partition(0).await.unwrap();
        let err = partition_guard(&m, 0).await.unwrap_err();
        assert_eq!(err.into_response().status().as_u16(), 434);

        let err = partition_guard(&m, 7).await.unwrap_err();
        assert_eq!(err.into_response().status().as_u16(), 435);
    }

    #[tokio::test]
    async fn test_revision_guard() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir).await;
        let table = built_table();
        let revision = table.revision;
        m.set_router_table(table).await.unwrap();

        assert!(revision_guard(&m, None).await.is_ok());
        assert!(revision_guard(&m, Some(revision)).await.is_ok());

        // caller is behind us
        let err = revision_guard(&m, Some(revision - 10)).await.unwrap_err();
        assert_eq!(err.into_response().status().as_u16(), 432);

        // caller is ahead of us
        let err = revision_guard(&m, Some(revision + 10)).await.unwrap_err();
        assert_eq!(err.into_response().status().as_u16(), 433);
    }
}
