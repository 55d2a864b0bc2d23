//! Admin/balancer API.
//!
//! The admin owns the authoritative router tables: it registers shards,
//! pushes tables to nodes, and drives rebalancing one partition move at a
//! time.

use crate::admin::Services;
use crate::balance;
use crate::routing::{EntryPorts, RouterEntry};
use crate::sync;
use crate::transport::EntryTransport;
use crate::web::{Result, WebError};
use crate::wire::RouterTableDoc;
use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::routing::{get, post, put};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Pause between consecutive rebalance steps.
const REBALANCE_STEP_DELAY: Duration = Duration::from_secs(3);

/// Explicitly constructed admin context handed to the listener.
#[derive(Clone)]
pub struct AdminContext {
    pub services: Arc<Services>,
    pub transport: Arc<dyn EntryTransport>,
}

/// Builds the admin API router.
pub fn router(ctx: AdminContext) -> Router {
    Router::new()
        .route("/api/service", get(service_get))
        .route("/api/service/new", put(service_new))
        .route("/api/service/update", get(service_update))
        .route("/api/service/rebalance", post(service_rebalance))
        .route("/api/shard/new", put(shard_new))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

#[derive(Debug, Deserialize)]
struct ServiceParams {
    service: String,
}

#[derive(Debug, Deserialize)]
struct ServiceNewParams {
    service: String,
    total_partitions: u32,
    #[serde(default = "default_replication")]
    replication_factor: usize,
    #[serde(default)]
    partition_keys: Vec<String>,
}

fn default_replication() -> usize {
    2
}

#[derive(Debug, Deserialize)]
struct RebalanceParams {
    service: String,
    #[serde(default = "default_max")]
    max: u32,
}

fn default_max() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct ShardNewParams {
    service: String,
    address: String,
    json_port: u16,
    http_port: u16,
    #[serde(default)]
    bin_port: u16,
}

#[derive(Debug, Serialize)]
struct RebalanceStep {
    partition: u32,
    from: String,
    to: String,
    bytes_copied: u64,
    revision: i64,
}

#[derive(Debug, Serialize)]
struct RebalanceResponse {
    steps: Vec<RebalanceStep>,
    balanced: bool,
    /// First fatal error, when the batch stopped early. Steps already
    /// applied stay in effect.
    error: Option<String>,
}

async fn service_table(ctx: &AdminContext, service: &str) -> Result<crate::routing::RouterTable> {
    ctx.services
        .router_table(service)
        .await
        .ok_or_else(|| WebError::Input(format!("service {} not found", service)))
}

async fn service_get(
    State(ctx): State<AdminContext>,
    Query(params): Query<ServiceParams>,
) -> Result<Json<RouterTableDoc>> {
    let table = service_table(&ctx, &params.service).await?;
    Ok(Json(RouterTableDoc {
        router_table: table.to_document()?,
    }))
}

async fn service_new(
    State(ctx): State<AdminContext>,
    Json(params): Json<ServiceNewParams>,
) -> Result<Json<RouterTableDoc>> {
    let table = ctx
        .services
        .create_service(
            params.service,
            params.total_partitions,
            params.replication_factor,
            params.partition_keys,
        )
        .await?;
    Ok(Json(RouterTableDoc {
        router_table: table.to_document()?,
    }))
}

/// Checks in with every entry of the service, converging their tables, and
/// returns the refreshed table.
async fn service_update(
    State(ctx): State<AdminContext>,
    Query(params): Query<ServiceParams>,
) -> Result<Json<RouterTableDoc>> {
    let table = service_table(&ctx, &params.service).await?;
    let contacts = table.entries.len();
    let (table, updated) =
        sync::router_table_update(ctx.transport.as_ref(), table, contacts).await;
    if updated {
        ctx.services.set_router_table(table.clone()).await?;
    }
    Ok(Json(RouterTableDoc {
        router_table: table.to_document()?,
    }))
}

/// Runs up to `max` single-partition rebalance steps with a pause between
/// them, stopping at balance or on the first fatal error.
async fn service_rebalance(
    State(ctx): State<AdminContext>,
    Query(params): Query<RebalanceParams>,
) -> Result<Json<RebalanceResponse>> {
    let mut table = service_table(&ctx, &params.service).await?;
    let mut steps = Vec::new();
    let mut balanced = false;
    let mut first_error = None;

    for round in 0..params.max {
        match balance::rebalance_single(ctx.transport.as_ref(), ctx.services.as_ref(), &table)
            .await
        {
            Ok((next, Some(report))) => {
                info!(
                    service = %params.service,
                    partition = report.partition,
                    from = %report.from,
                    to = %report.to,
                    "rebalance step complete"
                );
                steps.push(RebalanceStep {
                    partition: report.partition,
                    from: report.from,
                    to: report.to,
                    bytes_copied: report.bytes_copied,
                    revision: report.revision,
                });
                table = next;
            }
            Ok((_, None)) => {
                balanced = true;
                break;
            }
            Err(err) => {
                error!(service = %params.service, error = %err, "rebalance step failed");
                first_error = Some(err.to_string());
                break;
            }
        }
        if round + 1 < params.max {
            tokio::time::sleep(REBALANCE_STEP_DELAY).await;
        }
    }

    Ok(Json(RebalanceResponse {
        steps,
        balanced,
        error: first_error,
    }))
}

/// Registers a new shard. The first entry of an empty service receives all
/// of its partitions.
async fn shard_new(
    State(ctx): State<AdminContext>,
    Json(params): Json<ShardNewParams>,
) -> Result<Json<RouterTableDoc>> {
    let entry = RouterEntry::new(
        params.address,
        EntryPorts::new(params.json_port, params.http_port, params.bin_port),
    );
    let table = ctx
        .services
        .register_shard(ctx.transport.as_ref(), &params.service, entry)
        .await?;
    Ok(Json(RouterTableDoc {
        router_table: table.to_document()?,
    }))
}
