//! HTTP surface for the wire contract and the admin API.

pub mod admin;
pub mod node;

use crate::core::ShardError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug)]
pub enum WebError {
    Shard(ShardError),
    Input(String),
    Internal(String),
}

impl From<ShardError> for WebError {
    fn from(err: ShardError) -> Self {
        WebError::Shard(err)
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, message, code) = match self {
            WebError::Shard(err) => {
                if let Some(wire_code) = err.status_code() {
                    let status = StatusCode::from_u16(wire_code)
                        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                    (status, err.to_string(), format!("shard_{}", wire_code))
                } else {
                    match err {
                        ShardError::NoRouterTable => (
                            StatusCode::from_u16(506).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                            err.to_string(),
                            "no_router_table".to_string(),
                        ),
                        ShardError::BadTable(_)
                        | ShardError::StaleRevision { .. }
                        | ShardError::PartitionOutOfRange(..)
                        | ShardError::Serialization(_)
                        | ShardError::Config(_) => (
                            StatusCode::NOT_ACCEPTABLE,
                            err.to_string(),
                            "not_acceptable".to_string(),
                        ),
                        other => (
                            StatusCode::NOT_IMPLEMENTED,
                            other.to_string(),
                            "remote_error".to_string(),
                        ),
                    }
                }
            }
            WebError::Input(message) => {
                (StatusCode::NOT_ACCEPTABLE, message, "input_error".to_string())
            }
            WebError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                message,
                "internal_error".to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            code,
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, WebError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes_pass_through() {
        let response = WebError::from(ShardError::PartitionLocked(3)).into_response();
        assert_eq!(response.status().as_u16(), 434);

        let response = WebError::from(ShardError::RouterTableOld).into_response();
        assert_eq!(response.status().as_u16(), 432);
    }

    #[test]
    fn test_invariant_violations_are_not_acceptable() {
        let response = WebError::from(ShardError::BadTable("nope".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    }

    #[test]
    fn test_missing_table_status() {
        let response = WebError::from(ShardError::NoRouterTable).into_response();
        assert_eq!(response.status().as_u16(), 506);
    }
}
