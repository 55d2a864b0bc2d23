use crate::connection::{ClientConfig, ClientCreator, ServiceConn, WireProtocol};
use crate::core::{Result, ShardError};
use crate::routing::{RouterEntry, RouterTable};
use crate::transport::{CONTROL_TIMEOUT, COPY_TIMEOUT, DELETE_TIMEOUT, EntryTransport};
use crate::wire::{
    self, CheckinResponse, ErrorBody, ImportResponse, RouterTableDoc, ShardRequest, ShardResponse,
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn transport_err(err: reqwest::Error) -> ShardError {
    if err.is_timeout() {
        ShardError::Timeout(err.to_string())
    } else {
        ShardError::Transport(err.to_string())
    }
}

/// Reads the error body of a non-2xx control response and maps it onto the
/// protocol error taxonomy.
async fn status_error(response: reqwest::Response, partition: u32) -> ShardError {
    let status = response.status().as_u16();
    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => String::new(),
    };
    wire::error_from_status(status, partition, &message)
}

/// HTTP binding of the control-plane contract.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn base(entry: &RouterEntry) -> String {
        format!("http://{}:{}", entry.address, entry.ports.http)
    }

    async fn get_table(&self, url: String) -> Result<RouterTable> {
        let response = self
            .client
            .get(url)
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await
            .map_err(transport_err)?;
        if !response.status().is_success() {
            return Err(status_error(response, 0).await);
        }
        let doc: RouterTableDoc = response.json().await.map_err(transport_err)?;
        RouterTable::from_document(doc.router_table)
    }

    async fn partition_call(
        &self,
        method: reqwest::Method,
        url: String,
        partition: u32,
        timeout: Duration,
    ) -> Result<reqwest::Response> {
        let response = self
            .client
            .request(method, url)
            .query(&[("partition", partition)])
            .timeout(timeout)
            .send()
            .await
            .map_err(transport_err)?;
        if !response.status().is_success() {
            return Err(status_error(response, partition).await);
        }
        Ok(response)
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntryTransport for HttpTransport {
    async fn checkin(&self, entry: &RouterEntry) -> Result<CheckinResponse> {
        let response = self
            .client
            .get(format!("{}{}", Self::base(entry), wire::CHECKIN))
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await
            .map_err(transport_err)?;
        if !response.status().is_success() {
            return Err(status_error(response, 0).await);
        }
        response.json().await.map_err(transport_err)
    }

    async fn fetch_router_table(&self, entry: &RouterEntry) -> Result<RouterTable> {
        self.get_table(format!("{}{}", Self::base(entry), wire::ROUTERTABLE_GET))
            .await
    }

    async fn fetch_router_table_from(&self, base_url: &str) -> Result<RouterTable> {
        self.get_table(format!(
            "{}{}",
            base_url.trim_end_matches('/'),
            wire::ROUTERTABLE_GET
        ))
        .await
    }

    async fn push_router_table(&self, entry: &RouterEntry, table: &RouterTable) -> Result<()> {
        let doc = table.to_document()?;
        let response = self
            .client
            .post(format!("{}{}", Self::base(entry), wire::ROUTERTABLE_SET))
            .json(&json!({ "router_table": doc }))
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await
            .map_err(transport_err)?;
        if !response.status().is_success() {
            return Err(status_error(response, 0).await);
        }
        Ok(())
    }

    async fn lock_partition(&self, entry: &RouterEntry, partition: u32) -> Result<()> {
        self.partition_call(
            reqwest::Method::POST,
            format!("{}{}", Self::base(entry), wire::PARTITION_LOCK),
            partition,
            CONTROL_TIMEOUT,
        )
        .await
        .map(|_| ())
    }

    async fn unlock_partition(&self, entry: &RouterEntry, partition: u32) -> Result<()> {
        self.partition_call(
            reqwest::Method::POST,
            format!("{}{}", Self::base(entry), wire::PARTITION_UNLOCK),
            partition,
            CONTROL_TIMEOUT,
        )
        .await
        .map(|_| ())
    }

    async fn delete_partition(&self, entry: &RouterEntry, partition: u32) -> Result<()> {
        self.partition_call(
            reqwest::Method::DELETE,
            format!("{}{}", Self::base(entry), wire::PARTITION_DELETE),
            partition,
            DELETE_TIMEOUT,
        )
        .await
        .map(|_| ())
    }

    async fn import_partition(
        &self,
        entry: &RouterEntry,
        partition: u32,
        source: &str,
    ) -> Result<u64> {
        let response = self
            .client
            .post(format!("{}{}", Self::base(entry), wire::PARTITION_IMPORT))
            .query(&[
                ("partition", partition.to_string()),
                ("source", source.to_string()),
            ])
            .timeout(COPY_TIMEOUT)
            .send()
            .await
            .map_err(transport_err)?;
        if !response.status().is_success() {
            return Err(status_error(response, partition).await);
        }
        let body: ImportResponse = response.json().await.map_err(transport_err)?;
        Ok(body.bytes)
    }

    fn export_source(&self, entry: &RouterEntry) -> String {
        Self::base(entry)
    }
}

/// Creates JSON-framed data-plane connections over HTTP.
pub struct HttpClientCreator {
    config: ClientConfig,
    client: reqwest::Client,
}

impl HttpClientCreator {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

struct HttpServiceConn {
    base: String,
    client: reqwest::Client,
}

#[async_trait]
impl ServiceConn for HttpServiceConn {
    async fn api_call(&self, request: &ShardRequest, timeout: Duration) -> Result<ShardResponse> {
        let response = self
            .client
            .post(format!("{}{}", self.base, request.endpoint))
            .json(request)
            .timeout(timeout)
            .send()
            .await
            .map_err(transport_err)?;
        let status = response.status().as_u16();
        let body = response
            .json::<serde_json::Value>()
            .await
            .unwrap_or(serde_json::Value::Null);
        let message = body
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(ShardResponse {
            status,
            message,
            body,
        })
    }
}

#[async_trait]
impl ClientCreator for HttpClientCreator {
    async fn create(&self, entry: &RouterEntry) -> Result<Arc<dyn ServiceConn>> {
        self.config
            .validate()
            .map_err(ShardError::Config)?;
        let port = self.config.protocol.port(&entry.ports);
        match self.config.protocol {
            WireProtocol::Json => Ok(Arc::new(HttpServiceConn {
                base: format!("http://{}:{}", entry.address, port),
                client: self.client.clone(),
            })),
            WireProtocol::Binary => Err(ShardError::Config(format!(
                "binary framing for {} is provided by the embedding transport",
                entry.id()
            ))),
        }
    }
}
