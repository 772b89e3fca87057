// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The boundary with the remote ingestion service.
//!
//! Ingestion is asynchronous on the remote side: a compressed batch is submitted,
//! then its status is polled until it reaches a terminal state. [`IngestClient`] is
//! the seam the shipper depends on; [`HttpIngestClient`] is the HTTP
//! implementation.

use crate::level_switch::Severity;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, error};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Ingestion endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Payload rejected with {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid response from ingestion endpoint: {0}")]
    InvalidResponse(String),
}

impl IngestError {
    /// Classifies a non-success HTTP status. Client errors mean the payload itself
    /// is the problem, except for timeouts and throttling which are worth retrying.
    pub fn from_status(status: u16, body: String) -> Self {
        let is_permanent = (400..500).contains(&status)
            && status != StatusCode::REQUEST_TIMEOUT.as_u16()
            && status != StatusCode::TOO_MANY_REQUESTS.as_u16();
        if is_permanent {
            IngestError::Rejected { status, body }
        } else {
            IngestError::Status { status, body }
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, IngestError::Rejected { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum IngestionStatus {
    Pending,
    Succeeded,
    Failed,
}

impl IngestionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, IngestionStatus::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionStatusReport {
    pub status: IngestionStatus,
    /// Minimum level the remote wants to receive. `None` releases remote control.
    #[serde(default)]
    pub minimum_level: Option<Severity>,
    #[serde(default)]
    pub details: Option<String>,
}

impl IngestionStatusReport {
    pub fn new(status: IngestionStatus) -> Self {
        IngestionStatusReport {
            status,
            minimum_level: None,
            details: None,
        }
    }
}

/// How the remote should interpret the submitted rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionMapping {
    pub format: String,
    pub mapping_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IngestRequest<'a> {
    /// zstd-compressed JSON body.
    pub body: &'a [u8],
    pub database: &'a str,
    pub table: &'a str,
    pub mapping: &'a IngestionMapping,
    pub flush_immediately: bool,
    pub correlation_id: Uuid,
}

#[async_trait]
pub trait IngestClient: Send + Sync {
    /// Submits a batch and returns the correlation id to poll with.
    async fn submit(&self, request: IngestRequest<'_>) -> Result<Uuid, IngestError>;

    async fn poll_status(&self, correlation_id: Uuid)
        -> Result<IngestionStatusReport, IngestError>;
}

#[derive(Debug, Clone)]
pub struct HttpIngestClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpIngestClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        https_proxy: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, IngestError> {
        let client = build_client(https_proxy, timeout)
            .map_err(|e| IngestError::Transport(format!("Unable to build HTTP client: {e}")))?;
        Ok(HttpIngestClient {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(api_key) => builder.bearer_auth(api_key),
            None => builder,
        }
    }
}

fn build_client(
    https_proxy: Option<&str>,
    timeout: Duration,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder().use_rustls_tls().timeout(timeout);
    if let Some(proxy) = https_proxy {
        builder = builder.proxy(reqwest::Proxy::https(proxy)?);
    }
    builder.build()
}

#[async_trait]
impl IngestClient for HttpIngestClient {
    async fn submit(&self, request: IngestRequest<'_>) -> Result<Uuid, IngestError> {
        let url = format!(
            "{}/v1/ingest/{}/{}",
            self.base_url, request.database, request.table
        );
        let mut query = vec![
            ("format", request.mapping.format.clone()),
            ("flushImmediately", request.flush_immediately.to_string()),
        ];
        if let Some(mapping_name) = &request.mapping.mapping_name {
            query.push(("mappingName", mapping_name.clone()));
        }

        let builder = self
            .client
            .post(&url)
            .query(&query)
            .header("Content-Type", "application/json")
            .header("Content-Encoding", "zstd")
            .header("X-Correlation-Id", request.correlation_id.to_string())
            .body(request.body.to_vec());

        let time = Instant::now();
        let response = self
            .authorize(builder)
            .send()
            .await
            .map_err(|e| IngestError::Transport(e.to_string()))?;
        let elapsed = time.elapsed();

        let status = response.status();
        if status.is_success() {
            debug!(
                "LOG SHIPPER | Submitted {} bytes as {} in {} ms",
                request.body.len(),
                request.correlation_id,
                elapsed.as_millis()
            );
            return Ok(request.correlation_id);
        }

        let body = response.text().await.unwrap_or_default();
        error!("LOG SHIPPER | Submit failed with status {status}: {body}");
        Err(IngestError::from_status(status.as_u16(), body))
    }

    async fn poll_status(
        &self,
        correlation_id: Uuid,
    ) -> Result<IngestionStatusReport, IngestError> {
        let url = format!("{}/v1/ingest/status/{correlation_id}", self.base_url);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| IngestError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::from_status(status.as_u16(), body));
        }

        response
            .json::<IngestionStatusReport>()
            .await
            .map_err(|e| IngestError::InvalidResponse(e.to_string()))
    }
}
