// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Scripted ingestion client for driving the shipper in tests

use async_trait::async_trait;
use log_shipper::ingest::{IngestClient, IngestError, IngestRequest, IngestionStatusReport};
use log_shipper::IngestionStatus;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

/// Replays queued submit and poll outcomes. When a queue runs dry, submits are
/// accepted and polls report success.
#[derive(Default)]
pub struct MockIngestClient {
    submit_results: Mutex<VecDeque<Result<(), IngestError>>>,
    poll_results: Mutex<VecDeque<Result<IngestionStatusReport, IngestError>>>,
    submitted: Mutex<Vec<Submission>>,
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub events: Vec<Value>,
    pub database: String,
    pub table: String,
    pub correlation_id: Uuid,
}

#[allow(dead_code)]
impl MockIngestClient {
    pub fn fail_next_submit(&self, error: IngestError) {
        self.submit_results.lock().unwrap().push_back(Err(error));
    }

    pub fn queue_poll(&self, result: Result<IngestionStatusReport, IngestError>) {
        self.poll_results.lock().unwrap().push_back(result);
    }

    pub fn always_pending(&self, polls: usize) {
        for _ in 0..polls {
            self.queue_poll(Ok(IngestionStatusReport::new(IngestionStatus::Pending)));
        }
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn submitted_events(&self) -> Vec<Value> {
        self.submissions()
            .into_iter()
            .flat_map(|submission| submission.events)
            .collect()
    }
}

#[async_trait]
impl IngestClient for MockIngestClient {
    async fn submit(&self, request: IngestRequest<'_>) -> Result<Uuid, IngestError> {
        if let Some(Err(e)) = self.submit_results.lock().unwrap().pop_front() {
            return Err(e);
        }

        let decompressed = zstd::decode_all(request.body).expect("body should be zstd");
        let events: Vec<Value> =
            serde_json::from_slice(&decompressed).expect("body should be a JSON array");
        self.submitted.lock().unwrap().push(Submission {
            events,
            database: request.database.to_string(),
            table: request.table.to_string(),
            correlation_id: request.correlation_id,
        });
        Ok(request.correlation_id)
    }

    async fn poll_status(
        &self,
        _correlation_id: Uuid,
    ) -> Result<IngestionStatusReport, IngestError> {
        self.poll_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(IngestionStatusReport::new(IngestionStatus::Succeeded)))
    }
}
