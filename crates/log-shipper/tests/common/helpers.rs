// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for shipper integration tests

use super::mocks::MockIngestClient;
use log_shipper::{
    BookmarkFile, BufferPool, ControlledLevelSwitch, FileSetPosition, JsonLinesPayloadReader,
    LogShipper, RollingInterval, ShipperConfig,
};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub type TestShipper = LogShipper<JsonLinesPayloadReader<Value>>;

/// Config whose timer never fires on its own during a test, so ticks are driven
/// explicitly with `flush`.
pub fn test_config(dir: &TempDir) -> ShipperConfig {
    ShipperConfig {
        buffer_base_name: dir.path().join("buffer"),
        rolling_interval: RollingInterval::Day,
        batch_posting_limit: 10,
        period: Duration::from_secs(3600),
        database: "logs".to_string(),
        table: "events".to_string(),
        status_poll_interval: Duration::from_millis(10),
        ingest_timeout: Duration::from_millis(200),
        ..Default::default()
    }
}

pub fn start_shipper(
    config: ShipperConfig,
    level_switch: ControlledLevelSwitch,
) -> (Arc<TestShipper>, Arc<MockIngestClient>) {
    let client = Arc::new(MockIngestClient::default());
    let shipper = LogShipper::start(
        config,
        level_switch,
        JsonLinesPayloadReader::new(),
        client.clone(),
        Arc::new(BufferPool::default()),
    )
    .expect("shipper should start");
    (shipper, client)
}

/// Appends `count` JSON events to a buffer file and returns its path.
#[allow(dead_code)]
pub fn append_events(dir: &TempDir, name: &str, first_id: usize, count: usize) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .expect("unable to open buffer file");
    for id in first_id..first_id + count {
        writeln!(file, r#"{{"id":{id},"message":"event {id}"}}"#).expect("unable to write event");
    }
    path
}

/// Appends raw bytes, for writing partial lines.
#[allow(dead_code)]
pub fn append_bytes(path: &Path, bytes: &[u8]) {
    fs::OpenOptions::new()
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(bytes))
        .expect("unable to append to buffer file");
}

pub fn file_len(path: &Path) -> u64 {
    fs::metadata(path).expect("file should exist").len()
}

pub fn read_bookmark(dir: &TempDir) -> FileSetPosition {
    BookmarkFile::open(dir.path().join("buffer.bookmark"))
        .and_then(|mut bookmark| bookmark.try_read_bookmark())
        .expect("bookmark should be readable")
}

#[allow(dead_code)]
pub fn write_bookmark(dir: &TempDir, position: &FileSetPosition) {
    BookmarkFile::open(dir.path().join("buffer.bookmark"))
        .and_then(|mut bookmark| bookmark.write_bookmark(position))
        .expect("bookmark should be writable");
}

pub fn ids(events: &[Value]) -> Vec<u64> {
    events
        .iter()
        .map(|event| event["id"].as_u64().expect("event should have an id"))
        .collect()
}
