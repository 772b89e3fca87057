// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Durable, at-least-once shipping of rolling local buffer files.
//!
//! An application appends events to rolling buffer files; a [`LogShipper`] reads
//! them back in bounded batches, submits them to a remote ingestion service and
//! records its progress in a bookmark file, so shipping survives restarts and
//! remote outages without losing data.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod bookmark;
pub mod buffer_pool;
pub mod config;
pub mod errors;
pub mod file_set;
pub mod ingest;
pub mod level_switch;
pub mod payload;
pub mod schedule;
pub mod shipper;
pub mod timer;

pub use bookmark::{BookmarkFile, FileSetPosition};
pub use buffer_pool::BufferPool;
pub use config::ShipperConfig;
pub use errors::ShipperError;
pub use file_set::{FileSet, RollingInterval};
pub use ingest::{
    HttpIngestClient, IngestClient, IngestError, IngestionStatus, IngestionStatusReport,
};
pub use level_switch::{ControlledLevelSwitch, LevelSwitch, Severity};
pub use payload::{JsonLinesPayloadReader, PayloadRead, PayloadReader};
pub use schedule::ExponentialBackoffConnectionSchedule;
pub use shipper::LogShipper;
pub use timer::PortableTimer;
