// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::{Result, ShipperError};
use crate::file_set::RollingInterval;
use crate::ingest::IngestionMapping;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BATCH_POSTING_LIMIT: usize = 50;
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(2);
pub const DEFAULT_FORMAT: &str = "multijson";
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;
pub const DEFAULT_STATUS_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_INGEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Configuration for one [`LogShipper`](crate::shipper::LogShipper).
#[derive(Debug, Clone)]
pub struct ShipperConfig {
    /// Path prefix of the buffer files, e.g. `/var/log/app/buffer` for
    /// `/var/log/app/buffer-20240101.json`.
    pub buffer_base_name: PathBuf,
    pub rolling_interval: RollingInterval,
    /// Maximum number of events per submitted batch.
    pub batch_posting_limit: usize,
    /// Cap on the accumulated event bytes per batch. A single larger event is
    /// still shipped on its own.
    pub event_body_limit_bytes: Option<u64>,
    /// Total size of buffer files to keep while the remote is failing.
    pub buffer_size_limit_bytes: Option<u64>,
    /// Total size of quarantined payloads to keep.
    pub retained_invalid_payloads_limit_bytes: Option<u64>,
    /// Base interval between ticks.
    pub period: Duration,
    pub database: String,
    pub table: String,
    pub format: String,
    pub mapping_name: Option<String>,
    pub flush_immediately: bool,
    pub compression_level: i32,
    pub status_poll_interval: Duration,
    /// How long to wait for a submitted batch to reach a terminal status.
    pub ingest_timeout: Duration,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            buffer_base_name: PathBuf::new(),
            rolling_interval: RollingInterval::default(),
            batch_posting_limit: DEFAULT_BATCH_POSTING_LIMIT,
            event_body_limit_bytes: None,
            buffer_size_limit_bytes: None,
            retained_invalid_payloads_limit_bytes: None,
            period: DEFAULT_PERIOD,
            database: String::new(),
            table: String::new(),
            format: DEFAULT_FORMAT.to_string(),
            mapping_name: None,
            flush_immediately: false,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            status_poll_interval: DEFAULT_STATUS_POLL_INTERVAL,
            ingest_timeout: DEFAULT_INGEST_TIMEOUT,
        }
    }
}

impl ShipperConfig {
    /// Create configuration from `LOG_SHIPPER_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            buffer_base_name: env::var("LOG_SHIPPER_BUFFER_BASE_NAME")
                .map(PathBuf::from)
                .unwrap_or_default(),
            rolling_interval: match env::var("LOG_SHIPPER_ROLLING_INTERVAL") {
                Ok(val) => val.parse()?,
                Err(_) => defaults.rolling_interval,
            },
            batch_posting_limit: parse_var("LOG_SHIPPER_BATCH_POSTING_LIMIT")?
                .unwrap_or(defaults.batch_posting_limit),
            event_body_limit_bytes: parse_var("LOG_SHIPPER_EVENT_BODY_LIMIT_BYTES")?,
            buffer_size_limit_bytes: parse_var("LOG_SHIPPER_BUFFER_SIZE_LIMIT_BYTES")?,
            retained_invalid_payloads_limit_bytes: parse_var(
                "LOG_SHIPPER_RETAINED_INVALID_PAYLOADS_LIMIT_BYTES",
            )?,
            period: duration_var("LOG_SHIPPER_PERIOD_SECS")?.unwrap_or(defaults.period),
            database: env::var("LOG_SHIPPER_DATABASE").unwrap_or_default(),
            table: env::var("LOG_SHIPPER_TABLE").unwrap_or_default(),
            format: env::var("LOG_SHIPPER_FORMAT").unwrap_or(defaults.format),
            mapping_name: env::var("LOG_SHIPPER_MAPPING_NAME")
                .ok()
                .filter(|val| !val.trim().is_empty()),
            flush_immediately: env::var("LOG_SHIPPER_FLUSH_IMMEDIATELY")
                .map(|val| val.to_lowercase() == "true")
                .unwrap_or(defaults.flush_immediately),
            compression_level: parse_var("LOG_SHIPPER_COMPRESSION_LEVEL")?
                .unwrap_or(defaults.compression_level),
            status_poll_interval: duration_var("LOG_SHIPPER_STATUS_POLL_INTERVAL_SECS")?
                .unwrap_or(defaults.status_poll_interval),
            ingest_timeout: duration_var("LOG_SHIPPER_INGEST_TIMEOUT_SECS")?
                .unwrap_or(defaults.ingest_timeout),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.buffer_base_name.as_os_str().is_empty() {
            return Err(ShipperError::InvalidConfig(
                "LOG_SHIPPER_BUFFER_BASE_NAME cannot be empty".to_string(),
            ));
        }
        if self.database.trim().is_empty() {
            return Err(ShipperError::InvalidConfig(
                "LOG_SHIPPER_DATABASE cannot be empty".to_string(),
            ));
        }
        if self.table.trim().is_empty() {
            return Err(ShipperError::InvalidConfig(
                "LOG_SHIPPER_TABLE cannot be empty".to_string(),
            ));
        }
        if self.format.trim().is_empty() {
            return Err(ShipperError::InvalidConfig(
                "LOG_SHIPPER_FORMAT cannot be empty".to_string(),
            ));
        }
        if self.batch_posting_limit == 0 {
            return Err(ShipperError::InvalidConfig(
                "Batch posting limit must be greater than 0".to_string(),
            ));
        }
        if self.status_poll_interval.is_zero() {
            return Err(ShipperError::InvalidConfig(
                "Status poll interval must be greater than 0".to_string(),
            ));
        }
        if self.ingest_timeout < self.status_poll_interval {
            return Err(ShipperError::InvalidConfig(format!(
                "Ingest timeout ({:?}) must not be shorter than the status poll interval ({:?})",
                self.ingest_timeout, self.status_poll_interval
            )));
        }
        Ok(())
    }

    pub fn mapping(&self) -> IngestionMapping {
        IngestionMapping {
            format: self.format.clone(),
            mapping_name: self.mapping_name.clone(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| {
                ShipperError::InvalidConfig(format!("{name} has an invalid value '{val}'"))
            }),
        Err(_) => Ok(None),
    }
}

/// Durations are read as signed seconds so a negative value is reported rather
/// than silently falling back to a default.
fn duration_var(name: &str) -> Result<Option<Duration>> {
    match parse_var::<i64>(name)? {
        Some(secs) if secs < 0 => Err(ShipperError::InvalidConfig(format!(
            "{name} cannot be negative, got {secs}"
        ))),
        Some(secs) => Ok(Some(Duration::from_secs(secs.unsigned_abs()))),
        None => Ok(None),
    }
}
