// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::ingest::IngestError;

/// Errors surfaced by the shipping engine.
///
/// Configuration and contract errors are returned synchronously to the caller.
/// Errors raised inside a timer tick never escape it: the tick converts them into
/// a backoff decision and a diagnostic log line.
#[derive(Debug, thiserror::Error)]
pub enum ShipperError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Ingestion failed: {0}")]
    Ingest(#[from] IngestError),

    #[error("Object has been disposed")]
    Disposed,
}

pub type Result<T, E = ShipperError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ShipperError::InvalidConfig("database must be set".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: database must be set"
        );
        assert_eq!(
            ShipperError::Disposed.to_string(),
            "Object has been disposed"
        );
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let error: ShipperError = io.into();
        assert!(matches!(error, ShipperError::Io(_)));
        assert!(error.to_string().contains("gone"));
    }
}
