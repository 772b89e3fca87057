// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc, time::Duration};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use log_shipper::{
    BufferPool, ControlledLevelSwitch, HttpIngestClient, JsonLinesPayloadReader, LevelSwitch,
    LogShipper, Severity, ShipperConfig,
};

const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
pub async fn main() {
    let log_level = env::var("LOG_SHIPPER_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match ShipperConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Error loading config: {e}");
            return;
        }
    };

    let Ok(ingest_url) = env::var("LOG_SHIPPER_INGEST_URL") else {
        error!("LOG_SHIPPER_INGEST_URL is not set. Shutting down log shipper.");
        return;
    };
    let api_key = env::var("LOG_SHIPPER_API_KEY").ok();
    let https_proxy = env::var("LOG_SHIPPER_PROXY_HTTPS")
        .or_else(|_| env::var("HTTPS_PROXY"))
        .ok();

    let level_switch = match env::var("LOG_SHIPPER_MINIMUM_LEVEL") {
        Ok(level) => match level.parse::<Severity>() {
            Ok(level) => ControlledLevelSwitch::new(Some(LevelSwitch::new(level))),
            Err(e) => {
                error!("Error loading config: {e}");
                return;
            }
        },
        Err(_) => ControlledLevelSwitch::default(),
    };

    let client = match HttpIngestClient::new(
        ingest_url,
        api_key,
        https_proxy.as_deref(),
        HTTP_REQUEST_TIMEOUT,
    ) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Unable to create ingestion client: {e}");
            return;
        }
    };

    let shipper = match LogShipper::start(
        config,
        level_switch,
        JsonLinesPayloadReader::<serde_json::Value>::new(),
        client,
        Arc::new(BufferPool::default()),
    ) {
        Ok(shipper) => shipper,
        Err(e) => {
            error!("Unable to start log shipper: {e}");
            return;
        }
    };

    info!("Log shipper started");
    wait_for_shutdown_signal().await;

    info!("Shutting down log shipper");
    shipper.shutdown().await;
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => log_signal_error(result),
                    _ = terminate.recv() => debug!("Received SIGTERM"),
                }
                return;
            }
            Err(e) => error!("Unable to listen for SIGTERM: {e}"),
        }
    }

    log_signal_error(tokio::signal::ctrl_c().await);
}

fn log_signal_error(result: std::io::Result<()>) {
    if let Err(e) = result {
        error!("Unable to listen for shutdown signal: {e}");
    }
}
