// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Drains rolling buffer files to the remote ingestion endpoint.
//!
//! # Tick
//!
//! ```text
//!   Timer fires
//!       │
//!       v
//!   ┌──────────────────┐
//!   │ Read bookmark    │ (reset to oldest file if missing)
//!   └────────┬─────────┘
//!            v
//!   ┌──────────────────┐
//!   │ Read payload     │ (batch + byte limits)
//!   └────────┬─────────┘
//!            v
//!   ┌──────────────────┐     ┌──────────────────────────┐
//!   │ Submit + poll    │────>│ Failed: back off, retain │
//!   └────────┬─────────┘     └──────────────────────────┘
//!            v
//!   ┌──────────────────┐
//!   │ Advance bookmark │ (loop while batches are full)
//!   └────────┬─────────┘
//!            v
//!   Re-arm timer with backoff interval
//! ```
//!
//! The bookmark only moves after the remote reports the batch as ingested, so a
//! crash between delivery and persistence re-delivers rather than loses data.
//! When the current file is drained, the shipper hands off to the next file
//! once the writer has moved on, and deletes files that are no longer needed.

use crate::bookmark::{BookmarkFile, FileSetPosition};
use crate::buffer_pool::{BufferPool, PooledBuffer};
use crate::config::ShipperConfig;
use crate::errors::Result;
use crate::file_set::FileSet;
use crate::ingest::{
    IngestClient, IngestError, IngestRequest, IngestionMapping, IngestionStatus,
};
use crate::level_switch::{ControlledLevelSwitch, Severity};
use crate::payload::PayloadReader;
use crate::schedule::ExponentialBackoffConnectionSchedule;
use crate::timer::PortableTimer;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use zstd::stream::write::Encoder;

/// While a remote level directive is in force, the remote is contacted at least
/// this often, even with nothing to ship, so it can revise the directive.
pub const REQUIRED_LEVEL_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Buffer files always kept when pruning after a failed delivery.
const RETAINED_BUFFER_FILES_ON_FAILURE: usize = 2;

enum Delivery {
    Delivered { minimum_level: Option<Severity> },
    Rejected { status: u16, reason: String },
    Failed(String),
}

struct TickState<R> {
    reader: R,
    schedule: ExponentialBackoffConnectionSchedule,
    next_required_level_check: Instant,
    /// Unterminated tail seen after the last complete line of a superseded file,
    /// as `(file, length)`.
    trailing_fragment: Option<(PathBuf, u64)>,
}

pub struct LogShipper<R> {
    config: ShipperConfig,
    mapping: IngestionMapping,
    file_set: FileSet,
    level_switch: ControlledLevelSwitch,
    client: Arc<dyn IngestClient>,
    buffer_pool: Arc<BufferPool>,
    state: tokio::sync::Mutex<TickState<R>>,
    timer: PortableTimer,
    unloading: Mutex<bool>,
}

impl<R> LogShipper<R>
where
    R: PayloadReader,
    R::Payload: Serialize,
{
    /// Creates the shipper and arms its timer with the schedule's initial interval.
    ///
    /// Fails with `InvalidConfig` when called outside a tokio runtime.
    pub fn start(
        config: ShipperConfig,
        level_switch: ControlledLevelSwitch,
        reader: R,
        client: Arc<dyn IngestClient>,
        buffer_pool: Arc<BufferPool>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let file_set = FileSet::new(&config.buffer_base_name, config.rolling_interval)?;
        let schedule = ExponentialBackoffConnectionSchedule::new(config.period);
        let initial_interval = schedule.next_interval();

        let shipper = Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let timer = PortableTimer::new(move |cancel: CancellationToken| {
                let weak = weak.clone();
                async move {
                    if let Some(shipper) = weak.upgrade() {
                        shipper.on_tick(&cancel).await;
                    }
                }
            });

            LogShipper {
                mapping: config.mapping(),
                config,
                file_set,
                level_switch,
                client,
                buffer_pool,
                state: tokio::sync::Mutex::new(TickState {
                    reader,
                    schedule,
                    next_required_level_check: Instant::now(),
                    trailing_fragment: None,
                }),
                timer,
                unloading: Mutex::new(false),
            }
        });

        debug!(
            "LOG SHIPPER | Shipping {} buffer files from {}",
            shipper.config.rolling_interval,
            shipper.file_set.directory().display()
        );
        shipper.timer.start(initial_interval)?;
        Ok(shipper)
    }

    pub fn file_set(&self) -> &FileSet {
        &self.file_set
    }

    /// Whether an event at `level` is worth buffering at all.
    ///
    /// Best effort only: the remote directive can change between buffering and
    /// shipping.
    pub fn is_included(&self, level: Severity) -> bool {
        self.level_switch.is_included(level)
    }

    pub fn update_minimum_level(&self, minimum_level: Option<Severity>) {
        self.level_switch.update(minimum_level);
    }

    pub fn level_switch(&self) -> &ControlledLevelSwitch {
        &self.level_switch
    }

    /// Interval the timer will be armed with after the current tick.
    pub async fn next_interval(&self) -> Duration {
        self.state.lock().await.schedule.next_interval()
    }

    pub async fn failures_since_success(&self) -> u32 {
        self.state.lock().await.schedule.failures_since_success()
    }

    /// Runs one tick immediately, without re-arming the timer.
    pub async fn flush(&self) {
        self.run_tick(&CancellationToken::new()).await;
    }

    /// Stops the timer, waits for any in-flight tick, then makes one final attempt
    /// to ship what is buffered. Only the first call does any work.
    pub async fn shutdown(&self) {
        {
            let mut unloading = self.unloading.lock().unwrap_or_else(PoisonError::into_inner);
            if *unloading {
                return;
            }
            *unloading = true;
        }

        self.timer.dispose().await;
        info!("LOG SHIPPER | Flushing buffered events before shutdown");
        self.flush().await;
    }

    async fn on_tick(&self, cancel: &CancellationToken) {
        let next_interval = self.run_tick(cancel).await;

        let unloading = self.unloading.lock().unwrap_or_else(PoisonError::into_inner);
        if *unloading {
            return;
        }
        if let Err(e) = self.timer.start(next_interval) {
            debug!("LOG SHIPPER | Not re-arming timer: {e}");
        }
    }

    async fn run_tick(&self, cancel: &CancellationToken) -> Duration {
        let mut state = self.state.lock().await;
        if let Err(e) = self.drain(&mut state, cancel).await {
            state.schedule.mark_failure();
            error!("LOG SHIPPER | Exception while shipping buffered events: {e}");
            self.clean_up_after_failure();
        }
        state.schedule.next_interval()
    }

    async fn drain(&self, state: &mut TickState<R>, cancel: &CancellationToken) -> Result<()> {
        loop {
            let mut bookmark = BookmarkFile::open(self.file_set.bookmark_path())?;
            let mut position = bookmark.try_read_bookmark()?;
            let files = self.file_set.get_buffer_files()?;

            if !position.file.as_deref().is_some_and(Path::exists) {
                position = FileSetPosition::new(0, files.first().cloned());
            }

            let (payload, count) = match position.file.clone() {
                Some(file) => {
                    let read = state.reader.read_payload(
                        self.config.batch_posting_limit,
                        self.config.event_body_limit_bytes,
                        &position,
                        &file,
                    )?;
                    position = read.position;
                    (read.payload, read.count)
                }
                None => (state.reader.no_payload(), 0),
            };

            let level_check_due = self.level_switch.is_active()
                && Instant::now() >= state.next_required_level_check;

            if count > 0 || level_check_due {
                state.next_required_level_check = Instant::now() + REQUIRED_LEVEL_CHECK_INTERVAL;

                let body = self.serialize(&payload)?;
                match self.ship(&body, cancel).await? {
                    Delivery::Delivered { minimum_level } => {
                        state.schedule.mark_success();
                        bookmark.write_bookmark(&position)?;
                        self.level_switch.update(minimum_level);
                        debug!("LOG SHIPPER | Shipped {count} events");
                    }
                    Delivery::Rejected { status, reason } => {
                        // The endpoint is reachable; this payload is the problem.
                        state.schedule.mark_success();
                        self.quarantine(status, &reason, &body);
                        bookmark.write_bookmark(&position)?;
                    }
                    Delivery::Failed(reason) => {
                        state.schedule.mark_failure();
                        warn!("LOG SHIPPER | Failed to ship {count} events, will retry: {reason}");
                        self.clean_up_after_failure();
                        break;
                    }
                }
            } else if let Some(current) = position.file.as_deref() {
                // Caught up with the current file; idle connectivity counts as fine.
                state.schedule.mark_success();

                if files.len() == 2
                    && files[0] == current
                    && is_drained(
                        &mut state.trailing_fragment,
                        current,
                        position.next_line_start,
                    )
                {
                    debug!(
                        "LOG SHIPPER | Moving on from drained {} to {}",
                        files[0].display(),
                        files[1].display()
                    );
                    bookmark.write_bookmark(&FileSetPosition::new(0, Some(files[1].clone())))?;
                }

                if files.len() > 2 {
                    // Writers have moved on from the oldest file by now.
                    match fs::remove_file(&files[0]) {
                        Ok(()) => debug!("LOG SHIPPER | Deleted drained {}", files[0].display()),
                        Err(e) => warn!(
                            "LOG SHIPPER | Failed to delete {}: {e}",
                            files[0].display()
                        ),
                    }
                }
            } else {
                break;
            }

            if count != self.config.batch_posting_limit {
                break;
            }
        }
        Ok(())
    }

    fn serialize(&self, payload: &R::Payload) -> Result<PooledBuffer> {
        let mut buffer = self.buffer_pool.acquire();
        serde_json::to_writer(&mut *buffer, payload)?;
        Ok(buffer)
    }

    fn compress(&self, body: &[u8]) -> Result<PooledBuffer> {
        let mut compressed = self.buffer_pool.acquire();
        let mut encoder = Encoder::new(&mut *compressed, self.config.compression_level)?;
        encoder.write_all(body)?;
        encoder.finish()?;
        Ok(compressed)
    }

    async fn ship(&self, body: &[u8], cancel: &CancellationToken) -> Result<Delivery> {
        let compressed = self.compress(body)?;
        let request = IngestRequest {
            body: &compressed,
            database: &self.config.database,
            table: &self.config.table,
            mapping: &self.mapping,
            flush_immediately: self.config.flush_immediately,
            correlation_id: Uuid::new_v4(),
        };

        let correlation_id = match self.client.submit(request).await {
            Ok(correlation_id) => correlation_id,
            Err(IngestError::Rejected { status, body }) => {
                return Ok(Delivery::Rejected {
                    status,
                    reason: body,
                })
            }
            Err(e) => return Ok(Delivery::Failed(e.to_string())),
        };

        Ok(self.await_terminal_status(correlation_id, cancel).await)
    }

    async fn await_terminal_status(
        &self,
        correlation_id: Uuid,
        cancel: &CancellationToken,
    ) -> Delivery {
        let deadline = Instant::now() + self.config.ingest_timeout;
        loop {
            match self.client.poll_status(correlation_id).await {
                Ok(report) => match report.status {
                    IngestionStatus::Succeeded => {
                        return Delivery::Delivered {
                            minimum_level: report.minimum_level,
                        }
                    }
                    IngestionStatus::Failed => {
                        return Delivery::Failed(format!(
                            "ingestion {correlation_id} failed: {}",
                            report.details.unwrap_or_default()
                        ))
                    }
                    IngestionStatus::Pending => {}
                },
                Err(e) if e.is_permanent() => return Delivery::Failed(e.to_string()),
                Err(e) => debug!("LOG SHIPPER | Status poll for {correlation_id} failed: {e}"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Delivery::Failed(format!(
                    "ingestion {correlation_id} still pending after {:?}",
                    self.config.ingest_timeout
                ));
            }

            tokio::select! {
                () = cancel.cancelled() => {
                    return Delivery::Failed(format!(
                        "stopped waiting for ingestion {correlation_id}: shutting down"
                    ));
                }
                () = sleep(self.config.status_poll_interval.min(deadline - now)) => {}
            }
        }
    }

    fn quarantine(&self, status: u16, reason: &str, body: &[u8]) {
        let path = self.file_set.make_invalid_payload_filename(status);
        match fs::write(&path, body) {
            Ok(()) => warn!(
                "LOG SHIPPER | Payload rejected with status {status} ({reason}); written to {}",
                path.display()
            ),
            Err(e) => error!(
                "LOG SHIPPER | Payload rejected with status {status} ({reason}) and could not be written to {}: {e}",
                path.display()
            ),
        }

        if let Some(limit) = self.config.retained_invalid_payloads_limit_bytes {
            self.file_set.clean_up_invalid_payload_files(limit);
        }
    }

    fn clean_up_after_failure(&self) {
        if let Some(limit) = self.config.buffer_size_limit_bytes {
            self.file_set
                .clean_up_buffer_files(limit, RETAINED_BUFFER_FILES_ON_FAILURE);
        }
    }
}

/// Whether a superseded `file` has nothing left to read past `next_line_start`.
///
/// Share-mode locks are not portable, so the check reopens the file and compares
/// its current length with the drained offset. Bytes past the offset can only be
/// an unterminated line, since every complete line has been read. Such a tail is
/// treated as final once the file length is unchanged since the previous check;
/// it is discarded with a warning.
fn is_drained(
    trailing_fragment: &mut Option<(PathBuf, u64)>,
    file: &Path,
    next_line_start: u64,
) -> bool {
    let length = match fs::File::open(file).and_then(|f| f.metadata()) {
        Ok(metadata) => metadata.len(),
        Err(e) => {
            debug!("LOG SHIPPER | Unable to re-open {}: {e}", file.display());
            return false;
        }
    };
    if length <= next_line_start {
        *trailing_fragment = None;
        return true;
    }

    let observed = (file.to_path_buf(), length);
    if trailing_fragment.as_ref() == Some(&observed) {
        warn!(
            "LOG SHIPPER | Discarding {} bytes of unterminated data at the end of {}",
            length - next_line_start,
            file.display()
        );
        *trailing_fragment = None;
        return true;
    }

    debug!(
        "LOG SHIPPER | {} has an unterminated tail; waiting for it to settle",
        file.display()
    );
    *trailing_fragment = Some(observed);
    false
}
