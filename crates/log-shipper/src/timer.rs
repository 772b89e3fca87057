// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A cooperative, single-flight, one-shot recurring timer.
//!
//! After [`PortableTimer::start`] the timer waits for the interval and then runs
//! the tick callback once. The callback decides whether to call `start` again;
//! nothing repeats implicitly. Ticks never overlap, and [`PortableTimer::dispose`]
//! waits for an in-flight tick before returning.

use crate::errors::{Result, ShipperError};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub type TickFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Tick callback. It receives the timer's cancellation token so long-running
/// work can stop early once disposal begins.
pub type OnTick = Arc<dyn Fn(CancellationToken) -> TickFuture + Send + Sync>;

pub struct PortableTimer {
    on_tick: OnTick,
    running: Arc<Mutex<()>>,
    cancel: CancellationToken,
    disposed: AtomicBool,
}

impl PortableTimer {
    pub fn new<F, Fut>(on_tick: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        PortableTimer {
            on_tick: Arc::new(move |cancel: CancellationToken| -> TickFuture {
                Box::pin(on_tick(cancel))
            }),
            running: Arc::new(Mutex::new(())),
            cancel: CancellationToken::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Schedules one tick after `interval`.
    ///
    /// Fails outside a tokio runtime. Safe to call from inside the tick callback
    /// itself.
    pub fn start(&self, interval: Duration) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(ShipperError::Disposed);
        }
        let runtime = Handle::try_current().map_err(|e| {
            ShipperError::InvalidConfig(format!("Timer requires a tokio runtime: {e}"))
        })?;

        let on_tick = Arc::clone(&self.on_tick);
        let running = Arc::clone(&self.running);
        let cancel = self.cancel.clone();

        runtime.spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(interval) => {}
            }

            // A previous tick may still hold the slot if a caller re-armed early.
            let _guard = tokio::select! {
                () = cancel.cancelled() => return,
                guard = running.lock() => guard,
            };
            if cancel.is_cancelled() {
                return;
            }
            on_tick(cancel.clone()).await;
        });
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Stops future ticks and waits for an in-flight tick to finish.
    ///
    /// Cancellation is cooperative: the running tick sees its token cancelled but
    /// is never aborted. Calling this more than once is harmless.
    pub async fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            debug!("LOG SHIPPER | Disposing timer");
            self.cancel.cancel();
        }
        let _guard = self.running.lock().await;
    }
}

impl Drop for PortableTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
