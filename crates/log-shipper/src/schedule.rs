// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Backoff never grows from a base shorter than this, so escalation stays visible
/// even with a very short configured period.
pub const MINIMUM_BACKOFF_PERIOD: Duration = Duration::from_secs(5);
pub const MAXIMUM_BACKOFF_INTERVAL: Duration = Duration::from_secs(10 * 60);

// 2^20 * 5s is already far beyond the cap; larger exponents only risk overflow.
const MAX_BACKOFF_EXPONENT: u32 = 20;

/// Delay before the next remote attempt, escalating exponentially while attempts
/// keep failing and recovering immediately on success.
#[derive(Debug, Clone)]
pub struct ExponentialBackoffConnectionSchedule {
    period: Duration,
    failures_since_success: u32,
}

impl ExponentialBackoffConnectionSchedule {
    pub fn new(period: Duration) -> Self {
        ExponentialBackoffConnectionSchedule {
            period,
            failures_since_success: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn failures_since_success(&self) -> u32 {
        self.failures_since_success
    }

    pub fn mark_success(&mut self) {
        self.failures_since_success = 0;
    }

    pub fn mark_failure(&mut self) {
        self.failures_since_success = self.failures_since_success.saturating_add(1);
    }

    /// The first failure is not penalised; from the second on, the interval doubles
    /// up to [`MAXIMUM_BACKOFF_INTERVAL`]. The result is never below the configured
    /// period.
    pub fn next_interval(&self) -> Duration {
        if self.failures_since_success <= 1 {
            return self.period;
        }

        let exponent = (self.failures_since_success - 1).min(MAX_BACKOFF_EXPONENT);
        let backoff_factor = 1u32 << exponent;
        let base_period = self.period.max(MINIMUM_BACKOFF_PERIOD);
        let ideal = base_period
            .checked_mul(backoff_factor)
            .unwrap_or(MAXIMUM_BACKOFF_INTERVAL);

        ideal.min(MAXIMUM_BACKOFF_INTERVAL).max(self.period)
    }
}
