// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Remotely adjustable minimum severity for shipped events.

use crate::errors::{Result, ShipperError};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum Severity {
    Verbose = 0,
    Debug = 1,
    Information = 2,
    Warning = 3,
    Error = 4,
    Fatal = 5,
}

impl Severity {
    pub const MINIMUM: Severity = Severity::Verbose;

    fn from_u8(value: u8) -> Option<Severity> {
        match value {
            0 => Some(Severity::Verbose),
            1 => Some(Severity::Debug),
            2 => Some(Severity::Information),
            3 => Some(Severity::Warning),
            4 => Some(Severity::Error),
            5 => Some(Severity::Fatal),
            _ => None,
        }
    }
}

impl FromStr for Severity {
    type Err = ShipperError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "verbose" | "trace" => Ok(Severity::Verbose),
            "debug" => Ok(Severity::Debug),
            "information" | "info" => Ok(Severity::Information),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "fatal" => Ok(Severity::Fatal),
            other => Err(ShipperError::InvalidConfig(format!(
                "Unknown severity '{other}'"
            ))),
        }
    }
}

/// A shared, mutable minimum severity.
///
/// Clones share the same cell, so the upstream writer and the shipper observe the
/// same threshold.
#[derive(Debug, Clone)]
pub struct LevelSwitch {
    minimum_level: Arc<AtomicU8>,
}

impl LevelSwitch {
    pub fn new(minimum_level: Severity) -> Self {
        LevelSwitch {
            minimum_level: Arc::new(AtomicU8::new(minimum_level as u8)),
        }
    }

    pub fn minimum_level(&self) -> Severity {
        Severity::from_u8(self.minimum_level.load(Ordering::Acquire)).unwrap_or(Severity::MINIMUM)
    }

    pub fn set_minimum_level(&self, level: Severity) {
        self.minimum_level.store(level as u8, Ordering::Release);
    }
}

const NO_ORIGINAL_LEVEL: u8 = u8::MAX;

/// Holds an optional controlling [`LevelSwitch`] that a remote control plane can
/// drive, remembering the level to fall back to when control is released.
///
/// `is_included` only performs atomic loads, so it can be called from any thread
/// while the shipping loop calls `update`.
#[derive(Debug)]
pub struct ControlledLevelSwitch {
    controlled: OnceLock<LevelSwitch>,
    original_level: AtomicU8,
}

impl Default for ControlledLevelSwitch {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ControlledLevelSwitch {
    pub fn new(controlled: Option<LevelSwitch>) -> Self {
        let cell = OnceLock::new();
        if let Some(switch) = controlled {
            let _ = cell.set(switch);
        }
        ControlledLevelSwitch {
            controlled: cell,
            original_level: AtomicU8::new(NO_ORIGINAL_LEVEL),
        }
    }

    pub fn is_active(&self) -> bool {
        self.controlled.get().is_some()
    }

    /// The controlling switch, if one exists.
    pub fn controlled(&self) -> Option<&LevelSwitch> {
        self.controlled.get()
    }

    pub fn is_included(&self, level: Severity) -> bool {
        match self.controlled.get() {
            None => true,
            Some(switch) => level >= switch.minimum_level(),
        }
    }

    /// Applies a directive from the remote. `None` restores the level that was in
    /// force before the remote first took control.
    pub fn update(&self, minimum_accepted_level: Option<Severity>) {
        let Some(level) = minimum_accepted_level else {
            if let (Some(switch), Some(original)) = (self.controlled.get(), self.original_level())
            {
                switch.set_minimum_level(original);
            }
            return;
        };

        match self.controlled.get() {
            Some(switch) => {
                let current = switch.minimum_level() as u8;
                // Only the first directive records the fallback level.
                let _ = self.original_level.compare_exchange(
                    NO_ORIGINAL_LEVEL,
                    current,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                switch.set_minimum_level(level);
            }
            None => {
                // Before control, every event passed.
                let _ = self.original_level.compare_exchange(
                    NO_ORIGINAL_LEVEL,
                    Severity::MINIMUM as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                let switch = self.controlled.get_or_init(|| LevelSwitch::new(level));
                switch.set_minimum_level(level);
            }
        }
    }

    fn original_level(&self) -> Option<Severity> {
        Severity::from_u8(self.original_level.load(Ordering::Acquire))
    }
}
