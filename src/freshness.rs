// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Timestamp freshness window.

use std::time::{SystemTime, UNIX_EPOCH};

/// Default maximum clock skew between client and hub.
pub const DEFAULT_MAX_SKEW_SECS: i64 = 30;

/// Rejects envelopes whose timestamp is further than `max_skew_secs` from
/// the hub clock, in either direction.
#[derive(Debug, Clone, Copy)]
pub struct FreshnessGuard {
    max_skew_secs: i64,
}

impl FreshnessGuard {
    pub fn new(max_skew_secs: i64) -> Self {
        FreshnessGuard {
            max_skew_secs: max_skew_secs.max(0),
        }
    }

    pub fn max_skew_secs(&self) -> i64 {
        self.max_skew_secs
    }

    /// Checks `timestamp` (Unix seconds) against the current wall clock.
    pub fn is_valid(&self, timestamp: i64) -> bool {
        self.is_valid_at(timestamp, unix_now())
    }

    /// Checks `timestamp` against an explicit `now`.
    pub fn is_valid_at(&self, timestamp: i64, now: i64) -> bool {
        now.abs_diff(timestamp) <= self.max_skew_secs as u64
    }
}

impl Default for FreshnessGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SKEW_SECS)
    }
}

/// Current Unix time in seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
