// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Freshness check on the timestamp carried in the request body.

use chrono::{DateTime, NaiveDateTime, Utc};
use x509_util::UnixTimestamp;

use crate::error::TimestampError;

/// Default tolerance for request timestamps.
pub const MAX_TIMESTAMP_SKEW_SECS: i64 = 150;

const NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const OFFSET_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%#z";

/// Parses a second-precision ISO-8601 timestamp with a `Z` or numeric offset
/// designator, e.g. `2022-08-05T18:38:06Z` or `2022-08-05T20:38:06+02`.
///
/// # Errors
///
/// Returns [`TimestampError::Malformed`] if `value` does not match.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, TimestampError> {
    let malformed = |source| TimestampError::Malformed {
        value: value.to_owned(),
        source,
    };
    match value.strip_suffix('Z') {
        Some(naive) => NaiveDateTime::parse_from_str(naive, NAIVE_FORMAT)
            .map(|dt| dt.and_utc())
            .map_err(malformed),
        None => DateTime::parse_from_str(value, OFFSET_FORMAT)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(malformed),
    }
}

/// Rejects requests that are older than the tolerance. Timestamps in the
/// future are accepted.
#[derive(Debug, Clone, Copy)]
pub struct TimestampGuard {
    tolerance_secs: i64,
}

impl Default for TimestampGuard {
    fn default() -> Self {
        Self::new(MAX_TIMESTAMP_SKEW_SECS)
    }
}

impl TimestampGuard {
    pub fn new(tolerance_secs: i64) -> Self {
        Self { tolerance_secs }
    }

    pub fn tolerance_secs(&self) -> i64 {
        self.tolerance_secs
    }

    /// Checks `body_timestamp` against `now`. The age is truncated to whole
    /// seconds before comparing, so 150.999s passes a 150s tolerance.
    ///
    /// # Errors
    ///
    /// Returns [`TimestampError::Malformed`] for an unparseable timestamp and
    /// [`TimestampError::SkewExceeded`] if the request is too old.
    pub fn check(&self, body_timestamp: &str, now: UnixTimestamp) -> Result<(), TimestampError> {
        let parsed = parse_timestamp(body_timestamp)?.timestamp_millis();
        let now = i64::try_from(now).unwrap_or(i64::MAX);
        let skew_secs = now.saturating_sub(parsed) / 1000;
        if skew_secs > self.tolerance_secs {
            return Err(TimestampError::SkewExceeded {
                skew_secs,
                tolerance_secs: self.tolerance_secs,
            });
        }
        Ok(())
    }
}
