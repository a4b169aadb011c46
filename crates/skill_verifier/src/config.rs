// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Verifier configuration. Every field defaults to the fixed production policy.

use serde::Deserialize;
use std::time::Duration;

use crate::{error::SetupError, fetcher::RetryPolicy};

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct VerifierConfig {
    pub logging_level: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_timestamp_skew_secs")]
    pub max_timestamp_skew_secs: i64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_max_retries() -> u32 {
    crate::fetcher::DEFAULT_MAX_RETRIES
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_max_timestamp_skew_secs() -> i64 {
    crate::timestamp::MAX_TIMESTAMP_SKEW_SECS
}

fn default_user_agent() -> String {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_owned()
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            logging_level: None,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            max_timestamp_skew_secs: default_max_timestamp_skew_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl VerifierConfig {
    /// # Errors
    ///
    /// Returns [`SetupError::Config`] for invalid JSON, mistyped values or
    /// unknown fields.
    pub fn from_json(input: &str) -> Result<Self, SetupError> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The configured level, or `Info` if unset or unrecognized.
    pub fn log_level(&self) -> log::Level {
        self.logging_level
            .as_deref()
            .and_then(|l| l.parse().ok())
            .unwrap_or(log::Level::Info)
    }
}
