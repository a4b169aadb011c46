// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! In-memory capture of log records, so a host can copy diagnostic output
//! into its own request context.
//!
//! The buffer is process-wide and holds at most [`MAX_ENTRIES`] records; once
//! full, the oldest record is dropped for each new one. Hosts should drain it
//! with [`take_entries`] or [`to_json`] after each request. Records from
//! concurrent verifications interleave, so attribute them by their fields
//! (for example `url`) rather than by position.

use parking_lot::{const_mutex, Mutex};
use serde::Serialize;
use std::{
    collections::{HashMap, VecDeque},
    sync::Once,
};

/// Records kept before the oldest are dropped.
pub const MAX_ENTRIES: usize = 1024;

pub struct Logger {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub message: String,
    pub level: String,
    #[serde(flatten)]
    pub fields: HashMap<String, String>,
}

pub static LOGGER: Logger = Logger::new(MAX_ENTRIES);

/// Installs [`LOGGER`] as the global logger. Only the first call has any
/// effect. The level defaults to `Info`.
///
/// # Errors
///
/// Returns an error if another global logger was installed first.
pub fn init(level: Option<&str>) -> Result<(), log::SetLoggerError> {
    static INIT: Once = Once::new();
    let mut result = Ok(());
    INIT.call_once(|| {
        let level = level
            .and_then(|l| l.parse().ok())
            .unwrap_or(log::Level::Info);
        log::set_max_level(level.to_level_filter());
        result = log::set_logger(&LOGGER);
    });
    result
}

/// Drains the captured entries.
pub fn take_entries() -> Vec<LogEntry> {
    LOGGER.take_entries()
}

/// Drains the captured entries and renders them as
/// `{"logs": [{"message": {...}}]}`.
pub fn to_json() -> serde_json::Value {
    LOGGER.to_json()
}

impl Logger {
    /// Creates a logger that keeps the most recent `capacity` records.
    pub const fn new(capacity: usize) -> Self {
        Self {
            entries: const_mutex(VecDeque::new()),
            capacity,
        }
    }

    pub fn take_entries(&self) -> Vec<LogEntry> {
        std::mem::take(&mut *self.entries.lock()).into()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "logs": self
                .take_entries()
                .into_iter()
                .map(|log_entry| serde_json::json!({ "message": log_entry }))
                .collect::<Vec<_>>(),
        })
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        struct Visitor<'m>(&'m mut HashMap<String, String>);
        impl<'kvs> log::kv::VisitSource<'kvs> for Visitor<'_> {
            fn visit_pair(
                &mut self,
                key: log::kv::Key<'kvs>,
                value: log::kv::Value<'kvs>,
            ) -> Result<(), log::kv::Error> {
                self.0.insert(key.as_str().to_owned(), value.to_string());
                Ok(())
            }
        }

        let mut fields = HashMap::new();
        if let (Some(module), Some(file), Some(line)) =
            (record.module_path(), record.file(), record.line())
        {
            fields.insert("location".to_owned(), format!("{module}::{file}:{line}"));
        }
        // The visitor never fails.
        let _ = record.key_values().visit(&mut Visitor(&mut fields));

        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        if self.capacity > 0 {
            entries.push_back(LogEntry {
                message: format!("{}", record.args()),
                level: record.level().to_string(),
                fields,
            });
        }
    }

    fn flush(&self) {}
}
