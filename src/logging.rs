// This file is part of stemlabd, an application to drive the signal-processing modules of a StemLab FPGA board over the network.
//
// Copyright 2025 Canonical Ltd.
//
// SPDX-License-Identifier: GPL-3.0-only
//
// stemlabd is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License version 3, as published by the Free Software Foundation.
//
// stemlabd is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranties of MERCHANTABILITY, SATISFACTORY QUALITY, or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with this program.  If not, see http://www.gnu.org/licenses/.

//! Logger of the daemon: `env_logger` with repeated records suppressed.
//!
//! A board that stops answering produces the same warning for every retried transaction.
//! [`DedupLogger`] drops a record that is identical to the one logged right before it.

use env_logger::Env;
use log::{Level, Log, Metadata, Record, SetLoggerError};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct DuplicateFilter {
    last: Mutex<Option<(String, Level, String)>>,
}

impl DuplicateFilter {
    pub fn new() -> DuplicateFilter {
        DuplicateFilter::default()
    }

    /// Whether a record should be logged. Remembers it for the next call.
    pub fn admit(&self, target: &str, level: Level, message: &str) -> bool {
        let mut last = match self.last.lock() {
            Ok(last) => last,
            // losing the last record only lets one duplicate through
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some((last_target, last_level, last_message)) = last.as_ref()
            && last_target == target
            && *last_level == level
            && last_message == message
        {
            return false;
        }
        *last = Some((target.to_string(), level, message.to_string()));
        true
    }
}

pub struct DedupLogger {
    inner: env_logger::Logger,
    filter: DuplicateFilter,
}

impl DedupLogger {
    pub fn new(inner: env_logger::Logger) -> DedupLogger {
        DedupLogger {
            inner,
            filter: DuplicateFilter::new(),
        }
    }
}

impl Log for DedupLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.inner.matches(record) {
            return;
        }
        let message = record.args().to_string();
        if self.filter.admit(record.target(), record.level(), &message) {
            self.inner.log(record);
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Install the daemon logger. `RUST_LOG` overrides the default `info` filter.
pub fn init() -> Result<(), SetLoggerError> {
    let inner = env_logger::Builder::from_env(Env::default().default_filter_or("info")).build();
    let max_level = inner.filter();
    log::set_boxed_logger(Box::new(DedupLogger::new(inner)))?;
    log::set_max_level(max_level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;

    #[gtest]
    fn drops_only_immediate_repeats() {
        let filter = DuplicateFilter::new();
        assert!(filter.admit("client", Level::Warn, "retrying"));
        assert!(!filter.admit("client", Level::Warn, "retrying"));
        assert!(filter.admit("client", Level::Warn, "connected"));
        assert!(filter.admit("client", Level::Warn, "retrying"));
    }

    #[gtest]
    fn level_and_target_make_a_record_distinct() {
        let filter = DuplicateFilter::new();
        assert!(filter.admit("client", Level::Warn, "retrying"));
        assert!(filter.admit("client", Level::Info, "retrying"));
        assert!(filter.admit("board", Level::Info, "retrying"));
    }
}
