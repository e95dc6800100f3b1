// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Thread pool configuration.
//!
//! # Example
//!
//! ```
//! use frost::thread_pool::ThreadPoolConfig;
//! use std::time::Duration;
//!
//! let config = ThreadPoolConfig::new("Server")
//!     .with_size(2)
//!     .with_size_max(8)
//!     .with_thread_idle_time(Some(Duration::from_secs(30)));
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use crate::config::Properties;

/// Thread pool configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadPoolConfig {
    /// Pool name, used for thread names and log lines.
    pub name: String,

    // === Sizing ===
    /// Threads started up front; the pool never shrinks below this.
    pub size: usize,

    /// Upper bound for on-demand growth.
    pub size_max: usize,

    /// Log a warning when this many threads are busy (0 = never).
    pub size_warn: usize,

    // === Idle policy ===
    /// Idle time after which a thread above `size` exits (None = never).
    pub thread_idle_time: Option<Duration>,

    /// Idle time of the whole pool after which the idle action runs (None = never).
    pub server_idle_time: Option<Duration>,

    // === Dispatch ===
    /// Never dispatch two steps of the same handler operation concurrently.
    pub serialize: bool,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            name: "Frost.ThreadPool".to_owned(),
            size: 1,
            size_max: 1,
            size_warn: 0,
            thread_idle_time: Some(Duration::from_secs(60)),
            server_idle_time: None,
            serialize: false,
        }
    }
}

impl ThreadPoolConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builder: set minimum size (raises `size_max` if needed)
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self.size_max = self.size_max.max(size);
        self
    }

    /// Builder: set maximum size
    pub fn with_size_max(mut self, size_max: usize) -> Self {
        self.size_max = size_max;
        self
    }

    /// Builder: set busy-thread warning threshold
    pub fn with_size_warn(mut self, size_warn: usize) -> Self {
        self.size_warn = size_warn;
        self
    }

    /// Builder: set thread idle time
    pub fn with_thread_idle_time(mut self, idle: Option<Duration>) -> Self {
        self.thread_idle_time = idle;
        self
    }

    /// Builder: set server idle time
    pub fn with_server_idle_time(mut self, idle: Option<Duration>) -> Self {
        self.server_idle_time = idle;
        self
    }

    /// Builder: set serialization
    pub fn with_serialize(mut self, serialize: bool) -> Self {
        self.serialize = serialize;
        self
    }

    /// Read `<prefix>.Size`, `.SizeMax`, `.SizeWarn`, `.ThreadIdleTime`,
    /// `.ServerIdleTime` and `.Serialize`. Times are seconds, 0 disables.
    ///
    /// The pool name is the last component of `prefix`.
    pub fn from_properties(props: &Properties, prefix: &str) -> Self {
        let defaults = Self::default();
        let name = prefix.rsplit('.').next().unwrap_or(prefix).to_owned();

        let size = props
            .get_int_with_default(&format!("{}.Size", prefix), defaults.size as i64)
            .max(1) as usize;
        let size_max = props
            .get_int_with_default(&format!("{}.SizeMax", prefix), size as i64)
            .max(size as i64) as usize;
        let size_warn = props
            .get_int_with_default(&format!("{}.SizeWarn", prefix), 0)
            .max(0) as usize;
        let seconds = |key: &str, default: Option<Duration>| {
            let default_secs = default.map_or(0, |d| d.as_secs() as i64);
            match props.get_int_with_default(&format!("{}.{}", prefix, key), default_secs) {
                s if s <= 0 => None,
                s => Some(Duration::from_secs(s as u64)),
            }
        };

        Self {
            name,
            size,
            size_max,
            size_warn,
            thread_idle_time: seconds("ThreadIdleTime", defaults.thread_idle_time),
            server_idle_time: seconds("ServerIdleTime", defaults.server_idle_time),
            serialize: props.get_bool_with_default(&format!("{}.Serialize", prefix), false),
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.name.is_empty() {
            return Err("name must not be empty");
        }
        if self.size == 0 {
            return Err("size must be > 0");
        }
        if self.size_max < self.size {
            return Err("size_max must be >= size");
        }
        if self.size_warn > self.size_max {
            return Err("size_warn must be <= size_max");
        }
        if self.thread_idle_time == Some(Duration::ZERO) || self.server_idle_time == Some(Duration::ZERO) {
            return Err("idle times must be > 0 (use None to disable)");
        }
        Ok(())
    }
}
