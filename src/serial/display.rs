//! # Display Module
//!
//! The [`DisplaySink`] that rendered traffic is appended to, an in-memory
//! implementation, and the default file name for saved logs.

use std::path::Path;

/// Where rendered traffic ends up.
///
/// Only the consumer thread touches a sink.
pub trait DisplaySink {
    /// Append rendered text to the end of the log.
    fn append(&mut self, text: &str);

    /// Remove everything shown so far.
    fn clear(&mut self);

    /// The full visible log.
    fn contents(&self) -> String;

    /// Write the full visible log to `path` as plain text.
    fn save_to_file(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.contents())
    }
}

/// A sink that keeps the log in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryDisplay {
    log: String,
}

impl MemoryDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.log
    }
}

impl DisplaySink for MemoryDisplay {
    fn append(&mut self, text: &str) {
        self.log.push_str(text);
    }

    fn clear(&mut self) {
        self.log.clear();
    }

    fn contents(&self) -> String {
        self.log.clone()
    }
}

/// Default file name for a saved log, e.g. `serial-20250101-120000.log`.
pub fn default_log_name() -> String {
    chrono::Local::now()
        .format("serial-%Y%m%d-%H%M%S.log")
        .to_string()
}
