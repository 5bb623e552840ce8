//! Component-scoped logging over the `log` facade.
//!
//! The crate only emits through the facade; the host node installs whatever
//! backend it runs. [`install_stderr`] provides the minimal backend used
//! when no host logger is present.

use log::{LevelFilter, Metadata, Record};
use std::sync::Arc;

/// Handle carrying a component id, emitted as the log target.
///
/// Each runtime, trigger, and oracle instance logs under its own target, so
/// hosts can filter them independently through the facade's filter rules.
#[derive(Clone)]
pub struct Logger {
    pub id: Arc<str>,
}

impl Logger {
    /// Creates a logger with the given component id.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self { id: id.into() }
    }

    /// Logs an info-level message.
    pub fn info(&self, message: &str) {
        log::info!(target: self.id.as_ref(), "{message}");
    }

    /// Logs a warning-level message.
    pub fn warn(&self, message: &str) {
        log::warn!(target: self.id.as_ref(), "{message}");
    }

    /// Logs an error-level message.
    pub fn error(&self, message: &str) {
        log::error!(target: self.id.as_ref(), "{message}");
    }
}

/// Backend writing `[LEVEL] [target] message` lines to stderr.
struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{:5}] [{}] {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Installs the stderr backend at the given filter level.
///
/// A backend can only ever be installed once per process; later calls (or a
/// host logger installed first) win the race and this becomes a no-op.
pub fn install_stderr(level: LevelFilter) {
    static LOGGER: StderrLogger = StderrLogger;
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}
