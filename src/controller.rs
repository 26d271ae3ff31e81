//! Process-wide control surface over a lazily constructed global runtime.
//!
//! The global logger is built from `Config::default()` on first use; a
//! failure there is fatal (reported to stderr, process terminated), matching
//! the contract that initialisation errors cannot be surfaced to a caller
//! that never made a call. Programs that want explicit error handling or a
//! non-default configuration should construct their own [`Logger`].
//!
//! Each producer thread gets a staging buffer on its first record (or
//! eagerly via [`preallocate`]); the thread-local slot's destructor retires
//! the buffer at thread exit so the compression thread can reclaim it.

use std::cell::RefCell;
use std::path::Path;

use lazy_static::lazy_static;

use crate::logger::{LogFileError, Logger};
use crate::metrics::MetricsSnapshot;
use crate::producer::ProducerHandle;
use crate::site_registry::{LogLevel, SiteInfo};
use crate::Config;

lazy_static! {
    static ref GLOBAL: Logger = match Logger::new(Config::default()) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!(
                "the logging runtime could not start: {e}\n\
                 Check the permissions of the default log file or call \
                 set_log_file() before the first log."
            );
            std::process::exit(1);
        }
    };
}

thread_local! {
    static PRODUCER: RefCell<Option<ProducerHandle>> = const { RefCell::new(None) };
}

/// The process-wide logger instance.
pub fn instance() -> &'static Logger {
    &GLOBAL
}

/// Ensures the calling thread has a staging buffer, so the first log on
/// this thread does not pay the registration cost.
pub fn preallocate() {
    PRODUCER.with(|slot| {
        slot.borrow_mut().get_or_insert_with(|| GLOBAL.producer());
    });
}

/// Registers a static log site with the global runtime.
pub fn register_site(info: SiteInfo) -> u32 {
    GLOBAL.register_site(info)
}

/// Records one event for `site_id` from the calling thread, allocating the
/// thread's staging buffer on first use.
pub fn log(site_id: u32, payload: &[u8]) {
    PRODUCER.with(|slot| {
        let mut slot = slot.borrow_mut();
        let producer = slot.get_or_insert_with(|| GLOBAL.producer());
        producer.record(site_id, payload);
    });
}

/// True when a site of severity `level` should currently be recorded.
pub fn enabled(level: LogLevel) -> bool {
    GLOBAL.enabled(level)
}

pub fn set_log_level(level: LogLevel) {
    GLOBAL.set_log_level(level);
}

/// See [`Logger::sync`].
pub fn sync() {
    GLOBAL.sync();
}

/// See [`Logger::set_log_file`].
pub fn set_log_file(path: impl AsRef<Path>) -> Result<(), LogFileError> {
    GLOBAL.set_log_file(path)
}

pub fn get_stats() -> String {
    GLOBAL.get_stats()
}

pub fn get_histograms() -> String {
    GLOBAL.get_histograms()
}

pub fn metrics_snapshot() -> MetricsSnapshot {
    GLOBAL.metrics_snapshot()
}
