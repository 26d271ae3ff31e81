//! Low-latency binary logging runtime.
//!
//! Producer threads write raw, pre-encoded records into per-thread
//! lock-free staging rings at minimal cost; a single background thread
//! scans the rings, compresses the records against a dictionary of static
//! log sites, and streams the result to a file through double-buffered
//! asynchronous writes.
//!
//! ```no_run
//! use staged_logger::{Config, Logger, LogLevel, SiteInfo};
//!
//! let logger = Logger::new(Config::default()).unwrap();
//! let site = logger.register_site(SiteInfo {
//!     severity: LogLevel::Notice,
//!     file: file!(),
//!     line: line!(),
//!     format: "request took {} ms",
//! });
//!
//! let producer = logger.producer();
//! producer.record(site, b"42");
//! logger.sync();
//! ```

mod aio;
pub mod config;
pub mod controller;
pub mod efficient_clock;
pub mod encoder;
pub mod log_reader;
pub mod logger;
pub mod metrics;
mod output_engine;
pub mod producer;
pub mod registry;
pub mod site_registry;
pub mod staging_buffer;

pub use config::{Config, FileParams};
pub use encoder::{Encoder, RAW_RECORD_HEADER_SIZE};
pub use log_reader::{read_log_file, DecodeError, DecodedSite, LogEntry, LogReader};
pub use logger::{InitError, LogFileError, Logger};
pub use metrics::MetricsSnapshot;
pub use producer::ProducerHandle;
pub use site_registry::{LogLevel, SiteInfo, NUM_LOG_LEVELS};
pub use staging_buffer::StagingBuffer;
