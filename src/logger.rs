use std::fs::{File, OpenOptions};
use std::io;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use thiserror::Error;

use crate::aio::AsyncWriter;
use crate::config::Config;
use crate::efficient_clock::ticks;
use crate::metrics::{self, Metrics, MetricsSnapshot};
use crate::output_engine::{engine_main, AlignedBuf, EngineResources};
use crate::producer::ProducerHandle;
use crate::registry::BufferRegistry;
use crate::site_registry::{LogLevel, SiteInfo, SiteRegistry};

/// Failures while bringing the runtime up.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("could not open the log file {}: {source}", path.display())]
    OpenLogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not allocate the aligned output buffers: {0}")]
    AllocateOutputBuffer(#[source] io::Error),
}

/// Failures from `set_log_file`; the previous output file stays active.
#[derive(Debug, Error)]
pub enum LogFileError {
    /// The target exists but is not readable and writable.
    #[error("unable to read/write the new log file {}", path.display())]
    NotAccessible { path: PathBuf },

    #[error("unable to open the new log file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Flags shared with the compression thread under the condition mutex.
pub(crate) struct Control {
    /// A sync caller wants at least one more full pass before the consumer
    /// reports the queue empty.
    pub sync_requested: bool,
    /// Bumped every time the consumer goes idle with no pending sync; sync
    /// callers wait for it to advance.
    pub queue_emptied_epoch: u64,
}

/// State shared between producers, the control surface and the compression
/// thread.
pub(crate) struct Shared {
    pub config: Config,
    /// Registry structure and consumer cursor; held briefly, released around
    /// encode work.
    pub buffers: Mutex<BufferRegistry>,
    /// Site table append and dictionary snapshot.
    pub sites: Mutex<SiteRegistry>,
    pub control: Mutex<Control>,
    pub work_added: Condvar,
    pub queue_emptied: Condvar,
    pub should_exit: AtomicBool,
    pub current_level: AtomicU8,
    pub metrics: Metrics,
    /// Tick count at compression-thread start; zero while not running.
    pub cycle_at_thread_start: AtomicU64,
    /// Core the compression thread last ran on, for observability.
    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    pub core_id: AtomicI32,
}

struct EngineControl {
    file: Arc<File>,
    thread: Option<JoinHandle<EngineResources>>,
}

/// The logging runtime: staging-buffer registry, site registry and the
/// background compression/output thread, plus the control operations.
///
/// Lifecycle is `init → running → (stop → running)* → drained → dropped`;
/// `set_log_file` performs the stop/restart in the middle, and dropping the
/// logger syncs and joins the thread. A process-wide instance lives behind
/// the `controller` module.
pub struct Logger {
    shared: Arc<Shared>,
    engine: Mutex<EngineControl>,
}

fn open_log_file(config: &Config, path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).read(true).append(true);
    #[cfg(unix)]
    options.custom_flags(config.file_params.custom_flags());
    options.open(path)
}

fn spawn_engine(
    shared: Arc<Shared>,
    file: Arc<File>,
    resources: EngineResources,
) -> JoinHandle<EngineResources> {
    thread::Builder::new()
        .name("log-compression".into())
        .spawn(move || engine_main(shared, file, resources))
        .expect("failed to spawn log compression thread")
}

impl Logger {
    /// Brings the runtime up: opens the output file, allocates the two
    /// aligned output buffers, and starts the compression thread.
    pub fn new(config: Config) -> Result<Logger, InitError> {
        let file = open_log_file(&config, &config.log_file).map_err(|source| {
            InitError::OpenLogFile {
                path: config.log_file.clone(),
                source,
            }
        })?;

        let compressing = AlignedBuf::new(config.output_buffer_size)
            .map_err(InitError::AllocateOutputBuffer)?;
        let double =
            AlignedBuf::new(config.output_buffer_size).map_err(InitError::AllocateOutputBuffer)?;

        let shared = Arc::new(Shared {
            config,
            buffers: Mutex::new(BufferRegistry::default()),
            sites: Mutex::new(SiteRegistry::default()),
            control: Mutex::new(Control {
                sync_requested: false,
                queue_emptied_epoch: 0,
            }),
            work_added: Condvar::new(),
            queue_emptied: Condvar::new(),
            should_exit: AtomicBool::new(false),
            current_level: AtomicU8::new(LogLevel::Notice as u8),
            metrics: Metrics::default(),
            cycle_at_thread_start: AtomicU64::new(0),
            core_id: AtomicI32::new(-1),
        });

        let file = Arc::new(file);
        let resources = EngineResources {
            compressing,
            double,
            writer: AsyncWriter::spawn(),
        };
        let thread = spawn_engine(shared.clone(), file.clone(), resources);

        Ok(Logger {
            shared,
            engine: Mutex::new(EngineControl {
                file,
                thread: Some(thread),
            }),
        })
    }

    /// Registers a staging buffer for the calling thread and returns the
    /// producer handle that owns it. The handle must not be shared across
    /// threads.
    pub fn producer(&self) -> ProducerHandle {
        let buffer = self
            .shared
            .buffers
            .lock()
            .unwrap()
            .register(self.shared.config.staging_buffer_size);
        ProducerHandle {
            buffer,
            shared: self.shared.clone(),
            _not_sync: std::marker::PhantomData,
        }
    }

    /// Registers a static log site, returning the id producer records embed.
    pub fn register_site(&self, info: SiteInfo) -> u32 {
        self.shared.sites.lock().unwrap().register(info)
    }

    /// Sets the minimum severity recorded from here on; best effort with
    /// respect to records already staged.
    pub fn set_log_level(&self, level: LogLevel) {
        self.shared
            .current_level
            .store(level as u8, Ordering::Relaxed);
    }

    pub fn log_level(&self) -> LogLevel {
        LogLevel::from_raw(self.shared.current_level.load(Ordering::Relaxed) as i32)
    }

    /// True when a site of severity `level` should currently be recorded.
    pub fn enabled(&self, level: LogLevel) -> bool {
        let current = self.shared.current_level.load(Ordering::Relaxed);
        level as u8 <= current && level != LogLevel::Silent
    }

    /// Blocks until every record committed to any staging buffer before
    /// this call has been encoded and handed to the OS write path. Not a
    /// durability barrier; the data may still be in flight to the device.
    pub fn sync(&self) {
        if cfg!(feature = "discard-on-full") {
            return;
        }

        let mut control = self.shared.control.lock().unwrap();
        control.sync_requested = true;
        self.shared.work_added.notify_all();

        let epoch = control.queue_emptied_epoch;
        while control.queue_emptied_epoch == epoch {
            control = self.shared.queue_emptied.wait(control).unwrap();
        }
    }

    /// Switches the output to `path`: syncs the current file, stops the
    /// compression thread, swaps the descriptor, resets the dictionary
    /// cursor so the site dictionary is re-emitted, and restarts the
    /// thread. Not safe under concurrent logging; call before the first
    /// log on other threads.
    pub fn set_log_file(&self, path: impl AsRef<Path>) -> Result<(), LogFileError> {
        let path = path.as_ref();

        // An existing target must be readable and writable.
        if path.exists()
            && OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .is_err()
        {
            return Err(LogFileError::NotAccessible {
                path: path.to_path_buf(),
            });
        }

        let new_file =
            open_log_file(&self.shared.config, path).map_err(|source| LogFileError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        self.sync();

        let mut engine = self.engine.lock().unwrap();
        let resources = self.stop_engine(&mut engine);

        engine.file = Arc::new(new_file);
        self.shared.sites.lock().unwrap().next_to_persist = 0;

        self.shared.should_exit.store(false, Ordering::Release);
        engine.thread = Some(spawn_engine(
            self.shared.clone(),
            engine.file.clone(),
            resources,
        ));
        Ok(())
    }

    /// Signals shutdown, joins the compression thread, and recovers its
    /// buffers and writer for the next run.
    fn stop_engine(&self, engine: &mut EngineControl) -> EngineResources {
        {
            let _control = self.shared.control.lock().unwrap();
            self.shared.should_exit.store(true, Ordering::Release);
            self.shared.work_added.notify_all();
        }
        engine
            .thread
            .take()
            .expect("compression thread not running")
            .join()
            .expect("log compression thread panicked")
    }

    /// Snapshot of the runtime counters.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Number of staging buffers currently registered (live plus retired
    /// but not yet reclaimed).
    pub fn staging_buffer_count(&self) -> usize {
        self.shared.buffers.lock().unwrap().len()
    }

    /// Human-readable throughput report. Performs an fdatasync first so the
    /// I/O time covers everything written.
    pub fn get_stats(&self) -> String {
        let file = self.engine.lock().unwrap().file.clone();
        let sync_start = ticks();
        let _ = file.sync_data();
        let sync_ticks = ticks().wrapping_sub(sync_start);
        self.shared
            .metrics
            .cycles_disk_io_upper_bound
            .fetch_add(sync_ticks, Ordering::Relaxed);

        metrics::render_stats(
            &self.shared.metrics,
            sync_ticks,
            self.shared.cycle_at_thread_start.load(Ordering::Relaxed),
        )
    }

    /// Human-readable peek-size and per-producer histograms.
    pub fn get_histograms(&self) -> String {
        let buffers = self.shared.buffers.lock().unwrap().buffers.clone();
        metrics::render_histograms(&self.shared.metrics, &buffers)
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        self.sync();
        {
            let _control = self.shared.control.lock().unwrap();
            self.shared.should_exit.store(true, Ordering::Release);
            self.shared.work_added.notify_all();
        }
        if let Some(handle) = self.engine.get_mut().unwrap().thread.take() {
            let _ = handle.join();
        }
    }
}
