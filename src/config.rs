use std::path::PathBuf;

/// Flags applied when opening the output log file.
///
/// The file is always opened append + read/write, created if missing.
/// `o_direct` bypasses the page cache; when set, every submitted write is
/// padded with zeroes to a 512-byte multiple and the output buffers are
/// 512-byte aligned.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileParams {
    /// Open with O_DIRECT (Linux only; ignored elsewhere).
    pub o_direct: bool,
    /// Open with O_DSYNC so each write reaches the device before returning.
    pub data_sync: bool,
}

impl FileParams {
    #[cfg(unix)]
    pub(crate) fn custom_flags(&self) -> i32 {
        let mut flags = 0;
        #[cfg(target_os = "linux")]
        if self.o_direct {
            flags |= libc::O_DIRECT;
        }
        if self.data_sync {
            flags |= libc::O_DSYNC;
        }
        flags
    }
}

/// Runtime configuration for the logging core.
///
/// Defaults mirror a general-purpose deployment; tests shrink the buffer
/// sizes to exercise wrap-around and flush boundaries.
#[derive(Debug, Clone)]
pub struct Config {
    /// Capacity of each per-thread staging ring.
    pub staging_buffer_size: usize,
    /// Capacity of each of the two output buffers.
    pub output_buffer_size: usize,
    /// Maximum bytes handed to the encoder per call. Bounds how often the
    /// consumer returns staging space to the producer; must exceed the
    /// largest single record.
    pub release_threshold: usize,
    /// Consumer idle wait before re-polling the staging buffers.
    pub poll_interval_no_work_us: u64,
    /// Brief nap while a write is in flight and little was consumed.
    pub poll_interval_during_low_work_us: u64,
    /// Bytes-per-iteration threshold below which the nap is taken.
    pub low_work_threshold: usize,
    /// Open flags for the output file.
    pub file_params: FileParams,
    /// Initial output path.
    pub log_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            staging_buffer_size: 1 << 20,
            output_buffer_size: 1 << 23,
            release_threshold: 1 << 19,
            poll_interval_no_work_us: 100,
            poll_interval_during_low_work_us: 1,
            low_work_threshold: 1 << 14,
            file_params: FileParams::default(),
            log_file: std::env::temp_dir().join("staged.log"),
        }
    }
}

impl Config {
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = path.into();
        self
    }

    pub fn with_staging_buffer_size(mut self, bytes: usize) -> Self {
        self.staging_buffer_size = bytes;
        self
    }

    pub fn with_output_buffer_size(mut self, bytes: usize) -> Self {
        self.output_buffer_size = bytes;
        self
    }

    pub fn with_release_threshold(mut self, bytes: usize) -> Self {
        self.release_threshold = bytes;
        self
    }

    pub fn with_direct_io(mut self) -> Self {
        self.file_params.o_direct = true;
        self
    }
}
