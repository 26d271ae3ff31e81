use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::efficient_clock::{self, to_seconds};
use crate::staging_buffer::StagingBuffer;

/// Number of 10%-wide buckets in the peek-size distribution.
pub(crate) const PEEK_HIST_BUCKETS: usize = 10;

/// Counters and histograms maintained by the compression thread and the
/// staging buffers. All counters are relaxed atomics so any thread may read
/// a consistent-enough snapshot without stalling the consumer; they are
/// non-decreasing for the life of an engine.
#[derive(Default)]
pub struct Metrics {
    pub(crate) cycles_compressing_only: AtomicU64,
    pub(crate) cycles_compressing_with_consume: AtomicU64,
    pub(crate) cycles_compress_and_lock: AtomicU64,
    pub(crate) cycles_scanning_and_compressing: AtomicU64,
    pub(crate) cycles_active: AtomicU64,
    pub(crate) cycles_sleeping_out_of_work: AtomicU64,
    pub(crate) cycles_disk_io_upper_bound: AtomicU64,
    pub(crate) num_compress_batches: AtomicU64,
    pub(crate) num_compressing_and_locks: AtomicU64,
    pub(crate) num_scans_and_compress: AtomicU64,
    pub(crate) num_sleeps_out_of_work: AtomicU64,
    pub(crate) total_bytes_read: AtomicU64,
    pub(crate) total_bytes_written: AtomicU64,
    pub(crate) logs_processed: AtomicU64,
    /// Assigned from `logs_processed` each time a write is issued, so the
    /// per-event I/O statistic reflects messages issued rather than flushed.
    pub(crate) total_msgs_written: AtomicU64,
    pub(crate) pad_bytes_written: AtomicU64,
    pub(crate) num_aio_writes_completed: AtomicU64,
    pub(crate) staging_buffer_peek_dist: [AtomicU64; PEEK_HIST_BUCKETS],
}

impl Metrics {
    /// Records one peek-size sample in the 10%-of-capacity histogram.
    pub(crate) fn record_peek(&self, peek_bytes: usize, staging_buffer_size: usize) {
        let bucket =
            ((peek_bytes * PEEK_HIST_BUCKETS) / staging_buffer_size).min(PEEK_HIST_BUCKETS - 1);
        self.staging_buffer_peek_dist[bucket].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            logs_processed: self.logs_processed.load(Ordering::Relaxed),
            total_bytes_read: self.total_bytes_read.load(Ordering::Relaxed),
            total_bytes_written: self.total_bytes_written.load(Ordering::Relaxed),
            pad_bytes_written: self.pad_bytes_written.load(Ordering::Relaxed),
            num_aio_writes_completed: self.num_aio_writes_completed.load(Ordering::Relaxed),
            num_times_slept: self.num_sleeps_out_of_work.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the externally interesting counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub logs_processed: u64,
    pub total_bytes_read: u64,
    pub total_bytes_written: u64,
    pub pad_bytes_written: u64,
    pub num_aio_writes_completed: u64,
    pub num_times_slept: u64,
}

/// Renders the human-readable throughput report. `final_sync_ticks` is the
/// duration of the fdatasync performed just before the snapshot;
/// `cycle_at_thread_start` is zero if the engine is not running.
pub(crate) fn render_stats(
    metrics: &Metrics,
    final_sync_ticks: u64,
    cycle_at_thread_start: u64,
) -> String {
    let load = |c: &AtomicU64| c.load(Ordering::Relaxed);

    let output_time = to_seconds(load(&metrics.cycles_disk_io_upper_bound));
    let compress_s = to_seconds(load(&metrics.cycles_compressing_only));
    let compress_consume_s = to_seconds(load(&metrics.cycles_compressing_with_consume));
    let compress_lock_s = to_seconds(load(&metrics.cycles_compress_and_lock));
    let scan_compress_s = to_seconds(load(&metrics.cycles_scanning_and_compressing));
    let seconds_awake = to_seconds(load(&metrics.cycles_active));

    let bytes_written = load(&metrics.total_bytes_written) as f64;
    let bytes_read = load(&metrics.total_bytes_read) as f64;
    let pad_bytes = load(&metrics.pad_bytes_written) as f64;
    let events = load(&metrics.logs_processed) as f64;
    let msgs_written = load(&metrics.total_msgs_written) as f64;
    let flushes = load(&metrics.num_aio_writes_completed);

    let total_time = if cycle_at_thread_start == 0 {
        seconds_awake
    } else {
        to_seconds(efficient_clock::ticks().wrapping_sub(cycle_at_thread_start))
    };

    let mut out = String::new();
    let _ = writeln!(
        out,
        "Wrote {} events ({:.2} MB) in {:.3} seconds ({:.3} seconds spent compressing)",
        load(&metrics.logs_processed),
        bytes_written / 1.0e6,
        output_time,
        compress_lock_s,
    );
    let _ = writeln!(
        out,
        "There were {} file flushes and the final sync time was {:.6} sec",
        flushes,
        to_seconds(final_sync_ticks),
    );
    let _ = writeln!(
        out,
        "Compression thread was active for {:.3} out of {:.3} seconds ({:.2} %)",
        seconds_awake,
        total_time,
        100.0 * seconds_awake / total_time,
    );
    let _ = writeln!(
        out,
        "On average, that's\n\t{:.2} MB/s or {:.2} ns/byte w/ processing",
        (bytes_written / 1.0e6) / total_time,
        (total_time * 1.0e9) / bytes_written,
    );
    // The consumer checks for completion on wake-up, so the I/O may have
    // finished earlier than measured; disk throughput is a lower bound.
    let _ = writeln!(
        out,
        "\t{:.2} MB/s or {:.2} ns/byte disk throughput (min)",
        (bytes_written / 1.0e6) / output_time,
        (output_time * 1.0e9) / bytes_written,
    );
    let _ = writeln!(
        out,
        "\t{:.2} MB per flush with {:.1} bytes/event",
        (bytes_written / 1.0e6) / flushes as f64,
        bytes_written / events,
    );
    let _ = writeln!(
        out,
        "\t{:.2} ns/event compress only\n\
         \t{:.2} ns/event compressing with consume\n\
         \t{:.2} ns/event compressing with locking\n\
         \t{:.2} ns/event scan+compress\n\
         \t{:.2} ns/event I/O time\n\
         \t{:.2} ns/event in total",
        compress_s * 1.0e9 / events,
        compress_consume_s * 1.0e9 / events,
        compress_lock_s * 1.0e9 / events,
        scan_compress_s * 1.0e9 / events,
        output_time * 1.0e9 / msgs_written,
        total_time * 1.0e9 / events,
    );
    let _ = writeln!(
        out,
        "The compression ratio was {:.2}-{:.2}x ({} bytes in, {} bytes out, {} pad bytes)",
        bytes_read / (bytes_written + pad_bytes),
        bytes_read / bytes_written,
        load(&metrics.total_bytes_read),
        load(&metrics.total_bytes_written),
        load(&metrics.pad_bytes_written),
    );

    out
}

/// Renders the peek-size distribution and the per-buffer producer stats.
pub(crate) fn render_histograms(metrics: &Metrics, buffers: &[Arc<StagingBuffer>]) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Distribution of staging buffer peek() sizes");
    for (i, bucket) in metrics.staging_buffer_peek_dist.iter().enumerate() {
        let _ = writeln!(
            out,
            "\t{:02} - {:02}%: {}",
            i * 100 / PEEK_HIST_BUCKETS,
            (i + 1) * 100 / PEEK_HIST_BUCKETS,
            bucket.load(Ordering::Relaxed),
        );
    }

    for buffer in buffers {
        let _ = writeln!(out, "Thread {}:", buffer.id());
        let allocations = buffer.num_allocations.load(Ordering::Relaxed);
        let times_blocked = buffer.num_times_producer_blocked.load(Ordering::Relaxed);
        let _ = writeln!(
            out,
            "\tAllocations   : {}\n\tTimes Blocked : {}",
            allocations, times_blocked,
        );

        #[cfg(feature = "producer-stats")]
        {
            let blocked_ns = efficient_clock::to_nanoseconds(
                buffer.cycles_producer_blocked.load(Ordering::Relaxed),
            );
            let average = if times_blocked > 0 {
                blocked_ns / times_blocked
            } else {
                0
            };
            let _ = writeln!(out, "\tAvgBlock (ns) : {}\n\tBlock Dist", average);
            for (i, bucket) in buffer.cycles_producer_blocked_dist.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "\t\t{:4} - {:4} ns: {}",
                    i * 10,
                    (i + 1) * 10,
                    bucket.load(Ordering::Relaxed),
                );
            }
        }
    }

    #[cfg(not(feature = "producer-stats"))]
    {
        let _ = writeln!(
            out,
            "Note: detailed producer stats were compiled out. Enable via the \
             producer-stats feature"
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peek_histogram_buckets() {
        let metrics = Metrics::default();
        metrics.record_peek(0, 1000);
        metrics.record_peek(450, 1000);
        metrics.record_peek(999, 1000);
        assert_eq!(metrics.staging_buffer_peek_dist[0].load(Ordering::Relaxed), 1);
        assert_eq!(metrics.staging_buffer_peek_dist[4].load(Ordering::Relaxed), 1);
        assert_eq!(metrics.staging_buffer_peek_dist[9].load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_stats_report_fields() {
        let metrics = Metrics::default();
        metrics.logs_processed.store(10, Ordering::Relaxed);
        metrics.total_bytes_read.store(500, Ordering::Relaxed);
        metrics.total_bytes_written.store(250, Ordering::Relaxed);
        metrics.num_aio_writes_completed.store(2, Ordering::Relaxed);
        let report = render_stats(&metrics, 0, 0);
        assert!(report.contains("Wrote 10 events"));
        assert!(report.contains("2 file flushes"));
        assert!(report.contains("compression ratio"));
        assert!(report.contains("500 bytes in, 250 bytes out"));
    }
}
