use std::alloc::{alloc, dealloc, Layout};
use std::fs::File;
use std::io;
use std::ptr::NonNull;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::aio::AsyncWriter;
use crate::efficient_clock::ticks;
use crate::encoder::Encoder;
use crate::logger::Shared;
use crate::metrics::Metrics;
use crate::site_registry::{SiteInfo, SiteRegistry};

/// Alignment required for direct-I/O buffers and write lengths.
pub(crate) const DIRECT_IO_ALIGNMENT: usize = 512;

/// Heap buffer aligned for direct I/O. One of the pair accumulates encoder
/// output while the other is in flight to the writer.
pub(crate) struct AlignedBuf {
    ptr: NonNull<u8>,
    layout: Layout,
}

// Only ever touched by the engine thread or, while in flight, the writer.
unsafe impl Send for AlignedBuf {}

impl AlignedBuf {
    pub fn new(size: usize) -> io::Result<Self> {
        let layout = Layout::from_size_align(size, DIRECT_IO_ALIGNMENT)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let ptr = unsafe { alloc(layout) };
        match NonNull::new(ptr) {
            Some(ptr) => Ok(Self { ptr, layout }),
            None => Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "failed to allocate aligned output buffer",
            )),
        }
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// Buffers and writer owned by one engine run; handed back at thread exit so
/// a restart (log-file rotation) reuses them.
pub(crate) struct EngineResources {
    pub compressing: AlignedBuf,
    pub double: AlignedBuf,
    pub writer: AsyncWriter,
}

/// Zero padding needed to bring a write length up to the direct-I/O
/// alignment.
pub(crate) fn pad_for_direct_io(len: usize) -> usize {
    (DIRECT_IO_ALIGNMENT - len % DIRECT_IO_ALIGNMENT) % DIRECT_IO_ALIGNMENT
}

fn collect_write_result(metrics: &Metrics, result: Option<io::Result<usize>>, io_started: u64) {
    metrics
        .cycles_disk_io_upper_bound
        .fetch_add(ticks().wrapping_sub(io_started), Ordering::Relaxed);
    if let Some(Err(e)) = result {
        eprintln!("log output writer: asynchronous write failed: {e}");
    }
    metrics.num_aio_writes_completed.fetch_add(1, Ordering::Relaxed);
}

/// Body of the compression thread: scans the staging buffers, compresses
/// entries, and drives the double-buffered asynchronous file output until
/// told to exit.
pub(crate) fn engine_main(
    shared: Arc<Shared>,
    file: Arc<File>,
    mut resources: EngineResources,
) -> EngineResources {
    let config = &shared.config;
    let metrics = &shared.metrics;
    let o_direct = config.file_params.o_direct;

    // Index of the last staging buffer checked for uncompressed entries.
    let mut last_buffer_checked: usize = 0;

    // Marks when the thread last woke; cycles_active accrues against it
    // right before every sleep.
    let mut cycles_awake_start = ticks();
    shared
        .cycle_at_thread_start
        .store(cycles_awake_start, Ordering::Relaxed);

    let mut encoder = Encoder::new(resources.compressing.as_mut_ptr(), config.output_buffer_size);

    // The encoder could not fit the last peeked data; flush before retrying.
    let mut output_buffer_full = false;

    // The scan passed buffer index zero since the last encoded record and
    // must signal that in the stream.
    let mut wrap_around = false;

    // Consumer-owned mirror of every persisted site, read without locking
    // while encoding. Rebuilt from scratch on every engine start, which
    // keeps it aligned with the dictionary cursor reset at rotation.
    let mut shadow_sites: Vec<SiteInfo> = Vec::new();

    let mut last_io_started = 0u64;

    'main: while !shared.should_exit.load(Ordering::Acquire) {
        #[cfg(target_os = "linux")]
        shared
            .core_id
            .store(unsafe { libc::sched_getcpu() }, Ordering::Relaxed);

        // Bytes taken out of the staging buffers this iteration; zero means
        // every buffer was empty or the encoder was full.
        let mut bytes_consumed_this_iteration: u64 = 0;

        let scan_start = ticks();
        {
            let mut registry = shared.buffers.lock().unwrap();

            // Output new dictionary entries first so no record can precede
            // the entry it references.
            {
                let mut sites = shared.sites.lock().unwrap();
                if sites.has_pending() {
                    let SiteRegistry {
                        sites,
                        next_to_persist,
                    } = &mut *sites;
                    encoder.encode_new_dictionary_entries(next_to_persist, sites);
                    for index in shadow_sites.len()..*next_to_persist {
                        shadow_sites.push(sites[index]);
                    }
                }
            }

            let mut i = if registry.is_empty() {
                0
            } else {
                last_buffer_checked % registry.len()
            };

            while !shared.should_exit.load(Ordering::Relaxed)
                && !output_buffer_full
                && !registry.is_empty()
            {
                let staging_buffer = registry.buffers[i].clone();
                let (peek_ptr, peek_bytes) = staging_buffer.peek();

                if peek_bytes > 0 {
                    let peek_start = ticks();
                    // Unlock so producers can register while we compress.
                    drop(registry);

                    metrics.record_peek(peek_bytes, config.staging_buffer_size);

                    // Encode in release_threshold chunks so staging space
                    // returns to the producer piecewise.
                    let mut remaining = peek_bytes;
                    while remaining > 0 {
                        let offset = peek_bytes - remaining;
                        let chunk = remaining.min(config.release_threshold);
                        let src =
                            unsafe { std::slice::from_raw_parts(peek_ptr.add(offset), chunk) };

                        let compress_start = ticks();
                        let bytes_read = encoder.encode_log_msgs(
                            src,
                            staging_buffer.id(),
                            wrap_around,
                            &shadow_sites,
                            &metrics.logs_processed,
                        );
                        metrics.cycles_compressing_only.fetch_add(
                            ticks().wrapping_sub(compress_start),
                            Ordering::Relaxed,
                        );
                        metrics.num_compress_batches.fetch_add(1, Ordering::Relaxed);

                        if bytes_read == 0 {
                            last_buffer_checked = i;
                            output_buffer_full = true;
                            break;
                        }

                        wrap_around = false;
                        remaining -= bytes_read;
                        staging_buffer.consume(bytes_read);
                        metrics
                            .total_bytes_read
                            .fetch_add(bytes_read as u64, Ordering::Relaxed);
                        bytes_consumed_this_iteration += bytes_read as u64;
                        metrics.cycles_compressing_with_consume.fetch_add(
                            ticks().wrapping_sub(compress_start),
                            Ordering::Relaxed,
                        );
                    }

                    registry = shared.buffers.lock().unwrap();
                    metrics
                        .num_compressing_and_locks
                        .fetch_add(1, Ordering::Relaxed);
                    metrics
                        .cycles_compress_and_lock
                        .fetch_add(ticks().wrapping_sub(peek_start), Ordering::Relaxed);
                } else if staging_buffer.can_delete() {
                    // Drained and retired: release it and back the indexes
                    // up so the pass skips no neighbour.
                    registry.remove(i);
                    drop(staging_buffer);

                    if registry.is_empty() {
                        last_buffer_checked = 0;
                        wrap_around = true;
                        break;
                    }

                    if last_buffer_checked >= i && last_buffer_checked > 0 {
                        last_buffer_checked -= 1;
                    }
                    i = i.wrapping_sub(1);
                }

                i = i.wrapping_add(1) % registry.len();
                if i == 0 {
                    wrap_around = true;
                }
                // Completed a full pass through the buffers.
                if i == last_buffer_checked {
                    break;
                }
            }

            metrics
                .cycles_scanning_and_compressing
                .fetch_add(ticks().wrapping_sub(scan_start), Ordering::Relaxed);
            metrics.num_scans_and_compress.fetch_add(1, Ordering::Relaxed);
        }

        // Nothing to output: idle, unless a sync wants one more pass first.
        if encoder.encoded_bytes() == 0 {
            // Settle any in-flight write first; "queue emptied" promises
            // that every prior record has reached the OS write path.
            if resources.writer.has_outstanding() {
                let sleep_start = ticks();
                metrics.cycles_active.fetch_add(
                    sleep_start.wrapping_sub(cycles_awake_start),
                    Ordering::Relaxed,
                );
                let result = resources.writer.wait();
                cycles_awake_start = ticks();
                collect_write_result(metrics, result, last_io_started);
            }

            let mut control = shared.control.lock().unwrap();
            if control.sync_requested {
                control.sync_requested = false;
                continue;
            }

            metrics
                .cycles_active
                .fetch_add(ticks().wrapping_sub(cycles_awake_start), Ordering::Relaxed);

            control.queue_emptied_epoch += 1;
            shared.queue_emptied.notify_all();
            let (control, _) = shared
                .work_added
                .wait_timeout(
                    control,
                    Duration::from_micros(config.poll_interval_no_work_us),
                )
                .unwrap();
            drop(control);

            cycles_awake_start = ticks();
            continue;
        }

        if resources.writer.has_outstanding() {
            match resources.writer.poll() {
                None => {
                    if output_buffer_full {
                        // No room to compress into; nothing to overlap.
                        let sleep_start = ticks();
                        metrics.cycles_active.fetch_add(
                            sleep_start.wrapping_sub(cycles_awake_start),
                            Ordering::Relaxed,
                        );
                        let result = resources.writer.wait();
                        cycles_awake_start = ticks();
                        collect_write_result(metrics, result, last_io_started);
                    } else if bytes_consumed_this_iteration <= config.low_work_threshold as u64
                        && config.poll_interval_during_low_work_us > 0
                    {
                        // Little was consumed; nap briefly instead of
                        // re-polling the producers' cache lines.
                        let control = shared.control.lock().unwrap();
                        let sleep_start = ticks();
                        metrics.cycles_active.fetch_add(
                            sleep_start.wrapping_sub(cycles_awake_start),
                            Ordering::Relaxed,
                        );
                        let (control, _) = shared
                            .work_added
                            .wait_timeout(
                                control,
                                Duration::from_micros(config.poll_interval_during_low_work_us),
                            )
                            .unwrap();
                        drop(control);
                        let sleep_end = ticks();
                        cycles_awake_start = sleep_end;
                        metrics.cycles_sleeping_out_of_work.fetch_add(
                            sleep_end.wrapping_sub(sleep_start),
                            Ordering::Relaxed,
                        );
                        metrics.num_sleeps_out_of_work.fetch_add(1, Ordering::Relaxed);

                        match resources.writer.poll() {
                            None => continue 'main,
                            result => collect_write_result(metrics, result, last_io_started),
                        }
                    } else {
                        // Keep scanning while the I/O proceeds.
                        continue 'main;
                    }
                }
                result => collect_write_result(metrics, result, last_io_started),
            }
        }

        // Compressed data exists and the double buffer is free: pad if
        // direct I/O demands it, issue the write, and swap buffers.
        let mut bytes_to_write = encoder.encoded_bytes();
        if o_direct {
            let pad = pad_for_direct_io(bytes_to_write);
            if pad > 0 {
                encoder.pad(pad);
                bytes_to_write += pad;
                metrics
                    .pad_bytes_written
                    .fetch_add(pad as u64, Ordering::Relaxed);
            }
        }

        metrics
            .total_bytes_written
            .fetch_add(bytes_to_write as u64, Ordering::Relaxed);
        metrics.total_msgs_written.store(
            metrics.logs_processed.load(Ordering::Relaxed),
            Ordering::Relaxed,
        );

        last_io_started = ticks();
        if let Err(e) =
            resources
                .writer
                .submit(file.clone(), resources.compressing.as_ptr(), bytes_to_write)
        {
            // The buffered data is lost; future writes continue.
            eprintln!("log output writer: failed to submit write: {e}");
        }

        encoder.swap_buffer(resources.double.as_mut_ptr(), config.output_buffer_size);
        std::mem::swap(&mut resources.compressing, &mut resources.double);
        output_buffer_full = false;
    }

    // Drain any in-flight write before handing the buffers back.
    if resources.writer.has_outstanding() {
        let result = resources.writer.wait();
        collect_write_result(metrics, result, last_io_started);
    }

    shared.cycle_at_thread_start.store(0, Ordering::Relaxed);
    resources
}
