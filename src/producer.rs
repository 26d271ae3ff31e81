use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::efficient_clock::ticks;
use crate::encoder::{write_raw_record, RAW_RECORD_HEADER_SIZE};
use crate::logger::Shared;
use crate::staging_buffer::StagingBuffer;

/// Per-thread producer handle owning one staging buffer.
///
/// Obtained from `Logger::producer` (or implicitly through the process-wide
/// controller). Must stay on the thread that created it; dropping it retires
/// the staging buffer, after which the compression thread reclaims it once
/// drained.
pub struct ProducerHandle {
    pub(crate) buffer: Arc<StagingBuffer>,
    pub(crate) shared: Arc<Shared>,
    // A handle may move between threads but never be shared: the staging
    // buffer tolerates exactly one producer at a time.
    pub(crate) _not_sync: PhantomData<Cell<()>>,
}

impl ProducerHandle {
    /// Id of the staging buffer backing this handle, as it appears in the
    /// decoded output.
    pub fn buffer_id(&self) -> u32 {
        self.buffer.id()
    }

    /// Records one log event for a registered site. Blocks while the
    /// staging buffer is full (unless the discard feature is on, in which
    /// case the event may be dropped).
    #[inline]
    pub fn record(&self, site_id: u32, payload: &[u8]) {
        self.record_inner(site_id, payload, true);
    }

    /// Non-blocking variant: returns false when the staging buffer has no
    /// room and the record was dropped.
    pub fn try_record(&self, site_id: u32, payload: &[u8]) -> bool {
        self.record_inner(site_id, payload, false)
    }

    #[inline]
    fn record_inner(&self, site_id: u32, payload: &[u8], blocking: bool) -> bool {
        let nbytes = RAW_RECORD_HEADER_SIZE + payload.len();
        debug_assert!(
            nbytes < self.shared.config.release_threshold,
            "record larger than the encoder release threshold"
        );
        match self.buffer.reserve(nbytes, blocking) {
            Some(dst) => {
                unsafe { write_raw_record(dst, site_id, ticks(), payload) };
                self.buffer.commit(nbytes);
                true
            }
            None => false,
        }
    }
}

impl Drop for ProducerHandle {
    fn drop(&mut self) {
        self.buffer.mark_retired();
        // Wake the consumer so the retired buffer is reclaimed promptly.
        self.shared.work_added.notify_all();
    }
}
