use std::cell::{Cell, UnsafeCell};
use std::sync::atomic::{fence, AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crate::efficient_clock;

/// Buckets of the producer-blocked histogram, 10ns wide each.
#[cfg(feature = "producer-stats")]
pub(crate) const BLOCKED_HIST_BUCKETS: usize = 20;

/// Single-producer/single-consumer byte ring used to hand raw log records
/// from a producer thread to the background compression thread.
///
/// Exactly one producer and one consumer may use a buffer for its lifetime.
/// The producer owns `producer_pos`, `end_of_recorded_space` and
/// `min_free_space`; the consumer owns `consumer_pos`. `producer_pos ==
/// consumer_pos` means empty, and every free-space check is a strict
/// inequality so a full buffer is never indistinguishable from an empty one.
///
/// Memory-ordering contract:
/// - `commit` publishes the reserved bytes with a release store of
///   `producer_pos`; `peek` pairs it with an acquire load.
/// - Before the producer rewinds `producer_pos` to the origin it publishes
///   `end_of_recorded_space` behind a release fence; `peek` reads it behind
///   an acquire fence, and only when it has observed `producer_pos <
///   consumer_pos`.
/// - `consume` releases the freed region; the reserve slow path acquires
///   `consumer_pos` before reusing it.
pub struct StagingBuffer {
    storage: Box<[UnsafeCell<u8>]>,
    capacity: usize,

    /// Offset of the next byte the producer will reserve.
    producer_pos: AtomicUsize,
    /// High-water mark at which recorded data ends once the producer has
    /// wrapped; `capacity` while unwrapped.
    end_of_recorded_space: AtomicUsize,
    /// Offset of the next byte the consumer will read.
    consumer_pos: AtomicUsize,

    /// Producer-local cache of contiguous free bytes ahead of producer_pos.
    min_free_space: Cell<usize>,

    /// Set by the owning thread at exit; the consumer frees the buffer once
    /// it is drained.
    should_delete: AtomicBool,

    id: u32,

    pub(crate) num_allocations: AtomicU64,
    pub(crate) num_times_producer_blocked: AtomicU64,
    pub(crate) cycles_producer_blocked: AtomicU64,
    #[cfg(feature = "producer-stats")]
    pub(crate) cycles_producer_blocked_dist: [AtomicU64; BLOCKED_HIST_BUCKETS],
}

// One producer and one consumer with disjoint write sets; the raw storage is
// only aliased through regions handed out by reserve/peek.
unsafe impl Send for StagingBuffer {}
unsafe impl Sync for StagingBuffer {}

impl StagingBuffer {
    pub fn new(capacity: usize, id: u32) -> Self {
        let storage: Vec<UnsafeCell<u8>> = (0..capacity).map(|_| UnsafeCell::new(0)).collect();
        Self {
            storage: storage.into_boxed_slice(),
            capacity,
            producer_pos: AtomicUsize::new(0),
            end_of_recorded_space: AtomicUsize::new(capacity),
            consumer_pos: AtomicUsize::new(0),
            min_free_space: Cell::new(capacity),
            should_delete: AtomicBool::new(false),
            id,
            num_allocations: AtomicU64::new(0),
            num_times_producer_blocked: AtomicU64::new(0),
            cycles_producer_blocked: AtomicU64::new(0),
            #[cfg(feature = "producer-stats")]
            cycles_producer_blocked_dist: Default::default(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records committed over the buffer's lifetime.
    pub fn allocation_count(&self) -> u64 {
        self.num_allocations.load(Ordering::Relaxed)
    }

    /// Times the producer entered the reserve slow path.
    pub fn blocked_count(&self) -> u64 {
        self.num_times_producer_blocked.load(Ordering::Relaxed)
    }

    #[inline(always)]
    fn ptr_at(&self, offset: usize) -> *mut u8 {
        debug_assert!(offset <= self.capacity);
        unsafe { (self.storage.as_ptr() as *mut u8).add(offset) }
    }

    /// Returns a writable region of at least `nbytes` contiguous bytes
    /// starting at the producer position, never straddling the storage end.
    /// Blocks while the ring is full unless `blocking` is false, in which
    /// case `None` is returned.
    ///
    /// Only the owning producer thread may call this.
    #[inline(always)]
    pub fn reserve(&self, nbytes: usize, blocking: bool) -> Option<*mut u8> {
        if self.min_free_space.get() > nbytes {
            return Some(self.ptr_at(self.producer_pos.load(Ordering::Relaxed)));
        }
        self.reserve_slow(nbytes, blocking)
    }

    /// Slow path of `reserve`: touches `consumer_pos`, which the compression
    /// thread writes, and so pays the cache-coherency cost the fast path
    /// avoids.
    #[cold]
    fn reserve_slow(&self, nbytes: usize, blocking: bool) -> Option<*mut u8> {
        let start = efficient_clock::ticks();
        let mut producer_pos = self.producer_pos.load(Ordering::Relaxed);

        while self.min_free_space.get() <= nbytes {
            // Single consistent read; the consumer may advance it at any time.
            let cached_consumer_pos = self.consumer_pos.load(Ordering::Acquire);

            if cached_consumer_pos <= producer_pos {
                self.min_free_space.set(self.capacity - producer_pos);
                if self.min_free_space.get() > nbytes {
                    break;
                }

                // Not enough space before the end of storage; wrap around.
                self.end_of_recorded_space
                    .store(producer_pos, Ordering::Relaxed);

                // A rewind onto the consumer's position would make the ring
                // look empty when it is full, so hold off until the consumer
                // leaves the origin.
                if cached_consumer_pos != 0 {
                    // Orders the end-of-recorded-space publish ahead of the
                    // producer_pos rewind.
                    fence(Ordering::Release);
                    self.producer_pos.store(0, Ordering::Release);
                    producer_pos = 0;
                    self.min_free_space.set(cached_consumer_pos);
                }
            } else {
                self.min_free_space
                    .set(cached_consumer_pos - producer_pos);
            }

            #[cfg(feature = "discard-on-full")]
            {
                self.producer_pos.store(0, Ordering::Release);
                producer_pos = 0;
                self.min_free_space.set(self.capacity);
            }

            if !blocking && self.min_free_space.get() <= nbytes {
                return None;
            }

            std::hint::spin_loop();
        }

        let cycles_blocked = efficient_clock::ticks().wrapping_sub(start);
        self.cycles_producer_blocked
            .fetch_add(cycles_blocked, Ordering::Relaxed);
        self.num_times_producer_blocked
            .fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "producer-stats")]
        {
            let bucket = ((cycles_blocked / efficient_clock::ticks_in_10ns()) as usize)
                .min(BLOCKED_HIST_BUCKETS - 1);
            self.cycles_producer_blocked_dist[bucket].fetch_add(1, Ordering::Relaxed);
        }

        Some(self.ptr_at(producer_pos))
    }

    /// Publishes `nbytes` of previously reserved space to the consumer.
    #[inline(always)]
    pub fn commit(&self, nbytes: usize) {
        let producer_pos = self.producer_pos.load(Ordering::Relaxed);
        // Release so the record bytes become visible before the new position.
        self.producer_pos
            .store(producer_pos + nbytes, Ordering::Release);
        self.min_free_space.set(self.min_free_space.get() - nbytes);
        self.num_allocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the contiguous region of committed bytes available for
    /// consumption; the length may be zero. Consumer-side only. A large peek
    /// should be consumed piecewise so space returns to the producer early.
    pub fn peek(&self) -> (*const u8, usize) {
        let cached_producer_pos = self.producer_pos.load(Ordering::Acquire);
        let mut consumer_pos = self.consumer_pos.load(Ordering::Relaxed);

        if cached_producer_pos < consumer_pos {
            // Pairs with the producer's release fence: never a new
            // producer_pos with a stale end_of_recorded_space.
            fence(Ordering::Acquire);
            let end = self.end_of_recorded_space.load(Ordering::Relaxed);
            let available = end - consumer_pos;
            if available > 0 {
                return (self.ptr_at(consumer_pos), available);
            }

            // Recorded region exhausted; follow the producer's wrap.
            self.consumer_pos.store(0, Ordering::Release);
            consumer_pos = 0;
        }

        (
            self.ptr_at(consumer_pos),
            cached_producer_pos - consumer_pos,
        )
    }

    /// Releases `nbytes` of peeked space back to the producer.
    pub fn consume(&self, nbytes: usize) {
        let consumer_pos = self.consumer_pos.load(Ordering::Relaxed);
        self.consumer_pos
            .store(consumer_pos + nbytes, Ordering::Release);
    }

    /// Called from the owning thread's teardown; after this the producer
    /// makes no further reservations and the consumer may free the buffer
    /// once it drains.
    pub fn mark_retired(&self) {
        self.should_delete.store(true, Ordering::Release);
    }

    /// True when the owner has retired the buffer and nothing is left to
    /// consume. Consumer-side only (shares peek's rewind side effect).
    pub fn can_delete(&self) -> bool {
        self.should_delete.load(Ordering::Acquire) && self.peek().1 == 0
    }
}
