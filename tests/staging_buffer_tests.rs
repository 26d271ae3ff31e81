use staged_logger::StagingBuffer;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn push(buffer: &StagingBuffer, data: &[u8], blocking: bool) -> bool {
    match buffer.reserve(data.len(), blocking) {
        Some(ptr) => {
            unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len()) };
            buffer.commit(data.len());
            true
        }
        None => false,
    }
}

fn pull(buffer: &StagingBuffer, max: usize) -> Vec<u8> {
    let (ptr, available) = buffer.peek();
    let n = available.min(max);
    let out = unsafe { std::slice::from_raw_parts(ptr, n) }.to_vec();
    buffer.consume(n);
    out
}

#[test]
fn test_new_buffer_is_empty() {
    let buffer = StagingBuffer::new(1024, 0);
    assert_eq!(buffer.peek().1, 0);
    assert_eq!(buffer.allocation_count(), 0);
}

#[test]
fn test_commit_then_peek_roundtrip() {
    let buffer = StagingBuffer::new(1024, 0);
    assert!(push(&buffer, b"first record", true));
    assert!(push(&buffer, b"second", true));

    let data = pull(&buffer, usize::MAX);
    assert_eq!(&data, b"first recordsecond");
    assert_eq!(buffer.peek().1, 0);
    assert_eq!(buffer.allocation_count(), 2);
}

#[test]
fn test_full_buffer_is_not_mistaken_for_empty() {
    const CAP: usize = 64;
    let buffer = StagingBuffer::new(CAP, 0);

    // The producer may reserve at most capacity - 1 bytes, keeping
    // producer == consumer reserved for "empty".
    assert!(push(&buffer, &vec![0xAB; CAP - 1], false));
    assert!(!push(&buffer, &[0xCD], false));
    assert_eq!(buffer.peek().1, CAP - 1);
}

#[test]
fn test_wrap_around_preserves_order() {
    let buffer = StagingBuffer::new(1024, 0);

    let first: Vec<u8> = (0..900u32).map(|i| i as u8).collect();
    assert!(push(&buffer, &first, true));
    assert_eq!(pull(&buffer, usize::MAX), first);

    // 500 contiguous bytes no longer fit before the end of storage, so the
    // producer must wrap to the origin.
    let second: Vec<u8> = (0..500u32).map(|i| (i * 3) as u8).collect();
    assert!(push(&buffer, &second, true));

    // First peek drains the recorded space up to the high-water mark (zero
    // bytes here), then the consumer follows the wrap.
    let mut drained = Vec::new();
    while drained.len() < second.len() {
        let piece = pull(&buffer, usize::MAX);
        assert!(!piece.is_empty(), "consumer stalled after wrap");
        drained.extend_from_slice(&piece);
    }
    assert_eq!(drained, second);
}

#[test]
fn test_blocked_producer_resumes_when_consumer_drains() {
    const CAP: usize = 256;
    let buffer = Arc::new(StagingBuffer::new(CAP, 0));

    let producer = {
        let buffer = buffer.clone();
        thread::spawn(move || {
            for i in 0..10u8 {
                assert!(push(&buffer, &[i; 64], true));
            }
        })
    };

    // Let the producer fill the ring and block.
    thread::sleep(Duration::from_millis(50));

    let mut total = 0;
    while total < 10 * 64 {
        let piece = pull(&buffer, 64);
        total += piece.len();
        if piece.is_empty() {
            thread::sleep(Duration::from_millis(1));
        }
    }

    producer.join().unwrap();
    assert!(
        buffer.blocked_count() >= 1,
        "producer should have hit the slow path at least once"
    );
}

#[test]
fn test_spsc_stream_integrity() {
    const CAP: usize = 4096;
    const TOTAL: usize = 1 << 20;
    let buffer = Arc::new(StagingBuffer::new(CAP, 0));

    let producer = {
        let buffer = buffer.clone();
        thread::spawn(move || {
            let mut written = 0usize;
            let mut chunk = 1usize;
            while written < TOTAL {
                let len = chunk.min(TOTAL - written).min(CAP / 2);
                let data: Vec<u8> = (written..written + len).map(|i| i as u8).collect();
                assert!(push(&buffer, &data, true));
                written += len;
                chunk = chunk % 193 + 1;
            }
        })
    };

    let mut read = 0usize;
    while read < TOTAL {
        let piece = pull(&buffer, usize::MAX);
        for (offset, byte) in piece.iter().enumerate() {
            assert_eq!(
                *byte,
                (read + offset) as u8,
                "byte {} out of order",
                read + offset
            );
        }
        read += piece.len();
        if piece.is_empty() {
            std::hint::spin_loop();
        }
    }

    producer.join().unwrap();
    assert_eq!(buffer.peek().1, 0);
}

#[test]
fn test_retired_buffer_deletable_only_after_drain() {
    let buffer = StagingBuffer::new(256, 0);
    assert!(push(&buffer, b"leftover", true));
    assert!(!buffer.can_delete());

    buffer.mark_retired();
    assert!(!buffer.can_delete(), "undrained buffer must not be freed");

    pull(&buffer, usize::MAX);
    assert!(buffer.can_delete());
}
