use staged_logger::efficient_clock::{ticks, ticks_per_second, to_nanoseconds, to_seconds};

use std::thread;
use std::time::Duration;

#[test]
fn test_ticks_are_monotonic() {
    let mut previous = ticks();
    for _ in 0..1000 {
        let current = ticks();
        assert!(current >= previous, "tick counter went backwards");
        previous = current;
    }
}

#[test]
fn test_calibrated_rate_is_plausible() {
    // Anything slower than 1 MHz is not a cycle counter.
    assert!(ticks_per_second() > 1e6);
}

#[test]
fn test_conversion_tracks_wall_clock() {
    let start = ticks();
    thread::sleep(Duration::from_millis(20));
    let elapsed = to_seconds(ticks() - start);

    // Sleep overshoots but never undershoots; allow generous scheduling slack.
    assert!(elapsed >= 0.015, "measured {elapsed}s for a 20ms sleep");
    assert!(elapsed < 2.0, "measured {elapsed}s for a 20ms sleep");
}

#[test]
fn test_nanosecond_conversion_scales() {
    let one_second_in_ticks = ticks_per_second() as u64;
    let ns = to_nanoseconds(one_second_in_ticks);
    assert!((900_000_000..1_100_000_000).contains(&ns));
}
