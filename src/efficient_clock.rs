#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::_rdtsc;
use std::time::Instant;

use lazy_static::lazy_static;

/// Returns the monotonic cycle counter with the highest precision available
/// for the architecture. All latency metrics in the runtime are measured in
/// these ticks and converted to seconds through the calibrated rate below.
#[inline(always)]
pub fn ticks() -> u64 {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        _rdtsc()
    }

    #[cfg(target_arch = "aarch64")]
    unsafe {
        let mut value: u64;
        std::arch::asm!("mrs {}, cntvct_el0", out(reg) value);
        value
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64
    }
}

lazy_static! {
    static ref TICKS_PER_SECOND: f64 = calibrate();
}

/// Measures the tick rate against the wall clock over a short spin.
/// Runs once, on first use of any conversion function.
fn calibrate() -> f64 {
    let wall_start = Instant::now();
    let tick_start = ticks();
    while wall_start.elapsed().as_millis() < 10 {
        std::hint::spin_loop();
    }
    let tick_end = ticks();
    let elapsed = wall_start.elapsed().as_secs_f64();
    (tick_end.wrapping_sub(tick_start)) as f64 / elapsed
}

/// Calibrated counter frequency in ticks per second.
pub fn ticks_per_second() -> f64 {
    *TICKS_PER_SECOND
}

/// Converts a tick count to seconds.
pub fn to_seconds(t: u64) -> f64 {
    t as f64 / *TICKS_PER_SECOND
}

/// Converts a tick count to nanoseconds.
pub fn to_nanoseconds(t: u64) -> u64 {
    (to_seconds(t) * 1e9) as u64
}

/// Ticks in a 10ns interval; bucket width of the producer-blocked histogram.
#[allow(dead_code)]
pub(crate) fn ticks_in_10ns() -> u64 {
    ((*TICKS_PER_SECOND / 1e8) as u64).max(1)
}
