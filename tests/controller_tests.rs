use staged_logger::controller;
use staged_logger::{LogLevel, SiteInfo};

use std::thread;

// All tests share the process-wide logger, so everything that touches it
// lives in one test to keep the assertions deterministic.
#[test]
fn test_global_surface_end_to_end() {
    controller::preallocate();

    let site = controller::register_site(SiteInfo {
        severity: LogLevel::Notice,
        file: "controller_tests.rs",
        line: 14,
        format: "global event {}",
    });

    assert!(controller::enabled(LogLevel::Error));
    controller::set_log_level(LogLevel::Debug);
    assert!(controller::enabled(LogLevel::Debug));

    for i in 0..10u32 {
        controller::log(site, &i.to_le_bytes());
    }

    // Other threads allocate their staging buffer on first log and retire
    // it on exit.
    let workers: Vec<_> = (0..3)
        .map(|_| {
            thread::spawn(move || {
                for i in 0..10u32 {
                    controller::log(site, &i.to_le_bytes());
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    controller::sync();
    let snapshot = controller::metrics_snapshot();
    assert!(snapshot.logs_processed >= 40);

    let stats = controller::get_stats();
    assert!(stats.contains("events"));
    let histograms = controller::get_histograms();
    assert!(histograms.contains("peek() sizes"));
}
