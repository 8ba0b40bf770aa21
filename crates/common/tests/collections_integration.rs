//! Integration tests for `metricflow_common::collections`.

use std::sync::{Arc, Mutex};
use std::thread;

use metricflow_common::collections::SampleWindow;

/// Validates that concurrent producers never grow the window past its
/// capacity and that quantiles over the retained samples stay ordered.
///
/// Assertions:
/// - Retained length equals the capacity after overfilling
/// - p50 <= p90 <= p99 over the retained samples
#[test]
fn test_window_bounded_under_concurrent_producers() {
    let window = Arc::new(Mutex::new(SampleWindow::new(256)));

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let window = Arc::clone(&window);
            thread::spawn(move || {
                for i in 0..500 {
                    let value = f64::from(worker * 1_000 + i);
                    window.lock().unwrap().push(value);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let guard = window.lock().unwrap();
    assert_eq!(guard.len(), 256);
    let qs = guard.quantiles(&[0.5, 0.9, 0.99]);
    assert_eq!(qs.len(), 3);
    assert!(qs[0].1 <= qs[1].1);
    assert!(qs[1].1 <= qs[2].1);
}
