//! Helper functions for integration tests

/// Compute relative error: |actual - expected| / |expected|
pub fn relative_error(actual: f64, expected: f64) -> f64 {
    if expected.abs() < 1e-10 {
        (actual - expected).abs()
    } else {
        (actual - expected).abs() / expected.abs()
    }
}

/// Composite Simpson rule with `intervals` (even) sub-intervals
pub fn simpson(f: impl Fn(f64) -> f64, a: f64, b: f64, intervals: usize) -> f64 {
    assert!(intervals % 2 == 0, "Simpson needs an even number of intervals");
    let h = (b - a) / intervals as f64;
    let mut sum = f(a) + f(b);
    for i in 1..intervals {
        let weight = if i % 2 == 1 { 4.0 } else { 2.0 };
        sum += weight * f(a + i as f64 * h);
    }
    sum * h / 3.0
}

/// Assert that committed times increase strictly and end at `final_t`
pub fn assert_monotone_times(times: &[f64], final_t: f64) {
    assert!(!times.is_empty(), "no step was committed");
    for pair in times.windows(2) {
        assert!(pair[1] > pair[0], "time went from {} to {}", pair[0], pair[1]);
    }
    for t in times {
        assert!(*t <= final_t, "time {} exceeds the final time {}", t, final_t);
    }
    assert_eq!(*times.last().unwrap(), final_t, "last step must land on the final time");
}
