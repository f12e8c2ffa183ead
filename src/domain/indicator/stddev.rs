//! Standard Deviation indicator.
//!
//! Population standard deviation over a trailing window.
//! STDDEV(n)[i] = sqrt(sum((C[i-j] - SMA(n)[i])^2 for j in 0..n-1) / n)
//! Warmup: first (n-1) positions are undefined. A window of identical values
//! has a deviation of exactly zero.

use crate::domain::indicator::{rolling, Series};

pub fn stddev(series: &[Option<f64>], window: usize) -> Series {
    rolling(series, window, population_stddev)
}

pub(crate) fn population_stddev(window: &[f64]) -> f64 {
    let first = window[0];
    if window.iter().all(|&v| v == first) {
        return 0.0;
    }

    let n = window.len() as f64;
    let mean = window.iter().sum::<f64>() / n;
    let variance = window
        .iter()
        .map(|v| {
            let diff = v - mean;
            diff * diff
        })
        .sum::<f64>()
        / n;
    variance.sqrt()
}
