//! Weighted Moving Average.
//!
//! Linear weights 1..n, most recent bar weighted heaviest.
//! WMA(n)[i] = sum(C[i-n+1+j] * (j+1)) / (n*(n+1)/2).
//! Warmup: first (n-1) positions are undefined.

use crate::domain::indicator::{rolling, Series};

pub fn wma(series: &[Option<f64>], window: usize) -> Series {
    let denominator = (window * (window + 1)) as f64 / 2.0;
    rolling(series, window, |w| {
        w.iter()
            .enumerate()
            .map(|(j, v)| v * (j + 1) as f64)
            .sum::<f64>()
            / denominator
    })
}
