//! Simple Moving Average.
//!
//! SMA(n)[i] = mean(C[i-n+1..=i]). Warmup: first (n-1) positions are undefined.
//! A window longer than the series leaves every position undefined.

use crate::domain::indicator::{rolling, Series};

pub fn sma(series: &[Option<f64>], window: usize) -> Series {
    if window == 1 {
        return series.to_vec();
    }
    rolling(series, window, |w| w.iter().sum::<f64>() / w.len() as f64)
}
