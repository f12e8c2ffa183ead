//! Bollinger Bands indicator.
//!
//! Bollinger Bands consist of:
//! - Middle: Simple Moving Average (SMA) over n periods
//! - Upper: Middle + (multiplier × StdDev)
//! - Lower: Middle - (multiplier × StdDev)
//!
//! Where StdDev is population standard deviation (divides by N, not N-1).
//! Warmup: first (period-1) positions are undefined.

use crate::domain::indicator::{sma, stddev, zip_with, Series};

#[derive(Debug, Clone, PartialEq)]
pub struct BollingerBands {
    pub upper: Series,
    pub middle: Series,
    pub lower: Series,
}

pub fn bollinger_bands(series: &[Option<f64>], window: usize, num_std: f64) -> BollingerBands {
    let middle = sma(series, window);
    let deviation = stddev(series, window);

    let upper = zip_with(&middle, &deviation, |m, sd| m + num_std * sd);
    let lower = zip_with(&middle, &deviation, |m, sd| m - num_std * sd);

    BollingerBands {
        upper,
        middle,
        lower,
    }
}
