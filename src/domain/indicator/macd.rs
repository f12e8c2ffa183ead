//! MACD (Moving Average Convergence Divergence) indicator.
//!
//! MACD Line = EMA(fast) - EMA(slow)
//! Signal Line = EMA(signal) of MACD Line
//! Histogram = MACD Line - Signal Line
//!
//! Default parameters: fast=12, slow=26, signal=9

use crate::domain::indicator::{ema, zip_with, Series};

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

#[derive(Debug, Clone, PartialEq)]
pub struct MacdOutput {
    pub line: Series,
    pub signal: Series,
    pub histogram: Series,
}

pub fn macd(series: &[Option<f64>], fast: usize, slow: usize, signal: usize) -> MacdOutput {
    let ema_fast = ema(series, fast, None);
    let ema_slow = ema(series, slow, None);

    let line = zip_with(&ema_fast, &ema_slow, |f, s| f - s);
    let signal_line = ema(&line, signal, None);
    let histogram = zip_with(&line, &signal_line, |l, s| l - s);

    MacdOutput {
        line,
        signal: signal_line,
        histogram,
    }
}
