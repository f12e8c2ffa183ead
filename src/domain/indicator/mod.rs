//! Technical indicator implementations.
//!
//! Every indicator is a pure function over an ordered series of optional
//! values. `None` marks an undefined position (warm-up, missing input). The
//! output always has the same length as the input, so positions stay aligned
//! 1:1 with the price bars they were computed from.
//!
//! - `IndicatorType`: indicator identity + parameters (also serves as a map key)
//! - `Series`: the shared value sequence type

pub mod sma;
pub mod ema;
pub mod wma;
pub mod rsi;
pub mod roc;
pub mod stddev;
pub mod bollinger;
pub mod macd;

pub use bollinger::{bollinger_bands, BollingerBands};
pub use ema::ema;
pub use macd::{macd, MacdOutput};
pub use roc::roc;
pub use rsi::rsi;
pub use sma::sma;
pub use stddev::stddev;
pub use wma::wma;

use std::fmt;

/// Ordered values aligned by position with a bar sequence.
pub type Series = Vec<Option<f64>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndicatorType {
    Sma(usize),
    Rsi(usize),
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    Bollinger {
        period: usize,
        stddev_mult_x100: u32,
    },
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorType::Sma(period) => write!(f, "SMA({})", period),
            IndicatorType::Rsi(period) => write!(f, "RSI({})", period),
            IndicatorType::Macd { fast, slow, signal } => {
                write!(f, "MACD({},{},{})", fast, slow, signal)
            }
            IndicatorType::Bollinger {
                period,
                stddev_mult_x100,
            } => {
                let mult = *stddev_mult_x100 as f64 / 100.0;
                write!(f, "BOLLINGER({},{})", period, mult)
            }
        }
    }
}

/// Apply `f` to every trailing window of `window` values that is fully defined.
///
/// Positions before `window - 1`, and windows containing a missing value, are
/// undefined. A zero window yields an all-undefined series.
pub(crate) fn rolling<F>(series: &[Option<f64>], window: usize, f: F) -> Series
where
    F: Fn(&[f64]) -> f64,
{
    let mut out = vec![None; series.len()];
    if window == 0 || window > series.len() {
        return out;
    }

    let mut buf: Vec<f64> = Vec::with_capacity(window);
    for i in (window - 1)..series.len() {
        buf.clear();
        for v in &series[i + 1 - window..=i] {
            match v {
                Some(x) if x.is_finite() => buf.push(*x),
                _ => break,
            }
        }
        if buf.len() == window {
            out[i] = Some(f(&buf));
        }
    }
    out
}

/// Element-wise combination of two aligned series; undefined where either side is.
pub(crate) fn zip_with<F>(a: &[Option<f64>], b: &[Option<f64>], f: F) -> Series
where
    F: Fn(f64, f64) -> f64,
{
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| match (x, y) {
            (Some(x), Some(y)) => Some(f(*x, *y)),
            _ => None,
        })
        .collect()
}
