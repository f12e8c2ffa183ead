//! Exponential Moving Average.
//!
//! alpha = 2/(n+1) unless overridden. Seeded with the first defined value,
//! then EMA[i] = alpha*C[i] + (1-alpha)*EMA[i-1]. Missing inputs produce a
//! missing output and leave the smoothing state untouched.

use crate::domain::indicator::Series;

pub fn ema(series: &[Option<f64>], window: usize, alpha: Option<f64>) -> Series {
    let alpha = match alpha {
        Some(a) => a,
        None if window == 0 => return vec![None; series.len()],
        None => 2.0 / (window as f64 + 1.0),
    };

    let mut values = Vec::with_capacity(series.len());
    let mut state: Option<f64> = None;

    for v in series {
        match (v, state) {
            (Some(x), None) if x.is_finite() => {
                state = Some(*x);
                values.push(state);
            }
            (Some(x), Some(prev)) if x.is_finite() => {
                let next = alpha * x + (1.0 - alpha) * prev;
                state = Some(next);
                values.push(state);
            }
            _ => values.push(None),
        }
    }

    values
}
