//! RSI (Relative Strength Index) indicator.
//!
//! Uses Wilder's smoothing for average gain/loss calculation:
//! - First average: simple mean of gains/losses over the first n changes
//! - Subsequent: avg = (prev_avg * (n-1) + current) / n
//!
//! Formula: RSI = 100 - (100 / (1 + avg_gain / avg_loss))
//! If avg_loss == 0: RSI = 100, unless avg_gain is also 0, then RSI = 50.
//!
//! Warmup: first n positions are undefined (n price changes are needed). A
//! missing value restarts the warmup.

use crate::domain::indicator::Series;

pub fn rsi(series: &[Option<f64>], period: usize) -> Series {
    let mut values = vec![None; series.len()];
    if period == 0 || series.len() < 2 {
        return values;
    }

    let mut changes = 0usize;
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;

    for i in 1..series.len() {
        let (prev, curr) = match (series[i - 1], series[i]) {
            (Some(p), Some(c)) if p.is_finite() && c.is_finite() => (p, c),
            _ => {
                changes = 0;
                avg_gain = 0.0;
                avg_loss = 0.0;
                continue;
            }
        };

        let change = curr - prev;
        let gain = if change > 0.0 { change } else { 0.0 };
        let loss = if change < 0.0 { -change } else { 0.0 };
        changes += 1;

        if changes < period {
            avg_gain += gain;
            avg_loss += loss;
        } else if changes == period {
            avg_gain = (avg_gain + gain) / period as f64;
            avg_loss = (avg_loss + loss) / period as f64;
            values[i] = Some(rsi_value(avg_gain, avg_loss));
        } else {
            avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
            avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
            values[i] = Some(rsi_value(avg_gain, avg_loss));
        }
    }

    values
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 { 50.0 } else { 100.0 }
    } else {
        (100.0 - (100.0 / (1.0 + avg_gain / avg_loss))).clamp(0.0, 100.0)
    }
}
