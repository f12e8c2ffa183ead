//! Rate of Change.
//!
//! ROC(n)[i] = (C[i] - C[i-n]) / C[i-n] * 100. Undefined for the first n
//! positions and wherever C[i-n] is zero.

use crate::domain::indicator::Series;

pub fn roc(series: &[Option<f64>], period: usize) -> Series {
    let mut out = vec![None; series.len()];
    if period == 0 {
        return out;
    }

    for i in period..series.len() {
        if let (Some(prev), Some(curr)) = (series[i - period], series[i]) {
            if prev != 0.0 {
                out[i] = Some((curr - prev) / prev * 100.0);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defined(values: &[f64]) -> Series {
        values.iter().map(|&v| Some(v)).collect()
    }

    #[test]
    fn roc_warmup() {
        let out = roc(&defined(&[100.0, 110.0, 121.0]), 1);
        assert_eq!(out[0], None);
        assert!((out[1].unwrap() - 10.0).abs() < 1e-10);
        assert!((out[2].unwrap() - 10.0).abs() < 1e-10);
    }

    #[test]
    fn roc_zero_base_undefined() {
        let out = roc(&defined(&[0.0, 5.0]), 1);
        assert_eq!(out[1], None);
    }

    #[test]
    fn roc_negative_change() {
        let out = roc(&defined(&[100.0, 90.0]), 1);
        assert!((out[1].unwrap() + 10.0).abs() < 1e-10);
    }

    #[test]
    fn roc_period_zero() {
        assert_eq!(roc(&defined(&[1.0, 2.0]), 0), vec![None, None]);
    }
}
