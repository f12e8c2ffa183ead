//! Strategy signal generators and the name-keyed registry.

use std::collections::BTreeMap;

use tracing::info;

use crate::domain::error::TradelabError;
use crate::domain::indicator::{self, IndicatorType, Series, bollinger_bands, macd, rsi, sma};
use crate::domain::ohlcv::{self, OhlcvBar};
use crate::domain::sandbox::{self, DataTable, ExecutionLimits, Params};
use crate::domain::signal::{SignalFrame, cross_above, cross_below, level, signals_from};

/// Numeric strategy parameters keyed by name.
pub type StrategyParams = BTreeMap<String, f64>;

/// Registry identifiers accepted by [`Strategy::from_params`].
pub const STRATEGY_IDS: &[&str] = &["sma_crossover", "rsi", "macd", "bollinger", "combined"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CombinedWeights {
    pub sma: f64,
    pub rsi: f64,
    pub macd: f64,
    pub bollinger: f64,
}

impl Default for CombinedWeights {
    fn default() -> Self {
        CombinedWeights {
            sma: 0.25,
            rsi: 0.25,
            macd: 0.25,
            bollinger: 0.25,
        }
    }
}

/// Constituent settings and blending for the combined strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedParams {
    pub fast_window: usize,
    pub slow_window: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bb_window: usize,
    pub bb_num_std: f64,
    pub weights: CombinedWeights,
    pub threshold: f64,
}

impl Default for CombinedParams {
    fn default() -> Self {
        CombinedParams {
            fast_window: 10,
            slow_window: 20,
            rsi_period: 14,
            macd_fast: indicator::macd::DEFAULT_FAST,
            macd_slow: indicator::macd::DEFAULT_SLOW,
            macd_signal: indicator::macd::DEFAULT_SIGNAL,
            bb_window: 20,
            bb_num_std: 2.0,
            weights: CombinedWeights::default(),
            threshold: 0.3,
        }
    }
}

/// A custom indicator run through the sandbox and thresholded into signals.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomStrategy {
    pub source: String,
    pub function: String,
    pub params: Params,
    pub buy_threshold: f64,
    pub sell_threshold: f64,
    pub limits: ExecutionLimits,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    SmaCrossover {
        fast_window: usize,
        slow_window: usize,
    },
    Rsi {
        period: usize,
        oversold: f64,
        overbought: f64,
    },
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    Bollinger {
        window: usize,
        num_std: f64,
    },
    Combined(CombinedParams),
    Custom(CustomStrategy),
}

impl Strategy {
    /// Look up a built-in strategy by id and build it from `params`,
    /// filling in defaults for absent keys.
    pub fn from_params(id: &str, params: &StrategyParams) -> Result<Self, TradelabError> {
        let p = ParamReader { strategy: id, params };
        let strategy = match id {
            "sma_crossover" => Strategy::SmaCrossover {
                fast_window: p.window("fast_window", 10)?,
                slow_window: p.window("slow_window", 20)?,
            },
            "rsi" => Strategy::Rsi {
                period: p.window("period", 14)?,
                oversold: p.number("oversold", 30.0)?,
                overbought: p.number("overbought", 70.0)?,
            },
            "macd" => Strategy::Macd {
                fast: p.window("fast", indicator::macd::DEFAULT_FAST)?,
                slow: p.window("slow", indicator::macd::DEFAULT_SLOW)?,
                signal: p.window("signal", indicator::macd::DEFAULT_SIGNAL)?,
            },
            "bollinger" => Strategy::Bollinger {
                window: p.window("window", 20)?,
                num_std: p.number("num_std", 2.0)?,
            },
            "combined" => {
                let d = CombinedParams::default();
                let dw = d.weights;
                Strategy::Combined(CombinedParams {
                    fast_window: p.window("fast_window", d.fast_window)?,
                    slow_window: p.window("slow_window", d.slow_window)?,
                    rsi_period: p.window("rsi_period", d.rsi_period)?,
                    macd_fast: p.window("macd_fast", d.macd_fast)?,
                    macd_slow: p.window("macd_slow", d.macd_slow)?,
                    macd_signal: p.window("macd_signal", d.macd_signal)?,
                    bb_window: p.window("bb_window", d.bb_window)?,
                    bb_num_std: p.number("bb_num_std", d.bb_num_std)?,
                    weights: CombinedWeights {
                        sma: p.number("weight_sma", dw.sma)?,
                        rsi: p.number("weight_rsi", dw.rsi)?,
                        macd: p.number("weight_macd", dw.macd)?,
                        bollinger: p.number("weight_bollinger", dw.bollinger)?,
                    },
                    threshold: p.number("threshold", d.threshold)?,
                })
            }
            "custom" => {
                return Err(invalid(
                    id,
                    "script",
                    "custom strategies are built from a script, not numeric parameters",
                ));
            }
            _ => {
                return Err(TradelabError::UnknownStrategy {
                    name: id.to_string(),
                });
            }
        };
        strategy.validate()?;
        Ok(strategy)
    }

    pub fn id(&self) -> &'static str {
        match self {
            Strategy::SmaCrossover { .. } => "sma_crossover",
            Strategy::Rsi { .. } => "rsi",
            Strategy::Macd { .. } => "macd",
            Strategy::Bollinger { .. } => "bollinger",
            Strategy::Combined(_) => "combined",
            Strategy::Custom(_) => "custom",
        }
    }

    /// Built-in indicators the strategy reads. Empty for custom strategies.
    pub fn indicators(&self) -> Vec<IndicatorType> {
        let bands = |period: usize, num_std: f64| IndicatorType::Bollinger {
            period,
            stddev_mult_x100: (num_std * 100.0).round() as u32,
        };
        match self {
            Strategy::SmaCrossover {
                fast_window,
                slow_window,
            } => vec![IndicatorType::Sma(*fast_window), IndicatorType::Sma(*slow_window)],
            Strategy::Rsi { period, .. } => vec![IndicatorType::Rsi(*period)],
            Strategy::Macd { fast, slow, signal } => vec![IndicatorType::Macd {
                fast: *fast,
                slow: *slow,
                signal: *signal,
            }],
            Strategy::Bollinger { window, num_std } => vec![bands(*window, *num_std)],
            Strategy::Combined(c) => vec![
                IndicatorType::Sma(c.fast_window),
                IndicatorType::Sma(c.slow_window),
                IndicatorType::Rsi(c.rsi_period),
                IndicatorType::Macd {
                    fast: c.macd_fast,
                    slow: c.macd_slow,
                    signal: c.macd_signal,
                },
                bands(c.bb_window, c.bb_num_std),
            ],
            Strategy::Custom(_) => Vec::new(),
        }
    }

    /// Check cross-parameter constraints.
    pub fn validate(&self) -> Result<(), TradelabError> {
        let id = self.id();
        match self {
            Strategy::SmaCrossover {
                fast_window,
                slow_window,
            } => {
                if fast_window >= slow_window {
                    return Err(invalid(id, "fast_window", "must be less than slow_window"));
                }
            }
            Strategy::Rsi {
                oversold,
                overbought,
                ..
            } => check_rsi_levels(id, *oversold, *overbought)?,
            Strategy::Macd { fast, slow, .. } => {
                if fast >= slow {
                    return Err(invalid(id, "fast", "must be less than slow"));
                }
            }
            Strategy::Bollinger { num_std, .. } => {
                if *num_std <= 0.0 {
                    return Err(invalid(id, "num_std", "must be positive"));
                }
            }
            Strategy::Combined(c) => {
                if c.fast_window >= c.slow_window {
                    return Err(invalid(id, "fast_window", "must be less than slow_window"));
                }
                if c.macd_fast >= c.macd_slow {
                    return Err(invalid(id, "macd_fast", "must be less than macd_slow"));
                }
                if c.bb_num_std <= 0.0 {
                    return Err(invalid(id, "bb_num_std", "must be positive"));
                }
                let w = c.weights;
                for (name, value) in [
                    ("weight_sma", w.sma),
                    ("weight_rsi", w.rsi),
                    ("weight_macd", w.macd),
                    ("weight_bollinger", w.bollinger),
                ] {
                    if value < 0.0 {
                        return Err(invalid(id, name, "must be non-negative"));
                    }
                }
                if w.sma + w.rsi + w.macd + w.bollinger <= 0.0 {
                    return Err(invalid(id, "weights", "at least one weight must be positive"));
                }
                if !(0.0..=1.0).contains(&c.threshold) {
                    return Err(invalid(id, "threshold", "must be between 0 and 1"));
                }
            }
            Strategy::Custom(c) => {
                if c.sell_threshold > c.buy_threshold {
                    return Err(invalid(
                        id,
                        "sell_threshold",
                        "must not exceed buy_threshold",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Compute indicator columns and the signal/position sequences for `bars`.
    pub fn generate_signals(&self, bars: &[OhlcvBar]) -> Result<SignalFrame, TradelabError> {
        ohlcv::check_ordered(bars)?;
        let close = ohlcv::closes(bars);
        let n = bars.len();

        let (columns, raw) = match self {
            Strategy::SmaCrossover {
                fast_window,
                slow_window,
            } => {
                let fast = sma(&close, *fast_window);
                let slow = sma(&close, *slow_window);
                let raw = signals_from(
                    n,
                    |i| cross_above(&fast, &slow, i),
                    |i| cross_below(&fast, &slow, i),
                );
                (
                    vec![("SMA_Fast".to_string(), fast), ("SMA_Slow".to_string(), slow)],
                    raw,
                )
            }
            Strategy::Rsi {
                period,
                oversold,
                overbought,
            } => {
                let values = rsi(&close, *period);
                let low = level(*oversold, n);
                let high = level(*overbought, n);
                let raw = signals_from(
                    n,
                    |i| cross_below(&values, &low, i),
                    |i| cross_above(&values, &high, i),
                );
                (vec![("RSI".to_string(), values)], raw)
            }
            Strategy::Macd { fast, slow, signal } => {
                let out = macd(&close, *fast, *slow, *signal);
                let raw = signals_from(
                    n,
                    |i| cross_above(&out.line, &out.signal, i),
                    |i| cross_below(&out.line, &out.signal, i),
                );
                (
                    vec![
                        ("MACD".to_string(), out.line),
                        ("MACD_Signal".to_string(), out.signal),
                        ("MACD_Hist".to_string(), out.histogram),
                    ],
                    raw,
                )
            }
            Strategy::Bollinger { window, num_std } => {
                let bands = bollinger_bands(&close, *window, *num_std);
                let raw = signals_from(
                    n,
                    |i| cross_below(&close, &bands.lower, i),
                    |i| cross_above(&close, &bands.upper, i),
                );
                (
                    vec![
                        ("BB_Upper".to_string(), bands.upper),
                        ("BB_Middle".to_string(), bands.middle),
                        ("BB_Lower".to_string(), bands.lower),
                    ],
                    raw,
                )
            }
            Strategy::Combined(c) => {
                let score = combined_score(&close, c);
                let up = level(c.threshold, n);
                let down = level(-c.threshold, n);
                let raw = signals_from(
                    n,
                    |i| cross_above(&score, &up, i),
                    |i| cross_below(&score, &down, i),
                );
                (vec![("Combined_Score".to_string(), score)], raw)
            }
            Strategy::Custom(c) => {
                let score = if bars.is_empty() {
                    Vec::new()
                } else {
                    let table = DataTable::from_bars(bars);
                    sandbox::execute(&c.source, &c.function, &table, &c.params, &c.limits)?.values
                };
                let buy = level(c.buy_threshold, n);
                let sell = level(c.sell_threshold, n);
                let raw = signals_from(
                    n,
                    |i| cross_above(&score, &buy, i),
                    |i| cross_below(&score, &sell, i),
                );
                (vec![("Custom_Score".to_string(), score)], raw)
            }
        };

        let frame = SignalFrame::new(bars.to_vec(), columns, &raw);
        info!(
            strategy = self.id(),
            bars = n,
            position_changes = frame.position_changes(),
            "generated signals"
        );
        Ok(frame)
    }
}

/// `generate_signals(strategy_id, params, price_series)` for callers holding
/// only an id and numeric parameters.
pub fn generate_signals(
    strategy_id: &str,
    params: &StrategyParams,
    bars: &[OhlcvBar],
) -> Result<SignalFrame, TradelabError> {
    Strategy::from_params(strategy_id, params)?.generate_signals(bars)
}

/// Weighted blend of the four constituent strategies, each normalized to
/// [-1, 1] with positive meaning bullish. Undefined wherever a constituent
/// with non-zero weight is undefined.
fn combined_score(close: &Series, c: &CombinedParams) -> Series {
    let fast = sma(close, c.fast_window);
    let slow = sma(close, c.slow_window);
    let rsi_values = rsi(close, c.rsi_period);
    let m = macd(close, c.macd_fast, c.macd_slow, c.macd_signal);
    let bands = bollinger_bands(close, c.bb_window, c.bb_num_std);
    let w = c.weights;
    let total = w.sma.abs() + w.rsi.abs() + w.macd.abs() + w.bollinger.abs();

    (0..close.len())
        .map(|i| {
            let sma_c = match (fast[i], slow[i]) {
                (Some(f), Some(s)) => Some(sign(f - s)),
                _ => None,
            };
            let rsi_c = rsi_values[i].map(|r| ((50.0 - r) / 50.0).clamp(-1.0, 1.0));
            let macd_c = m.histogram[i].map(sign);
            let bb_c = match (close[i], bands.upper[i], bands.middle[i]) {
                (Some(p), Some(u), Some(mid)) => {
                    let half_width = u - mid;
                    if half_width > 0.0 {
                        Some(((mid - p) / half_width).clamp(-1.0, 1.0))
                    } else {
                        Some(0.0)
                    }
                }
                _ => None,
            };

            let mut acc = 0.0;
            for (weight, component) in [
                (w.sma, sma_c),
                (w.rsi, rsi_c),
                (w.macd, macd_c),
                (w.bollinger, bb_c),
            ] {
                if weight == 0.0 {
                    continue;
                }
                acc += weight * component?;
            }
            Some(acc / total)
        })
        .collect()
}

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

fn check_rsi_levels(id: &str, oversold: f64, overbought: f64) -> Result<(), TradelabError> {
    if !(0.0..=100.0).contains(&oversold) {
        return Err(invalid(id, "oversold", "must be between 0 and 100"));
    }
    if !(0.0..=100.0).contains(&overbought) {
        return Err(invalid(id, "overbought", "must be between 0 and 100"));
    }
    if oversold >= overbought {
        return Err(invalid(id, "oversold", "must be less than overbought"));
    }
    Ok(())
}

fn invalid(strategy: &str, name: &str, reason: &str) -> TradelabError {
    TradelabError::InvalidParameter {
        strategy: strategy.to_string(),
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

struct ParamReader<'a> {
    strategy: &'a str,
    params: &'a StrategyParams,
}

impl ParamReader<'_> {
    fn number(&self, name: &str, default: f64) -> Result<f64, TradelabError> {
        match self.params.get(name) {
            None => Ok(default),
            Some(v) if v.is_finite() => Ok(*v),
            Some(_) => Err(invalid(self.strategy, name, "must be a finite number")),
        }
    }

    fn window(&self, name: &str, default: usize) -> Result<usize, TradelabError> {
        match self.params.get(name) {
            None => Ok(default),
            Some(v) if v.is_finite() && *v >= 1.0 && v.fract() == 0.0 => Ok(*v as usize),
            Some(_) => Err(invalid(self.strategy, name, "must be a positive integer")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signal::{Position, Signal};
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use super::Strategy;

    fn make_bars(closes: &[f64]) -> Vec<OhlcvBar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| OhlcvBar {
                timestamp: NaiveDate::from_ymd_opt(2024, 1, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
                    + chrono::Duration::days(i as i64),
                open: c,
                high: c,
                low: c,
                close: c,
                volume: Some(1000.0),
            })
            .collect()
    }

    fn params(pairs: &[(&str, f64)]) -> StrategyParams {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn indicators_describe_inputs() {
        let s = Strategy::from_params("sma_crossover", &params(&[("fast_window", 5.0)])).unwrap();
        let names: Vec<String> = s.indicators().iter().map(|i| i.to_string()).collect();
        assert_eq!(names, vec!["SMA(5)", "SMA(20)"]);

        let b = Strategy::from_params("bollinger", &StrategyParams::new()).unwrap();
        assert_eq!(b.indicators()[0].to_string(), "BOLLINGER(20,2)");
        assert_eq!(
            Strategy::from_params("combined", &StrategyParams::new())
                .unwrap()
                .indicators()
                .len(),
            5
        );
    }

    fn all_builtin() -> Vec<Strategy> {
        STRATEGY_IDS
            .iter()
            .map(|id| Strategy::from_params(id, &StrategyParams::new()).unwrap())
            .collect()
    }

    fn assert_frame_invariants(frame: &SignalFrame) {
        if let Some(first) = frame.positions.first() {
            assert_eq!(*first, Position::Flat);
        }
        let mut last = Signal::Hold;
        for (i, s) in frame.signals.iter().enumerate() {
            if *s != Signal::Hold {
                assert_ne!(*s, last, "repeated {s:?} at {i}");
                last = *s;
            }
            if i > 0 && *s == Signal::Hold {
                assert_eq!(frame.positions[i], frame.positions[i - 1]);
            }
        }
    }

    #[test]
    fn registry_defaults() {
        let s = Strategy::from_params("sma_crossover", &StrategyParams::new()).unwrap();
        assert_eq!(
            s,
            Strategy::SmaCrossover {
                fast_window: 10,
                slow_window: 20
            }
        );
        let s = Strategy::from_params("rsi", &StrategyParams::new()).unwrap();
        assert_eq!(
            s,
            Strategy::Rsi {
                period: 14,
                oversold: 30.0,
                overbought: 70.0
            }
        );
    }

    #[test]
    fn registry_unknown_id() {
        let err = Strategy::from_params("momentum", &StrategyParams::new()).unwrap_err();
        assert!(matches!(err, TradelabError::UnknownStrategy { ref name } if name == "momentum"));
    }

    #[test]
    fn registry_rejects_inverted_windows() {
        let p = params(&[("fast_window", 30.0), ("slow_window", 20.0)]);
        let err = Strategy::from_params("sma_crossover", &p).unwrap_err();
        assert!(matches!(err, TradelabError::InvalidParameter { .. }));
    }

    #[test]
    fn registry_rejects_fractional_window() {
        let p = params(&[("period", 2.5)]);
        assert!(Strategy::from_params("rsi", &p).is_err());
    }

    #[test]
    fn registry_rejects_bad_rsi_levels() {
        let p = params(&[("oversold", 80.0), ("overbought", 70.0)]);
        assert!(Strategy::from_params("rsi", &p).is_err());
    }

    #[test]
    fn registry_rejects_zero_weights() {
        let p = params(&[
            ("weight_sma", 0.0),
            ("weight_rsi", 0.0),
            ("weight_macd", 0.0),
            ("weight_bollinger", 0.0),
        ]);
        assert!(Strategy::from_params("combined", &p).is_err());
    }

    #[test]
    fn empty_input_gives_empty_frame() {
        for s in all_builtin() {
            let frame = s.generate_signals(&[]).unwrap();
            assert!(frame.is_empty());
            assert!(frame.signals.is_empty());
        }
    }

    #[test]
    fn single_row_is_hold_flat() {
        for s in all_builtin() {
            let frame = s.generate_signals(&make_bars(&[100.0])).unwrap();
            assert_eq!(frame.signals, vec![Signal::Hold]);
            assert_eq!(frame.positions, vec![Position::Flat]);
        }
    }

    #[test]
    fn unordered_bars_rejected() {
        let mut bars = make_bars(&[1.0, 2.0]);
        bars.swap(0, 1);
        let s = Strategy::from_params("rsi", &StrategyParams::new()).unwrap();
        assert!(matches!(
            s.generate_signals(&bars),
            Err(TradelabError::Data { .. })
        ));
    }

    #[test]
    fn sma_crossover_buys_on_upturn_and_sells_on_downturn() {
        let mut closes = vec![10.0; 5];
        closes.extend([9.0, 8.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 11.0, 10.0, 9.0, 8.0, 7.0]);
        let p = params(&[("fast_window", 2.0), ("slow_window", 4.0)]);
        let frame = generate_signals("sma_crossover", &p, &make_bars(&closes)).unwrap();

        assert!(frame.signals.contains(&Signal::Buy));
        assert!(frame.signals.contains(&Signal::Sell));
        let buy = frame.signals.iter().position(|s| *s == Signal::Buy).unwrap();
        let sell = frame.signals.iter().position(|s| *s == Signal::Sell).unwrap();
        assert!(buy < sell);
        assert!(frame.column("SMA_Fast").is_some());
        assert!(frame.column("SMA_Slow").is_some());
        assert_frame_invariants(&frame);
    }

    #[test]
    fn rising_prices_never_cross_downward() {
        let closes: Vec<f64> = (0..200).map(|i| 100.0 + i as f64 * 0.5).collect();
        let frame = generate_signals("sma_crossover", &StrategyParams::new(), &make_bars(&closes))
            .unwrap();
        assert!(!frame.signals.contains(&Signal::Sell));
        assert_frame_invariants(&frame);
    }

    #[test]
    fn rsi_columns_and_invariants() {
        let closes: Vec<f64> = (0..120)
            .map(|i| 100.0 + 15.0 * ((i as f64) / 6.0).sin())
            .collect();
        let p = params(&[("period", 5.0)]);
        let frame = generate_signals("rsi", &p, &make_bars(&closes)).unwrap();
        assert_eq!(frame.column("RSI").unwrap().len(), 120);
        assert!(frame.signals.contains(&Signal::Buy));
        assert_frame_invariants(&frame);
    }

    #[test]
    fn macd_exposes_three_columns() {
        let closes: Vec<f64> = (0..100).map(|i| 50.0 + (i as f64 / 5.0).cos() * 5.0).collect();
        let frame =
            generate_signals("macd", &StrategyParams::new(), &make_bars(&closes)).unwrap();
        for name in ["MACD", "MACD_Signal", "MACD_Hist"] {
            assert!(frame.column(name).is_some(), "missing {name}");
        }
        assert_frame_invariants(&frame);
    }

    #[test]
    fn bollinger_buys_on_drop_below_lower_band() {
        let mut closes = vec![100.0, 101.0, 100.0, 101.0, 100.0, 101.0];
        closes.push(90.0);
        closes.extend([100.0, 101.0, 100.0, 101.0, 115.0]);
        let p = params(&[("window", 5.0), ("num_std", 1.0)]);
        let frame = generate_signals("bollinger", &p, &make_bars(&closes)).unwrap();
        assert_eq!(frame.signals[6], Signal::Buy);
        assert_eq!(frame.signals[11], Signal::Sell);
        assert_frame_invariants(&frame);
    }

    #[test]
    fn combined_score_is_bounded() {
        let closes: Vec<f64> = (0..150)
            .map(|i| 100.0 + 10.0 * ((i as f64) / 8.0).sin() + i as f64 * 0.1)
            .collect();
        let frame =
            generate_signals("combined", &StrategyParams::new(), &make_bars(&closes)).unwrap();
        let score = frame.column("Combined_Score").unwrap();
        assert!(score.iter().flatten().all(|v| (-1.0..=1.0).contains(v)));
        assert!(score.iter().any(|v| v.is_some()));
        assert_frame_invariants(&frame);
    }

    #[test]
    fn combined_single_weight_tracks_sma() {
        let closes: Vec<f64> = (0..40).map(|i| i as f64).collect();
        let p = params(&[
            ("weight_sma", 1.0),
            ("weight_rsi", 0.0),
            ("weight_macd", 0.0),
            ("weight_bollinger", 0.0),
        ]);
        let frame = generate_signals("combined", &p, &make_bars(&closes)).unwrap();
        let score = frame.column("Combined_Score").unwrap();
        assert_eq!(score[18], None);
        assert_eq!(score[19], Some(1.0));
    }

    proptest! {
        #[test]
        fn builtin_strategies_alternate(
            closes in proptest::collection::vec(1.0f64..500.0, 0..150)
        ) {
            let bars = make_bars(&closes);
            for s in all_builtin() {
                let frame = s.generate_signals(&bars).unwrap();
                prop_assert_eq!(frame.len(), closes.len());
                prop_assert_eq!(frame.signals.len(), closes.len());
                assert_frame_invariants(&frame);
            }
        }
    }
}
