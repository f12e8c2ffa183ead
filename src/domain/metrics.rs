//! Performance metrics computed once from a finished equity curve and trade log.
//!
//! Every ratio with a zero denominator is reported as 0.0 and no metric is
//! ever NaN; empty input yields neutral defaults.

use crate::domain::backtest::{BacktestConfig, EquityPoint, Trade, TradeSide};

const SECONDS_PER_YEAR: f64 = 365.25 * 86_400.0;
const VAR_CONFIDENCE: f64 = 0.95;

#[derive(Debug, Clone, PartialEq)]
pub struct Metrics {
    pub total_return: f64,
    pub cagr: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    /// Worst peak-to-trough decline as a fraction, always <= 0.
    pub max_drawdown: f64,
    /// Longest run of bars spent below a prior peak.
    pub max_drawdown_duration: usize,
    pub win_rate: f64,
    pub var_95: f64,
    pub cvar_95: f64,
    pub calmar_ratio: f64,
    pub omega_ratio: f64,
    /// Completed Buy/Sell round trips.
    pub total_trades: usize,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub profit_factor: f64,
    pub total_commission: f64,
    pub final_value: f64,
}

impl Metrics {
    /// All-neutral metrics for a run that never marked an equity point.
    pub fn neutral(initial_capital: f64) -> Self {
        Metrics {
            total_return: 0.0,
            cagr: 0.0,
            sharpe_ratio: 0.0,
            sortino_ratio: 0.0,
            max_drawdown: 0.0,
            max_drawdown_duration: 0,
            win_rate: 0.0,
            var_95: 0.0,
            cvar_95: 0.0,
            calmar_ratio: 0.0,
            omega_ratio: 0.0,
            total_trades: 0,
            trades_won: 0,
            trades_lost: 0,
            profit_factor: 0.0,
            total_commission: 0.0,
            final_value: initial_capital,
        }
    }

    pub fn compute(equity_curve: &[EquityPoint], trades: &[Trade], config: &BacktestConfig) -> Self {
        let initial_capital = config.initial_capital;
        if equity_curve.is_empty() {
            return Metrics::neutral(initial_capital);
        }

        let final_value = equity_curve
            .last()
            .map(|p| p.portfolio_value)
            .unwrap_or(initial_capital);

        let total_return = if initial_capital > 0.0 {
            final_value / initial_capital - 1.0
        } else {
            0.0
        };

        let cagr = compute_cagr(equity_curve, initial_capital, final_value);
        let (max_drawdown, max_drawdown_duration) = compute_drawdown(equity_curve);

        let returns = period_returns(equity_curve);
        let periods = if config.periods_per_year > 0.0 {
            config.periods_per_year
        } else {
            crate::domain::backtest::DEFAULT_PERIODS_PER_YEAR
        };
        let per_period_rf = config.risk_free_rate / periods;
        let (sharpe_ratio, sortino_ratio) = compute_risk_adjusted(&returns, per_period_rf, periods);
        let (var_95, cvar_95) = compute_var_cvar(&returns, VAR_CONFIDENCE);

        let calmar_ratio = if max_drawdown < 0.0 {
            cagr / max_drawdown.abs()
        } else {
            0.0
        };
        let omega_ratio = compute_omega(&returns);

        let trips = round_trips(trades);
        let total_trades = trips.len();
        let trades_won = trips.iter().filter(|&&pnl| pnl > 0.0).count();
        let trades_lost = trips.iter().filter(|&&pnl| pnl < 0.0).count();
        let win_rate = if total_trades > 0 {
            trades_won as f64 / total_trades as f64
        } else {
            0.0
        };

        let total_wins: f64 = trips.iter().filter(|&&p| p > 0.0).sum();
        let total_losses: f64 = trips.iter().filter(|&&p| p < 0.0).map(|p| p.abs()).sum();
        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let total_commission = trades.iter().map(|t| t.commission).sum();

        Metrics {
            total_return: finite_or_zero(total_return),
            cagr: finite_or_zero(cagr),
            sharpe_ratio: finite_or_zero(sharpe_ratio),
            sortino_ratio: finite_or_zero(sortino_ratio),
            max_drawdown: finite_or_zero(max_drawdown),
            max_drawdown_duration,
            win_rate,
            var_95: finite_or_zero(var_95),
            cvar_95: finite_or_zero(cvar_95),
            calmar_ratio: finite_or_zero(calmar_ratio),
            omega_ratio: finite_or_zero(omega_ratio),
            total_trades,
            trades_won,
            trades_lost,
            profit_factor,
            total_commission,
            final_value,
        }
    }
}

fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() { x } else { 0.0 }
}

/// Annualized growth over elapsed calendar time between first and last point.
fn compute_cagr(equity_curve: &[EquityPoint], initial_capital: f64, final_value: f64) -> f64 {
    let (Some(first), Some(last)) = (equity_curve.first(), equity_curve.last()) else {
        return 0.0;
    };
    let years = (last.timestamp - first.timestamp).num_seconds() as f64 / SECONDS_PER_YEAR;
    if years <= 0.0 || initial_capital <= 0.0 {
        return 0.0;
    }
    let growth = final_value / initial_capital;
    if growth <= 0.0 {
        return -1.0;
    }
    growth.powf(1.0 / years) - 1.0
}

/// Returns (max_drawdown <= 0, longest underwater stretch in bars).
fn compute_drawdown(equity_curve: &[EquityPoint]) -> (f64, usize) {
    if equity_curve.is_empty() {
        return (0.0, 0);
    }

    let mut peak = equity_curve[0].portfolio_value;
    let mut max_dd = 0.0_f64;
    let mut max_duration = 0usize;
    let mut current_duration = 0usize;

    for point in equity_curve {
        let value = point.portfolio_value;
        if value >= peak {
            peak = value;
            current_duration = 0;
        } else if peak > 0.0 {
            let dd = (value - peak) / peak;
            if dd < max_dd {
                max_dd = dd;
            }
            current_duration += 1;
            max_duration = max_duration.max(current_duration);
        }
    }

    (max_dd, max_duration)
}

fn period_returns(equity_curve: &[EquityPoint]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .map(|w| {
            let prev = w[0].portfolio_value;
            let curr = w[1].portfolio_value;
            if prev > 0.0 { curr / prev - 1.0 } else { 0.0 }
        })
        .collect()
}

fn compute_risk_adjusted(returns: &[f64], rf: f64, periods_per_year: f64) -> (f64, f64) {
    if returns.is_empty() {
        return (0.0, 0.0);
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();
    let excess = mean - rf;
    let annualize = periods_per_year.sqrt();

    let sharpe = if stddev > 0.0 {
        excess / stddev * annualize
    } else {
        0.0
    };

    let downside_sq: f64 = returns
        .iter()
        .filter(|&&r| r < rf)
        .map(|&r| (r - rf).powi(2))
        .sum();
    let downside_dev = (downside_sq / n).sqrt();

    let sortino = if downside_dev > 0.0 {
        excess / downside_dev * annualize
    } else {
        0.0
    };

    (sharpe, sortino)
}

/// Empirical VaR (the (1 - confidence) quantile, linearly interpolated)
/// and CVaR (mean of returns at or below it). Both are signed returns, so
/// losses come out negative.
fn compute_var_cvar(returns: &[f64], confidence: f64) -> (f64, f64) {
    if returns.is_empty() {
        return (0.0, 0.0);
    }

    let mut sorted: Vec<f64> = returns.iter().copied().filter(|r| r.is_finite()).collect();
    if sorted.is_empty() {
        return (0.0, 0.0);
    }
    sorted.sort_by(f64::total_cmp);

    let rank = (1.0 - confidence) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let var = sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64);

    let tail: Vec<f64> = sorted.iter().copied().take_while(|&r| r <= var).collect();
    let cvar = if tail.is_empty() {
        var
    } else {
        tail.iter().sum::<f64>() / tail.len() as f64
    };

    (var, cvar)
}

/// Probability-weighted gains over losses around a zero threshold.
fn compute_omega(returns: &[f64]) -> f64 {
    let gains: f64 = returns.iter().filter(|&&r| r > 0.0).sum();
    let losses: f64 = returns.iter().filter(|&&r| r < 0.0).map(|r| r.abs()).sum();
    if losses > 0.0 { gains / losses } else { 0.0 }
}

/// Net cash result of each Buy followed by a Sell. A trailing open Buy is
/// not a round trip.
fn round_trips(trades: &[Trade]) -> Vec<f64> {
    let mut out = Vec::new();
    let mut cost: Option<f64> = None;
    for t in trades {
        match t.side {
            TradeSide::Buy => cost = Some(t.value + t.commission),
            TradeSide::Sell => {
                if let Some(c) = cost.take() {
                    out.push(t.value - t.commission - c);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signal::Position;
    use approx::assert_relative_eq;
    use chrono::{NaiveDate, NaiveDateTime};

    fn ts(day: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + chrono::Duration::days(day)
    }

    fn make_equity_curve(values: &[f64]) -> Vec<EquityPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| EquityPoint {
                timestamp: ts(i as i64),
                portfolio_value: v,
                price: 1.0,
                position: Position::Flat,
                capital: v,
                shares: 0.0,
            })
            .collect()
    }

    fn make_trade(side: TradeSide, value: f64, commission: f64) -> Trade {
        Trade {
            timestamp: ts(0),
            side,
            price: 1.0,
            quantity: value,
            value,
            commission,
            capital_after: 0.0,
            position_after: match side {
                TradeSide::Buy => Position::Long,
                TradeSide::Sell => Position::Flat,
            },
        }
    }

    fn config(initial: f64) -> BacktestConfig {
        BacktestConfig {
            initial_capital: initial,
            ..BacktestConfig::default()
        }
    }

    #[test]
    fn metrics_empty_curve_is_neutral() {
        let m = Metrics::compute(&[], &[], &config(10_000.0));
        assert_eq!(m, Metrics::neutral(10_000.0));
    }

    #[test]
    fn metrics_single_point() {
        let m = Metrics::compute(&make_equity_curve(&[100.0]), &[], &config(100.0));
        assert_eq!(m.total_return, 0.0);
        assert_eq!(m.cagr, 0.0);
        assert_eq!(m.sharpe_ratio, 0.0);
        assert_eq!(m.var_95, 0.0);
        assert_eq!(m.final_value, 100.0);
    }

    #[test]
    fn metrics_total_return() {
        let m = Metrics::compute(&make_equity_curve(&[100.0, 110.0]), &[], &config(100.0));
        assert_relative_eq!(m.total_return, 0.10, epsilon = 1e-12);
        let m = Metrics::compute(&make_equity_curve(&[100.0, 90.0]), &[], &config(100.0));
        assert_relative_eq!(m.total_return, -0.10, epsilon = 1e-12);
    }

    #[test]
    fn metrics_cagr_over_two_calendar_years() {
        let mut curve = make_equity_curve(&[100.0, 121.0]);
        curve[1].timestamp = curve[0].timestamp + chrono::Duration::seconds(SECONDS_PER_YEAR as i64 * 2);
        let m = Metrics::compute(&curve, &[], &config(100.0));
        assert_relative_eq!(m.cagr, 0.1, epsilon = 1e-9);
    }

    #[test]
    fn metrics_max_drawdown_is_non_positive() {
        let curve = make_equity_curve(&[100.0, 110.0, 90.0, 95.0, 80.0, 100.0]);
        let (dd, _) = compute_drawdown(&curve);
        assert_relative_eq!(dd, (80.0 - 110.0) / 110.0, epsilon = 1e-12);
        assert!(dd <= 0.0);
    }

    #[test]
    fn metrics_max_drawdown_duration() {
        let curve = make_equity_curve(&[100.0, 110.0, 100.0, 90.0, 85.0, 95.0]);
        let (_, duration) = compute_drawdown(&curve);
        assert_eq!(duration, 4);
    }

    #[test]
    fn metrics_flat_curve_has_zero_ratios() {
        let m = Metrics::compute(&make_equity_curve(&[100.0; 30]), &[], &config(100.0));
        assert_eq!(m.sharpe_ratio, 0.0);
        assert_eq!(m.sortino_ratio, 0.0);
        assert_eq!(m.max_drawdown, 0.0);
        assert_eq!(m.calmar_ratio, 0.0);
        assert_eq!(m.omega_ratio, 0.0);
    }

    #[test]
    fn metrics_sharpe_positive_for_steady_growth() {
        let values: Vec<f64> = (0..253).map(|i| 100.0 * (1.0 + 0.001 * i as f64)).collect();
        let m = Metrics::compute(&make_equity_curve(&values), &[], &config(100.0));
        assert!(m.sharpe_ratio > 0.0);
        // never below the risk-free rate, so no downside deviation
        assert_eq!(m.sortino_ratio, 0.0);
    }

    #[test]
    fn metrics_sortino_with_losses() {
        let curve = make_equity_curve(&[100.0, 101.0, 100.5, 101.5, 100.0, 102.0]);
        let m = Metrics::compute(&curve, &[], &config(100.0));
        assert!(m.sortino_ratio.is_finite());
        assert!(m.sortino_ratio != 0.0);
    }

    #[test]
    fn var_interpolates_empirical_quantile() {
        let returns: Vec<f64> = (0..21).map(|i| -0.10 + 0.01 * i as f64).collect();
        let (var, cvar) = compute_var_cvar(&returns, 0.95);
        // rank = 0.05 * 20 = 1 -> second smallest
        assert_relative_eq!(var, -0.09, epsilon = 1e-12);
        assert_relative_eq!(cvar, -0.095, epsilon = 1e-12);
        assert!(cvar <= var);
    }

    #[test]
    fn omega_gains_over_losses() {
        assert_relative_eq!(compute_omega(&[0.02, -0.01, 0.01, -0.01]), 1.5, epsilon = 1e-12);
        assert_eq!(compute_omega(&[0.01, 0.02]), 0.0);
    }

    #[test]
    fn calmar_uses_cagr_and_drawdown() {
        let mut curve = make_equity_curve(&[100.0, 80.0, 120.0]);
        curve[2].timestamp = curve[0].timestamp + chrono::Duration::seconds(SECONDS_PER_YEAR as i64);
        let m = Metrics::compute(&curve, &[], &config(100.0));
        assert_relative_eq!(m.cagr, 0.2, epsilon = 1e-9);
        assert_relative_eq!(m.max_drawdown, -0.2, epsilon = 1e-12);
        assert_relative_eq!(m.calmar_ratio, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn win_rate_from_round_trips() {
        let trades = vec![
            make_trade(TradeSide::Buy, 1000.0, 1.0),
            make_trade(TradeSide::Sell, 1100.0, 1.1),
            make_trade(TradeSide::Buy, 1097.9, 1.0),
            make_trade(TradeSide::Sell, 900.0, 0.9),
            make_trade(TradeSide::Buy, 897.0, 0.9),
        ];
        let m = Metrics::compute(&make_equity_curve(&[1000.0, 1000.0]), &trades, &config(1000.0));
        assert_eq!(m.total_trades, 2);
        assert_eq!(m.trades_won, 1);
        assert_eq!(m.trades_lost, 1);
        assert_relative_eq!(m.win_rate, 0.5);
        assert_relative_eq!(m.total_commission, 4.9, epsilon = 1e-9);
    }

    #[test]
    fn profit_factor_all_winners_is_infinite() {
        let trades = vec![
            make_trade(TradeSide::Buy, 100.0, 0.0),
            make_trade(TradeSide::Sell, 150.0, 0.0),
        ];
        let m = Metrics::compute(&make_equity_curve(&[100.0, 150.0]), &trades, &config(100.0));
        assert!(m.profit_factor.is_infinite());
    }

    #[test]
    fn zero_initial_capital_is_not_nan() {
        let m = Metrics::compute(&make_equity_curve(&[0.0, 0.0, 0.0]), &[], &config(0.0));
        assert!(!m.total_return.is_nan());
        assert!(!m.cagr.is_nan());
        assert!(!m.sharpe_ratio.is_nan());
    }
}
