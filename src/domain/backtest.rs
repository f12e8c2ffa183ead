//! Backtest engine: a Cash/Long state machine driven by a signal frame.
//!
//! Fill convention for a fee fraction `f`:
//! - Buy: `quantity = capital / (price * (1 + f))`, `value = quantity * price`,
//!   `commission = value * f`, capital drops to `max(0, capital - value - commission)`
//! - Sell: `value = shares * price`, `commission = value * f`,
//!   capital becomes `value - commission`

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::domain::metrics::Metrics;
use crate::domain::signal::{Position, SignalFrame};

pub const DEFAULT_INITIAL_CAPITAL: f64 = 10_000.0;
pub const DEFAULT_FEE: f64 = 0.001;
pub const DEFAULT_PERIODS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    /// Commission as a fraction of trade value (0.001 = 10 bps).
    pub fee: f64,
    pub risk_free_rate: f64,
    pub periods_per_year: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            initial_capital: DEFAULT_INITIAL_CAPITAL,
            fee: DEFAULT_FEE,
            risk_free_rate: 0.0,
            periods_per_year: DEFAULT_PERIODS_PER_YEAR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "BUY"),
            TradeSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub timestamp: NaiveDateTime,
    pub side: TradeSide,
    pub price: f64,
    pub quantity: f64,
    pub value: f64,
    pub commission: f64,
    pub capital_after: f64,
    pub position_after: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EquityPoint {
    pub timestamp: NaiveDateTime,
    pub portfolio_value: f64,
    pub price: f64,
    pub position: Position,
    pub capital: f64,
    pub shares: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestResult {
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<Trade>,
    pub metrics: Metrics,
}

/// Mutable engine state owned by a single run.
#[derive(Debug)]
struct Engine {
    capital: f64,
    shares: f64,
    held: Position,
    fee: f64,
    trades: Vec<Trade>,
    equity_curve: Vec<EquityPoint>,
    /// Most recent close that was a positive finite price.
    last_price: Option<f64>,
}

fn usable(price: f64) -> bool {
    price.is_finite() && price > 0.0
}

impl Engine {
    fn new(config: &BacktestConfig) -> Self {
        Engine {
            capital: config.initial_capital,
            shares: 0.0,
            held: Position::Flat,
            fee: config.fee,
            trades: Vec::new(),
            equity_curve: Vec::new(),
            last_price: None,
        }
    }

    fn enter_long(&mut self, timestamp: NaiveDateTime, price: f64) {
        let quantity = self.capital / (price * (1.0 + self.fee));
        let value = quantity * price;
        let commission = value * self.fee;

        self.capital = (self.capital - value - commission).max(0.0);
        self.shares = quantity;
        self.held = Position::Long;
        self.record(timestamp, TradeSide::Buy, price, quantity, value, commission);
    }

    fn exit_long(&mut self, timestamp: NaiveDateTime, price: f64) {
        let quantity = self.shares;
        let value = quantity * price;
        let commission = value * self.fee;

        self.capital += value - commission;
        self.shares = 0.0;
        self.held = Position::Flat;
        self.record(timestamp, TradeSide::Sell, price, quantity, value, commission);
    }

    fn record(
        &mut self,
        timestamp: NaiveDateTime,
        side: TradeSide,
        price: f64,
        quantity: f64,
        value: f64,
        commission: f64,
    ) {
        debug!(
            %timestamp,
            %side,
            price,
            quantity,
            value,
            commission,
            capital_after = self.capital,
            "trade"
        );
        self.trades.push(Trade {
            timestamp,
            side,
            price,
            quantity,
            value,
            commission,
            capital_after: self.capital,
            position_after: self.held,
        });
    }

    fn mark(&mut self, timestamp: NaiveDateTime, close: f64) {
        if usable(close) {
            self.last_price = Some(close);
        }
        let price = self.last_price.unwrap_or(close);
        let portfolio_value = if self.shares == 0.0 {
            self.capital
        } else {
            self.capital + self.shares * price
        };
        self.equity_curve.push(EquityPoint {
            timestamp,
            portfolio_value,
            price,
            position: self.held,
            capital: self.capital,
            shares: self.shares,
        });
    }
}

/// Simulate the frame's position sequence bar by bar at closing prices.
///
/// Exactly one equity point is appended per bar. A trade happens only on a
/// bar where the frame's position changes. If that bar's close is not a
/// positive finite price the transition is dropped, not carried to a later
/// bar. Holdings are valued at the last usable close.
pub fn run_backtest(frame: &SignalFrame, config: &BacktestConfig) -> BacktestResult {
    info!(
        bars = frame.len(),
        initial_capital = config.initial_capital,
        fee = config.fee,
        "backtest started"
    );

    let mut engine = Engine::new(config);
    let mut previous = Position::Flat;

    for (bar, &target) in frame.bars.iter().zip(frame.positions.iter()) {
        let price = bar.close;
        let changed = target != previous;
        previous = target;
        if changed && target != engine.held {
            if usable(price) {
                match target {
                    Position::Long => engine.enter_long(bar.timestamp, price),
                    Position::Flat => engine.exit_long(bar.timestamp, price),
                }
            } else {
                warn!(timestamp = %bar.timestamp, price, "dropping transition at unusable price");
            }
        }
        engine.mark(bar.timestamp, price);
    }

    let metrics = Metrics::compute(&engine.equity_curve, &engine.trades, config);

    info!(
        trades = engine.trades.len(),
        final_value = metrics.final_value,
        total_return = metrics.total_return,
        "backtest finished"
    );

    BacktestResult {
        equity_curve: engine.equity_curve,
        trades: engine.trades,
        metrics,
    }
}
