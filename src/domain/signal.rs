//! Discrete trading signals, derived positions, and the per-bar signal frame.
//!
//! Crossing semantics follow the usual rule evaluation conventions:
//! - `cross_above(a, b)` at bar i: `a[i] > b[i]` and `a[i-1] <= b[i-1]`
//! - `cross_below(a, b)` at bar i: `a[i] < b[i]` and `a[i-1] >= b[i-1]`
//! - Both return `false` at index 0 and wherever any of the four values is undefined

use crate::domain::indicator::Series;
use crate::domain::ohlcv::OhlcvBar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Sell,
    Hold,
    Buy,
}

impl Signal {
    /// -1, 0 or +1.
    pub fn value(self) -> i8 {
        match self {
            Signal::Sell => -1,
            Signal::Hold => 0,
            Signal::Buy => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Position {
    Flat,
    Long,
}

impl Position {
    pub fn value(self) -> u8 {
        match self {
            Position::Flat => 0,
            Position::Long => 1,
        }
    }
}

/// Price bars augmented with indicator columns, signals, and positions.
///
/// Construction through [`SignalFrame::new`] guarantees the frame invariants:
/// every column has one value per bar, no two consecutive non-Hold signals
/// share a sign, `positions[0]` is Flat, and positions only change on a
/// non-Hold signal.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalFrame {
    pub bars: Vec<OhlcvBar>,
    pub columns: Vec<(String, Series)>,
    pub signals: Vec<Signal>,
    pub positions: Vec<Position>,
}

impl SignalFrame {
    pub fn new(bars: Vec<OhlcvBar>, columns: Vec<(String, Series)>, raw: &[Signal]) -> Self {
        let n = bars.len();
        let columns = columns
            .into_iter()
            .map(|(name, mut values)| {
                values.resize(n, None);
                (name, values)
            })
            .collect();

        let signals = enforce_alternation(raw, n);
        let positions = derive_positions(&signals);

        SignalFrame {
            bars,
            columns,
            signals,
            positions,
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&Series> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values)
    }

    pub fn position_changes(&self) -> usize {
        let mut prev = Position::Flat;
        let mut changes = 0;
        for &p in &self.positions {
            if p != prev {
                changes += 1;
            }
            prev = p;
        }
        changes
    }
}

/// Run raw signals through the Flat/Long state machine.
///
/// Buy survives only while Flat and Sell only while Long; everything else
/// becomes Hold. Bar 0 is always Hold so that the first position is Flat.
pub fn enforce_alternation(raw: &[Signal], len: usize) -> Vec<Signal> {
    let mut out = Vec::with_capacity(len);
    let mut state = Position::Flat;

    for i in 0..len {
        let signal = if i == 0 {
            Signal::Hold
        } else {
            raw.get(i).copied().unwrap_or(Signal::Hold)
        };
        let accepted = match (signal, state) {
            (Signal::Buy, Position::Flat) => {
                state = Position::Long;
                Signal::Buy
            }
            (Signal::Sell, Position::Long) => {
                state = Position::Flat;
                Signal::Sell
            }
            _ => Signal::Hold,
        };
        out.push(accepted);
    }
    out
}

/// Forward-fill positions from signals, starting Flat.
pub fn derive_positions(signals: &[Signal]) -> Vec<Position> {
    let mut state = Position::Flat;
    signals
        .iter()
        .enumerate()
        .map(|(i, s)| {
            if i > 0 {
                match s {
                    Signal::Buy => state = Position::Long,
                    Signal::Sell => state = Position::Flat,
                    Signal::Hold => {}
                }
            }
            state
        })
        .collect()
}

fn pair_at(left: &[Option<f64>], right: &[Option<f64>], i: usize) -> Option<(f64, f64, f64, f64)> {
    if i == 0 || i >= left.len() || i >= right.len() {
        return None;
    }
    match (left[i - 1], right[i - 1], left[i], right[i]) {
        (Some(lp), Some(rp), Some(lc), Some(rc)) => Some((lp, rp, lc, rc)),
        _ => None,
    }
}

pub fn cross_above(left: &[Option<f64>], right: &[Option<f64>], i: usize) -> bool {
    pair_at(left, right, i).is_some_and(|(lp, rp, lc, rc)| lc > rc && lp <= rp)
}

pub fn cross_below(left: &[Option<f64>], right: &[Option<f64>], i: usize) -> bool {
    pair_at(left, right, i).is_some_and(|(lp, rp, lc, rc)| lc < rc && lp >= rp)
}

/// A constant series, for crossing against a fixed level.
pub fn level(value: f64, len: usize) -> Series {
    vec![Some(value); len]
}

/// Buy where `buy_when` holds, else Sell where `sell_when` holds, else Hold.
pub fn signals_from<B, S>(len: usize, buy_when: B, sell_when: S) -> Vec<Signal>
where
    B: Fn(usize) -> bool,
    S: Fn(usize) -> bool,
{
    (0..len)
        .map(|i| {
            if buy_when(i) {
                Signal::Buy
            } else if sell_when(i) {
                Signal::Sell
            } else {
                Signal::Hold
            }
        })
        .collect()
}
