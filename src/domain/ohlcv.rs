//! OHLCV bar representation.

use chrono::NaiveDateTime;

use crate::domain::error::TradelabError;

#[derive(Debug, Clone, PartialEq)]
pub struct OhlcvBar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<f64>,
}

/// Closing prices as a series with every position defined.
pub fn closes(bars: &[OhlcvBar]) -> Vec<Option<f64>> {
    bars.iter().map(|b| Some(b.close)).collect()
}

/// Timestamps must be strictly increasing within a series.
pub fn check_ordered(bars: &[OhlcvBar]) -> Result<(), TradelabError> {
    for pair in bars.windows(2) {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err(TradelabError::Data {
                reason: format!(
                    "bars are not strictly increasing: {} follows {}",
                    pair[1].timestamp, pair[0].timestamp
                ),
            });
        }
    }
    Ok(())
}
