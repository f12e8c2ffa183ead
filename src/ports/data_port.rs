//! Price data port trait.

use crate::domain::error::TradelabError;
use crate::domain::ohlcv::OhlcvBar;
use chrono::NaiveDate;

/// Supplies time-ordered, deduplicated bars for a (symbol, exchange) key.
pub trait DataPort {
    /// Bars whose date falls within the inclusive range; an open bound is unbounded.
    fn fetch_ohlcv(
        &self,
        symbol: &str,
        exchange: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<OhlcvBar>, TradelabError>;

    fn list_symbols(&self, exchange: &str) -> Result<Vec<String>, TradelabError>;

    /// First date, last date and bar count, or `None` when there is no data.
    fn get_data_range(
        &self,
        symbol: &str,
        exchange: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, TradelabError>;
}
