#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::io::Write;
use tradelab::domain::error::TradelabError;
pub use tradelab::domain::ohlcv::OhlcvBar;
use tradelab::ports::data_port::DataPort;

pub struct MockDataPort {
    pub data: HashMap<String, Vec<OhlcvBar>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<OhlcvBar>) -> Self {
        self.data.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_ohlcv(
        &self,
        symbol: &str,
        exchange: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<OhlcvBar>, TradelabError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(TradelabError::Data {
                reason: reason.clone(),
            });
        }
        let bars = self
            .data
            .get(symbol)
            .ok_or_else(|| TradelabError::NoData {
                symbol: symbol.to_string(),
                exchange: exchange.to_string(),
            })?;
        Ok(bars
            .iter()
            .filter(|b| {
                let d = b.timestamp.date();
                start_date.is_none_or(|s| d >= s) && end_date.is_none_or(|e| d <= e)
            })
            .cloned()
            .collect())
    }

    fn list_symbols(&self, _exchange: &str) -> Result<Vec<String>, TradelabError> {
        let mut symbols: Vec<String> = self.data.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }

    fn get_data_range(
        &self,
        symbol: &str,
        _exchange: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, TradelabError> {
        match self.data.get(symbol) {
            Some(bars) if !bars.is_empty() => {
                let min = bars.iter().map(|b| b.timestamp.date()).min().unwrap();
                let max = bars.iter().map(|b| b.timestamp.date()).max().unwrap();
                Ok(Some((min, max, bars.len())))
            }
            _ => Ok(None),
        }
    }
}

pub fn day(offset: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + chrono::Duration::days(offset)
}

pub fn make_bar(offset: i64, close: f64) -> OhlcvBar {
    OhlcvBar {
        timestamp: day(offset),
        open: close,
        high: close * 1.01,
        low: close * 0.99,
        close,
        volume: Some(1000.0),
    }
}

pub fn bars_from_closes(closes: &[f64]) -> Vec<OhlcvBar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, c)| make_bar(i as i64, *c))
        .collect()
}

/// Linear ramp from `start` by `step` per bar.
pub fn rising_bars(n: usize, start: f64, step: f64) -> Vec<OhlcvBar> {
    let closes: Vec<f64> = (0..n).map(|i| start + step * i as f64).collect();
    bars_from_closes(&closes)
}

/// Sine wave around `base`, long enough to produce several crossovers.
pub fn wave_bars(n: usize, base: f64, amplitude: f64, period: f64) -> Vec<OhlcvBar> {
    let closes: Vec<f64> = (0..n)
        .map(|i| base + amplitude * (i as f64 * 2.0 * std::f64::consts::PI / period).sin())
        .collect();
    bars_from_closes(&closes)
}

pub fn write_temp_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

/// Write bars as `{symbol}_{exchange}.csv` under `dir`.
pub fn write_csv(dir: &std::path::Path, symbol: &str, exchange: &str, bars: &[OhlcvBar]) {
    let mut content = String::from("timestamp,open,high,low,close,volume\n");
    for b in bars {
        content.push_str(&format!(
            "{},{},{},{},{},{}\n",
            b.timestamp.format("%Y-%m-%d"),
            b.open,
            b.high,
            b.low,
            b.close,
            b.volume.unwrap_or(0.0)
        ));
    }
    std::fs::write(dir.join(format!("{}_{}.csv", symbol, exchange)), content).unwrap();
}
