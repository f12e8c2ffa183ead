//! CSV file data adapter.
//!
//! One file per instrument, `{symbol}_{exchange}.csv`, with a header row and
//! columns `timestamp,open,high,low,close[,volume]`.

use crate::domain::error::TradelabError;
use crate::domain::ohlcv::OhlcvBar;
use crate::ports::data_port::DataPort;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::fs;
use std::path::PathBuf;
use tracing::debug;

pub struct CsvAdapter {
    base_path: PathBuf,
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS` and RFC 3339.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(dt);
    }
    DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_utc())
}

fn data_err(reason: String) -> TradelabError {
    TradelabError::Data { reason }
}

fn field(record: &csv::StringRecord, idx: usize, name: &str, line: u64) -> Result<f64, TradelabError> {
    let raw = record
        .get(idx)
        .ok_or_else(|| data_err(format!("line {}: missing {} column", line, name)))?;
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|e| data_err(format!("line {}: invalid {} value '{}': {}", line, name, raw, e)))?;
    if !value.is_finite() {
        return Err(data_err(format!("line {}: {} value '{}' is not finite", line, name, raw)));
    }
    Ok(value)
}

/// Prices must be strictly positive; volume may be zero.
fn price(record: &csv::StringRecord, idx: usize, name: &str, line: u64) -> Result<f64, TradelabError> {
    let value = field(record, idx, name, line)?;
    if value <= 0.0 {
        return Err(data_err(format!("line {}: {} must be positive, got {}", line, name, value)));
    }
    Ok(value)
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str, exchange: &str) -> PathBuf {
        self.base_path.join(format!("{}_{}.csv", symbol, exchange))
    }

    fn read_all(&self, symbol: &str, exchange: &str) -> Result<Vec<OhlcvBar>, TradelabError> {
        let path = self.csv_path(symbol, exchange);
        if !path.exists() {
            return Err(TradelabError::NoData {
                symbol: symbol.to_string(),
                exchange: exchange.to_string(),
            });
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| data_err(format!("failed to read {}: {}", path.display(), e)))?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut bars = Vec::new();

        for result in rdr.records() {
            let record = result.map_err(|e| data_err(format!("CSV parse error: {}", e)))?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);

            let ts_str = record
                .get(0)
                .ok_or_else(|| data_err(format!("line {}: missing timestamp column", line)))?;
            let timestamp = parse_timestamp(ts_str)
                .ok_or_else(|| data_err(format!("line {}: invalid timestamp '{}'", line, ts_str)))?;

            let volume = match record.get(5).map(str::trim) {
                None | Some("") => None,
                Some(_) => {
                    let v = field(&record, 5, "volume", line)?;
                    if v < 0.0 {
                        return Err(data_err(format!(
                            "line {}: volume must not be negative, got {}",
                            line, v
                        )));
                    }
                    Some(v)
                }
            };

            bars.push(OhlcvBar {
                timestamp,
                open: price(&record, 1, "open", line)?,
                high: price(&record, 2, "high", line)?,
                low: price(&record, 3, "low", line)?,
                close: price(&record, 4, "close", line)?,
                volume,
            });
        }

        bars.sort_by_key(|b| b.timestamp);
        if let Some(pair) = bars.windows(2).find(|w| w[0].timestamp == w[1].timestamp) {
            return Err(data_err(format!(
                "duplicate timestamp {} in {}",
                pair[0].timestamp,
                path.display()
            )));
        }
        debug!(symbol, exchange, bars = bars.len(), "loaded csv");
        Ok(bars)
    }
}

impl DataPort for CsvAdapter {
    fn fetch_ohlcv(
        &self,
        symbol: &str,
        exchange: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<OhlcvBar>, TradelabError> {
        let mut bars = self.read_all(symbol, exchange)?;
        bars.retain(|b| {
            let date = b.timestamp.date();
            start_date.is_none_or(|s| date >= s) && end_date.is_none_or(|e| date <= e)
        });
        Ok(bars)
    }

    fn list_symbols(&self, exchange: &str) -> Result<Vec<String>, TradelabError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| {
            data_err(format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ))
        })?;

        let suffix = format!("_{}.csv", exchange);
        let mut symbols = Vec::new();

        for entry in entries {
            let entry = entry.map_err(|e| data_err(format!("directory entry error: {}", e)))?;

            let name = entry.file_name();
            let name_str = name.to_string_lossy();

            if let Some(symbol) = name_str.strip_suffix(&suffix) {
                symbols.push(symbol.to_string());
            }
        }

        symbols.sort();
        Ok(symbols)
    }

    fn get_data_range(
        &self,
        symbol: &str,
        exchange: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, TradelabError> {
        let bars = match self.read_all(symbol, exchange) {
            Ok(bars) => bars,
            Err(TradelabError::NoData { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(match (bars.first(), bars.last()) {
            (Some(first), Some(last)) => Some((
                first.timestamp.date(),
                last.timestamp.date(),
                bars.len(),
            )),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_data() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();

        let csv_content = "timestamp,open,high,low,close,volume\n\
            2024-01-17,110.0,120.0,105.0,115.0,55000\n\
            2024-01-15,100.0,110.0,90.0,105.0,50000\n\
            2024-01-16,105.0,115.0,100.0,110.0,\n";

        fs::write(path.join("BHP_ASX.csv"), csv_content).unwrap();
        fs::write(path.join("CBA_ASX.csv"), "timestamp,open,high,low,close,volume\n").unwrap();
        fs::write(path.join("AAPL_NYSE.csv"), "timestamp,open,high,low,close\n").unwrap();

        (dir, path)
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn fetch_ohlcv_returns_sorted_data() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let bars = adapter.fetch_ohlcv("BHP", "ASX", None, None).unwrap();

        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].timestamp.date(), date(15));
        assert_eq!(bars[0].open, 100.0);
        assert_eq!(bars[0].close, 105.0);
        assert_eq!(bars[0].volume, Some(50000.0));
        assert_eq!(bars[1].volume, None);
    }

    #[test]
    fn fetch_ohlcv_filters_by_date() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let bars = adapter
            .fetch_ohlcv("BHP", "ASX", Some(date(16)), Some(date(16)))
            .unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].timestamp.date(), date(16));

        let bars = adapter.fetch_ohlcv("BHP", "ASX", Some(date(16)), None).unwrap();
        assert_eq!(bars.len(), 2);
    }

    #[test]
    fn fetch_ohlcv_missing_file_is_no_data() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let result = adapter.fetch_ohlcv("XYZ", "ASX", None, None);
        assert!(matches!(result, Err(TradelabError::NoData { .. })));
    }

    #[test]
    fn fetch_ohlcv_rejects_duplicate_timestamps() {
        let (_dir, path) = setup_test_data();
        fs::write(
            path.join("DUP_ASX.csv"),
            "timestamp,open,high,low,close\n2024-01-15,1,1,1,1\n2024-01-15,2,2,2,2\n",
        )
        .unwrap();
        let adapter = CsvAdapter::new(path);
        let err = adapter.fetch_ohlcv("DUP", "ASX", None, None).unwrap_err();
        assert!(err.to_string().contains("duplicate timestamp"));
    }

    #[test]
    fn fetch_ohlcv_reports_bad_values() {
        let (_dir, path) = setup_test_data();
        fs::write(
            path.join("BAD_ASX.csv"),
            "timestamp,open,high,low,close\n2024-01-15,1,1,1,abc\n",
        )
        .unwrap();
        let adapter = CsvAdapter::new(path);
        let err = adapter.fetch_ohlcv("BAD", "ASX", None, None).unwrap_err();
        assert!(err.to_string().contains("invalid close value"));
    }

    #[test]
    fn fetch_ohlcv_rejects_unusable_prices() {
        let (_dir, path) = setup_test_data();
        let cases = [
            ("NAN", "2024-01-15,1,1,1,NaN\n", "close value 'NaN' is not finite"),
            ("INF", "2024-01-15,1,inf,1,1\n", "high value 'inf' is not finite"),
            ("ZERO", "2024-01-15,1,1,0,1\n", "low must be positive"),
            ("NEG", "2024-01-15,-2,1,1,1\n", "open must be positive"),
            ("VOL", "2024-01-15,1,1,1,1,-5\n", "volume must not be negative"),
        ];
        for (symbol, row, _) in cases {
            fs::write(
                path.join(format!("{}_ASX.csv", symbol)),
                format!("timestamp,open,high,low,close,volume\n{}", row),
            )
            .unwrap();
        }
        let adapter = CsvAdapter::new(path.clone());
        for (symbol, _, expected) in cases {
            let err = adapter.fetch_ohlcv(symbol, "ASX", None, None).unwrap_err();
            assert!(err.to_string().contains(expected), "{}: {}", symbol, err);
        }

        fs::write(
            path.join("QUIET_ASX.csv"),
            "timestamp,open,high,low,close,volume\n2024-01-15,1,1,1,1,0\n",
        )
        .unwrap();
        let bars = CsvAdapter::new(path).fetch_ohlcv("QUIET", "ASX", None, None).unwrap();
        assert_eq!(bars[0].volume, Some(0.0));
    }

    #[test]
    fn list_symbols_returns_exchange_symbols() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        assert_eq!(adapter.list_symbols("ASX").unwrap(), vec!["BHP", "CBA"]);
        assert_eq!(adapter.list_symbols("NYSE").unwrap(), vec!["AAPL"]);
    }

    #[test]
    fn get_data_range_reports_bounds() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        assert_eq!(
            adapter.get_data_range("BHP", "ASX").unwrap(),
            Some((date(15), date(17), 3))
        );
        assert_eq!(adapter.get_data_range("CBA", "ASX").unwrap(), None);
        assert_eq!(adapter.get_data_range("XYZ", "ASX").unwrap(), None);
    }

    #[test]
    fn parse_timestamp_formats() {
        let midnight = date(15).and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-15"), Some(midnight));
        assert_eq!(
            parse_timestamp("2024-01-15 09:30:00"),
            date(15).and_hms_opt(9, 30, 0)
        );
        assert_eq!(
            parse_timestamp("2024-01-15T10:00:00+01:00"),
            date(15).and_hms_opt(9, 0, 0)
        );
        assert_eq!(parse_timestamp("15/01/2024"), None);
    }
}
