//! CSV export of signal frames, equity curves and trade logs.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::domain::backtest::{BacktestResult, EquityPoint, Trade};
use crate::domain::error::TradelabError;
use crate::domain::sandbox::ValueSeries;
use crate::domain::signal::SignalFrame;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn csv_err(e: csv::Error) -> TradelabError {
    match e.into_kind() {
        csv::ErrorKind::Io(io) => TradelabError::Io(io),
        other => TradelabError::Data {
            reason: format!("CSV write error: {:?}", other),
        },
    }
}

fn opt(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

pub fn write_equity_curve<W: Write>(out: W, curve: &[EquityPoint]) -> Result<(), TradelabError> {
    let mut w = csv::Writer::from_writer(out);
    w.write_record(["timestamp", "portfolio_value", "price", "position", "capital", "shares"])
        .map_err(csv_err)?;
    for p in curve {
        w.write_record([
            p.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            p.portfolio_value.to_string(),
            p.price.to_string(),
            p.position.value().to_string(),
            p.capital.to_string(),
            p.shares.to_string(),
        ])
        .map_err(csv_err)?;
    }
    w.flush()?;
    Ok(())
}

pub fn write_trades<W: Write>(out: W, trades: &[Trade]) -> Result<(), TradelabError> {
    let mut w = csv::Writer::from_writer(out);
    w.write_record([
        "timestamp",
        "side",
        "price",
        "quantity",
        "value",
        "commission",
        "capital_after",
        "position_after",
    ])
    .map_err(csv_err)?;
    for t in trades {
        w.write_record([
            t.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            t.side.to_string(),
            t.price.to_string(),
            t.quantity.to_string(),
            t.value.to_string(),
            t.commission.to_string(),
            t.capital_after.to_string(),
            t.position_after.value().to_string(),
        ])
        .map_err(csv_err)?;
    }
    w.flush()?;
    Ok(())
}

/// One row per bar: close, every indicator column, signal and position.
pub fn write_signals<W: Write>(out: W, frame: &SignalFrame) -> Result<(), TradelabError> {
    let mut w = csv::Writer::from_writer(out);
    let mut header = vec!["timestamp".to_string(), "close".to_string()];
    header.extend(frame.columns.iter().map(|(name, _)| name.clone()));
    header.push("signal".to_string());
    header.push("position".to_string());
    w.write_record(&header).map_err(csv_err)?;

    for (i, bar) in frame.bars.iter().enumerate() {
        let mut row = vec![
            bar.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            bar.close.to_string(),
        ];
        row.extend(frame.columns.iter().map(|(_, s)| opt(s.get(i).copied().flatten())));
        row.push(frame.signals[i].value().to_string());
        row.push(frame.positions[i].value().to_string());
        w.write_record(&row).map_err(csv_err)?;
    }
    w.flush()?;
    Ok(())
}

/// Custom indicator output as `timestamp,value`.
pub fn write_value_series<W: Write>(out: W, series: &ValueSeries) -> Result<(), TradelabError> {
    let mut w = csv::Writer::from_writer(out);
    w.write_record(["timestamp", "value"]).map_err(csv_err)?;
    for (ts, v) in series.index.iter().zip(series.values.iter()) {
        w.write_record([ts.format(TIMESTAMP_FORMAT).to_string(), opt(*v)])
            .map_err(csv_err)?;
    }
    w.flush()?;
    Ok(())
}

/// Write `signals.csv`, `equity.csv` and `trades.csv` into `dir`.
pub fn export_run(
    dir: &Path,
    frame: &SignalFrame,
    result: &BacktestResult,
) -> Result<Vec<PathBuf>, TradelabError> {
    std::fs::create_dir_all(dir)?;
    let signals = dir.join("signals.csv");
    let equity = dir.join("equity.csv");
    let trades = dir.join("trades.csv");
    write_signals(File::create(&signals)?, frame)?;
    write_equity_curve(File::create(&equity)?, &result.equity_curve)?;
    write_trades(File::create(&trades)?, &result.trades)?;
    info!(dir = %dir.display(), "exported run");
    Ok(vec![signals, equity, trades])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::backtest::{BacktestConfig, run_backtest};
    use crate::domain::ohlcv::OhlcvBar;
    use crate::domain::signal::Signal;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn frame() -> SignalFrame {
        let bars: Vec<OhlcvBar> = [10.0, 11.0, 12.0, 11.0]
            .iter()
            .enumerate()
            .map(|(i, c)| OhlcvBar {
                timestamp: NaiveDate::from_ymd_opt(2024, 1, 1 + i as u32)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap(),
                open: *c,
                high: *c,
                low: *c,
                close: *c,
                volume: None,
            })
            .collect();
        let raw = [Signal::Hold, Signal::Buy, Signal::Hold, Signal::Sell];
        SignalFrame::new(bars, vec![("Score".to_string(), vec![None, Some(1.0)])], &raw)
    }

    #[test]
    fn signals_csv_has_column_per_indicator() {
        let mut buf = Vec::new();
        write_signals(&mut buf, &frame()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "timestamp,close,Score,signal,position");
        assert_eq!(lines[1], "2024-01-01 00:00:00,10,,0,0");
        assert_eq!(lines[2], "2024-01-02 00:00:00,11,1,1,1");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn trades_csv_lists_each_trade() {
        let f = frame();
        let result = run_backtest(&f, &BacktestConfig::default());
        let mut buf = Vec::new();
        write_trades(&mut buf, &result.trades).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 1 + result.trades.len());
        assert!(text.lines().nth(1).unwrap().contains(",BUY,"));
    }

    #[test]
    fn value_series_leaves_missing_blank() {
        let f = frame();
        let series = ValueSeries {
            index: f.bars.iter().take(2).map(|b| b.timestamp).collect(),
            values: vec![None, Some(2.5)],
        };
        let mut buf = Vec::new();
        write_value_series(&mut buf, &series).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            "timestamp,value\n2024-01-01 00:00:00,\n2024-01-02 00:00:00,2.5\n"
        );
    }

    #[test]
    fn export_run_writes_three_files() {
        let dir = TempDir::new().unwrap();
        let f = frame();
        let result = run_backtest(&f, &BacktestConfig::default());
        let paths = export_run(&dir.path().join("out"), &f, &result).unwrap();
        assert_eq!(paths.len(), 3);
        for p in &paths {
            assert!(p.exists());
        }
        let equity = std::fs::read_to_string(&paths[1]).unwrap();
        assert_eq!(equity.lines().count(), 5);
    }
}
