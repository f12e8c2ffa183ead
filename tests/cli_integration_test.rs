//! CLI integration tests for config loading and the backtest command.
//!
//! Tests cover:
//! - Config parsing (build_backtest_config, build_limits, build_strategy)
//! - Data request resolution with command-line overrides
//! - Custom indicator scripts referenced from INI files on disk
//! - Full pipeline over CSV data in a temp directory

mod common;

use clap::Parser;
use common::*;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tradelab::adapters::csv_adapter::CsvAdapter;
use tradelab::adapters::file_config_adapter::FileConfigAdapter;
use tradelab::cli::{self, Cli, Command};
use tradelab::domain::backtest::BacktestConfig;
use tradelab::domain::config_validation::{validate_backtest_config, validate_strategy_config};
use tradelab::domain::error::TradelabError;
use tradelab::domain::sandbox::{ParamValue, ValidationErrorKind};
use tradelab::domain::strategy::Strategy;

const VALID_INI: &str = r#"
[backtest]
initial_capital = 50000
fee = 0.002
risk_free_rate = 0.03
periods_per_year = 252
symbol = bhp
exchange = asx
start_date = 2024-01-01
end_date = 2024-12-31

[strategy]
name = sma_crossover
description = Fast/slow crossover
fast_window = 5
slow_window = 15

[sandbox]
max_steps = 5000
timeout_ms = 250
"#;

const SCORE_SCRIPT: &str = r#"
import ta

# distance of close from its moving average
def score(data, params) {
    return data.close - ta.sma(data.close, get(params, "window", 10))
}
"#;

fn config(content: &str) -> FileConfigAdapter {
    FileConfigAdapter::from_string(content).unwrap()
}

mod config_loading {
    use super::*;

    #[test]
    fn backtest_config_from_ini() {
        let cfg = cli::build_backtest_config(&config(VALID_INI));
        assert_eq!(cfg.initial_capital, 50000.0);
        assert_eq!(cfg.fee, 0.002);
        assert_eq!(cfg.risk_free_rate, 0.03);
        assert_eq!(cfg.periods_per_year, 252.0);
    }

    #[test]
    fn backtest_config_defaults() {
        let cfg = cli::build_backtest_config(&config("[backtest]\nsymbol = X\n"));
        assert_eq!(cfg, BacktestConfig::default());
    }

    #[test]
    fn limits_fall_back_to_defaults() {
        let limits = cli::build_limits(&config(VALID_INI));
        assert_eq!(limits.max_steps, 5000);
        assert_eq!(limits.timeout, Duration::from_millis(250));
        assert_eq!(limits.max_call_depth, 64);
    }

    #[test]
    fn data_request_uppercases_and_parses_dates() {
        let req = cli::build_data_request(&config(VALID_INI), None, None).unwrap();
        assert_eq!(req.symbol, "BHP");
        assert_eq!(req.exchange, "ASX");
        assert_eq!(req.start_date.unwrap().to_string(), "2024-01-01");
        assert_eq!(req.end_date.unwrap().to_string(), "2024-12-31");
    }

    #[test]
    fn data_request_overrides_win() {
        let req = cli::build_data_request(&config(VALID_INI), Some("cba"), None).unwrap();
        assert_eq!(req.symbol, "CBA");
        assert_eq!(req.exchange, "ASX");
    }

    #[test]
    fn data_request_without_symbol_fails() {
        let err = cli::build_data_request(&config("[backtest]\nexchange = ASX\n"), None, None)
            .unwrap_err();
        assert!(matches!(err, TradelabError::ConfigMissing { key, .. } if key == "symbol"));
    }

    #[test]
    fn valid_ini_passes_validation() {
        let cfg = config(VALID_INI);
        validate_backtest_config(&cfg).unwrap();
        validate_strategy_config(&cfg).unwrap();
    }

    #[test]
    fn missing_config_file_is_parse_error() {
        let err = cli::load_config(Path::new("/nonexistent/tradelab.ini")).unwrap_err();
        assert!(matches!(err, TradelabError::ConfigParse { .. }));
    }
}

mod strategy_building {
    use super::*;

    #[test]
    fn builtin_strategy_from_ini() {
        let strategy = cli::build_strategy(&config(VALID_INI), Path::new(".")).unwrap();
        assert_eq!(
            strategy,
            Strategy::SmaCrossover {
                fast_window: 5,
                slow_window: 15
            }
        );
    }

    #[test]
    fn non_numeric_strategy_param_is_rejected() {
        let ini = "[strategy]\nname = rsi\nperiod = fourteen\n";
        let err = cli::build_strategy(&config(ini), Path::new(".")).unwrap_err();
        assert!(matches!(err, TradelabError::ConfigInvalid { key, .. } if key == "period"));
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let err = cli::build_strategy(&config("[strategy]\nname = turtle\n"), Path::new("."))
            .unwrap_err();
        assert!(matches!(err, TradelabError::UnknownStrategy { .. }));
    }

    #[test]
    fn custom_strategy_reads_script_relative_to_config() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(dir.path().join("score.tl"), SCORE_SCRIPT).unwrap();
        let ini = "[strategy]\nname = custom\n\n[custom]\nscript = score.tl\nbuy_threshold = 0.5\n\
                   sell_threshold = -0.5\nparam.window = 7\nparam.label = fast\n";

        let strategy = cli::build_strategy(&config(ini), dir.path()).unwrap();
        let Strategy::Custom(custom) = strategy else {
            panic!("expected custom strategy");
        };
        assert_eq!(custom.function, "score");
        assert_eq!(custom.buy_threshold, 0.5);
        assert_eq!(custom.sell_threshold, -0.5);
        assert_eq!(custom.params.get("window"), Some(&ParamValue::Number(7.0)));
        assert_eq!(
            custom.params.get("label"),
            Some(&ParamValue::Text("fast".to_string()))
        );
    }

    #[test]
    fn custom_strategy_with_forbidden_script_fails_validation() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(
            dir.path().join("bad.tl"),
            "import numpy\ndef score(data, params) {\n  return data.close\n}\n",
        )
        .unwrap();
        let ini = "[strategy]\nname = custom\n\n[custom]\nscript = bad.tl\n";
        let err = cli::build_strategy(&config(ini), dir.path()).unwrap_err();
        match err {
            TradelabError::Validation(v) => assert_eq!(v.kind, ValidationErrorKind::ForbiddenImport),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn custom_strategy_with_wrong_entry_fails_signature_check() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(dir.path().join("score.tl"), SCORE_SCRIPT).unwrap();
        let ini = "[strategy]\nname = custom\n\n[custom]\nscript = score.tl\nfunction = rank\n";
        let err = cli::build_strategy(&config(ini), dir.path()).unwrap_err();
        assert!(matches!(
            err,
            TradelabError::Validation(ref v) if v.kind == ValidationErrorKind::Signature
        ));
    }

    #[test]
    fn custom_strategy_missing_script_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let ini = "[strategy]\nname = custom\n\n[custom]\nscript = missing.tl\n";
        let err = cli::build_strategy(&config(ini), dir.path()).unwrap_err();
        assert!(err.to_string().contains("missing.tl"));
    }
}

mod params {
    use super::*;

    #[test]
    fn param_values_are_typed() {
        assert_eq!(cli::parse_param_value("3.5"), ParamValue::Number(3.5));
        assert_eq!(cli::parse_param_value("TRUE"), ParamValue::Bool(true));
        assert_eq!(
            cli::parse_param_value(" close "),
            ParamValue::Text("close".to_string())
        );
    }

    #[test]
    fn cli_params_need_equals_sign() {
        let ok = cli::parse_cli_params(&["window=5".to_string()]).unwrap();
        assert_eq!(ok.get("window"), Some(&ParamValue::Number(5.0)));
        assert!(cli::parse_cli_params(&["window".to_string()]).is_err());
        assert!(cli::parse_cli_params(&["=5".to_string()]).is_err());
    }
}

mod command_line {
    use super::*;

    #[test]
    fn parses_backtest_subcommand() {
        let cli = Cli::try_parse_from([
            "tradelab", "-v", "backtest", "--config", "run.ini", "--output", "out", "--dry-run",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Command::Backtest {
                config,
                output,
                dry_run,
                symbol,
                ..
            } => {
                assert_eq!(config.to_str(), Some("run.ini"));
                assert_eq!(output.unwrap().to_str(), Some("out"));
                assert!(dry_run);
                assert!(symbol.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn score_collects_repeated_params() {
        let cli = Cli::try_parse_from([
            "tradelab", "score", "--script", "s.tl", "--symbol", "BHP", "--exchange", "ASX", "-p",
            "a=1", "-p", "b=2",
        ])
        .unwrap();
        match cli.command {
            Command::Score {
                params, function, ..
            } => {
                assert_eq!(params, vec!["a=1", "b=2"]);
                assert_eq!(function, "score");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn backtest_requires_config() {
        assert!(Cli::try_parse_from(["tradelab", "backtest"]).is_err());
    }
}

mod file_pipeline {
    use super::*;

    #[test]
    fn csv_data_through_pipeline() {
        let dir = tempfile::TempDir::new().unwrap();
        write_csv(dir.path(), "BHP", "ASX", &wave_bars(120, 40.0, 4.0, 30.0));
        let ini = "[backtest]\nsymbol = BHP\nexchange = ASX\n\n[strategy]\nname = macd\n";
        let adapter = config(ini);

        let request = cli::build_data_request(&adapter, None, None).unwrap();
        let strategy = cli::build_strategy(&adapter, dir.path()).unwrap();
        let port = CsvAdapter::new(dir.path().to_path_buf());
        let out_dir = dir.path().join("out");
        let out = cli::run_backtest_pipeline(
            &port,
            &strategy,
            &cli::build_backtest_config(&adapter),
            &request,
            Some(&out_dir),
        )
        .unwrap();

        assert_eq!(out.frame.len(), 120);
        assert!(out.frame.column("MACD_Hist").is_some());
        assert!(out_dir.join("equity.csv").exists());

        let summary = cli::format_summary(&strategy, &request, &out.result.metrics);
        assert!(summary.starts_with("=== macd on BHP.ASX ==="));
        assert!(summary.contains("Sharpe Ratio:"));
    }

    #[test]
    fn score_command_writes_value_csv() {
        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("score.tl");
        fs::write(&script, SCORE_SCRIPT).unwrap();
        let port = MockDataPort::new().with_bars("BHP", rising_bars(12, 10.0, 1.0));
        let out = dir.path().join("score.csv");

        cli::run_score(
            &script,
            "score",
            &port,
            "BHP",
            "ASX",
            &["window=3".to_string()],
            Some(&out),
        )
        .unwrap();

        let text = fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 13);
        assert_eq!(lines[0], "timestamp,value");
        assert_eq!(lines[1], "2024-01-01 00:00:00,");
        // close 12, mean of 10,11,12 is 11
        assert_eq!(lines[3], "2024-01-03 00:00:00,1");
    }

    #[test]
    fn score_command_on_missing_symbol_is_no_data() {
        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("score.tl");
        fs::write(&script, SCORE_SCRIPT).unwrap();
        let err = cli::run_score(&script, "score", &MockDataPort::new(), "XYZ", "ASX", &[], None)
            .unwrap_err();
        assert!(matches!(err, TradelabError::NoData { .. }));
    }
}
