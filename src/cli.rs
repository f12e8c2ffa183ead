//! CLI definition and dispatch.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_export;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::backtest::{self as backtest_engine, BacktestConfig, BacktestResult};
use crate::domain::config_validation::{
    CUSTOM_PARAM_PREFIX, STRATEGY_META_KEYS, parse_date, validate_backtest_config,
    validate_sandbox_config, validate_strategy_config,
};
use crate::domain::error::TradelabError;
use crate::domain::metrics::Metrics;
use crate::domain::sandbox::{
    self, DEFAULT_MAX_CALL_DEPTH, DEFAULT_MAX_ELEMENTS, DEFAULT_MAX_STEPS, DEFAULT_TIMEOUT_MS,
    DataTable, ExecutionLimits, ParamValue, Params,
};
use crate::domain::signal::SignalFrame;
use crate::domain::strategy::{CustomStrategy, Strategy, StrategyParams};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;

#[derive(Parser, Debug)]
#[command(name = "tradelab", about = "Signal-driven strategy backtester")]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Directory for signals.csv, equity.csv and trades.csv
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Replace the configured symbol
        #[arg(long)]
        symbol: Option<String>,
        /// Replace the configured exchange
        #[arg(long)]
        exchange: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate a custom indicator script
    Validate {
        #[arg(short, long)]
        script: PathBuf,
        #[arg(short, long, default_value = "score")]
        function: String,
    },
    /// Run a custom indicator over price data and print its values
    Score {
        #[arg(short, long)]
        script: PathBuf,
        #[arg(short, long, default_value = "score")]
        function: String,
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        exchange: String,
        #[arg(long, default_value = ".")]
        data_dir: PathBuf,
        /// Parameter passed to the script, as name=value (repeatable)
        #[arg(short, long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List available symbols on an exchange
    ListSymbols {
        #[arg(long)]
        exchange: String,
        #[arg(long, default_value = ".")]
        data_dir: PathBuf,
    },
    /// Show data range for a symbol
    Info {
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        exchange: String,
        #[arg(long, default_value = ".")]
        data_dir: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Backtest {
            config,
            output,
            symbol,
            exchange,
            dry_run,
        } => run_backtest(
            &config,
            output.as_deref(),
            symbol.as_deref(),
            exchange.as_deref(),
            dry_run,
        ),
        Command::Validate { script, function } => run_validate(&script, &function),
        Command::Score {
            script,
            function,
            symbol,
            exchange,
            data_dir,
            params,
            output,
        } => run_score(
            &script,
            &function,
            &CsvAdapter::new(data_dir),
            &symbol,
            &exchange,
            &params,
            output.as_deref(),
        ),
        Command::ListSymbols { exchange, data_dir } => {
            run_list_symbols(&CsvAdapter::new(data_dir), &exchange)
        }
        Command::Info {
            symbol,
            exchange,
            data_dir,
        } => run_info(&CsvAdapter::new(data_dir), &symbol, &exchange),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, TradelabError> {
    FileConfigAdapter::from_file(path).map_err(|e| TradelabError::ConfigParse {
        file: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Symbol, exchange, date bounds and data directory of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRequest {
    pub symbol: String,
    pub exchange: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub data_dir: PathBuf,
}

pub fn build_data_request(
    adapter: &dyn ConfigPort,
    symbol_override: Option<&str>,
    exchange_override: Option<&str>,
) -> Result<DataRequest, TradelabError> {
    let required = |key: &str, over: Option<&str>| {
        over.map(str::to_string)
            .or_else(|| adapter.get_string("backtest", key))
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| TradelabError::ConfigMissing {
                section: "backtest".into(),
                key: key.into(),
            })
    };
    Ok(DataRequest {
        symbol: required("symbol", symbol_override)?,
        exchange: required("exchange", exchange_override)?,
        start_date: parse_date(adapter.get_string("backtest", "start_date").as_deref(), "start_date")?,
        end_date: parse_date(adapter.get_string("backtest", "end_date").as_deref(), "end_date")?,
        data_dir: PathBuf::from(
            adapter
                .get_string("backtest", "data_dir")
                .unwrap_or_else(|| ".".to_string()),
        ),
    })
}

pub fn build_backtest_config(adapter: &dyn ConfigPort) -> BacktestConfig {
    let d = BacktestConfig::default();
    BacktestConfig {
        initial_capital: adapter.get_double("backtest", "initial_capital", d.initial_capital),
        fee: adapter.get_double("backtest", "fee", d.fee),
        risk_free_rate: adapter.get_double("backtest", "risk_free_rate", d.risk_free_rate),
        periods_per_year: adapter.get_double("backtest", "periods_per_year", d.periods_per_year),
    }
}

pub fn build_limits(adapter: &dyn ConfigPort) -> ExecutionLimits {
    let positive = |key: &str, default: u64| {
        let v = adapter.get_int("sandbox", key, default as i64);
        if v >= 1 { v as u64 } else { default }
    };
    ExecutionLimits {
        max_steps: positive("max_steps", DEFAULT_MAX_STEPS),
        timeout: Duration::from_millis(positive("timeout_ms", DEFAULT_TIMEOUT_MS)),
        max_elements: positive("max_elements", DEFAULT_MAX_ELEMENTS as u64) as usize,
        max_call_depth: positive("max_call_depth", DEFAULT_MAX_CALL_DEPTH as u64) as usize,
    }
}

/// Numeric keys of `[strategy]`.
pub fn strategy_params(adapter: &dyn ConfigPort) -> Result<StrategyParams, TradelabError> {
    let mut params = StrategyParams::new();
    for key in adapter.keys("strategy") {
        if STRATEGY_META_KEYS.contains(&key.as_str()) {
            continue;
        }
        let raw = adapter.get_string("strategy", &key).unwrap_or_default();
        let value = raw.trim().parse::<f64>().map_err(|_| TradelabError::ConfigInvalid {
            section: "strategy".into(),
            key: key.clone(),
            reason: format!("'{}' is not a number", raw),
        })?;
        params.insert(key, value);
    }
    Ok(params)
}

/// `true`/`false` become bools, numbers become numbers, anything else is text.
pub fn parse_param_value(raw: &str) -> ParamValue {
    let raw = raw.trim();
    match raw.to_lowercase().as_str() {
        "true" => ParamValue::Bool(true),
        "false" => ParamValue::Bool(false),
        _ => match raw.parse::<f64>() {
            Ok(n) => ParamValue::Number(n),
            Err(_) => ParamValue::Text(raw.to_string()),
        },
    }
}

/// `param.<name>` keys of `[custom]`.
pub fn custom_params(adapter: &dyn ConfigPort) -> Params {
    adapter
        .keys("custom")
        .into_iter()
        .filter_map(|key| {
            let name = key.strip_prefix(CUSTOM_PARAM_PREFIX)?.to_string();
            let raw = adapter.get_string("custom", &key).unwrap_or_default();
            Some((name, parse_param_value(&raw)))
        })
        .collect()
}

/// Parse repeated `name=value` command-line parameters.
pub fn parse_cli_params(args: &[String]) -> Result<Params, TradelabError> {
    let mut params = Params::new();
    for arg in args {
        let (name, value) = arg
            .split_once('=')
            .filter(|(n, _)| !n.trim().is_empty())
            .ok_or_else(|| TradelabError::InvalidParameter {
                strategy: "custom".into(),
                name: arg.clone(),
                reason: "expected NAME=VALUE".into(),
            })?;
        params.insert(name.trim().to_string(), parse_param_value(value));
    }
    Ok(params)
}

fn resolve_relative(base_dir: &Path, path: &str) -> PathBuf {
    let p = PathBuf::from(path);
    if p.is_absolute() { p } else { base_dir.join(p) }
}

fn read_script(path: &Path) -> Result<String, TradelabError> {
    fs::read_to_string(path).map_err(|e| TradelabError::ConfigInvalid {
        section: "custom".into(),
        key: "script".into(),
        reason: format!("cannot read {}: {}", path.display(), e),
    })
}

/// Build the configured strategy. Relative script paths resolve against
/// `base_dir`, normally the config file's directory.
pub fn build_strategy(adapter: &dyn ConfigPort, base_dir: &Path) -> Result<Strategy, TradelabError> {
    let name = adapter
        .get_string("strategy", "name")
        .map(|s| s.trim().to_lowercase())
        .ok_or_else(|| TradelabError::ConfigMissing {
            section: "strategy".into(),
            key: "name".into(),
        })?;
    if name != "custom" {
        return Strategy::from_params(&name, &strategy_params(adapter)?);
    }

    let script = adapter
        .get_string("custom", "script")
        .ok_or_else(|| TradelabError::ConfigMissing {
            section: "custom".into(),
            key: "script".into(),
        })?;
    let source = read_script(&resolve_relative(base_dir, script.trim()))?;
    let function = adapter
        .get_string("custom", "function")
        .unwrap_or_else(|| "score".to_string());
    let program = sandbox::check_code(&source)?;
    sandbox::validate::check_signature(&program, &function)?;

    let strategy = Strategy::Custom(CustomStrategy {
        source,
        function,
        params: custom_params(adapter),
        buy_threshold: adapter.get_double("custom", "buy_threshold", 0.0),
        sell_threshold: adapter.get_double("custom", "sell_threshold", 0.0),
        limits: build_limits(adapter),
    });
    strategy.validate()?;
    Ok(strategy)
}

/// Everything a backtest run produces.
#[derive(Debug)]
pub struct RunOutput {
    pub frame: SignalFrame,
    pub result: BacktestResult,
}

/// Fetch, generate signals, simulate, and optionally export.
pub fn run_backtest_pipeline(
    data_port: &dyn DataPort,
    strategy: &Strategy,
    bt_config: &BacktestConfig,
    request: &DataRequest,
    output_dir: Option<&Path>,
) -> Result<RunOutput, TradelabError> {
    let bars = data_port.fetch_ohlcv(
        &request.symbol,
        &request.exchange,
        request.start_date,
        request.end_date,
    )?;
    if bars.is_empty() {
        return Err(TradelabError::NoData {
            symbol: request.symbol.clone(),
            exchange: request.exchange.clone(),
        });
    }
    info!(
        symbol = %request.symbol,
        exchange = %request.exchange,
        bars = bars.len(),
        "loaded price data"
    );

    let frame = strategy.generate_signals(&bars)?;
    let result = backtest_engine::run_backtest(&frame, bt_config);

    if let Some(dir) = output_dir {
        csv_export::export_run(dir, &frame, &result)?;
    }
    Ok(RunOutput { frame, result })
}

/// Human-readable metrics block.
pub fn format_summary(strategy: &Strategy, request: &DataRequest, m: &Metrics) -> String {
    let lines = [
        format!(
            "=== {} on {}.{} ===",
            strategy.id(),
            request.symbol,
            request.exchange
        ),
        format!("Final Value:      {:.2}", m.final_value),
        format!("Total Return:     {:.2}%", m.total_return * 100.0),
        format!("CAGR:             {:.2}%", m.cagr * 100.0),
        format!("Sharpe Ratio:     {:.2}", m.sharpe_ratio),
        format!("Sortino Ratio:    {:.2}", m.sortino_ratio),
        format!("Max Drawdown:     {:.2}%", m.max_drawdown * 100.0),
        format!("DD Duration:      {} bars", m.max_drawdown_duration),
        format!("Calmar Ratio:     {:.2}", m.calmar_ratio),
        format!("Omega Ratio:      {:.2}", m.omega_ratio),
        format!("VaR (95%):        {:.2}%", m.var_95 * 100.0),
        format!("CVaR (95%):       {:.2}%", m.cvar_95 * 100.0),
        format!(
            "Trades:           {} ({} won, {} lost)",
            m.total_trades, m.trades_won, m.trades_lost
        ),
        format!("Win Rate:         {:.1}%", m.win_rate * 100.0),
        format!("Profit Factor:    {:.2}", m.profit_factor),
        format!("Commission:       {:.2}", m.total_commission),
    ];
    lines.join("\n")
}

fn run_backtest(
    config_path: &Path,
    output_dir: Option<&Path>,
    symbol_override: Option<&str>,
    exchange_override: Option<&str>,
    dry_run: bool,
) -> Result<(), TradelabError> {
    info!(path = %config_path.display(), "loading config");
    let adapter = load_config(config_path)?;
    validate_backtest_config(&adapter)?;
    validate_strategy_config(&adapter)?;
    validate_sandbox_config(&adapter)?;
    let request = build_data_request(&adapter, symbol_override, exchange_override)?;

    let base_dir = config_path.parent().unwrap_or(Path::new("."));
    let strategy = build_strategy(&adapter, base_dir)?;
    let bt_config = build_backtest_config(&adapter);

    if dry_run {
        println!("Config is valid");
        println!("  strategy: {}", strategy.id());
        let indicators: Vec<String> = strategy.indicators().iter().map(|i| i.to_string()).collect();
        if !indicators.is_empty() {
            println!("  inputs:   {}", indicators.join(", "));
        }
        println!("  symbol:   {}.{}", request.symbol, request.exchange);
        println!(
            "  capital:  {:.2} (fee {})",
            bt_config.initial_capital, bt_config.fee
        );
        return Ok(());
    }

    let data_port = CsvAdapter::new(resolve_relative(
        base_dir,
        &request.data_dir.to_string_lossy(),
    ));
    let out = run_backtest_pipeline(&data_port, &strategy, &bt_config, &request, output_dir)?;
    println!("{}", format_summary(&strategy, &request, &out.result.metrics));
    if let Some(dir) = output_dir {
        println!("\nCSV written to: {}", dir.display());
    }
    Ok(())
}

fn run_validate(script: &Path, function: &str) -> Result<(), TradelabError> {
    let source = read_script(script)?;
    let program = sandbox::check_code(&source)?;
    sandbox::validate::check_signature(&program, function)?;
    println!("{}: valid ({}(data, params))", script.display(), function);
    Ok(())
}

pub fn run_score(
    script: &Path,
    function: &str,
    data_port: &dyn DataPort,
    symbol: &str,
    exchange: &str,
    params: &[String],
    output: Option<&Path>,
) -> Result<(), TradelabError> {
    let source = read_script(script)?;
    let params = parse_cli_params(params)?;
    let bars = data_port.fetch_ohlcv(symbol, exchange, None, None)?;
    let table = DataTable::from_bars(&bars);
    let series = sandbox::execute(&source, function, &table, &params, &ExecutionLimits::default())?;
    match output {
        Some(path) => csv_export::write_value_series(fs::File::create(path)?, &series)?,
        None => csv_export::write_value_series(std::io::stdout().lock(), &series)?,
    }
    Ok(())
}

fn run_list_symbols(data_port: &dyn DataPort, exchange: &str) -> Result<(), TradelabError> {
    let symbols = data_port.list_symbols(exchange)?;
    if symbols.is_empty() {
        eprintln!("No symbols found for exchange {}", exchange);
    }
    for symbol in &symbols {
        println!("{}", symbol);
    }
    Ok(())
}

fn run_info(data_port: &dyn DataPort, symbol: &str, exchange: &str) -> Result<(), TradelabError> {
    match data_port.get_data_range(symbol, exchange)? {
        Some((first, last, count)) => {
            println!("{}.{}: {} bars, {} to {}", symbol, exchange, count, first, last);
            Ok(())
        }
        None => Err(TradelabError::NoData {
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
        }),
    }
}
