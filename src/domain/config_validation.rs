//! Configuration validation.
//!
//! Validates every section a run reads before any data is loaded.

use crate::domain::error::TradelabError;
use crate::domain::strategy::STRATEGY_IDS;
use crate::ports::config_port::ConfigPort;
use chrono::NaiveDate;

/// Upper bound on `[sandbox] max_call_depth`.
pub const MAX_CALL_DEPTH_LIMIT: i64 = 128;

/// Keys under `[strategy]` that are not numeric parameters.
pub const STRATEGY_META_KEYS: &[&str] = &["name", "description"];

/// Prefix of `[custom]` keys forwarded to the parameter mapping.
pub const CUSTOM_PARAM_PREFIX: &str = "param.";

fn invalid(section: &str, key: &str, reason: &str) -> TradelabError {
    TradelabError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn missing(section: &str, key: &str) -> TradelabError {
    TradelabError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

/// A configured value that is present but not a number.
fn check_numeric(config: &dyn ConfigPort, section: &str, key: &str) -> Result<(), TradelabError> {
    match config.get_string(section, key) {
        Some(raw) if raw.trim().parse::<f64>().is_err() => {
            Err(invalid(section, key, &format!("'{}' is not a number", raw)))
        }
        _ => Ok(()),
    }
}

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), TradelabError> {
    validate_initial_capital(config)?;
    validate_fee(config)?;
    validate_risk_free_rate(config)?;
    validate_periods_per_year(config)?;
    validate_symbol(config)?;
    validate_dates(config)?;
    Ok(())
}

pub fn validate_strategy_config(config: &dyn ConfigPort) -> Result<(), TradelabError> {
    let name = match config.get_string("strategy", "name") {
        Some(s) if !s.trim().is_empty() => s.trim().to_lowercase(),
        _ => return Err(missing("strategy", "name")),
    };
    if name != "custom" && !STRATEGY_IDS.contains(&name.as_str()) {
        return Err(TradelabError::UnknownStrategy { name });
    }
    for key in config.keys("strategy") {
        if !STRATEGY_META_KEYS.contains(&key.as_str()) {
            check_numeric(config, "strategy", &key)?;
        }
    }
    if name == "custom" {
        validate_custom_config(config)?;
    }
    Ok(())
}

pub fn validate_custom_config(config: &dyn ConfigPort) -> Result<(), TradelabError> {
    match config.get_string("custom", "script") {
        Some(s) if !s.trim().is_empty() => {}
        _ => return Err(missing("custom", "script")),
    }
    if let Some(f) = config.get_string("custom", "function") {
        let valid = !f.is_empty()
            && f.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !f.starts_with(|c: char| c.is_ascii_digit());
        if !valid {
            return Err(invalid("custom", "function", "must be a plain identifier"));
        }
    }
    check_numeric(config, "custom", "buy_threshold")?;
    check_numeric(config, "custom", "sell_threshold")?;
    let buy = config.get_double("custom", "buy_threshold", 0.0);
    let sell = config.get_double("custom", "sell_threshold", 0.0);
    if sell > buy {
        return Err(invalid(
            "custom",
            "sell_threshold",
            "sell_threshold must not exceed buy_threshold",
        ));
    }
    for key in config.keys("custom") {
        if let Some(name) = key.strip_prefix(CUSTOM_PARAM_PREFIX) {
            if name.is_empty() {
                return Err(invalid("custom", &key, "parameter name is empty"));
            }
        }
    }
    Ok(())
}

pub fn validate_sandbox_config(config: &dyn ConfigPort) -> Result<(), TradelabError> {
    for key in ["max_steps", "timeout_ms", "max_elements", "max_call_depth"] {
        if let Some(raw) = config.get_string("sandbox", key) {
            match raw.trim().parse::<i64>() {
                Ok(v) if v >= 1 => {}
                _ => return Err(invalid("sandbox", key, &format!("{} must be a positive integer", key))),
            }
        }
    }
    if config.get_int("sandbox", "max_call_depth", 1) > MAX_CALL_DEPTH_LIMIT {
        return Err(invalid(
            "sandbox",
            "max_call_depth",
            &format!("max_call_depth must be at most {}", MAX_CALL_DEPTH_LIMIT),
        ));
    }
    Ok(())
}

fn validate_initial_capital(config: &dyn ConfigPort) -> Result<(), TradelabError> {
    check_numeric(config, "backtest", "initial_capital")?;
    let value = config.get_double("backtest", "initial_capital", 10_000.0);
    if value <= 0.0 || !value.is_finite() {
        return Err(invalid(
            "backtest",
            "initial_capital",
            "initial_capital must be positive",
        ));
    }
    Ok(())
}

fn validate_fee(config: &dyn ConfigPort) -> Result<(), TradelabError> {
    check_numeric(config, "backtest", "fee")?;
    let value = config.get_double("backtest", "fee", 0.001);
    if !(0.0..1.0).contains(&value) {
        return Err(invalid("backtest", "fee", "fee must be between 0 and 1"));
    }
    Ok(())
}

fn validate_risk_free_rate(config: &dyn ConfigPort) -> Result<(), TradelabError> {
    check_numeric(config, "backtest", "risk_free_rate")?;
    let value = config.get_double("backtest", "risk_free_rate", 0.0);
    if !(0.0..1.0).contains(&value) {
        return Err(invalid(
            "backtest",
            "risk_free_rate",
            "risk_free_rate must be between 0 and 1",
        ));
    }
    Ok(())
}

fn validate_periods_per_year(config: &dyn ConfigPort) -> Result<(), TradelabError> {
    check_numeric(config, "backtest", "periods_per_year")?;
    let value = config.get_double("backtest", "periods_per_year", 252.0);
    if value <= 0.0 || !value.is_finite() {
        return Err(invalid(
            "backtest",
            "periods_per_year",
            "periods_per_year must be positive",
        ));
    }
    Ok(())
}

fn validate_symbol(config: &dyn ConfigPort) -> Result<(), TradelabError> {
    for key in ["symbol", "exchange"] {
        match config.get_string("backtest", key) {
            Some(s) if !s.trim().is_empty() => {}
            _ => return Err(missing("backtest", key)),
        }
    }
    Ok(())
}

fn validate_dates(config: &dyn ConfigPort) -> Result<(), TradelabError> {
    let start = parse_date(config.get_string("backtest", "start_date").as_deref(), "start_date")?;
    let end = parse_date(config.get_string("backtest", "end_date").as_deref(), "end_date")?;

    if let (Some(start), Some(end)) = (start, end) {
        if start >= end {
            return Err(invalid(
                "backtest",
                "start_date",
                "start_date must be before end_date",
            ));
        }
    }
    Ok(())
}

/// Optional `YYYY-MM-DD` date; an absent key is an open bound.
pub fn parse_date(value: Option<&str>, field: &str) -> Result<Option<NaiveDate>, TradelabError> {
    match value.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| {
                invalid(
                    "backtest",
                    field,
                    &format!("invalid {} format, expected YYYY-MM-DD", field),
                )
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    fn make_config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    fn backtest(extra: &str) -> FileConfigAdapter {
        make_config(&format!("[backtest]\nsymbol = BHP\nexchange = ASX\n{}", extra))
    }

    #[test]
    fn valid_backtest_config_passes() {
        let config = backtest(
            "initial_capital = 10000\nfee = 0.001\nrisk_free_rate = 0.02\nperiods_per_year = 252\nstart_date = 2020-01-01\nend_date = 2024-12-31\n",
        );
        assert!(validate_backtest_config(&config).is_ok());
    }

    #[test]
    fn defaults_are_valid() {
        assert!(validate_backtest_config(&backtest("")).is_ok());
    }

    #[test]
    fn initial_capital_must_be_positive() {
        let err = validate_backtest_config(&backtest("initial_capital = 0\n")).unwrap_err();
        assert!(
            matches!(err, TradelabError::ConfigInvalid { key, .. } if key == "initial_capital")
        );
    }

    #[test]
    fn non_numeric_value_is_reported() {
        let err = validate_backtest_config(&backtest("initial_capital = lots\n")).unwrap_err();
        assert!(
            matches!(err, TradelabError::ConfigInvalid { key, reason, .. } if key == "initial_capital" && reason.contains("lots"))
        );
    }

    #[test]
    fn fee_out_of_range_fails() {
        for fee in ["-0.01", "1.0"] {
            let err = validate_backtest_config(&backtest(&format!("fee = {}\n", fee))).unwrap_err();
            assert!(matches!(err, TradelabError::ConfigInvalid { key, .. } if key == "fee"));
        }
    }

    #[test]
    fn risk_free_rate_out_of_range_fails() {
        let err = validate_backtest_config(&backtest("risk_free_rate = 1.5\n")).unwrap_err();
        assert!(
            matches!(err, TradelabError::ConfigInvalid { key, .. } if key == "risk_free_rate")
        );
    }

    #[test]
    fn periods_per_year_must_be_positive() {
        let err = validate_backtest_config(&backtest("periods_per_year = 0\n")).unwrap_err();
        assert!(
            matches!(err, TradelabError::ConfigInvalid { key, .. } if key == "periods_per_year")
        );
    }

    #[test]
    fn missing_symbol_fails() {
        let config = make_config("[backtest]\nexchange = ASX\n");
        let err = validate_backtest_config(&config).unwrap_err();
        assert!(matches!(err, TradelabError::ConfigMissing { key, .. } if key == "symbol"));
    }

    #[test]
    fn missing_exchange_fails() {
        let config = make_config("[backtest]\nsymbol = BHP\n");
        let err = validate_backtest_config(&config).unwrap_err();
        assert!(matches!(err, TradelabError::ConfigMissing { key, .. } if key == "exchange"));
    }

    #[test]
    fn invalid_date_format_fails() {
        let err = validate_backtest_config(&backtest("start_date = 2020/01/01\n")).unwrap_err();
        assert!(matches!(err, TradelabError::ConfigInvalid { key, .. } if key == "start_date"));
    }

    #[test]
    fn start_date_after_end_date_fails() {
        let err = validate_backtest_config(&backtest(
            "start_date = 2024-12-31\nend_date = 2020-01-01\n",
        ))
        .unwrap_err();
        assert!(matches!(err, TradelabError::ConfigInvalid { key, .. } if key == "start_date"));
    }

    #[test]
    fn single_open_bound_is_allowed() {
        assert!(validate_backtest_config(&backtest("start_date = 2024-01-01\n")).is_ok());
    }

    #[test]
    fn valid_strategy_config_passes() {
        let config = make_config("[strategy]\nname = sma_crossover\nfast_window = 5\nslow_window = 20\n");
        assert!(validate_strategy_config(&config).is_ok());
    }

    #[test]
    fn unknown_strategy_fails() {
        let config = make_config("[strategy]\nname = momentum\n");
        let err = validate_strategy_config(&config).unwrap_err();
        assert!(matches!(err, TradelabError::UnknownStrategy { name } if name == "momentum"));
    }

    #[test]
    fn missing_strategy_name_fails() {
        let config = make_config("[strategy]\nfast_window = 5\n");
        let err = validate_strategy_config(&config).unwrap_err();
        assert!(matches!(err, TradelabError::ConfigMissing { key, .. } if key == "name"));
    }

    #[test]
    fn non_numeric_strategy_parameter_fails() {
        let config = make_config("[strategy]\nname = rsi\nperiod = fourteen\n");
        let err = validate_strategy_config(&config).unwrap_err();
        assert!(matches!(err, TradelabError::ConfigInvalid { key, .. } if key == "period"));
    }

    #[test]
    fn custom_strategy_requires_script() {
        let config = make_config("[strategy]\nname = custom\n");
        let err = validate_strategy_config(&config).unwrap_err();
        assert!(matches!(err, TradelabError::ConfigMissing { section, key } if section == "custom" && key == "script"));
    }

    #[test]
    fn custom_thresholds_must_be_ordered() {
        let config = make_config(
            "[strategy]\nname = custom\n[custom]\nscript = s.tl\nbuy_threshold = -1\nsell_threshold = 1\n",
        );
        let err = validate_strategy_config(&config).unwrap_err();
        assert!(
            matches!(err, TradelabError::ConfigInvalid { key, .. } if key == "sell_threshold")
        );
    }

    #[test]
    fn custom_function_must_be_identifier() {
        let config = make_config("[custom]\nscript = s.tl\nfunction = os.system\n");
        let err = validate_custom_config(&config).unwrap_err();
        assert!(matches!(err, TradelabError::ConfigInvalid { key, .. } if key == "function"));
    }

    #[test]
    fn sandbox_limits_must_be_positive() {
        let config = make_config("[sandbox]\nmax_steps = 0\n");
        let err = validate_sandbox_config(&config).unwrap_err();
        assert!(matches!(err, TradelabError::ConfigInvalid { key, .. } if key == "max_steps"));
    }

    #[test]
    fn sandbox_call_depth_is_capped() {
        let config = make_config("[sandbox]\nmax_call_depth = 100000\n");
        let err = validate_sandbox_config(&config).unwrap_err();
        assert!(
            matches!(err, TradelabError::ConfigInvalid { key, .. } if key == "max_call_depth")
        );
        assert!(validate_sandbox_config(&make_config("[sandbox]\ntimeout_ms = 500\n")).is_ok());
        assert!(validate_sandbox_config(&make_config("[sandbox]\nmax_call_depth = 128\n")).is_ok());
        assert!(validate_sandbox_config(&make_config("[sandbox]\nmax_call_depth = 256\n")).is_err());
    }
}
