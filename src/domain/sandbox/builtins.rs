//! Built-in functions and the allow-listed modules (`math`, `stats`, `ta`,
//! `series`) available to custom indicator code.
//!
//! Nothing here reaches the host: no I/O, no clock, no environment. Every
//! operation that walks a series charges the execution budget first.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::domain::indicator::{self, Series, rolling};
use crate::domain::sandbox::ExecutionFailure;
use crate::domain::sandbox::interpreter::Budget;
use crate::domain::sandbox::value::{SeriesValue, Value, finite};

pub const ALLOWED_MODULES: &[&str] = &["math", "stats", "ta", "series"];

pub const BUILTINS: &[&str] = &[
    "len", "abs", "min", "max", "round", "range", "float", "int", "bool", "str", "list", "sum",
    "get", "isnan",
];

/// Names that are rejected outright wherever they appear.
pub const DENIED_BUILTINS: &[&str] = &[
    "eval",
    "exec",
    "open",
    "compile",
    "globals",
    "locals",
    "vars",
    "getattr",
    "setattr",
    "delattr",
    "input",
    "print",
    "breakpoint",
    "exit",
    "quit",
    "help",
    "dir",
    "type",
    "id",
    "memoryview",
];

const MATH_FUNCTIONS: &[&str] = &[
    "sqrt", "log", "log10", "exp", "floor", "ceil", "abs", "sin", "cos", "tan", "tanh", "sign",
    "pow",
];
const STATS_FUNCTIONS: &[&str] = &[
    "mean",
    "median",
    "std",
    "var",
    "sum",
    "min",
    "max",
    "count",
    "quantile",
    "rolling_mean",
    "rolling_std",
    "rolling_sum",
    "rolling_min",
    "rolling_max",
    "zscore",
    "diff",
    "pct_change",
    "shift",
    "cumsum",
];
const TA_FUNCTIONS: &[&str] = &[
    "sma", "ema", "wma", "rsi", "roc", "stddev", "macd", "bollinger",
];
const SERIES_FUNCTIONS: &[&str] = &[
    "where", "fillna", "ffill", "clip", "from_list", "constant", "head", "tail", "dropna",
];

pub fn module_functions(module: &str) -> &'static [&'static str] {
    match module {
        "math" => MATH_FUNCTIONS,
        "stats" => STATS_FUNCTIONS,
        "ta" => TA_FUNCTIONS,
        "series" => SERIES_FUNCTIONS,
        _ => &[],
    }
}

pub fn module_constant(module: &str, name: &str) -> Option<f64> {
    match (module, name) {
        ("math", "pi") => Some(std::f64::consts::PI),
        ("math", "e") => Some(std::f64::consts::E),
        ("math", "inf") => Some(f64::INFINITY),
        ("math", "nan") => Some(f64::NAN),
        _ => None,
    }
}

fn fail(message: impl Into<String>) -> ExecutionFailure {
    ExecutionFailure::Runtime {
        message: message.into(),
        line: None,
    }
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), ExecutionFailure> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{}", min)
        } else if max == usize::MAX {
            format!("at least {}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(fail(format!(
            "{}() takes {} argument(s), got {}",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}

fn number_arg(name: &str, args: &[Value], i: usize) -> Result<f64, ExecutionFailure> {
    args[i].as_number().ok_or_else(|| {
        fail(format!(
            "{}() argument {} must be a number, got {}",
            name,
            i + 1,
            args[i].type_name()
        ))
    })
}

fn int_arg(name: &str, args: &[Value], i: usize) -> Result<i64, ExecutionFailure> {
    let n = number_arg(name, args, i)?;
    if !n.is_finite() || n.fract() != 0.0 {
        return Err(fail(format!(
            "{}() argument {} must be an integer, got {}",
            name,
            i + 1,
            n
        )));
    }
    Ok(n as i64)
}

fn window_arg(name: &str, args: &[Value], i: usize) -> Result<usize, ExecutionFailure> {
    let n = int_arg(name, args, i)?;
    if n < 1 {
        return Err(fail(format!(
            "{}() argument {} must be a positive integer, got {}",
            name,
            i + 1,
            n
        )));
    }
    Ok(n as usize)
}

fn optional_window(
    name: &str,
    args: &[Value],
    i: usize,
    default: usize,
) -> Result<usize, ExecutionFailure> {
    if args.len() > i {
        window_arg(name, args, i)
    } else {
        Ok(default)
    }
}

fn series_arg<'v>(
    name: &str,
    args: &'v [Value],
    i: usize,
) -> Result<&'v Rc<SeriesValue>, ExecutionFailure> {
    match &args[i] {
        Value::Series(s) => Ok(s),
        other => Err(fail(format!(
            "{}() argument {} must be a series, got {}",
            name,
            i + 1,
            other.type_name()
        ))),
    }
}

/// Numbers held by a list or the defined values of a series.
fn numbers_of(name: &str, value: &Value, budget: &mut Budget) -> Result<Vec<f64>, ExecutionFailure> {
    match value {
        Value::Series(s) => {
            budget.tick(s.len() as u64)?;
            Ok(s.defined().collect())
        }
        Value::List(items) => {
            budget.tick(items.len() as u64)?;
            let mut out = Vec::with_capacity(items.len());
            for item in items.iter() {
                match item {
                    Value::None => {}
                    other => match other.as_number() {
                        Some(n) => out.push(n),
                        None => {
                            return Err(fail(format!(
                                "{}() expects numbers, found {}",
                                name,
                                other.type_name()
                            )));
                        }
                    },
                }
            }
            Ok(out)
        }
        other => Err(fail(format!(
            "{}() expects a list or series, got {}",
            name,
            other.type_name()
        ))),
    }
}

/// Apply `f` to a scalar, or element-wise to a series.
fn map_numeric<F>(name: &str, value: &Value, budget: &mut Budget, f: F) -> Result<Value, ExecutionFailure>
where
    F: Fn(f64) -> f64,
{
    match value {
        Value::Series(s) => {
            budget.tick(s.len() as u64)?;
            budget.alloc(s.len())?;
            let values = s.values.iter().map(|v| v.and_then(|x| finite(f(x)))).collect();
            Ok(Value::series(s.with_values(values)))
        }
        other => match other.as_number() {
            Some(x) => Ok(Value::Number(f(x))),
            None => Err(fail(format!(
                "{}() expects a number or series, got {}",
                name,
                other.type_name()
            ))),
        },
    }
}

/// Wrap an indicator output computed over `source`'s index.
fn indicator_output(
    source: &SeriesValue,
    values: Series,
    budget: &mut Budget,
) -> Result<Value, ExecutionFailure> {
    budget.alloc(values.len())?;
    Ok(Value::series(source.with_values(values)))
}

fn opt_number(values: &[f64], f: impl Fn(&[f64]) -> f64) -> Value {
    if values.is_empty() {
        Value::None
    } else {
        Value::Number(f(values))
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn variance(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// Linear interpolation between closest ranks; `sorted` must be non-empty.
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let rank = q * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

fn sorted(mut values: Vec<f64>) -> Vec<f64> {
    values.sort_by(f64::total_cmp);
    values
}

pub(crate) fn call_builtin(
    name: &str,
    args: &[Value],
    budget: &mut Budget,
) -> Result<Value, ExecutionFailure> {
    match name {
        "len" => {
            arity(name, args, 1, 1)?;
            let n = match &args[0] {
                Value::List(items) => items.len(),
                Value::Str(s) => s.chars().count(),
                Value::Series(s) => s.len(),
                Value::Map(m) => m.len(),
                Value::Table(t) => t.index.len(),
                other => return Err(fail(format!("len() of {} is undefined", other.type_name()))),
            };
            Ok(Value::Number(n as f64))
        }
        "abs" => {
            arity(name, args, 1, 1)?;
            map_numeric(name, &args[0], budget, f64::abs)
        }
        "min" | "max" => {
            arity(name, args, 1, usize::MAX)?;
            let values = if args.len() == 1 {
                numbers_of(name, &args[0], budget)?
            } else {
                (0..args.len())
                    .map(|i| number_arg(name, args, i))
                    .collect::<Result<Vec<_>, _>>()?
            };
            let pick = if name == "min" { f64::min } else { f64::max };
            Ok(values
                .into_iter()
                .reduce(pick)
                .map(Value::Number)
                .unwrap_or(Value::None))
        }
        "round" => {
            arity(name, args, 1, 2)?;
            let digits = if args.len() == 2 {
                int_arg(name, args, 1)?
            } else {
                0
            };
            let factor = 10f64.powi(digits.clamp(-300, 300) as i32);
            map_numeric(name, &args[0], budget, |x| (x * factor).round() / factor)
        }
        "range" => {
            arity(name, args, 1, 3)?;
            let (start, stop, step) = match args.len() {
                1 => (0, int_arg(name, args, 0)?, 1),
                2 => (int_arg(name, args, 0)?, int_arg(name, args, 1)?, 1),
                _ => (
                    int_arg(name, args, 0)?,
                    int_arg(name, args, 1)?,
                    int_arg(name, args, 2)?,
                ),
            };
            if step == 0 {
                return Err(fail("range() step must not be zero"));
            }
            let span = stop as i128 - start as i128;
            let count = if (span > 0) == (step > 0) && span != 0 {
                ((span.abs() + step.abs() as i128 - 1) / step.abs() as i128) as usize
            } else {
                0
            };
            budget.alloc(count)?;
            budget.tick(count as u64)?;
            let items = (0..count)
                .map(|i| Value::Number((start as i128 + i as i128 * step as i128) as f64))
                .collect();
            Ok(Value::list(items))
        }
        "float" | "int" => {
            arity(name, args, 1, 1)?;
            let n = match &args[0] {
                Value::Str(s) => s
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| fail(format!("{}() cannot parse \"{}\"", name, s)))?,
                other => other.as_number().ok_or_else(|| {
                    fail(format!("{}() of {} is undefined", name, other.type_name()))
                })?,
            };
            Ok(Value::Number(if name == "int" { n.trunc() } else { n }))
        }
        "bool" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Bool(args[0].truthy().map_err(fail)?))
        }
        "str" => {
            arity(name, args, 1, 1)?;
            let text = args[0].to_string();
            budget.alloc(text.len())?;
            Ok(Value::str(&text))
        }
        "list" => {
            arity(name, args, 1, 1)?;
            match &args[0] {
                Value::List(items) => {
                    budget.alloc(items.len())?;
                    Ok(Value::list(items.as_ref().clone()))
                }
                Value::Series(s) => {
                    budget.tick(s.len() as u64)?;
                    budget.alloc(s.len())?;
                    Ok(Value::list(
                        s.values
                            .iter()
                            .map(|v| v.map(Value::Number).unwrap_or(Value::None))
                            .collect(),
                    ))
                }
                Value::Map(m) => {
                    budget.alloc(m.len())?;
                    Ok(Value::list(m.keys().map(|k| Value::str(k)).collect()))
                }
                other => Err(fail(format!("list() of {} is undefined", other.type_name()))),
            }
        }
        "sum" => {
            arity(name, args, 1, 2)?;
            let start = if args.len() == 2 {
                number_arg(name, args, 1)?
            } else {
                0.0
            };
            let values = numbers_of(name, &args[0], budget)?;
            Ok(Value::Number(start + values.iter().sum::<f64>()))
        }
        "get" => {
            arity(name, args, 2, 3)?;
            let default = args.get(2).cloned().unwrap_or(Value::None);
            match (&args[0], &args[1]) {
                (Value::Map(m), Value::Str(key)) => {
                    Ok(m.get(key.as_ref()).cloned().unwrap_or(default))
                }
                (Value::List(items), idx) => {
                    let found = idx
                        .as_number()
                        .filter(|n| n.fract() == 0.0 && *n >= 0.0)
                        .and_then(|n| items.get(n as usize))
                        .cloned();
                    Ok(found.unwrap_or(default))
                }
                (container, key) => Err(fail(format!(
                    "get() expects a map and string key or a list and index, got {} and {}",
                    container.type_name(),
                    key.type_name()
                ))),
            }
        }
        "isnan" => {
            arity(name, args, 1, 1)?;
            match &args[0] {
                Value::None => Ok(Value::Bool(true)),
                Value::Series(s) => {
                    budget.tick(s.len() as u64)?;
                    budget.alloc(s.len())?;
                    let flags = s
                        .values
                        .iter()
                        .map(|v| Some(if v.is_none() { 1.0 } else { 0.0 }))
                        .collect();
                    Ok(Value::series(s.with_values(flags)))
                }
                other => match other.as_number() {
                    Some(n) => Ok(Value::Bool(n.is_nan())),
                    None => Err(fail(format!(
                        "isnan() of {} is undefined",
                        other.type_name()
                    ))),
                },
            }
        }
        _ => Err(fail(format!("unknown function '{}'", name))),
    }
}

pub(crate) fn call_module(
    module: &str,
    name: &str,
    args: &[Value],
    budget: &mut Budget,
) -> Result<Value, ExecutionFailure> {
    match module {
        "math" => call_math(name, args, budget),
        "stats" => call_stats(name, args, budget),
        "ta" => call_ta(name, args, budget),
        "series" => call_series(name, args, budget),
        _ => Err(fail(format!("module '{}' is not available", module))),
    }
}

fn call_math(name: &str, args: &[Value], budget: &mut Budget) -> Result<Value, ExecutionFailure> {
    let qualified = format!("math.{}", name);
    if name == "pow" {
        arity(&qualified, args, 2, 2)?;
        let exponent = number_arg(&qualified, args, 1)?;
        return map_numeric(&qualified, &args[0], budget, |x| x.powf(exponent));
    }
    arity(&qualified, args, 1, 1)?;
    let f: fn(f64) -> f64 = match name {
        "sqrt" => f64::sqrt,
        "log" => f64::ln,
        "log10" => f64::log10,
        "exp" => f64::exp,
        "floor" => f64::floor,
        "ceil" => f64::ceil,
        "abs" => f64::abs,
        "sin" => f64::sin,
        "cos" => f64::cos,
        "tan" => f64::tan,
        "tanh" => f64::tanh,
        "sign" => |x: f64| {
            if x > 0.0 {
                1.0
            } else if x < 0.0 {
                -1.0
            } else {
                0.0
            }
        },
        _ => return Err(fail(format!("unknown function '{}'", qualified))),
    };
    map_numeric(&qualified, &args[0], budget, f)
}

fn call_stats(name: &str, args: &[Value], budget: &mut Budget) -> Result<Value, ExecutionFailure> {
    let qualified = format!("stats.{}", name);
    let q = qualified.as_str();
    match name {
        "mean" | "median" | "std" | "var" | "sum" | "min" | "max" | "count" => {
            arity(q, args, 1, 1)?;
            let values = numbers_of(q, &args[0], budget)?;
            Ok(match name {
                "mean" => opt_number(&values, mean),
                "median" => opt_number(&sorted(values), |s| quantile_sorted(s, 0.5)),
                "std" => opt_number(&values, |v| variance(v).sqrt()),
                "var" => opt_number(&values, variance),
                "sum" => Value::Number(values.iter().sum()),
                "min" => opt_number(&values, |v| v.iter().copied().fold(f64::INFINITY, f64::min)),
                "max" => opt_number(&values, |v| {
                    v.iter().copied().fold(f64::NEG_INFINITY, f64::max)
                }),
                _ => Value::Number(values.len() as f64),
            })
        }
        "quantile" => {
            arity(q, args, 2, 2)?;
            let level = number_arg(q, args, 1)?;
            if !(0.0..=1.0).contains(&level) {
                return Err(fail(format!("{}() level must be between 0 and 1", q)));
            }
            let values = sorted(numbers_of(q, &args[0], budget)?);
            Ok(opt_number(&values, |s| quantile_sorted(s, level)))
        }
        "rolling_mean" | "rolling_std" | "rolling_sum" | "rolling_min" | "rolling_max"
        | "zscore" => {
            arity(q, args, 2, 2)?;
            let s = series_arg(q, args, 0)?;
            let window = window_arg(q, args, 1)?;
            budget.tick((s.len() as u64).saturating_mul(window as u64))?;
            let values = match name {
                "rolling_mean" => indicator::sma(&s.values, window),
                "rolling_std" => indicator::stddev(&s.values, window),
                "rolling_sum" => rolling(&s.values, window, |w| w.iter().sum()),
                "rolling_min" => rolling(&s.values, window, |w| {
                    w.iter().copied().fold(f64::INFINITY, f64::min)
                }),
                "rolling_max" => rolling(&s.values, window, |w| {
                    w.iter().copied().fold(f64::NEG_INFINITY, f64::max)
                }),
                _ => {
                    let m = indicator::sma(&s.values, window);
                    let sd = indicator::stddev(&s.values, window);
                    s.values
                        .iter()
                        .zip(m.iter().zip(sd.iter()))
                        .map(|(x, (m, sd))| match (x, m, sd) {
                            (Some(x), Some(m), Some(sd)) if *sd > 0.0 => finite((x - m) / sd),
                            _ => None,
                        })
                        .collect()
                }
            };
            indicator_output(s, values, budget)
        }
        "diff" | "pct_change" | "shift" => {
            arity(q, args, 1, 2)?;
            let s = series_arg(q, args, 0)?;
            let n = if args.len() == 2 { int_arg(q, args, 1)? } else { 1 };
            budget.tick(s.len() as u64)?;
            let len = s.len() as i64;
            let values: Series = (0..len)
                .map(|i| {
                    let j = i - n;
                    let prev = if (0..len).contains(&j) {
                        s.values[j as usize]
                    } else {
                        None
                    };
                    match name {
                        "shift" => prev,
                        "diff" => Some(s.values[i as usize]? - prev?),
                        _ => {
                            let base = prev?;
                            if base == 0.0 {
                                None
                            } else {
                                finite(s.values[i as usize]? / base - 1.0)
                            }
                        }
                    }
                })
                .collect();
            indicator_output(s, values, budget)
        }
        "cumsum" => {
            arity(q, args, 1, 1)?;
            let s = series_arg(q, args, 0)?;
            budget.tick(s.len() as u64)?;
            let mut total = 0.0;
            let values = s
                .values
                .iter()
                .map(|v| {
                    v.map(|x| {
                        total += x;
                        total
                    })
                })
                .collect();
            indicator_output(s, values, budget)
        }
        _ => Err(fail(format!("unknown function '{}'", qualified))),
    }
}

fn call_ta(name: &str, args: &[Value], budget: &mut Budget) -> Result<Value, ExecutionFailure> {
    let qualified = format!("ta.{}", name);
    let q = qualified.as_str();
    match name {
        "sma" | "wma" | "stddev" | "roc" | "rsi" => {
            let default = if name == "rsi" { Some(14) } else { None };
            arity(q, args, if default.is_some() { 1 } else { 2 }, 2)?;
            let s = series_arg(q, args, 0)?;
            let window = optional_window(q, args, 1, default.unwrap_or(1))?;
            budget.tick((s.len() as u64).saturating_mul(window as u64))?;
            let values = match name {
                "sma" => indicator::sma(&s.values, window),
                "wma" => indicator::wma(&s.values, window),
                "stddev" => indicator::stddev(&s.values, window),
                "roc" => indicator::roc(&s.values, window),
                _ => indicator::rsi(&s.values, window),
            };
            indicator_output(s, values, budget)
        }
        "ema" => {
            arity(q, args, 2, 3)?;
            let s = series_arg(q, args, 0)?;
            let window = window_arg(q, args, 1)?;
            let alpha = if args.len() == 3 {
                let a = number_arg(q, args, 2)?;
                if !(a > 0.0 && a <= 1.0) {
                    return Err(fail(format!("{}() alpha must be in (0, 1]", q)));
                }
                Some(a)
            } else {
                None
            };
            budget.tick(s.len() as u64)?;
            indicator_output(s, indicator::ema(&s.values, window, alpha), budget)
        }
        "macd" => {
            arity(q, args, 1, 4)?;
            let s = series_arg(q, args, 0)?;
            let fast = optional_window(q, args, 1, indicator::macd::DEFAULT_FAST)?;
            let slow = optional_window(q, args, 2, indicator::macd::DEFAULT_SLOW)?;
            let signal = optional_window(q, args, 3, indicator::macd::DEFAULT_SIGNAL)?;
            budget.tick(s.len() as u64 * 4)?;
            budget.alloc(s.len() * 3)?;
            let out = indicator::macd(&s.values, fast, slow, signal);
            let mut fields = BTreeMap::new();
            fields.insert("line".to_string(), Value::series(s.with_values(out.line)));
            fields.insert("signal".to_string(), Value::series(s.with_values(out.signal)));
            fields.insert(
                "histogram".to_string(),
                Value::series(s.with_values(out.histogram)),
            );
            Ok(Value::Map(Rc::new(fields)))
        }
        "bollinger" => {
            arity(q, args, 1, 3)?;
            let s = series_arg(q, args, 0)?;
            let window = optional_window(q, args, 1, 20)?;
            let num_std = if args.len() == 3 {
                number_arg(q, args, 2)?
            } else {
                2.0
            };
            if num_std < 0.0 {
                return Err(fail(format!("{}() num_std must be non-negative", q)));
            }
            budget.tick((s.len() as u64).saturating_mul(window as u64 * 2))?;
            budget.alloc(s.len() * 3)?;
            let bands = indicator::bollinger_bands(&s.values, window, num_std);
            let mut fields = BTreeMap::new();
            fields.insert("upper".to_string(), Value::series(s.with_values(bands.upper)));
            fields.insert("middle".to_string(), Value::series(s.with_values(bands.middle)));
            fields.insert("lower".to_string(), Value::series(s.with_values(bands.lower)));
            Ok(Value::Map(Rc::new(fields)))
        }
        _ => Err(fail(format!("unknown function '{}'", qualified))),
    }
}

/// A branch of `series.where`: a series aligned to `cond`, or a broadcast scalar.
fn branch_values(
    q: &str,
    cond: &SeriesValue,
    value: &Value,
) -> Result<Series, ExecutionFailure> {
    match value {
        Value::Series(s) => crate::domain::sandbox::value::align_values(cond, s).map_err(fail),
        Value::None => Ok(vec![None; cond.len()]),
        other => match other.as_number() {
            Some(n) => Ok(vec![finite(n); cond.len()]),
            None => Err(fail(format!(
                "{}() branches must be series or numbers, got {}",
                q,
                other.type_name()
            ))),
        },
    }
}

fn call_series(name: &str, args: &[Value], budget: &mut Budget) -> Result<Value, ExecutionFailure> {
    let qualified = format!("series.{}", name);
    let q = qualified.as_str();
    match name {
        "where" => {
            arity(q, args, 3, 3)?;
            let cond = series_arg(q, args, 0)?;
            budget.tick(cond.len() as u64 * 3)?;
            let a = branch_values(q, cond, &args[1])?;
            let b = branch_values(q, cond, &args[2])?;
            let values = cond
                .values
                .iter()
                .enumerate()
                .map(|(i, c)| match c {
                    Some(c) if *c != 0.0 => a[i],
                    Some(_) => b[i],
                    None => None,
                })
                .collect();
            indicator_output(cond, values, budget)
        }
        "fillna" => {
            arity(q, args, 2, 2)?;
            let s = series_arg(q, args, 0)?;
            let fill = number_arg(q, args, 1)?;
            budget.tick(s.len() as u64)?;
            let values = s.values.iter().map(|v| v.or(finite(fill))).collect();
            indicator_output(s, values, budget)
        }
        "ffill" => {
            arity(q, args, 1, 1)?;
            let s = series_arg(q, args, 0)?;
            budget.tick(s.len() as u64)?;
            let mut last = None;
            let values = s
                .values
                .iter()
                .map(|v| {
                    if v.is_some() {
                        last = *v;
                    }
                    last
                })
                .collect();
            indicator_output(s, values, budget)
        }
        "clip" => {
            arity(q, args, 3, 3)?;
            let s = series_arg(q, args, 0)?;
            let lo = number_arg(q, args, 1)?;
            let hi = number_arg(q, args, 2)?;
            if lo > hi {
                return Err(fail(format!("{}() lower bound exceeds upper bound", q)));
            }
            budget.tick(s.len() as u64)?;
            let values = s.values.iter().map(|v| v.map(|x| x.clamp(lo, hi))).collect();
            indicator_output(s, values, budget)
        }
        "from_list" => {
            arity(q, args, 2, 2)?;
            let Value::List(items) = &args[0] else {
                return Err(fail(format!(
                    "{}() argument 1 must be a list, got {}",
                    q,
                    args[0].type_name()
                )));
            };
            let like = series_arg(q, args, 1)?;
            if items.len() != like.len() {
                return Err(fail(format!(
                    "{}() list has {} items but the series has {}",
                    q,
                    items.len(),
                    like.len()
                )));
            }
            budget.tick(items.len() as u64)?;
            let mut values = Vec::with_capacity(items.len());
            for item in items.iter() {
                match item {
                    Value::None => values.push(None),
                    other => match other.as_number() {
                        Some(n) => values.push(finite(n)),
                        None => {
                            return Err(fail(format!(
                                "{}() expects numbers, found {}",
                                q,
                                other.type_name()
                            )));
                        }
                    },
                }
            }
            indicator_output(like, values, budget)
        }
        "constant" => {
            arity(q, args, 2, 2)?;
            let value = number_arg(q, args, 0)?;
            let like = series_arg(q, args, 1)?;
            budget.tick(like.len() as u64)?;
            indicator_output(like, vec![finite(value); like.len()], budget)
        }
        "head" | "tail" => {
            arity(q, args, 2, 2)?;
            let s = series_arg(q, args, 0)?;
            let n = (int_arg(q, args, 1)?.max(0) as usize).min(s.len());
            let range = if name == "head" {
                0..n
            } else {
                s.len() - n..s.len()
            };
            budget.tick(n as u64)?;
            budget.alloc(n * 2)?;
            let index = Rc::new(s.index[range.clone()].to_vec());
            Ok(Value::series(SeriesValue::new(index, s.values[range].to_vec())))
        }
        "dropna" => {
            arity(q, args, 1, 1)?;
            let s = series_arg(q, args, 0)?;
            budget.tick(s.len() as u64)?;
            let (index, values): (Vec<_>, Vec<_>) = s
                .index
                .iter()
                .zip(s.values.iter())
                .filter(|(_, v)| v.is_some())
                .map(|(ts, v)| (*ts, *v))
                .unzip();
            budget.alloc(values.len() * 2)?;
            Ok(Value::series(SeriesValue::new(Rc::new(index), values)))
        }
        _ => Err(fail(format!("unknown function '{}'", qualified))),
    }
}
