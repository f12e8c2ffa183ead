//! Custom indicator sandbox: validate, then execute, user-submitted scoring
//! code written in a small restricted language.
//!
//! Programs are parsed into a syntax tree and checked twice (a textual
//! denylist and an allow-list walk of the tree) before they run. The
//! interpreter has no route to the filesystem, the network, processes or
//! the clock; it is bounded by [`ExecutionLimits`].

pub mod ast;
pub mod builtins;
mod interpreter;
pub mod lexer;
pub mod parser;
pub mod validate;
pub mod value;

use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use chrono::NaiveDateTime;
use tracing::{info, warn};

use crate::domain::ohlcv::OhlcvBar;
use crate::domain::sandbox::ast::Program;
use crate::domain::sandbox::interpreter::{Interpreter, params_value};
use crate::domain::sandbox::value::{SeriesValue, TableValue, Value, align_values};

pub use validate::ENTRY_ARITY;

/// Category of a rejected custom indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    Syntax,
    ForbiddenPattern,
    ForbiddenImport,
    ForbiddenCall,
    UnknownFunction,
    Signature,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub message: String,
}

/// Why a custom indicator run failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionFailure {
    #[error("validation failed: {0}")]
    Validation(ValidationError),

    #[error("{}", runtime_message(.message, .line))]
    Runtime {
        message: String,
        line: Option<usize>,
    },

    #[error("expected a series result, got {found}")]
    NotASeries { found: String },

    #[error("cannot align result to input index: {reason}")]
    Alignment { reason: String },

    #[error("step limit of {limit} exceeded")]
    StepLimit { limit: u64 },

    #[error("time limit of {limit_ms} ms exceeded")]
    Timeout { limit_ms: u64 },

    #[error("memory limit of {limit} elements exceeded")]
    MemoryLimit { limit: usize },

    #[error("call depth limit of {limit} exceeded")]
    CallDepth { limit: usize },
}

fn runtime_message(message: &str, line: &Option<usize>) -> String {
    match line {
        Some(l) => format!("line {}: {}", l, message),
        None => message.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("custom indicator '{function}' failed: {cause}")]
pub struct ExecutionError {
    pub function: String,
    #[source]
    pub cause: ExecutionFailure,
}

/// Resource ceilings for one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionLimits {
    pub max_steps: u64,
    pub timeout: Duration,
    pub max_elements: usize,
    pub max_call_depth: usize,
}

pub const DEFAULT_MAX_STEPS: u64 = 1_000_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_MAX_ELEMENTS: usize = 5_000_000;
pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;

/// Stack reserved for the interpreter thread.
pub(crate) const STACK_BYTES: usize = 64 * 1024 * 1024;

impl Default for ExecutionLimits {
    fn default() -> Self {
        ExecutionLimits {
            max_steps: DEFAULT_MAX_STEPS,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_elements: DEFAULT_MAX_ELEMENTS,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

/// Outcome of a validation call, as reported to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    pub is_valid: bool,
    pub error: Option<String>,
}

impl From<Result<(), ValidationError>> for Validation {
    fn from(result: Result<(), ValidationError>) -> Self {
        match result {
            Ok(()) => Validation {
                is_valid: true,
                error: None,
            },
            Err(e) => Validation {
                is_valid: false,
                error: Some(e.message),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl ParamValue {
    fn to_value(&self) -> Value {
        match self {
            ParamValue::Number(n) => Value::Number(*n),
            ParamValue::Bool(b) => Value::Bool(*b),
            ParamValue::Text(s) => Value::str(s),
        }
    }
}

pub type Params = BTreeMap<String, ParamValue>;

/// Timestamp-indexed input columns handed to the entry function.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataTable {
    pub index: Vec<NaiveDateTime>,
    pub columns: BTreeMap<String, Vec<Option<f64>>>,
}

impl DataTable {
    /// `open`, `high`, `low`, `close` and `volume` columns from bars.
    pub fn from_bars(bars: &[OhlcvBar]) -> Self {
        let mut columns = BTreeMap::new();
        columns.insert("open".to_string(), bars.iter().map(|b| Some(b.open)).collect());
        columns.insert("high".to_string(), bars.iter().map(|b| Some(b.high)).collect());
        columns.insert("low".to_string(), bars.iter().map(|b| Some(b.low)).collect());
        columns.insert("close".to_string(), bars.iter().map(|b| Some(b.close)).collect());
        columns.insert("volume".to_string(), bars.iter().map(|b| b.volume).collect());
        DataTable {
            index: bars.iter().map(|b| b.timestamp).collect(),
            columns,
        }
    }

    /// Add or replace a column. Shorter columns are padded with missing values.
    pub fn with_column(mut self, name: &str, mut values: Vec<Option<f64>>) -> Self {
        values.resize(self.index.len(), None);
        self.columns.insert(name.to_string(), values);
        self
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn to_value(&self) -> (Rc<Vec<NaiveDateTime>>, Value) {
        let index = Rc::new(self.index.clone());
        let columns = self
            .columns
            .iter()
            .map(|(name, values)| {
                let mut values = values.clone();
                values.resize(index.len(), None);
                (
                    name.clone(),
                    Rc::new(SeriesValue::new(Rc::clone(&index), values)),
                )
            })
            .collect();
        let table = Value::Table(Rc::new(TableValue {
            index: Rc::clone(&index),
            columns,
        }));
        (index, table)
    }
}

/// Output of a custom indicator, aligned to the input table's index.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueSeries {
    pub index: Vec<NaiveDateTime>,
    pub values: Vec<Option<f64>>,
}

/// 1-based line number of a byte offset.
pub(crate) fn line_of(source: &str, position: usize) -> usize {
    let end = position.min(source.len());
    source.as_bytes()[..end].iter().filter(|b| **b == b'\n').count() + 1
}

/// Run every static check except the entry signature. The textual denylist
/// runs before parsing so a denied token is named even in broken source.
pub fn check_code(source: &str) -> Result<Program, ValidationError> {
    validate::check_text(source)?;
    let program = parser::parse(source).map_err(|e| {
        let (line, col) = e.line_col(source);
        ValidationError {
            kind: ValidationErrorKind::Syntax,
            message: format!("syntax error at line {}, column {}: {}", line, col, e.message),
        }
    })?;
    validate::check_structure(&program, source)?;
    Ok(program)
}

pub fn validate_code(source: &str) -> Validation {
    check_code(source).map(|_| ()).into()
}

pub fn validate_signature(source: &str, function: &str) -> Validation {
    check_code(source)
        .and_then(|program| validate::check_signature(&program, function))
        .into()
}

/// Validate `source`, run `function(data, params)` and return its series
/// realigned to `data`'s index.
pub fn execute(
    source: &str,
    function: &str,
    data: &DataTable,
    params: &Params,
    limits: &ExecutionLimits,
) -> Result<ValueSeries, ExecutionError> {
    let fail = |cause: ExecutionFailure| ExecutionError {
        function: function.to_string(),
        cause,
    };
    let program = check_code(source)
        .and_then(|p| validate::check_signature(&p, function).map(|_| p))
        .map_err(|e| fail(ExecutionFailure::Validation(e)))?;

    info!(function, rows = data.len(), "executing custom indicator");
    let run = || run_program(&program, source, function, data, params, limits);
    let outcome = std::thread::scope(|scope| {
        std::thread::Builder::new()
            .name("tradelab-sandbox".to_string())
            .stack_size(STACK_BYTES)
            .spawn_scoped(scope, run)
            .map_err(|e| runtime_failure(format!("cannot start interpreter thread: {}", e)))?
            .join()
            .map_err(|_| runtime_failure("interpreter thread panicked"))?
    });
    outcome.map_err(fail)
}

fn runtime_failure(message: impl Into<String>) -> ExecutionFailure {
    ExecutionFailure::Runtime {
        message: message.into(),
        line: None,
    }
}

/// Interpret a validated program. Runs on the dedicated sandbox thread.
fn run_program(
    program: &Program,
    source: &str,
    function: &str,
    data: &DataTable,
    params: &Params,
    limits: &ExecutionLimits,
) -> Result<ValueSeries, ExecutionFailure> {
    let (index, table) = data.to_value();
    let params = params_value(
        params
            .iter()
            .map(|(k, v)| (k.clone(), v.to_value()))
            .collect(),
    );

    let mut interp = Interpreter::new(program, source, limits);
    interp.load(program)?;
    let result = interp.call(function, vec![table, params])?;

    let series = match result {
        Value::Series(s) => s,
        other => {
            return Err(ExecutionFailure::NotASeries {
                found: other.type_name().to_string(),
            });
        }
    };
    let shape = SeriesValue::new(Rc::clone(&index), Vec::new());
    let values = if series.same_index(&shape) && series.len() == index.len() {
        series.values.clone()
    } else {
        warn!(
            function,
            expected = index.len(),
            returned = series.len(),
            "custom indicator output realigned to input index"
        );
        align_values(&shape, &series).map_err(|reason| ExecutionFailure::Alignment { reason })?
    };
    info!(function, steps = interp.steps_used(), "custom indicator finished");

    Ok(ValueSeries {
        index: index.as_ref().clone(),
        values,
    })
}

/// A declared input to a custom indicator.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub default: ParamValue,
    pub description: String,
}

/// A stored custom indicator with its validation state.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomIndicatorSpec {
    pub name: String,
    pub description: String,
    pub source_code: String,
    pub entry_function: String,
    pub declared_parameters: Vec<ParameterSpec>,
    /// Condition name to description.
    pub declared_conditions: BTreeMap<String, String>,
    pub category: String,
    pub is_public: bool,
    pub validated: bool,
    pub last_validation_error: Option<String>,
}

impl CustomIndicatorSpec {
    pub fn new(name: &str, source_code: &str, entry_function: &str) -> Self {
        let mut spec = CustomIndicatorSpec {
            name: name.to_string(),
            description: String::new(),
            source_code: source_code.to_string(),
            entry_function: entry_function.to_string(),
            declared_parameters: Vec::new(),
            declared_conditions: BTreeMap::new(),
            category: "custom".to_string(),
            is_public: false,
            validated: false,
            last_validation_error: None,
        };
        spec.revalidate();
        spec
    }

    /// Re-run validation against the current source and entry function.
    pub fn revalidate(&mut self) -> bool {
        let v = validate_signature(&self.source_code, &self.entry_function);
        self.validated = v.is_valid;
        self.last_validation_error = v.error;
        self.validated
    }

    pub fn set_source(&mut self, source_code: &str) -> bool {
        self.source_code = source_code.to_string();
        self.revalidate()
    }

    /// Declared defaults overlaid with `overrides`.
    pub fn resolve_params(&self, overrides: &Params) -> Params {
        let mut params: Params = self
            .declared_parameters
            .iter()
            .map(|p| (p.name.clone(), p.default.clone()))
            .collect();
        for (k, v) in overrides {
            params.insert(k.clone(), v.clone());
        }
        params
    }

    pub fn execute(
        &self,
        data: &DataTable,
        overrides: &Params,
        limits: &ExecutionLimits,
    ) -> Result<ValueSeries, ExecutionError> {
        execute(
            &self.source_code,
            &self.entry_function,
            data,
            &self.resolve_params(overrides),
            limits,
        )
    }
}
