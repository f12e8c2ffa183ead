//! Domain error types.

use crate::domain::sandbox::{ExecutionError, ValidationError};

/// A parse error with position information for custom indicator source.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with a caret under the offending column of its source line.
    pub fn display_with_context(&self, input: &str) -> String {
        let (line_no, col) = self.line_col(input);
        let line = input.lines().nth(line_no - 1).unwrap_or("");
        let caret = " ".repeat(col - 1) + "^";
        format!(
            "{line}\n{caret}\n{err} (line {line_no}, column {col})",
            line = line,
            caret = caret,
            err = self,
            line_no = line_no,
            col = col
        )
    }

    /// 1-based (line, column) of the error position.
    pub fn line_col(&self, input: &str) -> (usize, usize) {
        let upto = &input[..self.position.min(input.len())];
        let line = upto.matches('\n').count() + 1;
        let col = upto.rsplit('\n').next().map(|s| s.chars().count()).unwrap_or(0) + 1;
        (line, col)
    }
}

/// Top-level error type for tradelab.
#[derive(Debug, thiserror::Error)]
pub enum TradelabError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error("no data for {symbol} on {exchange}")]
    NoData { symbol: String, exchange: String },

    #[error("unknown strategy '{name}'")]
    UnknownStrategy { name: String },

    #[error("invalid parameter {name} for {strategy}: {reason}")]
    InvalidParameter {
        strategy: String,
        name: String,
        reason: String,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&TradelabError> for std::process::ExitCode {
    fn from(err: &TradelabError) -> Self {
        let code: u8 = match err {
            TradelabError::Io(_) => 1,
            TradelabError::ConfigParse { .. }
            | TradelabError::ConfigMissing { .. }
            | TradelabError::ConfigInvalid { .. } => 2,
            TradelabError::Data { .. } => 3,
            TradelabError::UnknownStrategy { .. }
            | TradelabError::InvalidParameter { .. }
            | TradelabError::Validation(_) => 4,
            TradelabError::NoData { .. } => 5,
            TradelabError::Execution(_) => 6,
        };
        std::process::ExitCode::from(code)
    }
}
