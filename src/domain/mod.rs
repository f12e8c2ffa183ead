//! Core domain types and logic.

pub mod ohlcv;
pub mod indicator;
pub mod signal;
pub mod strategy;
pub mod backtest;
pub mod metrics;
pub mod sandbox;
pub mod config_validation;
pub mod error;
