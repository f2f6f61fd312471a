//! Typed job parameter payloads and their validation.
//!
//! Jobs carry an opaque JSON payload through the store; this module is where
//! that payload is checked for well-formedness *before* any job state is
//! created. Validation failures are synchronous [`CoreError::Validation`]s.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::CoreError;
use crate::types::JobKind;

/// Parameters for a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BacktestParams {
    #[validate(length(min = 1, message = "symbol must not be empty"))]
    pub symbol: String,

    #[validate(length(min = 1, message = "exchange must not be empty"))]
    pub exchange: String,

    #[validate(length(min = 1, message = "strategy must not be empty"))]
    pub strategy: String,

    /// Inclusive range start, `YYYY-MM-DD`.
    #[serde(rename = "start")]
    #[validate(custom(function = "validate_date"))]
    pub start_date: String,

    /// Inclusive range end, `YYYY-MM-DD`. Must not precede `start`.
    #[serde(rename = "end")]
    #[validate(custom(function = "validate_date"))]
    pub end_date: String,

    /// Free-form strategy parameter overrides, passed through to the tool.
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

/// Parameters for a parameter-optimization run.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OptimizeParams {
    #[serde(flatten)]
    #[validate(nested)]
    pub backtest: BacktestParams,

    /// Search method: `grid`, `genetic`, or `random`.
    #[validate(custom(function = "validate_method"))]
    pub method: String,

    /// Per-parameter `[low, high]` search bounds.
    #[serde(default)]
    pub parameter_ranges: HashMap<String, [f64; 2]>,

    /// Number of optimization iterations the tool should perform.
    #[validate(range(min = 1, max = 100_000))]
    #[serde(default = "default_iterations")]
    pub iterations: u32,
}

fn default_iterations() -> u32 {
    100
}

fn validate_date(value: &str) -> Result<(), ValidationError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| ValidationError::new("date").with_message("expected YYYY-MM-DD".into()))
}

fn validate_method(value: &str) -> Result<(), ValidationError> {
    match value {
        "grid" | "genetic" | "random" => Ok(()),
        _ => Err(ValidationError::new("method")
            .with_message("method must be one of: grid, genetic, random".into())),
    }
}

impl BacktestParams {
    /// Cross-field check that the date range is ordered.
    fn check_range(&self) -> Result<(), CoreError> {
        let start = NaiveDate::parse_from_str(&self.start_date, "%Y-%m-%d");
        let end = NaiveDate::parse_from_str(&self.end_date, "%Y-%m-%d");
        if let (Ok(s), Ok(e)) = (start, end) {
            if e < s {
                return Err(CoreError::Validation(
                    "end date must not precede start date".into(),
                ));
            }
        }
        Ok(())
    }
}

impl OptimizeParams {
    fn check_ranges(&self) -> Result<(), CoreError> {
        for (name, [lo, hi]) in &self.parameter_ranges {
            if !(lo.is_finite() && hi.is_finite()) || lo > hi {
                return Err(CoreError::Validation(format!(
                    "parameter range for \"{name}\" must be a finite [low, high] pair"
                )));
            }
        }
        Ok(())
    }
}

/// Validate an opaque params payload for the given job kind.
///
/// Performs both shape validation (deserialization into the typed struct)
/// and field/cross-field validation. No state is mutated on failure.
pub fn validate_params(kind: JobKind, params: &serde_json::Value) -> Result<(), CoreError> {
    match kind {
        JobKind::Backtest => {
            let parsed: BacktestParams = deserialize(params)?;
            parsed.validate().map_err(validation_error)?;
            parsed.check_range()
        }
        JobKind::Optimize => {
            let parsed: OptimizeParams = deserialize(params)?;
            parsed.validate().map_err(validation_error)?;
            parsed.backtest.check_range()?;
            parsed.check_ranges()
        }
    }
}

fn deserialize<T: serde::de::DeserializeOwned>(params: &serde_json::Value) -> Result<T, CoreError> {
    serde_json::from_value(params.clone())
        .map_err(|e| CoreError::Validation(format!("malformed params: {e}")))
}

fn validation_error(errors: validator::ValidationErrors) -> CoreError {
    CoreError::Validation(errors.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
