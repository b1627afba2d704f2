//! # Forecast Math
//!
//! Numeric building blocks shared by the forecasting pipeline.
//! This crate has no knowledge of panels, provinces or calendars; it works on
//! plain slices and small dense systems.

use thiserror::Error;

pub mod accuracy;
pub mod lag_polynomial;
pub mod linalg;
pub mod optimization;
pub mod rolling;

/// Errors that can occur in numeric calculations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MathError {
    #[error("Insufficient data for calculation: {0}")]
    InsufficientData(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),
}

/// Result type for numeric operations
pub type Result<T> = std::result::Result<T, MathError>;
