//! Error types for the fuel_forecast crate

use chrono::NaiveDate;
use polars::prelude::PolarsError;
use thiserror::Error;

/// Custom error types for the fuel_forecast crate
#[derive(Debug, Error)]
pub enum ForecastError {
    /// A missing month could not be imputed from its neighbours or its predecessor
    #[error("Data gap: no value to impute {entity} at {date}")]
    DataGap { entity: String, date: NaiveDate },

    /// The split cutoff leaves no training rows
    #[error("Insufficient history: no training rows before {cutoff}")]
    InsufficientHistory { cutoff: NaiveDate },

    /// Every candidate model failed for an entity
    #[error("Model fit error for {entity}: {reason}")]
    ModelFit { entity: String, reason: String },

    /// A hyperparameter grid produced no candidates
    #[error("Empty hyperparameter grid for {family}")]
    EmptyGrid { family: String },

    /// The inverted percentage error is not defined for this row
    #[error("Score undefined for actual={actual}, predicted={predicted}")]
    ScoreUndefined { actual: f64, predicted: f64 },

    /// Error related to data validation or processing
    #[error("Data error: {0}")]
    DataError(String),

    /// Error related to parameter validation
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Error from invalid parameters
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Error from numeric helpers
    #[error("Math error: {0}")]
    MathError(#[from] forecast_math::MathError),

    /// Error from IO operations
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error from Polars operations
    #[error("Polars error: {0}")]
    PolarsError(String),

    /// Error from JSON (de)serialization
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Error from CSV export
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
}

/// Result type with our custom error
pub type Result<T> = std::result::Result<T, ForecastError>;

impl From<PolarsError> for ForecastError {
    fn from(err: PolarsError) -> Self {
        ForecastError::PolarsError(err.to_string())
    }
}
