//! # Fuel Forecast
//!
//! A batch pipeline forecasting monthly fuel consumption per province.
//!
//! ## Features
//!
//! - Panel completion with symmetric-window imputation
//! - Per-entity features: last-year totals, lags, lag shares, rolling means,
//!   calendar and holiday counts, population and optional statistical-model
//!   predictions
//! - Time-respecting train/test split at `max(date) - lag`
//! - Gradient-boosted trees (depth-wise, leaf-wise and oblivious growth),
//!   per-entity seasonal ARIMA and an additive trend/seasonality model
//! - Grid and random hyperparameter search under forward-chaining folds
//! - Inverted-APE scoring and ranking of every (estimator, run)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fuel_forecast::config::PipelineConfig;
//! use fuel_forecast::pipeline::ForecastPipeline;
//! use fuel_forecast::sources::{CsvDataSource, NationalHolidayCalendar};
//! use chrono::NaiveDate;
//!
//! # fn main() -> fuel_forecast::Result<()> {
//! let config = PipelineConfig::from_json_file("pipeline.json")?;
//! let source = CsvDataSource::new(
//!     &config.sources.raw_data,
//!     &config.date_column,
//!     &config.entity_column,
//!     &config.target_column,
//! );
//! let calendar = NationalHolidayCalendar::new();
//!
//! let start = NaiveDate::from_ymd_opt(2019, 1, 1).unwrap();
//! let end = NaiveDate::from_ymd_opt(2022, 12, 1).unwrap();
//! let report = ForecastPipeline::new(config, &source, &calendar).run(start, end)?;
//!
//! for summary in &report.ranking {
//!     println!("{} run {}: {:.4}", summary.estimator, summary.run_id, summary.mean_score);
//! }
//! # Ok(())
//! # }
//! ```

pub mod calendar;
pub mod completion;
pub mod config;
pub mod data;
pub mod error;
pub mod features;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod preprocess;
pub mod search;
pub mod sources;
pub mod split;
pub mod utils;

// Re-export commonly used types
pub use crate::config::PipelineConfig;
pub use crate::data::{Dataset, FeatureTable, Panel, PanelRow, RawRecord, RowKey};
pub use crate::error::{ForecastError, Result};
pub use crate::metrics::{ape_score, ScoreBoard, ScoreSummary};
pub use crate::models::{EstimatorFamily, Fittable, ParamGrid, ParamSet, ParamValue, TrainedModel};
pub use crate::pipeline::{ForecastPipeline, PipelineReport};
pub use crate::sources::{DemographicSource, HolidayCalendar, ModelStore, RawDataSource};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
