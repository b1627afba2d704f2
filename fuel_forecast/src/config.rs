//! Pipeline configuration
//!
//! Every section deserialises with defaults, so a JSON file only has to name
//! what it changes. Components receive their own section; only the binary
//! reads configuration from disk.

use crate::error::{ForecastError, Result};
use crate::models::{EstimatorFamily, ParamGrid, ParamSet};
use std::collections::BTreeMap;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration of a forecasting run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Name of the target column in raw data
    pub target_column: String,
    /// Name of the date column in raw data
    pub date_column: String,
    /// Name of the entity column in raw data
    pub entity_column: String,
    /// Where the binary reads its inputs from
    pub sources: SourceConfig,
    pub preprocess: PreprocessConfig,
    pub imputation: ImputationConfig,
    pub features: FeatureConfig,
    pub split: SplitConfig,
    /// Hyperparameter search; `None` fits every estimator with its init params
    pub search: Option<SearchConfig>,
    /// Candidate estimator families
    pub estimators: Vec<EstimatorConfig>,
    /// Number of repeated fit/score runs
    pub runs: usize,
    /// Worker threads for feature derivation and per-entity fits (`None` = all cores)
    pub n_jobs: Option<usize>,
    /// Save fitted models when set
    pub persistence: Option<PersistenceConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_column: "current_month_consumption".to_string(),
            date_column: "date".to_string(),
            entity_column: "province".to_string(),
            sources: SourceConfig::default(),
            preprocess: PreprocessConfig::default(),
            imputation: ImputationConfig::default(),
            features: FeatureConfig::default(),
            split: SplitConfig::default(),
            search: None,
            estimators: Vec::new(),
            runs: 1,
            n_jobs: None,
            persistence: None,
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.runs == 0 {
            return Err(ForecastError::ValidationError(
                "runs must be at least 1".to_string(),
            ));
        }
        if self.n_jobs == Some(0) {
            return Err(ForecastError::ValidationError(
                "n_jobs must be positive when set".to_string(),
            ));
        }
        if self.estimators.is_empty() {
            return Err(ForecastError::ValidationError(
                "At least one estimator must be configured".to_string(),
            ));
        }
        // Aliases resolve to one family, whose results and model files are keyed by it
        let mut families = BTreeMap::new();
        for estimator in &self.estimators {
            let family = EstimatorFamily::from_name(&estimator.family)?;
            if let Some(previous) = families.insert(family.canonical_name(), estimator.family.as_str()) {
                return Err(ForecastError::ValidationError(format!(
                    "Estimators '{previous}' and '{}' are both {}",
                    estimator.family,
                    family.canonical_name()
                )));
            }
        }
        self.imputation.validate()?;
        self.features.validate()?;
        self.split.validate()?;
        if let Some(search) = &self.search {
            search.validate()?;
        }
        if let (Some(start), Some(end)) = (self.sources.start, self.sources.end) {
            if end < start {
                return Err(ForecastError::ValidationError(format!(
                    "Malformed date range: {start} is after {end}"
                )));
            }
        }
        Ok(())
    }
}

/// File locations and fetch filters used by the binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// CSV with raw monthly records
    pub raw_data: PathBuf,
    /// CSV with yearly population per entity
    pub population: Option<PathBuf>,
    /// First month to fetch
    pub start: Option<NaiveDate>,
    /// Last month to fetch
    pub end: Option<NaiveDate>,
    /// Fetch a single entity only
    pub entity_filter: Option<String>,
    /// Cap on fetched rows
    pub row_limit: Option<usize>,
    /// Movable holidays not covered by the fixed calendar
    pub extra_holidays: Vec<NaiveDate>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            raw_data: PathBuf::from("data/consumption.csv"),
            population: None,
            start: None,
            end: None,
            entity_filter: None,
            row_limit: None,
            extra_holidays: Vec::new(),
        }
    }
}

/// Cleanup applied before completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Entities removed from the panel (aggregate rows)
    pub drop_entities: Vec<String>,
    /// Integral targets above this are divided by 1000; `None` disables the repair
    pub anomaly_threshold: Option<f64>,
    /// `chrono` format of the raw date column
    pub date_format: String,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            drop_entities: Vec::new(),
            anomaly_threshold: Some(100_000.0),
            date_format: "%Y-%m-%d".to_string(),
        }
    }
}

/// Missing-month imputation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImputationConfig {
    /// Half-width of the symmetric neighbour window
    pub months: usize,
}

impl Default for ImputationConfig {
    fn default() -> Self {
        Self { months: 3 }
    }
}

impl ImputationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.months == 0 {
            return Err(ForecastError::InvalidParameter(
                "imputation.months must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Statistical-model predictions appended as features.
///
/// Both models are fitted on each entity's whole completed series, test
/// month included, so their columns carry information from the months being
/// scored. Leave them off when test scores must be leakage free.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticalFeatureConfig {
    /// Append `arima_prediction`
    pub arima: bool,
    /// Append the additive model's trend, yhat and interval
    pub additive: bool,
}

/// Feature derivation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Number of autoregressive months (`K`)
    pub num_of_auto_reg_months: usize,
    /// Country code passed to the holiday calendar
    pub country_code: String,
    /// First month flagged as COVID-affected
    pub covid_start: NaiveDate,
    /// Last month flagged as COVID-affected
    pub covid_end: NaiveDate,
    /// Raw covariates copied into the feature table
    pub extra_covariates: Vec<String>,
    /// Join yearly population from the demographic source
    pub population: bool,
    pub statistical: StatisticalFeatureConfig,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            num_of_auto_reg_months: 3,
            country_code: "TR".to_string(),
            covid_start: NaiveDate::from_ymd_opt(2020, 4, 1).unwrap_or_default(),
            covid_end: NaiveDate::from_ymd_opt(2021, 6, 1).unwrap_or_default(),
            extra_covariates: Vec::new(),
            population: true,
            statistical: StatisticalFeatureConfig::default(),
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_of_auto_reg_months == 0 {
            return Err(ForecastError::InvalidParameter(
                "features.num_of_auto_reg_months must be at least 1".to_string(),
            ));
        }
        if self.covid_end < self.covid_start {
            return Err(ForecastError::InvalidParameter(format!(
                "COVID window ends ({}) before it starts ({})",
                self.covid_end, self.covid_start
            )));
        }
        Ok(())
    }
}

/// Train/test split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Months between the last observed month and the test month
    pub lag: usize,
    /// Sort both sides by (date, entity)
    pub index_by_entity: bool,
    /// Keep only the last `n_months` of training history
    pub n_months: Option<usize>,
    /// Fraction of training rows held out at random
    pub validation_size: Option<f64>,
    /// Seed of the validation draw
    pub validation_seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            lag: 1,
            index_by_entity: true,
            n_months: None,
            validation_size: None,
            validation_seed: 12,
        }
    }
}

impl SplitConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(size) = self.validation_size {
            if !(size > 0.0 && size < 1.0) {
                return Err(ForecastError::InvalidParameter(format!(
                    "split.validation_size must be in (0, 1), got {size}"
                )));
            }
        }
        if self.n_months == Some(0) {
            return Err(ForecastError::InvalidParameter(
                "split.n_months must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// How candidates are drawn from a grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchStrategy {
    /// Every point of the cartesian product
    Grid,
    /// `n_iter` distinct points drawn with a seeded generator
    Random { n_iter: usize, seed: u64 },
}

/// Cross-validation scoring, higher is better
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scoring {
    #[serde(rename = "neg_mean_absolute_percentage_error")]
    NegMeanAbsolutePercentageError,
    #[serde(rename = "neg_mean_absolute_error")]
    NegMeanAbsoluteError,
    #[serde(rename = "neg_root_mean_squared_error")]
    NegRootMeanSquaredError,
}

impl Default for Scoring {
    fn default() -> Self {
        Scoring::NegMeanAbsolutePercentageError
    }
}

/// Hyperparameter search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub strategy: SearchStrategy,
    /// Number of forward-chaining folds
    pub n_splits: usize,
    /// Rows per test fold; defaults to the number of entities
    pub test_size: Option<usize>,
    /// Rows skipped between train and test of a fold
    pub gap: usize,
    pub scoring: Scoring,
    /// Worker threads (`None` = all cores)
    pub n_jobs: Option<usize>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            strategy: SearchStrategy::Grid,
            n_splits: 5,
            test_size: None,
            gap: 0,
            scoring: Scoring::default(),
            n_jobs: None,
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_splits < 2 {
            return Err(ForecastError::InvalidParameter(format!(
                "search.n_splits must be at least 2, got {}",
                self.n_splits
            )));
        }
        if self.test_size == Some(0) {
            return Err(ForecastError::InvalidParameter(
                "search.test_size must be positive when set".to_string(),
            ));
        }
        if let SearchStrategy::Random { n_iter: 0, .. } = self.strategy {
            return Err(ForecastError::InvalidParameter(
                "search.strategy.n_iter must be positive".to_string(),
            ));
        }
        if self.n_jobs == Some(0) {
            return Err(ForecastError::InvalidParameter(
                "search.n_jobs must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// One candidate estimator family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Family name or alias, e.g. `gbt_depthwise` or `xgboost`
    pub family: String,
    /// Parameters used as-is, or as the base of every search candidate
    #[serde(default)]
    pub init_params: ParamSet,
    /// Search space overriding `init_params`
    #[serde(default)]
    pub grid: ParamGrid,
}

/// Model persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Directory receiving `<name>.json` files
    pub model_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParamValue;

    #[test]
    fn test_minimal_json_uses_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{"estimators": [{"family": "xgboost", "grid": {"max_depth": [2, 3]}}]}"#,
        )
        .unwrap();
        assert_eq!(config.target_column, "current_month_consumption");
        assert_eq!(config.imputation.months, 3);
        assert_eq!(config.split.validation_seed, 12);
        assert_eq!(config.estimators[0].grid["max_depth"][1], ParamValue::Int(3));
    }

    #[test]
    fn test_search_section() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "estimators": [{"family": "sarima"}],
                "search": {
                    "strategy": {"type": "random", "n_iter": 4, "seed": 7},
                    "scoring": "neg_mean_absolute_error",
                    "n_splits": 3
                }
            }"#,
        )
        .unwrap();
        let search = config.search.unwrap();
        assert_eq!(search.strategy, SearchStrategy::Random { n_iter: 4, seed: 7 });
        assert_eq!(search.scoring, Scoring::NegMeanAbsoluteError);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let zero_months = r#"{"estimators": [{"family": "sarima"}], "imputation": {"months": 0}}"#;
        assert!(matches!(
            PipelineConfig::from_json_str(zero_months),
            Err(ForecastError::InvalidParameter(_))
        ));
        let bad_validation =
            r#"{"estimators": [{"family": "sarima"}], "split": {"validation_size": 1.5}}"#;
        assert!(PipelineConfig::from_json_str(bad_validation).is_err());
        assert!(PipelineConfig::from_json_str("{}").is_err());
    }

    #[test]
    fn test_aliases_of_one_family_are_rejected() {
        let aliased = r#"{"estimators": [{"family": "xgboost"}, {"family": "gbt_depthwise"}]}"#;
        match PipelineConfig::from_json_str(aliased) {
            Err(ForecastError::ValidationError(message)) => assert!(message.contains("gbt_depthwise")),
            other => panic!("Expected ValidationError, got {other:?}"),
        }
        let unknown = r#"{"estimators": [{"family": "random_forest"}]}"#;
        assert!(matches!(
            PipelineConfig::from_json_str(unknown),
            Err(ForecastError::InvalidParameter(_))
        ));
        let distinct = r#"{"estimators": [{"family": "xgboost"}, {"family": "lightgbm"}]}"#;
        assert!(PipelineConfig::from_json_str(distinct).is_ok());
    }
}
