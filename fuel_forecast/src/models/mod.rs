//! Candidate regressors for monthly consumption

pub mod additive;
pub mod boosting;
pub mod params;
pub mod sarima;
pub mod trees;

pub use params::{describe, ParamGrid, ParamReader, ParamSet, ParamValue};

use crate::data::Features;
use crate::error::{ForecastError, Result};
use additive::{AdditiveBundle, AdditiveParams};
use boosting::{BoostedEnsemble, BoostingParams};
use ndarray::Array1;
use sarima::{SarimaBundle, SarimaParams};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use trees::GrowthPolicy;

/// An entity a per-entity model could not be fitted for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFailure {
    pub entity: String,
    pub reason: String,
}

/// Something that can be fitted to a feature matrix
pub trait Fittable {
    /// Canonical family name
    fn name(&self) -> &str;

    /// Fit with the given hyperparameters; never mutates `self`
    fn fit(&self, x: &Features, y: &Array1<f64>, params: &ParamSet) -> Result<TrainedModel>;
}

/// The estimator families the pipeline can train
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EstimatorFamily {
    DepthWiseBoosting,
    LeafWiseBoosting,
    ObliviousBoosting,
    SeasonalArima,
    AdditiveTrend,
}

impl EstimatorFamily {
    pub const ALL: [EstimatorFamily; 5] = [
        EstimatorFamily::DepthWiseBoosting,
        EstimatorFamily::LeafWiseBoosting,
        EstimatorFamily::ObliviousBoosting,
        EstimatorFamily::SeasonalArima,
        EstimatorFamily::AdditiveTrend,
    ];

    /// Resolve a canonical name or one of its aliases
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "gbt_depthwise" | "xgboost" => Ok(Self::DepthWiseBoosting),
            "gbt_leafwise" | "lightgbm" => Ok(Self::LeafWiseBoosting),
            "gbt_oblivious" | "catboost" => Ok(Self::ObliviousBoosting),
            "sarima" | "arima" => Ok(Self::SeasonalArima),
            "additive" | "prophet" => Ok(Self::AdditiveTrend),
            other => Err(ForecastError::InvalidParameter(format!(
                "Unknown estimator family '{other}'"
            ))),
        }
    }

    pub fn canonical_name(&self) -> &'static str {
        match self {
            Self::DepthWiseBoosting => "gbt_depthwise",
            Self::LeafWiseBoosting => "gbt_leafwise",
            Self::ObliviousBoosting => "gbt_oblivious",
            Self::SeasonalArima => "sarima",
            Self::AdditiveTrend => "additive",
        }
    }

    /// Growth policy of the tree-ensemble families
    pub fn growth_policy(&self) -> Option<GrowthPolicy> {
        match self {
            Self::DepthWiseBoosting => Some(GrowthPolicy::DepthWise),
            Self::LeafWiseBoosting => Some(GrowthPolicy::LeafWise),
            Self::ObliviousBoosting => Some(GrowthPolicy::Oblivious),
            Self::SeasonalArima | Self::AdditiveTrend => None,
        }
    }

    /// Whether the family reads a `random_state` parameter
    pub fn is_seeded(&self) -> bool {
        self.growth_policy().is_some()
    }
}

impl FromStr for EstimatorFamily {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

impl fmt::Display for EstimatorFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

impl Fittable for EstimatorFamily {
    fn name(&self) -> &str {
        self.canonical_name()
    }

    fn fit(&self, x: &Features, y: &Array1<f64>, params: &ParamSet) -> Result<TrainedModel> {
        let name = self.canonical_name();
        match self.growth_policy() {
            Some(policy) => {
                let parsed = BoostingParams::from_params(policy, name, params)?;
                BoostedEnsemble::fit(policy, x, y, &parsed).map(TrainedModel::Boosted)
            }
            None if *self == Self::SeasonalArima => {
                let parsed = SarimaParams::from_params(name, params)?;
                SarimaBundle::fit(x, y, &parsed).map(TrainedModel::Sarima)
            }
            None => {
                let parsed = AdditiveParams::from_params(name, params)?;
                AdditiveBundle::fit(x, y, &parsed).map(TrainedModel::Additive)
            }
        }
    }
}

/// A fitted model; refitting produces a new value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", content = "model", rename_all = "snake_case")]
pub enum TrainedModel {
    Boosted(BoostedEnsemble),
    Sarima(SarimaBundle),
    Additive(AdditiveBundle),
}

impl TrainedModel {
    pub fn predict(&self, x: &Features) -> Result<Array1<f64>> {
        match self {
            TrainedModel::Boosted(model) => model.predict(x),
            TrainedModel::Sarima(model) => model.predict(x),
            TrainedModel::Additive(model) => model.predict(x),
        }
    }

    pub fn family_name(&self) -> &'static str {
        match self {
            TrainedModel::Boosted(_) => "boosted",
            TrainedModel::Sarima(_) => "sarima",
            TrainedModel::Additive(_) => "additive",
        }
    }

    /// Entities a per-entity model skipped
    pub fn failures(&self) -> &[EntityFailure] {
        match self {
            TrainedModel::Boosted(_) => &[],
            TrainedModel::Sarima(model) => model.failures(),
            TrainedModel::Additive(model) => model.failures(),
        }
    }
}
