//! Additive trend + yearly seasonality model
//!
//! `y(t) = trend(t) + seasonality(t)` where the trend is piecewise linear with
//! changepoints in the early part of the history and the seasonality is a
//! Fourier series over the month of the year. The model works on a fixed
//! `ds`/`y` schema; [`AdditiveAdapter`] maps caller columns onto it.

use crate::data::{column, float_values, string_values, Features};
use crate::error::{ForecastError, Result};
use crate::models::params::{ParamReader, ParamSet};
use crate::models::sarima::entity_series;
use crate::models::EntityFailure;
use crate::utils::{month_index, parse_month, shift_months};
use chrono::NaiveDate;
use forecast_math::linalg::ridge_least_squares;
use ndarray::Array1;
use polars::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use tracing::{debug_span, warn};

/// Ridge added to unpenalised columns so short histories stay solvable
const JITTER: f64 = 1e-9;

pub const DS: &str = "ds";
pub const Y: &str = "y";

/// Settings of the additive family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdditiveParams {
    /// Number of potential trend changepoints
    pub n_changepoints: usize,
    /// Share of the history in which changepoints are placed
    pub changepoint_range: f64,
    /// Prior scale of changepoint deltas; smaller is smoother
    pub changepoint_prior_scale: f64,
    /// Number of yearly Fourier pairs
    pub seasonality_order: usize,
    /// Coverage of the uncertainty interval
    pub interval_width: f64,
}

impl Default for AdditiveParams {
    fn default() -> Self {
        Self {
            n_changepoints: 25,
            changepoint_range: 0.8,
            changepoint_prior_scale: 0.05,
            seasonality_order: 3,
            interval_width: 0.8,
        }
    }
}

impl AdditiveParams {
    pub fn from_params(family: &str, params: &ParamSet) -> Result<Self> {
        let defaults = Self::default();
        let mut reader = ParamReader::new(family, params);
        let parsed = Self {
            n_changepoints: reader.usize("n_changepoints", defaults.n_changepoints)?,
            changepoint_range: reader.float("changepoint_range", defaults.changepoint_range)?,
            changepoint_prior_scale: reader
                .float("changepoint_prior_scale", defaults.changepoint_prior_scale)?,
            seasonality_order: reader.usize("seasonality_order", defaults.seasonality_order)?,
            interval_width: reader.float("interval_width", defaults.interval_width)?,
        };
        reader.finish()?;
        parsed.validate(family)?;
        Ok(parsed)
    }

    fn validate(&self, family: &str) -> Result<()> {
        let fail = |msg: &str| Err(ForecastError::InvalidParameter(format!("{family}: {msg}")));
        if !(self.changepoint_range > 0.0 && self.changepoint_range <= 1.0) {
            return fail("changepoint_range must be in (0, 1]");
        }
        if !(self.changepoint_prior_scale > 0.0) {
            return fail("changepoint_prior_scale must be positive");
        }
        // sin(2π·6·m/12) vanishes on whole months
        if self.seasonality_order > 5 {
            return fail("seasonality_order must be at most 5 for monthly data");
        }
        if !(self.interval_width > 0.0 && self.interval_width < 1.0) {
            return fail("interval_width must be in (0, 1)");
        }
        Ok(())
    }
}

/// Decomposed prediction for one month
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdditiveComponents {
    pub trend: f64,
    pub seasonal: f64,
    pub yhat: f64,
    pub yhat_lower: f64,
    pub yhat_upper: f64,
}

/// A fitted additive model for one series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdditiveModel {
    origin: i32,
    span: f64,
    y_scale: f64,
    changepoints: Vec<f64>,
    seasonality_order: usize,
    coefficients: Vec<f64>,
    sigma: f64,
    z: f64,
}

impl AdditiveModel {
    /// Fit to `values` observed at `dates` (month starts, ascending)
    pub fn fit(dates: &[NaiveDate], values: &[f64], params: &AdditiveParams) -> Result<Self> {
        if dates.len() != values.len() {
            return Err(ForecastError::ValidationError(format!(
                "{} dates for {} values",
                dates.len(),
                values.len()
            )));
        }
        if values.len() < 3 {
            return Err(ForecastError::DataError(format!(
                "Additive model needs at least 3 observations, got {}",
                values.len()
            )));
        }

        let indices: Vec<i32> = dates.iter().map(|d| month_index(*d)).collect();
        let origin = indices[0];
        let span = (indices[indices.len() - 1] - origin).max(1) as f64;
        let y_scale = values.iter().fold(0.0_f64, |m, v| m.max(v.abs())).max(f64::EPSILON);
        let t: Vec<f64> = indices.iter().map(|i| (i - origin) as f64 / span).collect();

        let history_end = ((params.changepoint_range * (t.len() - 1) as f64).floor() as usize).max(1);
        let n_changepoints = params.n_changepoints.min(history_end.saturating_sub(1));
        let changepoints: Vec<f64> = (1..=n_changepoints)
            .map(|j| t[(j * history_end) / (n_changepoints + 1)])
            .collect();

        let mut model = Self {
            origin,
            span,
            y_scale,
            changepoints,
            seasonality_order: params.seasonality_order,
            coefficients: Vec::new(),
            sigma: 0.0,
            z: 0.0,
        };

        let design: Vec<Vec<f64>> = indices.iter().map(|&i| model.design_row(i)).collect();
        let scaled: Vec<f64> = values.iter().map(|v| v / y_scale).collect();
        let delta_penalty = 1.0 / params.changepoint_prior_scale.powi(2);
        let penalties: Vec<f64> = (0..model.n_columns())
            .map(|c| {
                if c >= 2 && c < 2 + model.changepoints.len() {
                    delta_penalty
                } else {
                    JITTER
                }
            })
            .collect();
        model.coefficients = ridge_least_squares(&design, &scaled, &penalties)?;

        let sse: f64 = design
            .iter()
            .zip(values)
            .map(|(row, y)| (y - model.evaluate(row)).powi(2))
            .sum();
        let dof = values.len().saturating_sub(model.n_columns()).max(1);
        model.sigma = (sse / dof as f64).sqrt();

        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| ForecastError::InvalidParameter(format!("Normal distribution: {e}")))?;
        model.z = normal.inverse_cdf(0.5 + params.interval_width / 2.0);
        Ok(model)
    }

    fn n_columns(&self) -> usize {
        2 + self.changepoints.len() + 2 * self.seasonality_order
    }

    fn scaled_time(&self, index: i32) -> f64 {
        (index - self.origin) as f64 / self.span
    }

    fn design_row(&self, index: i32) -> Vec<f64> {
        let t = self.scaled_time(index);
        let mut row = Vec::with_capacity(self.n_columns());
        row.push(1.0);
        row.push(t);
        row.extend(self.changepoints.iter().map(|s| (t - s).max(0.0)));
        for k in 1..=self.seasonality_order {
            let angle = 2.0 * PI * k as f64 * index.rem_euclid(12) as f64 / 12.0;
            row.push(angle.sin());
            row.push(angle.cos());
        }
        row
    }

    fn evaluate(&self, row: &[f64]) -> f64 {
        row.iter().zip(&self.coefficients).map(|(x, b)| x * b).sum::<f64>() * self.y_scale
    }

    /// Trend, seasonality and interval for a month
    pub fn components(&self, date: NaiveDate) -> AdditiveComponents {
        let row = self.design_row(month_index(date));
        let trend_width = 2 + self.changepoints.len();
        let trend: f64 = row[..trend_width]
            .iter()
            .zip(&self.coefficients)
            .map(|(x, b)| x * b)
            .sum::<f64>()
            * self.y_scale;
        let yhat = self.evaluate(&row);
        let margin = self.z * self.sigma;
        AdditiveComponents {
            trend,
            seasonal: yhat - trend,
            yhat,
            yhat_lower: yhat - margin,
            yhat_upper: yhat + margin,
        }
    }

    pub fn predict(&self, date: NaiveDate) -> f64 {
        self.components(date).yhat
    }

    /// Residual standard deviation on the original scale
    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Fit from a frame already in `ds`/`y` schema
    pub fn fit_frame(df: &DataFrame, params: &AdditiveParams) -> Result<Self> {
        let dates: Vec<NaiveDate> = string_values(column(df, DS)?)?
            .into_iter()
            .map(|d| match d {
                Some(text) => parse_month(&text, "%Y-%m-%d"),
                None => Err(ForecastError::DataError("Null ds value".to_string())),
            })
            .collect::<Result<_>>()?;
        let values: Vec<f64> = float_values(column(df, Y)?)?
            .into_iter()
            .map(|v| v.ok_or_else(|| ForecastError::DataError("Null y value".to_string())))
            .collect::<Result<_>>()?;
        Self::fit(&dates, &values, params)
    }

    /// Components for each date as a frame with `ds`, `trend`, `yhat`,
    /// `yhat_lower` and `yhat_upper`
    pub fn predict_frame(&self, dates: &[NaiveDate]) -> Result<DataFrame> {
        let parts: Vec<AdditiveComponents> = dates.iter().map(|d| self.components(*d)).collect();
        let ds: Vec<String> = dates.iter().map(|d| d.format("%Y-%m-%d").to_string()).collect();
        Ok(DataFrame::new(vec![
            Series::new(DS, ds),
            Series::new("trend", parts.iter().map(|c| c.trend).collect::<Vec<_>>()),
            Series::new("yhat", parts.iter().map(|c| c.yhat).collect::<Vec<_>>()),
            Series::new("yhat_lower", parts.iter().map(|c| c.yhat_lower).collect::<Vec<_>>()),
            Series::new("yhat_upper", parts.iter().map(|c| c.yhat_upper).collect::<Vec<_>>()),
        ])?)
    }
}

/// Maps a caller's (date, target) columns onto the model's `ds`/`y` schema
/// and the model's components back onto caller-chosen names.
///
/// Frames are copied; the caller's columns are never renamed in place.
#[derive(Debug, Clone, PartialEq)]
pub struct AdditiveAdapter {
    date_column: String,
    target_column: String,
    prefix: String,
}

impl AdditiveAdapter {
    pub fn new(date_column: &str, target_column: &str) -> Self {
        Self {
            date_column: date_column.to_string(),
            target_column: target_column.to_string(),
            prefix: "additive".to_string(),
        }
    }

    /// Prefix of the component columns returned by [`AdditiveAdapter::forecast`]
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    /// Copy of the caller's date and target columns named `ds` and `y`
    pub fn to_model_frame(&self, df: &DataFrame) -> Result<DataFrame> {
        let mut frame = df.select([self.date_column.as_str(), self.target_column.as_str()])?;
        frame.rename(&self.date_column, DS)?;
        frame.rename(&self.target_column, Y)?;
        Ok(frame)
    }

    pub fn fit(&self, df: &DataFrame, params: &AdditiveParams) -> Result<AdditiveModel> {
        AdditiveModel::fit_frame(&self.to_model_frame(df)?, params)
    }

    /// Component frame with the caller's date column and prefixed names,
    /// e.g. `additive_yhat`
    pub fn forecast(&self, model: &AdditiveModel, dates: &[NaiveDate]) -> Result<DataFrame> {
        let mut frame = model.predict_frame(dates)?;
        frame.rename(DS, &self.date_column)?;
        for name in ["trend", "yhat", "yhat_lower", "yhat_upper"] {
            frame.rename(name, &format!("{}_{name}", self.prefix))?;
        }
        Ok(frame)
    }
}

/// Per-entity additive models with the entities that could not be fitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdditiveBundle {
    models: BTreeMap<String, AdditiveModel>,
    failures: Vec<EntityFailure>,
}

impl AdditiveBundle {
    pub fn fit(x: &Features, y: &Array1<f64>, params: &AdditiveParams) -> Result<Self> {
        let series = entity_series(x, y)?;
        let outcomes: Vec<(String, Result<AdditiveModel>)> = series
            .par_iter()
            .map(|(entity, (start, values))| {
                let span = debug_span!("additive_fit", %entity);
                let _guard = span.enter();
                let dates = (0..values.len())
                    .map(|i| shift_months(*start, i as i32))
                    .collect::<Result<Vec<_>>>();
                let fitted = dates.and_then(|d| AdditiveModel::fit(&d, values, params));
                (entity.clone(), fitted)
            })
            .collect();

        let mut models = BTreeMap::new();
        let mut failures = Vec::new();
        for (entity, outcome) in outcomes {
            match outcome {
                Ok(model) => {
                    models.insert(entity, model);
                }
                Err(e) => {
                    warn!(%entity, reason = %e, "Additive model failed for entity");
                    failures.push(EntityFailure {
                        entity,
                        reason: e.to_string(),
                    });
                }
            }
        }
        if models.is_empty() {
            return Err(ForecastError::ModelFit {
                entity: failures
                    .iter()
                    .map(|f| f.entity.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                reason: "no additive model could be fitted for any entity".to_string(),
            });
        }
        Ok(Self { models, failures })
    }

    pub fn predict(&self, x: &Features) -> Result<Array1<f64>> {
        Ok(x.keys
            .iter()
            .map(|key| {
                self.models
                    .get(&key.entity)
                    .map_or(f64::NAN, |m| m.predict(key.date))
            })
            .collect())
    }

    pub fn failures(&self) -> &[EntityFailure] {
        &self.failures
    }
}
