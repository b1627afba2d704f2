//! Seasonal ARIMA fitted per entity by conditional sum of squares
//!
//! For an order (p,d,q)×(P,D,Q)ₛ the model is
//! `φ(B)Φ(Bˢ) (δ(B) y - μ) = θ(B)Θ(Bˢ) e` with `δ(B) = (1-B)ᵈ(1-Bˢ)ᴰ`.
//! All operators are expanded into dense lag polynomials once per
//! evaluation, so fitting, in-sample prediction and forecasting share the
//! same recursions.

use crate::data::Features;
use crate::error::{ForecastError, Result};
use crate::models::params::{ParamReader, ParamSet};
use crate::models::EntityFailure;
use crate::utils::{months_between, shift_months};
use chrono::NaiveDate;
use forecast_math::lag_polynomial::LagPolynomial;
use forecast_math::optimization::{nelder_mead, SimplexConfig};
use ndarray::Array1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fmt;
use tracing::{debug, debug_span, warn};

/// Coefficients are kept inside this box during minimisation
const COEFFICIENT_BOUND: f64 = 0.99;

/// Residual variance floor; a perfectly explained series still gets a finite AIC
const MIN_VARIANCE: f64 = 1e-10;

/// Non-seasonal and seasonal orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SarimaOrder {
    pub p: usize,
    pub d: usize,
    pub q: usize,
    pub seasonal_p: usize,
    pub seasonal_d: usize,
    pub seasonal_q: usize,
    pub period: usize,
}

impl SarimaOrder {
    pub fn new(p: usize, d: usize, q: usize) -> Self {
        Self {
            p,
            d,
            q,
            seasonal_p: 0,
            seasonal_d: 0,
            seasonal_q: 0,
            period: 12,
        }
    }

    pub fn seasonal(mut self, seasonal_p: usize, seasonal_d: usize, seasonal_q: usize, period: usize) -> Self {
        self.seasonal_p = seasonal_p;
        self.seasonal_d = seasonal_d;
        self.seasonal_q = seasonal_q;
        self.period = period;
        self
    }

    /// Number of ARMA coefficients
    pub fn n_coefficients(&self) -> usize {
        self.p + self.q + self.seasonal_p + self.seasonal_q
    }

    /// Whether a mean term is estimated (no differencing at all)
    pub fn has_intercept(&self) -> bool {
        self.d + self.seasonal_d == 0
    }

    /// Observations consumed by differencing and the AR operators before the
    /// first conditional residual
    pub fn conditioning_lag(&self) -> usize {
        (self.d + self.p) + (self.seasonal_d + self.seasonal_p) * self.period
    }

    /// Parameters counted by the AIC: coefficients, variance and intercept
    pub fn n_params(&self) -> usize {
        self.n_coefficients() + 1 + usize::from(self.has_intercept())
    }

    /// Whether a series of `n` observations leaves more residuals than parameters
    fn fits_in(&self, n: usize) -> bool {
        n > self.conditioning_lag() + self.n_params()
    }

    /// Every order with all six components in `0..=max_order`
    pub fn grid(max_order: usize, period: usize) -> Vec<Self> {
        let range = 0..=max_order;
        let mut orders = Vec::new();
        for p in range.clone() {
            for d in range.clone() {
                for q in range.clone() {
                    for sp in range.clone() {
                        for sd in range.clone() {
                            for sq in range.clone() {
                                orders.push(Self::new(p, d, q).seasonal(sp, sd, sq, period));
                            }
                        }
                    }
                }
            }
        }
        orders
    }

    fn differencing(&self) -> LagPolynomial {
        LagPolynomial::differencing(self.d, self.seasonal_d, self.period)
    }

    /// Expanded AR and MA operators for a coefficient vector laid out as
    /// `[φ.., θ.., Φ.., Θ..]`
    fn operators(&self, coefficients: &[f64]) -> (LagPolynomial, LagPolynomial) {
        let (phi, rest) = coefficients.split_at(self.p);
        let (theta, rest) = rest.split_at(self.q);
        let (seasonal_phi, seasonal_theta) = rest.split_at(self.seasonal_p);
        let ar = LagPolynomial::autoregressive(phi, 1)
            .multiply(&LagPolynomial::autoregressive(seasonal_phi, self.period));
        let ma = LagPolynomial::moving_average(theta, 1)
            .multiply(&LagPolynomial::moving_average(seasonal_theta, self.period));
        (ar, ma)
    }
}

impl fmt::Display for SarimaOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SARIMA({},{},{})({},{},{})[{}]",
            self.p, self.d, self.q, self.seasonal_p, self.seasonal_d, self.seasonal_q, self.period
        )
    }
}

/// Search settings of the seasonal ARIMA family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SarimaParams {
    /// Upper bound of every order component
    pub max_order: usize,
    /// Season length in months
    pub seasonal_period: usize,
    /// Nelder–Mead iterations per order
    pub max_iter: usize,
}

impl Default for SarimaParams {
    fn default() -> Self {
        Self {
            max_order: 1,
            seasonal_period: 12,
            max_iter: 500,
        }
    }
}

impl SarimaParams {
    pub fn from_params(family: &str, params: &ParamSet) -> Result<Self> {
        let defaults = Self::default();
        let mut reader = ParamReader::new(family, params);
        let parsed = Self {
            max_order: reader.usize("max_order", defaults.max_order)?,
            seasonal_period: reader.usize("seasonal_period", defaults.seasonal_period)?,
            max_iter: reader.usize("max_iter", defaults.max_iter)?,
        };
        reader.finish()?;
        if parsed.seasonal_period < 2 {
            return Err(ForecastError::InvalidParameter(format!(
                "{family}: seasonal_period must be at least 2"
            )));
        }
        if parsed.max_iter == 0 {
            return Err(ForecastError::InvalidParameter(format!(
                "{family}: max_iter must be positive"
            )));
        }
        Ok(parsed)
    }
}

/// Conditional residuals; the first `ar.degree()` entries are zero
fn css_residuals(z: &[f64], ar: &LagPolynomial, ma: &LagPolynomial) -> Vec<f64> {
    let start = ar.degree();
    let mut residuals = vec![0.0; z.len()];
    for t in start..z.len() {
        let autoregressive: f64 = ar
            .coefficients()
            .iter()
            .enumerate()
            .map(|(k, a)| a * z[t - k])
            .sum();
        let moving_average: f64 = (1..=ma.degree().min(t))
            .map(|k| ma.coefficient(k) * residuals[t - k])
            .sum();
        residuals[t] = autoregressive - moving_average;
    }
    residuals
}

/// Sum of squared residuals from index `skip` of the differenced series on
fn conditional_sum_of_squares(z: &[f64], ar: &LagPolynomial, ma: &LagPolynomial, skip: usize) -> f64 {
    css_residuals(z, ar, ma)
        .iter()
        .skip(skip.max(ar.degree()))
        .map(|e| e * e)
        .sum()
}

/// A seasonal ARIMA fitted to one entity's series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SarimaModel {
    order: SarimaOrder,
    coefficients: Vec<f64>,
    intercept: f64,
    sigma2: f64,
    aic: f64,
    start: NaiveDate,
    history: Vec<f64>,
    fitted: Vec<f64>,
}

impl SarimaModel {
    /// Fit a single order to a monthly series starting at `start`,
    /// conditioning on the order's own lag
    pub fn fit(start: NaiveDate, series: &[f64], order: SarimaOrder, max_iter: usize) -> Result<Self> {
        Self::fit_conditioned(start, series, order, max_iter, order.conditioning_lag())
    }

    /// Fit with the likelihood taken over `series[condition..]` only.
    ///
    /// AICs are comparable between orders only when they share `condition`.
    /// It is raised to the order's own lag when smaller.
    pub fn fit_conditioned(
        start: NaiveDate,
        series: &[f64],
        order: SarimaOrder,
        max_iter: usize,
        condition: usize,
    ) -> Result<Self> {
        let condition = condition.max(order.conditioning_lag());
        let delta = order.differencing();
        let w = delta.apply(series);
        let intercept = if order.has_intercept() && !w.is_empty() {
            w.iter().sum::<f64>() / w.len() as f64
        } else {
            0.0
        };
        let z: Vec<f64> = w.iter().map(|v| v - intercept).collect();

        let n_coefficients = order.n_coefficients();
        let n_effective = series.len().saturating_sub(condition);
        let n_params = order.n_params();
        // Residual index of `series[condition]` in the differenced series
        let skip = condition - delta.degree();
        if n_effective <= n_params {
            return Err(ForecastError::DataError(format!(
                "{order}: {n_effective} usable observations for {n_params} parameters"
            )));
        }

        let bounds = vec![(-COEFFICIENT_BOUND, COEFFICIENT_BOUND); n_coefficients];
        let config = SimplexConfig {
            max_iter,
            ..Default::default()
        };
        let minimum = nelder_mead(
            |c| {
                let (ar, ma) = order.operators(c);
                conditional_sum_of_squares(&z, &ar, &ma, skip)
            },
            &vec![0.0; n_coefficients],
            Some(&bounds),
            &config,
        );
        if !minimum.converged {
            debug!(%order, iterations = minimum.iterations, "CSS minimisation did not converge");
        }
        if !minimum.value.is_finite() {
            return Err(ForecastError::DataError(format!(
                "{order}: non-finite sum of squares"
            )));
        }

        let sigma2 = (minimum.value / n_effective as f64).max(MIN_VARIANCE);
        let aic = n_effective as f64 * (1.0 + (2.0 * PI).ln() + sigma2.ln()) + 2.0 * n_params as f64;

        let (ar, ma) = order.operators(&minimum.point);
        let residuals = css_residuals(&z, &ar, &ma);
        let warmup = delta.degree() + ar.degree();
        let fitted = series
            .iter()
            .enumerate()
            .map(|(t, y)| {
                if t >= warmup {
                    y - residuals[t - delta.degree()]
                } else if t > 0 {
                    series[t - 1]
                } else {
                    *y
                }
            })
            .collect();

        Ok(Self {
            order,
            coefficients: minimum.point,
            intercept,
            sigma2,
            aic,
            start,
            history: series.to_vec(),
            fitted,
        })
    }

    pub fn order(&self) -> SarimaOrder {
        self.order
    }

    pub fn aic(&self) -> f64 {
        self.aic
    }

    pub fn sigma2(&self) -> f64 {
        self.sigma2
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Month after the last observation
    pub fn end(&self) -> Result<NaiveDate> {
        shift_months(self.start, self.history.len() as i32)
    }

    /// One-step in-sample predictions, aligned with the history.
    ///
    /// Before the conditioning window is filled the previous observation is
    /// used.
    pub fn fitted_values(&self) -> &[f64] {
        &self.fitted
    }

    /// Recursive forecast of the `horizon` months after the history
    pub fn forecast(&self, horizon: usize) -> Vec<f64> {
        let delta = self.order.differencing();
        let (ar, ma) = self.order.operators(&self.coefficients);
        let mut z: Vec<f64> = delta
            .apply(&self.history)
            .iter()
            .map(|w| w - self.intercept)
            .collect();
        let mut residuals = css_residuals(&z, &ar, &ma);
        let mut y = self.history.clone();

        for _ in 0..horizon {
            let t = z.len();
            let autoregressive: f64 = (1..=ar.degree().min(t))
                .map(|k| ar.coefficient(k) * z[t - k])
                .sum();
            let moving_average: f64 = (1..=ma.degree().min(t))
                .map(|k| ma.coefficient(k) * residuals[t - k])
                .sum();
            let next_z = moving_average - autoregressive;
            z.push(next_z);
            residuals.push(0.0);

            let ty = y.len();
            let integration: f64 = (1..=delta.degree().min(ty))
                .map(|k| delta.coefficient(k) * y[ty - k])
                .sum();
            y.push(next_z + self.intercept - integration);
        }
        y.split_off(self.history.len())
    }

    /// Prediction for one month: in-sample fit inside the history, forecast
    /// after it, `NaN` before it
    pub fn predict_offsets(&self, offsets: &[i32]) -> Vec<f64> {
        let n = self.history.len() as i32;
        let horizon = offsets.iter().map(|&o| o - n + 1).max().unwrap_or(0).max(0) as usize;
        let forecast = self.forecast(horizon);
        offsets
            .iter()
            .map(|&o| {
                if o < 0 {
                    f64::NAN
                } else if o < n {
                    self.fitted[o as usize]
                } else {
                    forecast[(o - n) as usize]
                }
            })
            .collect()
    }
}

/// Outcome of fitting a single order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderTrial {
    pub order: SarimaOrder,
    /// `Err` holds the reason the order was skipped
    pub aic: std::result::Result<f64, String>,
}

/// Model with the lowest AIC and every trial made to find it
#[derive(Debug, Clone)]
pub struct OrderSelection {
    pub model: SarimaModel,
    pub trials: Vec<OrderTrial>,
}

/// Largest lag among the orders that fit into `n` observations
pub fn common_conditioning(orders: &[SarimaOrder], n: usize) -> usize {
    orders
        .iter()
        .filter(|order| order.fits_in(n))
        .map(SarimaOrder::conditioning_lag)
        .max()
        .unwrap_or(0)
}

/// Exhaustive order search keeping the minimal AIC.
///
/// Every order is scored on the same trailing observations, those after the
/// longest lag any feasible order needs.
pub fn select_order(start: NaiveDate, series: &[f64], params: &SarimaParams) -> Result<OrderSelection> {
    let orders = SarimaOrder::grid(params.max_order, params.seasonal_period);
    let condition = common_conditioning(&orders, series.len());
    debug!(condition, observations = series.len(), "Conditioning every order on the same sample");

    let mut best: Option<SarimaModel> = None;
    let mut trials = Vec::new();
    for order in orders {
        match SarimaModel::fit_conditioned(start, series, order, params.max_iter, condition) {
            Ok(model) => {
                trials.push(OrderTrial {
                    order,
                    aic: Ok(model.aic()),
                });
                if best.as_ref().map_or(true, |b| model.aic() < b.aic()) {
                    best = Some(model);
                }
            }
            Err(e) => {
                debug!(%order, reason = %e, "Skipping order");
                trials.push(OrderTrial {
                    order,
                    aic: Err(e.to_string()),
                });
            }
        }
    }
    let model = best.ok_or_else(|| {
        ForecastError::DataError(format!(
            "None of {} orders could be fitted to {} observations",
            trials.len(),
            series.len()
        ))
    })?;
    debug!(order = %model.order(), aic = model.aic(), "Selected order");
    Ok(OrderSelection { model, trials })
}

/// Monthly series of each entity, gaps forward-filled
pub(crate) fn entity_series(x: &Features, y: &Array1<f64>) -> Result<BTreeMap<String, (NaiveDate, Vec<f64>)>> {
    if x.keys.len() != y.len() {
        return Err(ForecastError::ValidationError(format!(
            "Feature rows ({}) and targets ({}) differ",
            x.keys.len(),
            y.len()
        )));
    }
    let mut points: BTreeMap<String, BTreeMap<NaiveDate, f64>> = BTreeMap::new();
    for (key, value) in x.keys.iter().zip(y.iter()) {
        points
            .entry(key.entity.clone())
            .or_default()
            .insert(key.date, *value);
    }

    let mut series = BTreeMap::new();
    for (entity, by_date) in points {
        let (Some((&first, _)), Some((&last, _))) = (by_date.first_key_value(), by_date.last_key_value()) else {
            continue;
        };
        let mut values = Vec::with_capacity(months_between(first, last) as usize + 1);
        let mut previous = None;
        for offset in 0..=months_between(first, last) {
            let date = shift_months(first, offset)?;
            let value = by_date.get(&date).copied().or(previous);
            if !by_date.contains_key(&date) {
                debug!(%entity, %date, "Forward-filling gap in training series");
            }
            if let Some(v) = value {
                values.push(v);
                previous = Some(v);
            }
        }
        series.insert(entity, (first, values));
    }
    Ok(series)
}

/// Per-entity seasonal ARIMA models with the entities that could not be fitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SarimaBundle {
    models: BTreeMap<String, SarimaModel>,
    failures: Vec<EntityFailure>,
}

impl SarimaBundle {
    pub fn fit(x: &Features, y: &Array1<f64>, params: &SarimaParams) -> Result<Self> {
        let series = entity_series(x, y)?;
        let outcomes: Vec<(String, Result<OrderSelection>)> = series
            .par_iter()
            .map(|(entity, (start, values))| {
                let span = debug_span!("sarima_fit", %entity);
                let _guard = span.enter();
                (entity.clone(), select_order(*start, values, params))
            })
            .collect();

        let mut models = BTreeMap::new();
        let mut failures = Vec::new();
        for (entity, outcome) in outcomes {
            match outcome {
                Ok(selection) => {
                    models.insert(entity, selection.model);
                }
                Err(e) => {
                    warn!(%entity, reason = %e, "Seasonal ARIMA failed for entity");
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
                reason: "no seasonal ARIMA order could be fitted for any entity".to_string(),
            });
        }
        Ok(Self { models, failures })
    }

    pub fn predict(&self, x: &Features) -> Result<Array1<f64>> {
        let mut requests: BTreeMap<&str, Vec<(usize, i32)>> = BTreeMap::new();
        for (row, key) in x.keys.iter().enumerate() {
            if let Some(model) = self.models.get(&key.entity) {
                requests
                    .entry(key.entity.as_str())
                    .or_default()
                    .push((row, months_between(model.start(), key.date)));
            }
        }

        let mut out = Array1::from_elem(x.keys.len(), f64::NAN);
        for (entity, rows) in requests {
            let Some(model) = self.models.get(entity) else {
                continue;
            };
            let offsets: Vec<i32> = rows.iter().map(|&(_, o)| o).collect();
            for ((row, _), value) in rows.iter().zip(model.predict_offsets(&offsets)) {
                out[*row] = value;
            }
        }
        Ok(out)
    }

    pub fn model(&self, entity: &str) -> Option<&SarimaModel> {
        self.models.get(entity)
    }

    pub fn failures(&self) -> &[EntityFailure] {
        &self.failures
    }
}
