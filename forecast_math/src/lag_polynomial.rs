//! Polynomials in the backshift operator `B`
//!
//! Seasonal ARIMA models multiply a short-lag polynomial with a seasonal one,
//! e.g. `(1 - φB)(1 - ΦB¹²)`. Expanding these once into a dense coefficient
//! vector lets fitting, differencing and integration share one code path.

use crate::{MathError, Result};
use serde::{Deserialize, Serialize};

/// Dense polynomial `c₀ + c₁B + c₂B² + …`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LagPolynomial {
    coefficients: Vec<f64>,
}

impl LagPolynomial {
    /// The identity operator `1`
    pub fn one() -> Self {
        Self {
            coefficients: vec![1.0],
        }
    }

    /// Build from raw coefficients, lowest lag first
    pub fn from_coefficients(coefficients: Vec<f64>) -> Result<Self> {
        if coefficients.is_empty() {
            return Err(MathError::InvalidInput(
                "A lag polynomial needs at least one coefficient".to_string(),
            ));
        }
        Ok(Self { coefficients })
    }

    /// Autoregressive operator `1 - φ₁B^step - φ₂B^(2·step) - …`
    pub fn autoregressive(phi: &[f64], step: usize) -> Self {
        Self::operator(phi, step, -1.0)
    }

    /// Moving-average operator `1 + θ₁B^step + θ₂B^(2·step) + …`
    pub fn moving_average(theta: &[f64], step: usize) -> Self {
        Self::operator(theta, step, 1.0)
    }

    fn operator(params: &[f64], step: usize, sign: f64) -> Self {
        let step = step.max(1);
        let mut coefficients = vec![0.0; params.len() * step + 1];
        coefficients[0] = 1.0;
        for (i, &value) in params.iter().enumerate() {
            coefficients[(i + 1) * step] = sign * value;
        }
        Self { coefficients }
    }

    /// Differencing operator `(1 - B)^d (1 - B^period)^seasonal_d`
    pub fn differencing(d: usize, seasonal_d: usize, period: usize) -> Self {
        let mut poly = Self::one();
        for _ in 0..d {
            poly = poly.multiply(&Self::autoregressive(&[1.0], 1));
        }
        for _ in 0..seasonal_d {
            poly = poly.multiply(&Self::autoregressive(&[1.0], period));
        }
        poly
    }

    /// Product of two operators
    pub fn multiply(&self, other: &Self) -> Self {
        let mut coefficients = vec![0.0; self.coefficients.len() + other.coefficients.len() - 1];
        for (i, &a) in self.coefficients.iter().enumerate() {
            if a == 0.0 {
                continue;
            }
            for (j, &b) in other.coefficients.iter().enumerate() {
                coefficients[i + j] += a * b;
            }
        }
        Self { coefficients }
    }

    /// Highest lag with a coefficient slot
    pub fn degree(&self) -> usize {
        self.coefficients.len() - 1
    }

    /// Coefficient at `lag` (zero past the degree)
    pub fn coefficient(&self, lag: usize) -> f64 {
        self.coefficients.get(lag).copied().unwrap_or(0.0)
    }

    /// All coefficients, lowest lag first
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Apply the operator to a series.
    ///
    /// The result starts at index `degree()` of the input, so it is
    /// `degree()` observations shorter.
    pub fn apply(&self, series: &[f64]) -> Vec<f64> {
        let degree = self.degree();
        if series.len() <= degree {
            return Vec::new();
        }
        (degree..series.len())
            .map(|t| {
                self.coefficients
                    .iter()
                    .enumerate()
                    .map(|(k, c)| c * series[t - k])
                    .sum()
            })
            .collect()
    }
}

/// Regular differencing applied `d` times
pub fn difference(series: &[f64], d: usize) -> Vec<f64> {
    LagPolynomial::differencing(d, 0, 1).apply(series)
}

/// Seasonal differencing applied `seasonal_d` times with the given period
pub fn seasonal_difference(series: &[f64], seasonal_d: usize, period: usize) -> Vec<f64> {
    LagPolynomial::differencing(0, seasonal_d, period).apply(series)
}
