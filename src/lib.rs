//! # Fuel Forecast Workspace
//!
//! Umbrella crate re-exporting the workspace members:
//!
//! - [`forecast_math`]: rolling windows, lag polynomials, simplex
//!   optimisation, least squares and accuracy metrics
//! - [`fuel_forecast`]: the monthly fuel consumption forecasting pipeline
//!
//! ## Example
//!
//! ```
//! use fuel_forecast_workspace::fuel_forecast::metrics::ape_score;
//!
//! let score = ape_score(100.0, 90.0).unwrap();
//! assert!((score - 0.1).abs() < 1e-12);
//! ```

pub use forecast_math;
pub use fuel_forecast;

/// Canonical names of every estimator family the pipeline can train.
///
/// # Examples
///
/// ```
/// use fuel_forecast_workspace::estimator_families;
///
/// assert!(estimator_families().contains(&"sarima"));
/// ```
pub fn estimator_families() -> Vec<&'static str> {
    fuel_forecast::EstimatorFamily::ALL
        .iter()
        .map(|family| family.canonical_name())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimator_families() {
        assert_eq!(
            estimator_families(),
            vec!["gbt_depthwise", "gbt_leafwise", "gbt_oblivious", "sarima", "additive"]
        );
    }

    #[test]
    fn test_reexports() {
        let window = forecast_math::rolling::lagged_rolling_sum(&[1.0, 2.0, 3.0], 2).unwrap();
        assert_eq!(window, vec![None, None, Some(3.0)]);
        assert_eq!(fuel_forecast::NAME, "fuel_forecast");
    }
}
