//! Rolling window aggregates
//!
//! Windows here are "closed left": the value reported for position `t` only
//! covers observations strictly before `t`. This is what autoregressive
//! features need, since the current month must never leak into its own
//! predictors.

use crate::{MathError, Result};
use std::collections::VecDeque;

/// Fixed-size rolling window keeping a running sum
#[derive(Debug, Clone)]
pub struct RollingWindow {
    period: usize,
    values: VecDeque<f64>,
    sum: f64,
}

impl RollingWindow {
    /// Create a new rolling window with the specified period
    pub fn new(period: usize) -> Result<Self> {
        if period == 0 {
            return Err(MathError::InvalidInput(
                "Period must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            period,
            values: VecDeque::with_capacity(period),
            sum: 0.0,
        })
    }

    /// Push a new observation, evicting the oldest one once the window is full
    pub fn update(&mut self, value: f64) {
        self.values.push_back(value);
        self.sum += value;

        if self.values.len() > self.period {
            if let Some(old_value) = self.values.pop_front() {
                self.sum -= old_value;
            }
        }
    }

    /// Whether the window holds `period` observations
    pub fn is_full(&self) -> bool {
        self.values.len() == self.period
    }

    /// Sum of the window, available once it is full
    pub fn sum(&self) -> Result<f64> {
        if !self.is_full() {
            return Err(MathError::InsufficientData(format!(
                "Need {} values, have {}",
                self.period,
                self.values.len()
            )));
        }
        Ok(self.sum)
    }

    /// Mean of the window, available once it is full
    pub fn mean(&self) -> Result<f64> {
        Ok(self.sum()? / self.period as f64)
    }

    /// Get the current period
    pub fn period(&self) -> usize {
        self.period
    }

    /// Reset the window, clearing all values
    pub fn reset(&mut self) {
        self.values.clear();
        self.sum = 0.0;
    }
}

/// Sum of the `period` values preceding each position.
///
/// `None` where fewer than `period` prior values exist.
pub fn lagged_rolling_sum(values: &[f64], period: usize) -> Result<Vec<Option<f64>>> {
    let mut window = RollingWindow::new(period)?;
    let mut out = Vec::with_capacity(values.len());
    for &value in values {
        out.push(window.sum().ok());
        window.update(value);
    }
    Ok(out)
}

/// Mean of the `period` values preceding each position.
pub fn lagged_rolling_mean(values: &[f64], period: usize) -> Result<Vec<Option<f64>>> {
    let mut window = RollingWindow::new(period)?;
    let mut out = Vec::with_capacity(values.len());
    for &value in values {
        out.push(window.mean().ok());
        window.update(value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_zero_period_rejected() {
        assert!(RollingWindow::new(0).is_err());
    }

    #[test]
    fn test_window_slides() {
        let mut window = RollingWindow::new(2).unwrap();
        window.update(10.0);
        assert!(window.sum().is_err());

        window.update(20.0);
        assert_relative_eq!(window.sum().unwrap(), 30.0);

        window.update(5.0);
        assert_relative_eq!(window.sum().unwrap(), 25.0);
        assert_relative_eq!(window.mean().unwrap(), 12.5);

        window.reset();
        assert!(!window.is_full());
    }

    #[test]
    fn test_lagged_sum_excludes_current_position() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let sums = lagged_rolling_sum(&values, 3).unwrap();
        assert_eq!(sums, vec![None, None, None, Some(6.0), Some(9.0)]);
    }

    #[test]
    fn test_lagged_mean() {
        let values = [2.0, 4.0, 6.0];
        let means = lagged_rolling_mean(&values, 2).unwrap();
        assert_eq!(means, vec![None, None, Some(3.0)]);
    }
}
