//! Derivative-free minimisation
//!
//! Seasonal ARIMA coefficients are estimated by minimising a conditional sum
//! of squares, which has no convenient gradient. A bounded Nelder–Mead
//! simplex is enough for the handful of coefficients involved.

use std::cmp::Ordering;

/// Settings for [`nelder_mead`]
#[derive(Debug, Clone)]
pub struct SimplexConfig {
    /// Maximum number of iterations
    pub max_iter: usize,
    /// Stop once the spread of objective values falls below this
    pub tolerance: f64,
    /// Size of the initial simplex along each axis
    pub initial_step: f64,
}

impl Default for SimplexConfig {
    fn default() -> Self {
        Self {
            max_iter: 500,
            tolerance: 1e-8,
            initial_step: 0.1,
        }
    }
}

/// Outcome of a minimisation
#[derive(Debug, Clone)]
pub struct Minimum {
    /// Best point found
    pub point: Vec<f64>,
    /// Objective value at `point`
    pub value: f64,
    /// Iterations performed
    pub iterations: usize,
    /// Whether the tolerance was reached before `max_iter`
    pub converged: bool,
}

const REFLECT: f64 = 1.0;
const EXPAND: f64 = 2.0;
const CONTRACT: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Minimise `objective` starting from `initial`.
///
/// `bounds`, when given, holds one `(low, high)` pair per dimension; every
/// trial point is clamped into the box before evaluation.
pub fn nelder_mead<F>(
    objective: F,
    initial: &[f64],
    bounds: Option<&[(f64, f64)]>,
    config: &SimplexConfig,
) -> Minimum
where
    F: Fn(&[f64]) -> f64,
{
    let n = initial.len();
    if n == 0 {
        return Minimum {
            point: Vec::new(),
            value: objective(&[]),
            iterations: 0,
            converged: true,
        };
    }

    let clamp = |point: Vec<f64>| -> Vec<f64> {
        match bounds {
            Some(b) => point
                .into_iter()
                .enumerate()
                .map(|(i, x)| match b.get(i) {
                    Some(&(low, high)) => x.clamp(low, high),
                    None => x,
                })
                .collect(),
            None => point,
        }
    };
    // NaN objectives sort last so a diverging vertex is replaced first
    let eval = |point: &[f64]| -> f64 {
        let value = objective(point);
        if value.is_finite() {
            value
        } else {
            f64::INFINITY
        }
    };

    let mut simplex = Vec::with_capacity(n + 1);
    simplex.push(clamp(initial.to_vec()));
    for i in 0..n {
        let mut vertex = initial.to_vec();
        vertex[i] += if initial[i].abs() > 1e-8 {
            config.initial_step * initial[i].abs()
        } else {
            config.initial_step
        };
        simplex.push(clamp(vertex));
    }
    let mut values: Vec<f64> = simplex.iter().map(|v| eval(v)).collect();

    let mut iterations = 0;
    let mut converged = false;

    while iterations < config.max_iter {
        iterations += 1;

        let mut order: Vec<usize> = (0..=n).collect();
        order.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap_or(Ordering::Equal));
        let best = order[0];
        let worst = order[n];
        let second_worst = order[n - 1];

        if (values[worst] - values[best]).abs() < config.tolerance {
            converged = true;
            break;
        }

        let centroid = centroid_without(&simplex, worst);
        let toward = |from: &[f64], coefficient: f64| -> Vec<f64> {
            centroid
                .iter()
                .zip(from)
                .map(|(c, p)| c + coefficient * (p - c))
                .collect()
        };

        let reflected = clamp(toward(&simplex[worst], -REFLECT));
        let reflected_value = eval(&reflected);

        if reflected_value < values[best] {
            let expanded = clamp(toward(&reflected, EXPAND));
            let expanded_value = eval(&expanded);
            if expanded_value < reflected_value {
                simplex[worst] = expanded;
                values[worst] = expanded_value;
            } else {
                simplex[worst] = reflected;
                values[worst] = reflected_value;
            }
            continue;
        }

        if reflected_value < values[second_worst] {
            simplex[worst] = reflected;
            values[worst] = reflected_value;
            continue;
        }

        let (contracted, threshold) = if reflected_value < values[worst] {
            (clamp(toward(&reflected, CONTRACT)), reflected_value)
        } else {
            (clamp(toward(&simplex[worst], CONTRACT)), values[worst])
        };
        let contracted_value = eval(&contracted);
        if contracted_value < threshold {
            simplex[worst] = contracted;
            values[worst] = contracted_value;
            continue;
        }

        let anchor = simplex[best].clone();
        for i in 0..=n {
            if i == best {
                continue;
            }
            let shrunk: Vec<f64> = anchor
                .iter()
                .zip(&simplex[i])
                .map(|(a, x)| a + SHRINK * (x - a))
                .collect();
            simplex[i] = clamp(shrunk);
            values[i] = eval(&simplex[i]);
        }
    }

    let best = (0..=n)
        .min_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap_or(Ordering::Equal))
        .unwrap_or(0);

    Minimum {
        point: simplex[best].clone(),
        value: values[best],
        iterations,
        converged,
    }
}

fn centroid_without(simplex: &[Vec<f64>], excluded: usize) -> Vec<f64> {
    let dims = simplex[0].len();
    let mut centroid = vec![0.0; dims];
    for (i, vertex) in simplex.iter().enumerate() {
        if i == excluded {
            continue;
        }
        for (c, x) in centroid.iter_mut().zip(vertex) {
            *c += x;
        }
    }
    let count = (simplex.len() - 1) as f64;
    centroid.iter_mut().for_each(|c| *c /= count);
    centroid
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_quadratic_bowl() {
        let result = nelder_mead(
            |x| (x[0] - 2.0).powi(2) + (x[1] + 1.0).powi(2),
            &[0.0, 0.0],
            None,
            &SimplexConfig {
                max_iter: 2000,
                ..Default::default()
            },
        );
        assert!(result.converged);
        assert_relative_eq!(result.point[0], 2.0, epsilon = 1e-3);
        assert_relative_eq!(result.point[1], -1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_bounds_are_respected() {
        let bounds = [(-0.5, 0.5)];
        let result = nelder_mead(
            |x| (x[0] - 3.0).powi(2),
            &[0.0],
            Some(&bounds),
            &SimplexConfig::default(),
        );
        assert!(result.point[0] <= 0.5 + 1e-12);
        assert_relative_eq!(result.point[0], 0.5, epsilon = 1e-3);
    }

    #[test]
    fn test_zero_dimensional_problem() {
        let result = nelder_mead(|_| 4.0, &[], None, &SimplexConfig::default());
        assert!(result.point.is_empty());
        assert_eq!(result.value, 4.0);
    }
}
