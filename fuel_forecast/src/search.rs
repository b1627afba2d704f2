//! Hyperparameter search under forward-chaining cross-validation

use crate::config::{Scoring, SearchConfig, SearchStrategy};
use crate::data::Dataset;
use crate::error::{ForecastError, Result};
use crate::models::{describe, EstimatorFamily, Fittable, ParamGrid, ParamSet};
use crate::utils::thread_pool;
use forecast_math::accuracy::{
    mean_absolute_error, mean_absolute_percentage_error, root_mean_squared_error,
};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::ops::Range;
use tracing::{debug, info, warn};

/// Train and test row ranges of one fold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Range<usize>,
    pub test: Range<usize>,
}

/// Forward-chaining cross-validator over time-ordered rows.
///
/// Fold `i` of `k` tests `[n - (k-i)·test_size, n - (k-i-1)·test_size)` and
/// trains on everything before the test block minus `gap` rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSeriesSplit {
    n_splits: usize,
    test_size: usize,
    gap: usize,
}

impl TimeSeriesSplit {
    pub fn new(n_splits: usize, test_size: usize, gap: usize) -> Result<Self> {
        if n_splits < 2 {
            return Err(ForecastError::InvalidParameter(format!(
                "n_splits must be at least 2, got {n_splits}"
            )));
        }
        if test_size == 0 {
            return Err(ForecastError::InvalidParameter(
                "test_size must be positive".to_string(),
            ));
        }
        Ok(Self {
            n_splits,
            test_size,
            gap,
        })
    }

    pub fn split(&self, n_samples: usize) -> Result<Vec<Fold>> {
        let needed = self.n_splits * self.test_size + self.gap;
        if n_samples <= needed {
            return Err(ForecastError::InvalidParameter(format!(
                "Too few rows ({n_samples}) for {} folds of {} rows with gap {}",
                self.n_splits, self.test_size, self.gap
            )));
        }
        let first_test = n_samples - self.n_splits * self.test_size;
        Ok((0..self.n_splits)
            .map(|i| {
                let start = first_test + i * self.test_size;
                Fold {
                    train: 0..start - self.gap,
                    test: start..start + self.test_size,
                }
            })
            .collect())
    }
}

/// Number of points in the cartesian product of a grid
pub fn candidate_count(grid: &ParamGrid) -> usize {
    grid.values().map(Vec::len).product()
}

/// Grid point `index` in mixed-radix order (last key varies fastest)
fn grid_point(grid: &ParamGrid, mut index: usize) -> ParamSet {
    let mut point = ParamSet::new();
    for (key, values) in grid.iter().rev() {
        point.insert(key.clone(), values[index % values.len()].clone());
        index /= values.len();
    }
    point
}

/// Grid points to evaluate under a strategy
pub fn candidates(grid: &ParamGrid, strategy: &SearchStrategy) -> Vec<ParamSet> {
    let count = candidate_count(grid);
    let indices: Vec<usize> = match strategy {
        SearchStrategy::Grid => (0..count).collect(),
        SearchStrategy::Random { n_iter, seed } => {
            if *n_iter >= count {
                (0..count).collect()
            } else {
                let mut rng = StdRng::seed_from_u64(*seed);
                let mut picked = sample(&mut rng, count, *n_iter).into_vec();
                picked.sort_unstable();
                picked
            }
        }
    };
    indices.into_iter().map(|i| grid_point(grid, i)).collect()
}

/// A family with its base parameters and search space
#[derive(Debug, Clone, PartialEq)]
pub struct FamilySpec {
    /// Name used in reports, usually the configured family name
    pub name: String,
    pub family: EstimatorFamily,
    pub init_params: ParamSet,
    pub grid: ParamGrid,
}

impl FamilySpec {
    pub fn new(family: EstimatorFamily) -> Self {
        Self {
            name: family.canonical_name().to_string(),
            family,
            init_params: ParamSet::new(),
            grid: ParamGrid::new(),
        }
    }

    /// `init_params` overridden by a grid point
    pub fn merged(&self, point: &ParamSet) -> ParamSet {
        let mut params = self.init_params.clone();
        params.extend(point.iter().map(|(k, v)| (k.clone(), v.clone())));
        params
    }
}

/// Candidate count of a family, known before any fold runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPlan {
    pub family: String,
    pub candidate_count: usize,
}

/// A candidate that completed every fold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult {
    pub params: ParamSet,
    pub fold_scores: Vec<f64>,
    pub mean_score: f64,
}

/// A candidate that failed on some fold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFailure {
    pub params: ParamSet,
    pub reason: String,
}

/// Search outcome of one family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilySearchResult {
    pub family: String,
    pub candidate_count: usize,
    pub evaluated: Vec<CandidateResult>,
    pub failures: Vec<CandidateFailure>,
    /// Best candidate; `None` when every candidate failed
    pub best: Option<CandidateResult>,
}

/// Search outcome of every family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchReport {
    pub plans: Vec<SearchPlan>,
    pub families: Vec<FamilySearchResult>,
}

impl SearchReport {
    pub fn family(&self, name: &str) -> Option<&FamilySearchResult> {
        self.families.iter().find(|f| f.family == name)
    }

    /// Best parameters of a family, if any candidate succeeded
    pub fn best_params(&self, name: &str) -> Option<&ParamSet> {
        self.family(name)?.best.as_ref().map(|b| &b.params)
    }
}

/// Higher is better
pub fn score(scoring: Scoring, actual: &[f64], predicted: &[f64]) -> Result<f64> {
    let error = match scoring {
        Scoring::NegMeanAbsolutePercentageError => mean_absolute_percentage_error(actual, predicted)?,
        Scoring::NegMeanAbsoluteError => mean_absolute_error(actual, predicted)?,
        Scoring::NegRootMeanSquaredError => root_mean_squared_error(actual, predicted)?,
    };
    if !error.is_finite() {
        return Err(ForecastError::ValidationError(
            "Non-finite validation error".to_string(),
        ));
    }
    Ok(-error)
}

/// Runs grid or random search for each family
#[derive(Debug, Clone)]
pub struct HyperparameterSearch {
    config: SearchConfig,
}

impl HyperparameterSearch {
    pub fn new(config: SearchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Count candidates per family; an empty grid is fatal
    pub fn plan(&self, families: &[FamilySpec]) -> Result<Vec<SearchPlan>> {
        let mut seen = BTreeSet::new();
        if let Some(spec) = families.iter().find(|spec| !seen.insert(spec.name.as_str())) {
            return Err(ForecastError::ValidationError(format!(
                "Family {} is configured more than once",
                spec.name
            )));
        }
        families
            .iter()
            .map(|spec| {
                let count = candidate_count(&spec.grid);
                info!(family = %spec.name, candidates = count, "Hyperparameter candidates");
                if count == 0 {
                    return Err(ForecastError::EmptyGrid {
                        family: spec.name.clone(),
                    });
                }
                Ok(SearchPlan {
                    family: spec.name.clone(),
                    candidate_count: count,
                })
            })
            .collect()
    }

    pub fn run(&self, data: &Dataset, families: &[FamilySpec]) -> Result<SearchReport> {
        let plans = self.plan(families)?;

        let test_size = self
            .config
            .test_size
            .unwrap_or_else(|| data.x.entities().len().max(1));
        let folds = TimeSeriesSplit::new(self.config.n_splits, test_size, self.config.gap)?
            .split(data.len())?;
        let pool = thread_pool(self.config.n_jobs)?;

        let mut results = Vec::with_capacity(families.len());
        for (spec, plan) in families.iter().zip(&plans) {
            let points = candidates(&spec.grid, &self.config.strategy);
            let outcomes: Vec<(ParamSet, Result<Vec<f64>>)> = pool.install(|| {
                points
                    .par_iter()
                    .map(|point| {
                        let params = spec.merged(point);
                        let scores = self.evaluate(spec.family, &params, data, &folds);
                        (params, scores)
                    })
                    .collect()
            });

            let mut evaluated = Vec::new();
            let mut failures = Vec::new();
            for (params, outcome) in outcomes {
                match outcome {
                    Ok(fold_scores) => {
                        let mean_score = fold_scores.iter().sum::<f64>() / fold_scores.len() as f64;
                        debug!(family = %spec.name, params = %describe(&params), mean_score, "Evaluated candidate");
                        evaluated.push(CandidateResult {
                            params,
                            fold_scores,
                            mean_score,
                        });
                    }
                    Err(e) => {
                        warn!(family = %spec.name, params = %describe(&params), reason = %e, "Candidate failed");
                        failures.push(CandidateFailure {
                            params,
                            reason: e.to_string(),
                        });
                    }
                }
            }

            // The first candidate wins ties
            let best = evaluated
                .iter()
                .fold(None::<&CandidateResult>, |best, c| match best {
                    Some(b) if b.mean_score.partial_cmp(&c.mean_score) != Some(Ordering::Less) => Some(b),
                    _ => Some(c),
                })
                .cloned();
            match &best {
                Some(b) => info!(family = %spec.name, params = %describe(&b.params), score = b.mean_score, "Best candidate"),
                None => warn!(family = %spec.name, "Every candidate failed"),
            }

            results.push(FamilySearchResult {
                family: spec.name.clone(),
                candidate_count: plan.candidate_count,
                evaluated,
                failures,
                best,
            });
        }

        Ok(SearchReport {
            plans,
            families: results,
        })
    }

    fn evaluate(
        &self,
        family: EstimatorFamily,
        params: &ParamSet,
        data: &Dataset,
        folds: &[Fold],
    ) -> Result<Vec<f64>> {
        folds
            .par_iter()
            .map(|fold| {
                let train_idx: Vec<usize> = fold.train.clone().collect();
                let test_idx: Vec<usize> = fold.test.clone().collect();
                let train = data.select(&train_idx);
                let test = data.select(&test_idx);
                let model = family.fit(&train.x, &train.y, params)?;
                let predicted = model.predict(&test.x)?;
                score(
                    self.config.scoring,
                    &test.y.to_vec(),
                    &predicted.to_vec(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParamValue;

    #[test]
    fn test_folds_are_forward_chaining() {
        let folds = TimeSeriesSplit::new(3, 2, 0).unwrap().split(10).unwrap();
        assert_eq!(folds[0], Fold { train: 0..4, test: 4..6 });
        assert_eq!(folds[2], Fold { train: 0..8, test: 8..10 });

        let gapped = TimeSeriesSplit::new(2, 2, 1).unwrap().split(10).unwrap();
        assert_eq!(gapped[0].train, 0..5);
        assert_eq!(gapped[0].test, 6..8);
    }

    #[test]
    fn test_too_few_rows() {
        assert!(TimeSeriesSplit::new(5, 3, 0).unwrap().split(15).is_err());
        assert!(TimeSeriesSplit::new(1, 3, 0).is_err());
    }

    #[test]
    fn test_grid_points() {
        let mut grid = ParamGrid::new();
        grid.insert("a".to_string(), vec![ParamValue::Int(1), ParamValue::Int(2)]);
        grid.insert("b".to_string(), vec![ParamValue::Float(0.1), ParamValue::Float(0.2), ParamValue::Float(0.3)]);
        let all = candidates(&grid, &SearchStrategy::Grid);
        assert_eq!(all.len(), 6);
        assert_eq!(all[0]["a"], ParamValue::Int(1));
        assert_eq!(all[1]["b"], ParamValue::Float(0.2));
        assert_eq!(all[5]["a"], ParamValue::Int(2));

        let drawn = candidates(&grid, &SearchStrategy::Random { n_iter: 3, seed: 1 });
        assert_eq!(drawn.len(), 3);
        assert_eq!(drawn, candidates(&grid, &SearchStrategy::Random { n_iter: 3, seed: 1 }));
    }

    #[test]
    fn test_plan_rejects_repeated_family() {
        let search = HyperparameterSearch::new(SearchConfig::default()).unwrap();
        let families = [
            FamilySpec::new(EstimatorFamily::DepthWiseBoosting),
            FamilySpec::new(EstimatorFamily::SeasonalArima),
            FamilySpec::new(EstimatorFamily::DepthWiseBoosting),
        ];
        assert!(matches!(
            search.plan(&families),
            Err(ForecastError::ValidationError(_))
        ));
    }

    #[test]
    fn test_merged_overrides_init() {
        let mut spec = FamilySpec::new(EstimatorFamily::DepthWiseBoosting);
        spec.init_params.insert("n_estimators".to_string(), ParamValue::Int(10));
        spec.init_params.insert("max_depth".to_string(), ParamValue::Int(2));
        let mut point = ParamSet::new();
        point.insert("max_depth".to_string(), ParamValue::Int(4));
        let merged = spec.merged(&point);
        assert_eq!(merged["n_estimators"], ParamValue::Int(10));
        assert_eq!(merged["max_depth"], ParamValue::Int(4));
    }
}
