//! Gradient-boosted tree ensembles under squared loss

use crate::data::Features;
use crate::error::{ForecastError, Result};
use crate::models::params::{ParamReader, ParamSet};
use crate::models::trees::{GrowthPolicy, RegressionTree, TreeParams};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Hyperparameters of a boosted ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    /// Number of boosting rounds
    pub n_estimators: usize,
    /// Shrinkage applied to every tree
    pub learning_rate: f64,
    /// Per-tree structure limits
    pub tree: TreeParams,
    /// Fraction of rows drawn for each tree
    pub subsample: f64,
    /// Fraction of feature columns drawn for each tree
    pub colsample_bytree: f64,
    /// Seed of row and column sampling
    pub random_state: u64,
}

impl BoostingParams {
    /// Read and validate a parameter set.
    ///
    /// Depth-wise and oblivious growth default to depth 6; leaf-wise growth
    /// is unbounded in depth and limited by `max_leaves` instead.
    pub fn from_params(policy: GrowthPolicy, family: &str, params: &ParamSet) -> Result<Self> {
        let mut reader = ParamReader::new(family, params);
        let default_depth = match policy {
            GrowthPolicy::LeafWise => None,
            GrowthPolicy::DepthWise | GrowthPolicy::Oblivious => Some(6),
        };
        let parsed = Self {
            n_estimators: reader.usize("n_estimators", 100)?,
            learning_rate: reader.float("learning_rate", 0.1)?,
            tree: TreeParams {
                max_depth: reader.optional_usize("max_depth")?.or(default_depth),
                max_leaves: reader.usize("max_leaves", 31)?,
                min_samples_leaf: reader.usize("min_samples_leaf", 1)?,
                min_split_gain: reader.float("min_split_gain", 0.0)?,
                reg_lambda: reader.float("reg_lambda", 1.0)?,
            },
            subsample: reader.float("subsample", 1.0)?,
            colsample_bytree: reader.float("colsample_bytree", 1.0)?,
            random_state: reader.u64("random_state", 0)?,
        };
        reader.finish()?;
        parsed.validate(family)?;
        Ok(parsed)
    }

    fn validate(&self, family: &str) -> Result<()> {
        let fail = |msg: &str| Err(ForecastError::InvalidParameter(format!("{family}: {msg}")));
        if self.n_estimators == 0 {
            return fail("n_estimators must be at least 1");
        }
        if !(self.learning_rate > 0.0) {
            return fail("learning_rate must be positive");
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return fail("subsample must be in (0, 1]");
        }
        if !(self.colsample_bytree > 0.0 && self.colsample_bytree <= 1.0) {
            return fail("colsample_bytree must be in (0, 1]");
        }
        if self.tree.reg_lambda < 0.0 || self.tree.min_split_gain < 0.0 {
            return fail("reg_lambda and min_split_gain must be non-negative");
        }
        if self.tree.max_leaves < 2 {
            return fail("max_leaves must be at least 2");
        }
        Ok(())
    }
}

/// A fitted ensemble: `base_score + learning_rate · Σ tree(x)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedEnsemble {
    policy: GrowthPolicy,
    feature_names: Vec<String>,
    base_score: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
}

impl BoostedEnsemble {
    pub fn fit(
        policy: GrowthPolicy,
        x: &Features,
        y: &Array1<f64>,
        params: &BoostingParams,
    ) -> Result<Self> {
        let n = x.n_rows();
        let p = x.n_features();
        if n == 0 || p == 0 {
            return Err(ForecastError::DataError(
                "Cannot fit a tree ensemble on an empty matrix".to_string(),
            ));
        }
        if y.len() != n {
            return Err(ForecastError::ValidationError(format!(
                "Feature rows ({n}) and targets ({}) differ",
                y.len()
            )));
        }

        let base_score = y.mean().unwrap_or(0.0);
        let mut prediction = vec![base_score; n];
        let mut rng = StdRng::seed_from_u64(params.random_state);
        let n_rows = ((params.subsample * n as f64).ceil() as usize).clamp(1, n);
        let n_cols = ((params.colsample_bytree * p as f64).ceil() as usize).clamp(1, p);

        let mut trees = Vec::with_capacity(params.n_estimators);
        for _ in 0..params.n_estimators {
            let residuals: Vec<f64> = y.iter().zip(&prediction).map(|(t, p)| t - p).collect();
            let rows = draw(&mut rng, n, n_rows);
            let columns = draw(&mut rng, p, n_cols);

            let tree = RegressionTree::fit(
                x.matrix.view(),
                &residuals,
                &rows,
                &columns,
                policy,
                &params.tree,
            );
            for (i, pred) in prediction.iter_mut().enumerate() {
                *pred += params.learning_rate * tree.predict_row(x.matrix.row(i));
            }
            trees.push(tree);
        }

        let mse = y
            .iter()
            .zip(&prediction)
            .map(|(t, p)| (t - p).powi(2))
            .sum::<f64>()
            / n as f64;
        debug!(?policy, trees = trees.len(), train_rmse = mse.sqrt(), "Fitted tree ensemble");

        Ok(Self {
            policy,
            feature_names: x.names.clone(),
            base_score,
            learning_rate: params.learning_rate,
            trees,
        })
    }

    pub fn predict(&self, x: &Features) -> Result<Array1<f64>> {
        if x.names != self.feature_names {
            return Err(ForecastError::ValidationError(format!(
                "Feature columns {:?} do not match the fitted columns {:?}",
                x.names, self.feature_names
            )));
        }
        Ok(x.matrix
            .rows()
            .into_iter()
            .map(|row| {
                self.base_score
                    + self.learning_rate
                        * self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
            })
            .collect())
    }

    pub fn policy(&self) -> GrowthPolicy {
        self.policy
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

/// `amount` distinct indices below `length`, ascending; all of them when equal
fn draw(rng: &mut StdRng, length: usize, amount: usize) -> Vec<usize> {
    if amount >= length {
        return (0..length).collect();
    }
    let mut picked = sample(rng, length, amount).into_vec();
    picked.sort_unstable();
    picked
}
