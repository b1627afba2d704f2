//! Time-respecting train/test split

use crate::config::SplitConfig;
use crate::data::{Dataset, FeatureRow, FeatureTable};
use crate::error::{ForecastError, Result};
use crate::utils::shift_months;
use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use std::collections::BTreeSet;
use tracing::info;

/// Train, test and optional validation datasets
#[derive(Debug, Clone)]
pub struct SplitResult {
    /// Every row before the cutoff month in time order, hold-out included
    pub history: Dataset,
    /// Rows strictly before the cutoff month, minus the hold-out
    pub train: Dataset,
    /// Rows of the cutoff month
    pub test: Dataset,
    /// Random hold-out drawn from train; not time based
    pub validation: Option<Dataset>,
    /// The test month
    pub cutoff: NaiveDate,
}

/// Splits a feature table at `max(date) - lag` months
#[derive(Debug, Clone)]
pub struct TimeSplitter {
    config: SplitConfig,
}

impl TimeSplitter {
    pub fn new(config: SplitConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn split(&self, table: &FeatureTable) -> Result<SplitResult> {
        let last = table
            .rows
            .iter()
            .map(|r| r.date)
            .max()
            .ok_or_else(|| ForecastError::DataError("Cannot split an empty feature table".to_string()))?;
        let cutoff = shift_months(last, -(self.config.lag as i32))?;

        let mut train: Vec<&FeatureRow> = table.rows.iter().filter(|r| r.date < cutoff).collect();
        let mut test: Vec<&FeatureRow> = table.rows.iter().filter(|r| r.date == cutoff).collect();
        if train.is_empty() {
            return Err(ForecastError::InsufficientHistory { cutoff });
        }

        if self.config.index_by_entity {
            let by_key = |a: &&FeatureRow, b: &&FeatureRow| {
                a.date.cmp(&b.date).then_with(|| a.entity.cmp(&b.entity))
            };
            train.sort_by(by_key);
            test.sort_by(by_key);
        } else {
            train.sort_by_key(|r| r.date);
            test.sort_by_key(|r| r.date);
        }

        if let Some(n_months) = self.config.n_months {
            let entities: BTreeSet<&str> = train.iter().map(|r| r.entity.as_str()).collect();
            let keep = n_months * entities.len();
            if train.len() > keep {
                train.drain(..train.len() - keep);
            }
        }

        let history = table.to_dataset(train.iter().copied())?;
        let validation = match self.config.validation_size {
            Some(size) => {
                let n = train.len();
                let count = ((size * n as f64).ceil() as usize).min(n.saturating_sub(1));
                if count == 0 {
                    return Err(ForecastError::InvalidParameter(format!(
                        "validation_size {size} leaves no rows for training out of {n}"
                    )));
                }
                let mut rng = StdRng::seed_from_u64(self.config.validation_seed);
                let mut held: Vec<usize> = sample(&mut rng, n, count).into_vec();
                held.sort_unstable();
                let held_set: BTreeSet<usize> = held.iter().copied().collect();
                let validation_rows: Vec<&FeatureRow> = held.iter().map(|&i| train[i]).collect();
                train = train
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| !held_set.contains(i))
                    .map(|(_, r)| r)
                    .collect();
                Some(table.to_dataset(validation_rows)?)
            }
            None => None,
        };

        let train = table.to_dataset(train)?;
        let test = table.to_dataset(test)?;
        let bounds = train.date_bounds();
        info!(
            train_rows = train.len(),
            test_rows = test.len(),
            validation_rows = validation.as_ref().map_or(0, Dataset::len),
            train_start = ?bounds.map(|b| b.0),
            train_end = ?bounds.map(|b| b.1),
            %cutoff,
            "Split feature table"
        );

        Ok(SplitResult {
            history,
            train,
            test,
            validation,
            cutoff,
        })
    }
}
