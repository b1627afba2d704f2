//! Per-row scoring of test-month forecasts

use crate::data::RowKey;
use crate::error::{ForecastError, Result};
use chrono::NaiveDate;
use forecast_math::accuracy::{absolute_percentage_error, forecast_accuracy, ForecastAccuracy};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;

/// Inverted absolute percentage error: `1 / APE` with APE in percent.
///
/// Undefined for a zero actual, an exact prediction or non-finite input.
pub fn ape_score(actual: f64, predicted: f64) -> Result<f64> {
    let undefined = || ForecastError::ScoreUndefined { actual, predicted };
    if !actual.is_finite() || !predicted.is_finite() || actual == 0.0 {
        return Err(undefined());
    }
    let ape = absolute_percentage_error(actual, predicted).map_err(|_| undefined())?;
    if ape == 0.0 {
        return Err(undefined());
    }
    Ok(1.0 / ape)
}

/// One scored test row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub date: NaiveDate,
    pub entity: String,
    pub estimator: String,
    pub run_id: usize,
    pub actual: f64,
    pub predicted: f64,
    pub score: f64,
}

/// A test row whose score is undefined
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndefinedScore {
    pub date: NaiveDate,
    pub entity: String,
    pub estimator: String,
    pub run_id: usize,
    pub reason: String,
}

/// Aggregate of one (estimator, run)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub estimator: String,
    pub run_id: usize,
    /// Mean inverted APE over defined rows
    pub mean_score: f64,
    pub scored_rows: usize,
    pub undefined_rows: usize,
    /// Error metrics over the defined rows
    pub accuracy: Option<ForecastAccuracy>,
}

/// Append-only store of scores per (estimator, run)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreBoard {
    records: Vec<ScoreRecord>,
    undefined: Vec<UndefinedScore>,
}

impl ScoreBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score aligned rows; returns the number of defined scores
    pub fn record(
        &mut self,
        run_id: usize,
        estimator: &str,
        keys: &[RowKey],
        actual: &[f64],
        predicted: &[f64],
    ) -> Result<usize> {
        if keys.len() != actual.len() || actual.len() != predicted.len() {
            return Err(ForecastError::ValidationError(format!(
                "Cannot score {} keys against {} actuals and {} predictions",
                keys.len(),
                actual.len(),
                predicted.len()
            )));
        }

        let mut scored = 0;
        for ((key, &a), &p) in keys.iter().zip(actual).zip(predicted) {
            match ape_score(a, p) {
                Ok(score) => {
                    scored += 1;
                    self.records.push(ScoreRecord {
                        date: key.date,
                        entity: key.entity.clone(),
                        estimator: estimator.to_string(),
                        run_id,
                        actual: a,
                        predicted: p,
                        score,
                    });
                }
                Err(e) => self.undefined.push(UndefinedScore {
                    date: key.date,
                    entity: key.entity.clone(),
                    estimator: estimator.to_string(),
                    run_id,
                    reason: e.to_string(),
                }),
            }
        }
        Ok(scored)
    }

    pub fn records(&self) -> &[ScoreRecord] {
        &self.records
    }

    pub fn undefined(&self) -> &[UndefinedScore] {
        &self.undefined
    }

    /// Mean score per (estimator, run), highest first
    pub fn summary(&self) -> Vec<ScoreSummary> {
        let mut groups: BTreeMap<(String, usize), (Vec<&ScoreRecord>, usize)> = BTreeMap::new();
        for record in &self.records {
            groups
                .entry((record.estimator.clone(), record.run_id))
                .or_default()
                .0
                .push(record);
        }
        for missing in &self.undefined {
            groups
                .entry((missing.estimator.clone(), missing.run_id))
                .or_default()
                .1 += 1;
        }

        let mut summaries: Vec<ScoreSummary> = groups
            .into_iter()
            .map(|((estimator, run_id), (records, undefined_rows))| {
                let scored_rows = records.len();
                let mean_score = if scored_rows == 0 {
                    f64::NAN
                } else {
                    records.iter().map(|r| r.score).sum::<f64>() / scored_rows as f64
                };
                let actual: Vec<f64> = records.iter().map(|r| r.actual).collect();
                let predicted: Vec<f64> = records.iter().map(|r| r.predicted).collect();
                ScoreSummary {
                    estimator,
                    run_id,
                    mean_score,
                    scored_rows,
                    undefined_rows,
                    accuracy: forecast_accuracy(&actual, &predicted).ok(),
                }
            })
            .collect();

        summaries.sort_by(|a, b| match (a.mean_score.is_nan(), b.mean_score.is_nan()) {
            (false, true) => Ordering::Less,
            (true, false) => Ordering::Greater,
            _ => b
                .mean_score
                .partial_cmp(&a.mean_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.estimator.cmp(&b.estimator))
                .then_with(|| a.run_id.cmp(&b.run_id)),
        });
        summaries
    }

    /// Write every defined score as CSV
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ape_score() {
        assert_relative_eq!(ape_score(100.0, 90.0).unwrap(), 0.1);
        assert!(matches!(
            ape_score(100.0, 100.0),
            Err(ForecastError::ScoreUndefined { .. })
        ));
        assert!(ape_score(0.0, 5.0).is_err());
        assert!(ape_score(10.0, f64::NAN).is_err());
    }

    #[test]
    fn test_summary_ranks_by_mean() {
        let date = NaiveDate::from_ymd_opt(2022, 11, 1).unwrap();
        let keys = vec![RowKey::new(date, "A"), RowKey::new(date, "B")];
        let mut board = ScoreBoard::new();
        board.record(0, "worse", &keys, &[100.0, 100.0], &[80.0, 80.0]).unwrap();
        board.record(0, "better", &keys, &[100.0, 100.0], &[95.0, 100.0]).unwrap();

        let summary = board.summary();
        assert_eq!(summary[0].estimator, "better");
        assert_eq!(summary[0].scored_rows, 1);
        assert_eq!(summary[0].undefined_rows, 1);
        assert_relative_eq!(summary[0].mean_score, 0.2);
        assert_relative_eq!(summary[1].mean_score, 0.05);
    }

    #[test]
    fn test_length_mismatch() {
        let mut board = ScoreBoard::new();
        assert!(board.record(0, "x", &[], &[1.0], &[1.0]).is_err());
    }
}
