//! Raw record cleanup before panel completion

use crate::config::PreprocessConfig;
use crate::data::{Panel, PanelRow, RawRecord};
use tracing::{debug, info};

/// Drops excluded entities, repairs parse anomalies and normalises dates
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    /// Turn raw records into a panel sorted by (date, entity)
    pub fn process(&self, records: Vec<RawRecord>) -> Panel {
        let total = records.len();
        let mut repaired = 0usize;

        let rows: Vec<PanelRow> = records
            .into_iter()
            .filter(|r| !self.config.drop_entities.contains(&r.entity))
            .map(|record| {
                let mut row = PanelRow::from(record);
                if let (Some(value), Some(threshold)) = (row.target, self.config.anomaly_threshold)
                {
                    let fixed = repair_anomaly(value, threshold);
                    if fixed != value {
                        repaired += 1;
                        row.target = Some(fixed);
                    }
                }
                row
            })
            .collect();

        let dropped = total - rows.len();
        if dropped > 0 {
            info!(dropped, entities = ?self.config.drop_entities, "Dropped excluded entities");
        }
        if repaired > 0 {
            debug!(repaired, "Repaired targets with lost decimal separators");
        }

        Panel::new(rows).sorted()
    }
}

/// Undo a lost decimal separator: integral values above `threshold` are
/// scaled down by 1000.
pub fn repair_anomaly(value: f64, threshold: f64) -> f64 {
    if value.fract() == 0.0 && value > threshold {
        value / 1000.0
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn record(month: u32, day: u32, entity: &str, target: f64) -> RawRecord {
        RawRecord {
            date: NaiveDate::from_ymd_opt(2022, month, day).unwrap(),
            entity: entity.to_string(),
            target: Some(target),
            covariates: BTreeMap::new(),
        }
    }

    #[test]
    fn test_repair_anomaly() {
        assert_eq!(repair_anomaly(123_456.0, 100_000.0), 123.456);
        assert_eq!(repair_anomaly(123_456.5, 100_000.0), 123_456.5);
        assert_eq!(repair_anomaly(99_000.0, 100_000.0), 99_000.0);
    }

    #[test]
    fn test_process_drops_sorts_and_normalises() {
        let preprocessor = Preprocessor::new(PreprocessConfig {
            drop_entities: vec!["TOTAL".to_string()],
            ..Default::default()
        });
        let panel = preprocessor.process(vec![
            record(2, 15, "B", 2.0),
            record(1, 20, "TOTAL", 9.0),
            record(1, 3, "A", 250_000.0),
        ]);
        assert_eq!(panel.len(), 2);
        assert_eq!(panel.rows()[0].entity, "A");
        assert_eq!(panel.rows()[0].date, NaiveDate::from_ymd_opt(2022, 1, 1).unwrap());
        assert_eq!(panel.rows()[0].target, Some(250.0));
        assert_eq!(panel.rows()[1].date, NaiveDate::from_ymd_opt(2022, 2, 1).unwrap());
    }
}
