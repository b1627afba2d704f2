//! Panel completion: a full (month × entity) grid with imputed gaps

use crate::data::{Panel, PanelRow};
use crate::error::{ForecastError, Result};
use crate::utils::{month_range, months_between};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Builds a complete panel and fills missing targets.
///
/// A missing month is the mean of the pairs `(t-i, t+i)`, `i = 1..=months`,
/// where both sides are present. Without any such pair it takes the value of
/// `t-1`. Cells are visited by date, then entity, and an imputed value is
/// visible to later cells.
///
/// The completed panel is always in (date, entity) order, whatever order the
/// input rows came in. Completing a complete panel therefore yields
/// `panel.clone().sorted()`.
#[derive(Debug, Clone)]
pub struct PanelCompleter {
    months: usize,
}

impl PanelCompleter {
    pub fn new(months: usize) -> Result<Self> {
        if months == 0 {
            return Err(ForecastError::InvalidParameter(
                "Imputation window must span at least one month".to_string(),
            ));
        }
        Ok(Self { months })
    }

    pub fn months(&self) -> usize {
        self.months
    }

    pub fn complete(&self, panel: &Panel) -> Result<Panel> {
        let Some((first, last)) = panel.month_bounds() else {
            return Ok(panel.clone());
        };
        let dates = month_range(first, last)?;
        let entities = panel.entities();

        let mut grid: BTreeMap<String, Vec<Option<PanelRow>>> = entities
            .iter()
            .map(|e| (e.clone(), vec![None; dates.len()]))
            .collect();
        for row in panel.rows() {
            let t = months_between(first, row.date) as usize;
            if let Some(cells) = grid.get_mut(&row.entity) {
                if cells[t].is_some() {
                    warn!(entity = %row.entity, date = %row.date, "Duplicate row, keeping the last one");
                }
                cells[t] = Some(row.clone());
            }
        }

        let mut series: BTreeMap<String, Vec<Option<f64>>> = grid
            .iter()
            .map(|(entity, cells)| {
                let values = cells.iter().map(|c| c.as_ref().and_then(|r| r.target)).collect();
                (entity.clone(), values)
            })
            .collect();

        for (entity, values) in &series {
            let missing = values.iter().filter(|v| v.is_none()).count();
            if missing > 0 {
                info!(%entity, missing, "Missing months in panel");
            }
        }

        for (t, date) in dates.iter().enumerate() {
            for entity in &entities {
                let Some(values) = series.get_mut(entity) else {
                    continue;
                };
                if values[t].is_some() {
                    continue;
                }
                let value = self.impute(values, t).ok_or_else(|| ForecastError::DataGap {
                    entity: entity.clone(),
                    date: *date,
                })?;
                debug!(%entity, %date, value, "Imputed missing month");
                values[t] = Some(value);
            }
        }

        let mut rows = Vec::with_capacity(dates.len() * entities.len());
        for (t, date) in dates.iter().enumerate() {
            for entity in &entities {
                let target = series.get(entity).and_then(|v| v[t]);
                let covariates = grid
                    .get(entity)
                    .and_then(|cells| cells[t].as_ref())
                    .map(|r| r.covariates.clone())
                    .unwrap_or_default();
                rows.push(PanelRow {
                    date: *date,
                    entity: entity.clone(),
                    target,
                    covariates,
                });
            }
        }
        Ok(Panel::new(rows))
    }

    fn impute(&self, values: &[Option<f64>], t: usize) -> Option<f64> {
        let mut sum = 0.0;
        let mut count = 0usize;
        for i in 1..=self.months {
            if i > t || t + i >= values.len() {
                continue;
            }
            if let (Some(before), Some(after)) = (values[t - i], values[t + i]) {
                sum += before + after;
                count += 2;
            }
        }
        if count > 0 {
            return Some(sum / count as f64);
        }
        if t == 0 {
            return None;
        }
        values[t - 1]
    }
}

/// Whether a panel is already a complete grid with no missing targets
pub fn is_complete(panel: &Panel) -> bool {
    let Some((first, last)) = panel.month_bounds() else {
        return true;
    };
    let months = months_between(first, last) as usize + 1;
    let entities = panel.entities().len();
    let mut seen: BTreeMap<(NaiveDate, &str), ()> = BTreeMap::new();
    for row in panel.rows() {
        if row.target.is_none() || seen.insert((row.date, row.entity.as_str()), ()).is_some() {
            return false;
        }
    }
    seen.len() == months * entities
}
