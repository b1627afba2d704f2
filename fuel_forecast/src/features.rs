//! Per-entity feature derivation
//!
//! Every entity is derived by a pure function over its own ordered series, so
//! autoregressive features never see another entity's rows. Entities run in
//! parallel and are recombined in (date, entity) order.

use crate::calendar::{quarter, school_holiday, window_flag};
use crate::config::FeatureConfig;
use crate::data::{FeatureRow, FeatureTable, Panel, PanelRow};
use crate::error::{ForecastError, Result};
use crate::models::additive::{AdditiveAdapter, AdditiveParams};
use crate::models::sarima::{select_order, SarimaParams};
use crate::sources::{DemographicSource, HolidayCalendar};
use crate::utils::months_between;
use chrono::Datelike;
use forecast_math::rolling::{lagged_rolling_mean, lagged_rolling_sum};
use polars::prelude::*;
use rayon::prelude::*;
use tracing::{debug, info, warn};

/// Months summed into `last_year_total_consumption`
const YEAR: usize = 12;

pub const LAST_YEAR_TOTAL: &str = "last_year_total_consumption";
pub const ARIMA_PREDICTION: &str = "arima_prediction";
pub const ADDITIVE_COMPONENTS: [&str; 4] = [
    "additive_trend",
    "additive_yhat",
    "additive_yhat_lower",
    "additive_yhat_upper",
];

/// Derives the feature table from a completed panel
pub struct FeatureDeriver<'a> {
    config: FeatureConfig,
    calendar: &'a dyn HolidayCalendar,
    demographics: Option<&'a dyn DemographicSource>,
}

impl<'a> FeatureDeriver<'a> {
    pub fn new(config: FeatureConfig, calendar: &'a dyn HolidayCalendar) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            calendar,
            demographics: None,
        })
    }

    pub fn with_demographics(mut self, demographics: &'a dyn DemographicSource) -> Self {
        self.demographics = Some(demographics);
        self
    }

    /// Column names in output order
    pub fn feature_names(&self) -> Vec<String> {
        let k = self.config.num_of_auto_reg_months;
        let mut names = vec![LAST_YEAR_TOTAL.to_string()];
        names.extend((1..=k).map(|i| format!("lag_{i}")));
        names.extend((1..=k).map(|i| format!("lag_share_{i}")));
        names.extend((2..=k).map(|w| format!("rolling_mean_{w}")));
        names.extend(["quarter", "month", "covid", "school_holiday"].map(String::from));
        if self.config.population {
            names.push("population".to_string());
        }
        names.extend(self.config.extra_covariates.iter().cloned());
        if self.config.statistical.arima {
            names.push(ARIMA_PREDICTION.to_string());
        }
        if self.config.statistical.additive {
            names.extend(ADDITIVE_COMPONENTS.map(String::from));
        }
        names
    }

    pub fn derive(&self, panel: &Panel) -> Result<FeatureTable> {
        if self.config.population && self.demographics.is_none() {
            return Err(ForecastError::InvalidParameter(
                "Population features need a demographic source".to_string(),
            ));
        }
        if let Some(row) = panel.rows().iter().find(|r| r.target.is_none()) {
            return Err(ForecastError::DataError(format!(
                "Panel is not complete: {} at {} has no target",
                row.entity, row.date
            )));
        }

        let groups = panel.partition_by_entity();
        // Lags are positional, so each entity's months must be consecutive
        for (entity, rows) in &groups {
            if let Some(pair) = rows
                .windows(2)
                .find(|pair| months_between(pair[0].date, pair[1].date) != 1)
            {
                return Err(ForecastError::DataError(format!(
                    "Panel is not complete: {entity} jumps from {} to {}",
                    pair[0].date, pair[1].date
                )));
            }
        }
        let derived: Vec<Vec<FeatureRow>> = groups
            .par_iter()
            .map(|(entity, rows)| self.derive_entity(entity, rows))
            .collect::<Result<_>>()?;

        let mut rows: Vec<FeatureRow> = derived.into_iter().flatten().collect();
        rows.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.entity.cmp(&b.entity)));
        info!(
            input_rows = panel.len(),
            output_rows = rows.len(),
            features = self.feature_names().len(),
            "Derived features"
        );
        Ok(FeatureTable::new(self.feature_names(), rows))
    }

    fn derive_entity(&self, entity: &str, rows: &[PanelRow]) -> Result<Vec<FeatureRow>> {
        let k = self.config.num_of_auto_reg_months;
        let targets: Vec<f64> = rows.iter().map(|r| r.target.unwrap_or(f64::NAN)).collect();
        let n = targets.len();

        let last_year = lagged_rolling_sum(&targets, YEAR)?;
        let rolling_means = (2..=k)
            .map(|w| lagged_rolling_mean(&targets, w))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let population = self.population(entity, rows);
        let arima = if self.config.statistical.arima {
            Some(self.arima_predictions(entity, rows, &targets))
        } else {
            None
        };
        let additive = if self.config.statistical.additive {
            Some(self.additive_components(entity, rows))
        } else {
            None
        };

        let mut out = Vec::with_capacity(n);
        for (t, row) in rows.iter().enumerate() {
            let mut values: Vec<Option<f64>> = Vec::new();
            values.push(last_year[t]);
            values.extend((1..=k).map(|i| t.checked_sub(i).map(|s| targets[s])));
            values.extend((1..=k).map(|i| {
                let s = t.checked_sub(i)?;
                let total = last_year[s]?;
                (total != 0.0).then(|| targets[s] / total)
            }));
            values.extend(rolling_means.iter().map(|means| means[t]));
            values.push(Some(quarter(row.date) as f64));
            values.push(Some(row.date.month() as f64));
            values.push(Some(window_flag(
                row.date,
                self.config.covid_start,
                self.config.covid_end,
            )));
            values.push(Some(
                school_holiday(row.date, self.calendar, &self.config.country_code)? as f64,
            ));
            if self.config.population {
                values.push(population[t]);
            }
            values.extend(
                self.config
                    .extra_covariates
                    .iter()
                    .map(|name| row.covariates.get(name).copied()),
            );
            if let Some(predictions) = &arima {
                values.push(predictions[t]);
            }
            if let Some(components) = &additive {
                values.extend(components[t].iter().copied());
            }

            let defined: Option<Vec<f64>> = values
                .into_iter()
                .map(|v| v.filter(|x| x.is_finite()))
                .collect();
            if let Some(values) = defined {
                out.push(FeatureRow {
                    date: row.date,
                    entity: entity.to_string(),
                    target: targets[t],
                    values,
                });
            }
        }

        debug!(entity, dropped = n - out.len(), kept = out.len(), "Feature attrition");
        Ok(out)
    }

    /// Yearly population forward-filled along the entity's months
    fn population(&self, entity: &str, rows: &[PanelRow]) -> Vec<Option<f64>> {
        let Some(source) = self.demographics.filter(|_| self.config.population) else {
            return vec![None; rows.len()];
        };
        let mut last = None;
        let values: Vec<Option<f64>> = rows
            .iter()
            .map(|row| {
                if let Some(value) = source.population(entity, row.date.year()) {
                    last = Some(value);
                }
                last
            })
            .collect();
        let missing = values.iter().filter(|v| v.is_none()).count();
        if missing > 0 {
            warn!(entity, missing, "No population for the earliest months; rows dropped");
        }
        values
    }

    fn arima_predictions(&self, entity: &str, rows: &[PanelRow], targets: &[f64]) -> Vec<Option<f64>> {
        let Some(first) = rows.first() else {
            return Vec::new();
        };
        match select_order(first.date, targets, &SarimaParams::default()) {
            Ok(selection) => selection
                .model
                .fitted_values()
                .iter()
                .map(|v| Some(*v))
                .collect(),
            Err(e) => {
                warn!(entity, reason = %e, "No seasonal ARIMA feature for entity");
                vec![None; rows.len()]
            }
        }
    }

    fn additive_components(&self, entity: &str, rows: &[PanelRow]) -> Vec<[Option<f64>; 4]> {
        match self.fit_additive(rows) {
            Ok(components) => components,
            Err(e) => {
                warn!(entity, reason = %e, "No additive features for entity");
                vec![[None; 4]; rows.len()]
            }
        }
    }

    fn fit_additive(&self, rows: &[PanelRow]) -> Result<Vec<[Option<f64>; 4]>> {
        const DATE: &str = "date";
        const TARGET: &str = "target";
        let dates: Vec<_> = rows.iter().map(|r| r.date).collect();
        let frame = DataFrame::new(vec![
            Series::new(
                DATE,
                dates.iter().map(|d| d.format("%Y-%m-%d").to_string()).collect::<Vec<_>>(),
            ),
            Series::new(TARGET, rows.iter().map(|r| r.target).collect::<Vec<_>>()),
        ])?;

        let adapter = AdditiveAdapter::new(DATE, TARGET);
        let model = adapter.fit(&frame, &AdditiveParams::default())?;
        let components = adapter.forecast(&model, &dates)?;

        let columns = ADDITIVE_COMPONENTS
            .iter()
            .map(|name| crate::data::float_values(crate::data::column(&components, name)?))
            .collect::<Result<Vec<_>>>()?;
        Ok((0..rows.len())
            .map(|i| [columns[0][i], columns[1][i], columns[2][i], columns[3][i]])
            .collect())
    }
}
