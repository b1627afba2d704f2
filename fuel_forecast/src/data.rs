//! Panel data handling for monthly consumption forecasting
//!
//! A [`Panel`] holds one row per (month, province) with the target and any
//! raw covariates. Feature derivation turns it into a [`FeatureTable`], and
//! the splitter turns that into [`Dataset`]s backed by `ndarray` matrices.

use crate::error::{ForecastError, Result};
use crate::utils::{month_start, parse_month};
use chrono::NaiveDate;
use ndarray::{Array1, Array2, Axis};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::Path;

/// A raw observation as returned by a data source
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Observation month (any day; normalised later)
    pub date: NaiveDate,
    /// Province or other grouping key
    pub entity: String,
    /// Consumption for the month, if recorded
    pub target: Option<f64>,
    /// Additional numeric columns
    pub covariates: BTreeMap<String, f64>,
}

/// Identifies a row of the panel
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowKey {
    /// Month start
    pub date: NaiveDate,
    /// Entity name
    pub entity: String,
}

impl RowKey {
    pub fn new(date: NaiveDate, entity: impl Into<String>) -> Self {
        Self {
            date,
            entity: entity.into(),
        }
    }
}

/// One (month, entity) cell of the panel
#[derive(Debug, Clone, PartialEq)]
pub struct PanelRow {
    /// Month start
    pub date: NaiveDate,
    /// Entity name
    pub entity: String,
    /// Target value; `None` marks a missing month
    pub target: Option<f64>,
    /// Raw covariates carried through completion
    pub covariates: BTreeMap<String, f64>,
}

impl PanelRow {
    pub fn new(date: NaiveDate, entity: impl Into<String>, target: Option<f64>) -> Self {
        Self {
            date: month_start(date),
            entity: entity.into(),
            target,
            covariates: BTreeMap::new(),
        }
    }

    /// Attach a covariate
    pub fn with_covariate(mut self, name: impl Into<String>, value: f64) -> Self {
        self.covariates.insert(name.into(), value);
        self
    }

    pub fn key(&self) -> RowKey {
        RowKey::new(self.date, self.entity.clone())
    }
}

impl From<RawRecord> for PanelRow {
    fn from(record: RawRecord) -> Self {
        Self {
            date: month_start(record.date),
            entity: record.entity,
            target: record.target,
            covariates: record.covariates,
        }
    }
}

/// Long-format monthly panel
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Panel {
    rows: Vec<PanelRow>,
}

impl Panel {
    pub fn new(rows: Vec<PanelRow>) -> Self {
        Self { rows }
    }

    /// Build a panel from raw source records
    pub fn from_records(records: Vec<RawRecord>) -> Self {
        Self::new(records.into_iter().map(PanelRow::from).collect())
    }

    pub fn rows(&self) -> &[PanelRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<PanelRow> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct entities in ascending order
    pub fn entities(&self) -> Vec<String> {
        self.rows
            .iter()
            .map(|r| r.entity.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Earliest and latest month, or `None` for an empty panel
    pub fn month_bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        let min = self.rows.iter().map(|r| r.date).min()?;
        let max = self.rows.iter().map(|r| r.date).max()?;
        Some((min, max))
    }

    /// Rows grouped by entity, each group ordered by date
    pub fn partition_by_entity(&self) -> BTreeMap<String, Vec<PanelRow>> {
        let mut groups: BTreeMap<String, Vec<PanelRow>> = BTreeMap::new();
        for row in &self.rows {
            groups.entry(row.entity.clone()).or_default().push(row.clone());
        }
        for rows in groups.values_mut() {
            rows.sort_by_key(|r| r.date);
        }
        groups
    }

    /// Sort rows by (date, entity)
    pub fn sorted(mut self) -> Self {
        self.rows
            .sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.entity.cmp(&b.entity)));
        self
    }

    /// Look up a cell
    pub fn get(&self, date: NaiveDate, entity: &str) -> Option<&PanelRow> {
        self.rows
            .iter()
            .find(|r| r.date == date && r.entity == entity)
    }

    /// Number of rows whose target is missing
    pub fn missing_count(&self) -> usize {
        self.rows.iter().filter(|r| r.target.is_none()).count()
    }

    /// Export to a polars `DataFrame`.
    ///
    /// Dates are written as `%Y-%m-%d` strings; covariates become nullable
    /// `Float64` columns.
    pub fn to_dataframe(
        &self,
        date_column: &str,
        entity_column: &str,
        target_column: &str,
    ) -> Result<DataFrame> {
        let dates: Vec<String> = self
            .rows
            .iter()
            .map(|r| r.date.format("%Y-%m-%d").to_string())
            .collect();
        let entities: Vec<&str> = self.rows.iter().map(|r| r.entity.as_str()).collect();
        let targets: Vec<Option<f64>> = self.rows.iter().map(|r| r.target).collect();

        let mut columns = vec![
            Series::new(date_column, dates),
            Series::new(entity_column, entities),
            Series::new(target_column, targets),
        ];

        let covariate_names: BTreeSet<&String> =
            self.rows.iter().flat_map(|r| r.covariates.keys()).collect();
        for name in covariate_names {
            let values: Vec<Option<f64>> = self
                .rows
                .iter()
                .map(|r| r.covariates.get(name).copied())
                .collect();
            columns.push(Series::new(name, values));
        }

        Ok(DataFrame::new(columns)?)
    }

    /// Build a panel from a polars `DataFrame`.
    ///
    /// Every numeric column other than the target becomes a covariate. Null
    /// covariates are skipped; null dates or entities are an error.
    pub fn from_dataframe(
        df: &DataFrame,
        date_column: &str,
        entity_column: &str,
        target_column: &str,
        date_format: &str,
    ) -> Result<Panel> {
        let dates = date_values(column(df, date_column)?, date_format)?;
        let entities = string_values(column(df, entity_column)?)?;
        let targets = float_values(column(df, target_column)?)?;

        let reserved = [date_column, entity_column, target_column];
        let mut covariates: Vec<(String, Vec<Option<f64>>)> = Vec::new();
        for series in df.get_columns() {
            let name = series.name();
            if reserved.contains(&name) || !series.dtype().is_numeric() {
                continue;
            }
            covariates.push((name.to_string(), float_values(series)?));
        }

        let mut rows = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            let entity = entities[i].clone().ok_or_else(|| {
                ForecastError::DataError(format!("Null {entity_column} at row {i}"))
            })?;
            let mut row = PanelRow::new(dates[i], entity, targets[i]);
            for (name, values) in &covariates {
                if let Some(value) = values[i] {
                    row.covariates.insert(name.clone(), value);
                }
            }
            rows.push(row);
        }
        Ok(Panel::new(rows))
    }
}

/// Read a CSV file into a `DataFrame` with inferred schema
pub fn read_csv_frame<P: AsRef<Path>>(path: P) -> Result<DataFrame> {
    let file = File::open(path)?;
    let df = CsvReader::new(file)
        .infer_schema(None)
        .has_header(true)
        .finish()?;
    Ok(df)
}

pub(crate) fn column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Series> {
    df.column(name)
        .map_err(|e| ForecastError::DataError(format!("Column '{name}' not found: {e}")))
}

pub(crate) fn float_values(series: &Series) -> Result<Vec<Option<f64>>> {
    let cast = series.cast(&DataType::Float64)?;
    Ok(cast.f64()?.into_iter().collect())
}

pub(crate) fn string_values(series: &Series) -> Result<Vec<Option<String>>> {
    let cast = series.cast(&DataType::Utf8)?;
    Ok(cast.utf8()?.into_iter().map(|v| v.map(str::to_string)).collect())
}

fn date_values(series: &Series, date_format: &str) -> Result<Vec<NaiveDate>> {
    // Temporal columns render as ISO dates once cast to strings
    let format = if series.dtype().is_temporal() {
        "%Y-%m-%d"
    } else {
        date_format
    };
    string_values(series)?
        .into_iter()
        .enumerate()
        .map(|(i, value)| match value {
            Some(text) => {
                let day = text.get(..10).unwrap_or(&text);
                parse_month(day, format).or_else(|_| parse_month(&text, format))
            }
            None => Err(ForecastError::DataError(format!(
                "Null {} at row {i}",
                series.name()
            ))),
        })
        .collect()
}

/// One fully-defined row of derived features
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub date: NaiveDate,
    pub entity: String,
    /// Target value of the month
    pub target: f64,
    /// Feature values, aligned with [`FeatureTable::names`]
    pub values: Vec<f64>,
}

impl FeatureRow {
    pub fn key(&self) -> RowKey {
        RowKey::new(self.date, self.entity.clone())
    }
}

/// Derived features for every row that survived attrition
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    /// Feature column names
    pub names: Vec<String>,
    /// Rows sorted by (date, entity)
    pub rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn new(names: Vec<String>, rows: Vec<FeatureRow>) -> Self {
        Self { names, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a feature column
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Values of a feature column in row order
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r.values[idx]).collect())
    }

    /// Rows of one entity, in table order
    pub fn entity_rows<'a>(&'a self, entity: &'a str) -> impl Iterator<Item = &'a FeatureRow> {
        self.rows.iter().filter(move |r| r.entity == entity)
    }

    /// Convert selected rows into a dataset
    pub fn to_dataset<'a, I>(&self, rows: I) -> Result<Dataset>
    where
        I: IntoIterator<Item = &'a FeatureRow>,
    {
        let width = self.names.len();
        let mut keys = Vec::new();
        let mut flat = Vec::new();
        let mut target = Vec::new();
        for row in rows {
            if row.values.len() != width {
                return Err(ForecastError::DataError(format!(
                    "Row {} / {} has {} values, expected {width}",
                    row.date,
                    row.entity,
                    row.values.len()
                )));
            }
            keys.push(row.key());
            flat.extend_from_slice(&row.values);
            target.push(row.target);
        }
        let matrix = Array2::from_shape_vec((keys.len(), width), flat)
            .map_err(|e| ForecastError::DataError(format!("Cannot shape feature matrix: {e}")))?;
        Ok(Dataset {
            x: Features {
                keys,
                names: self.names.clone(),
                matrix,
            },
            y: Array1::from(target),
        })
    }
}

/// Feature matrix with row keys
#[derive(Debug, Clone, PartialEq)]
pub struct Features {
    /// (date, entity) of each matrix row
    pub keys: Vec<RowKey>,
    /// Column names
    pub names: Vec<String>,
    /// Row-major feature values
    pub matrix: Array2<f64>,
}

impl Features {
    pub fn n_rows(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Keep only the given rows, in the given order
    pub fn select(&self, indices: &[usize]) -> Features {
        Features {
            keys: indices.iter().map(|&i| self.keys[i].clone()).collect(),
            names: self.names.clone(),
            matrix: self.matrix.select(Axis(0), indices),
        }
    }

    /// Distinct entities in ascending order
    pub fn entities(&self) -> Vec<String> {
        self.keys
            .iter()
            .map(|k| k.entity.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Features with their target
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub x: Features,
    pub y: Array1<f64>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// Keep only the given rows, in the given order
    pub fn select(&self, indices: &[usize]) -> Dataset {
        Dataset {
            x: self.x.select(indices),
            y: self.y.select(Axis(0), indices),
        }
    }

    /// Earliest and latest row date
    pub fn date_bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        let min = self.x.keys.iter().map(|k| k.date).min()?;
        let max = self.x.keys.iter().map(|k| k.date).max()?;
        Some((min, max))
    }

    /// Distinct dates in ascending order
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.x
            .keys
            .iter()
            .map(|k| k.date)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
