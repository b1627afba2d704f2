//! Collaborators the pipeline reads from and writes to
//!
//! Each collaborator is a trait so the pipeline can run against databases,
//! services or fixtures alike. The file-based implementations here are what
//! the binary wires up.

use crate::data::{column, float_values, read_csv_frame, string_values, Panel, RawRecord};
use crate::error::{ForecastError, Result};
use crate::models::TrainedModel;
use crate::utils::month_start;
use chrono::{Datelike, NaiveDate};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Source of raw monthly records
pub trait RawDataSource: Send + Sync {
    /// Records whose month lies in `[start, end]`
    fn fetch(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        entity_filter: Option<&str>,
        row_limit: Option<usize>,
    ) -> Result<Vec<RawRecord>>;
}

/// Yearly population per entity
pub trait DemographicSource: Send + Sync {
    fn population(&self, entity: &str, year: i32) -> Option<f64>;
}

/// Public holiday lookup
pub trait HolidayCalendar: Send + Sync {
    fn is_holiday(&self, date: NaiveDate, country_code: &str) -> bool;
}

/// Persistence for fitted models
pub trait ModelStore: Send + Sync {
    fn save(&self, model: &TrainedModel, name: &str) -> Result<()>;
    fn load(&self, name: &str) -> Result<TrainedModel>;
}

/// Raw records read from a CSV file with polars
#[derive(Debug, Clone)]
pub struct CsvDataSource {
    path: PathBuf,
    date_column: String,
    entity_column: String,
    target_column: String,
    date_format: String,
}

impl CsvDataSource {
    pub fn new<P: Into<PathBuf>>(
        path: P,
        date_column: &str,
        entity_column: &str,
        target_column: &str,
    ) -> Self {
        Self {
            path: path.into(),
            date_column: date_column.to_string(),
            entity_column: entity_column.to_string(),
            target_column: target_column.to_string(),
            date_format: "%Y-%m-%d".to_string(),
        }
    }

    /// Format of the date column when it is read as text
    pub fn with_date_format(mut self, format: &str) -> Self {
        self.date_format = format.to_string();
        self
    }
}

impl RawDataSource for CsvDataSource {
    fn fetch(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        entity_filter: Option<&str>,
        row_limit: Option<usize>,
    ) -> Result<Vec<RawRecord>> {
        if end < start {
            return Err(ForecastError::ValidationError(format!(
                "Malformed date range: {start} is after {end}"
            )));
        }
        let df = read_csv_frame(&self.path)?;
        let panel = Panel::from_dataframe(
            &df,
            &self.date_column,
            &self.entity_column,
            &self.target_column,
            &self.date_format,
        )?;

        let (start, end) = (month_start(start), month_start(end));
        let records: Vec<RawRecord> = panel
            .into_rows()
            .into_iter()
            .filter(|row| row.date >= start && row.date <= end)
            .filter(|row| entity_filter.map_or(true, |e| row.entity == e))
            .take(row_limit.unwrap_or(usize::MAX))
            .map(|row| RawRecord {
                date: row.date,
                entity: row.entity,
                target: row.target,
                covariates: row.covariates,
            })
            .collect();

        info!(
            path = %self.path.display(),
            rows = records.len(),
            %start,
            %end,
            "Fetched raw records"
        );
        Ok(records)
    }
}

/// In-memory population table keyed by (entity, year)
#[derive(Debug, Clone, Default)]
pub struct PopulationTable {
    values: BTreeMap<(String, i32), f64>,
}

impl PopulationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity: &str, year: i32, population: f64) {
        self.values.insert((entity.to_string(), year), population);
    }

    pub fn with(mut self, entity: &str, year: i32, population: f64) -> Self {
        self.insert(entity, year, population);
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Load a CSV with `year`, `<entity_column>` and `population` columns
    pub fn from_csv<P: AsRef<Path>>(path: P, entity_column: &str) -> Result<Self> {
        let df = read_csv_frame(path)?;
        let years = float_values(column(&df, "year")?)?;
        let entities = string_values(column(&df, entity_column)?)?;
        let populations = float_values(column(&df, "population")?)?;

        let mut table = Self::new();
        for i in 0..df.height() {
            match (&entities[i], years[i], populations[i]) {
                (Some(entity), Some(year), Some(population)) => {
                    table.insert(entity, year as i32, population)
                }
                _ => debug!(row = i, "Skipping incomplete population row"),
            }
        }
        Ok(table)
    }
}

impl DemographicSource for PopulationTable {
    fn population(&self, entity: &str, year: i32) -> Option<f64> {
        self.values.get(&(entity.to_string(), year)).copied()
    }
}

/// Fixed-date public holidays of Türkiye: New Year, National Sovereignty and
/// Children's Day, Labour Day, Youth and Sports Day, Democracy Day, Victory
/// Day, Republic Day.
const TR_FIXED_HOLIDAYS: [(u32, u32); 7] = [
    (1, 1),
    (4, 23),
    (5, 1),
    (5, 19),
    (7, 15),
    (8, 30),
    (10, 29),
];

/// Fixed national holidays plus caller-supplied dates.
///
/// Religious feasts move with the lunar calendar; add them through
/// [`NationalHolidayCalendar::with_extra_dates`].
#[derive(Debug, Clone, Default)]
pub struct NationalHolidayCalendar {
    extra: BTreeSet<NaiveDate>,
}

impl NationalHolidayCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extra_dates<I: IntoIterator<Item = NaiveDate>>(mut self, dates: I) -> Self {
        self.extra.extend(dates);
        self
    }
}

impl HolidayCalendar for NationalHolidayCalendar {
    fn is_holiday(&self, date: NaiveDate, country_code: &str) -> bool {
        if self.extra.contains(&date) {
            return true;
        }
        match country_code {
            "TR" => TR_FIXED_HOLIDAYS.contains(&(date.month(), date.day())),
            _ => false,
        }
    }
}

/// Stores models as `<dir>/<name>.json`
#[derive(Debug, Clone)]
pub struct JsonModelStore {
    dir: PathBuf,
}

impl JsonModelStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(ForecastError::InvalidParameter(format!(
                "Invalid model name '{name}'"
            )));
        }
        Ok(self.dir.join(format!("{name}.json")))
    }
}

impl ModelStore for JsonModelStore {
    fn save(&self, model: &TrainedModel, name: &str) -> Result<()> {
        let path = self.path_for(name)?;
        fs::create_dir_all(&self.dir)?;
        let writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer(writer, model)?;
        info!(path = %path.display(), family = model.family_name(), "Saved model");
        Ok(())
    }

    fn load(&self, name: &str) -> Result<TrainedModel> {
        let path = self.path_for(name)?;
        let reader = BufReader::new(File::open(&path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
