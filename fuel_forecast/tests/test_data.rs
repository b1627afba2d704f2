use chrono::NaiveDate;
use fuel_forecast::data::{Panel, PanelRow};
use fuel_forecast::sources::{CsvDataSource, DemographicSource, PopulationTable, RawDataSource};
use pretty_assertions::assert_eq;
use std::io::Write;
use tempfile::NamedTempFile;

fn month(y: i32, m: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, 1).unwrap()
}

// Helper function to create a small consumption file
fn consumption_csv() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "date,province,current_month_consumption,price").unwrap();
    writeln!(file, "2022-01-01,Ankara,120.5,21.0").unwrap();
    writeln!(file, "2022-01-01,Izmir,80.25,21.0").unwrap();
    writeln!(file, "2022-02-01,Ankara,118.0,22.5").unwrap();
    writeln!(file, "2022-02-01,Izmir,,22.5").unwrap();
    writeln!(file, "2022-03-15,Ankara,130.0,23.0").unwrap();
    writeln!(file, "2022-03-01,Izmir,85.0,23.0").unwrap();
    writeln!(file, "2022-04-01,Ankara,128.0,24.0").unwrap();
    file
}

fn source(file: &NamedTempFile) -> CsvDataSource {
    CsvDataSource::new(file.path(), "date", "province", "current_month_consumption")
}

#[test]
fn test_csv_source_reads_every_row() {
    let file = consumption_csv();
    let records = source(&file)
        .fetch(month(2022, 1), month(2022, 12), None, None)
        .unwrap();

    assert_eq!(records.len(), 7);
    assert_eq!(records[0].entity, "Ankara");
    assert_eq!(records[0].target, Some(120.5));
    assert_eq!(records[0].covariates["price"], 21.0);
    // Empty target cells stay missing
    assert_eq!(records[3].target, None);
    // Dates are normalised to the month start
    assert_eq!(records[4].date, month(2022, 3));
}

#[test]
fn test_csv_source_filters() {
    let file = consumption_csv();
    let src = source(&file);

    let ranged = src.fetch(month(2022, 2), month(2022, 3), None, None).unwrap();
    assert_eq!(ranged.len(), 4);
    assert!(ranged.iter().all(|r| r.date >= month(2022, 2) && r.date <= month(2022, 3)));

    let ankara = src.fetch(month(2022, 1), month(2022, 12), Some("Ankara"), None).unwrap();
    assert_eq!(ankara.len(), 4);

    let limited = src.fetch(month(2022, 1), month(2022, 12), None, Some(2)).unwrap();
    assert_eq!(limited.len(), 2);
}

#[test]
fn test_csv_source_errors() {
    let file = consumption_csv();
    assert!(source(&file)
        .fetch(month(2022, 5), month(2022, 1), None, None)
        .is_err());

    let missing = CsvDataSource::new("no_such_file.csv", "date", "province", "current_month_consumption");
    assert!(missing.fetch(month(2022, 1), month(2022, 2), None, None).is_err());

    let wrong_column = CsvDataSource::new(file.path(), "date", "city", "current_month_consumption");
    assert!(wrong_column.fetch(month(2022, 1), month(2022, 2), None, None).is_err());
}

#[test]
fn test_custom_date_format() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "period,province,current_month_consumption").unwrap();
    writeln!(file, "01/2022,Van,10.0").unwrap();
    writeln!(file, "02/2022,Van,11.0").unwrap();

    let src = CsvDataSource::new(file.path(), "period", "province", "current_month_consumption")
        .with_date_format("%d/%m/%Y");
    // Values that do not match the format are rejected
    assert!(src.fetch(month(2022, 1), month(2022, 2), None, None).is_err());

    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "period,province,current_month_consumption").unwrap();
    writeln!(file, "15/01/2022,Van,10.0").unwrap();
    writeln!(file, "15/02/2022,Van,11.0").unwrap();
    let src = CsvDataSource::new(file.path(), "period", "province", "current_month_consumption")
        .with_date_format("%d/%m/%Y");
    let records = src.fetch(month(2022, 1), month(2022, 2), None, None).unwrap();
    assert_eq!(records[1].date, month(2022, 2));
}

#[test]
fn test_panel_dataframe_round_trip() {
    let panel = Panel::new(vec![
        PanelRow::new(month(2022, 1), "Ankara", Some(1.5)).with_covariate("price", 20.0),
        PanelRow::new(month(2022, 1), "Izmir", None).with_covariate("price", 20.0),
        PanelRow::new(month(2022, 2), "Ankara", Some(2.5)).with_covariate("price", 21.0),
    ]);
    let df = panel.to_dataframe("date", "province", "consumption").unwrap();
    assert_eq!(df.height(), 3);
    assert_eq!(df.width(), 4);

    let back = Panel::from_dataframe(&df, "date", "province", "consumption", "%Y-%m-%d").unwrap();
    assert_eq!(back, panel);
}

#[test]
fn test_panel_queries() {
    let panel = Panel::new(vec![
        PanelRow::new(month(2022, 3), "Izmir", Some(3.0)),
        PanelRow::new(month(2022, 1), "Ankara", None),
        PanelRow::new(month(2022, 2), "Ankara", Some(2.0)),
    ]);
    assert_eq!(panel.entities(), vec!["Ankara".to_string(), "Izmir".to_string()]);
    assert_eq!(panel.month_bounds(), Some((month(2022, 1), month(2022, 3))));
    assert_eq!(panel.missing_count(), 1);

    let groups = panel.partition_by_entity();
    assert_eq!(groups["Ankara"].len(), 2);
    assert_eq!(groups["Ankara"][0].date, month(2022, 1));
}

#[test]
fn test_population_csv() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "year,province,population").unwrap();
    writeln!(file, "2021,Ankara,5700000").unwrap();
    writeln!(file, "2022,Ankara,5780000").unwrap();
    writeln!(file, "2022,Izmir,").unwrap();

    let table = PopulationTable::from_csv(file.path(), "province").unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table.population("Ankara", 2022), Some(5_780_000.0));
    assert_eq!(table.population("Izmir", 2022), None);
}
