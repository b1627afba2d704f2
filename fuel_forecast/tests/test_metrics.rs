use approx::assert_relative_eq;
use chrono::NaiveDate;
use fuel_forecast::data::RowKey;
use fuel_forecast::metrics::{ape_score, ScoreBoard, ScoreRecord};
use fuel_forecast::ForecastError;
use pretty_assertions::assert_eq;
use rstest::rstest;
use tempfile::tempdir;

fn keys(entities: &[&str]) -> Vec<RowKey> {
    let date = NaiveDate::from_ymd_opt(2022, 11, 1).unwrap();
    entities.iter().map(|e| RowKey::new(date, *e)).collect()
}

#[rstest]
#[case(100.0, 90.0, 0.1)]
#[case(100.0, 110.0, 0.1)]
#[case(200.0, 150.0, 0.04)]
#[case(50.0, 49.0, 0.5)]
fn test_ape_score_values(#[case] actual: f64, #[case] predicted: f64, #[case] expected: f64) {
    assert_relative_eq!(ape_score(actual, predicted).unwrap(), expected, epsilon = 1e-12);
}

#[rstest]
#[case(100.0, 100.0)]
#[case(0.0, 10.0)]
#[case(f64::NAN, 10.0)]
#[case(10.0, f64::INFINITY)]
fn test_ape_score_undefined(#[case] actual: f64, #[case] predicted: f64) {
    assert!(matches!(
        ape_score(actual, predicted),
        Err(ForecastError::ScoreUndefined { .. })
    ));
}

#[test]
fn test_undefined_rows_are_kept_apart() {
    let mut board = ScoreBoard::new();
    let scored = board
        .record(0, "gbt_depthwise", &keys(&["Ankara", "Izmir", "Van"]), &[100.0, 0.0, 80.0], &[90.0, 5.0, 80.0])
        .unwrap();

    assert_eq!(scored, 1);
    assert_eq!(board.records().len(), 1);
    assert_eq!(board.undefined().len(), 2);
    assert_eq!(board.undefined()[0].entity, "Izmir");
    assert_eq!(board.undefined()[1].entity, "Van");
}

#[test]
fn test_summary_groups_by_estimator_and_run() {
    let mut board = ScoreBoard::new();
    let k = keys(&["Ankara", "Izmir"]);
    board.record(0, "sarima", &k, &[100.0, 100.0], &[90.0, 80.0]).unwrap();
    board.record(1, "sarima", &k, &[100.0, 100.0], &[95.0, 95.0]).unwrap();
    board.record(0, "additive", &k, &[100.0, 100.0], &[100.0, 100.0]).unwrap();

    let summary = board.summary();
    assert_eq!(summary.len(), 3);
    assert_eq!((summary[0].estimator.as_str(), summary[0].run_id), ("sarima", 1));
    assert_relative_eq!(summary[0].mean_score, 0.2);
    assert_eq!((summary[1].estimator.as_str(), summary[1].run_id), ("sarima", 0));
    assert_relative_eq!(summary[1].mean_score, (0.1 + 0.05) / 2.0);
    let accuracy = summary[1].accuracy.as_ref().unwrap();
    assert_relative_eq!(accuracy.mae, 15.0);

    // Nothing defined: ranked last
    assert_eq!(summary[2].estimator, "additive");
    assert!(summary[2].mean_score.is_nan());
    assert_eq!(summary[2].undefined_rows, 2);
    assert!(summary[2].accuracy.is_none());
}

#[test]
fn test_write_csv() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("scores.csv");
    let mut board = ScoreBoard::new();
    board.record(2, "gbt_leafwise", &keys(&["Ankara"]), &[100.0], &[90.0]).unwrap();
    board.write_csv(&path).unwrap();

    let mut reader = csv::Reader::from_path(&path).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(
        headers.iter().collect::<Vec<_>>(),
        vec!["date", "entity", "estimator", "run_id", "actual", "predicted", "score"]
    );
    let rows: Vec<ScoreRecord> = reader.deserialize().collect::<Result<_, _>>().unwrap();
    assert_eq!(rows, board.records().to_vec());
}
