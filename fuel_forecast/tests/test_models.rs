use approx::assert_relative_eq;
use chrono::NaiveDate;
use fuel_forecast::data::{Dataset, FeatureRow, FeatureTable};
use fuel_forecast::models::sarima::{select_order, SarimaOrder, SarimaParams};
use fuel_forecast::models::{EstimatorFamily, Fittable, ParamSet, ParamValue, TrainedModel};
use fuel_forecast::sources::{JsonModelStore, ModelStore};
use fuel_forecast::utils::shift_months;
use fuel_forecast::ForecastError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rstest::rstest;
use tempfile::tempdir;

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2019, 1, 1).unwrap()
}

fn seasonal(t: usize) -> f64 {
    [0.0, -6.0, 2.0, 8.0, 12.0, 18.0, 24.0, 22.0, 10.0, 4.0, -2.0, -8.0][t % 12]
}

fn noise(t: usize) -> f64 {
    ((t as f64 * 12.9898).sin() * 43758.5453).fract() - 0.5
}

fn series(months: usize, level: f64) -> Vec<f64> {
    (0..months)
        .map(|t| level + 2.0 * t as f64 + seasonal(t) + 3.0 * noise(t))
        .collect()
}

// Panel-shaped dataset: rows sorted by (date, entity)
fn dataset(months: usize) -> Dataset {
    let entities = [("Ankara", 500.0), ("Izmir", 300.0)];
    let mut rows = Vec::new();
    for t in 0..months {
        for (entity, level) in entities {
            let y = series(months, level);
            rows.push(FeatureRow {
                date: shift_months(start(), t as i32).unwrap(),
                entity: entity.to_string(),
                target: y[t],
                values: vec![t as f64, (t % 12) as f64 + 1.0, level],
            });
        }
    }
    let table = FeatureTable::new(
        vec!["t".to_string(), "month".to_string(), "level".to_string()],
        rows,
    );
    table.to_dataset(&table.rows).unwrap()
}

fn split_at(data: &Dataset, train_rows: usize) -> (Dataset, Dataset) {
    let train: Vec<usize> = (0..train_rows).collect();
    let test: Vec<usize> = (train_rows..data.len()).collect();
    (data.select(&train), data.select(&test))
}

fn params(entries: &[(&str, ParamValue)]) -> ParamSet {
    entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn mae(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum::<f64>() / a.len() as f64
}

#[test]
fn test_sarima_selects_minimal_aic() {
    let y = series(24, 100.0);
    let selection = select_order(start(), &y, &SarimaParams::default()).unwrap();

    let successful: Vec<f64> = selection
        .trials
        .iter()
        .filter_map(|t| t.aic.as_ref().ok().copied())
        .collect();
    assert!(!successful.is_empty());
    assert_eq!(selection.trials.len(), 64);
    let minimum = successful.iter().copied().fold(f64::INFINITY, f64::min);
    assert_relative_eq!(selection.model.aic(), minimum);
}

#[test]
fn test_sarima_white_noise_is_not_differenced() {
    let mut rng = StdRng::seed_from_u64(7);
    let y: Vec<f64> = (0..120).map(|_| 100_000.0 + rng.gen_range(-5000.0..5000.0)).collect();
    let selection = select_order(start(), &y, &SarimaParams::default()).unwrap();

    let order = selection.model.order();
    assert_eq!((order.d, order.seasonal_d), (0, 0), "selected {order}");

    let aic_of = |wanted: SarimaOrder| {
        selection
            .trials
            .iter()
            .find(|t| t.order == wanted)
            .and_then(|t| t.aic.as_ref().ok().copied())
            .unwrap()
    };
    let white_noise = aic_of(SarimaOrder::new(0, 0, 0).seasonal(0, 0, 0, 12));
    let overfitted = aic_of(SarimaOrder::new(1, 1, 1).seasonal(1, 1, 0, 12));
    assert!(white_noise < overfitted, "{white_noise} >= {overfitted}");
}

#[rstest]
#[case(EstimatorFamily::DepthWiseBoosting)]
#[case(EstimatorFamily::LeafWiseBoosting)]
#[case(EstimatorFamily::ObliviousBoosting)]
fn test_boosting_beats_the_mean(#[case] family: EstimatorFamily) {
    let data = dataset(36);
    let p = params(&[
        ("n_estimators", ParamValue::Int(50)),
        ("max_depth", ParamValue::Int(3)),
    ]);
    let model = family.fit(&data.x, &data.y, &p).unwrap();
    assert!(matches!(model, TrainedModel::Boosted(_)));

    let predicted = model.predict(&data.x).unwrap().to_vec();
    let actual = data.y.to_vec();
    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let baseline = vec![mean; actual.len()];
    assert!(mae(&actual, &predicted) < mae(&actual, &baseline));
}

#[test]
fn test_boosting_rejects_unknown_parameters() {
    let data = dataset(24);
    let p = params(&[("n_trees", ParamValue::Int(10))]);
    let err = EstimatorFamily::DepthWiseBoosting
        .fit(&data.x, &data.y, &p)
        .unwrap_err();
    assert!(matches!(err, ForecastError::InvalidParameter(_)));
}

#[test]
fn test_boosting_is_deterministic_per_seed() {
    let data = dataset(24);
    let p = params(&[
        ("n_estimators", ParamValue::Int(20)),
        ("subsample", ParamValue::Float(0.7)),
        ("colsample_bytree", ParamValue::Float(0.7)),
        ("random_state", ParamValue::Int(5)),
    ]);
    let family = EstimatorFamily::LeafWiseBoosting;
    let a = family.fit(&data.x, &data.y, &p).unwrap();
    let b = family.fit(&data.x, &data.y, &p).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_sarima_bundle_forecasts_next_month() {
    let data = dataset(36);
    let (train, test) = split_at(&data, 35 * 2);
    let model = EstimatorFamily::SeasonalArima
        .fit(&train.x, &train.y, &ParamSet::new())
        .unwrap();
    assert!(model.failures().is_empty());

    let predicted = model.predict(&test.x).unwrap();
    assert_eq!(predicted.len(), 2);
    for (p, a) in predicted.iter().zip(test.y.iter()) {
        assert!(p.is_finite());
        assert!((p - a).abs() / a < 0.25);
    }
}

#[test]
fn test_sarima_skips_short_entities() {
    let data = dataset(30);
    // Keep every Ankara row but only the last two Izmir rows
    let keep: Vec<usize> = (0..data.len())
        .filter(|&i| data.x.keys[i].entity == "Ankara" || i >= data.len() - 4)
        .collect();
    let short = data.select(&keep);
    let model = EstimatorFamily::SeasonalArima
        .fit(&short.x, &short.y, &params(&[("max_order", ParamValue::Int(0))]))
        .unwrap();

    let failures = model.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].entity, "Izmir");
}

#[test]
fn test_additive_bundle_predicts_each_entity() {
    let data = dataset(36);
    let (train, test) = split_at(&data, 34 * 2);
    let model = EstimatorFamily::AdditiveTrend
        .fit(&train.x, &train.y, &params(&[("seasonality_order", ParamValue::Int(4))]))
        .unwrap();

    let predicted = model.predict(&test.x).unwrap();
    assert_eq!(predicted.len(), 4);
    for (p, a) in predicted.iter().zip(test.y.iter()) {
        assert!((p - a).abs() / a < 0.25);
    }
}

#[test]
fn test_additive_rejects_high_seasonality_order() {
    let data = dataset(24);
    let p = params(&[("seasonality_order", ParamValue::Int(6))]);
    assert!(EstimatorFamily::AdditiveTrend.fit(&data.x, &data.y, &p).is_err());
}

#[rstest]
#[case(EstimatorFamily::DepthWiseBoosting)]
#[case(EstimatorFamily::SeasonalArima)]
fn test_json_store_round_trip(#[case] family: EstimatorFamily) {
    let dir = tempdir().unwrap();
    let store = JsonModelStore::new(dir.path());
    let data = dataset(30);
    let (train, test) = split_at(&data, 29 * 2);

    let p = if family.is_seeded() {
        params(&[("n_estimators", ParamValue::Int(10))])
    } else {
        params(&[("max_order", ParamValue::Int(0))])
    };
    let model = family.fit(&train.x, &train.y, &p).unwrap();
    let name = format!("{}_0", family.canonical_name());
    store.save(&model, &name).unwrap();
    assert!(dir.path().join(format!("{name}.json")).exists());

    let loaded = store.load(&name).unwrap();
    assert_eq!(loaded, model);
    assert_eq!(loaded.predict(&test.x).unwrap(), model.predict(&test.x).unwrap());
}

#[test]
fn test_store_missing_model() {
    let dir = tempdir().unwrap();
    let store = JsonModelStore::new(dir.path());
    assert!(matches!(store.load("absent"), Err(ForecastError::IoError(_))));
}
