use chrono::NaiveDate;
use fuel_forecast::config::{Scoring, SearchConfig, SearchStrategy};
use fuel_forecast::data::{Dataset, FeatureRow, FeatureTable};
use fuel_forecast::models::{EstimatorFamily, ParamGrid, ParamValue};
use fuel_forecast::search::{candidate_count, candidates, FamilySpec, HyperparameterSearch, TimeSeriesSplit};
use fuel_forecast::utils::shift_months;
use fuel_forecast::ForecastError;
use pretty_assertions::assert_eq;
use rstest::rstest;

fn dataset(months: usize) -> Dataset {
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    let mut rows = Vec::new();
    for t in 0..months {
        for (e, entity) in ["Ankara", "Izmir"].iter().enumerate() {
            let scale = 500.0 * (e + 1) as f64;
            rows.push(FeatureRow {
                date: shift_months(start, t as i32).unwrap(),
                entity: entity.to_string(),
                target: scale + 10.0 * t as f64 + (t % 12) as f64,
                values: vec![t as f64, (t % 12) as f64, scale],
            });
        }
    }
    let table = FeatureTable::new(
        vec!["t".to_string(), "month".to_string(), "scale".to_string()],
        rows,
    );
    table.to_dataset(&table.rows).unwrap()
}

fn grid(entries: &[(&str, Vec<ParamValue>)]) -> ParamGrid {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn boosting_spec(grid: ParamGrid) -> FamilySpec {
    let mut spec = FamilySpec::new(EstimatorFamily::DepthWiseBoosting);
    spec.init_params.insert("n_estimators".to_string(), ParamValue::Int(20));
    spec.grid = grid;
    spec
}

#[test]
fn test_candidate_count_is_reported_before_folds() {
    let spec = boosting_spec(grid(&[
        ("max_depth", vec![ParamValue::Int(2), ParamValue::Int(3)]),
        ("learning_rate", vec![ParamValue::Float(0.05), ParamValue::Float(0.1), ParamValue::Float(0.2)]),
    ]));
    let search = HyperparameterSearch::new(SearchConfig::default()).unwrap();

    let plans = search.plan(&[spec.clone()]).unwrap();
    assert_eq!(plans[0].candidate_count, 6);
    assert_eq!(plans[0].family, "gbt_depthwise");

    let report = search.run(&dataset(24), &[spec]).unwrap();
    assert_eq!(report.plans, plans);
    let family = report.family("gbt_depthwise").unwrap();
    assert_eq!(family.candidate_count, 6);
    assert_eq!(family.evaluated.len() + family.failures.len(), 6);
}

#[test]
fn test_empty_list_is_fatal() {
    let spec = boosting_spec(grid(&[("max_depth", vec![])]));
    let search = HyperparameterSearch::new(SearchConfig::default()).unwrap();
    match search.run(&dataset(24), &[spec]) {
        Err(ForecastError::EmptyGrid { family }) => assert_eq!(family, "gbt_depthwise"),
        other => panic!("Expected EmptyGrid, got {other:?}"),
    }
}

#[test]
fn test_empty_grid_map_is_one_candidate() {
    assert_eq!(candidate_count(&ParamGrid::new()), 1);
    let all = candidates(&ParamGrid::new(), &SearchStrategy::Grid);
    assert_eq!(all.len(), 1);
    assert!(all[0].is_empty());
}

#[test]
fn test_best_candidate_has_highest_mean_score() {
    let spec = boosting_spec(grid(&[("max_depth", vec![ParamValue::Int(1), ParamValue::Int(3)])]));
    let search = HyperparameterSearch::new(SearchConfig {
        n_splits: 3,
        scoring: Scoring::NegMeanAbsoluteError,
        ..Default::default()
    })
    .unwrap();
    let report = search.run(&dataset(24), &[spec]).unwrap();
    let family = report.family("gbt_depthwise").unwrap();

    let best = family.best.as_ref().unwrap();
    assert_eq!(best.fold_scores.len(), 3);
    assert!(family
        .evaluated
        .iter()
        .all(|c| c.mean_score <= best.mean_score));
    assert!(best.mean_score <= 0.0);
    // init_params survive the merge with the grid point
    assert_eq!(best.params["n_estimators"], ParamValue::Int(20));
}

#[test]
fn test_failed_candidates_do_not_abort_siblings() {
    let spec = boosting_spec(grid(&[("learning_rate", vec![ParamValue::Float(0.1), ParamValue::Float(-1.0)])]));
    let search = HyperparameterSearch::new(SearchConfig::default()).unwrap();
    let report = search.run(&dataset(24), &[spec]).unwrap();
    let family = report.family("gbt_depthwise").unwrap();

    assert_eq!(family.evaluated.len(), 1);
    assert_eq!(family.failures.len(), 1);
    assert_eq!(family.failures[0].params["learning_rate"], ParamValue::Float(-1.0));
    assert_eq!(
        report.best_params("gbt_depthwise").unwrap()["learning_rate"],
        ParamValue::Float(0.1)
    );
}

#[test]
fn test_every_candidate_failing_still_reports() {
    let spec = boosting_spec(grid(&[("no_such_param", vec![ParamValue::Int(1)])]));
    let search = HyperparameterSearch::new(SearchConfig::default()).unwrap();
    let report = search.run(&dataset(24), &[spec]).unwrap();
    let family = report.family("gbt_depthwise").unwrap();
    assert!(family.best.is_none());
    assert_eq!(family.failures.len(), 1);
}

#[rstest]
#[case(5, 2, 0, 30)]
#[case(3, 4, 2, 20)]
#[case(2, 1, 1, 5)]
fn test_folds_increase_without_overlap(
    #[case] n_splits: usize,
    #[case] test_size: usize,
    #[case] gap: usize,
    #[case] n: usize,
) {
    let folds = TimeSeriesSplit::new(n_splits, test_size, gap).unwrap().split(n).unwrap();
    assert_eq!(folds.len(), n_splits);
    for fold in &folds {
        assert_eq!(fold.train.start, 0);
        assert_eq!(fold.train.end + gap, fold.test.start);
        assert_eq!(fold.test.len(), test_size);
    }
    for pair in folds.windows(2) {
        assert_eq!(pair[0].test.end, pair[1].test.start);
        assert!(pair[0].train.end < pair[1].train.end);
    }
    assert_eq!(folds.last().unwrap().test.end, n);
}

#[test]
fn test_random_strategy_is_seeded_subset() {
    let g = grid(&[
        ("max_depth", vec![ParamValue::Int(1), ParamValue::Int(2), ParamValue::Int(3), ParamValue::Int(4)]),
        ("learning_rate", vec![ParamValue::Float(0.05), ParamValue::Float(0.1), ParamValue::Float(0.2)]),
    ]);
    let strategy = SearchStrategy::Random { n_iter: 5, seed: 42 };
    let drawn = candidates(&g, &strategy);
    assert_eq!(drawn.len(), 5);
    assert_eq!(drawn, candidates(&g, &strategy));

    let all = candidates(&g, &SearchStrategy::Grid);
    assert!(drawn.iter().all(|c| all.contains(c)));
    let many = SearchStrategy::Random { n_iter: 50, seed: 42 };
    assert_eq!(candidates(&g, &many).len(), 12);
}
