use approx::assert_relative_eq;
use chrono::NaiveDate;
use fuel_forecast::completion::{is_complete, PanelCompleter};
use fuel_forecast::data::{Panel, PanelRow};
use fuel_forecast::ForecastError;
use pretty_assertions::assert_eq;
use rstest::rstest;

fn month(y: i32, m: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, 1).unwrap()
}

// Two provinces over Jan-Jun 2023 with a few holes in "Ankara"
fn gappy_panel() -> Panel {
    let mut rows = Vec::new();
    for m in 1..=6 {
        rows.push(PanelRow::new(month(2023, m), "Izmir", Some(100.0 + m as f64)));
    }
    rows.push(PanelRow::new(month(2023, 1), "Ankara", Some(10.0)));
    rows.push(PanelRow::new(month(2023, 2), "Ankara", Some(20.0)));
    rows.push(PanelRow::new(month(2023, 4), "Ankara", Some(40.0)));
    rows.push(PanelRow::new(month(2023, 6), "Ankara", Some(60.0)));
    Panel::new(rows)
}

#[test]
fn test_symmetric_window_mean() {
    let panel = Panel::new(vec![
        PanelRow::new(month(2023, 3), "A", Some(10.0)),
        PanelRow::new(month(2023, 4), "A", Some(20.0)),
        PanelRow::new(month(2023, 6), "A", Some(40.0)),
        PanelRow::new(month(2023, 7), "A", Some(50.0)),
    ]);
    let completed = PanelCompleter::new(3).unwrap().complete(&panel).unwrap();

    let may = completed.get(month(2023, 5), "A").unwrap();
    assert_relative_eq!(may.target.unwrap(), (10.0 + 20.0 + 40.0 + 50.0) / 4.0);
}

#[test]
fn test_grid_has_every_month_and_entity() {
    let completed = PanelCompleter::new(3).unwrap().complete(&gappy_panel()).unwrap();

    assert_eq!(completed.len(), 6 * 2);
    assert_eq!(completed.missing_count(), 0);
    assert!(is_complete(&completed));
    // Mar: only the (Feb, Apr) pair is present
    assert_eq!(completed.get(month(2023, 3), "Ankara").unwrap().target, Some(30.0));
}

#[test]
fn test_imputed_values_feed_later_cells() {
    // Feb falls back to Jan; Mar then pairs the imputed Feb with Apr
    let panel = Panel::new(vec![
        PanelRow::new(month(2023, 1), "A", Some(10.0)),
        PanelRow::new(month(2023, 4), "A", Some(40.0)),
    ]);
    let completed = PanelCompleter::new(1).unwrap().complete(&panel).unwrap();
    assert_eq!(completed.get(month(2023, 2), "A").unwrap().target, Some(10.0));
    assert_relative_eq!(completed.get(month(2023, 3), "A").unwrap().target.unwrap(), 25.0);
}

#[test]
fn test_completion_is_idempotent() {
    let completer = PanelCompleter::new(3).unwrap();
    let once = completer.complete(&gappy_panel()).unwrap();
    let twice = completer.complete(&once).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn test_complete_panel_comes_back_in_canonical_order() {
    let completer = PanelCompleter::new(3).unwrap();
    let complete = completer.complete(&gappy_panel()).unwrap();
    // Entity-major and with months reversed
    let mut rows = complete.rows().to_vec();
    rows.sort_by(|a, b| a.entity.cmp(&b.entity).then_with(|| b.date.cmp(&a.date)));
    let shuffled = Panel::new(rows);
    assert_ne!(shuffled, complete);

    let completed = completer.complete(&shuffled).unwrap();
    assert_eq!(completed, shuffled.clone().sorted());
    assert_eq!(completed, complete);
}

#[test]
fn test_previous_month_fallback_and_gap() {
    let completer = PanelCompleter::new(2).unwrap();

    // B misses March with no later neighbour: fall back to February
    let panel = Panel::new(vec![
        PanelRow::new(month(2022, 1), "A", Some(1.0)),
        PanelRow::new(month(2022, 2), "A", Some(2.0)),
        PanelRow::new(month(2022, 3), "A", Some(3.0)),
        PanelRow::new(month(2022, 1), "B", Some(7.0)),
        PanelRow::new(month(2022, 2), "B", Some(8.0)),
    ]);
    let completed = completer.complete(&panel).unwrap();
    assert_eq!(completed.get(month(2022, 3), "B").unwrap().target, Some(8.0));

    // B misses January and there is no earlier month
    let panel = Panel::new(vec![
        PanelRow::new(month(2022, 1), "A", Some(1.0)),
        PanelRow::new(month(2022, 2), "A", Some(2.0)),
        PanelRow::new(month(2022, 2), "B", Some(8.0)),
    ]);
    match completer.complete(&panel) {
        Err(ForecastError::DataGap { entity, date }) => {
            assert_eq!(entity, "B");
            assert_eq!(date, month(2022, 1));
        }
        other => panic!("Expected DataGap, got {other:?}"),
    }
}

#[rstest]
#[case(1)]
#[case(3)]
#[case(6)]
fn test_row_count_for_any_window(#[case] months: usize) {
    let completed = PanelCompleter::new(months)
        .unwrap()
        .complete(&gappy_panel())
        .unwrap();
    assert_eq!(completed.len(), 12);
    assert!(is_complete(&completed));
}

#[test]
fn test_empty_panel() {
    let completed = PanelCompleter::new(3).unwrap().complete(&Panel::default()).unwrap();
    assert!(completed.is_empty());
}
