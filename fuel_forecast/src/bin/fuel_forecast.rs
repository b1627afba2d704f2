//! Fuel Forecast CLI
//!
//! Runs the forecasting pipeline described by a JSON config and prints the
//! estimator ranking.

use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;

use fuel_forecast::config::PipelineConfig;
use fuel_forecast::pipeline::ForecastPipeline;
use fuel_forecast::sources::{
    CsvDataSource, JsonModelStore, NationalHolidayCalendar, PopulationTable,
};
use fuel_forecast::utils::parse_month;

#[derive(Parser)]
#[command(name = "fuel_forecast")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Monthly fuel consumption forecasting by province", long_about = None)]
struct Cli {
    /// Pipeline config (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// First month to fetch (YYYY-MM-DD); overrides the config
    #[arg(long)]
    start: Option<String>,

    /// Last month to fetch (YYYY-MM-DD); overrides the config
    #[arg(long)]
    end: Option<String>,

    /// Write every defined test-row score to this CSV
    #[arg(long)]
    scores: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fuel_forecast=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::from_json_file(&cli.config)
        .with_context(|| format!("Cannot load config {}", cli.config.display()))?;

    let start = resolve_month(cli.start.as_deref(), config.sources.start, "start")?;
    let end = resolve_month(cli.end.as_deref(), config.sources.end, "end")?;

    let source = CsvDataSource::new(
        &config.sources.raw_data,
        &config.date_column,
        &config.entity_column,
        &config.target_column,
    )
    .with_date_format(&config.preprocess.date_format);
    let calendar =
        NationalHolidayCalendar::new().with_extra_dates(config.sources.extra_holidays.iter().copied());
    let population = match &config.sources.population {
        Some(path) => Some(
            PopulationTable::from_csv(path, &config.entity_column)
                .with_context(|| format!("Cannot load population {}", path.display()))?,
        ),
        None => None,
    };
    let store = config
        .persistence
        .as_ref()
        .map(|p| JsonModelStore::new(&p.model_dir));

    let mut pipeline = ForecastPipeline::new(config.clone(), &source, &calendar);
    if let Some(population) = &population {
        pipeline = pipeline.with_demographics(population);
    }
    if let Some(store) = &store {
        pipeline = pipeline.with_store(store);
    }

    let started = Instant::now();
    let report = pipeline.run(start, end)?;

    println!(
        "Test month {} ({} train rows, {} test rows) in {:?}",
        report.cutoff,
        report.train_rows,
        report.test_rows,
        started.elapsed()
    );
    println!();
    println!("{:<16} {:>4} {:>12} {:>8} {:>10}", "estimator", "run", "score", "scored", "undefined");
    for summary in &report.ranking {
        println!(
            "{:<16} {:>4} {:>12.6} {:>8} {:>10}",
            summary.estimator,
            summary.run_id,
            summary.mean_score,
            summary.scored_rows,
            summary.undefined_rows
        );
    }
    for failure in &report.estimator_failures {
        println!("{} run {} failed: {}", failure.estimator, failure.run_id, failure.reason);
    }
    for failure in &report.entity_failures {
        println!(
            "{} run {} skipped {}: {}",
            failure.estimator, failure.run_id, failure.failure.entity, failure.failure.reason
        );
    }

    if let Some(path) = &cli.scores {
        report
            .scoreboard
            .write_csv(path)
            .with_context(|| format!("Cannot write scores {}", path.display()))?;
        println!("Scores written to {}", path.display());
    }

    Ok(())
}

fn resolve_month(
    arg: Option<&str>,
    configured: Option<NaiveDate>,
    name: &str,
) -> anyhow::Result<NaiveDate> {
    match (arg, configured) {
        (Some(value), _) => Ok(parse_month(value, "%Y-%m-%d")?),
        (None, Some(date)) => Ok(date),
        (None, None) => anyhow::bail!("No {name} month given on the command line or in the config"),
    }
}
