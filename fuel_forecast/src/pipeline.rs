//! End-to-end driver from raw records to a ranked scoreboard

use crate::completion::PanelCompleter;
use crate::config::PipelineConfig;
use crate::data::Dataset;
use crate::error::{ForecastError, Result};
use crate::features::FeatureDeriver;
use crate::metrics::{ScoreBoard, ScoreSummary};
use crate::models::{
    describe, EntityFailure, EstimatorFamily, Fittable, ParamSet, ParamValue, TrainedModel,
};
use crate::preprocess::Preprocessor;
use crate::search::{FamilySpec, HyperparameterSearch, SearchReport};
use crate::sources::{DemographicSource, HolidayCalendar, ModelStore, RawDataSource};
use crate::split::{SplitResult, TimeSplitter};
use crate::utils::thread_pool;
use chrono::NaiveDate;
use tracing::{debug, info, info_span, warn};

/// Entity-level failure of one fitted estimator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstimatorEntityFailure {
    pub estimator: String,
    pub run_id: usize,
    pub failure: EntityFailure,
}

/// An estimator that produced no model for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstimatorFailure {
    pub estimator: String,
    pub run_id: usize,
    pub reason: String,
}

/// Everything a pipeline run produced
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Mean score per (estimator, run), best first
    pub ranking: Vec<ScoreSummary>,
    pub search: Option<SearchReport>,
    pub entity_failures: Vec<EstimatorEntityFailure>,
    pub estimator_failures: Vec<EstimatorFailure>,
    pub scoreboard: ScoreBoard,
    /// Scores on the random hold-out when one was drawn; never used for ranking
    pub validation: Option<ScoreBoard>,
    pub cutoff: NaiveDate,
    pub train_rows: usize,
    pub test_rows: usize,
}

impl PipelineReport {
    /// Highest ranked (estimator, run)
    pub fn best(&self) -> Option<&ScoreSummary> {
        self.ranking.first()
    }
}

/// Wires the collaborators to the pipeline stages
pub struct ForecastPipeline<'a> {
    config: PipelineConfig,
    source: &'a dyn RawDataSource,
    calendar: &'a dyn HolidayCalendar,
    demographics: Option<&'a dyn DemographicSource>,
    store: Option<&'a dyn ModelStore>,
}

impl<'a> ForecastPipeline<'a> {
    pub fn new(
        config: PipelineConfig,
        source: &'a dyn RawDataSource,
        calendar: &'a dyn HolidayCalendar,
    ) -> Self {
        Self {
            config,
            source,
            calendar,
            demographics: None,
            store: None,
        }
    }

    pub fn with_demographics(mut self, demographics: &'a dyn DemographicSource) -> Self {
        self.demographics = Some(demographics);
        self
    }

    pub fn with_store(mut self, store: &'a dyn ModelStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Resolve configured estimators into family specs
    pub fn family_specs(&self) -> Result<Vec<FamilySpec>> {
        self.config
            .estimators
            .iter()
            .map(|estimator| {
                let family = EstimatorFamily::from_name(&estimator.family)?;
                Ok(FamilySpec {
                    name: family.canonical_name().to_string(),
                    family,
                    init_params: estimator.init_params.clone(),
                    grid: estimator.grid.clone(),
                })
            })
            .collect()
    }

    pub fn run(&self, start: NaiveDate, end: NaiveDate) -> Result<PipelineReport> {
        self.config.validate()?;
        if end < start {
            return Err(ForecastError::ValidationError(format!(
                "Malformed date range: {start} is after {end}"
            )));
        }
        let families = self.family_specs()?;
        let pool = thread_pool(self.config.n_jobs)?;
        pool.install(|| self.run_stages(start, end, &families))
    }

    fn run_stages(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        families: &[FamilySpec],
    ) -> Result<PipelineReport> {
        let sources = &self.config.sources;
        let records = self.source.fetch(
            start,
            end,
            sources.entity_filter.as_deref(),
            sources.row_limit,
        )?;
        info!(records = records.len(), %start, %end, "Fetched raw records");

        let panel = Preprocessor::new(self.config.preprocess.clone()).process(records);
        let panel = PanelCompleter::new(self.config.imputation.months)?.complete(&panel)?;

        let mut deriver = FeatureDeriver::new(self.config.features.clone(), self.calendar)?;
        if let Some(demographics) = self.demographics {
            deriver = deriver.with_demographics(demographics);
        }
        let table = deriver.derive(&panel)?;
        let split = TimeSplitter::new(self.config.split.clone())?.split(&table)?;

        let search = match &self.config.search {
            Some(config) => {
                let _span = info_span!("search").entered();
                // Folds need whole months, so the search sees the hold-out too
                Some(HyperparameterSearch::new(config.clone())?.run(&split.history, families)?)
            }
            None => None,
        };

        let mut scoreboard = ScoreBoard::new();
        let mut validation = split.validation.as_ref().map(|_| ScoreBoard::new());
        let mut entity_failures = Vec::new();
        let mut estimator_failures = Vec::new();
        for run_id in 0..self.config.runs {
            for spec in families {
                let params = run_params(spec, search.as_ref(), run_id);
                let _span = info_span!("estimator", family = %spec.name, run_id).entered();
                let outcome = self.fit_and_score(
                    spec,
                    &params,
                    &split,
                    run_id,
                    &mut scoreboard,
                    validation.as_mut(),
                );
                match outcome {
                    Ok(failures) => entity_failures.extend(failures.into_iter().map(|failure| {
                        EstimatorEntityFailure {
                            estimator: spec.name.clone(),
                            run_id,
                            failure,
                        }
                    })),
                    Err(e) => {
                        warn!(reason = %e, "Estimator produced no forecast");
                        estimator_failures.push(EstimatorFailure {
                            estimator: spec.name.clone(),
                            run_id,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        let ranking = scoreboard.summary();
        if let Some(best) = ranking.first() {
            info!(estimator = %best.estimator, run_id = best.run_id, score = best.mean_score, "Best estimator");
        }
        Ok(PipelineReport {
            ranking,
            search,
            entity_failures,
            estimator_failures,
            scoreboard,
            validation,
            cutoff: split.cutoff,
            train_rows: split.train.len(),
            test_rows: split.test.len(),
        })
    }

    fn fit_and_score(
        &self,
        spec: &FamilySpec,
        params: &ParamSet,
        split: &SplitResult,
        run_id: usize,
        scoreboard: &mut ScoreBoard,
        validation_board: Option<&mut ScoreBoard>,
    ) -> Result<Vec<EntityFailure>> {
        info!(params = %describe(params), "Fitting estimator");
        let train = &split.train;
        let model = spec.family.fit(&train.x, &train.y, params)?;
        let scored = record(scoreboard, run_id, &spec.name, &model, &split.test)?;
        info!(scored, test_rows = split.test.len(), "Scored test month");

        if let (Some(held_out), Some(board)) = (&split.validation, validation_board) {
            let scored = record(board, run_id, &spec.name, &model, held_out)?;
            debug!(scored, validation_rows = held_out.len(), "Scored hold-out");
        }

        if let Some(store) = self.store {
            store.save(&model, &format!("{}_{}", spec.name, run_id))?;
        }
        Ok(model.failures().to_vec())
    }
}

/// Predict `data` and append the scores; returns the number of defined rows
fn record(
    board: &mut ScoreBoard,
    run_id: usize,
    estimator: &str,
    model: &TrainedModel,
    data: &Dataset,
) -> Result<usize> {
    let predicted = model.predict(&data.x)?;
    board.record(
        run_id,
        estimator,
        &data.x.keys,
        &data.y.to_vec(),
        &predicted.to_vec(),
    )
}

/// Best searched parameters (or `init_params`), seeded by the run id
fn run_params(spec: &FamilySpec, search: Option<&SearchReport>, run_id: usize) -> ParamSet {
    let mut params = search
        .and_then(|report| report.best_params(&spec.name))
        .cloned()
        .unwrap_or_else(|| spec.init_params.clone());
    if spec.family.is_seeded() {
        params
            .entry("random_state".to_string())
            .or_insert(ParamValue::Int(run_id as i64));
    }
    params
}
