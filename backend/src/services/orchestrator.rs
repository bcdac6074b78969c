//! Run orchestration
//!
//! A run has two passes separated by [`CollectedRun`]. Pass 1 collects,
//! reconciles and imputes every town concurrently. Pass 2 gates, scores and
//! persists every registry town, using the pass-1 tables of neighbors for
//! spatial fallback.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use shared::DateRange;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{DailyTable, PredictionRecord, Town, HORIZON_DAYS, LOOKBACK_DAYS};
use crate::services::collector::SourceCollector;
use crate::services::context::PipelineContext;
use crate::services::imputation::impute;
use crate::services::persistence::{MirrorFailure, PredictionMirror, PredictionStore};
use crate::services::reconciler::{reconcile, Reconciled};
use crate::services::window::model_input;

/// Per-town progress through a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Collecting,
    Reconciling,
    Gating,
    Scoring,
    Persisting,
    Done,
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunStage::Collecting => "COLLECTING",
            RunStage::Reconciling => "RECONCILING",
            RunStage::Gating => "GATING",
            RunStage::Scoring => "SCORING",
            RunStage::Persisting => "PERSISTING",
            RunStage::Done => "DONE",
        };
        write!(f, "{}", name)
    }
}

fn enter_stage(run_id: Uuid, town: Town, stage: RunStage) {
    tracing::info!(run_id = %run_id, town = %town, stage = %stage, "Stage transition");
}

/// Dates derived from the run timestamp
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunSchedule {
    pub run_id: Uuid,
    pub run_ts: DateTime<FixedOffset>,
    /// First forecast day: the run date in the configured timezone
    pub forecast_start: NaiveDate,
    /// Collection ends yesterday and covers `LOOKBACK_DAYS + 1` days
    pub collection: DateRange,
}

impl RunSchedule {
    pub fn at(run_ts: DateTime<FixedOffset>) -> Self {
        let forecast_start = run_ts.date_naive();
        let end = forecast_start - Duration::days(1);
        Self {
            run_id: Uuid::new_v4(),
            run_ts,
            forecast_start,
            collection: DateRange::ending_at(end, LOOKBACK_DAYS + 1),
        }
    }

    pub fn forecast_end(&self) -> NaiveDate {
        self.forecast_start + Duration::days(HORIZON_DAYS)
    }
}

/// Pass-1 output: one imputed table per town, empty when no source had rows
#[derive(Debug, Clone)]
pub struct CollectedRun {
    pub schedule: RunSchedule,
    tables: BTreeMap<Town, DailyTable>,
}

impl CollectedRun {
    pub fn new(schedule: RunSchedule, tables: BTreeMap<Town, DailyTable>) -> Self {
        Self { schedule, tables }
    }

    pub fn table(&self, town: Town) -> Option<&DailyTable> {
        self.tables.get(&town)
    }

    /// Towns with at least one in-range thermal or atmospheric observation
    pub fn usable_towns(&self) -> usize {
        self.tables.values().filter(|t| !t.is_empty()).count()
    }
}

/// Summary of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub run_ts: DateTime<FixedOffset>,
    pub forecast_start: NaiveDate,
    pub forecast_end: NaiveDate,
    pub threshold: f64,
    pub predictions: Vec<PredictionRecord>,
    pub mirror_failures: Vec<MirrorFailure>,
    pub duration_ms: u64,
}

/// Drives one prediction run across every registry town
#[derive(Clone)]
pub struct RunOrchestrator {
    context: Arc<PipelineContext>,
    collector: SourceCollector,
    predictions: Arc<dyn PredictionStore>,
    mirror: Option<PredictionMirror>,
}

impl RunOrchestrator {
    pub fn new(
        context: Arc<PipelineContext>,
        collector: SourceCollector,
        predictions: Arc<dyn PredictionStore>,
        mirror: Option<PredictionMirror>,
    ) -> Self {
        Self {
            context,
            collector,
            predictions,
            mirror,
        }
    }

    /// Run with the current time in the configured timezone
    pub async fn run_now(&self) -> AppResult<RunReport> {
        let now = Utc::now().with_timezone(&self.context.timezone());
        self.run(now).await
    }

    pub async fn run(&self, run_ts: DateTime<FixedOffset>) -> AppResult<RunReport> {
        let started = Instant::now();
        let schedule = RunSchedule::at(run_ts);

        tracing::info!(
            run_id = %schedule.run_id,
            collection_start = %schedule.collection.start,
            collection_end = %schedule.collection.end,
            forecast_start = %schedule.forecast_start,
            "Starting prediction run"
        );

        let result = self.execute(schedule).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(mut report) => {
                report.duration_ms = duration_ms;
                tracing::info!(
                    run_id = %report.run_id,
                    success = true,
                    towns = report.predictions.len(),
                    alerts = report.predictions.iter().filter(|p| p.alert).count(),
                    mirror_failures = report.mirror_failures.len(),
                    duration_ms,
                    "Prediction run completed"
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!(
                    run_id = %schedule.run_id,
                    success = false,
                    towns = 0,
                    duration_ms,
                    code = e.code(),
                    error = %e,
                    "Prediction run failed"
                );
                Err(e)
            }
        }
    }

    async fn execute(&self, schedule: RunSchedule) -> AppResult<RunReport> {
        let collected = self.collect(schedule).await?;
        if collected.usable_towns() == 0 {
            return Err(AppError::NoUsableTowns);
        }

        let records = self.score(&collected)?;
        let mirror_failures = self.persist(&records).await?;

        Ok(RunReport {
            run_id: schedule.run_id,
            run_ts: schedule.run_ts,
            forecast_start: schedule.forecast_start,
            forecast_end: schedule.forecast_end(),
            threshold: self.context.threshold(),
            predictions: records,
            mirror_failures,
            duration_ms: 0,
        })
    }

    /// Pass 1: collect, reconcile and impute every town concurrently
    pub async fn collect(&self, schedule: RunSchedule) -> AppResult<CollectedRun> {
        let mut tasks = JoinSet::new();

        for region in self.context.registry().regions() {
            let collector = self.collector.clone();
            let region = region.clone();
            let range = schedule.collection;
            let run_id = schedule.run_id;

            tasks.spawn(async move {
                enter_stage(run_id, region.town, RunStage::Collecting);
                let outcomes = collector.collect_all(&region, &range).await;

                enter_stage(run_id, region.town, RunStage::Reconciling);
                let table = match reconcile(outcomes.iter().map(|(_, o)| o), &range) {
                    Reconciled::NoFeeds => {
                        tracing::warn!(town = %region.town, "No source produced rows");
                        DailyTable::new()
                    }
                    Reconciled::Table(table) if !table.has_daily_observations() => {
                        tracing::warn!(
                            town = %region.town,
                            "No thermal or atmospheric observation in range"
                        );
                        DailyTable::new()
                    }
                    Reconciled::Table(table) => impute(&table),
                };
                (region.town, table)
            });
        }

        let mut tables = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (town, table) = joined
                .map_err(|e| AppError::Internal(format!("Collection task failed: {}", e)))?;
            tables.insert(town, table);
        }

        Ok(CollectedRun::new(schedule, tables))
    }

    /// Pass 2: gate and score every registry town
    pub fn score(&self, collected: &CollectedRun) -> AppResult<Vec<PredictionRecord>> {
        let schedule = &collected.schedule;
        let empty = DailyTable::new();
        let registry = self.context.registry();
        let gate = self.context.gate();
        let classifier = self.context.classifier();

        let mut records = Vec::with_capacity(registry.len());
        for town in registry.towns() {
            enter_stage(schedule.run_id, town, RunStage::Gating);
            let own = collected.table(town).unwrap_or(&empty);
            let neighbors: Vec<&DailyTable> = registry
                .neighbors(town)
                .iter()
                .filter_map(|n| collected.table(*n))
                .collect();
            let gated = gate.select(own, &neighbors);

            let mut rng = match self.context.nudge_seed() {
                Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(town as u64)),
                None => StdRng::from_entropy(),
            };
            let window = self.context.window_builder().build(
                town,
                &gated,
                schedule.collection.end,
                gate.nudge_std,
                &mut rng,
            )?;

            enter_stage(schedule.run_id, town, RunStage::Scoring);
            let input = model_input(&window, self.context.scaler());
            let assessment = classifier.score(town, &input)?;

            tracing::info!(
                town = %town,
                probability = assessment.probability,
                alert = assessment.alert,
                severity = %assessment.severity,
                provenance = %window.provenance(),
                "Town scored"
            );

            records.push(PredictionRecord::new(
                schedule.run_id,
                town,
                schedule.run_ts,
                schedule.forecast_start,
                assessment.probability,
                classifier.threshold(),
                classifier.bands(),
                window.provenance(),
            ));
        }
        Ok(records)
    }

    /// Commit relational rows, then mirror documents best effort
    async fn persist(&self, records: &[PredictionRecord]) -> AppResult<Vec<MirrorFailure>> {
        for record in records {
            enter_stage(record.run_id, record.town, RunStage::Persisting);
        }
        self.predictions.insert_run(records).await?;

        let failures = match &self.mirror {
            Some(mirror) => mirror.publish_all(records).await,
            None => Vec::new(),
        };

        for record in records {
            enter_stage(record.run_id, record.town, RunStage::Done);
        }
        Ok(failures)
    }
}
