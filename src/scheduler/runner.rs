use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tokio::sync::Semaphore;
use tracing::Instrument;

use super::asset::{AssetCatalog, JobDef, RunContext};
use super::state::{RunStateDb, RunStatus};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::observability::RunOutcome;
use crate::registry::Registry;
use crate::resources::Resources;

fn now_str() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// The control plane: resolves (asset, partition) pairs, orders them along
/// the DAG, bounds concurrency, enforces claims, deadlines and checks.
#[derive(Clone)]
pub struct Scheduler {
    pub catalog: Arc<AssetCatalog>,
    pub state: Arc<RunStateDb>,
    resources: Arc<Resources>,
    config: Arc<PipelineConfig>,
    registry: Arc<Registry>,
    jobs: Arc<Vec<JobDef>>,
    semaphore: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(
        catalog: Arc<AssetCatalog>,
        state: Arc<RunStateDb>,
        resources: Arc<Resources>,
        config: Arc<PipelineConfig>,
        registry: Arc<Registry>,
        jobs: Vec<JobDef>,
    ) -> Self {
        let permits = config.scheduler.max_concurrent.max(1);
        Self {
            catalog,
            state,
            resources,
            config,
            registry,
            jobs: Arc::new(jobs),
            semaphore: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn find_job(&self, name: &str) -> Option<JobDef> {
        self.jobs.iter().find(|j| j.name == name).cloned()
    }

    pub fn jobs(&self) -> &[JobDef] {
        &self.jobs
    }

    /// Materialize a job for the partition derived from `day`. Assets in
    /// the same dependency level run concurrently (bounded by the global
    /// permit pool); dependent levels serialize.
    pub async fn run_job(&self, job: &JobDef, day: NaiveDate) -> Result<(), PipelineError> {
        let levels = self.catalog.topo_levels(&job.assets)?;
        tracing::info!(
            "job {}: {} assets in {} levels for day {day}",
            job.name,
            job.assets.len(),
            levels.len()
        );
        for level in levels {
            let runs = level.into_iter().map(|name| {
                let scheduler = self.clone();
                async move { scheduler.run_asset(name, day).await }
            });
            futures_util::future::join_all(runs).await;
        }
        Ok(())
    }

    /// Materialize one asset for the partition derived from `day`. Within
    /// one partition a child only sees a committed parent; concurrent
    /// duplicate (asset, partition) attempts are blocked by the run claim.
    pub async fn run_asset(&self, name: &str, day: NaiveDate) {
        let Some(asset) = self.catalog.get(name) else {
            tracing::error!("unknown asset {name}");
            return;
        };

        let partition_key = asset.partitions.key_for(day);
        let today = Utc::now().date_naive();
        if !asset.partitions.is_valid(&partition_key, today) {
            tracing::error!(
                "{name}: partition {partition_key} is outside the valid set, refusing"
            );
            return;
        }

        // Parent gate: the dependency's bucket containing our day must have
        // a committed materialization (weekly parents of daily children
        // resolve to the containing week, and vice versa).
        for dep in &asset.deps {
            let Some(dep_asset) = self.catalog.get(dep) else { continue };
            let dep_key = dep_asset.partitions.key_for(day);
            match self.state.has_success(dep, &dep_key) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(
                        "{name} @ {partition_key}: upstream {dep} @ {dep_key} not materialized, skipping"
                    );
                    return;
                }
                Err(e) => {
                    tracing::error!("{name}: state lookup failed: {e}");
                    return;
                }
            }
        }

        if asset.serial {
            match self.state.has_active(name) {
                Ok(false) => {}
                Ok(true) => {
                    tracing::info!("{name}: serial asset already running, skipping");
                    return;
                }
                Err(e) => {
                    tracing::error!("{name}: state lookup failed: {e}");
                    return;
                }
            }
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        match self.state.try_claim(name, &partition_key, &run_id, &now_str()) {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(
                    "{name} @ {partition_key}: another run holds the claim, skipping"
                );
                return;
            }
            Err(e) => {
                tracing::error!("{name}: claim failed: {e}");
                return;
            }
        }

        let Ok(_permit) = self.semaphore.acquire().await else {
            return;
        };

        let ctx = RunContext {
            run_id: run_id.clone(),
            day,
            partition_key: partition_key.clone(),
            resources: self.resources.clone(),
            config: self.config.clone(),
            registry: self.registry.clone(),
        };
        let deadline = Duration::from_secs(self.config.scheduler.asset_deadline_secs);
        let span = tracing::info_span!(
            "materialize",
            run_id = %run_id,
            asset = name,
            partition = %partition_key
        );

        let result = tokio::time::timeout(deadline, (asset.producer)(ctx))
            .instrument(span)
            .await;

        let ended = now_str();
        let finish = match result {
            // Deadline expiry drops the producer future at its next
            // suspension point; held transactions roll back on drop.
            Err(_) => {
                tracing::warn!("{name} @ {partition_key}: deadline exceeded, cancelled");
                self.state.finish_run(
                    &run_id,
                    RunStatus::Cancelled,
                    false,
                    &ended,
                    None,
                    Some("materialization deadline exceeded"),
                    Some("cancelled"),
                )
            }
            Ok(Err(PipelineError::Cancelled)) => {
                tracing::warn!("{name} @ {partition_key}: cancelled");
                self.state.finish_run(
                    &run_id,
                    RunStatus::Cancelled,
                    false,
                    &ended,
                    None,
                    Some("cancelled"),
                    Some("cancelled"),
                )
            }
            Ok(Err(e)) => {
                tracing::error!("{name} @ {partition_key}: {e}");
                self.state.finish_run(
                    &run_id,
                    RunStatus::Failed,
                    false,
                    &ended,
                    None,
                    Some(&e.to_string()),
                    Some(e.class()),
                )
            }
            Ok(Ok(mut report)) => {
                report.finish();

                let mut degraded = false;
                for check in &asset.checks {
                    if let Err(message) = (check.check)(&report) {
                        degraded = true;
                        report.warnings.push(format!("{}: {message}", check.name));
                        tracing::warn!(
                            "{name} @ {partition_key}: check {} failed: {message}",
                            check.name
                        );
                    }
                }

                let status = match report.outcome() {
                    RunOutcome::Success => RunStatus::Success,
                    RunOutcome::PartialSuccess => RunStatus::PartialSuccess,
                    RunOutcome::Failed => RunStatus::Failed,
                };
                tracing::info!(
                    "{name} @ {partition_key}: {} ({} records, {} rows, {} bytes)",
                    status.as_str(),
                    report.records_count,
                    report.rows_loaded,
                    report.bytes_written
                );
                let metrics = serde_json::to_string(&report).ok();
                self.state.finish_run(
                    &run_id,
                    status,
                    degraded,
                    &ended,
                    metrics.as_deref(),
                    None,
                    None,
                )
            }
        };
        if let Err(e) = finish {
            tracing::error!("{name}: failed to persist run record: {e}");
        }
    }
}
