use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;

use super::asset::AssetCatalog;
use super::runner::Scheduler;
use super::state::RunStateDb;

/// A sensor asks for a run (with a partition day and tags) or explains why
/// it is skipping. Stateless from the scheduler's perspective; cursors are
/// persisted through the run-state repository.
pub struct RunRequest {
    pub job: &'static str,
    pub day: NaiveDate,
    pub tags: Vec<(&'static str, String)>,
}

pub enum SensorResult {
    Run(RunRequest),
    Skip(String),
}

pub struct SensorContext {
    pub state: Arc<RunStateDb>,
    pub catalog: Arc<AssetCatalog>,
    pub today: NaiveDate,
}

pub struct SensorDef {
    pub name: &'static str,
    pub eval: fn(&SensorContext) -> anyhow::Result<SensorResult>,
}

/// Evaluate every sensor on a fixed cadence, forever.
pub fn spawn_sensors(scheduler: Scheduler, sensors: Vec<SensorDef>, interval_secs: u64) {
    for sensor in sensors {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                let ctx = SensorContext {
                    state: scheduler.state.clone(),
                    catalog: scheduler.catalog.clone(),
                    today: chrono::Utc::now().date_naive(),
                };
                match (sensor.eval)(&ctx) {
                    Ok(SensorResult::Run(request)) => {
                        tracing::info!(
                            "sensor {}: requesting {} for {} ({:?})",
                            sensor.name,
                            request.job,
                            request.day,
                            request.tags
                        );
                        let Some(job) = scheduler.find_job(request.job) else {
                            tracing::error!(
                                "sensor {}: unknown job {}",
                                sensor.name,
                                request.job
                            );
                            continue;
                        };
                        if let Err(e) = scheduler.run_job(&job, request.day).await {
                            tracing::error!("sensor {}: run failed: {e}", sensor.name);
                        }
                    }
                    Ok(SensorResult::Skip(reason)) => {
                        tracing::debug!("sensor {}: skip ({reason})", sensor.name);
                    }
                    Err(e) => {
                        tracing::error!("sensor {}: evaluation failed: {e}", sensor.name);
                    }
                }
            }
        });
    }
}
