use chrono::Duration;

use crate::scheduler::{RunRequest, SensorContext, SensorDef, SensorResult};

/// The daily bronze assets whose absence for yesterday triggers a run.
const WATCHED_DAILY: &[&str] = &["bronze_piezo", "bronze_hydro", "bronze_temperature"];

const FAILURE_CURSOR: &str = "failure_recovery_cursor";

pub fn all() -> Vec<SensorDef> {
    vec![
        SensorDef { name: "hubeau_freshness_sensor", eval: freshness },
        SensorDef { name: "failure_recovery_sensor", eval: failure_recovery },
    ]
}

/// Request yesterday's daily job when any watched bronze asset has no
/// committed materialization for it yet.
fn freshness(ctx: &SensorContext) -> anyhow::Result<SensorResult> {
    let yesterday = ctx.today - Duration::days(1);
    let key = yesterday.format("%Y-%m-%d").to_string();

    for asset in WATCHED_DAILY {
        if !ctx.state.has_success(asset, &key)? {
            return Ok(SensorResult::Run(RunRequest {
                job: "daily_ingestion",
                day: yesterday,
                tags: vec![("trigger", "freshness_sensor".to_string())],
            }));
        }
    }
    Ok(SensorResult::Skip(format!("partitions for {key} are materialized")))
}

/// Walk newly-failed runs (cursor persisted across evaluations) and
/// re-request the owning job for the failed partition's day.
fn failure_recovery(ctx: &SensorContext) -> anyhow::Result<SensorResult> {
    let cursor = ctx.state.get_cursor(FAILURE_CURSOR)?.unwrap_or_default();
    let failures = ctx.state.failures_after(&cursor, 10)?;
    let Some(last) = failures.last() else {
        return Ok(SensorResult::Skip("no new failures".to_string()));
    };
    ctx.state.set_cursor(FAILURE_CURSOR, &last.started_at)?;

    for failure in &failures {
        let Some(asset) = ctx.catalog.get(&failure.asset) else { continue };
        let Some(day) = asset.partitions.parse_key(&failure.partition_key) else {
            continue;
        };
        let job = match asset.partitions.cadence {
            crate::scheduler::Cadence::Daily => "daily_ingestion",
            _ => "weekly_external",
        };
        return Ok(SensorResult::Run(RunRequest {
            job,
            day,
            tags: vec![
                ("trigger", "failure_recovery_sensor".to_string()),
                ("recovers", failure.run_id.clone()),
            ],
        }));
    }
    Ok(SensorResult::Skip("failed runs have no recoverable partition".to_string()))
}
