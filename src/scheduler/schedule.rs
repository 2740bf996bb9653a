use std::str::FromStr;

use chrono::{Duration, Utc};

use super::runner::Scheduler;

/// Spawn one ticking task per job schedule. Cron expressions are the usual
/// five fields, evaluated in the configured run timezone; the derived
/// partition day is yesterday in that zone.
pub fn spawn_schedules(scheduler: Scheduler, tz: chrono_tz::Tz) {
    for job in scheduler.jobs().to_vec() {
        // The cron crate wants a seconds field up front.
        let expr = format!("0 {}", job.cron);
        let schedule = match cron::Schedule::from_str(&expr) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("job {}: bad cron expression '{}': {e}", job.name, job.cron);
                continue;
            }
        };

        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            loop {
                let now = Utc::now().with_timezone(&tz);
                let Some(next) = schedule.after(&now).next() else {
                    tracing::warn!("job {}: schedule has no further fire times", job.name);
                    return;
                };
                let wait = (next - now).to_std().unwrap_or_default();
                tracing::info!("job {}: next fire at {next}", job.name);
                tokio::time::sleep(wait).await;

                let day = Utc::now().with_timezone(&tz).date_naive() - Duration::days(1);
                if let Err(e) = scheduler.run_job(&job, day).await {
                    tracing::error!("job {}: {e}", job.name);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn five_field_expressions_parse_with_seconds_prefix() {
        for expr in ["30 2 * * *", "0 3 * * 1", "0 4 1 * *"] {
            assert!(cron::Schedule::from_str(&format!("0 {expr}")).is_ok(), "{expr}");
        }
    }

    #[test]
    fn daily_schedule_fires_at_half_past_two_paris() {
        let schedule = cron::Schedule::from_str("0 30 2 * * *").unwrap();
        let tz: chrono_tz::Tz = "Europe/Paris".parse().unwrap();
        let now = tz.with_ymd_and_hms(2024, 10, 2, 0, 0, 0).unwrap();
        let next = schedule.after(&now).next().unwrap();
        assert_eq!(next.to_rfc3339(), "2024-10-02T02:30:00+02:00");
    }
}
