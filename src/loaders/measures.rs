use chrono::NaiveDate;
use sqlx::PgPool;

use super::{day_window, dedup_by_key};
use crate::error::PipelineError;
use crate::models::MeasureRecord;

/// Load normalized measures for one partition. Rows previously written by
/// this source inside the partition day are deleted first, so the asset is
/// fully re-runnable; rows outside the window (temporal lookback) are
/// upserted on the primary key. One transaction per bronze object.
pub async fn load_measures(
    pool: &PgPool,
    records: Vec<MeasureRecord>,
    source: &str,
    day: NaiveDate,
    batch_size: usize,
) -> Result<u64, PipelineError> {
    if records.is_empty() {
        return Ok(0);
    }

    let rows = dedup_by_key(records, |m| {
        (m.station_code.clone(), m.theme.clone(), m.ts)
    });
    let (start, end) = day_window(day);

    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM measure WHERE source = $1 AND ts >= $2 AND ts < $3")
        .bind(source)
        .bind(start)
        .bind(end)
        .execute(&mut *tx)
        .await?;

    for chunk in rows.chunks(batch_size) {
        let mut qb = sqlx::QueryBuilder::<sqlx::Postgres>::new(
            "INSERT INTO measure (station_code, theme, ts, value, quality, source) ",
        );
        qb.push_values(chunk, |mut b, m| {
            b.push_bind(&m.station_code)
                .push_bind(&m.theme)
                .push_bind(m.ts)
                .push_bind(m.value)
                .push_bind(&m.quality)
                .push_bind(&m.source);
        });
        qb.push(
            " ON CONFLICT (station_code, theme, ts) DO UPDATE SET \
             value = EXCLUDED.value, quality = EXCLUDED.quality, source = EXCLUDED.source",
        );
        qb.build().execute(&mut *tx).await?;
    }

    tx.commit().await?;

    let loaded = rows.len() as u64;
    tracing::info!("measure: {loaded} rows loaded for {source} @ {day}");
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(station: &str, hour: u32, value: f64) -> MeasureRecord {
        MeasureRecord {
            station_code: station.to_string(),
            theme: "piezo".to_string(),
            ts: Utc.with_ymd_and_hms(2024, 10, 2, hour, 0, 0).unwrap(),
            value: Some(value),
            quality: None,
            source: "hubeau_piezo".to_string(),
        }
    }

    #[test]
    fn batch_dedup_guards_the_bulk_upsert() {
        // Same (station, theme, ts) twice: only the first survives, so a
        // single INSERT ... ON CONFLICT statement never sees the key twice.
        let records = vec![record("A", 6, 1.0), record("A", 6, 2.0), record("A", 7, 3.0)];
        let rows = dedup_by_key(records, |m| {
            (m.station_code.clone(), m.theme.clone(), m.ts)
        });
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value, Some(1.0));
    }
}
