use chrono::NaiveDate;
use sqlx::PgPool;

use super::{day_window, dedup_by_key};
use crate::error::PipelineError;
use crate::models::QualityRecord;

/// Load quality analyses for one partition into `measure_quality`.
/// Same protocol as the measure loader, keyed on
/// `(station_code, param_code, ts)`.
pub async fn load_quality(
    pool: &PgPool,
    records: Vec<QualityRecord>,
    source: &str,
    day: NaiveDate,
    batch_size: usize,
) -> Result<u64, PipelineError> {
    if records.is_empty() {
        return Ok(0);
    }

    let rows = dedup_by_key(records, |q| {
        (q.station_code.clone(), q.param_code.clone(), q.ts)
    });
    let (start, end) = day_window(day);

    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM measure_quality WHERE source = $1 AND ts >= $2 AND ts < $3")
        .bind(source)
        .bind(start)
        .bind(end)
        .execute(&mut *tx)
        .await?;

    for chunk in rows.chunks(batch_size) {
        let mut qb = sqlx::QueryBuilder::<sqlx::Postgres>::new(
            "INSERT INTO measure_quality (station_code, param_code, ts, value, unit, quality, source) ",
        );
        qb.push_values(chunk, |mut b, q| {
            b.push_bind(&q.station_code)
                .push_bind(&q.param_code)
                .push_bind(q.ts)
                .push_bind(q.value)
                .push_bind(&q.unit)
                .push_bind(&q.quality)
                .push_bind(&q.source);
        });
        qb.push(
            " ON CONFLICT (station_code, param_code, ts) DO UPDATE SET \
             value = EXCLUDED.value, unit = EXCLUDED.unit, \
             quality = EXCLUDED.quality, source = EXCLUDED.source",
        );
        qb.build().execute(&mut *tx).await?;
    }

    tx.commit().await?;

    let loaded = rows.len() as u64;
    tracing::info!("measure_quality: {loaded} rows loaded for {source} @ {day}");
    Ok(loaded)
}
