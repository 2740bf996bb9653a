use std::collections::HashMap;

use chrono::NaiveDate;
use sqlx::{PgPool, Row};

use super::{day_window, dedup_by_key};
use crate::error::PipelineError;
use crate::models::MeteoRecord;

/// Load meteo grid observations: cells are upserted into the `meteo_grid`
/// reference table keyed on (lon, lat); series rows reference `grid_id`
/// and follow the partition-scoped delete-then-insert protocol.
pub async fn load_meteo(
    pool: &PgPool,
    records: Vec<MeteoRecord>,
    source: &str,
    day: NaiveDate,
    batch_size: usize,
) -> Result<u64, PipelineError> {
    if records.is_empty() {
        return Ok(0);
    }

    let rows = dedup_by_key(records, |m| (m.lon.to_bits(), m.lat.to_bits(), m.ts));
    let (start, end) = day_window(day);

    let mut tx = pool.begin().await?;

    // 1) Upsert the grid cells this batch references.
    let mut cells: Vec<(f64, f64)> = rows.iter().map(|m| m.cell()).collect();
    cells = dedup_by_key(cells, |(lon, lat)| (lon.to_bits(), lat.to_bits()));
    for (lon, lat) in &cells {
        sqlx::query(
            "INSERT INTO meteo_grid (lon, lat, geom) \
             VALUES ($1, $2, ST_SetSRID(ST_MakePoint($1, $2), 4326)::geography) \
             ON CONFLICT (lon, lat) DO NOTHING",
        )
        .bind(lon)
        .bind(lat)
        .execute(&mut *tx)
        .await?;
    }

    // 2) Resolve grid ids for the cells.
    let mut grid_ids: HashMap<(u64, u64), i64> = HashMap::with_capacity(cells.len());
    for (lon, lat) in &cells {
        let row = sqlx::query("SELECT grid_id FROM meteo_grid WHERE lon = $1 AND lat = $2")
            .bind(lon)
            .bind(lat)
            .fetch_one(&mut *tx)
            .await?;
        grid_ids.insert((lon.to_bits(), lat.to_bits()), row.try_get("grid_id")?);
    }

    // 3) Partition-scoped rewrite of the series rows.
    sqlx::query("DELETE FROM meteo_series WHERE source = $1 AND ts >= $2 AND ts < $3")
        .bind(source)
        .bind(start)
        .bind(end)
        .execute(&mut *tx)
        .await?;

    for chunk in rows.chunks(batch_size) {
        let mut qb = sqlx::QueryBuilder::<sqlx::Postgres>::new(
            "INSERT INTO meteo_series (grid_id, ts, prcp, t2m, etp, source) ",
        );
        qb.push_values(chunk, |mut b, m| {
            let grid_id = grid_ids[&(m.lon.to_bits(), m.lat.to_bits())];
            b.push_bind(grid_id)
                .push_bind(m.ts)
                .push_bind(m.prcp)
                .push_bind(m.t2m)
                .push_bind(m.etp)
                .push_bind(source);
        });
        qb.push(
            " ON CONFLICT (grid_id, ts) DO UPDATE SET \
             prcp = EXCLUDED.prcp, t2m = EXCLUDED.t2m, etp = EXCLUDED.etp, \
             source = EXCLUDED.source",
        );
        qb.build().execute(&mut *tx).await?;
    }

    tx.commit().await?;

    let loaded = rows.len() as u64;
    tracing::info!("meteo_series: {loaded} rows loaded for {source} @ {day}");
    Ok(loaded)
}

/// Rebuild the station -> nearest grid cell mapping as a whole. Runs in a
/// single transaction so readers never observe a partial mapping.
pub async fn refresh_station2grid(pool: &PgPool) -> Result<u64, PipelineError> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM station2grid").execute(&mut *tx).await?;

    let result = sqlx::query(
        "INSERT INTO station2grid (station_code, grid_id) \
         SELECT s.station_code, g.grid_id \
         FROM station_meta s \
         JOIN LATERAL ( \
             SELECT grid_id FROM meteo_grid \
             ORDER BY s.geom <-> meteo_grid.geom \
             LIMIT 1 \
         ) g ON TRUE \
         WHERE s.geom IS NOT NULL",
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    let linked = result.rows_affected();
    tracing::info!("station2grid: {linked} stations linked to the meteo grid");
    Ok(linked)
}

/// Refresh the per-station daily meteo aggregate view and return its size.
pub async fn refresh_station_summary(pool: &PgPool) -> Result<u64, PipelineError> {
    sqlx::query("REFRESH MATERIALIZED VIEW meteo_station_daily")
        .execute(pool)
        .await?;
    let row = sqlx::query("SELECT COUNT(*) AS n FROM meteo_station_daily")
        .fetch_one(pool)
        .await?;
    let count: i64 = row.try_get("n")?;
    tracing::info!("meteo_station_daily: {count} aggregated rows");
    Ok(count as u64)
}
