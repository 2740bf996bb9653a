use sqlx::PgPool;

use super::dedup_by_key;
use crate::error::PipelineError;
use crate::models::StationRecord;

/// Geometry expression: lon/lat wins when present, otherwise the projected
/// Lambert-93 pair is transformed to WGS84; neither leaves geom NULL.
/// A NULL geom never clobbers a previously known position.
const UPSERT_STATION: &str = r"
INSERT INTO station_meta (station_code, label, type, insee, masse_eau_code, reseau, geom)
VALUES ($1, $2, $3, $4, $5, $6,
    COALESCE(
        CASE WHEN $7::double precision IS NOT NULL AND $8::double precision IS NOT NULL
             THEN ST_SetSRID(ST_MakePoint($7, $8), 4326)::geography
        END,
        CASE WHEN $9::double precision IS NOT NULL AND $10::double precision IS NOT NULL
             THEN ST_Transform(ST_SetSRID(ST_MakePoint($9, $10), 2154), 4326)::geography
        END
    ))
ON CONFLICT (station_code) DO UPDATE SET
    label = EXCLUDED.label,
    type = EXCLUDED.type,
    insee = EXCLUDED.insee,
    masse_eau_code = EXCLUDED.masse_eau_code,
    reseau = EXCLUDED.reseau,
    geom = COALESCE(EXCLUDED.geom, station_meta.geom),
    updated_at = NOW()
";

/// Upsert station referential rows. Not partition-scoped: the referential
/// converges toward the latest upstream state.
pub async fn upsert_stations(
    pool: &PgPool,
    records: Vec<StationRecord>,
) -> Result<u64, PipelineError> {
    if records.is_empty() {
        return Ok(0);
    }

    let rows = dedup_by_key(records, |s| s.station_code.clone());

    let mut tx = pool.begin().await?;
    for station in &rows {
        sqlx::query(UPSERT_STATION)
            .bind(&station.station_code)
            .bind(&station.label)
            .bind(&station.station_type)
            .bind(&station.insee)
            .bind(&station.masse_eau_code)
            .bind(&station.reseau)
            .bind(station.lon)
            .bind(station.lat)
            .bind(station.x2154)
            .bind(station.y2154)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    let upserted = rows.len() as u64;
    tracing::info!("station_meta: {upserted} stations upserted");
    Ok(upserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lon_lat_takes_precedence_over_projected_pair() {
        // The SQL prefers the WGS84 pair: the first COALESCE branch is the
        // lon/lat CASE, the Lambert-93 transform only fires when it is NULL.
        let wgs84 = UPSERT_STATION.find("ST_MakePoint($7, $8)").unwrap();
        let lambert = UPSERT_STATION.find("ST_SetSRID(ST_MakePoint($9, $10), 2154)").unwrap();
        assert!(wgs84 < lambert);
        assert!(UPSERT_STATION.contains("ST_Transform"));
        assert!(UPSERT_STATION.contains("COALESCE(EXCLUDED.geom, station_meta.geom)"));
    }
}
