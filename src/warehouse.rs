use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Ordered list of DDL statements to ensure the warehouse schema exists.
/// Every statement is idempotent (`IF NOT EXISTS`) so safe to run on every
/// startup. Time-series tables are registered as hypertables with 1-day
/// chunks; geographic columns are WGS84.
const MIGRATIONS: &[&str] = &[
    // ── Extensions ──
    "CREATE EXTENSION IF NOT EXISTS timescaledb",
    "CREATE EXTENSION IF NOT EXISTS postgis",

    // ── Time-series observations ──
    r"CREATE TABLE IF NOT EXISTS measure (
    station_code TEXT NOT NULL,
    theme        TEXT NOT NULL,
    ts           TIMESTAMPTZ NOT NULL,
    value        DOUBLE PRECISION,
    quality      TEXT,
    source       TEXT NOT NULL,
    PRIMARY KEY (station_code, theme, ts)
)",
    r"SELECT create_hypertable('measure', 'ts',
        chunk_time_interval => INTERVAL '1 day', if_not_exists => TRUE)",
    "CREATE INDEX IF NOT EXISTS idx_measure_theme_ts ON measure (theme, ts DESC)",
    "CREATE INDEX IF NOT EXISTS idx_measure_source_ts ON measure (source, ts)",

    // ── Physico-chemical analyses ──
    r"CREATE TABLE IF NOT EXISTS measure_quality (
    station_code TEXT NOT NULL,
    param_code   TEXT NOT NULL,
    ts           TIMESTAMPTZ NOT NULL,
    value        DOUBLE PRECISION,
    unit         TEXT,
    quality      TEXT,
    source       TEXT NOT NULL,
    PRIMARY KEY (station_code, param_code, ts)
)",
    r"SELECT create_hypertable('measure_quality', 'ts',
        chunk_time_interval => INTERVAL '1 day', if_not_exists => TRUE)",
    "CREATE INDEX IF NOT EXISTS idx_measure_quality_param ON measure_quality (param_code, ts DESC)",
    "CREATE INDEX IF NOT EXISTS idx_measure_quality_source_ts ON measure_quality (source, ts)",

    // ── Station referential ──
    r"CREATE TABLE IF NOT EXISTS station_meta (
    station_code   TEXT PRIMARY KEY,
    label          TEXT,
    type           TEXT,
    insee          TEXT,
    masse_eau_code TEXT,
    reseau         TEXT,
    geom           GEOGRAPHY(Point, 4326),
    updated_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
)",
    "CREATE INDEX IF NOT EXISTS idx_station_meta_geom ON station_meta USING GIST (geom)",
    "CREATE INDEX IF NOT EXISTS idx_station_meta_insee ON station_meta (insee)",

    // ── Sandre parameter referential ──
    r"CREATE TABLE IF NOT EXISTS quality_param (
    code_param TEXT PRIMARY KEY,
    label      TEXT,
    unit       TEXT,
    family     TEXT
)",
    r"CREATE TABLE IF NOT EXISTS sandre_unit (
    code        TEXT PRIMARY KEY,
    symbole     TEXT,
    description TEXT
)",

    // ── Meteo grid and series ──
    r"CREATE TABLE IF NOT EXISTS meteo_grid (
    grid_id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    lon     DOUBLE PRECISION NOT NULL,
    lat     DOUBLE PRECISION NOT NULL,
    geom    GEOGRAPHY(Point, 4326),
    UNIQUE (lon, lat)
)",
    r"CREATE TABLE IF NOT EXISTS meteo_series (
    grid_id BIGINT NOT NULL,
    ts      TIMESTAMPTZ NOT NULL,
    prcp    DOUBLE PRECISION,
    t2m     DOUBLE PRECISION,
    etp     DOUBLE PRECISION,
    source  TEXT NOT NULL,
    PRIMARY KEY (grid_id, ts)
)",
    r"SELECT create_hypertable('meteo_series', 'ts',
        chunk_time_interval => INTERVAL '1 day', if_not_exists => TRUE)",
    "CREATE INDEX IF NOT EXISTS idx_meteo_series_source_ts ON meteo_series (source, ts)",

    // ── Station -> nearest grid cell (rebuilt whole, never per-partition) ──
    r"CREATE TABLE IF NOT EXISTS station2grid (
    station_code TEXT PRIMARY KEY,
    grid_id      BIGINT NOT NULL
)",

    // ── Per-station daily meteo aggregates (refreshed by its asset) ──
    r"CREATE MATERIALIZED VIEW IF NOT EXISTS meteo_station_daily AS
SELECT
    s2g.station_code,
    time_bucket('1 day', ms.ts) AS day,
    SUM(ms.prcp) AS total_precipitation_mm,
    AVG(ms.t2m)  AS avg_temperature_c,
    MIN(ms.t2m)  AS min_temperature_c,
    MAX(ms.t2m)  AS max_temperature_c,
    SUM(ms.etp)  AS total_etp_mm
FROM station2grid s2g
JOIN meteo_series ms ON ms.grid_id = s2g.grid_id
GROUP BY s2g.station_code, time_bucket('1 day', ms.ts)",
];

pub async fn connect(dsn: &str, pool_size: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(pool_size)
        .connect(dsn)
        .await?;
    Ok(pool)
}

/// Run all migrations against the warehouse. Safe to call on every startup.
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    tracing::info!("running warehouse migrations ({} statements)", MIGRATIONS.len());

    for (i, sql) in MIGRATIONS.iter().enumerate() {
        let preview: String = sql.chars().take(80).collect();
        tracing::debug!("migration {}/{}: {}...", i + 1, MIGRATIONS.len(), preview);
        sqlx::query(sql).execute(pool).await.map_err(|e| {
            tracing::error!("migration {}/{} failed: {e}", i + 1, MIGRATIONS.len());
            e
        })?;
    }

    tracing::info!("warehouse migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent_by_construction() {
        for sql in MIGRATIONS {
            let normalized = sql.to_uppercase();
            assert!(
                normalized.contains("IF NOT EXISTS") || normalized.contains("IF_NOT_EXISTS"),
                "statement must be idempotent: {sql}"
            );
        }
    }

    #[test]
    fn every_hypertable_has_a_daily_chunk_interval() {
        let hypertables: Vec<_> = MIGRATIONS
            .iter()
            .filter(|s| s.contains("create_hypertable"))
            .collect();
        assert_eq!(hypertables.len(), 3);
        for sql in hypertables {
            assert!(sql.contains("INTERVAL '1 day'"));
        }
    }
}
