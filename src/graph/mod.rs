pub mod correlation;
pub mod geo;

use std::collections::HashMap;

use chrono::NaiveDate;
use neo4rs::query;
use sqlx::{PgPool, Row};

use crate::config::GraphConfig;
use crate::error::PipelineError;
use correlation::DailySeries;
use geo::{near_pairs, Positioned};

/// Gold-layer synchronizer: derives the property graph from current silver
/// state using upsert-only merges on uniquely-keyed nodes and relations.
/// Every merge is individually idempotent; a failed pass leaves the applied
/// merges in place and the next run completes the rest.
#[derive(Clone)]
pub struct GraphSync {
    graph: neo4rs::Graph,
}

struct StationRow {
    code: String,
    label: Option<String>,
    station_type: Option<String>,
    insee: Option<String>,
    masse_eau_code: Option<String>,
    reseau: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
}

impl GraphSync {
    pub async fn connect(uri: &str, user: &str, pass: &str) -> Result<Self, PipelineError> {
        let graph = neo4rs::Graph::new(uri, user, pass).await?;
        Ok(Self { graph })
    }

    /// Merge Station nodes plus their direct relations to Commune, MasseEau
    /// and Reseau. Nodes are never deleted.
    pub async fn sync_stations(&self, pool: &PgPool) -> Result<u64, PipelineError> {
        let rows = sqlx::query(
            "SELECT station_code, label, type AS station_type, insee, masse_eau_code, reseau, \
             ST_Y(geom::geometry) AS lat, ST_X(geom::geometry) AS lon \
             FROM station_meta WHERE station_code IS NOT NULL",
        )
        .fetch_all(pool)
        .await?;

        let stations: Vec<StationRow> = rows
            .iter()
            .map(|r| {
                Ok(StationRow {
                    code: r.try_get("station_code")?,
                    label: r.try_get("label")?,
                    station_type: r.try_get("station_type")?,
                    insee: r.try_get("insee")?,
                    masse_eau_code: r.try_get("masse_eau_code")?,
                    reseau: r.try_get("reseau")?,
                    lat: r.try_get("lat")?,
                    lon: r.try_get("lon")?,
                })
            })
            .collect::<Result<_, sqlx::Error>>()?;

        tracing::info!("graph: syncing {} stations", stations.len());

        for s in &stations {
            if let (Some(lat), Some(lon)) = (s.lat, s.lon) {
                self.graph
                    .run(
                        query(
                            "MERGE (s:Station {code: $code}) \
                             SET s.label = $label, s.type = $type, \
                                 s.lat = $lat, s.lon = $lon, s.updated_at = datetime()",
                        )
                        .param("code", s.code.clone())
                        .param("label", s.label.clone().unwrap_or_default())
                        .param("type", s.station_type.clone().unwrap_or_default())
                        .param("lat", lat)
                        .param("lon", lon),
                    )
                    .await?;
            } else {
                self.graph
                    .run(
                        query(
                            "MERGE (s:Station {code: $code}) \
                             SET s.label = $label, s.type = $type, s.updated_at = datetime()",
                        )
                        .param("code", s.code.clone())
                        .param("label", s.label.clone().unwrap_or_default())
                        .param("type", s.station_type.clone().unwrap_or_default()),
                    )
                    .await?;
            }

            if let Some(insee) = &s.insee {
                self.graph
                    .run(
                        query(
                            "MERGE (c:Commune {insee: $insee}) \
                             WITH c MATCH (s:Station {code: $code}) \
                             MERGE (s)-[:LOCATED_IN]->(c)",
                        )
                        .param("insee", insee.clone())
                        .param("code", s.code.clone()),
                    )
                    .await?;
            }
            if let Some(me_code) = &s.masse_eau_code {
                self.graph
                    .run(
                        query(
                            "MERGE (me:MasseEau {code: $me_code}) \
                             WITH me MATCH (s:Station {code: $code}) \
                             MERGE (s)-[:IN_MASSE]->(me)",
                        )
                        .param("me_code", me_code.clone())
                        .param("code", s.code.clone()),
                    )
                    .await?;
            }
            if let Some(reseau) = &s.reseau {
                self.graph
                    .run(
                        query(
                            "MERGE (res:Reseau {code: $res_code}) \
                             WITH res MATCH (s:Station {code: $code}) \
                             MERGE (s)-[:BELONGS_TO]->(res)",
                        )
                        .param("res_code", reseau.clone())
                        .param("code", s.code.clone()),
                    )
                    .await?;
            }
        }

        Ok(stations.len() as u64)
    }

    /// Merge MeteoGrid nodes from the grid reference table.
    pub async fn sync_meteo_grid(&self, pool: &PgPool) -> Result<u64, PipelineError> {
        let rows = sqlx::query("SELECT grid_id, lon, lat FROM meteo_grid")
            .fetch_all(pool)
            .await?;

        for row in &rows {
            let grid_id: i64 = row.try_get("grid_id")?;
            let lon: f64 = row.try_get("lon")?;
            let lat: f64 = row.try_get("lat")?;
            self.graph
                .run(
                    query(
                        "MERGE (g:MeteoGrid {grid_id: $grid_id}) \
                         SET g.lon = $lon, g.lat = $lat, g.updated_at = datetime()",
                    )
                    .param("grid_id", grid_id)
                    .param("lon", lon)
                    .param("lat", lat),
                )
                .await?;
        }
        Ok(rows.len() as u64)
    }

    /// Merge Parametre nodes from the Sandre referential.
    pub async fn sync_params(&self, pool: &PgPool) -> Result<u64, PipelineError> {
        let rows = sqlx::query("SELECT code_param, label, unit, family FROM quality_param")
            .fetch_all(pool)
            .await?;

        for row in &rows {
            let code: String = row.try_get("code_param")?;
            let label: Option<String> = row.try_get("label")?;
            let unit: Option<String> = row.try_get("unit")?;
            let family: Option<String> = row.try_get("family")?;
            self.graph
                .run(
                    query(
                        "MERGE (p:Parametre {code: $code}) \
                         SET p.label = $label, p.unit = $unit, p.family = $family, \
                             p.updated_at = datetime()",
                    )
                    .param("code", code)
                    .param("label", label.unwrap_or_default())
                    .param("unit", unit.unwrap_or_default())
                    .param("family", family.unwrap_or_default()),
                )
                .await?;
        }

        tracing::info!("graph: {} parameters merged", rows.len());
        Ok(rows.len() as u64)
    }

    /// HAS_PARAM relations from distinct (station, parameter) pairs in
    /// `measure_quality`. MATCH on both endpoints keeps dangling relations
    /// impossible: a missing node simply skips the merge.
    pub async fn sync_has_param(&self, pool: &PgPool) -> Result<u64, PipelineError> {
        let rows = sqlx::query(
            "SELECT DISTINCT station_code, param_code FROM measure_quality \
             WHERE station_code IS NOT NULL AND param_code IS NOT NULL",
        )
        .fetch_all(pool)
        .await?;

        for row in &rows {
            let station: String = row.try_get("station_code")?;
            let param: String = row.try_get("param_code")?;
            self.graph
                .run(
                    query(
                        "MATCH (s:Station {code: $station}) \
                         MATCH (p:Parametre {code: $param}) \
                         MERGE (s)-[:HAS_PARAM]->(p)",
                    )
                    .param("station", station)
                    .param("param", param),
                )
                .await?;
        }

        tracing::info!("graph: {} HAS_PARAM links merged", rows.len());
        Ok(rows.len() as u64)
    }

    /// NEAR relations between stations within the configured radius.
    /// Distances use the canonical haversine; pairs are canonicalized so
    /// each unordered pair is stored once.
    pub async fn sync_near(
        &self,
        pool: &PgPool,
        cfg: &GraphConfig,
    ) -> Result<u64, PipelineError> {
        let rows = sqlx::query(
            "SELECT station_code, ST_Y(geom::geometry) AS lat, ST_X(geom::geometry) AS lon \
             FROM station_meta WHERE geom IS NOT NULL",
        )
        .fetch_all(pool)
        .await?;

        let stations: Vec<Positioned> = rows
            .iter()
            .map(|r| {
                Ok(Positioned {
                    code: r.try_get("station_code")?,
                    lat: r.try_get("lat")?,
                    lon: r.try_get("lon")?,
                })
            })
            .collect::<Result<_, sqlx::Error>>()?;

        let pairs = near_pairs(&stations, cfg.near_radius_km);
        tracing::info!(
            "graph: {} NEAR pairs within {} km across {} stations",
            pairs.len(),
            cfg.near_radius_km,
            stations.len()
        );

        for (i, j, distance) in &pairs {
            let (first, second) = canonical_pair(&stations[*i].code, &stations[*j].code);
            self.graph
                .run(
                    query(
                        "MATCH (s1:Station {code: $code1}) \
                         MATCH (s2:Station {code: $code2}) \
                         MERGE (s1)-[r:NEAR]-(s2) \
                         SET r.distance_km = $distance, r.updated_at = datetime()",
                    )
                    .param("code1", first.to_string())
                    .param("code2", second.to_string())
                    .param("distance", *distance),
                )
                .await?;
        }

        Ok(pairs.len() as u64)
    }

    /// CORRELATED relations between same-theme stations over the trailing
    /// window, day-bucketed and aligned. Emitted only above the |rho|
    /// threshold with sufficient overlap.
    pub async fn sync_correlations(
        &self,
        pool: &PgPool,
        cfg: &GraphConfig,
    ) -> Result<u64, PipelineError> {
        let themes: Vec<String> = sqlx::query(
            "SELECT DISTINCT theme FROM measure \
             WHERE ts >= NOW() - make_interval(days => $1)",
        )
        .bind(cfg.correlation_window_days as i32)
        .fetch_all(pool)
        .await?
        .iter()
        .map(|r| r.try_get("theme"))
        .collect::<Result<_, sqlx::Error>>()?;

        let mut written = 0u64;
        for theme in &themes {
            let rows = sqlx::query(
                "SELECT station_code, time_bucket('1 day', ts)::date AS day, AVG(value) AS v \
                 FROM measure \
                 WHERE theme = $1 AND value IS NOT NULL \
                   AND ts >= NOW() - make_interval(days => $2) \
                 GROUP BY station_code, day",
            )
            .bind(theme)
            .bind(cfg.correlation_window_days as i32)
            .fetch_all(pool)
            .await?;

            let mut series: HashMap<String, DailySeries> = HashMap::new();
            for row in &rows {
                let station: String = row.try_get("station_code")?;
                let day: NaiveDate = row.try_get("day")?;
                let value: Option<f64> = row.try_get("v")?;
                if let Some(v) = value {
                    series.entry(station).or_default().insert(day, v);
                }
            }

            let mut codes: Vec<&String> = series.keys().collect();
            codes.sort();

            for (a_idx, code1) in codes.iter().enumerate() {
                for code2 in codes.iter().skip(a_idx + 1) {
                    let Some(rho) = correlation::correlate(
                        &series[*code1],
                        &series[*code2],
                        cfg.correlation_min_overlap,
                    ) else {
                        continue;
                    };
                    if rho.abs() <= cfg.correlation_threshold {
                        continue;
                    }
                    self.graph
                        .run(
                            query(
                                "MATCH (s1:Station {code: $code1}) \
                                 MATCH (s2:Station {code: $code2}) \
                                 MERGE (s1)-[r:CORRELATED]-(s2) \
                                 SET r.rho = $rho, r.window_days = $window, \
                                     r.station_type = $theme, r.updated_at = datetime()",
                            )
                            .param("code1", code1.to_string())
                            .param("code2", code2.to_string())
                            .param("rho", rho)
                            .param("window", cfg.correlation_window_days)
                            .param("theme", theme.clone()),
                        )
                        .await?;
                    written += 1;
                }
            }
        }

        tracing::info!("graph: {written} CORRELATED relations merged");
        Ok(written)
    }

    /// CORRELATED_WITH relations between parameters co-measured on at
    /// least three stations over the trailing year; carries the station
    /// support count and the mean co-value scalar.
    pub async fn sync_param_correlations(&self, pool: &PgPool) -> Result<u64, PipelineError> {
        let rows = sqlx::query(
            "SELECT m1.param_code AS param1, m2.param_code AS param2, \
                    COUNT(DISTINCT m1.station_code) AS nb_stations, \
                    AVG(m1.value * m2.value) AS co_value \
             FROM measure_quality m1 \
             JOIN measure_quality m2 \
               ON m1.station_code = m2.station_code AND m1.ts = m2.ts \
             WHERE m1.param_code < m2.param_code \
               AND m1.ts >= NOW() - INTERVAL '1 year' \
               AND m1.value IS NOT NULL AND m2.value IS NOT NULL \
             GROUP BY m1.param_code, m2.param_code \
             HAVING COUNT(DISTINCT m1.station_code) >= 3",
        )
        .fetch_all(pool)
        .await?;

        for row in &rows {
            let param1: String = row.try_get("param1")?;
            let param2: String = row.try_get("param2")?;
            let nb_stations: i64 = row.try_get("nb_stations")?;
            let co_value: Option<f64> = row.try_get("co_value")?;
            self.graph
                .run(
                    query(
                        "MATCH (p1:Parametre {code: $param1}) \
                         MATCH (p2:Parametre {code: $param2}) \
                         MERGE (p1)-[r:CORRELATED_WITH]->(p2) \
                         SET r.nb_stations = $nb_stations, r.co_value = $co_value, \
                             r.updated_at = datetime()",
                    )
                    .param("param1", param1)
                    .param("param2", param2)
                    .param("nb_stations", nb_stations)
                    .param("co_value", co_value.unwrap_or(0.0)),
                )
                .await?;
        }

        tracing::info!("graph: {} CORRELATED_WITH relations merged", rows.len());
        Ok(rows.len() as u64)
    }
}

impl GraphSync {
    /// Per-(source, theme) provenance: DataSource nodes carrying coverage
    /// statistics, generated-by an ingestion Activity.
    pub async fn sync_data_quality(&self, pool: &PgPool) -> Result<u64, PipelineError> {
        let rows = sqlx::query(
            "SELECT source, theme, \
                    COUNT(*) AS total, \
                    COUNT(value) AS valid, \
                    MIN(ts) AS first_ts, \
                    MAX(ts) AS last_ts, \
                    AVG(value) AS avg_value \
             FROM measure \
             GROUP BY source, theme",
        )
        .fetch_all(pool)
        .await?;

        for row in &rows {
            let source: String = row.try_get("source")?;
            let theme: String = row.try_get("theme")?;
            let total: i64 = row.try_get("total")?;
            let valid: i64 = row.try_get("valid")?;
            let first_ts: Option<chrono::DateTime<chrono::Utc>> = row.try_get("first_ts")?;
            let last_ts: Option<chrono::DateTime<chrono::Utc>> = row.try_get("last_ts")?;
            let avg_value: Option<f64> = row.try_get("avg_value")?;

            let quality_rate = if total > 0 {
                valid as f64 / total as f64 * 100.0
            } else {
                0.0
            };

            self.graph
                .run(
                    query(
                        "MERGE (ds:DataSource {name: $source, theme: $theme}) \
                         SET ds.total_measurements = $total, \
                             ds.valid_measurements = $valid, \
                             ds.quality_rate_percent = $quality_rate, \
                             ds.first_measurement = $first_ts, \
                             ds.last_measurement = $last_ts, \
                             ds.avg_value = $avg_value, \
                             ds.updated_at = datetime() \
                         MERGE (a:Activity {type: 'data_ingestion', source: $source}) \
                         SET a.theme = $theme \
                         MERGE (a)-[:GENERATED]->(ds)",
                    )
                    .param("source", source)
                    .param("theme", theme)
                    .param("total", total)
                    .param("valid", valid)
                    .param("quality_rate", quality_rate)
                    .param("first_ts", first_ts.map(|t| t.to_rfc3339()).unwrap_or_default())
                    .param("last_ts", last_ts.map(|t| t.to_rfc3339()).unwrap_or_default())
                    .param("avg_value", avg_value.unwrap_or(0.0)),
                )
                .await?;
        }

        tracing::info!("graph: {} data-source provenance nodes merged", rows.len());
        Ok(rows.len() as u64)
    }
}

/// Order a station pair so each unordered pair is written exactly once.
fn canonical_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b { (a, b) } else { (b, a) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_canonicalization_is_order_independent() {
        assert_eq!(canonical_pair("B", "A"), ("A", "B"));
        assert_eq!(canonical_pair("A", "B"), ("A", "B"));
        assert_eq!(canonical_pair("A", "A"), ("A", "A"));
    }
}
