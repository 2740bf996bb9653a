use serde::Deserialize;
use std::path::Path;

use crate::error::PipelineError;

/// Connection settings, read once from the environment at startup.
/// A missing required variable fails the process with a config error.
#[derive(Debug, Clone)]
pub struct Settings {
    pub warehouse_dsn: String,
    pub warehouse_pool: u32,
    pub graph_uri: String,
    pub graph_user: String,
    pub graph_pass: String,
    pub cache_uri: Option<String>,
    pub object_endpoint: String,
    pub object_user: String,
    pub object_pass: String,
    pub object_buckets: Vec<String>,
    pub run_timezone: chrono_tz::Tz,
    pub state_db_path: String,
    pub http_listen: u16,
}

fn required(key: &str) -> Result<String, PipelineError> {
    std::env::var(key).map_err(|_| PipelineError::Config(format!("missing env var {key}")))
}

impl Settings {
    pub fn from_env() -> Result<Self, PipelineError> {
        let tz_name =
            std::env::var("RUN_TIMEZONE").unwrap_or_else(|_| "Europe/Paris".to_string());
        let run_timezone: chrono_tz::Tz = tz_name
            .parse()
            .map_err(|_| PipelineError::Config(format!("unknown timezone {tz_name}")))?;

        let object_buckets = std::env::var("OBJECT_BUCKETS")
            .unwrap_or_else(|_| "bronze".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            warehouse_dsn: required("WAREHOUSE_DSN")?,
            warehouse_pool: std::env::var("WAREHOUSE_POOL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            graph_uri: required("GRAPH_URI")?,
            graph_user: std::env::var("GRAPH_USER").unwrap_or_else(|_| "neo4j".to_string()),
            graph_pass: required("GRAPH_PASS")?,
            cache_uri: std::env::var("CACHE_URI").ok(),
            object_endpoint: required("OBJECT_ENDPOINT")?,
            object_user: required("OBJECT_USER")?,
            object_pass: required("OBJECT_PASS")?,
            object_buckets,
            run_timezone,
            state_db_path: std::env::var("STATE_DB_PATH")
                .unwrap_or_else(|_| "./pipeline_state.db".to_string()),
            http_listen: std::env::var("HTTP_LISTEN")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
        })
    }

    /// The bucket bronze objects are written to (first of `OBJECT_BUCKETS`).
    pub fn bronze_bucket(&self) -> &str {
        self.object_buckets
            .first()
            .map(String::as_str)
            .unwrap_or("bronze")
    }
}

/// Tuning knobs loaded from `pipeline.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on concurrently running materializations.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Endpoints fetched concurrently within one asset.
    #[serde(default = "default_endpoint_concurrency")]
    pub endpoint_concurrency: usize,
    /// Soft deadline per materialization, seconds.
    #[serde(default = "default_deadline_secs")]
    pub asset_deadline_secs: u64,
    /// Sensor evaluation cadence, seconds.
    #[serde(default = "default_sensor_interval")]
    pub sensor_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            endpoint_concurrency: default_endpoint_concurrency(),
            asset_deadline_secs: default_deadline_secs(),
            sensor_interval_secs: default_sensor_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    /// Radius for NEAR relations, km.
    #[serde(default = "default_near_radius")]
    pub near_radius_km: f64,
    /// |rho| threshold below which no CORRELATED relation is written.
    #[serde(default = "default_correlation_threshold")]
    pub correlation_threshold: f64,
    /// Trailing correlation window, days.
    #[serde(default = "default_correlation_window")]
    pub correlation_window_days: i64,
    /// Minimum aligned day-buckets before a correlation is computed.
    #[serde(default = "default_correlation_overlap")]
    pub correlation_min_overlap: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            near_radius_km: default_near_radius(),
            correlation_threshold: default_correlation_threshold(),
            correlation_window_days: default_correlation_window(),
            correlation_min_overlap: default_correlation_overlap(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoaderConfig {
    /// Rows per bulk insert statement.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self { batch_size: default_batch_size() }
    }
}

fn default_max_concurrent() -> usize {
    3
}

fn default_endpoint_concurrency() -> usize {
    4
}

fn default_deadline_secs() -> u64 {
    1800
}

fn default_sensor_interval() -> u64 {
    300
}

fn default_near_radius() -> f64 {
    50.0
}

fn default_correlation_threshold() -> f64 {
    0.7
}

fn default_correlation_window() -> i64 {
    90
}

fn default_correlation_overlap() -> usize {
    10
}

fn default_batch_size() -> usize {
    1000
}

impl PipelineConfig {
    /// Load config from a TOML file. Returns defaults if the file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&contents)?;
        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.scheduler.max_concurrent, 3);
        assert_eq!(cfg.scheduler.endpoint_concurrency, 4);
        assert_eq!(cfg.graph.near_radius_km, 50.0);
        assert_eq!(cfg.graph.correlation_window_days, 90);
        assert_eq!(cfg.loader.batch_size, 1000);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: PipelineConfig =
            toml::from_str("[scheduler]\nmax_concurrent = 8\n").unwrap();
        assert_eq!(cfg.scheduler.max_concurrent, 8);
        assert_eq!(cfg.scheduler.endpoint_concurrency, 4);
        assert_eq!(cfg.graph.correlation_threshold, 0.7);
    }
}
