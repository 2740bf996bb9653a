use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::NaiveDate;

use super::partition::PartitionSpec;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::observability::RunReport;
use crate::registry::Registry;
use crate::resources::Resources;

/// Everything a producer needs for one materialization.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: String,
    /// The day the partition key was derived from.
    pub day: NaiveDate,
    pub partition_key: String,
    pub resources: Arc<Resources>,
    pub config: Arc<PipelineConfig>,
    pub registry: Arc<Registry>,
}

pub type ProducerFuture = Pin<Box<dyn Future<Output = Result<RunReport, PipelineError>> + Send>>;
pub type Producer = Arc<dyn Fn(RunContext) -> ProducerFuture + Send + Sync>;

/// Maximum allowed lag since the last successful materialization.
#[derive(Debug, Clone, Copy)]
pub struct FreshnessPolicy {
    pub maximum_lag_minutes: i64,
}

/// Boolean predicate over an asset's latest result. A failing check marks
/// the run degraded; it never rolls back the write.
#[derive(Clone)]
pub struct AssetCheck {
    pub name: &'static str,
    pub check: fn(&RunReport) -> Result<(), String>,
}

/// A named data product: partitioning, producer, dependencies, freshness
/// and health checks. Registered explicitly into the catalog; no global
/// registration magic, everything is constructed in `main`.
#[derive(Clone)]
pub struct AssetDef {
    pub name: &'static str,
    pub group: &'static str,
    pub partitions: PartitionSpec,
    pub deps: Vec<&'static str>,
    pub freshness: Option<FreshnessPolicy>,
    pub checks: Vec<AssetCheck>,
    /// Max-concurrency-of-one across partitions of this asset.
    pub serial: bool,
    pub producer: Producer,
}

/// A job is a named subset of assets executed in dependency order.
#[derive(Debug, Clone)]
pub struct JobDef {
    pub name: &'static str,
    pub assets: Vec<&'static str>,
    /// Five-field cron expression, evaluated in the run timezone.
    pub cron: &'static str,
}

/// The asset DAG.
pub struct AssetCatalog {
    assets: BTreeMap<&'static str, AssetDef>,
}

impl AssetCatalog {
    pub fn new() -> Self {
        Self { assets: BTreeMap::new() }
    }

    pub fn register(&mut self, asset: AssetDef) -> Result<(), PipelineError> {
        if self.assets.contains_key(asset.name) {
            return Err(PipelineError::Config(format!(
                "asset {} registered twice",
                asset.name
            )));
        }
        self.assets.insert(asset.name, asset);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&AssetDef> {
        self.assets.get(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.assets.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssetDef> {
        self.assets.values()
    }

    /// All declared dependencies must exist and the graph must be acyclic.
    pub fn validate(&self) -> Result<(), PipelineError> {
        for asset in self.assets.values() {
            for dep in &asset.deps {
                if !self.assets.contains_key(dep) {
                    return Err(PipelineError::Config(format!(
                        "asset {} depends on unknown asset {dep}",
                        asset.name
                    )));
                }
            }
        }
        self.topo_levels(&self.names())?;
        Ok(())
    }

    /// Group a subset of assets into dependency levels: everything in level
    /// N only depends on levels < N (dependencies outside the subset are
    /// assumed already materialized). Errors on cycles.
    pub fn topo_levels(
        &self,
        subset: &[&'static str],
    ) -> Result<Vec<Vec<&'static str>>, PipelineError> {
        let wanted: HashSet<&str> = subset.iter().copied().collect();
        let mut remaining: Vec<&'static str> = subset.to_vec();
        let mut placed: HashSet<&str> = HashSet::new();
        let mut levels: Vec<Vec<&'static str>> = Vec::new();

        while !remaining.is_empty() {
            let mut level: Vec<&'static str> = Vec::new();
            for name in &remaining {
                let asset = self.assets.get(name).ok_or_else(|| {
                    PipelineError::Config(format!("unknown asset {name} in job"))
                })?;
                let ready = asset
                    .deps
                    .iter()
                    .filter(|d| wanted.contains(**d))
                    .all(|d| placed.contains(*d));
                if ready {
                    level.push(name);
                }
            }
            if level.is_empty() {
                return Err(PipelineError::Config(format!(
                    "dependency cycle among assets: {remaining:?}"
                )));
            }
            for name in &level {
                placed.insert(name);
            }
            remaining.retain(|n| !placed.contains(n));
            levels.push(level);
        }
        Ok(levels)
    }

}

impl Default for AssetCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::partition::PartitionSpec;
    use chrono::NaiveDate;

    fn noop_producer() -> Producer {
        Arc::new(|ctx: RunContext| -> ProducerFuture {
            Box::pin(async move { Ok(RunReport::new("noop", &ctx.partition_key)) })
        })
    }

    fn asset(name: &'static str, deps: Vec<&'static str>) -> AssetDef {
        AssetDef {
            name,
            group: "test",
            partitions: PartitionSpec::daily(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
            deps,
            freshness: None,
            checks: Vec::new(),
            serial: false,
            producer: noop_producer(),
        }
    }

    #[test]
    fn levels_respect_dependencies() {
        let mut catalog = AssetCatalog::new();
        catalog.register(asset("a", vec![])).unwrap();
        catalog.register(asset("b", vec!["a"])).unwrap();
        catalog.register(asset("c", vec!["a"])).unwrap();
        catalog.register(asset("d", vec!["b", "c"])).unwrap();
        catalog.validate().unwrap();

        let levels = catalog.topo_levels(&["a", "b", "c", "d"]).unwrap();
        assert_eq!(levels[0], vec!["a"]);
        assert_eq!(levels[1].len(), 2);
        assert_eq!(levels[2], vec!["d"]);
    }

    #[test]
    fn out_of_subset_deps_do_not_block() {
        let mut catalog = AssetCatalog::new();
        catalog.register(asset("a", vec![])).unwrap();
        catalog.register(asset("b", vec!["a"])).unwrap();
        let levels = catalog.topo_levels(&["b"]).unwrap();
        assert_eq!(levels, vec![vec!["b"]]);
    }

    #[test]
    fn cycles_are_rejected() {
        let mut catalog = AssetCatalog::new();
        catalog.register(asset("a", vec!["b"])).unwrap();
        catalog.register(asset("b", vec!["a"])).unwrap();
        assert!(catalog.topo_levels(&["a", "b"]).is_err());
    }

    #[test]
    fn unknown_dependency_fails_validation() {
        let mut catalog = AssetCatalog::new();
        catalog.register(asset("a", vec!["ghost"])).unwrap();
        assert!(catalog.validate().is_err());
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let mut catalog = AssetCatalog::new();
        catalog.register(asset("a", vec![])).unwrap();
        assert!(catalog.register(asset("a", vec![])).is_err());
    }
}
