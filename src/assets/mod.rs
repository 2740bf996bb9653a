pub mod bronze;
pub mod gold;
pub mod meta;
pub mod sensors;
pub mod silver;

use std::future::Future;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::error::PipelineError;
use crate::observability::RunReport;
use crate::scheduler::{
    AssetCatalog, AssetCheck, AssetDef, FreshnessPolicy, JobDef, PartitionSpec, Producer,
    ProducerFuture, RunContext,
};

/// Daily partitions start where the upstream real-time APIs keep history.
fn daily_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 9, 1).expect("valid date")
}

/// Weekly partitions for the slower-moving referentials.
fn weekly_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date")
}

fn producer<F, Fut>(f: F) -> Producer
where
    F: Fn(RunContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<RunReport, PipelineError>> + Send + 'static,
{
    Arc::new(move |ctx| -> ProducerFuture { Box::pin(f(ctx)) })
}

const FRESH_DAILY: FreshnessPolicy = FreshnessPolicy { maximum_lag_minutes: 24 * 60 };
const FRESH_WEEKLY: FreshnessPolicy = FreshnessPolicy { maximum_lag_minutes: 8 * 24 * 60 };

fn min_records(threshold: u64) -> fn(&RunReport) -> Result<(), String> {
    // fn pointers cannot capture; dispatch over the supported thresholds.
    match threshold {
        100 => |report| {
            if report.records_count >= 100 {
                Ok(())
            } else {
                Err(format!("low data count: {}", report.records_count))
            }
        },
        _ => |report| {
            if report.records_count > 0 {
                Ok(())
            } else {
                Err("no data ingested".to_string())
            }
        },
    }
}

fn rows_loaded_check(report: &RunReport) -> Result<(), String> {
    if report.rows_loaded > 0 {
        Ok(())
    } else {
        Err("no rows loaded".to_string())
    }
}

fn station_count_check(report: &RunReport) -> Result<(), String> {
    if report.rows_loaded >= 1000 {
        Ok(())
    } else {
        Err(format!("low station count: {}", report.rows_loaded))
    }
}

/// Build the full asset catalog. Everything is registered here, explicitly.
pub fn build_catalog() -> Result<AssetCatalog, PipelineError> {
    let daily = PartitionSpec::daily(daily_start());
    let weekly = PartitionSpec::weekly(weekly_start());
    let mut catalog = AssetCatalog::new();

    // ── Bronze: Hub'Eau harvests ──
    for (name, api, endpoints) in [
        ("bronze_piezo", "piezo", None),
        ("bronze_hydro", "hydro", None),
        ("bronze_temperature", "temperature", None),
        ("bronze_ecoulement", "ecoulement", None),
        ("bronze_hydrobiologie", "hydrobiologie", None),
        ("bronze_prelevements", "prelevements", None),
        ("bronze_quality_surface", "quality_surface", Some(vec!["analyse_pc"])),
        ("bronze_quality_groundwater", "quality_groundwater", Some(vec!["analyses"])),
    ] {
        let checks = if name == "bronze_piezo" {
            vec![AssetCheck { name: "data_quality_check", check: min_records(100) }]
        } else {
            Vec::new()
        };
        catalog.register(AssetDef {
            name,
            group: "hubeau_bronze",
            partitions: daily,
            deps: vec![],
            freshness: Some(FRESH_DAILY),
            checks,
            serial: false,
            producer: producer(move |ctx| {
                bronze::harvest_api(ctx, name, api, endpoints.clone())
            }),
        })?;
    }

    catalog.register(AssetDef {
        name: "bronze_meteo",
        group: "meteo_bronze",
        partitions: daily,
        deps: vec![],
        freshness: None,
        checks: Vec::new(),
        serial: false,
        producer: producer(bronze::harvest_meteo),
    })?;

    // ── Silver: warehouse loads ──
    catalog.register(AssetDef {
        name: "silver_measures",
        group: "warehouse_silver",
        partitions: daily,
        deps: vec![
            "bronze_piezo",
            "bronze_hydro",
            "bronze_temperature",
            "bronze_ecoulement",
            "bronze_hydrobiologie",
            "bronze_prelevements",
        ],
        freshness: Some(FRESH_DAILY),
        checks: vec![AssetCheck { name: "timescale_load_check", check: rows_loaded_check }],
        serial: false,
        producer: producer(silver::load_measures_asset),
    })?;

    catalog.register(AssetDef {
        name: "silver_quality",
        group: "warehouse_silver",
        partitions: daily,
        deps: vec!["bronze_quality_surface", "bronze_quality_groundwater"],
        freshness: Some(FRESH_DAILY),
        checks: Vec::new(),
        serial: false,
        producer: producer(silver::load_quality_asset),
    })?;

    catalog.register(AssetDef {
        name: "silver_meteo",
        group: "warehouse_silver",
        partitions: daily,
        deps: vec!["bronze_meteo"],
        freshness: None,
        checks: Vec::new(),
        serial: false,
        producer: producer(silver::load_meteo_asset),
    })?;

    // ── Weekly referentials ──
    catalog.register(AssetDef {
        name: "station_meta_sync",
        group: "meta",
        partitions: weekly,
        deps: vec![],
        freshness: Some(FRESH_WEEKLY),
        checks: vec![AssetCheck { name: "station_meta_quality_check", check: station_count_check }],
        serial: false,
        producer: producer(meta::station_meta_sync),
    })?;

    catalog.register(AssetDef {
        name: "sandre_referentiel",
        group: "thesaurus_bronze",
        partitions: weekly,
        deps: vec![],
        freshness: Some(FRESH_WEEKLY),
        checks: Vec::new(),
        serial: false,
        producer: producer(meta::sandre_referentiel),
    })?;

    catalog.register(AssetDef {
        name: "silver_params",
        group: "thesaurus_silver",
        partitions: weekly,
        deps: vec!["sandre_referentiel"],
        freshness: None,
        checks: Vec::new(),
        serial: false,
        producer: producer(meta::load_params_asset),
    })?;

    catalog.register(AssetDef {
        name: "wfs_bdlisa",
        group: "external_bronze",
        partitions: weekly,
        deps: vec![],
        freshness: None,
        checks: Vec::new(),
        serial: false,
        producer: producer(meta::wfs_bdlisa),
    })?;

    catalog.register(AssetDef {
        name: "station2grid_refresh",
        group: "warehouse_silver",
        partitions: weekly,
        deps: vec!["station_meta_sync"],
        freshness: None,
        checks: Vec::new(),
        serial: true,
        producer: producer(meta::station2grid_refresh),
    })?;

    catalog.register(AssetDef {
        name: "meteo_station_summary",
        group: "meteo_gold",
        partitions: weekly,
        deps: vec!["station2grid_refresh"],
        freshness: None,
        checks: Vec::new(),
        serial: true,
        producer: producer(meta::meteo_station_summary),
    })?;

    // ── Gold: graph derivation ──
    catalog.register(AssetDef {
        name: "gold_nodes",
        group: "graph_gold",
        partitions: weekly,
        deps: vec!["station_meta_sync"],
        freshness: None,
        checks: Vec::new(),
        serial: false,
        producer: producer(gold::sync_nodes),
    })?;

    catalog.register(AssetDef {
        name: "gold_params",
        group: "graph_gold",
        partitions: weekly,
        deps: vec!["silver_params"],
        freshness: None,
        checks: Vec::new(),
        serial: false,
        producer: producer(gold::sync_params),
    })?;

    catalog.register(AssetDef {
        name: "gold_has_param",
        group: "graph_gold",
        partitions: weekly,
        deps: vec!["gold_params", "silver_quality"],
        freshness: None,
        checks: Vec::new(),
        serial: false,
        producer: producer(gold::sync_has_param),
    })?;

    catalog.register(AssetDef {
        name: "gold_near",
        group: "graph_gold",
        partitions: weekly,
        deps: vec!["gold_nodes"],
        freshness: None,
        checks: Vec::new(),
        serial: true,
        producer: producer(gold::sync_near),
    })?;

    catalog.register(AssetDef {
        name: "gold_correlations",
        group: "graph_gold",
        partitions: weekly,
        deps: vec!["gold_nodes"],
        freshness: None,
        checks: Vec::new(),
        serial: true,
        producer: producer(gold::sync_correlations),
    })?;

    catalog.register(AssetDef {
        name: "gold_param_correlations",
        group: "graph_gold",
        partitions: weekly,
        deps: vec!["gold_params"],
        freshness: None,
        checks: Vec::new(),
        serial: false,
        producer: producer(gold::sync_param_correlations),
    })?;

    catalog.register(AssetDef {
        name: "gold_data_quality",
        group: "graph_gold",
        partitions: weekly,
        deps: vec![],
        freshness: None,
        checks: Vec::new(),
        serial: false,
        producer: producer(gold::sync_data_quality),
    })?;

    catalog.validate()?;
    Ok(catalog)
}

/// Jobs are named subsets with a cron trigger in the run timezone.
pub fn jobs() -> Vec<JobDef> {
    let daily_assets = vec![
        "bronze_piezo",
        "bronze_hydro",
        "bronze_temperature",
        "bronze_ecoulement",
        "bronze_hydrobiologie",
        "bronze_prelevements",
        "bronze_quality_surface",
        "bronze_quality_groundwater",
        "bronze_meteo",
        "silver_measures",
        "silver_quality",
        "silver_meteo",
    ];
    let weekly_assets = vec![
        "station_meta_sync",
        "sandre_referentiel",
        "silver_params",
        "wfs_bdlisa",
        "station2grid_refresh",
        "meteo_station_summary",
        "gold_nodes",
        "gold_params",
        "gold_has_param",
        "gold_near",
        "gold_correlations",
        "gold_param_correlations",
        "gold_data_quality",
    ];
    let mut all_assets = daily_assets.clone();
    all_assets.extend(weekly_assets.clone());

    vec![
        JobDef { name: "daily_ingestion", assets: daily_assets, cron: "30 2 * * *" },
        JobDef { name: "weekly_external", assets: weekly_assets, cron: "0 3 * * 1" },
        JobDef { name: "monthly_full", assets: all_assets, cron: "0 4 1 * *" },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_builds_and_validates() {
        let catalog = build_catalog().unwrap();
        assert!(catalog.get("bronze_piezo").is_some());
        assert!(catalog.get("gold_correlations").is_some());
        assert_eq!(catalog.names().len(), 25);
    }

    #[test]
    fn jobs_reference_known_assets() {
        let catalog = build_catalog().unwrap();
        for job in jobs() {
            for asset in &job.assets {
                assert!(catalog.get(asset).is_some(), "{asset} missing");
            }
            // Every job subset must order cleanly.
            catalog.topo_levels(&job.assets).unwrap();
        }
    }

    #[test]
    fn daily_job_orders_bronze_before_silver() {
        let catalog = build_catalog().unwrap();
        let job = jobs().into_iter().find(|j| j.name == "daily_ingestion").unwrap();
        let levels = catalog.topo_levels(&job.assets).unwrap();
        let level_of = |name: &'static str| {
            levels.iter().position(|l| l.contains(&name)).unwrap()
        };
        assert!(level_of("bronze_piezo") < level_of("silver_measures"));
        assert!(level_of("bronze_quality_surface") < level_of("silver_quality"));
    }
}
