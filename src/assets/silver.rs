use crate::bronze::BronzeStore;
use crate::error::PipelineError;
use crate::models::{MeasureRecord, MeteoRecord, QualityRecord};
use crate::observability::RunReport;
use crate::scheduler::RunContext;

/// Which bronze objects feed the `measure` table, and under what theme and
/// source tag. The source identifies the endpoint that produced each row.
const MEASURE_SOURCES: &[(&str, &str, &str, &str)] = &[
    ("piezo", "chroniques_tr", "piezo", "hubeau_piezo"),
    ("hydro", "observations_tr", "hydro", "hubeau_hydro"),
    ("temperature", "chronique", "temperature", "hubeau_temperature"),
    ("ecoulement", "chroniques", "ecoulement", "hubeau_ecoulement"),
    ("hydrobiologie", "indicateurs", "hydrobiologie", "hubeau_hydrobiologie"),
    ("prelevements", "chroniques", "prelevements", "hubeau_prelevements"),
];

const QUALITY_SOURCES: &[(&str, &str, &str)] = &[
    ("quality_surface", "analyse_pc", "hubeau_quality_surface"),
    ("quality_groundwater", "analyses", "hubeau_quality_groundwater"),
];

/// Load the partition's bronze measure objects into the warehouse. A
/// missing bronze object means the endpoint had no data for the partition;
/// that is not a failure.
pub async fn load_measures_asset(ctx: RunContext) -> Result<RunReport, PipelineError> {
    let mut report = RunReport::new("silver_measures", &ctx.partition_key);
    let batch_size = ctx.config.loader.batch_size;

    for &(api, endpoint_path, theme, source) in MEASURE_SOURCES {
        let label = format!("{api}/{endpoint_path}");
        let key = BronzeStore::json_key(api, ctx.day, endpoint_path);

        match ctx.resources.bronze.exists(&key).await {
            Ok(false) => {
                report.endpoint_no_data(&label);
                continue;
            }
            Err(e) => {
                report.endpoint_failed(&label, &e);
                continue;
            }
            Ok(true) => {}
        }

        let outcome = async {
            let raw = ctx.resources.bronze.get_json(&key).await?;
            let records: Vec<MeasureRecord> = raw
                .iter()
                .filter_map(|r| MeasureRecord::from_raw(r, theme, source))
                .collect();
            crate::loaders::measures::load_measures(
                &ctx.resources.warehouse,
                records,
                source,
                ctx.day,
                batch_size,
            )
            .await
        }
        .await;

        match outcome {
            Ok(rows) => {
                report.rows_loaded += rows;
                report.endpoint_success(&label, rows, 0);
            }
            Err(e) => {
                tracing::error!("silver_measures {label}: {e}");
                report.endpoint_failed(&label, &e);
            }
        }
    }

    Ok(report)
}

/// Load the partition's quality analyses into `measure_quality`.
pub async fn load_quality_asset(ctx: RunContext) -> Result<RunReport, PipelineError> {
    let mut report = RunReport::new("silver_quality", &ctx.partition_key);
    let batch_size = ctx.config.loader.batch_size;

    for &(api, endpoint_path, source) in QUALITY_SOURCES {
        let label = format!("{api}/{endpoint_path}");
        let key = BronzeStore::json_key(api, ctx.day, endpoint_path);

        match ctx.resources.bronze.exists(&key).await {
            Ok(false) => {
                report.endpoint_no_data(&label);
                continue;
            }
            Err(e) => {
                report.endpoint_failed(&label, &e);
                continue;
            }
            Ok(true) => {}
        }

        let outcome = async {
            let raw = ctx.resources.bronze.get_json(&key).await?;
            let records: Vec<QualityRecord> = raw
                .iter()
                .filter_map(|r| QualityRecord::from_raw(r, source))
                .collect();
            crate::loaders::quality::load_quality(
                &ctx.resources.warehouse,
                records,
                source,
                ctx.day,
                batch_size,
            )
            .await
        }
        .await;

        match outcome {
            Ok(rows) => {
                report.rows_loaded += rows;
                report.endpoint_success(&label, rows, 0);
            }
            Err(e) => {
                tracing::error!("silver_quality {label}: {e}");
                report.endpoint_failed(&label, &e);
            }
        }
    }

    Ok(report)
}

/// Load the partition's meteo grid observations: grid cells first, then
/// the series rows referencing them.
pub async fn load_meteo_asset(ctx: RunContext) -> Result<RunReport, PipelineError> {
    let mut report = RunReport::new("silver_meteo", &ctx.partition_key);
    let key = BronzeStore::json_key("meteo", ctx.day, "grid_daily");

    match ctx.resources.bronze.exists(&key).await {
        Ok(false) => {
            report.endpoint_no_data("meteo/grid_daily");
            return Ok(report);
        }
        Err(e) => {
            report.endpoint_failed("meteo/grid_daily", &e);
            return Ok(report);
        }
        Ok(true) => {}
    }

    let raw = ctx.resources.bronze.get_json(&key).await?;
    let records: Vec<MeteoRecord> = raw.iter().filter_map(MeteoRecord::from_raw).collect();
    let rows = crate::loaders::meteo::load_meteo(
        &ctx.resources.warehouse,
        records,
        "meteo_grid",
        ctx.day,
        ctx.config.loader.batch_size,
    )
    .await?;

    report.rows_loaded = rows;
    report.endpoint_success("meteo/grid_daily", rows, 0);
    Ok(report)
}
