use crate::bronze::BronzeStore;
use crate::error::PipelineError;
use crate::models::{ParamRecord, StationRecord};
use crate::observability::RunReport;
use crate::scheduler::RunContext;

/// Which (api, endpoint) pairs carry the station referential.
const STATION_SOURCES: &[(&str, &str)] = &[
    ("piezo", "stations"),
    ("hydro", "stations"),
    ("temperature", "stations"),
    ("quality_surface", "station_pc"),
];

/// Fetch and unify the station referential across the API family, land the
/// raw pages in bronze under the weekly key, then upsert `station_meta`.
/// Geometry handling (lon/lat preferred, Lambert-93 transformed) happens in
/// the warehouse upsert.
pub async fn station_meta_sync(ctx: RunContext) -> Result<RunReport, PipelineError> {
    let mut report = RunReport::new("station_meta_sync", &ctx.partition_key);

    for &(api_name, endpoint_name) in STATION_SOURCES {
        let label = format!("{api_name}/{endpoint_name}");

        let outcome = async {
            let api = ctx.registry.get(api_name)?;
            let spec = api.endpoints.get(endpoint_name).ok_or_else(|| {
                PipelineError::Config(format!("no endpoint {endpoint_name} on {api_name}"))
            })?;
            let records = ctx
                .resources
                .harvester
                .fetch_endpoint(api, endpoint_name, spec, ctx.day)
                .await?;
            if records.is_empty() {
                return Ok(None);
            }

            let key = BronzeStore::meta_key(&ctx.partition_key, api_name);
            let bytes = ctx.resources.bronze.put_json(&key, &records).await?;

            let stations: Vec<StationRecord> = records
                .iter()
                .filter_map(|r| StationRecord::from_api(api_name, r))
                .collect();
            let fetched = records.len() as u64;
            let upserted = crate::loaders::stations::upsert_stations(
                &ctx.resources.warehouse,
                stations,
            )
            .await?;
            Ok(Some((fetched, bytes, upserted)))
        }
        .await;

        match outcome {
            Ok(None) => report.endpoint_no_data(&label),
            Ok(Some((fetched, bytes, upserted))) => {
                report.endpoint_success(&label, fetched, bytes);
                report.rows_loaded += upserted;
            }
            Err(e) => {
                tracing::error!("station_meta_sync {label}: {e}");
                report.endpoint_failed(&label, &e);
            }
        }
    }

    Ok(report)
}

/// Snapshot the Sandre parameter and unit referentials into bronze.
pub async fn sandre_referentiel(ctx: RunContext) -> Result<RunReport, PipelineError> {
    let mut report = RunReport::new("sandre_referentiel", &ctx.partition_key);
    let api = ctx.registry.get("sandre")?.clone();

    for endpoint_name in ["parametres", "unites"] {
        let spec = api.endpoints[endpoint_name].clone();
        let outcome = async {
            let records = ctx
                .resources
                .harvester
                .fetch_endpoint(&api, endpoint_name, &spec, ctx.day)
                .await?;
            if records.is_empty() {
                return Ok(None);
            }
            let key = BronzeStore::referential_key(&ctx.partition_key, endpoint_name);
            let bytes = ctx.resources.bronze.put_json(&key, &records).await?;
            Ok(Some((records.len() as u64, bytes)))
        }
        .await;

        match outcome {
            Ok(None) => report.endpoint_no_data(endpoint_name),
            Ok(Some((count, bytes))) => report.endpoint_success(endpoint_name, count, bytes),
            Err(e) => {
                tracing::error!("sandre_referentiel {endpoint_name}: {e}");
                report.endpoint_failed(endpoint_name, &e);
            }
        }
    }

    Ok(report)
}

/// Load the Sandre snapshots from bronze into the warehouse referential
/// tables.
pub async fn load_params_asset(ctx: RunContext) -> Result<RunReport, PipelineError> {
    let mut report = RunReport::new("silver_params", &ctx.partition_key);

    let params_key = BronzeStore::referential_key(&ctx.partition_key, "parametres");
    match ctx.resources.bronze.exists(&params_key).await? {
        false => report.endpoint_no_data("parametres"),
        true => {
            let raw = ctx.resources.bronze.get_json(&params_key).await?;
            let params: Vec<ParamRecord> =
                raw.iter().filter_map(ParamRecord::from_raw).collect();
            let loaded =
                crate::loaders::params::upsert_params(&ctx.resources.warehouse, params).await?;
            report.rows_loaded += loaded;
            report.endpoint_success("parametres", loaded, 0);
        }
    }

    let units_key = BronzeStore::referential_key(&ctx.partition_key, "unites");
    match ctx.resources.bronze.exists(&units_key).await? {
        false => report.endpoint_no_data("unites"),
        true => {
            let raw = ctx.resources.bronze.get_json(&units_key).await?;
            let units: Vec<(String, Option<String>, Option<String>)> = raw
                .iter()
                .filter_map(|r| {
                    // lowercase keys from the fields filter, SANDREv4
                    // spellings as fallbacks
                    let code = crate::models::str_field(r, &["code", "CdUniteMesure"])?;
                    Some((
                        code,
                        crate::models::str_field(r, &["symbole", "SymboleUniteMesure"]),
                        crate::models::str_field(r, &["libelle", "LblUniteMesure"]),
                    ))
                })
                .collect();
            let loaded =
                crate::loaders::params::upsert_units(&ctx.resources.warehouse, units).await?;
            report.rows_loaded += loaded;
            report.endpoint_success("unites", loaded, 0);
        }
    }

    Ok(report)
}

/// Single-shot WFS pull of the BDLISA referential, landed as GML.
pub async fn wfs_bdlisa(ctx: RunContext) -> Result<RunReport, PipelineError> {
    let mut report = RunReport::new("wfs_bdlisa", &ctx.partition_key);
    let wfs = ctx.registry.get_wfs("bdlisa_masses_eau")?;

    match ctx.resources.harvester.fetch_wfs(wfs).await {
        Ok(gml) => {
            let key = BronzeStore::gml_key(&wfs.name);
            match ctx.resources.bronze.put_gml(&key, gml).await {
                Ok(bytes) => report.endpoint_success(&wfs.name, 1, bytes),
                Err(e) => report.endpoint_failed(&wfs.name, &e),
            }
        }
        Err(e) => {
            let e: PipelineError = e.into();
            tracing::warn!("wfs_bdlisa: {e}");
            report.endpoint_failed(&wfs.name, &e);
        }
    }

    Ok(report)
}

/// Rebuild the station -> nearest-grid-cell mapping as a whole.
pub async fn station2grid_refresh(ctx: RunContext) -> Result<RunReport, PipelineError> {
    let mut report = RunReport::new("station2grid_refresh", &ctx.partition_key);
    let linked =
        crate::loaders::meteo::refresh_station2grid(&ctx.resources.warehouse).await?;
    report.rows_loaded = linked;
    Ok(report)
}

/// Refresh the per-station daily meteo aggregates.
pub async fn meteo_station_summary(ctx: RunContext) -> Result<RunReport, PipelineError> {
    let mut report = RunReport::new("meteo_station_summary", &ctx.partition_key);
    report.rows_loaded =
        crate::loaders::meteo::refresh_station_summary(&ctx.resources.warehouse).await?;
    Ok(report)
}
