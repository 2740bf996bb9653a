use futures_util::StreamExt;

use crate::bronze::BronzeStore;
use crate::error::PipelineError;
use crate::observability::RunReport;
use crate::registry::EndpointSpec;
use crate::scheduler::RunContext;

/// Harvest every endpoint of one API for the partition day and land the
/// deduplicated page sets in bronze. Endpoints are fetched concurrently up
/// to the configured cap; a failing endpoint never aborts its siblings.
/// All bronze writes complete before any silver asset reads the partition
/// (the DAG orders silver behind this asset).
pub async fn harvest_api(
    ctx: RunContext,
    asset_name: &'static str,
    api_name: &'static str,
    endpoints: Option<Vec<&'static str>>,
) -> Result<RunReport, PipelineError> {
    let api = ctx.registry.get(api_name)?.clone();
    let mut report = RunReport::new(asset_name, &ctx.partition_key);

    let selected: Vec<(String, EndpointSpec)> = api
        .endpoints
        .iter()
        .filter(|(name, _)| {
            endpoints
                .as_ref()
                .map(|wanted| wanted.iter().any(|w| *w == name.as_str()))
                .unwrap_or(true)
        })
        .map(|(name, spec)| (name.clone(), spec.clone()))
        .collect();

    let cap = ctx.config.scheduler.endpoint_concurrency.max(1);
    let results: Vec<_> = futures_util::stream::iter(selected.into_iter().map(
        |(endpoint_name, spec)| {
            let harvester = ctx.resources.harvester.clone();
            let api = api.clone();
            let day = ctx.day;
            async move {
                let outcome = harvester.fetch_endpoint(&api, &endpoint_name, &spec, day).await;
                (endpoint_name, spec, outcome)
            }
        },
    ))
    .buffer_unordered(cap)
    .collect()
    .await;

    for (endpoint_name, spec, outcome) in results {
        match outcome {
            Ok(records) if records.is_empty() => {
                tracing::info!("{api_name}/{endpoint_name}: no data for {}", ctx.partition_key);
                report.endpoint_no_data(&endpoint_name);
            }
            Ok(records) => {
                let key = BronzeStore::json_key(&api.name, ctx.day, &spec.path);
                match ctx.resources.bronze.put_json(&key, &records).await {
                    Ok(bytes) => {
                        tracing::info!(
                            "{api_name}/{endpoint_name}: {} records -> s3://{}/{key}",
                            records.len(),
                            ctx.resources.bronze.bucket()
                        );
                        report.endpoint_success(&endpoint_name, records.len() as u64, bytes);
                    }
                    Err(e) => report.endpoint_failed(&endpoint_name, &e),
                }
            }
            Err(e) => {
                let e: PipelineError = e.into();
                tracing::warn!("{api_name}/{endpoint_name}: {e}");
                report.endpoint_failed(&endpoint_name, &e);
            }
        }
    }

    Ok(report)
}

/// The meteo source is optional: without `METEO_BASE_URL` the asset
/// reports no data and writes nothing. Rows are never fabricated.
pub async fn harvest_meteo(ctx: RunContext) -> Result<RunReport, PipelineError> {
    if !ctx.registry.apis.contains_key("meteo") {
        let mut report = RunReport::new("bronze_meteo", &ctx.partition_key);
        report.endpoint_no_data("grid_daily");
        report
            .warnings
            .push("meteo source unconfigured (METEO_BASE_URL unset)".to_string());
        return Ok(report);
    }
    harvest_api(ctx, "bronze_meteo", "meteo", None).await
}
