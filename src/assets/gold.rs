use crate::error::PipelineError;
use crate::observability::RunReport;
use crate::scheduler::RunContext;

/// Merge Station, Commune, MasseEau and Reseau nodes (plus their direct
/// relations) and MeteoGrid nodes from current silver state.
pub async fn sync_nodes(ctx: RunContext) -> Result<RunReport, PipelineError> {
    let mut report = RunReport::new("gold_nodes", &ctx.partition_key);
    let stations = ctx
        .resources
        .graph
        .sync_stations(&ctx.resources.warehouse)
        .await?;
    let cells = ctx
        .resources
        .graph
        .sync_meteo_grid(&ctx.resources.warehouse)
        .await?;
    report.rows_loaded = stations + cells;
    Ok(report)
}

pub async fn sync_params(ctx: RunContext) -> Result<RunReport, PipelineError> {
    let mut report = RunReport::new("gold_params", &ctx.partition_key);
    report.rows_loaded = ctx
        .resources
        .graph
        .sync_params(&ctx.resources.warehouse)
        .await?;
    Ok(report)
}

pub async fn sync_has_param(ctx: RunContext) -> Result<RunReport, PipelineError> {
    let mut report = RunReport::new("gold_has_param", &ctx.partition_key);
    report.rows_loaded = ctx
        .resources
        .graph
        .sync_has_param(&ctx.resources.warehouse)
        .await?;
    Ok(report)
}

pub async fn sync_near(ctx: RunContext) -> Result<RunReport, PipelineError> {
    let mut report = RunReport::new("gold_near", &ctx.partition_key);
    report.rows_loaded = ctx
        .resources
        .graph
        .sync_near(&ctx.resources.warehouse, &ctx.config.graph)
        .await?;
    Ok(report)
}

pub async fn sync_correlations(ctx: RunContext) -> Result<RunReport, PipelineError> {
    let mut report = RunReport::new("gold_correlations", &ctx.partition_key);
    report.rows_loaded = ctx
        .resources
        .graph
        .sync_correlations(&ctx.resources.warehouse, &ctx.config.graph)
        .await?;
    Ok(report)
}

pub async fn sync_param_correlations(ctx: RunContext) -> Result<RunReport, PipelineError> {
    let mut report = RunReport::new("gold_param_correlations", &ctx.partition_key);
    report.rows_loaded = ctx
        .resources
        .graph
        .sync_param_correlations(&ctx.resources.warehouse)
        .await?;
    Ok(report)
}

pub async fn sync_data_quality(ctx: RunContext) -> Result<RunReport, PipelineError> {
    let mut report = RunReport::new("gold_data_quality", &ctx.partition_key);
    report.rows_loaded = ctx
        .resources
        .graph
        .sync_data_quality(&ctx.resources.warehouse)
        .await?;
    Ok(report)
}
