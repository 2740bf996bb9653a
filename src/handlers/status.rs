use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scheduler::Cadence;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct AssetStatus {
    pub name: &'static str,
    pub group: &'static str,
    pub cadence: &'static str,
    pub serial: bool,
    pub last_status: Option<String>,
    pub last_partition: Option<String>,
    pub last_ended_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freshness: Option<FreshnessStatus>,
}

#[derive(Debug, Serialize)]
pub struct FreshnessStatus {
    pub maximum_lag_minutes: i64,
    pub lag_minutes: Option<i64>,
    pub fresh: bool,
}

fn cadence_str(cadence: Cadence) -> &'static str {
    match cadence {
        Cadence::Daily => "daily",
        Cadence::Weekly => "weekly",
        Cadence::Monthly => "monthly",
    }
}

/// Asset inventory with last-run state and freshness, for the dashboard.
pub async fn list_assets(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let now = Utc::now();
    let mut out = Vec::new();

    for asset in state.catalog.iter() {
        let last = state
            .state_db
            .list_runs(asset.name, 1)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
            .into_iter()
            .next();

        let freshness = match asset.freshness {
            None => None,
            Some(policy) => {
                let last_success = state
                    .state_db
                    .last_success(asset.name)
                    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
                let lag_minutes = last_success
                    .as_deref()
                    .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                    .map(|ts| (now - ts.with_timezone(&Utc)).num_minutes());
                Some(FreshnessStatus {
                    maximum_lag_minutes: policy.maximum_lag_minutes,
                    lag_minutes,
                    fresh: lag_minutes
                        .map(|lag| lag <= policy.maximum_lag_minutes)
                        .unwrap_or(false),
                })
            }
        };

        out.push(AssetStatus {
            name: asset.name,
            group: asset.group,
            cadence: cadence_str(asset.partitions.cadence),
            serial: asset.serial,
            last_status: last.as_ref().map(|r| r.status.clone()),
            last_partition: last.as_ref().map(|r| r.partition_key.clone()),
            last_ended_at: last.and_then(|r| r.ended_at),
            freshness,
        });
    }

    Ok(Json(serde_json::json!({ "assets": out })))
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<i64>,
}

/// Materialization history for one asset.
pub async fn asset_runs(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<RunsQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if state.catalog.get(&name).is_none() {
        return Err((StatusCode::NOT_FOUND, format!("unknown asset {name}")));
    }
    let runs = state
        .state_db
        .list_runs(&name, query.limit.unwrap_or(50).clamp(1, 500))
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(serde_json::json!({ "runs": runs })))
}

/// The most recent run of every asset.
pub async fn latest_runs(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let runs = state
        .state_db
        .latest_runs()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(serde_json::json!({ "runs": runs })))
}
