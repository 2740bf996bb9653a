use sqlx::PgPool;

use super::dedup_by_key;
use crate::error::PipelineError;
use crate::models::ParamRecord;

/// Upsert the Sandre parameter referential into `quality_param`.
pub async fn upsert_params(
    pool: &PgPool,
    records: Vec<ParamRecord>,
) -> Result<u64, PipelineError> {
    if records.is_empty() {
        return Ok(0);
    }

    let rows = dedup_by_key(records, |p| p.code_param.clone());

    let mut tx = pool.begin().await?;
    for param in &rows {
        sqlx::query(
            "INSERT INTO quality_param (code_param, label, unit, family) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (code_param) DO UPDATE SET \
             label = EXCLUDED.label, unit = EXCLUDED.unit, family = EXCLUDED.family",
        )
        .bind(&param.code_param)
        .bind(&param.label)
        .bind(&param.unit)
        .bind(&param.family)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    let loaded = rows.len() as u64;
    tracing::info!("quality_param: {loaded} parameters upserted");
    Ok(loaded)
}

/// Upsert the Sandre unit referential into `sandre_unit`.
pub async fn upsert_units(
    pool: &PgPool,
    records: Vec<(String, Option<String>, Option<String>)>,
) -> Result<u64, PipelineError> {
    if records.is_empty() {
        return Ok(0);
    }

    let rows = dedup_by_key(records, |(code, _, _)| code.clone());

    let mut tx = pool.begin().await?;
    for (code, symbole, description) in &rows {
        sqlx::query(
            "INSERT INTO sandre_unit (code, symbole, description) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (code) DO UPDATE SET \
             symbole = EXCLUDED.symbole, description = EXCLUDED.description",
        )
        .bind(code)
        .bind(symbole)
        .bind(description)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    Ok(rows.len() as u64)
}
