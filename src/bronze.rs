use std::time::Duration;

use aws_sdk_s3::primitives::ByteStream;
use chrono::NaiveDate;
use serde_json::Value;

use crate::error::PipelineError;

const PUT_RETRIES: u32 = 3;

/// Bronze-layer writer: immutable blobs under deterministic keys in an
/// S3-compatible store. A successful put means the complete page set for
/// that (api, endpoint, partition) is present; a single object PUT is
/// atomic at the object level, so partial writes are never observable.
#[derive(Clone)]
pub struct BronzeStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

fn sdk_err(e: impl std::fmt::Debug) -> PipelineError {
    PipelineError::StoreWrite(format!("{e:?}"))
}

impl BronzeStore {
    pub fn new(
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        bucket: &str,
    ) -> Self {
        let credentials = aws_sdk_s3::config::Credentials::new(
            access_key, secret_key, None, None, "static",
        );
        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .force_path_style(true)
            .build();
        Self {
            client: aws_sdk_s3::Client::from_conf(config),
            bucket: bucket.to_string(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Bronze JSON pages land at `{api}/{partition}/{endpoint_path}.json`.
    pub fn json_key(api: &str, partition: NaiveDate, endpoint_path: &str) -> String {
        format!("{api}/{}/{endpoint_path}.json", partition.format("%Y-%m-%d"))
    }

    /// Weekly station-referential pages land under the weekly bucket key.
    pub fn meta_key(partition_key: &str, api: &str) -> String {
        format!("station_meta/{partition_key}/{api}_stations.json")
    }

    /// Referential snapshots (Sandre) land under the weekly bucket key.
    pub fn referential_key(partition_key: &str, endpoint: &str) -> String {
        format!("sandre/{partition_key}/{endpoint}.json")
    }

    /// Bronze GML documents land at `wfs/{dataset}.gml`.
    pub fn gml_key(dataset: &str) -> String {
        format!("wfs/{dataset}.gml")
    }

    /// Create the bucket if it does not exist yet. Idempotent.
    pub async fn ensure_bucket(&self, bucket: &str) -> Result<(), PipelineError> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(err) => {
                let not_found = err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false);
                if !not_found {
                    return Err(sdk_err(err));
                }
                self.client
                    .create_bucket()
                    .bucket(bucket)
                    .send()
                    .await
                    .map_err(sdk_err)?;
                tracing::info!("created bucket {bucket}");
                Ok(())
            }
        }
    }

    /// Serialize records as pretty UTF-8 JSON (non-ASCII preserved) and put
    /// them under `key`. Returns the number of bytes written.
    pub async fn put_json(&self, key: &str, records: &[Value]) -> Result<u64, PipelineError> {
        let body = serde_json::to_vec_pretty(records)
            .map_err(|e| PipelineError::StoreWrite(format!("serialization failed: {e}")))?;
        let bytes = body.len() as u64;
        self.put_with_retry(key, body, "application/json").await?;
        Ok(bytes)
    }

    /// GML passthrough.
    pub async fn put_gml(&self, key: &str, body: String) -> Result<u64, PipelineError> {
        let body = body.into_bytes();
        let bytes = body.len() as u64;
        self.put_with_retry(key, body, "application/gml+xml").await?;
        Ok(bytes)
    }

    async fn put_with_retry(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), PipelineError> {
        let mut last_err = String::new();
        for attempt in 0..PUT_RETRIES {
            let result = self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(ByteStream::from(body.clone()))
                .content_type(content_type)
                .send()
                .await;
            match result {
                Ok(_) => {
                    tracing::debug!("stored s3://{}/{key}", self.bucket);
                    return Ok(());
                }
                Err(e) => {
                    last_err = format!("{e:?}");
                    tracing::warn!(
                        "put s3://{}/{key} failed (attempt {}/{PUT_RETRIES})",
                        self.bucket,
                        attempt + 1
                    );
                    tokio::time::sleep(Duration::from_secs_f64(2f64.powi(attempt as i32))).await;
                }
            }
        }
        Err(PipelineError::StoreWrite(format!(
            "put s3://{}/{key} failed after {PUT_RETRIES} attempts: {last_err}",
            self.bucket
        )))
    }

    /// Read a bronze JSON object back as records.
    pub async fn get_json(&self, key: &str) -> Result<Vec<Value>, PipelineError> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(sdk_err)?;
        let bytes = resp.body.collect().await.map_err(sdk_err)?.into_bytes();
        serde_json::from_slice(&bytes)
            .map_err(|e| PipelineError::StoreWrite(format!("bronze object {key} unreadable: {e}")))
    }

    /// Does a bronze object exist? Used by re-run checks.
    pub async fn exists(&self, key: &str) -> Result<bool, PipelineError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                let not_found = err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false);
                if not_found {
                    Ok(false)
                } else {
                    Err(sdk_err(err))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout_is_deterministic() {
        let day = NaiveDate::from_ymd_opt(2024, 10, 2).unwrap();
        assert_eq!(
            BronzeStore::json_key("piezo", day, "chroniques_tr"),
            "piezo/2024-10-02/chroniques_tr.json"
        );
        assert_eq!(BronzeStore::gml_key("bdlisa_masses_eau"), "wfs/bdlisa_masses_eau.gml");
        assert_eq!(
            BronzeStore::meta_key("2024-W40", "hydro"),
            "station_meta/2024-W40/hydro_stations.json"
        );
    }

    #[test]
    fn json_serialization_preserves_non_ascii() {
        let records = vec![serde_json::json!({"libelle_station": "Charité-sur-Loire"})];
        let body = serde_json::to_vec_pretty(&records).unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("Charité-sur-Loire"));
        assert!(!text.contains("\\u"));
    }
}
