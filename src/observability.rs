use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::PipelineError;

/// Per-endpoint outcome inside one materialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointStatus {
    Success,
    NoData,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointReport {
    pub status: EndpointStatus,
    pub records: u64,
    pub bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_class: Option<&'static str>,
}

/// Structured record emitted by every asset materialization and persisted
/// with the run: per-endpoint counts, classified errors, bytes written.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub asset: String,
    pub partition: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub endpoints: BTreeMap<String, EndpointReport>,
    pub records_count: u64,
    pub rows_loaded: u64,
    pub bytes_written: u64,
    pub warnings: Vec<String>,
}

/// Overall materialization outcome derived from the endpoint set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    PartialSuccess,
    Failed,
}

impl RunReport {
    pub fn new(asset: &str, partition: &str) -> Self {
        Self {
            asset: asset.to_string(),
            partition: partition.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            endpoints: BTreeMap::new(),
            records_count: 0,
            rows_loaded: 0,
            bytes_written: 0,
            warnings: Vec::new(),
        }
    }

    pub fn endpoint_success(&mut self, name: &str, records: u64, bytes: u64) {
        self.records_count += records;
        self.bytes_written += bytes;
        self.endpoints.insert(
            name.to_string(),
            EndpointReport {
                status: EndpointStatus::Success,
                records,
                bytes,
                error: None,
                error_class: None,
            },
        );
    }

    pub fn endpoint_no_data(&mut self, name: &str) {
        self.endpoints.insert(
            name.to_string(),
            EndpointReport {
                status: EndpointStatus::NoData,
                records: 0,
                bytes: 0,
                error: None,
                error_class: None,
            },
        );
    }

    pub fn endpoint_failed(&mut self, name: &str, error: &PipelineError) {
        self.endpoints.insert(
            name.to_string(),
            EndpointReport {
                status: EndpointStatus::Failed,
                records: 0,
                bytes: 0,
                error: Some(error.to_string()),
                error_class: Some(error.class()),
            },
        );
    }

    pub fn finish(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    /// A failed endpoint does not fail its siblings: the asset reports
    /// partial success when at least one endpoint delivered, failed when
    /// every endpoint failed. `no_data` endpoints are not failures.
    pub fn outcome(&self) -> RunOutcome {
        let failed = self
            .endpoints
            .values()
            .filter(|e| e.status == EndpointStatus::Failed)
            .count();
        if failed == 0 {
            return RunOutcome::Success;
        }
        let delivered = self
            .endpoints
            .values()
            .any(|e| e.status == EndpointStatus::Success);
        if delivered {
            RunOutcome::PartialSuccess
        } else {
            RunOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_endpoints_ok_is_success() {
        let mut report = RunReport::new("bronze_piezo", "2024-10-02");
        report.endpoint_success("stations", 10, 100);
        report.endpoint_no_data("chroniques_tr");
        assert_eq!(report.outcome(), RunOutcome::Success);
    }

    #[test]
    fn one_failed_endpoint_is_partial_when_a_sibling_delivered() {
        let mut report = RunReport::new("bronze_piezo", "2024-10-02");
        report.endpoint_success("stations", 10, 100);
        report.endpoint_failed(
            "chroniques_tr",
            &PipelineError::Validation("missing code_bss".into()),
        );
        assert_eq!(report.outcome(), RunOutcome::PartialSuccess);
    }

    #[test]
    fn all_endpoints_failed_is_failed() {
        let mut report = RunReport::new("bronze_piezo", "2024-10-02");
        report.endpoint_failed("stations", &PipelineError::TransientSource("503".into()));
        report.endpoint_failed(
            "chroniques_tr",
            &PipelineError::TransientSource("timeout".into()),
        );
        assert_eq!(report.outcome(), RunOutcome::Failed);
    }

    #[test]
    fn loader_report_without_endpoints_is_success() {
        let report = RunReport::new("silver_measures", "2024-10-02");
        assert_eq!(report.outcome(), RunOutcome::Success);
    }

    #[test]
    fn failure_classification_lands_in_the_endpoint_report() {
        let mut report = RunReport::new("bronze_piezo", "2024-10-02");
        report.endpoint_failed("stations", &PipelineError::StoreWrite("boom".into()));
        let ep = &report.endpoints["stations"];
        assert_eq!(ep.error_class, Some("downstream_store"));
    }
}
