use thiserror::Error;

/// Outcome of a single endpoint fetch, before it is folded into an asset
/// result. The retry loop switches over these instead of using exceptions
/// for control flow.
#[derive(Debug, Error)]
pub enum FetchError {
    /// 429/5xx/timeout/connection error that survived the whole retry budget.
    #[error("transient upstream failure: {0}")]
    Transient(String),

    /// 4xx (other than 429), malformed body, or WFS exception report.
    #[error("permanent upstream failure: {0}")]
    Permanent(String),

    /// Response parsed but failed structural validation (missing `data`
    /// array or a required field absent from the sampled record).
    #[error("response validation failed: {0}")]
    Validation(String),
}

/// Asset-level error taxonomy. Every failed materialization is classified
/// into exactly one of these before it is persisted.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("transient source error: {0}")]
    TransientSource(String),

    #[error("permanent source error: {0}")]
    PermanentSource(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("object store write failed: {0}")]
    StoreWrite(String),

    #[error("warehouse write failed: {0}")]
    WarehouseWrite(String),

    #[error("graph write failed: {0}")]
    GraphWrite(String),

    #[error("materialization cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Classification label persisted with the run record and exposed by the
    /// status API.
    pub fn class(&self) -> &'static str {
        match self {
            Self::TransientSource(_) => "transient",
            Self::PermanentSource(_) => "non_retriable_source",
            Self::Validation(_) => "validation",
            Self::StoreWrite(_) | Self::WarehouseWrite(_) | Self::GraphWrite(_) => {
                "downstream_store"
            }
            Self::Cancelled => "cancelled",
            Self::Config(_) => "config",
        }
    }
}

impl From<FetchError> for PipelineError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Transient(msg) => Self::TransientSource(msg),
            FetchError::Permanent(msg) => Self::PermanentSource(msg),
            FetchError::Validation(msg) => Self::Validation(msg),
        }
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        Self::WarehouseWrite(err.to_string())
    }
}

impl From<neo4rs::Error> for PipelineError {
    fn from(err: neo4rs::Error) -> Self {
        Self::GraphWrite(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_labels() {
        assert_eq!(PipelineError::TransientSource("x".into()).class(), "transient");
        assert_eq!(
            PipelineError::PermanentSource("x".into()).class(),
            "non_retriable_source"
        );
        assert_eq!(PipelineError::Validation("x".into()).class(), "validation");
        assert_eq!(PipelineError::StoreWrite("x".into()).class(), "downstream_store");
        assert_eq!(PipelineError::WarehouseWrite("x".into()).class(), "downstream_store");
        assert_eq!(PipelineError::GraphWrite("x".into()).class(), "downstream_store");
        assert_eq!(PipelineError::Cancelled.class(), "cancelled");
    }

    #[test]
    fn fetch_errors_map_onto_asset_errors() {
        let e: PipelineError = FetchError::Validation("missing code_bss".into()).into();
        assert!(matches!(e, PipelineError::Validation(_)));
        let e: PipelineError = FetchError::Transient("503".into()).into();
        assert!(matches!(e, PipelineError::TransientSource(_)));
    }
}
