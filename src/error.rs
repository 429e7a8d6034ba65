//! Error taxonomy for the pipeline stages.
//!
//! Record rejections are not errors; see [`crate::transform::Rejection`].

use std::path::PathBuf;
use thiserror::Error;

use crate::models::EntityKind;

/// Failure of the extraction collaborator after its retries are exhausted.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("network error requesting {url}: {message}")]
    Network { url: String, message: String },
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },
    #[error("unexpected payload from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("{url} still had full pages after {max_pages} pages")]
    PageLimit { url: String, max_pages: usize },
}

impl ExtractError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExtractError::Network { .. } | ExtractError::Timeout { .. } => true,
            ExtractError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            ExtractError::Decode { .. } | ExtractError::PageLimit { .. } => false,
        }
    }
}

/// Raw or processed partition write failure.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON encoding failed for {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("building record batch for {kind}: {source}")]
    Arrow {
        kind: EntityKind,
        #[source]
        source: arrow_schema::ArrowError,
    },
    #[error("writing parquet file {path}: {source}")]
    Parquet {
        path: PathBuf,
        #[source]
        source: parquet::errors::ParquetError,
    },
}

/// A failure that ends a run with status `failed`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("extraction of {kind} failed: {source}")]
    Extraction {
        kind: EntityKind,
        #[source]
        source: ExtractError,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Relational store failure during the load transaction, message kept verbatim.
    #[error("{0}")]
    Load(#[from] sqlx::Error),
}

impl PipelineError {
    /// Stage name recorded in a failed run's metadata.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Extraction { .. } => "extract",
            PipelineError::Storage(_) => "storage",
            PipelineError::Load(_) => "load",
        }
    }
}

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("analytics query failed: {0}")]
    Query(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report not found: {0}")]
    NotFound(String),
    #[error("report I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("report JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("report CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("malformed report {path}: {message}")]
    Malformed { path: PathBuf, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        let url = "http://x/users".to_string();
        assert!(ExtractError::Timeout { url: url.clone() }.is_retryable());
        assert!(ExtractError::HttpStatus { url: url.clone(), status: 503 }.is_retryable());
        assert!(ExtractError::HttpStatus { url: url.clone(), status: 429 }.is_retryable());
        assert!(!ExtractError::HttpStatus { url: url.clone(), status: 404 }.is_retryable());
        assert!(!ExtractError::Decode { url, message: "x".into() }.is_retryable());
    }
}
