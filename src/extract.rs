//! Extraction of raw collections from the source REST API.
//!
//! The orchestrator depends only on the [`Extractor`] trait, which returns
//! the raw JSON records of one collection or an [`ExtractError`]. Retries are
//! internal to the extractor and invisible to the run state.
//!
//! # Retry Strategy
//!
//! [`HttpExtractor`] makes up to `api.retries` attempts per request:
//! - network errors, timeouts, HTTP 429 and 5xx → retry
//! - other HTTP 4xx → fail immediately
//! - a body that is not a JSON array → fail immediately
//! - a paginated collection still full at `api.max_pages` → fail, nothing is truncated
//! - backoff before attempt n+1 is `backoff_ms * 2^(n-1)`

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ApiConfig;
use crate::error::{ExtractError, PipelineError};
use crate::models::EntityKind;

/// Source of raw records for one entity type.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn fetch(&self, kind: EntityKind) -> Result<Vec<Value>, ExtractError>;
}

/// Raw payloads of one run, one vector per collection.
#[derive(Debug, Clone, Default)]
pub struct RawExtract {
    pub users: Vec<Value>,
    pub posts: Vec<Value>,
    pub comments: Vec<Value>,
}

impl RawExtract {
    pub fn get(&self, kind: EntityKind) -> &[Value] {
        match kind {
            EntityKind::Users => &self.users,
            EntityKind::Posts => &self.posts,
            EntityKind::Comments => &self.comments,
        }
    }

    pub fn total(&self) -> usize {
        self.users.len() + self.posts.len() + self.comments.len()
    }
}

/// Fetches every collection, one in-flight fetch per entity type.
///
/// The first failure wins; the other fetches are dropped.
pub async fn extract_all(extractor: &dyn Extractor) -> Result<RawExtract, PipelineError> {
    let fetch = |kind: EntityKind| async move {
        extractor
            .fetch(kind)
            .await
            .map_err(|source| PipelineError::Extraction { kind, source })
    };

    let (users, posts, comments) = tokio::try_join!(
        fetch(EntityKind::Users),
        fetch(EntityKind::Posts),
        fetch(EntityKind::Comments)
    )?;

    Ok(RawExtract {
        users,
        posts,
        comments,
    })
}

/// Extractor backed by a JSONPlaceholder-style REST API.
pub struct HttpExtractor {
    client: reqwest::Client,
    config: ApiConfig,
}

impl HttpExtractor {
    pub fn new(config: &ApiConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn collection_url(&self, kind: EntityKind) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), kind)
    }

    /// GET one URL with retry/backoff and decode it as a JSON array.
    async fn get_array(&self, url: &str) -> Result<Vec<Value>, ExtractError> {
        let mut last_err = None;

        for attempt in 0..self.config.retries {
            if attempt > 0 {
                let delay = self.config.backoff_ms << (attempt - 1).min(10);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            debug!(url, attempt = attempt + 1, "requesting");

            match self.try_get(url).await {
                Ok(records) => return Ok(records),
                Err(e) if e.is_retryable() => {
                    warn!(url, attempt = attempt + 1, error = %e, "request failed, will retry");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| ExtractError::Network {
            url: url.to_string(),
            message: "no attempts made".to_string(),
        }))
    }

    async fn try_get(&self, url: &str) -> Result<Vec<Value>, ExtractError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| classify_reqwest_error(url, e))?;

        match body {
            Value::Array(records) => Ok(records),
            other => Err(ExtractError::Decode {
                url: url.to_string(),
                message: format!("expected a JSON array, got {}", json_type_name(&other)),
            }),
        }
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn fetch(&self, kind: EntityKind) -> Result<Vec<Value>, ExtractError> {
        let base = self.collection_url(kind);

        let Some(page_size) = self.config.page_size else {
            let records = self.get_array(&base).await?;
            info!(%kind, records = records.len(), "extracted collection");
            return Ok(records);
        };

        let mut records = Vec::new();
        let mut exhausted = false;
        for page in 1..=self.config.max_pages {
            let url = format!("{}?_page={}&_limit={}", base, page, page_size);
            let batch = self.get_array(&url).await?;
            let short_page = batch.len() < page_size;
            records.extend(batch);
            if short_page {
                exhausted = true;
                break;
            }
        }

        // A full last page means the collection may go on; never load a prefix.
        if !exhausted {
            return Err(ExtractError::PageLimit {
                url: base,
                max_pages: self.config.max_pages,
            });
        }

        info!(%kind, records = records.len(), "extracted paginated collection");
        Ok(records)
    }
}

fn classify_reqwest_error(url: &str, e: reqwest::Error) -> ExtractError {
    if e.is_timeout() {
        ExtractError::Timeout {
            url: url.to_string(),
        }
    } else if e.is_decode() {
        ExtractError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        }
    } else {
        ExtractError::Network {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedExtractor;

    #[async_trait]
    impl Extractor for FixedExtractor {
        async fn fetch(&self, kind: EntityKind) -> Result<Vec<Value>, ExtractError> {
            match kind {
                EntityKind::Users => Ok(vec![json!({"id": 1})]),
                EntityKind::Posts => Ok(vec![json!({"id": 1}), json!({"id": 2})]),
                EntityKind::Comments => Err(ExtractError::HttpStatus {
                    url: "http://test/comments".to_string(),
                    status: 503,
                }),
            }
        }
    }

    #[tokio::test]
    async fn extract_all_reports_failing_kind() {
        let err = extract_all(&FixedExtractor).await.unwrap_err();
        match err {
            PipelineError::Extraction { kind, source } => {
                assert_eq!(kind, EntityKind::Comments);
                assert!(matches!(source, ExtractError::HttpStatus { status: 503, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn collection_url_trims_trailing_slash() {
        let config = ApiConfig {
            base_url: "http://localhost:9999/".to_string(),
            ..ApiConfig::default()
        };
        let extractor = HttpExtractor::new(&config).unwrap();
        assert_eq!(
            extractor.collection_url(EntityKind::Comments),
            "http://localhost:9999/comments"
        );
    }
}
