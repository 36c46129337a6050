//! Hierarchy crawling on a rate-limited HTTP API
//!
//! This module provides:
//! - A request budget shared by every fetch (`rate_limit`)
//! - An HTTP client with bounded retry and exponential backoff (`client`)
//! - Child discovery inside index documents (`index`)
//! - A resumable depth-first walker over the entity hierarchy (`walker`)

mod client;
mod index;
mod rate_limit;
mod walker;

pub use client::*;
pub use index::*;
pub use rate_limit::*;
pub use walker::*;

use crate::audit::AuditKind;
use crate::config::ApiConfig;
use crate::models::EntityKind;
use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// Outcome of a fetch that did not yield a usable body.
///
/// URLs carried here never include the query string, so the API key
/// does not leak into logs or the audit table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("not found: {url}")]
    NotFound { url: String },

    #[error("transient failure after {attempts} attempt(s) on {url}: {reason}")]
    Transient {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("rate limit still exceeded after {attempts} attempt(s) on {url}")]
    RateLimitExceeded { url: String, attempts: u32 },

    #[error("malformed response from {url}: {reason}")]
    Malformed { url: String, reason: String },

    #[error("credentials rejected with HTTP {status} on {url}")]
    Unauthorized { url: String, status: u16 },

    #[error("request rejected with HTTP {status} on {url}")]
    Rejected { url: String, status: u16 },
}

impl FetchError {
    /// Errors that stop the whole walk instead of skipping one entity
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimitExceeded { .. } | FetchError::Unauthorized { .. }
        )
    }

    pub fn audit_kind(&self) -> AuditKind {
        match self {
            FetchError::NotFound { .. } => AuditKind::NotFound,
            FetchError::Transient { .. } => AuditKind::Transient,
            FetchError::RateLimitExceeded { .. } => AuditKind::RateLimited,
            FetchError::Malformed { .. } => AuditKind::Malformed,
            FetchError::Unauthorized { .. } => AuditKind::Unauthorized,
            FetchError::Rejected { .. } => AuditKind::Rejected,
        }
    }
}

/// Anything that can turn a URL into a response body
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> std::result::Result<Vec<u8>, FetchError>;
}

/// Resolves entity references to request URLs
#[derive(Debug, Clone)]
pub struct Endpoints {
    base_url: String,
    templates: crate::config::EndpointConfig,
    key_param: String,
    key: Option<String>,
}

impl Endpoints {
    /// Build from API settings. `key` is appended as a query parameter when present.
    pub fn new(api: &ApiConfig, key: Option<String>) -> Self {
        Self {
            base_url: api.base_url.trim_end_matches('/').to_string(),
            templates: api.endpoints.clone(),
            key_param: api.key_param.clone(),
            key,
        }
    }

    /// URL of the document describing an entity, or `None` when the kind
    /// has no configured endpoint
    pub fn url_for(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> std::result::Result<Option<Url>, url::ParseError> {
        let Some(template) = self.templates.template_for(kind) else {
            return Ok(None);
        };

        let rendered = template
            .replace("{base}", &self.base_url)
            .replace("{id}", &encode_segment(id)?);
        let mut url = Url::parse(&rendered)?;
        if let Some(key) = &self.key {
            url.query_pairs_mut().append_pair(&self.key_param, key);
        }
        Ok(Some(url))
    }
}

/// Percent-encode an id as one path segment (`/`, `?`, `#`, `%` and spaces escaped)
fn encode_segment(id: &str) -> std::result::Result<String, url::ParseError> {
    let mut scratch = Url::parse("http://segment.invalid/")?;
    scratch
        .path_segments_mut()
        .map_err(|()| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .push(id);
    Ok(scratch.path().trim_start_matches('/').to_string())
}

/// URL without its query string, safe to print
pub fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.set_fragment(None);
    shown.to_string()
}
