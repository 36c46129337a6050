//! Rate-limited HTTP client with bounded retries

use super::{redact, Backoff, FetchError, Fetcher, RequestBudget};
use crate::config::{ApiConfig, RateLimitConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// What one attempt produced
enum Attempt {
    Body(Vec<u8>),
    Throttled(Option<Duration>),
    Retry(String),
    Fail(FetchError),
}

/// HTTP client that spends from a shared [`RequestBudget`] on every attempt.
///
/// Throttling (429) is retried with exponential backoff, honouring
/// `Retry-After` when present. Server errors, timeouts and connection
/// failures are retried the same way. After `max_retries` retries the
/// failure is returned to the caller.
pub struct RateLimitedClient {
    client: Client,
    budget: RequestBudget,
    backoff: Backoff,
    max_retries: u32,
    requests: AtomicU64,
}

impl RateLimitedClient {
    pub fn new(api: &ApiConfig, limits: &RateLimitConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&api.user_agent)
            .timeout(Duration::from_secs(api.timeout_secs))
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            budget: RequestBudget::new(limits.requests_per_window, limits.window()),
            backoff: Backoff::new(
                Duration::from_millis(limits.backoff_base_ms),
                Duration::from_millis(limits.backoff_max_ms),
            ),
            max_retries: limits.max_retries,
            requests: AtomicU64::new(0),
        })
    }

    /// Requests sent so far, retries included
    pub fn requests_issued(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    async fn attempt(&self, url: &Url, shown: &str) -> Attempt {
        self.budget.wait().await;
        self.requests.fetch_add(1, Ordering::Relaxed);

        let response = match self.client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) => return Attempt::Retry(describe(&e)),
        };

        let status = response.status();
        match status {
            s if s.is_success() => read_body(response, shown).await,
            StatusCode::TOO_MANY_REQUESTS => Attempt::Throttled(retry_after(&response)),
            StatusCode::NOT_FOUND | StatusCode::GONE => Attempt::Fail(FetchError::NotFound {
                url: shown.to_string(),
            }),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Attempt::Fail(FetchError::Unauthorized {
                    url: shown.to_string(),
                    status: status.as_u16(),
                })
            }
            StatusCode::REQUEST_TIMEOUT => Attempt::Retry(format!("HTTP {}", status.as_u16())),
            s if s.is_server_error() => Attempt::Retry(format!("HTTP {}", s.as_u16())),
            s => Attempt::Fail(FetchError::Rejected {
                url: shown.to_string(),
                status: s.as_u16(),
            }),
        }
    }
}

#[async_trait]
impl Fetcher for RateLimitedClient {
    async fn fetch(&self, url: &Url) -> std::result::Result<Vec<u8>, FetchError> {
        let shown = redact(url);
        let mut retries = 0u32;

        loop {
            debug!("GET {} (attempt {})", shown, retries + 1);

            let delay = match self.attempt(url, &shown).await {
                Attempt::Body(body) => return Ok(body),
                Attempt::Fail(err) => return Err(err),
                Attempt::Throttled(requested) => {
                    if retries >= self.max_retries {
                        return Err(FetchError::RateLimitExceeded {
                            url: shown,
                            attempts: retries + 1,
                        });
                    }
                    let delay = requested
                        .map(|d| self.backoff.clamp(d))
                        .unwrap_or_else(|| self.backoff.delay(retries));
                    warn!("Throttled on {}, backing off {:?}", shown, delay);
                    delay
                }
                Attempt::Retry(reason) => {
                    if retries >= self.max_retries {
                        return Err(FetchError::Transient {
                            url: shown,
                            attempts: retries + 1,
                            reason,
                        });
                    }
                    let delay = self.backoff.delay(retries);
                    warn!("{} on {}, retrying in {:?}", reason, shown, delay);
                    delay
                }
            };

            tokio::time::sleep(delay).await;
            retries += 1;
        }
    }
}

async fn read_body(response: Response, shown: &str) -> Attempt {
    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => return Attempt::Retry(describe(&e)),
    };

    match ensure_well_formed(&bytes) {
        Ok(()) => Attempt::Body(bytes.to_vec()),
        Err(reason) => Attempt::Fail(FetchError::Malformed {
            url: shown.to_string(),
            reason,
        }),
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// reqwest errors embed the full URL; keep only the failure class
fn describe(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "timeout".to_string()
    } else if error.is_connect() {
        "connection failed".to_string()
    } else if error.is_body() || error.is_decode() {
        "response body interrupted".to_string()
    } else {
        "request failed".to_string()
    }
}

/// Check that a body is a complete XML document with a root element
pub fn ensure_well_formed(bytes: &[u8]) -> std::result::Result<(), String> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut saw_root = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(_)) => {
                depth += 1;
                saw_root = true;
            }
            Ok(Event::Empty(_)) => saw_root = true,
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(format!(
                    "invalid XML at byte {}: {}",
                    reader.buffer_position(),
                    e
                ))
            }
        }
        buf.clear();
    }

    if !saw_root {
        return Err("no root element".to_string());
    }
    if depth != 0 {
        return Err(format!("document truncated with {} unclosed element(s)", depth));
    }
    Ok(())
}
