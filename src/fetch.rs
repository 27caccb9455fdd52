use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;
use utoipa::ToSchema;

use crate::strategy::{HeaderProfile, StrategyDescriptor, StrategyId, StrategyKind};

static SNAPSHOT_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://(web\.archive\.org/web/\d{1,14})(?:[a-z]{2}_)?/").unwrap()
});

// ============================================================================
// Outbound transport
// ============================================================================

/// What the executor needs to know about an upstream response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub final_url: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{0}")]
    Other(String),
}

/// A single outbound GET. Redirects are followed by the implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, profile: &HeaderProfile) -> Result<RawResponse, TransportError>;
}

#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, profile: &HeaderProfile) -> Result<RawResponse, TransportError> {
        let mut request = self.client.get(url);
        for (name, value) in profile.headers() {
            request = request.header(name, value);
        }

        let resp = request.send().await?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let final_url = resp.url().to_string();
        let body = resp.text().await?;

        Ok(RawResponse {
            status,
            content_type,
            final_url,
            body,
        })
    }
}

// ============================================================================
// Attempt results
// ============================================================================

/// Why a single strategy attempt did not produce a usable document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptFailure {
    #[error("timeout")]
    Timeout,
    #[error("bad-status: {0}")]
    Status(u16),
    #[error("unsupported-content-type: {0}")]
    ContentType(String),
    #[error("empty-body")]
    EmptyBody { length: usize, minimum: usize },
    #[error("no-snapshot")]
    NoSnapshot,
    #[error("snapshot-lookup: {0}")]
    Lookup(String),
    #[error("invalid-url: {0}")]
    InvalidUrl(String),
    #[error("transport: {0}")]
    Transport(String),
}

/// Outcome of one strategy attempt. Never escapes a single chain run.
#[derive(Debug, Clone)]
pub struct FetchAttemptResult {
    pub strategy: StrategyId,
    pub ok: bool,
    pub html: Option<String>,
    pub status_code: Option<u16>,
    pub error: Option<AttemptFailure>,
    /// URL the document should be rebased against.
    pub source_url: Option<String>,
    pub elapsed_ms: u64,
}

impl FetchAttemptResult {
    pub fn success(strategy: StrategyId, html: String, status: u16, source_url: String) -> Self {
        Self {
            strategy,
            ok: true,
            html: Some(html),
            status_code: Some(status),
            error: None,
            source_url: Some(source_url),
            elapsed_ms: 0,
        }
    }

    pub fn failure(strategy: StrategyId, error: AttemptFailure, status: Option<u16>) -> Self {
        Self {
            strategy,
            ok: false,
            html: None,
            status_code: status,
            error: Some(error),
            source_url: None,
            elapsed_ms: 0,
        }
    }

    pub fn trace(&self) -> AttemptTrace {
        AttemptTrace {
            strategy: self.strategy,
            ok: self.ok,
            status_code: self.status_code,
            error: self.error.as_ref().map(ToString::to_string),
            elapsed_ms: self.elapsed_ms,
        }
    }
}

/// Html-free summary of an attempt, kept on the final outcome.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttemptTrace {
    pub strategy: StrategyId,
    pub ok: bool,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

// ============================================================================
// Executor
// ============================================================================

/// Runs one strategy against a target. Failures come back as values.
#[async_trait]
pub trait StrategyExecutor: Send + Sync {
    async fn execute(&self, descriptor: &StrategyDescriptor, target_url: &str) -> FetchAttemptResult;
}

pub struct HttpExecutor<T> {
    transport: T,
}

impl<T: Transport> HttpExecutor<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    async fn run(&self, descriptor: &StrategyDescriptor, target_url: &str) -> FetchAttemptResult {
        let target = match parse_target(target_url) {
            Ok(url) => url,
            Err(failure) => return FetchAttemptResult::failure(descriptor.id, failure, None),
        };

        match &descriptor.kind {
            StrategyKind::Direct => {
                match self.transport.get(target.as_str(), &descriptor.header_profile).await {
                    Ok(resp) => {
                        let source = resp.final_url.clone();
                        classify(descriptor, resp, source)
                    }
                    Err(e) => transport_failure(descriptor.id, e),
                }
            }
            StrategyKind::Archival { lookup_url } => {
                self.run_archival(descriptor, lookup_url, &target).await
            }
        }
    }

    async fn run_archival(
        &self,
        descriptor: &StrategyDescriptor,
        lookup_url: &str,
        target: &Url,
    ) -> FetchAttemptResult {
        let lookup = format!("{}?url={}", lookup_url, urlencoding::encode(target.as_str()));
        let resp = match self.transport.get(&lookup, &descriptor.header_profile).await {
            Ok(resp) => resp,
            Err(e) => {
                return FetchAttemptResult::failure(descriptor.id, AttemptFailure::Lookup(e.to_string()), None)
            }
        };
        if !(200..300).contains(&resp.status) {
            return FetchAttemptResult::failure(
                descriptor.id,
                AttemptFailure::Lookup(format!("status {}", resp.status)),
                Some(resp.status),
            );
        }

        let Some(snapshot_url) = closest_snapshot(&resp.body) else {
            return FetchAttemptResult::failure(descriptor.id, AttemptFailure::NoSnapshot, None);
        };
        debug!(strategy = ?descriptor.id, snapshot = %snapshot_url, "Fetching archived snapshot");

        match self.transport.get(&snapshot_url, &descriptor.header_profile).await {
            // Archived pages rebase against the live site, not the archive host.
            Ok(resp) => classify(descriptor, resp, target.to_string()),
            Err(e) => transport_failure(descriptor.id, e),
        }
    }
}

#[async_trait]
impl<T: Transport> StrategyExecutor for HttpExecutor<T> {
    async fn execute(&self, descriptor: &StrategyDescriptor, target_url: &str) -> FetchAttemptResult {
        let started = Instant::now();
        let mut result = match tokio::time::timeout(descriptor.timeout, self.run(descriptor, target_url)).await {
            Ok(result) => result,
            Err(_) => FetchAttemptResult::failure(descriptor.id, AttemptFailure::Timeout, None),
        };
        result.elapsed_ms = started.elapsed().as_millis() as u64;
        result
    }
}

fn parse_target(target_url: &str) -> Result<Url, AttemptFailure> {
    let url = Url::parse(target_url.trim()).map_err(|e| AttemptFailure::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        other => Err(AttemptFailure::InvalidUrl(format!("unsupported scheme {}", other))),
    }
}

fn transport_failure(strategy: StrategyId, error: TransportError) -> FetchAttemptResult {
    FetchAttemptResult::failure(strategy, AttemptFailure::Transport(error.to_string()), None)
}

/// Applies status, content-type and body-length gates to a response.
fn classify(descriptor: &StrategyDescriptor, resp: RawResponse, source_url: String) -> FetchAttemptResult {
    let status = resp.status;
    if !(200..400).contains(&status) {
        return FetchAttemptResult::failure(descriptor.id, AttemptFailure::Status(status), Some(status));
    }

    // A missing content-type is let through; the body gate still applies.
    if let Some(content_type) = resp.content_type.as_deref() {
        if !descriptor.accepts_content_type(content_type) {
            return FetchAttemptResult::failure(
                descriptor.id,
                AttemptFailure::ContentType(content_type.to_string()),
                Some(status),
            );
        }
    }

    let body = resp.body.trim();
    if body.len() < descriptor.min_acceptable_body_length {
        return FetchAttemptResult::failure(
            descriptor.id,
            AttemptFailure::EmptyBody {
                length: body.len(),
                minimum: descriptor.min_acceptable_body_length,
            },
            Some(status),
        );
    }

    FetchAttemptResult::success(descriptor.id, body.to_string(), status, source_url)
}

#[derive(Debug, Deserialize)]
struct AvailabilityResponse {
    #[serde(default)]
    archived_snapshots: ArchivedSnapshots,
}

#[derive(Debug, Default, Deserialize)]
struct ArchivedSnapshots {
    closest: Option<ClosestSnapshot>,
}

#[derive(Debug, Deserialize)]
struct ClosestSnapshot {
    #[serde(default)]
    available: bool,
    #[serde(default)]
    url: String,
}

/// Extracts the closest available snapshot URL from a lookup response body.
fn closest_snapshot(body: &str) -> Option<String> {
    let parsed: AvailabilityResponse = serde_json::from_str(body).ok()?;
    let closest = parsed.archived_snapshots.closest?;
    if !closest.available || closest.url.is_empty() {
        return None;
    }
    Some(raw_snapshot_url(&closest.url))
}

/// Switches a snapshot URL to raw-capture mode (`id_`) over https so the
/// archive serves the page without its playback toolbar.
fn raw_snapshot_url(url: &str) -> String {
    SNAPSHOT_PREFIX
        .replace(url, "https://${1}id_/")
        .into_owned()
}
