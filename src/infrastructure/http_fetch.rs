//! HTTP-fetch extraction driver
//!
//! Implements the driver seam over `reqwest`: a "browser" is one client
//! with its own cookie jar, a "context" is one request-scoped view carrying
//! the credential header snapshot it was opened with. Request pacing is
//! shared across all workers because the rate limit is account-wide, not
//! per-connection.
//!
//! Expected depth payload shape:
//!
//! ```json
//! {
//!   "data": {
//!     "bid":   [{"price": "10.050", "volume": "1.500"}, ...],
//!     "offer": [{"price": "10.075", "volume": "900"}, ...],
//!     "unix_time": 1724390400000
//!   }
//! }
//! ```
//!
//! Figures arrive either as numbers or as strings with thousand separators
//! in the exchange's local format ("10.050" means 10050). Level rank is
//! the 1-based array position.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::{DepthLevel, Instrument, OrderBookSnapshot, Side};
use crate::harvesting::driver::{BrowserHandle, BrowserLauncher, ContextOptions, ExtractionContext};
use crate::harvesting::error::ExtractError;
use crate::harvesting::pacing::RequestPacer;

/// Default User-Agent for depth requests
const DEFAULT_USER_AGENT: &str = concat!("depth-harvest/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct HttpFetchSettings {
    /// Depth endpoint with a `{code}` placeholder for the instrument
    pub depth_endpoint: String,

    /// Bound on one fetch including connect time
    pub page_timeout: Duration,

    pub user_agent: String,
}

impl HttpFetchSettings {
    #[must_use]
    pub fn new(depth_endpoint: impl Into<String>, page_timeout: Duration) -> Self {
        Self {
            depth_endpoint: depth_endpoint.into(),
            page_timeout,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Launches one HTTP-fetch "browser" per worker
pub struct HttpFetchLauncher {
    settings: HttpFetchSettings,
    pacer: Arc<RequestPacer>,
}

impl HttpFetchLauncher {
    #[must_use]
    pub fn new(settings: HttpFetchSettings, pacer: Arc<RequestPacer>) -> Self {
        Self { settings, pacer }
    }
}

#[async_trait]
impl BrowserLauncher for HttpFetchLauncher {
    async fn launch(&self, worker_id: usize) -> Result<Arc<dyn BrowserHandle>, ExtractError> {
        let client = Client::builder()
            .timeout(self.settings.page_timeout)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .user_agent(&self.settings.user_agent)
            .build()
            .map_err(|e| ExtractError::WorkerFatal(format!("failed to build HTTP client: {e}")))?;

        info!("🌐 worker {} HTTP-fetch client ready", worker_id);
        Ok(Arc::new(HttpFetchBrowser {
            client,
            depth_endpoint: self.settings.depth_endpoint.clone(),
            pacer: Arc::clone(&self.pacer),
        }))
    }
}

struct HttpFetchBrowser {
    client: Client,
    depth_endpoint: String,
    pacer: Arc<RequestPacer>,
}

#[async_trait]
impl BrowserHandle for HttpFetchBrowser {
    async fn new_context(
        &self,
        options: ContextOptions,
    ) -> Result<Box<dyn ExtractionContext>, ExtractError> {
        // Snapshot the credential headers once; the context never sees a
        // renewed credential mid-attempt.
        let mut headers = HeaderMap::new();
        for (name, value) in &options.credential.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(header_name), Ok(header_value)) => {
                    headers.insert(header_name, header_value);
                }
                _ => warn!("skipping credential header with invalid name or value: {}", name),
            }
        }

        Ok(Box::new(HttpFetchContext {
            client: self.client.clone(),
            depth_endpoint: self.depth_endpoint.clone(),
            pacer: Arc::clone(&self.pacer),
            headers,
            last_payload: None,
        }))
    }

    async fn shutdown(&self) -> Result<(), ExtractError> {
        // reqwest clients release their connections on drop
        Ok(())
    }
}

struct HttpFetchContext {
    client: Client,
    depth_endpoint: String,
    pacer: Arc<RequestPacer>,
    headers: HeaderMap,
    last_payload: Option<Value>,
}

#[async_trait]
impl ExtractionContext for HttpFetchContext {
    async fn extract(&mut self, instrument: &Instrument) -> Result<OrderBookSnapshot, ExtractError> {
        let url = depth_url(&self.depth_endpoint, instrument.code())?;

        self.pacer.pace().await;
        debug!("fetching depth for {}: {}", instrument, url);

        let response = self
            .client
            .get(url)
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(|e| classify_fetch_error(&e))?;

        classify_status(response.status())?;

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ExtractError::TransientNavigation(format!("depth payload not readable: {e}")))?;
        self.last_payload = Some(payload.clone());

        parse_depth_payload(&payload, instrument)
    }

    async fn reload(&mut self) -> Result<(), ExtractError> {
        // Stateless driver: the next extract call refetches from scratch
        Ok(())
    }

    async fn capture_artifact(&mut self, dir: &Path, stem: &str) -> Result<PathBuf, ExtractError> {
        let path = dir.join(format!("{stem}.json"));
        let body = match &self.last_payload {
            Some(payload) => serde_json::to_string_pretty(payload)
                .unwrap_or_else(|_| r#"{"note":"payload not serializable"}"#.to_string()),
            None => r#"{"note":"no payload captured"}"#.to_string(),
        };

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ExtractError::TransientNavigation(format!("artifact dir failed: {e}")))?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| ExtractError::TransientNavigation(format!("artifact write failed: {e}")))?;

        Ok(path)
    }

    async fn close(&mut self) {
        self.last_payload = None;
    }
}

/// A misconfigured endpoint can never succeed, so it fails the worker
/// instead of burning every instrument's retry budget
fn depth_url(endpoint: &str, code: &str) -> Result<Url, ExtractError> {
    let target = endpoint.replace("{code}", code);
    Url::parse(&target)
        .map_err(|e| ExtractError::WorkerFatal(format!("bad depth endpoint {target}: {e}")))
}

fn classify_fetch_error(error: &reqwest::Error) -> ExtractError {
    if error.is_builder() {
        return ExtractError::WorkerFatal(format!("request construction failed: {error}"));
    }
    // Timeouts, connect failures, and body errors are all transient here
    ExtractError::TransientNavigation(format!("fetch failed: {error}"))
}

fn classify_status(status: StatusCode) -> Result<(), ExtractError> {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ExtractError::AuthExpired(
            format!("status {status} from depth endpoint"),
        )),
        StatusCode::TOO_MANY_REQUESTS => Err(ExtractError::RateLimited(format!(
            "status {status} from depth endpoint"
        ))),
        s if s.is_server_error() => Err(ExtractError::TransientNavigation(format!(
            "status {s} from depth endpoint"
        ))),
        s if !s.is_success() => Err(ExtractError::TransientNavigation(format!(
            "unexpected status {s} from depth endpoint"
        ))),
        _ => Ok(()),
    }
}

fn parse_depth_payload(payload: &Value, instrument: &Instrument) -> Result<OrderBookSnapshot, ExtractError> {
    let data = payload.get("data").ok_or_else(|| {
        ExtractError::TransientNavigation("depth payload missing data envelope".to_string())
    })?;

    let captured_at = data
        .get("unix_time")
        .and_then(Value::as_i64)
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);

    let mut levels = Vec::new();
    collect_side(data.get("bid"), Side::Bid, &mut levels);
    collect_side(data.get("offer"), Side::Ask, &mut levels);

    // An empty ladder is a valid snapshot; the retry layer decides what
    // to make of it.
    Ok(OrderBookSnapshot::new(instrument.clone(), captured_at, levels))
}

fn collect_side(entries: Option<&Value>, side: Side, levels: &mut Vec<DepthLevel>) {
    let Some(entries) = entries.and_then(Value::as_array) else {
        return;
    };
    for (index, entry) in entries.iter().enumerate() {
        let price = entry.get("price").and_then(parse_figure);
        let size = entry.get("volume").and_then(parse_figure);
        // Placeholder rows in a sparse ladder carry neither figure
        if price.is_none() && size.is_none() {
            continue;
        }
        levels.push(DepthLevel {
            side,
            rank: index as u32 + 1,
            price,
            size,
        });
    }
}

/// Parses a depth figure that may arrive as a number or a separator-laden
/// string ("10.050" or "1,500" both mean the plain integer)
fn parse_figure(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '-')
                .collect();
            if cleaned.is_empty() || cleaned == "-" {
                None
            } else {
                cleaned.parse().ok()
            }
        }
        _ => None,
    }
}
