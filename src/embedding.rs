// ABOUTME: Resilient point-lookup client for the word-embedding service.
// ABOUTME: Retries transient failures with backoff and opens a circuit on repeated exhaustion.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::EmbeddingConfig;

/// A 3D position for an ingested word.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmbedPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {status}")]
    Status { status: u16 },
}

/// Raw point lookup against the embedding service. Returns the response
/// body on a 2xx status.
#[async_trait]
pub trait PointFetcher: Send + Sync {
    async fn fetch(&self, word: &str) -> Result<String, FetchError>;
}

/// Default fetcher: `GET {endpoint}/embed-word?word=<token>` with a hard
/// timeout. The timeout drops the in-flight request, so a response that
/// lands after cancellation can never be mistaken for success.
pub struct HttpPointFetcher {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpPointFetcher {
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl PointFetcher for HttpPointFetcher {
    async fn fetch(&self, word: &str) -> Result<String, FetchError> {
        let request = self
            .client
            .get(format!("{}/embed-word", self.endpoint))
            .query(&[("word", word)])
            .send();

        let response = match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(FetchError::Network(e.to_string())),
            Err(_) => return Err(FetchError::Timeout),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        match tokio::time::timeout(self.timeout, response.text()).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(e)) => Err(FetchError::Network(e.to_string())),
            Err(_) => Err(FetchError::Timeout),
        }
    }
}

/// Counters surfaced through `health_stats()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EmbeddingHealthStats {
    pub retries: u64,
    pub timeouts: u64,
    pub fallbacks: u64,
    pub circuit_opened: u64,
    pub circuit_short_circuits: u64,
    pub non_retryable_failures: u64,
    pub malformed_payloads: u64,
    pub recoveries: u64,
    pub successes: u64,
}

#[derive(Default)]
struct HealthCounters {
    retries: AtomicU64,
    timeouts: AtomicU64,
    fallbacks: AtomicU64,
    circuit_opened: AtomicU64,
    circuit_short_circuits: AtomicU64,
    non_retryable_failures: AtomicU64,
    malformed_payloads: AtomicU64,
    recoveries: AtomicU64,
    successes: AtomicU64,
}

struct CircuitState {
    failure_streak: u32,
    open_until: Option<Instant>,
}

enum AttemptFailure {
    Transient(String),
    NonRetryable(String),
}

/// Point lookups that degrade instead of failing: the caller always gets
/// either a validated point or `None`, never an error.
pub struct EmbeddingClient {
    fetcher: Arc<dyn PointFetcher>,
    retry_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
    failure_threshold: u32,
    circuit_open: Duration,
    state: Mutex<CircuitState>,
    health: HealthCounters,
}

impl EmbeddingClient {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let fetcher = Arc::new(HttpPointFetcher::new(
            &config.endpoint,
            Duration::from_millis(config.request_timeout_ms),
        ));
        Self::with_fetcher(config, fetcher)
    }

    pub fn with_fetcher(config: &EmbeddingConfig, fetcher: Arc<dyn PointFetcher>) -> Self {
        Self {
            fetcher,
            retry_attempts: config.retry_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            failure_threshold: config.failure_threshold.max(1),
            circuit_open: Duration::from_millis(config.circuit_open_ms),
            state: Mutex::new(CircuitState {
                failure_streak: 0,
                open_until: None,
            }),
            health: HealthCounters::default(),
        }
    }

    /// Look up the embedding point for a word. Returns `None` when the
    /// caller should fall back to a locally generated position.
    pub async fn lookup(&self, word: &str) -> Option<EmbedPoint> {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(open_until) = state.open_until {
                if Instant::now() < open_until {
                    self.health.circuit_short_circuits.fetch_add(1, Ordering::Relaxed);
                    self.health.fallbacks.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Embedding circuit open, skipping lookup for {word:?}");
                    return None;
                }
                // Cooldown elapsed, circuit auto-clears
                state.open_until = None;
            }
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(word).await {
                Ok(point) => {
                    self.record_success();
                    return Some(point);
                }
                Err(AttemptFailure::NonRetryable(reason)) => {
                    self.record_non_retryable(word, &reason);
                    return None;
                }
                Err(AttemptFailure::Transient(reason)) => {
                    if attempt >= self.retry_attempts {
                        self.record_exhausted(word, &reason);
                        return None;
                    }
                    self.health.retries.fetch_add(1, Ordering::Relaxed);
                    let delay = self.backoff_delay(attempt);
                    tracing::debug!(
                        "Embedding lookup for {word:?} failed ({reason}), retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    pub fn health_stats(&self) -> EmbeddingHealthStats {
        EmbeddingHealthStats {
            retries: self.health.retries.load(Ordering::Relaxed),
            timeouts: self.health.timeouts.load(Ordering::Relaxed),
            fallbacks: self.health.fallbacks.load(Ordering::Relaxed),
            circuit_opened: self.health.circuit_opened.load(Ordering::Relaxed),
            circuit_short_circuits: self.health.circuit_short_circuits.load(Ordering::Relaxed),
            non_retryable_failures: self.health.non_retryable_failures.load(Ordering::Relaxed),
            malformed_payloads: self.health.malformed_payloads.load(Ordering::Relaxed),
            recoveries: self.health.recoveries.load(Ordering::Relaxed),
            successes: self.health.successes.load(Ordering::Relaxed),
        }
    }

    async fn attempt(&self, word: &str) -> Result<EmbedPoint, AttemptFailure> {
        match self.fetcher.fetch(word).await {
            Ok(body) => parse_point(&body).map_err(|reason| {
                self.health.malformed_payloads.fetch_add(1, Ordering::Relaxed);
                AttemptFailure::NonRetryable(format!("malformed payload: {reason}"))
            }),
            Err(FetchError::Timeout) => {
                self.health.timeouts.fetch_add(1, Ordering::Relaxed);
                Err(AttemptFailure::Transient("timeout".to_string()))
            }
            Err(FetchError::Network(e)) => Err(AttemptFailure::Transient(e)),
            Err(FetchError::Status { status }) => {
                if status == 408 || status == 429 || (500..=599).contains(&status) {
                    Err(AttemptFailure::Transient(format!("HTTP {status}")))
                } else {
                    Err(AttemptFailure::NonRetryable(format!("HTTP {status}")))
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.backoff_max)
    }

    fn record_success(&self) {
        let mut state = self.state.lock().unwrap();
        if state.failure_streak > 0 {
            self.health.recoveries.fetch_add(1, Ordering::Relaxed);
        }
        state.failure_streak = 0;
        state.open_until = None;
        self.health.successes.fetch_add(1, Ordering::Relaxed);
    }

    // A bad request for one word says nothing about the service's health,
    // so it must not push the circuit toward opening.
    fn record_non_retryable(&self, word: &str, reason: &str) {
        let mut state = self.state.lock().unwrap();
        state.failure_streak = 0;
        self.health.non_retryable_failures.fetch_add(1, Ordering::Relaxed);
        self.health.fallbacks.fetch_add(1, Ordering::Relaxed);
        tracing::warn!("Embedding lookup for {word:?} failed permanently: {reason}");
    }

    fn record_exhausted(&self, word: &str, reason: &str) {
        let mut state = self.state.lock().unwrap();
        state.failure_streak += 1;
        if state.failure_streak >= self.failure_threshold {
            state.open_until = Some(Instant::now() + self.circuit_open);
            self.health.circuit_opened.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                "Embedding circuit opened after {} consecutive failures",
                state.failure_streak
            );
        }
        self.health.fallbacks.fetch_add(1, Ordering::Relaxed);
        tracing::warn!("Embedding lookup for {word:?} exhausted retries: {reason}");
    }
}

/// Parse and strictly validate an embedding response body. Coordinates may
/// be numbers or numeric strings; null, empty, missing, or non-finite
/// values reject the whole payload.
fn parse_point(body: &str) -> Result<EmbedPoint, String> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| format!("invalid JSON: {e}"))?;
    let object = value.as_object().ok_or("not a JSON object")?;
    let x = coordinate(object.get("x")).ok_or("bad x coordinate")?;
    let y = coordinate(object.get("y")).ok_or("bad y coordinate")?;
    let z = coordinate(object.get("z")).ok_or("bad z coordinate")?;
    Ok(EmbedPoint { x, y, z })
}

fn coordinate(value: Option<&serde_json::Value>) -> Option<f64> {
    let parsed = match value? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) if !s.trim().is_empty() => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}
