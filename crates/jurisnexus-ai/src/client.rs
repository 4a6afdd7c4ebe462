//! Per-tier model client.
//!
//! Wraps one backend with a timeout and retry policy, a response cache, and
//! mock-mode substitution. [`ModelClient::invoke`] never fails: whatever
//! happens is folded into the returned [`ModelCallRecord`], and the caller
//! decides what a given status means for the pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use jurisnexus_core::{CallStatus, CoreError, ModelCallRecord, TaskType, Tier, TierConfig};
use tracing::{debug, info, warn};

use crate::CallError;
use crate::backend::{ModelBackend, ModelRequest};
use crate::cache::ResponseCache;
use crate::http::HttpBackend;
use crate::mock::MockBackend;

/// Timeout and retry settings for one tier.
///
/// `timeout` bounds each attempt, not the call as a whole: a call that keeps
/// timing out takes up to `(max_retries + 1) * timeout` plus the backoff
/// delays before it gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Bound on each attempt.
    pub timeout: Duration,
    /// Retransmissions after the first attempt.
    pub max_retries: u32,
    /// Delay before retry `n` (0-based) is `backoff_base * 2^n`.
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &TierConfig) -> Self {
        Self {
            timeout: Duration::from_millis(cfg.timeout_ms),
            max_retries: cfg.max_retries,
            backoff_base: Duration::from_millis(cfg.backoff_base_ms),
        }
    }

    fn backoff(&self, retry: u32) -> Duration {
        self.backoff_base.saturating_mul(1 << retry.min(16))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&TierConfig::default())
    }
}

/// Per-call overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvokeOptions {
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub bypass_cache: bool,
}

/// Once `failure_threshold` consecutive calls fail, the client forces itself
/// into mock mode and stops calling the backend. It stays there until
/// [`ModelClient::set_mock`] is called; nothing retries the live backend
/// on its own.
pub struct ModelClient {
    tier: Tier,
    backend: Arc<dyn ModelBackend>,
    policy: RetryPolicy,
    configured_mock: AtomicBool,
    forced_mock: AtomicBool,
    consecutive_failures: AtomicU32,
    /// `0` never forces mock mode.
    failure_threshold: u32,
    max_tokens: u32,
    temperature: f32,
    cache: Option<ResponseCache>,
}

impl ModelClient {
    pub fn new(tier: Tier, backend: Arc<dyn ModelBackend>, policy: RetryPolicy) -> Self {
        Self {
            tier,
            backend,
            policy,
            configured_mock: AtomicBool::new(false),
            forced_mock: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            failure_threshold: 0,
            max_tokens: 4_096,
            temperature: 0.3,
            cache: None,
        }
    }

    /// A client that only ever answers from the deterministic stub.
    pub fn mocked(tier: Tier) -> Self {
        Self::new(tier, Arc::new(MockBackend), RetryPolicy::default()).with_mock(true)
    }

    /// Build a client from configuration. Live tiers need an endpoint and a key.
    pub fn from_config(
        tier: Tier,
        cfg: &TierConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, CoreError> {
        let backend: Arc<dyn ModelBackend> = if cfg.mock {
            info!(%tier, "model client in mock mode");
            Arc::new(MockBackend)
        } else {
            Arc::new(HttpBackend::from_config(tier, cfg, env)?)
        };
        let mut client = Self::new(tier, backend, RetryPolicy::from_config(cfg))
            .with_mock(cfg.mock)
            .with_failure_threshold(cfg.failure_threshold);
        client.max_tokens = cfg.max_tokens;
        client.temperature = cfg.temperature;
        if cfg.cache_enabled {
            client = client.with_cache(Duration::from_secs(cfg.cache_ttl_secs));
        }
        Ok(client)
    }

    pub fn with_mock(self, mock: bool) -> Self {
        self.configured_mock.store(mock, Ordering::Release);
        self
    }

    /// Switch mock mode at runtime. Either way the failure streak is reset
    /// and any mock mode forced by repeated failures is lifted, so turning
    /// mock off retries the live backend. A client whose backend is itself
    /// the stub stays simulated.
    pub fn set_mock(&self, mock: bool) {
        self.configured_mock.store(mock, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        let was_forced = self.forced_mock.swap(false, Ordering::AcqRel);
        info!(
            tier = %self.tier,
            mock,
            was_forced,
            simulated = self.is_simulated(),
            "mock mode updated"
        );
    }

    /// Whether repeated failures have forced this client into mock mode.
    pub fn is_forced_mock(&self) -> bool {
        self.forced_mock.load(Ordering::Acquire)
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_cache(mut self, ttl: Duration) -> Self {
        self.cache = Some(ResponseCache::new(ttl));
        self
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// `true` when calls are answered by the stub, whether configured or forced.
    pub fn is_simulated(&self) -> bool {
        self.configured_mock.load(Ordering::Acquire)
            || self.backend.is_simulated()
            || self.forced_mock.load(Ordering::Acquire)
    }

    /// A request carrying this client's generation parameters.
    pub fn request(&self, prompt: impl Into<String>, task_type: TaskType) -> ModelRequest {
        let mut request = ModelRequest::new(prompt, task_type, self.tier);
        request.max_tokens = self.max_tokens;
        request.temperature = self.temperature;
        request
    }

    /// A failed record for a call that never reached the model.
    pub fn unsent(&self, template_id: &str, prompt_text: String, reason: String) -> ModelCallRecord {
        ModelCallRecord {
            tier: self.tier,
            template_id: template_id.to_string(),
            prompt_text,
            response_text: None,
            error: Some(reason),
            latency_ms: 0,
            status: CallStatus::Error,
            attempts: 0,
            cached: false,
            started_at: Utc::now(),
        }
    }

    pub async fn invoke(
        &self,
        template_id: &str,
        request: &ModelRequest,
        options: InvokeOptions,
    ) -> ModelCallRecord {
        let started_at = Utc::now();
        let start = Instant::now();
        let record = |status, response_text, error, attempts, cached| ModelCallRecord {
            tier: self.tier,
            template_id: template_id.to_string(),
            prompt_text: request.prompt.clone(),
            response_text,
            error,
            latency_ms: start.elapsed().as_millis() as u64,
            status,
            attempts,
            cached,
            started_at,
        };

        if self.is_simulated() {
            let text = MockBackend.respond(request);
            debug!(tier = %self.tier, template_id, "answered from mock backend");
            return record(CallStatus::Mocked, Some(text), None, 0, false);
        }

        let cache_key = self
            .cache
            .as_ref()
            .filter(|_| !options.bypass_cache)
            .map(|_| {
                let scope = format!("{}:{}", self.tier, self.backend.name());
                ResponseCache::key(&scope, &request.prompt)
            });
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key)
            && let Some(text) = cache.get(key)
        {
            debug!(tier = %self.tier, template_id, "cache hit");
            return record(CallStatus::Ok, Some(text), None, 0, true);
        }

        let timeout = options.timeout.unwrap_or(self.policy.timeout);
        let max_retries = options.max_retries.unwrap_or(self.policy.max_retries);
        let mut attempts = 0;
        let last_error = loop {
            attempts += 1;
            let error = match tokio::time::timeout(timeout, self.backend.complete(request)).await {
                Ok(Ok(text)) => {
                    self.consecutive_failures.store(0, Ordering::Release);
                    if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
                        cache.put(key, text.clone());
                    }
                    return record(CallStatus::Ok, Some(text), None, attempts, false);
                }
                Ok(Err(e)) => e,
                Err(_) => {
                    CallError::Timeout(format!("no response within {} ms", timeout.as_millis()))
                }
            };
            if !error.is_retryable() || attempts > max_retries {
                break error;
            }
            let delay = self.policy.backoff(attempts - 1);
            debug!(
                tier = %self.tier,
                attempt = attempts,
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "retrying model call"
            );
            tokio::time::sleep(delay).await;
        };

        self.note_failure();
        let status = match last_error {
            CallError::Timeout(_) => CallStatus::Timeout,
            _ => CallStatus::Error,
        };
        warn!(
            tier = %self.tier,
            template_id,
            attempts,
            error = %last_error,
            "model call failed"
        );
        record(status, None, Some(last_error.to_string()), attempts, false)
    }

    fn note_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if self.failure_threshold > 0
            && failures >= self.failure_threshold
            && !self.forced_mock.swap(true, Ordering::AcqRel)
        {
            warn!(
                tier = %self.tier,
                failures,
                backend = self.backend.name(),
                "too many consecutive failures, switching to mock mode"
            );
        }
    }
}
