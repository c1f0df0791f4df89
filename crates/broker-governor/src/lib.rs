//! Per-provider rate limiting, adaptive pacing, and retry with backoff.
//!
//! [`Governor`] is the process-wide singleton every provider call is routed
//! through: [`Governor::execute_with_limits`] acquires a global permit, then
//! a provider permit, invokes the operation under a timeout, and retries
//! transient failures with exponential backoff. It is the only process-wide
//! state the core admits; its metrics can be reset for test harnesses.

#![forbid(unsafe_code)]

use broker_proto::{ProviderId, RateLimitMetrics};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub use error::{GovernorError, Result};

/// Rate-limit configuration for one provider.
#[derive(Debug, Clone, Copy)]
pub struct ProviderRateLimit {
    pub requests_per_second: f64,
    pub requests_per_minute: u32,
    pub burst_limit: u32,
    pub retry_attempts: u32,
    pub backoff_factor: f64,
    pub timeout: Duration,
}

impl Default for ProviderRateLimit {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
            requests_per_minute: 600,
            burst_limit: 20,
            retry_attempts: 3,
            backoff_factor: 2.0,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Conservative defaults for every known provider. Providers not listed
/// here pass through with no limit.
pub mod defaults {
    use super::ProviderRateLimit;
    use broker_proto::ProviderId;
    use std::time::Duration;

    pub fn for_provider(id: ProviderId) -> Option<ProviderRateLimit> {
        Some(match id {
            ProviderId::Aws => ProviderRateLimit {
                requests_per_second: 20.0,
                requests_per_minute: 1000,
                burst_limit: 50,
                retry_attempts: 3,
                backoff_factor: 1.5,
                timeout: Duration::from_secs(30),
            },
            ProviderId::Gcp => ProviderRateLimit {
                requests_per_second: 15.0,
                requests_per_minute: 900,
                burst_limit: 30,
                retry_attempts: 3,
                backoff_factor: 2.0,
                timeout: Duration::from_secs(25),
            },
            ProviderId::Azure => ProviderRateLimit {
                requests_per_second: 10.0,
                requests_per_minute: 600,
                burst_limit: 25,
                retry_attempts: 3,
                backoff_factor: 2.0,
                timeout: Duration::from_secs(35),
            },
            ProviderId::Runpod => ProviderRateLimit {
                requests_per_second: 5.0,
                requests_per_minute: 300,
                burst_limit: 15,
                retry_attempts: 5,
                backoff_factor: 1.5,
                timeout: Duration::from_secs(20),
            },
            ProviderId::Vastai => ProviderRateLimit {
                requests_per_second: 3.0,
                requests_per_minute: 180,
                burst_limit: 10,
                retry_attempts: 4,
                backoff_factor: 2.0,
                timeout: Duration::from_secs(25),
            },
            ProviderId::LambdaLabs => ProviderRateLimit {
                requests_per_second: 4.0,
                requests_per_minute: 240,
                burst_limit: 12,
                retry_attempts: 3,
                backoff_factor: 1.8,
                timeout: Duration::from_secs(30),
            },
            ProviderId::Coreweave => ProviderRateLimit {
                requests_per_second: 8.0,
                requests_per_minute: 480,
                burst_limit: 20,
                retry_attempts: 3,
                backoff_factor: 1.5,
                timeout: Duration::from_secs(25),
            },
            ProviderId::Tensordock => ProviderRateLimit {
                requests_per_second: 2.0,
                requests_per_minute: 120,
                burst_limit: 8,
                retry_attempts: 5,
                backoff_factor: 2.5,
                timeout: Duration::from_secs(20),
            },
            ProviderId::Huggingface
            | ProviderId::Baseten
            | ProviderId::Oracle
            | ProviderId::Crusoe
            | ProviderId::Digitalocean
            | ProviderId::Hyperstack
            | ProviderId::Demo => return None,
        })
    }
}

const MAX_BACKOFF: Duration = Duration::from_secs(60);
const GLOBAL_LIMIT_PER_MINUTE: u32 = 50;

/// Implemented by operation error types so the governor can distinguish
/// retryable failures (network, 429, 5xx) from terminal ones.
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

struct ProviderState {
    limit: ProviderRateLimit,
    window: Mutex<VecDeque<Instant>>,
    minute_window: Mutex<VecDeque<Instant>>,
    metrics: Mutex<RateLimitMetrics>,
}

impl ProviderState {
    fn new(limit: ProviderRateLimit) -> Self {
        Self {
            limit,
            window: Mutex::new(VecDeque::new()),
            minute_window: Mutex::new(VecDeque::new()),
            metrics: Mutex::new(RateLimitMetrics::default()),
        }
    }
}

/// The per-provider and global request-pacing subsystem.
pub struct Governor {
    providers: Mutex<HashMap<String, Arc<ProviderState>>>,
    global_window: Mutex<VecDeque<Instant>>,
}

impl Governor {
    fn new() -> Self {
        Self {
            providers: Mutex::new(HashMap::new()),
            global_window: Mutex::new(VecDeque::new()),
        }
    }

    /// The lazily-initialized, process-wide governor.
    pub fn global() -> &'static Governor {
        static INSTANCE: OnceLock<Governor> = OnceLock::new();
        INSTANCE.get_or_init(Governor::new)
    }

    /// Reset all metrics and pacing windows. Intended for test harnesses
    /// that need a clean governor between scenarios.
    pub fn reset_metrics(&self) {
        self.providers.lock().clear();
        self.global_window.lock().clear();
    }

    fn state_for(&self, provider: ProviderId) -> Option<Arc<ProviderState>> {
        let limit = defaults::for_provider(provider)?;
        let mut providers = self.providers.lock();
        let entry = providers
            .entry(provider.as_str().to_string())
            .or_insert_with(|| Arc::new(ProviderState::new(limit)))
            .clone();
        Some(entry)
    }

    pub fn metrics_for(&self, provider: ProviderId) -> RateLimitMetrics {
        self.state_for(provider)
            .map(|s| s.metrics.lock().clone())
            .unwrap_or_default()
    }

    async fn acquire_global(&self) {
        loop {
            let wait = {
                let mut window = self.global_window.lock();
                let now = Instant::now();
                while window.front().is_some_and(|t| now.duration_since(*t) > Duration::from_secs(60)) {
                    window.pop_front();
                }
                if window.len() < GLOBAL_LIMIT_PER_MINUTE as usize {
                    window.push_back(now);
                    None
                } else {
                    let oldest = *window.front().expect("non-empty when at capacity");
                    Some(Duration::from_secs(60).saturating_sub(now.duration_since(oldest)))
                }
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }

    async fn acquire_provider(&self, state: &ProviderState) {
        loop {
            let wait = {
                let now = Instant::now();
                let mut second_window = state.window.lock();
                while second_window.front().is_some_and(|t| now.duration_since(*t) > Duration::from_secs(1)) {
                    second_window.pop_front();
                }
                let mut minute_window = state.minute_window.lock();
                while minute_window.front().is_some_and(|t| now.duration_since(*t) > Duration::from_secs(60)) {
                    minute_window.pop_front();
                }

                let per_second_ok = (second_window.len() as f64) < state.limit.requests_per_second;
                let per_minute_ok = minute_window.len() < state.limit.requests_per_minute as usize;

                if per_second_ok && per_minute_ok {
                    second_window.push_back(now);
                    minute_window.push_back(now);
                    None
                } else if !per_minute_ok {
                    let oldest = *minute_window.front().expect("non-empty when at capacity");
                    Some(Duration::from_secs(60).saturating_sub(now.duration_since(oldest)))
                } else {
                    let oldest = *second_window.front().expect("non-empty when at capacity");
                    Some(Duration::from_secs(1).saturating_sub(now.duration_since(oldest)))
                }
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }

    /// Adaptive pacing: shapes traffic toward the configured rate without
    /// serializing callers. observed/configured ratio in [0.5,0.8) -> 100ms,
    /// [0.8,0.95) -> 500ms, >=0.95 -> 1s.
    async fn adaptive_pace(&self, state: &ProviderState) {
        let observed_rate = {
            let window = state.window.lock();
            window.len() as f64
        };
        let ratio = observed_rate / state.limit.requests_per_second;
        let delay = if ratio >= 0.95 {
            Some(Duration::from_secs(1))
        } else if ratio >= 0.8 {
            Some(Duration::from_millis(500))
        } else if ratio >= 0.5 {
            Some(Duration::from_millis(100))
        } else {
            None
        };
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
    }

    fn record_attempt(&self, state: &ProviderState, elapsed: Duration, outcome: AttemptOutcome) {
        let mut metrics = state.metrics.lock();
        metrics.total_requests += 1;
        metrics.last_request_time = Some(chrono::Utc::now());
        match outcome {
            AttemptOutcome::Success => {
                metrics.successful_requests += 1;
                let n = metrics.successful_requests as f64;
                metrics.average_response_time_ms =
                    (metrics.average_response_time_ms * (n - 1.0) + elapsed.as_millis() as f64) / n;
            }
            AttemptOutcome::RateLimited => metrics.rate_limited_requests += 1,
            AttemptOutcome::Failed => metrics.failed_requests += 1,
        }
        metrics.current_rate = state.window.lock().len() as f64;
    }

    /// Acquire global and provider permits, invoke `op` under the
    /// provider's timeout, and retry transient failures with exponential
    /// backoff capped at 60s. Providers with no configured limit pass
    /// through and invoke `op` once, uncapped.
    pub async fn execute_with_limits<T, E, F, Fut>(
        &self,
        provider: ProviderId,
        mut op: F,
    ) -> Result<T>
    where
        E: std::fmt::Display + IsTransient,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let Some(state) = self.state_for(provider) else {
            return op()
                .await
                .map_err(|e| GovernorError::OperationFailed(e.to_string()));
        };

        let max_attempts = state.limit.retry_attempts.max(1);
        let mut last_err: Option<String> = None;

        for attempt in 0..max_attempts {
            self.adaptive_pace(&state).await;
            self.acquire_global().await;
            self.acquire_provider(&state).await;

            let start = Instant::now();
            let attempt_result = tokio::time::timeout(state.limit.timeout, op()).await;
            let elapsed = start.elapsed();

            match attempt_result {
                Ok(Ok(value)) => {
                    self.record_attempt(&state, elapsed, AttemptOutcome::Success);
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    let transient = e.is_transient();
                    self.record_attempt(
                        &state,
                        elapsed,
                        if transient { AttemptOutcome::RateLimited } else { AttemptOutcome::Failed },
                    );
                    last_err = Some(e.to_string());
                    if !transient {
                        return Err(GovernorError::OperationFailed(last_err.unwrap()));
                    }
                }
                Err(_timeout) => {
                    self.record_attempt(&state, elapsed, AttemptOutcome::RateLimited);
                    last_err = Some(format!("timed out after {:?}", state.limit.timeout));
                    warn!(provider = %provider, timeout_s = state.limit.timeout.as_secs(), "provider call timed out");
                }
            }

            if attempt + 1 < max_attempts {
                let backoff = Duration::from_secs_f64(state.limit.backoff_factor.powi(attempt as i32))
                    .min(MAX_BACKOFF);
                debug!(provider = %provider, attempt, ?backoff, "retrying after transient failure");
                tokio::time::sleep(backoff).await;
            }
        }

        Err(GovernorError::RateLimitExhausted(
            last_err.unwrap_or_else(|| "no attempts made".to_string()),
        ))
    }
}

impl Default for Governor {
    fn default() -> Self {
        Self::new()
    }
}

enum AttemptOutcome {
    Success,
    RateLimited,
    Failed,
}

pub mod error {
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum GovernorError {
        #[error("rate limit exhausted after retries: {0}")]
        RateLimitExhausted(String),
        #[error("operation failed: {0}")]
        OperationFailed(String),
    }

    pub type Result<T> = std::result::Result<T, GovernorError>;
}
