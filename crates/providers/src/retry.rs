//! Retry policy: bounded exponential backoff around one backend call.
//!
//! Only rate-limit errors are retried. Auth, transport and every other
//! provider error surface immediately; the adapter has already classified
//! them, so the policy never inspects provider-specific payloads.

use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use taskloom_core::backend::{Backend, BackendRequest, BackendResponse};
use taskloom_core::error::BackendError;
use taskloom_core::event::{DomainEvent, EventBus};
use tracing::{debug, warn};

const MAX_DELAY: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. Never below 1.
    max_attempts: u32,
    base_delay: Duration,
    events: Option<Arc<EventBus>>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            events: None,
        }
    }

    pub fn from_config(config: &taskloom_config::RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.base_delay_ms))
    }

    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Publish a `BackendRetry` event before each backoff.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`,
    /// capped at one minute.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(MAX_DELAY)
    }

    /// Send `request` to `backend`, retrying rate-limit errors.
    ///
    /// Exhausting the attempt limit returns the last rate-limit error.
    pub async fn call(
        &self,
        backend: &dyn Backend,
        request: BackendRequest,
    ) -> Result<BackendResponse, BackendError> {
        let mut attempt = 1;
        loop {
            match backend.send(request.clone()).await {
                Ok(response) => {
                    if attempt > 1 {
                        debug!(backend = %backend.name(), attempt, "Backend call succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        backend = %backend.name(),
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Rate limited, backing off"
                    );
                    if let Some(events) = &self.events {
                        events.publish(DomainEvent::BackendRetry {
                            backend: backend.name().to_string(),
                            attempt,
                            delay_ms: delay.as_millis() as u64,
                            timestamp: Utc::now(),
                        });
                    }
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!(backend = %backend.name(), attempts = attempt, "Retry budget exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&taskloom_config::RetryConfig::default())
    }
}
