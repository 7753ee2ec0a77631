use std::sync::Arc;
use std::time::Duration;

use gt_core::config::InvocationConfig;
use gt_core::types::word_count;
use rand::Rng;
use tracing::{debug, error, warn};

use crate::provider::{InvocationPayload, ModelClient, ProviderError};
use crate::rate_limiter::{scaled_delay, FailureStreak, RateLimiter};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Why an invocation gave up.
///
/// `InputTooLarge` and `OutputTooLarge` are validation failures: they are
/// returned on the spot and never consume a retry. `RetriesExhausted` is
/// returned once the retry budget is spent on retryable provider errors.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("input exceeds maximum context size of {limit} words (got {words})")]
    InputTooLarge { words: usize, limit: usize },

    #[error("response exceeds maximum size of {limit} words (got {words})")]
    OutputTooLarge { words: usize, limit: usize },

    #[error(
        "max retries ({attempts}) reached after {failure_streak} consecutive failures: {last_error}"
    )]
    RetriesExhausted {
        attempts: u32,
        failure_streak: u32,
        last_error: String,
    },
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Size limits and retry budget for a [`RetryingInvoker`].
#[derive(Debug, Clone)]
pub struct InvokerPolicy {
    pub max_input_words: usize,
    pub max_output_words: usize,
    /// Outbound `max_output_size` is clamped to this.
    pub max_output_tokens: u32,
    /// Total attempts allowed, the first one included.
    pub max_retries: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    /// Add up to one second of random jitter to each backoff.
    pub jitter: bool,
}

impl Default for InvokerPolicy {
    fn default() -> Self {
        Self::from(&InvocationConfig::default())
    }
}

impl From<&InvocationConfig> for InvokerPolicy {
    fn from(cfg: &InvocationConfig) -> Self {
        Self {
            max_input_words: cfg.max_input_words,
            max_output_words: cfg.max_output_words,
            max_output_tokens: cfg.max_output_tokens_requested,
            max_retries: cfg.max_retries.max(1),
            min_backoff: cfg.min_backoff(),
            max_backoff: cfg.max_backoff(),
            jitter: true,
        }
    }
}

impl InvokerPolicy {
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Backoff before jitter after `failures` consecutive failures:
    /// `min(min_backoff * 2^failures, max_backoff)`.
    pub fn backoff_for(&self, failures: u32) -> Duration {
        scaled_delay(self.min_backoff, failures, self.max_backoff)
    }

    /// [`backoff_for`](Self::backoff_for) plus a uniform jitter in `[0, 1)` seconds.
    pub fn backoff_with_jitter(&self, failures: u32) -> Duration {
        let base = self.backoff_for(failures);
        if !self.jitter {
            return base;
        }
        let jitter: f64 = rand::rng().random_range(0.0..1.0);
        base + Duration::from_secs_f64(jitter)
    }
}

// ---------------------------------------------------------------------------
// RetryingInvoker
// ---------------------------------------------------------------------------

/// Result of a single attempt, which decides the next step of the loop.
#[derive(Debug)]
enum Attempt {
    Success(String),
    Backoff(ProviderError),
    Fatal(InvokeError),
}

/// Rate-limited, size-checked, retrying wrapper around a [`ModelClient`].
///
/// Every attempt, the first included, goes through [`RateLimiter::admit`].
/// Retryable failures grow the shared [`FailureStreak`], which both lengthens
/// the backoff here and widens the limiter's call spacing; a success resets it.
pub struct RetryingInvoker {
    client: Arc<dyn ModelClient>,
    limiter: Arc<RateLimiter>,
    policy: InvokerPolicy,
}

impl RetryingInvoker {
    pub fn new(client: Arc<dyn ModelClient>, limiter: Arc<RateLimiter>, policy: InvokerPolicy) -> Self {
        Self {
            client,
            limiter,
            policy,
        }
    }

    pub fn policy(&self) -> &InvokerPolicy {
        &self.policy
    }

    fn streak(&self) -> &FailureStreak {
        self.limiter.failure_streak()
    }

    /// Current consecutive-failure count.
    pub fn failure_streak(&self) -> u32 {
        self.streak().get()
    }

    /// Send `payload`, retrying retryable failures with exponential backoff.
    ///
    /// Returns the response text on success.
    pub async fn invoke(&self, mut payload: InvocationPayload) -> Result<String, InvokeError> {
        let words = word_count(&payload.input_text());
        if words > self.policy.max_input_words {
            return Err(InvokeError::InputTooLarge {
                words,
                limit: self.policy.max_input_words,
            });
        }

        if payload.max_output_size > self.policy.max_output_tokens {
            debug!(
                requested = payload.max_output_size,
                cap = self.policy.max_output_tokens,
                "clamping requested output size"
            );
            payload.max_output_size = self.policy.max_output_tokens;
        }

        let mut attempts: u32 = 0;
        let mut last_error = String::new();

        while attempts < self.policy.max_retries {
            attempts += 1;
            match self.attempt(&payload).await {
                Attempt::Success(text) => {
                    if attempts > 1 {
                        debug!(attempts, client = self.client.name(), "invocation succeeded after retries");
                    }
                    return Ok(text);
                }
                Attempt::Fatal(err) => return Err(err),
                Attempt::Backoff(cause) => {
                    let failures = self.streak().increment();
                    last_error = cause.to_string();
                    if attempts >= self.policy.max_retries {
                        error!(failures, error = %cause, "invocation failed on final attempt");
                        break;
                    }
                    let wait = self.policy.backoff_with_jitter(failures);
                    if cause.is_throttling() {
                        warn!(
                            failures,
                            wait_secs = wait.as_secs_f64(),
                            "throttled (failure #{failures}), retrying in {:.2}s",
                            wait.as_secs_f64()
                        );
                    } else {
                        error!(
                            failures,
                            wait_secs = wait.as_secs_f64(),
                            error = %cause,
                            "error during model invocation (failure #{failures})"
                        );
                    }
                    tokio::time::sleep(wait).await;
                }
            }
        }

        Err(InvokeError::RetriesExhausted {
            attempts,
            failure_streak: self.streak().get(),
            last_error,
        })
    }

    async fn attempt(&self, payload: &InvocationPayload) -> Attempt {
        self.limiter.admit().await;

        let response = match self.client.invoke(payload).await {
            Ok(response) => response,
            Err(err) => return Attempt::Backoff(err),
        };

        let Some(text) = response.text() else {
            return Attempt::Backoff(ProviderError::Parse(
                "response contained no text block".to_string(),
            ));
        };

        let words = word_count(&text);
        if words > self.policy.max_output_words {
            return Attempt::Fatal(InvokeError::OutputTooLarge {
                words,
                limit: self.policy.max_output_words,
            });
        }

        self.streak().reset();
        Attempt::Success(text)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
