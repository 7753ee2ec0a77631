use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gt_core::config::RateLimitConfig;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

// ---------------------------------------------------------------------------
// FailureStreak
// ---------------------------------------------------------------------------

/// Count of consecutive failed invocations.
///
/// Cloning yields another handle to the same counter: the [`RateLimiter`]
/// reads it to stretch call spacing and the retrying invoker increments and
/// resets it. The value lives as long as the handles do and is never
/// persisted.
#[derive(Debug, Clone, Default)]
pub struct FailureStreak(Arc<AtomicU32>);

impl FailureStreak {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current streak length.
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    /// Record one more failure and return the new streak length.
    pub fn increment(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst).saturating_add(1)
    }

    /// Clear the streak after a successful call.
    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Admission parameters for a [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    /// Calls admitted per trailing window.
    pub max_calls: usize,
    /// Length of the trailing window.
    pub window: Duration,
    /// Minimum spacing between consecutive calls with no failures.
    pub base_delay: Duration,
    /// Upper bound on the failure-scaled spacing.
    pub max_dynamic_delay: Duration,
}

impl RateLimitPolicy {
    /// Allow `count` calls per minute with the given baseline spacing.
    pub fn per_minute(count: usize, base_delay: Duration) -> Self {
        Self {
            max_calls: count.max(1),
            window: Duration::from_secs(60),
            base_delay,
            max_dynamic_delay: Duration::from_secs(30),
        }
    }

    /// Spacing enforced after `failures` consecutive failures:
    /// `min(base_delay * 2^failures, max_dynamic_delay)`.
    pub fn dynamic_delay(&self, failures: u32) -> Duration {
        scaled_delay(self.base_delay, failures, self.max_dynamic_delay)
    }
}

impl From<&RateLimitConfig> for RateLimitPolicy {
    fn from(cfg: &RateLimitConfig) -> Self {
        Self {
            max_calls: (cfg.max_calls_per_minute as usize).max(1),
            window: cfg.window(),
            base_delay: cfg.inter_call_delay(),
            max_dynamic_delay: cfg.max_dynamic_delay(),
        }
    }
}

/// `min(base * 2^exponent, cap)` without overflowing for large exponents.
pub(crate) fn scaled_delay(base: Duration, exponent: u32, cap: Duration) -> Duration {
    let factor = 2f64.powi(exponent.min(62) as i32);
    let secs = (base.as_secs_f64() * factor).min(cap.as_secs_f64());
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(cap)
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

/// Sliding-window gate in front of every outbound model call.
///
/// [`admit`](RateLimiter::admit) suspends the caller until the next call is
/// safe and then records it:
///
/// 1. wait out the failure-scaled spacing since the previous call;
/// 2. evict timestamps that have aged out of the window;
/// 3. while the window is full, sleep until the oldest entry ages out;
/// 4. record the current instant.
///
/// The call window sits behind an async mutex held across the sleeps, so
/// callers sharing one limiter are admitted one at a time in arrival order.
#[derive(Debug)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    calls: Mutex<VecDeque<Instant>>,
    streak: FailureStreak,
}

impl RateLimiter {
    /// Create a limiter with its own failure streak.
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self::with_streak(policy, FailureStreak::new())
    }

    /// Create a limiter that reads an existing failure streak.
    pub fn with_streak(policy: RateLimitPolicy, streak: FailureStreak) -> Self {
        Self {
            policy,
            calls: Mutex::new(VecDeque::new()),
            streak,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Handle to the streak this limiter scales its spacing by.
    pub fn failure_streak(&self) -> &FailureStreak {
        &self.streak
    }

    /// Spacing that the next admission will enforce.
    pub fn dynamic_delay(&self) -> Duration {
        self.policy.dynamic_delay(self.streak.get())
    }

    /// Number of recorded calls still inside the trailing window.
    pub async fn calls_in_window(&self) -> usize {
        let mut calls = self.calls.lock().await;
        evict_expired(&mut calls, Instant::now(), self.policy.window);
        calls.len()
    }

    /// Block until the next call may be issued, then record it.
    ///
    /// Returns the total time spent waiting.
    pub async fn admit(&self) -> Duration {
        let mut calls = self.calls.lock().await;
        let mut waited = Duration::ZERO;

        let failures = self.streak.get();
        let spacing = self.policy.dynamic_delay(failures);
        if let Some(last) = calls.back() {
            let since_last = Instant::now().saturating_duration_since(*last);
            if since_last < spacing {
                let pause = spacing - since_last;
                debug!(
                    pause_secs = pause.as_secs_f64(),
                    failures, "enforcing dynamic delay"
                );
                tokio::time::sleep(pause).await;
                waited += pause;
            }
        }

        loop {
            let now = Instant::now();
            evict_expired(&mut calls, now, self.policy.window);
            if calls.len() < self.policy.max_calls {
                break;
            }
            // Non-empty: max_calls >= 1 and the window is full.
            let Some(oldest) = calls.front().copied() else {
                break;
            };
            let pause = self
                .policy
                .window
                .saturating_sub(now.saturating_duration_since(oldest));
            debug!(
                pause_secs = pause.as_secs_f64(),
                in_window = calls.len(),
                "rate limit reached, waiting for window to slide"
            );
            tokio::time::sleep(pause).await;
            waited += pause;
        }

        calls.push_back(Instant::now());
        waited
    }
}

/// Drop timestamps whose age has reached the window length.
fn evict_expired(calls: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(front) = calls.front() {
        if now.saturating_duration_since(*front) >= window {
            calls.pop_front();
        } else {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
