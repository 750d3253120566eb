//! Adaptive per-retailer rate limiter.
//!
//! Tracks request timing per retailer and adapts delays based on reported
//! outcomes: backs off multiplicatively on failure, resets to the baseline
//! on success. Holds no HTTP knowledge; it is purely a pacing primitive
//! keyed by retailer identity.

mod retailer_state;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::models::Retailer;
use retailer_state::RetailerState;

/// Pacing parameters shared by all retailers.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Minimum inter-request interval when not in backoff.
    pub base_delay: Duration,
    /// Ceiling for the backed-off interval.
    pub max_delay: Duration,
    /// Interval multiplier applied per reported failure.
    pub backoff_multiplier: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

/// Point-in-time pacing statistics for one retailer.
#[derive(Debug, Clone)]
pub struct RetailerStats {
    pub current_delay: Duration,
    pub in_backoff: bool,
    pub total_requests: u64,
    pub failure_reports: u64,
}

/// Shared pacing state across all in-flight sessions.
///
/// Cloning shares the underlying state, as every session for a retailer
/// must observe the same cursor.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    states: Arc<RwLock<HashMap<Retailer, RetailerState>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Wait until the retailer's minimum interval has elapsed since the
    /// last granted request, then claim the pacing cursor.
    ///
    /// Callers for the same retailer are serialized: the cursor is claimed
    /// under the write lock, so of several waiters only one proceeds per
    /// interval and the rest re-wait.
    pub async fn acquire(&self, retailer: Retailer) {
        loop {
            let wait = {
                let mut states = self.states.write().await;
                let state = states
                    .entry(retailer)
                    .or_insert_with(|| RetailerState::new(self.config.base_delay));
                let wait = state.time_until_ready();
                if wait.is_zero() {
                    state.last_request = Some(Instant::now());
                    state.total_requests += 1;
                    return;
                }
                wait
            };
            debug!(retailer = %retailer, ?wait, "rate limiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Report a failed request: the next interval grows multiplicatively
    /// up to the configured ceiling.
    pub async fn report_failure(&self, retailer: Retailer) {
        let mut states = self.states.write().await;
        let state = states
            .entry(retailer)
            .or_insert_with(|| RetailerState::new(self.config.base_delay));
        state.failure_reports += 1;
        state.in_backoff = true;
        let next = Duration::from_secs_f64(
            state.current_delay.as_secs_f64() * self.config.backoff_multiplier,
        );
        state.current_delay = next.min(self.config.max_delay);
        warn!(
            retailer = %retailer,
            delay = ?state.current_delay,
            "request failed, backing off"
        );
    }

    /// Report a successful request: the interval resets to its baseline.
    pub async fn report_success(&self, retailer: Retailer) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(&retailer) {
            if state.in_backoff {
                debug!(retailer = %retailer, "recovered from backoff");
            }
            state.in_backoff = false;
            state.current_delay = self.config.base_delay;
        }
    }

    /// Current interval for a retailer, the baseline if never seen.
    pub async fn current_delay(&self, retailer: Retailer) -> Duration {
        let states = self.states.read().await;
        states
            .get(&retailer)
            .map(|s| s.current_delay)
            .unwrap_or(self.config.base_delay)
    }

    /// Statistics for every retailer seen so far.
    pub async fn stats(&self) -> HashMap<Retailer, RetailerStats> {
        let states = self.states.read().await;
        states
            .iter()
            .map(|(k, v)| {
                (
                    *k,
                    RetailerStats {
                        current_delay: v.current_delay,
                        in_backoff: v.in_backoff,
                        total_requests: v.total_requests,
                        failure_reports: v.failure_reports,
                    },
                )
            })
            .collect()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
