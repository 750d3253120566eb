//! Per-retailer pacing state.

use std::time::{Duration, Instant};

/// Pacing cursor for a single retailer.
#[derive(Debug, Clone)]
pub struct RetailerState {
    /// Current minimum inter-request interval.
    pub current_delay: Duration,
    /// When the last request was granted.
    pub last_request: Option<Instant>,
    /// Whether the interval is currently above the baseline.
    pub in_backoff: bool,
    pub total_requests: u64,
    pub failure_reports: u64,
}

impl RetailerState {
    pub fn new(base_delay: Duration) -> Self {
        Self {
            current_delay: base_delay,
            last_request: None,
            in_backoff: false,
            total_requests: 0,
            failure_reports: 0,
        }
    }

    /// Time until this retailer is ready for another request.
    pub fn time_until_ready(&self) -> Duration {
        match self.last_request {
            Some(last) => {
                let elapsed = last.elapsed();
                if elapsed >= self.current_delay {
                    Duration::ZERO
                } else {
                    self.current_delay - elapsed
                }
            }
            None => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_is_ready() {
        let state = RetailerState::new(Duration::from_secs(1));
        assert_eq!(state.time_until_ready(), Duration::ZERO);
    }

    #[test]
    fn recent_request_delays_readiness() {
        let mut state = RetailerState::new(Duration::from_secs(60));
        state.last_request = Some(Instant::now());
        assert!(state.time_until_ready() > Duration::from_secs(59));
    }
}
