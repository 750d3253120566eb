//! Scrape tasks and run reporting.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::Retailer;

/// One configured (retailer, product URL) pair to scrape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeTarget {
    pub retailer: Retailer,
    pub url: String,
}

/// Why a task failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Transient failures exhausted the retry budget.
    MaxRetriesExceeded,
    /// A permanent fetch error aborted the task without retry.
    Permanent(String),
    /// The product URL did not yield a usable product id.
    InvalidUrl(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MaxRetriesExceeded => write!(f, "max_retries_exceeded"),
            Self::Permanent(msg) => write!(f, "permanent: {msg}"),
            Self::InvalidUrl(msg) => write!(f, "invalid_url: {msg}"),
        }
    }
}

/// Terminal state of one scrape task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    Failed(FailureReason),
    Cancelled,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// What one session did with its task.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub retailer: Retailer,
    pub url: String,
    pub outcome: TaskOutcome,
    pub pages_fetched: u32,
    pub retries_used: u32,
    /// Raw candidate rows extracted across all pages.
    pub reviews_found: u64,
    /// Rows that failed normalization inside the session.
    pub reviews_rejected: u64,
    pub duration: Duration,
}

/// Aggregate statistics for one full run, returned to the caller.
#[derive(Debug, Default, Clone)]
pub struct RunReport {
    pub total_urls: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub reviews_found: u64,
    pub reviews_persisted: u64,
    pub reviews_duplicate: u64,
    pub reviews_rejected: u64,
    pub elapsed: Duration,
    pub outcomes: Vec<TaskReport>,
}

impl RunReport {
    pub fn fold(&mut self, task: TaskReport) {
        match &task.outcome {
            TaskOutcome::Succeeded => self.succeeded += 1,
            TaskOutcome::Failed(_) => self.failed += 1,
            TaskOutcome::Cancelled => self.cancelled += 1,
        }
        self.reviews_found += task.reviews_found;
        self.reviews_rejected += task.reviews_rejected;
        self.outcomes.push(task);
    }
}
