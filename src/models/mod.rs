//! Data models for reviews, scrape tasks and run reporting.

mod review;
mod task;

pub use review::{sanitize_text, RawReview, Retailer, ReviewRecord, RATING_MAX, RATING_MIN};
pub use task::{FailureReason, RunReport, ScrapeTarget, TaskOutcome, TaskReport};
