//! Run-level coordination.
//!
//! The orchestrator validates a batch of product URLs, fans sessions out
//! under a concurrency bound, funnels every normalized record through one
//! channel into the store consumer, and folds per-task reports into a run
//! summary. Sessions share a single rate limiter, so pacing holds across
//! concurrent sessions hitting the same retailer.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::ConfigError;
use crate::models::{Retailer, ReviewRecord, RunReport, ScrapeTarget, TaskOutcome, TaskReport};
use crate::rate_limit::RateLimiter;
use crate::scrapers::{self, HttpClient, RetailerAdapter};
use crate::session::{ScrapeSession, SessionConfig};
use crate::storage::{ReviewStore, UpsertOutcome};

/// Record channel depth; sessions stall briefly if the store falls behind.
const CHANNEL_CAPACITY: usize = 256;

/// Produces the adapter for a retailer. Seam for swapping live HTTP
/// adapters out in tests.
pub trait AdapterFactory: Send + Sync {
    fn adapter_for(&self, retailer: Retailer) -> Arc<dyn RetailerAdapter>;
}

/// Factory backed by the shared HTTP client.
pub struct LiveAdapterFactory {
    client: HttpClient,
}

impl LiveAdapterFactory {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

impl AdapterFactory for LiveAdapterFactory {
    fn adapter_for(&self, retailer: Retailer) -> Arc<dyn RetailerAdapter> {
        scrapers::adapter_for(retailer, self.client.clone())
    }
}

pub struct Orchestrator {
    store: ReviewStore,
    limiter: RateLimiter,
    factory: Arc<dyn AdapterFactory>,
    session_config: SessionConfig,
    max_concurrent: usize,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        store: ReviewStore,
        limiter: RateLimiter,
        factory: Arc<dyn AdapterFactory>,
        session_config: SessionConfig,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            limiter,
            factory,
            session_config,
            max_concurrent: max_concurrent.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Token that aborts the run when cancelled; sessions finish their
    /// current page and report `Cancelled`.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Scrape every target to a terminal outcome and return the run
    /// summary. Fails up front if the batch is empty; a batch with some
    /// bad URLs still runs, those tasks just fail individually.
    pub async fn run(&self, targets: Vec<ScrapeTarget>) -> Result<RunReport, ConfigError> {
        if targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        let started = Instant::now();
        let total = targets.len();
        info!(targets = total, "starting scrape run");

        let (tx, rx) = mpsc::channel::<ReviewRecord>(CHANNEL_CAPACITY);
        let consumer = tokio::spawn(consume_records(self.store.clone(), rx));

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::with_capacity(total);
        for target in targets {
            let adapter = self.factory.adapter_for(target.retailer);
            let session = ScrapeSession::new(
                adapter,
                self.limiter.clone(),
                tx.clone(),
                self.session_config,
                self.cancel.clone(),
            );
            let semaphore = Arc::clone(&semaphore);
            let cancel = self.cancel.clone();
            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return TaskReport {
                            retailer: target.retailer,
                            url: target.url.clone(),
                            outcome: TaskOutcome::Cancelled,
                            pages_fetched: 0,
                            retries_used: 0,
                            reviews_found: 0,
                            reviews_rejected: 0,
                            duration: std::time::Duration::ZERO,
                        };
                    }
                };
                if cancel.is_cancelled() {
                    return TaskReport {
                        retailer: target.retailer,
                        url: target.url.clone(),
                        outcome: TaskOutcome::Cancelled,
                        pages_fetched: 0,
                        retries_used: 0,
                        reviews_found: 0,
                        reviews_rejected: 0,
                        duration: std::time::Duration::ZERO,
                    };
                }
                session.run(&target.url).await
            }));
        }
        // Only session clones keep the channel open now.
        drop(tx);

        let mut report = RunReport {
            total_urls: total,
            ..Default::default()
        };
        for handle in handles {
            match handle.await {
                Ok(task) => {
                    if let Err(e) = self.store.record_run(&task).await {
                        warn!(%e, "could not record run outcome");
                    }
                    report.fold(task);
                }
                Err(e) => error!(%e, "session task panicked"),
            }
        }

        match consumer.await {
            Ok(counts) => {
                report.reviews_persisted = counts.inserted;
                report.reviews_duplicate = counts.duplicate;
                report.reviews_rejected += counts.rejected;
            }
            Err(e) => error!(%e, "store consumer panicked"),
        }

        report.elapsed = started.elapsed();
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            persisted = report.reviews_persisted,
            duplicate = report.reviews_duplicate,
            "scrape run finished"
        );
        Ok(report)
    }
}

#[derive(Default)]
struct ConsumerCounts {
    inserted: u64,
    duplicate: u64,
    rejected: u64,
}

/// Drains the record channel into the store. Runs until every sender is
/// dropped, so late records from a cancelled run still land.
async fn consume_records(
    store: ReviewStore,
    mut rx: mpsc::Receiver<ReviewRecord>,
) -> ConsumerCounts {
    let mut counts = ConsumerCounts::default();
    while let Some(record) = rx.recv().await {
        match store.upsert(&record).await {
            Ok(UpsertOutcome::Inserted) => counts.inserted += 1,
            Ok(UpsertOutcome::Duplicate) => counts.duplicate += 1,
            Ok(UpsertOutcome::Rejected(reason)) => {
                warn!(review_id = %record.review_id, %reason, "store rejected record");
                counts.rejected += 1;
            }
            Err(e) => error!(review_id = %record.review_id, %e, "upsert failed"),
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, ParseError, ValidationError};
    use crate::models::{RawReview, ScrapeTarget};
    use crate::rate_limit::{RateLimitConfig, RateLimiter};
    use crate::scrapers::{normalize_raw, ParsedPage, ProductContext};
    use async_trait::async_trait;
    use std::time::Duration;

    /// One-page adapter whose behavior is keyed off the URL path.
    struct PathKeyedAdapter {
        retailer: Retailer,
    }

    #[async_trait]
    impl RetailerAdapter for PathKeyedAdapter {
        fn retailer(&self) -> Retailer {
            self.retailer
        }

        fn product_id(&self, url: &str) -> Option<String> {
            url.rsplit('/').next().map(str::to_string)
        }

        async fn fetch_page(&self, url: &str, _page: u32) -> Result<String, FetchError> {
            if url.contains("gone") {
                Err(FetchError::Permanent("404".into()))
            } else {
                Ok(url.to_string())
            }
        }

        fn parse_reviews(&self, content: &str) -> Result<ParsedPage, ParseError> {
            Ok(ParsedPage {
                rows: vec![RawReview {
                    native_id: Some(format!("n-{}", content.len())),
                    rating: Some(5.0),
                    text: Some("great".into()),
                    ..Default::default()
                }],
                has_more_pages: false,
                product_name: Some("Thing".into()),
            })
        }

        fn normalize(
            &self,
            raw: RawReview,
            ctx: &ProductContext,
        ) -> Result<ReviewRecord, ValidationError> {
            normalize_raw(self.retailer, raw, ctx, &[], |v| v)
        }
    }

    struct StubFactory;

    impl AdapterFactory for StubFactory {
        fn adapter_for(&self, retailer: Retailer) -> Arc<dyn RetailerAdapter> {
            Arc::new(PathKeyedAdapter { retailer })
        }
    }

    fn orchestrator(store: ReviewStore) -> Orchestrator {
        Orchestrator::new(
            store,
            RateLimiter::new(RateLimitConfig {
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
                backoff_multiplier: 2.0,
            }),
            Arc::new(StubFactory),
            SessionConfig {
                max_retries: 1,
                max_pages: 3,
            },
            4,
        )
    }

    #[tokio::test]
    async fn empty_batch_is_a_config_error() {
        let store = ReviewStore::open_in_memory().unwrap();
        assert!(matches!(
            orchestrator(store).run(vec![]).await,
            Err(ConfigError::NoTargets)
        ));
    }

    #[tokio::test]
    async fn mixed_batch_reports_per_task_outcomes() {
        let store = ReviewStore::open_in_memory().unwrap();
        let report = orchestrator(store.clone())
            .run(vec![
                ScrapeTarget {
                    retailer: Retailer::Walmart,
                    url: "https://www.walmart.com/ip/a/1".into(),
                },
                ScrapeTarget {
                    retailer: Retailer::Walmart,
                    url: "https://www.walmart.com/ip/b/2".into(),
                },
                ScrapeTarget {
                    retailer: Retailer::Target,
                    url: "https://www.target.com/p/gone/-/3".into(),
                },
            ])
            .await
            .unwrap();

        assert_eq!(report.total_urls, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert!(report.outcomes.iter().any(|t| matches!(
            &t.outcome,
            TaskOutcome::Failed(crate::models::FailureReason::Permanent(_))
        )));

        // Every task outcome was recorded for monitoring.
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_runs, 3);
    }

    #[tokio::test]
    async fn records_flow_into_the_store_deduplicated() {
        let store = ReviewStore::open_in_memory().unwrap();
        // Same URL twice: both sessions emit the same review_id.
        let report = orchestrator(store.clone())
            .run(vec![
                ScrapeTarget {
                    retailer: Retailer::Walmart,
                    url: "https://www.walmart.com/ip/a/1".into(),
                },
                ScrapeTarget {
                    retailer: Retailer::Walmart,
                    url: "https://www.walmart.com/ip/a/1".into(),
                },
            ])
            .await
            .unwrap();

        assert_eq!(report.reviews_found, 2);
        assert_eq!(report.reviews_persisted, 1);
        assert_eq!(report.reviews_duplicate, 1);
        assert_eq!(store.stats().await.unwrap().total_reviews, 1);
    }

    #[tokio::test]
    async fn cancelled_run_marks_pending_tasks_cancelled() {
        let store = ReviewStore::open_in_memory().unwrap();
        let orch = orchestrator(store);
        orch.cancel_token().cancel();

        let report = orch
            .run(vec![ScrapeTarget {
                retailer: Retailer::Walmart,
                url: "https://www.walmart.com/ip/a/1".into(),
            }])
            .await
            .unwrap();
        assert_eq!(report.cancelled, 1);
        assert_eq!(report.succeeded, 0);
    }
}
