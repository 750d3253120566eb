//! End-to-end pipeline tests over scripted adapters and a real database
//! file: orchestrator fan-out, session retry behavior, rate limiter
//! coupling, and dedup through the store.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use reviewscrape::error::{FetchError, ParseError, ValidationError};
use reviewscrape::models::{
    FailureReason, RawReview, Retailer, ReviewRecord, ScrapeTarget, TaskOutcome,
};
use reviewscrape::orchestrator::{AdapterFactory, Orchestrator};
use reviewscrape::rate_limit::{RateLimitConfig, RateLimiter};
use reviewscrape::scrapers::{ParsedPage, ProductContext, RetailerAdapter};
use reviewscrape::session::SessionConfig;
use reviewscrape::storage::{ReviewFilter, ReviewStore};

/// Scripted adapter. Behavior keys off the URL: `gone` fails permanently,
/// `flaky` fails transiently for the first two attempts. Pages and rows
/// are deterministic so review ids are stable across runs.
struct ScriptedAdapter {
    retailer: Retailer,
    pages: u32,
    rows_per_page: usize,
    fetches: AtomicU32,
    flaky_attempts: AtomicU32,
}

impl ScriptedAdapter {
    fn new(retailer: Retailer, pages: u32, rows_per_page: usize) -> Arc<Self> {
        Arc::new(Self {
            retailer,
            pages,
            rows_per_page,
            fetches: AtomicU32::new(0),
            flaky_attempts: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl RetailerAdapter for ScriptedAdapter {
    fn retailer(&self) -> Retailer {
        self.retailer
    }

    fn product_id(&self, url: &str) -> Option<String> {
        url.rsplit('/').next().map(str::to_string)
    }

    async fn fetch_page(&self, url: &str, page: u32) -> Result<String, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if url.contains("gone") {
            return Err(FetchError::Permanent("HTTP 404".into()));
        }
        if url.contains("flaky") && self.flaky_attempts.fetch_add(1, Ordering::SeqCst) < 2 {
            return Err(FetchError::Transient("HTTP 503".into()));
        }
        Ok(format!("url={url};page={page}"))
    }

    fn parse_reviews(&self, content: &str) -> Result<ParsedPage, ParseError> {
        let page: u32 = content
            .split(';')
            .find_map(|part| part.strip_prefix("page="))
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| ParseError("no page marker".into()))?;
        let url = content
            .split(';')
            .find_map(|part| part.strip_prefix("url="))
            .unwrap_or("");

        Ok(ParsedPage {
            rows: (0..self.rows_per_page)
                .map(|i| RawReview {
                    native_id: Some(format!("{}-p{page}-r{i}", url.len())),
                    reviewer_name: Some(format!("reviewer-{i}")),
                    rating: Some(if url.contains("badrow") && i == 0 {
                        9.0
                    } else {
                        4.0
                    }),
                    text: Some("holds up well".into()),
                    ..Default::default()
                })
                .collect(),
            has_more_pages: page < self.pages,
            product_name: Some("Scripted Product".into()),
        })
    }

    fn normalize(
        &self,
        raw: RawReview,
        ctx: &ProductContext,
    ) -> Result<ReviewRecord, ValidationError> {
        // Deliberately skips validation so the store's own gate is what
        // rejects bad rows in these tests.
        Ok(ReviewRecord {
            review_id: ReviewRecord::derive_id(
                self.retailer,
                raw.native_id.as_deref(),
                &ctx.product_id,
                raw.reviewer_name.as_deref(),
                raw.date_raw.as_deref(),
                raw.text.as_deref(),
            ),
            product_id: ctx.product_id.clone(),
            product_name: ctx.product_name.clone(),
            product_url: ctx.product_url.clone(),
            retailer: self.retailer,
            reviewer_name: raw.reviewer_name,
            rating: raw.rating.unwrap_or(0.0),
            review_title: raw.title,
            review_text: raw.text,
            review_date: None,
            review_date_raw: raw.date_raw,
            verified_purchase: raw.verified_purchase,
            helpful_votes: raw.helpful_votes,
            collected_at: Utc::now(),
        })
    }
}

struct ScriptedFactory {
    walmart: Arc<ScriptedAdapter>,
    target: Arc<ScriptedAdapter>,
    ulta: Arc<ScriptedAdapter>,
}

impl ScriptedFactory {
    fn new() -> Self {
        Self {
            walmart: ScriptedAdapter::new(Retailer::Walmart, 3, 2),
            target: ScriptedAdapter::new(Retailer::Target, 1, 1),
            ulta: ScriptedAdapter::new(Retailer::Ulta, 1, 2),
        }
    }
}

impl AdapterFactory for ScriptedFactory {
    fn adapter_for(&self, retailer: Retailer) -> Arc<dyn RetailerAdapter> {
        match retailer {
            Retailer::Walmart => self.walmart.clone(),
            Retailer::Target => self.target.clone(),
            Retailer::Ulta => self.ulta.clone(),
        }
    }
}

fn fast_limiter() -> RateLimiter {
    RateLimiter::new(RateLimitConfig {
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(8),
        backoff_multiplier: 2.0,
    })
}

fn orchestrator(
    store: ReviewStore,
    factory: Arc<ScriptedFactory>,
    limiter: RateLimiter,
) -> Orchestrator {
    Orchestrator::new(
        store,
        limiter,
        factory,
        SessionConfig {
            max_retries: 3,
            max_pages: 10,
        },
        4,
    )
}

fn target(retailer: Retailer, url: &str) -> ScrapeTarget {
    ScrapeTarget {
        retailer,
        url: url.into(),
    }
}

#[tokio::test]
async fn full_run_persists_paginates_and_dedupes_across_reruns() {
    let dir = tempfile::tempdir().unwrap();
    let store = ReviewStore::open(&dir.path().join("reviews.db")).unwrap();
    let factory = Arc::new(ScriptedFactory::new());

    let targets = vec![
        target(Retailer::Walmart, "https://www.walmart.com/ip/a/1"),
        target(Retailer::Target, "https://www.target.com/p/b/-/2"),
        target(Retailer::Target, "https://www.target.com/p/gone/-/3"),
    ];

    let orch = orchestrator(store.clone(), factory.clone(), fast_limiter());
    let report = orch.run(targets.clone()).await.unwrap();

    assert_eq!(report.total_urls, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert!(report.outcomes.iter().any(|t| matches!(
        &t.outcome,
        TaskOutcome::Failed(FailureReason::Permanent(msg)) if msg.contains("404")
    )));

    // Walmart advertised 3 pages and was fetched exactly 3 times.
    assert_eq!(factory.walmart.fetches.load(Ordering::SeqCst), 3);

    // 3 pages x 2 rows + 1 row, everything new on the first run.
    assert_eq!(report.reviews_found, 7);
    assert_eq!(report.reviews_persisted, 7);
    assert_eq!(report.reviews_duplicate, 0);
    assert_eq!(store.stats().await.unwrap().total_reviews, 7);

    // A second run over the same targets finds the same ids again.
    let rerun = orchestrator(store.clone(), factory.clone(), fast_limiter())
        .run(targets)
        .await
        .unwrap();
    assert_eq!(rerun.reviews_persisted, 0);
    assert_eq!(rerun.reviews_duplicate, 7);
    assert_eq!(store.stats().await.unwrap().total_reviews, 7);

    // Every task outcome across both runs was recorded.
    assert_eq!(store.stats().await.unwrap().total_runs, 6);
}

#[tokio::test]
async fn transient_failures_retry_with_backoff_then_recover() {
    let store = ReviewStore::open_in_memory().unwrap();
    let factory = Arc::new(ScriptedFactory::new());
    let limiter = fast_limiter();

    let report = orchestrator(store, factory, limiter.clone())
        .run(vec![target(
            Retailer::Ulta,
            "https://www.ulta.com/p/flaky-pimprod1",
        )])
        .await
        .unwrap();

    assert_eq!(report.succeeded, 1);
    let task = &report.outcomes[0];
    assert_eq!(task.retries_used, 2);
    assert_eq!(task.pages_fetched, 1);

    // Two failure reports grew the delay; the eventual success reset it.
    let stats = limiter.stats().await;
    let ulta = &stats[&Retailer::Ulta];
    assert_eq!(ulta.failure_reports, 2);
    assert!(!ulta.in_backoff);
    assert_eq!(
        limiter.current_delay(Retailer::Ulta).await,
        Duration::from_millis(1)
    );
}

#[tokio::test]
async fn store_gate_rejects_bad_rows_without_losing_good_ones() {
    let store = ReviewStore::open_in_memory().unwrap();
    let factory = Arc::new(ScriptedFactory::new());

    // One of the two ulta rows carries an out-of-range rating.
    let report = orchestrator(store.clone(), factory, fast_limiter())
        .run(vec![target(
            Retailer::Ulta,
            "https://www.ulta.com/p/badrow-pimprod2",
        )])
        .await
        .unwrap();

    assert_eq!(report.reviews_found, 2);
    assert_eq!(report.reviews_persisted, 1);
    assert_eq!(report.reviews_rejected, 1);

    let rows = store.get_reviews(&ReviewFilter::default()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].rating, 4.0);
}
