//! Per-URL scrape session.
//!
//! A session drives one product URL through fetch, parse, normalize and
//! hand-off to the store consumer, reporting request outcomes back to the
//! shared rate limiter so backoff state reflects what the retailer is
//! actually doing. Retry pacing comes from the limiter itself: after a
//! failure report, the next `acquire` on that retailer waits the grown
//! delay, so the session never sleeps on its own.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::models::{FailureReason, Retailer, ReviewRecord, TaskOutcome, TaskReport};
use crate::rate_limit::RateLimiter;
use crate::scrapers::{ParsedPage, ProductContext, RetailerAdapter};

/// Knobs governing one session, shared by all sessions in a run.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Retries per page beyond the first attempt.
    pub max_retries: u32,
    /// Hard cap on pages walked for one product.
    pub max_pages: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_pages: 10,
        }
    }
}

/// What one page attempt resolved to, after retries.
enum PageResult {
    Parsed(ParsedPage),
    /// Later-page parse failure: keep what we have, stop walking.
    StopPagination,
    Failed(FailureReason),
    Cancelled,
}

pub struct ScrapeSession {
    adapter: Arc<dyn RetailerAdapter>,
    limiter: RateLimiter,
    sink: mpsc::Sender<ReviewRecord>,
    config: SessionConfig,
    cancel: CancellationToken,
}

impl ScrapeSession {
    pub fn new(
        adapter: Arc<dyn RetailerAdapter>,
        limiter: RateLimiter,
        sink: mpsc::Sender<ReviewRecord>,
        config: SessionConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            adapter,
            limiter,
            sink,
            config,
            cancel,
        }
    }

    /// Walk one product URL to a terminal outcome.
    pub async fn run(self, url: &str) -> TaskReport {
        let start = Instant::now();
        let retailer = self.adapter.retailer();

        let mut report = TaskReport {
            retailer,
            url: url.to_string(),
            outcome: TaskOutcome::Succeeded,
            pages_fetched: 0,
            retries_used: 0,
            reviews_found: 0,
            reviews_rejected: 0,
            duration: start.elapsed(),
        };

        let product_id = match self.adapter.product_id(url) {
            Some(id) => id,
            None => {
                warn!(%url, "no product id recognized in url");
                report.outcome =
                    TaskOutcome::Failed(FailureReason::InvalidUrl(url.to_string()));
                report.duration = start.elapsed();
                return report;
            }
        };

        let mut ctx: Option<ProductContext> = None;
        let mut page = 1u32;

        while page <= self.config.max_pages {
            if self.cancel.is_cancelled() {
                report.outcome = TaskOutcome::Cancelled;
                report.duration = start.elapsed();
                return report;
            }

            let parsed = match self.fetch_parsed(retailer, url, page, &mut report).await {
                PageResult::Parsed(parsed) => parsed,
                PageResult::StopPagination => break,
                PageResult::Failed(reason) => {
                    report.outcome = TaskOutcome::Failed(reason);
                    report.duration = start.elapsed();
                    return report;
                }
                PageResult::Cancelled => {
                    report.outcome = TaskOutcome::Cancelled;
                    report.duration = start.elapsed();
                    return report;
                }
            };

            // First successful page pins the product context for the rest
            // of the walk.
            let ctx = ctx.get_or_insert_with(|| ProductContext {
                product_id: product_id.clone(),
                product_name: parsed
                    .product_name
                    .clone()
                    .unwrap_or_else(|| "Unknown Product".to_string()),
                product_url: url.to_string(),
            });

            let row_count = parsed.rows.len();
            for raw in parsed.rows {
                match self.adapter.normalize(raw, ctx) {
                    Ok(record) => {
                        report.reviews_found += 1;
                        // Receiver gone means the run is tearing down.
                        if self.sink.send(record).await.is_err() {
                            report.outcome = TaskOutcome::Cancelled;
                            report.duration = start.elapsed();
                            return report;
                        }
                    }
                    Err(reason) => {
                        debug!(%retailer, page, %reason, "dropping review row");
                        report.reviews_rejected += 1;
                    }
                }
            }
            debug!(%retailer, page, rows = row_count, "page processed");

            if !parsed.has_more_pages {
                break;
            }
            page += 1;
        }

        info!(
            %retailer,
            %url,
            pages = report.pages_fetched,
            found = report.reviews_found,
            rejected = report.reviews_rejected,
            "session complete"
        );
        report.duration = start.elapsed();
        report
    }

    /// Fetch and parse one page, retrying transient failures within the
    /// attempt budget. First-page parse failures burn an attempt too; on
    /// later pages a parse failure just ends pagination.
    async fn fetch_parsed(
        &self,
        retailer: Retailer,
        url: &str,
        page: u32,
        report: &mut TaskReport,
    ) -> PageResult {
        let attempts = self.config.max_retries + 1;

        for attempt in 1..=attempts {
            if attempt > 1 {
                report.retries_used += 1;
            }

            let fetched = tokio::select! {
                _ = self.cancel.cancelled() => return PageResult::Cancelled,
                fetched = self.adapter.fetch_page(url, page) => fetched,
            };

            match fetched {
                Ok(body) => {
                    report.pages_fetched += 1;
                    self.limiter.report_success(retailer).await;
                    match self.adapter.parse_reviews(&body) {
                        Ok(parsed) => return PageResult::Parsed(parsed),
                        Err(err) if page == 1 => {
                            // An unrecognizable first page usually means a
                            // throttle interstitial; retry like a transient.
                            warn!(%retailer, attempt, %err, "first page unparseable");
                            self.limiter.report_failure(retailer).await;
                        }
                        Err(err) => {
                            warn!(%retailer, page, %err, "page unparseable, ending walk");
                            return PageResult::StopPagination;
                        }
                    }
                }
                Err(FetchError::Permanent(detail)) => {
                    warn!(%retailer, page, %detail, "permanent fetch failure");
                    return PageResult::Failed(FailureReason::Permanent(detail));
                }
                Err(err @ FetchError::Transient(_)) => {
                    debug!(%retailer, page, attempt, %err, "transient fetch failure");
                    self.limiter.report_failure(retailer).await;
                }
            }
        }

        PageResult::Failed(FailureReason::MaxRetriesExceeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ParseError, ValidationError};
    use crate::models::{RawReview, Retailer};
    use crate::rate_limit::{RateLimitConfig, RateLimiter};
    use crate::scrapers::normalize_raw;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted adapter: each fetch pops the next step; page bodies encode
    /// row count and pagination in a tiny `rows=N[;more]` format.
    struct StubAdapter {
        script: Mutex<VecDeque<Result<String, FetchError>>>,
    }

    impl StubAdapter {
        fn new(steps: Vec<Result<String, FetchError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(steps.into_iter().collect()),
            })
        }
    }

    #[async_trait]
    impl RetailerAdapter for StubAdapter {
        fn retailer(&self) -> Retailer {
            Retailer::Walmart
        }

        fn product_id(&self, url: &str) -> Option<String> {
            url.contains("/ip/").then(|| "111".to_string())
        }

        async fn fetch_page(&self, _url: &str, _page: u32) -> Result<String, FetchError> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::Transient("script exhausted".into())))
        }

        fn parse_reviews(&self, content: &str) -> Result<ParsedPage, ParseError> {
            if content == "garbage" {
                return Err(ParseError("unrecognizable".into()));
            }
            let rows = content
                .split(';')
                .find_map(|part| part.strip_prefix("rows="))
                .and_then(|n| n.parse::<usize>().ok())
                .unwrap_or(0);
            Ok(ParsedPage {
                rows: (0..rows)
                    .map(|i| RawReview {
                        native_id: Some(format!("r{i}-{}", content.len())),
                        rating: Some(4.0),
                        text: Some("fine".into()),
                        ..Default::default()
                    })
                    .collect(),
                has_more_pages: content.contains(";more"),
                product_name: Some("Stub Product".into()),
            })
        }

        fn normalize(
            &self,
            raw: RawReview,
            ctx: &ProductContext,
        ) -> Result<ReviewRecord, ValidationError> {
            normalize_raw(Retailer::Walmart, raw, ctx, &[], |v| v)
        }
    }

    fn fast_limiter() -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(8),
            backoff_multiplier: 2.0,
        })
    }

    fn session(adapter: Arc<StubAdapter>) -> (ScrapeSession, mpsc::Receiver<ReviewRecord>) {
        let (tx, rx) = mpsc::channel(64);
        (
            ScrapeSession::new(
                adapter,
                fast_limiter(),
                tx,
                SessionConfig {
                    max_retries: 2,
                    max_pages: 10,
                },
                CancellationToken::new(),
            ),
            rx,
        )
    }

    #[tokio::test]
    async fn walks_pages_until_no_more_marker() {
        let adapter = StubAdapter::new(vec![
            Ok("rows=2;more".into()),
            Ok("rows=2;more;p2".into()),
            Ok("rows=1".into()),
        ]);
        let (session, mut rx) = session(adapter);

        let report = session.run("https://www.walmart.com/ip/thing/111").await;
        assert!(matches!(report.outcome, TaskOutcome::Succeeded));
        assert_eq!(report.pages_fetched, 3);
        assert_eq!(report.reviews_found, 5);
        assert_eq!(report.retries_used, 0);

        rx.close();
        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, 5);
    }

    #[tokio::test]
    async fn transient_failures_retry_then_succeed() {
        let adapter = StubAdapter::new(vec![
            Err(FetchError::Transient("503".into())),
            Err(FetchError::Transient("timeout".into())),
            Ok("rows=1".into()),
        ]);
        let (session, _rx) = session(adapter);

        let report = session.run("https://www.walmart.com/ip/thing/111").await;
        assert!(matches!(report.outcome, TaskOutcome::Succeeded));
        assert_eq!(report.retries_used, 2);
        assert_eq!(report.reviews_found, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_task() {
        let adapter = StubAdapter::new(vec![
            Err(FetchError::Transient("503".into())),
            Err(FetchError::Transient("503".into())),
            Err(FetchError::Transient("503".into())),
        ]);
        let (session, _rx) = session(adapter);

        let report = session.run("https://www.walmart.com/ip/thing/111").await;
        assert!(matches!(
            report.outcome,
            TaskOutcome::Failed(FailureReason::MaxRetriesExceeded)
        ));
        assert_eq!(report.retries_used, 2);
    }

    #[tokio::test]
    async fn permanent_failure_stops_immediately() {
        let adapter = StubAdapter::new(vec![Err(FetchError::Permanent("404".into()))]);
        let (session, _rx) = session(adapter);

        let report = session.run("https://www.walmart.com/ip/thing/111").await;
        assert!(matches!(
            report.outcome,
            TaskOutcome::Failed(FailureReason::Permanent(_))
        ));
        assert_eq!(report.retries_used, 0);
    }

    #[tokio::test]
    async fn unrecognized_url_fails_without_fetching() {
        let adapter = StubAdapter::new(vec![Ok("rows=1".into())]);
        let (session, _rx) = session(adapter);

        let report = session.run("https://www.walmart.com/browse/nails").await;
        assert!(matches!(
            report.outcome,
            TaskOutcome::Failed(FailureReason::InvalidUrl(_))
        ));
        assert_eq!(report.pages_fetched, 0);
    }

    #[tokio::test]
    async fn first_page_parse_failure_burns_attempts() {
        let adapter = StubAdapter::new(vec![
            Ok("garbage".into()),
            Ok("garbage".into()),
            Ok("garbage".into()),
        ]);
        let (session, _rx) = session(adapter);

        let report = session.run("https://www.walmart.com/ip/thing/111").await;
        assert!(matches!(
            report.outcome,
            TaskOutcome::Failed(FailureReason::MaxRetriesExceeded)
        ));
    }

    #[tokio::test]
    async fn later_page_parse_failure_keeps_earlier_rows() {
        let adapter = StubAdapter::new(vec![Ok("rows=2;more".into()), Ok("garbage".into())]);
        let (session, _rx) = session(adapter);

        let report = session.run("https://www.walmart.com/ip/thing/111").await;
        assert!(matches!(report.outcome, TaskOutcome::Succeeded));
        assert_eq!(report.reviews_found, 2);
        assert_eq!(report.pages_fetched, 2);
    }

    #[tokio::test]
    async fn cancellation_before_start_is_terminal() {
        let adapter = StubAdapter::new(vec![Ok("rows=1".into())]);
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let session = ScrapeSession::new(
            adapter,
            fast_limiter(),
            tx,
            SessionConfig::default(),
            cancel,
        );
        let report = session.run("https://www.walmart.com/ip/thing/111").await;
        assert!(matches!(report.outcome, TaskOutcome::Cancelled));
        assert_eq!(report.pages_fetched, 0);
    }

    #[tokio::test]
    async fn failure_reports_grow_limiter_delay() {
        let adapter = StubAdapter::new(vec![
            Err(FetchError::Transient("503".into())),
            Err(FetchError::Transient("503".into())),
            Ok("rows=1".into()),
        ]);
        let limiter = fast_limiter();
        let (tx, _rx) = mpsc::channel(8);
        let session = ScrapeSession::new(
            adapter,
            limiter.clone(),
            tx,
            SessionConfig {
                max_retries: 2,
                max_pages: 1,
            },
            CancellationToken::new(),
        );

        session.run("https://www.walmart.com/ip/thing/111").await;
        // Two failures grew the delay, then the success reset it.
        assert_eq!(
            limiter.current_delay(Retailer::Walmart).await,
            Duration::from_millis(1)
        );
        let stats = limiter.stats().await;
        let walmart = &stats[&Retailer::Walmart];
        assert_eq!(walmart.failure_reports, 2);
        assert!(!walmart.in_backoff);
    }
}
