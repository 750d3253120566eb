//! Retailer adapter implementations.
//!
//! Each supported retailer implements [`RetailerAdapter`]: site-specific
//! request shapes and extraction rules behind one uniform capability
//! contract, so sessions and the orchestrator stay retailer-agnostic.
//! Adding a retailer means adding one variant implementing the same three
//! operations.

mod extract;
mod http_client;
mod target;
mod ulta;
mod user_agent;
mod walmart;

pub use http_client::HttpClient;
pub use target::TargetAdapter;
pub use ulta::UltaAdapter;
pub use walmart::WalmartAdapter;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{FetchError, ParseError, ValidationError};
use crate::models::{RawReview, Retailer, ReviewRecord};

/// One page of extraction output.
#[derive(Debug, Default)]
pub struct ParsedPage {
    /// Candidate rows in source order.
    pub rows: Vec<RawReview>,
    /// Whether the site advertises a further page of reviews.
    pub has_more_pages: bool,
    /// Product name as seen on this page, when present.
    pub product_name: Option<String>,
}

/// Product-level fields shared by every row of one session.
#[derive(Debug, Clone)]
pub struct ProductContext {
    pub product_id: String,
    pub product_name: String,
    pub product_url: String,
}

/// The capability contract every retailer variant satisfies.
#[async_trait]
pub trait RetailerAdapter: Send + Sync {
    fn retailer(&self) -> Retailer;

    /// Extract the retailer-scoped product id from a product URL.
    fn product_id(&self, url: &str) -> Option<String>;

    /// Fetch one page of the product's reviews.
    async fn fetch_page(&self, product_url: &str, page: u32) -> Result<String, FetchError>;

    /// Extract raw candidate rows from fetched page content.
    ///
    /// Missing optional fields yield `None` in the row, never an error;
    /// only a page with no recognizable review structure fails.
    fn parse_reviews(&self, content: &str) -> Result<ParsedPage, ParseError>;

    /// Normalize one raw row into a canonical record, converting the
    /// retailer-native rating scale to the common 1.0-5.0 scale.
    fn normalize(&self, raw: RawReview, ctx: &ProductContext) -> Result<ReviewRecord, ValidationError>;
}

/// Construct the adapter for a retailer over a shared HTTP client.
pub fn adapter_for(retailer: Retailer, client: HttpClient) -> Arc<dyn RetailerAdapter> {
    match retailer {
        Retailer::Walmart => Arc::new(WalmartAdapter::new(client)),
        Retailer::Target => Arc::new(TargetAdapter::new(client)),
        Retailer::Ulta => Arc::new(UltaAdapter::new(client)),
    }
}

/// Page 1 is the product URL itself; later pages add a `page` query
/// parameter, preserving the URL's existing query.
fn page_url(product_url: &str, page: u32) -> Result<String, FetchError> {
    if page <= 1 {
        return Ok(product_url.to_string());
    }
    let mut parsed = url::Url::parse(product_url)
        .map_err(|e| FetchError::Permanent(format!("malformed URL {product_url}: {e}")))?;
    parsed
        .query_pairs_mut()
        .append_pair("page", &page.to_string());
    Ok(parsed.to_string())
}

/// Shared normalization: identity conversions differ per adapter only in
/// the date formats tried and the native-scale conversion applied first.
pub(crate) fn normalize_raw(
    retailer: Retailer,
    raw: RawReview,
    ctx: &ProductContext,
    date_formats: &[&str],
    convert_rating: impl Fn(f64) -> f64,
) -> Result<ReviewRecord, ValidationError> {
    let rating = raw
        .rating
        .map(&convert_rating)
        .ok_or(ValidationError::MissingField("rating"))?;

    let (review_date, review_date_raw) = match raw.date_raw.as_deref() {
        Some(text) => match extract::parse_date(text, date_formats) {
            Some(date) => (Some(date), None),
            // Unparseable dates are kept as raw text, not dropped.
            None => (None, Some(text.to_string())),
        },
        None => (None, None),
    };

    let record = ReviewRecord {
        review_id: ReviewRecord::derive_id(
            retailer,
            raw.native_id.as_deref(),
            &ctx.product_id,
            raw.reviewer_name.as_deref(),
            raw.date_raw.as_deref(),
            raw.text.as_deref(),
        ),
        product_id: ctx.product_id.clone(),
        product_name: ctx.product_name.clone(),
        product_url: ctx.product_url.clone(),
        retailer,
        reviewer_name: raw.reviewer_name,
        rating,
        review_title: raw.title,
        review_text: raw.text,
        review_date,
        review_date_raw,
        verified_purchase: raw.verified_purchase,
        helpful_votes: raw.helpful_votes,
        collected_at: Utc::now(),
    };
    record.validate()?;
    Ok(record)
}
