//! Walmart review extraction.
//!
//! Walmart product pages carry reviews in JSON-LD structured data and in
//! HTML review cards; both are tried and merged. Ratings are native 1-5
//! stars, identical to the canonical scale.

use async_trait::async_trait;
use regex::Regex;
use scraper::Html;
use std::sync::OnceLock;

use super::extract::{self, HtmlRowRules};
use super::{normalize_raw, page_url, HttpClient, ParsedPage, ProductContext, RetailerAdapter};
use crate::error::{FetchError, ParseError, ValidationError};
use crate::models::{RawReview, Retailer, ReviewRecord};

const PRODUCT_NAME_SELECTORS: &[&str] = &[
    r#"h1[data-automation-id="product-title"]"#,
    r#"h1[itemprop="name"]"#,
    "h1",
];

const REVIEW_CONTAINER_SELECTORS: &[&str] = &[
    r#"[data-testid="review-card"]"#,
    ".review-item",
    ".customer-review",
];

const NEXT_PAGE_SELECTORS: &[&str] = &[
    r#"a[data-automation-id="pagination-next"]"#,
    r#"[aria-label="Next Page"]"#,
    r#"[data-testid="NextPage"]"#,
];

const ROW_RULES: HtmlRowRules = HtmlRowRules {
    reviewer: &[
        r#"[data-testid*="reviewer"]"#,
        ".reviewer-name",
        ".customer-name",
    ],
    text: &[
        r#"[data-testid*="review-text"]"#,
        ".review-text",
        ".review-content",
    ],
    title: &[
        r#"[data-testid*="review-title"]"#,
        ".review-title",
        "h3",
        "h4",
    ],
    date: &[r#"[data-testid*="review-date"]"#, ".review-date", "time"],
    helpful: &[r#"[data-testid*="helpful"]"#, ".helpful-count"],
    native_id_attrs: &["data-review-id"],
    verified_markers: &["verified purchase", "verified buyer"],
};

const DATE_FORMATS: &[&str] = &["%m/%d/%Y", "%B %d, %Y"];

fn product_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/ip/[^/]+/(\d+)").unwrap())
}

fn id_param_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[?&]id=(\d+)").unwrap())
}

pub struct WalmartAdapter {
    client: HttpClient,
}

impl WalmartAdapter {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RetailerAdapter for WalmartAdapter {
    fn retailer(&self) -> Retailer {
        Retailer::Walmart
    }

    /// Walmart product URLs look like `/ip/product-name/12345`, with an
    /// `id` query parameter as a fallback shape.
    fn product_id(&self, url: &str) -> Option<String> {
        product_id_re()
            .captures(url)
            .or_else(|| id_param_re().captures(url))
            .map(|c| c[1].to_string())
    }

    async fn fetch_page(&self, product_url: &str, page: u32) -> Result<String, FetchError> {
        let url = page_url(product_url, page)?;
        self.client.get_text(Retailer::Walmart, &url).await
    }

    fn parse_reviews(&self, content: &str) -> Result<ParsedPage, ParseError> {
        let doc = Html::parse_document(content);

        let mut rows = extract::json_ld_reviews(&doc);
        rows.extend(extract::rows_from_containers(
            &doc,
            REVIEW_CONTAINER_SELECTORS,
            &ROW_RULES,
        ));
        let rows = extract::dedupe_rows(rows);

        let product_name = extract::select_first_text(&doc, PRODUCT_NAME_SELECTORS);
        if rows.is_empty() && product_name.is_none() {
            return Err(ParseError(
                "no review containers or product frame found".into(),
            ));
        }

        Ok(ParsedPage {
            has_more_pages: extract::any_match(&doc, NEXT_PAGE_SELECTORS),
            rows,
            product_name,
        })
    }

    fn normalize(
        &self,
        raw: RawReview,
        ctx: &ProductContext,
    ) -> Result<ReviewRecord, ValidationError> {
        // Native 1-5 stars already match the canonical scale.
        normalize_raw(Retailer::Walmart, raw, ctx, DATE_FORMATS, |v| v)
    }
}
