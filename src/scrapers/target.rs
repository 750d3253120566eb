//! Target review extraction.
//!
//! Target renders reviews in a `data-test` attributed review section and
//! mirrors them in JSON-LD. Ratings are native 0-5, where 0 is the site's
//! "no rating" sentinel; values carry over unchanged and anything below
//! the canonical minimum is rejected at validation.

use async_trait::async_trait;
use regex::Regex;
use scraper::Html;
use std::sync::OnceLock;

use super::extract::{self, HtmlRowRules};
use super::{normalize_raw, page_url, HttpClient, ParsedPage, ProductContext, RetailerAdapter};
use crate::error::{FetchError, ParseError, ValidationError};
use crate::models::{RawReview, Retailer, ReviewRecord};

const PRODUCT_NAME_SELECTORS: &[&str] = &[
    r#"h1[data-test="product-title"]"#,
    "h1.h-display-3",
    ".pdp-product-name h1",
    "h1",
];

const REVIEW_CONTAINER_SELECTORS: &[&str] = &[
    r#"[data-test="reviews-section"] [data-test="review"]"#,
    r#"[data-test="review"]"#,
    ".review-item",
];

const NEXT_PAGE_SELECTORS: &[&str] = &[
    r#"[data-test="next"]:not([disabled])"#,
    r#"button[aria-label="next page"]:not([disabled])"#,
];

const ROW_RULES: HtmlRowRules = HtmlRowRules {
    reviewer: &[
        r#"[data-test="review-author"]"#,
        ".review-author",
        ".reviewer-name",
    ],
    text: &[
        r#"[data-test="review-text"]"#,
        ".review-text",
        ".review-content",
    ],
    title: &[r#"[data-test="review-title"]"#, ".review-title", "h3"],
    date: &[r#"[data-test="review-date"]"#, ".review-date", "time"],
    helpful: &[r#"[data-test="review-helpful"]"#, ".helpful-count"],
    native_id_attrs: &["data-review-id"],
    verified_markers: &["verified purchase", "verified purchaser"],
};

const DATE_FORMATS: &[&str] = &["%B %d, %Y", "%m/%d/%Y"];

fn tcin_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/A-(\d+)").unwrap())
}

fn tcin_param_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[?&]tcin=(\d+)").unwrap())
}

pub struct TargetAdapter {
    client: HttpClient,
}

impl TargetAdapter {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RetailerAdapter for TargetAdapter {
    fn retailer(&self) -> Retailer {
        Retailer::Target
    }

    /// Target product URLs carry the TCIN as `/p/product-name/-/A-12345`,
    /// or as a `tcin` query parameter.
    fn product_id(&self, url: &str) -> Option<String> {
        tcin_path_re()
            .captures(url)
            .or_else(|| tcin_param_re().captures(url))
            .map(|c| c[1].to_string())
    }

    async fn fetch_page(&self, product_url: &str, page: u32) -> Result<String, FetchError> {
        let url = page_url(product_url, page)?;
        self.client.get_text(Retailer::Target, &url).await
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
        // Native 0-5: rated values land on the canonical scale as-is; the
        // 0 sentinel falls below RATING_MIN and fails validation.
        normalize_raw(Retailer::Target, raw, ctx, DATE_FORMATS, |v| v)
    }
}
