//! ULTA review extraction.
//!
//! ULTA serves reviews through PowerReviews widgets (`pr-` classes and
//! `data-pr-review-id` attributes), with JSON-LD as a secondary source.
//! Ratings are native 1-5 stars, identical to the canonical scale.

use async_trait::async_trait;
use regex::Regex;
use scraper::Html;
use std::sync::OnceLock;

use super::extract::{self, HtmlRowRules};
use super::{normalize_raw, page_url, HttpClient, ParsedPage, ProductContext, RetailerAdapter};
use crate::error::{FetchError, ParseError, ValidationError};
use crate::models::{RawReview, Retailer, ReviewRecord};

const PRODUCT_NAME_SELECTORS: &[&str] = &[
    r#"[data-test="product-title"]"#,
    ".ProductInformation__title",
    "h1",
];

const REVIEW_CONTAINER_SELECTORS: &[&str] = &[
    ".pr-review",
    "[data-pr-review-id]",
    r#"[data-testid^="review"]"#,
];

const NEXT_PAGE_SELECTORS: &[&str] = &[
    ".pr-rd-pagination-btn--next",
    r#"a[aria-label="Next"]"#,
];

const ROW_RULES: HtmlRowRules = HtmlRowRules {
    reviewer: &[
        ".pr-rd-author-nickname",
        ".pr-review-author",
        ".reviewer-name",
    ],
    text: &[".pr-rd-description-text", ".review-text"],
    title: &[".pr-rd-review-headline", ".pr-review-title", "h3"],
    date: &[".pr-rd-author-submission-date", ".review-date", "time"],
    helpful: &[".pr-helpful-count", ".helpful-count"],
    native_id_attrs: &["data-pr-review-id", "data-review-id"],
    verified_markers: &["verified purchaser", "verified buyer"],
};

const DATE_FORMATS: &[&str] = &["%m/%d/%Y", "%b %d, %Y", "%B %d, %Y"];

fn pimprod_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"pimprod(\d+)").unwrap())
}

fn sku_param_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[?&]sku=(\d+)").unwrap())
}

pub struct UltaAdapter {
    client: HttpClient,
}

impl UltaAdapter {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RetailerAdapter for UltaAdapter {
    fn retailer(&self) -> Retailer {
        Retailer::Ulta
    }

    /// ULTA product URLs embed a `pimprod` id in the slug, with a `sku`
    /// query parameter as a fallback shape.
    fn product_id(&self, url: &str) -> Option<String> {
        pimprod_re()
            .captures(url)
            .or_else(|| sku_param_re().captures(url))
            .map(|c| c[1].to_string())
    }

    async fn fetch_page(&self, product_url: &str, page: u32) -> Result<String, FetchError> {
        let url = page_url(product_url, page)?;
        self.client.get_text(Retailer::Ulta, &url).await
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
        // PowerReviews ratings are 1-5 stars, already canonical.
        normalize_raw(Retailer::Ulta, raw, ctx, DATE_FORMATS, |v| v)
    }
}
