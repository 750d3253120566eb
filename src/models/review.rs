//! Review records and their identity derivation.
//!
//! A `RawReview` is the loosely-typed intermediate produced by page
//! extraction; a `ReviewRecord` is the canonical, validated unit that
//! reaches storage. Review identity is content-addressable when the
//! retailer exposes no native review id, so re-scraping the same review
//! always yields the same id.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ValidationError;

/// Lower bound of the canonical rating scale.
pub const RATING_MIN: f64 = 1.0;
/// Upper bound of the canonical rating scale.
pub const RATING_MAX: f64 = 5.0;

/// A supported review-hosting retailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retailer {
    Walmart,
    Target,
    Ulta,
}

impl Retailer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Walmart => "walmart",
            Self::Target => "target",
            Self::Ulta => "ulta",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "walmart" => Some(Self::Walmart),
            "target" => Some(Self::Target),
            "ulta" => Some(Self::Ulta),
            _ => None,
        }
    }

    pub fn domain(&self) -> &'static str {
        match self {
            Self::Walmart => "walmart.com",
            Self::Target => "target.com",
            Self::Ulta => "ulta.com",
        }
    }

    /// Identify the retailer that hosts a product URL, by domain suffix.
    pub fn for_url(url: &str) -> Option<Self> {
        let host = url::Url::parse(url).ok()?.host_str()?.to_ascii_lowercase();
        [Self::Walmart, Self::Target, Self::Ulta]
            .into_iter()
            .find(|r| host == r.domain() || host.ends_with(&format!(".{}", r.domain())))
    }
}

impl std::fmt::Display for Retailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw candidate row extracted from one page, before normalization.
///
/// Every field a site may or may not expose is optional here; extraction
/// never fails a whole page over one missing field. `rating` carries the
/// retailer-native value, converted to the canonical scale by the
/// adapter's `normalize`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawReview {
    /// Retailer-native review id, when the page exposes one.
    pub native_id: Option<String>,
    pub reviewer_name: Option<String>,
    /// Rating on the retailer's native scale.
    pub rating: Option<f64>,
    pub title: Option<String>,
    pub text: Option<String>,
    /// Date text exactly as it appeared on the page.
    pub date_raw: Option<String>,
    pub verified_purchase: bool,
    pub helpful_votes: u32,
}

/// The canonical unit of data: one customer review at one retailer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRecord {
    /// Globally unique identity, stable across re-scrapes.
    pub review_id: String,
    /// Retailer-scoped product identifier.
    pub product_id: String,
    /// Human-readable product name; may refresh on re-scrape.
    pub product_name: String,
    pub product_url: String,
    pub retailer: Retailer,
    pub reviewer_name: Option<String>,
    /// Rating on the canonical 1.0-5.0 scale.
    pub rating: f64,
    pub review_title: Option<String>,
    pub review_text: Option<String>,
    /// Canonical ISO date, when the source date parsed.
    pub review_date: Option<NaiveDate>,
    /// Source date text preserved verbatim when it did not parse.
    pub review_date_raw: Option<String>,
    pub verified_purchase: bool,
    pub helpful_votes: u32,
    /// Timestamp of the scrape that produced this record.
    pub collected_at: DateTime<Utc>,
}

impl ReviewRecord {
    /// Derive the stable review identity.
    ///
    /// Prefers the retailer-native id; falls back to a content hash over
    /// the fields that identify one review at one product.
    pub fn derive_id(
        retailer: Retailer,
        native_id: Option<&str>,
        product_id: &str,
        reviewer: Option<&str>,
        date_raw: Option<&str>,
        text: Option<&str>,
    ) -> String {
        if let Some(native) = native_id.filter(|s| !s.is_empty()) {
            return format!("{}:{}", retailer.as_str(), native);
        }
        let mut hasher = Sha256::new();
        hasher.update(product_id.as_bytes());
        hasher.update(b"|");
        hasher.update(reviewer.unwrap_or("").as_bytes());
        hasher.update(b"|");
        hasher.update(date_raw.unwrap_or("").as_bytes());
        hasher.update(b"|");
        hasher.update(text.unwrap_or("").as_bytes());
        let digest = hex::encode(hasher.finalize());
        format!("{}:{}", retailer.as_str(), &digest[..32])
    }

    /// Check the invariants that gate persistence.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.review_id.is_empty() {
            return Err(ValidationError::MissingField("review_id"));
        }
        if self.product_id.is_empty() {
            return Err(ValidationError::MissingField("product_id"));
        }
        if !self.rating.is_finite() || self.rating < RATING_MIN || self.rating > RATING_MAX {
            return Err(ValidationError::RatingOutOfRange {
                value: self.rating,
                min: RATING_MIN,
                max: RATING_MAX,
            });
        }
        if self.review_text.is_none() && self.review_title.is_none() {
            return Err(ValidationError::EmptyContent);
        }
        Ok(())
    }
}

/// Collapse whitespace and strip control characters from page text.
pub fn sanitize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{0}', "")
}
