//! Shared extraction helpers for review pages.
//!
//! Brittle per-site selector logic lives in the adapters; the pieces every
//! site shares live here: JSON-LD traversal, rating text recovery and
//! date parsing.

use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;

use crate::models::{sanitize_text, RawReview};

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)").unwrap())
}

/// First non-empty text matched by any of the given selectors.
pub fn select_first_text(doc: &Html, selectors: &[&str]) -> Option<String> {
    for sel in selectors {
        let Ok(selector) = Selector::parse(sel) else {
            continue;
        };
        if let Some(el) = doc.select(&selector).next() {
            let text = element_text(&el);
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

/// First non-empty text under `root` matched by any selector.
pub fn select_first_text_in(root: &ElementRef<'_>, selectors: &[&str]) -> Option<String> {
    for sel in selectors {
        let Ok(selector) = Selector::parse(sel) else {
            continue;
        };
        if let Some(el) = root.select(&selector).next() {
            let text = element_text(&el);
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

/// Collected, whitespace-normalized text of one element.
pub fn element_text(el: &ElementRef<'_>) -> String {
    sanitize_text(&el.text().collect::<Vec<_>>().join(" "))
}

/// Whether any selector matches anywhere in the document.
pub fn any_match(doc: &Html, selectors: &[&str]) -> bool {
    selectors.iter().any(|sel| {
        Selector::parse(sel)
            .map(|s| doc.select(&s).next().is_some())
            .unwrap_or(false)
    })
}

/// Pull the first number out of free text like "4.5 out of 5 stars".
pub fn number_from_text(text: &str) -> Option<f64> {
    number_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Recover a rating from a review container: aria-labels mentioning
/// stars, then data attributes, in that order.
pub fn rating_from_element(root: &ElementRef<'_>) -> Option<f64> {
    let star_sel = Selector::parse("[aria-label]").ok()?;
    for el in root.select(&star_sel) {
        if let Some(label) = el.value().attr("aria-label") {
            let lower = label.to_ascii_lowercase();
            if lower.contains("star") || lower.contains("rating") {
                if let Some(n) = number_from_text(label) {
                    return Some(n);
                }
            }
        }
    }
    for attr in ["data-rating", "data-value", "data-score"] {
        let Ok(sel) = Selector::parse(&format!("[{attr}]")) else {
            continue;
        };
        if let Some(el) = root.select(&sel).next() {
            if let Some(v) = el.value().attr(attr).and_then(|v| v.parse().ok()) {
                return Some(v);
            }
        }
    }
    None
}

/// Parse a date against a preference-ordered format list.
pub fn parse_date(text: &str, formats: &[&str]) -> Option<NaiveDate> {
    let trimmed = text.trim();
    // ISO timestamps (JSON-LD datePublished) parse via their date prefix.
    if let Some(prefix) = trimmed.get(..10) {
        if let Ok(d) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            return Some(d);
        }
    }
    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
}

/// Extract review rows from JSON-LD `<script type="application/ld+json">`
/// blocks: direct Review objects, or Product objects carrying a `review`
/// field holding one review or an array of them.
pub fn json_ld_reviews(doc: &Html) -> Vec<RawReview> {
    let Ok(selector) = Selector::parse(r#"script[type="application/ld+json"]"#) else {
        return Vec::new();
    };

    let mut rows = Vec::new();
    for script in doc.select(&selector) {
        let body = script.text().collect::<String>();
        let Ok(data) = serde_json::from_str::<serde_json::Value>(&body) else {
            continue;
        };
        match data {
            serde_json::Value::Array(items) => {
                for item in &items {
                    collect_json_ld_item(item, &mut rows);
                }
            }
            item => collect_json_ld_item(&item, &mut rows),
        }
    }
    rows
}

fn collect_json_ld_item(item: &serde_json::Value, rows: &mut Vec<RawReview>) {
    let Some(obj) = item.as_object() else { return };

    if obj.get("@type").and_then(|t| t.as_str()) == Some("Review") {
        if let Some(row) = review_from_json(item) {
            rows.push(row);
        }
        return;
    }
    match obj.get("review") {
        Some(serde_json::Value::Array(reviews)) => {
            rows.extend(reviews.iter().filter_map(review_from_json));
        }
        Some(single) => rows.extend(review_from_json(single)),
        None => {}
    }
}

/// Build a raw row from one JSON review object, tolerating the key
/// variants seen across sites.
pub fn review_from_json(data: &serde_json::Value) -> Option<RawReview> {
    let obj = data.as_object()?;

    let reviewer_name = match obj.get("author") {
        Some(serde_json::Value::String(s)) => Some(sanitize_text(s)),
        Some(author) => author
            .get("name")
            .and_then(|n| n.as_str())
            .map(sanitize_text),
        None => None,
    }
    .filter(|s| !s.is_empty());

    let rating = match obj.get("reviewRating").or_else(|| obj.get("rating")) {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(nested) => nested.get("ratingValue").and_then(json_number),
        None => None,
    };

    let text = obj
        .get("reviewBody")
        .or_else(|| obj.get("description"))
        .and_then(|v| v.as_str())
        .map(sanitize_text)
        .filter(|s| !s.is_empty());
    let title = obj
        .get("name")
        .or_else(|| obj.get("headline"))
        .and_then(|v| v.as_str())
        .map(sanitize_text)
        .filter(|s| !s.is_empty());

    // A row with no content at all is noise, not a review.
    if text.is_none() && title.is_none() {
        return None;
    }

    let date_raw = obj
        .get("datePublished")
        .or_else(|| obj.get("dateCreated"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    Some(RawReview {
        native_id: obj
            .get("@id")
            .or_else(|| obj.get("id"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        reviewer_name,
        rating,
        title,
        text,
        date_raw,
        verified_purchase: obj
            .get("verifiedPurchase")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        helpful_votes: 0,
    })
}

/// Per-site selector rules for pulling one review out of an HTML
/// container. Adapters declare these as constants; the traversal skeleton
/// is shared.
pub struct HtmlRowRules {
    pub reviewer: &'static [&'static str],
    pub text: &'static [&'static str],
    pub title: &'static [&'static str],
    pub date: &'static [&'static str],
    pub helpful: &'static [&'static str],
    /// Container attributes that carry a native review id.
    pub native_id_attrs: &'static [&'static str],
    /// Lowercase phrases that mark a verified purchase.
    pub verified_markers: &'static [&'static str],
}

/// Extract one raw row from a review container element.
///
/// Defensive by construction: any field the container lacks comes back
/// `None`; a container with no text and no title yields no row at all.
pub fn row_from_container(root: &ElementRef<'_>, rules: &HtmlRowRules) -> Option<RawReview> {
    let text = select_first_text_in(root, rules.text);
    let title = select_first_text_in(root, rules.title).filter(|t| t.len() < 200);
    if text.is_none() && title.is_none() {
        return None;
    }

    let date_raw = select_first_text_in(root, rules.date).or_else(|| {
        // <time datetime="..."> without visible text.
        let sel = Selector::parse("time[datetime]").ok()?;
        root.select(&sel)
            .next()
            .and_then(|el| el.value().attr("datetime"))
            .map(|s| s.to_string())
    });

    let body_text = element_text(root).to_ascii_lowercase();
    let verified = rules
        .verified_markers
        .iter()
        .any(|marker| body_text.contains(marker));

    let helpful_votes = select_first_text_in(root, rules.helpful)
        .and_then(|t| number_from_text(&t))
        .map(|n| n as u32)
        .unwrap_or(0);

    let native_id = rules
        .native_id_attrs
        .iter()
        .find_map(|attr| root.value().attr(attr))
        .map(|s| s.to_string());

    Some(RawReview {
        native_id,
        reviewer_name: select_first_text_in(root, rules.reviewer),
        rating: rating_from_element(root),
        title,
        text,
        date_raw,
        verified_purchase: verified,
        helpful_votes,
    })
}

/// Select review containers and extract a row from each, in source order.
pub fn rows_from_containers(
    doc: &Html,
    container_selectors: &[&str],
    rules: &HtmlRowRules,
) -> Vec<RawReview> {
    for sel in container_selectors {
        let Ok(selector) = Selector::parse(sel) else {
            continue;
        };
        let rows: Vec<RawReview> = doc
            .select(&selector)
            .filter_map(|el| row_from_container(&el, rules))
            .collect();
        if !rows.is_empty() {
            return rows;
        }
    }
    Vec::new()
}

/// Drop rows that duplicate an earlier row's identity within one page,
/// preserving source order. Sites frequently render the same review in
/// both JSON-LD and HTML.
pub fn dedupe_rows(rows: Vec<RawReview>) -> Vec<RawReview> {
    let mut seen = std::collections::HashSet::new();
    rows.into_iter()
        .filter(|row| {
            let key = (
                row.reviewer_name.clone(),
                row.title.clone(),
                row.text.clone(),
            );
            seen.insert(key)
        })
        .collect()
}

fn json_number(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
