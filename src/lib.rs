//! reviewscrape - customer review collection for retail product pages.
//!
//! Scrapes product reviews from Walmart, Target and ULTA product pages,
//! normalizes them into one canonical record shape, and stores them
//! deduplicated in SQLite. Request pacing adapts per retailer based on
//! observed failures.

pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod rate_limit;
pub mod scrapers;
pub mod session;
pub mod storage;
