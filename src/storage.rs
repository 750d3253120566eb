//! Deduplicating review storage over SQLite.
//!
//! One table keyed by `review_id` with a storage-level UNIQUE constraint;
//! insert-or-recognize-duplicate runs as a single `INSERT OR IGNORE`, so
//! concurrent upserts of the same id can never both insert. Duplicates
//! refresh only `product_name` and `collected_at`; the originally stored
//! rating, text and date are immutable, which protects history from a
//! later parsing regression.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OpenFlags};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{StoreError, ValidationError};
use crate::models::{Retailer, ReviewRecord, TaskReport};

/// Result of one upsert.
#[derive(Debug)]
pub enum UpsertOutcome {
    /// First sighting; a row was written.
    Inserted,
    /// `review_id` already present; refreshable fields updated.
    Duplicate,
    /// The record violated a storage invariant; nothing was written.
    Rejected(ValidationError),
}

/// Sort keys accepted by the read-side query, whitelisted so filter input
/// never reaches SQL as free text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortBy {
    #[default]
    CollectedAt,
    Rating,
    ReviewDate,
    HelpfulVotes,
}

impl SortBy {
    fn column(self) -> &'static str {
        match self {
            Self::CollectedAt => "collected_at",
            Self::Rating => "rating",
            Self::ReviewDate => "review_date",
            Self::HelpfulVotes => "helpful_votes",
        }
    }
}

/// Read-side filter for the dashboard/export collaborators.
#[derive(Debug, Clone, Default)]
pub struct ReviewFilter {
    pub retailer: Option<Retailer>,
    pub product_id: Option<String>,
    pub min_rating: Option<f64>,
    pub max_rating: Option<f64>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub verified_only: bool,
    /// Substring match over review text and title.
    pub search: Option<String>,
    pub sort_by: SortBy,
    pub ascending: bool,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Summary statistics for monitoring and the status command.
#[derive(Debug, Default)]
pub struct StoreStats {
    pub total_reviews: u64,
    pub by_retailer: Vec<(String, u64)>,
    pub by_rating: Vec<(f64, u64)>,
    pub recent_reviews_24h: u64,
    pub total_runs: u64,
}

/// Handle to the review database, cloneable across tasks.
#[derive(Clone)]
pub struct ReviewStore {
    conn: Arc<Mutex<Connection>>,
}

impl ReviewStore {
    /// Open (or create) the database at `path` and ensure the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .map_err(|e| StoreError::Unavailable(format!("{}: {e}", path.display())))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        Self::init_schema(&conn)?;
        info!(path = %path.display(), "review store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS reviews (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                review_id TEXT UNIQUE NOT NULL,
                product_id TEXT NOT NULL,
                product_name TEXT NOT NULL,
                product_url TEXT NOT NULL,
                retailer TEXT NOT NULL,
                reviewer_name TEXT,
                rating REAL NOT NULL,
                review_title TEXT,
                review_text TEXT,
                review_date TEXT,
                review_date_raw TEXT,
                verified_purchase INTEGER NOT NULL DEFAULT 0,
                helpful_votes INTEGER NOT NULL DEFAULT 0,
                collected_at TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_reviews_retailer ON reviews(retailer);
            CREATE INDEX IF NOT EXISTS idx_reviews_rating ON reviews(rating);
            CREATE INDEX IF NOT EXISTS idx_reviews_product ON reviews(product_id);
            CREATE INDEX IF NOT EXISTS idx_reviews_collected ON reviews(collected_at);

            CREATE TABLE IF NOT EXISTS scrape_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                retailer TEXT NOT NULL,
                product_url TEXT NOT NULL,
                outcome TEXT NOT NULL,
                pages_fetched INTEGER NOT NULL,
                retries_used INTEGER NOT NULL,
                reviews_found INTEGER NOT NULL,
                reviews_rejected INTEGER NOT NULL,
                duration_ms INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#,
        )?;
        Ok(())
    }

    /// Insert a record, or recognize it as a duplicate of a prior
    /// sighting. Atomic per `review_id` via the UNIQUE constraint.
    pub async fn upsert(&self, record: &ReviewRecord) -> Result<UpsertOutcome, StoreError> {
        if let Err(reason) = record.validate() {
            debug!(review_id = %record.review_id, %reason, "record rejected");
            return Ok(UpsertOutcome::Rejected(reason));
        }

        let conn = self.conn.lock().await;
        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO reviews
                (review_id, product_id, product_name, product_url, retailer,
                 reviewer_name, rating, review_title, review_text, review_date,
                 review_date_raw, verified_purchase, helpful_votes, collected_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                record.review_id,
                record.product_id,
                record.product_name,
                record.product_url,
                record.retailer.as_str(),
                record.reviewer_name,
                record.rating,
                record.review_title,
                record.review_text,
                record.review_date.map(|d| d.to_string()),
                record.review_date_raw,
                record.verified_purchase,
                record.helpful_votes,
                record.collected_at.to_rfc3339(),
            ],
        )?;

        if inserted == 1 {
            return Ok(UpsertOutcome::Inserted);
        }

        // Prior sighting: refresh only the fields permitted to change.
        conn.execute(
            "UPDATE reviews SET product_name = ?1, collected_at = ?2 WHERE review_id = ?3",
            params![
                record.product_name,
                record.collected_at.to_rfc3339(),
                record.review_id
            ],
        )?;
        Ok(UpsertOutcome::Duplicate)
    }

    /// Record one session's terminal outcome for monitoring.
    pub async fn record_run(&self, task: &TaskReport) -> Result<(), StoreError> {
        let outcome = match &task.outcome {
            crate::models::TaskOutcome::Succeeded => "succeeded".to_string(),
            crate::models::TaskOutcome::Failed(reason) => format!("failed: {reason}"),
            crate::models::TaskOutcome::Cancelled => "cancelled".to_string(),
        };
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO scrape_runs
                (retailer, product_url, outcome, pages_fetched, retries_used,
                 reviews_found, reviews_rejected, duration_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                task.retailer.as_str(),
                task.url,
                outcome,
                task.pages_fetched,
                task.retries_used,
                task.reviews_found,
                task.reviews_rejected,
                task.duration.as_millis() as u64,
            ],
        )?;
        Ok(())
    }

    /// Read-side query with filtering, sorting and pagination.
    pub async fn get_reviews(&self, filter: &ReviewFilter) -> Result<Vec<ReviewRecord>, StoreError> {
        let mut sql = String::from(
            "SELECT review_id, product_id, product_name, product_url, retailer, \
             reviewer_name, rating, review_title, review_text, review_date, \
             review_date_raw, verified_purchase, helpful_votes, collected_at \
             FROM reviews WHERE 1=1",
        );
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(retailer) = filter.retailer {
            sql.push_str(&format!(" AND retailer = ?{}", values.len() + 1));
            values.push(Box::new(retailer.as_str().to_string()));
        }
        if let Some(ref product_id) = filter.product_id {
            sql.push_str(&format!(" AND product_id = ?{}", values.len() + 1));
            values.push(Box::new(product_id.clone()));
        }
        if let Some(min) = filter.min_rating {
            sql.push_str(&format!(" AND rating >= ?{}", values.len() + 1));
            values.push(Box::new(min));
        }
        if let Some(max) = filter.max_rating {
            sql.push_str(&format!(" AND rating <= ?{}", values.len() + 1));
            values.push(Box::new(max));
        }
        if let Some(from) = filter.date_from {
            sql.push_str(&format!(" AND review_date >= ?{}", values.len() + 1));
            values.push(Box::new(from.to_string()));
        }
        if let Some(to) = filter.date_to {
            sql.push_str(&format!(" AND review_date <= ?{}", values.len() + 1));
            values.push(Box::new(to.to_string()));
        }
        if filter.verified_only {
            sql.push_str(" AND verified_purchase = 1");
        }
        if let Some(ref search) = filter.search {
            let pattern = format!("%{search}%");
            sql.push_str(&format!(
                " AND (review_text LIKE ?{} OR review_title LIKE ?{})",
                values.len() + 1,
                values.len() + 2
            ));
            values.push(Box::new(pattern.clone()));
            values.push(Box::new(pattern));
        }

        sql.push_str(&format!(
            " ORDER BY {} {}",
            filter.sort_by.column(),
            if filter.ascending { "ASC" } else { "DESC" }
        ));
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit} OFFSET {}", filter.offset));
        }

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
            row_to_record,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Distinct products present in storage.
    pub async fn products(&self) -> Result<Vec<(String, String, String)>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT product_id, product_name, retailer FROM reviews ORDER BY product_name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.conn.lock().await;

        let total_reviews: u64 =
            conn.query_row("SELECT COUNT(*) FROM reviews", [], |row| row.get(0))?;
        let recent_reviews_24h: u64 = conn.query_row(
            "SELECT COUNT(*) FROM reviews \
             WHERE datetime(created_at) >= datetime('now', '-1 day')",
            [],
            |row| row.get(0),
        )?;
        let total_runs: u64 =
            conn.query_row("SELECT COUNT(*) FROM scrape_runs", [], |row| row.get(0))?;

        let mut stmt =
            conn.prepare("SELECT retailer, COUNT(*) FROM reviews GROUP BY retailer")?;
        let by_retailer = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn
            .prepare("SELECT rating, COUNT(*) FROM reviews GROUP BY rating ORDER BY rating")?;
        let by_rating = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(StoreStats {
            total_reviews,
            by_retailer,
            by_rating,
            recent_reviews_24h,
            total_runs,
        })
    }

    /// Export all stored reviews as pretty-printed JSON.
    pub async fn export_json(&self, output: &Path) -> Result<usize, StoreError> {
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let reviews = self
            .get_reviews(&ReviewFilter {
                ascending: true,
                sort_by: SortBy::CollectedAt,
                ..Default::default()
            })
            .await?;
        let file = std::fs::File::create(output)?;
        serde_json::to_writer_pretty(file, &reviews)?;
        info!(count = reviews.len(), path = %output.display(), "exported reviews");
        Ok(reviews.len())
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReviewRecord> {
    let retailer_text: String = row.get(4)?;
    let retailer = Retailer::parse(&retailer_text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown retailer: {retailer_text}").into(),
        )
    })?;
    let review_date: Option<String> = row.get(9)?;
    let collected_at: String = row.get(13)?;

    Ok(ReviewRecord {
        review_id: row.get(0)?,
        product_id: row.get(1)?,
        product_name: row.get(2)?,
        product_url: row.get(3)?,
        retailer,
        reviewer_name: row.get(5)?,
        rating: row.get(6)?,
        review_title: row.get(7)?,
        review_text: row.get(8)?,
        review_date: review_date.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
        review_date_raw: row.get(10)?,
        verified_purchase: row.get(11)?,
        helpful_votes: row.get(12)?,
        collected_at: DateTime::parse_from_rfc3339(&collected_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}
