//! SQLite storage layer -- schema, queries, migrations.
//!
//! The pipeline talks to persistence through three traits so that tests can
//! substitute fakes:
//!
//! - [`CrawlStore`]: crawl status transitions and bulk reconciliation.
//! - [`ObservatoryStore`]: observatories, seeds, executions and fulfilled crawlings.
//! - [`EvaluationStore`]: read-only access to evaluation results.
//!
//! [`SqliteStore`] implements all three over an r2d2 connection pool.

mod crawls;
mod evaluations;
mod observatories;
pub mod outbox;
pub mod schema;

use anyhow::Result;
use chrono::{DateTime, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::Serialize;
use thiserror::Error;

use crate::crawl::{Crawl, CrawlError, CrawlStatus, ExecutionStatus, LaunchOutcome, ReconcileSummary};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Persistence failures. Always surfaced to the caller, never retried here.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
}

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Observatory {
    pub id: i64,
    pub name: String,
    /// Observatory type code handed to the report builder.
    pub kind: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ObservatoryExecution {
    pub id: i64,
    pub observatory_id: i64,
    pub ordinal: i64,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Seed {
    pub id: i64,
    pub name: String,
    pub acronym: Option<String>,
    /// Organisation the seed depends on; groups artifacts on disk.
    pub dependency: Option<String>,
    pub urls: Vec<String>,
    pub active: bool,
}

/// A finished crawl joined to the execution it belongs to. The unit of
/// report-generation work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FulfilledCrawling {
    pub id: i64,
    pub crawl_id: i64,
    pub execution_id: i64,
    pub seed_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CssResource {
    pub url: String,
    pub code: String,
}

/// One page's analysis result as far as this pipeline needs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub id: i64,
    pub url: String,
    pub source: String,
    pub css: Vec<CssResource>,
}

// ---------------------------------------------------------------------------
// Store traits
// ---------------------------------------------------------------------------

pub trait CrawlStore: Send + Sync {
    fn crawl(&self, crawl_id: i64) -> Result<Crawl, StoreError>;

    /// Move a crawl to `Launched`. With `exclusive` set the launch is refused
    /// while any other crawl is `Launched`; check and update are atomic.
    fn launch(
        &self,
        crawl_id: i64,
        execution_id: Option<i64>,
        exclusive: bool,
    ) -> Result<LaunchOutcome, CrawlError>;

    fn finish(&self, crawl_id: i64) -> Result<Option<FulfilledCrawling>, CrawlError>;

    fn stop_all_active(&self) -> Result<ReconcileSummary, StoreError>;

    fn fail_all_active(&self) -> Result<ReconcileSummary, StoreError>;

    fn is_any_active(&self) -> Result<bool, StoreError>;
}

pub trait ObservatoryStore: Send + Sync {
    fn observatory(&self, observatory_id: i64) -> Result<Observatory, StoreError>;

    fn execution(&self, execution_id: i64) -> Result<ObservatoryExecution, StoreError>;

    fn seed(&self, seed_id: i64) -> Result<Seed, StoreError>;

    fn fulfilled_crawlings(&self, execution_id: i64) -> Result<Vec<FulfilledCrawling>, StoreError>;

    /// The execution of the same observatory with the highest ordinal below
    /// `execution_id`'s, if any.
    fn previous_execution_id(
        &self,
        observatory_id: i64,
        execution_id: i64,
    ) -> Result<Option<i64>, StoreError>;

    /// The fulfilled crawling that evaluated `seed_id` within `execution_id`.
    fn fulfilled_crawling_for_seed(
        &self,
        seed_id: i64,
        execution_id: i64,
    ) -> Result<Option<i64>, StoreError>;
}

pub trait EvaluationStore: Send + Sync {
    /// Evaluation ids of a fulfilled crawling, in evaluation order.
    fn evaluation_ids(&self, fulfilled_crawling_id: i64) -> Result<Vec<i64>, StoreError>;

    fn evaluation(&self, evaluation_id: i64) -> Result<Evaluation, StoreError>;
}

// ---------------------------------------------------------------------------
// SqliteStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn open(path: &str) -> Result<Self> {
        Ok(Self::new(open_pool(path)?))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

// ---------------------------------------------------------------------------
// Column conversions
// ---------------------------------------------------------------------------

impl ToSql for CrawlStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for CrawlStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for ExecutionStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for ExecutionStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
