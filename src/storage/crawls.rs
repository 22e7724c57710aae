//! Crawl rows and their transitions.

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::{now_rfc3339, parse_timestamp, CrawlStore, FulfilledCrawling, SqliteStore, StoreError};
use crate::crawl::{
    Crawl, CrawlAction, CrawlError, CrawlStatus, ExecutionStatus, LaunchOutcome, ReconcileSummary,
};

fn load_crawl(conn: &Connection, crawl_id: i64) -> Result<Crawl, StoreError> {
    conn.query_row(
        "SELECT id, seed_id, guideline_id, status, execution_id, started_at, finished_at
         FROM crawls WHERE id = ?1",
        params![crawl_id],
        |row| {
            Ok(Crawl {
                id: row.get(0)?,
                seed_id: row.get(1)?,
                guideline_id: row.get(2)?,
                status: row.get(3)?,
                execution_id: row.get(4)?,
                started_at: parse_timestamp(row.get(5)?),
                finished_at: parse_timestamp(row.get(6)?),
            })
        },
    )
    .optional()?
    .ok_or(StoreError::NotFound {
        entity: "crawl",
        id: crawl_id,
    })
}

/// Checks that `action` is legal for the crawl and returns the target state.
fn next_status(crawl: &Crawl, action: CrawlAction) -> Result<CrawlStatus, CrawlError> {
    crawl
        .status
        .apply(action)
        .ok_or(CrawlError::InvalidTransition {
            crawl_id: crawl.id,
            from: crawl.status,
            action,
        })
}

impl SqliteStore {
    /// Register a new crawl in `Created` state.
    pub fn register_crawl(&self, seed_id: i64, guideline_id: i64) -> Result<i64, StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO crawls (seed_id, guideline_id, status) VALUES (?1, ?2, ?3)",
            params![seed_id, guideline_id, CrawlStatus::Created],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Move every running crawl and execution to the given terminal states.
    fn end_all_active(
        &self,
        crawl_status: CrawlStatus,
        execution_status: ExecutionStatus,
    ) -> Result<ReconcileSummary, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_rfc3339();

        let crawls = tx.execute(
            "UPDATE crawls SET status = ?1, finished_at = ?2 WHERE status = ?3",
            params![crawl_status, now, CrawlStatus::Launched],
        )?;
        let executions = tx.execute(
            "UPDATE observatory_executions SET status = ?1, finished_at = ?2 WHERE status = ?3",
            params![execution_status, now, ExecutionStatus::Launched],
        )?;

        tx.commit()?;
        Ok(ReconcileSummary { crawls, executions })
    }
}

impl CrawlStore for SqliteStore {
    fn crawl(&self, crawl_id: i64) -> Result<Crawl, StoreError> {
        let conn = self.pool.get()?;
        load_crawl(&conn, crawl_id)
    }

    fn launch(
        &self,
        crawl_id: i64,
        execution_id: Option<i64>,
        exclusive: bool,
    ) -> Result<LaunchOutcome, CrawlError> {
        let mut conn = self.pool.get()?;
        // IMMEDIATE takes the write lock up front, so the active check below
        // cannot interleave with another launch.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let crawl = load_crawl(&tx, crawl_id)?;
        let next = next_status(&crawl, CrawlAction::Launch)?;

        if exclusive {
            let active: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM crawls WHERE status = ?1)",
                params![CrawlStatus::Launched],
                |row| row.get(0),
            )?;
            if active {
                return Ok(LaunchOutcome::Rejected);
            }
        }

        tx.execute(
            "UPDATE crawls SET status = ?1, execution_id = ?2, started_at = ?3, finished_at = NULL
             WHERE id = ?4",
            params![next, execution_id, now_rfc3339(), crawl_id],
        )?;
        tx.commit()?;

        Ok(LaunchOutcome::Launched)
    }

    fn finish(&self, crawl_id: i64) -> Result<Option<FulfilledCrawling>, CrawlError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let crawl = load_crawl(&tx, crawl_id)?;
        let next = next_status(&crawl, CrawlAction::Finish)?;

        tx.execute(
            "UPDATE crawls SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![next, now_rfc3339(), crawl_id],
        )?;

        let fulfilled = match crawl.execution_id {
            Some(execution_id) => {
                tx.execute(
                    "INSERT INTO fulfilled_crawlings (crawl_id, execution_id, seed_id)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT (crawl_id, execution_id) DO NOTHING",
                    params![crawl_id, execution_id, crawl.seed_id],
                )?;
                let id: i64 = tx.query_row(
                    "SELECT id FROM fulfilled_crawlings WHERE crawl_id = ?1 AND execution_id = ?2",
                    params![crawl_id, execution_id],
                    |row| row.get(0),
                )?;
                Some(FulfilledCrawling {
                    id,
                    crawl_id,
                    execution_id,
                    seed_id: crawl.seed_id,
                })
            }
            None => None,
        };

        tx.commit()?;
        Ok(fulfilled)
    }

    fn stop_all_active(&self) -> Result<ReconcileSummary, StoreError> {
        self.end_all_active(CrawlStatus::Stopped, ExecutionStatus::Stopped)
    }

    fn fail_all_active(&self) -> Result<ReconcileSummary, StoreError> {
        self.end_all_active(CrawlStatus::Error, ExecutionStatus::Error)
    }

    fn is_any_active(&self) -> Result<bool, StoreError> {
        let conn = self.pool.get()?;
        let active = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM crawls WHERE status = ?1)",
            params![CrawlStatus::Launched],
            |row| row.get(0),
        )?;
        Ok(active)
    }
}
