//! Crawl lifecycle: state transitions, launch serialization and startup
//! reconciliation.

pub mod status;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::storage::{CrawlStore, FulfilledCrawling, StoreError};

pub use self::status::{CrawlAction, CrawlStatus, ExecutionStatus, ParseStatusError};

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("crawl {crawl_id}: cannot {action} while {from}")]
    InvalidTransition {
        crawl_id: i64,
        from: CrawlStatus,
        action: CrawlAction,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for CrawlError {
    fn from(e: rusqlite::Error) -> Self {
        CrawlError::Store(e.into())
    }
}

impl From<r2d2::Error> for CrawlError {
    fn from(e: r2d2::Error) -> Self {
        CrawlError::Store(e.into())
    }
}

/// One crawl run against one seed under one guideline.
#[derive(Debug, Clone, Serialize)]
pub struct Crawl {
    pub id: i64,
    pub seed_id: i64,
    pub guideline_id: i64,
    pub status: CrawlStatus,
    /// Execution the current (or last) run belongs to.
    pub execution_id: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Result of a launch attempt that did not violate the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchOutcome {
    Launched,
    /// Another crawl holds the single crawler slot.
    Rejected,
}

/// Rows moved by a bulk stop/fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub crawls: usize,
    pub executions: usize,
}

/// Drives crawl transitions against a [`CrawlStore`].
#[derive(Clone)]
pub struct CrawlStateMachine {
    store: Arc<dyn CrawlStore>,
    single_crawl: bool,
}

impl CrawlStateMachine {
    pub fn new(store: Arc<dyn CrawlStore>, single_crawl: bool) -> Self {
        Self {
            store,
            single_crawl,
        }
    }

    pub fn crawl(&self, crawl_id: i64) -> Result<Crawl, StoreError> {
        self.store.crawl(crawl_id)
    }

    /// `Created|terminal -> Launched`. Under the single-crawl policy the
    /// active check and the update happen in one store transaction.
    pub fn launch(
        &self,
        crawl_id: i64,
        execution_id: Option<i64>,
    ) -> Result<LaunchOutcome, CrawlError> {
        let outcome = self
            .store
            .launch(crawl_id, execution_id, self.single_crawl)?;
        match outcome {
            LaunchOutcome::Launched => {
                info!(crawl_id, ?execution_id, "crawl launched");
            }
            LaunchOutcome::Rejected => {
                warn!(crawl_id, "launch rejected: another crawl is active");
            }
        }
        Ok(outcome)
    }

    /// `Launched -> Finished`, recording the fulfilled crawling for the
    /// execution the run was launched under.
    pub fn finish(&self, crawl_id: i64) -> Result<Option<FulfilledCrawling>, CrawlError> {
        let fulfilled = self.store.finish(crawl_id)?;
        info!(
            crawl_id,
            fulfilled_crawling_id = fulfilled.as_ref().map(|f| f.id),
            "crawl finished"
        );
        Ok(fulfilled)
    }

    /// Administrative halt: every running crawl and execution becomes `Stopped`.
    pub fn stop_all(&self) -> Result<ReconcileSummary, StoreError> {
        let summary = self.store.stop_all_active()?;
        info!(
            crawls = summary.crawls,
            executions = summary.executions,
            "stopped active crawls"
        );
        Ok(summary)
    }

    /// Startup reconciliation: whatever was running when the previous process
    /// died becomes `Error`.
    pub fn fail_all(&self) -> Result<ReconcileSummary, StoreError> {
        let summary = self.store.fail_all_active()?;
        if summary.crawls > 0 || summary.executions > 0 {
            warn!(
                crawls = summary.crawls,
                executions = summary.executions,
                "marked interrupted crawls as failed"
            );
        }
        Ok(summary)
    }

    pub fn is_any_active(&self) -> Result<bool, StoreError> {
        self.store.is_any_active()
    }
}
