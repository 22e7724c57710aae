//! Report generation orchestrator.
//!
//! A batch covers the fulfilled crawlings of one observatory execution. Each
//! seed is built on the blocking pool, at most `reports.workers` at a time
//! across all batches, and the requester gets exactly one completion mail
//! once every seed has been attempted.

mod build;

pub use self::build::{BuildError, BuildOutcome};

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use crate::archive::SourceArchiver;
use crate::config::{MailConfig, ReportsConfig};
use crate::mail::Mailer;
use crate::report::ReportBuilder;
use crate::storage::{EvaluationStore, FulfilledCrawling, ObservatoryStore, StoreError};

/// One report-generation request.
#[derive(Debug, Clone)]
pub struct ReportJob {
    pub observatory_id: i64,
    pub execution_id: i64,
    pub fulfilled_crawlings: Vec<FulfilledCrawling>,
    /// Recipient of the completion mail.
    pub notify_email: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub built: usize,
    pub already_built: usize,
    pub no_evaluations: usize,
    pub busy: usize,
    pub failed: usize,
    pub notified: bool,
}

impl BatchSummary {
    fn record(&mut self, outcome: &BuildOutcome) {
        match outcome {
            BuildOutcome::Built { .. } => self.built += 1,
            BuildOutcome::AlreadyBuilt => self.already_built += 1,
            BuildOutcome::NoEvaluations => self.no_evaluations += 1,
            BuildOutcome::Busy => self.busy += 1,
        }
    }

    pub fn attempted(&self) -> usize {
        self.built + self.already_built + self.no_evaluations + self.busy + self.failed
    }
}

pub struct ReportOrchestrator {
    observatories: Arc<dyn ObservatoryStore>,
    evaluations: Arc<dyn EvaluationStore>,
    builder: Arc<dyn ReportBuilder>,
    archiver: SourceArchiver,
    mailer: Arc<dyn Mailer>,
    reports: ReportsConfig,
    mail: MailConfig,
    workers: Arc<Semaphore>,
}

impl ReportOrchestrator {
    pub fn new(
        observatories: Arc<dyn ObservatoryStore>,
        evaluations: Arc<dyn EvaluationStore>,
        builder: Arc<dyn ReportBuilder>,
        mailer: Arc<dyn Mailer>,
        reports: ReportsConfig,
        mail: MailConfig,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(reports.workers.max(1)));
        Self {
            archiver: SourceArchiver::new(Arc::clone(&evaluations)),
            observatories,
            evaluations,
            builder,
            mailer,
            reports,
            mail,
            workers,
        }
    }

    fn claim_stale_after(&self) -> Duration {
        Duration::from_secs(self.reports.claim_stale_after_secs)
    }

    /// Collect every fulfilled crawling of an execution into a job.
    pub fn job_for_execution(
        &self,
        observatory_id: i64,
        execution_id: i64,
        notify_email: &str,
    ) -> Result<ReportJob, StoreError> {
        self.observatories.observatory(observatory_id)?;
        let execution = self.observatories.execution(execution_id)?;
        if execution.observatory_id != observatory_id {
            // Another observatory's execution is not reachable from this one.
            return Err(StoreError::NotFound {
                entity: "execution",
                id: execution_id,
            });
        }
        let fulfilled_crawlings = self.observatories.fulfilled_crawlings(execution_id)?;
        Ok(ReportJob {
            observatory_id,
            execution_id,
            fulfilled_crawlings,
            notify_email: notify_email.to_string(),
        })
    }

    /// Start a batch in the background and return immediately.
    pub fn spawn_generate_reports(self: &Arc<Self>, job: ReportJob) -> JoinHandle<BatchSummary> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.generate_reports(job).await })
    }

    /// Build every seed of `job`, then send the completion mail.
    ///
    /// Seed failures are logged and counted, never propagated: a failed seed
    /// does not stop the others and does not suppress the notification.
    pub async fn generate_reports(self: &Arc<Self>, job: ReportJob) -> BatchSummary {
        let ReportJob {
            observatory_id,
            execution_id,
            fulfilled_crawlings,
            notify_email,
        } = job;
        let batch_id = Uuid::new_v4();
        let mut summary = BatchSummary {
            batch_id,
            ..Default::default()
        };

        info!(
            %batch_id,
            observatory_id,
            execution_id,
            seeds = fulfilled_crawlings.len(),
            "report generation started"
        );

        let mut tasks = JoinSet::new();
        for fulfilled in fulfilled_crawlings {
            let this = Arc::clone(self);
            let workers = Arc::clone(&self.workers);
            tasks.spawn(async move {
                let fulfilled_id = fulfilled.id;
                // The semaphore is never closed.
                let _permit = workers.acquire_owned().await.ok();
                let span = info_span!(
                    "seed_build",
                    %batch_id,
                    fulfilled_crawling_id = fulfilled.id,
                    crawl_id = fulfilled.crawl_id
                );
                let result = tokio::task::spawn_blocking(move || {
                    span.in_scope(|| this.build_pdf(observatory_id, execution_id, &fulfilled))
                })
                .await;
                (fulfilled_id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(Ok(outcome)))) => summary.record(&outcome),
                Ok((fulfilled_crawling_id, Ok(Err(e)))) => {
                    error!(%batch_id, fulfilled_crawling_id, error = %e, "report build failed");
                    summary.failed += 1;
                }
                Ok((fulfilled_crawling_id, Err(e))) => {
                    error!(%batch_id, fulfilled_crawling_id, error = %e, "report build task died");
                    summary.failed += 1;
                }
                Err(e) => {
                    error!(%batch_id, error = %e, "report build task died");
                    summary.failed += 1;
                }
            }
        }

        summary.notified = self.notify(batch_id, &notify_email).await;

        info!(
            %batch_id,
            observatory_id,
            execution_id,
            built = summary.built,
            already_built = summary.already_built,
            no_evaluations = summary.no_evaluations,
            busy = summary.busy,
            failed = summary.failed,
            notified = summary.notified,
            "report generation finished"
        );
        summary
    }

    async fn notify(&self, batch_id: Uuid, recipient: &str) -> bool {
        let message = self.mail.completion_message(recipient);
        let mailer = Arc::clone(&self.mailer);
        match tokio::task::spawn_blocking(move || mailer.send_mail(&message)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(%batch_id, recipient, error = %e, "completion mail not sent");
                false
            }
            Err(e) => {
                error!(%batch_id, recipient, error = %e, "completion mail task died");
                false
            }
        }
    }
}
