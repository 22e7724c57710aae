//! Shared fixtures for the integration tests: a temp database and export
//! root, plus recording and failing collaborators.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use observatory::config::{MailConfig, ReportsConfig};
use observatory::mail::{MailMessage, Mailer, NotificationError};
use observatory::orchestrator::ReportOrchestrator;
use observatory::report::{PdfReportBuilder, ReportBuilder, ReportError, ReportRequest};
use observatory::storage::{
    CrawlStore, CssResource, Evaluation, EvaluationStore, FulfilledCrawling, SqliteStore,
    StoreError,
};

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub store: SqliteStore,
    pub observatory_id: i64,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("observatory.db");
        let store = SqliteStore::open(db.to_str().unwrap()).unwrap();
        let observatory_id = store.register_observatory("Ayuntamientos", 2).unwrap();
        Self {
            dir,
            store,
            observatory_id,
        }
    }

    pub fn export_root(&self) -> PathBuf {
        self.dir.path().join("exports")
    }

    pub fn reports_config(&self) -> ReportsConfig {
        ReportsConfig {
            export_root: self.export_root(),
            workers: 2,
            claim_stale_after_secs: 3600,
        }
    }

    pub fn new_execution(&self) -> i64 {
        self.store.launch_execution(self.observatory_id).unwrap().id
    }

    pub fn new_seed(&self, name: &str, dependency: Option<&str>) -> i64 {
        let urls = vec![format!("http://{}.example.org/", name.to_lowercase())];
        let seed_id = self.store.register_seed(name, None, dependency, &urls).unwrap();
        self.store.attach_seed(self.observatory_id, seed_id).unwrap();
        seed_id
    }

    /// Run a crawl of `seed_id` in `execution_id` to completion and record
    /// `pages` evaluations with `stylesheets` CSS resources each.
    pub fn crawl(&self, seed_id: i64, execution_id: i64, pages: usize, stylesheets: usize) -> FulfilledCrawling {
        let crawl_id = self.store.register_crawl(seed_id, 1).unwrap();
        self.run_crawl(crawl_id, execution_id, pages, stylesheets)
    }

    /// Same as [`Fixture::crawl`] but reusing an existing crawl.
    pub fn run_crawl(&self, crawl_id: i64, execution_id: i64, pages: usize, stylesheets: usize) -> FulfilledCrawling {
        self.store.launch(crawl_id, Some(execution_id), false).unwrap();
        let fulfilled = self.store.finish(crawl_id).unwrap().unwrap();

        for page in 0..pages {
            let css: Vec<CssResource> = (0..stylesheets)
                .map(|i| CssResource {
                    url: format!("http://static.example.org/css/style{i}.css?v={page}"),
                    code: format!("body {{ margin: {i}px; }}"),
                })
                .collect();
            self.store
                .register_evaluation(
                    fulfilled.id,
                    &format!("http://www.example.org/section/page{page}.html"),
                    &format!("<html><body>page {page}</body></html>"),
                    &css,
                )
                .unwrap();
        }
        fulfilled
    }

    pub fn orchestrator(&self, mailer: Arc<dyn Mailer>) -> Arc<ReportOrchestrator> {
        let shared = Arc::new(self.store.clone());
        self.orchestrator_with(shared.clone(), Arc::new(PdfReportBuilder::new(shared)), mailer)
    }

    pub fn orchestrator_with(
        &self,
        evaluations: Arc<dyn EvaluationStore>,
        builder: Arc<dyn ReportBuilder>,
        mailer: Arc<dyn Mailer>,
    ) -> Arc<ReportOrchestrator> {
        Arc::new(ReportOrchestrator::new(
            Arc::new(self.store.clone()),
            evaluations,
            builder,
            mailer,
            self.reports_config(),
            MailConfig::default(),
        ))
    }
}

/// Keeps every message instead of sending it.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<MailMessage>>,
}

impl RecordingMailer {
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl Mailer for RecordingMailer {
    fn send_mail(&self, message: &MailMessage) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Always fails, counting attempts.
#[derive(Default)]
pub struct FailingMailer {
    pub attempts: Mutex<usize>,
}

impl Mailer for FailingMailer {
    fn send_mail(&self, _message: &MailMessage) -> Result<(), NotificationError> {
        *self.attempts.lock().unwrap() += 1;
        Err(NotificationError::Queue("smtp relay unreachable".into()))
    }
}

/// Delegates to the real store but fails evaluation lookups for one
/// fulfilled crawling.
pub struct FlakyEvaluations {
    pub inner: SqliteStore,
    pub broken_fulfilled_id: i64,
}

impl EvaluationStore for FlakyEvaluations {
    fn evaluation_ids(&self, fulfilled_crawling_id: i64) -> Result<Vec<i64>, StoreError> {
        if fulfilled_crawling_id == self.broken_fulfilled_id {
            return Err(StoreError::NotFound {
                entity: "fulfilled crawling",
                id: fulfilled_crawling_id,
            });
        }
        self.inner.evaluation_ids(fulfilled_crawling_id)
    }

    fn evaluation(&self, evaluation_id: i64) -> Result<Evaluation, StoreError> {
        self.inner.evaluation(evaluation_id)
    }
}

/// Delegates to the real store but cannot load one evaluation.
pub struct UnreadableEvaluation {
    pub inner: SqliteStore,
    pub broken_evaluation_id: i64,
}

impl EvaluationStore for UnreadableEvaluation {
    fn evaluation_ids(&self, fulfilled_crawling_id: i64) -> Result<Vec<i64>, StoreError> {
        self.inner.evaluation_ids(fulfilled_crawling_id)
    }

    fn evaluation(&self, evaluation_id: i64) -> Result<Evaluation, StoreError> {
        if evaluation_id == self.broken_evaluation_id {
            return Err(StoreError::NotFound {
                entity: "evaluation",
                id: evaluation_id,
            });
        }
        self.inner.evaluation(evaluation_id)
    }
}

/// Records what each build was asked to render, then renders for real.
pub struct RecordingBuilder {
    pub inner: PdfReportBuilder,
    pub requests: Mutex<Vec<(String, Vec<i64>, Vec<i64>)>>,
}

impl RecordingBuilder {
    pub fn new(inner: PdfReportBuilder) -> Self {
        Self {
            inner,
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl ReportBuilder for RecordingBuilder {
    fn build(&self, request: &ReportRequest<'_>) -> Result<(), ReportError> {
        self.requests.lock().unwrap().push((
            request.seed_name.to_string(),
            request.evaluation_ids.to_vec(),
            request.previous_evaluation_ids.to_vec(),
        ));
        self.inner.build(request)
    }
}

/// Writes half a report, then fails.
pub struct BrokenBuilder;

impl ReportBuilder for BrokenBuilder {
    fn build(&self, request: &ReportRequest<'_>) -> Result<(), ReportError> {
        if let Some(parent) = request.destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(request.destination, b"%PDF-1.4\n")?;
        Err(ReportError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "renderer crashed",
        )))
    }
}
