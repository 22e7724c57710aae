//! Report rendering boundary.
//!
//! The orchestrator hands a [`ReportRequest`] to a [`ReportBuilder`] and
//! treats it as opaque. [`PdfReportBuilder`] is the default: a plain text PDF
//! listing the evaluated pages and how the page set moved since the previous
//! execution.

pub mod pdf;

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::storage::{EvaluationStore, StoreError};

use self::pdf::TextDocument;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Everything a builder gets to render one seed's report.
#[derive(Debug, Clone, Copy)]
pub struct ReportRequest<'a> {
    pub evaluation_ids: &'a [i64],
    /// Same seed in the previous execution; empty when there is none.
    pub previous_evaluation_ids: &'a [i64],
    pub destination: &'a Path,
    pub seed_name: &'a str,
    pub dependency: &'a str,
    pub observatory_id: i64,
    pub execution_id: i64,
    pub observatory_kind: i64,
}

/// Renders one report to `request.destination`, creating missing parent
/// directories. Must be deterministic for identical input.
pub trait ReportBuilder: Send + Sync {
    fn build(&self, request: &ReportRequest<'_>) -> Result<(), ReportError>;
}

/// How the set of evaluated pages changed against the previous execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trend {
    pub current_pages: usize,
    pub previous_pages: Option<usize>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl Trend {
    pub fn compare(current: &[String], previous: Option<&[String]>) -> Self {
        let now: BTreeSet<&String> = current.iter().collect();
        let (previous_pages, added, removed) = match previous {
            Some(previous) => {
                let before: BTreeSet<&String> = previous.iter().collect();
                (
                    Some(previous.len()),
                    now.difference(&before).map(|s| s.to_string()).collect(),
                    before.difference(&now).map(|s| s.to_string()).collect(),
                )
            }
            None => (None, Vec::new(), Vec::new()),
        };

        Self {
            current_pages: current.len(),
            previous_pages,
            added,
            removed,
        }
    }

    pub fn delta(&self) -> Option<i64> {
        self.previous_pages
            .map(|p| self.current_pages as i64 - p as i64)
    }
}

/// Default builder producing a text PDF from evaluation URLs.
#[derive(Clone)]
pub struct PdfReportBuilder {
    evaluations: Arc<dyn EvaluationStore>,
}

impl PdfReportBuilder {
    pub fn new(evaluations: Arc<dyn EvaluationStore>) -> Self {
        Self { evaluations }
    }

    fn urls(&self, ids: &[i64]) -> Result<Vec<String>, StoreError> {
        ids.iter()
            .map(|id| self.evaluations.evaluation(*id).map(|e| e.url))
            .collect()
    }

    fn render(&self, request: &ReportRequest<'_>) -> Result<TextDocument, ReportError> {
        let current = self.urls(request.evaluation_ids)?;
        let previous = if request.previous_evaluation_ids.is_empty() {
            None
        } else {
            Some(self.urls(request.previous_evaluation_ids)?)
        };
        let trend = Trend::compare(&current, previous.as_deref());

        let mut doc = TextDocument::new();
        doc.line("Web Accessibility Observatory - Results report")
            .blank()
            .line(format!("Site: {}", request.seed_name))
            .line(format!("Dependency: {}", request.dependency))
            .line(format!(
                "Observatory: {} (type {})",
                request.observatory_id, request.observatory_kind
            ))
            .line(format!("Execution: {}", request.execution_id))
            .blank()
            .line(format!("Pages evaluated: {}", trend.current_pages));

        match (trend.previous_pages, trend.delta()) {
            (Some(previous), Some(delta)) => {
                doc.line(format!("Pages in previous execution: {previous} ({delta:+})"));
                doc.line(format!("New pages: {}", trend.added.len()));
                doc.line(format!("Pages no longer evaluated: {}", trend.removed.len()));
            }
            _ => {
                doc.line("No previous execution to compare with.");
            }
        }

        doc.blank().line("Evaluated pages");
        for (i, url) in current.iter().enumerate() {
            doc.line(format!("{:>3}. {}", i + 1, url));
        }

        if !trend.added.is_empty() {
            doc.blank().line("New since previous execution");
            for url in &trend.added {
                doc.line(format!("  + {url}"));
            }
        }
        if !trend.removed.is_empty() {
            doc.blank().line("Missing since previous execution");
            for url in &trend.removed {
                doc.line(format!("  - {url}"));
            }
        }

        Ok(doc)
    }
}

impl ReportBuilder for PdfReportBuilder {
    fn build(&self, request: &ReportRequest<'_>) -> Result<(), ReportError> {
        let doc = self.render(request)?;
        if let Some(parent) = request.destination.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(request.destination, doc.to_bytes())?;
        debug!(
            destination = %request.destination.display(),
            pages = doc.page_count(),
            "report rendered"
        );
        Ok(())
    }
}
