//! Page source archiving.
//!
//! For every evaluation the raw HTML and each referenced stylesheet are
//! written to `sources/<n>/` under uniquely named files, with one
//! `"<file> --> <url>"` line per file in that directory's `references.txt`.
//! The tree is then packed into `sources.zip` and removed.

pub mod compress;

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::artifact::ArtifactLocation;
use crate::storage::{EvaluationStore, StoreError};

pub const REFERENCES_FILE: &str = "references.txt";
pub const DEFAULT_HTML_NAME: &str = "html.html";
pub const DEFAULT_CSS_NAME: &str = "css.css";

const TEMP_PREFIX: &str = "oaw_";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Evaluations whose sources made it into the archive.
    pub pages: usize,
    /// Source files written (HTML plus stylesheets).
    pub files: usize,
    /// Evaluations left out because their sources could not be written.
    pub skipped: Vec<i64>,
}

/// Writes evaluation sources next to a report and packs them.
#[derive(Clone)]
pub struct SourceArchiver {
    evaluations: Arc<dyn EvaluationStore>,
}

impl SourceArchiver {
    pub fn new(evaluations: Arc<dyn EvaluationStore>) -> Self {
        Self { evaluations }
    }

    /// Write, compress and clean up the sources of `evaluation_ids`.
    ///
    /// A failure on one evaluation only drops that evaluation's directory;
    /// only failing to produce the archive itself is an error.
    pub fn archive(
        &self,
        evaluation_ids: &[i64],
        location: &ArtifactLocation,
    ) -> Result<ArchiveSummary, ArchiveError> {
        let sources = location.sources_dir();
        fs::create_dir_all(&sources)?;

        let summary = self.write_sources(evaluation_ids, &sources);
        let result = compress::zip_directory(&location.dir, "sources", &location.archive());
        location.clean_transient();

        let stored = result?;
        info!(
            archive = %location.archive().display(),
            pages = summary.pages,
            files = stored,
            skipped = summary.skipped.len(),
            "sources archived"
        );
        Ok(summary)
    }

    /// Populate `sources/<n>/` for each evaluation, `n` being its 1-based
    /// position in `evaluation_ids`.
    pub fn write_sources(&self, evaluation_ids: &[i64], sources: &Path) -> ArchiveSummary {
        let mut summary = ArchiveSummary::default();

        for (position, &evaluation_id) in evaluation_ids.iter().enumerate() {
            let page_dir = sources.join((position + 1).to_string());
            match self.write_page(evaluation_id, &page_dir) {
                Ok(files) => {
                    summary.pages += 1;
                    summary.files += files;
                }
                Err(e) => {
                    warn!(evaluation_id, dir = %page_dir.display(), error = %e, "failed to write page sources");
                    if let Err(e) = fs::remove_dir_all(&page_dir) {
                        if e.kind() != io::ErrorKind::NotFound {
                            warn!(dir = %page_dir.display(), error = %e, "failed to remove partial page sources");
                        }
                    }
                    summary.skipped.push(evaluation_id);
                }
            }
        }

        summary
    }

    fn write_page(&self, evaluation_id: i64, page_dir: &Path) -> Result<usize, ArchiveError> {
        let evaluation = self.evaluations.evaluation(evaluation_id)?;
        fs::create_dir_all(page_dir)?;

        let mut references = OpenOptions::new()
            .create(true)
            .append(true)
            .open(page_dir.join(REFERENCES_FILE))?;

        let html_name = write_source_file(
            page_dir,
            &url_file_name(&evaluation.url, DEFAULT_HTML_NAME),
            &evaluation.source,
        )?;
        writeln!(references, "{} --> {}", html_name, evaluation.url)?;

        for css in &evaluation.css {
            let css_name = write_source_file(
                page_dir,
                &url_file_name(&css.url, DEFAULT_CSS_NAME),
                &css.code,
            )?;
            writeln!(references, "{} --> {}", css_name, css.url)?;
        }
        references.flush()?;

        debug!(evaluation_id, dir = %page_dir.display(), stylesheets = evaluation.css.len(), "page sources written");
        Ok(1 + evaluation.css.len())
    }
}

/// Write `content` to a new `oaw_<random>_<name>` file in `dir` and return
/// the generated file name.
fn write_source_file(dir: &Path, name: &str, content: &str) -> Result<String, ArchiveError> {
    let suffix = format!("_{name}");
    let mut file = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(&suffix)
        .tempfile_in(dir)?;
    file.write_all(content.as_bytes())?;
    let (_, path) = file.keep().map_err(|e| e.error)?;

    Ok(path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default())
}

/// Last path segment of `raw`, or `default` when there is none. Query and
/// fragment are ignored and the result is restricted to file-name-safe
/// characters.
pub fn url_file_name(raw: &str, default: &str) -> String {
    let last = match Url::parse(raw.trim()) {
        Ok(url) => url
            .path_segments()
            .and_then(|segments| segments.last())
            .unwrap_or("")
            .to_string(),
        Err(_) => raw
            .split(['?', '#'])
            .next()
            .unwrap_or("")
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or("")
            .to_string(),
    };

    let cleaned: String = last
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();

    if cleaned.chars().all(|c| c == '.') {
        default.to_string()
    } else {
        cleaned
    }
}
