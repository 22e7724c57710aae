//! Building the report of a single seed.

use std::fs;
use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{info, warn};

use super::ReportOrchestrator;
use crate::archive::ArchiveSummary;
use crate::artifact::{ArtifactLocation, BuildClaim};
use crate::report::{ReportError, ReportRequest};
use crate::storage::{FulfilledCrawling, StoreError};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("report rendering failed: {0}")]
    Report(#[from] ReportError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Built {
        pdf: PathBuf,
        /// `None` when the report was kept but the sources could not be packed.
        archive: Option<ArchiveSummary>,
    },
    /// The report already exists; nothing was touched.
    AlreadyBuilt,
    /// The crawl produced no evaluations; nothing was written.
    NoEvaluations,
    /// Another worker holds the claim on this seed.
    Busy,
}

impl ReportOrchestrator {
    /// Build the report and sources archive of one fulfilled crawling.
    ///
    /// Idempotent: an existing `<seed>.pdf` short-circuits everything. The
    /// report only appears under its final name once it is complete.
    pub fn build_pdf(
        &self,
        observatory_id: i64,
        execution_id: i64,
        fulfilled: &FulfilledCrawling,
    ) -> Result<BuildOutcome, BuildError> {
        let seed = self.observatories.seed(fulfilled.seed_id)?;
        let location = ArtifactLocation::new(
            &self.reports.export_root,
            observatory_id,
            execution_id,
            &seed,
        );

        if location.is_built() {
            info!(seed = %location.seed_name, pdf = %location.pdf.display(), "report already built");
            return Ok(BuildOutcome::AlreadyBuilt);
        }

        let evaluation_ids = self.evaluations.evaluation_ids(fulfilled.id)?;
        if evaluation_ids.is_empty() {
            info!(seed = %location.seed_name, "no evaluations, skipping report");
            return Ok(BuildOutcome::NoEvaluations);
        }

        let Some(claim) = BuildClaim::acquire(&location, self.claim_stale_after())? else {
            info!(seed = %location.seed_name, "report build already in progress elsewhere");
            return Ok(BuildOutcome::Busy);
        };

        // Another worker may have committed between the first check and the claim.
        if location.is_built() {
            return Ok(BuildOutcome::AlreadyBuilt);
        }

        let result = self.render_and_commit(
            observatory_id,
            execution_id,
            fulfilled,
            &location,
            &evaluation_ids,
        );
        if result.is_err() {
            discard_partial(&location);
        }
        drop(claim);
        result
    }

    fn render_and_commit(
        &self,
        observatory_id: i64,
        execution_id: i64,
        fulfilled: &FulfilledCrawling,
        location: &ArtifactLocation,
        evaluation_ids: &[i64],
    ) -> Result<BuildOutcome, BuildError> {
        let observatory = self.observatories.observatory(observatory_id)?;
        let previous_ids =
            self.previous_evaluation_ids(observatory_id, execution_id, fulfilled.seed_id)?;

        let staging = location.staging_pdf();
        let request = ReportRequest {
            evaluation_ids,
            previous_evaluation_ids: &previous_ids,
            destination: &staging,
            seed_name: &location.seed_name,
            dependency: &location.dependency,
            observatory_id,
            execution_id,
            observatory_kind: observatory.kind,
        };
        self.builder.build(&request)?;

        let archive = match self.archiver.archive(evaluation_ids, location) {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(seed = %location.seed_name, error = %e, "sources archive failed, keeping report");
                location.clean_transient();
                None
            }
        };

        location.commit()?;
        info!(
            seed = %location.seed_name,
            pdf = %location.pdf.display(),
            evaluations = evaluation_ids.len(),
            previous_evaluations = previous_ids.len(),
            "report built"
        );

        Ok(BuildOutcome::Built {
            pdf: location.pdf.clone(),
            archive,
        })
    }

    /// Evaluations of the same seed in the execution just before this one,
    /// or nothing when there is no such execution or the seed was not
    /// crawled in it.
    fn previous_evaluation_ids(
        &self,
        observatory_id: i64,
        execution_id: i64,
        seed_id: i64,
    ) -> Result<Vec<i64>, StoreError> {
        let Some(previous_execution) = self
            .observatories
            .previous_execution_id(observatory_id, execution_id)?
        else {
            return Ok(Vec::new());
        };
        let Some(previous_fulfilled) = self
            .observatories
            .fulfilled_crawling_for_seed(seed_id, previous_execution)?
        else {
            return Ok(Vec::new());
        };
        self.evaluations.evaluation_ids(previous_fulfilled)
    }
}

fn discard_partial(location: &ArtifactLocation) {
    location.clean_transient();
    let staging = location.staging_pdf();
    if let Err(e) = fs::remove_file(&staging) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %staging.display(), error = %e, "failed to remove staged report");
        }
    }
}
