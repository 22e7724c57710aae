//! Observatory -- crawl lifecycle and report generation for a web
//! accessibility observatory.
//!
//! This crate provides the crawl state machine, the per-execution report
//! orchestrator with its source archiver, the completion mailer and the HTTP
//! surface that triggers them.

pub mod api;
pub mod archive;
pub mod artifact;
pub mod config;
pub mod crawl;
pub mod mail;
pub mod orchestrator;
pub mod report;
pub mod storage;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::{MailConfig, MailTransport, ObservatoryConfig};
use crate::crawl::CrawlStateMachine;
use crate::mail::{LogMailer, Mailer, OutboxMailer};
use crate::orchestrator::ReportOrchestrator;
use crate::report::PdfReportBuilder;
use crate::storage::{Pool, SqliteStore};

/// Everything wired against one database.
#[derive(Clone)]
pub struct Services {
    pub store: SqliteStore,
    pub crawls: CrawlStateMachine,
    pub reports: Arc<ReportOrchestrator>,
}

impl Services {
    pub fn open(config: &ObservatoryConfig) -> Result<Self> {
        let db_path = &config.storage.db_path;
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        tracing::info!(%db_path, "Initializing database");
        let store = SqliteStore::open(db_path)?;
        let shared = Arc::new(store.clone());

        let crawls = CrawlStateMachine::new(shared.clone(), config.crawler.single_crawl);
        let reports = ReportOrchestrator::new(
            shared.clone(),
            shared.clone(),
            Arc::new(PdfReportBuilder::new(shared)),
            build_mailer(&config.mail, store.pool().clone()),
            config.reports.clone(),
            config.mail.clone(),
        );

        Ok(Self {
            store,
            crawls,
            reports: Arc::new(reports),
        })
    }
}

pub fn build_mailer(config: &MailConfig, pool: Pool) -> Arc<dyn Mailer> {
    match config.transport {
        MailTransport::Outbox => Arc::new(OutboxMailer::new(pool)),
        MailTransport::Log => Arc::new(LogMailer),
    }
}

/// Start the observatory daemon: reconcile leftovers, then serve the API
/// until Ctrl-C, stopping running crawls on the way out.
pub async fn serve(config: ObservatoryConfig) -> Result<()> {
    // 1. Storage and services
    let services = Services::open(&config)?;

    // 2. Whatever was running when the last process died did not finish
    services.crawls.fail_all()?;

    // 3. API server
    let addr: std::net::SocketAddr = config.server.bind.parse()?;
    let app = api::router(api::state::AppState {
        crawls: services.crawls.clone(),
        reports: Arc::clone(&services.reports),
    });

    tracing::info!(%addr, "Observatory listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 4. Administrative halt
    services.crawls.stop_all()?;
    tracing::info!("Observatory stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
