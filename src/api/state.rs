use std::sync::Arc;

use crate::crawl::CrawlStateMachine;
use crate::orchestrator::ReportOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub crawls: CrawlStateMachine,
    pub reports: Arc<ReportOrchestrator>,
}
