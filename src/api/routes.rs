//! API route definitions.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::state::AppState;
use super::ApiError;
use crate::crawl::LaunchOutcome;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route(
            "/observatories/{id}/executions/{execution_id}/reports",
            post(generate_reports),
        )
        .route("/crawls/stop", post(stop_crawls))
        .route("/crawls/{id}", get(crawl_status))
        .route("/crawls/{id}/launch", post(launch_crawl))
        .route("/crawls/{id}/finish", post(finish_crawl))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let crawling = state.crawls.is_any_active().ok();
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "crawling": crawling,
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

#[derive(Debug, Deserialize)]
struct ReportsBody {
    email: String,
}

/// Start report generation for an execution. Returns before any report is
/// built; the requester hears back by mail.
async fn generate_reports(
    State(state): State<AppState>,
    Path((observatory_id, execution_id)): Path<(i64, i64)>,
    Json(body): Json<ReportsBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let email = body.email.trim();
    if email.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "email is required",
        ));
    }

    let job = state
        .reports
        .job_for_execution(observatory_id, execution_id, email)?;
    let seeds = job.fulfilled_crawlings.len();
    info!(observatory_id, execution_id, seeds, "report generation requested");
    state.reports.spawn_generate_reports(job);

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "data": {
                "observatory_id": observatory_id,
                "execution_id": execution_id,
                "seeds": seeds,
            }
        })),
    ))
}

async fn crawl_status(
    State(state): State<AppState>,
    Path(crawl_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let crawl = state.crawls.crawl(crawl_id)?;
    Ok(Json(json!({ "data": crawl })))
}

#[derive(Debug, Default, Deserialize)]
struct LaunchParams {
    execution_id: Option<i64>,
}

async fn launch_crawl(
    State(state): State<AppState>,
    Path(crawl_id): Path<i64>,
    Query(params): Query<LaunchParams>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let outcome = state.crawls.launch(crawl_id, params.execution_id)?;
    let status = match outcome {
        LaunchOutcome::Launched => StatusCode::OK,
        LaunchOutcome::Rejected => StatusCode::CONFLICT,
    };
    Ok((
        status,
        Json(json!({ "data": { "crawl_id": crawl_id, "outcome": outcome } })),
    ))
}

async fn finish_crawl(
    State(state): State<AppState>,
    Path(crawl_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let fulfilled = state.crawls.finish(crawl_id)?;
    Ok(Json(json!({
        "data": { "crawl_id": crawl_id, "fulfilled_crawling": fulfilled }
    })))
}

async fn stop_crawls(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let summary = state.crawls.stop_all()?;
    Ok(Json(json!({ "data": summary })))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt; // for `oneshot`

    use crate::api::router;
    use crate::api::state::AppState;
    use crate::config::{MailConfig, ReportsConfig};
    use crate::crawl::CrawlStateMachine;
    use crate::mail::LogMailer;
    use crate::orchestrator::ReportOrchestrator;
    use crate::report::PdfReportBuilder;
    use crate::storage::SqliteStore;

    use super::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: SqliteStore,
        app: Router,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("api.db").to_str().unwrap()).unwrap();
        let shared = Arc::new(store.clone());
        let reports = ReportsConfig {
            export_root: dir.path().join("exports"),
            ..Default::default()
        };
        let orchestrator = ReportOrchestrator::new(
            shared.clone(),
            shared.clone(),
            Arc::new(PdfReportBuilder::new(shared.clone())),
            Arc::new(LogMailer),
            reports,
            MailConfig::default(),
        );
        let state = AppState {
            crawls: CrawlStateMachine::new(shared, true),
            reports: Arc::new(orchestrator),
        };
        Fixture {
            _dir: dir,
            store,
            app: router(state),
        }
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 10_000)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let f = fixture();
        let (status, json) = call(&f.app, "GET", "/api/v1/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["status"], "ok");
        assert_eq!(json["data"]["crawling"], false);
    }

    #[tokio::test]
    async fn test_crawl_lifecycle_over_http() {
        let f = fixture();
        let seed = f.store.register_seed("Portal", None, None, &[]).unwrap();
        let first = f.store.register_crawl(seed, 1).unwrap();
        let second = f.store.register_crawl(seed, 1).unwrap();

        let (status, json) = call(&f.app, "POST", &format!("/api/v1/crawls/{first}/launch"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["outcome"], "launched");

        let (status, json) = call(&f.app, "POST", &format!("/api/v1/crawls/{second}/launch"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["data"]["outcome"], "rejected");

        let (status, json) = call(&f.app, "GET", &format!("/api/v1/crawls/{first}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["status"], "launched");

        let (status, _) = call(&f.app, "POST", &format!("/api/v1/crawls/{first}/launch"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(&f.app, "POST", "/api/v1/crawls/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, json) = call(&f.app, "GET", &format!("/api/v1/crawls/{first}"), None).await;
        assert_eq!(json["data"]["status"], "stopped");
    }

    #[tokio::test]
    async fn test_unknown_crawl_is_404() {
        let f = fixture();
        let (status, json) = call(&f.app, "GET", "/api/v1/crawls/999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn test_report_request_is_accepted() {
        let f = fixture();
        let observatory = f.store.register_observatory("Ayuntamientos", 1).unwrap();
        let execution = f.store.launch_execution(observatory).unwrap();

        let uri = format!("/api/v1/observatories/{observatory}/executions/{}/reports", execution.id);
        let (status, json) = call(&f.app, "POST", &uri, Some(json!({ "email": "ops@example.org" }))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["data"]["seeds"], 0);

        let (status, _) = call(&f.app, "POST", &uri, Some(json!({ "email": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &f.app,
            "POST",
            &format!("/api/v1/observatories/999/executions/{}/reports", execution.id),
            Some(json!({ "email": "ops@example.org" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let other = f.store.register_observatory("Diputaciones", 1).unwrap();
        let (status, json) = call(
            &f.app,
            "POST",
            &format!("/api/v1/observatories/{other}/executions/{}/reports", execution.id),
            Some(json!({ "email": "ops@example.org" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "not_found");
    }
}
