//! HTTP surface for the sync service: the change-event webhook plus manual
//! triggers for the polling sweep and the initial backfill.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use loanbridge_sync::events::{self, ChangeNotification};
use loanbridge_sync::{poll, SyncContext};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "loanbridge-web";

#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<SyncContext>,
}

impl AppState {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/webhook/loan-change", post(webhook_handler))
        .route("/sync/poll", post(poll_handler))
        .route("/sync/initial", post(initial_sync_handler))
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({"status": "ok", "service": CRATE_NAME}))
}

/// Change-event intake. Always acknowledges with 200 so the source never
/// re-queues a poisoned event; failures land in the body and the logs.
async fn webhook_handler(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let event: ChangeNotification = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(err) => {
            warn!(%err, "unparseable change event");
            return Json(json!({
                "success": false,
                "error": format!("invalid change event: {err}"),
            }));
        }
    };

    let results = events::handle_change(&state.ctx, &event).await;
    let success = results.iter().all(|report| report.success);
    Json(json!({"success": success, "results": results}))
}

#[derive(Debug, Default, Deserialize)]
struct PollParams {
    hours: Option<i64>,
}

async fn poll_handler(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let params: PollParams = serde_json::from_slice(&body).unwrap_or_default();
    let hours = params.hours.unwrap_or(state.ctx.config.poll_window_hours);
    let report = poll::run_polling_sweep(&state.ctx, hours).await;
    let status = if report.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    (status, Json(report))
}

#[derive(Debug, Default, Deserialize)]
struct InitialSyncParams {
    limit: Option<usize>,
}

async fn initial_sync_handler(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let params: InitialSyncParams = serde_json::from_slice(&body).unwrap_or_default();
    let limit = params.limit.unwrap_or(state.ctx.config.initial_sync_limit);
    let report = poll::run_initial_sync(&state.ctx, limit).await;
    let status = if report.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    (status, Json(report))
}

/// Build the context from the environment, start the polling scheduler,
/// and serve until shutdown.
pub async fn serve_from_env() -> anyhow::Result<()> {
    let ctx = Arc::new(SyncContext::from_env()?);
    let _scheduler = poll::spawn_scheduler(ctx.clone()).await?;

    let port: u16 = std::env::var("LOANBRIDGE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "web server listening");
    axum::serve(listener, app(AppState::new(ctx))).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use loanbridge_core::{BorrowerBlock, LoanRecord};
    use loanbridge_sync::config::SyncConfig;
    use loanbridge_sync::fake::{FakeCrm, FakeSource};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    static STORE_SEQ: AtomicUsize = AtomicUsize::new(0);

    fn state_with(crm: FakeCrm, source: FakeSource) -> AppState {
        let mut config = SyncConfig::from_env();
        config.store_path = std::env::temp_dir()
            .join(format!(
                "loanbridge-web-test-{}-{}",
                std::process::id(),
                STORE_SEQ.fetch_add(1, Ordering::Relaxed)
            ))
            .join("deal_mappings.json")
            .to_string_lossy()
            .into_owned();
        config.owner_filter = String::new();
        AppState::new(Arc::new(SyncContext::new(
            Arc::new(crm),
            Arc::new(source),
            config,
        )))
    }

    fn loan() -> LoanRecord {
        LoanRecord {
            id: "a0X001".into(),
            status: Some("Application".into()),
            loan_number: Some("556677".into()),
            total_amount: Some(300_000.0),
            last_modified: Some(chrono::Utc::now()),
            borrower: BorrowerBlock {
                name: Some("Jane Doe".into()),
                email: Some("jane@example.com".into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn post_json(uri: &str, body: serde_json::Value) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = app(state_with(FakeCrm::new(), FakeSource::new()));
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn webhook_syncs_a_changed_loan() {
        let source = FakeSource::new();
        source.seed_loan(loan());
        let app = app(state_with(FakeCrm::new(), source));

        let event = serde_json::json!({
            "data": {"payload": {"ChangeEventHeader": {
                "entityName": "Loan",
                "changeType": "UPDATE",
                "recordIds": ["a0X001"],
            }}}
        });
        let resp = app
            .oneshot(post_json("/webhook/loan-change", event))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["success"], true);
        assert!(body["results"][0]["deal_id"].is_i64());
    }

    #[tokio::test]
    async fn webhook_acks_garbage_with_200() {
        let app = app(state_with(FakeCrm::new(), FakeSource::new()));
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/webhook/loan-change")
                    .body(Body::from("not json at all"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn webhook_acks_foreign_entities_without_syncing() {
        let app = app(state_with(FakeCrm::new(), FakeSource::new()));
        let event = serde_json::json!({
            "data": {"payload": {"ChangeEventHeader": {
                "entityName": "Invoice",
                "changeType": "UPDATE",
                "recordIds": ["x"],
            }}}
        });
        let resp = app
            .oneshot(post_json("/webhook/loan-change", event))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["results"][0]["skipped"], "wrong_entity");
    }

    #[tokio::test]
    async fn poll_endpoint_returns_a_batch_report() {
        let source = FakeSource::new();
        source.seed_loan(loan());
        let app = app(state_with(FakeCrm::new(), source));

        let resp = app
            .oneshot(post_json("/sync/poll", serde_json::json!({"hours": 24})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["synced"], 1);
    }

    #[tokio::test]
    async fn initial_sync_accepts_an_empty_body() {
        let source = FakeSource::new();
        source.seed_loan(loan());
        let app = app(state_with(FakeCrm::new(), source));

        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/sync/initial")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["synced"], 1);
    }
}
