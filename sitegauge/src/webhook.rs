//! HTTP surface: crawl-service webhooks and the dashboard trend query.
//!
//! Page callbacks are always acknowledged with `200` unless storage itself
//! failed; a malformed or misaddressed callback is answered with
//! `{"status":"ignored"}` and changes nothing.

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sitegauge_core::ingest::{FinalizeOutcome, IngestOutcome, IngestTarget};
use sitegauge_core::{
    AuditRecord, ClientId, CoreError, CrawlIngestionController, Database, Repository, Settings,
};
use sitegauge_scanner::{RawPage, StatusProbe};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

pub const SECRET_HEADER: &str = "x-webhook-secret";

/// State shared with every handler.
pub struct WebhookState<R> {
    pub controller: CrawlIngestionController<R>,
    /// Expected value of [`SECRET_HEADER`]; `None` disables the check.
    pub secret: Option<Arc<str>>,
}

impl<R> Clone for WebhookState<R> {
    fn clone(&self) -> Self {
        Self {
            controller: self.controller.clone(),
            secret: self.secret.clone(),
        }
    }
}

impl<R: Repository + 'static> WebhookState<R> {
    pub fn new(controller: CrawlIngestionController<R>, secret: Option<String>) -> Self {
        Self {
            controller,
            secret: secret.map(Arc::from),
        }
    }
}

/// Page callback body sent by the crawl service. Every field is optional so
/// that an incomplete callback can be acknowledged instead of rejected.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PagePayload {
    pub content: Option<String>,
    pub page_url: Option<String>,
    pub status_code: Option<u16>,
    pub original_status: Option<u16>,
    pub domain: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
}

impl PagePayload {
    /// The raw page this callback describes, or the name of the first
    /// required field it lacks.
    fn into_raw_page(self) -> Result<RawPage, &'static str> {
        let url = self.page_url.ok_or("page_url")?;
        let content = self.content.ok_or("content")?;
        let status = self.status_code.ok_or("status_code")?;
        let mut page = RawPage::new(url, status)
            .with_content(content)
            .with_fallbacks(self.title, self.description);
        page.original_status = self.original_status;
        Ok(page)
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PageAck {
    Ignored,
    Stored { url_id: i64 },
    Duplicate,
    Skipped,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompleteAck {
    Ignored,
    Completed { audit: AuditRecord },
    AlreadyCompleted { audit: AuditRecord },
    Aborted { reason: Option<String> },
}

pub fn router<R: Repository + 'static>(state: WebhookState<R>) -> Router {
    let webhooks = Router::new()
        .route("/webhooks/crawl/page", post(handle_page::<R>))
        .route("/webhooks/crawl/complete", post(handle_complete::<R>))
        .route_layer(middleware::from_fn_with_state(
            state.secret.clone(),
            require_secret,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/clients/:client_id/audits/trend", get(handle_trend::<R>))
        .merge(webhooks)
        .with_state(state)
}

async fn require_secret(
    State(secret): State<Option<Arc<str>>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = secret else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(SECRET_HEADER)
        .and_then(|h| h.to_str().ok());

    match provided {
        Some(value) if secrets_match(value, &expected) => next.run(request).await,
        _ => {
            debug!(path = %request.uri().path(), "webhook rejected: bad secret");
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": "unauthorized" })),
            )
                .into_response()
        }
    }
}

/// Constant-time in the bytes compared; only a length mismatch returns early.
pub fn secrets_match(provided: &str, expected: &str) -> bool {
    provided.len() == expected.len()
        && provided
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

fn target_from(params: &HashMap<String, String>) -> Option<IngestTarget> {
    let crawl_id = params.get("crawlId")?.trim().parse().ok()?;
    let client_id = params.get("clientId")?.trim().parse().ok()?;
    Some(IngestTarget {
        crawl_id,
        client_id,
    })
}

fn storage_failure(e: CoreError) -> Response {
    error!(error = %e, "webhook storage failure");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "status": "error" })),
    )
        .into_response()
}

async fn handle_page<R: Repository + 'static>(
    State(state): State<WebhookState<R>>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let Some(target) = target_from(&params) else {
        debug!("page callback without crawl or client id");
        return Json(PageAck::Ignored).into_response();
    };

    let payload = match serde_json::from_slice::<PagePayload>(&body) {
        Ok(payload) => payload,
        Err(e) => {
            debug!(crawl_id = target.crawl_id, error = %e, "unreadable page callback");
            return Json(PageAck::Ignored).into_response();
        }
    };
    let domain = payload.domain.clone();
    let page = match payload.into_raw_page() {
        Ok(page) => page,
        Err(missing) => {
            debug!(crawl_id = target.crawl_id, missing, "page callback missing a required field");
            return Json(PageAck::Ignored).into_response();
        }
    };

    debug!(crawl_id = target.crawl_id, url = %page.url, domain = ?domain, "page callback");
    match state.controller.ingest_page(target, page).await {
        Ok(IngestOutcome::Stored(url_id)) => Json(PageAck::Stored { url_id }).into_response(),
        Ok(IngestOutcome::Duplicate) => Json(PageAck::Duplicate).into_response(),
        Ok(IngestOutcome::Skipped(_)) => Json(PageAck::Skipped).into_response(),
        Ok(IngestOutcome::Ignored(_)) => Json(PageAck::Ignored).into_response(),
        Err(e) => storage_failure(e),
    }
}

async fn handle_complete<R: Repository + 'static>(
    State(state): State<WebhookState<R>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(target) = target_from(&params) else {
        return Json(CompleteAck::Ignored).into_response();
    };

    let crawl = match state.controller.crawl(target.crawl_id).await {
        Ok(crawl) => crawl,
        Err(e) => return storage_failure(e),
    };
    if crawl.is_none_or(|c| c.client_id != target.client_id) {
        debug!(crawl_id = target.crawl_id, "completion for unknown crawl ignored");
        return Json(CompleteAck::Ignored).into_response();
    }

    let ack = match state.controller.finalize(target.crawl_id).await {
        Ok(FinalizeOutcome::Completed(audit)) => CompleteAck::Completed { audit },
        Ok(FinalizeOutcome::AlreadyCompleted(audit)) => CompleteAck::AlreadyCompleted { audit },
        Ok(FinalizeOutcome::Aborted(reason)) => CompleteAck::Aborted { reason },
        Err(e) => return storage_failure(e),
    };
    Json(ack).into_response()
}

async fn handle_trend<R: Repository + 'static>(
    State(state): State<WebhookState<R>>,
    Path(client_id): Path<ClientId>,
) -> Response {
    match state.controller.audit_trend(client_id).await {
        Ok(trend) => Json(trend).into_response(),
        Err(CoreError::UnknownClient(_)) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "unknown client" })),
        )
            .into_response(),
        Err(e) => storage_failure(e),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Run the webhook server until Ctrl-C.
pub async fn serve(settings: &Settings) -> Result<()> {
    let secret = settings
        .require_webhook_secret()
        .context("Refusing to serve webhooks without a shared secret")?
        .to_string();

    let db = Database::new(&settings.database_path).with_context(|| {
        format!("Failed to open database at {}", settings.database_path.display())
    })?;

    let mut controller = CrawlIngestionController::new(Arc::new(db));
    if settings.probe_links {
        let probe = StatusProbe::new(
            settings.request_timeout_secs,
            settings.crawl_concurrency,
            &settings.user_agent,
        )?;
        controller = controller.with_status_probe(probe);
    }

    let app = router(WebhookState::new(controller, Some(secret))).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = settings
        .bind_addr
        .parse()
        .context("Invalid bind address")?;
    let listener = TcpListener::bind(&addr)
        .await
        .context("Failed to bind webhook server")?;

    info!("Webhook server listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Webhook server shutting down");
        })
        .await
        .context("Webhook server error")?;

    Ok(())
}
