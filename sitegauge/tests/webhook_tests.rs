// Tests for the webhook router

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use sitegauge::webhook::{SECRET_HEADER, WebhookState, router, secrets_match};
use sitegauge_core::{CrawlIngestionController, CrawlState, Database, Repository};
use std::sync::Arc;
use tower::ServiceExt;

const SECRET: &str = "s3cret";

struct Harness {
    db: Arc<Database>,
    app: Router,
    client_id: i64,
    crawl_id: i64,
}

fn harness() -> Harness {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let client = db.create_client("Acme Corp").unwrap();
    let crawl = db
        .create_crawl(client.id, "https://acme.test/", "acme.test")
        .unwrap();
    let controller = CrawlIngestionController::new(db.clone());
    let app = router(WebhookState::new(controller, Some(SECRET.to_string())));
    Harness {
        db,
        app,
        client_id: client.id,
        crawl_id: crawl.id,
    }
}

fn page_body(url: &str, status: u16) -> Value {
    json!({
        "page_url": url,
        "status_code": status,
        "domain": "acme.test",
        "content": "<html><head><title>Acme widgets for every workshop and garage</title></head>\
                    <body><h1>Widgets</h1><a href=\"/about\">About</a></body></html>"
    })
}

async fn send(app: &Router, method: &str, uri: &str, secret: Option<&str>, body: Body) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(secret) = secret {
        builder = builder.header(SECRET_HEADER, secret);
    }
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn post_page(h: &Harness, body: Value) -> (StatusCode, Value) {
    let uri = format!(
        "/webhooks/crawl/page?crawlId={}&clientId={}",
        h.crawl_id, h.client_id
    );
    send(&h.app, "POST", &uri, Some(SECRET), Body::from(body.to_string())).await
}

async fn post_complete(h: &Harness) -> (StatusCode, Value) {
    let uri = format!(
        "/webhooks/crawl/complete?crawlId={}&clientId={}",
        h.crawl_id, h.client_id
    );
    send(&h.app, "POST", &uri, Some(SECRET), Body::empty()).await
}

// ============================================================================
// Page Callback Tests
// ============================================================================

#[tokio::test]
async fn test_page_is_stored() {
    let h = harness();
    let (status, body) = post_page(&h, page_body("https://acme.test/", 200)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "stored");
    assert!(body["url_id"].as_i64().is_some());

    let pages = h.db.pages_for_crawl(h.crawl_id).unwrap();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].page.internal_links, vec!["https://acme.test/about".to_string()]);
}

#[tokio::test]
async fn test_repeated_page_is_duplicate() {
    let h = harness();
    post_page(&h, page_body("https://acme.test/", 200)).await;
    let (status, body) = post_page(&h, page_body("https://acme.test/", 200)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "duplicate");
    assert_eq!(h.db.pages_for_crawl(h.crawl_id).unwrap().len(), 1);
}

#[tokio::test]
async fn test_empty_markup_is_skipped() {
    let h = harness();
    let body = json!({ "page_url": "https://acme.test/blank", "status_code": 200, "content": "   " });
    let (status, body) = post_page(&h, body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "skipped");
    assert!(h.db.pages_for_crawl(h.crawl_id).unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_page_url_is_acknowledged_and_ignored() {
    let h = harness();
    let body = json!({ "status_code": 200, "content": "<html><title>x</title></html>" });
    let (status, body) = post_page(&h, body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
    assert!(h.db.pages_for_crawl(h.crawl_id).unwrap().is_empty());

    let crawl = h.db.get_crawl(h.crawl_id).unwrap().unwrap();
    assert_eq!(crawl.state, CrawlState::Started);
}

#[tokio::test]
async fn test_missing_status_code_is_ignored() {
    let h = harness();
    let body = json!({ "page_url": "https://acme.test/", "content": "<html><title>x</title></html>" });
    let (status, body) = post_page(&h, body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
    assert!(h.db.pages_for_crawl(h.crawl_id).unwrap().is_empty());
}

#[tokio::test]
async fn test_unparseable_body_is_ignored() {
    let h = harness();
    let uri = format!(
        "/webhooks/crawl/page?crawlId={}&clientId={}",
        h.crawl_id, h.client_id
    );
    let (status, body) = send(&h.app, "POST", &uri, Some(SECRET), Body::from("not json")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
}

#[tokio::test]
async fn test_missing_query_ids_are_ignored() {
    let h = harness();
    let (status, body) = send(
        &h.app,
        "POST",
        "/webhooks/crawl/page?crawlId=abc",
        Some(SECRET),
        Body::from(page_body("https://acme.test/", 200).to_string()),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
    assert!(h.db.pages_for_crawl(h.crawl_id).unwrap().is_empty());
}

#[tokio::test]
async fn test_wrong_client_is_ignored() {
    let h = harness();
    let uri = format!(
        "/webhooks/crawl/page?crawlId={}&clientId={}",
        h.crawl_id,
        h.client_id + 100
    );
    let (status, body) = send(
        &h.app,
        "POST",
        &uri,
        Some(SECRET),
        Body::from(page_body("https://acme.test/", 200).to_string()),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
    assert!(h.db.pages_for_crawl(h.crawl_id).unwrap().is_empty());
}

// ============================================================================
// Secret Tests
// ============================================================================

#[tokio::test]
async fn test_bad_secret_is_rejected() {
    let h = harness();
    let uri = format!(
        "/webhooks/crawl/page?crawlId={}&clientId={}",
        h.crawl_id, h.client_id
    );
    let body = page_body("https://acme.test/", 200).to_string();

    let (status, _) = send(&h.app, "POST", &uri, Some("wrong"), Body::from(body.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&h.app, "POST", &uri, None, Body::from(body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert!(h.db.pages_for_crawl(h.crawl_id).unwrap().is_empty());
}

#[tokio::test]
async fn test_same_length_wrong_secret_is_rejected() {
    let h = harness();
    let uri = format!(
        "/webhooks/crawl/page?crawlId={}&clientId={}",
        h.crawl_id, h.client_id
    );
    let body = page_body("https://acme.test/", 200).to_string();

    let (status, _) = send(&h.app, "POST", &uri, Some("s3cres"), Body::from(body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(h.db.pages_for_crawl(h.crawl_id).unwrap().is_empty());
}

#[test]
fn test_secrets_match() {
    assert!(secrets_match("s3cret", "s3cret"));
    assert!(!secrets_match("s3cres", "s3cret"));
    assert!(!secrets_match("s3cret!", "s3cret"));
    assert!(!secrets_match("", "s3cret"));
    assert!(secrets_match("", ""));
}

#[tokio::test]
async fn test_health_needs_no_secret() {
    let h = harness();
    let (status, body) = send(&h.app, "GET", "/health", None, Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

// ============================================================================
// Completion Tests
// ============================================================================

#[tokio::test]
async fn test_complete_writes_audit_once() {
    let h = harness();
    post_page(&h, page_body("https://acme.test/", 200)).await;
    post_page(&h, page_body("https://acme.test/missing", 404)).await;

    let (status, body) = post_complete(&h).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["audit"]["pages"], 2);
    assert_eq!(body["audit"]["counters"]["pages_4xx_response"], 1);

    let (_, again) = post_complete(&h).await;
    assert_eq!(again["status"], "already_completed");
    assert_eq!(again["audit"]["id"], body["audit"]["id"]);

    let (_, late) = post_page(&h, page_body("https://acme.test/late", 200)).await;
    assert_eq!(late["status"], "ignored");
    assert_eq!(h.db.pages_for_crawl(h.crawl_id).unwrap().len(), 2);
}

#[tokio::test]
async fn test_complete_without_pages_aborts() {
    let h = harness();
    let (status, body) = post_complete(&h).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "aborted");
    assert!(h.db.audit_for_crawl(h.crawl_id).unwrap().is_none());
    let crawl = h.db.get_crawl(h.crawl_id).unwrap().unwrap();
    assert_eq!(crawl.state, CrawlState::Aborted);
}

#[tokio::test]
async fn test_complete_for_unknown_crawl_is_ignored() {
    let h = harness();
    let uri = format!("/webhooks/crawl/complete?crawlId=999&clientId={}", h.client_id);
    let (status, body) = send(&h.app, "POST", &uri, Some(SECRET), Body::empty()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
}

// ============================================================================
// Trend Tests
// ============================================================================

#[tokio::test]
async fn test_trend_before_any_audit() {
    let h = harness();
    let uri = format!("/clients/{}/audits/trend", h.client_id);
    let (status, body) = send(&h.app, "GET", &uri, None, Body::empty()).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["latest"].is_null());
    assert!(body["deltas"].is_null());
}

#[tokio::test]
async fn test_trend_after_completion() {
    let h = harness();
    post_page(&h, page_body("https://acme.test/", 200)).await;
    post_complete(&h).await;

    let uri = format!("/clients/{}/audits/trend", h.client_id);
    let (status, body) = send(&h.app, "GET", &uri, None, Body::empty()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["latest"]["crawl_id"], h.crawl_id);
    assert!(body["previous"].is_null());
}

#[tokio::test]
async fn test_trend_for_unknown_client_is_not_found() {
    let h = harness();
    let (status, _) = send(&h.app, "GET", "/clients/4242/audits/trend", None, Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
