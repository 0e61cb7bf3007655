use anyhow::Result;
use axum::{
    extract::{Multipart, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use shared::domain::ActorId;
use storage::MemoryStore;
use tokio::{net::TcpListener, sync::Mutex};

use super::*;

#[derive(Debug, Clone, PartialEq)]
struct ReceivedPart {
    field: String,
    file_name: Option<String>,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

#[derive(Clone, Default)]
struct StubState {
    authorization: Arc<Mutex<Vec<Option<String>>>>,
    parts: Arc<Mutex<Vec<ReceivedPart>>>,
}

impl StubState {
    async fn record_auth(&self, headers: &HeaderMap) {
        let value = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.authorization.lock().await.push(value);
    }
}

async fn ngo_profile(State(state): State<StubState>, headers: HeaderMap) -> impl IntoResponse {
    state.record_auth(&headers).await;
    Json(json!({
        "id": 42,
        "ngo_name": "Paws NGO",
        "email": "rescue@example.org",
    }))
}

async fn ngo_stats(State(state): State<StubState>, headers: HeaderMap) -> impl IntoResponse {
    state.record_auth(&headers).await;
    Json(json!({
        "active_reports": 2,
        "pending_applications": 3,
        "success_rate": 87.5,
    }))
}

async fn user_profile_rejected() -> impl IntoResponse {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "detail": "Given token not valid for any token type" })),
    )
}

async fn user_stats_failing() -> impl IntoResponse {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "code": "internal", "message": "database unavailable" })),
    )
}

async fn report_found() -> impl IntoResponse {
    Json(json!({ "id": "r-1", "status": "in_progress", "severity": "High" }))
}

async fn report_status_only() -> impl IntoResponse {
    Json(json!({ "id": "r-4", "status": "completed" }))
}

async fn report_garbled() -> impl IntoResponse {
    (StatusCode::OK, "<html>maintenance</html>")
}

async fn report_missing() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not found.")
}

async fn receive_sighting(
    State(state): State<StubState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> impl IntoResponse {
    state.record_auth(&headers).await;
    while let Some(field) = multipart.next_field().await.expect("multipart field") {
        let part = ReceivedPart {
            field: field.name().unwrap_or_default().to_string(),
            file_name: field.file_name().map(str::to_string),
            content_type: field.content_type().map(str::to_string),
            bytes: field.bytes().await.expect("field bytes").to_vec(),
        };
        state.parts.lock().await.push(part);
    }
    (StatusCode::CREATED, Json(json!({ "detected": true })))
}

async fn spawn_rescue_server() -> Result<(String, StubState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = StubState::default();
    let app = Router::new()
        .route("/api/ngo/42/", get(ngo_profile))
        .route("/api/ngo/42/stats/", get(ngo_stats))
        .route("/api/user/7/", get(user_profile_rejected))
        .route("/api/user/7/stats/", get(user_stats_failing))
        .route("/api/reports/r-1/", get(report_found))
        .route("/api/reports/r-2/", get(report_garbled))
        .route("/api/reports/r-3/", get(report_missing))
        .route("/api/reports/r-4/", get(report_status_only))
        .route("/api/animal/test-gemini/", post(receive_sighting))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}/api"), state))
}

fn ngo() -> ActorIdentity {
    ActorIdentity {
        account_type: AccountType::Ngo,
        actor_id: ActorId::new("42"),
    }
}

fn user() -> ActorIdentity {
    ActorIdentity {
        account_type: AccountType::User,
        actor_id: ActorId::new("7"),
    }
}

#[tokio::test]
async fn profile_and_stats_use_entity_paths_and_bearer_token() {
    let (server_url, state) = spawn_rescue_server().await.expect("spawn server");
    let store = Arc::new(MemoryStore::with_entries([(AUTH_TOKEN_KEY, "token-abc")]));
    let api = HttpRescueApi::new(&server_url)
        .expect("client")
        .with_token_store(store);

    let profile = api.fetch_profile(&ngo()).await.expect("profile");
    let stats = api.fetch_stats(&ngo()).await.expect("stats");

    assert_eq!(profile.name, "Paws NGO");
    assert_eq!(profile.entity_id, Some(ActorId::new("42")));
    assert_eq!(stats.notification_count(), 5);
    assert_eq!(stats.success_rate, Some(87.5));
    assert_eq!(
        *state.authorization.lock().await,
        vec![
            Some("Bearer token-abc".to_string()),
            Some("Bearer token-abc".to_string()),
        ]
    );
}

#[tokio::test]
async fn requests_without_stored_token_are_anonymous() {
    let (server_url, state) = spawn_rescue_server().await.expect("spawn server");
    let store = Arc::new(MemoryStore::with_entries([(AUTH_TOKEN_KEY, "null")]));
    let api = HttpRescueApi::new(&server_url)
        .expect("client")
        .with_token_store(store);

    api.fetch_profile(&ngo()).await.expect("profile");

    assert_eq!(*state.authorization.lock().await, vec![None]);
}

#[tokio::test]
async fn unauthorized_response_is_authentication_error() {
    let (server_url, _state) = spawn_rescue_server().await.expect("spawn server");
    let api = HttpRescueApi::new(&server_url).expect("client");

    let err = api.fetch_profile(&user()).await.expect_err("rejected");

    match err {
        RemoteError::Authentication { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "Given token not valid for any token type");
        }
        other => panic!("expected authentication error, got {other:?}"),
    }
}

#[tokio::test]
async fn structured_error_body_is_preserved() {
    let (server_url, _state) = spawn_rescue_server().await.expect("spawn server");
    let api = HttpRescueApi::new(&server_url).expect("client");

    let err = api.fetch_stats(&user()).await.expect_err("server error");

    match err {
        RemoteError::Api {
            status,
            code,
            message,
        } => {
            assert_eq!(status, 500);
            assert_eq!(code, ErrorCode::Internal);
            assert_eq!(message, "database unavailable");
        }
        other => panic!("expected api error, got {other:?}"),
    }
}

#[tokio::test]
async fn report_lookup_classifies_failures() {
    let (server_url, _state) = spawn_rescue_server().await.expect("spawn server");
    let api = HttpRescueApi::new(&server_url).expect("client");

    let report = api
        .fetch_report(&ReportId::new("r-1"))
        .await
        .expect("report");
    assert_eq!(report.report_id, ReportId::new("r-1"));
    assert_eq!(report.status, shared::domain::ReportStatus::InProgress);

    let garbled = api
        .fetch_report(&ReportId::new("r-2"))
        .await
        .expect_err("undecodable body");
    assert!(matches!(
        garbled,
        RemoteError::Api {
            status: 200,
            code: ErrorCode::Internal,
            ..
        }
    ));

    let missing = api
        .fetch_report(&ReportId::new("r-3"))
        .await
        .expect_err("missing report");
    assert!(missing.is_client_error());
    match missing {
        RemoteError::Api { code, message, .. } => {
            assert_eq!(code, ErrorCode::NotFound);
            assert_eq!(message, "Not found.");
        }
        other => panic!("expected api error, got {other:?}"),
    }
}

#[tokio::test]
async fn report_body_with_only_status_is_accepted() {
    let (server_url, _state) = spawn_rescue_server().await.expect("spawn server");
    let api = HttpRescueApi::new(&server_url).expect("client");

    let report = api
        .fetch_report(&ReportId::new("r-4"))
        .await
        .expect("status-only body decodes");

    assert_eq!(report.report_id, ReportId::new("r-4"));
    assert_eq!(report.status, shared::domain::ReportStatus::Completed);
    assert!(report.severity.is_none());
}

#[tokio::test]
async fn unreachable_backend_is_network_error() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let api = HttpRescueApi::with_timeout(&format!("http://{addr}"), Duration::from_secs(2))
        .expect("client");

    let err = api.fetch_profile(&ngo()).await.expect_err("no server");

    assert!(err.is_network());
    assert!(!err.is_client_error());
}

#[tokio::test]
async fn sighting_is_posted_as_multipart_image() {
    let (server_url, state) = spawn_rescue_server().await.expect("spawn server");
    let api = HttpRescueApi::new(&server_url).expect("client");

    let status = api
        .submit_sighting(SightingUpload {
            filename: "detected_20240501_130203.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
            image: vec![0xFF, 0xD8, 0xFF],
        })
        .await
        .expect("upload");

    assert_eq!(status, 201);
    assert_eq!(
        *state.parts.lock().await,
        vec![ReceivedPart {
            field: "image".to_string(),
            file_name: Some("detected_20240501_130203.jpg".to_string()),
            content_type: Some("image/jpeg".to_string()),
            bytes: vec![0xFF, 0xD8, 0xFF],
        }]
    );
}

#[test]
fn base_url_gets_trailing_slash() {
    let url = normalize_base_url(" https://rescue.example.org/api ").expect("url");
    assert_eq!(url.as_str(), "https://rescue.example.org/api/");

    let api = HttpRescueApi::new("http://localhost:8000/api/").expect("client");
    assert_eq!(
        api.endpoint(&["ngo", "42", "stats"]).as_str(),
        "http://localhost:8000/api/ngo/42/stats/"
    );
}

#[test]
fn non_http_base_url_is_rejected() {
    assert!(normalize_base_url("ftp://rescue.example.org/").is_err());
    assert!(normalize_base_url("not a url").is_err());
}

#[test]
fn error_body_fallbacks() {
    let detail = parse_error_body(400, r#"{"detail":"bad image"}"#);
    assert_eq!(detail.code, ErrorCode::Validation);
    assert_eq!(detail.message, "bad image");

    let empty = parse_error_body(429, "  ");
    assert_eq!(empty.code, ErrorCode::RateLimited);
    assert_eq!(empty.message, "http status 429");
}
