use super::*;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, sync::Mutex};

const SMALL_PNG: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNk+M9QDwADhgGAWjR9awAAAABJRU5ErkJggg==";

#[derive(Clone)]
struct RelayStub {
    status: StatusCode,
    body: Value,
    received: Arc<Mutex<Vec<Value>>>,
}

async fn relay_stub(
    State(stub): State<RelayStub>,
    Json(request): Json<Value>,
) -> impl IntoResponse {
    stub.received.lock().await.push(request);
    (stub.status, Json(stub.body.clone()))
}

async fn spawn_relay(status: StatusCode, body: Value) -> (SocketAddr, Arc<Mutex<Vec<Value>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/api/detect", post(relay_stub))
        .with_state(RelayStub {
            status,
            body,
            received: received.clone(),
        });
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    (addr, received)
}

fn image() -> ImagePayload {
    ImagePayload::parse(SMALL_PNG).expect("payload")
}

fn client_for(addr: SocketAddr) -> DetectClient {
    DetectClient::new(&format!("http://{addr}")).expect("client")
}

#[tokio::test]
async fn submit_posts_data_url_and_reads_positive_answer() {
    let (addr, received) = spawn_relay(
        StatusCode::OK,
        json!({ "choices": [{ "message": { "content": "Yes" } }] }),
    )
    .await;

    let verdict = client_for(addr).submit(&image()).await.expect("verdict");

    assert_eq!(verdict, Verdict::Positive);
    assert_eq!(verdict.display_label(), "Malaria Detected: Yes");
    let received = received.lock().await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0], json!({ "imageBase64": SMALL_PNG }));
}

#[tokio::test]
async fn answer_without_tokens_is_kept_as_raw_text() {
    let (addr, _) = spawn_relay(
        StatusCode::OK,
        json!({ "choices": [{ "message": { "content": "Unclear, possibly" } }] }),
    )
    .await;

    let verdict = client_for(addr).submit(&image()).await.expect("verdict");
    assert_eq!(
        verdict.display_label(),
        "Analysis complete. Response: Unclear, possibly"
    );
}

#[tokio::test]
async fn too_large_rejection_has_dedicated_message() {
    let (addr, _) = spawn_relay(
        StatusCode::PAYLOAD_TOO_LARGE,
        json!({ "error": "Image file size is too large (max ~180KB)." }),
    )
    .await;

    let error = client_for(addr).submit(&image()).await.expect_err("must fail");
    assert!(matches!(error, SubmitError::Rejected { status: 413, .. }));
    assert_eq!(
        error.user_message(),
        "The uploaded image is too large. Please try a smaller file."
    );
}

#[tokio::test]
async fn validation_and_gateway_failures_read_differently() {
    let (bad_request, _) = spawn_relay(
        StatusCode::BAD_REQUEST,
        json!({ "error": "Missing imageBase64 data in request.", "code": "invalid_input" }),
    )
    .await;
    let (bad_gateway, _) = spawn_relay(
        StatusCode::BAD_GATEWAY,
        json!({ "error": "No response received from upstream API.", "code": "upstream_unavailable" }),
    )
    .await;

    let validation = client_for(bad_request)
        .submit(&image())
        .await
        .expect_err("must fail");
    let gateway = client_for(bad_gateway)
        .submit(&image())
        .await
        .expect_err("must fail");

    assert_eq!(
        validation.user_message(),
        "Analysis failed (Status 400): Missing imageBase64 data in request."
    );
    assert!(!validation.is_connectivity());
    assert_eq!(
        gateway.user_message(),
        "The analysis server could not reach the model provider (Status 502): No response received from upstream API. Please try again later."
    );
    assert!(gateway.is_connectivity());
}

#[tokio::test]
async fn rejection_without_error_text_uses_detail_or_fallback() {
    let (with_detail, _) = spawn_relay(
        StatusCode::UNAUTHORIZED,
        json!({ "error": "", "detail": "Authentication failed" }),
    )
    .await;
    let (without_body, _) = spawn_relay(StatusCode::INTERNAL_SERVER_ERROR, json!(null)).await;

    let detail = client_for(with_detail)
        .submit(&image())
        .await
        .expect_err("must fail");
    assert_eq!(
        detail.user_message(),
        "Analysis failed (Status 401): Authentication failed."
    );

    let fallback = client_for(without_body)
        .submit(&image())
        .await
        .expect_err("must fail");
    assert_eq!(
        fallback.user_message(),
        "Analysis failed (Status 500): Server error."
    );
}

#[tokio::test]
async fn unreachable_relay_is_a_connectivity_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let error = client_for(addr).submit(&image()).await.expect_err("must fail");
    assert!(matches!(error, SubmitError::Unreachable(_)));
    assert!(error.is_connectivity());
    assert_eq!(
        error.user_message(),
        "Could not connect to the analysis server. Please check your connection or try again later."
    );
}

#[test]
fn success_body_with_error_object_is_backend_error() {
    let error = interpret_response(&json!({ "error": "quota exceeded", "detail": "retry tomorrow" }))
        .expect_err("must fail");
    assert_eq!(
        error.user_message(),
        "Backend Error: quota exceeded retry tomorrow"
    );

    let without_detail =
        interpret_response(&json!({ "error": "quota exceeded" })).expect_err("must fail");
    assert_eq!(without_detail.user_message(), "Backend Error: quota exceeded");
}

#[test]
fn unknown_success_shapes_are_unexpected() {
    for body in [
        json!({}),
        json!({ "choices": [] }),
        json!({ "choices": [{ "message": {} }] }),
        json!({ "error": 42 }),
        json!([1, 2, 3]),
    ] {
        let error = interpret_response(&body).expect_err("must fail");
        assert!(matches!(error, SubmitError::UnexpectedResponse), "{body}");
        assert_eq!(
            error.user_message(),
            "Received an unexpected response format from the server."
        );
    }
}

#[test]
fn detect_url_is_joined_onto_server_url() {
    let client = DetectClient::new("http://localhost:3001").expect("client");
    assert_eq!(client.detect_url().as_str(), "http://localhost:3001/api/detect");

    let error = DetectClient::new("not a url").expect_err("must fail");
    assert!(matches!(error, SubmitError::Setup(_)));
    assert!(error
        .user_message()
        .starts_with("An unexpected error occurred: invalid server url"));
}
