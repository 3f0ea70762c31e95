use super::*;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode as AxumStatus},
    routing::post,
    Json, Router,
};
use serde_json::json;
use shared::protocol::ChatMessage;
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Clone, Default)]
struct Captured {
    requests: Arc<Mutex<Vec<(Option<String>, ChatCompletionRequest)>>>,
}

async fn spawn_upstream(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    addr
}

fn sample_request() -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: "nvidia/neva-22b".into(),
        messages: vec![ChatMessage::user(
            "Is this blood sample image indicative of malaria? <img src=\"data:image/png;base64,YWJj\" />",
        )],
        max_tokens: 10,
        temperature: 0.2,
        top_p: 0.7,
        stream: false,
    }
}

fn model_for(addr: SocketAddr, timeout: Duration) -> HttpVisionModel {
    HttpVisionModel::new(format!("http://{addr}/v1/chat/completions"), timeout).expect("client")
}

#[tokio::test]
async fn posts_bearer_authorized_json_and_returns_body() {
    let captured = Captured::default();
    let app = Router::new()
        .route(
            "/v1/chat/completions",
            post(
                |State(captured): State<Captured>,
                 headers: HeaderMap,
                 Json(request): Json<ChatCompletionRequest>| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_string);
                    captured.requests.lock().await.push((auth, request));
                    Json(json!({ "choices": [{ "message": { "content": "No" } }] }))
                },
            ),
        )
        .with_state(captured.clone());
    let addr = spawn_upstream(app).await;

    let model = model_for(addr, Duration::from_secs(5));
    let body = model
        .complete("secret", &sample_request())
        .await
        .expect("completion");

    assert_eq!(body["choices"][0]["message"]["content"], "No");
    let requests = captured.requests.lock().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0.as_deref(), Some("Bearer secret"));
    assert_eq!(requests[0].1, sample_request());
}

#[tokio::test]
async fn error_status_carries_provider_detail() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            (
                AxumStatus::UNAUTHORIZED,
                Json(json!({ "status": 401, "detail": "Authentication failed" })),
            )
        }),
    );
    let addr = spawn_upstream(app).await;

    let failure = model_for(addr, Duration::from_secs(5))
        .complete("bad-key", &sample_request())
        .await
        .expect_err("must fail");

    match failure {
        UpstreamFailure::Status { status, detail } => {
            assert_eq!(status, 401);
            assert_eq!(detail, json!("Authentication failed"));
        }
        other => panic!("unexpected failure: {other:?}"),
    }
}

#[tokio::test]
async fn error_status_without_detail_uses_status_line() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async { (AxumStatus::SERVICE_UNAVAILABLE, "overloaded") }),
    );
    let addr = spawn_upstream(app).await;

    let failure = model_for(addr, Duration::from_secs(5))
        .complete("secret", &sample_request())
        .await
        .expect_err("must fail");

    match failure {
        UpstreamFailure::Status { status, detail } => {
            assert_eq!(status, 503);
            assert_eq!(detail, json!("Request failed with status code 503"));
        }
        other => panic!("unexpected failure: {other:?}"),
    }
}

#[tokio::test]
async fn slow_upstream_times_out() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({ "choices": [] }))
        }),
    );
    let addr = spawn_upstream(app).await;

    let failure = model_for(addr, Duration::from_millis(100))
        .complete("secret", &sample_request())
        .await
        .expect_err("must fail");

    assert!(matches!(failure, UpstreamFailure::Timeout), "{failure:?}");
}

#[tokio::test]
async fn refused_connection_is_no_response() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let failure = model_for(addr, Duration::from_secs(5))
        .complete("secret", &sample_request())
        .await
        .expect_err("must fail");

    assert!(matches!(failure, UpstreamFailure::NoResponse(_)), "{failure:?}");
}

#[tokio::test]
async fn non_json_success_body_is_no_response() {
    let app = Router::new().route("/v1/chat/completions", post(|| async { "plain text" }));
    let addr = spawn_upstream(app).await;

    let failure = model_for(addr, Duration::from_secs(5))
        .complete("secret", &sample_request())
        .await
        .expect_err("must fail");

    assert!(matches!(failure, UpstreamFailure::NoResponse(_)), "{failure:?}");
}

#[test]
fn detail_falls_back_when_body_has_none() {
    assert_eq!(
        error_detail(StatusCode::BAD_REQUEST, br#"{"detail":{"loc":["body"]}}"#),
        json!({ "loc": ["body"] })
    );
    assert_eq!(
        error_detail(StatusCode::BAD_REQUEST, br#"{"detail":null}"#),
        json!("Request failed with status code 400")
    );
    assert_eq!(
        error_detail(StatusCode::BAD_GATEWAY, b""),
        json!("Request failed with status code 502")
    );
}
