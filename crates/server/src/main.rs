use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use relay::{HttpVisionModel, RelayError, RelayService};
use shared::{
    error::ErrorBody,
    protocol::{detect_route, health_route, DetectRequest, VERDICT_HEADER},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod settings;

use app_state::AppState;
use settings::load_settings;

/// Request bodies carry a base64 image; this bounds the JSON envelope, the
/// relay applies its own decoded-size ceiling afterwards.
const MAX_REQUEST_BODY_BYTES: usize = 10 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings()?;
    let relay_config = settings.relay_config();
    if relay_config.credential().is_none() {
        warn!("NVIDIA_API_KEY is not set; every detect request will fail with a configuration error");
    }

    let model = HttpVisionModel::new(
        relay_config.upstream_url.clone(),
        relay_config.upstream_timeout,
    )?;
    info!(
        upstream = model.endpoint(),
        model = %relay_config.model,
        max_image_bytes = relay_config.max_image_bytes,
        timeout_secs = relay_config.upstream_timeout.as_secs(),
        "relay configured"
    );

    let state = AppState {
        relay: RelayService::new(relay_config, Arc::new(model)),
        allowed_origins: settings.allowed_origins.clone(),
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.bind_addr().parse()?;
    info!(%addr, "relay listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.allowed_origins);
    Router::new()
        .route(health_route(), get(healthz))
        .route(detect_route(), post(detect))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Allow-list of browser origins. A `*` entry is dropped rather than honoured.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .map(|origin| origin.trim())
        .filter(|origin| {
            if *origin == "*" {
                warn!("ignoring wildcard CORS origin; list the UI origin explicitly");
                return false;
            }
            !origin.is_empty()
        })
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(origin, %error, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

async fn healthz() -> &'static str {
    "ok"
}

async fn detect(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, (StatusCode, Json<ErrorBody>)> {
    let request = serde_json::from_slice::<DetectRequest>(&body).unwrap_or_else(|error| {
        debug!(%error, "detect body is not a JSON object with imageBase64");
        DetectRequest::default()
    });

    let classification = state.relay.classify(request).await.map_err(error_response)?;

    let mut response = (StatusCode::OK, Json(classification.completion)).into_response();
    if let Some(verdict) = classification.verdict {
        response
            .headers_mut()
            .insert(VERDICT_HEADER, HeaderValue::from_static(verdict.as_str()));
    }
    Ok(response)
}

fn error_response(error: RelayError) -> (StatusCode, Json<ErrorBody>) {
    let status = StatusCode::from_u16(error.status()).unwrap_or_else(|_| {
        error!(status = error.status(), "upstream sent an invalid status code");
        StatusCode::BAD_GATEWAY
    });
    (status, Json(error.body()))
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down relay");
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
