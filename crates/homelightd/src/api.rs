use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::Path;
use axum::extract::State;
use axum::http::header;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use strum::EnumString;
use tokio::net::TcpListener;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::lights::LightsError;
use crate::lights::LightsService;

/// Body of every error response
#[derive(Serialize)]
struct ErrorResponse {
    status: u16,
    error: String,
}

#[derive(Debug)]
enum ApiError {
    Lights(LightsError),
    BadRequest(String),
}

impl From<LightsError> for ApiError {
    fn from(error: LightsError) -> Self {
        ApiError::Lights(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::Lights(e @ LightsError::NotFound(_)) => (StatusCode::NOT_FOUND, e.to_string()),
            ApiError::Lights(e) => {
                tracing::error!("Request failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };

        (
            status,
            Json(ErrorResponse {
                status: status.as_u16(),
                error,
            }),
        )
            .into_response()
    }
}

/// Value accepted by `/lights/:name/set/:val`
#[derive(Debug, PartialEq, EnumString)]
#[strum(serialize_all = "lowercase")]
enum Power {
    On,
    Off,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    lights: Arc<LightsService>,
    repository_url: String,
}

/// Handler for GET /
#[tracing::instrument(skip(state))]
async fn redirect(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::FOUND,
        [(header::LOCATION, state.repository_url.clone())],
    )
}

/// Handler for GET /lights
#[tracing::instrument(skip(state))]
async fn status_all(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.lights.status_all().await?))
}

/// Handler for GET /lights/toggle
#[tracing::instrument(skip(state))]
async fn toggle_all(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.lights.toggle_all().await?))
}

/// Handler for GET /lights/store
#[tracing::instrument(skip(state))]
async fn store(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    state.lights.store().await?;
    Ok(StatusCode::OK)
}

/// Handler for GET /lights/:name
#[tracing::instrument(skip(state))]
async fn light(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.lights.status(&name).await?))
}

/// Handler for GET /lights/:name/toggle
#[tracing::instrument(skip(state))]
async fn toggle(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.lights.toggle(&name).await?))
}

/// Handler for GET /lights/:name/set/:val
#[tracing::instrument(skip(state))]
async fn set_on_off(
    State(state): State<Arc<AppState>>,
    Path((name, val)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let power = Power::from_str(&val)
        .map_err(|_| ApiError::BadRequest(format!("Invalid value '{}', expected on or off", val)))?;

    Ok(Json(state.lights.set_on_off(&name, power == Power::On).await?))
}

/// Handler for GET /lights/:name/set/brightness/:val
#[tracing::instrument(skip(state))]
async fn set_brightness(
    State(state): State<Arc<AppState>>,
    Path((name, val)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let value = parse_brightness(&val)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid brightness '{}'", val)))?;

    Ok(Json(state.lights.set_brightness(&name, value).await?))
}

/// Parse a brightness and clamp it to 1-100
fn parse_brightness(val: &str) -> Option<u8> {
    let value = val.parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some(value.round().clamp(1.0, 100.0) as u8)
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    let lights = Router::new()
        .route("/", get(status_all))
        .route("/toggle", get(toggle_all))
        .route("/store", get(store))
        .route("/:name", get(light))
        .route("/:name/toggle", get(toggle))
        .route("/:name/set/:val", get(set_on_off))
        .route("/:name/set/brightness/:val", get(set_brightness))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("none"),
        ));

    Router::new()
        .route("/", get(redirect))
        .nest("/lights", lights)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the configured listen address
///
/// Done before anything else is started so a bad address or a busy port
/// fails startup.
pub async fn bind(config: &ApiConfig) -> anyhow::Result<TcpListener> {
    let addr: SocketAddr = format!("{}:{}", config.listen, config.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.listen, config.port))?;

    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))
}

/// Serve the HTTP API on `listener` until `shutdown_rx` fires
pub async fn serve(
    listener: TcpListener,
    config: &ApiConfig,
    lights: Arc<LightsService>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        lights,
        repository_url: config.repository_url.clone(),
    });
    let app = create_router(state);

    tracing::info!("Server starting on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}
