use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::delete;
use axum::routing::get;
use axum::routing::post;
use axum::routing::put;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinError;
use tower_http::trace::TraceLayer;

use crate::engine::BatchError;
use crate::engine::BatchReport;
use crate::engine::Engine;
use crate::engine::Filter;
use crate::engine::Intent;
use crate::engine::RefreshOutcome;
use crate::engine::ToggleError;
use crate::engine::ToggleOutcome;
use crate::engine::View;
use crate::remote::HouseApi;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
    house_id: u32,
}

#[derive(Serialize)]
struct RefreshResponse {
    outcome: RefreshOutcome,
    view: View,
}

#[derive(Debug, Deserialize)]
struct BatchRequest {
    intent: Intent,
    /// Explicit targets. The current selection is used when absent.
    #[serde(default)]
    devices: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ToggleRequest {
    intent: Intent,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// A refused request.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<BatchError> for ApiError {
    fn from(e: BatchError) -> Self {
        let status = match e {
            BatchError::EmptySelection => StatusCode::BAD_REQUEST,
            BatchError::AlreadyRunning | BatchError::TogglePending(_) => StatusCode::CONFLICT,
        };
        ApiError::new(status, e.to_string())
    }
}

impl From<ToggleError> for ApiError {
    fn from(e: ToggleError) -> Self {
        let status = match e {
            ToggleError::UnknownDevice(_) => StatusCode::NOT_FOUND,
            ToggleError::BatchInFlight | ToggleError::AlreadyPending(_) => StatusCode::CONFLICT,
        };
        ApiError::new(status, e.to_string())
    }
}

impl From<JoinError> for ApiError {
    fn from(e: JoinError) -> Self {
        tracing::error!("Engine task failed: {}", e);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "engine task failed")
    }
}

/// Shared application state
struct AppState<A> {
    version: &'static str,
    engine: Arc<Engine<A>>,
}

impl<A> AppState<A> {
    fn view(&self) -> Json<View>
    where
        A: HouseApi,
    {
        Json(View::clone(&self.engine.view()))
    }
}

type Shared<A> = State<Arc<AppState<A>>>;

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info<A: HouseApi>(State(state): Shared<A>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
            house_id: state.engine.house_id(),
        }),
    )
}

#[tracing::instrument(skip(state))]
async fn view<A: HouseApi>(State(state): Shared<A>) -> Json<View> {
    state.view()
}

#[tracing::instrument(skip(state))]
async fn refresh<A: HouseApi>(State(state): Shared<A>) -> Json<RefreshResponse> {
    let outcome = state.engine.refresh().await;
    Json(RefreshResponse {
        outcome,
        view: View::clone(&state.engine.view()),
    })
}

#[tracing::instrument(skip(state))]
async fn set_filter<A: HouseApi>(
    State(state): Shared<A>,
    Json(filter): Json<Filter>,
) -> Json<View> {
    state.engine.set_filter(filter);
    state.view()
}

#[tracing::instrument(skip(state))]
async fn select<A: HouseApi>(
    State(state): Shared<A>,
    Path(id): Path<String>,
) -> Result<Json<View>, ApiError> {
    if !state.engine.select(&id) {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("{} is not displayed", id),
        ));
    }
    Ok(state.view())
}

#[tracing::instrument(skip(state))]
async fn deselect<A: HouseApi>(State(state): Shared<A>, Path(id): Path<String>) -> Json<View> {
    state.engine.deselect(&id);
    state.view()
}

#[tracing::instrument(skip(state))]
async fn select_all<A: HouseApi>(State(state): Shared<A>) -> Result<Json<View>, ApiError> {
    if !state.engine.select_all() {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "nothing to select while a batch runs or no device is displayed",
        ));
    }
    Ok(state.view())
}

#[tracing::instrument(skip(state))]
async fn clear_selection<A: HouseApi>(State(state): Shared<A>) -> Json<View> {
    state.engine.clear_selection();
    state.view()
}

// Batches and toggles run on their own task so a dropped connection cannot
// stop them between commands.
#[tracing::instrument(skip(state))]
async fn batch<A: HouseApi + 'static>(
    State(state): Shared<A>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BatchReport>, ApiError> {
    let engine = state.engine.clone();
    let report = tokio::spawn(async move {
        match request.devices {
            Some(devices) => engine.execute_batch(&devices, request.intent).await,
            None => engine.execute_selected(request.intent).await,
        }
    })
    .await??;
    Ok(Json(report))
}

#[tracing::instrument(skip(state))]
async fn toggle<A: HouseApi + 'static>(
    State(state): Shared<A>,
    Path(id): Path<String>,
    Json(request): Json<ToggleRequest>,
) -> Result<Json<ToggleOutcome>, ApiError> {
    let engine = state.engine.clone();
    let outcome = tokio::spawn(async move { engine.toggle(&id, request.intent).await }).await??;
    Ok(Json(outcome))
}

/// Create the API router with all endpoints
pub fn create_router<A: HouseApi + 'static>(engine: Arc<Engine<A>>) -> Router {
    let state = Arc::new(AppState {
        version: env!("CARGO_PKG_VERSION"),
        engine,
    });

    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info::<A>))
        .route("/v1/view", get(view::<A>))
        .route("/v1/refresh", post(refresh::<A>))
        .route("/v1/filter", put(set_filter::<A>))
        .route("/v1/selection", delete(clear_selection::<A>))
        .route("/v1/selection/all", post(select_all::<A>))
        .route("/v1/selection/:id", post(select::<A>).delete(deselect::<A>))
        .route("/v1/batch", post(batch::<A>))
        .route("/v1/devices/:id/toggle", post(toggle::<A>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Serves until `shutdown_rx` fires or its sender is dropped.
pub async fn serve<A: HouseApi + 'static>(
    engine: Arc<Engine<A>>,
    addr: SocketAddr,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> std::io::Result<()> {
    let app = create_router(engine);

    tracing::info!("Starting HTTP API server on {}", addr);
    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await
}
