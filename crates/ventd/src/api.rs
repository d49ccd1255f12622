use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::engine::CommandError;
use crate::engine::DashboardState;
use crate::engine::Engine;
use crate::engine::PresetPosition;
use crate::engine::SweepParams;
use crate::engine::VentCommand;
use crate::engine::VentOutcome;
use crate::engine::state::VentState;

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
}

/// Response for a resolved vent command
#[derive(Serialize)]
struct CommandResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    angle: Option<u16>,
    message: String,
}

/// Response for a failed or rejected vent command
#[derive(Serialize)]
struct ErrorResponse {
    status: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct SetAngleRequest {
    angle: i64,
}

#[derive(Debug, Deserialize)]
struct SetPresetRequest {
    position: PresetPosition,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
    version: &'static str,
}

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
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
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
        }),
    )
}

/// Handler for GET /v1/state
#[tracing::instrument(skip(state))]
async fn dashboard_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/state request");

    let snapshot = state.engine.state_snapshot();
    (StatusCode::OK, Json(DashboardState::clone(&snapshot)))
}

/// Handler for GET /v1/vent
#[tracing::instrument(skip(state))]
async fn vent(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/vent request");

    let snapshot = state.engine.state_snapshot();
    (StatusCode::OK, Json(VentState::clone(&snapshot.vent)))
}

/// Handler for POST /v1/vent/angle
#[tracing::instrument(skip(state))]
async fn set_angle(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetAngleRequest>,
) -> Response {
    tracing::debug!("Handling /v1/vent/angle request");
    run_command(&state.engine, VentCommand::SetAngle { angle: req.angle }).await
}

/// Handler for POST /v1/vent/preset
#[tracing::instrument(skip(state))]
async fn set_preset(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetPresetRequest>,
) -> Response {
    tracing::debug!("Handling /v1/vent/preset request");
    run_command(
        &state.engine,
        VentCommand::SetPreset {
            position: req.position,
        },
    )
    .await
}

/// Handler for POST /v1/vent/sweep
#[tracing::instrument(skip(state))]
async fn sweep(State(state): State<Arc<AppState>>, Json(params): Json<SweepParams>) -> Response {
    tracing::debug!("Handling /v1/vent/sweep request");
    run_command(&state.engine, VentCommand::Sweep { params }).await
}

/// Dispatch a command to the vent controller and translate its resolution
/// into an HTTP response.
async fn run_command(engine: &Engine, command: VentCommand) -> Response {
    let reply_rx = match engine.send_vent_command(command) {
        Ok(rx) => rx,
        Err(e) => return command_error(e),
    };

    match reply_rx.await {
        Ok(Ok(VentOutcome::Confirmed { angle, message })) => (
            StatusCode::OK,
            Json(CommandResponse {
                status: "success".to_string(),
                angle: Some(angle),
                message,
            }),
        )
            .into_response(),
        Ok(Ok(VentOutcome::Acknowledged { message })) => (
            StatusCode::OK,
            Json(CommandResponse {
                status: "success".to_string(),
                angle: None,
                message,
            }),
        )
            .into_response(),
        Ok(Ok(VentOutcome::Failed { message })) => (
            StatusCode::BAD_GATEWAY,
            Json(ErrorResponse {
                status: "error".to_string(),
                message,
            }),
        )
            .into_response(),
        Ok(Err(e)) => command_error(e),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                status: "error".to_string(),
                message: "Vent controller dropped the command".to_string(),
            }),
        )
            .into_response(),
    }
}

/// Map a command error onto an HTTP status: invalid input is the caller's
/// fault, a missing controller is unavailability, anything else is a bad
/// gateway to the device.
fn command_error(e: CommandError) -> Response {
    let status = if e.is_invalid_input() {
        StatusCode::UNPROCESSABLE_ENTITY
    } else if matches!(e, CommandError::Unavailable) {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::BAD_GATEWAY
    };

    (
        status,
        Json(ErrorResponse {
            status: "error".to_string(),
            message: e.to_string(),
        }),
    )
        .into_response()
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/state", get(dashboard_state))
        .route("/v1/vent", get(vent))
        .route("/v1/vent/angle", post(set_angle))
        .route("/v1/vent/preset", post(set_preset))
        .route("/v1/vent/sweep", post(sweep))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// This function will bind to the specified address and serve the API endpoints.
/// It will run until the provided shutdown signal is triggered.
///
/// # Arguments
/// * `bind` - The socket address to listen on (e.g., "127.0.0.1:8080")
/// * `engine` - The engine whose state and commands the API exposes
/// * `shutdown_rx` - A oneshot receiver that will trigger graceful shutdown
///
/// # Returns
/// Returns Ok(()) if the server shuts down gracefully, or an error if startup fails
pub async fn serve(
    bind: String,
    engine: Arc<Engine>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error>> {
    let version = env!("CARGO_PKG_VERSION");

    let state = Arc::new(AppState { engine, version });
    let app = create_router(state);

    let addr: SocketAddr = bind.parse()?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}
