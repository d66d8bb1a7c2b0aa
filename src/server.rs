//! Read-only HTTP/websocket inspection of a running evolution.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

use crate::actuators::ACTUATOR_LABELS;
use crate::checkpoint::{CheckpointStore, CheckpointSummary, SavedCheckpoint};
use crate::evolution::GenerationSummary;
use crate::monitor::{ControlRequest, EvolutionMonitor, EvolutionStatus, StreamEvent};
use crate::network::{Genome, NetworkDescription};
use crate::rig::RigBlueprint;
use crate::sensors::SENSOR_LABELS;

const PORT_FALLBACK_ATTEMPTS: u16 = 10;

#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<EvolutionMonitor>,
    pub store: CheckpointStore,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryResponse {
    history: Vec<GenerationSummary>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BestControllerResponse {
    genome: Option<Genome>,
    network: Option<NetworkDescription>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RigResponse {
    blueprint: RigBlueprint,
    sensor_labels: Vec<&'static str>,
    actuator_labels: Vec<&'static str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckpointListResponse {
    checkpoints: Vec<CheckpointSummary>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase", untagged)]
enum ControlResponse {
    Status(EvolutionStatus),
    Saved(SavedCheckpoint),
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/evolution/state", get(evolution_state_handler))
        .route("/api/evolution/history", get(evolution_history_handler))
        .route("/api/evolution/genome/best", get(evolution_best_genome_handler))
        .route("/api/evolution/rig", get(evolution_rig_handler))
        .route(
            "/api/evolution/checkpoint/list",
            get(evolution_checkpoint_list_handler),
        )
        .route("/api/evolution/control", post(evolution_control_handler))
        .route("/api/evolution/ws", get(ws_evolution_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

pub async fn serve(state: AppState, host: &str, port: u16) -> Result<(), String> {
    let (listener, addr) = bind_listener(host, port).await?;
    info!("walker-evolution inspection listening on http://{addr}");
    axum::serve(listener, router(state))
        .await
        .map_err(|err| format!("server exited unexpectedly: {err}"))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn evolution_state_handler(State(state): State<AppState>) -> Json<EvolutionStatus> {
    Json(state.monitor.snapshot_status())
}

async fn evolution_history_handler(State(state): State<AppState>) -> Json<HistoryResponse> {
    Json(HistoryResponse {
        history: state.monitor.history(),
    })
}

async fn evolution_best_genome_handler(
    State(state): State<AppState>,
) -> Result<Json<BestControllerResponse>, (StatusCode, String)> {
    let genome = state.monitor.best_genome();
    let network = state.monitor.best_network();
    if genome.is_none() && network.is_none() {
        return Err((
            StatusCode::NOT_FOUND,
            "no best controller available yet".to_string(),
        ));
    }
    Ok(Json(BestControllerResponse { genome, network }))
}

async fn evolution_rig_handler(
    State(state): State<AppState>,
) -> Result<Json<RigResponse>, (StatusCode, String)> {
    let blueprint = state.monitor.blueprint().ok_or((
        StatusCode::NOT_FOUND,
        "rig not yet available".to_string(),
    ))?;
    Ok(Json(RigResponse {
        blueprint,
        sensor_labels: SENSOR_LABELS.to_vec(),
        actuator_labels: ACTUATOR_LABELS.to_vec(),
    }))
}

async fn evolution_checkpoint_list_handler(
    State(state): State<AppState>,
) -> Result<Json<CheckpointListResponse>, (StatusCode, String)> {
    let checkpoints = state
        .store
        .list()
        .map_err(|err| internal_err(err.to_string()))?;
    Ok(Json(CheckpointListResponse { checkpoints }))
}

async fn evolution_control_handler(
    State(state): State<AppState>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<ControlResponse>, (StatusCode, String)> {
    if request.action == "save_checkpoint" {
        let snapshot = state.monitor.runtime_snapshot().ok_or((
            StatusCode::CONFLICT,
            "runtime snapshot not yet available".to_string(),
        ))?;
        let saved = state
            .store
            .save(&snapshot, request.name.as_deref())
            .map_err(|err| internal_err(err.to_string()))?;
        info!(id = %saved.id, generation = snapshot.generation, "saved checkpoint");
        return Ok(Json(ControlResponse::Saved(saved)));
    }
    let status = state
        .monitor
        .apply_control(&request.action)
        .map_err(|message| (StatusCode::BAD_REQUEST, message))?;
    info!(action = %request.action, "control applied");
    Ok(Json(ControlResponse::Status(status)))
}

async fn ws_evolution_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_evolution_socket(socket, state))
}

async fn handle_evolution_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.monitor.subscribe();

    let status = state.monitor.snapshot_status();
    if send_stream_event(&mut sender, StreamEvent::Status { status })
        .await
        .is_err()
    {
        return;
    }
    if let Some(frame) = state.monitor.latest_frame()
        && send_stream_event(&mut sender, StreamEvent::Snapshot { frame })
            .await
            .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    if send_stream_event(&mut sender, event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("evolution websocket lagged by {skipped} events");
                    let status = state.monitor.snapshot_status();
                    if send_stream_event(&mut sender, StreamEvent::Status { status })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("evolution websocket closed");
}

async fn send_stream_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: StreamEvent,
) -> Result<(), ()> {
    let text = match serde_json::to_string(&event) {
        Ok(value) => value,
        Err(err) => {
            error!("failed to serialize evolution stream event: {err}");
            return Err(());
        }
    };
    sender
        .send(Message::Text(text.into()))
        .await
        .map_err(|err| {
            debug!("evolution websocket send failed: {err}");
        })
}

fn internal_err(message: String) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, message)
}

/// Bind `port`, walking up a few ports if it is taken.
async fn bind_listener(
    host: &str,
    desired_port: u16,
) -> Result<(tokio::net::TcpListener, SocketAddr), String> {
    for offset in 0..=PORT_FALLBACK_ATTEMPTS {
        let Some(port) = desired_port.checked_add(offset) else {
            break;
        };
        match tokio::net::TcpListener::bind((host, port)).await {
            Ok(listener) => {
                let addr = listener
                    .local_addr()
                    .map_err(|err| format!("bound listener but failed reading local address: {err}"))?;
                if offset > 0 {
                    warn!("port {desired_port} is in use, falling back to http://{addr}");
                }
                return Ok((listener, addr));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse && desired_port != 0 => continue,
            Err(err) => return Err(format!("failed to bind {host}:{port}: {err}")),
        }
    }
    Err(format!(
        "no free port in {desired_port}..={}",
        desired_port.saturating_add(PORT_FALLBACK_ATTEMPTS)
    ))
}
