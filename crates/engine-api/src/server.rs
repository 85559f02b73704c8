use anyhow::{Result, anyhow};
use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::{delete, get, post},
};
use iotap_core::{Bus, ProbeHandle, ProbeStatus};
use tokio::{net::UnixListener, sync::oneshot, task::JoinHandle};

use crate::{
    dto::{BroadcastState, PidList},
    error::EngineApiError,
};

pub struct ServerHandle {
    tx_shutdown: oneshot::Sender<()>,
    server_join_handle: JoinHandle<()>,
}

impl ServerHandle {
    pub async fn stop(self) {
        drop(self.tx_shutdown);
        let _ = self.server_join_handle.await;
    }
}

#[derive(Clone)]
pub struct EngineAPIContext {
    pub bus: Bus,
    pub probe: ProbeHandle,
}

pub fn router(engine_api_ctx: EngineAPIContext) -> Router {
    let targets = Router::new()
        .route("/", get(targets).post(add_targets))
        .route("/clear", post(clear_targets))
        .route("/{pid}", delete(remove_target));

    let exclusions = Router::new()
        .route("/", get(exclusions).post(add_exclusions))
        .route("/{pid}", delete(remove_exclusion));

    Router::new()
        .route("/status", get(status))
        .nest("/targets", targets)
        .nest("/exclusions", exclusions)
        .route("/broadcast", get(broadcast).put(set_broadcast))
        .route("/monitor", get(event_monitor_handler))
        .with_state(engine_api_ctx)
}

pub fn run_api_server(
    engine_api_ctx: EngineAPIContext,
    custom_socket_path: Option<&str>,
) -> Result<ServerHandle> {
    let app = router(engine_api_ctx);

    let socket_path = custom_socket_path.unwrap_or(super::DEFAULT_UDS).to_string();

    let uds =
        UnixListener::bind(&socket_path).map_err(|err| anyhow!("Cannot bind to socket: {err}"))?;
    log::debug!("listening on {}", socket_path);

    let (tx_shutdown, rx_shutdown) = oneshot::channel();

    let server = axum::serve(uds, app).with_graceful_shutdown(async move {
        let _ = rx_shutdown.await;
    });

    let server_join_handle = tokio::spawn(async move {
        if let Err(e) = server.await {
            log::error!("Engine Api server error: {}", e);
        }
        if let Err(e) = tokio::fs::remove_file(socket_path).await {
            log::error!("Error removing unix socket: {}", e);
        };
    });

    let server_handle = ServerHandle {
        tx_shutdown,
        server_join_handle,
    };

    Ok(server_handle)
}

async fn status(State(ctx): State<EngineAPIContext>) -> Result<Json<ProbeStatus>, EngineApiError> {
    Ok(Json(ctx.probe.status().await?))
}

async fn targets(State(ctx): State<EngineAPIContext>) -> Result<Json<Vec<u32>>, EngineApiError> {
    Ok(Json(ctx.probe.targets().await?))
}

async fn add_targets(
    State(ctx): State<EngineAPIContext>,
    Json(PidList { pids }): Json<PidList>,
) -> Result<(), EngineApiError> {
    ctx.probe.add_targets(pids).await?;
    Ok(())
}

async fn remove_target(
    State(ctx): State<EngineAPIContext>,
    Path(pid): Path<u32>,
) -> Result<(), EngineApiError> {
    ctx.probe.remove_target(pid).await?;
    Ok(())
}

async fn clear_targets(State(ctx): State<EngineAPIContext>) -> Result<(), EngineApiError> {
    ctx.probe.clear_targets().await?;
    Ok(())
}

async fn broadcast(
    State(ctx): State<EngineAPIContext>,
) -> Result<Json<BroadcastState>, EngineApiError> {
    let enabled = ctx.probe.broadcast().await?;
    Ok(Json(BroadcastState { enabled }))
}

async fn set_broadcast(
    State(ctx): State<EngineAPIContext>,
    Json(BroadcastState { enabled }): Json<BroadcastState>,
) -> Result<(), EngineApiError> {
    ctx.probe.set_broadcast(enabled).await?;
    Ok(())
}

async fn exclusions(
    State(ctx): State<EngineAPIContext>,
) -> Result<Json<Vec<u32>>, EngineApiError> {
    Ok(Json(ctx.probe.exclusions().await?))
}

async fn add_exclusions(
    State(ctx): State<EngineAPIContext>,
    Json(PidList { pids }): Json<PidList>,
) -> Result<(), EngineApiError> {
    ctx.probe.add_exclusions(pids).await?;
    Ok(())
}

async fn remove_exclusion(
    State(ctx): State<EngineAPIContext>,
    Path(pid): Path<u32>,
) -> Result<(), EngineApiError> {
    ctx.probe.remove_exclusion(pid).await?;
    Ok(())
}

async fn event_monitor_handler(
    State(ctx): State<EngineAPIContext>,
    ws: WebSocketUpgrade,
) -> Response {
    let mut bus_receiver = ctx.bus.get_receiver();

    // This closure reads events from the bus receiver and sends them into the socket
    let handle_socket = |mut socket: WebSocket| async move {
        loop {
            match iotap_core::receive_from_broadcast(&mut bus_receiver, "engine_api").await {
                Ok(event) => match serde_json::to_string(&*event) {
                    Ok(json) => {
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            // client disconnected
                            return;
                        }
                    }
                    Err(e) => {
                        log::error!("error occurred in event serialization: {e}");
                        return;
                    }
                },
                Err(e) => {
                    log::error!("error reading from the bus: {e}");
                    return;
                }
            }
        }
    };

    ws.on_upgrade(handle_socket)
}
