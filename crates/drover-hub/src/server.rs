//! HTTP and WebSocket front door
//!
//! One listener serves everything: upgrade requests on `/` become relay
//! connections, plain requests get a JSON status page, `/health` answers
//! probes. Each accepted socket runs a reader and a writer task that only
//! translate between the wire and hub events; the hub task owns all state.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use drover_proto::StatusReport;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use crate::config::HubConfig;
use crate::dispatch::{Outbound, PeerSender};
use crate::error::HubError;
use crate::hub::{Hub, HubHandle};
use crate::negotiate::{self, Negotiation};
use crate::registry::PeerRole;

#[derive(Clone)]
struct AppState {
    handle: HubHandle,
    config: Arc<HubConfig>,
}

/// The relay hub server.
pub struct HubServer {
    config: HubConfig,
}

impl HubServer {
    pub fn new(config: HubConfig) -> Self {
        Self { config }
    }

    /// Bind and serve until a shutdown signal arrives.
    pub async fn run(self) -> Result<(), HubError> {
        self.config.validate().map_err(HubError::Config)?;
        let listener = bind_with_retry(&self.config).await?;
        self.serve(listener, wait_for_signal()).await
    }

    /// Serve on an already bound listener until `stop` resolves.
    pub async fn serve<F>(self, listener: TcpListener, stop: F) -> Result<(), HubError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        let (hub, handle) = Hub::new(self.config.clone());
        let hub_task = tokio::spawn(hub.run());

        let state = AppState { handle: handle.clone(), config: Arc::new(self.config) };
        let router = build_router(state);

        tracing::info!(%local_addr, "hub listening");

        let shutdown_handle = handle.clone();
        axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move {
                stop.await;
                tracing::info!("shutdown requested, notifying peers");
                shutdown_handle.shutdown("hub shutting down");
            })
            .await?;

        handle.shutdown("hub stopped");
        let _ = hub_task.await;
        Ok(())
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the listener, retrying exactly once after a fixed delay. A second
/// failure is fatal.
async fn bind_with_retry(config: &HubConfig) -> Result<TcpListener, HubError> {
    match TcpListener::bind(config.bind_addr).await {
        Ok(listener) => Ok(listener),
        Err(first) => {
            tracing::warn!(
                addr = %config.bind_addr,
                error = %first,
                delay = ?config.bind_retry_delay,
                "bind failed, retrying once"
            );
            tokio::time::sleep(config.bind_retry_delay).await;
            TcpListener::bind(config.bind_addr)
                .await
                .map_err(|source| HubError::Bind { addr: config.bind_addr, source })
        }
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(%error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::warn!(%error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[derive(Debug, Serialize)]
struct StatusPage {
    service: &'static str,
    version: &'static str,
    timestamp: DateTime<Utc>,
    status: StatusReport,
}

/// Upgrade requests become relay connections; anything else gets the status
/// page.
async fn root(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match upgrade {
        Ok(upgrade) => {
            upgrade.on_upgrade(move |socket| handle_connection(socket, state, remote))
        }
        Err(_) => match state.handle.status().await {
            Ok(status) => Json(StatusPage {
                service: "drover-hub",
                version: env!("CARGO_PKG_VERSION"),
                timestamp: Utc::now(),
                status,
            })
            .into_response(),
            Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "hub unavailable").into_response(),
        },
    }
}

/// Liveness probe: ok plus how long the hub has been up.
async fn health(State(state): State<AppState>) -> Response {
    match state.handle.status().await {
        Ok(status) => Json(serde_json::json!({
            "status": "ok",
            "uptime_secs": status.uptime_secs,
            "uptime": status.uptime_human,
        }))
        .into_response(),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "hub unavailable").into_response(),
    }
}

async fn handle_connection(socket: WebSocket, state: AppState, remote: SocketAddr) {
    let (ws_tx, mut ws_rx) = socket.split();

    let outcome = negotiate::negotiate(
        first_text_frame(&mut ws_rx),
        state.config.negotiation_timeout,
        &state.config.operator_secret,
    )
    .await;

    let (sender, outbound) = PeerSender::channel();
    let address: Arc<str> = Arc::from(remote.ip().to_string());

    let (role, id) = match outcome {
        Negotiation::Abandoned(reason) => {
            tracing::debug!(%remote, ?reason, "connection dropped before negotiation");
            return;
        }
        Negotiation::Operator => {
            match state.handle.operator_joined(address, remote.port(), sender).await {
                Ok(id) => (PeerRole::Operator, id),
                Err(_) => return,
            }
        }
        Negotiation::Agent { initial_frame } => {
            match state
                .handle
                .agent_joined(address, remote.port(), sender, initial_frame)
                .await
            {
                Ok(id) => (PeerRole::Agent, id),
                Err(_) => return,
            }
        }
    };

    let writer = tokio::spawn(write_loop(ws_tx, outbound));
    read_loop(ws_rx, &state.handle, role, id).await;

    match role {
        PeerRole::Agent => state.handle.agent_closed(id),
        PeerRole::Operator => state.handle.operator_closed(id),
    }

    // The writer exits once the hub drops this connection's queue.
    let _ = writer.await;
}

/// First text payload on a fresh socket, `None` once the peer is gone.
/// Binary frames count; agents are not required to set the text opcode.
async fn first_text_frame(ws_rx: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => return Some(text.as_str().to_owned()),
            Ok(Message::Binary(bytes)) => {
                return Some(String::from_utf8_lossy(&bytes).into_owned())
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) | Err(_) => return None,
        }
    }
    None
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(item) = outbound.recv().await {
        let result = match item {
            Outbound::Frame(frame) => {
                ws_tx.send(Message::Text(frame.as_ref().to_owned().into())).await
            }
            Outbound::Ping => ws_tx.send(Message::Ping(Bytes::new())).await,
            Outbound::Close => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        };
        if result.is_err() {
            break;
        }
    }
}

async fn read_loop(mut ws_rx: SplitStream<WebSocket>, handle: &HubHandle, role: PeerRole, id: u32) {
    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => dispatch_frame(handle, role, id, text.as_str().to_owned()),
            Ok(Message::Binary(bytes)) => {
                dispatch_frame(handle, role, id, String::from_utf8_lossy(&bytes).into_owned())
            }
            Ok(Message::Pong(_)) => match role {
                PeerRole::Agent => handle.agent_pong(id),
                PeerRole::Operator => handle.operator_pong(id),
            },
            Ok(Message::Ping(_)) => {}
            Ok(Message::Close(_)) => break,
            Err(error) => {
                tracing::debug!(id, role = role.as_str(), %error, "socket read failed");
                break;
            }
        }
    }
}

fn dispatch_frame(handle: &HubHandle, role: PeerRole, id: u32, text: String) {
    match role {
        PeerRole::Agent => handle.agent_frame(id, text),
        PeerRole::Operator => handle.operator_frame(id, text),
    }
}
