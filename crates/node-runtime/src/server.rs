//! # Client API Server
//!
//! WebSocket transport for the two client streams, JSON text frames:
//!
//! - `/broadcast`: client sends `Envelope`, server replies `BroadcastResponse`
//! - `/deliver`: client sends `DeliverUpdate`, server sends `DeliverResponse`
//!
//! plus `GET /health` reporting the chain state.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use kafka_orderer::{BroadcastApi, ChainHandle, DeliverApi, SessionInput};
use serde_json::json;
use shared_types::{BroadcastResponse, DeliverUpdate, Envelope, Status};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Frames buffered per direction on a delivery socket.
const DELIVER_BUFFER: usize = 16;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    chain: Arc<ChainHandle>,
    deliver: Arc<dyn DeliverApi>,
}

impl AppState {
    pub fn new(chain: Arc<ChainHandle>, deliver: Arc<dyn DeliverApi>) -> Self {
        Self { chain, deliver }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/broadcast", get(broadcast_ws))
        .route("/deliver", get(deliver_ws))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve until `shutdown` flips to `true`.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let chain = state.chain.state();
    Json(json!({
        "status": if chain.is_accepting() { "ok" } else { "degraded" },
        "chain": chain.name(),
    }))
}

async fn broadcast_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_broadcast(socket, state.chain))
        .into_response()
}

async fn deliver_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_deliver(socket, state.deliver))
        .into_response()
}

async fn serve_broadcast(mut socket: WebSocket, chain: Arc<ChainHandle>) {
    while let Some(frame) = socket.recv().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(error = %e, "Broadcast socket error");
                break;
            }
        };

        let reply = match serde_json::from_str::<Envelope>(&text) {
            Ok(envelope) => chain.broadcast(envelope).await,
            Err(e) => {
                debug!(error = %e, "Malformed envelope");
                BroadcastResponse::new(Status::BadRequest)
            }
        };
        let Ok(json) = serde_json::to_string(&reply) else {
            break;
        };
        if socket.send(Message::Text(json)).await.is_err() {
            break;
        }
    }
}

fn parse_update(text: &str) -> SessionInput {
    match serde_json::from_str::<DeliverUpdate>(text) {
        Ok(update) => SessionInput::Update(update),
        Err(e) => SessionInput::Malformed(e.to_string()),
    }
}

async fn serve_deliver(socket: WebSocket, deliver: Arc<dyn DeliverApi>) {
    let (mut sink, mut stream) = socket.split();
    let (input_tx, input_rx) = mpsc::channel(DELIVER_BUFFER);
    let (response_tx, mut response_rx) = mpsc::channel(DELIVER_BUFFER);
    let session = deliver.deliver(input_rx, response_tx);

    let reader = async move {
        while let Some(frame) = stream.next().await {
            let input = match frame {
                Ok(Message::Text(text)) => parse_update(&text),
                Ok(Message::Binary(_)) => SessionInput::Malformed("binary frame".into()),
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            };
            if input_tx.send(input).await.is_err() {
                break;
            }
        }
    };

    let writer = async move {
        while let Some(response) = response_rx.recv().await {
            let Ok(json) = serde_json::to_string(&response) else {
                break;
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    };

    // Either side finishing drops the other's channel end, which ends the session.
    tokio::select! {
        _ = reader => {}
        _ = writer => {}
    }

    match session.await {
        Ok(outcome) => debug!(
            session_id = %outcome.id,
            blocks_sent = outcome.blocks_sent,
            "Delivery socket closed"
        ),
        Err(e) => warn!(error = %e, "Delivery session task failed"),
    }
}
