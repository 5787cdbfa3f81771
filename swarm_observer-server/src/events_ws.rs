use std::sync::Arc;
use futures_util::{StreamExt, SinkExt, future::select};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use swarm_observer_lib::CoordinatorService;
use warp::{Filter, Rejection, Reply, ws::{Message as WsMsg, WebSocket}};
use log::{debug, info, warn};

use crate::control::{self, Command, with_coordinator};

/// Inbound text frame: `{"command": "press"}`
#[derive(Debug, Deserialize)]
struct WsCommand {
    command: Command,
}

/// Build the WebSocket route under `/ws`
pub fn ws_routes(
    coord: Arc<CoordinatorService>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    // allow CORS for WS handshake
    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "OPTIONS"])
        .allow_headers(vec!["sec-websocket-protocol", "origin", "upgrade"]);

    warp::path("ws")
        .and(warp::ws())
        .and(with_coordinator(coord))
        .map(|ws: warp::ws::Ws, coord: Arc<CoordinatorService>| {
            ws.on_upgrade(move |socket| handle_ws(socket, coord))
        })
        .with(cors)
}

async fn handle_ws(ws: WebSocket, coord: Arc<CoordinatorService>) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut rx = coord.context().subscribe();

    // Incoming from client → control commands
    let inbound = async {
        while let Some(result) = ws_rx.next().await {
            let Ok(msg) = result else { break };
            let Ok(txt) = msg.to_str() else { continue };
            match serde_json::from_str::<WsCommand>(txt) {
                Ok(WsCommand { command }) => {
                    if let Err(e) = control::run_command(&coord, command).await {
                        warn!("WS control {:?} failed: {}", command, e);
                    }
                }
                Err(e) => debug!("ignoring WS text frame: {}", e),
            }
        }
    };

    // Outgoing swarm events → client (JSON text frames)
    let outbound = async {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let txt = match serde_json::to_string(&event) {
                        Ok(t) => t,
                        Err(e) => {
                            warn!("cannot encode event: {}", e);
                            continue;
                        }
                    };
                    if ws_tx.send(WsMsg::text(txt)).await.is_err() {
                        break; // client disconnected
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("WS client lagged, dropped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    // Run inbound and outbound until one finishes
    select(Box::pin(inbound), Box::pin(outbound)).await;
    info!("WebSocket client disconnected");
}
