//! WebSocket feed of newly detected Lua errors.

use axum::extract::ws::{Message, WebSocket};
use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::context::{Actor, RequestContext};
use crate::error::LogError;
use crate::logs::aggregator::LuaErrorDetected;
use crate::logs::data::ServerId;
use crate::web::extract::{ApiError, ApiResult};
use crate::web::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct FeedParams {
    /// Only stream events of this server
    pub server: Option<u32>,
}

/// Which events a connected client receives.
#[derive(Debug, Clone)]
pub struct FeedFilter {
    actor: Actor,
    server: Option<ServerId>,
}

impl FeedFilter {
    pub fn new(actor: Actor, server: Option<ServerId>) -> Self {
        Self { actor, server }
    }

    pub fn accepts(&self, event: &LuaErrorDetected) -> bool {
        if self.server.is_some_and(|id| id != event.server_id) {
            return false;
        }
        self.actor.is_admin || event.owner_id == self.actor.user_id
    }
}

/// WebSocket upgrade handler.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    actor: Actor,
    Query(params): Query<FeedParams>,
) -> ApiResult<Response> {
    let server = match params.server {
        Some(id) => {
            let ctx = RequestContext::new(actor.clone(), ServerId(id));
            Some(state.service.server(&ctx)?.id)
        }
        None => None,
    };

    if !state.try_acquire_websocket() {
        return Err(ApiError(LogError::unavailable(
            "too many WebSocket connections",
        )));
    }

    let filter = FeedFilter::new(actor, server);
    Ok(ws.on_upgrade(move |socket| async move {
        handle_websocket(socket, state.clone(), filter).await;
        state.release_websocket();
    }))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: AppState, filter: FeedFilter) {
    let client_id = uuid::Uuid::new_v4().to_string();
    info!(
        "WebSocket client {} connected for user {}",
        client_id, filter.actor.user_id
    );

    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.service.aggregator().subscribe();

    let client_id_recv = client_id.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => {
                    debug!("WebSocket client {} sent close", client_id_recv);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket error for client {}: {}", client_id_recv, e);
                    break;
                }
            }
        }
    });

    let client_id_send = client_id.clone();
    let send_task = tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "WebSocket client {} lagged, {} events skipped",
                        client_id_send, skipped
                    );
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            if !filter.accepts(&event) {
                continue;
            }
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if let Err(e) = sender.send(Message::Text(json)).await {
                        warn!("Failed to send message to client {}: {}", client_id_send, e);
                        break;
                    }
                }
                Err(e) => {
                    error!(
                        "Failed to serialize event for client {}: {}",
                        client_id_send, e
                    );
                }
            }
        }
    });

    join_first(&client_id, recv_task, send_task).await;

    info!("WebSocket client disconnected: {}", client_id);
}

/// Wait for either half of a connection to finish and abort the other, so
/// no task or broadcast receiver outlives the connection slot.
async fn join_first(
    client_id: &str,
    mut recv_task: JoinHandle<()>,
    mut send_task: JoinHandle<()>,
) {
    tokio::select! {
        _ = &mut recv_task => {
            debug!("Receive task completed for client {}", client_id);
            send_task.abort();
        }
        _ = &mut send_task => {
            debug!("Send task completed for client {}", client_id);
            recv_task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::data::{LogEvent, LogLevel, LuaError};
    use chrono::Utc;
    use std::time::Duration;
    use tokio::sync::broadcast;

    fn event(server: u32, owner: &str) -> LuaErrorDetected {
        let e = LogEvent::new(ServerId(server), LogLevel::Error, "boom", Utc::now());
        LuaErrorDetected {
            server_id: ServerId(server),
            server_name: "Sandbox".to_string(),
            owner_id: owner.to_string(),
            owner_email: None,
            error: LuaError::first_occurrence(&e, "fp"),
            reopened: false,
        }
    }

    #[test]
    fn test_filter_by_owner() {
        let filter = FeedFilter::new(Actor::user("alice"), None);
        assert!(filter.accepts(&event(1, "alice")));
        assert!(!filter.accepts(&event(2, "bob")));
    }

    #[test]
    fn test_filter_by_server() {
        let filter = FeedFilter::new(Actor::admin("staff"), Some(ServerId(2)));
        assert!(filter.accepts(&event(2, "bob")));
        assert!(!filter.accepts(&event(1, "alice")));
    }

    #[tokio::test]
    async fn test_closed_client_releases_send_loop() {
        let (tx, _) = broadcast::channel::<LuaErrorDetected>(8);
        let mut rx = tx.subscribe();
        let filter = FeedFilter::new(Actor::user("alice"), Some(ServerId(1)));

        // Send loop on a quiet server: only events it rejects ever arrive.
        let send_task = tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                assert!(!filter.accepts(&event));
            }
        });
        let recv_task = tokio::spawn(async {});
        tx.send(event(2, "bob")).unwrap();

        join_first("test", recv_task, send_task).await;

        let mut receivers = tx.receiver_count();
        for _ in 0..50 {
            if receivers == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            receivers = tx.receiver_count();
        }
        assert_eq!(receivers, 0);
    }
}
