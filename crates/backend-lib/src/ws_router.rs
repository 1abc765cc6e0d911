// ============================
// voiceroom-backend-lib/src/ws_router.rs
// ============================
//! WebSocket router and connection handling.
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use serde_json::{json, Value};
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};
use voiceroom_common::ServerToClient;

use crate::metrics::{FEED_LAGGED, WS_ACTIVE, WS_CONNECTION};
use crate::middleware::rate_limit::{client_ip, rate_limit};
use crate::store::Storage;
use crate::websocket::WebSocketHandler;
use crate::AppState;

/// Create the router: `/ws` for clients, `/health` for liveness checks.
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn create_router<S: Storage + 'static>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler::<S>))
        .route("/health", get(health))
        .layer(axum::middleware::from_fn_with_state(Arc::clone(&state), rate_limit::<S>))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Handler for WebSocket connections
pub async fn ws_handler<S: Storage + 'static>(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<Arc<AppState<S>>>,
) -> impl IntoResponse {
    counter!(WS_CONNECTION).increment(1);
    let client_ip = client_ip(&headers, peer);
    ws.on_upgrade(move |socket| handle_connection(socket, state, client_ip))
}

async fn handle_connection<S: Storage + 'static>(socket: WebSocket, state: Arc<AppState<S>>, client_ip: IpAddr) {
    let (mut sink, mut stream) = socket.split();

    // Outgoing frames go through one task so replies and pushes never interleave mid-frame
    let (client_tx, mut client_rx) = mpsc::channel::<Message>(64);
    let send_task = tokio::spawn(async move {
        while let Some(message) = client_rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    // Subscribe before handling anything so no change after the first reply is missed
    let mut feed = state.services.db.subscribe();
    let mut handler = WebSocketHandler::new(Arc::clone(&state), client_ip);
    gauge!(WS_ACTIVE).increment(1.0);
    info!(client_id = handler.client_id(), %client_ip, "connection opened");

    loop {
        let outgoing: Vec<ServerToClient> = tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => vec![handler.handle_text(text.as_str()).await],
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(client_id = handler.client_id(), error = %e, "socket error");
                    break;
                },
                Some(Ok(_)) => continue,
            },
            change = feed.recv() => match change {
                Ok(change) => match handler.handle_change(&change).await {
                    Ok(Some(push)) => vec![push],
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(client_id = handler.client_id(), key = %change.key, error = %e, "undecodable change");
                        continue;
                    },
                },
                Err(RecvError::Lagged(missed)) => {
                    counter!(FEED_LAGGED).increment(missed);
                    warn!(client_id = handler.client_id(), missed, "change feed lagged, resyncing");
                    handler.resync().await
                },
                Err(RecvError::Closed) => break,
            },
        };

        if !send_all(&client_tx, outgoing).await {
            break;
        }
    }

    handler.disconnect().await;
    gauge!(WS_ACTIVE).decrement(1.0);
    info!(client_id = handler.client_id(), "connection closed");
    send_task.abort();
}

/// Queue frames for the send task; false once the socket is gone
async fn send_all(client_tx: &mpsc::Sender<Message>, messages: Vec<ServerToClient>) -> bool {
    for message in messages {
        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "failed to serialize server message");
                continue;
            },
        };
        if client_tx.send(Message::Text(json.into())).await.is_err() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{ScriptedHost, Services};
    use crate::store::MemoryStorage;
    use crate::middleware::rate_limit::REAL_IP_HEADER;
    use axum::body::{to_bytes, Body};
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn router() -> Router {
        let services = Services::with_ai_host(
            MemoryStorage::new(),
            crate::config::Settings::default(),
            Box::new(ScriptedHost),
        );
        create_router(Arc::new(AppState::from_services(services)))
            .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))))
    }

    #[tokio::test]
    async fn test_health() {
        let response = router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "ok");
    }

    #[tokio::test]
    async fn test_ws_requires_upgrade() {
        let response = router()
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[test]
    fn test_client_ip_falls_back_to_peer() {
        let first = SocketAddr::from(([192, 168, 1, 10], 5000));
        let second = SocketAddr::from(([192, 168, 1, 11], 5000));
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, first), first.ip());
        assert_ne!(client_ip(&headers, first), client_ip(&headers, second));

        headers.insert(REAL_IP_HEADER, "10.1.2.3".parse().unwrap());
        assert_eq!(client_ip(&headers, first), "10.1.2.3".parse::<IpAddr>().unwrap());
        headers.insert(REAL_IP_HEADER, "garbage".parse().unwrap());
        assert_eq!(client_ip(&headers, second), second.ip());
    }
}
