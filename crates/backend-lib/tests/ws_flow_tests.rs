//! Client flows through the WebSocket handler and the HTTP router.
mod common;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Request, StatusCode};
use backend_lib::{store::FlatFileStorage, websocket::WebSocketHandler, ws_router, AppState};
use common::{register, setup_test_env, test_settings};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tower::ServiceExt;
use voiceroom_common::ServerToClient;

fn connect(state: &Arc<AppState<FlatFileStorage>>) -> WebSocketHandler<FlatFileStorage> {
    WebSocketHandler::new(Arc::clone(state), IpAddr::from([127, 0, 0, 1]))
}

/// Send one JSON frame the way a client would
async fn send(handler: &mut WebSocketHandler<FlatFileStorage>, frame: Value) -> ServerToClient {
    handler.handle_text(&frame.to_string()).await
}

#[tokio::test]
async fn test_register_create_room_and_gift() {
    let mut settings = test_settings();
    settings.economy.starting_diamonds = 30;
    let (state, _dir) = setup_test_env(settings).await;

    let mut host = connect(&state);
    let mut fan = connect(&state);

    let reply = send(&mut host, json!({"msgType": "ListRooms"})).await;
    assert!(matches!(reply, ServerToClient::Error { ref code, .. } if code == "AUTH_001"));

    for (handler, name) in [(&mut host, "host"), (&mut fan, "fan")] {
        let reply = send(
            handler,
            json!({"msgType": "Register", "username": name, "password": "password 123", "display_name": name}),
        )
        .await;
        assert!(matches!(reply, ServerToClient::Authenticated { .. }));
    }
    let host_id = host.user_id().unwrap().to_string();

    let ServerToClient::Room { room, .. } =
        send(&mut host, json!({"msgType": "CreateRoom", "title": "Friday Night"})).await
    else {
        panic!("expected Room");
    };
    assert_eq!(room.seat_of(&host_id), Some(0));

    let reply = send(&mut fan, json!({"msgType": "JoinRoom", "room_id": room.id})).await;
    assert!(matches!(reply, ServerToClient::Room { viewers: 2, .. }));

    let reply = send(
        &mut fan,
        json!({"msgType": "SendGift", "room_id": room.id, "gift_id": "heart", "quantity": 2, "recipients": [host_id]}),
    )
    .await;
    let ServerToClient::GiftSent { receipt } = reply else {
        panic!("expected GiftSent, got {reply:?}");
    };
    assert_eq!(receipt.total_cost, 20);
    assert_eq!(receipt.sender_diamonds, 10);

    let reply = send(
        &mut fan,
        json!({"msgType": "SendGift", "room_id": room.id, "gift_id": "heart", "quantity": 2, "recipients": [host_id]}),
    )
    .await;
    assert!(matches!(reply, ServerToClient::Error { ref code, .. } if code == "WALLET_001"));

    let ServerToClient::Badges { badges } = send(&mut host, json!({"msgType": "GetBadges"})).await else {
        panic!("expected Badges");
    };
    assert_eq!(badges.unread_notifications, 1);
}

#[tokio::test]
async fn test_seat_and_voice_grant_over_the_wire() {
    let (state, _dir) = setup_test_env(test_settings()).await;
    let mut host = connect(&state);
    let mut guest = connect(&state);
    for (handler, name) in [(&mut host, "host"), (&mut guest, "guest")] {
        send(
            handler,
            json!({"msgType": "Register", "username": name, "password": "password 123", "display_name": name}),
        )
        .await;
    }
    let ServerToClient::Room { room, .. } = send(&mut host, json!({"msgType": "CreateRoom", "title": "Lounge"})).await
    else {
        panic!("expected Room");
    };

    let reply = send(&mut guest, json!({"msgType": "TakeSeat", "room_id": room.id, "seat": 1})).await;
    assert!(matches!(reply, ServerToClient::Error { ref code, .. } if code == "ROOM_003"));

    send(&mut guest, json!({"msgType": "JoinRoom", "room_id": room.id})).await;
    let reply = send(&mut guest, json!({"msgType": "TakeSeat", "room_id": room.id, "seat": 0})).await;
    assert!(matches!(reply, ServerToClient::Error { ref code, .. } if code == "SEAT_004"));
    send(&mut guest, json!({"msgType": "TakeSeat", "room_id": room.id, "seat": 1})).await;

    let reply = send(&mut guest, json!({"msgType": "GetVoiceGrant", "room_id": room.id})).await;
    assert!(matches!(reply, ServerToClient::VoiceGrant { ref grant } if grant.can_publish));

    send(&mut host, json!({"msgType": "SetSeatMuted", "room_id": room.id, "seat": 1, "muted": true})).await;
    let reply = send(&mut guest, json!({"msgType": "GetVoiceGrant", "room_id": room.id})).await;
    assert!(matches!(reply, ServerToClient::VoiceGrant { ref grant } if !grant.can_publish));

    let reply = send(&mut guest, json!({"msgType": "LeaveRoom", "room_id": room.id})).await;
    assert!(matches!(reply, ServerToClient::Ack { .. }));
    let (room, viewers) = state.services.room_snapshot(&room.id).await.unwrap();
    assert_eq!(viewers, 1);
    assert!(room.seats[1].occupant.is_none());
}

#[tokio::test]
async fn test_router_serves_health() {
    let (state, _dir) = setup_test_env(test_settings()).await;
    let app = ws_router::create_router(state).layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!({"status": "ok"}));
}

/// Serve the router on an ephemeral loopback port the way the binary does
async fn spawn_server(state: Arc<AppState<FlatFileStorage>>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = ws_router::create_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });
    addr
}

/// Open a client socket whose source address is `local`
async fn dial_from(local: [u8; 4], server: SocketAddr) -> WebSocketStream<TcpStream> {
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind(SocketAddr::from((local, 0))).unwrap();
    let stream = socket.connect(server).await.unwrap();
    let (ws, _) = tokio_tungstenite::client_async(format!("ws://{server}/ws"), stream)
        .await
        .unwrap();
    ws
}

async fn exchange(ws: &mut WebSocketStream<TcpStream>, frame: Value) -> Value {
    ws.send(Message::text(frame.to_string())).await.unwrap();
    loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            _ => continue,
        }
    }
}

#[tokio::test]
async fn test_login_lockout_is_per_peer_address() {
    let (state, _dir) = setup_test_env(test_settings()).await;
    register(&state, "victim").await;
    let server = spawn_server(Arc::clone(&state)).await;

    let mut attacker = dial_from([127, 0, 0, 1], server).await;
    let wrong = json!({"msgType": "Login", "username": "victim", "password": "not the password"});
    let max_attempts = state.settings.rate_limit.login_max_attempts;
    for _ in 0..max_attempts {
        let reply = exchange(&mut attacker, wrong.clone()).await;
        assert_eq!(reply["code"], "AUTH_002");
    }
    let reply = exchange(&mut attacker, wrong).await;
    assert_eq!(reply["code"], "AUTH_003");

    let mut owner = dial_from([127, 0, 0, 2], server).await;
    let reply = exchange(
        &mut owner,
        json!({"msgType": "Login", "username": "victim", "password": "password 123"}),
    )
    .await;
    assert_eq!(reply["msgType"], "Authenticated", "got {reply}");
}

#[tokio::test]
async fn test_handler_lockout_follows_client_ip() {
    let (state, _dir) = setup_test_env(test_settings()).await;
    register(&state, "victim").await;
    let mut first = WebSocketHandler::new(Arc::clone(&state), IpAddr::from([10, 0, 0, 1]));
    let mut second = WebSocketHandler::new(Arc::clone(&state), IpAddr::from([10, 0, 0, 2]));

    let wrong = json!({"msgType": "Login", "username": "victim", "password": "not the password"});
    for _ in 0..=state.settings.rate_limit.login_max_attempts {
        send(&mut first, wrong.clone()).await;
    }
    let reply = send(&mut first, wrong).await;
    assert!(matches!(reply, ServerToClient::Error { ref code, .. } if code == "AUTH_003"));

    let reply = send(
        &mut second,
        json!({"msgType": "Login", "username": "victim", "password": "password 123"}),
    )
    .await;
    assert!(matches!(reply, ServerToClient::Authenticated { .. }));
}

fn error_code(reply: &ServerToClient) -> &str {
    match reply {
        ServerToClient::Error { code, .. } => code,
        other => panic!("expected Error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_gift_edge_cases_over_the_wire() {
    let mut settings = test_settings();
    settings.economy.starting_diamonds = 100;
    let (state, _dir) = setup_test_env(settings).await;
    let mut host = connect(&state);
    let mut singer = connect(&state);
    let mut fan = connect(&state);
    for (handler, name) in [(&mut host, "host"), (&mut singer, "singer"), (&mut fan, "fan")] {
        send(
            handler,
            json!({"msgType": "Register", "username": name, "password": "password 123", "display_name": name}),
        )
        .await;
    }
    let singer_id = singer.user_id().unwrap().to_string();
    let fan_id = fan.user_id().unwrap().to_string();
    let ServerToClient::Room { room, .. } = send(&mut host, json!({"msgType": "CreateRoom", "title": "Stage"})).await
    else {
        panic!("expected Room");
    };
    send(&mut singer, json!({"msgType": "JoinRoom", "room_id": room.id})).await;
    send(&mut fan, json!({"msgType": "JoinRoom", "room_id": room.id})).await;

    let gift = |quantity: u64, recipients: Vec<&str>| {
        json!({"msgType": "SendGift", "room_id": room.id, "gift_id": "heart", "quantity": quantity, "recipients": recipients})
    };

    let reply = send(&mut fan, gift(0, vec![singer_id.as_str()])).await;
    assert_eq!(error_code(&reply), "VAL_001");
    let reply = send(&mut fan, gift(1, vec![])).await;
    assert_eq!(error_code(&reply), "VAL_001");

    // in the room but not on a seat
    let reply = send(&mut fan, gift(1, vec![singer_id.as_str()])).await;
    assert_eq!(error_code(&reply), "GIFT_002");

    send(&mut singer, json!({"msgType": "TakeSeat", "room_id": room.id, "seat": 1})).await;
    let reply = send(&mut fan, gift(1, vec![singer_id.as_str()])).await;
    assert!(matches!(reply, ServerToClient::GiftSent { .. }), "got {reply:?}");

    send(&mut host, json!({"msgType": "BanUser", "room_id": room.id, "user_id": fan_id})).await;
    let reply = send(&mut fan, gift(1, vec![singer_id.as_str()])).await;
    assert_eq!(error_code(&reply), "ROOM_002");

    assert_eq!(state.services.account(&fan_id).await.unwrap().diamonds, 90);
    assert_eq!(state.services.account(&singer_id).await.unwrap().coins, 10);
}
