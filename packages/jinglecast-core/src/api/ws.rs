//! WebSocket handler for playback endpoints.
//!
//! An endpoint connects with `?token=XXXXX`, receives `WELCOME` with its
//! endpoint id and then serves PREPARE/PLAY/STOP requests from the hub,
//! answering each with an `ACK`.

use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::sink::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use serde::Deserialize;

use crate::api::response::api_error;
use crate::api::AppState;
use crate::protocol::codec::{
    decode_client_message, encode_request, encode_server_message, ClientMessage, CodecError,
    ServerMessage, WireFrame,
};
use crate::protocol::GroupId;

#[derive(Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    token: Option<String>,
}

type WsSender = SplitSink<WebSocket, Message>;

fn to_message(frame: WireFrame) -> Message {
    match frame {
        WireFrame::Text(text) => Message::Text(text.into()),
        WireFrame::Binary(bytes) => Message::Binary(bytes),
    }
}

/// Encodes and sends one frame. Returns `false` if the peer is gone.
async fn send_frame(sender: &mut WsSender, frame: Result<WireFrame, CodecError>) -> bool {
    match frame {
        Ok(frame) => sender.send(to_message(frame)).await.is_ok(),
        Err(e) => {
            log::error!("[WS] Failed to encode frame: {}", e);
            true
        }
    }
}

/// Upgrades endpoints that present a valid group token.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let Some(group) = query
        .token
        .as_deref()
        .and_then(|token| GroupId::parse(token).ok())
    else {
        log::warn!("[WS] Rejected connection without a valid token");
        return api_error(StatusCode::UNAUTHORIZED, "token_missing", "Token missing");
    };
    ws.on_upgrade(move |socket| handle_ws(socket, state, group))
        .into_response()
}

/// Main WebSocket connection handler.
async fn handle_ws(socket: WebSocket, state: AppState, group: GroupId) {
    let (mut sender, mut receiver) = socket.split();
    let mut last_activity = Instant::now();

    // Unregisters the endpoint on every exit path.
    let (conn_guard, mut requests) = state.hub.register(group, "ws");
    let cancel_token = conn_guard.cancel_token().clone();

    let welcome = ServerMessage::Welcome {
        endpoint_id: conn_guard.id().clone(),
    };
    if !send_frame(&mut sender, encode_server_message(&welcome)).await {
        log::warn!("[WS] Failed to send WELCOME, client disconnected");
        return;
    }

    let timeout = Duration::from_secs(state.config.ws_heartbeat_timeout_secs);
    // Delay mode skips missed ticks rather than bursting to catch up.
    let mut heartbeat_interval = tokio::time::interval(Duration::from_secs(
        state.config.ws_heartbeat_check_interval_secs,
    ));
    heartbeat_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // Handle force-close request
            _ = cancel_token.cancelled() => {
                log::info!("[WS] Connection force-closed: {}", conn_guard.id());
                break;
            }
            // Requests routed to this endpoint by the hub
            request = requests.recv() => {
                let Some(request) = request else { break };
                let frame = encode_request(request.request_id, &request.command);
                if !send_frame(&mut sender, frame).await {
                    break;
                }
            }
            // Handle incoming messages from the endpoint
            msg = receiver.next() => {
                last_activity = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => match decode_client_message(text.as_str()) {
                        Ok(ClientMessage::Ack { request_id, endpoint_id, success }) => {
                            conn_guard.resolve_ack(request_id, endpoint_id.as_ref(), success);
                        }
                        Ok(ClientMessage::Heartbeat) => {
                            let ack = encode_server_message(&ServerMessage::HeartbeatAck);
                            if !send_frame(&mut sender, ack).await {
                                break;
                            }
                        }
                        Err(e) => {
                            log::warn!("[WS] Invalid message from {}: {}", conn_guard.id(), e);
                        }
                    },
                    Some(Ok(Message::Binary(_))) => {
                        log::debug!("[WS] Ignoring binary frame from {}", conn_guard.id());
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
            // Heartbeat timeout check
            _ = heartbeat_interval.tick() => {
                if last_activity.elapsed() > timeout {
                    log::warn!("[WS] Heartbeat timeout: {}", conn_guard.id());
                    break;
                }
            }
        }
    }

    log::info!("[WS] Connection closed: {}", conn_guard.id());
}

#[cfg(test)]
mod tests {
    use crate::api::http::tests::serve;
    use crate::protocol::codec::{
        decode_server_frame, encode_client_message, ClientMessage, EndpointInbound, WireFrame,
    };
    use crate::state::Config;
    use futures::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::{Error as WsError, Message};

    fn wire(message: Message) -> Option<WireFrame> {
        match message {
            Message::Text(text) => Some(WireFrame::Text(text.to_string())),
            Message::Binary(bytes) => Some(WireFrame::Binary(bytes)),
            _ => None,
        }
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let server = serve(Config::default()).await;

        let err = connect_async(format!("ws://{}/ws", server.addr))
            .await
            .unwrap_err();

        match err {
            WsError::Http(response) => assert_eq!(response.status().as_u16(), 401),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn endpoint_takes_part_in_broadcast() {
        let server = serve(Config::default()).await;
        let (_, body) = server.post("/api/chats/5/token", None).await;
        let token = body["token"].as_str().unwrap().to_string();

        let (mut socket, _) = connect_async(format!("ws://{}/ws?token={token}", server.addr))
            .await
            .unwrap();
        let welcome = socket.next().await.unwrap().unwrap();
        let Ok(EndpointInbound::Welcome(endpoint_id)) =
            decode_server_frame(wire(welcome).unwrap())
        else {
            panic!("expected WELCOME");
        };
        assert!(endpoint_id.as_str().starts_with("ws-"));

        let received = tokio::spawn(async move {
            let mut commands = Vec::new();
            while let Some(Ok(message)) = socket.next().await {
                let Some(frame) = wire(message) else { continue };
                if let Ok(EndpointInbound::Request { request_id, command }) =
                    decode_server_frame(frame)
                {
                    commands.push(command.name());
                    let ack = encode_client_message(&ClientMessage::Ack {
                        request_id,
                        endpoint_id: Some(endpoint_id.clone()),
                        success: true,
                    })
                    .unwrap();
                    socket.send(Message::text(ack)).await.unwrap();
                    if commands.len() == 2 {
                        break;
                    }
                }
            }
            commands
        });

        let (status, body) = server
            .post(
                "/api/chats/5/play",
                Some(json!({ "audio": { "url": "https://files.invalid/a.ogg" } })),
            )
            .await;

        assert_eq!(status, 200);
        assert_eq!(body["resolved"], 1);
        assert_eq!(body["prepared"], 1);
        assert_eq!(body["played"], 1);
        assert_eq!(received.await.unwrap(), vec!["prepare", "play"]);
    }
}
