//! WebSocket connection to the coordinator.
//!
//! Keeps one connection open, reconnecting after a fixed delay, and feeds
//! every decoded request into the [`EndpointSession`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use jinglecast_core::protocol::codec::{
    decode_server_frame, encode_client_message, ClientMessage, EndpointInbound, WireFrame,
};
use jinglecast_core::protocol_constants::{CLIENT_HEARTBEAT_INTERVAL_SECS, MAX_PREPARE_FRAME_BYTES};
use jinglecast_core::{EndpointId, EndpointSession, GroupId};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, WebSocketStream};
use tokio_util::sync::CancellationToken;

/// Delay between a dropped connection and the next attempt.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// WebSocket limits large enough for the longest PREPARE frame.
pub fn ws_config() -> WebSocketConfig {
    WebSocketConfig::default()
        .max_message_size(Some(MAX_PREPARE_FRAME_BYTES))
        .max_frame_size(Some(MAX_PREPARE_FRAME_BYTES))
}

/// Builds the endpoint URL for `server`, accepting `http(s)://` or `ws(s)://`.
pub fn endpoint_url(server: &str, token: &GroupId) -> String {
    let server = server.trim_end_matches('/');
    let server = if let Some(rest) = server.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = server.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if server.starts_with("ws://") || server.starts_with("wss://") {
        server.to_string()
    } else {
        format!("ws://{server}")
    };
    format!("{server}/ws?token={}", token.as_str())
}

/// A playback endpoint connected to one coordinator.
pub struct EndpointClient {
    server: String,
    url: String,
    session: Arc<EndpointSession>,
    heartbeat: Duration,
}

impl EndpointClient {
    pub fn new(server: &str, token: &GroupId, session: Arc<EndpointSession>) -> Self {
        Self {
            server: server.to_string(),
            url: endpoint_url(server, token),
            session,
            heartbeat: Duration::from_secs(CLIENT_HEARTBEAT_INTERVAL_SECS),
        }
    }

    /// Connects and serves until `shutdown` fires, reconnecting on failure.
    pub async fn run(&self, shutdown: CancellationToken) {
        loop {
            log::info!("[Client] Connecting to {}", self.server);
            let connected = tokio::select! {
                () = shutdown.cancelled() => break,
                result = connect_async_with_config(self.url.as_str(), Some(ws_config()), false) => result,
            };

            match connected {
                Ok((ws, _)) => match self.serve(ws, &shutdown).await {
                    Ok(()) => log::info!("[Client] Connection closed"),
                    Err(e) => log::warn!("[Client] Connection lost: {:#}", e),
                },
                Err(e) => log::warn!("[Client] Failed to connect: {}", e),
            }

            if shutdown.is_cancelled() {
                break;
            }
            log::info!("[Client] Reconnecting in {}s", RECONNECT_DELAY.as_secs());
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }

        self.session.stop();
    }

    /// Serves one established connection until it closes.
    pub async fn serve<S>(
        &self,
        ws: WebSocketStream<S>,
        shutdown: &CancellationToken,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut sink, mut stream) = ws.split();
        let (replies_tx, mut replies) = mpsc::unbounded_channel();
        let mut endpoint_id: Option<EndpointId> = None;

        let mut heartbeat = interval_at(Instant::now() + self.heartbeat, self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(());
                }
                message = stream.next() => {
                    let frame = match message {
                        Some(Ok(Message::Text(text))) => WireFrame::Text(text.to_string()),
                        Some(Ok(Message::Binary(bytes))) => WireFrame::Binary(bytes),
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(e).context("read failed"),
                    };
                    match decode_server_frame(frame) {
                        Ok(EndpointInbound::Welcome(id)) => {
                            log::info!("[Client] Joined as {}", id);
                            endpoint_id = Some(id);
                        }
                        Ok(EndpointInbound::Request { request_id, command }) => {
                            log::debug!("[Client] {} request {}", command.name(), request_id);
                            self.session.dispatch(request_id, command, &replies_tx);
                        }
                        Ok(EndpointInbound::HeartbeatAck) => {}
                        Err(e) => log::warn!("[Client] Ignoring malformed frame: {}", e),
                    }
                }
                Some(reply) = replies.recv() => {
                    let ack = encode_client_message(&ClientMessage::Ack {
                        request_id: reply.request_id,
                        endpoint_id: endpoint_id.clone(),
                        success: reply.success,
                    })?;
                    sink.send(Message::text(ack)).await.context("send ACK failed")?;
                }
                _ = heartbeat.tick() => {
                    let ping = encode_client_message(&ClientMessage::Heartbeat)?;
                    sink.send(Message::text(ping)).await.context("send HEARTBEAT failed")?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use jinglecast_core::audio::OutputError;
    use jinglecast_core::protocol::codec::{
        decode_client_message, encode_request, encode_server_message, ServerMessage,
    };
    use jinglecast_core::{
        AudioOutput, CancelSignal, Command, EventId, SingleFlightPlayer, TokioSpawner,
    };
    use jinglecast_core::protocol_constants::{MAX_BROADCAST_PCM_BYTES, PREPARE_HEADER_LEN};
    use tokio::net::TcpListener;
    use tokio_tungstenite::{accept_async, client_async_with_config};

    struct InstantOutput;

    #[async_trait]
    impl AudioOutput for InstantOutput {
        async fn play(&self, _pcm: Bytes, _cancel: CancelSignal) -> Result<bool, OutputError> {
            Ok(true)
        }
    }

    fn client() -> EndpointClient {
        let session = Arc::new(EndpointSession::new(
            Arc::new(SingleFlightPlayer::new(Arc::new(InstantOutput))),
            Duration::from_secs(15),
            TokioSpawner::current(),
        ));
        EndpointClient::new("ws://127.0.0.1:1", &GroupId::parse("ABC12").unwrap(), session)
    }

    fn to_message(frame: WireFrame) -> Message {
        match frame {
            WireFrame::Text(text) => Message::text(text),
            WireFrame::Binary(bytes) => Message::Binary(bytes),
        }
    }

    #[test]
    fn endpoint_url_normalizes_scheme() {
        let token = GroupId::parse("ABC12").unwrap();
        assert_eq!(
            endpoint_url("http://host:4000/", &token),
            "ws://host:4000/ws?token=ABC12"
        );
        assert_eq!(
            endpoint_url("https://cast.example.org", &token),
            "wss://cast.example.org/ws?token=ABC12"
        );
        assert_eq!(
            endpoint_url("wss://cast.example.org", &token),
            "wss://cast.example.org/ws?token=ABC12"
        );
        assert_eq!(endpoint_url("host:4000", &token), "ws://host:4000/ws?token=ABC12");
    }

    /// Runs a one-connection coordinator that sends WELCOME, PREPARE with
    /// `pcm` and PLAY, then returns the ACKs it received.
    async fn exchange(pcm: Bytes) -> Vec<(u64, Option<EndpointId>, bool)> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let coordinator = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            let event_id = EventId::new();
            let frames = [
                encode_server_message(&ServerMessage::Welcome {
                    endpoint_id: EndpointId::new("ws-7"),
                })
                .unwrap(),
                encode_request(1, &Command::Prepare { event_id, pcm }).unwrap(),
                encode_request(2, &Command::Play { event_id }).unwrap(),
            ];
            for frame in frames {
                ws.send(to_message(frame)).await.unwrap();
            }

            let mut acks = Vec::new();
            while acks.len() < 2 {
                let Some(Ok(Message::Text(text))) = ws.next().await else {
                    panic!("connection ended early");
                };
                if let Ok(ClientMessage::Ack {
                    request_id,
                    endpoint_id,
                    success,
                }) = decode_client_message(text.as_str())
                {
                    acks.push((request_id, endpoint_id, success));
                }
            }
            ws.close(None).await.unwrap();
            acks
        });

        let tcp = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (ws, _) = client_async_with_config(format!("ws://{addr}/ws"), tcp, Some(ws_config()))
            .await
            .unwrap();
        client().serve(ws, &CancellationToken::new()).await.unwrap();

        coordinator.await.unwrap()
    }

    #[tokio::test]
    async fn answers_prepare_and_play_with_endpoint_id() {
        let acks = exchange(Bytes::from_static(b"PCM")).await;

        let id = Some(EndpointId::new("ws-7"));
        assert_eq!(acks, vec![(1, id.clone(), true), (2, id, true)]);
    }

    #[tokio::test]
    async fn accepts_prepare_above_default_frame_limit() {
        // 180 s of PCM, past the 16 MiB tungstenite default
        let acks = exchange(Bytes::from(vec![0u8; 180 * 96_000])).await;

        assert_eq!(acks.len(), 2);
        assert!(acks.iter().all(|(_, _, success)| *success));
    }

    #[test]
    fn frame_limit_fits_longest_broadcast() {
        let config = ws_config();
        let longest = PREPARE_HEADER_LEN + MAX_BROADCAST_PCM_BYTES;

        assert!(config.max_frame_size.is_some_and(|max| max >= longest));
        assert!(config.max_message_size.is_some_and(|max| max >= longest));
    }

    #[tokio::test]
    async fn shutdown_ends_reconnect_loop() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), client().run(shutdown))
            .await
            .unwrap();
    }
}
