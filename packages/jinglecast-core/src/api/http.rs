//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to [`CommandService`] for business
//! logic. Each chat command maps to one route under `/api/chats/{chat_id}`.
//!
//! [`CommandService`]: crate::services::CommandService

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{delete, get, post, put},
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::trace::TraceLayer;

use crate::api::response::api_success;
use crate::api::ws::ws_handler;
use crate::api::AppState;
use crate::audio::AudioRef;
use crate::error::{JingleError, JingleResult};
use crate::protocol::EventId;
use crate::protocol_constants::SERVICE_ID;

// ─────────────────────────────────────────────────────────────────────────────
// Request Types
// ─────────────────────────────────────────────────────────────────────────────

/// Body of `/jingle` and `/play`: the message the command replies to.
#[derive(Deserialize)]
struct AudioBody {
    #[serde(default)]
    audio: Option<AudioRef>,
}

fn audio_of(payload: Option<Json<AudioBody>>) -> Option<AudioRef> {
    payload.and_then(|Json(body)| body.audio)
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/chats/{chat_id}/token", post(handle_token))
        .route(
            "/api/chats/{chat_id}/jingle",
            put(handle_set_jingle).delete(handle_delete_jingle),
        )
        .route("/api/chats/{chat_id}/play", post(handle_play))
        .route("/api/chats/{chat_id}/stop", post(handle_stop))
        .route(
            "/api/chats/{chat_id}/requests/{event_id}",
            delete(handle_cancel_request),
        )
        .route("/api/events", get(event_stream))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness probe with the number of connected endpoints.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    api_success(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "endpoints": state.hub.connection_count(),
    }))
}

async fn handle_token(
    State(state): State<AppState>,
    Path(chat_id): Path<i64>,
) -> JingleResult<impl IntoResponse> {
    Ok(api_success(state.commands.token(chat_id)?))
}

async fn handle_set_jingle(
    State(state): State<AppState>,
    Path(chat_id): Path<i64>,
    payload: Option<Json<AudioBody>>,
) -> JingleResult<impl IntoResponse> {
    Ok(api_success(
        state.commands.set_jingle(chat_id, audio_of(payload))?,
    ))
}

async fn handle_delete_jingle(
    State(state): State<AppState>,
    Path(chat_id): Path<i64>,
) -> JingleResult<impl IntoResponse> {
    Ok(api_success(state.commands.delete_jingle(chat_id)?))
}

/// Runs a broadcast and answers once it finished.
async fn handle_play(
    State(state): State<AppState>,
    Path(chat_id): Path<i64>,
    payload: Option<Json<AudioBody>>,
) -> JingleResult<impl IntoResponse> {
    let reply = state.commands.play(chat_id, audio_of(payload)).await?;
    Ok(api_success(reply))
}

async fn handle_stop(
    State(state): State<AppState>,
    Path(chat_id): Path<i64>,
) -> JingleResult<impl IntoResponse> {
    Ok(api_success(state.commands.stop(chat_id).await?))
}

async fn handle_cancel_request(
    State(state): State<AppState>,
    Path((chat_id, event_id)): Path<(i64, String)>,
) -> JingleResult<impl IntoResponse> {
    let event_id: EventId = event_id
        .parse()
        .map_err(|_| JingleError::InvalidRequest(format!("not an event id: {event_id}")))?;
    Ok(api_success(
        state.commands.cancel_request(chat_id, &event_id)?,
    ))
}

/// Server-Sent Events of every [`BroadcastEvent`](crate::events::BroadcastEvent).
async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.event_bridge.subscribe()).filter_map(|res| async move {
        match res {
            Ok(event) => match Event::default().json_data(&event) {
                Ok(sse) => Some(Ok(sse)),
                Err(e) => {
                    log::warn!("[SSE] Failed to encode event: {}", e);
                    None
                }
            },
            Err(BroadcastStreamRecvError::Lagged(n)) => {
                log::warn!("[SSE] Subscriber lagged, skipped {} event(s)", n);
                None
            }
        }
    });

    let stream = stream.take_until(state.shutdown.clone().cancelled_owned());
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::start_server;
    use crate::audio::testing::FakeSource;
    use crate::events::BroadcastEventBridge;
    use crate::runtime::TokioSpawner;
    use crate::services::{BroadcastCoordinator, CommandService, PlaybackScheduler};
    use crate::state::{BroadcastTimeouts, Config};
    use crate::store::ChatStore;
    use crate::transport::EndpointHub;
    use serde_json::Value;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    pub(crate) struct Server {
        pub addr: std::net::SocketAddr,
        pub base: String,
        pub http: reqwest::Client,
        shutdown: CancellationToken,
    }

    impl Drop for Server {
        fn drop(&mut self) {
            self.shutdown.cancel();
        }
    }

    pub(crate) async fn serve(config: Config) -> Server {
        let config = Arc::new(config);
        let bridge = Arc::new(BroadcastEventBridge::new(16));
        let hub = Arc::new(EndpointHub::new(8, bridge.clone()));
        let coordinator = Arc::new(BroadcastCoordinator::new(
            hub.clone(),
            bridge.clone(),
            BroadcastTimeouts::default(),
        ));
        let scheduler = Arc::new(PlaybackScheduler::new(
            coordinator,
            bridge.clone(),
            TokioSpawner::current(),
        ));
        let source = Arc::new(FakeSource::default().with_file("https://files.invalid/a.ogg", b"PCM"));
        let commands = Arc::new(CommandService::new(
            config.clone(),
            Arc::new(ChatStore::in_memory()),
            source,
            scheduler,
        ));
        let state = AppState::builder()
            .commands(commands)
            .hub(hub)
            .event_bridge(bridge)
            .config(config)
            .build()
            .unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base = format!("http://{addr}");
        let shutdown = CancellationToken::new();
        tokio::spawn(start_server(listener, state, shutdown.clone()));

        Server {
            addr,
            base,
            http: reqwest::Client::new(),
            shutdown,
        }
    }

    impl Server {
        pub async fn post(&self, path: &str, body: Option<Value>) -> (u16, Value) {
            let mut request = self.http.post(format!("{}{}", self.base, path));
            if let Some(body) = body {
                request = request.json(&body);
            }
            let response = request.send().await.unwrap();
            (response.status().as_u16(), response.json().await.unwrap())
        }
    }

    #[tokio::test]
    async fn health_reports_endpoint_count() {
        let server = serve(Config::default()).await;

        let body: Value = server
            .http
            .get(format!("{}/health", server.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], SERVICE_ID);
        assert_eq!(body["endpoints"], 0);
    }

    #[tokio::test]
    async fn play_flow_over_http() {
        let server = serve(Config::default()).await;

        let (status, body) = server.post("/api/chats/7/play", None).await;
        assert_eq!(status, 404);
        assert_eq!(body["error"], "no_token");

        let (status, body) = server.post("/api/chats/7/token", None).await;
        assert_eq!(status, 200);
        let token = body["token"].as_str().unwrap().to_string();
        assert_eq!(body["message"], format!("Token for this chat: {token}"));

        let (status, body) = server.post("/api/chats/7/play", None).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"], "no_audio");

        let (status, body) = server
            .post(
                "/api/chats/7/play",
                Some(json!({ "audio": { "url": "https://files.invalid/a.ogg", "fileSize": 3 } })),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["message"], "No clients are connected.");
        assert!(body["eventId"].is_string());
    }

    #[tokio::test]
    async fn jingle_routes() {
        let server = serve(Config::default()).await;
        let url = format!("{}/api/chats/7/jingle", server.base);

        let saved: Value = server
            .http
            .put(&url)
            .json(&json!({ "audio": { "url": "https://files.invalid/a.ogg" } }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(saved["message"], "Jingle saved.");

        let deleted: Value = server
            .http
            .delete(&url)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(deleted["message"], "Jingle deleted.");
    }

    #[tokio::test]
    async fn disallowed_chat_is_forbidden() {
        let server = serve(Config {
            allowed_chats: Some(vec![1]),
            ..Config::default()
        })
        .await;

        let (status, body) = server.post("/api/chats/2/token", None).await;

        assert_eq!(status, 403);
        assert_eq!(body["error"], "chat_not_allowed");
    }

    #[tokio::test]
    async fn cancel_rejects_malformed_event_id() {
        let server = serve(Config::default()).await;
        server.post("/api/chats/7/token", None).await;

        let response = server
            .http
            .delete(format!("{}/api/chats/7/requests/not-a-uuid", server.base))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 400);
    }
}
