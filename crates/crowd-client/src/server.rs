//! Local view server.
//!
//! Serves the session's view snapshots and replay frames over HTTP, and a
//! WebSocket where a browser page pushes view updates out and reports its two
//! video players' events back in. Each WebSocket connection gets its own
//! [`SyncDriver`] whose players are mirrors of the page's elements.

use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::browser::FrameBrowser;
use crate::error::ClientError;
use crate::notice::Notice;
use crate::replay::{PresentationMode, ReplayView};
use crate::session::{SessionHandle, ViewUpdate};
use crate::sync::{
    PlaybackSnapshot, Player, PlayerEvent, PlayerSide, SyncDriver, SyncPair,
};

/// How long mirrored echoes from the page are swallowed after a propagation
pub const DEFAULT_SYNC_SETTLE: Duration = Duration::from_millis(250);

type ApiError = (StatusCode, Json<Value>);

#[derive(Clone)]
pub struct ViewServerState {
    pub session: SessionHandle,
    pub sync_tolerance: f64,
    pub sync_settle: Duration,
    /// Directory holding the browser page, served for unmatched paths
    pub static_dir: Option<PathBuf>,
}

impl ViewServerState {
    pub fn new(session: SessionHandle, sync_tolerance: f64) -> Self {
        Self {
            session,
            sync_tolerance,
            sync_settle: DEFAULT_SYNC_SETTLE,
            static_dir: None,
        }
    }

    pub fn with_static_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.static_dir = Some(dir.into());
        self
    }
}

pub fn router(state: ViewServerState) -> Router {
    let static_dir = state.static_dir.clone();
    let api = Router::new()
        .route("/healthz", get(health_check))
        .route("/api/view", get(get_view))
        .route("/api/replay/:index", get(get_replay))
        .route("/api/replay/:index/image", get(get_replay_image))
        .route("/api/frames", get(list_frames))
        .route("/api/notices", get(list_notices))
        .route("/api/notices/:id/dismiss", post(dismiss_notice))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    match static_dir {
        Some(dir) => {
            let frontend = ServeDir::new(dir).append_index_html_on_directories(true);
            api.fallback_service(frontend)
        }
        None => api,
    }
}

/// Serve until `cancel` fires
pub async fn serve(
    listener: TcpListener,
    state: ViewServerState,
    cancel: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr()?;
    info!("View server listening on http://{}", addr);
    info!("WebSocket available at ws://{}/ws", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

fn session_error(e: ClientError) -> ApiError {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": e.to_string() })),
    )
}

async fn health_check() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "crowd-client"
        })),
    )
}

async fn get_view(State(state): State<ViewServerState>) -> Json<ViewUpdate> {
    Json(state.session.snapshot())
}

#[derive(Debug, Default, Deserialize)]
struct ReplayQuery {
    #[serde(default)]
    mode: PresentationMode,
}

async fn get_replay(
    State(state): State<ViewServerState>,
    Path(index): Path<usize>,
    Query(query): Query<ReplayQuery>,
) -> Result<Json<ReplayView>, ApiError> {
    let view = state
        .session
        .scrub(index, query.mode)
        .await
        .map_err(session_error)?;
    Ok(Json(view))
}

async fn get_replay_image(
    State(state): State<ViewServerState>,
    Path(index): Path<usize>,
    Query(query): Query<ReplayQuery>,
) -> Result<Response, ApiError> {
    let view = state
        .session
        .scrub(index, query.mode)
        .await
        .map_err(session_error)?;

    let Some(payload) = view.image() else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "No image for this frame" })),
        ));
    };

    let (content_type, bytes) = decode_image(payload).map_err(|e| {
        warn!(index, error = %e, "replay image is not valid base64");
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": "Frame image could not be decoded" })),
        )
    })?;

    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

/// Split an optional `data:<mime>;base64,` prefix off and decode the rest
fn decode_image(payload: &str) -> Result<(String, Vec<u8>), base64::DecodeError> {
    let (content_type, data) = match payload.strip_prefix("data:") {
        Some(rest) => match rest.split_once(',') {
            Some((meta, data)) => {
                let mime = meta.split(';').next().unwrap_or_default();
                let mime = if mime.is_empty() { "image/jpeg" } else { mime };
                (mime.to_string(), data)
            }
            None => ("image/jpeg".to_string(), rest),
        },
        None => ("image/jpeg".to_string(), payload),
    };
    let bytes = STANDARD.decode(data.trim())?;
    Ok((content_type, bytes))
}

/// Backend frame listing with the browser's highlights
async fn list_frames(State(state): State<ViewServerState>) -> Result<Json<Value>, ApiError> {
    let records = match state.session.load_frames().await {
        Ok(records) => records,
        Err(e @ ClientError::Upstream(_)) => {
            return Err((
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": e.to_string() })),
            ))
        }
        Err(e) => return Err(session_error(e)),
    };

    let browser = FrameBrowser::from_records(records);
    Ok(Json(json!({
        "peak": browser.peak(),
        "elevated": browser.elevated(),
        "frames": browser.records(),
    })))
}

async fn list_notices(State(state): State<ViewServerState>) -> Json<Vec<Notice>> {
    Json(state.session.snapshot().notices)
}

async fn dismiss_notice(
    State(state): State<ViewServerState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let dismissed = state
        .session
        .dismiss_notice(id)
        .await
        .map_err(session_error)?;
    if dismissed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Notice not found" })),
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlayerCommand {
    Play,
    Pause,
    Seek { position: f64 },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    /// Both players have a media source; (re)start synchronisation
    PlayersMounted {
        source: PlaybackSnapshot,
        heatmap: PlaybackSnapshot,
    },
    Player(PlayerEvent),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Pong,
    View { data: Box<ViewUpdate> },
    PlayerCommand { side: PlayerSide, command: PlayerCommand },
    Error { message: String },
}

/// Mirror of a player living in the browser page
pub struct RemotePlayer {
    side: PlayerSide,
    position: f64,
    paused: bool,
    outbound: mpsc::UnboundedSender<ServerMessage>,
}

impl RemotePlayer {
    pub fn new(
        side: PlayerSide,
        snapshot: PlaybackSnapshot,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        Self {
            side,
            position: snapshot.position,
            paused: snapshot.paused,
            outbound,
        }
    }

    fn send(&self, command: PlayerCommand) {
        let _ = self.outbound.send(ServerMessage::PlayerCommand {
            side: self.side,
            command,
        });
    }
}

impl Player for RemotePlayer {
    fn current_time(&self) -> f64 {
        self.position
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn play(&mut self) {
        self.paused = false;
        self.send(PlayerCommand::Play);
    }

    fn pause(&mut self) {
        self.paused = true;
        self.send(PlayerCommand::Pause);
    }

    fn seek(&mut self, position: f64) {
        self.position = position;
        self.send(PlayerCommand::Seek { position });
    }

    fn observe(&mut self, snapshot: PlaybackSnapshot) {
        self.position = snapshot.position;
        self.paused = snapshot.paused;
    }
}

struct ActiveSync {
    events: mpsc::UnboundedSender<PlayerEvent>,
    cancel: CancellationToken,
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ViewServerState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: ViewServerState) {
    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let mut views = state.session.subscribe();
    views.mark_changed();

    let send_task = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                changed = views.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let view = views.borrow_and_update().clone();
                    ServerMessage::View { data: Box::new(view) }
                }
                outbound = out_rx.recv() => match outbound {
                    Some(message) => message,
                    None => break,
                },
            };

            match serde_json::to_string(&message) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "failed to encode view server message"),
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        let mut sync: Option<ActiveSync> = None;

        while let Some(Ok(msg)) = receiver.next().await {
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => {
                    info!("View client disconnected");
                    break;
                }
                _ => continue,
            };

            let client_msg = match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => client_msg,
                Err(e) => {
                    debug!(error = %e, "unrecognised view client message");
                    let _ = out_tx.send(ServerMessage::Error {
                        message: format!("invalid message: {}", e),
                    });
                    continue;
                }
            };

            match client_msg {
                ClientMessage::Ping => {
                    let _ = out_tx.send(ServerMessage::Pong);
                }
                ClientMessage::PlayersMounted { source, heatmap } => {
                    if let Some(previous) = sync.take() {
                        previous.cancel.cancel();
                    }
                    let pair = SyncPair::new(
                        RemotePlayer::new(PlayerSide::Source, source, out_tx.clone()),
                        RemotePlayer::new(PlayerSide::Heatmap, heatmap, out_tx.clone()),
                        state.sync_tolerance,
                    );
                    let (events, rx) = mpsc::unbounded_channel();
                    let cancel = CancellationToken::new();
                    let driver = SyncDriver::new(pair, rx).with_settle(state.sync_settle);
                    tokio::spawn(driver.run(cancel.clone()));
                    info!("Player synchronisation started");
                    sync = Some(ActiveSync { events, cancel });
                }
                ClientMessage::Player(event) => match &sync {
                    Some(active) => {
                        let _ = active.events.send(event);
                    }
                    None => {
                        let _ = out_tx.send(ServerMessage::Error {
                            message: "players not mounted".to_string(),
                        });
                    }
                },
            }
        }

        if let Some(active) = sync {
            active.cancel.cancel();
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::event::FrameEvent;
    use crate::session::SessionController;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use common::{
        BackendResult, BackendStatus, DetectionBackend, FramePayload, FrameRecord, VideoAnalysis,
        VideoUpload,
    };
    use std::sync::Arc;
    use tower::ServiceExt;

    struct IdleBackend;

    #[async_trait]
    impl DetectionBackend for IdleBackend {
        async fn analyze_video(&self, _upload: VideoUpload) -> BackendResult<VideoAnalysis> {
            Ok(VideoAnalysis {
                total_people_detected: 0,
                average_people_per_frame: 0.0,
                frame_wise_count: Vec::new(),
                processing_time_seconds: 0.0,
                avg_quadrant_counts: None,
                quadrant_alerts: None,
                heatmap_video_url: None,
            })
        }

        async fn analyze_frame(&self, _jpeg: Vec<u8>) -> BackendResult<FramePayload> {
            Ok(FramePayload::default())
        }

        async fn list_frames(&self) -> BackendResult<Vec<FrameRecord>> {
            Ok(Vec::new())
        }

        async fn status(&self) -> BackendResult<BackendStatus> {
            Ok(BackendStatus {
                message: "ok".to_string(),
            })
        }
    }

    fn app_with(events: Vec<FrameEvent>) -> Router {
        let (mut session, handle) = SessionController::new(Config::default(), Arc::new(IdleBackend));
        for event in events {
            session.dispatch(event);
        }
        tokio::spawn(session.run());
        router(ViewServerState::new(handle, 0.1))
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
        let resp = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("body");
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_view_reflects_dispatched_events() {
        let app = app_with(vec![
            FrameEvent::default().with_progress(10.0).with_quadrant("q1", 3),
            FrameEvent::default().with_progress(55.0).with_quadrant("q1", 9),
        ]);

        let (status, body) = get_json(&app, "/api/view").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["progress_label"], "55.00");
        assert_eq!(body["quadrant_averages"]["q1"], 6.0);
        assert_eq!(body["alert_zones"], json!(["q1"]));
        assert_eq!(body["replay_len"], 2);
    }

    #[tokio::test]
    async fn test_replay_modes() {
        let app = app_with(vec![FrameEvent::default()
            .with_frame_image("aGVsbG8=")
            .with_frame_number(4)]);

        let (status, body) = get_json(&app, "/api/replay/0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "frame");
        assert_eq!(body["image"], "aGVsbG8=");

        let (_, body) = get_json(&app, "/api/replay/7?mode=heatmap").await;
        assert_eq!(body["state"], "empty");
        assert_eq!(body["index"], 0);
        assert_eq!(body["frame_number"], 4);
    }

    #[tokio::test]
    async fn test_replay_image_is_decoded() {
        let app = app_with(vec![FrameEvent::default()
            .with_frame_image("data:image/png;base64,aGVsbG8=")]);

        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/replay/0/image")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some("image/png")
        );
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("body");
        assert_eq!(&bytes[..], b"hello");

        let (status, _) = get_json(&app, "/api/replay/0/image?mode=heatmap").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_frames_listing() {
        let app = app_with(Vec::new());
        let (status, body) = get_json(&app, "/api/frames").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["frames"], json!([]));
        assert_eq!(body["peak"], Value::Null);
    }

    #[tokio::test]
    async fn test_empty_replay_is_no_data() {
        let app = app_with(Vec::new());
        let (status, body) = get_json(&app, "/api/replay/0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "no_data");
    }

    #[tokio::test]
    async fn test_dismiss_unknown_notice() {
        let app = app_with(Vec::new());
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/notices/{}/dismiss", Uuid::new_v4()))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let (status, body) = get_json(&app, "/api/notices").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[test]
    fn test_decode_image_plain_base64() {
        let (content_type, bytes) = decode_image("aGVsbG8=").expect("decode");
        assert_eq!(content_type, "image/jpeg");
        assert_eq!(bytes, b"hello");
        assert!(decode_image("not base64!").is_err());
    }

    #[test]
    fn test_remote_player_sends_commands() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut player = RemotePlayer::new(
            PlayerSide::Heatmap,
            PlaybackSnapshot {
                position: 0.0,
                paused: true,
            },
            tx,
        );

        player.seek(12.5);
        player.play();
        assert_eq!(player.current_time(), 12.5);
        assert!(!player.is_paused());

        let sent: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|m| serde_json::to_string(&m).expect("encode"))
            .collect();
        assert_eq!(
            sent,
            vec![
                r#"{"type":"player_command","side":"heatmap","command":{"action":"seek","position":12.5}}"#,
                r#"{"type":"player_command","side":"heatmap","command":{"action":"play"}}"#,
            ]
        );
    }
}
