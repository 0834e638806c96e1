//! Integration tests for the local view server WebSocket
//!
//! A browser page is played by a tokio-tungstenite client: it receives view
//! updates and acts as the two video players the server keeps in sync.

use anyhow::{Context, Result};
use async_trait::async_trait;
use common::{
    BackendResult, BackendStatus, DetectionBackend, FramePayload, FrameRecord, VideoAnalysis,
    VideoUpload,
};
use crowd_client::server::{self, ViewServerState};
use crowd_client::{Config, FrameEvent, SessionController};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct OfflineBackend;

#[async_trait]
impl DetectionBackend for OfflineBackend {
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
            message: "offline".to_string(),
        })
    }
}

async fn start_server(events: Vec<FrameEvent>) -> Result<(SocketAddr, CancellationToken)> {
    let (mut session, handle) = SessionController::new(Config::default(), Arc::new(OfflineBackend));
    for event in events {
        session.dispatch(event);
    }
    tokio::spawn(session.run());

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let cancel = CancellationToken::new();
    let mut state = ViewServerState::new(handle, 0.1);
    state.sync_settle = Duration::from_millis(100);
    tokio::spawn(server::serve(listener, state, cancel.clone()));
    Ok((addr, cancel))
}

async fn send(socket: &mut Socket, message: Value) -> Result<()> {
    socket.send(Message::Text(message.to_string())).await?;
    Ok(())
}

/// Next message of the given `type`, skipping others
async fn next_of(socket: &mut Socket, kind: &str) -> Result<Value> {
    let deadline = Duration::from_secs(3);
    loop {
        let message = timeout(deadline, socket.next())
            .await
            .context("timed out waiting for message")?
            .context("socket closed")??;
        if let Message::Text(text) = message {
            let value: Value = serde_json::from_str(&text)?;
            if value["type"] == kind {
                return Ok(value);
            }
        }
    }
}

#[tokio::test]
async fn test_view_pushed_on_connect() -> Result<()> {
    let (addr, cancel) = start_server(vec![FrameEvent::default()
        .with_progress(42.5)
        .with_people_count(7)])
    .await?;
    let (mut socket, _) = connect_async(format!("ws://{}/ws", addr)).await?;

    let view = next_of(&mut socket, "view").await?;
    assert_eq!(view["data"]["progress_label"], "42.50");
    assert_eq!(view["data"]["live"]["people_count"], 7);

    send(&mut socket, json!({"type": "ping"})).await?;
    next_of(&mut socket, "pong").await?;

    cancel.cancel();
    Ok(())
}

#[tokio::test]
async fn test_source_seek_is_mirrored_once() -> Result<()> {
    let (addr, cancel) = start_server(Vec::new()).await?;
    let (mut socket, _) = connect_async(format!("ws://{}/ws", addr)).await?;

    send(
        &mut socket,
        json!({
            "type": "players_mounted",
            "source": {"position": 0.0, "paused": true},
            "heatmap": {"position": 0.0, "paused": true}
        }),
    )
    .await?;

    // user seeks the source player to 10.0
    send(
        &mut socket,
        json!({
            "type": "player",
            "side": "source",
            "kind": "seeked",
            "snapshot": {"position": 10.0, "paused": true}
        }),
    )
    .await?;

    let command = next_of(&mut socket, "player_command").await?;
    assert_eq!(command["side"], "heatmap");
    assert_eq!(command["command"], json!({"action": "seek", "position": 10.0}));

    // the heatmap element reports its own seek; it must not bounce back
    send(
        &mut socket,
        json!({
            "type": "player",
            "side": "heatmap",
            "kind": "seeked",
            "snapshot": {"position": 10.0, "paused": true}
        }),
    )
    .await?;

    let echo = timeout(Duration::from_millis(400), next_of(&mut socket, "player_command")).await;
    assert!(echo.is_err(), "no command should be sent back to the source");

    cancel.cancel();
    Ok(())
}

#[tokio::test]
async fn test_player_event_before_mount_is_rejected() -> Result<()> {
    let (addr, cancel) = start_server(Vec::new()).await?;
    let (mut socket, _) = connect_async(format!("ws://{}/ws", addr)).await?;

    send(
        &mut socket,
        json!({"type": "player", "side": "source", "kind": "play"}),
    )
    .await?;
    let error = next_of(&mut socket, "error").await?;
    assert_eq!(error["message"], "players not mounted");

    send(&mut socket, json!({"type": "bogus"})).await?;
    let error = next_of(&mut socket, "error").await?;
    assert!(error["message"]
        .as_str()
        .is_some_and(|m| m.starts_with("invalid message")));

    cancel.cancel();
    Ok(())
}
