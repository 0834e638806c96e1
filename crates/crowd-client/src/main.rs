//! Command-line front end for the crowd detection client.
//!
//! Usage:
//!   crowd-client upload <path>        - Submit a video and follow its analysis
//!   crowd-client camera               - Analyse live camera frames
//!   crowd-client frames               - Browse frames the backend already analysed
//!   crowd-client serve                - Run the local view server

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::{DetectionBackend, HttpDetectionBackend, VideoUpload};
use crowd_client::browser::FrameBrowser;
use crowd_client::camera::{FfmpegCamera, FrameSource};
use crowd_client::server::{self, ViewServerState};
use crowd_client::{Config, SessionController, SessionHandle, ViewUpdate};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "crowd-client")]
#[command(about = "Client for the crowd density detection backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Detection backend base URL
    #[arg(long, global = true, env = "CROWDWATCH_BACKEND_URL")]
    backend_url: Option<String>,

    /// Push channel URL
    #[arg(long, global = true, env = "CROWDWATCH_WS_URL")]
    ws_url: Option<String>,

    /// Average quadrant occupancy above which a quadrant is dangerous
    #[arg(long, global = true)]
    danger_threshold: Option<f64>,

    /// Whole-frame people count that triggers an overcrowding notice
    #[arg(long, global = true)]
    max_capacity: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a video and follow its analysis until it completes
    Upload {
        /// Video file to analyse
        path: PathBuf,
    },

    /// Capture camera frames at a fixed cadence and analyse each one
    Camera {
        /// Device path or ffmpeg input URI
        #[arg(long)]
        device: Option<String>,

        /// Capture interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Stop after this many seconds (default: until interrupted)
        #[arg(long)]
        duration_secs: Option<u64>,
    },

    /// List the frames the backend has already analysed
    Frames {
        /// Only show frames rated high or critical
        #[arg(long)]
        elevated: bool,
    },

    /// Serve view updates and replay frames to a browser page
    Serve {
        /// Listen address
        #[arg(long)]
        bind: Option<String>,

        /// Directory with the browser page to serve
        #[arg(long)]
        static_dir: Option<PathBuf>,

        /// Submit this video once the server is up
        #[arg(long)]
        upload: Option<PathBuf>,

        /// Start in live-camera mode
        #[arg(long, conflicts_with = "upload")]
        camera: bool,
    },
}

impl Cli {
    fn apply(&self, mut config: Config) -> Result<Config> {
        if let Some(url) = &self.backend_url {
            config.backend_url = url.clone();
        }
        if let Some(url) = &self.ws_url {
            config.ws_url = url.clone();
        }
        if let Some(threshold) = self.danger_threshold {
            config.danger_threshold = threshold;
        }
        if let Some(capacity) = self.max_capacity {
            config.max_capacity = capacity;
        }

        match &self.command {
            Commands::Camera {
                device,
                interval_ms,
                ..
            } => {
                if let Some(device) = device {
                    config.camera.device = device.clone();
                }
                if let Some(ms) = interval_ms {
                    config.capture_interval = Duration::from_millis(*ms);
                }
            }
            Commands::Serve {
                bind, static_dir, ..
            } => {
                if let Some(bind) = bind {
                    config.bind_addr = bind.clone();
                }
                if let Some(dir) = static_dir {
                    config.static_dir = Some(dir.clone());
                }
            }
            _ => {}
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = telemetry::init_with_service("crowd-client")?;

    let config = cli.apply(Config::from_env()?)?;
    info!(
        backend = %config.backend_url,
        push_channel = %config.ws_url,
        danger_threshold = config.danger_threshold,
        "crowd-client starting"
    );

    let backend: Arc<dyn DetectionBackend> = Arc::new(HttpDetectionBackend::new(
        config.backend_url.clone(),
        config.request_timeout,
    )?);

    match cli.command {
        Commands::Upload { path } => run_upload(config, backend, &path).await,
        Commands::Camera { duration_secs, .. } => {
            run_camera(config, backend, duration_secs.map(Duration::from_secs)).await
        }
        Commands::Frames { elevated } => run_frames(backend.as_ref(), elevated).await,
        Commands::Serve { upload, camera, .. } => {
            run_server(config, backend, upload.as_deref(), camera).await
        }
    }
}

async fn run_upload(config: Config, backend: Arc<dyn DetectionBackend>, path: &Path) -> Result<()> {
    let upload = read_video(path).await?;

    let (mut session, handle) = SessionController::new(config, backend);
    session.connect_push_channel();
    let task = tokio::spawn(session.run());

    handle.start_upload(upload).await?;
    follow(&handle, None, |view| view.run_id > 0 && !view.loading).await;

    finish(handle, task).await
}

async fn run_camera(
    config: Config,
    backend: Arc<dyn DetectionBackend>,
    duration: Option<Duration>,
) -> Result<()> {
    let settings = config.camera.clone();
    let (session, handle) = SessionController::new(config, backend);
    let task = tokio::spawn(session.run());

    let acquired = FfmpegCamera::open(settings)
        .await
        .map(|camera| Arc::new(camera) as Arc<dyn FrameSource>);
    let entered = acquired.is_ok();
    handle.enter_camera(acquired).await?;

    if entered {
        follow(&handle, duration, |_| false).await;
        handle.exit_camera().await?;
    } else {
        // let the notice render before shutting down
        follow(&handle, None, |view| !view.notices.is_empty()).await;
    }

    finish(handle, task).await
}

async fn run_frames(backend: &dyn DetectionBackend, elevated_only: bool) -> Result<()> {
    let mut browser = FrameBrowser::load(backend)
        .await
        .context("Failed to load the frame listing")?;

    if browser.is_empty() {
        info!("No analysed frames available");
        return Ok(());
    }

    let indices: Vec<usize> = if elevated_only {
        browser.elevated()
    } else {
        (0..browser.len()).collect()
    };

    for index in indices {
        if let Some(record) = browser.select(index) {
            info!(
                index,
                image = %record.image_url,
                people = record.total_people,
                risk = ?record.risk_level,
                timestamp = record.timestamp.as_deref().unwrap_or("-"),
                quadrants = ?record.quadrant_counts,
                "frame"
            );
        }
    }

    if let Some(peak) = browser.peak() {
        if let Some(record) = browser.select(peak) {
            info!(index = peak, people = record.total_people, "most crowded frame");
        }
    }
    Ok(())
}

async fn run_server(
    config: Config,
    backend: Arc<dyn DetectionBackend>,
    upload: Option<&Path>,
    camera: bool,
) -> Result<()> {
    match backend.status().await {
        Ok(status) => info!(message = %status.message, "detection backend reachable"),
        Err(e) => warn!(error = %e, "detection backend not reachable"),
    }

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind view server to {}", config.bind_addr))?;
    let static_dir = config.static_dir.clone();
    let sync_tolerance = config.sync_tolerance;
    let settings = config.camera.clone();

    let (mut session, handle) = SessionController::new(config, backend);
    session.connect_push_channel();
    let task = tokio::spawn(session.run());

    let mut view_state = ViewServerState::new(handle.clone(), sync_tolerance);
    if let Some(dir) = static_dir {
        info!(dir = %dir.display(), "serving browser page");
        view_state = view_state.with_static_dir(dir);
    }

    let cancel = CancellationToken::new();
    let server_task = tokio::spawn(server::serve(listener, view_state, cancel.clone()));

    if let Some(path) = upload {
        handle.start_upload(read_video(path).await?).await?;
    } else if camera {
        let acquired = FfmpegCamera::open(settings)
            .await
            .map(|camera| Arc::new(camera) as Arc<dyn FrameSource>);
        handle.enter_camera(acquired).await?;
    }

    follow(&handle, None, |_| false).await;

    cancel.cancel();
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "view server failed"),
        Err(e) => error!(error = %e, "view server task panicked"),
    }
    finish(handle, task).await
}

async fn read_video(path: &Path) -> Result<VideoUpload> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read video file {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());

    Ok(VideoUpload {
        content_type: video_content_type(path).to_string(),
        file_name,
        bytes,
    })
}

fn video_content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("avi") => "video/x-msvideo",
        Some("mkv") => "video/x-matroska",
        _ => "application/octet-stream",
    }
}

/// Log view updates until `done` holds, the deadline passes or ctrl-c
async fn follow(handle: &SessionHandle, deadline: Option<Duration>, done: impl Fn(&ViewUpdate) -> bool) {
    let mut views = handle.subscribe();
    let mut renderer = Renderer::default();
    let sleep = tokio::time::sleep(deadline.unwrap_or(Duration::MAX));
    tokio::pin!(sleep);

    loop {
        {
            let view = views.borrow_and_update();
            renderer.render(&view);
            if done(&view) {
                return;
            }
        }

        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = &mut sleep, if deadline.is_some() => {
                info!("capture duration reached");
                return;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                return;
            }
        }
    }
}

async fn finish(
    handle: SessionHandle,
    task: tokio::task::JoinHandle<crowd_client::session::TeardownReport>,
) -> Result<()> {
    handle.shutdown().await?;
    let report = task.await.context("session task failed")?;
    if let Some(e) = &report.push_channel {
        warn!(error = %e, "push channel teardown");
    }
    if let Some(e) = &report.camera {
        warn!(error = %e, "camera teardown");
    }
    Ok(())
}

/// Presentation boundary: turns view snapshots into log lines
#[derive(Default)]
struct Renderer {
    last_replay_len: usize,
    last_channel: Option<crowd_client::push_channel::ChannelStatus>,
    seen_notices: HashSet<Uuid>,
    summary_shown: bool,
}

impl Renderer {
    fn render(&mut self, view: &ViewUpdate) {
        if self.last_channel != Some(view.channel) {
            info!(status = ?view.channel, "push channel");
            self.last_channel = Some(view.channel);
        }

        if view.replay_len != self.last_replay_len {
            if view.replay_len > 0 {
                let zones: Vec<&str> = view.alert_zones.iter().map(|q| q.as_str()).collect();
                info!(
                    progress = %view.progress_label,
                    people = view.live.people_count,
                    frame = ?view.live.frame_number,
                    alert_zones = ?zones,
                    replay = view.replay_len,
                    "frame"
                );
            }
            self.last_replay_len = view.replay_len;
        }

        for notice in &view.notices {
            if self.seen_notices.insert(notice.id) {
                warn!(source = ?notice.source, severity = ?notice.severity, "{}", notice.message);
            }
        }

        match &view.analysis {
            Some(analysis) if !self.summary_shown => {
                info!(
                    total_people = analysis.total_people_detected,
                    average_per_frame = analysis.average_people_per_frame,
                    frames = analysis.frame_wise_count.len(),
                    processing_secs = analysis.processing_time_seconds,
                    alerted = ?analysis.alerted_quadrants(),
                    "analysis summary"
                );
                for (id, average) in &view.quadrant_averages {
                    info!(quadrant = %id, average = %format!("{:.2}", average), "quadrant average");
                }
                self.summary_shown = true;
            }
            None => self.summary_shown = false,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "crowd-client",
            "camera",
            "--device",
            "/dev/video3",
            "--interval-ms",
            "500",
            "--danger-threshold",
            "8",
        ]);
        let config = cli.apply(Config::default()).expect("config");
        assert_eq!(config.camera.device, "/dev/video3");
        assert_eq!(config.capture_interval, Duration::from_millis(500));
        assert_eq!(config.danger_threshold, 8.0);
    }

    #[test]
    fn test_cli_rejects_invalid_override() {
        let cli = Cli::parse_from(["crowd-client", "camera", "--interval-ms", "0"]);
        assert!(cli.apply(Config::default()).is_err());
    }

    #[test]
    fn test_video_content_type() {
        assert_eq!(video_content_type(Path::new("crowd.MP4")), "video/mp4");
        assert_eq!(video_content_type(Path::new("clip.webm")), "video/webm");
        assert_eq!(video_content_type(Path::new("noext")), "application/octet-stream");
    }
}
