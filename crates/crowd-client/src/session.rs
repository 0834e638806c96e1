//! Session controller.
//!
//! Owns the live state, the running aggregates and the replay buffer, and is
//! the only place that writes them. Producers (push channel, capture loop,
//! upload requests) hand their results to the controller over a channel; the
//! controller applies them one at a time and publishes a complete
//! [`ViewUpdate`] after each change.

use common::{BackendError, DetectionBackend, FrameRecord, QuadrantId, VideoAnalysis, VideoUpload};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::aggregate::{alert_zones, AggregateState};
use crate::camera::{CameraError, FrameSource};
use crate::config::Config;
use crate::decoder;
use crate::error::{ClientError, ClientResult};
use crate::event::FrameEvent;
use crate::live_state::{self, LiveState, OvercrowdingStatus};
use crate::notice::{Notice, NoticeBoard, NoticeSeverity, NoticeSource};
use crate::push_channel::{self, ChannelStatus};
use crate::replay::{PresentationMode, ReplayBuffer, ReplayView, Scrubber};

const INGEST_QUEUE: usize = 256;
const COMMAND_QUEUE: usize = 32;
const PUSH_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    #[default]
    Idle,
    Upload,
    Camera,
}

/// Results delivered to the controller by its producers
#[derive(Debug)]
pub enum Ingest {
    Push(FrameEvent),
    Channel(ChannelStatus),
    /// The push channel failed to connect or dropped
    ChannelFailed(ClientError),
    Captured(FrameEvent),
    CaptureFailed(ClientError),
    UploadFinished {
        run_id: u64,
        result: Result<VideoAnalysis, BackendError>,
    },
    FramesLoaded {
        result: Result<Vec<FrameRecord>, BackendError>,
        reply: oneshot::Sender<ClientResult<Vec<FrameRecord>>>,
    },
}

/// Requests from the user side
pub enum SessionCommand {
    StartUpload(VideoUpload),
    EnterCamera(Result<Arc<dyn FrameSource>, CameraError>),
    ExitCamera,
    Scrub {
        index: usize,
        mode: PresentationMode,
        reply: oneshot::Sender<ReplayView>,
    },
    DismissNotice {
        id: Uuid,
        reply: oneshot::Sender<bool>,
    },
    LoadFrames {
        reply: oneshot::Sender<ClientResult<Vec<FrameRecord>>>,
    },
    Shutdown,
}

/// Everything the presentation layer needs, published atomically
#[derive(Debug, Clone, Serialize)]
pub struct ViewUpdate {
    pub run_id: u64,
    pub mode: SessionMode,
    pub channel: ChannelStatus,
    pub loading: bool,
    pub live: LiveState,
    pub progress_label: String,
    pub quadrant_averages: BTreeMap<QuadrantId, f64>,
    pub client_danger_zones: BTreeSet<QuadrantId>,
    pub alert_zones: BTreeSet<QuadrantId>,
    pub overcrowding: OvercrowdingStatus,
    pub replay_len: usize,
    pub analysis: Option<VideoAnalysis>,
    pub notices: Vec<Notice>,
}

/// Errors from releasing each session resource; the capture loop cannot fail
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub push_channel: Option<String>,
    pub camera: Option<String>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.push_channel.is_none() && self.camera.is_none()
    }
}

/// Cloneable front door to a running [`SessionController`]
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    view: watch::Receiver<ViewUpdate>,
}

impl SessionHandle {
    pub fn subscribe(&self) -> watch::Receiver<ViewUpdate> {
        self.view.clone()
    }

    pub fn snapshot(&self) -> ViewUpdate {
        self.view.borrow().clone()
    }

    async fn send(&self, command: SessionCommand) -> ClientResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::SessionClosed)
    }

    pub async fn start_upload(&self, upload: VideoUpload) -> ClientResult<()> {
        self.send(SessionCommand::StartUpload(upload)).await
    }

    /// Hand over the outcome of acquiring a camera
    pub async fn enter_camera(
        &self,
        acquired: Result<Arc<dyn FrameSource>, CameraError>,
    ) -> ClientResult<()> {
        self.send(SessionCommand::EnterCamera(acquired)).await
    }

    pub async fn exit_camera(&self) -> ClientResult<()> {
        self.send(SessionCommand::ExitCamera).await
    }

    pub async fn scrub(&self, index: usize, mode: PresentationMode) -> ClientResult<ReplayView> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Scrub { index, mode, reply }).await?;
        rx.await.map_err(|_| ClientError::SessionClosed)
    }

    pub async fn dismiss_notice(&self, id: Uuid) -> ClientResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::DismissNotice { id, reply }).await?;
        rx.await.map_err(|_| ClientError::SessionClosed)
    }

    /// Fetch the backend's frame listing; failures also raise a notice
    pub async fn load_frames(&self) -> ClientResult<Vec<FrameRecord>> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::LoadFrames { reply }).await?;
        rx.await.map_err(|_| ClientError::SessionClosed)?
    }

    pub async fn shutdown(&self) -> ClientResult<()> {
        self.send(SessionCommand::Shutdown).await
    }
}

pub struct SessionController {
    config: Config,
    backend: Arc<dyn DetectionBackend>,

    live: LiveState,
    aggregate: AggregateState,
    replay: ReplayBuffer,
    scrubber: Scrubber,
    notices: NoticeBoard,
    analysis: Option<VideoAnalysis>,
    loading: bool,
    overcrowded: bool,
    mode: SessionMode,
    channel: ChannelStatus,
    run_id: u64,

    ingest_tx: mpsc::Sender<Ingest>,
    ingest_rx: mpsc::Receiver<Ingest>,
    commands: mpsc::Receiver<SessionCommand>,
    view_tx: watch::Sender<ViewUpdate>,

    cancel: CancellationToken,
    push_cancel: CancellationToken,
    push_task: Option<JoinHandle<()>>,
    camera: Option<Arc<dyn FrameSource>>,
    capture_cancel: CancellationToken,
    capture: Option<Interval>,
}

impl SessionController {
    pub fn new(config: Config, backend: Arc<dyn DetectionBackend>) -> (Self, SessionHandle) {
        let (ingest_tx, ingest_rx) = mpsc::channel(INGEST_QUEUE);
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let replay = match config.replay_capacity {
            Some(capacity) => ReplayBuffer::with_capacity_limit(capacity),
            None => ReplayBuffer::new(),
        };
        let cancel = CancellationToken::new();
        let (view_tx, view_rx) = watch::channel(initial_view(config.max_capacity));

        let controller = Self {
            live: LiveState::default(),
            aggregate: AggregateState::new(),
            replay,
            scrubber: Scrubber::new(),
            notices: NoticeBoard::new(),
            analysis: None,
            loading: false,
            overcrowded: false,
            mode: SessionMode::Idle,
            channel: ChannelStatus::Disconnected,
            run_id: 0,
            ingest_tx,
            ingest_rx,
            commands,
            view_tx,
            push_cancel: cancel.child_token(),
            capture_cancel: cancel.child_token(),
            cancel,
            push_task: None,
            camera: None,
            capture: None,
            config,
            backend,
        };

        let handle = SessionHandle {
            commands: command_tx,
            view: view_rx,
        };
        (controller, handle)
    }

    pub fn live(&self) -> &LiveState {
        &self.live
    }

    pub fn aggregate(&self) -> &AggregateState {
        &self.aggregate
    }

    pub fn replay(&self) -> &ReplayBuffer {
        &self.replay
    }

    pub fn notices(&self) -> &NoticeBoard {
        &self.notices
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn analysis(&self) -> Option<&VideoAnalysis> {
        self.analysis.as_ref()
    }

    pub fn channel_status(&self) -> ChannelStatus {
        self.channel
    }

    /// Quadrants whose running average exceeds the configured threshold
    pub fn danger_zones(&self) -> BTreeSet<QuadrantId> {
        self.aggregate.danger_zones(self.config.danger_threshold)
    }

    /// Server-flagged zones of the latest frame plus client-derived zones
    pub fn alert_zones(&self) -> BTreeSet<QuadrantId> {
        alert_zones(&self.live.danger_zones, &self.danger_zones())
    }

    /// Build the current view snapshot
    pub fn view(&self) -> ViewUpdate {
        let client_danger_zones = self.danger_zones();
        ViewUpdate {
            run_id: self.run_id,
            mode: self.mode,
            channel: self.channel,
            loading: self.loading,
            progress_label: self.live.progress_label(),
            quadrant_averages: self.aggregate.averages(),
            alert_zones: alert_zones(&self.live.danger_zones, &client_danger_zones),
            client_danger_zones,
            overcrowding: self.live.overcrowding(self.config.max_capacity),
            replay_len: self.replay.len(),
            analysis: self.analysis.clone(),
            notices: self.notices.active().into_iter().cloned().collect(),
            live: self.live.clone(),
        }
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.view());
    }

    /// Clear all per-run state; called before a new upload run starts
    pub fn begin_run(&mut self) {
        self.run_id += 1;
        self.live = LiveState::default();
        self.aggregate = AggregateState::new();
        self.replay.reset();
        self.scrubber.clamp(0);
        self.analysis = None;
        self.overcrowded = false;
        info!(run_id = self.run_id, "new analysis run started");
        self.publish();
    }

    /// Feed one decoded event through the reducers, then publish once
    pub fn dispatch(&mut self, event: FrameEvent) {
        self.live = live_state::apply(&self.live, &event);
        if let Some(counts) = &event.quadrant_counts {
            self.aggregate.absorb_mut(counts);
        }
        self.replay.append(event);
        self.scrubber.clamp(self.replay.len());

        self.check_overcrowding();
        self.publish();
    }

    fn check_overcrowding(&mut self) {
        let status = self.live.overcrowding(self.config.max_capacity);
        if status.alert && !self.overcrowded {
            warn!(
                people = status.current_count,
                capacity = status.max_capacity,
                "overcrowding detected"
            );
            self.notices.raise(Notice::new(
                NoticeSeverity::Warning,
                NoticeSource::Overcrowding,
                status.message,
            ));
        }
        self.overcrowded = status.alert;
    }

    /// Resolve a scrubber selection against the replay buffer
    pub fn scrub(&mut self, index: usize, mode: PresentationMode) -> ReplayView {
        self.scrubber.select(index, self.replay.len());
        self.scrubber.view(&self.replay, mode)
    }

    pub fn dismiss_notice(&mut self, id: Uuid) -> bool {
        let dismissed = self.notices.dismiss(id);
        if dismissed {
            self.publish();
        }
        dismissed
    }

    /// Start the push channel for this session (single attempt)
    pub fn connect_push_channel(&mut self) {
        if self.push_task.is_some() {
            debug!("push channel already started");
            return;
        }
        let task = tokio::spawn(push_channel::run(
            self.config.ws_url.clone(),
            self.ingest_tx.clone(),
            self.push_cancel.clone(),
        ));
        self.push_task = Some(task);
    }

    /// Reset per-run state and submit `upload` for analysis
    pub async fn start_upload(&mut self, upload: VideoUpload) {
        if self.mode == SessionMode::Camera {
            self.stop_capture();
            self.release_camera().await;
        }
        self.begin_run();
        self.mode = SessionMode::Upload;
        self.loading = true;

        info!(
            run_id = self.run_id,
            file = %upload.file_name,
            size_bytes = upload.bytes.len(),
            "submitting video for analysis"
        );

        let run_id = self.run_id;
        let backend = self.backend.clone();
        let tx = self.ingest_tx.clone();
        tokio::spawn(async move {
            let result = backend.analyze_video(upload).await;
            let _ = tx.send(Ingest::UploadFinished { run_id, result }).await;
        });

        self.publish();
    }

    fn finish_upload(&mut self, run_id: u64, result: Result<VideoAnalysis, BackendError>) {
        if run_id != self.run_id {
            debug!(run_id, current = self.run_id, "ignoring result of superseded run");
            return;
        }
        self.loading = false;

        match result {
            Ok(analysis) => {
                info!(
                    run_id,
                    total_people = analysis.total_people_detected,
                    average_per_frame = analysis.average_people_per_frame,
                    processing_secs = analysis.processing_time_seconds,
                    "video analysis complete"
                );
                self.analysis = Some(analysis);
            }
            Err(e) => {
                error!(run_id, error = %e, "video analysis failed");
                self.notices.raise(Notice::new(
                    NoticeSeverity::Error,
                    NoticeSource::VideoAnalysis,
                    format!("An error occurred while processing the video: {}", e),
                ));
            }
        }
        self.publish();
    }

    /// Enter live-camera mode with an acquired camera, or report why not
    pub async fn enter_camera(&mut self, acquired: Result<Arc<dyn FrameSource>, CameraError>) {
        let camera = match acquired {
            Ok(camera) => camera,
            Err(e) => {
                error!(error = %e, "camera unavailable, staying in current mode");
                self.notices.raise(Notice::new(
                    NoticeSeverity::Error,
                    NoticeSource::Camera,
                    format!("Camera access is required for live mode: {}", e),
                ));
                self.publish();
                return;
            }
        };

        self.notices.dismiss_source(NoticeSource::Camera);
        self.stop_capture();
        self.release_camera().await;
        self.capture_cancel = self.cancel.child_token();
        let mut ticker = interval(self.config.capture_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.capture = Some(ticker);
        self.camera = Some(camera);
        self.mode = SessionMode::Camera;
        self.loading = false;

        info!(interval_ms = self.config.capture_interval.as_millis() as u64, "live camera mode started");
        self.publish();
    }

    /// Release the held camera, if any; failures are logged only
    async fn release_camera(&mut self) {
        if let Some(camera) = self.camera.take() {
            if let Err(e) = camera.release().await {
                warn!(error = %e, "camera release failed");
            }
        }
    }

    fn stop_capture(&mut self) {
        self.capture = None;
        self.capture_cancel.cancel();
    }

    async fn exit_camera(&mut self) {
        self.stop_capture();
        self.release_camera().await;
        if self.mode == SessionMode::Camera {
            self.mode = SessionMode::Idle;
        }
        info!("live camera mode stopped");
        self.publish();
    }

    /// Capture one frame and analyse it off the control loop.
    ///
    /// Requests may overlap; whichever completes first is applied first.
    fn spawn_capture(&self) {
        let Some(camera) = self.camera.clone() else {
            return;
        };
        let backend = self.backend.clone();
        let tx = self.ingest_tx.clone();
        let cancel = self.capture_cancel.clone();

        tokio::spawn(async move {
            let result = async {
                let jpeg = camera.capture().await?;
                let payload = backend.analyze_frame(jpeg).await?;
                Ok::<_, ClientError>(decoder::normalize(payload))
            }
            .await;

            if cancel.is_cancelled() {
                return;
            }
            let message = match result {
                Ok(event) => Ingest::Captured(event),
                Err(e) => Ingest::CaptureFailed(e),
            };
            let _ = tx.send(message).await;
        });
    }

    fn capture_failed(&mut self, error: ClientError) {
        warn!(error = %error, "live frame analysis failed");
        if error.is_user_visible() {
            let source = match error {
                ClientError::Camera(_) => NoticeSource::Camera,
                _ => NoticeSource::FrameAnalysis,
            };
            self.notices.raise_once(Notice::new(
                NoticeSeverity::Error,
                source,
                "Error detecting live frame",
            ));
            self.publish();
        }
    }

    fn spawn_frame_listing(&self, reply: oneshot::Sender<ClientResult<Vec<FrameRecord>>>) {
        let backend = self.backend.clone();
        let tx = self.ingest_tx.clone();
        tokio::spawn(async move {
            let result = backend.list_frames().await;
            let _ = tx.send(Ingest::FramesLoaded { result, reply }).await;
        });
    }

    fn frames_loaded(
        &mut self,
        result: Result<Vec<FrameRecord>, BackendError>,
        reply: oneshot::Sender<ClientResult<Vec<FrameRecord>>>,
    ) {
        let result = match result {
            Ok(records) => {
                info!(frames = records.len(), "frame listing loaded");
                if self.notices.dismiss_source(NoticeSource::FrameListing) > 0 {
                    self.publish();
                }
                Ok(records)
            }
            Err(e) => {
                error!(error = %e, "frame listing failed");
                self.notices.raise_once(Notice::new(
                    NoticeSeverity::Error,
                    NoticeSource::FrameListing,
                    "Error fetching frames",
                ));
                self.publish();
                Err(ClientError::Upstream(e))
            }
        };
        let _ = reply.send(result);
    }

    fn set_channel(&mut self, status: ChannelStatus) {
        if status == ChannelStatus::Unavailable {
            self.notices.raise_once(Notice::new(
                NoticeSeverity::Warning,
                NoticeSource::PushChannel,
                "Live data unavailable",
            ));
        }
        self.channel = status;
        self.publish();
    }

    /// Apply one producer result
    pub fn ingest(&mut self, message: Ingest) {
        match message {
            Ingest::Push(event) => self.dispatch(event),
            Ingest::Captured(event) => {
                self.notices.dismiss_source(NoticeSource::FrameAnalysis);
                self.dispatch(event);
            }
            Ingest::Channel(status) => self.set_channel(status),
            Ingest::ChannelFailed(error) => {
                warn!(error = %error, "live data unavailable");
                self.set_channel(ChannelStatus::Unavailable);
            }
            Ingest::CaptureFailed(error) => self.capture_failed(error),
            Ingest::UploadFinished { run_id, result } => self.finish_upload(run_id, result),
            Ingest::FramesLoaded { result, reply } => self.frames_loaded(result, reply),
        }
    }

    /// Returns `false` once the session should stop
    async fn command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::StartUpload(upload) => self.start_upload(upload).await,
            SessionCommand::EnterCamera(acquired) => self.enter_camera(acquired).await,
            SessionCommand::ExitCamera => self.exit_camera().await,
            SessionCommand::Scrub { index, mode, reply } => {
                let _ = reply.send(self.scrub(index, mode));
            }
            SessionCommand::DismissNotice { id, reply } => {
                let _ = reply.send(self.dismiss_notice(id));
            }
            SessionCommand::LoadFrames { reply } => self.spawn_frame_listing(reply),
            SessionCommand::Shutdown => return false,
        }
        true
    }

    /// Process producer results and commands until shutdown, then tear down
    pub async fn run(mut self) -> TeardownReport {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(message) = self.ingest_rx.recv() => self.ingest(message),
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.command(command).await {
                            break;
                        }
                    }
                    None => break,
                },
                _ = next_tick(&mut self.capture) => self.spawn_capture(),
            }
        }

        self.teardown().await
    }

    /// Release the push channel, the capture loop and the camera.
    ///
    /// Each release is attempted regardless of the others failing.
    pub async fn teardown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();

        self.push_cancel.cancel();
        if let Some(task) = self.push_task.take() {
            let abort = task.abort_handle();
            match tokio::time::timeout(PUSH_SHUTDOWN_GRACE, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => report.push_channel = Some(format!("push channel task failed: {}", e)),
                Err(_) => {
                    abort.abort();
                    report.push_channel = Some("push channel did not close in time".to_string());
                }
            }
        }
        self.channel = ChannelStatus::Closed;

        self.stop_capture();

        if let Some(camera) = self.camera.take() {
            if let Err(e) = camera.release().await {
                report.camera = Some(e.to_string());
            }
        }

        self.cancel.cancel();
        self.mode = SessionMode::Idle;

        if report.is_clean() {
            info!("session torn down");
        } else {
            warn!(report = ?report, "session torn down with errors");
        }
        self.publish();
        report
    }
}

async fn next_tick(capture: &mut Option<Interval>) {
    match capture {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending::<()>().await,
    }
}

fn initial_view(max_capacity: u32) -> ViewUpdate {
    ViewUpdate {
        run_id: 0,
        mode: SessionMode::Idle,
        channel: ChannelStatus::Disconnected,
        loading: false,
        live: LiveState::default(),
        progress_label: LiveState::default().progress_label(),
        quadrant_averages: BTreeMap::new(),
        client_danger_zones: BTreeSet::new(),
        alert_zones: BTreeSet::new(),
        overcrowding: OvercrowdingStatus::check(0, max_capacity),
        replay_len: 0,
        analysis: None,
        notices: Vec::new(),
    }
}
