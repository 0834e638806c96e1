//! Lock-step synchronisation of the source and heatmap players.
//!
//! Each player reports its own play/pause/seek/time-update events. Mirroring
//! an action onto the other player makes that player emit the same kind of
//! event, so a naive pair of listeners would bounce forever. [`SyncPair`] is an
//! explicit `Idle`/`Syncing` state machine: while a propagation is in flight,
//! events coming back from the mirrored player are swallowed.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Position difference below which players count as aligned
pub const DEFAULT_SYNC_TOLERANCE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerSide {
    Source,
    Heatmap,
}

impl PlayerSide {
    pub fn other(self) -> Self {
        match self {
            PlayerSide::Source => PlayerSide::Heatmap,
            PlayerSide::Heatmap => PlayerSide::Source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerEventKind {
    Play,
    Pause,
    Seeked,
    TimeUpdate,
}

/// Player state as reported alongside an event
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub position: f64,
    pub paused: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerEvent {
    pub side: PlayerSide,
    pub kind: PlayerEventKind,
    /// Set by players that live elsewhere and report their state with events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<PlaybackSnapshot>,
}

impl PlayerEvent {
    pub fn new(side: PlayerSide, kind: PlayerEventKind) -> Self {
        Self {
            side,
            kind,
            snapshot: None,
        }
    }
}

/// A controllable video surface
pub trait Player {
    fn current_time(&self) -> f64;
    fn is_paused(&self) -> bool;
    fn play(&mut self);
    fn pause(&mut self);
    fn seek(&mut self, position: f64);

    /// Record state carried by an incoming event
    fn observe(&mut self, _snapshot: PlaybackSnapshot) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Syncing { origin: PlayerSide },
}

/// Result of feeding one event to a [`SyncPair`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The event was mirrored onto the other player
    Propagated { seeked: bool, toggled: bool },
    /// The event was a consequence of an in-flight propagation
    Suppressed,
}

pub struct SyncPair<P: Player> {
    source: P,
    heatmap: P,
    state: SyncState,
    tolerance: f64,
}

impl<P: Player> SyncPair<P> {
    pub fn new(source: P, heatmap: P, tolerance: f64) -> Self {
        Self {
            source,
            heatmap,
            state: SyncState::Idle,
            tolerance,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn player(&self, side: PlayerSide) -> &P {
        match side {
            PlayerSide::Source => &self.source,
            PlayerSide::Heatmap => &self.heatmap,
        }
    }

    fn player_mut(&mut self, side: PlayerSide) -> &mut P {
        match side {
            PlayerSide::Source => &mut self.source,
            PlayerSide::Heatmap => &mut self.heatmap,
        }
    }

    /// Feed one player event.
    ///
    /// Events from the mirrored player are swallowed while `Syncing`; events
    /// from the originating player keep propagating so repeated user input is
    /// not lost inside the guard window.
    pub fn handle(&mut self, event: PlayerEvent) -> SyncOutcome {
        if let Some(snapshot) = event.snapshot {
            self.player_mut(event.side).observe(snapshot);
        }

        if let SyncState::Syncing { origin } = self.state {
            if origin != event.side {
                trace!(side = ?event.side, kind = ?event.kind, "suppressed mirrored player event");
                return SyncOutcome::Suppressed;
            }
        }

        self.state = SyncState::Syncing { origin: event.side };

        let (position, paused) = {
            let origin = self.player(event.side);
            (origin.current_time(), origin.is_paused())
        };
        let tolerance = self.tolerance;
        let target = self.player_mut(event.side.other());

        let toggled = if paused && !target.is_paused() {
            target.pause();
            true
        } else if !paused && target.is_paused() {
            target.play();
            true
        } else {
            false
        };

        let seeked = (target.current_time() - position).abs() > tolerance;
        if seeked {
            target.seek(position);
        }

        debug!(
            origin = ?event.side,
            kind = ?event.kind,
            position,
            paused,
            seeked,
            toggled,
            "mirrored player event"
        );

        SyncOutcome::Propagated { seeked, toggled }
    }

    /// Close the guard window
    pub fn release(&mut self) {
        self.state = SyncState::Idle;
    }

    pub fn into_players(self) -> (P, P) {
        (self.source, self.heatmap)
    }
}

/// Drives a [`SyncPair`] from an event channel.
///
/// After a propagation the driver yields once, swallows whatever the mirrored
/// player queued in the meantime, then releases the guard. Players behind a
/// network hop echo later than one scheduler turn; give those a settle window.
pub struct SyncDriver<P: Player> {
    pair: SyncPair<P>,
    events: mpsc::UnboundedReceiver<PlayerEvent>,
    settle: Duration,
}

impl<P: Player> SyncDriver<P> {
    pub fn new(pair: SyncPair<P>, events: mpsc::UnboundedReceiver<PlayerEvent>) -> Self {
        Self {
            pair,
            events,
            settle: Duration::ZERO,
        }
    }

    /// Keep the guard up for `settle` after each propagation
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Run until `cancel` fires or every sender is dropped
    pub async fn run(mut self, cancel: CancellationToken) -> SyncPair<P> {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = self.events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            if let SyncOutcome::Propagated { .. } = self.pair.handle(event) {
                tokio::task::yield_now().await;
                while let Ok(queued) = self.events.try_recv() {
                    self.pair.handle(queued);
                }
                if !self.settle.is_zero() {
                    let deadline = Instant::now() + self.settle;
                    while let Ok(Some(queued)) = timeout_at(deadline, self.events.recv()).await {
                        self.pair.handle(queued);
                    }
                }
                self.pair.release();
            }
        }

        self.pair
    }
}
