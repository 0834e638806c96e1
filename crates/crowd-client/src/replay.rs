//! Replay buffer and scrubber selection.
//!
//! Every received event is kept in arrival order so the user can scrub back
//! through the run independently of the live feed.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::event::{FrameEvent, ImagePayload};

/// Append-only log of received events, indexed by arrival order.
///
/// Uncapped by default. With a capacity the oldest entries are evicted, which
/// shifts every index down; the scrubber re-clamps on each use.
#[derive(Debug, Clone, Default)]
pub struct ReplayBuffer {
    events: VecDeque<FrameEvent>,
    capacity: Option<usize>,
    evicted: u64,
}

impl ReplayBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity: Some(capacity.max(1)),
            evicted: 0,
        }
    }

    /// Append an event; never rejects, including no-op events
    pub fn append(&mut self, event: FrameEvent) {
        if let Some(capacity) = self.capacity {
            while self.events.len() >= capacity {
                self.events.pop_front();
                self.evicted += 1;
            }
        }
        self.events.push_back(event);
    }

    /// Event at `index`, or `None` outside `0..len`
    pub fn get(&self, index: usize) -> Option<&FrameEvent> {
        self.events.get(index)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Entries dropped by the capacity limit since the last reset
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Drop all entries, keeping the capacity limit
    pub fn reset(&mut self) {
        self.events.clear();
        self.evicted = 0;
    }
}

/// Which image of a replayed entry to show
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresentationMode {
    #[default]
    Original,
    Heatmap,
}

/// What the scrubber displays for its current selection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReplayView {
    /// Buffer is empty
    NoData,
    /// Entry exists but has no image for the requested mode
    Empty {
        index: usize,
        mode: PresentationMode,
        frame_number: Option<i64>,
    },
    Frame {
        index: usize,
        mode: PresentationMode,
        image: ImagePayload,
        people_count: Option<u32>,
        frame_number: Option<i64>,
    },
}

impl ReplayView {
    pub fn image(&self) -> Option<&ImagePayload> {
        match self {
            ReplayView::Frame { image, .. } => Some(image),
            _ => None,
        }
    }
}

/// Selection into a sequence whose length can change under it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Scrubber {
    selected: usize,
}

impl Scrubber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    /// Select `index`, clamped to `len - 1` (or 0 when empty)
    pub fn select(&mut self, index: usize, len: usize) -> usize {
        self.selected = index.min(len.saturating_sub(1));
        self.selected
    }

    /// Re-validate the selection after the sequence changed length
    pub fn clamp(&mut self, len: usize) -> usize {
        self.select(self.selected, len)
    }

    /// Resolve the current selection against `buffer`
    pub fn view(&mut self, buffer: &ReplayBuffer, mode: PresentationMode) -> ReplayView {
        let index = self.clamp(buffer.len());
        let Some(event) = buffer.get(index) else {
            return ReplayView::NoData;
        };

        let image = match mode {
            PresentationMode::Original => event.frame_image.clone(),
            PresentationMode::Heatmap => event.heatmap_image.clone(),
        };

        match image {
            Some(image) => ReplayView::Frame {
                index,
                mode,
                image,
                people_count: event.people_count,
                frame_number: event.frame_number,
            },
            None => ReplayView::Empty {
                index,
                mode,
                frame_number: event.frame_number,
            },
        }
    }
}
