//! Scrubbing over frames the backend has already analysed.
//!
//! Unlike the replay buffer this needs no live connection: the frame list is
//! fetched once and navigated locally.

use common::{DetectionBackend, FrameRecord};
use tracing::info;

use crate::error::ClientResult;
use crate::replay::Scrubber;

#[derive(Debug, Clone, Default)]
pub struct FrameBrowser {
    records: Vec<FrameRecord>,
    scrubber: Scrubber,
}

impl FrameBrowser {
    /// Fetch the frame listing from `backend`
    pub async fn load(backend: &dyn DetectionBackend) -> ClientResult<Self> {
        let records = backend.list_frames().await?;
        info!(frames = records.len(), "frame listing loaded");
        Ok(Self::from_records(records))
    }

    pub fn from_records(records: Vec<FrameRecord>) -> Self {
        Self {
            records,
            scrubber: Scrubber::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[FrameRecord] {
        &self.records
    }

    pub fn position(&self) -> usize {
        self.scrubber.selected()
    }

    /// Select `index`, clamped into range, and return the record there
    pub fn select(&mut self, index: usize) -> Option<&FrameRecord> {
        let index = self.scrubber.select(index, self.records.len());
        self.records.get(index)
    }

    /// Move the selection by `delta` frames, stopping at either end
    pub fn step(&mut self, delta: isize) -> Option<&FrameRecord> {
        let target = self.scrubber.selected().saturating_add_signed(delta);
        self.select(target)
    }

    /// Indices of frames the backend rated high or critical
    pub fn elevated(&self) -> Vec<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, record)| record.risk_level.is_elevated())
            .map(|(i, _)| i)
            .collect()
    }

    /// Index of the most crowded frame; the first one wins ties
    pub fn peak(&self) -> Option<usize> {
        self.records
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, u32)>, (i, record)| match best {
                Some((_, people)) if people >= record.total_people => best,
                _ => Some((i, record.total_people)),
            })
            .map(|(i, _)| i)
    }
}
