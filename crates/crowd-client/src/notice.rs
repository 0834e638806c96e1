use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeSeverity {
    Info,
    Warning,
    Error,
}

/// Operation a notice is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeSource {
    VideoAnalysis,
    FrameAnalysis,
    FrameListing,
    Camera,
    PushChannel,
    Overcrowding,
}

/// User-facing, dismissible message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notice {
    pub id: Uuid,
    pub severity: NoticeSeverity,
    pub source: NoticeSource,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub dismissed_at: Option<DateTime<Utc>>,
}

impl Notice {
    pub fn new(severity: NoticeSeverity, source: NoticeSource, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            severity,
            source,
            message: message.into(),
            created_at: Utc::now(),
            dismissed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.dismissed_at.is_none()
    }
}

#[derive(Debug, Default)]
pub struct NoticeBoard {
    notices: Vec<Notice>,
}

impl NoticeBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&mut self, notice: Notice) -> Uuid {
        let id = notice.id;
        self.notices.push(notice);
        id
    }

    /// Raise unless an active notice with the same source and message exists
    pub fn raise_once(&mut self, notice: Notice) -> Uuid {
        if let Some(existing) = self
            .notices
            .iter()
            .find(|n| n.is_active() && n.source == notice.source && n.message == notice.message)
        {
            return existing.id;
        }
        self.raise(notice)
    }

    /// Returns `false` for unknown or already dismissed notices
    pub fn dismiss(&mut self, id: Uuid) -> bool {
        match self.notices.iter_mut().find(|n| n.id == id) {
            Some(notice) if notice.is_active() => {
                notice.dismissed_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// Dismiss every active notice from `source`
    pub fn dismiss_source(&mut self, source: NoticeSource) -> usize {
        let now = Utc::now();
        let mut dismissed = 0;
        for notice in self
            .notices
            .iter_mut()
            .filter(|n| n.is_active() && n.source == source)
        {
            notice.dismissed_at = Some(now);
            dismissed += 1;
        }
        dismissed
    }

    /// Active notices, newest first
    pub fn active(&self) -> Vec<&Notice> {
        let mut active: Vec<&Notice> = self.notices.iter().filter(|n| n.is_active()).collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        active
    }

    pub fn get(&self, id: Uuid) -> Option<&Notice> {
        self.notices.iter().find(|n| n.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dismiss() {
        let mut board = NoticeBoard::new();
        let id = board.raise(Notice::new(
            NoticeSeverity::Error,
            NoticeSource::VideoAnalysis,
            "analysis failed",
        ));

        assert_eq!(board.active().len(), 1);
        assert!(board.dismiss(id));
        assert!(!board.dismiss(id));
        assert!(board.active().is_empty());
        assert!(board.get(id).is_some_and(|n| n.dismissed_at.is_some()));
        assert!(!board.dismiss(Uuid::new_v4()));
    }

    #[test]
    fn test_raise_once_deduplicates_active() {
        let mut board = NoticeBoard::new();
        let first = board.raise_once(Notice::new(
            NoticeSeverity::Warning,
            NoticeSource::PushChannel,
            "live data unavailable",
        ));
        let second = board.raise_once(Notice::new(
            NoticeSeverity::Warning,
            NoticeSource::PushChannel,
            "live data unavailable",
        ));
        assert_eq!(first, second);

        board.dismiss(first);
        let third = board.raise_once(Notice::new(
            NoticeSeverity::Warning,
            NoticeSource::PushChannel,
            "live data unavailable",
        ));
        assert_ne!(first, third);
    }

    #[test]
    fn test_dismiss_source() {
        let mut board = NoticeBoard::new();
        board.raise(Notice::new(NoticeSeverity::Error, NoticeSource::Camera, "a"));
        board.raise(Notice::new(NoticeSeverity::Error, NoticeSource::Camera, "b"));
        board.raise(Notice::new(NoticeSeverity::Warning, NoticeSource::Overcrowding, "c"));

        assert_eq!(board.dismiss_source(NoticeSource::Camera), 2);
        assert_eq!(board.active().len(), 1);
    }
}
