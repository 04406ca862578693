// Notifications - Outcomes the front end should show
// Pushed by the engine, render workers and the audio callback; drained by the CLI

use std::error::Error;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::sequencer::TrackId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// Subsystem a notification comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationCategory {
    Render,
    Playback,
    Recording,
    Generic,
}

impl NotificationCategory {
    fn label(self) -> &'static str {
        match self {
            NotificationCategory::Render => "render",
            NotificationCategory::Playback => "playback",
            NotificationCategory::Recording => "recording",
            NotificationCategory::Generic => "looptrack",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub level: NotificationLevel,
    pub category: NotificationCategory,
    pub message: String,
    /// Track the notification is about, `None` for engine-wide events
    pub track: Option<TrackId>,
    pub raised_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        level: NotificationLevel,
        category: NotificationCategory,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            category,
            message: message.into(),
            track: None,
            raised_at: Utc::now(),
        }
    }

    pub fn info(category: NotificationCategory, message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Info, category, message)
    }

    pub fn warning(category: NotificationCategory, message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Warning, category, message)
    }

    pub fn error(category: NotificationCategory, message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Error, category, message)
    }

    /// A failure contained to one track, prefixed with the track's name
    pub fn track_failure(
        track: TrackId,
        track_name: &str,
        category: NotificationCategory,
        err: &dyn Error,
    ) -> Self {
        Self::error(category, format!("{}: {}", track_name, err)).about(track)
    }

    pub fn about(mut self, track: TrackId) -> Self {
        self.track = Some(track);
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == NotificationLevel::Error
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            NotificationLevel::Info => "info",
            NotificationLevel::Warning => "warning",
            NotificationLevel::Error => "error",
        };
        write!(
            f,
            "{} [{}] {}: {}",
            self.raised_at.format("%H:%M:%S"),
            level,
            self.category.label(),
            self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::SequencerError;

    #[test]
    fn test_track_failure_names_the_track() {
        let id = TrackId::new();
        let err = SequencerError::NoSourceBound(id);
        let notification =
            Notification::track_failure(id, "Bass", NotificationCategory::Render, &err);

        assert!(notification.is_error());
        assert_eq!(notification.track, Some(id));
        assert!(notification.message.starts_with("Bass: Track "));
        assert!(notification.message.ends_with("has no source file bound"));
    }

    #[test]
    fn test_engine_wide_notifications_have_no_track() {
        let notification = Notification::info(NotificationCategory::Recording, "Take bound");
        assert!(!notification.is_error());
        assert!(notification.track.is_none());
    }

    #[test]
    fn test_levels_are_ordered_by_severity() {
        assert!(NotificationLevel::Error > NotificationLevel::Warning);
        assert!(NotificationLevel::Warning > NotificationLevel::Info);
    }

    #[test]
    fn test_display() {
        let notification = Notification::warning(NotificationCategory::Render, "Queue full");
        let shown = notification.to_string();
        assert!(shown.ends_with("[warning] render: Queue full"), "{}", shown);
    }
}
