//! Event types for the cuedeck presenter channel
//!
//! Sessions broadcast `PlayerEvent`s to any number of subscribers (chat
//! front-ends, loggers, tests). Delivery is fire-and-forget: a session never
//! waits for a subscriber.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::track::Track;

/// Coarse lifecycle state of a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No current track, empty queue
    Idle,
    /// Resolving/transcoding a track before first audio
    Loading,
    Playing,
    Paused,
    /// One end-of-track transition in flight
    Transitioning,
    /// Terminal: all resources released
    Destroyed,
}

/// Loop behaviour consulted at end of track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    #[default]
    None,
    Track,
    Queue,
}

impl std::str::FromStr for LoopMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(LoopMode::None),
            "track" => Ok(LoopMode::Track),
            "queue" => Ok(LoopMode::Queue),
            other => Err(crate::Error::InvalidInput(format!("unknown loop mode '{}'", other))),
        }
    }
}

/// Why a track stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    /// Sink reported idle on its own
    Idle,
    /// User skipped
    Skip,
    /// User stopped the session
    Stop,
    /// Watchdog deadline forced the stop
    Watchdog,
    /// Transcoder or sink failure
    Error,
}

impl EndReason {
    /// Explicit user intent; never classified as an unexpected end
    pub fn is_manual(&self) -> bool {
        matches!(self, EndReason::Skip | EndReason::Stop)
    }
}

/// Connection recovery progress reported to presenters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecoveryStatus {
    /// Recovery started after a lost connection
    Started,
    /// Reconnect attempt `attempt` of `max_attempts` failed
    AttemptFailed { attempt: u32, max_attempts: u32 },
    /// Connection re-established
    Recovered,
    /// Attempt budget exhausted; session is left without a connection
    Abandoned,
    /// Destination disappeared; recovery aborted
    DestinationGone,
}

/// Presenter-facing events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// A playback attempt started producing audio
    TrackStarted {
        session_id: String,
        track: Track,
        offset_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A track left the current slot
    TrackEnded {
        session_id: String,
        track: Track,
        reason: EndReason,
        timestamp: DateTime<Utc>,
    },

    /// A track could not be played and was dropped
    TrackFailed {
        session_id: String,
        track: Track,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Queue exhausted; session is idle
    QueueEmpty {
        session_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Session state changed
    StateChanged {
        session_id: String,
        old_state: SessionState,
        new_state: SessionState,
        timestamp: DateTime<Utc>,
    },

    /// Volume changed
    VolumeChanged {
        session_id: String,
        volume: u8,
        timestamp: DateTime<Utc>,
    },

    /// Connection recovery progress
    RecoveryStateChanged {
        session_id: String,
        state: RecoveryStatus,
        timestamp: DateTime<Utc>,
    },

    /// Session released all resources
    SessionDestroyed {
        session_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl PlayerEvent {
    /// Session that emitted the event
    pub fn session_id(&self) -> &str {
        match self {
            PlayerEvent::TrackStarted { session_id, .. }
            | PlayerEvent::TrackEnded { session_id, .. }
            | PlayerEvent::TrackFailed { session_id, .. }
            | PlayerEvent::QueueEmpty { session_id, .. }
            | PlayerEvent::StateChanged { session_id, .. }
            | PlayerEvent::VolumeChanged { session_id, .. }
            | PlayerEvent::RecoveryStateChanged { session_id, .. }
            | PlayerEvent::SessionDestroyed { session_id, .. } => session_id,
        }
    }
}
