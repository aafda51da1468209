//! Command interface to a running session
//!
//! Every operation is a message to the session task answered on a oneshot
//! channel, so operations on one session are applied strictly in order.

use cuedeck_common::{LoopMode, Platform, PlayerEvent, Requester, SessionState, Track};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::connection::{ConnectionPhase, RecoveryState};
use crate::error::{Error, Result};
use crate::provider::TrackResolver;
use crate::transport::Destination;

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

pub(crate) enum Command {
    Enqueue {
        tracks: Vec<Track>,
        requester: Option<Requester>,
        reply: Reply<AddOutcome>,
    },
    Play {
        index: Option<usize>,
        resume_ms: u64,
        reply: Reply<Track>,
    },
    Pause {
        reply: Reply<()>,
    },
    Resume {
        reply: Reply<()>,
    },
    Skip {
        reply: Reply<Track>,
    },
    Previous {
        reply: Reply<Track>,
    },
    Stop {
        reply: Reply<()>,
    },
    Shuffle {
        reply: Reply<()>,
    },
    SetVolume {
        volume: i64,
        reply: oneshot::Sender<u8>,
    },
    SetLoop {
        mode: LoopMode,
        reply: oneshot::Sender<LoopMode>,
    },
    SetShuffle {
        enabled: bool,
        reply: oneshot::Sender<bool>,
    },
    SetAutoplay {
        enabled: bool,
        reply: oneshot::Sender<bool>,
    },
    SetFilter {
        name: Option<String>,
        reply: Reply<Option<String>>,
    },
    Remove {
        index: usize,
        reply: Reply<Track>,
    },
    Move {
        from: usize,
        to: usize,
        reply: Reply<()>,
    },
    ClearQueue {
        reply: oneshot::Sender<usize>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Destroy {
        reply: oneshot::Sender<()>,
    },
}

/// Result of adding tracks
#[derive(Debug, Clone, Serialize)]
pub struct AddOutcome {
    /// Tracks actually queued (after capacity limits)
    pub tracks: Vec<Track>,
    pub is_playlist: bool,
    /// Queue length after the add
    pub queue_len: usize,
    /// Whether the first track started playing immediately
    pub started: bool,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub destination_id: String,
    pub state: SessionState,
    pub current: Option<Track>,
    pub position_ms: u64,
    pub queue: Vec<Track>,
    pub queue_duration_secs: f64,
    pub history: Vec<Track>,
    pub volume: u8,
    pub loop_mode: LoopMode,
    pub shuffle: bool,
    pub autoplay: bool,
    pub filter: Option<String>,
    pub connection: ConnectionPhase,
    pub recovery: RecoveryState,
    pub retries: u32,
    pub watchdog_armed: bool,
    pub preloaded: usize,
}

/// Cloneable handle to one playback session
#[derive(Clone)]
pub struct SessionHandle {
    session_id: Arc<str>,
    destination: Destination,
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<PlayerEvent>,
    resolver: Arc<dyn TrackResolver>,
}

impl SessionHandle {
    pub(crate) fn new(
        session_id: Arc<str>,
        destination: Destination,
        commands: mpsc::Sender<Command>,
        events: broadcast::Sender<PlayerEvent>,
        resolver: Arc<dyn TrackResolver>,
    ) -> Self {
        Self {
            session_id,
            destination,
            commands,
            events,
            resolver,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Presenter channel
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    /// The session task has exited
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    /// Resolve `query` and queue the results.
    ///
    /// Resolution runs on the caller's task; only queueing goes through the
    /// session. When `platform` is `None` it is detected from the query.
    pub async fn add_track(
        &self,
        query: &str,
        requester: Option<Requester>,
        platform: Option<Platform>,
    ) -> Result<AddOutcome> {
        let platform = platform.unwrap_or_else(|| Platform::detect(query));
        let tracks = self.resolver.lookup(query, platform).await?;
        if tracks.is_empty() {
            return Err(Error::Resolution(format!("no results for '{}'", query)));
        }
        self.enqueue(tracks, requester).await
    }

    /// Queue already-resolved tracks
    pub async fn enqueue(&self, tracks: Vec<Track>, requester: Option<Requester>) -> Result<AddOutcome> {
        self.request(|reply| Command::Enqueue {
            tracks,
            requester,
            reply,
        })
        .await?
    }

    /// Play the current track, the head of the queue, or queue entry `index`
    pub async fn play(&self, index: Option<usize>, resume_ms: u64) -> Result<Track> {
        self.request(|reply| Command::Play {
            index,
            resume_ms,
            reply,
        })
        .await?
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(|reply| Command::Pause { reply }).await?
    }

    pub async fn resume(&self) -> Result<()> {
        self.request(|reply| Command::Resume { reply }).await?
    }

    /// Skip the current track, returning it
    pub async fn skip(&self) -> Result<Track> {
        self.request(|reply| Command::Skip { reply }).await?
    }

    /// Replay the most recently finished track
    pub async fn previous(&self) -> Result<Track> {
        self.request(|reply| Command::Previous { reply }).await?
    }

    pub async fn stop(&self) -> Result<()> {
        self.request(|reply| Command::Stop { reply }).await?
    }

    /// Shuffle the queued tracks once
    pub async fn shuffle(&self) -> Result<()> {
        self.request(|reply| Command::Shuffle { reply }).await?
    }

    /// Set volume, clamped to 0-100. Returns the applied value.
    pub async fn set_volume(&self, volume: i64) -> Result<u8> {
        self.request(|reply| Command::SetVolume { volume, reply }).await
    }

    pub async fn set_loop(&self, mode: LoopMode) -> Result<LoopMode> {
        self.request(|reply| Command::SetLoop { mode, reply }).await
    }

    /// Pick the next track at random while enabled
    pub async fn set_shuffle(&self, enabled: bool) -> Result<bool> {
        self.request(|reply| Command::SetShuffle { enabled, reply }).await
    }

    pub async fn set_autoplay(&self, enabled: bool) -> Result<bool> {
        self.request(|reply| Command::SetAutoplay { enabled, reply }).await
    }

    /// Apply a named audio filter (`None` clears it)
    pub async fn set_filter(&self, name: Option<String>) -> Result<Option<String>> {
        self.request(|reply| Command::SetFilter { name, reply }).await?
    }

    pub async fn remove(&self, index: usize) -> Result<Track> {
        self.request(|reply| Command::Remove { index, reply }).await?
    }

    pub async fn move_track(&self, from: usize, to: usize) -> Result<()> {
        self.request(|reply| Command::Move { from, to, reply }).await?
    }

    /// Empty the queue, returning how many tracks were removed
    pub async fn clear_queue(&self) -> Result<usize> {
        self.request(|reply| Command::ClearQueue { reply }).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Release everything and end the session task
    pub async fn destroy(&self) -> Result<()> {
        self.request(|reply| Command::Destroy { reply }).await
    }
}
