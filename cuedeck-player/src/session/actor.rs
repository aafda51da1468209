//! Session task: state, lifecycle, and the event loop
//!
//! **Responsibilities:**
//! - PlaybackSession struct definition and construction
//! - The select loop that serializes every input
//! - Event emission and state transitions
//! - Teardown (cleanup) and snapshots

use cuedeck_common::{time, LoopMode, PlayerConfig, PlayerEvent, SessionState, Track};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::handle::{Command, SessionHandle, SessionSnapshot};
use super::SessionServices;
use crate::connection::{sleep_until_opt, ConnectionManager, ConnectionPhase};
use crate::error::{Error, Result};
use crate::preload::PreloadCache;
use crate::provider::CachedStream;
use crate::queue::TrackQueue;
use crate::sink::{AudioSink, SinkEvent};
use crate::transport::Destination;
use crate::watchdog::{PlaybackClock, Watchdog, WatchdogTiming};
use tokio_util::sync::CancellationToken;

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;

/// One playback attempt: a transcode feeding the sink
pub(super) struct ActiveAttempt {
    pub(super) id: u64,
    pub(super) clock: PlaybackClock,
    pub(super) cancel: CancellationToken,
}

/// Messages from helper tasks back into the session
pub(super) enum Internal {
    TranscodeExited { attempt: u64, result: Result<()> },
}

enum Wake {
    Internal(Internal),
    Sink(Option<SinkEvent>),
    Connection(crate::connection::ConnectionSignal),
    Watchdog,
    IdleTimeout,
    Command(Command),
    HandlesDropped,
}

pub(super) struct PlaybackSession {
    pub(super) session_id: Arc<str>,
    pub(super) destination: Destination,
    pub(super) config: PlayerConfig,
    pub(super) services: SessionServices,
    pub(super) sink: Arc<dyn AudioSink>,
    sink_events: Option<broadcast::Receiver<SinkEvent>>,
    commands: mpsc::Receiver<Command>,

    pub(super) queue: TrackQueue,
    pub(super) current: Option<Track>,
    pub(super) state: SessionState,
    pub(super) volume: u8,
    pub(super) loop_mode: LoopMode,
    pub(super) shuffle: bool,
    pub(super) autoplay: bool,
    pub(super) filter: Option<String>,

    pub(super) attempt: Option<ActiveAttempt>,
    next_attempt_id: u64,
    /// Offset the live attempt started from
    pub(super) start_offset_ms: u64,
    /// Last known position of the current track
    pub(super) last_position_ms: u64,
    pub(super) pending_end: Option<cuedeck_common::EndReason>,
    pub(super) retries: u32,
    pub(super) cached_stream: Option<CachedStream>,

    pub(super) preload: PreloadCache,
    pub(super) connections: ConnectionManager,
    pub(super) watchdog: Watchdog,
    pub(super) idle_deadline: Option<Instant>,

    events: broadcast::Sender<PlayerEvent>,
    pub(super) internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
}

impl PlaybackSession {
    pub(super) fn new(
        destination: Destination,
        config: PlayerConfig,
        services: SessionServices,
        sink: Arc<dyn AudioSink>,
    ) -> (Self, SessionHandle) {
        let session_id: Arc<str> = Arc::from(Uuid::new_v4().to_string());
        let (command_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let handle = SessionHandle::new(
            Arc::clone(&session_id),
            destination.clone(),
            command_tx,
            events.clone(),
            Arc::clone(&services.resolver),
        );

        let connections = ConnectionManager::new(
            Arc::clone(&services.transport),
            destination.clone(),
            config.connection.clone(),
        );
        let watchdog = Watchdog::new(WatchdogTiming::from(&config.session));

        let session = Self {
            session_id,
            destination,
            sink_events: Some(sink.events()),
            sink,
            commands,
            queue: TrackQueue::new(config.session.history_limit),
            current: None,
            state: SessionState::Idle,
            volume: config.session.default_volume.min(100),
            loop_mode: LoopMode::None,
            shuffle: false,
            autoplay: false,
            filter: None,
            attempt: None,
            next_attempt_id: 0,
            start_offset_ms: 0,
            last_position_ms: 0,
            pending_end: None,
            retries: 0,
            cached_stream: None,
            preload: PreloadCache::new(),
            connections,
            watchdog,
            idle_deadline: None,
            events,
            internal_tx,
            internal_rx,
            config,
            services,
        };
        (session, handle)
    }

    /// Run until destroyed or every handle is gone
    pub(super) async fn run(mut self) {
        info!("Session {} started for {}", self.session_id, self.destination);

        while self.state != SessionState::Destroyed {
            let wake = tokio::select! {
                biased;
                Some(message) = self.internal_rx.recv() => Wake::Internal(message),
                event = next_sink_event(&mut self.sink_events) => Wake::Sink(event),
                signal = self.connections.next_signal() => Wake::Connection(signal),
                _ = self.watchdog.expired() => Wake::Watchdog,
                _ = sleep_until_opt(self.idle_deadline) => Wake::IdleTimeout,
                command = self.commands.recv() => match command {
                    Some(command) => Wake::Command(command),
                    None => Wake::HandlesDropped,
                },
            };

            match wake {
                Wake::Internal(Internal::TranscodeExited { attempt, result }) => {
                    self.on_transcode_exit(attempt, result);
                }
                Wake::Sink(Some(event)) => self.on_sink_event(event).await,
                Wake::Sink(None) => {
                    warn!("Sink event channel closed");
                    self.sink_events = None;
                }
                Wake::Connection(signal) => self.on_connection_signal(signal).await,
                Wake::Watchdog => self.on_watchdog().await,
                Wake::IdleTimeout => self.on_idle_timeout().await,
                Wake::Command(command) => self.dispatch(command).await,
                Wake::HandlesDropped => {
                    debug!("All handles dropped");
                    self.cleanup();
                }
            }
        }

        info!("Session {} finished", self.session_id);
    }

    async fn dispatch(&mut self, command: Command) {
        match command {
            Command::Enqueue {
                tracks,
                requester,
                reply,
            } => {
                let result = self.enqueue(tracks, requester).await;
                let _ = reply.send(result);
            }
            Command::Play {
                index,
                resume_ms,
                reply,
            } => {
                let result = self.play(index, resume_ms).await;
                let _ = reply.send(result);
            }
            Command::Pause { reply } => {
                let _ = reply.send(self.pause());
            }
            Command::Resume { reply } => {
                let result = self.resume().await;
                let _ = reply.send(result);
            }
            Command::Skip { reply } => {
                let result = self.skip().await;
                let _ = reply.send(result);
            }
            Command::Previous { reply } => {
                let result = self.previous().await;
                let _ = reply.send(result);
            }
            Command::Stop { reply } => {
                let _ = reply.send(self.stop());
            }
            Command::Shuffle { reply } => {
                let _ = reply.send(self.shuffle_queue());
            }
            Command::SetVolume { volume, reply } => {
                let _ = reply.send(self.set_volume(volume));
            }
            Command::SetLoop { mode, reply } => {
                info!("Loop mode set to {:?}", mode);
                self.loop_mode = mode;
                let _ = reply.send(mode);
            }
            Command::SetShuffle { enabled, reply } => {
                self.shuffle = enabled;
                let _ = reply.send(enabled);
            }
            Command::SetAutoplay { enabled, reply } => {
                self.autoplay = enabled;
                let _ = reply.send(enabled);
            }
            Command::SetFilter { name, reply } => {
                let result = self.set_filter(name).await;
                let _ = reply.send(result);
            }
            Command::Remove { index, reply } => {
                let _ = reply.send(self.remove(index));
            }
            Command::Move { from, to, reply } => {
                let _ = reply.send(self.move_track(from, to));
            }
            Command::ClearQueue { reply } => {
                let _ = reply.send(self.clear_queue());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Destroy { reply } => {
                self.cleanup();
                let _ = reply.send(());
            }
        }
    }

    pub(super) fn next_attempt_id(&mut self) -> u64 {
        self.next_attempt_id += 1;
        self.next_attempt_id
    }

    pub(super) fn emit(&self, event: PlayerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub(super) fn session_id(&self) -> String {
        self.session_id.to_string()
    }

    pub(super) fn set_state(&mut self, new_state: SessionState) {
        if self.state == new_state {
            return;
        }
        let old_state = self.state;
        self.state = new_state;
        debug!("Session state {:?} -> {:?}", old_state, new_state);
        self.emit(PlayerEvent::StateChanged {
            session_id: self.session_id(),
            old_state,
            new_state,
            timestamp: time::now(),
        });
    }

    /// Position of the current track: live while an attempt runs
    pub(super) fn current_position_ms(&self) -> u64 {
        match &self.attempt {
            Some(attempt) => {
                self.start_offset_ms + attempt.clock.elapsed(Instant::now()).as_millis() as u64
            }
            None => self.last_position_ms,
        }
    }

    /// Stop the live attempt without treating it as an end of track.
    ///
    /// Any sink event it still produces carries a dead attempt id.
    pub(super) fn discard_attempt(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            self.last_position_ms =
                self.start_offset_ms + attempt.clock.elapsed(Instant::now()).as_millis() as u64;
            attempt.cancel.cancel();
            self.sink.stop(true);
        }
    }

    pub(super) fn arm_idle_timeout(&mut self) {
        self.idle_deadline = Some(Instant::now() + self.config.session.idle_timeout());
    }

    async fn on_idle_timeout(&mut self) {
        self.idle_deadline = None;
        let abandoned = self.connections.phase() == ConnectionPhase::Abandoned;
        if abandoned || (self.current.is_none() && self.queue.is_empty()) {
            info!("Session {} idle for {:?}, cleaning up", self.session_id, self.config.session.idle_timeout());
            self.cleanup();
        }
    }

    /// Release every resource. Idempotent.
    pub(super) fn cleanup(&mut self) {
        if self.state == SessionState::Destroyed {
            return;
        }
        info!("Cleaning up session {}", self.session_id);

        self.watchdog.cancel();
        self.pending_end = None;
        self.discard_attempt();
        self.preload.clear();
        self.connections.shutdown();
        self.queue.clear();
        self.queue.clear_history();
        self.current = None;
        self.cached_stream = None;
        self.idle_deadline = None;
        self.commands.close();

        self.set_state(SessionState::Destroyed);
        self.emit(PlayerEvent::SessionDestroyed {
            session_id: self.session_id(),
            timestamp: time::now(),
        });
    }

    pub(super) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id(),
            destination_id: self.destination.id.clone(),
            state: self.state,
            current: self.current.clone(),
            position_ms: self.current_position_ms(),
            queue: self.queue.to_vec(),
            queue_duration_secs: self.queue.total_duration_secs(),
            history: self.queue.history(),
            volume: self.volume,
            loop_mode: self.loop_mode,
            shuffle: self.shuffle,
            autoplay: self.autoplay,
            filter: self.filter.clone(),
            connection: self.connections.phase(),
            recovery: self.connections.recovery().clone(),
            retries: self.retries,
            watchdog_armed: self.watchdog.is_armed(),
            preloaded: self.preload.len(),
        }
    }

    fn on_transcode_exit(&mut self, attempt: u64, result: Result<()>) {
        let live = self.attempt.as_ref().map(|a| a.id) == Some(attempt);
        match result {
            Ok(()) => debug!("Transcode for attempt {} exited", attempt),
            Err(e) if live => {
                warn!("Transcode failed for live attempt {}: {}", attempt, e);
                self.pending_end = Some(cuedeck_common::EndReason::Error);
                self.sink.stop(true);
            }
            Err(e) => debug!("Ignoring transcode failure of stale attempt {}: {}", attempt, e),
        }
    }
}

async fn next_sink_event(events: &mut Option<broadcast::Receiver<SinkEvent>>) -> Option<SinkEvent> {
    let Some(receiver) = events.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match receiver.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Missed {} sink events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        if self.state != SessionState::Destroyed {
            warn!("Session {} dropped without cleanup", self.session_id);
            self.cleanup();
        }
    }
}

/// Reject operations that need a current track
pub(super) fn require_current(current: &Option<Track>, what: &str) -> Result<Track> {
    current
        .clone()
        .ok_or_else(|| Error::InvalidState(format!("nothing is playing to {}", what)))
}
