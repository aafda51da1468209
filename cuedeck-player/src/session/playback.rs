//! Playback control and end-of-track handling
//!
//! **Responsibilities:**
//! - Starting attempts (descriptor selection, transcode, sink)
//! - User controls: play, pause, resume, skip, previous, stop, volume, filter
//! - End-of-track classification, retries, loop modes, queue advancement
//! - Watchdog expiry

use cuedeck_common::{time, EndReason, LoopMode, PlayerEvent, SessionState, Track};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::actor::{require_current, ActiveAttempt, Internal, PlaybackSession};
use crate::error::{Error, Result};
use crate::provider::StreamDescriptor;
use crate::seek;
use crate::sink::{SinkEvent, SinkStatus};
use crate::transcode::Transcode;
use crate::watchdog::{PlaybackClock, WatchdogVerdict};

impl PlaybackSession {
    /// Make `track` the current track
    pub(super) fn set_current(&mut self, track: Track) {
        let same = self
            .current
            .as_ref()
            .map(|current| current.same_track(&track))
            .unwrap_or(false);
        if !same {
            self.retries = 0;
            self.cached_stream = None;
        }
        self.current = Some(track);
    }

    /// Start a playback attempt of the current track at `offset_ms`
    pub(super) async fn start_current(&mut self, offset_ms: u64) -> Result<()> {
        let track = require_current(&self.current, "start")?;

        self.idle_deadline = None;
        self.watchdog.cancel();
        self.discard_attempt();
        self.pending_end = None;
        self.start_offset_ms = offset_ms;
        self.last_position_ms = offset_ms;
        self.set_state(SessionState::Loading);

        self.connections.ensure_ready(&self.sink).await?;

        let descriptor = self.obtain_descriptor(&track, offset_ms).await?;
        self.refine_current(&descriptor);

        let key = track.key();
        let cache_entry = descriptor.cache_entry(key);
        let filter = self.filter_expression();

        let Transcode { pcm, handle } = self
            .services
            .transcoder
            .launch(descriptor, filter.as_deref())
            .await?;
        let (cancel, exit) = handle.into_parts();

        let attempt_id = self.next_attempt_id();
        self.sink.set_volume(self.volume);
        if let Err(e) = self.sink.play(attempt_id, pcm) {
            cancel.cancel();
            return Err(e);
        }

        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = exit.await.unwrap_or(Ok(()));
            let _ = internal.send(Internal::TranscodeExited {
                attempt: attempt_id,
                result,
            });
        });

        let now = Instant::now();
        self.attempt = Some(ActiveAttempt {
            id: attempt_id,
            clock: PlaybackClock::started(now),
            cancel,
        });
        if cache_entry.is_some() {
            self.cached_stream = cache_entry;
        }

        let current = self.current.clone().unwrap_or(track);
        let remaining = current
            .duration_ms()
            .map(|duration| Duration::from_millis(duration.saturating_sub(offset_ms)));
        self.watchdog.arm(now, remaining);

        info!(
            "Playing '{}' from {} (attempt {})",
            current.title,
            time::format_millis(offset_ms),
            attempt_id
        );
        self.set_state(SessionState::Playing);
        self.emit(PlayerEvent::TrackStarted {
            session_id: self.session_id(),
            track: current,
            offset_ms,
            timestamp: time::now(),
        });
        Ok(())
    }

    /// Pick the cheapest way to a playable descriptor
    async fn obtain_descriptor(&mut self, track: &Track, offset_ms: u64) -> Result<StreamDescriptor> {
        let key = track.key();
        let offset_secs = offset_ms as f64 / 1000.0;

        if offset_ms > 0 {
            let reconstructed = self
                .cached_stream
                .as_ref()
                .filter(|cached| cached.key == key)
                .and_then(|cached| seek::reconstruct(cached, offset_secs));
            if let Some(descriptor) = reconstructed {
                debug!("Seeking '{}' through cached stream", track.title);
                self.preload.take(&key);
                return Ok(descriptor);
            }
        }

        // Entries never outlive the moment their track becomes current; a
        // later queued copy of the same track resolves on demand
        let preloaded = self.preload.take(&key);
        if offset_ms == 0 {
            if let Some(descriptor) = preloaded {
                debug!("Using preloaded stream for '{}'", track.title);
                return Ok(descriptor);
            }
        }

        self.services
            .provider
            .resolve(track, &self.destination, offset_secs)
            .await
    }

    /// Copy what resolution learned about the track back onto it
    fn refine_current(&mut self, descriptor: &StreamDescriptor) {
        let Some(current) = self.current.as_mut() else {
            return;
        };
        if let Some(secs) = descriptor.duration_secs {
            current.refine_duration(secs);
        }
        if let Some(alternate) = &descriptor.alternate_url {
            current.alternate_url = Some(alternate.clone());
            let key = current.key();
            for queued in self.queue.iter_mut().filter(|t| t.key() == key) {
                queued.alternate_url = Some(alternate.clone());
            }
        }
    }

    fn filter_expression(&self) -> Option<String> {
        self.filter
            .as_ref()
            .and_then(|name| self.config.transcode.filters.get(name).cloned())
    }

    /// Apply the failure policy for an attempt that never started.
    ///
    /// Returns true when the caller should move on to the next track.
    pub(super) fn absorb_start_failure(&mut self, error: &Error) -> bool {
        if let Error::Transport(msg) = error {
            warn!("Transport unavailable, starting recovery: {}", msg);
            self.begin_recovery();
            return false;
        }

        if let Some(track) = self.current.take() {
            warn!("Failed to play '{}': {}", track.title, error);
            self.emit(PlayerEvent::TrackFailed {
                session_id: self.session_id(),
                track,
                error: error.to_string(),
                timestamp: time::now(),
            });
        }
        self.cached_stream = None;
        self.start_offset_ms = 0;
        self.last_position_ms = 0;
        true
    }

    /// Start the next playable track, or go idle
    pub(super) async fn advance(&mut self) {
        let mut asked_autoplay = false;

        loop {
            let next = self.queue.pop_next(self.shuffle, &mut rand::thread_rng());
            let track = match next {
                Some(track) => track,
                None => {
                    if self.autoplay && !asked_autoplay {
                        asked_autoplay = true;
                        let last = self.queue.last_played().cloned();
                        let suggested = self.services.autoplay.next_tracks(last.as_ref()).await;
                        if !suggested.is_empty() {
                            info!("Autoplay queued {} tracks", suggested.len());
                            for track in suggested {
                                self.queue.push_back(track);
                            }
                            continue;
                        }
                    }
                    break;
                }
            };

            self.set_current(track);
            match self.start_current(0).await {
                Ok(()) => return,
                Err(e) => {
                    if !self.absorb_start_failure(&e) {
                        return;
                    }
                }
            }
        }

        info!("Queue finished");
        self.current = None;
        self.cached_stream = None;
        self.start_offset_ms = 0;
        self.last_position_ms = 0;
        self.set_state(SessionState::Idle);
        self.emit(PlayerEvent::QueueEmpty {
            session_id: self.session_id(),
            timestamp: time::now(),
        });
        self.arm_idle_timeout();
    }

    /// The live attempt is over; decide what plays next
    pub(super) async fn handle_track_end(&mut self, reason: EndReason) {
        self.watchdog.cancel();
        self.pending_end = None;
        self.discard_attempt();

        let Some(finished) = self.current.clone() else {
            self.set_state(SessionState::Idle);
            return;
        };
        self.set_state(SessionState::Transitioning);
        let elapsed_ms = self.last_position_ms;

        if !reason.is_manual() && !self.connections.is_usable() {
            info!(
                "'{}' ended at {} without a connection",
                finished.title,
                time::format_millis(elapsed_ms)
            );
            self.set_state(SessionState::Loading);
            self.begin_recovery();
            return;
        }

        let tolerance = self.config.session.end_tolerance_ms;
        let unexpected = !reason.is_manual()
            && finished
                .duration_ms()
                .map(|duration| elapsed_ms + tolerance < duration)
                .unwrap_or(false);

        if unexpected {
            self.retries += 1;
            if self.retries <= self.config.session.max_track_retries {
                warn!(
                    "'{}' ended early at {} ({:?}), retry {}/{}",
                    finished.title,
                    time::format_millis(elapsed_ms),
                    reason,
                    self.retries,
                    self.config.session.max_track_retries
                );
                match self.start_current(elapsed_ms).await {
                    Ok(()) => return,
                    Err(Error::Transport(msg)) => {
                        warn!("Retry needs a connection: {}", msg);
                        self.begin_recovery();
                        return;
                    }
                    Err(e) => warn!("Retry of '{}' failed: {}", finished.title, e),
                }
            } else {
                warn!("'{}' keeps ending early, moving on", finished.title);
            }
        }

        self.retries = 0;
        self.start_offset_ms = 0;
        self.last_position_ms = 0;
        self.emit(PlayerEvent::TrackEnded {
            session_id: self.session_id(),
            track: finished.clone(),
            reason,
            timestamp: time::now(),
        });
        self.queue.push_history(finished.clone());

        match self.loop_mode {
            LoopMode::Track => {
                debug!("Looping '{}'", finished.title);
                match self.start_current(0).await {
                    Ok(()) => return,
                    Err(e) => {
                        if !self.absorb_start_failure(&e) {
                            return;
                        }
                    }
                }
            }
            LoopMode::Queue => self.queue.push_back(finished),
            LoopMode::None => {}
        }

        self.current = None;
        self.cached_stream = None;
        self.advance().await;
    }

    pub(super) async fn on_sink_event(&mut self, event: SinkEvent) {
        let live = self.attempt.as_ref().map(|a| a.id);
        if live != Some(event.attempt) {
            debug!("Ignoring {:?} from stale attempt {}", event.status, event.attempt);
            return;
        }

        match event.status {
            SinkStatus::Playing | SinkStatus::Paused => {}
            SinkStatus::Idle => {
                let reason = self.pending_end.take().unwrap_or(EndReason::Idle);
                self.handle_track_end(reason).await;
            }
            SinkStatus::Error(msg) => {
                warn!("Sink error on attempt {}: {}", event.attempt, msg);
                self.pending_end.get_or_insert(EndReason::Error);
                self.sink.stop(true);
            }
        }
    }

    pub(super) async fn on_watchdog(&mut self) {
        let Some(attempt) = self.attempt.as_ref() else {
            self.watchdog.cancel();
            return;
        };
        let now = Instant::now();
        let elapsed = Duration::from_millis(self.current_position_ms());
        let duration = self
            .current
            .as_ref()
            .and_then(|t| t.duration_ms())
            .map(Duration::from_millis);
        let attempt_id = attempt.id;

        match self.watchdog.fire(&self.sink.status(), elapsed, duration) {
            WatchdogVerdict::Reschedule(delay) => {
                debug!("Watchdog rechecking in {:?}", delay);
                self.watchdog.arm_after(now, delay);
            }
            WatchdogVerdict::ForceStop => {
                warn!(
                    "Watchdog: attempt {} still playing at {}, forcing stop",
                    attempt_id,
                    time::format_millis(elapsed.as_millis() as u64)
                );
                self.pending_end = Some(EndReason::Watchdog);
                self.sink.stop(true);
            }
            WatchdogVerdict::DeferToIdle => {
                // Sink events are drained before the watchdog, so the idle
                // notification for this attempt was lost
                debug!("Watchdog found sink idle for attempt {}", attempt_id);
                let reason = self.pending_end.take().unwrap_or(EndReason::Idle);
                self.handle_track_end(reason).await;
            }
        }
    }

    pub(super) async fn play(&mut self, index: Option<usize>, resume_ms: u64) -> Result<Track> {
        if let Some(index) = index {
            let track = self
                .queue
                .remove(index)
                .ok_or_else(|| Error::BadRequest(format!("no queued track at position {}", index)))?;
            if let Some(previous) = self.current.take() {
                self.watchdog.cancel();
                self.discard_attempt();
                self.emit(PlayerEvent::TrackEnded {
                    session_id: self.session_id(),
                    track: previous.clone(),
                    reason: EndReason::Skip,
                    timestamp: time::now(),
                });
                self.queue.push_history(previous);
            }
            self.set_current(track);
        } else if self.current.is_none() {
            let track = self
                .queue
                .pop_front()
                .ok_or_else(|| Error::InvalidState("queue is empty".to_string()))?;
            self.set_current(track);
        }

        match self.start_current(resume_ms).await {
            Ok(()) => require_current(&self.current, "play"),
            Err(e) => {
                if self.absorb_start_failure(&e) {
                    self.advance().await;
                }
                Err(e)
            }
        }
    }

    pub(super) fn pause(&mut self) -> Result<()> {
        if self.state != SessionState::Playing {
            return Err(Error::InvalidState("nothing is playing".to_string()));
        }
        let Some(attempt) = self.attempt.as_mut() else {
            return Err(Error::InvalidState("nothing is playing".to_string()));
        };
        if !self.sink.pause() {
            return Err(Error::InvalidState("sink is not playing".to_string()));
        }

        let now = Instant::now();
        attempt.clock.pause(now);
        self.watchdog.cancel();
        self.last_position_ms = self.current_position_ms();
        info!("Paused at {}", time::format_millis(self.last_position_ms));
        self.set_state(SessionState::Paused);
        Ok(())
    }

    pub(super) async fn resume(&mut self) -> Result<()> {
        if self.state != SessionState::Paused {
            return Err(Error::InvalidState("playback is not paused".to_string()));
        }

        if self.attempt.is_some() && !self.connections.is_usable() {
            info!("Connection to {} dropped while paused", self.destination);
            self.discard_attempt();
        }

        if self.attempt.is_none() {
            // Connection was lost while paused; start over where we stopped
            let position = self.last_position_ms;
            return match self.start_current(position).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    if self.absorb_start_failure(&e) {
                        self.advance().await;
                    }
                    Err(e)
                }
            };
        }

        if !self.sink.resume() {
            return Err(Error::InvalidState("sink is not paused".to_string()));
        }
        let now = Instant::now();
        if let Some(attempt) = self.attempt.as_mut() {
            attempt.clock.resume(now);
        }
        let position = self.current_position_ms();
        let remaining = self
            .current
            .as_ref()
            .and_then(|t| t.duration_ms())
            .map(|duration| Duration::from_millis(duration.saturating_sub(position)));
        self.watchdog.arm(now, remaining);
        info!("Resumed at {}", time::format_millis(position));
        self.set_state(SessionState::Playing);
        Ok(())
    }

    pub(super) async fn skip(&mut self) -> Result<Track> {
        let track = require_current(&self.current, "skip")?;
        info!("Skipping '{}'", track.title);
        self.watchdog.cancel();

        if self.attempt.is_some() {
            // The sink's idle notification completes the skip
            self.pending_end = Some(EndReason::Skip);
            self.sink.stop(true);
        } else {
            self.handle_track_end(EndReason::Skip).await;
        }
        Ok(track)
    }

    pub(super) async fn previous(&mut self) -> Result<Track> {
        let track = self
            .queue
            .pop_history()
            .ok_or_else(|| Error::InvalidState("no previous track".to_string()))?;

        if let Some(current) = self.current.take() {
            self.watchdog.cancel();
            self.discard_attempt();
            self.queue.push_front(current);
        }
        self.set_current(track.clone());

        match self.start_current(0).await {
            Ok(()) => Ok(track),
            Err(e) => {
                if self.absorb_start_failure(&e) {
                    self.advance().await;
                }
                Err(e)
            }
        }
    }

    pub(super) fn stop(&mut self) -> Result<()> {
        let track = require_current(&self.current, "stop")?;
        info!("Stopping playback");

        self.watchdog.cancel();
        self.pending_end = None;
        self.discard_attempt();

        self.current = None;
        self.queue.clear();
        self.preload.clear();
        self.cached_stream = None;
        self.start_offset_ms = 0;
        self.last_position_ms = 0;
        self.retries = 0;
        self.connections.shutdown();

        self.emit(PlayerEvent::TrackEnded {
            session_id: self.session_id(),
            track,
            reason: EndReason::Stop,
            timestamp: time::now(),
        });
        self.set_state(SessionState::Idle);
        self.arm_idle_timeout();
        Ok(())
    }

    pub(super) fn set_volume(&mut self, requested: i64) -> u8 {
        let volume = requested.clamp(0, 100) as u8;
        self.sink.set_volume(volume);
        if volume != self.volume {
            self.volume = volume;
            info!("Volume set to {}", volume);
            self.emit(PlayerEvent::VolumeChanged {
                session_id: self.session_id(),
                volume,
                timestamp: time::now(),
            });
        }
        volume
    }

    /// Select a named filter and re-render the current track with it
    pub(super) async fn set_filter(&mut self, name: Option<String>) -> Result<Option<String>> {
        if let Some(name) = &name {
            if !self.config.transcode.filters.contains_key(name) {
                let known: Vec<&str> = self.config.transcode.filters.keys().map(String::as_str).collect();
                return Err(Error::BadRequest(format!(
                    "unknown filter '{}' (available: {})",
                    name,
                    known.join(", ")
                )));
            }
        }
        if self.filter == name {
            return Ok(name);
        }
        self.filter = name.clone();
        info!("Filter set to {:?}", name);

        if self.attempt.is_some() && matches!(self.state, SessionState::Playing | SessionState::Paused) {
            let position = self.current_position_ms();
            if let Err(e) = self.start_current(position).await {
                if self.absorb_start_failure(&e) {
                    self.advance().await;
                }
                return Err(e);
            }
        }
        Ok(name)
    }
}
