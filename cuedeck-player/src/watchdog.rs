//! Playback clock and end-of-track watchdog
//!
//! The watchdog is a single optional deadline owned by the session task. It
//! is armed while an attempt is playing and cancelled on pause, stop, end of
//! track, and teardown. When it fires the session asks [`Watchdog::verdict`]
//! what to do; only a sink that is still playing past the expected end gets
//! force-stopped.

use cuedeck_common::config::SessionConfig;
use std::time::Duration;
use tokio::time::Instant;

use crate::sink::SinkStatus;

/// Pause-aware elapsed time of one playback attempt
#[derive(Debug, Clone, Default)]
pub struct PlaybackClock {
    running_since: Option<Instant>,
    accumulated: Duration,
}

impl PlaybackClock {
    /// Clock started at `now`
    pub fn started(now: Instant) -> Self {
        Self {
            running_since: Some(now),
            accumulated: Duration::ZERO,
        }
    }

    pub fn pause(&mut self, now: Instant) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += now.saturating_duration_since(since);
        }
    }

    pub fn resume(&mut self, now: Instant) {
        if self.running_since.is_none() {
            self.running_since = Some(now);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    /// Time spent playing, excluding pauses
    pub fn elapsed(&self, now: Instant) -> Duration {
        match self.running_since {
            Some(since) => self.accumulated + now.saturating_duration_since(since),
            None => self.accumulated,
        }
    }
}

/// What to do when the deadline passes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    /// Still short of the expected end; check again after the delay
    Reschedule(Duration),
    /// Past the expected end and still playing
    ForceStop,
    /// Sink already idle; the end-of-track path handles it
    DeferToIdle,
}

/// Timing parameters, taken from `[session]` configuration
#[derive(Debug, Clone, Copy)]
pub struct WatchdogTiming {
    pub margin: Duration,
    pub minimum: Duration,
    pub unknown_duration: Duration,
    pub recheck: Duration,
    pub end_tolerance: Duration,
}

impl From<&SessionConfig> for WatchdogTiming {
    fn from(config: &SessionConfig) -> Self {
        Self {
            margin: Duration::from_millis(config.watchdog_margin_ms),
            minimum: Duration::from_millis(config.watchdog_min_ms),
            unknown_duration: Duration::from_millis(config.watchdog_unknown_duration_ms),
            recheck: Duration::from_millis(config.watchdog_recheck_ms),
            end_tolerance: config.end_tolerance(),
        }
    }
}

#[derive(Debug)]
pub struct Watchdog {
    timing: WatchdogTiming,
    deadline: Option<Instant>,
}

impl Watchdog {
    pub fn new(timing: WatchdogTiming) -> Self {
        Self {
            timing,
            deadline: None,
        }
    }

    /// Timeout for a track with `remaining` playback left
    pub fn timeout_for(&self, remaining: Option<Duration>) -> Duration {
        match remaining {
            Some(remaining) => (remaining + self.timing.margin).max(self.timing.minimum),
            None => self.timing.unknown_duration,
        }
    }

    /// Arm for a track with `remaining` playback left, replacing any deadline
    pub fn arm(&mut self, now: Instant, remaining: Option<Duration>) {
        self.deadline = Some(now + self.timeout_for(remaining));
    }

    pub fn arm_after(&mut self, now: Instant, delay: Duration) {
        self.deadline = Some(now + delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolves when the deadline passes; never resolves while disarmed
    pub async fn expired(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    /// Disarm and decide what the expiry means
    pub fn fire(&mut self, status: &SinkStatus, elapsed: Duration, duration: Option<Duration>) -> WatchdogVerdict {
        self.deadline = None;
        match status {
            SinkStatus::Idle => WatchdogVerdict::DeferToIdle,
            SinkStatus::Playing => match duration {
                Some(duration) if elapsed + self.timing.end_tolerance < duration => {
                    WatchdogVerdict::Reschedule((duration - elapsed).max(self.timing.recheck))
                }
                Some(_) => WatchdogVerdict::ForceStop,
                None => WatchdogVerdict::Reschedule(self.timing.unknown_duration),
            },
            SinkStatus::Paused | SinkStatus::Error(_) => WatchdogVerdict::Reschedule(self.timing.recheck),
        }
    }
}
