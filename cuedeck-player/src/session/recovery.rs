//! Connection loss handling
//!
//! **Responsibilities:**
//! - Reacting to transport status changes and connection timers
//! - Bounded reconnect attempts, resuming from the saved position
//! - Periodic health checks, cleanup when the destination is gone

use cuedeck_common::{time, EndReason, PlayerEvent, RecoveryStatus, SessionState};
use tracing::{debug, info, warn};

use super::actor::PlaybackSession;
use crate::connection::ConnectionSignal;
use crate::transport::TransportStatus;

impl PlaybackSession {
    fn emit_recovery(&self, state: RecoveryStatus) {
        self.emit(PlayerEvent::RecoveryStateChanged {
            session_id: self.session_id(),
            state,
            timestamp: time::now(),
        });
    }

    /// Start explicit recovery unless one is running
    pub(super) fn begin_recovery(&mut self) {
        let position = self.current_position_ms();
        self.last_position_ms = position;
        if !self.connections.begin_recovery(position) {
            return;
        }
        warn!(
            "Starting connection recovery for {} at {}",
            self.destination,
            time::format_millis(position)
        );
        self.watchdog.cancel();
        if self.attempt.is_none() && self.current.is_some() {
            self.set_state(SessionState::Loading);
        }
        self.emit_recovery(RecoveryStatus::Started);
    }

    /// Whether a lost connection should be actively recovered
    fn wants_connection(&self) -> bool {
        self.current.is_some() && self.state != SessionState::Paused && !self.connections.is_recovering()
    }

    pub(super) async fn on_connection_signal(&mut self, signal: ConnectionSignal) {
        match signal {
            ConnectionSignal::Status(TransportStatus::Ready) => {
                if self.connections.on_ready() {
                    info!("Connection to {} came back during recovery", self.destination);
                    self.emit_recovery(RecoveryStatus::Recovered);
                    if self.attempt.is_none() {
                        self.resume_after_recovery().await;
                    } else {
                        self.rearm_watchdog();
                    }
                }
            }
            ConnectionSignal::Status(TransportStatus::Connecting) => self.connections.on_connecting(),
            ConnectionSignal::Status(TransportStatus::Disconnected) => self.connections.on_disconnected(),
            ConnectionSignal::Status(TransportStatus::Destroyed)
            | ConnectionSignal::Status(TransportStatus::Error(_))
            | ConnectionSignal::EventsClosed => {
                warn!("Connection to {} lost", self.destination);
                self.connections.on_lost();
                if self.wants_connection() {
                    self.begin_recovery();
                }
            }
            ConnectionSignal::AutoReconnectExpired => {
                warn!("Connection to {} did not come back on its own", self.destination);
                self.connections.on_auto_reconnect_expired();
                if self.wants_connection() {
                    self.begin_recovery();
                }
            }
            ConnectionSignal::RecoveryTick => self.on_recovery_tick().await,
            ConnectionSignal::HealthCheck => self.on_health_check().await,
        }
    }

    async fn on_recovery_tick(&mut self) {
        let Some(attempt) = self.connections.next_attempt() else {
            let max = self.connections.recovery().max_attempts;
            warn!("Giving up on {} after {} reconnect attempts", self.destination, max);
            self.connections.abandon();
            self.discard_attempt();
            self.watchdog.cancel();
            if self.current.is_some() {
                // Waits for an explicit play or resume
                self.set_state(SessionState::Paused);
            }
            self.emit_recovery(RecoveryStatus::Abandoned);
            self.arm_idle_timeout();
            return;
        };
        let max_attempts = self.connections.recovery().max_attempts;

        if !self.connections.destination_exists().await {
            warn!("Destination {} no longer exists", self.destination);
            self.connections.end_recovery();
            self.emit_recovery(RecoveryStatus::DestinationGone);
            self.cleanup();
            return;
        }

        info!("Reconnect attempt {}/{} to {}", attempt, max_attempts, self.destination);
        match self.connections.reconnect(&self.sink).await {
            Ok(()) => {
                self.connections.end_recovery();
                info!("Reconnected to {}", self.destination);
                self.emit_recovery(RecoveryStatus::Recovered);
                self.resume_after_recovery().await;
            }
            Err(e) => {
                warn!("Reconnect attempt {} failed: {}", attempt, e);
                self.emit_recovery(RecoveryStatus::AttemptFailed {
                    attempt,
                    max_attempts,
                });
            }
        }
    }

    /// Restart the current track where it was when the connection dropped
    async fn resume_after_recovery(&mut self) {
        if self.current.is_none() {
            return;
        }
        let position = self.last_position_ms;
        debug!("Resuming at {}", time::format_millis(position));
        if let Err(e) = self.start_current(position).await {
            warn!("Resume after recovery failed: {}", e);
            self.handle_track_end(EndReason::Error).await;
        }
    }

    fn rearm_watchdog(&mut self) {
        if self.state != SessionState::Playing {
            return;
        }
        let position = self.current_position_ms();
        let remaining = self
            .current
            .as_ref()
            .and_then(|t| t.duration_ms())
            .map(|duration| std::time::Duration::from_millis(duration.saturating_sub(position)));
        self.watchdog.arm(tokio::time::Instant::now(), remaining);
    }

    async fn on_health_check(&mut self) {
        if self.state == SessionState::Destroyed {
            return;
        }
        if !self.connections.is_alive() && self.wants_connection() {
            warn!("Health check: no live connection while a track is active");
            self.begin_recovery();
        }
        if !self.connections.destination_exists().await {
            warn!("Health check: destination {} is gone", self.destination);
            self.cleanup();
        }
    }
}
