//! Transport connection management and recovery bookkeeping
//!
//! The manager owns at most one live [`TransportConnection`]. Its timers
//! (auto-reconnect windows, recovery interval, health check) are polled by
//! the session task through [`ConnectionManager::next_signal`], so waiting
//! for a connection never blocks command handling.
//!
//! Recovery policy lives in the session; this module only tracks phase,
//! attempts, and deadlines.

use cuedeck_common::config::ConnectionConfig;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::sink::AudioSink;
use crate::transport::{Destination, Transport, TransportConnection, TransportStatus};

/// Connection phase as seen by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    /// No connection
    Disconnected,
    Connecting,
    Ready,
    /// Connection dropped; waiting for the transport to reconnect on its own
    AwaitingReconnect,
    /// Explicit reconnect attempts in progress
    Recovering,
    /// Recovery gave up; the next play request connects afresh
    Abandoned,
}

/// Progress of an explicit recovery
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryState {
    pub recovering: bool,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Position when recovery started
    pub saved_offset_ms: u64,
}

/// Something the session must react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionSignal {
    Status(TransportStatus),
    /// The connection's event channel closed
    EventsClosed,
    /// The transport did not reconnect on its own in time
    AutoReconnectExpired,
    RecoveryTick,
    HealthCheck,
}

pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    destination: Destination,
    config: ConnectionConfig,
    connection: Option<Box<dyn TransportConnection>>,
    events: Option<broadcast::Receiver<TransportStatus>>,
    phase: ConnectionPhase,
    recovery: RecoveryState,
    recovery_timer: Option<Interval>,
    auto_reconnect_deadline: Option<Instant>,
    health_timer: Interval,
}

impl ConnectionManager {
    /// Must be called within a tokio runtime
    pub fn new(transport: Arc<dyn Transport>, destination: Destination, config: ConnectionConfig) -> Self {
        let period = config.health_check_interval();
        let mut health_timer = tokio::time::interval_at(Instant::now() + period, period);
        health_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            transport,
            destination,
            recovery: RecoveryState {
                max_attempts: config.max_recovery_attempts,
                ..RecoveryState::default()
            },
            config,
            connection: None,
            events: None,
            phase: ConnectionPhase::Disconnected,
            recovery_timer: None,
            auto_reconnect_deadline: None,
            health_timer,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase == ConnectionPhase::Ready
    }

    /// Ready and not destroyed behind our back
    pub fn is_usable(&self) -> bool {
        self.is_ready() && self.is_alive()
    }

    pub fn is_recovering(&self) -> bool {
        self.recovery.recovering
    }

    pub fn recovery(&self) -> &RecoveryState {
        &self.recovery
    }

    /// A connection exists and has not been destroyed
    pub fn is_alive(&self) -> bool {
        self.connection
            .as_ref()
            .map(|c| c.status() != TransportStatus::Destroyed)
            .unwrap_or(false)
    }

    pub async fn destination_exists(&self) -> bool {
        self.transport.destination_exists(&self.destination).await
    }

    /// Connect unless a ready connection exists
    pub async fn ensure_ready(&mut self, sink: &Arc<dyn AudioSink>) -> Result<()> {
        if self.is_usable() {
            return Ok(());
        }
        if self.recovery.recovering {
            return Err(Error::Transport("connection recovery in progress".to_string()));
        }
        let timeout = self.config.connect_timeout();
        self.connect(sink, timeout).await
    }

    /// Replace the current connection with a fresh one
    pub async fn reconnect(&mut self, sink: &Arc<dyn AudioSink>) -> Result<()> {
        let timeout = self.config.reconnect_timeout();
        let result = self.connect(sink, timeout).await;
        if result.is_err() && self.recovery.recovering {
            self.phase = ConnectionPhase::Recovering;
        }
        result
    }

    async fn connect(&mut self, sink: &Arc<dyn AudioSink>, timeout: Duration) -> Result<()> {
        self.teardown();
        self.phase = ConnectionPhase::Connecting;
        debug!("Connecting to {}", self.destination);

        let transport = Arc::clone(&self.transport);
        let destination = self.destination.clone();
        let attempt = async move {
            let connection = transport.connect(&destination).await?;
            let events = connection.events();
            let events = wait_until_ready(connection.as_ref(), events).await?;
            Ok::<_, Error>((connection, events))
        };

        let (connection, events) = match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(ready)) => ready,
            Ok(Err(e)) => {
                self.phase = ConnectionPhase::Disconnected;
                return Err(e);
            }
            Err(_) => {
                self.phase = ConnectionPhase::Disconnected;
                return Err(Error::Transport(format!(
                    "connection to {} not ready within {:?}",
                    self.destination, timeout
                )));
            }
        };

        if let Err(e) = connection.subscribe(Arc::clone(sink)) {
            connection.destroy();
            self.phase = ConnectionPhase::Disconnected;
            return Err(e);
        }

        info!("Connected to {}", self.destination);
        self.connection = Some(connection);
        self.events = Some(events);
        self.phase = ConnectionPhase::Ready;
        Ok(())
    }

    /// Destroy the connection, if any
    pub fn teardown(&mut self) {
        self.events = None;
        self.auto_reconnect_deadline = None;
        if let Some(connection) = self.connection.take() {
            connection.destroy();
        }
        self.phase = ConnectionPhase::Disconnected;
    }

    /// Teardown plus recovery reset
    pub fn shutdown(&mut self) {
        self.end_recovery();
        self.teardown();
    }

    /// Connection reported Ready. Returns true if this ends a recovery.
    pub fn on_ready(&mut self) -> bool {
        self.auto_reconnect_deadline = None;
        self.phase = ConnectionPhase::Ready;
        if self.recovery.recovering {
            self.end_recovery();
            return true;
        }
        false
    }

    pub fn on_connecting(&mut self) {
        if self.phase == ConnectionPhase::AwaitingReconnect {
            let window = Duration::from_millis(self.config.auto_reconnect_ready_ms);
            debug!("Transport reconnecting, waiting {:?} for ready", window);
            self.auto_reconnect_deadline = Some(Instant::now() + window);
        }
    }

    pub fn on_disconnected(&mut self) {
        if self.phase == ConnectionPhase::Ready && !self.recovery.recovering {
            let window = Duration::from_millis(self.config.auto_reconnect_connecting_ms);
            warn!("Connection to {} dropped, waiting {:?} for reconnect", self.destination, window);
            self.phase = ConnectionPhase::AwaitingReconnect;
            self.auto_reconnect_deadline = Some(Instant::now() + window);
        }
    }

    /// Connection destroyed or failed
    pub fn on_lost(&mut self) {
        self.events = None;
        self.auto_reconnect_deadline = None;
        if !self.recovery.recovering {
            self.phase = ConnectionPhase::Disconnected;
        }
    }

    pub fn on_auto_reconnect_expired(&mut self) {
        self.auto_reconnect_deadline = None;
        if self.phase == ConnectionPhase::AwaitingReconnect {
            self.phase = ConnectionPhase::Disconnected;
        }
    }

    /// Start explicit recovery. Returns false when one is already running.
    pub fn begin_recovery(&mut self, saved_offset_ms: u64) -> bool {
        if self.recovery.recovering {
            return false;
        }
        let period = self.config.recovery_interval();
        let mut timer = tokio::time::interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.recovery = RecoveryState {
            recovering: true,
            attempts: 0,
            max_attempts: self.config.max_recovery_attempts,
            saved_offset_ms,
        };
        self.recovery_timer = Some(timer);
        self.auto_reconnect_deadline = None;
        self.phase = ConnectionPhase::Recovering;
        true
    }

    /// Count the next attempt. `None` once the budget is exhausted.
    pub fn next_attempt(&mut self) -> Option<u32> {
        self.recovery.attempts += 1;
        if self.recovery.attempts > self.recovery.max_attempts {
            None
        } else {
            Some(self.recovery.attempts)
        }
    }

    pub fn end_recovery(&mut self) {
        self.recovery_timer = None;
        self.recovery.recovering = false;
        self.recovery.attempts = 0;
        if self.phase == ConnectionPhase::Recovering {
            self.phase = if self.connection.is_some() {
                ConnectionPhase::Ready
            } else {
                ConnectionPhase::Disconnected
            };
        }
    }

    /// Give up: stop the timer and drop whatever connection is left
    pub fn abandon(&mut self) {
        self.end_recovery();
        self.teardown();
        self.phase = ConnectionPhase::Abandoned;
    }

    /// Wait for the next thing the session must handle
    pub async fn next_signal(&mut self) -> ConnectionSignal {
        // An `EventsClosed` signal must be answered with `on_lost`
        tokio::select! {
            status = next_status(&mut self.events) => match status {
                Some(status) => ConnectionSignal::Status(status),
                None => ConnectionSignal::EventsClosed,
            },
            _ = sleep_until_opt(self.auto_reconnect_deadline) => ConnectionSignal::AutoReconnectExpired,
            _ = tick_opt(&mut self.recovery_timer) => ConnectionSignal::RecoveryTick,
            _ = self.health_timer.tick() => ConnectionSignal::HealthCheck,
        }
    }
}

async fn wait_until_ready(
    connection: &dyn TransportConnection,
    mut events: broadcast::Receiver<TransportStatus>,
) -> Result<broadcast::Receiver<TransportStatus>> {
    let mut status = connection.status();
    loop {
        match status {
            TransportStatus::Ready => return Ok(events),
            TransportStatus::Destroyed => {
                return Err(Error::Transport("connection destroyed before ready".to_string()))
            }
            TransportStatus::Error(msg) => return Err(Error::Transport(msg)),
            TransportStatus::Connecting | TransportStatus::Disconnected => {}
        }
        status = match events.recv().await {
            Ok(next) => next,
            Err(broadcast::error::RecvError::Lagged(_)) => connection.status(),
            Err(broadcast::error::RecvError::Closed) => {
                return Err(Error::Transport("connection closed before ready".to_string()))
            }
        };
    }
}

async fn next_status(events: &mut Option<broadcast::Receiver<TransportStatus>>) -> Option<TransportStatus> {
    let Some(receiver) = events.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match receiver.recv().await {
            Ok(status) => return Some(status),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Missed {} transport events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

async fn tick_opt(timer: &mut Option<Interval>) {
    match timer.as_mut() {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Sleep until `deadline`, or forever when there is none
pub(crate) async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalTransport;
    use crate::sink::PipeSink;

    fn manager() -> ConnectionManager {
        ConnectionManager::new(
            Arc::new(LocalTransport::new()),
            Destination::new("g", "c"),
            ConnectionConfig::default(),
        )
    }

    fn sink() -> Arc<dyn AudioSink> {
        Arc::new(PipeSink::new(Box::new(tokio::io::sink()), 48000, 2))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_ready_connects_once() {
        let mut manager = manager();
        let sink = sink();
        assert_eq!(manager.phase(), ConnectionPhase::Disconnected);

        manager.ensure_ready(&sink).await.unwrap();
        assert!(manager.is_ready());
        assert!(manager.is_alive());

        manager.ensure_ready(&sink).await.unwrap();
        assert!(manager.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_attempt_budget() {
        let mut manager = manager();
        assert!(manager.begin_recovery(42_000));
        assert!(!manager.begin_recovery(0));
        assert_eq!(manager.recovery().saved_offset_ms, 42_000);

        for expected in 1..=5 {
            assert_eq!(manager.next_attempt(), Some(expected));
        }
        assert_eq!(manager.next_attempt(), None);

        manager.abandon();
        assert!(!manager.is_recovering());
        assert_eq!(manager.phase(), ConnectionPhase::Abandoned);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_ticks_on_interval() {
        let mut manager = manager();
        let start = Instant::now();
        manager.begin_recovery(0);

        assert_eq!(manager.next_signal().await, ConnectionSignal::RecoveryTick);
        assert_eq!(Instant::now() - start, Duration::from_secs(3));
        assert_eq!(manager.next_signal().await, ConnectionSignal::RecoveryTick);
        assert_eq!(Instant::now() - start, Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_opens_reconnect_windows() {
        let mut manager = manager();
        manager.ensure_ready(&sink()).await.unwrap();
        let start = Instant::now();

        manager.on_disconnected();
        assert_eq!(manager.phase(), ConnectionPhase::AwaitingReconnect);
        assert_eq!(manager.next_signal().await, ConnectionSignal::AutoReconnectExpired);
        assert_eq!(Instant::now() - start, Duration::from_secs(5));

        manager.on_auto_reconnect_expired();
        assert_eq!(manager.phase(), ConnectionPhase::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_ends_recovery() {
        let mut manager = manager();
        manager.begin_recovery(0);
        assert!(manager.on_ready());
        assert!(!manager.is_recovering());
        assert!(manager.is_ready());
        assert!(!manager.on_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_fires_periodically() {
        let mut manager = manager();
        let start = Instant::now();
        assert_eq!(manager.next_signal().await, ConnectionSignal::HealthCheck);
        assert_eq!(Instant::now() - start, Duration::from_secs(30));
    }
}
