//! Test helpers for cuedeck-player integration tests
//!
//! Provides fakes for every session capability plus a `Harness` that wires
//! them into a running session:
//! - FakeProvider: resolver/provider recording every resolve call
//! - FakeSink: tokened status events driven by the test
//! - FakeTransport: connections whose status the test controls
//! - FakeTranscoder: empty PCM with controllable exit

#![allow(dead_code)]

pub mod fakes;

pub use fakes::{FakeProvider, FakeSink, FakeTranscoder, FakeTransport};

use cuedeck_common::{PlayerConfig, PlayerEvent, Platform, Track};
use cuedeck_player::{spawn_session, AddOutcome, SessionHandle, SessionServices, SessionSnapshot};
use cuedeck_player::transport::Destination;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Track with a known duration
pub fn track(title: &str, secs: f64) -> Track {
    Track::new(format!("https://cdn.test/{}.mp3", title), title, Platform::Direct)
        .with_id(title)
        .with_duration_secs(secs)
}

pub struct Harness {
    pub session: SessionHandle,
    pub events: broadcast::Receiver<PlayerEvent>,
    pub provider: Arc<FakeProvider>,
    pub sink: Arc<FakeSink>,
    pub transport: Arc<FakeTransport>,
    pub transcoder: Arc<FakeTranscoder>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(PlayerConfig::default())
    }

    pub fn with_config(config: PlayerConfig) -> Self {
        let provider = Arc::new(FakeProvider::new());
        let sink = Arc::new(FakeSink::new());
        let transport = Arc::new(FakeTransport::new());
        let transcoder = Arc::new(FakeTranscoder::new());

        let services = SessionServices::new(
            provider.clone(),
            provider.clone(),
            transport.clone(),
            transcoder.clone(),
        );
        let session = spawn_session(Destination::new("guild-1", "voice-1"), config, services, sink.clone());
        let events = session.subscribe();

        Self {
            session,
            events,
            provider,
            sink,
            transport,
            transcoder,
        }
    }

    /// Queue one track with a known duration
    pub async fn add(&self, title: &str, secs: f64) -> AddOutcome {
        self.session.enqueue(vec![track(title, secs)], None).await.unwrap()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot().await.unwrap()
    }

    /// Title of the current track
    pub async fn current_title(&self) -> Option<String> {
        self.snapshot().await.current.map(|t| t.title)
    }

    /// Let spawned tasks (preloads, exit watchers) run
    pub async fn settle(&self) {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    /// Advance the paused clock and let the session react
    pub async fn advance(&self, by: Duration) {
        tokio::time::advance(by).await;
        self.settle().await;
    }

    /// Every event received so far
    pub fn drain_events(&mut self) -> Vec<PlayerEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

/// Titles of `TrackEnded` events, in order
pub fn ended_titles(events: &[PlayerEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            PlayerEvent::TrackEnded { track, .. } => Some(track.title.clone()),
            _ => None,
        })
        .collect()
}

/// Titles and offsets of `TrackStarted` events, in order
pub fn started(events: &[PlayerEvent]) -> Vec<(String, u64)> {
    events
        .iter()
        .filter_map(|e| match e {
            PlayerEvent::TrackStarted { track, offset_ms, .. } => Some((track.title.clone(), *offset_ms)),
            _ => None,
        })
        .collect()
}
