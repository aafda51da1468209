//! Playback session
//!
//! One session plays one queue into one sink over one transport destination.
//! The session is an actor: a single task owns all mutable state and reacts,
//! one message at a time, to
//! - commands from [`SessionHandle`]s
//! - sink status events
//! - transport status events and connection timers
//! - the end-of-track watchdog
//! - transcoder exit notifications
//!
//! Because only that task touches the state, at most one end-of-track
//! transition can ever be in progress.

mod actor;
mod handle;
mod playback;
mod queue;
mod recovery;

pub use handle::{AddOutcome, SessionHandle, SessionSnapshot};

use cuedeck_common::PlayerConfig;
use std::sync::Arc;

use crate::autoplay::{AutoplayHook, NoAutoplay};
use crate::provider::{StreamProvider, TrackResolver};
use crate::sink::AudioSink;
use crate::transcode::Transcoder;
use crate::transport::{Destination, Transport};

use self::actor::PlaybackSession;

/// Capabilities shared by every session
#[derive(Clone)]
pub struct SessionServices {
    pub resolver: Arc<dyn TrackResolver>,
    pub provider: Arc<dyn StreamProvider>,
    pub transport: Arc<dyn Transport>,
    pub transcoder: Arc<dyn Transcoder>,
    pub autoplay: Arc<dyn AutoplayHook>,
}

impl SessionServices {
    pub fn new(
        resolver: Arc<dyn TrackResolver>,
        provider: Arc<dyn StreamProvider>,
        transport: Arc<dyn Transport>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self {
            resolver,
            provider,
            transport,
            transcoder,
            autoplay: Arc::new(NoAutoplay),
        }
    }

    pub fn with_autoplay(mut self, autoplay: Arc<dyn AutoplayHook>) -> Self {
        self.autoplay = autoplay;
        self
    }
}

/// Start a session task for `destination`. Must be called within a tokio
/// runtime.
pub fn spawn_session(
    destination: Destination,
    config: PlayerConfig,
    services: SessionServices,
    sink: Arc<dyn AudioSink>,
) -> SessionHandle {
    let (session, handle) = PlaybackSession::new(destination, config, services, sink);
    tokio::spawn(session.run());
    handle
}
