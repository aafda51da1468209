//! # cuedeck Player Library (cuedeck-player)
//!
//! Playback session engine for queued audio streams.
//!
//! **Purpose:** Play a queue of tracks into an audio sink over a transport
//! connection that may drop at any time, recovering from early stream ends,
//! stalled sinks, and lost connections without user intervention.
//!
//! **Architecture:** One actor task per session. Platform access, audio
//! output, transport, and transcoding are capability traits so that adapters
//! (and test fakes) plug in without touching the session logic.

pub mod autoplay;
pub mod connection;
pub mod error;
pub mod preload;
pub mod provider;
pub mod queue;
pub mod registry;
pub mod seek;
pub mod session;
pub mod sink;
pub mod transcode;
pub mod transport;
pub mod watchdog;

pub use error::{Error, Result};
pub use registry::SessionRegistry;
pub use session::{spawn_session, AddOutcome, SessionHandle, SessionServices, SessionSnapshot};
