//! # cuedeck Common Library
//!
//! Shared code for the cuedeck playback engine:
//! - Track model and platform detection
//! - Presenter-facing event types (PlayerEvent enum)
//! - Configuration loading (TOML with built-in defaults)
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod events;
pub mod time;
pub mod track;

pub use config::PlayerConfig;
pub use error::{Error, Result};
pub use events::{EndReason, LoopMode, PlayerEvent, RecoveryStatus, SessionState};
pub use track::{Platform, Requester, Track, TrackKey};
