//! Autoplay extension point
//!
//! Consulted when the queue runs dry with autoplay enabled. The engine ships
//! no recommendation source; [`NoAutoplay`] keeps the session going idle.

use async_trait::async_trait;
use cuedeck_common::Track;

#[async_trait]
pub trait AutoplayHook: Send + Sync {
    /// Tracks to queue after `last_played` finished
    async fn next_tracks(&self, last_played: Option<&Track>) -> Vec<Track>;
}

#[derive(Debug, Default, Clone)]
pub struct NoAutoplay;

#[async_trait]
impl AutoplayHook for NoAutoplay {
    async fn next_tracks(&self, _last_played: Option<&Track>) -> Vec<Track> {
        Vec::new()
    }
}
