//! Track model
//!
//! A `Track` is created by a resolution adapter (search, link lookup) and is
//! immutable from then on except for two refinements the playback session
//! makes: the duration once a stream reports it, and a cached alternate
//! source URL for platforms that cannot be streamed directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Known audio file extensions for direct links
const DIRECT_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "ogg", "flac", "m4a", "aac", "wma", "opus", "webm", "mp4",
];

/// Source platform of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    YouTube,
    Spotify,
    SoundCloud,
    /// Direct http(s) link to an audio file, or a local path
    Direct,
}

impl Platform {
    /// Guess the platform from a free-form query or URL.
    ///
    /// Anything unrecognised is treated as a YouTube search.
    pub fn detect(query: &str) -> Self {
        let lower = query.trim().to_ascii_lowercase();
        if lower.contains("youtube.com") || lower.contains("youtu.be") {
            Platform::YouTube
        } else if lower.contains("spotify.com") {
            Platform::Spotify
        } else if lower.contains("soundcloud.com") {
            Platform::SoundCloud
        } else if is_direct_link(&lower) {
            Platform::Direct
        } else {
            Platform::YouTube
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::YouTube => "youtube",
            Platform::Spotify => "spotify",
            Platform::SoundCloud => "soundcloud",
            Platform::Direct => "direct",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_direct_link(lower: &str) -> bool {
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return false;
    }
    // Extension must terminate the URL (query strings disqualify the link)
    match lower.rsplit_once('.') {
        Some((_, ext)) => DIRECT_EXTENSIONS.contains(&ext),
        None => false,
    }
}

/// Who asked for a track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub id: String,
    pub name: String,
}

impl Requester {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Stable logical identity of a track.
///
/// Used for preload-cache hits and seek reconstruction; two `Track` values
/// with the same key are the same logical track regardless of where they
/// live in memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackKey(String);

impl TrackKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One playable item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Platform-specific identifier, when the platform has one
    pub id: Option<String>,
    pub url: String,
    pub title: String,
    pub artist: Option<String>,
    /// Duration in seconds; `None` until known
    pub duration_secs: Option<f64>,
    pub platform: Platform,
    pub thumbnail: Option<String>,
    pub requested_by: Option<Requester>,
    pub added_at: Option<DateTime<Utc>>,
    /// Resolved proxy source (e.g. the YouTube match for a Spotify track)
    pub alternate_url: Option<String>,
}

impl Track {
    pub fn new(url: impl Into<String>, title: impl Into<String>, platform: Platform) -> Self {
        Self {
            id: None,
            url: url.into(),
            title: title.into(),
            artist: None,
            duration_secs: None,
            platform,
            thumbnail: None,
            requested_by: None,
            added_at: None,
            alternate_url: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn with_duration_secs(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    /// Identity used for cache lookups: id, else URL, else title+duration
    pub fn key(&self) -> TrackKey {
        if let Some(id) = self.id.as_deref().filter(|id| !id.is_empty()) {
            return TrackKey(id.to_string());
        }
        if !self.url.is_empty() {
            return TrackKey(self.url.clone());
        }
        TrackKey(format!("{}-{}", self.title, self.duration_secs.unwrap_or(0.0)))
    }

    /// Whether two tracks are the same logical track
    pub fn same_track(&self, other: &Track) -> bool {
        self.key() == other.key()
    }

    /// Known duration in milliseconds (`None` if unknown or non-positive)
    pub fn duration_ms(&self) -> Option<u64> {
        match self.duration_secs {
            Some(secs) if secs.is_finite() && secs > 0.0 => Some(crate::time::secs_to_millis(secs)),
            _ => None,
        }
    }

    /// Refine the duration from a resolved stream; ignores non-positive values
    pub fn refine_duration(&mut self, secs: f64) {
        if secs.is_finite() && secs > 0.0 {
            self.duration_secs = Some(secs);
        }
    }

    /// Stamp requester and enqueue time
    pub fn stamp(&mut self, requester: Option<Requester>, at: DateTime<Utc>) {
        self.requested_by = requester;
        self.added_at = Some(at);
    }
}
