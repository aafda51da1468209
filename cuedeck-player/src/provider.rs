//! Stream resolution capability
//!
//! The session never talks to YouTube/Spotify/SoundCloud itself. It consumes
//! two narrow capabilities implemented by platform adapters:
//! - [`TrackResolver`]: turns a query into one or more `Track`s
//! - [`StreamProvider`]: turns a `Track` into a playable [`StreamDescriptor`]
//!
//! [`DirectLinkProvider`] implements both for direct http(s) audio links and
//! local files.

use async_trait::async_trait;
use cuedeck_common::{Platform, Track, TrackKey};
use std::fmt;
use std::path::PathBuf;
use tokio::io::AsyncRead;

use crate::error::{Error, Result};
use crate::transport::Destination;

/// Where the encoded audio comes from
pub enum StreamSource {
    /// Remote resource fetched over http(s)
    Url(String),
    /// Local file
    File(PathBuf),
    /// Already-open byte stream (single use)
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

impl fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamSource::Url(url) => f.debug_tuple("Url").field(url).finish(),
            StreamSource::File(path) => f.debug_tuple("File").field(path).finish(),
            StreamSource::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

/// Resolved, playable representation of a track's audio source.
///
/// Owned by whichever component resolved it until handed to the transcoder.
#[derive(Debug)]
pub struct StreamDescriptor {
    pub source: StreamSource,
    /// Duration reported by the platform, in seconds
    pub duration_secs: Option<f64>,
    /// Whether `raw_base_url` supports offset reconstruction
    pub seekable: bool,
    /// Base URL used to rebuild the descriptor at another offset
    pub raw_base_url: Option<String>,
    /// Headers to send when fetching `source`
    pub headers: Vec<(String, String)>,
    /// Seconds the transcoder must discard from the start of the source.
    ///
    /// Used when the source cannot start at an offset by itself.
    pub skip_secs: f64,
    /// Alternate source the provider resolved for this track
    pub alternate_url: Option<String>,
}

impl StreamDescriptor {
    pub fn new(source: StreamSource) -> Self {
        Self {
            source,
            duration_secs: None,
            seekable: false,
            raw_base_url: None,
            headers: Vec::new(),
            skip_secs: 0.0,
            alternate_url: None,
        }
    }

    pub fn from_url(url: impl Into<String>) -> Self {
        Self::new(StreamSource::Url(url.into()))
    }

    pub fn with_duration_secs(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    /// Mark the descriptor seekable through `base_url`
    pub fn seekable_from(mut self, base_url: impl Into<String>) -> Self {
        self.seekable = true;
        self.raw_base_url = Some(base_url.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_skip_secs(mut self, secs: f64) -> Self {
        self.skip_secs = secs.max(0.0);
        self
    }

    pub fn with_alternate_url(mut self, url: impl Into<String>) -> Self {
        self.alternate_url = Some(url.into());
        self
    }

    /// Reusable metadata for later seek reconstruction
    pub fn cache_entry(&self, key: TrackKey) -> Option<CachedStream> {
        let base_url = match (&self.raw_base_url, &self.source) {
            (Some(base), _) => base.clone(),
            (None, StreamSource::Url(url)) => url.clone(),
            _ => return None,
        };
        Some(CachedStream {
            key,
            base_url,
            seekable: self.seekable,
            duration_secs: self.duration_secs,
            headers: self.headers.clone(),
        })
    }
}

/// Metadata of the last descriptor used for the current track
#[derive(Debug, Clone, PartialEq)]
pub struct CachedStream {
    pub key: TrackKey,
    pub base_url: String,
    pub seekable: bool,
    pub duration_secs: Option<f64>,
    pub headers: Vec<(String, String)>,
}

/// Turns a user query into tracks
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Fails with [`Error::Resolution`] when nothing matches
    async fn lookup(&self, query: &str, platform: Platform) -> Result<Vec<Track>>;
}

/// Turns a track into a playable stream
#[async_trait]
pub trait StreamProvider: Send + Sync {
    /// Resolve `track`, starting `seek_offset_secs` into it.
    ///
    /// Fails with [`Error::Resolution`] if no playable source exists or the
    /// platform is unsupported.
    async fn resolve(
        &self,
        track: &Track,
        destination: &Destination,
        seek_offset_secs: f64,
    ) -> Result<StreamDescriptor>;
}

/// Resolver/provider for direct links and local files
#[derive(Debug, Default, Clone)]
pub struct DirectLinkProvider;

impl DirectLinkProvider {
    pub fn new() -> Self {
        Self
    }

    fn title_from(location: &str) -> String {
        let trimmed = location.trim_end_matches('/');
        let name = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed);
        let name = name.split(['?', '#']).next().unwrap_or(name);
        if name.is_empty() {
            location.to_string()
        } else {
            name.to_string()
        }
    }

    fn is_remote(location: &str) -> bool {
        let lower = location.to_ascii_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://")
    }
}

#[async_trait]
impl TrackResolver for DirectLinkProvider {
    async fn lookup(&self, query: &str, platform: Platform) -> Result<Vec<Track>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::Resolution("empty query".to_string()));
        }
        if platform != Platform::Direct {
            return Err(Error::Resolution(format!("unsupported platform: {}", platform)));
        }

        if Self::is_remote(query) {
            return Ok(vec![Track::new(query, Self::title_from(query), Platform::Direct)]);
        }

        match tokio::fs::metadata(query).await {
            Ok(meta) if meta.is_file() => Ok(vec![Track::new(
                query,
                Self::title_from(query),
                Platform::Direct,
            )]),
            _ => Err(Error::Resolution(format!("no results found for '{}'", query))),
        }
    }
}

#[async_trait]
impl StreamProvider for DirectLinkProvider {
    async fn resolve(
        &self,
        track: &Track,
        _destination: &Destination,
        seek_offset_secs: f64,
    ) -> Result<StreamDescriptor> {
        if track.platform != Platform::Direct {
            return Err(Error::Resolution(format!("unsupported platform: {}", track.platform)));
        }

        let location = track.alternate_url.as_deref().unwrap_or(&track.url);
        let source = if Self::is_remote(location) {
            StreamSource::Url(location.to_string())
        } else {
            let path = PathBuf::from(location);
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Err(Error::Resolution(format!("file not found: {}", path.display())));
            }
            StreamSource::File(path)
        };

        let mut descriptor = StreamDescriptor::new(source).with_skip_secs(seek_offset_secs);
        if let Some(secs) = track.duration_secs {
            descriptor = descriptor.with_duration_secs(secs);
        }
        Ok(descriptor)
    }
}
