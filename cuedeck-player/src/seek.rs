//! Seek reconstruction
//!
//! A seekable descriptor can be rebuilt for an arbitrary offset by rewriting
//! the offset parameter of its base URL. Only googlevideo stream URLs
//! (`begin=<ms>`) support this; every other shape needs a full re-resolution
//! at the offset.

use tracing::debug;
use url::Url;

use crate::provider::{CachedStream, StreamDescriptor};

/// Host suffix of the one URL shape with a known offset parameter
const SEEKABLE_HOST_SUFFIX: &str = "googlevideo.com";

/// Offset parameters stripped before a new one is applied
const OFFSET_PARAMS: &[&str] = &["begin", "start"];

/// Rewrite `base_url` so the stream starts `seek_secs` in.
///
/// Returns the base URL unchanged for a zero offset, and `None` when the URL
/// shape has no known offset parameter.
pub fn apply_seek_to_url(base_url: &str, seek_secs: f64) -> Option<String> {
    if base_url.is_empty() {
        return None;
    }
    if seek_secs <= 0.0 {
        return Some(base_url.to_string());
    }

    let mut url = Url::parse(base_url).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    if !(host == SEEKABLE_HOST_SUFFIX || host.ends_with(&format!(".{}", SEEKABLE_HOST_SUFFIX))) {
        return None;
    }

    // Work on the raw query so signed parameters keep their exact encoding
    let mut pairs: Vec<String> = url
        .query()
        .unwrap_or("")
        .split('&')
        .filter(|pair| !pair.is_empty() && !is_offset_param(pair))
        .map(str::to_string)
        .collect();

    let begin_ms = (seek_secs * 1000.0).floor().max(0.0) as u64;
    pairs.push(format!("begin={}", begin_ms));
    url.set_query(Some(&pairs.join("&")));

    Some(url.to_string())
}

fn is_offset_param(pair: &str) -> bool {
    match pair.split_once('=') {
        Some((name, value)) => {
            OFFSET_PARAMS.contains(&name)
                && !value.is_empty()
                && value.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

/// Build a descriptor for `seek_secs` from cached metadata, if possible
pub fn reconstruct(cached: &CachedStream, seek_secs: f64) -> Option<StreamDescriptor> {
    if !cached.seekable {
        return None;
    }
    let url = apply_seek_to_url(&cached.base_url, seek_secs)?;
    debug!("Reconstructed stream for {} at {:.1}s", cached.key, seek_secs);

    let mut descriptor = StreamDescriptor::from_url(url).seekable_from(cached.base_url.clone());
    descriptor.duration_secs = cached.duration_secs;
    descriptor.headers = cached.headers.clone();
    Some(descriptor)
}
