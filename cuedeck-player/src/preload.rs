//! Background stream resolution for queued tracks
//!
//! Resolving a stream can take seconds, so every track added behind the
//! current one is resolved ahead of time. Results live here until the track
//! becomes current. Failures only cost the head start: the track is resolved
//! again when it is played.

use cuedeck_common::{Track, TrackKey};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::provider::{StreamDescriptor, StreamProvider};
use crate::transport::Destination;

#[derive(Default)]
struct PreloadState {
    ready: HashMap<TrackKey, StreamDescriptor>,
    in_flight: HashMap<TrackKey, JoinHandle<()>>,
}

/// Map of track key to pre-resolved descriptor, shared with resolution tasks
#[derive(Clone, Default)]
pub struct PreloadCache {
    state: Arc<Mutex<PreloadState>>,
}

impl PreloadCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PreloadState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start resolving `track` in the background.
    ///
    /// Returns false when the track is already resolved or in flight.
    pub fn schedule(
        &self,
        track: Track,
        provider: Arc<dyn StreamProvider>,
        destination: Destination,
    ) -> bool {
        let key = track.key();
        let mut state = self.lock();
        if state.ready.contains_key(&key) || state.in_flight.contains_key(&key) {
            return false;
        }

        let cache = self.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let result = provider.resolve(&track, &destination, 0.0).await;
            cache.finish(&task_key, &track, result);
        });
        state.in_flight.insert(key, handle);
        true
    }

    fn finish(&self, key: &TrackKey, track: &Track, result: crate::error::Result<StreamDescriptor>) {
        let mut state = self.lock();
        if state.in_flight.remove(key).is_none() {
            // Taken or cleared while resolving
            return;
        }
        match result {
            Ok(descriptor) => {
                debug!("Preloaded stream for '{}'", track.title);
                state.ready.insert(key.clone(), descriptor);
            }
            Err(e) => warn!("Preload failed for '{}': {}", track.title, e),
        }
    }

    /// Remove and return the entry for `key`, cancelling in-flight work
    pub fn take(&self, key: &TrackKey) -> Option<StreamDescriptor> {
        let mut state = self.lock();
        if let Some(handle) = state.in_flight.remove(key) {
            handle.abort();
        }
        state.ready.remove(key)
    }

    /// Drop everything, cancelling in-flight work
    pub fn clear(&self) {
        let mut state = self.lock();
        for (_, handle) in state.in_flight.drain() {
            handle.abort();
        }
        state.ready.clear();
    }

    pub fn contains(&self, key: &TrackKey) -> bool {
        self.lock().ready.contains_key(key)
    }

    pub fn is_in_flight(&self, key: &TrackKey) -> bool {
        self.lock().in_flight.contains_key(key)
    }

    /// Number of resolved entries
    pub fn len(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use cuedeck_common::Platform;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl StreamProvider for CountingProvider {
        async fn resolve(&self, track: &Track, _: &Destination, _: f64) -> Result<StreamDescriptor> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Resolution("no formats".to_string()));
            }
            Ok(StreamDescriptor::from_url(track.url.clone()))
        }
    }

    fn provider(fail: bool) -> Arc<CountingProvider> {
        Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    fn track(name: &str) -> Track {
        Track::new(format!("https://cdn.example/{}.mp3", name), name, Platform::Direct)
    }

    fn destination() -> Destination {
        Destination::new("g", "c")
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_schedule_then_take() {
        let cache = PreloadCache::new();
        let provider = provider(false);
        let t = track("a");

        assert!(cache.schedule(t.clone(), provider.clone(), destination()));
        assert!(!cache.schedule(t.clone(), provider.clone(), destination()));
        settle().await;

        assert!(cache.contains(&t.key()));
        assert!(cache.take(&t.key()).is_some());
        assert!(cache.take(&t.key()).is_none());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_leaves_no_entry() {
        let cache = PreloadCache::new();
        let t = track("b");

        cache.schedule(t.clone(), provider(true), destination());
        settle().await;

        assert!(!cache.contains(&t.key()));
        assert!(!cache.is_in_flight(&t.key()));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_take_cancels_in_flight() {
        let cache = PreloadCache::new();
        let t = track("c");

        cache.schedule(t.clone(), provider(false), destination());
        assert!(cache.is_in_flight(&t.key()));
        assert!(cache.take(&t.key()).is_none());
        settle().await;

        assert!(!cache.contains(&t.key()));
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = PreloadCache::new();
        let provider = provider(false);
        cache.schedule(track("d"), provider.clone(), destination());
        cache.schedule(track("e"), provider, destination());
        settle().await;
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
    }
}
