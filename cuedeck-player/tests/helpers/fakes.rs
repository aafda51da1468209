//! In-memory implementations of the session capabilities

use async_trait::async_trait;
use cuedeck_common::{Platform, Track};
use cuedeck_player::error::{Error, Result};
use cuedeck_player::provider::{StreamDescriptor, StreamProvider, StreamSource, TrackResolver};
use cuedeck_player::sink::{AudioSink, PcmStream, SinkEvent, SinkStatus};
use cuedeck_player::transcode::{Transcode, TranscodeHandle, Transcoder};
use cuedeck_player::transport::{Destination, Transport, TransportConnection, TransportStatus};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;

/// Resolver and provider that succeed unless told otherwise
#[derive(Default)]
pub struct FakeProvider {
    resolves: Mutex<Vec<(String, f64)>>,
    failing: Mutex<HashSet<String>>,
    seekable: Mutex<HashSet<String>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every resolve of `title` fail
    pub fn fail_title(&self, title: &str) {
        self.failing.lock().unwrap().insert(title.to_string());
    }

    /// Serve `title` from a googlevideo URL that supports offset rewriting
    pub fn serve_seekable(&self, title: &str) {
        self.seekable.lock().unwrap().insert(title.to_string());
    }

    /// (title, offset secs) of every resolve call
    pub fn resolves(&self) -> Vec<(String, f64)> {
        self.resolves.lock().unwrap().clone()
    }

    pub fn resolve_count(&self, title: &str) -> usize {
        self.resolves().iter().filter(|(t, _)| t == title).count()
    }
}

#[async_trait]
impl TrackResolver for FakeProvider {
    async fn lookup(&self, query: &str, _platform: Platform) -> Result<Vec<Track>> {
        if query == "nothing" {
            return Ok(Vec::new());
        }
        if let Some(list) = query.strip_prefix("playlist:") {
            return Ok(list
                .split(',')
                .map(|title| super::track(title, 120.0))
                .collect());
        }
        Ok(vec![super::track(query, 120.0)])
    }
}

#[async_trait]
impl StreamProvider for FakeProvider {
    async fn resolve(&self, track: &Track, _destination: &Destination, offset_secs: f64) -> Result<StreamDescriptor> {
        self.resolves
            .lock()
            .unwrap()
            .push((track.title.clone(), offset_secs));
        if self.failing.lock().unwrap().contains(&track.title) {
            return Err(Error::Resolution(format!("no formats for {}", track.title)));
        }
        let mut descriptor = if self.seekable.lock().unwrap().contains(&track.title) {
            let base = format!("https://r1.googlevideo.com/videoplayback?id={}&itag=251", track.title);
            StreamDescriptor::from_url(base.clone())
                .seekable_from(base)
                .with_skip_secs(offset_secs)
        } else {
            StreamDescriptor::from_url(track.url.clone()).with_skip_secs(offset_secs)
        };
        if let Some(secs) = track.duration_secs {
            descriptor = descriptor.with_duration_secs(secs);
        }
        Ok(descriptor)
    }
}

struct SinkState {
    status: SinkStatus,
    attempt: u64,
    volume: u8,
    plays: Vec<u64>,
}

/// Sink whose playback only ends when the test (or a stop) says so
pub struct FakeSink {
    state: Mutex<SinkState>,
    events: broadcast::Sender<SinkEvent>,
}

impl FakeSink {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(SinkState {
                status: SinkStatus::Idle,
                attempt: 0,
                volume: 100,
                plays: Vec::new(),
            }),
            events,
        }
    }

    fn set(&self, status: SinkStatus) {
        let mut state = self.state.lock().unwrap();
        state.status = status.clone();
        let _ = self.events.send(SinkEvent {
            attempt: state.attempt,
            status,
        });
    }

    /// The stream ran out on its own
    pub fn finish(&self) {
        self.set(SinkStatus::Idle);
    }

    pub fn fail(&self, msg: &str) {
        self.set(SinkStatus::Error(msg.to_string()));
    }

    /// Deliver a notification for an arbitrary attempt
    pub fn emit_for(&self, attempt: u64, status: SinkStatus) {
        let _ = self.events.send(SinkEvent { attempt, status });
    }

    pub fn attempt(&self) -> u64 {
        self.state.lock().unwrap().attempt
    }

    pub fn volume(&self) -> u8 {
        self.state.lock().unwrap().volume
    }

    /// Attempt ids passed to `play`, in order
    pub fn plays(&self) -> Vec<u64> {
        self.state.lock().unwrap().plays.clone()
    }
}

impl AudioSink for FakeSink {
    fn play(&self, attempt: u64, _pcm: PcmStream) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.attempt = attempt;
            state.plays.push(attempt);
        }
        self.set(SinkStatus::Playing);
        Ok(())
    }

    fn pause(&self) -> bool {
        if self.status() != SinkStatus::Playing {
            return false;
        }
        self.set(SinkStatus::Paused);
        true
    }

    fn resume(&self) -> bool {
        if self.status() != SinkStatus::Paused {
            return false;
        }
        self.set(SinkStatus::Playing);
        true
    }

    fn stop(&self, _force: bool) {
        if self.status() != SinkStatus::Idle {
            self.set(SinkStatus::Idle);
        }
    }

    fn set_volume(&self, volume: u8) {
        self.state.lock().unwrap().volume = volume;
    }

    fn status(&self) -> SinkStatus {
        self.state.lock().unwrap().status.clone()
    }

    fn events(&self) -> broadcast::Receiver<SinkEvent> {
        self.events.subscribe()
    }
}

struct ConnectionShared {
    status: Mutex<TransportStatus>,
    events: broadcast::Sender<TransportStatus>,
}

struct FakeConnection {
    shared: Arc<ConnectionShared>,
}

impl TransportConnection for FakeConnection {
    fn status(&self) -> TransportStatus {
        self.shared.status.lock().unwrap().clone()
    }

    fn events(&self) -> broadcast::Receiver<TransportStatus> {
        self.shared.events.subscribe()
    }

    fn subscribe(&self, _sink: Arc<dyn AudioSink>) -> Result<()> {
        Ok(())
    }

    fn destroy(&self) {
        *self.shared.status.lock().unwrap() = TransportStatus::Destroyed;
    }
}

/// Transport whose connections the test can break
#[derive(Default)]
pub struct FakeTransport {
    refuse: AtomicBool,
    gone: AtomicBool,
    connects: AtomicUsize,
    latest: Mutex<Option<Arc<ConnectionShared>>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every connect attempt fail
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn remove_destination(&self) {
        self.gone.store(true, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Change the newest connection's status and notify its subscribers
    pub fn set_status(&self, status: TransportStatus) {
        if let Some(shared) = self.latest.lock().unwrap().as_ref() {
            *shared.status.lock().unwrap() = status.clone();
            let _ = shared.events.send(status);
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, _destination: &Destination) -> Result<Box<dyn TransportConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::Transport("connection refused".to_string()));
        }
        let (events, _) = broadcast::channel(16);
        let shared = Arc::new(ConnectionShared {
            status: Mutex::new(TransportStatus::Ready),
            events,
        });
        *self.latest.lock().unwrap() = Some(shared.clone());
        Ok(Box::new(FakeConnection { shared }))
    }

    async fn destination_exists(&self, _destination: &Destination) -> bool {
        !self.gone.load(Ordering::SeqCst)
    }
}

/// Transcoder producing no audio; exits only when the test says so
#[derive(Default)]
pub struct FakeTranscoder {
    launches: Mutex<Vec<(f64, Option<String>)>>,
    sources: Mutex<Vec<String>>,
    exits: Mutex<Vec<oneshot::Sender<Result<()>>>>,
    cancels: Mutex<Vec<CancellationToken>>,
}

impl FakeTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// (skip secs, filter) of every launch
    pub fn launches(&self) -> Vec<(f64, Option<String>)> {
        self.launches.lock().unwrap().clone()
    }

    /// Source URL of every launch (empty for non-URL sources)
    pub fn sources(&self) -> Vec<String> {
        self.sources.lock().unwrap().clone()
    }

    /// Report a failure for the most recent launch
    pub fn fail_latest(&self, msg: &str) {
        if let Some(exit) = self.exits.lock().unwrap().pop() {
            let _ = exit.send(Err(Error::Transcode(msg.to_string())));
        }
    }

    /// Cancelled flags of every launch, in order
    pub fn cancelled(&self) -> Vec<bool> {
        self.cancels
            .lock()
            .unwrap()
            .iter()
            .map(|token| token.is_cancelled())
            .collect()
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn launch(&self, descriptor: StreamDescriptor, filter: Option<&str>) -> Result<Transcode> {
        self.launches
            .lock()
            .unwrap()
            .push((descriptor.skip_secs, filter.map(str::to_string)));
        let source = match &descriptor.source {
            StreamSource::Url(url) => url.clone(),
            _ => String::new(),
        };
        self.sources.lock().unwrap().push(source);

        let cancel = CancellationToken::new();
        let (exit_tx, exit_rx) = oneshot::channel();
        self.exits.lock().unwrap().push(exit_tx);
        self.cancels.lock().unwrap().push(cancel.clone());

        Ok(Transcode {
            pcm: Box::new(tokio::io::empty()),
            handle: TranscodeHandle::new(cancel, exit_rx),
        })
    }
}
