//! Audio sink capability
//!
//! A sink consumes one PCM stream at a time (s16le, interleaved). Every
//! `play` call carries the session's attempt token and every status event
//! echoes it back, so the session can tell notifications of the live attempt
//! from late notifications of an attempt it already abandoned.
//!
//! Contract the session relies on: `stop()` on a sink that is not idle emits
//! an `Idle` event for the attempt that was playing.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Decoded PCM handed from the transcoder to the sink
pub type PcmStream = Box<dyn AsyncRead + Send + Unpin>;

/// Sink playback status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkStatus {
    Idle,
    Playing,
    Paused,
    Error(String),
}

/// Status change tagged with the attempt it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkEvent {
    pub attempt: u64,
    pub status: SinkStatus,
}

/// Plays a PCM stream
pub trait AudioSink: Send + Sync {
    /// Start playing `pcm`, replacing whatever was playing
    fn play(&self, attempt: u64, pcm: PcmStream) -> Result<()>;

    /// Returns false when nothing was playing
    fn pause(&self) -> bool;

    /// Returns false when nothing was paused
    fn resume(&self) -> bool;

    /// Halt playback. `force` drops buffered audio immediately.
    fn stop(&self, force: bool);

    /// Volume in percent (0-100)
    fn set_volume(&self, volume: u8);

    fn status(&self) -> SinkStatus;

    fn events(&self) -> broadcast::Receiver<SinkEvent>;
}

/// Scale interleaved s16le samples in place by `volume` percent
pub fn scale_pcm(buf: &mut [u8], volume: u8) {
    if volume >= 100 {
        return;
    }
    let factor = volume as i32;
    for frame in buf.chunks_exact_mut(2) {
        let sample = i16::from_le_bytes([frame[0], frame[1]]) as i32;
        let scaled = (sample * factor / 100) as i16;
        frame.copy_from_slice(&scaled.to_le_bytes());
    }
}

const CHUNK_BYTES: usize = 3840;

struct PipeSinkState {
    status: SinkStatus,
    attempt: u64,
    pump: Option<JoinHandle<()>>,
}

struct PipeSinkShared {
    state: Mutex<PipeSinkState>,
    events: broadcast::Sender<SinkEvent>,
    volume: watch::Sender<u8>,
    paused: watch::Sender<bool>,
}

impl PipeSinkShared {
    /// Set status for `attempt` and notify, unless another attempt took over
    fn transition(&self, attempt: u64, status: SinkStatus) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.attempt != attempt || state.status == status {
            return;
        }
        state.status = status.clone();
        if status == SinkStatus::Idle || matches!(status, SinkStatus::Error(_)) {
            state.pump = None;
        }
        let _ = self.events.send(SinkEvent { attempt, status });
    }
}

/// Sink that writes real-time paced PCM to any byte writer
///
/// Output is throttled to the stream's byte rate so that end-of-track
/// notifications line up with wall-clock playback. Typical writers are
/// stdout piped into a player, or a file.
#[derive(Clone)]
pub struct PipeSink {
    shared: Arc<PipeSinkShared>,
    output: Arc<tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>>,
    bytes_per_sec: u64,
}

impl PipeSink {
    pub fn new(output: Box<dyn AsyncWrite + Send + Unpin>, sample_rate: u32, channels: u16) -> Self {
        let (events, _) = broadcast::channel(64);
        let (volume, _) = watch::channel(100u8);
        let (paused, _) = watch::channel(false);
        Self {
            shared: Arc::new(PipeSinkShared {
                state: Mutex::new(PipeSinkState {
                    status: SinkStatus::Idle,
                    attempt: 0,
                    pump: None,
                }),
                events,
                volume,
                paused,
            }),
            output: Arc::new(tokio::sync::Mutex::new(output)),
            bytes_per_sec: sample_rate as u64 * channels as u64 * 2,
        }
    }

    pub fn stdout(sample_rate: u32, channels: u16) -> Self {
        Self::new(Box::new(tokio::io::stdout()), sample_rate, channels)
    }

    async fn pump(
        shared: Arc<PipeSinkShared>,
        output: Arc<tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>>,
        bytes_per_sec: u64,
        attempt: u64,
        mut pcm: PcmStream,
    ) {
        let mut volume = shared.volume.subscribe();
        let mut paused = shared.paused.subscribe();
        let mut buf = vec![0u8; CHUNK_BYTES + 1];
        let mut written: u64 = 0;
        let mut origin = Instant::now();

        let outcome: std::io::Result<()> = async {
            loop {
                if *paused.borrow_and_update() {
                    let paused_at = Instant::now();
                    while *paused.borrow_and_update() {
                        if paused.changed().await.is_err() {
                            return Ok(());
                        }
                    }
                    origin += paused_at.elapsed();
                }

                let mut n = pcm.read(&mut buf[..CHUNK_BYTES]).await?;
                if n == 0 {
                    return Ok(());
                }
                // Keep sample alignment when a read splits a sample
                if n % 2 == 1 {
                    match pcm.read(&mut buf[n..n + 1]).await? {
                        0 => n -= 1,
                        _ => n += 1,
                    }
                }

                let chunk = &mut buf[..n];
                scale_pcm(chunk, *volume.borrow_and_update());

                let mut out = output.lock().await;
                out.write_all(chunk).await?;
                out.flush().await?;
                drop(out);

                written += n as u64;
                let due = origin + Duration::from_micros(written * 1_000_000 / bytes_per_sec.max(1));
                tokio::time::sleep_until(due).await;
            }
        }
        .await;

        match outcome {
            Ok(()) => {
                debug!("Sink stream for attempt {} finished", attempt);
                shared.transition(attempt, SinkStatus::Idle);
            }
            Err(e) => {
                warn!("Sink stream for attempt {} failed: {}", attempt, e);
                shared.transition(attempt, SinkStatus::Error(e.to_string()));
            }
        }
    }
}

impl AudioSink for PipeSink {
    fn play(&self, attempt: u64, pcm: PcmStream) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pump) = state.pump.take() {
            pump.abort();
            if state.status != SinkStatus::Idle {
                let _ = self.shared.events.send(SinkEvent {
                    attempt: state.attempt,
                    status: SinkStatus::Idle,
                });
            }
        }
        if attempt == 0 {
            return Err(Error::Playback("attempt tokens start at 1".to_string()));
        }

        self.shared.paused.send_replace(false);
        state.attempt = attempt;
        state.status = SinkStatus::Playing;
        state.pump = Some(tokio::spawn(Self::pump(
            Arc::clone(&self.shared),
            Arc::clone(&self.output),
            self.bytes_per_sec,
            attempt,
            pcm,
        )));
        let _ = self.shared.events.send(SinkEvent {
            attempt,
            status: SinkStatus::Playing,
        });
        Ok(())
    }

    fn pause(&self) -> bool {
        let attempt = {
            let state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.status != SinkStatus::Playing {
                return false;
            }
            state.attempt
        };
        self.shared.paused.send_replace(true);
        self.shared.transition(attempt, SinkStatus::Paused);
        true
    }

    fn resume(&self) -> bool {
        let attempt = {
            let state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.status != SinkStatus::Paused {
                return false;
            }
            state.attempt
        };
        self.shared.paused.send_replace(false);
        self.shared.transition(attempt, SinkStatus::Playing);
        true
    }

    fn stop(&self, _force: bool) {
        let attempt = {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(pump) = state.pump.take() {
                pump.abort();
            }
            state.attempt
        };
        self.shared.paused.send_replace(false);
        self.shared.transition(attempt, SinkStatus::Idle);
    }

    fn set_volume(&self, volume: u8) {
        self.shared.volume.send_replace(volume.min(100));
    }

    fn status(&self) -> SinkStatus {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .status
            .clone()
    }

    fn events(&self) -> broadcast::Receiver<SinkEvent> {
        self.shared.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_pcm_half_volume() {
        let mut buf = Vec::new();
        for sample in [1000i16, -1000, i16::MAX, i16::MIN] {
            buf.extend_from_slice(&sample.to_le_bytes());
        }
        scale_pcm(&mut buf, 50);

        let samples: Vec<i16> = buf
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(samples, vec![500, -500, 16383, -16384]);
    }

    #[test]
    fn test_scale_pcm_full_and_mute() {
        let original = 1234i16.to_le_bytes().to_vec();

        let mut full = original.clone();
        scale_pcm(&mut full, 100);
        assert_eq!(full, original);

        let mut muted = original;
        scale_pcm(&mut muted, 0);
        assert_eq!(muted, vec![0, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pipe_sink_plays_to_end() {
        let (writer, mut reader) = tokio::io::duplex(1 << 20);
        let sink = PipeSink::new(Box::new(writer), 48000, 2);
        let mut events = sink.events();

        // 0.1s of audio
        let pcm = vec![1u8; 19200];
        sink.play(1, Box::new(std::io::Cursor::new(pcm))).unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            SinkEvent { attempt: 1, status: SinkStatus::Playing }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            SinkEvent { attempt: 1, status: SinkStatus::Idle }
        );

        let mut out = vec![0u8; 19200];
        reader.read_exact(&mut out).await.unwrap();
        assert!(out.iter().all(|b| *b == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pipe_sink_stop_emits_idle_for_live_attempt() {
        let (writer, _reader) = tokio::io::duplex(1 << 20);
        let sink = PipeSink::new(Box::new(writer), 48000, 2);
        let mut events = sink.events();

        let pcm = vec![0u8; 192000 * 10];
        sink.play(7, Box::new(std::io::Cursor::new(pcm))).unwrap();
        assert!(sink.pause());
        assert_eq!(sink.status(), SinkStatus::Paused);

        sink.stop(true);
        assert_eq!(sink.status(), SinkStatus::Idle);

        let statuses: Vec<SinkEvent> = vec![
            events.recv().await.unwrap(),
            events.recv().await.unwrap(),
            events.recv().await.unwrap(),
        ];
        assert_eq!(statuses[0].status, SinkStatus::Playing);
        assert_eq!(statuses[1].status, SinkStatus::Paused);
        assert_eq!(statuses[2], SinkEvent { attempt: 7, status: SinkStatus::Idle });

        // Nothing left to stop
        assert!(!sink.pause());
        assert!(!sink.resume());
    }
}
