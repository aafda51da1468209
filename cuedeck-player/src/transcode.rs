//! External transcoder
//!
//! Converts an encoded source into raw PCM (s16le, 48 kHz, stereo by
//! default). [`FfmpegTranscoder`] runs `ffmpeg` as a child process: a feeder
//! task copies the source into its stdin while the sink reads stdout.
//!
//! Every launch returns a [`TranscodeHandle`]. Cancelling the handle is how
//! the session tears an attempt down on skip, stop, or replacement; the
//! resulting process exit is reported as success.

use async_trait::async_trait;
use cuedeck_common::config::TranscodeConfig;
use futures::TryStreamExt;
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::provider::{StreamDescriptor, StreamSource};
use crate::sink::PcmStream;

/// Running transcode: PCM output plus its control handle
pub struct Transcode {
    pub pcm: PcmStream,
    pub handle: TranscodeHandle,
}

/// Control side of a running transcode
pub struct TranscodeHandle {
    cancel: CancellationToken,
    exit: oneshot::Receiver<Result<()>>,
}

impl TranscodeHandle {
    /// `exit` resolves once the transcode is over. `Ok` covers normal
    /// completion and cancellation.
    pub fn new(cancel: CancellationToken, exit: oneshot::Receiver<Result<()>>) -> Self {
        Self { cancel, exit }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Split into the cancel token and the exit notification
    pub fn into_parts(self) -> (CancellationToken, oneshot::Receiver<Result<()>>) {
        (self.cancel, self.exit)
    }
}

/// Launches transcodes
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Start transcoding `descriptor`, applying the `-af` expression `filter`
    async fn launch(&self, descriptor: StreamDescriptor, filter: Option<&str>) -> Result<Transcode>;
}

/// Errors caused by the other end of a pipe going away, which happens on
/// every deliberate teardown
pub fn is_benign_io_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
    )
}

/// Transcoder backed by an ffmpeg child process
pub struct FfmpegTranscoder {
    config: TranscodeConfig,
    http: reqwest::Client,
}

impl FfmpegTranscoder {
    pub fn new(config: TranscodeConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Command-line arguments for one transcode
    pub fn args(&self, skip_secs: f64, filter: Option<&str>) -> Vec<String> {
        let mut args: Vec<String> = ["-analyzeduration", "0", "-loglevel", "0", "-i", "pipe:0"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        if skip_secs > 0.0 {
            args.push("-ss".to_string());
            args.push(format!("{:.3}", skip_secs));
        }
        if let Some(expr) = filter {
            args.push("-af".to_string());
            args.push(expr.to_string());
        }

        args.extend([
            "-f".to_string(),
            "s16le".to_string(),
            "-ar".to_string(),
            self.config.sample_rate.to_string(),
            "-ac".to_string(),
            self.config.channels.to_string(),
            "pipe:1".to_string(),
        ]);
        args
    }

    async fn open_source(&self, descriptor: StreamDescriptor) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        match descriptor.source {
            StreamSource::Url(url) => {
                let mut request = self.http.get(&url);
                if descriptor.headers.is_empty() {
                    request = request
                        .header(reqwest::header::USER_AGENT, &self.config.user_agent)
                        .header(reqwest::header::ACCEPT, "*/*");
                }
                for (name, value) in &descriptor.headers {
                    request = request.header(name.as_str(), value.as_str());
                }

                let response = request.send().await?;
                if !response.status().is_success() {
                    return Err(Error::Playback(format!(
                        "Failed to fetch stream: HTTP {}",
                        response.status()
                    )));
                }

                let body = response
                    .bytes_stream()
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
                Ok(Box::new(StreamReader::new(Box::pin(body))))
            }
            StreamSource::File(path) => Ok(Box::new(tokio::fs::File::open(path).await?)),
            StreamSource::Reader(reader) => Ok(reader),
        }
    }
}

/// Copy the source into the transcoder's stdin
async fn feed<R, W>(mut source: R, mut stdin: W, cancel: CancellationToken) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let copied = tokio::select! {
        result = tokio::io::copy(&mut source, &mut stdin) => result,
        _ = cancel.cancelled() => return Ok(()),
    };

    match copied {
        Ok(bytes) => {
            debug!("Fed {} bytes to transcoder", bytes);
            let _ = stdin.shutdown().await;
            Ok(())
        }
        Err(e) if is_benign_io_error(&e) => {
            debug!("Transcoder input closed early: {}", e);
            Ok(())
        }
        Err(e) => Err(Error::Transcode(format!("Source stream failed: {}", e))),
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn launch(&self, descriptor: StreamDescriptor, filter: Option<&str>) -> Result<Transcode> {
        let args = self.args(descriptor.skip_secs, filter);
        let source = self.open_source(descriptor).await?;

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Transcode(format!(
                    "Failed to start {}: {}",
                    self.config.ffmpeg_path.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transcode("transcoder stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transcode("transcoder stdout unavailable".to_string()))?;

        let cancel = CancellationToken::new();
        let (exit_tx, exit_rx) = oneshot::channel();

        let feeder = tokio::spawn(feed(source, stdin, cancel.clone()));

        let supervisor_cancel = cancel.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => Some(status),
                _ = supervisor_cancel.cancelled() => None,
            };

            let result = match status {
                None => {
                    let _ = child.kill().await;
                    feeder.abort();
                    debug!("Transcode cancelled");
                    Ok(())
                }
                Some(Ok(status)) if status.success() => match feeder.await {
                    Ok(fed) => fed,
                    Err(_) => Ok(()),
                },
                Some(Ok(status)) => {
                    feeder.abort();
                    if supervisor_cancel.is_cancelled() {
                        Ok(())
                    } else {
                        Err(Error::Transcode(format!("transcoder exited with {}", status)))
                    }
                }
                Some(Err(e)) => {
                    feeder.abort();
                    Err(Error::Transcode(format!("failed to wait for transcoder: {}", e)))
                }
            };

            if let Err(ref e) = result {
                warn!("{}", e);
            }
            let _ = exit_tx.send(result);
        });

        Ok(Transcode {
            pcm: Box::new(stdout),
            handle: TranscodeHandle::new(cancel, exit_rx),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_plain() {
        let transcoder = FfmpegTranscoder::new(TranscodeConfig::default());
        assert_eq!(
            transcoder.args(0.0, None),
            vec![
                "-analyzeduration", "0", "-loglevel", "0", "-i", "pipe:0", "-f", "s16le", "-ar",
                "48000", "-ac", "2", "pipe:1",
            ]
        );
    }

    #[test]
    fn test_args_with_skip_and_filter() {
        let transcoder = FfmpegTranscoder::new(TranscodeConfig::default());
        let args = transcoder.args(12.5, Some("bass=g=20"));

        let ss = args.iter().position(|a| a == "-ss").unwrap();
        assert_eq!(args[ss + 1], "12.500");
        let af = args.iter().position(|a| a == "-af").unwrap();
        assert_eq!(args[af + 1], "bass=g=20");
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn test_benign_errors() {
        assert!(is_benign_io_error(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(is_benign_io_error(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_benign_io_error(&io::Error::from(io::ErrorKind::TimedOut)));
    }

    #[tokio::test]
    async fn test_feed_copies_source() {
        let (mut reader, writer) = tokio::io::duplex(64);
        let source = std::io::Cursor::new(b"encoded-bytes".to_vec());

        feed(source, writer, CancellationToken::new()).await.unwrap();

        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut out).await.unwrap();
        assert_eq!(out, b"encoded-bytes");
    }

    #[tokio::test]
    async fn test_feed_into_closed_pipe_is_benign() {
        let (reader, writer) = tokio::io::duplex(8);
        drop(reader);
        let source = std::io::Cursor::new(vec![0u8; 1024]);

        assert!(feed(source, writer, CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_binary_fails_launch() {
        let config = TranscodeConfig {
            ffmpeg_path: "/nonexistent/ffmpeg-binary".into(),
            ..TranscodeConfig::default()
        };
        let transcoder = FfmpegTranscoder::new(config);
        let descriptor = StreamDescriptor::new(StreamSource::Reader(Box::new(std::io::Cursor::new(
            Vec::new(),
        ))));

        match transcoder.launch(descriptor, None).await {
            Err(Error::Transcode(msg)) => assert!(msg.contains("Failed to start")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("launch should fail"),
        }
    }
}
