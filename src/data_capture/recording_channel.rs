//! Channel decorator that records the client-bound stream.
//!
//! Every write is appended to the capture as a ttyrec record before being
//! handed to the wrapped channel. Reads and requests pass straight through,
//! so only what the target sends towards the client is recorded.
//!
//! Recording is best-effort: once the capture file is open, failures to
//! write it are logged and swallowed, and the relayed bytes are unaffected.

use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::{debug, info, trace, warn};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::ttyrec::{encode_header, RecordTime, HEADER_LEN};
use crate::endpoint::channel::SessionChannel;
use crate::error_handling::types::{CaptureError, ChannelError};

struct CaptureSink {
    file: File,
    /// Timestamp of the previous record; keeps the capture monotonic when
    /// the wall clock steps back.
    last: RecordTime,
}

pub struct RecordingChannel<C> {
    inner: C,
    path: PathBuf,
    sink: Mutex<Option<CaptureSink>>,
    records: AtomicU64,
    bytes: AtomicU64,
    sink_failed: AtomicBool,
}

/// Creates (or truncates) the capture file at `path` with permission bits
/// `mode`.
pub async fn open_capture<P: AsRef<Path>>(path: P, mode: u32) -> Result<File, CaptureError> {
    let path = path.as_ref();

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(mode);
    #[cfg(not(unix))]
    let _ = mode;

    let file = options.open(path).await.map_err(CaptureError::OpenFailed)?;
    info!("Recording session output to {}", path.display());
    Ok(file)
}

impl<C: SessionChannel> RecordingChannel<C> {
    /// Wraps `inner`, opening the capture file at `path`.
    pub async fn create<P: AsRef<Path>>(inner: C, path: P, mode: u32) -> Result<Self, CaptureError> {
        let file = open_capture(path.as_ref(), mode).await?;
        Ok(Self::new(inner, file, path.as_ref().to_path_buf()))
    }

    /// Wraps `inner` around an already opened capture file.
    pub fn new(inner: C, capture: File, path: PathBuf) -> Self {
        Self {
            inner,
            path,
            sink: Mutex::new(Some(CaptureSink {
                file: capture,
                last: RecordTime { sec: 0, usec: 0 },
            })),
            records: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            sink_failed: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records_written(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }

    pub fn bytes_recorded(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    async fn record(&self, data: &[u8]) {
        let Ok(len) = u32::try_from(data.len()) else {
            self.sink_failure(format!("{} byte write exceeds the record length field", data.len()));
            return;
        };

        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            trace!("capture {} already closed, write not recorded", self.path.display());
            return;
        };

        let time = RecordTime::now().max(sink.last);
        sink.last = time;

        let mut frame = Vec::with_capacity(HEADER_LEN + data.len());
        frame.extend_from_slice(&encode_header(time, len));
        frame.extend_from_slice(data);

        let written = match sink.file.write_all(&frame).await {
            Ok(()) => sink.file.flush().await,
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => {
                self.records.fetch_add(1, Ordering::Relaxed);
                self.bytes.fetch_add(u64::from(len), Ordering::Relaxed);
            }
            Err(e) => self.sink_failure(e),
        }
    }

    fn sink_failure(&self, reason: impl Display) {
        if self.sink_failed.swap(true, Ordering::Relaxed) {
            trace!("capture {} write failed: {}", self.path.display(), reason);
        } else {
            warn!(
                "Capture {} write failed, output is no longer fully recorded: {}",
                self.path.display(),
                reason
            );
        }
    }
}

impl<C: SessionChannel> SessionChannel for RecordingChannel<C> {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).await
    }

    async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.record(buf).await;
        self.inner.write(buf).await
    }

    async fn close(&self) -> io::Result<()> {
        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            if let Err(e) = sink.file.flush().await {
                debug!("flushing capture {} on close failed: {}", self.path.display(), e);
            }
            info!(
                "Capture {} closed: {} records, {} bytes",
                self.path.display(),
                self.records_written(),
                self.bytes_recorded()
            );
        }
        self.inner.close().await
    }

    async fn send_request(
        &self,
        req_type: &str,
        want_reply: bool,
        payload: &[u8],
    ) -> Result<bool, ChannelError> {
        self.inner.send_request(req_type, want_reply, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_capture::ttyrec::read_capture;
    use crate::endpoint::memory::{pair, MemoryChannel};
    use tempfile::TempDir;

    async fn read_exact(channel: &MemoryChannel, len: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 1024];
        while out.len() < len {
            let n = channel.read(&mut buf).await.expect("read");
            assert!(n > 0, "unexpected EOF");
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[tokio::test]
    async fn test_writes_are_transparent_and_recorded() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("capture.ttyrec");
        let (near, far) = pair();

        let recording = RecordingChannel::create(near.channel, &path, 0o640)
            .await
            .expect("capture opens");

        let chunks: [&[u8]; 4] = [b"a.txt\n", b"", &[0u8, 255, 10, 13], b"b.txt\n"];
        for chunk in chunks {
            assert_eq!(recording.write(chunk).await.unwrap(), chunk.len());
        }

        assert_eq!(read_exact(&far.channel, 16).await, b"a.txt\n\x00\xff\n\rb.txt\n");
        assert_eq!(recording.records_written(), 4);
        assert_eq!(recording.bytes_recorded(), 16);

        recording.close().await.unwrap();
        let records = read_capture(&path).await.unwrap();
        let payloads: Vec<&[u8]> = records.iter().map(|r| r.payload.as_slice()).collect();
        assert_eq!(payloads, chunks.to_vec());
        assert!(records.windows(2).all(|w| w[0].time <= w[1].time));
    }

    #[tokio::test]
    async fn test_create_truncates_previous_capture() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("capture.ttyrec");
        std::fs::write(&path, b"stale bytes from an earlier session").unwrap();

        let (near, _far) = pair();
        let recording = RecordingChannel::create(near.channel, &path, 0o640).await.unwrap();
        recording.close().await.unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_capture_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("capture.ttyrec");
        let (near, _far) = pair();
        let recording = RecordingChannel::create(near.channel, &path, 0o640).await.unwrap();
        recording.close().await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode & !0o640, 0, "unexpected mode {:o}", mode);
    }

    #[tokio::test]
    async fn test_open_failure() {
        let (near, _far) = pair();
        let result =
            RecordingChannel::create(near.channel, "/nonexistent/dir/session.ttyrec", 0o640).await;
        assert!(matches!(result, Err(CaptureError::OpenFailed(_))));
    }

    #[tokio::test]
    async fn test_reads_pass_through_unrecorded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("capture.ttyrec");
        let (near, far) = pair();
        let recording = RecordingChannel::create(near.channel, &path, 0o640).await.unwrap();

        far.channel.write(b"ls\n").await.unwrap();
        let mut buf = [0u8; 8];
        let n = recording.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ls\n");

        recording.close().await.unwrap();
        assert!(read_capture(&path).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_closes_sink_then_inner() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("capture.ttyrec");
        let (near, far) = pair();
        let recording = RecordingChannel::create(near.channel, &path, 0o640).await.unwrap();

        recording.write(b"bye").await.unwrap();
        recording.close().await.unwrap();
        assert!(recording.inner().is_closed());

        // Late writes reach neither the capture nor the peer.
        assert!(recording.write(b"late").await.is_err());
        let records = read_capture(&path).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, b"bye");
        assert_eq!(read_exact(&far.channel, 3).await, b"bye");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_sink_failure_does_not_break_relay() {
        let (near, far) = pair();
        let Ok(recording) = RecordingChannel::create(near.channel, "/dev/full", 0o640).await else {
            return;
        };

        assert_eq!(recording.write(b"still delivered").await.unwrap(), 15);
        assert_eq!(recording.write(b"!").await.unwrap(), 1);
        assert_eq!(read_exact(&far.channel, 16).await, b"still delivered!");
        assert_eq!(recording.records_written(), 0);
        recording.close().await.unwrap();
    }
}
