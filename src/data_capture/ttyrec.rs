//! The ttyrec capture layout.
//!
//! A capture is a bare sequence of records with no file header or footer:
//!
//! ```text
//! +----------+-----------+----------+-----------------+
//! | sec u32  | usec u32  | len u32  | payload (len)   |
//! +----------+-----------+----------+-----------------+
//!   little-endian, 12-byte header
//! ```
//!
//! The integers are written unsigned; for any time before 2038 the bytes are
//! identical to the signed 32-bit fields classic ttyrec tools expect.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

use crate::error_handling::types::CaptureError;

pub const HEADER_LEN: usize = 12;

/// Wall-clock time of a record, at microsecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordTime {
    pub sec: u32,
    pub usec: u32,
}

impl RecordTime {
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        let sec = u32::try_from(at.timestamp().max(0)).unwrap_or(u32::MAX);
        // chrono reports leap seconds as micros >= 1_000_000
        let usec = at.timestamp_subsec_micros().min(999_999);
        Self { sec, usec }
    }

    pub fn as_micros(&self) -> u64 {
        u64::from(self.sec) * 1_000_000 + u64::from(self.usec)
    }

    /// Time elapsed since `earlier`, zero if `earlier` is later.
    pub fn since(&self, earlier: RecordTime) -> Duration {
        Duration::from_micros(self.as_micros().saturating_sub(earlier.as_micros()))
    }

    /// `None` when the microsecond field is out of range, which only a
    /// corrupt or foreign capture produces.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let nanos = self.usec.checked_mul(1_000)?;
        DateTime::from_timestamp(i64::from(self.sec), nanos)
    }
}

impl fmt::Display for RecordTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(at) => write!(f, "{}", at.format("%Y-%m-%d %H:%M:%S%.6f UTC")),
            None => write!(f, "{}.{:06}", self.sec, self.usec),
        }
    }
}

pub fn encode_header(time: RecordTime, len: u32) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(&time.sec.to_le_bytes());
    header[4..8].copy_from_slice(&time.usec.to_le_bytes());
    header[8..12].copy_from_slice(&len.to_le_bytes());
    header
}

pub fn decode_header(header: &[u8; HEADER_LEN]) -> (RecordTime, u32) {
    let field = |at: usize| {
        u32::from_le_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]])
    };
    (
        RecordTime {
            sec: field(0),
            usec: field(4),
        },
        field(8),
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRecord {
    pub time: RecordTime,
    pub payload: Vec<u8>,
}

impl CaptureRecord {
    /// Header plus payload, as laid out on disk. `None` if the payload does
    /// not fit the 32-bit length field.
    pub fn encode(&self) -> Option<Vec<u8>> {
        let len = u32::try_from(self.payload.len()).ok()?;
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&encode_header(self.time, len));
        out.extend_from_slice(&self.payload);
        Some(out)
    }
}

/// Streams records out of a capture.
pub struct CaptureReader<R> {
    inner: R,
    offset: u64,
}

impl CaptureReader<BufReader<File>> {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, CaptureError> {
        let file = File::open(path.as_ref())
            .await
            .map_err(CaptureError::OpenFailed)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: AsyncRead + Unpin> CaptureReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, offset: 0 }
    }

    /// Byte offset of the next record.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns the next record, or `None` at a clean end of file.
    pub async fn next_record(&mut self) -> Result<Option<CaptureRecord>, CaptureError> {
        let start = self.offset;
        let mut header = [0u8; HEADER_LEN];
        let mut filled = 0;
        while filled < HEADER_LEN {
            let n = self.inner.read(&mut header[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(CaptureError::TruncatedRecord { offset: start });
            }
            filled += n;
        }

        let (time, len) = decode_header(&header);
        // The length field is untrusted: grow the buffer with what is
        // actually there instead of allocating `len` bytes up front.
        let mut payload = Vec::new();
        (&mut self.inner)
            .take(u64::from(len))
            .read_to_end(&mut payload)
            .await?;
        if payload.len() as u64 != u64::from(len) {
            return Err(CaptureError::TruncatedRecord { offset: start });
        }

        self.offset = start + HEADER_LEN as u64 + u64::from(len);
        Ok(Some(CaptureRecord { time, payload }))
    }
}

/// Reads a whole capture file into memory.
pub async fn read_capture<P: AsRef<Path>>(path: P) -> Result<Vec<CaptureRecord>, CaptureError> {
    let mut reader = CaptureReader::open(path).await?;
    let mut records = Vec::new();
    while let Some(record) = reader.next_record().await? {
        records.push(record);
    }
    Ok(records)
}

/// Aggregate view of a capture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSummary {
    pub records: usize,
    pub payload_bytes: u64,
    pub first: Option<RecordTime>,
    pub last: Option<RecordTime>,
}

impl CaptureSummary {
    pub fn push(&mut self, record: &CaptureRecord) {
        self.records += 1;
        self.payload_bytes += record.payload.len() as u64;
        if self.first.is_none() {
            self.first = Some(record.time);
        }
        self.last = Some(record.time);
    }

    /// Scans a capture without keeping payloads around.
    pub async fn scan<R: AsyncRead + Unpin>(
        reader: &mut CaptureReader<R>,
    ) -> Result<Self, CaptureError> {
        let mut summary = Self::default();
        while let Some(record) = reader.next_record().await? {
            summary.push(&record);
        }
        Ok(summary)
    }

    pub fn duration(&self) -> Duration {
        match (self.first, self.last) {
            (Some(first), Some(last)) => last.since(first),
            _ => Duration::ZERO,
        }
    }
}

impl fmt::Display for CaptureSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "records:  {}", self.records)?;
        writeln!(f, "bytes:    {}", self.payload_bytes)?;
        match (self.first, self.last) {
            (Some(first), Some(last)) => {
                writeln!(f, "started:  {}", first)?;
                writeln!(f, "ended:    {}", last)?;
            }
            _ => writeln!(f, "started:  -")?,
        }
        write!(f, "duration: {:.3}s", self.duration().as_secs_f64())
    }
}
