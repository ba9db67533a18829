use std::time::Duration;

use log::debug;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::ttyrec::{CaptureReader, RecordTime};
use crate::configuration::types::ReplayConfig;
use crate::error_handling::types::CaptureError;

/// Plays a capture back, sleeping between records as they were recorded.
#[derive(Debug, Clone)]
pub struct Replayer {
    speed: f64,
    max_idle: Option<Duration>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub records: usize,
    pub bytes: u64,
}

impl Replayer {
    /// `speed` must be positive; non-positive values play at normal speed.
    pub fn new(speed: f64) -> Self {
        let speed = if speed.is_finite() && speed > 0.0 { speed } else { 1.0 };
        Self {
            speed,
            max_idle: None,
        }
    }

    pub fn with_max_idle(mut self, max_idle: Option<Duration>) -> Self {
        self.max_idle = max_idle;
        self
    }

    pub fn from_config(config: &ReplayConfig) -> Self {
        Self::new(config.speed).with_max_idle(
            config
                .max_idle_secs
                .filter(|secs| !secs.is_nan() && *secs >= 0.0)
                .map(|secs| Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)),
        )
    }

    /// Pause to insert before `next`, given the previous record's time.
    /// Saturates at [`Duration::MAX`] for extreme slow-downs.
    pub fn delay_between(&self, prev: RecordTime, next: RecordTime) -> Duration {
        let scaled = next.since(prev).as_secs_f64() / self.speed;
        let delay = Duration::try_from_secs_f64(scaled).unwrap_or(Duration::MAX);
        match self.max_idle {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    pub async fn play<R, W>(
        &self,
        reader: &mut CaptureReader<R>,
        out: &mut W,
    ) -> Result<ReplayStats, CaptureError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut stats = ReplayStats::default();
        let mut prev: Option<RecordTime> = None;

        while let Some(record) = reader.next_record().await? {
            if let Some(prev) = prev {
                let delay = self.delay_between(prev, record.time);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            out.write_all(&record.payload).await?;
            out.flush().await?;

            stats.records += 1;
            stats.bytes += record.payload.len() as u64;
            prev = Some(record.time);
        }

        debug!("replayed {} records ({} bytes)", stats.records, stats.bytes);
        Ok(stats)
    }
}
