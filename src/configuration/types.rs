use crate::error_handling::types::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

pub const DEFAULT_CAPTURE_PATH: &str = "session.ttyrec";
pub const DEFAULT_CAPTURE_MODE: u32 = 0o640;
pub const DEFAULT_COPY_BUFFER_SIZE: usize = 32 * 1024;
pub const DEFAULT_EVENT_QUEUE_DEPTH: usize = 64;
pub const MIN_REPLAY_SPEED: f64 = 0.001;
pub const MAX_REPLAY_SPEED: f64 = 1000.0;
pub const MAX_IDLE_SECS: f64 = 86_400.0;

/// Where and how the target -> client stream is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Capture file, or the directory holding one file per session when
    /// `per_session` is set.
    pub path: PathBuf,
    /// Permission bits used when the file is created.
    pub mode: u32,
    pub per_session: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_CAPTURE_PATH),
            mode: DEFAULT_CAPTURE_MODE,
            per_session: false,
        }
    }
}

impl CaptureConfig {
    /// Resolves the capture file for one session.
    pub fn path_for(&self, session_id: Uuid) -> PathBuf {
        if self.per_session {
            self.path.join(format!("{}.ttyrec", session_id))
        } else {
            self.path.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Size of the buffer each copy flow reads into.
    pub copy_buffer_size: usize,
    /// Capacity of the proxy's event queue.
    pub event_queue_depth: usize,
    /// Maximum concurrent sessions, `0` means unlimited.
    pub max_sessions: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            copy_buffer_size: DEFAULT_COPY_BUFFER_SIZE,
            event_queue_depth: DEFAULT_EVENT_QUEUE_DEPTH,
            max_sessions: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Playback speed multiplier, `2.0` plays twice as fast.
    pub speed: f64,
    /// Upper bound on any single pause between records.
    pub max_idle_secs: Option<f64>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            max_idle_secs: None,
        }
    }
}

impl ReplayConfig {
    /// Rejects values that would make replay delays meaningless or overflow.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_REPLAY_SPEED..=MAX_REPLAY_SPEED).contains(&self.speed) {
            return Err(ConfigError::InvalidValue(format!(
                "replay.speed must be between {} and {}, got {}",
                MIN_REPLAY_SPEED, MAX_REPLAY_SPEED, self.speed
            )));
        }
        if let Some(idle) = self.max_idle_secs {
            if !(0.0..=MAX_IDLE_SECS).contains(&idle) {
                return Err(ConfigError::InvalidValue(format!(
                    "replay.max_idle_secs must be between 0 and {}, got {}",
                    MAX_IDLE_SECS, idle
                )));
            }
        }
        Ok(())
    }
}
