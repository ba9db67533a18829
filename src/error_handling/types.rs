use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::InvalidValue(e) => write!(f, "Invalid configuration value: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::TomlError(err.to_string())
    }
}

/// Failures of a session endpoint's out-of-band request path.
#[derive(Debug)]
pub enum ChannelError {
    /// The channel (or its request stream) is closed.
    Closed,
    /// The peer dropped the request without answering it.
    NoReply,
    IoError(std::io::Error),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::Closed => write!(f, "Channel closed"),
            ChannelError::NoReply => write!(f, "Request dropped without reply"),
            ChannelError::IoError(e) => write!(f, "Channel IO error: {}", e),
        }
    }
}

impl std::error::Error for ChannelError {}

impl From<std::io::Error> for ChannelError {
    fn from(err: std::io::Error) -> Self {
        ChannelError::IoError(err)
    }
}

#[derive(Debug)]
pub enum CaptureError {
    OpenFailed(std::io::Error),
    IoError(std::io::Error),
    /// The capture ends in the middle of a record.
    TruncatedRecord { offset: u64 },
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::OpenFailed(e) => write!(f, "Unable to open capture file: {}", e),
            CaptureError::IoError(e) => write!(f, "Capture IO error: {}", e),
            CaptureError::TruncatedRecord { offset } => {
                write!(f, "Truncated capture record at offset {}", offset)
            }
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::IoError(err)
    }
}

#[derive(Debug)]
pub enum SessionError {
    ConnectFailed(String),
    ChannelOpenFailed(String),
    CaptureError(CaptureError),
    SessionLimitReached,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::ConnectFailed(e) => write!(f, "Target connection failed: {}", e),
            SessionError::ChannelOpenFailed(e) => write!(f, "Target channel open failed: {}", e),
            SessionError::CaptureError(e) => write!(f, "Capture error: {}", e),
            SessionError::SessionLimitReached => write!(f, "Session limit reached"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<CaptureError> for SessionError {
    fn from(err: CaptureError) -> Self {
        SessionError::CaptureError(err)
    }
}
