pub mod types;

pub use types::{CaptureError, ChannelError, ConfigError, SessionError};
