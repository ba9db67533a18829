//! Interactive session relay with ttyrec capture.
//!
//! A [`SessionManager`] takes a client [`Endpoint`], dials the target through
//! a [`TargetConnector`] and runs a [`SessionProxy`] between the two. Every
//! byte the target sends toward the client is appended to a capture file
//! that [`Replayer`] and [`CaptureReader`] can read back.

pub mod configuration;
pub mod data_capture;
pub mod endpoint;
pub mod error_handling;
pub mod session_management;

pub use configuration::Config;
pub use data_capture::{CaptureReader, CaptureRecord, CaptureSummary, RecordingChannel, Replayer};
pub use endpoint::{ControlRequest, Endpoint, SessionChannel, TargetConnection, TargetConnector};
pub use session_management::{
    Session, SessionManager, SessionProxy, SessionStatus, ShutdownCoordinator, ShutdownGuard,
};
