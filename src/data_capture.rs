//! Session capture in ttyrec format.
//!
//! - [`ttyrec`]: record layout, streaming reader and summaries.
//! - [`recording_channel`]: channel decorator that records every write.
//! - [`replay`]: timed playback of a capture.

pub mod recording_channel;
pub mod replay;
pub mod ttyrec;

pub use recording_channel::{open_capture, RecordingChannel};
pub use replay::Replayer;
pub use ttyrec::{CaptureReader, CaptureRecord, CaptureSummary, RecordTime};
