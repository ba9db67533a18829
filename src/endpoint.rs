//! Session endpoints.
//!
//! An endpoint is what the transport layer hands to the relay once a session
//! is established on one side: a byte-stream [`SessionChannel`] plus the
//! receiving end of that side's out-of-band [`ControlRequest`] stream.
//!
//! The transport itself (handshake, authentication, dialing the target) is
//! not part of this crate. It plugs in by implementing [`SessionChannel`] and,
//! for the outbound side, [`TargetConnector`] / [`TargetConnection`].
//! [`memory`] provides a connected in-process pair.

pub mod channel;
pub mod memory;
pub mod types;

pub use channel::{copy_channel, SessionChannel, TargetConnection, TargetConnector};
pub use memory::MemoryChannel;
pub use types::{ControlRequest, Direction, Endpoint, Side};
