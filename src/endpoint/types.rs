//! Common data types shared by endpoints and the proxy.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::error_handling::types::ChannelError;

/// One of the two sides of a proxied session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// The inbound connection.
    Client,
    /// The outbound connection to the real destination.
    Target,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Client => Side::Target,
            Side::Target => Side::Client,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Client => write!(f, "client"),
            Side::Target => write!(f, "target"),
        }
    }
}

/// Direction of a byte-copy flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Keystrokes and other input travelling to the target.
    ClientToTarget,
    /// Output travelling back to the client. This is the recorded direction.
    TargetToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToTarget => write!(f, "client->target"),
            Direction::TargetToClient => write!(f, "target->client"),
        }
    }
}

/// An out-of-band protocol message (exec, keepalive, window-change, ...).
///
/// The reply sink is bound to the side the request arrived on, so answering
/// always goes back where the request came from.
#[derive(Debug)]
pub struct ControlRequest {
    pub req_type: String,
    pub want_reply: bool,
    pub payload: Vec<u8>,
    reply_tx: Option<oneshot::Sender<bool>>,
}

impl ControlRequest {
    /// Builds a request and, when `want_reply` is set, the receiver its
    /// answer will arrive on.
    pub fn new(
        req_type: impl Into<String>,
        want_reply: bool,
        payload: Vec<u8>,
    ) -> (Self, Option<oneshot::Receiver<bool>>) {
        let (reply_tx, reply_rx) = if want_reply {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let request = Self {
            req_type: req_type.into(),
            want_reply,
            payload,
            reply_tx,
        };
        (request, reply_rx)
    }

    /// Answers the request. A no-op for requests that did not want a reply.
    pub fn reply(mut self, ok: bool) -> Result<(), ChannelError> {
        match self.reply_tx.take() {
            Some(tx) => tx.send(ok).map_err(|_| ChannelError::Closed),
            None => Ok(()),
        }
    }
}

/// An established session endpoint.
pub struct Endpoint<C> {
    pub channel: C,
    /// Yields `None` once the remote side hangs up.
    pub requests: mpsc::Receiver<ControlRequest>,
}

impl<C> Endpoint<C> {
    pub fn new(channel: C, requests: mpsc::Receiver<ControlRequest>) -> Self {
        Self { channel, requests }
    }
}
