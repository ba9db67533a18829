//! In-process session endpoints.
//!
//! [`pair`] returns two connected endpoints: bytes written on one channel are
//! read on the other, and requests sent on one channel arrive on the other
//! endpoint's request stream. Closing a channel ends the peer's byte stream
//! and request stream, the same way a remote hangup would.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;

use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch, Mutex};

use super::channel::SessionChannel;
use super::types::{ControlRequest, Endpoint};
use crate::error_handling::types::ChannelError;

pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;
pub const DEFAULT_REQUEST_DEPTH: usize = 32;

pub struct MemoryChannel {
    label: String,
    reader: Mutex<Option<ReadHalf<DuplexStream>>>,
    writer: Mutex<Option<WriteHalf<DuplexStream>>>,
    /// Feeds the peer endpoint's request stream.
    peer_requests: StdMutex<Option<mpsc::Sender<ControlRequest>>>,
    closed: watch::Sender<bool>,
    close_calls: AtomicUsize,
}

/// Creates a connected pair of endpoints with default buffer sizes.
pub fn pair() -> (Endpoint<MemoryChannel>, Endpoint<MemoryChannel>) {
    pair_with_capacity(DEFAULT_PIPE_CAPACITY, DEFAULT_REQUEST_DEPTH)
}

pub fn pair_with_capacity(
    pipe_capacity: usize,
    request_depth: usize,
) -> (Endpoint<MemoryChannel>, Endpoint<MemoryChannel>) {
    let (near_io, far_io) = tokio::io::duplex(pipe_capacity);
    let (to_near, near_requests) = mpsc::channel(request_depth);
    let (to_far, far_requests) = mpsc::channel(request_depth);

    let near = MemoryChannel::new("near", near_io, to_far);
    let far = MemoryChannel::new("far", far_io, to_near);

    (
        Endpoint::new(near, near_requests),
        Endpoint::new(far, far_requests),
    )
}

impl MemoryChannel {
    fn new(label: &str, io: DuplexStream, peer_requests: mpsc::Sender<ControlRequest>) -> Self {
        let (reader, writer) = tokio::io::split(io);
        let (closed, _) = watch::channel(false);
        Self {
            label: label.to_string(),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            peer_requests: StdMutex::new(Some(peer_requests)),
            closed,
            close_calls: AtomicUsize::new(0),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Number of times `close` has been called on this handle.
    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    fn request_sender(&self) -> Option<mpsc::Sender<ControlRequest>> {
        self.peer_requests.lock().ok().and_then(|guard| guard.clone())
    }

    fn drop_request_sender(&self) {
        if let Ok(mut guard) = self.peer_requests.lock() {
            guard.take();
        }
    }
}

async fn closed_signal(rx: &mut watch::Receiver<bool>) {
    loop {
        let closed = *rx.borrow_and_update();
        if closed || rx.changed().await.is_err() {
            return;
        }
    }
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "channel closed")
}

impl SessionChannel for MemoryChannel {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut closed = self.closed.subscribe();
        tokio::select! {
            _ = closed_signal(&mut closed) => Ok(0),
            res = async {
                let mut reader = self.reader.lock().await;
                match reader.as_mut() {
                    Some(r) => r.read(buf).await,
                    None => Ok(0),
                }
            } => res,
        }
    }

    async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut closed = self.closed.subscribe();
        tokio::select! {
            _ = closed_signal(&mut closed) => Err(broken_pipe()),
            res = async {
                let mut writer = self.writer.lock().await;
                match writer.as_mut() {
                    Some(w) => w.write(buf).await,
                    None => Err(broken_pipe()),
                }
            } => res,
        }
    }

    async fn close(&self) -> io::Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        let already_closed = self.closed.send_replace(true);
        self.drop_request_sender();

        // Pending reads and writes observe `closed` and release their locks.
        let writer = self.writer.lock().await.take();
        let reader = self.reader.lock().await.take();
        if let Some(mut w) = writer {
            let _ = w.shutdown().await;
        }
        drop(reader);

        if already_closed {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "channel already closed",
            ));
        }
        debug!("memory channel '{}' closed", self.label);
        Ok(())
    }

    async fn send_request(
        &self,
        req_type: &str,
        want_reply: bool,
        payload: &[u8],
    ) -> Result<bool, ChannelError> {
        let tx = self.request_sender().ok_or(ChannelError::Closed)?;
        let (request, reply_rx) = ControlRequest::new(req_type, want_reply, payload.to_vec());
        tx.send(request).await.map_err(|_| ChannelError::Closed)?;
        drop(tx);

        let Some(reply_rx) = reply_rx else {
            return Ok(false);
        };
        let mut closed = self.closed.subscribe();
        tokio::select! {
            _ = closed_signal(&mut closed) => Err(ChannelError::Closed),
            reply = reply_rx => reply.map_err(|_| ChannelError::NoReply),
        }
    }
}
