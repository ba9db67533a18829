use std::future::Future;
use std::io;

use log::trace;

use super::types::Endpoint;
use crate::error_handling::types::{ChannelError, SessionError};

/// A bidirectional, order-preserving byte channel of an established session.
///
/// Handles are shared between the two copy flows and the shutdown path, so
/// every operation takes `&self`. Implementations must allow one reader and
/// one writer to run concurrently, and `close` must make pending and future
/// reads on this handle return `Ok(0)` so the flows blocked on them unwind.
/// `close` must likewise fail a pending [`send_request`](Self::send_request)
/// that is waiting for a reply: the proxy's control loop relies on it to
/// leave a forward once teardown has begun.
pub trait SessionChannel: Send + Sync + 'static {
    /// Reads into `buf`, returning `Ok(0)` at end of stream.
    fn read(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;

    fn write(&self, buf: &[u8]) -> impl Future<Output = io::Result<usize>> + Send;

    fn close(&self) -> impl Future<Output = io::Result<()>> + Send;

    /// Sends an out-of-band request to the peer. When `want_reply` is set
    /// this waits for the answer; otherwise it returns `Ok(false)` as soon
    /// as the request is queued. Returns an error instead of waiting once
    /// this handle is closed.
    fn send_request(
        &self,
        req_type: &str,
        want_reply: bool,
        payload: &[u8],
    ) -> impl Future<Output = Result<bool, ChannelError>> + Send;
}

/// Dials the fixed backend. Authentication is the implementor's business.
pub trait TargetConnector: Send + Sync + 'static {
    type Connection: TargetConnection;

    fn connect(&self) -> impl Future<Output = Result<Self::Connection, SessionError>> + Send;
}

/// An authenticated outbound connection.
pub trait TargetConnection: Send + Sync + 'static {
    type Channel: SessionChannel;

    fn open_channel(
        &self,
        kind: &str,
        extra: &[u8],
    ) -> impl Future<Output = Result<Endpoint<Self::Channel>, SessionError>> + Send;

    fn close(&self) -> impl Future<Output = io::Result<()>> + Send;
}

/// Copies `src` into `dst` until end of stream, returning the byte count.
///
/// Short writes are retried until the whole chunk is delivered; a write that
/// accepts nothing is reported as [`io::ErrorKind::WriteZero`].
pub async fn copy_channel<S, D>(src: &S, dst: &D, buffer_size: usize) -> io::Result<u64>
where
    S: SessionChannel,
    D: SessionChannel,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut total: u64 = 0;
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }

        let mut written = 0;
        while written < n {
            let m = dst.write(&buf[written..n]).await?;
            if m == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "channel accepted no bytes",
                ));
            }
            written += m;
        }
        total += n as u64;
        trace!("copied {} bytes ({} total)", n, total);
    }
}
