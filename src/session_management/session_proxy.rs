//! The session relay.
//!
//! ```text
//!            Flow A: target -> recording wrapper -> client
//!   client  <=============================================>  target
//!            Flow B: client -> target
//!
//!   client requests --\                      /--> forwarded to target
//!   target requests ---+--> event queue --> control loop
//!   flow A/B ended  --/                      \--> forwarded to client
//! ```
//!
//! The copy flows and the request pumps run as spawned tasks feeding one
//! event queue. The control loop runs on the caller's task and stops at the
//! first hangup, flow end or forward failure, after which both channels are
//! closed exactly once. Closing the channels is what unblocks the flows
//! still running.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, error, info, trace};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use uuid::Uuid;

use super::shutdown::{ShutdownCoordinator, ShutdownGuard};
use crate::configuration::config::Config;
use crate::configuration::types::{
    DEFAULT_CAPTURE_MODE, DEFAULT_COPY_BUFFER_SIZE, DEFAULT_EVENT_QUEUE_DEPTH,
};
use crate::data_capture::recording_channel::{open_capture, RecordingChannel};
use crate::endpoint::channel::{copy_channel, SessionChannel};
use crate::endpoint::types::{ControlRequest, Direction, Endpoint, Side};
use crate::error_handling::types::{ChannelError, SessionError};

#[derive(Debug, Clone, PartialEq)]
pub struct ProxyOptions {
    pub capture_path: PathBuf,
    pub capture_mode: u32,
    pub copy_buffer_size: usize,
    pub event_queue_depth: usize,
}

impl ProxyOptions {
    pub fn new<P: Into<PathBuf>>(capture_path: P) -> Self {
        Self {
            capture_path: capture_path.into(),
            capture_mode: DEFAULT_CAPTURE_MODE,
            copy_buffer_size: DEFAULT_COPY_BUFFER_SIZE,
            event_queue_depth: DEFAULT_EVENT_QUEUE_DEPTH,
        }
    }

    pub fn from_config(config: &Config, session_id: Uuid) -> Self {
        Self {
            capture_path: config.capture.path_for(session_id),
            capture_mode: config.capture.mode,
            copy_buffer_size: config.relay.copy_buffer_size,
            event_queue_depth: config.relay.event_queue_depth,
        }
    }
}

/// Everything the control loop waits on.
#[derive(Debug)]
enum ProxyEvent {
    Request(Side, ControlRequest),
    /// A side's request stream ended: the remote hung up.
    RequestsClosed(Side),
    FlowEnded(Direction),
}

#[derive(Debug)]
enum LoopExit {
    RequestsClosed(Side),
    FlowEnded(Direction),
    ForwardFailed(Side, ChannelError),
    /// Every event source is gone.
    Drained,
}

impl fmt::Display for LoopExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopExit::RequestsClosed(side) => write!(f, "{} hung up", side),
            LoopExit::FlowEnded(direction) => write!(f, "{} flow ended", direction),
            LoopExit::ForwardFailed(origin, e) => {
                write!(f, "forwarding {} request to {} failed: {}", origin, origin.opposite(), e)
            }
            LoopExit::Drained => write!(f, "all event sources closed"),
        }
    }
}

/// Relays one established session between `client` and `target`, recording
/// the target -> client stream.
pub struct SessionProxy<C, T> {
    session_id: Uuid,
    client: Endpoint<C>,
    target: Endpoint<T>,
    options: ProxyOptions,
}

impl<C: SessionChannel, T: SessionChannel> SessionProxy<C, T> {
    pub fn new(
        session_id: Uuid,
        client: Endpoint<C>,
        target: Endpoint<T>,
        options: ProxyOptions,
    ) -> Self {
        Self {
            session_id,
            client,
            target,
            options,
        }
    }

    /// Runs the relay to completion. Both channels are closed when this
    /// returns, whatever ended the session.
    pub async fn run(self) {
        let session_id = self.session_id;
        match self.setup().await {
            Ok(relay) => relay.run().await,
            Err(e) => error!("[{}] Session setup failed: {}", session_id, e),
        }
    }

    /// Opens the capture and wraps the client channel. On failure both
    /// channels are closed before the error is returned.
    pub async fn setup(self) -> Result<SessionRelay<C, T>, SessionError> {
        let Self {
            session_id,
            client,
            target,
            options,
        } = self;

        let capture = match open_capture(&options.capture_path, options.capture_mode).await {
            Ok(file) => file,
            Err(e) => {
                if let Err(e) = client.channel.close().await {
                    debug!("[{}] client channel close: {}", session_id, e);
                }
                if let Err(e) = target.channel.close().await {
                    debug!("[{}] target channel close: {}", session_id, e);
                }
                return Err(SessionError::CaptureError(e));
            }
        };

        let client_channel = RecordingChannel::new(
            client.channel,
            capture,
            options.capture_path.clone(),
        );
        Ok(SessionRelay {
            session_id,
            client: Arc::new(client_channel),
            client_requests: client.requests,
            target: Arc::new(target.channel),
            target_requests: target.requests,
            options,
        })
    }
}

/// A session whose capture is open, ready to relay.
pub struct SessionRelay<C, T> {
    session_id: Uuid,
    client: Arc<RecordingChannel<C>>,
    client_requests: mpsc::Receiver<ControlRequest>,
    target: Arc<T>,
    target_requests: mpsc::Receiver<ControlRequest>,
    options: ProxyOptions,
}

impl<C: SessionChannel, T: SessionChannel> SessionRelay<C, T> {
    /// Relays until the first hangup, flow end or forward failure, then
    /// closes both channels.
    pub async fn run(self) {
        let Self {
            session_id,
            client,
            client_requests,
            target,
            target_requests,
            options,
        } = self;

        let coordinator = Arc::new(ShutdownCoordinator::new(
            session_id,
            client.clone(),
            target.clone(),
        ));
        let guard = ShutdownGuard::new(coordinator.clone());

        let (events_tx, mut events_rx) = mpsc::channel(options.event_queue_depth.max(1));
        let mut tasks = JoinSet::new();
        tasks.spawn(relay_flow(
            session_id,
            Direction::TargetToClient,
            target.clone(),
            client.clone(),
            options.copy_buffer_size,
            coordinator.clone(),
            events_tx.clone(),
        ));
        tasks.spawn(relay_flow(
            session_id,
            Direction::ClientToTarget,
            client.clone(),
            target.clone(),
            options.copy_buffer_size,
            coordinator.clone(),
            events_tx.clone(),
        ));
        tasks.spawn(pump_requests(Side::Client, client_requests, events_tx.clone()));
        tasks.spawn(pump_requests(Side::Target, target_requests, events_tx));

        info!("[{}] Relaying session", session_id);
        let exit = control_loop(session_id, &mut events_rx, &*client, &*target).await;
        info!("[{}] Relay stopping: {}", session_id, exit);

        guard.finish().await;
        drop(events_rx);
        tasks.shutdown().await;
        info!(
            "[{}] Session torn down, {} bytes recorded to {}",
            session_id,
            client.bytes_recorded(),
            client.path().display()
        );
    }
}

async fn relay_flow<S, D, A, B>(
    session_id: Uuid,
    direction: Direction,
    src: Arc<S>,
    dst: Arc<D>,
    buffer_size: usize,
    coordinator: Arc<ShutdownCoordinator<A, B>>,
    events: mpsc::Sender<ProxyEvent>,
) where
    S: SessionChannel,
    D: SessionChannel,
    A: SessionChannel,
    B: SessionChannel,
{
    match copy_channel(&*src, &*dst, buffer_size).await {
        Ok(total) => debug!("[{}] {} reached EOF after {} bytes", session_id, direction, total),
        Err(e) => debug!("[{}] {} stopped: {}", session_id, direction, e),
    }
    coordinator.request_shutdown().await;
    let _ = events.send(ProxyEvent::FlowEnded(direction)).await;
}

async fn pump_requests(
    side: Side,
    mut requests: mpsc::Receiver<ControlRequest>,
    events: mpsc::Sender<ProxyEvent>,
) {
    while let Some(request) = requests.recv().await {
        if events.send(ProxyEvent::Request(side, request)).await.is_err() {
            return;
        }
    }
    let _ = events.send(ProxyEvent::RequestsClosed(side)).await;
}

async fn control_loop<A, B>(
    session_id: Uuid,
    events: &mut mpsc::Receiver<ProxyEvent>,
    client: &A,
    target: &B,
) -> LoopExit
where
    A: SessionChannel,
    B: SessionChannel,
{
    while let Some(event) = events.recv().await {
        match event {
            ProxyEvent::Request(origin, request) => {
                debug!(
                    "[{}] {} request '{}' want_reply={} ({} bytes)",
                    session_id,
                    origin,
                    request.req_type,
                    request.want_reply,
                    request.payload.len()
                );
                let forwarded = match origin.opposite() {
                    Side::Target => forward_request(request, target).await,
                    Side::Client => forward_request(request, client).await,
                };
                if let Err(e) = forwarded {
                    return LoopExit::ForwardFailed(origin, e);
                }
            }
            ProxyEvent::RequestsClosed(side) => return LoopExit::RequestsClosed(side),
            ProxyEvent::FlowEnded(direction) => return LoopExit::FlowEnded(direction),
        }
    }
    LoopExit::Drained
}

/// Sends `request` on `to` and answers it on its origin with the result.
async fn forward_request<D: SessionChannel>(
    request: ControlRequest,
    to: &D,
) -> Result<(), ChannelError> {
    let accepted = to
        .send_request(&request.req_type, request.want_reply, &request.payload)
        .await?;
    if let Err(e) = request.reply(accepted) {
        trace!("reply not delivered: {}", e);
    }
    Ok(())
}
