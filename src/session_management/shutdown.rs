//! Exactly-once teardown of a session's two channels.
//!
//! Both copy flows and the control loop may ask for shutdown, in any order
//! and at the same time. [`ShutdownCoordinator::request_shutdown`] starts the
//! close sequence on the first call only; every later or concurrent caller
//! waits for that sequence to finish and then returns.
//!
//! The sequence runs in its own task. Cancelling whichever caller started it
//! does not cut it short, and nobody starts it a second time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::runtime::Handle;
use tokio::sync::watch;
use uuid::Uuid;

use crate::endpoint::channel::SessionChannel;

pub struct ShutdownCoordinator<A, B> {
    session_id: Uuid,
    client: Arc<A>,
    target: Arc<B>,
    started: AtomicBool,
    done: Arc<watch::Sender<bool>>,
}

impl<A: SessionChannel, B: SessionChannel> ShutdownCoordinator<A, B> {
    pub fn new(session_id: Uuid, client: Arc<A>, target: Arc<B>) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            session_id,
            client,
            target,
            started: AtomicBool::new(false),
            done: Arc::new(done),
        }
    }

    /// Closes the client channel, then the target channel. Close errors are
    /// logged and dropped.
    pub async fn request_shutdown(&self) {
        self.start(&Handle::current());
        let mut done = self.done.subscribe();
        // The sender lives as long as `self`, so this only ends on `true`.
        let _ = done.wait_for(|closed| *closed).await;
    }

    /// Whether the close sequence has been started.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Whether both channels have been closed.
    pub fn is_shut_down(&self) -> bool {
        *self.done.borrow()
    }

    /// Spawns the close sequence on `handle` unless it already runs.
    fn start(&self, handle: &Handle) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let session_id = self.session_id;
        let client = self.client.clone();
        let target = self.target.clone();
        let done = self.done.clone();
        handle.spawn(async move {
            debug!("[{}] Closing session channels", session_id);
            if let Err(e) = client.close().await {
                debug!("[{}] client channel close: {}", session_id, e);
            }
            if let Err(e) = target.close().await {
                debug!("[{}] target channel close: {}", session_id, e);
            }
            done.send_replace(true);
            info!("[{}] Session channels closed", session_id);
        });
    }
}

/// Runs the coordinator when the owning scope ends.
///
/// Call [`ShutdownGuard::finish`] on the normal path. If the guard is dropped
/// instead (panic, or the future owning it is cancelled) the close sequence
/// is started on the current runtime without waiting for it.
pub struct ShutdownGuard<A: SessionChannel, B: SessionChannel> {
    coordinator: Option<Arc<ShutdownCoordinator<A, B>>>,
}

impl<A: SessionChannel, B: SessionChannel> ShutdownGuard<A, B> {
    pub fn new(coordinator: Arc<ShutdownCoordinator<A, B>>) -> Self {
        Self {
            coordinator: Some(coordinator),
        }
    }

    pub async fn finish(mut self) {
        if let Some(coordinator) = self.coordinator.take() {
            coordinator.request_shutdown().await;
        }
    }
}

impl<A: SessionChannel, B: SessionChannel> Drop for ShutdownGuard<A, B> {
    fn drop(&mut self) {
        let Some(coordinator) = self.coordinator.take() else {
            return;
        };
        if coordinator.is_started() {
            return;
        }
        match Handle::try_current() {
            Ok(handle) => coordinator.start(&handle),
            Err(_) => warn!(
                "[{}] No runtime to close session channels on drop",
                coordinator.session_id
            ),
        }
    }
}
