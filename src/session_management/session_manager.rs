use crate::configuration::config::Config;
use crate::endpoint::channel::{SessionChannel, TargetConnection, TargetConnector};
use crate::endpoint::types::Endpoint;
use crate::error_handling::types::SessionError;
use crate::session_management::session::Session;
use crate::session_management::session_proxy::{ProxyOptions, SessionProxy};
use crate::SessionStatus;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Kind of channel opened on the target connection.
pub const SESSION_CHANNEL_KIND: &str = "session";

/// The structure related to session management
///
/// Takes an established client endpoint through setup (dialing the target and
/// opening its session channel), runs the [`SessionProxy`], then releases the
/// outbound connection.
///
/// # Fields Overview
///
/// - `connector`: dials the fixed backend for every new session
/// - `config`: capture location and relay tuning
/// - `active_sessions`: sessions currently in setup or relaying
pub struct SessionManager<K> {
    connector: K,
    config: Config,
    active_sessions: Mutex<HashMap<Uuid, Session>>,
}

impl<K: TargetConnector> SessionManager<K> {
    pub fn new(connector: K, config: Config) -> Self {
        Self {
            connector,
            config,
            active_sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Proxies one client session until either side goes away and returns
    /// the closed session record.
    ///
    /// Setup failures are logged and close the client channel; they are not
    /// retried. The session leaves the registry even if this future is
    /// dropped before it completes.
    pub async fn handle_session<C: SessionChannel>(&self, client: Endpoint<C>) -> Session {
        let mut session = Session::new();
        let session_id = session.id;
        session.capture_path = Some(self.config.capture.path_for(session_id));

        let registration = match self.register(session.clone()) {
            Ok(registration) => registration,
            Err(e) => {
                warn!("[{}] Rejecting session: {}", session_id, e);
                let _ = client.channel.close().await;
                session.advance(SessionStatus::Teardown);
                return session;
            }
        };

        match self.setup_target().await {
            Ok((connection, target)) => {
                info!("[{}] Target connection established", session_id);

                let options = ProxyOptions::from_config(&self.config, session_id);
                match SessionProxy::new(session_id, client, target, options)
                    .setup()
                    .await
                {
                    Ok(relay) => {
                        self.advance(session_id, SessionStatus::Relaying);
                        relay.run().await;
                    }
                    Err(e) => error!("[{}] Session setup failed: {}", session_id, e),
                }

                if let Err(e) = connection.close().await {
                    debug!("[{}] target connection close: {}", session_id, e);
                }
            }
            Err(e) => {
                error!("[{}] Session setup failed: {}", session_id, e);
                let _ = client.channel.close().await;
            }
        }

        registration.finish().unwrap_or(session)
    }

    pub fn get_active_session_count(&self) -> usize {
        self.sessions().len()
    }

    /// Snapshot of the sessions currently in setup or relaying.
    pub fn active_sessions(&self) -> Vec<Session> {
        self.sessions().values().cloned().collect()
    }

    async fn setup_target(
        &self,
    ) -> Result<
        (
            K::Connection,
            Endpoint<<K::Connection as TargetConnection>::Channel>,
        ),
        SessionError,
    > {
        let connection = self.connector.connect().await?;
        match connection.open_channel(SESSION_CHANNEL_KIND, &[]).await {
            Ok(target) => Ok((connection, target)),
            Err(e) => {
                let _ = connection.close().await;
                Err(e)
            }
        }
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Session>> {
        self.active_sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(&self, session: Session) -> Result<Registration<'_, K>, SessionError> {
        let mut sessions = self.sessions();
        let limit = self.config.relay.max_sessions;
        if limit > 0 && sessions.len() >= limit {
            return Err(SessionError::SessionLimitReached);
        }
        let session_id = session.id;
        sessions.insert(session_id, session);
        Ok(Registration {
            manager: self,
            session_id,
            retired: false,
        })
    }

    fn advance(&self, session_id: Uuid, next: SessionStatus) {
        if let Some(session) = self.sessions().get_mut(&session_id) {
            session.advance(next);
        }
    }

    /// Moves the session to `Teardown` and drops it from the registry.
    fn retire(&self, session_id: Uuid) -> Option<Session> {
        let mut session = self.sessions().remove(&session_id)?;
        session.advance(SessionStatus::Teardown);
        info!(
            "[{}] Session closed after {}s",
            session_id,
            session.duration().num_seconds()
        );
        Some(session)
    }
}

/// Keeps a session in the registry for as long as it is being handled.
struct Registration<'a, K: TargetConnector> {
    manager: &'a SessionManager<K>,
    session_id: Uuid,
    retired: bool,
}

impl<K: TargetConnector> Registration<'_, K> {
    fn finish(mut self) -> Option<Session> {
        self.retired = true;
        self.manager.retire(self.session_id)
    }
}

impl<K: TargetConnector> Drop for Registration<'_, K> {
    fn drop(&mut self) {
        if self.retired {
            return;
        }
        warn!("[{}] Session abandoned before teardown", self.session_id);
        self.manager.retire(self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::types::CaptureConfig;
    use crate::endpoint::memory::{pair, MemoryChannel};
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    #[derive(Clone, Copy, PartialEq)]
    enum Failure {
        None,
        Connect,
        /// `connect` never resolves.
        Hang,
        OpenChannel,
    }

    /// Hands out pre-built target endpoints.
    struct TestConnector {
        targets: Mutex<Vec<Endpoint<MemoryChannel>>>,
        failure: Failure,
        connections_closed: Arc<AtomicUsize>,
    }

    struct TestConnection {
        target: Mutex<Option<Endpoint<MemoryChannel>>>,
        failure: Failure,
        closed: AtomicBool,
        connections_closed: Arc<AtomicUsize>,
    }

    impl TestConnector {
        fn new(targets: Vec<Endpoint<MemoryChannel>>, failure: Failure) -> Self {
            Self {
                targets: Mutex::new(targets),
                failure,
                connections_closed: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl TargetConnector for TestConnector {
        type Connection = TestConnection;

        async fn connect(&self) -> Result<TestConnection, SessionError> {
            if self.failure == Failure::Connect {
                return Err(SessionError::ConnectFailed("connection refused".to_string()));
            }
            if self.failure == Failure::Hang {
                std::future::pending::<()>().await;
            }
            Ok(TestConnection {
                target: Mutex::new(self.targets.lock().unwrap().pop()),
                failure: self.failure,
                closed: AtomicBool::new(false),
                connections_closed: self.connections_closed.clone(),
            })
        }
    }

    impl TargetConnection for TestConnection {
        type Channel = MemoryChannel;

        async fn open_channel(
            &self,
            kind: &str,
            _extra: &[u8],
        ) -> Result<Endpoint<MemoryChannel>, SessionError> {
            assert_eq!(kind, SESSION_CHANNEL_KIND);
            if self.failure == Failure::OpenChannel {
                return Err(SessionError::ChannelOpenFailed(
                    "administratively prohibited".to_string(),
                ));
            }
            self.target
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| SessionError::ChannelOpenFailed("no target left".to_string()))
        }

        async fn close(&self) -> io::Result<()> {
            if !self.closed.swap(true, Ordering::SeqCst) {
                self.connections_closed.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    fn config_in(dir: &TempDir) -> Config {
        Config {
            capture: CaptureConfig {
                path: dir.path().to_path_buf(),
                per_session: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn capture_files(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path()).unwrap().count()
    }

    #[tokio::test]
    async fn test_connect_failure_aborts_session() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = TempDir::new().unwrap();
        let manager = SessionManager::new(TestConnector::new(Vec::new(), Failure::Connect), config_in(&dir));
        let (client, mut user) = pair();

        timeout(Duration::from_secs(2), manager.handle_session(client))
            .await
            .expect("setup failure must not hang");

        let mut buf = [0u8; 4];
        assert_eq!(user.channel.read(&mut buf).await.unwrap(), 0);
        assert!(user.requests.recv().await.is_none());
        assert_eq!(manager.get_active_session_count(), 0);
        assert_eq!(capture_files(&dir), 0);
    }

    #[tokio::test]
    async fn test_channel_open_failure_closes_connection() {
        let dir = TempDir::new().unwrap();
        let connector = TestConnector::new(Vec::new(), Failure::OpenChannel);
        let connections_closed = connector.connections_closed.clone();
        let manager = SessionManager::new(connector, config_in(&dir));
        let (client, user) = pair();

        timeout(Duration::from_secs(2), manager.handle_session(client))
            .await
            .expect("setup failure must not hang");

        let mut buf = [0u8; 4];
        assert_eq!(user.channel.read(&mut buf).await.unwrap(), 0);
        assert_eq!(connections_closed.load(Ordering::SeqCst), 1);
        assert_eq!(capture_files(&dir), 0);
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let dir = TempDir::new().unwrap();
        let (target, backend) = pair();
        let connector = TestConnector::new(vec![target], Failure::None);
        let connections_closed = connector.connections_closed.clone();
        let manager = Arc::new(SessionManager::new(connector, config_in(&dir)));
        let (client, user) = pair();

        let running = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.handle_session(client).await })
        };

        backend.channel.write(b"$ ").await.unwrap();
        let mut buf = [0u8; 8];
        let n = user.channel.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"$ ");

        let sessions = manager.active_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, SessionStatus::Relaying);
        let capture = sessions[0].capture_path.clone().unwrap();

        user.channel.close().await.unwrap();
        let closed = timeout(Duration::from_secs(2), running)
            .await
            .expect("session did not end")
            .unwrap();
        assert_eq!(closed.status, SessionStatus::Teardown);
        assert!(closed.relay_start.is_some());

        assert_eq!(manager.get_active_session_count(), 0);
        assert_eq!(connections_closed.load(Ordering::SeqCst), 1);
        assert!(backend.channel.read(&mut buf).await.unwrap() == 0);
        assert_eq!(std::fs::metadata(capture).unwrap().len(), 12 + 2);
    }

    #[tokio::test]
    async fn test_session_limit() {
        let dir = TempDir::new().unwrap();
        let (target, _backend) = pair();
        let mut config = config_in(&dir);
        config.relay.max_sessions = 1;
        let manager = Arc::new(SessionManager::new(
            TestConnector::new(vec![target], Failure::None),
            config,
        ));

        let (first, first_user) = pair();
        let running = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.handle_session(first).await })
        };
        timeout(Duration::from_secs(2), async {
            while manager.get_active_session_count() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let (second, second_user) = pair();
        timeout(Duration::from_secs(2), manager.handle_session(second))
            .await
            .expect("rejection must not hang");
        let mut buf = [0u8; 4];
        assert_eq!(second_user.channel.read(&mut buf).await.unwrap(), 0);
        assert_eq!(manager.get_active_session_count(), 1);

        first_user.channel.close().await.unwrap();
        timeout(Duration::from_secs(2), running).await.unwrap().unwrap();
        assert_eq!(manager.get_active_session_count(), 0);
    }

    #[tokio::test]
    async fn test_capture_failure_never_relays() {
        let (target, backend) = pair();
        let connector = TestConnector::new(vec![target], Failure::None);
        let connections_closed = connector.connections_closed.clone();
        let config = Config {
            capture: CaptureConfig {
                path: "/nonexistent/dir/session.ttyrec".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        let manager = SessionManager::new(connector, config);
        let (client, user) = pair();

        let closed = timeout(Duration::from_secs(2), manager.handle_session(client))
            .await
            .expect("setup failure must not hang");

        assert_eq!(closed.status, SessionStatus::Teardown);
        assert!(closed.relay_start.is_none());
        assert!(closed.end_time.is_some());

        let mut buf = [0u8; 4];
        assert_eq!(user.channel.read(&mut buf).await.unwrap(), 0);
        assert_eq!(backend.channel.read(&mut buf).await.unwrap(), 0);
        assert_eq!(connections_closed.load(Ordering::SeqCst), 1);
        assert_eq!(manager.get_active_session_count(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_session_leaves_registry() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.relay.max_sessions = 1;
        let manager = SessionManager::new(TestConnector::new(Vec::new(), Failure::Hang), config);

        let (client, _user) = pair();
        assert!(timeout(Duration::from_millis(50), manager.handle_session(client))
            .await
            .is_err());
        assert_eq!(manager.get_active_session_count(), 0);

        // The slot is free again: the next session is admitted, not rejected.
        let (client, _user) = pair();
        let pending = manager.handle_session(client);
        tokio::pin!(pending);
        assert!(timeout(Duration::from_millis(50), &mut pending).await.is_err());
        assert_eq!(manager.get_active_session_count(), 1);
    }
}
