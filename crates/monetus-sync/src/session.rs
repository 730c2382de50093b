//! Session lifecycle: role choice, connection setup, teardown.
//!
//! A [`SessionController`] runs at most one sync attempt at a time. Each
//! attempt lives in its own spawned task and is stamped with a generation
//! number; after a cancel or restart the old task's status updates no
//! longer match and are dropped.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use monetus_sync_store::SyncStore;

use crate::error::{Result, SyncError};
use crate::protocol::{Role, SyncConfig, SyncProtocol, SyncReport};
use crate::rendezvous::{self, RendezvousId};
use crate::transport::{Connection, Listener, Transport};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    /// The sync surface is open and no role has been chosen yet.
    AwaitingRole,
    /// Registering or dialing, waiting for the data channel.
    Connecting,
    /// The data channel is open and messages are being exchanged.
    Syncing,
    Success,
    Error,
}

impl SessionState {
    /// Whether a session task is in flight.
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Syncing)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::AwaitingRole => "awaiting role",
            SessionState::Connecting => "connecting",
            SessionState::Syncing => "syncing",
            SessionState::Success => "success",
            SessionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Observable session status.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    /// Incremented on every new attempt and every reset.
    pub generation: u64,
    pub state: SessionState,
    pub role: Option<Role>,
    /// The code to show (Host) or the code being dialed (Joiner).
    pub rendezvous: Option<RendezvousId>,
    /// Human-readable reason, set in the `Error` state.
    pub error: Option<String>,
    /// Set in the `Success` state.
    pub report: Option<SyncReport>,
}

impl SessionStatus {
    fn idle(generation: u64) -> Self {
        Self {
            generation,
            state: SessionState::Idle,
            role: None,
            rendezvous: None,
            error: None,
            report: None,
        }
    }

    /// Whether the session has come to rest (idle, succeeded, or failed).
    pub fn is_settled(&self) -> bool {
        matches!(
            self.state,
            SessionState::Idle | SessionState::Success | SessionState::Error
        )
    }
}

/// Status writer bound to one generation.
struct StatusHandle {
    tx: Arc<watch::Sender<SessionStatus>>,
    generation: u64,
}

impl StatusHandle {
    /// Apply `f` if this handle's generation is still current.
    fn update(&self, f: impl FnOnce(&mut SessionStatus)) -> bool {
        self.tx.send_if_modified(|status| {
            if status.generation != self.generation {
                return false;
            }
            f(status);
            true
        })
    }

    fn succeed(&self, report: SyncReport) -> bool {
        self.update(|s| {
            s.state = SessionState::Success;
            s.report = Some(report);
        })
    }

    /// Publish the final error, if any. Success was already published.
    fn finish(&self, outcome: Result<()>) {
        match outcome {
            Ok(()) | Err(SyncError::Cancelled) => {}
            Err(e) => {
                let stale = !self.update(|s| {
                    s.state = SessionState::Error;
                    s.error = Some(e.to_string());
                });
                if stale {
                    tracing::debug!("dropping error from stale session: {}", e);
                }
            }
        }
    }
}

struct ActiveSession {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owns the lifecycle of sync sessions for one device.
///
/// Must be used from within a tokio runtime; sessions run as spawned tasks.
pub struct SessionController<T: Transport + 'static, S: SyncStore + 'static> {
    transport: Arc<T>,
    store: Arc<S>,
    config: SyncConfig,
    status: Arc<watch::Sender<SessionStatus>>,
    active: Option<ActiveSession>,
}

impl<T: Transport + 'static, S: SyncStore + 'static> SessionController<T, S> {
    /// Create an idle controller.
    pub fn new(transport: Arc<T>, store: Arc<S>, config: SyncConfig) -> Self {
        let (tx, _) = watch::channel(SessionStatus::idle(0));
        Self {
            transport,
            store,
            config,
            status: Arc::new(tx),
            active: None,
        }
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Watch status transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Open the sync surface and wait for a role choice.
    pub fn open(&mut self) -> Result<()> {
        self.make_ready()?;
        self.status.send_if_modified(|s| {
            if s.state == SessionState::Idle {
                s.state = SessionState::AwaitingRole;
                true
            } else {
                false
            }
        });
        Ok(())
    }

    /// Start a session as Host.
    ///
    /// The rendezvous code appears in [`SessionStatus::rendezvous`] once the
    /// backend accepts the registration.
    pub fn start_as_host(&mut self) -> Result<()> {
        self.make_ready()?;

        let handle = self.begin(Role::Host, None);
        let (cancel, cancelled) = watch::channel(false);
        let transport = Arc::clone(&self.transport);
        let store = Arc::clone(&self.store);
        let config = self.config.clone();

        tracing::info!("starting sync session {} as host", handle.generation);
        let task = tokio::spawn(async move {
            let outcome = host_session(&*transport, &*store, &config, &handle, cancelled).await;
            handle.finish(outcome);
        });

        self.active = Some(ActiveSession { cancel, task });
        Ok(())
    }

    /// Start a session as Joiner, dialing the code typed by the user.
    ///
    /// An unparseable code fails immediately and leaves the state untouched.
    pub fn start_as_join(&mut self, target: &str) -> Result<()> {
        let target = RendezvousId::parse(target)?;
        self.make_ready()?;

        let handle = self.begin(Role::Joiner, Some(target.clone()));
        let (cancel, cancelled) = watch::channel(false);
        let transport = Arc::clone(&self.transport);
        let store = Arc::clone(&self.store);
        let config = self.config.clone();

        tracing::info!("starting sync session {} as joiner to {}", handle.generation, target);
        let task = tokio::spawn(async move {
            let outcome =
                join_session(&*transport, &*store, &config, &target, &handle, cancelled).await;
            handle.finish(outcome);
        });

        self.active = Some(ActiveSession { cancel, task });
        Ok(())
    }

    /// Tear down any session and return to `Idle`. Safe from any state.
    ///
    /// Waits for the session task to close its connection or listener.
    pub async fn cancel(&mut self) {
        if let Some(task) = self.teardown() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::warn!("sync session task panicked: {}", e);
                }
            }
        }
    }

    /// Same as [`cancel`](Self::cancel).
    pub async fn reset(&mut self) {
        self.cancel().await;
    }

    /// Wait until the current session succeeds, fails, or is reset.
    pub async fn wait_until_settled(&self) -> SessionStatus {
        let mut rx = self.status.subscribe();
        let settled = rx.wait_for(SessionStatus::is_settled).await.map(|s| s.clone());
        settled.unwrap_or_else(|_| self.status())
    }

    /// Refuse while a session is in flight; clear a finished one.
    fn make_ready(&mut self) -> Result<()> {
        let state = self.status.borrow().state;
        if state.is_active() {
            return Err(SyncError::SessionActive);
        }
        if matches!(state, SessionState::Success | SessionState::Error) {
            // The finished task may still be closing its connection; it exits on its own.
            drop(self.teardown());
        }
        Ok(())
    }

    /// Publish `Connecting` under a fresh generation.
    fn begin(&self, role: Role, rendezvous: Option<RendezvousId>) -> StatusHandle {
        let mut generation = 0;
        self.status.send_modify(|s| {
            generation = s.generation + 1;
            *s = SessionStatus {
                generation,
                state: SessionState::Connecting,
                role: Some(role),
                rendezvous,
                error: None,
                report: None,
            };
        });
        StatusHandle {
            tx: Arc::clone(&self.status),
            generation,
        }
    }

    /// Signal the active task, publish `Idle`, and hand back the task.
    fn teardown(&mut self) -> Option<JoinHandle<()>> {
        let active = self.active.take();
        if let Some(active) = &active {
            let _ = active.cancel.send(true);
        }

        self.status.send_modify(|s| {
            let generation = s.generation + 1;
            *s = SessionStatus::idle(generation);
        });
        tracing::debug!("sync session reset");

        active.map(|a| a.task)
    }
}

impl<T: Transport + 'static, S: SyncStore + 'static> Drop for SessionController<T, S> {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            let _ = active.cancel.send(true);
        }
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    // A dropped sender also counts as cancellation.
    let _ = rx.wait_for(|c| *c).await;
}

async fn host_session<T: Transport + ?Sized, S: SyncStore + ?Sized>(
    transport: &T,
    store: &S,
    config: &SyncConfig,
    status: &StatusHandle,
    mut cancel: watch::Receiver<bool>,
) -> Result<()> {
    let preferred = RendezvousId::generate_short(&mut rand::thread_rng(), config.short_code_len);

    let acquired = tokio::select! {
        _ = cancelled(&mut cancel) => None,
        res = rendezvous::acquire(transport, &preferred) => Some(res),
    };
    let mut listener = match acquired {
        Some(res) => res?,
        None => return Err(SyncError::Cancelled),
    };

    let id = listener.rendezvous_id().clone();
    tracing::info!("hosting sync session under {}", id);
    status.update(|s| s.rendezvous = Some(id));

    let accepted = tokio::select! {
        _ = cancelled(&mut cancel) => None,
        res = listener.accept() => Some(res),
    };
    listener.close().await;

    let conn = match accepted {
        Some(res) => res?,
        None => return Err(SyncError::Cancelled),
    };

    drive(Role::Host, conn, store, config, status, cancel).await
}

async fn join_session<T: Transport + ?Sized, S: SyncStore + ?Sized>(
    transport: &T,
    store: &S,
    config: &SyncConfig,
    target: &RendezvousId,
    status: &StatusHandle,
    mut cancel: watch::Receiver<bool>,
) -> Result<()> {
    let dialed = tokio::select! {
        _ = cancelled(&mut cancel) => None,
        res = transport.dial(target) => Some(res),
    };
    let conn = match dialed {
        Some(res) => res?,
        None => return Err(SyncError::Cancelled),
    };

    drive(Role::Joiner, conn, store, config, status, cancel).await
}

/// Run the protocol over an open connection, then close it.
///
/// `Success` is published as soon as the exchange completes; the grace
/// period afterwards only delays the close. A `SYNC_ERROR` arriving in that
/// window still turns the session into `Error`.
async fn drive<C: Connection, S: SyncStore + ?Sized>(
    role: Role,
    conn: C,
    store: &S,
    config: &SyncConfig,
    status: &StatusHandle,
    mut cancel: watch::Receiver<bool>,
) -> Result<()> {
    if !status.update(|s| s.state = SessionState::Syncing) {
        conn.close().await;
        return Err(SyncError::Cancelled);
    }

    let mut protocol = SyncProtocol::new(role, store, config);

    let exchanged = tokio::select! {
        _ = cancelled(&mut cancel) => None,
        res = protocol.exchange(&conn) => Some(res),
    };
    let report = match exchanged {
        Some(Ok(report)) => report,
        Some(Err(e)) => {
            conn.close().await;
            tracing::warn!("sync session failed as {}: {}", role, e);
            return Err(e);
        }
        None => {
            conn.close().await;
            return Err(SyncError::Cancelled);
        }
    };

    if !status.succeed(report) {
        conn.close().await;
        return Err(SyncError::Cancelled);
    }

    let lingered = tokio::select! {
        _ = cancelled(&mut cancel) => None,
        res = protocol.linger(&conn) => Some(res),
    };
    conn.close().await;

    match lingered {
        Some(Err(e)) => {
            tracing::warn!("peer rejected our data after success as {}: {}", role, e);
            Err(e)
        }
        Some(Ok(())) => Ok(()),
        None => Err(SyncError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryNetwork;
    use monetus_sync_store::MemoryStore;
    use std::time::Duration;

    fn config() -> SyncConfig {
        SyncConfig {
            close_grace: Duration::from_millis(10),
            message_timeout: Duration::from_secs(2),
            ..SyncConfig::default()
        }
    }

    fn controller(
        network: &Arc<MemoryNetwork>,
    ) -> SessionController<crate::transport::memory::MemoryTransport, MemoryStore> {
        SessionController::new(
            Arc::new(network.transport()),
            Arc::new(MemoryStore::new()),
            config(),
        )
    }

    async fn wait_for_code(
        rx: &mut watch::Receiver<SessionStatus>,
    ) -> RendezvousId {
        let status = rx
            .wait_for(|s| s.rendezvous.is_some())
            .await
            .unwrap()
            .clone();
        status.rendezvous.unwrap()
    }

    #[tokio::test]
    async fn test_open_awaits_role() {
        let network = MemoryNetwork::new();
        let mut ctl = controller(&network);

        ctl.open().unwrap();
        assert_eq!(ctl.status().state, SessionState::AwaitingRole);
        ctl.open().unwrap();
        assert_eq!(ctl.status().state, SessionState::AwaitingRole);
    }

    #[tokio::test]
    async fn test_host_publishes_short_code() {
        let network = MemoryNetwork::new();
        let mut ctl = controller(&network);
        let mut rx = ctl.subscribe();

        ctl.start_as_host().unwrap();
        assert_eq!(ctl.status().state, SessionState::Connecting);
        assert_eq!(ctl.status().role, Some(Role::Host));

        let code = wait_for_code(&mut rx).await;
        assert_eq!(code.as_str().len(), 6);
        assert!(network.is_registered(&code));

        ctl.cancel().await;
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let network = MemoryNetwork::new();
        let mut ctl = controller(&network);

        ctl.start_as_host().unwrap();
        assert!(matches!(ctl.start_as_host(), Err(SyncError::SessionActive)));
        assert!(matches!(
            ctl.start_as_join("ABC123"),
            Err(SyncError::SessionActive)
        ));

        ctl.cancel().await;
        assert_eq!(ctl.status().state, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_bad_join_code_leaves_state() {
        let network = MemoryNetwork::new();
        let mut ctl = controller(&network);
        ctl.open().unwrap();

        assert!(matches!(
            ctl.start_as_join("not a code"),
            Err(SyncError::InvalidIdentifier(_))
        ));
        assert_eq!(ctl.status().state, SessionState::AwaitingRole);
    }

    #[tokio::test]
    async fn test_dial_failure_is_error_then_restartable() {
        let network = MemoryNetwork::new();
        let mut ctl = controller(&network);

        ctl.start_as_join("NOBODY").unwrap();
        let status = ctl.wait_until_settled().await;
        assert_eq!(status.state, SessionState::Error);
        assert!(status.error.unwrap().contains("could not connect"));

        ctl.start_as_host().unwrap();
        assert_eq!(ctl.status().state, SessionState::Connecting);
        assert!(ctl.status().error.is_none());
        ctl.cancel().await;
    }

    #[tokio::test]
    async fn test_cancel_releases_code() {
        let network = MemoryNetwork::new();
        let mut ctl = controller(&network);
        let mut rx = ctl.subscribe();

        ctl.start_as_host().unwrap();
        let code = wait_for_code(&mut rx).await;
        let generation = ctl.status().generation;

        ctl.cancel().await;

        let status = ctl.status();
        assert_eq!(status.state, SessionState::Idle);
        assert!(status.rendezvous.is_none());
        assert!(status.generation > generation);
        assert!(!network.is_registered(&code));
        assert_eq!(network.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_from_idle_is_noop() {
        let network = MemoryNetwork::new();
        let mut ctl = controller(&network);

        ctl.reset().await;
        assert_eq!(ctl.status().state, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_success_is_published_before_close_grace() {
        let network = MemoryNetwork::new();
        let slow_close = SyncConfig {
            close_grace: Duration::from_secs(3),
            ..config()
        };
        let mut host = SessionController::new(
            Arc::new(network.transport()),
            Arc::new(MemoryStore::new()),
            slow_close.clone(),
        );
        let mut joiner = SessionController::new(
            Arc::new(network.transport()),
            Arc::new(MemoryStore::new()),
            slow_close,
        );
        let mut host_rx = host.subscribe();
        let mut joiner_rx = joiner.subscribe();

        host.start_as_host().unwrap();
        let code = wait_for_code(&mut host_rx).await;
        joiner.start_as_join(code.as_str()).unwrap();

        let within = Duration::from_millis(500);
        for rx in [&mut host_rx, &mut joiner_rx] {
            let status = tokio::time::timeout(within, rx.wait_for(|s| s.is_settled()))
                .await
                .expect("success should not wait for the close")
                .unwrap()
                .clone();
            assert_eq!(status.state, SessionState::Success, "{:?}", status.error);
            assert!(status.report.is_some());
        }

        host.cancel().await;
        joiner.cancel().await;
        assert_eq!(host.status().state, SessionState::Idle);
    }
}
