// MIT License - Copyright (c) 2026 Peter Wright
// Public panel handle and connection supervisor

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::comm::{announce_catalog, PanelSession, UniiComm};
use crate::config::{PanelConfig, ReconnectPolicy};
use crate::error::{Result, UniiError};
use crate::event::{event_channel, EventReceiver, EventSender, PanelEvent};
use crate::poll::{PollExit, PollScheduler, SnapshotReceiver};
use crate::snapshot::{Catalog, Snapshot};
use crate::transport::SessionState;

/// Upper bound on waiting for the supervisor during `disconnect()`.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// The main public API for a UNii panel.
///
/// # Example
///
/// ```no_run
/// use unii_lan_bridge::{PanelConfig, UniiPanel};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = PanelConfig::builder()
///         .panel_ip("192.168.1.100")
///         .shared_key("secret12")
///         .user_code("1234")
///         .build();
///
///     let mut panel = UniiPanel::connect(config).await?;
///
///     let mut events = panel.subscribe();
///     tokio::spawn(async move {
///         while let Ok(event) = events.recv().await {
///             println!("Event: {:?}", event);
///         }
///     });
///
///     if let Some(snapshot) = panel.latest_snapshot() {
///         for section in &snapshot.sections {
///             println!("{}: {:?}", section.name, section.armed_state);
///         }
///     }
///
///     panel.arm_section(1).await?;
///
///     tokio::signal::ctrl_c().await?;
///     panel.disconnect().await?;
///     Ok(())
/// }
/// ```
pub struct UniiPanel {
    shared: Arc<Shared>,
    supervisor_handle: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

/// State shared between the handle and the supervisor task.
struct Shared {
    config: PanelConfig,
    event_tx: EventSender,
    poller: PollScheduler,
    state_tx: watch::Sender<SessionState>,
    /// Live session in persistent mode
    session: RwLock<Option<PanelSession>>,
    catalog: RwLock<Arc<Catalog>>,
    /// Serialises per-poll cycles with commands in per-poll mode
    gate: Mutex<()>,
}

impl UniiPanel {
    /// Connect to a panel, discover its catalog and start polling.
    ///
    /// Retries on transient errors with exponential backoff, up to
    /// `max_connect_retries`. Configuration errors fail immediately.
    pub async fn connect(config: PanelConfig) -> Result<Self> {
        config.validate()?;
        let max_retries = config.max_connect_retries;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let delay = config.backoff_delay(attempt);
                warn!(
                    "Connection attempt {} failed, retrying in {:.1}s...",
                    attempt,
                    delay.as_secs_f64()
                );
                sleep(delay).await;
            }

            match Self::try_connect(config.clone()).await {
                Ok(panel) => return Ok(panel),
                Err(e) => {
                    if !e.is_retryable() || attempt == max_retries {
                        return Err(e);
                    }
                    warn!("Connection error (attempt {}): {}", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(UniiError::Disconnected))
    }

    /// Single connection attempt without retries.
    async fn try_connect(config: PanelConfig) -> Result<Self> {
        let (event_tx, _event_rx) = event_channel(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let policy = config.reconnect_policy;

        let shared = Arc::new(Shared {
            poller: PollScheduler::new(event_tx.clone()),
            config,
            event_tx,
            state_tx: watch::Sender::new(SessionState::Disconnected),
            session: RwLock::new(None),
            catalog: RwLock::new(Arc::new(Catalog::default())),
            gate: Mutex::new(()),
        });

        let supervisor_handle = match policy {
            ReconnectPolicy::Persistent => {
                let comm = shared.open_link().await?;
                tokio::spawn(supervise_persistent(shared.clone(), comm, shutdown_rx))
            }
            ReconnectPolicy::PerPoll => {
                shared.per_poll_cycle(true).await?;
                tokio::spawn(supervise_per_poll(shared.clone(), shutdown_rx))
            }
        };

        info!("Panel session ready ({:?} policy)", policy);
        Ok(Self {
            shared,
            supervisor_handle: Some(supervisor_handle),
            shutdown_tx,
        })
    }

    /// Subscribe to panel events.
    pub fn subscribe(&self) -> EventReceiver {
        self.shared.event_tx.subscribe()
    }

    /// Last published snapshot, if any poll has succeeded.
    pub fn latest_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.shared.poller.latest()
    }

    /// Receiver that observes every newly published snapshot.
    pub fn watch_snapshots(&self) -> SnapshotReceiver {
        self.shared.poller.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    /// Sections and inputs from the most recent discovery.
    pub async fn catalog(&self) -> Arc<Catalog> {
        self.shared.catalog.read().await.clone()
    }

    pub fn config(&self) -> &PanelConfig {
        &self.shared.config
    }

    /// Run one poll cycle now and return the resulting snapshot.
    pub async fn poll_now(&self) -> Result<Arc<Snapshot>> {
        match self.shared.config.reconnect_policy {
            ReconnectPolicy::Persistent => {
                let session = self.shared.live_session().await?;
                let catalog = self.catalog().await;
                self.shared.poller.poll_once(&session, &catalog).await
            }
            ReconnectPolicy::PerPoll => self.shared.per_poll_cycle(false).await,
        }
    }

    // --- Commands ---

    /// Arm a section with the configured user code.
    pub async fn arm_section(&self, section: u16) -> Result<()> {
        let code = self.stored_code()?;
        self.arm_section_with_code(section, &code).await
    }

    pub async fn arm_section_with_code(&self, section: u16, code: &str) -> Result<()> {
        debug!("Arming section {}", section);
        self.check_section(section).await?;
        self.shared
            .with_session(|s| async move { s.arm_section(section, code).await })
            .await
    }

    pub async fn disarm_section(&self, section: u16, code: &str) -> Result<()> {
        debug!("Disarming section {}", section);
        self.check_section(section).await?;
        self.shared
            .with_session(|s| async move { s.disarm_section(section, code).await })
            .await
    }

    pub async fn bypass_input(&self, input: u16, code: &str) -> Result<()> {
        debug!("Bypassing input {}", input);
        self.check_input(input).await?;
        self.shared
            .with_session(|s| async move { s.bypass_input(input, code).await })
            .await
    }

    pub async fn unbypass_input(&self, input: u16, code: &str) -> Result<()> {
        debug!("Unbypassing input {}", input);
        self.check_input(input).await?;
        self.shared
            .with_session(|s| async move { s.unbypass_input(input, code).await })
            .await
    }

    fn stored_code(&self) -> Result<String> {
        self.shared
            .config
            .user_code
            .clone()
            .ok_or_else(|| UniiError::validation("no user code configured"))
    }

    async fn check_section(&self, section: u16) -> Result<()> {
        let catalog = self.catalog().await;
        if !catalog.sections.is_empty() && !catalog.has_section(section) {
            return Err(UniiError::validation(format!("unknown section {}", section)));
        }
        Ok(())
    }

    async fn check_input(&self, input: u16) -> Result<()> {
        let catalog = self.catalog().await;
        if !catalog.inputs.is_empty() && catalog.input(input).is_none() {
            return Err(UniiError::validation(format!("unknown input {}", input)));
        }
        Ok(())
    }

    /// Disconnect from the panel and stop polling.
    pub async fn disconnect(&mut self) -> Result<()> {
        info!("Disconnecting from panel");
        self.shared.set_state(SessionState::Disconnecting);
        let _ = self.shutdown_tx.send(true);

        if let Some(mut handle) = self.supervisor_handle.take()
            && timeout(SHUTDOWN_TIMEOUT, &mut handle).await.is_err()
        {
            warn!("Supervisor did not stop in time, aborting");
            handle.abort();
        }

        *self.shared.session.write().await = None;
        self.shared.set_state(SessionState::Disconnected);
        let _ = self.shared.event_tx.send(PanelEvent::Disconnected);
        Ok(())
    }
}

impl Drop for UniiPanel {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(h) = self.supervisor_handle.take() {
            h.abort();
        }
    }
}

impl Shared {
    fn set_state(&self, state: SessionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("Session state: {:?} -> {:?}", previous, state);
        }
    }

    fn is_faulted(&self) -> bool {
        *self.state_tx.borrow() == SessionState::Faulted
    }

    fn fault(&self, attempts: u32) {
        error!("Giving up after {} reconnect attempts", attempts);
        self.set_state(SessionState::Faulted);
        let _ = self.event_tx.send(PanelEvent::Faulted);
    }

    fn faulted_error(&self) -> UniiError {
        UniiError::Faulted {
            attempts: self.config.max_reconnect_attempts.unwrap_or(0),
        }
    }

    async fn live_session(&self) -> Result<PanelSession> {
        if self.is_faulted() {
            return Err(self.faulted_error());
        }
        match self.session.read().await.clone() {
            Some(session) if session.is_connected() => Ok(session),
            _ => Err(UniiError::Disconnected),
        }
    }

    /// Connect and complete the handshake.
    async fn open_comm(&self) -> Result<UniiComm> {
        self.set_state(SessionState::Connecting);
        let mut comm = UniiComm::new(self.config.clone(), self.event_tx.clone());
        if let Err(e) = comm.connect().await {
            self.set_state(SessionState::Disconnected);
            return Err(e);
        }
        Ok(comm)
    }

    /// Catalog discovery on a fresh connection; publishes the result.
    async fn refresh_catalog(&self, session: &PanelSession) -> Result<()> {
        let catalog = session.discover_catalog().await?;
        announce_catalog(&self.event_tx, &catalog);
        *self.catalog.write().await = Arc::new(catalog);
        Ok(())
    }

    /// Persistent mode: connect, discover, and expose the live session.
    async fn open_link(&self) -> Result<UniiComm> {
        let mut comm = self.open_comm().await?;
        let linked = match comm.session() {
            Ok(session) => self.refresh_catalog(&session).await.map(|_| session),
            Err(e) => Err(e),
        };
        match linked {
            Ok(session) => {
                *self.session.write().await = Some(session);
                self.set_state(SessionState::Connected);
                let _ = self.event_tx.send(PanelEvent::Connected);
                Ok(comm)
            }
            Err(e) => {
                let _ = comm.disconnect().await;
                self.set_state(SessionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Per-poll mode: connect, optionally rediscover, poll, disconnect.
    async fn per_poll_cycle(&self, refresh: bool) -> Result<Arc<Snapshot>> {
        if self.is_faulted() {
            return Err(self.faulted_error());
        }
        let _gate = self.gate.lock().await;
        let mut comm = self.open_comm().await?;
        self.set_state(SessionState::Connected);

        let result = async {
            let session = comm.session()?;
            let empty = self.catalog.read().await.is_empty();
            if refresh || empty {
                self.refresh_catalog(&session).await?;
            }
            let catalog = self.catalog.read().await.clone();
            self.poller.poll_once(&session, &catalog).await
        }
        .await;

        self.set_state(SessionState::Disconnecting);
        if let Err(e) = comm.disconnect().await {
            debug!("Disconnect after poll failed: {}", e);
        }
        self.set_state(SessionState::Disconnected);
        result
    }

    /// Run `op` on a session appropriate for the reconnect policy.
    async fn with_session<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(PanelSession) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.config.reconnect_policy {
            ReconnectPolicy::Persistent => {
                let session = self.live_session().await?;
                op(session).await
            }
            ReconnectPolicy::PerPoll => {
                if self.is_faulted() {
                    return Err(self.faulted_error());
                }
                let _gate = self.gate.lock().await;
                let mut comm = self.open_comm().await?;
                self.set_state(SessionState::Connected);
                let result = match comm.session() {
                    Ok(session) => op(session).await,
                    Err(e) => Err(e),
                };
                self.set_state(SessionState::Disconnecting);
                let _ = comm.disconnect().await;
                self.set_state(SessionState::Disconnected);
                result
            }
        }
    }
}

/// Persistent mode: poll over the live link, reconnect when it drops.
async fn supervise_persistent(
    shared: Arc<Shared>,
    mut comm: UniiComm,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = shared.config.poll_interval();
    loop {
        let exit = match comm.session() {
            Ok(session) => {
                let catalog = shared.catalog.read().await.clone();
                shared.poller.run(&session, &catalog, period, &mut shutdown).await
            }
            Err(_) => PollExit::ConnectionLost,
        };

        *shared.session.write().await = None;
        if let Err(e) = comm.disconnect().await {
            debug!("Disconnect failed: {}", e);
        }

        match exit {
            PollExit::Shutdown => return,
            PollExit::ConnectionLost => {
                warn!("Connection to panel lost");
                shared.set_state(SessionState::Disconnected);
                let _ = shared.event_tx.send(PanelEvent::Disconnected);
                match reconnect(&shared, &mut shutdown).await {
                    Some(next) => comm = next,
                    None => return,
                }
            }
        }
    }
}

/// Reconnect with backoff. `None` on shutdown or when attempts run out.
async fn reconnect(shared: &Shared, shutdown: &mut watch::Receiver<bool>) -> Option<UniiComm> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        if let Some(max) = shared.config.max_reconnect_attempts
            && attempt > max
        {
            shared.fault(max);
            return None;
        }

        let delay = shared.config.backoff_delay(attempt);
        info!(
            "Reconnecting in {:.1}s (attempt {})...",
            delay.as_secs_f64(),
            attempt
        );
        tokio::select! {
            _ = sleep(delay) => {}
            _ = shutdown.changed() => return None,
        }

        let result = tokio::select! {
            result = shared.open_link() => result,
            _ = shutdown.changed() => return None,
        };
        match result {
            Ok(comm) => {
                info!("Reconnected to panel");
                return Some(comm);
            }
            Err(e) => warn!("Reconnect attempt {} failed: {}", attempt, e),
        }
    }
}

/// Per-poll mode: one short connection per interval tick.
async fn supervise_per_poll(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(shared.config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first cycle already ran during connect.
    ticker.tick().await;

    let mut failures: u32 = 0;
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            result = shared.per_poll_cycle(failures > 0) => result,
            _ = shutdown.changed() => return,
        };
        match result {
            Ok(_) => failures = 0,
            Err(e) => {
                failures += 1;
                warn!(
                    "Poll cycle failed ({} in a row), keeping last snapshot: {}",
                    failures, e
                );
                if let Some(max) = shared.config.max_reconnect_attempts
                    && failures >= max
                {
                    shared.fault(max);
                    return;
                }
            }
        }
    }
}
