//! Startup orchestration.
//!
//! Brings the engine online and then starts exactly one ingestion source:
//!
//! ```text
//! NotStarted -> WaitingForEngineProcess -> RegisteringCloud -> WaitingForConnection
//!     -> PollingMappings          (registration succeeded)
//!     -> ApplyingOfflineFallback  (registration failed)
//!     -> IngestionActive | IngestionUnavailable | Failed
//! ```
//!
//! `IngestionUnavailable` covers a source that exists in config but could not
//! be opened right now (missing log file, port in use); a later run may
//! succeed. `Failed` means the source is not configured at all.
//!
//! Every wait is bounded and observes the shared cancellation token. A run
//! that cannot bring ingestion up exits in a degraded state; the process
//! keeps running and a manual launch request can start a fresh run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use relay_proto::{EngineResult, HapticEngine};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client_registry::ClientRegistry;
use crate::config::{ConfigError, IngestMode, RelayConfig, TimeoutsConfig};
use crate::dispatcher::Dispatcher;
use crate::tail::{TailError, TailHandle, TailOptions, spawn_tailer};
use crate::ws_server::{ServerError, ServerHandle, ServerOptions, start_server};

/// Where the orchestrator is in bringing the relay up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupState {
    NotStarted,
    WaitingForEngineProcess,
    RegisteringCloud,
    WaitingForConnection,
    PollingMappings,
    ApplyingOfflineFallback,
    IngestionActive,
    IngestionUnavailable,
    Failed,
}

impl std::fmt::Display for StartupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StartupState::NotStarted => "not started",
            StartupState::WaitingForEngineProcess => "waiting for engine process",
            StartupState::RegisteringCloud => "registering cloud",
            StartupState::WaitingForConnection => "waiting for connection",
            StartupState::PollingMappings => "polling mappings",
            StartupState::ApplyingOfflineFallback => "applying offline fallback",
            StartupState::IngestionActive => "ingestion active",
            StartupState::IngestionUnavailable => "ingestion unavailable",
            StartupState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How one orchestration run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupOutcome {
    /// An ingestion source was started by this run.
    Active,
    /// Ingestion was already running; no second source was started.
    AlreadyActive,
    /// Another run is in progress; this request was ignored.
    AlreadyRunning,
    /// The companion process did not come up in time.
    PlayerNotReady,
    /// Registration failed and there is no offline configuration.
    NoOfflineConfig,
    /// Registration failed and the engine rejected the offline configuration.
    OfflineReinitFailed,
    /// The configured ingestion source could not be started.
    IngestionUnavailable(String),
    /// Shutdown was requested while waiting.
    Cancelled,
}

impl StartupOutcome {
    pub fn is_ingesting(&self) -> bool {
        matches!(self, StartupOutcome::Active | StartupOutcome::AlreadyActive)
    }
}

/// Bounded waits used by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupTimeouts {
    pub player_start: Duration,
    pub connection: Duration,
    pub mappings: Duration,
    pub offline_grace: Duration,
    pub poll_interval: Duration,
    pub mappings_poll: Duration,
}

impl Default for StartupTimeouts {
    fn default() -> Self {
        Self::from(&TimeoutsConfig::default())
    }
}

impl From<&TimeoutsConfig> for StartupTimeouts {
    fn from(config: &TimeoutsConfig) -> Self {
        Self {
            player_start: config.player_start(),
            connection: config.connection(),
            mappings: config.mappings(),
            offline_grace: config.offline_grace(),
            poll_interval: config.poll_interval(),
            mappings_poll: config.mappings_poll(),
        }
    }
}

/// Everything the orchestrator needs from configuration.
#[derive(Debug, Clone)]
pub struct StartupSettings {
    pub mode: IngestMode,
    pub api_key: String,
    pub app_id: String,
    pub offline_payload: Option<String>,
    pub retry_offline_on_disconnect: bool,
    pub timeouts: StartupTimeouts,
    pub tail: TailOptions,
    pub server: ServerOptions,
}

impl StartupSettings {
    pub fn from_config(config: &RelayConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            mode: config.mode()?,
            api_key: config.api_key().to_string(),
            app_id: config.app_id().to_string(),
            offline_payload: config.load_offline_payload(),
            retry_offline_on_disconnect: config.offline.retry_on_disconnect,
            timeouts: StartupTimeouts::from(&config.timeouts),
            tail: TailOptions {
                path: config.log_file(),
                tag: config.tail.tag.clone(),
                poll_interval: Duration::from_millis(config.tail.poll_interval_ms),
            },
            server: ServerOptions {
                bind: config.bind_address().to_string(),
                port: config.port(),
            },
        })
    }
}

/// The running ingestion source.
#[derive(Debug)]
pub enum Ingestion {
    Tail(TailHandle),
    Socket(ServerHandle),
}

impl Ingestion {
    pub async fn stop(self) {
        match self {
            Ingestion::Tail(handle) => handle.stop().await,
            Ingestion::Socket(handle) => handle.shutdown().await,
        }
    }
}

/// Forces the offline payload's `disableValidation` flag to true so the
/// engine accepts an unvalidated configuration.
///
/// Payloads that are not a JSON object are returned unchanged.
pub fn prepare_offline_json(payload: &str) -> String {
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(mut root)) => {
            if root.get("disableValidation") == Some(&Value::Bool(true)) {
                return payload.to_string();
            }
            root.insert("disableValidation".to_string(), Value::Bool(true));
            Value::Object(root).to_string()
        }
        Ok(_) => {
            warn!("Offline configuration is not a JSON object; submitting unchanged");
            payload.to_string()
        }
        Err(err) => {
            warn!(error = %err, "Offline configuration is not valid JSON; submitting unchanged");
            payload.to_string()
        }
    }
}

/// Mappings count as ready once they are non-blank and not an empty array.
pub fn mappings_ready(mappings: &str) -> bool {
    let trimmed = mappings.trim();
    !trimmed.is_empty() && trimmed != "[]"
}

/// Polls `probe` until it returns true or `timeout` elapses.
///
/// Returns `None` if `cancel` fires first.
pub async fn wait_until(
    mut probe: impl FnMut() -> bool,
    timeout: Duration,
    poll: Duration,
    cancel: &CancellationToken,
) -> Option<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        if probe() {
            return Some(true);
        }
        if Instant::now() >= deadline {
            return Some(false);
        }
        tokio::select! {
            () = cancel.cancelled() => return None,
            () = tokio::time::sleep(poll) => {}
        }
    }
}

/// Treats a failing probe as "not yet".
fn probe(name: &str, result: EngineResult<bool>) -> bool {
    result.unwrap_or_else(|err| {
        debug!(probe = name, error = %err, "Engine probe failed");
        false
    })
}

struct Inner {
    settings: StartupSettings,
    dispatcher: Dispatcher,
    registry: Arc<ClientRegistry>,
    cancel: CancellationToken,
    state: watch::Sender<StartupState>,
    in_progress: AtomicBool,
    ingestion: Mutex<Option<Ingestion>>,
    watchdog: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Drives startup. Cheap to clone; clones share one state machine.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state())
            .field("in_progress", &self.is_in_progress())
            .finish_non_exhaustive()
    }
}

/// Clears the in-progress flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Orchestrator {
    pub fn new(
        settings: StartupSettings,
        dispatcher: Dispatcher,
        registry: Arc<ClientRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(StartupState::NotStarted);
        Self {
            inner: Arc::new(Inner {
                settings,
                dispatcher,
                registry,
                cancel,
                state,
                in_progress: AtomicBool::new(false),
                ingestion: Mutex::new(None),
                watchdog: std::sync::Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> StartupState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<StartupState> {
        self.inner.state.subscribe()
    }

    pub fn is_in_progress(&self) -> bool {
        self.inner.in_progress.load(Ordering::SeqCst)
    }

    pub async fn is_ingesting(&self) -> bool {
        self.inner.ingestion.lock().await.is_some()
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.inner.registry
    }

    fn engine(&self) -> &dyn HapticEngine {
        self.inner.dispatcher.engine().as_ref()
    }

    fn set_state(&self, state: StartupState) {
        let previous = self.inner.state.send_replace(state);
        if previous != state {
            info!(from = %previous, to = %state, "Startup state changed");
        }
    }

    /// Runs the startup sequence. A no-op if a run is already in progress.
    pub async fn run(&self) -> StartupOutcome {
        if self
            .inner
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Startup already in progress");
            return StartupOutcome::AlreadyRunning;
        }
        let _guard = RunGuard(&self.inner.in_progress);

        let outcome = self.sequence().await;
        match &outcome {
            StartupOutcome::Active | StartupOutcome::AlreadyActive => {
                info!(mode = self.inner.settings.mode.as_str(), "Relay is ingesting commands");
            }
            StartupOutcome::Cancelled => debug!("Startup cancelled"),
            other => warn!(outcome = ?other, "Startup ended without ingestion"),
        }
        outcome
    }

    /// Manual "launch companion process" trigger.
    ///
    /// Asks the engine to launch its companion process and, when that
    /// succeeds and no run is in progress, starts a new run in the background.
    pub fn request_launch(&self) -> EngineResult<bool> {
        let launched = self.engine().launch(true)?;
        info!(launched, "Launch requested");
        if launched && !self.is_in_progress() {
            let orchestrator = self.clone();
            tokio::spawn(async move {
                orchestrator.run().await;
            });
        }
        Ok(launched)
    }

    async fn sequence(&self) -> StartupOutcome {
        let settings = &self.inner.settings;
        let timeouts = settings.timeouts;
        let cancel = &self.inner.cancel;
        let engine = self.engine();

        self.set_state(StartupState::WaitingForEngineProcess);
        if !probe("is_running", engine.is_running()) {
            info!("Companion process not running, launching it");
            if let Err(err) = engine.launch(true) {
                warn!(error = %err, "Launch request failed");
            }
            let ready = wait_until(
                || probe("is_running", engine.is_running()),
                timeouts.player_start,
                timeouts.poll_interval,
                cancel,
            )
            .await;
            match ready {
                None => return StartupOutcome::Cancelled,
                Some(false) => {
                    warn!("Companion process did not start in time");
                    return StartupOutcome::PlayerNotReady;
                }
                Some(true) => info!("Companion process is running"),
            }
        }

        self.set_state(StartupState::RegisteringCloud);
        let registered = match engine.register_cloud(&settings.api_key, &settings.app_id, "") {
            Ok(registered) => registered,
            Err(err) => {
                warn!(error = %err, "Cloud registration raised an error");
                false
            }
        };
        if registered {
            info!("Cloud registration succeeded");
        } else {
            warn!("Cloud registration failed");
        }

        self.set_state(StartupState::WaitingForConnection);
        let connected = match wait_until(
            || probe("is_connected", engine.is_connected()),
            timeouts.connection,
            timeouts.poll_interval,
            cancel,
        )
        .await
        {
            None => return StartupOutcome::Cancelled,
            Some(connected) => connected,
        };
        if !connected {
            info!("Engine connection not established yet; continuing");
        }

        if registered {
            if connected {
                self.set_state(StartupState::PollingMappings);
                let ready = wait_until(
                    || {
                        engine
                            .mappings_json()
                            .is_ok_and(|mappings| mappings_ready(&mappings))
                    },
                    timeouts.mappings,
                    timeouts.mappings_poll,
                    cancel,
                )
                .await;
                match ready {
                    None => return StartupOutcome::Cancelled,
                    Some(true) => info!("Haptic mappings available"),
                    Some(false) => info!("Haptic mappings not ready yet"),
                }
            }
        } else {
            self.set_state(StartupState::ApplyingOfflineFallback);
            let payload = settings
                .offline_payload
                .as_deref()
                .filter(|payload| !payload.trim().is_empty());
            let Some(payload) = payload else {
                warn!("No offline configuration available; not starting ingestion");
                return StartupOutcome::NoOfflineConfig;
            };
            let prepared = prepare_offline_json(payload);
            match engine.reinit(&settings.api_key, &settings.app_id, &prepared) {
                Ok(true) => info!("Offline configuration applied"),
                Ok(false) => {
                    warn!("Engine rejected the offline configuration");
                    return StartupOutcome::OfflineReinitFailed;
                }
                Err(err) => {
                    error!(error = %err, "Offline re-initialization raised an error");
                    return StartupOutcome::OfflineReinitFailed;
                }
            }

            let grace = wait_until(
                || probe("is_connected", engine.is_connected()),
                timeouts.offline_grace,
                timeouts.poll_interval,
                cancel,
            )
            .await;
            if grace.is_none() {
                return StartupOutcome::Cancelled;
            }

            if settings.retry_offline_on_disconnect {
                self.spawn_offline_watchdog(prepared);
            }
        }

        self.start_ingestion().await
    }

    async fn start_ingestion(&self) -> StartupOutcome {
        let mut slot = self.inner.ingestion.lock().await;
        if slot.is_some() {
            debug!("Ingestion already active");
            self.set_state(StartupState::IngestionActive);
            return StartupOutcome::AlreadyActive;
        }

        let settings = &self.inner.settings;
        let dispatcher = self.inner.dispatcher.clone();
        // (message, whether the source is unconfigured rather than unavailable)
        let started = match settings.mode {
            IngestMode::Tail => spawn_tailer(settings.tail.clone(), dispatcher, &self.inner.cancel)
                .map(Ingestion::Tail)
                .map_err(|err| {
                    let unconfigured = matches!(err, TailError::NotConfigured);
                    (err.to_string(), unconfigured)
                }),
            IngestMode::Websocket => start_server(
                &settings.server,
                dispatcher,
                Arc::clone(&self.inner.registry),
                &self.inner.cancel,
            )
            .await
            .map(Ingestion::Socket)
            .map_err(|err| {
                let unconfigured = matches!(err, ServerError::Disabled);
                (err.to_string(), unconfigured)
            }),
        };

        match started {
            Ok(ingestion) => {
                *slot = Some(ingestion);
                self.set_state(StartupState::IngestionActive);
                StartupOutcome::Active
            }
            Err((message, unconfigured)) => {
                warn!(mode = settings.mode.as_str(), error = %message, "Ingestion source not started");
                self.set_state(if unconfigured {
                    StartupState::Failed
                } else {
                    StartupState::IngestionUnavailable
                });
                StartupOutcome::IngestionUnavailable(message)
            }
        }
    }

    /// Re-applies the offline configuration after each connection drop.
    fn spawn_offline_watchdog(&self, payload: String) {
        let mut watchdog = self
            .inner
            .watchdog
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if watchdog.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let orchestrator = self.clone();
        debug!("Starting offline reconnect watchdog");
        *watchdog = Some(tokio::spawn(async move {
            orchestrator.offline_watchdog(payload).await;
        }));
    }

    async fn offline_watchdog(&self, payload: String) {
        let settings = &self.inner.settings;
        let cancel = &self.inner.cancel;
        let mut was_connected = probe("is_connected", self.engine().is_connected());

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(settings.timeouts.poll_interval) => {}
            }
            let connected = probe("is_connected", self.engine().is_connected());
            if was_connected && !connected {
                info!("Engine connection dropped; re-applying offline configuration");
                match self
                    .engine()
                    .reinit(&settings.api_key, &settings.app_id, &payload)
                {
                    Ok(accepted) => info!(accepted, "Offline configuration re-applied"),
                    Err(err) => warn!(error = %err, "Offline re-initialization raised an error"),
                }
            }
            was_connected = connected;
        }
    }

    /// Stops ingestion and the watchdog. The caller cancels the shared token.
    pub async fn shutdown(&self) {
        if let Some(ingestion) = self.inner.ingestion.lock().await.take() {
            ingestion.stop().await;
        }
        let watchdog = self
            .inner
            .watchdog
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(task) = watchdog {
            task.abort();
        }
        self.set_state(StartupState::NotStarted);
    }
}
