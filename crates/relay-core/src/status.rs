//! Connection status monitor.
//!
//! Probes the engine on a fixed interval and publishes a snapshot for
//! whatever presents it (console, status file, a future UI).

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use relay_proto::HapticEngine;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client_registry::ClientRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    NotConnected,
    /// The engine probe itself failed.
    Unknown,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::NotConnected => "not connected",
            ConnectionStatus::Unknown => "unknown",
        })
    }
}

/// Machine-readable status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub connection: ConnectionStatus,
    pub player_running: bool,
    /// Offer a launch action when neither the connection nor the companion
    /// process is up.
    pub offer_launch: bool,
    pub clients: usize,
    pub checked_at: DateTime<Utc>,
}

impl StatusSnapshot {
    /// Reads the engine's connection and process state.
    pub fn probe(engine: &dyn HapticEngine, clients: usize) -> Self {
        let probed = engine
            .is_connected()
            .and_then(|connected| Ok((connected, engine.is_running()?)));
        let (connection, player_running) = match probed {
            Ok((true, running)) => (ConnectionStatus::Connected, running),
            Ok((false, running)) => (ConnectionStatus::NotConnected, running),
            Err(err) => {
                debug!(error = %err, "Status probe failed");
                (ConnectionStatus::Unknown, false)
            }
        };
        Self {
            connection,
            player_running,
            offer_launch: connection != ConnectionStatus::Connected && !player_running,
            clients,
            checked_at: Utc::now(),
        }
    }

    /// True when everything but the timestamp matches.
    pub fn same_state(&self, other: &Self) -> bool {
        self.connection == other.connection
            && self.player_running == other.player_running
            && self.offer_launch == other.offer_launch
            && self.clients == other.clients
    }
}

pub struct StatusMonitor {
    engine: Arc<dyn HapticEngine>,
    registry: Arc<ClientRegistry>,
    interval: Duration,
    status_file: Option<PathBuf>,
}

impl StatusMonitor {
    pub fn new(
        engine: Arc<dyn HapticEngine>,
        registry: Arc<ClientRegistry>,
        interval: Duration,
    ) -> Self {
        Self {
            engine,
            registry,
            interval,
            status_file: None,
        }
    }

    /// Also writes every changed snapshot to `path` as pretty JSON.
    pub fn with_status_file(mut self, path: Option<PathBuf>) -> Self {
        self.status_file = path;
        self
    }

    pub fn probe(&self) -> StatusSnapshot {
        StatusSnapshot::probe(self.engine.as_ref(), self.registry.len())
    }

    /// Starts probing until `cancel` fires.
    pub fn spawn(
        self,
        cancel: &CancellationToken,
    ) -> (watch::Receiver<StatusSnapshot>, JoinHandle<()>) {
        let initial = self.probe();
        info!(connection = %initial.connection, player_running = initial.player_running, "Engine status");
        self.write_status_file(&initial);

        let (tx, rx) = watch::channel(initial);
        let cancel = cancel.clone();
        let task = tokio::spawn(async move { self.run(tx, cancel).await });
        (rx, task)
    }

    async fn run(self, tx: watch::Sender<StatusSnapshot>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let snapshot = self.probe();
            let previous = tx.borrow().clone();
            if previous.same_state(&snapshot) {
                continue;
            }

            if previous.connection != snapshot.connection {
                info!(from = %previous.connection, to = %snapshot.connection, "Engine connection changed");
            }
            if previous.player_running != snapshot.player_running {
                info!(running = snapshot.player_running, "Companion process state changed");
            }
            self.write_status_file(&snapshot);
            tx.send_replace(snapshot);
        }
        debug!("Status monitor stopped");
    }

    fn write_status_file(&self, snapshot: &StatusSnapshot) {
        let Some(path) = &self.status_file else {
            return;
        };
        match serde_json::to_string_pretty(snapshot) {
            Ok(json) => {
                if let Err(err) = fs::write(path, json) {
                    warn!(path = %path.display(), error = %err, "Failed to write status file");
                }
            }
            Err(err) => warn!(error = %err, "Failed to serialize status"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SimulatedEngine;
    use tempfile::TempDir;

    #[test]
    fn test_probe_states() {
        let engine = SimulatedEngine::new();
        let snapshot = StatusSnapshot::probe(&engine, 2);
        assert_eq!(snapshot.connection, ConnectionStatus::Connected);
        assert!(!snapshot.offer_launch);
        assert_eq!(snapshot.clients, 2);

        engine.set_connected(false);
        let snapshot = StatusSnapshot::probe(&engine, 0);
        assert_eq!(snapshot.connection, ConnectionStatus::NotConnected);
        assert!(snapshot.player_running);
        assert!(!snapshot.offer_launch);

        engine.set_running(false);
        assert!(StatusSnapshot::probe(&engine, 0).offer_launch);
    }

    #[test]
    fn test_probe_failure_is_unknown() {
        let engine = SimulatedEngine::new();
        engine.fail_with(Some("library unloaded"));
        let snapshot = StatusSnapshot::probe(&engine, 0);
        assert_eq!(snapshot.connection, ConnectionStatus::Unknown);
        assert!(snapshot.offer_launch);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_publishes_changes_and_writes_file() {
        let dir = TempDir::new().unwrap();
        let status_file = dir.path().join("status.json");
        let engine = Arc::new(SimulatedEngine::new());
        let cancel = CancellationToken::new();

        let monitor = StatusMonitor::new(
            engine.clone(),
            Arc::new(ClientRegistry::new()),
            Duration::from_secs(1),
        )
        .with_status_file(Some(status_file.clone()));
        let (mut rx, task) = monitor.spawn(&cancel);
        assert_eq!(rx.borrow_and_update().connection, ConnectionStatus::Connected);

        engine.set_connected(false);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().connection, ConnectionStatus::NotConnected);

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&status_file).unwrap()).unwrap();
        assert_eq!(written["connection"], "not_connected");
        assert_eq!(written["player_running"], true);

        cancel.cancel();
        task.await.unwrap();
    }
}
