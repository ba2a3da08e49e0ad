//! Run command: bring the engine online and relay until interrupted.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use relay_core::engine::SimulatedEngine;
use relay_core::{
    ClientRegistry, Dispatcher, Orchestrator, RelayConfig, RequestIdAllocator, StartupSettings,
    StatusMonitor, StatusSnapshot, init_logging,
};
use relay_proto::HapticEngine;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::signals::wait_for_shutdown_signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EngineKind {
    /// The vendor haptic library
    Native,
    /// An in-process engine that records calls (dry run)
    Simulated,
}

impl EngineKind {
    #[cfg(feature = "native")]
    const DEFAULT: Self = EngineKind::Native;
    #[cfg(not(feature = "native"))]
    const DEFAULT: Self = EngineKind::Simulated;
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Engine implementation to drive
    #[arg(long, value_enum, default_value_t = EngineKind::DEFAULT)]
    pub engine: EngineKind,

    /// Launch the haptic player whenever it is down and nothing is connected
    #[arg(long)]
    pub relaunch: bool,
}

fn build_engine(kind: EngineKind) -> Result<Arc<dyn HapticEngine>> {
    match kind {
        EngineKind::Simulated => {
            warn!("Using the simulated engine; no haptics will play");
            Ok(Arc::new(SimulatedEngine::new()))
        }
        #[cfg(feature = "native")]
        EngineKind::Native => {
            let engine = relay_core::engine::NativeEngine::load()
                .context("loading the native haptic library")?;
            Ok(Arc::new(engine))
        }
        #[cfg(not(feature = "native"))]
        EngineKind::Native => {
            bail!("this build has no native engine support; rebuild with --features native")
        }
    }
}

fn ensure_installed(engine: &dyn HapticEngine) -> Result<()> {
    if !engine
        .is_installed()
        .context("checking the haptic player installation")?
    {
        bail!("the haptic player is not installed");
    }
    Ok(())
}

pub async fn execute(config_path: &Path, verbose: bool, args: RunArgs) -> Result<()> {
    let config = RelayConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    config.validate().context("invalid configuration")?;

    let log_dir = config.resolve(&config.logging.dir);
    let _log_guard = init_logging(&log_dir, &config.logging.prefix, verbose)
        .with_context(|| format!("initializing logging in {}", log_dir.display()))?;
    info!(
        title = config.title(),
        version = config.version(),
        config = %config_path.display(),
        "Starting Haptic Relay"
    );

    let engine = build_engine(args.engine)?;
    ensure_installed(engine.as_ref())?;

    let settings = StartupSettings::from_config(&config)?;
    let registry = Arc::new(ClientRegistry::new());
    let dispatcher = Dispatcher::new(Arc::clone(&engine), Arc::new(RequestIdAllocator::new()));
    let cancel = CancellationToken::new();

    let monitor = StatusMonitor::new(
        Arc::clone(&engine),
        Arc::clone(&registry),
        Duration::from_millis(config.status.interval_ms.max(1)),
    )
    .with_status_file(config.status.status_file.as_deref().map(|p| config.resolve(p)));
    let (mut status, status_task) = monitor.spawn(&cancel);

    let orchestrator = Orchestrator::new(settings, dispatcher, registry, cancel.clone());
    let startup = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run().await })
    };

    let shutdown = wait_for_shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(err) = result {
                    error!(error = %err, "Failed to listen for shutdown signals");
                }
                info!("Shutdown requested");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot: StatusSnapshot = status.borrow_and_update().clone();
                if args.relaunch && snapshot.offer_launch && !orchestrator.is_in_progress() {
                    match orchestrator.request_launch() {
                        Ok(launched) => info!(launched, "Relaunch attempted"),
                        Err(err) => warn!(error = %err, "Relaunch failed"),
                    }
                }
            }
        }
    }

    // Closes socket clients before the token tears down their tasks.
    orchestrator.shutdown().await;
    cancel.cancel();
    if let Err(err) = startup.await {
        warn!(error = %err, "Startup task ended abnormally");
    }
    if let Err(err) = status_task.await {
        warn!(error = %err, "Status monitor ended abnormally");
    }
    if let Err(err) = engine.close() {
        warn!(error = %err, "Closing the engine connection failed");
    }

    info!("Haptic Relay stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_engine_is_installed() {
        let engine = build_engine(EngineKind::Simulated).unwrap();
        assert!(engine.is_installed().unwrap());
    }

    #[test]
    fn test_uninstalled_player_stops_startup() {
        let engine = SimulatedEngine::new();
        engine.set_installed(false);
        let err = ensure_installed(&engine).unwrap_err();
        assert!(err.to_string().contains("not installed"));

        engine.fail_with(Some("library unavailable"));
        let err = ensure_installed(&engine).unwrap_err();
        assert!(format!("{err:#}").contains("library unavailable"));
    }

    #[cfg(not(feature = "native"))]
    #[test]
    fn test_native_engine_requires_feature() {
        let err = build_engine(EngineKind::Native).err().unwrap();
        assert!(err.to_string().contains("--features native"));
    }
}
