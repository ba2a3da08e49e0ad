//! Orchestration from a config file through to live ingestion.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use relay_core::engine::{EngineCall, SimulatedEngine};
use relay_core::{
    ClientRegistry, Dispatcher, Orchestrator, RelayConfig, RequestIdAllocator, StartupOutcome,
    StartupSettings, StartupState,
};
use tempfile::TempDir;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

fn write_config(dir: &Path, body: &str) -> RelayConfig {
    let path = dir.join("relay.yml");
    std::fs::write(&path, body).unwrap();
    let config = RelayConfig::from_file(&path).unwrap();
    config.validate().unwrap();
    config
}

fn orchestrator(config: &RelayConfig, engine: Arc<SimulatedEngine>) -> (Orchestrator, CancellationToken) {
    let settings = StartupSettings::from_config(config).unwrap();
    let dispatcher = Dispatcher::new(engine, Arc::new(RequestIdAllocator::new()));
    let cancel = CancellationToken::new();
    let orchestrator = Orchestrator::new(
        settings,
        dispatcher,
        Arc::new(ClientRegistry::new()),
        cancel.clone(),
    );
    (orchestrator, cancel)
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[tokio::test]
async fn test_tail_mode_relays_appended_lines() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("game.log"), "[bHaptics] play,BeforeStart\n").unwrap();
    let config = write_config(
        dir.path(),
        r#"
settings:
  title: "Test Game"
  version: "1.0"
  mode: Tail
  log_file: game.log
engine:
  api_key: key
  app_id: app
tail:
  poll_interval_ms: 20
"#,
    );

    let engine = Arc::new(SimulatedEngine::new());
    let (orchestrator, cancel) = orchestrator(&config, engine.clone());
    assert_eq!(orchestrator.run().await, StartupOutcome::Active);
    assert_eq!(orchestrator.state(), StartupState::IngestionActive);

    let mut log = std::fs::OpenOptions::new()
        .append(true)
        .open(dir.path().join("game.log"))
        .unwrap();
    writeln!(log, "INFO some unrelated output").unwrap();
    writeln!(log, "INFO [bHaptics] playDot,0,100,0;1;5;7").unwrap();
    log.flush().unwrap();

    let expected = EngineCall::PlayDot {
        request_id: 1,
        position: 0,
        duration_millis: 100,
        motors: vec![0, 1, 5, 7],
    };
    let mut seen = false;
    for _ in 0..250 {
        if engine.calls().contains(&expected) {
            seen = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(seen, "tailed command never reached the engine: {:?}", engine.calls());
    assert!(!engine.calls().contains(&EngineCall::Play("BeforeStart".into())));

    orchestrator.shutdown().await;
    cancel.cancel();
}

#[tokio::test]
async fn test_websocket_mode_serves_clients() {
    let dir = TempDir::new().unwrap();
    let port = free_port();
    let config = write_config(
        dir.path(),
        &format!(
            r#"
settings:
  title: "Test Game"
  version: "1.0"
  mode: websocket
  port: {port}
  bind: 127.0.0.1
engine:
  api_key: key
  app_id: app
"#
        ),
    );

    let engine = Arc::new(SimulatedEngine::new());
    let (orchestrator, cancel) = orchestrator(&config, engine.clone());
    assert_eq!(orchestrator.run().await, StartupOutcome::Active);
    // A second run leaves the running server alone.
    assert_eq!(orchestrator.run().await, StartupOutcome::AlreadyActive);

    let (mut client, _) = connect_async(format!("ws://127.0.0.1:{port}")).await.unwrap();
    client
        .send(Message::Text("playParam,Bump,0,0.8,1.2,45,10".into()))
        .await
        .unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reply, Message::Text("1".into()));

    orchestrator.shutdown().await;
    cancel.cancel();
}

#[tokio::test]
async fn test_shutdown_closes_clients_before_cancelling() {
    let dir = TempDir::new().unwrap();
    let port = free_port();
    let config = write_config(
        dir.path(),
        &format!(
            r#"
settings:
  title: "Test Game"
  version: "1.0"
  mode: websocket
  port: {port}
  bind: 127.0.0.1
engine:
  api_key: key
  app_id: app
"#
        ),
    );

    let (orchestrator, cancel) = orchestrator(&config, Arc::new(SimulatedEngine::new()));
    assert_eq!(orchestrator.run().await, StartupOutcome::Active);

    let (mut client, _) = connect_async(format!("ws://127.0.0.1:{port}")).await.unwrap();
    for _ in 0..250 {
        if orchestrator.registry().len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(orchestrator.registry().len(), 1);

    // The shared token is still live, so the close frame comes from shutdown.
    orchestrator.shutdown().await;
    assert!(!cancel.is_cancelled());
    assert!(orchestrator.registry().is_empty());
    assert_eq!(orchestrator.state(), StartupState::NotStarted);

    let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .unwrap();
    assert!(
        matches!(frame, Some(Ok(Message::Close(_)))),
        "expected a close frame, got {frame:?}"
    );
    cancel.cancel();
}

#[tokio::test]
async fn test_disabled_port_leaves_relay_degraded() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        dir.path(),
        r#"
settings:
  title: "Test Game"
  version: "1.0"
  mode: websocket
  port: not-a-port
engine:
  api_key: key
  app_id: app
"#,
    );

    let (orchestrator, _cancel) = orchestrator(&config, Arc::new(SimulatedEngine::new()));
    let outcome = orchestrator.run().await;
    assert!(matches!(outcome, StartupOutcome::IngestionUnavailable(_)));
    assert_eq!(orchestrator.state(), StartupState::Failed);
    assert!(!orchestrator.is_ingesting().await);
}

#[tokio::test]
async fn test_port_in_use_is_retryable() {
    let dir = TempDir::new().unwrap();
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();
    let config = write_config(
        dir.path(),
        &format!(
            r#"
settings:
  title: "Test Game"
  version: "1.0"
  mode: websocket
  port: {port}
  bind: 127.0.0.1
engine:
  api_key: key
  app_id: app
"#
        ),
    );

    let (orchestrator, _cancel) = orchestrator(&config, Arc::new(SimulatedEngine::new()));
    let outcome = orchestrator.run().await;
    assert!(matches!(outcome, StartupOutcome::IngestionUnavailable(_)));
    assert_eq!(orchestrator.state(), StartupState::IngestionUnavailable);

    drop(occupied);
    assert_eq!(orchestrator.run().await, StartupOutcome::Active);
    orchestrator.shutdown().await;
}
