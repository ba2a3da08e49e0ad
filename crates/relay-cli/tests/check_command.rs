//! Runs the built binary's `check` subcommand against real config files.

use std::process::Command;

use tempfile::TempDir;

fn haptic_relay() -> Command {
    Command::new(env!("CARGO_BIN_EXE_haptic-relay"))
}

#[test]
fn test_check_passes_for_websocket_config() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("relay.yml");
    std::fs::write(
        &config,
        r#"
settings:
  title: "Test Game"
  version: "1.0"
  mode: Websocket
  port: 15881
engine:
  api_key: key
  app_id: app
"#,
    )
    .unwrap();

    let output = haptic_relay()
        .args(["check", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("listening on 0.0.0.0:15881"), "{stdout}");
}

#[test]
fn test_check_fails_for_missing_key() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("relay.yml");
    std::fs::write(&config, "settings:\n  title: \"Test Game\"\n").unwrap();

    let output = haptic_relay()
        .args(["check", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("settings.version"), "{stdout}");
}

#[test]
fn test_check_fails_for_missing_file() {
    let dir = TempDir::new().unwrap();
    let output = haptic_relay()
        .args(["check", "--quiet", "--config"])
        .arg(dir.path().join("absent.yml"))
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}
