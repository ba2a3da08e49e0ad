//! Check command for validating a relay configuration.

use anyhow::{Context, Result, bail};
use clap::Parser;
use relay_core::{IngestMode, RelayConfig};
use std::path::Path;

#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: false,
            detail: detail.into(),
        }
    }
}

/// Runs every check against a loaded config. The offline payload is
/// informational; a missing payload only disables the fallback.
pub fn run_checks(config: &RelayConfig) -> Vec<CheckResult> {
    let mut results = Vec::new();

    match config.validate() {
        Ok(()) => results.push(CheckResult::pass(
            "config",
            format!("{} {}", config.title(), config.version()),
        )),
        Err(err) => {
            results.push(CheckResult::fail("config", err.to_string()));
            return results;
        }
    }

    let source = match config.mode() {
        Ok(IngestMode::Tail) => match config.log_file() {
            Some(path) if path.is_file() => {
                CheckResult::pass("source", format!("tailing {}", path.display()))
            }
            Some(path) => CheckResult::fail("source", format!("log file {} not found", path.display())),
            None => CheckResult::fail("source", "settings.log_file is not set"),
        },
        Ok(IngestMode::Websocket) => match config.port() {
            0 => CheckResult::fail("source", "socket server disabled (port 0)"),
            port => CheckResult::pass(
                "source",
                format!("listening on {}:{port}", config.bind_address()),
            ),
        },
        Err(err) => CheckResult::fail("source", err.to_string()),
    };
    results.push(source);

    let offline = match config.load_offline_payload() {
        Some(payload) => CheckResult::pass("offline", format!("{} bytes", payload.len())),
        None => CheckResult::pass("offline", "no fallback payload, offline mode disabled"),
    };
    results.push(offline);

    results
}

pub fn execute(config_path: &Path, args: CheckArgs) -> Result<()> {
    let config = RelayConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let results = run_checks(&config);

    if !args.quiet {
        for result in &results {
            let mark = if result.passed { "ok" } else { "FAIL" };
            println!("{mark:>4}  {:<8} {}", result.name, result.detail);
        }
    }

    let failed = results.iter().filter(|r| !r.passed).count();
    if failed > 0 {
        bail!("{failed} check(s) failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
settings:
  title: "Test Game"
  version: "1.0"
  mode: websocket
  port: 9001
engine:
  api_key: key
  app_id: app
"#;

    #[test]
    fn test_websocket_config_passes() {
        let config = RelayConfig::parse_yaml(BASE).unwrap();
        let results = run_checks(&config);
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.passed), "{results:?}");
        assert_eq!(results[1].detail, "listening on 0.0.0.0:9001");
    }

    #[test]
    fn test_invalid_config_stops_early() {
        let config = RelayConfig::parse_yaml(&BASE.replace("app_id: app", "")).unwrap();
        let results = run_checks(&config);
        assert_eq!(results.len(), 1);
        assert!(!results[0].passed);
        assert!(results[0].detail.contains("engine.app_id"));
    }

    #[test]
    fn test_missing_log_file_fails_source() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = BASE
            .replace("mode: websocket", "mode: Tail")
            .replace("port: 9001", "log_file: missing.log");
        let config = RelayConfig::parse_yaml(&yaml).unwrap().with_base_dir(dir.path());
        let source = &run_checks(&config)[1];
        assert!(!source.passed);
        assert!(source.detail.contains("missing.log"));

        std::fs::write(dir.path().join("missing.log"), "").unwrap();
        assert!(run_checks(&config)[1].passed);
    }

    #[test]
    fn test_disabled_port_fails_source() {
        let config = RelayConfig::parse_yaml(&BASE.replace("port: 9001", "port: 0")).unwrap();
        assert!(!run_checks(&config)[1].passed);
    }
}
