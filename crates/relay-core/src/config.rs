//! Relay configuration.
//!
//! Loaded from a YAML file (`relay.yml` by default). Relative paths in the
//! file resolve against the directory that contains it.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("required setting \"{0}\" is missing or blank")]
    MissingKey(&'static str),

    #[error("settings.mode must be either \"Tail\" or \"Websocket\", got \"{0}\"")]
    InvalidMode(String),
}

/// Which ingestion front-end feeds the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    Tail,
    Websocket,
}

impl IngestMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestMode::Tail => "Tail",
            IngestMode::Websocket => "Websocket",
        }
    }
}

impl std::str::FromStr for IngestMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("tail") {
            Ok(IngestMode::Tail)
        } else if trimmed.eq_ignore_ascii_case("websocket") {
            Ok(IngestMode::Websocket)
        } else {
            Err(ConfigError::InvalidMode(trimmed.to_string()))
        }
    }
}

/// Top-level relay configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub offline: OfflineConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub tail: TailSettings,
    #[serde(default)]
    pub status: StatusSettings,
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Directory relative paths resolve against.
    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsConfig {
    pub title: Option<String>,
    pub version: Option<String>,
    pub mode: Option<String>,
    pub log_file: Option<PathBuf>,
    /// Kept loose so a malformed port degrades to "disabled" instead of
    /// failing the whole file.
    pub port: Option<serde_yaml::Value>,
    pub bind: Option<String>,
    pub test_event: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    pub api_key: Option<String>,
    pub app_id: Option<String>,
    /// Offline fallback payload file.
    pub default_config: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OfflineConfig {
    /// Re-apply the offline payload whenever the live connection drops.
    #[serde(default)]
    pub retry_on_disconnect: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub player_start_secs: u64,
    pub connection_secs: u64,
    pub mappings_secs: u64,
    pub offline_grace_secs: u64,
    pub poll_interval_ms: u64,
    pub mappings_poll_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            player_start_secs: 45,
            connection_secs: 30,
            mappings_secs: 8,
            offline_grace_secs: 10,
            poll_interval_ms: 250,
            mappings_poll_ms: 100,
        }
    }
}

impl TimeoutsConfig {
    pub fn player_start(&self) -> Duration {
        Duration::from_secs(self.player_start_secs)
    }

    pub fn connection(&self) -> Duration {
        Duration::from_secs(self.connection_secs)
    }

    pub fn mappings(&self) -> Duration {
        Duration::from_secs(self.mappings_secs)
    }

    pub fn offline_grace(&self) -> Duration {
        Duration::from_secs(self.offline_grace_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn mappings_poll(&self) -> Duration {
        Duration::from_millis(self.mappings_poll_ms.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TailSettings {
    /// Tag marker; a line matches when it contains `[tag]`.
    pub tag: String,
    pub poll_interval_ms: u64,
}

impl Default for TailSettings {
    fn default() -> Self {
        Self {
            tag: "bHaptics".to_string(),
            poll_interval_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatusSettings {
    pub interval_ms: u64,
    pub status_file: Option<PathBuf>,
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            status_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    pub prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("Logs"),
            prefix: "haptic-relay".to_string(),
        }
    }
}

const DEFAULT_TEST_EVENT: &str = "HeartBeat";
const DEFAULT_BIND: &str = "0.0.0.0";

impl RelayConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Ok(Self::parse_yaml(&content)?.with_base_dir(base_dir))
    }

    /// Parses configuration from YAML text. Relative paths resolve against `.`.
    pub fn parse_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig = serde_yaml::from_str(content)?;
        Ok(config.with_base_dir(PathBuf::from(".")))
    }

    /// Overrides the directory relative paths resolve against.
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Checks the settings that must be present before anything starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("settings.title", &self.settings.title),
            ("settings.version", &self.settings.version),
            ("settings.mode", &self.settings.mode),
            ("engine.api_key", &self.engine.api_key),
            ("engine.app_id", &self.engine.app_id),
        ];
        for (key, value) in required {
            if value.as_deref().is_none_or(|v| v.trim().is_empty()) {
                return Err(ConfigError::MissingKey(key));
            }
        }
        self.mode()?;
        Ok(())
    }

    /// The configured ingestion mode.
    pub fn mode(&self) -> Result<IngestMode, ConfigError> {
        self.settings
            .mode
            .as_deref()
            .ok_or(ConfigError::MissingKey("settings.mode"))?
            .parse()
    }

    pub fn title(&self) -> &str {
        non_blank(self.settings.title.as_deref()).unwrap_or("The Win")
    }

    pub fn version(&self) -> &str {
        non_blank(self.settings.version.as_deref()).unwrap_or("1.2.3")
    }

    pub fn api_key(&self) -> &str {
        self.engine.api_key.as_deref().map_or("", str::trim)
    }

    pub fn app_id(&self) -> &str {
        self.engine.app_id.as_deref().map_or("", str::trim)
    }

    pub fn test_event(&self) -> &str {
        non_blank(self.settings.test_event.as_deref()).unwrap_or(DEFAULT_TEST_EVENT)
    }

    pub fn bind_address(&self) -> &str {
        non_blank(self.settings.bind.as_deref()).unwrap_or(DEFAULT_BIND)
    }

    /// The socket server port, or 0 when missing or out of range (disabled).
    pub fn port(&self) -> u16 {
        let parsed = match &self.settings.port {
            None => None,
            Some(serde_yaml::Value::Number(n)) => n.as_u64(),
            Some(serde_yaml::Value::String(s)) => s.trim().parse::<u64>().ok(),
            Some(_) => None,
        };
        match parsed.and_then(|p| u16::try_from(p).ok()).filter(|p| *p > 0) {
            Some(port) => port,
            None => {
                warn!("Invalid or missing port in config, using 0 (disabled)");
                0
            }
        }
    }

    /// The tailed log file, resolved against the base directory.
    pub fn log_file(&self) -> Option<PathBuf> {
        self.settings
            .log_file
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| self.resolve(p))
    }

    /// Resolves a possibly-relative path against the base directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Reads the offline fallback payload, if configured and present.
    pub fn load_offline_payload(&self) -> Option<String> {
        let Some(name) = self.engine.default_config.as_deref() else {
            warn!("engine.default_config not set in config file");
            return None;
        };
        let path = self.resolve(name);
        match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => {
                warn!(path = %path.display(), "Offline fallback file is blank, fallback disabled");
                None
            }
            Ok(content) => Some(content),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Offline fallback file not readable, fallback disabled"
                );
                None
            }
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
settings:
  title: "Test Game"
  version: "0.1"
  mode: websocket
  port: 8787
engine:
  api_key: key
  app_id: app
"#;

    #[test]
    fn test_valid_config() {
        let config = RelayConfig::parse_yaml(VALID).unwrap();
        config.validate().unwrap();
        assert_eq!(config.mode().unwrap(), IngestMode::Websocket);
        assert_eq!(config.port(), 8787);
        assert_eq!(config.test_event(), "HeartBeat");
        assert_eq!(config.bind_address(), "0.0.0.0");
        assert_eq!(config.timeouts.player_start(), Duration::from_secs(45));
        assert_eq!(config.tail.tag, "bHaptics");
    }

    #[test]
    fn test_missing_required_key_is_named() {
        let yaml = r#"
settings:
  title: "Test Game"
  version: "0.1"
  mode: tail
engine:
  api_key: "   "
  app_id: app
"#;
        let config = RelayConfig::parse_yaml(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey("engine.api_key")));
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let yaml = VALID.replace("mode: websocket", "mode: serial");
        let config = RelayConfig::parse_yaml(&yaml).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidMode(m)) if m == "serial"));
    }

    #[test]
    fn test_mode_is_case_insensitive() {
        assert_eq!("TAIL".parse::<IngestMode>().unwrap(), IngestMode::Tail);
        assert_eq!(" WebSocket ".parse::<IngestMode>().unwrap(), IngestMode::Websocket);
    }

    #[test]
    fn test_bad_port_disables_server() {
        for port in ["0", "70000", "\"abc\"", "[1]"] {
            let yaml = VALID.replace("port: 8787", &format!("port: {port}"));
            let config = RelayConfig::parse_yaml(&yaml).unwrap();
            assert_eq!(config.port(), 0, "port {port}");
        }
        let yaml = VALID.replace("port: 8787", "port: \"9001\"");
        assert_eq!(RelayConfig::parse_yaml(&yaml).unwrap().port(), 9001);
    }

    #[test]
    fn test_relative_paths_resolve_against_base_dir() {
        let yaml = format!("{VALID}\n  default_config: offline.json\n");
        let yaml = yaml.replace("settings:\n", "settings:\n  log_file: game.log\n");
        let config = RelayConfig::parse_yaml(&yaml)
            .unwrap()
            .with_base_dir("/opt/relay");
        assert_eq!(config.log_file(), Some(PathBuf::from("/opt/relay/game.log")));
    }

    #[test]
    fn test_offline_payload_loaded_from_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("offline.json"), r#"{"appId":"x"}"#).unwrap();
        let path = dir.path().join("relay.yml");
        std::fs::write(
            &path,
            format!("{VALID}  default_config: offline.json\n"),
        )
        .unwrap();

        let config = RelayConfig::from_file(&path).unwrap();
        assert_eq!(config.load_offline_payload().as_deref(), Some(r#"{"appId":"x"}"#));
    }

    #[test]
    fn test_blank_offline_payload_disables_fallback() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("offline.json"), "  \n\t\n").unwrap();
        let yaml = format!("{VALID}  default_config: offline.json\n");
        let config = RelayConfig::parse_yaml(&yaml)
            .unwrap()
            .with_base_dir(dir.path());
        assert_eq!(config.base_dir(), dir.path());
        assert!(config.load_offline_payload().is_none());
    }

    #[test]
    fn test_missing_offline_payload_disables_fallback() {
        let yaml = format!("{VALID}  default_config: nowhere.json\n");
        let config = RelayConfig::parse_yaml(&yaml)
            .unwrap()
            .with_base_dir(std::env::temp_dir());
        assert!(config.load_offline_payload().is_none());
    }
}
