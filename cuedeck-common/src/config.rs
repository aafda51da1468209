//! Configuration loading
//!
//! Every setting has a built-in default, so a missing or empty TOML file is
//! a valid configuration. Config file resolution priority:
//! 1. Explicit path (command-line argument)
//! 2. `CUEDECK_CONFIG` environment variable
//! 3. `<platform config dir>/cuedeck/config.toml`
//! 4. Built-in defaults (no file)

use crate::time::millis_to_duration;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable naming a config file
pub const CONFIG_ENV_VAR: &str = "CUEDECK_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlayerConfig {
    pub session: SessionConfig,
    pub connection: ConnectionConfig,
    pub transcode: TranscodeConfig,
    pub logging: LoggingConfig,
}

/// Queue, watchdog and retry tuning for a playback session
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Initial volume (0-100)
    pub default_volume: u8,
    /// Maximum number of queued tracks (excluding the current one)
    pub max_queue_size: usize,
    /// Maximum number of tracks taken from one resolution result
    pub max_playlist_size: usize,
    /// Finished tracks kept for `previous`
    pub history_limit: usize,
    /// Resume-from-offset retries per track after unexpected ends
    pub max_track_retries: u32,
    /// How far short of the known duration counts as an unexpected end
    pub end_tolerance_ms: u64,
    /// Added to the remaining duration when arming the watchdog
    pub watchdog_margin_ms: u64,
    /// Lower bound for a watchdog deadline
    pub watchdog_min_ms: u64,
    /// Re-poll period for tracks of unknown duration
    pub watchdog_unknown_duration_ms: u64,
    /// Re-poll period when the sink is in an unexpected state
    pub watchdog_recheck_ms: u64,
    /// Idle time with an empty queue before the session cleans itself up
    pub idle_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_volume: 100,
            max_queue_size: 100,
            max_playlist_size: 50,
            history_limit: 50,
            max_track_retries: 2,
            end_tolerance_ms: 1500,
            watchdog_margin_ms: 4000,
            watchdog_min_ms: 5000,
            watchdog_unknown_duration_ms: 5 * 60 * 1000,
            watchdog_recheck_ms: 2000,
            idle_timeout_ms: 5 * 60 * 1000,
        }
    }
}

impl SessionConfig {
    pub fn end_tolerance(&self) -> Duration {
        millis_to_duration(self.end_tolerance_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        millis_to_duration(self.idle_timeout_ms)
    }
}

/// Transport connection and recovery tuning
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Initial connect must reach Ready within this window
    pub connect_timeout_ms: u64,
    /// Each explicit reconnect must reach Ready within this window
    pub reconnect_timeout_ms: u64,
    /// After a disconnect, wait this long for the transport to start reconnecting itself
    pub auto_reconnect_connecting_ms: u64,
    /// Once reconnecting, wait this long for it to become Ready
    pub auto_reconnect_ready_ms: u64,
    /// Period between explicit recovery attempts
    pub recovery_interval_ms: u64,
    /// Recovery attempts before giving up
    pub max_recovery_attempts: u32,
    /// Period of the independent liveness check
    pub health_check_interval_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 30_000,
            reconnect_timeout_ms: 15_000,
            auto_reconnect_connecting_ms: 5_000,
            auto_reconnect_ready_ms: 10_000,
            recovery_interval_ms: 3_000,
            max_recovery_attempts: 5,
            health_check_interval_ms: 30_000,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        millis_to_duration(self.connect_timeout_ms)
    }

    pub fn reconnect_timeout(&self) -> Duration {
        millis_to_duration(self.reconnect_timeout_ms)
    }

    pub fn recovery_interval(&self) -> Duration {
        millis_to_duration(self.recovery_interval_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        millis_to_duration(self.health_check_interval_ms)
    }
}

/// External transcoder settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranscodeConfig {
    /// ffmpeg executable (name on PATH or absolute path)
    pub ffmpeg_path: PathBuf,
    /// Output sample rate (Hz)
    pub sample_rate: u32,
    /// Output channel count
    pub channels: u16,
    /// User-Agent for fetching remote sources without provider headers
    pub user_agent: String,
    /// Named audio filter presets (name -> ffmpeg `-af` expression)
    pub filters: BTreeMap<String, String>,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        let filters = [
            ("bassboost", "bass=g=20"),
            ("nightcore", "aresample=48000,asetrate=48000*1.25"),
            ("vaporwave", "aresample=48000,asetrate=48000*0.8"),
            ("8d", "apulsator=hz=0.09"),
        ]
        .into_iter()
        .map(|(name, expr)| (name.to_string(), expr.to_string()))
        .collect();

        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            sample_rate: 48_000,
            channels: 2,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
            filters,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl PlayerConfig {
    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PlayerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config from {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Resolve the config file and load it, falling back to defaults when
    /// no file exists anywhere.
    pub fn load_or_default(cli_path: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_path) {
            Some(path) => Self::load(&path),
            None => {
                debug!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Reject settings the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.session.default_volume > 100 {
            return Err(Error::Config(format!(
                "session.default_volume must be 0-100, got {}",
                self.session.default_volume
            )));
        }
        if self.connection.recovery_interval_ms == 0 {
            return Err(Error::Config("connection.recovery_interval_ms must be > 0".to_string()));
        }
        if self.connection.health_check_interval_ms == 0 {
            return Err(Error::Config(
                "connection.health_check_interval_ms must be > 0".to_string(),
            ));
        }
        if self.transcode.sample_rate == 0 || self.transcode.channels == 0 {
            return Err(Error::Config(
                "transcode.sample_rate and transcode.channels must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Find the config file to use, if any.
///
/// An explicit path is returned even when it does not exist so that the
/// caller reports the error instead of silently using defaults.
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir()
        .map(|d| d.join("cuedeck").join("config.toml"))
        .filter(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = PlayerConfig::from_toml_str("").unwrap();
        assert_eq!(config, PlayerConfig::default());
        assert_eq!(config.session.max_track_retries, 2);
        assert_eq!(config.connection.max_recovery_attempts, 5);
        assert_eq!(config.transcode.sample_rate, 48_000);
        assert!(config.transcode.filters.contains_key("nightcore"));
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = PlayerConfig::from_toml_str(
            r#"
            [session]
            default_volume = 40

            [connection]
            recovery_interval_ms = 1000
            "#,
        )
        .unwrap();

        assert_eq!(config.session.default_volume, 40);
        assert_eq!(config.session.max_queue_size, 100);
        assert_eq!(config.connection.recovery_interval(), Duration::from_secs(1));
        assert_eq!(config.connection.max_recovery_attempts, 5);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = PlayerConfig::from_toml_str("[session]\ndefault_volume = 150\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = PlayerConfig::from_toml_str("[connection]\nrecovery_interval_ms = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = PlayerConfig::from_toml_str("[session]\ndefault_volume = \"loud\"\n").unwrap_err();
        assert!(matches!(err, Error::TomlParse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[transcode]\nffmpeg_path = \"/opt/ffmpeg/bin/ffmpeg\"").unwrap();

        let config = PlayerConfig::load(file.path()).unwrap();
        assert_eq!(config.transcode.ffmpeg_path, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let err = PlayerConfig::load(Path::new("/nonexistent/cuedeck.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    #[serial]
    fn test_resolve_prefers_cli_then_env() {
        std::env::set_var(CONFIG_ENV_VAR, "/tmp/from-env.toml");

        let cli = Path::new("/tmp/from-cli.toml");
        assert_eq!(resolve_config_path(Some(cli)), Some(cli.to_path_buf()));
        assert_eq!(resolve_config_path(None), Some(PathBuf::from("/tmp/from-env.toml")));

        std::env::remove_var(CONFIG_ENV_VAR);
    }
}
