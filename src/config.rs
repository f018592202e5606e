//! Configuration file parser for ~/.config/canopy/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning for each one
//! since they are usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::FetchSettings;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Subscription document read at startup.
    pub opml_path: PathBuf,

    /// Per-attempt budget for one feed request.
    pub fetch_timeout_secs: u64,

    /// Retries for 429/5xx responses before a feed is reported as failed.
    pub max_retries: u32,

    /// First retry delay; doubles on every further retry.
    pub retry_base_delay_ms: u64,

    pub max_feed_size_bytes: usize,

    /// Fetches in flight per load. 0 = every feed of the load at once.
    pub max_concurrent_fetches: usize,

    pub user_agent: String,

    /// Allow feed URLs on localhost and private networks.
    pub allow_private_hosts: bool,
}

impl Default for Config {
    fn default() -> Self {
        let fetch = FetchSettings::default();
        Self {
            opml_path: PathBuf::from("RSS.opml"),
            fetch_timeout_secs: fetch.timeout.as_secs(),
            max_retries: fetch.max_retries,
            retry_base_delay_ms: fetch.retry_base_delay.as_millis() as u64,
            max_feed_size_bytes: fetch.max_body_bytes,
            max_concurrent_fetches: 0,
            user_agent: fetch.user_agent,
            allow_private_hosts: fetch.allow_private_hosts,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 8] = [
        "opml_path",
        "fetch_timeout_secs",
        "max_retries",
        "retry_base_delay_ms",
        "max_feed_size_bytes",
        "max_concurrent_fetches",
        "user_agent",
        "allow_private_hosts",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check size before reading so a huge file is never pulled into memory.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            opml = %config.opml_path.display(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Default config location: `$HOME/.config/canopy/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".config/canopy/config.toml"))
    }

    /// Transport settings derived from this config.
    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            timeout: Duration::from_secs(self.fetch_timeout_secs),
            max_retries: self.max_retries,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_body_bytes: self.max_feed_size_bytes,
            allow_private_hosts: self.allow_private_hosts,
            user_agent: self.user_agent.clone(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, content: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("canopy_config_test_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.opml_path, PathBuf::from("RSS.opml"));
        assert_eq!(config.fetch_timeout_secs, 30);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_base_delay_ms, 2000);
        assert_eq!(config.max_feed_size_bytes, 10 * 1024 * 1024);
        assert_eq!(config.max_concurrent_fetches, 0);
        assert!(config.user_agent.starts_with("canopy/"));
        assert!(!config.allow_private_hosts);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/canopy_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_empty_file_returns_default() {
        let (dir, path) = write_config("empty", "");
        assert_eq!(Config::load(&path).unwrap(), Config::default());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let (dir, path) = write_config("whitespace", "   \n  \n  ");
        assert_eq!(Config::load(&path).unwrap(), Config::default());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (dir, path) = write_config("partial", "max_retries = 1\n");

        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.fetch_timeout_secs, 30); // default
        assert_eq!(config.opml_path, PathBuf::from("RSS.opml")); // default

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let content = r#"
opml_path = "/home/me/feeds.opml"
fetch_timeout_secs = 10
max_retries = 5
retry_base_delay_ms = 250
max_feed_size_bytes = 1024
max_concurrent_fetches = 4
user_agent = "test-agent/1.0"
allow_private_hosts = true
"#;
        let (dir, path) = write_config("full", content);

        let config = Config::load(&path).unwrap();
        assert_eq!(config.opml_path, PathBuf::from("/home/me/feeds.opml"));
        assert_eq!(config.max_concurrent_fetches, 4);

        let settings = config.fetch_settings();
        assert_eq!(settings.timeout, Duration::from_secs(10));
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.retry_base_delay, Duration::from_millis(250));
        assert_eq!(settings.max_body_bytes, 1024);
        assert_eq!(settings.user_agent, "test-agent/1.0");
        assert!(settings.allow_private_hosts);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (dir, path) = write_config("invalid", "this is not [valid toml");

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let content = r#"
max_retries = 2
totally_fake_key = "should not fail"
another_unknown = 42
"#;
        let (dir, path) = write_config("unknown", content);

        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_retries, 2);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_wrong_type_returns_error() {
        // fetch_timeout_secs should be an integer
        let (dir, path) = write_config("wrongtype", "fetch_timeout_secs = \"soon\"\n");
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (dir, path) = write_config("too_large", &"a".repeat(1_048_577));

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_file_at_size_limit_accepted() {
        let mut content = "max_retries = 1\n".to_string();
        while content.len() < 1_048_576 - 20 {
            content.push_str("# padding comment\n");
        }
        content.truncate(1_048_576);
        let (dir, path) = write_config("at_limit", &content);

        assert!(Config::load(&path).is_ok());

        std::fs::remove_dir_all(&dir).ok();
    }
}
