//! calbridge configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{CalBridgeError, CalBridgeResult};

static DEFAULT_TIMEOUT: &str = "30s";
static DEFAULT_RETRY_BACKOFF: &str = "500ms";
static DEFAULT_APP_NAME: &str = "Calendar";
const DEFAULT_RETRIES: u32 = 2;

/// Where the Calendar app keeps its store, newest layout first.
const STORE_CANDIDATES: [&str; 3] = [
    "~/Library/Group Containers/group.com.apple.calendar/Calendar.sqlitedb",
    "~/Library/Calendars/Calendar.sqlitedb",
    "~/Library/Calendars/Calendar Cache",
];

fn default_timeout() -> String {
    DEFAULT_TIMEOUT.to_string()
}

fn default_retry_backoff() -> String {
    DEFAULT_RETRY_BACKOFF.to_string()
}

fn default_app_name() -> String {
    DEFAULT_APP_NAME.to_string()
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

/// Configuration at ~/.config/calbridge/config.toml, overridable with
/// `CALBRIDGE_*` environment variables at load time.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BridgeConfig {
    /// Calendar store file. Defaults to the first well-known location that exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,

    /// Directory holding the undo/redo journal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_dir: Option<PathBuf>,

    /// Per-command deadline (humantime, `0s` disables it).
    #[serde(default = "default_timeout")]
    pub timeout: String,

    /// Retries for transient automation failures.
    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: String,

    /// Scriptable application to drive.
    #[serde(default = "default_app_name")]
    pub app_name: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            store_path: None,
            journal_dir: None,
            timeout: default_timeout(),
            retries: default_retries(),
            retry_backoff: default_retry_backoff(),
            app_name: default_app_name(),
        }
    }
}

/// Retry settings for transient automation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        RetryPolicy {
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }
}

fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}

fn parse_duration(key: &str, value: &str) -> CalBridgeResult<Duration> {
    humantime::parse_duration(value.trim())
        .map_err(|e| CalBridgeError::Config(format!("invalid {key} '{value}': {e}")))
}

impl BridgeConfig {
    pub fn config_path() -> CalBridgeResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CalBridgeError::Config("Could not determine config directory".into()))?
            .join("calbridge");

        Ok(config_dir.join("config.toml"))
    }

    /// Load the user's config, creating a commented default file on first use.
    pub fn load() -> CalBridgeResult<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> CalBridgeResult<Self> {
        Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix("CALBRIDGE"))
            .build()
            .map_err(|e| CalBridgeError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| CalBridgeError::Config(e.to_string()))
    }

    /// Create a default config file with all options commented out.
    pub fn create_default_config(path: &Path) -> CalBridgeResult<()> {
        let contents = format!(
            "\
# calbridge configuration

# Calendar store to read (defaults to the Calendar app's own store):
# store_path = \"{}\"

# Where undo/redo history is kept:
# journal_dir = \"~/.local/share/calbridge\"

# Give up waiting on the Calendar app after this long (0s = wait forever):
# timeout = \"{}\"

# Retries for transient automation failures, and the pause between them:
# retries = {}
# retry_backoff = \"{}\"
",
            STORE_CANDIDATES[0], DEFAULT_TIMEOUT, DEFAULT_RETRIES, DEFAULT_RETRY_BACKOFF
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CalBridgeError::Config(format!("Could not create config directory: {e}"))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| CalBridgeError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }

    /// The command deadline, or `None` when disabled.
    pub fn deadline(&self) -> CalBridgeResult<Option<Duration>> {
        let timeout = parse_duration("timeout", &self.timeout)?;
        Ok((!timeout.is_zero()).then_some(timeout))
    }

    pub fn retry_policy(&self) -> CalBridgeResult<RetryPolicy> {
        Ok(RetryPolicy {
            max_retries: self.retries,
            backoff: parse_duration("retry_backoff", &self.retry_backoff)?,
        })
    }

    pub fn store_path(&self) -> PathBuf {
        if let Some(path) = &self.store_path {
            return expand_path(path);
        }
        let candidates: Vec<PathBuf> = STORE_CANDIDATES
            .iter()
            .map(|c| expand_path(Path::new(c)))
            .collect();
        candidates
            .iter()
            .find(|p| p.exists())
            .cloned()
            .unwrap_or_else(|| candidates[0].clone())
    }

    pub fn journal_dir(&self) -> CalBridgeResult<PathBuf> {
        if let Some(dir) = &self.journal_dir {
            return Ok(expand_path(dir));
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| CalBridgeError::Config("Could not determine data directory".into()))?;
        Ok(data_dir.join("calbridge"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_file_loads_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calbridge/config.toml");
        BridgeConfig::create_default_config(&path).unwrap();

        let config = BridgeConfig::load_from(&path).unwrap();
        assert_eq!(config.retries, 2);
        assert_eq!(config.deadline().unwrap(), Some(Duration::from_secs(30)));
        assert_eq!(
            config.retry_policy().unwrap().backoff,
            Duration::from_millis(500)
        );
        assert_eq!(config.app_name, "Calendar");
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "timeout = \"0s\"\nretries = 5\njournal_dir = \"/tmp/cb-journal\"\n",
        )
        .unwrap();

        let config = BridgeConfig::load_from(&path).unwrap();
        assert_eq!(config.deadline().unwrap(), None);
        assert_eq!(config.retry_policy().unwrap().max_retries, 5);
        assert_eq!(
            config.journal_dir().unwrap(),
            PathBuf::from("/tmp/cb-journal")
        );
    }

    #[test]
    fn bad_duration_is_a_config_error() {
        let config = BridgeConfig {
            timeout: "soon".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.deadline().unwrap_err(),
            CalBridgeError::Config(_)
        ));
    }
}
