//! Store configuration at ~/.config/calstore/config.toml

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, File};
use serde::{Deserialize, Serialize};

use crate::component::ComponentKind;
use crate::error::{CalError, CalResult};

static DEFAULT_STORE_DIR: &str = "~/.local/share/calstore";
static DEFAULT_FILE_NAME: &str = "calendar.ics";
static DEFAULT_SAVE_DELAY: &str = "500ms";
static DEFAULT_REFRESH_INTERVAL: &str = "30m";

fn default_store_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STORE_DIR)
}

fn default_file_name() -> String {
    DEFAULT_FILE_NAME.to_string()
}

fn default_save_delay() -> String {
    DEFAULT_SAVE_DELAY.to_string()
}

fn default_refresh_interval() -> String {
    DEFAULT_REFRESH_INTERVAL.to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How often to poll the sync log, e.g. "30m".
    #[serde(default = "default_refresh_interval")]
    pub interval: String,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        RefreshConfig {
            enabled: true,
            interval: default_refresh_interval(),
        }
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> CalResult<Duration> {
        parse_duration("refresh.interval", &self.interval)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Shared directory the sync log lives in.
    pub dir: PathBuf,

    /// Collection name inside the sync directory.
    pub collection: String,

    /// Name this store writes under. Defaults to `calstore-<hostname>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
}

impl SyncConfig {
    pub fn dir(&self) -> PathBuf {
        expand(&self.dir)
    }

    pub fn app_id(&self) -> String {
        self.app_id.clone().unwrap_or_else(default_app_id)
    }
}

fn default_app_id() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "local".to_string());
    format!("calstore-{host}")
}

/// A calendar user whose free/busy can be looked up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    #[serde(default = "default_file_name")]
    pub file_name: String,

    #[serde(default)]
    pub kind: ComponentKind,

    /// Debounce before a dirty store is written, e.g. "500ms".
    #[serde(default = "default_save_delay")]
    pub save_delay: String,

    #[serde(default)]
    pub refresh: RefreshConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncConfig>,

    /// The first account is the default free/busy user.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accounts: Vec<AccountConfig>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            store_dir: default_store_dir(),
            file_name: default_file_name(),
            kind: ComponentKind::default(),
            save_delay: default_save_delay(),
            refresh: RefreshConfig::default(),
            sync: None,
            accounts: Vec::new(),
        }
    }
}

impl StoreConfig {
    pub fn config_path() -> CalResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CalError::Config("Could not determine config directory".into()))?
            .join("calstore");

        Ok(config_dir.join("config.toml"))
    }

    /// Load the global config, creating a commented default on first run.
    pub fn load() -> CalResult<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> CalResult<Self> {
        Config::builder()
            .add_source(File::from(path.to_path_buf()).required(false))
            .build()
            .map_err(|e| CalError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| CalError::Config(e.to_string()))
    }

    /// Store directory with `~` expanded.
    pub fn store_dir(&self) -> PathBuf {
        expand(&self.store_dir)
    }

    pub fn calendar_path(&self) -> PathBuf {
        self.store_dir().join(&self.file_name)
    }

    pub fn save_delay(&self) -> CalResult<Duration> {
        parse_duration("save_delay", &self.save_delay)
    }

    pub fn save(&self, path: &Path) -> CalResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| CalError::Config(e.to_string()))?;

        std::fs::write(path, content)
            .map_err(|e| CalError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }

    /// Create a default config file with all options commented out.
    pub fn create_default_config(path: &Path) -> CalResult<()> {
        let contents = format!(
            "\
# calstore configuration

# Where the calendar file lives:
# store_dir = \"{DEFAULT_STORE_DIR}\"
# file_name = \"{DEFAULT_FILE_NAME}\"

# What the store holds: event, todo or journal
# kind = \"event\"

# How long to wait after a change before writing to disk:
# save_delay = \"{DEFAULT_SAVE_DELAY}\"

# [refresh]
# enabled = true
# interval = \"{DEFAULT_REFRESH_INTERVAL}\"

# Sync with other stores through a shared directory:
# [sync]
# dir = \"~/Sync/calstore\"
# collection = \"personal\"
# app_id = \"calstore-laptop\"

# Calendar users for free/busy lookups (the first is the default):
# [[accounts]]
# address = \"mailto:me@example.com\"
# name = \"Me\"
"
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CalError::Config(format!("Could not create config directory: {e}")))?;
        }

        std::fs::write(path, contents)
            .map_err(|e| CalError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}

fn parse_duration(field: &str, value: &str) -> CalResult<Duration> {
    humantime::parse_duration(value).map_err(|e| CalError::Config(format!("Invalid {field} '{value}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn commented_default_loads_as_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("calstore").join("config.toml");
        StoreConfig::create_default_config(&path).unwrap();

        let config = StoreConfig::load_from(&path).unwrap();
        assert_eq!(config.file_name, "calendar.ics");
        assert_eq!(config.kind, ComponentKind::Event);
        assert_eq!(config.save_delay().unwrap(), Duration::from_millis(500));
        assert_eq!(config.refresh.interval().unwrap(), Duration::from_secs(30 * 60));
        assert!(config.sync.is_none());
        assert!(config.accounts.is_empty());
    }

    #[test]
    fn reads_every_section() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
store_dir = "/srv/cal"
kind = "todo"
save_delay = "2s"

[refresh]
enabled = false
interval = "5m"

[sync]
dir = "/srv/sync"
collection = "work"
app_id = "desk"

[[accounts]]
address = "mailto:alice@example.com"
name = "Alice"
"#,
        )
        .unwrap();

        let config = StoreConfig::load_from(&path).unwrap();
        assert_eq!(config.calendar_path(), PathBuf::from("/srv/cal/calendar.ics"));
        assert_eq!(config.kind, ComponentKind::Todo);
        assert_eq!(config.save_delay().unwrap(), Duration::from_secs(2));
        assert!(!config.refresh.enabled);

        let sync = config.sync.as_ref().unwrap();
        assert_eq!(sync.app_id(), "desk");
        assert_eq!(sync.collection, "work");
        assert_eq!(config.accounts[0].name.as_deref(), Some("Alice"));
    }

    #[test]
    fn bad_durations_are_config_errors() {
        let config = StoreConfig {
            save_delay: "soon".into(),
            ..StoreConfig::default()
        };
        assert!(matches!(config.save_delay(), Err(CalError::Config(_))));
    }

    #[test]
    fn save_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let config = StoreConfig {
            accounts: vec![AccountConfig {
                address: "mailto:bob@example.com".into(),
                name: None,
            }],
            ..StoreConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = StoreConfig::load_from(&path).unwrap();
        assert_eq!(loaded.accounts, config.accounts);
    }
}
