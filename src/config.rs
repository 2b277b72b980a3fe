use crate::RecentError;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Default)]
pub struct RecentConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// SQLite busy handler budget per statement.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Total time a log event keeps retrying a locked store before it is dropped.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout_ms(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

fn default_busy_timeout_ms() -> u64 {
    250
}

fn default_lock_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_limit")]
    pub default_limit: u32,
    #[serde(default)]
    pub hide_time: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            hide_time: false,
        }
    }
}

fn default_limit() -> u32 {
    20
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct LogConfig {
    /// Do not append the first line seen for a new session. When a shell
    /// prints its first prompt, `history 1` still shows the previous shell's
    /// last command.
    #[serde(default)]
    pub skip_session_start: bool,
    /// Commands matching any of these regexes are not appended.
    #[serde(default)]
    pub ignore: Vec<String>,
}

impl LogConfig {
    pub fn ignore_patterns(&self) -> Result<Vec<Regex>, RecentError> {
        self.ignore
            .iter()
            .enumerate()
            .map(|(i, pat)| {
                Regex::new(pat)
                    .map_err(|e| RecentError::Config(format!("log.ignore[{i}] invalid regex: {e}")))
            })
            .collect()
    }
}

/// Load config from RECENT_CONFIG, ~/.recent/config.toml, or defaults.
pub fn load_config() -> Result<RecentConfig, RecentError> {
    match config_path() {
        Some(p) if p.exists() => load_config_from(&p),
        _ => Ok(RecentConfig::default()),
    }
}

pub fn load_config_from(path: &Path) -> Result<RecentConfig, RecentError> {
    let content = std::fs::read_to_string(path)?;
    let config: RecentConfig = toml::from_str(&content)
        .map_err(|e| RecentError::Config(format!("{}: {e}", path.display())))?;
    validate_config(&config)?;
    Ok(config)
}

fn config_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("RECENT_CONFIG") {
        return Some(PathBuf::from(p));
    }
    let home = std::env::var("HOME").ok()?;
    Some(Path::new(&home).join(".recent").join("config.toml"))
}

fn validate_config(config: &RecentConfig) -> Result<(), RecentError> {
    if config.query.default_limit == 0 {
        return Err(RecentError::Config("query.default_limit must be positive".into()));
    }
    if config.store.lock_timeout_ms < config.store.busy_timeout_ms {
        return Err(RecentError::Config(
            "store.lock_timeout_ms must not be shorter than store.busy_timeout_ms".into(),
        ));
    }
    config.log.ignore_patterns()?;
    Ok(())
}
