use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{DeepCrewError, QualityControl};

const DEFAULT_CONFIG_PATH: &str = "deepcrew.toml";
const CONFIG_PATH_ENV: &str = "DEEPCREW_CONFIG";
const LISTEN_ADDR_ENV: &str = "DEEPCREW_LISTEN_ADDR";
const MAX_RUNS_ENV: &str = "DEEPCREW_MAX_CONCURRENT_RUNS";
const HEARTBEAT_ENV: &str = "DEEPCREW_HEARTBEAT_SECS";

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub relay: RelayConfig,
    /// Defaults applied to requests that leave quality knobs unset.
    pub research: QualityControl,
    pub logging: LoggingConfig,
}

/// Helper to load configuration from disk and the environment.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `DEEPCREW_CONFIG` environment variable.
    /// 3. `deepcrew.toml` in the current working directory; when absent the
    ///    built-in defaults are used.
    pub fn load(path: Option<PathBuf>) -> Result<Config, DeepCrewError> {
        let config = match resolve_path(path) {
            Some(explicit) => Self::from_file(&explicit)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Config::default(),
        };

        let config = apply_env_overrides(config, |key| env::var(key).ok())?;
        Self::validate(&config)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Config, DeepCrewError> {
        let raw = fs::read_to_string(path).map_err(|err| DeepCrewError::io(path, err))?;
        toml::from_str(&raw).map_err(|err| DeepCrewError::InvalidConfiguration(err.to_string()))
    }

    fn validate(config: &Config) -> Result<(), DeepCrewError> {
        if config.server.max_concurrent_runs == 0 {
            return Err(DeepCrewError::InvalidConfiguration(
                "server.max_concurrent_runs must be at least 1".into(),
            ));
        }
        if config.relay.heartbeat_secs == 0 {
            return Err(DeepCrewError::InvalidConfiguration(
                "relay.heartbeat_secs must be at least 1".into(),
            ));
        }
        config
            .research
            .validate()
            .map_err(|err| DeepCrewError::InvalidConfiguration(format!("research: {err}")))
    }
}

fn resolve_path(path: Option<PathBuf>) -> Option<PathBuf> {
    if path.is_some() {
        return path;
    }

    env::var(CONFIG_PATH_ENV)
        .ok()
        .filter(|from_env| !from_env.trim().is_empty())
        .map(PathBuf::from)
}

/// Apply `DEEPCREW_*` overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(mut config: Config, lookup: F) -> Result<Config, DeepCrewError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(addr) = lookup(LISTEN_ADDR_ENV).filter(|v| !v.trim().is_empty()) {
        config.server.listen_addr = addr.trim().to_string();
    }
    if let Some(raw) = lookup(MAX_RUNS_ENV) {
        config.server.max_concurrent_runs = parse_env(MAX_RUNS_ENV, &raw)?;
    }
    if let Some(raw) = lookup(HEARTBEAT_ENV) {
        config.relay.heartbeat_secs = parse_env(HEARTBEAT_ENV, &raw)?;
    }
    Ok(config)
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, DeepCrewError> {
    raw.trim().parse().map_err(|_| {
        DeepCrewError::InvalidConfiguration(format!("{key} has an invalid value: {raw:?}"))
    })
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub max_concurrent_runs: usize,
    pub cors_origin: String,
    /// Directory research reports are written to; unset disables persistence.
    pub report_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".into(),
            max_concurrent_runs: 4,
            cors_origin: "http://localhost:3000".into(),
            report_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub heartbeat_secs: u64,
}

impl RelayConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: crate::relay::DEFAULT_HEARTBEAT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}
