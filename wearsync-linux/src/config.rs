//! Load config from file and environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use wearsync_core::{ResponseTarget, TemperatureUnit};

/// Which side of the exchange this node plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Phone: answers ready requests from the forecast store.
    #[default]
    Source,
    /// Watch: requests the forecast and displays it.
    Sink,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "source" | "phone" => Ok(Role::Source),
            "sink" | "watch" => Ok(Role::Sink),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Recipients of a forecast response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RespondTo {
    #[default]
    Requester,
    All,
}

impl FromStr for RespondTo {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "requester" => Ok(RespondTo::Requester),
            "all" => Ok(RespondTo::All),
            other => Err(format!("unknown response target: {other}")),
        }
    }
}

impl From<RespondTo> for ResponseTarget {
    fn from(r: RespondTo) -> Self {
        match r {
            RespondTo::Requester => ResponseTarget::Requester,
            RespondTo::All => ResponseTarget::AllConnected,
        }
    }
}

/// Daemon configuration. File: ~/.config/wearsync/config.toml or /etc/wearsync/config.toml.
/// Env overrides: WEARSYNC_ROLE, WEARSYNC_NODE_ID, WEARSYNC_LISTEN_PORT, WEARSYNC_PEERS,
/// WEARSYNC_REDIAL_SECS, WEARSYNC_STORE, WEARSYNC_ICON_DIR, WEARSYNC_UNITS, WEARSYNC_RESPOND_TO, WEARSYNC_LOG.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub role: Role,
    /// Node id announced to peers. Generated when unset.
    #[serde(default)]
    pub node_id: Option<String>,
    /// Transport TCP port (default 45680).
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Peers to dial, as host:port.
    #[serde(default)]
    pub peers: Vec<String>,
    /// Seconds between dial attempts to a configured peer (default 5, at least 1).
    #[serde(default = "default_redial_secs")]
    pub redial_secs: u64,
    /// Forecast store (source role).
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    /// Directory holding the condition art PNGs (source role).
    #[serde(default = "default_icon_dir")]
    pub icon_dir: PathBuf,
    #[serde(default)]
    pub units: TemperatureUnit,
    #[serde(default)]
    pub respond_to: RespondTo,
    /// tracing filter used when RUST_LOG is unset (default "info").
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_listen_port() -> u16 {
    45680
}
fn default_redial_secs() -> u64 {
    5
}
fn default_store_path() -> PathBuf {
    config_dir().join("forecast.toml")
}
fn default_icon_dir() -> PathBuf {
    config_dir().join("icons")
}
fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: Role::default(),
            node_id: None,
            listen_port: default_listen_port(),
            peers: Vec::new(),
            redial_secs: default_redial_secs(),
            store_path: default_store_path(),
            icon_dir: default_icon_dir(),
            units: TemperatureUnit::default(),
            respond_to: RespondTo::default(),
            log_filter: default_log_filter(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid {var}={value}: {reason}")]
    Env {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Load config: default, then config file (explicit path or first existing default path),
/// then env vars.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let mut c = match explicit {
        Some(p) => load_file(p)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(p) => load_file(&p)?,
            None => Config::default(),
        },
    };
    apply_env(&mut c, |k| std::env::var(k).ok())?;
    c.validate()?;
    Ok(c)
}

impl Config {
    /// Reject values the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redial_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "redial_secs",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

/// Apply overrides from `lookup` (the process environment in production).
pub fn apply_env(
    c: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(s) = lookup("WEARSYNC_ROLE") {
        c.role = parse_env("WEARSYNC_ROLE", s)?;
    }
    if let Some(s) = lookup("WEARSYNC_NODE_ID") {
        c.node_id = Some(s);
    }
    if let Some(s) = lookup("WEARSYNC_LISTEN_PORT") {
        c.listen_port = parse_env("WEARSYNC_LISTEN_PORT", s)?;
    }
    if let Some(s) = lookup("WEARSYNC_PEERS") {
        c.peers = s
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some(s) = lookup("WEARSYNC_REDIAL_SECS") {
        c.redial_secs = parse_env("WEARSYNC_REDIAL_SECS", s)?;
    }
    if let Some(s) = lookup("WEARSYNC_STORE") {
        c.store_path = PathBuf::from(s);
    }
    if let Some(s) = lookup("WEARSYNC_ICON_DIR") {
        c.icon_dir = PathBuf::from(s);
    }
    if let Some(s) = lookup("WEARSYNC_UNITS") {
        c.units = parse_env("WEARSYNC_UNITS", s)?;
    }
    if let Some(s) = lookup("WEARSYNC_RESPOND_TO") {
        c.respond_to = parse_env("WEARSYNC_RESPOND_TO", s)?;
    }
    if let Some(s) = lookup("WEARSYNC_LOG") {
        c.log_filter = s;
    }
    Ok(())
}

fn parse_env<T>(var: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| ConfigError::Env {
        var,
        reason: e.to_string(),
        value,
    })
}

fn config_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(h) => PathBuf::from(h).join(".config/wearsync"),
        None => PathBuf::from("/etc/wearsync"),
    }
}

fn config_paths() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(h) = std::env::var_os("HOME") {
        out.push(PathBuf::from(h).join(".config/wearsync/config.toml"));
    }
    out.push(PathBuf::from("/etc/wearsync/config.toml"));
    out
}

fn load_file(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<Config>(&s).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
