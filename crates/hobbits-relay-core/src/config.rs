use crate::error::{Error, Result};
use crate::framing::DEFAULT_MAX_FRAME;
use crate::transport::Endpoint;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

fn default_max_frame() -> usize {
    DEFAULT_MAX_FRAME
}

fn default_read_buffer() -> usize {
    8192
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

fn default_drain_timeout_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub relayer: Option<RelayerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    pub bind: String,
    #[serde(alias = "to")]
    pub target: String,
    #[serde(default = "default_max_frame")]
    pub max_frame: usize,
    #[serde(default = "default_read_buffer")]
    pub read_buffer: usize,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// Grace period for a frame that is mid-write when its pair closes.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(Error::Io)?;
        let cfg: AppConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("toml parse error: {e}")))?;
        Ok(cfg)
    }
}

impl RelayerConfig {
    pub fn new(bind: impl Into<String>, target: impl Into<String>) -> Self {
        RelayerConfig {
            bind: bind.into(),
            target: target.into(),
            max_frame: default_max_frame(),
            read_buffer: default_read_buffer(),
            connect_timeout_ms: default_connect_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.bind.trim().is_empty() {
            return Err(Error::Config("relayer.bind is empty".into()));
        }
        if self.target.trim().is_empty() {
            return Err(Error::Config("relayer.target is empty".into()));
        }
        if self.max_frame == 0 {
            return Err(Error::Config("relayer.max_frame must be > 0".into()));
        }
        if self.read_buffer == 0 {
            return Err(Error::Config("relayer.read_buffer must be > 0".into()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(Error::Config("relayer.connect_timeout_ms must be > 0".into()));
        }
        if self.shutdown_timeout_ms == 0 {
            return Err(Error::Config("relayer.shutdown_timeout_ms must be > 0".into()));
        }
        if self.drain_timeout_ms == 0 || self.drain_timeout_ms >= self.shutdown_timeout_ms {
            return Err(Error::Config(
                "relayer.drain_timeout_ms must be > 0 and below shutdown_timeout_ms".into(),
            ));
        }
        self.bind_endpoint()?;
        self.target_endpoint()?;
        Ok(())
    }

    pub fn bind_endpoint(&self) -> Result<Endpoint> {
        self.bind.parse()
    }

    pub fn target_endpoint(&self) -> Result<Endpoint> {
        self.target.parse()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

pub fn load(path: impl AsRef<Path>) -> Result<RelayerConfig> {
    let cfg = AppConfig::from_file(path)?;
    let relayer = cfg
        .relayer
        .ok_or_else(|| Error::Config("missing [relayer] section".into()))?;
    relayer.validate()?;
    Ok(relayer)
}
