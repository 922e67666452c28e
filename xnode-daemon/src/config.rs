//! Configuration loading for the xNode worker.
//!
//! Every field has a default, so running without a config file is valid.
//! A TOML file named by `--config` or `XNODE_CONFIG` is layered over the
//! defaults, then environment overrides are applied and the result is
//! validated.

use rand::Rng;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use xnode_core::{
    default_providers, Location, NodeCapabilities, NodeResources, DEFAULT_MAX_CONCURRENT_TASKS,
    DEFAULT_REPUTATION, PROTOCOL_VERSION,
};
use xnode_engine::{AdapterConfig, SandboxLimits};
use xnode_protocol::{TrustStore, TrustedCoordinator};

pub const DEFAULT_COORDINATOR_URL: &str = "ws://localhost:8080";
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_RETENTION_MS: u64 = 60_000;
pub const DEFAULT_DRAIN_POLL_MS: u64 = 1_000;
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 30_000;

const NODE_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// `xnode_` followed by 9 random lowercase alphanumerics.
pub fn generate_node_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..9)
        .map(|_| NODE_ID_ALPHABET[rng.random_range(0..NODE_ID_ALPHABET.len())] as char)
        .collect();
    format!("xnode_{}", suffix)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub node_id: String,
    pub coordinator_url: String,
    pub max_concurrent_tasks: usize,
    pub supported_providers: Vec<String>,
    pub reputation: f64,
    pub resources: NodeResources,
    pub location: Location,
    pub trusted_coordinators: Vec<TrustedCoordinator>,
    pub intervals: IntervalConfig,
    pub llm: LlmConfig,
    pub http_timeout_ms: u64,
    pub sandbox: SandboxLimits,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IntervalConfig {
    pub heartbeat_ms: u64,
    pub poll_ms: u64,
    pub reconnect_ms: u64,
    /// How long a finished task stays in the registry.
    pub retention_ms: u64,
    pub drain_poll_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    /// Serve every `agent.llm` node from the mock provider.
    pub mock: bool,
    pub mock_delay_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            node_id: generate_node_id(),
            coordinator_url: DEFAULT_COORDINATOR_URL.to_string(),
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            supported_providers: default_providers(),
            reputation: DEFAULT_REPUTATION,
            resources: NodeResources::default_capacity(),
            location: Location::default(),
            trusted_coordinators: Vec::new(),
            intervals: IntervalConfig::default(),
            llm: LlmConfig::default(),
            http_timeout_ms: DEFAULT_HTTP_TIMEOUT_MS,
            sandbox: SandboxLimits::default(),
        }
    }
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            poll_ms: DEFAULT_POLL_INTERVAL_MS,
            reconnect_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            retention_ms: DEFAULT_RETENTION_MS,
            drain_poll_ms: DEFAULT_DRAIN_POLL_MS,
        }
    }
}

impl IntervalConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    pub fn reconnect(&self) -> Duration {
        Duration::from_millis(self.reconnect_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }

    pub fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

impl DaemonConfig {
    /// File (if any), then process environment, then validation.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match config_path_from_args().or_else(config_path_from_env) {
            Some(path) => Self::from_path(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply `NODE_ID`, `COORDINATOR_URL`, `XNODE_MOCK_LLM` and
    /// `XNODE_TRUSTED_COORDINATOR` (`<id>:<base64 public key>`).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(node_id) = lookup("NODE_ID").filter(|v| !v.trim().is_empty()) {
            self.node_id = node_id;
        }
        if let Some(url) = lookup("COORDINATOR_URL").filter(|v| !v.trim().is_empty()) {
            self.coordinator_url = url;
        }
        if let Some(flag) = lookup("XNODE_MOCK_LLM") {
            self.llm.mock = matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(entry) = lookup("XNODE_TRUSTED_COORDINATOR") {
            let (id, key) = entry
                .split_once(':')
                .ok_or_else(|| invalid("XNODE_TRUSTED_COORDINATOR", "expected <id>:<public key>"))?;
            let id = id.trim();
            self.trusted_coordinators.retain(|c| c.id != id);
            self.trusted_coordinators.push(TrustedCoordinator {
                id: id.to_string(),
                public_key: key.trim().to_string(),
            });
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.trim().is_empty() {
            return Err(invalid("node_id", "must not be empty"));
        }
        if !(self.coordinator_url.starts_with("ws://") || self.coordinator_url.starts_with("wss://"))
        {
            return Err(invalid("coordinator_url", "must be a ws:// or wss:// URL"));
        }
        if self.max_concurrent_tasks == 0 {
            return Err(invalid("max_concurrent_tasks", "must be > 0"));
        }
        if self.resources.cpu.cores == 0 {
            return Err(invalid("resources.cpu.cores", "must be > 0"));
        }
        if self.resources.memory.available > self.resources.memory.total {
            return Err(invalid("resources.memory.available", "must be <= total"));
        }
        let intervals = [
            ("intervals.heartbeat_ms", self.intervals.heartbeat_ms),
            ("intervals.poll_ms", self.intervals.poll_ms),
            ("intervals.reconnect_ms", self.intervals.reconnect_ms),
            ("intervals.drain_poll_ms", self.intervals.drain_poll_ms),
        ];
        for (field, value) in intervals {
            if value == 0 {
                return Err(invalid(field, "must be > 0"));
            }
        }
        if self.http_timeout_ms == 0 {
            return Err(invalid("http_timeout_ms", "must be > 0"));
        }
        self.trust_store()?;
        Ok(())
    }

    pub fn trust_store(&self) -> Result<TrustStore, ConfigError> {
        TrustStore::from_entries(&self.trusted_coordinators)
            .map_err(|e| invalid("trusted_coordinators", e.to_string()))
    }

    /// Static part of what this node advertises.
    pub fn capabilities(&self) -> NodeCapabilities {
        NodeCapabilities {
            node_id: self.node_id.clone(),
            version: PROTOCOL_VERSION.to_string(),
            max_concurrent_tasks: self.max_concurrent_tasks,
            supported_providers: self.supported_providers.clone(),
            resources: self.resources.clone(),
            location: self.location.clone(),
            reputation: self.reputation,
            uptime: 0,
        }
    }

    pub fn adapter_config(&self) -> AdapterConfig {
        AdapterConfig {
            mock_mode: self.llm.mock,
            mock_delay: Duration::from_millis(self.llm.mock_delay_ms),
            http_timeout: Duration::from_millis(self.http_timeout_ms),
            sandbox: self.sandbox.clone(),
            ..AdapterConfig::default()
        }
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("XNODE_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
