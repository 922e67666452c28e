//! Coordinator configuration
//!
//! Defaults, then an optional TOML file (`--config` or
//! `XNODE_COORDINATOR_CONFIG`), then environment overrides.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use xnode_engine::{AdapterConfig, SandboxLimits};
use xnode_protocol::TaskSigner;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_COORDINATOR_ID: &str = "xnode-coordinator";
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 90_000;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 15_000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RESULT_RETENTION_MS: u64 = 3_600_000;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    pub host: String,
    pub port: u16,
    pub coordinator_id: String,
    /// Base64 ed25519 seed. A fresh key is generated when absent.
    pub signing_key: Option<String>,
    /// Nodes silent for longer than this are evicted.
    pub heartbeat_timeout_ms: u64,
    pub sweep_interval_ms: u64,
    /// Assignments a task may burn through before it is failed.
    pub max_attempts: u32,
    /// How long finished task records stay queryable.
    pub result_retention_ms: u64,
    /// Serve `agent.llm` nodes of `/api/v1/flow/run` from the mock provider.
    pub mock_llm: bool,
    pub sandbox: SandboxLimits,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            coordinator_id: DEFAULT_COORDINATOR_ID.to_string(),
            signing_key: None,
            heartbeat_timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            result_retention_ms: DEFAULT_RESULT_RETENTION_MS,
            mock_llm: false,
            sandbox: SandboxLimits::default(),
        }
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

impl CoordinatorConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match config_path() {
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

    /// `PORT`, `XNODE_COORDINATOR_BIND`, `COORDINATOR_ID`,
    /// `COORDINATOR_SIGNING_KEY`, `XNODE_MOCK_LLM`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| invalid("PORT", format!("not a port number: {}", port)))?;
        }
        if let Some(host) = lookup("XNODE_COORDINATOR_BIND").filter(|v| !v.trim().is_empty()) {
            self.host = host.trim().to_string();
        }
        if let Some(id) = lookup("COORDINATOR_ID").filter(|v| !v.trim().is_empty()) {
            self.coordinator_id = id.trim().to_string();
        }
        if let Some(seed) = lookup("COORDINATOR_SIGNING_KEY").filter(|v| !v.trim().is_empty()) {
            self.signing_key = Some(seed);
        }
        if let Some(flag) = lookup("XNODE_MOCK_LLM") {
            self.mock_llm = matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.coordinator_id.trim().is_empty() {
            return Err(invalid("coordinator_id", "must not be empty"));
        }
        self.bind_addr()?;
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts", "must be > 0"));
        }
        if self.heartbeat_timeout_ms == 0 {
            return Err(invalid("heartbeat_timeout_ms", "must be > 0"));
        }
        if self.sweep_interval_ms == 0 {
            return Err(invalid("sweep_interval_ms", "must be > 0"));
        }
        if let Some(seed) = &self.signing_key {
            TaskSigner::from_base64_seed(self.coordinator_id.as_str(), seed)
                .map_err(|e| invalid("signing_key", e.to_string()))?;
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse()
            .map_err(|e| invalid("host", format!("invalid bind address {}: {}", addr, e)))
    }

    /// The configured key, or a fresh one when none is set.
    pub fn signer(&self) -> Result<TaskSigner, ConfigError> {
        match &self.signing_key {
            Some(seed) => TaskSigner::from_base64_seed(self.coordinator_id.as_str(), seed)
                .map_err(|e| invalid("signing_key", e.to_string())),
            None => Ok(TaskSigner::generate(self.coordinator_id.as_str())),
        }
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn result_retention(&self) -> Duration {
        Duration::from_millis(self.result_retention_ms)
    }

    /// Adapters for flows run on the coordinator itself.
    pub fn adapter_config(&self) -> AdapterConfig {
        AdapterConfig {
            mock_mode: self.mock_llm,
            sandbox: self.sandbox.clone(),
            ..AdapterConfig::default()
        }
    }
}

fn config_path() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    std::env::var("XNODE_COORDINATOR_CONFIG").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.bind_addr().unwrap().port(), 8080);
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(90));
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn test_env_overrides() {
        let seed = TaskSigner::generate("c").seed_base64();
        let mut config = CoordinatorConfig::default();
        config
            .apply_overrides(env(&[
                ("PORT", "9090"),
                ("COORDINATOR_ID", "coord-eu"),
                ("COORDINATOR_SIGNING_KEY", seed.as_str()),
            ]))
            .unwrap();
        config.validate().unwrap();

        assert_eq!(config.port, 9090);
        let signer = config.signer().unwrap();
        assert_eq!(signer.coordinator_id(), "coord-eu");
        assert_eq!(signer.seed_base64(), seed);
    }

    #[test]
    fn test_bad_port() {
        let mut config = CoordinatorConfig::default();
        let err = config.apply_overrides(env(&[("PORT", "http")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "PORT", .. }));
    }

    #[test]
    fn test_missing_key_generates_a_fresh_one() {
        let config = CoordinatorConfig::default();
        let a = config.signer().unwrap();
        let b = config.signer().unwrap();
        assert_ne!(a.public_key_base64(), b.public_key_base64());
    }

    #[test]
    fn test_invalid_values() {
        let config = CoordinatorConfig {
            signing_key: Some("not-a-key".to_string()),
            ..CoordinatorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "signing_key", .. })
        ));

        let config = CoordinatorConfig {
            host: "not a host".to_string(),
            ..CoordinatorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "host", .. })
        ));
    }

    #[test]
    fn test_toml() {
        let config = CoordinatorConfig::from_toml_str(
            r#"
port = 7000
coordinator_id = "coord-file"
max_attempts = 5
mock_llm = true
"#,
        )
        .unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.max_attempts, 5);
        assert!(config.adapter_config().mock_mode);
        assert_eq!(config.sweep_interval_ms, DEFAULT_SWEEP_INTERVAL_MS);
    }
}
