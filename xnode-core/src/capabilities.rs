//! Capability model: what a node can advertise and what a task needs

use crate::error::ResourceError;
use crate::identity::NodeId;
use serde::{Deserialize, Serialize};

/// Protocol version advertised on registration and heartbeat.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Default number of concurrent task slots.
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 3;

/// Default starting reputation score.
pub const DEFAULT_REPUTATION: f64 = 100.0;

/// Everything a node advertises about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCapabilities {
    pub node_id: NodeId,
    pub version: String,
    pub max_concurrent_tasks: usize,
    pub supported_providers: Vec<String>,
    pub resources: NodeResources,
    pub location: Location,
    pub reputation: f64,
    /// Seconds since the daemon started.
    pub uptime: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResources {
    pub cpu: CpuInfo,
    pub memory: MemoryInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<GpuInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuInfo {
    pub cores: u32,
    /// Utilisation percentage, 0-100.
    pub usage: f64,
}

/// Memory figures in megabytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub total: u64,
    pub available: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuInfo {
    pub model: String,
    /// GPU memory in megabytes.
    pub memory: u64,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub region: String,
    pub country: String,
}

impl Default for Location {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            country: "US".to_string(),
        }
    }
}

impl NodeResources {
    /// 4 cores, 8 GB total with 6 GB available, no GPU.
    pub fn default_capacity() -> Self {
        Self {
            cpu: CpuInfo {
                cores: 4,
                usage: 0.0,
            },
            memory: MemoryInfo {
                total: 8192,
                available: 6144,
            },
            gpu: None,
        }
    }

    pub fn has_gpu(&self) -> bool {
        self.gpu.as_ref().map(|g| g.available).unwrap_or(false)
    }
}

impl NodeCapabilities {
    pub fn default_for(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            version: PROTOCOL_VERSION.to_string(),
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            supported_providers: default_providers(),
            resources: NodeResources::default_capacity(),
            location: Location::default(),
            reputation: DEFAULT_REPUTATION,
            uptime: 0,
        }
    }

    pub fn supports_provider(&self, provider: &str) -> bool {
        self.supported_providers.iter().any(|p| p == provider)
    }
}

pub fn default_providers() -> Vec<String> {
    vec![
        "ollama".to_string(),
        "openai".to_string(),
        "anthropic".to_string(),
    ]
}

/// What a task needs to run. CPU may be fractional; memory is in megabytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub cpu: f64,
    pub memory: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub gpu: bool,
}

impl ResourceRequirements {
    pub fn new(cpu: f64, memory: u64) -> Self {
        Self {
            cpu,
            memory,
            gpu: false,
        }
    }

    pub fn with_gpu(mut self) -> Self {
        self.gpu = true;
        self
    }
}

impl Default for ResourceRequirements {
    fn default() -> Self {
        Self::new(1.0, 512)
    }
}

/// Spare capacity after subtracting what admitted tasks have claimed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableResources {
    pub cpu: f64,
    pub memory: u64,
    pub gpu: bool,
}

impl AvailableResources {
    /// Full capacity of a node with nothing claimed.
    pub fn from_capacity(resources: &NodeResources) -> Self {
        Self {
            cpu: f64::from(resources.cpu.cores),
            memory: resources.memory.available,
            gpu: resources.has_gpu(),
        }
    }

    /// Claim `req` out of this pool. A GPU is claimed exclusively.
    pub fn reserve(&mut self, req: &ResourceRequirements) {
        self.cpu = (self.cpu - req.cpu).max(0.0);
        self.memory = self.memory.saturating_sub(req.memory);
        if req.gpu {
            self.gpu = false;
        }
    }

    /// Check `req` against this pool, reporting the first shortfall.
    pub fn check(&self, req: &ResourceRequirements) -> Result<(), ResourceError> {
        if self.cpu < req.cpu {
            return Err(ResourceError::InsufficientCpu {
                required: req.cpu,
                available: self.cpu,
            });
        }
        if self.memory < req.memory {
            return Err(ResourceError::InsufficientMemory {
                required: req.memory,
                available: self.memory,
            });
        }
        if req.gpu && !self.gpu {
            return Err(ResourceError::GpuUnavailable);
        }
        Ok(())
    }

    pub fn fits(&self, req: &ResourceRequirements) -> bool {
        self.check(req).is_ok()
    }
}
