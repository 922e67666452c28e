//! Resource sampling seam
//!
//! OS-level sampling lives outside this crate. The daemon only needs a
//! current [`NodeResources`] before every registration and heartbeat.

use xnode_core::NodeResources;

pub trait ResourceMonitor: Send + Sync {
    /// Current capacity and utilisation.
    fn snapshot(&self) -> NodeResources;
}

/// Reports the configured capacity unchanged.
#[derive(Debug, Clone)]
pub struct StaticResourceMonitor {
    resources: NodeResources,
}

impl StaticResourceMonitor {
    pub fn new(resources: NodeResources) -> Self {
        Self { resources }
    }
}

impl Default for StaticResourceMonitor {
    fn default() -> Self {
        Self::new(NodeResources::default_capacity())
    }
}

impl ResourceMonitor for StaticResourceMonitor {
    fn snapshot(&self) -> NodeResources {
        self.resources.clone()
    }
}

/// Memory in use, in megabytes.
pub fn memory_used(resources: &NodeResources) -> u64 {
    resources
        .memory
        .total
        .saturating_sub(resources.memory.available)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_monitor_reports_configured_capacity() {
        let monitor = StaticResourceMonitor::default();
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.cpu.cores, 4);
        assert_eq!(memory_used(&snapshot), 2048);
    }
}
