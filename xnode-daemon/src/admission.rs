//! Admission control
//!
//! A task is admitted when a slot is free and what it needs fits inside
//! the capacity left after every admitted, unfinished task's claim.

use crate::registry::TaskRegistry;
use xnode_core::{AvailableResources, NodeCapabilities, ResourceError, ResourceRequirements};

/// `canAcceptMoreTasks`: active tasks below the slot limit.
pub fn can_accept_more(capabilities: &NodeCapabilities, registry: &TaskRegistry) -> bool {
    registry.active_count() < capabilities.max_concurrent_tasks
}

/// Capacity minus the claims of active tasks.
pub fn available_resources(
    capabilities: &NodeCapabilities,
    registry: &TaskRegistry,
) -> AvailableResources {
    let mut pool = AvailableResources::from_capacity(&capabilities.resources);
    for claim in registry.active_requirements() {
        pool.reserve(&claim);
    }
    pool
}

/// Slot check, then resource check.
pub fn admit(
    capabilities: &NodeCapabilities,
    registry: &TaskRegistry,
    required: &ResourceRequirements,
) -> Result<(), ResourceError> {
    if !can_accept_more(capabilities, registry) {
        return Err(ResourceError::AtCapacity {
            active: registry.active_count(),
            max: capabilities.max_concurrent_tasks,
        });
    }
    available_resources(capabilities, registry).check(required)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use xnode_core::TaskState;
    use xnode_test_utils::fixtures::unsigned_task;

    fn caps() -> NodeCapabilities {
        NodeCapabilities::default_for("n1")
    }

    fn admit_running(registry: &TaskRegistry, id: &str, req: ResourceRequirements) {
        let _ = registry.insert(Arc::new(unsigned_task(id, req)), "n1").unwrap();
        registry.start(id).unwrap();
    }

    #[test]
    fn test_rejects_task_larger_than_node() {
        let registry = TaskRegistry::new();
        let err = admit(&caps(), &registry, &ResourceRequirements::new(8.0, 1024)).unwrap_err();
        assert!(matches!(err, ResourceError::InsufficientCpu { .. }));
    }

    #[test]
    fn test_claims_of_running_tasks_count() {
        let registry = TaskRegistry::new();
        admit_running(&registry, "a", ResourceRequirements::new(2.0, 512));
        admit_running(&registry, "b", ResourceRequirements::new(2.0, 512));

        // Two of three slots used, so only the resource check can refuse
        assert!(can_accept_more(&caps(), &registry));
        let err = admit(&caps(), &registry, &ResourceRequirements::new(3.0, 512)).unwrap_err();
        assert_eq!(
            err,
            ResourceError::InsufficientCpu {
                required: 3.0,
                available: 0.0
            }
        );
    }

    #[test]
    fn test_finished_tasks_release_their_claim() {
        let registry = TaskRegistry::new();
        admit_running(&registry, "a", ResourceRequirements::new(4.0, 512));
        registry.finish("a", TaskState::Completed).unwrap();
        assert!(admit(&caps(), &registry, &ResourceRequirements::new(4.0, 512)).is_ok());
    }

    #[test]
    fn test_slot_limit() {
        let registry = TaskRegistry::new();
        for id in ["a", "b", "c"] {
            admit_running(&registry, id, ResourceRequirements::new(0.5, 64));
        }
        assert_eq!(
            admit(&caps(), &registry, &ResourceRequirements::new(0.5, 64)),
            Err(ResourceError::AtCapacity { active: 3, max: 3 })
        );
    }

    #[test]
    fn test_gpu_required_without_gpu() {
        let registry = TaskRegistry::new();
        let err = admit(
            &caps(),
            &registry,
            &ResourceRequirements::new(1.0, 64).with_gpu(),
        )
        .unwrap_err();
        assert_eq!(err, ResourceError::GpuUnavailable);
    }
}
