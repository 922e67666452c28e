//! xnode Test Utilities
//!
//! Shared test infrastructure for the xnode workspace:
//! - Proptest generators for flows, capabilities and requirements
//! - Fixtures for the canonical end-to-end scenarios
//! - Signing helpers and custom assertions

pub use xnode_core::{
    AgentId, AuthenticationError, AvailableResources, ExecutionResult, Flow, FlowEdge,
    FlowRunResult, JsonMap, NodeCapabilities, NodeKind, NodeResources, RawNode,
    ResourceRequirements, StepLog, StepStatus, TaskEnvelope, ValidationError,
};
pub use xnode_protocol::{TaskSigner, TaskSpec, TrustStore};

use serde_json::{json, Value};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for xnode entity types.

    use super::*;
    use proptest::prelude::*;

    /// Node ids `n0..n{count}`.
    pub fn node_ids(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("n{}", i)).collect()
    }

    fn text_node(id: &str, value: &str) -> RawNode {
        RawNode::new(id, NodeKind::INPUT_TEXT, json!({ "defaultValue": value }))
    }

    /// Edge list of a random DAG over `1..=max_nodes` nodes.
    ///
    /// Edges always point from a lower index to a higher one.
    pub fn arb_dag_edges(max_nodes: usize) -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
        (1..=max_nodes.max(1)).prop_flat_map(|n| {
            let pairs = if n < 2 {
                Just(Vec::new()).boxed()
            } else {
                prop::collection::vec((0..n - 1, 1..n), 0..n * 2)
                    .prop_map(|raw| {
                        raw.into_iter()
                            .filter(|(a, b)| a < b)
                            .collect::<Vec<_>>()
                    })
                    .boxed()
            };
            (Just(n), pairs)
        })
    }

    /// A random acyclic flow of `input.text` nodes.
    pub fn arb_acyclic_flow(max_nodes: usize) -> impl Strategy<Value = Flow> {
        arb_dag_edges(max_nodes).prop_map(|(n, edges)| {
            let ids = node_ids(n);
            let mut flow = Flow::new("flow_dag", "Random DAG");
            for id in &ids {
                flow = flow.with_node(text_node(id, id));
            }
            for (a, b) in edges {
                flow = flow.with_edge(ids[a].clone(), ids[b].clone());
            }
            flow
        })
    }

    /// A random flow whose nodes `0..=k` form a directed ring.
    pub fn arb_cyclic_flow(max_nodes: usize) -> impl Strategy<Value = Flow> {
        (2..=max_nodes.max(2)).prop_flat_map(|n| (Just(n), 1..n)).prop_map(|(n, k)| {
            let ids = node_ids(n);
            let mut flow = Flow::new("flow_cycle", "Random cycle");
            for id in &ids {
                flow = flow.with_node(text_node(id, id));
            }
            for i in 0..k {
                flow = flow.with_edge(ids[i].clone(), ids[i + 1].clone());
            }
            flow.with_edge(ids[k].clone(), ids[0].clone())
        })
    }

    /// Requirements within what a default node could ever offer.
    pub fn arb_requirements() -> impl Strategy<Value = ResourceRequirements> {
        (1u32..=16, 64u64..=16_384, any::<bool>()).prop_map(|(quarter_cores, memory, gpu)| {
            let req = ResourceRequirements::new(f64::from(quarter_cores) * 0.25, memory);
            if gpu {
                req.with_gpu()
            } else {
                req
            }
        })
    }

    /// Default capabilities with a random core count, memory and slot count.
    pub fn arb_capabilities() -> impl Strategy<Value = NodeCapabilities> {
        (1u32..=32, 512u64..=65_536, 1usize..=8).prop_map(|(cores, memory, slots)| {
            let mut caps = NodeCapabilities::default_for("xnode_prop");
            caps.resources.cpu.cores = cores;
            caps.resources.memory.total = memory;
            caps.resources.memory.available = memory;
            caps.max_concurrent_tasks = slots;
            caps
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built flows, keys and envelopes.

    use super::*;

    pub const COORDINATOR_ID: &str = "coord_test";

    /// in1 (default "hi") -> out1 rendering `{{outputs.in1.text}}`.
    pub fn echo_flow() -> Flow {
        Flow::new("flow_echo", "Echo")
            .with_node(RawNode::new(
                "in1",
                NodeKind::INPUT_TEXT,
                json!({ "defaultValue": "hi" }),
            ))
            .with_node(RawNode::new(
                "out1",
                NodeKind::OUTPUT_TEXT,
                json!({ "template": "{{outputs.in1.text}}" }),
            ))
            .with_edge("in1", "out1")
    }

    /// An edge targeting a node id that does not exist.
    pub fn dangling_edge_flow() -> Flow {
        Flow::new("flow_ghost", "Dangling edge")
            .with_node(RawNode::new(
                "in1",
                NodeKind::INPUT_TEXT,
                json!({ "defaultValue": "hi" }),
            ))
            .with_edge("in1", "ghost")
    }

    /// A -> B -> C where B's transform always fails at runtime.
    pub fn failing_middle_flow() -> Flow {
        Flow::new("flow_fail", "Failing middle")
            .with_node(RawNode::new(
                "A",
                NodeKind::INPUT_TEXT,
                json!({ "defaultValue": "start" }),
            ))
            .with_node(RawNode::new(
                "B",
                NodeKind::TRANSFORM_JS,
                json!({ "code": "return missing.value" }),
            ))
            .with_node(RawNode::new(
                "C",
                NodeKind::OUTPUT_TEXT,
                json!({ "template": "done" }),
            ))
            .with_edge("A", "B")
            .with_edge("B", "C")
    }

    /// input -> mock LLM -> output.
    pub fn llm_flow() -> Flow {
        Flow::new("flow_llm", "Mock LLM")
            .with_node(RawNode::new(
                "question",
                NodeKind::INPUT_TEXT,
                json!({ "inputKey": "question" }),
            ))
            .with_node(RawNode::new(
                "llm",
                NodeKind::AGENT_LLM,
                json!({
                    "provider": "mock",
                    "model": "mock-1",
                    "prompt": "Answer: {{outputs.question.text}}"
                }),
            ))
            .with_node(RawNode::new(
                "answer",
                NodeKind::OUTPUT_TEXT,
                json!({ "template": "{{outputs.llm.text}}" }),
            ))
            .with_edge("question", "llm")
            .with_edge("llm", "answer")
    }

    pub fn flow_value(flow: &Flow) -> Value {
        serde_json::to_value(flow).unwrap_or(Value::Null)
    }

    /// 4 cores, 6144 MB available, 3 slots.
    pub fn four_core_capabilities(node_id: &str) -> NodeCapabilities {
        NodeCapabilities::default_for(node_id)
    }

    pub fn signer() -> TaskSigner {
        TaskSigner::generate(COORDINATOR_ID)
    }

    /// A trust store holding exactly `signer`'s key.
    pub fn trust_store_for(signer: &TaskSigner) -> TrustStore {
        TrustStore::new().with_key(signer.coordinator_id(), signer.verifying_key())
    }

    /// A signed envelope running `flow` with the given requirements.
    pub fn signed_task(
        signer: &TaskSigner,
        id: &str,
        flow: &Flow,
        requirements: ResourceRequirements,
    ) -> TaskEnvelope {
        signer.issue_with_id(
            id,
            TaskSpec::new(flow_value(flow)).with_requirements(requirements),
        )
    }

    /// An unsigned envelope for code paths that never verify.
    pub fn unsigned_task(id: &str, requirements: ResourceRequirements) -> TaskEnvelope {
        TaskEnvelope {
            id: id.to_string(),
            agent_id: 0,
            flow: flow_value(&echo_flow()),
            inputs: JsonMap::new(),
            priority: 0,
            max_execution_time: 60_000,
            required_resources: requirements,
            signature: String::new(),
            timestamp: 0,
            coordinator_id: COORDINATOR_ID.to_string(),
        }
    }

    pub fn cpu(cores: f64) -> ResourceRequirements {
        ResourceRequirements::new(cores, 256)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over run results.

    use super::*;

    pub fn assert_step(logs: &[StepLog], node_id: &str, status: StepStatus) {
        assert!(
            logs.iter()
                .any(|l| l.node_id == node_id && l.status == status),
            "expected a {:?} log for {}, got {:?}",
            status,
            node_id,
            logs.iter()
                .map(|l| (l.node_id.as_str(), l.status))
                .collect::<Vec<_>>()
        );
    }

    pub fn assert_not_run(result: &FlowRunResult, node_id: &str) {
        assert!(
            !result.outputs.contains_key(node_id),
            "{} should not have produced output",
            node_id
        );
        assert!(
            result.logs.iter().all(|l| l.node_id != node_id),
            "{} should not appear in the log",
            node_id
        );
    }

    /// Every edge's source comes before its target in `order`.
    pub fn assert_respects_edges(order: &[&str], edges: &[FlowEdge]) {
        let position = |id: &str| order.iter().position(|n| *n == id);
        for edge in edges {
            match (position(&edge.source), position(&edge.target)) {
                (Some(s), Some(t)) => assert!(
                    s < t,
                    "edge {} -> {} violated by order {:?}",
                    edge.source,
                    edge.target,
                    order
                ),
                _ => panic!("edge {} -> {} not covered by order", edge.source, edge.target),
            }
        }
    }

    pub fn assert_failed_with(result: &ExecutionResult, needle: &str) {
        assert!(!result.success, "expected failure, got success");
        let error = result.error.as_deref().unwrap_or_default();
        assert!(
            error.contains(needle),
            "error {:?} does not mention {:?}",
            error,
            needle
        );
    }
}
