//! Flow Executor
//!
//! Runs a validated flow in topological order, one node at a time, and
//! stops at the first failing node. Partial outputs survive a failure.

use crate::adapters::{AdapterConfig, AdapterRegistry, NodeAdapter};
use crate::context::ExecutionContext;
use crate::validator::{validate_flow, ValidatedFlow};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use xnode_core::{AgentNode, Flow, FlowRunResult, JsonMap, StepLog, ValidationError};

/// Error text recorded when a run is cancelled mid-flight.
pub const CANCELLED_MESSAGE: &str = "Execution cancelled";

/// Per-run controls.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Hard wall-clock budget for the whole run.
    pub deadline: Option<Duration>,
    /// Flips to `true` to abandon the run at the next suspension point.
    pub cancel: Option<watch::Receiver<bool>>,
}

impl RunOptions {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[derive(Debug, Clone)]
pub struct FlowExecutor {
    adapters: AdapterRegistry,
}

impl Default for FlowExecutor {
    fn default() -> Self {
        Self::from_config(&AdapterConfig::default())
    }
}

impl FlowExecutor {
    pub fn new(adapters: AdapterRegistry) -> Self {
        Self { adapters }
    }

    /// Executor over the standard adapters built from `config`.
    pub fn from_config(config: &AdapterConfig) -> Self {
        Self::new(AdapterRegistry::standard(config))
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    pub async fn execute(&self, flow: &Flow, inputs: JsonMap) -> Result<FlowRunResult, ValidationError> {
        self.execute_with(flow, inputs, RunOptions::default()).await
    }

    /// Validate `flow` and run it.
    ///
    /// # Errors
    /// `ValidationError::Rejected` when validation fails and
    /// `ValidationError::CycleDetected` when no topological order exists.
    /// In both cases no node has run. Node failures are not errors; they
    /// are reported through the returned result.
    pub async fn execute_with(
        &self,
        flow: &Flow,
        inputs: JsonMap,
        options: RunOptions,
    ) -> Result<FlowRunResult, ValidationError> {
        let validated = validate_flow(flow)?;
        self.run(&validated, inputs, options).await
    }

    /// Run an already validated flow.
    pub async fn run(
        &self,
        flow: &ValidatedFlow,
        inputs: JsonMap,
        options: RunOptions,
    ) -> Result<FlowRunResult, ValidationError> {
        let order = execution_order(flow)?;
        let RunOptions { deadline, mut cancel } = options;
        let deadline = deadline.map(|budget| (Instant::now() + budget, budget));

        tracing::debug!(flow_id = %flow.id(), nodes = order.len(), "Executing flow");

        let mut ctx = ExecutionContext::new(inputs);
        let mut error = None;

        for node in order {
            let node_type = node.node_type();
            let index = ctx.logs.len();
            ctx.logs.push(StepLog::running(&node.id, node_type));

            let outcome = match self.adapters.get(node_type) {
                Ok(adapter) => invoke(adapter.as_ref(), node, &mut ctx, deadline, &mut cancel).await,
                Err(e) => Err(e.to_string()),
            };

            match outcome {
                Ok(result) => {
                    ctx.outputs.insert(node.id.clone(), result.clone());
                    ctx.logs[index].succeed(result);
                }
                Err(message) => {
                    tracing::debug!(flow_id = %flow.id(), node_id = %node.id, error = %message, "Node failed");
                    ctx.logs.push(StepLog::failure(&node.id, node_type, message.clone()));
                    error = Some(message);
                    break;
                }
            }
        }

        Ok(FlowRunResult {
            success: !ctx.logs.iter().any(StepLog::is_error),
            outputs: ctx.outputs,
            logs: ctx.logs,
            artifacts: ctx.artifacts,
            error,
        })
    }
}

/// Run one adapter, racing it against the deadline and the cancel signal.
async fn invoke(
    adapter: &dyn NodeAdapter,
    node: &AgentNode,
    ctx: &mut ExecutionContext,
    deadline: Option<(Instant, Duration)>,
    cancel: &mut Option<watch::Receiver<bool>>,
) -> Result<Value, String> {
    let timed_out = async {
        match deadline {
            Some((at, _)) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    };
    let cancelled = async {
        match cancel.as_mut() {
            Some(rx) => {
                let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
                if closed {
                    // Sender gone without cancelling: never fires
                    std::future::pending::<()>().await;
                }
            }
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        biased;

        _ = cancelled => Err(CANCELLED_MESSAGE.to_string()),
        _ = timed_out => Err(format!(
            "Execution timed out after {} ms",
            deadline.map(|(_, budget)| budget.as_millis()).unwrap_or_default()
        )),
        result = adapter.execute(node, ctx) => result.map_err(|e| e.to_string()),
    }
}

/// Kahn's algorithm over the flow's nodes.
///
/// Ready nodes leave the queue in FIFO order, seeded in node declaration
/// order, so the result is deterministic for a given flow.
///
/// # Errors
/// `ValidationError::CycleDetected` naming every node left unordered.
pub fn execution_order(flow: &ValidatedFlow) -> Result<Vec<&AgentNode>, ValidationError> {
    let nodes = flow.nodes();
    let position: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, node)| (node.id.as_str(), i))
        .collect();

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut in_degree = vec![0usize; nodes.len()];
    for edge in flow.edges() {
        if let (Some(&from), Some(&to)) = (
            position.get(edge.source.as_str()),
            position.get(edge.target.as_str()),
        ) {
            successors[from].push(to);
            in_degree[to] += 1;
        }
    }

    let mut queue: VecDeque<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(i) = queue.pop_front() {
        order.push(i);
        for &next in &successors[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() < nodes.len() {
        let remaining = (0..nodes.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| nodes[i].id.clone())
            .collect();
        return Err(ValidationError::CycleDetected { nodes: remaining });
    }

    Ok(order.into_iter().map(|i| &nodes[i]).collect())
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use xnode_core::{NodeKind, RawNode};

    /// Node count plus forward edges `(i, j)` with `i < j`, which is acyclic.
    fn arb_dag() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
        (2usize..12).prop_flat_map(|n| {
            let edge = (0..n - 1).prop_flat_map(move |i| (Just(i), (i + 1)..n));
            (Just(n), proptest::collection::vec(edge, 0..20))
        })
    }

    fn build(n: usize, edges: &[(usize, usize)]) -> Flow {
        let mut flow = Flow::new("f", "generated");
        for i in 0..n {
            flow = flow.with_node(RawNode::new(format!("n{}", i), NodeKind::INPUT_TEXT, json!({})));
        }
        for (a, b) in edges {
            flow = flow.with_edge(format!("n{}", a), format!("n{}", b));
        }
        flow
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Every edge's source is ordered before its target.
        #[test]
        fn prop_order_respects_edges((n, edges) in arb_dag()) {
            let flow = build(n, &edges);
            let validated = validate_flow(&flow).unwrap();
            let order = execution_order(&validated).unwrap();
            prop_assert_eq!(order.len(), n);
            let rank: HashMap<&str, usize> =
                order.iter().enumerate().map(|(i, node)| (node.id.as_str(), i)).collect();
            for (a, b) in &edges {
                let a = format!("n{}", a);
                let b = format!("n{}", b);
                prop_assert!(rank[a.as_str()] < rank[b.as_str()]);
            }
        }

        /// Adding a back edge from the last reachable node closes a cycle.
        #[test]
        fn prop_back_edge_is_detected(n in 2usize..10) {
            let chain: Vec<(usize, usize)> = (0..n - 1).map(|i| (i, i + 1)).collect();
            let mut flow = build(n, &chain);
            flow = flow.with_edge(format!("n{}", n - 1), "n0");
            let validated = validate_flow(&flow).unwrap();
            let is_cycle = matches!(
                execution_order(&validated),
                Err(ValidationError::CycleDetected { .. })
            );
            prop_assert!(is_cycle);
        }
    }
}
