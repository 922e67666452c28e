//! Daemon lifecycle tests
//!
//! Drive a real [`Daemon`] through the in-memory transport with a paused
//! clock: registration, admission, cancellation, reconnects and shutdown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use xnode_core::{AdapterError, AgentNode, NodeKind, ResourceRequirements, TaskEnvelope, TaskState};
use xnode_daemon::{
    memory_transport, Daemon, DaemonConfig, DaemonState, LlmConfig, MemoryListener, MemoryPeer,
    TaskRegistry, CANCELLED_BY_COORDINATOR,
};
use xnode_engine::{AdapterRegistry, ExecutionContext, FlowExecutor, InputAdapter, NodeAdapter};
use xnode_protocol::{CoordinatorMessage, RejectionCode, TaskSigner, WorkerMessage};
use xnode_test_utils::fixtures;

const NODE_ID: &str = "xnode_test";
/// Mock completions take this long, so llm tasks stay running for a while.
const LLM_DELAY: Duration = Duration::from_secs(10);

struct Harness {
    signer: TaskSigner,
    listener: MemoryListener,
    peer: MemoryPeer,
    registry: TaskRegistry,
    state: watch::Receiver<DaemonState>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

fn config() -> DaemonConfig {
    DaemonConfig {
        node_id: NODE_ID.to_string(),
        llm: LlmConfig {
            mock: true,
            mock_delay_ms: LLM_DELAY.as_millis() as u64,
        },
        ..DaemonConfig::default()
    }
}

/// Start a daemon and consume its registration.
async fn start() -> Harness {
    start_with(|daemon| daemon).await
}

async fn start_with(customize: impl FnOnce(Daemon) -> Daemon) -> Harness {
    let signer = fixtures::signer();
    let (connector, mut listener) = memory_transport();
    let daemon = customize(Daemon::new(
        config(),
        fixtures::trust_store_for(&signer),
        Arc::new(connector),
    ));
    let registry = daemon.registry();
    let state = daemon.state();
    let (shutdown, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(daemon.run(shutdown_rx));

    let mut peer = listener.accept().await.expect("daemon never connected");
    let first = peer.recv().await.expect("no registration");
    assert_eq!(first.kind(), "register");

    Harness {
        signer,
        listener,
        peer,
        registry,
        state,
        shutdown,
        handle,
    }
}

/// Next message that is not a heartbeat or task request.
async fn next_reply(peer: &mut MemoryPeer) -> WorkerMessage {
    loop {
        let message = peer.recv().await.expect("worker hung up");
        if !message.is_periodic() {
            return message;
        }
    }
}

fn echo_task(signer: &TaskSigner, id: &str) -> TaskEnvelope {
    fixtures::signed_task(signer, id, &fixtures::echo_flow(), fixtures::cpu(1.0))
}

fn slow_task(signer: &TaskSigner, id: &str, requirements: ResourceRequirements) -> TaskEnvelope {
    fixtures::signed_task(signer, id, &fixtures::llm_flow(), requirements)
}

fn assign(peer: &MemoryPeer, task: TaskEnvelope) {
    assert!(peer.send(CoordinatorMessage::TaskAssigned { task }));
}

fn expect_rejection(message: WorkerMessage, id: &str, expected: RejectionCode) {
    match message {
        WorkerMessage::TaskRejected {
            task_id,
            node_id,
            code,
            ..
        } => {
            assert_eq!(task_id, id);
            assert_eq!(node_id, NODE_ID);
            assert_eq!(code, expected);
        }
        other => panic!("expected rejection of {}, got {:?}", id, other),
    }
}

fn expect_completion(message: WorkerMessage, id: &str) -> xnode_core::ExecutionResult {
    match message {
        WorkerMessage::TaskCompleted {
            task_id, result, ..
        } => {
            assert_eq!(task_id, id);
            result
        }
        other => panic!("expected completion of {}, got {:?}", id, other),
    }
}

// ============================================================================
// REGISTRATION AND EXECUTION
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_registers_and_runs() {
    let mut h = start().await;
    h.state
        .wait_for(|s| *s == DaemonState::Running)
        .await
        .unwrap();
    assert_eq!(h.listener.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_signed_task_completes_then_is_purged() {
    let mut h = start().await;
    assign(&h.peer, echo_task(&h.signer, "task_echo"));

    let result = expect_completion(next_reply(&mut h.peer).await, "task_echo");
    assert!(result.success);
    assert_eq!(result.outputs["out1"]["text"], "hi");
    assert_eq!(result.content_hash.len(), 64);

    let status = h.registry.get("task_echo").unwrap();
    assert_eq!(status.status, TaskState::Completed);

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(!h.registry.contains("task_echo"));
}

#[tokio::test(start_paused = true)]
async fn test_failing_flow_reports_failure() {
    let mut h = start().await;
    let task = fixtures::signed_task(
        &h.signer,
        "task_fail",
        &fixtures::failing_middle_flow(),
        fixtures::cpu(1.0),
    );
    assign(&h.peer, task);

    let result = expect_completion(next_reply(&mut h.peer).await, "task_fail");
    assert!(!result.success);
    assert!(!result.outputs.contains_key("C"));
    assert_eq!(
        h.registry.get("task_fail").unwrap().status,
        TaskState::Failed
    );
}

/// `input.text` that panics on node `in1` and reads inputs normally elsewhere.
struct PanickingInput;

#[async_trait]
impl NodeAdapter for PanickingInput {
    fn node_type(&self) -> &'static str {
        NodeKind::INPUT_TEXT
    }

    async fn execute(
        &self,
        node: &AgentNode,
        ctx: &mut ExecutionContext,
    ) -> Result<Value, AdapterError> {
        if node.id == "in1" {
            panic!("input adapter exploded");
        }
        InputAdapter.execute(node, ctx).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_panicking_task_fails_alone() {
    let mut h = start_with(|daemon| {
        let mut adapters = AdapterRegistry::standard(&config().adapter_config());
        adapters.register(NodeKind::INPUT_TEXT, Arc::new(PanickingInput));
        daemon.with_executor(Arc::new(FlowExecutor::new(adapters)))
    })
    .await;
    assign(&h.peer, slow_task(&h.signer, "task_slow", fixtures::cpu(1.0)));
    assign(&h.peer, echo_task(&h.signer, "task_boom"));

    let result = expect_completion(next_reply(&mut h.peer).await, "task_boom");
    assert!(!result.success);
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .starts_with("Task execution aborted"));
    assert_eq!(
        h.registry.get("task_boom").unwrap().status,
        TaskState::Failed
    );

    // The neighbour finishes and is the only other report
    let result = expect_completion(next_reply(&mut h.peer).await, "task_slow");
    assert!(result.success);
    assert_eq!(*h.state.borrow(), DaemonState::Running);

    assign(&h.peer, slow_task(&h.signer, "task_next", fixtures::cpu(1.0)));
    let result = expect_completion(next_reply(&mut h.peer).await, "task_next");
    assert!(result.success);
}

// ============================================================================
// SCREENING
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_claims_of_running_tasks_block_oversized_task() {
    let mut h = start().await;
    assign(&h.peer, slow_task(&h.signer, "a", ResourceRequirements::new(2.0, 256)));
    assign(&h.peer, slow_task(&h.signer, "b", ResourceRequirements::new(2.0, 256)));
    assign(&h.peer, slow_task(&h.signer, "c", ResourceRequirements::new(3.0, 256)));

    expect_rejection(
        next_reply(&mut h.peer).await,
        "c",
        RejectionCode::InsufficientResources,
    );

    let mut done = Vec::new();
    for _ in 0..2 {
        let message = next_reply(&mut h.peer).await;
        if let WorkerMessage::TaskCompleted { task_id, result, .. } = message {
            assert!(result.success);
            done.push(task_id);
        }
    }
    done.sort();
    assert_eq!(done, vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_slot_limit_rejects_fourth_task() {
    let mut h = start().await;
    for id in ["a", "b", "c", "d"] {
        assign(&h.peer, slow_task(&h.signer, id, fixtures::cpu(0.5)));
    }
    expect_rejection(next_reply(&mut h.peer).await, "d", RejectionCode::AtCapacity);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_coordinator_is_rejected() {
    let mut h = start().await;
    let stranger = TaskSigner::generate("coord_stranger");
    assign(&h.peer, echo_task(&stranger, "task_x"));

    expect_rejection(
        next_reply(&mut h.peer).await,
        "task_x",
        RejectionCode::UntrustedCoordinator,
    );
    assert!(!h.registry.contains("task_x"));
}

#[tokio::test(start_paused = true)]
async fn test_tampered_envelope_is_rejected() {
    let mut h = start().await;
    let mut task = echo_task(&h.signer, "task_t");
    task.agent_id += 1;
    assign(&h.peer, task);

    expect_rejection(
        next_reply(&mut h.peer).await,
        "task_t",
        RejectionCode::InvalidSignature,
    );
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_assignment_is_rejected() {
    let mut h = start().await;
    let task = slow_task(&h.signer, "task_dup", fixtures::cpu(1.0));
    assign(&h.peer, task.clone());
    assign(&h.peer, task);

    expect_rejection(
        next_reply(&mut h.peer).await,
        "task_dup",
        RejectionCode::DuplicateTask,
    );
    let result = expect_completion(next_reply(&mut h.peer).await, "task_dup");
    assert!(result.success);
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_message_is_ignored() {
    let mut h = start().await;
    assert!(h.peer.send_text("{\"type\":\"reboot\"}"));
    assign(&h.peer, echo_task(&h.signer, "task_after"));

    let result = expect_completion(next_reply(&mut h.peer).await, "task_after");
    assert!(result.success);
}

// ============================================================================
// CANCELLATION
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_cancel_reports_exactly_once() {
    let mut h = start().await;
    assign(&h.peer, slow_task(&h.signer, "task_c", fixtures::cpu(1.0)));
    h.peer.send(CoordinatorMessage::TaskCancelled {
        task_id: "task_c".to_string(),
    });

    let result = expect_completion(next_reply(&mut h.peer).await, "task_c");
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some(CANCELLED_BY_COORDINATOR));
    assert!(!h.registry.contains("task_c"));

    // Long past when the run would have finished, nothing else arrives
    let second = tokio::time::timeout(LLM_DELAY * 3, next_reply(&mut h.peer)).await;
    assert!(second.is_err(), "unexpected {:?}", second);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_of_unknown_task_is_ignored() {
    let mut h = start().await;
    h.peer.send(CoordinatorMessage::TaskCancelled {
        task_id: "task_none".to_string(),
    });
    assign(&h.peer, echo_task(&h.signer, "task_ok"));

    let result = expect_completion(next_reply(&mut h.peer).await, "task_ok");
    assert!(result.success);
}

// ============================================================================
// TIMERS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_polls_and_heartbeats() {
    let mut h = start().await;
    assign(&h.peer, slow_task(&h.signer, "task_hb", fixtures::cpu(3.0)));

    let mut polled = None;
    let heartbeat = loop {
        match h.peer.recv().await.unwrap() {
            WorkerMessage::RequestTask {
                available_resources,
                ..
            } => {
                polled.get_or_insert(available_resources);
            }
            message @ WorkerMessage::Heartbeat { .. } => break message,
            _ => {}
        }
    };

    let available = polled.expect("no task request before the first heartbeat");
    // First poll at 5s, while the 3-core task still holds its claim
    assert_eq!(available.cpu, 1.0);

    match heartbeat {
        WorkerMessage::Heartbeat {
            node_id,
            active_tasks,
            capabilities,
            ..
        } => {
            assert_eq!(node_id, NODE_ID);
            assert!(capabilities.uptime >= 30);
            // The task finished at 10s and the heartbeat fires at 30s
            assert!(active_tasks.is_empty());
        }
        other => panic!("unexpected {:?}", other),
    }
}

// ============================================================================
// CONNECTION LOSS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_retries_until_coordinator_is_up() {
    let (connector, mut listener) = memory_transport();
    listener.set_online(false);
    let daemon = Daemon::new(
        config(),
        fixtures::trust_store_for(&fixtures::signer()),
        Arc::new(connector),
    );
    let (_shutdown, shutdown_rx) = watch::channel(false);
    tokio::spawn(daemon.run(shutdown_rx));

    tokio::time::sleep(Duration::from_secs(12)).await;
    assert_eq!(listener.attempts(), 3);

    listener.set_online(true);
    let mut peer = listener.accept().await.unwrap();
    assert_eq!(peer.recv().await.unwrap().kind(), "register");
}

#[tokio::test(start_paused = true)]
async fn test_result_is_buffered_across_reconnect() {
    let mut h = start().await;
    assign(&h.peer, slow_task(&h.signer, "task_r", fixtures::cpu(1.0)));
    tokio::time::sleep(Duration::from_millis(10)).await;

    h.listener.set_online(false);
    drop(h.peer);

    // The run finishes at 10s while nobody is listening
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(
        h.registry.get("task_r").unwrap().status,
        TaskState::Completed
    );

    h.listener.set_online(true);
    let mut peer = h.listener.accept().await.unwrap();
    assert_eq!(peer.recv().await.unwrap().kind(), "register");
    let result = expect_completion(next_reply(&mut peer).await, "task_r");
    assert!(result.success);
}

// ============================================================================
// SHUTDOWN
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_coordinator_shutdown_drains_running_tasks() {
    let mut h = start().await;
    assign(&h.peer, slow_task(&h.signer, "task_s", fixtures::cpu(1.0)));
    assert!(h.peer.send(CoordinatorMessage::Shutdown));
    assign(&h.peer, echo_task(&h.signer, "task_late"));

    expect_rejection(
        next_reply(&mut h.peer).await,
        "task_late",
        RejectionCode::ShuttingDown,
    );
    h.state
        .wait_for(|s| *s == DaemonState::Stopping)
        .await
        .unwrap();

    let result = expect_completion(next_reply(&mut h.peer).await, "task_s");
    assert!(result.success);

    h.handle.await.unwrap();
    assert_eq!(*h.state.borrow(), DaemonState::Stopped);
    assert!(h.peer.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_local_shutdown_when_idle() {
    let h = start().await;
    h.shutdown.send(true).unwrap();
    h.handle.await.unwrap();
    assert_eq!(*h.state.borrow(), DaemonState::Stopped);
}
