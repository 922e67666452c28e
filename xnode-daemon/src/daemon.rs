//! Worker lifecycle
//!
//! One control loop owns the coordinator session and every timer. Running
//! tasks never touch the session: they report through an events channel
//! and the loop delivers on their behalf, buffering across reconnects.
//!
//! ```text
//! Stopped -> Connecting -> Registered -> Running -> Stopping -> Stopped
//!                ^                          |
//!                +------- disconnect -------+
//! ```

use crate::admission;
use crate::config::DaemonConfig;
use crate::monitor::{ResourceMonitor, StaticResourceMonitor};
use crate::outbox::Outbox;
use crate::registry::{CancelledTask, TaskRegistry};
use crate::runner::{failed_result, TaskRunner, CANCELLED_BY_COORDINATOR};
use crate::transport::{Connector, Session};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use xnode_core::{ExecutionResult, NodeCapabilities, TaskEnvelope, TaskState};
use xnode_engine::FlowExecutor;
use xnode_protocol::{CoordinatorMessage, RejectionCode, TrustStore, WorkerMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Stopped,
    Connecting,
    Registered,
    Running,
    Stopping,
}

impl DaemonState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DaemonState::Stopped => "stopped",
            DaemonState::Connecting => "connecting",
            DaemonState::Registered => "registered",
            DaemonState::Running => "running",
            DaemonState::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for DaemonState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Control {
    Continue,
    Stop,
}

/// Everything the control loop mutates.
struct Link {
    session: Option<Session>,
    outbox: Outbox,
    /// Wait one reconnect interval before the next connect attempt.
    backoff: bool,
    tasks: JoinSet<()>,
    events: mpsc::UnboundedSender<WorkerMessage>,
}

impl Link {
    fn deliver(&mut self, message: WorkerMessage) {
        self.outbox.deliver(self.session.as_ref(), message);
    }

    fn disconnect(&mut self) {
        self.session = None;
        self.backoff = true;
    }
}

pub struct Daemon {
    config: DaemonConfig,
    trust: TrustStore,
    connector: Arc<dyn Connector>,
    monitor: Arc<dyn ResourceMonitor>,
    executor: Arc<FlowExecutor>,
    registry: TaskRegistry,
    state: watch::Sender<DaemonState>,
    started: Instant,
}

impl Daemon {
    pub fn new(config: DaemonConfig, trust: TrustStore, connector: Arc<dyn Connector>) -> Self {
        let monitor = Arc::new(StaticResourceMonitor::new(config.resources.clone()));
        let executor = Arc::new(FlowExecutor::from_config(&config.adapter_config()));
        let (state, _) = watch::channel(DaemonState::Stopped);
        Self {
            config,
            trust,
            connector,
            monitor,
            executor,
            registry: TaskRegistry::new(),
            state,
            started: Instant::now(),
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn ResourceMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_executor(mut self, executor: Arc<FlowExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    /// Shared handle onto the task table.
    pub fn registry(&self) -> TaskRegistry {
        self.registry.clone()
    }

    pub fn state(&self) -> watch::Receiver<DaemonState> {
        self.state.subscribe()
    }

    /// Current capabilities: configuration, live resources and uptime.
    pub fn capabilities(&self) -> NodeCapabilities {
        let mut caps = self.config.capabilities();
        caps.resources = self.monitor.snapshot();
        caps.uptime = self.started.elapsed().as_secs();
        caps
    }

    fn set_state(&self, next: DaemonState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "Daemon state changed");
        }
    }

    /// Run until `shutdown` flips to true (or its sender goes away) or the
    /// coordinator sends `shutdown`, then drain and stop.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let intervals = self.config.intervals.clone();
        let runner = TaskRunner::new(Arc::clone(&self.executor), Arc::clone(&self.monitor));
        let (events, mut completions) = mpsc::unbounded_channel();
        let mut link = Link {
            session: None,
            outbox: Outbox::new(),
            backoff: false,
            tasks: JoinSet::new(),
            events,
        };
        let mut heartbeat = ticker(intervals.heartbeat());
        let mut poll = ticker(intervals.poll());

        tracing::info!(
            node_id = %self.node_id(),
            coordinator = %self.connector.endpoint(),
            max_concurrent_tasks = self.config.max_concurrent_tasks,
            trusted_coordinators = self.trust.len(),
            "xNode daemon starting"
        );

        loop {
            if link.session.is_none() {
                self.set_state(DaemonState::Connecting);
                if link.backoff {
                    tokio::select! {
                        _ = shutdown_requested(&mut shutdown) => break,
                        _ = tokio::time::sleep(intervals.reconnect()) => {}
                    }
                }
                let connected = tokio::select! {
                    _ = shutdown_requested(&mut shutdown) => break,
                    connected = self.connector.connect() => connected,
                };
                match connected {
                    Ok(session) => {
                        if self.on_connected(&mut link, session) {
                            heartbeat.reset();
                            poll.reset();
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            retry_ms = intervals.reconnect_ms,
                            "Coordinator connection failed"
                        );
                        link.backoff = true;
                    }
                }
                continue;
            }
            let Some(session) = link.session.as_mut() else {
                continue;
            };

            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                inbound = session.recv() => match inbound {
                    Some(Ok(message)) => {
                        if let Control::Stop = self.handle(message, &mut link, &runner, false) {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Ignoring undecodable coordinator message");
                    }
                    None => {
                        tracing::warn!(
                            retry_ms = intervals.reconnect_ms,
                            "Lost connection to coordinator"
                        );
                        link.disconnect();
                    }
                },
                Some(message) = completions.recv() => link.deliver(message),
                Some(joined) = link.tasks.join_next(), if !link.tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Task supervisor failed");
                    }
                }
                _ = heartbeat.tick() => {
                    let message =
                        WorkerMessage::heartbeat(self.capabilities(), self.registry.active_ids());
                    link.deliver(message);
                }
                _ = poll.tick() => self.poll(&mut link),
            }
        }

        self.drain(link, &runner, completions).await;
    }

    /// Register, then push whatever piled up while disconnected.
    fn on_connected(&self, link: &mut Link, session: Session) -> bool {
        self.set_state(DaemonState::Registered);
        if let Err(e) = session.send(&WorkerMessage::register(self.capabilities())) {
            tracing::warn!(error = %e, "Registration failed");
            link.disconnect();
            return false;
        }
        tracing::info!(
            node_id = %self.node_id(),
            coordinator = %self.connector.endpoint(),
            "Registered with coordinator"
        );

        match link.outbox.flush(&session) {
            Ok(0) => {}
            Ok(sent) => tracing::info!(sent, "Flushed buffered messages"),
            Err(e) => {
                tracing::warn!(error = %e, pending = link.outbox.len(), "Flush failed");
                link.disconnect();
                return false;
            }
        }

        link.session = Some(session);
        link.backoff = false;
        self.set_state(DaemonState::Running);
        true
    }

    fn handle(
        &self,
        message: CoordinatorMessage,
        link: &mut Link,
        runner: &TaskRunner,
        stopping: bool,
    ) -> Control {
        match message {
            CoordinatorMessage::TaskAssigned { task } => {
                self.dispatch(task, link, runner, stopping);
                Control::Continue
            }
            CoordinatorMessage::TaskCancelled { task_id } => {
                self.cancel(&task_id, link);
                Control::Continue
            }
            CoordinatorMessage::Shutdown => {
                tracing::info!("Coordinator requested shutdown");
                Control::Stop
            }
        }
    }

    fn poll(&self, link: &mut Link) {
        let caps = self.capabilities();
        if !admission::can_accept_more(&caps, &self.registry) {
            tracing::trace!(active = self.registry.active_count(), "At capacity, not polling");
            return;
        }
        let available = admission::available_resources(&caps, &self.registry);
        link.deliver(WorkerMessage::request_task(self.node_id(), available));
    }

    // ========================================================================
    // ASSIGNMENT
    // ========================================================================

    fn dispatch(&self, task: TaskEnvelope, link: &mut Link, runner: &TaskRunner, stopping: bool) {
        if let Err((code, reason)) = self.screen(&task, stopping) {
            self.reject(link, &task.id, code, reason);
            return;
        }

        let task = Arc::new(task);
        let cancel = match self.registry.insert(Arc::clone(&task), self.node_id()) {
            Ok(cancel) => cancel,
            Err(e) => {
                self.reject(link, &task.id, RejectionCode::DuplicateTask, e.to_string());
                return;
            }
        };

        tracing::info!(
            task_id = %task.id,
            flow_id = task.flow_id().unwrap_or("-"),
            priority = task.priority,
            cpu = task.required_resources.cpu,
            memory = task.required_resources.memory,
            "Task accepted"
        );

        let supervisor = Supervisor {
            registry: self.registry.clone(),
            runner: runner.clone(),
            events: link.events.clone(),
            node_id: self.config.node_id.clone(),
            retention: self.config.intervals.retention(),
        };
        link.tasks.spawn(supervisor.run(task, cancel));
    }

    /// Duplicate, then shutdown, then signature, then capacity.
    fn screen(&self, task: &TaskEnvelope, stopping: bool) -> Result<(), (RejectionCode, String)> {
        if self.registry.contains(&task.id) {
            return Err((
                RejectionCode::DuplicateTask,
                format!("Task {} is already known to this node", task.id),
            ));
        }
        if stopping {
            return Err((
                RejectionCode::ShuttingDown,
                "Node is shutting down".to_string(),
            ));
        }
        self.trust
            .verify(task)
            .map_err(|e| (RejectionCode::from(&e), e.to_string()))?;
        admission::admit(&self.capabilities(), &self.registry, &task.required_resources)
            .map_err(|e| (RejectionCode::from(&e), e.to_string()))
    }

    fn reject(&self, link: &mut Link, task_id: &str, code: RejectionCode, reason: String) {
        tracing::warn!(task_id = %task_id, code = %code.as_str(), reason = %reason, "Rejecting task");
        link.deliver(WorkerMessage::task_rejected(
            task_id,
            self.node_id(),
            code,
            reason,
        ));
    }

    fn cancel(&self, task_id: &str, link: &mut Link) {
        let Some(CancelledTask { status, task }) = self.registry.cancel(task_id) else {
            tracing::debug!(task_id = %task_id, "Cancel for unknown or finished task ignored");
            return;
        };
        tracing::info!(task_id = %task_id, "Task cancelled by coordinator");

        let execution_time = match (status.start_time, status.end_time) {
            (Some(start), Some(end)) => u64::try_from(end.saturating_sub(start)).unwrap_or(0),
            _ => 0,
        };
        let result = seal_cancelled(&task, execution_time);
        link.deliver(WorkerMessage::task_completed(self.node_id(), result));
    }

    // ========================================================================
    // SHUTDOWN
    // ========================================================================

    /// Keep the session up until every task has reported, refusing new work,
    /// then close it.
    async fn drain(
        &self,
        mut link: Link,
        runner: &TaskRunner,
        mut completions: mpsc::UnboundedReceiver<WorkerMessage>,
    ) {
        self.set_state(DaemonState::Stopping);
        tracing::info!(
            active = self.registry.active_count(),
            "Stopping, waiting for running tasks"
        );

        let mut check = interval(self.config.intervals.drain_poll());
        check.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while !link.tasks.is_empty() {
            let session = link.session.as_mut();
            let inbound = async move {
                match session {
                    Some(session) => session.recv().await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                _ = check.tick() => {
                    tracing::debug!(running = self.registry.running_count(), "Draining");
                }
                Some(message) = completions.recv() => link.deliver(message),
                Some(joined) = link.tasks.join_next() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Task supervisor failed");
                    }
                }
                inbound = inbound => match inbound {
                    Some(Ok(message)) => {
                        let _ = self.handle(message, &mut link, runner, true);
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Ignoring undecodable coordinator message");
                    }
                    None => link.disconnect(),
                },
            }
        }

        // Supervisors report before they exit
        while let Ok(message) = completions.try_recv() {
            link.deliver(message);
        }

        link.session = None;
        self.set_state(DaemonState::Stopped);
        tracing::info!(undelivered = link.outbox.len(), "xNode daemon stopped");
    }
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("node_id", &self.config.node_id)
            .field("coordinator", &self.connector.endpoint())
            .field("state", &*self.state.borrow())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Owns one admitted task from start to its single terminal report.
struct Supervisor {
    registry: TaskRegistry,
    runner: TaskRunner,
    events: mpsc::UnboundedSender<WorkerMessage>,
    node_id: String,
    retention: Duration,
}

impl Supervisor {
    async fn run(self, task: Arc<TaskEnvelope>, cancel: watch::Receiver<bool>) {
        if self.registry.start(&task.id).is_err() {
            // Cancelled before it got going
            return;
        }

        let job = {
            let runner = self.runner.clone();
            let task = Arc::clone(&task);
            tokio::spawn(async move { runner.run(&task, cancel).await })
        };
        let result = match job.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(task_id = %task.id, error = %e, "Task execution aborted");
                failed_result(&task, format!("Task execution aborted: {}", e))
            }
        };

        let state = if result.success {
            TaskState::Completed
        } else {
            TaskState::Failed
        };
        if self.registry.finish(&task.id, state).is_err() {
            tracing::debug!(task_id = %task.id, "Task already settled, discarding result");
            return;
        }

        tracing::info!(
            task_id = %task.id,
            success = result.success,
            execution_ms = result.metrics.execution_time,
            compute_units = result.metrics.compute_units,
            "Task finished"
        );
        let _ = self
            .events
            .send(WorkerMessage::task_completed(self.node_id, result));

        let registry = self.registry;
        let retention = self.retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            registry.purge(&task.id);
        });
    }
}

fn seal_cancelled(task: &TaskEnvelope, execution_time: u64) -> ExecutionResult {
    let mut result = failed_result(task, CANCELLED_BY_COORDINATOR);
    result.metrics.execution_time = execution_time;
    result
}

/// Interval whose first tick is one full period away.
fn ticker(period: Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    timer
}

/// Resolves once shutdown is requested or nobody is left to request it.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory_transport;
    use xnode_test_utils::fixtures;

    fn daemon() -> Daemon {
        let config = DaemonConfig {
            node_id: "xnode_unit".to_string(),
            ..DaemonConfig::default()
        };
        let (connector, _listener) = memory_transport();
        Daemon::new(config, TrustStore::new(), Arc::new(connector))
    }

    #[test]
    fn test_state_names() {
        assert_eq!(DaemonState::Registered.to_string(), "registered");
        assert_eq!(DaemonState::Stopping.as_str(), "stopping");
    }

    #[tokio::test]
    async fn test_new_daemon_is_stopped() {
        let daemon = daemon();
        assert_eq!(*daemon.state().borrow(), DaemonState::Stopped);
        assert!(daemon.registry().is_empty());
    }

    #[tokio::test]
    async fn test_capabilities_carry_identity() {
        let caps = daemon().capabilities();
        assert_eq!(caps.node_id, "xnode_unit");
        assert_eq!(caps.max_concurrent_tasks, 3);
    }

    #[test]
    fn test_screen_order() {
        let daemon = daemon();
        let task = fixtures::unsigned_task("t1", fixtures::cpu(1.0));

        // Unsigned and untrusted, but shutdown is checked first
        let (code, _) = daemon.screen(&task, true).unwrap_err();
        assert_eq!(code, RejectionCode::ShuttingDown);

        let (code, _) = daemon.screen(&task, false).unwrap_err();
        assert_eq!(code, RejectionCode::UntrustedCoordinator);

        let _ = daemon
            .registry
            .insert(Arc::new(task.clone()), "xnode_unit")
            .unwrap();
        let (code, _) = daemon.screen(&task, true).unwrap_err();
        assert_eq!(code, RejectionCode::DuplicateTask);
    }

    #[test]
    fn test_cancelled_result_is_sealed() {
        let task = fixtures::unsigned_task("t1", fixtures::cpu(1.0));
        let result = seal_cancelled(&task, 40);
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(CANCELLED_BY_COORDINATOR));
        assert_eq!(result.metrics.execution_time, 40);
        assert!(!result.content_hash.is_empty());
    }
}
