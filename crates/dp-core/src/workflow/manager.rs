//! Workflow manager
//!
//! Drives one run: plan, dispatch the frontier, collect replies, and
//! aggregate. Each planned agent runs as its own actor task for the
//! duration of the run; the manager only talks to them through the bus.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::result::{RunId, RunResult};
use super::state::RunState;
use crate::agents::{Agent, AgentId, Role};
use crate::audit::TranscriptLog;
use crate::bus::MessageBus;
use crate::coordinator::Coordinator;
use crate::error::ErrorKind;
use crate::message::{ErrorPayload, Message, MessageKind, TaskPayload};
use crate::plan::{DelegationPlan, Task};
use crate::registry::Registry;
use crate::tool::ToolManager;

/// Runs tasks against an immutable registry
pub struct WorkflowManager {
    registry: Arc<Registry>,
    coordinator: Coordinator,
    agents: BTreeMap<AgentId, Arc<Agent>>,
    audit: Option<TranscriptLog>,
}

impl WorkflowManager {
    /// Build every worker agent up front; fails on the first unbound capability
    pub fn new(registry: Arc<Registry>, tools: Arc<ToolManager>) -> crate::Result<Self> {
        let mut agents = BTreeMap::new();
        for descriptor in registry.agents().filter(|a| a.role != Role::Coordinator) {
            let agent = Agent::new(descriptor.clone(), &registry, tools.clone())?;
            agents.insert(descriptor.id.clone(), Arc::new(agent));
        }

        let audit = registry
            .workflow()
            .transcript_dir
            .clone()
            .map(TranscriptLog::new);

        info!(agents = agents.len(), "Workflow manager ready");

        Ok(Self {
            coordinator: Coordinator::new(registry.clone()),
            registry,
            agents,
            audit,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn agent(&self, id: &AgentId) -> Option<&Arc<Agent>> {
        self.agents.get(id)
    }

    /// Plan a task without running it
    pub fn plan(&self, task: &Task) -> crate::Result<DelegationPlan> {
        self.coordinator.plan(task)
    }

    pub async fn run(&self, task: Task) -> RunResult {
        self.run_with_cancel(task, CancellationToken::new()).await
    }

    /// Run a task; cancelling `cancel` stops dispatching and winds the run down
    pub async fn run_with_cancel(&self, task: Task, cancel: CancellationToken) -> RunResult {
        let run_id = RunId::default();
        let started_at = Utc::now();
        info!(run_id = %run_id, task = %task.id, description = %task.description, "Run started");

        let result = match self.coordinator.plan(&task) {
            Ok(plan) => self.execute(run_id, &task, plan, cancel, started_at).await,
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Planning failed");
                RunResult::planning_failed(run_id, task.id.clone(), &e, started_at)
            }
        };

        info!(
            run_id = %result.run_id,
            status = %result.status,
            cancelled = result.cancelled,
            subtasks = result.subtasks.len(),
            "Run finished"
        );

        if let Some(audit) = &self.audit {
            match audit.write(&task, &result) {
                Ok(path) => debug!(path = %path.display(), "Transcript written"),
                Err(e) => warn!(run_id = %result.run_id, error = %e, "Failed to write transcript"),
            }
        }

        result
    }

    async fn execute(
        &self,
        run_id: RunId,
        task: &Task,
        plan: DelegationPlan,
        cancel: CancellationToken,
        started_at: DateTime<Utc>,
    ) -> RunResult {
        let bus = Arc::new(MessageBus::new(self.registry.clone()));
        let coordinator = self.coordinator.id().clone();
        let workflow = self.registry.workflow();
        let max_in_flight = workflow.max_concurrency.max(1);
        let grace = Duration::from_secs(workflow.cancel_grace_secs);

        let mut actors = JoinSet::new();
        let mut actor_of = HashMap::new();
        let mut dead: HashSet<AgentId> = HashSet::new();
        let planned: BTreeSet<&AgentId> = plan.subtasks().iter().map(|s| &s.agent).collect();
        for id in planned {
            match self.agents.get(id) {
                Some(agent) => {
                    let handle = actors.spawn(agent.clone().serve(bus.clone(), cancel.clone()));
                    actor_of.insert(handle.id(), id.clone());
                }
                None => {
                    dead.insert(id.clone());
                }
            }
        }

        let mut state = RunState::new(&plan);
        let mut cancelled = false;
        let mut deadline: Option<Instant> = None;

        loop {
            if !cancelled && cancel.is_cancelled() {
                cancelled = true;
                deadline = Some(begin_cancel(&run_id, &bus, &coordinator, &mut state, grace));
            }

            if !cancelled {
                dispatch(&run_id, task, &plan, &bus, &coordinator, &mut state, &dead, max_in_flight);
            }

            if state.in_flight_count() == 0 && (cancelled || state.frontier().is_empty()) {
                break;
            }

            tokio::select! {
                message = bus.receive(&coordinator) => match message {
                    Some(message) => on_reply(&run_id, &mut state, message),
                    None => break,
                },
                Some(joined) = actors.join_next_with_id() => {
                    let (task_id, reason) = match joined {
                        Ok((task_id, ())) => (task_id, "agent actor exited"),
                        Err(e) if e.is_panic() => (e.id(), "agent actor panicked"),
                        Err(e) => (e.id(), "agent actor was aborted"),
                    };
                    if let Some(agent) = actor_of.remove(&task_id) {
                        error!(run_id = %run_id, agent = %agent, reason, "Agent actor stopped");
                        let payload = ErrorPayload::new(ErrorKind::Internal, format!("{}: {}", agent, reason));
                        state.fail_agent(&agent, &payload);
                        dead.insert(agent);
                    }
                },
                _ = cancel.cancelled(), if !cancelled => {}
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let abandoned = state.abandon_in_flight();
                    warn!(run_id = %run_id, abandoned, "Grace period over, abandoning in-flight subtasks");
                    break;
                }
            }
        }

        actors.shutdown().await;

        let transcript = bus.transcript();
        let (subtasks, outputs, status) = state.finish();

        RunResult {
            run_id,
            task_id: task.id.clone(),
            status,
            cancelled,
            failure: None,
            plan: Some(plan),
            subtasks,
            outputs,
            transcript,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Send a task message for every ready subtask, up to the in-flight cap
#[allow(clippy::too_many_arguments)]
fn dispatch(
    run_id: &RunId,
    task: &Task,
    plan: &DelegationPlan,
    bus: &MessageBus,
    coordinator: &AgentId,
    state: &mut RunState<'_>,
    dead: &HashSet<AgentId>,
    max_in_flight: usize,
) {
    for id in state.frontier() {
        if state.in_flight_count() >= max_in_flight {
            break;
        }
        let Some(subtask) = plan.get(&id) else {
            continue;
        };

        if dead.contains(&subtask.agent) {
            let payload = ErrorPayload::new(
                ErrorKind::Internal,
                format!("agent {} is not running", subtask.agent),
            );
            state.fail(&id, payload);
            continue;
        }

        let payload = TaskPayload {
            subtask: id.clone(),
            capability: subtask.capability.clone(),
            params: task.params.clone(),
            inputs: state.inputs_for(&id),
        };
        let message = Message::task(coordinator.clone(), subtask.agent.clone(), &payload);
        let message_id = message.id().clone();

        match bus.send(message) {
            Ok(()) => {
                debug!(run_id = %run_id, subtask = %id, agent = %subtask.agent, "Subtask dispatched");
                state.mark_dispatched(&id, message_id);
            }
            Err(e) => {
                warn!(run_id = %run_id, subtask = %id, error = %e, "Dispatch rejected");
                state.fail(&id, ErrorPayload::from(&e));
            }
        }
    }
}

fn on_reply(run_id: &RunId, state: &mut RunState<'_>, message: Message) {
    let Some(reply_to) = message.in_reply_to().cloned() else {
        debug!(run_id = %run_id, from = %message.sender(), kind = ?message.kind(), "Unsolicited message ignored");
        return;
    };

    match message.kind() {
        MessageKind::Status => {
            if let Some(id) = state.correlate(&reply_to) {
                debug!(run_id = %run_id, subtask = %id, agent = %message.sender(), "Subtask started");
            }
        }
        MessageKind::Result => match state.succeed(&reply_to, message.payload().clone()) {
            Some(id) => info!(run_id = %run_id, subtask = %id, agent = %message.sender(), "Subtask succeeded"),
            None => debug!(run_id = %run_id, reply_to = %reply_to, "Late result ignored"),
        },
        MessageKind::Error => {
            let error = message
                .error_payload()
                .unwrap_or_else(|| ErrorPayload::new(ErrorKind::Internal, "malformed error payload"));
            let kind = error.kind;
            let text = error.message.clone();
            if let Some(id) = state.error(&reply_to, error) {
                warn!(run_id = %run_id, subtask = %id, ?kind, error = %text, "Subtask failed");
            }
        }
        MessageKind::Task => {
            warn!(run_id = %run_id, from = %message.sender(), "Coordinator does not accept task messages");
        }
    }
}

/// Skip pending work, notify agents, and return the abandonment deadline
fn begin_cancel(
    run_id: &RunId,
    bus: &MessageBus,
    coordinator: &AgentId,
    state: &mut RunState<'_>,
    grace: Duration,
) -> Instant {
    let skipped = state.cancel_pending();
    warn!(
        run_id = %run_id,
        skipped,
        in_flight = state.in_flight_count(),
        "Run cancelled"
    );

    let notice = Message::broadcast(
        coordinator.clone(),
        MessageKind::Status,
        json!({ "state": "cancelled", "run_id": run_id.to_string() }),
    );
    if let Err(e) = bus.send(notice) {
        warn!(run_id = %run_id, error = %e, "Cancellation notice not sent");
    }

    Instant::now() + grace
}
