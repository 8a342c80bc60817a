//! Bookkeeping for one executing plan
//!
//! Owned by the workflow manager for the duration of a run. Nothing here
//! awaits; the manager feeds it events and asks it what to dispatch next.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::warn;

use super::result::{MergedOutput, RunStatus, SubtaskReport, SubtaskStatus};
use crate::agents::AgentId;
use crate::error::ErrorKind;
use crate::message::{ErrorPayload, MessageId};
use crate::plan::{DelegationPlan, SubtaskId};

pub(crate) struct RunState<'p> {
    plan: &'p DelegationPlan,
    /// Reports in plan order
    reports: Vec<SubtaskReport>,
    index: HashMap<SubtaskId, usize>,
    /// Dispatched task message id -> subtask
    in_flight: HashMap<MessageId, SubtaskId>,
}

impl<'p> RunState<'p> {
    pub fn new(plan: &'p DelegationPlan) -> Self {
        let reports: Vec<SubtaskReport> = plan
            .subtasks()
            .iter()
            .map(|s| SubtaskReport {
                id: s.id.clone(),
                capability: s.capability.clone(),
                agent: s.agent.clone(),
                status: SubtaskStatus::Pending,
                output: None,
                error: None,
                skip_reason: None,
                started_at: None,
                finished_at: None,
            })
            .collect();
        let index = reports
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();

        Self {
            plan,
            reports,
            index,
            in_flight: HashMap::new(),
        }
    }

    fn report(&self, id: &SubtaskId) -> Option<&SubtaskReport> {
        self.index.get(id).map(|&i| &self.reports[i])
    }

    fn report_mut(&mut self, id: &SubtaskId) -> Option<&mut SubtaskReport> {
        self.index.get(id).map(|&i| &mut self.reports[i])
    }

    pub fn status(&self, id: &SubtaskId) -> Option<SubtaskStatus> {
        self.report(id).map(|r| r.status)
    }

    /// Pending subtasks whose prerequisites all succeeded, in plan order
    pub fn frontier(&self) -> Vec<SubtaskId> {
        self.reports
            .iter()
            .filter(|r| r.status == SubtaskStatus::Pending)
            .filter(|r| {
                self.plan
                    .dependencies(&r.id)
                    .into_iter()
                    .all(|dep| self.status(dep) == Some(SubtaskStatus::Succeeded))
            })
            .map(|r| r.id.clone())
            .collect()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Outputs of the direct prerequisites of `id`, in plan order
    pub fn inputs_for(&self, id: &SubtaskId) -> Vec<JsonValue> {
        self.plan
            .dependencies(id)
            .into_iter()
            .filter_map(|dep| self.report(dep).and_then(|r| r.output.clone()))
            .collect()
    }

    pub fn mark_dispatched(&mut self, id: &SubtaskId, message: MessageId) {
        if let Some(report) = self.report_mut(id) {
            report.status = SubtaskStatus::Running;
            report.started_at = Some(Utc::now());
        }
        self.in_flight.insert(message, id.clone());
    }

    /// Subtask a reply belongs to, if it is still in flight
    pub fn correlate(&self, reply_to: &MessageId) -> Option<&SubtaskId> {
        self.in_flight.get(reply_to)
    }

    pub fn succeed(&mut self, reply_to: &MessageId, output: JsonValue) -> Option<SubtaskId> {
        let id = self.in_flight.remove(reply_to)?;
        if let Some(report) = self.report_mut(&id) {
            report.status = SubtaskStatus::Succeeded;
            report.output = Some(output);
            report.finished_at = Some(Utc::now());
        }
        Some(id)
    }

    /// Handle an `error` reply. A tool that gave up because of cancellation
    /// is recorded as skipped rather than failed.
    pub fn error(&mut self, reply_to: &MessageId, error: ErrorPayload) -> Option<SubtaskId> {
        let id = self.in_flight.remove(reply_to)?;
        if error.kind == ErrorKind::Cancelled {
            self.skip(&id, "cancelled");
        } else {
            self.fail(&id, error);
        }
        Some(id)
    }

    /// Mark `id` failed and skip everything downstream of it
    pub fn fail(&mut self, id: &SubtaskId, error: ErrorPayload) -> Vec<SubtaskId> {
        self.in_flight.retain(|_, s| s != id);
        if let Some(report) = self.report_mut(id) {
            report.status = SubtaskStatus::Failed;
            report.error = Some(error);
            report.finished_at = Some(Utc::now());
        }
        self.skip_dependents(id, &format!("dependency_failed: {}", id))
    }

    fn skip(&mut self, id: &SubtaskId, reason: &str) -> Vec<SubtaskId> {
        self.in_flight.retain(|_, s| s != id);
        if let Some(report) = self.report_mut(id) {
            report.status = SubtaskStatus::Skipped;
            report.skip_reason = Some(reason.to_string());
            report.finished_at = Some(Utc::now());
        }
        self.skip_dependents(id, &format!("dependency_skipped: {}", id))
    }

    fn skip_dependents(&mut self, id: &SubtaskId, reason: &str) -> Vec<SubtaskId> {
        let mut skipped = Vec::new();
        for dependent in self.plan.transitive_dependents(id) {
            if let Some(report) = self.report_mut(&dependent) {
                if report.status == SubtaskStatus::Pending {
                    report.status = SubtaskStatus::Skipped;
                    report.skip_reason = Some(reason.to_string());
                    skipped.push(dependent);
                }
            }
        }
        if !skipped.is_empty() {
            warn!(subtask = %id, skipped = ?skipped, "Skipping dependents");
        }
        skipped
    }

    /// Fail every in-flight subtask assigned to `agent`
    pub fn fail_agent(&mut self, agent: &AgentId, error: &ErrorPayload) -> Vec<SubtaskId> {
        let affected: Vec<SubtaskId> = self
            .in_flight
            .values()
            .filter(|id| self.report(id).is_some_and(|r| &r.agent == agent))
            .cloned()
            .collect();
        for id in &affected {
            self.fail(id, error.clone());
        }
        affected
    }

    /// Skip every subtask not yet dispatched
    pub fn cancel_pending(&mut self) -> usize {
        let mut count = 0;
        for report in &mut self.reports {
            if report.status == SubtaskStatus::Pending {
                report.status = SubtaskStatus::Skipped;
                report.skip_reason = Some("cancelled".to_string());
                count += 1;
            }
        }
        count
    }

    /// Give up on every subtask still waiting for a reply
    pub fn abandon_in_flight(&mut self) -> usize {
        let abandoned: Vec<SubtaskId> = self.in_flight.drain().map(|(_, id)| id).collect();
        for id in &abandoned {
            if let Some(report) = self.report_mut(id) {
                report.status = SubtaskStatus::Skipped;
                report.skip_reason = Some("abandoned".to_string());
                report.finished_at = Some(Utc::now());
            }
        }
        abandoned.len()
    }

    /// Close out the run: reports, merged outputs, and overall status
    pub fn finish(mut self) -> (Vec<SubtaskReport>, Vec<MergedOutput>, RunStatus) {
        for report in &mut self.reports {
            if !report.status.is_terminal() {
                report.status = SubtaskStatus::Skipped;
                report.skip_reason = Some("unreachable".to_string());
            }
        }

        let outputs = self
            .reports
            .iter()
            .filter_map(|r| {
                r.output.as_ref().map(|output| MergedOutput {
                    subtask: r.id.clone(),
                    capability: r.capability.clone(),
                    output: output.clone(),
                })
            })
            .collect();

        let status = if self
            .reports
            .iter()
            .all(|r| r.status == SubtaskStatus::Succeeded)
        {
            RunStatus::Success
        } else {
            RunStatus::PartialFailure
        };

        (self.reports, outputs, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Role;
    use crate::plan::{PlanEdge, Subtask, TaskId};
    use serde_json::json;

    fn node(id: &str, role: Role) -> Subtask {
        Subtask {
            id: SubtaskId::new(id),
            capability: id.split('-').nth(1).unwrap_or(id).to_string(),
            role,
            agent: AgentId::new(role.as_str()),
        }
    }

    fn edge(from: &str, to: &str) -> PlanEdge {
        PlanEdge {
            from: SubtaskId::new(from),
            to: SubtaskId::new(to),
        }
    }

    /// 0-clean -> 1-analyze -> 3-visualize, plus an independent 2-collect
    fn plan() -> DelegationPlan {
        DelegationPlan::new(
            TaskId::default(),
            vec![
                node("0-clean", Role::Data),
                node("1-analyze", Role::Analysis),
                node("2-collect", Role::Data),
                node("3-visualize", Role::Visualization),
            ],
            vec![edge("0-clean", "1-analyze"), edge("1-analyze", "3-visualize")],
        )
        .unwrap()
    }

    fn ids(list: &[SubtaskId]) -> Vec<&str> {
        list.iter().map(|s| s.as_str()).collect()
    }

    #[test]
    fn test_frontier_advances_on_success() {
        let plan = plan();
        let mut state = RunState::new(&plan);
        assert_eq!(ids(&state.frontier()), vec!["0-clean", "2-collect"]);

        let msg = MessageId::new("m1");
        state.mark_dispatched(&SubtaskId::new("0-clean"), msg.clone());
        assert_eq!(ids(&state.frontier()), vec!["2-collect"]);
        assert_eq!(state.correlate(&msg), Some(&SubtaskId::new("0-clean")));

        state.succeed(&msg, json!({"records": []}));
        assert_eq!(ids(&state.frontier()), vec!["1-analyze", "2-collect"]);
        assert_eq!(state.inputs_for(&SubtaskId::new("1-analyze")), vec![json!({"records": []})]);
    }

    #[test]
    fn test_failure_skips_only_dependents() {
        let plan = plan();
        let mut state = RunState::new(&plan);
        let msg = MessageId::new("m1");
        state.mark_dispatched(&SubtaskId::new("0-clean"), msg.clone());

        state.error(&msg, ErrorPayload::new(ErrorKind::Tool, "boom"));
        assert_eq!(state.status(&SubtaskId::new("0-clean")), Some(SubtaskStatus::Failed));
        assert_eq!(state.status(&SubtaskId::new("1-analyze")), Some(SubtaskStatus::Skipped));
        assert_eq!(state.status(&SubtaskId::new("3-visualize")), Some(SubtaskStatus::Skipped));
        assert_eq!(ids(&state.frontier()), vec!["2-collect"]);
    }

    #[test]
    fn test_cancel_and_abandon() {
        let plan = plan();
        let mut state = RunState::new(&plan);
        state.mark_dispatched(&SubtaskId::new("0-clean"), MessageId::new("m1"));

        assert_eq!(state.cancel_pending(), 3);
        assert!(state.frontier().is_empty());
        assert_eq!(state.abandon_in_flight(), 1);

        let (reports, outputs, status) = state.finish();
        assert_eq!(status, RunStatus::PartialFailure);
        assert!(outputs.is_empty());
        assert_eq!(reports[0].skip_reason.as_deref(), Some("abandoned"));
        assert_eq!(reports[1].skip_reason.as_deref(), Some("cancelled"));
    }

    #[test]
    fn test_cancelled_tool_reply_is_skip() {
        let plan = plan();
        let mut state = RunState::new(&plan);
        let msg = MessageId::new("m1");
        state.mark_dispatched(&SubtaskId::new("0-clean"), msg.clone());
        state.error(&msg, ErrorPayload::new(ErrorKind::Cancelled, "stopped"));

        assert_eq!(state.status(&SubtaskId::new("0-clean")), Some(SubtaskStatus::Skipped));
        assert_eq!(state.status(&SubtaskId::new("1-analyze")), Some(SubtaskStatus::Skipped));
    }

    #[test]
    fn test_fail_agent_only_hits_its_subtasks() {
        let plan = plan();
        let mut state = RunState::new(&plan);
        state.mark_dispatched(&SubtaskId::new("0-clean"), MessageId::new("m1"));

        let error = ErrorPayload::new(ErrorKind::Internal, "actor died");
        assert!(state.fail_agent(&AgentId::new("analysis"), &error).is_empty());
        assert_eq!(ids(&state.fail_agent(&AgentId::new("data"), &error)), vec!["0-clean"]);
        assert_eq!(state.in_flight_count(), 0);
    }

    #[test]
    fn test_all_succeeded_is_success() {
        let plan = DelegationPlan::new(TaskId::default(), vec![node("0-analyze", Role::Analysis)], vec![])
            .unwrap();
        let mut state = RunState::new(&plan);
        let msg = MessageId::new("m1");
        state.mark_dispatched(&SubtaskId::new("0-analyze"), msg.clone());
        state.succeed(&msg, json!(42));

        let (_, outputs, status) = state.finish();
        assert_eq!(status, RunStatus::Success);
        assert_eq!(outputs[0].output, json!(42));
    }
}
