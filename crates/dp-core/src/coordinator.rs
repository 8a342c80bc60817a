//! Coordinator delegation policy
//!
//! Turns a [`Task`] into a [`DelegationPlan`]:
//! 1. classify the task into capabilities (explicit `requires`, else keywords)
//! 2. bind each capability to exactly one agent
//! 3. order nodes by stage (data, analysis, visualization) plus declared
//!    same-stage `after` dependencies
//!
//! A plan is all or nothing. If any capability cannot be covered, no plan
//! is returned.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::agents::{AgentId, Role};
use crate::config::CapabilityBinding;
use crate::error::Error;
use crate::plan::{DelegationPlan, PlanEdge, Subtask, SubtaskId, Task};
use crate::registry::Registry;

pub struct Coordinator {
    registry: Arc<Registry>,
}

impl Coordinator {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn id(&self) -> &AgentId {
        self.registry.coordinator_id()
    }

    /// Map a task to the capabilities it needs, in plan order
    pub fn classify(&self, task: &Task) -> crate::Result<Vec<&CapabilityBinding>> {
        let mut selected: Vec<&CapabilityBinding> = if task.requires.is_empty() {
            let matched: Vec<_> = self
                .registry
                .bindings()
                .filter(|b| b.matches(&task.description))
                .collect();
            if matched.is_empty() {
                return Err(Error::UnclassifiedTask(task.description.clone()));
            }
            matched
        } else {
            let mut seen = BTreeSet::new();
            let mut explicit = Vec::new();
            for name in &task.requires {
                if !seen.insert(name.as_str()) {
                    continue;
                }
                let binding = self.registry.binding(name).ok_or_else(|| Error::UnsatisfiableTask {
                    capability: name.clone(),
                    reason: "has no binding in the registry".to_string(),
                })?;
                explicit.push(binding);
            }
            explicit
        };

        for binding in &selected {
            if binding.role.stage().is_none() {
                return Err(Error::UnsatisfiableTask {
                    capability: binding.name.clone(),
                    reason: format!("is bound to the {} role, which runs no subtasks", binding.role),
                });
            }
        }

        let names: BTreeSet<String> = selected.iter().map(|b| b.name.clone()).collect();
        selected.sort_by_key(|b| {
            (
                b.role.stage(),
                after_depth(&self.registry, &names, &b.name),
                b.name.clone(),
            )
        });

        Ok(selected)
    }

    /// Smallest agent id with the binding's role that holds the capability
    /// and can exchange messages with the coordinator
    pub fn select_agent(&self, binding: &CapabilityBinding) -> crate::Result<AgentId> {
        let coordinator = self.id();
        self.registry
            .agents()
            .find(|a| {
                a.role == binding.role
                    && a.holds(&binding.name)
                    && self.registry.edge_allowed(coordinator, &a.id)
                    && self.registry.edge_allowed(&a.id, coordinator)
            })
            .map(|a| a.id.clone())
            .ok_or_else(|| Error::UnsatisfiableTask {
                capability: binding.name.clone(),
                reason: format!("has no registered {} agent reachable from the coordinator", binding.role),
            })
    }

    pub fn plan(&self, task: &Task) -> crate::Result<DelegationPlan> {
        let selected = self.classify(task)?;

        let mut subtasks = Vec::with_capacity(selected.len());
        for (index, binding) in selected.iter().enumerate() {
            subtasks.push(Subtask {
                id: SubtaskId::new(format!("{}-{}", index, binding.name)),
                capability: binding.name.clone(),
                role: binding.role,
                agent: self.select_agent(binding)?,
            });
        }

        let edges = ordering_edges(&selected, &subtasks);
        let plan = DelegationPlan::new(task.id.clone(), subtasks, edges)?;

        info!(
            task = %task.id,
            nodes = plan.len(),
            edges = plan.edges().len(),
            "Delegation plan built"
        );
        for subtask in plan.subtasks() {
            debug!(subtask = %subtask.id, agent = %subtask.agent, role = %subtask.role, "Planned subtask");
        }

        Ok(plan)
    }
}

/// Length of the longest `after` chain below `name`, counting only
/// capabilities that are part of this plan
fn after_depth(registry: &Registry, planned: &BTreeSet<String>, name: &str) -> usize {
    registry
        .binding(name)
        .map(|b| {
            b.after
                .iter()
                .filter(|p| planned.contains(*p))
                .map(|p| 1 + after_depth(registry, planned, p))
                .max()
                .unwrap_or(0)
        })
        .unwrap_or(0)
}

/// Stage edges from the sinks of the nearest lower non-empty stage, plus
/// declared same-stage `after` edges
fn ordering_edges(selected: &[&CapabilityBinding], subtasks: &[Subtask]) -> Vec<PlanEdge> {
    let id_of: BTreeMap<&str, &SubtaskId> = subtasks
        .iter()
        .map(|s| (s.capability.as_str(), &s.id))
        .collect();

    let mut after_edges = Vec::new();
    for binding in selected {
        for prior in &binding.after {
            if let (Some(from), Some(to)) = (id_of.get(prior.as_str()), id_of.get(binding.name.as_str())) {
                after_edges.push(((*from).clone(), (*to).clone()));
            }
        }
    }

    let mut by_stage: BTreeMap<u8, Vec<&Subtask>> = BTreeMap::new();
    for subtask in subtasks {
        if let Some(stage) = subtask.role.stage() {
            by_stage.entry(stage).or_default().push(subtask);
        }
    }

    let mut edges = Vec::new();
    let mut lower_sinks: Vec<&SubtaskId> = Vec::new();
    for nodes in by_stage.values() {
        for node in nodes {
            for (from, to) in &after_edges {
                if to == &node.id {
                    edges.push(PlanEdge {
                        from: from.clone(),
                        to: to.clone(),
                    });
                }
            }
            for sink in &lower_sinks {
                edges.push(PlanEdge {
                    from: (*sink).clone(),
                    to: node.id.clone(),
                });
            }
        }

        lower_sinks = nodes
            .iter()
            .filter(|n| !after_edges.iter().any(|(from, _)| from == &n.id))
            .map(|n| &n.id)
            .collect();
    }

    edges
}

/// Roles present in a plan, deduplicated
pub fn roles_of(plan: &DelegationPlan) -> BTreeSet<Role> {
    plan.subtasks().iter().map(|s| s.role).collect()
}
