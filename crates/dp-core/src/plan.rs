//! Tasks and delegation plans
//!
//! A [`DelegationPlan`] is a DAG of [`Subtask`]s. Each subtask is bound to
//! exactly one agent, and an edge `a -> b` means `a` must complete before
//! `b` starts.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::agents::{AgentId, Role};
use crate::error::Error;

/// Unique identifier for a submitted task
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl Default for TaskId {
    fn default() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one node in a plan (`"{index}-{capability}"`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubtaskId(pub String);

impl SubtaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubtaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A task submitted to the workflow manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// Natural-language description, used for classification
    pub description: String,
    /// Explicit capability names; overrides keyword classification when non-empty
    #[serde(default)]
    pub requires: Vec<String>,
    /// Parameters handed to every subtask
    #[serde(default)]
    pub params: JsonValue,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: TaskId::default(),
            description: description.into(),
            requires: vec![],
            params: JsonValue::Object(Default::default()),
        }
    }

    pub fn with_requires<I, S>(mut self, requires: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires = requires.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_params(mut self, params: JsonValue) -> Self {
        self.params = params;
        self
    }
}

/// One node of a delegation plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: SubtaskId,
    pub capability: String,
    pub role: Role,
    pub agent: AgentId,
}

/// Ordering edge: `from` must complete before `to`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanEdge {
    pub from: SubtaskId,
    pub to: SubtaskId,
}

/// Structural fingerprint of a plan, independent of generated ids
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanShape {
    /// `(capability, role)` per node, in plan order
    pub nodes: Vec<(String, Role)>,
    /// `(from capability, to capability)` per edge
    pub edges: Vec<(String, String)>,
}

/// DAG of subtasks produced by the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationPlan {
    pub task_id: TaskId,
    subtasks: Vec<Subtask>,
    edges: Vec<PlanEdge>,
}

impl DelegationPlan {
    /// Build a plan and check it is a well-formed DAG
    pub fn new(task_id: TaskId, subtasks: Vec<Subtask>, edges: Vec<PlanEdge>) -> crate::Result<Self> {
        let plan = Self {
            task_id,
            subtasks,
            edges,
        };
        plan.validate()?;
        Ok(plan)
    }

    pub fn subtasks(&self) -> &[Subtask] {
        &self.subtasks
    }

    pub fn edges(&self) -> &[PlanEdge] {
        &self.edges
    }

    pub fn get(&self, id: &SubtaskId) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| &s.id == id)
    }

    pub fn len(&self) -> usize {
        self.subtasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subtasks.is_empty()
    }

    /// Subtasks with no incoming edge
    pub fn roots(&self) -> Vec<&SubtaskId> {
        self.subtasks
            .iter()
            .filter(|s| !self.edges.iter().any(|e| e.to == s.id))
            .map(|s| &s.id)
            .collect()
    }

    /// Direct prerequisites of `id`, in plan order
    pub fn dependencies(&self, id: &SubtaskId) -> Vec<&SubtaskId> {
        self.subtasks
            .iter()
            .filter(|s| self.edges.iter().any(|e| e.from == s.id && &e.to == id))
            .map(|s| &s.id)
            .collect()
    }

    /// Direct dependents of `id`, in plan order
    pub fn dependents(&self, id: &SubtaskId) -> Vec<&SubtaskId> {
        self.subtasks
            .iter()
            .filter(|s| self.edges.iter().any(|e| &e.from == id && e.to == s.id))
            .map(|s| &s.id)
            .collect()
    }

    /// Every subtask reachable from `id` (excluding `id` itself)
    pub fn transitive_dependents(&self, id: &SubtaskId) -> BTreeSet<SubtaskId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&SubtaskId> = self.dependents(id).into_iter().collect();

        while let Some(next) = queue.pop_front() {
            if seen.insert(next.clone()) {
                queue.extend(self.dependents(next));
            }
        }

        seen
    }

    /// Kahn's algorithm; ties are broken by plan order so the result is stable
    pub fn topological_order(&self) -> crate::Result<Vec<SubtaskId>> {
        let mut indegree: HashMap<&SubtaskId, usize> =
            self.subtasks.iter().map(|s| (&s.id, 0)).collect();
        for edge in &self.edges {
            if let Some(d) = indegree.get_mut(&edge.to) {
                *d += 1;
            }
        }

        let mut order = Vec::with_capacity(self.subtasks.len());
        let mut done: BTreeSet<&SubtaskId> = BTreeSet::new();

        while order.len() < self.subtasks.len() {
            let next = self
                .subtasks
                .iter()
                .find(|s| !done.contains(&s.id) && indegree.get(&s.id) == Some(&0));

            let Some(next) = next else {
                let stuck = self
                    .subtasks
                    .iter()
                    .find(|s| !done.contains(&s.id))
                    .map(|s| s.capability.clone())
                    .unwrap_or_default();
                return Err(Error::UnsatisfiableTask {
                    capability: stuck,
                    reason: "is part of a dependency cycle".to_string(),
                });
            };

            done.insert(&next.id);
            for dependent in self.dependents(&next.id) {
                if let Some(d) = indegree.get_mut(dependent) {
                    *d -= 1;
                }
            }
            order.push(next.id.clone());
        }

        Ok(order)
    }

    /// Check ids are unique, edges point at known nodes, and the graph is acyclic
    pub fn validate(&self) -> crate::Result<()> {
        let mut ids = BTreeSet::new();
        for subtask in &self.subtasks {
            if !ids.insert(&subtask.id) {
                return Err(Error::UnsatisfiableTask {
                    capability: subtask.capability.clone(),
                    reason: format!("has duplicate subtask id {}", subtask.id),
                });
            }
        }

        for edge in &self.edges {
            for end in [&edge.from, &edge.to] {
                if !ids.contains(end) {
                    return Err(Error::UnsatisfiableTask {
                        capability: end.to_string(),
                        reason: "is referenced by an edge but not planned".to_string(),
                    });
                }
            }
            if edge.from == edge.to {
                return Err(Error::UnsatisfiableTask {
                    capability: edge.from.to_string(),
                    reason: "depends on itself".to_string(),
                });
            }
        }

        // An acyclic finite graph has every node reachable from some root
        self.topological_order().map(|_| ())
    }

    pub fn shape(&self) -> PlanShape {
        let capability_of = |id: &SubtaskId| {
            self.get(id)
                .map(|s| s.capability.clone())
                .unwrap_or_else(|| id.to_string())
        };

        PlanShape {
            nodes: self
                .subtasks
                .iter()
                .map(|s| (s.capability.clone(), s.role))
                .collect(),
            edges: self
                .edges
                .iter()
                .map(|e| (capability_of(&e.from), capability_of(&e.to)))
                .collect(),
        }
    }
}
