//! Immutable config registry
//!
//! Built once from a [`Config`] and shared by reference. Every check that
//! can be done without running anything happens in [`Registry::from_config`].

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::agents::{AgentDescriptor, AgentId, Role};
use crate::config::{CapabilityBinding, Config, WorkflowConfig};
use crate::error::Error;
use crate::tool::{ToolConcurrency, ToolManager};

/// Read-only description of agents, capability bindings, and message edges
#[derive(Debug, Clone)]
pub struct Registry {
    workflow: WorkflowConfig,
    agents: BTreeMap<AgentId, AgentDescriptor>,
    coordinator: AgentId,
    capabilities: BTreeMap<String, CapabilityBinding>,
    tool_limits: BTreeMap<String, Option<usize>>,
}

impl Registry {
    pub fn from_config(config: Config) -> crate::Result<Self> {
        let mut agents = BTreeMap::new();
        for agent in config.agents {
            if agents.contains_key(&agent.id) {
                return Err(Error::Config(format!("duplicate agent id '{}'", agent.id)));
            }
            agents.insert(agent.id.clone(), agent);
        }

        let coordinators: Vec<&AgentId> = agents
            .values()
            .filter(|a| a.role == Role::Coordinator)
            .map(|a| &a.id)
            .collect();
        let coordinator = match coordinators.as_slice() {
            [one] => (*one).clone(),
            [] => return Err(Error::Config("no coordinator agent declared".to_string())),
            many => {
                let ids: Vec<&str> = many.iter().map(|id| id.as_str()).collect();
                return Err(Error::Config(format!(
                    "exactly one coordinator allowed, found: {}",
                    ids.join(", ")
                )));
            }
        };

        for agent in agents.values() {
            for peer in &agent.peers {
                if !agents.contains_key(peer) {
                    return Err(Error::Config(format!(
                        "agent '{}' lists unknown peer '{}'",
                        agent.id, peer
                    )));
                }
            }

            for capability in &agent.capabilities {
                let binding = config.capabilities.get(capability).ok_or_else(|| {
                    Error::Config(format!(
                        "agent '{}' lists capability '{}' with no [capabilities.{}] binding",
                        agent.id, capability, capability
                    ))
                })?;
                if binding.role != agent.role {
                    return Err(Error::Config(format!(
                        "agent '{}' ({}) cannot hold capability '{}' bound to role {}",
                        agent.id, agent.role, capability, binding.role
                    )));
                }
            }
        }

        for binding in config.capabilities.values() {
            for prior in &binding.after {
                let target = config.capabilities.get(prior).ok_or_else(|| {
                    Error::Config(format!(
                        "capability '{}' runs after unknown capability '{}'",
                        binding.name, prior
                    ))
                })?;
                if target.role != binding.role {
                    return Err(Error::Config(format!(
                        "capability '{}' ({}) cannot run after '{}' ({}): different roles",
                        binding.name, binding.role, prior, target.role
                    )));
                }
            }
        }
        check_after_cycles(&config.capabilities)?;

        let tool_limits = config
            .tools
            .into_iter()
            .map(|(name, settings)| (name, settings.max_parallel))
            .collect();

        debug!(
            agents = agents.len(),
            capabilities = config.capabilities.len(),
            coordinator = %coordinator,
            "Registry built"
        );

        Ok(Self {
            workflow: config.workflow,
            agents,
            coordinator,
            capabilities: config.capabilities,
            tool_limits,
        })
    }

    pub fn workflow(&self) -> &WorkflowConfig {
        &self.workflow
    }

    pub fn coordinator_id(&self) -> &AgentId {
        &self.coordinator
    }

    pub fn agent(&self, id: &AgentId) -> Option<&AgentDescriptor> {
        self.agents.get(id)
    }

    /// All agents, ordered by id
    pub fn agents(&self) -> impl Iterator<Item = &AgentDescriptor> {
        self.agents.values()
    }

    pub fn binding(&self, capability: &str) -> Option<&CapabilityBinding> {
        self.capabilities.get(capability)
    }

    /// All capability bindings, ordered by name
    pub fn bindings(&self) -> impl Iterator<Item = &CapabilityBinding> {
        self.capabilities.values()
    }

    /// Whether `from` may send a message to `to`
    pub fn edge_allowed(&self, from: &AgentId, to: &AgentId) -> bool {
        self.agents.get(from).is_some_and(|a| a.can_message(to))
    }

    /// Declared peers of `id` (empty for unknown agents)
    pub fn peers_of(&self, id: &AgentId) -> Vec<AgentId> {
        self.agents
            .get(id)
            .map(|a| a.peers.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Concurrency policy for a tool implementation
    pub fn tool_concurrency(&self, tool: &str) -> ToolConcurrency {
        let limit = self
            .tool_limits
            .get(tool)
            .copied()
            .flatten()
            .unwrap_or(self.workflow.default_tool_parallelism);
        ToolConcurrency::from_max_parallel(limit)
    }

    /// Apply the configured concurrency policy to every registered tool
    pub fn configure_tools(&self, tools: &mut ToolManager) {
        let names: Vec<String> = tools.tool_names().into_iter().map(String::from).collect();
        for name in names {
            let policy = self.tool_concurrency(&name);
            debug!(tool = %name, ?policy, "Tool concurrency");
            tools.set_concurrency(&name, policy);
        }
    }
}

/// Reject cycles among `after` declarations
fn check_after_cycles(capabilities: &BTreeMap<String, CapabilityBinding>) -> crate::Result<()> {
    fn visit<'a>(
        name: &'a str,
        capabilities: &'a BTreeMap<String, CapabilityBinding>,
        visiting: &mut BTreeSet<&'a str>,
        done: &mut BTreeSet<&'a str>,
    ) -> crate::Result<()> {
        if done.contains(name) {
            return Ok(());
        }
        if !visiting.insert(name) {
            return Err(Error::Config(format!(
                "capability '{}' is part of an `after` cycle",
                name
            )));
        }
        if let Some(binding) = capabilities.get(name) {
            for prior in &binding.after {
                visit(prior, capabilities, visiting, done)?;
            }
        }
        visiting.remove(name);
        done.insert(name);
        Ok(())
    }

    let mut visiting = BTreeSet::new();
    let mut done = BTreeSet::new();
    for name in capabilities.keys() {
        visit(name, capabilities, &mut visiting, &mut done)?;
    }
    Ok(())
}
