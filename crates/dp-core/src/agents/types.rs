//! Agent identity, roles, and descriptors

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// Well-known capability names used by the built-in roles
pub mod capability {
    pub const COLLECT: &str = "collect";
    pub const CLEAN: &str = "clean";
    pub const ANALYZE: &str = "analyze";
    pub const VISUALIZE: &str = "visualize";
    pub const SAVE: &str = "save";
}

/// Unique identifier for an agent
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Agent role. New roles are added as variants here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Coordinator,
    Data,
    Analysis,
    Visualization,
}

impl Role {
    /// Pipeline stage used for ordering edges. The coordinator has none.
    pub fn stage(&self) -> Option<u8> {
        match self {
            Self::Coordinator => None,
            Self::Data => Some(0),
            Self::Analysis => Some(1),
            Self::Visualization => Some(2),
        }
    }

    /// Capabilities an agent of this role cannot be built without
    pub fn required_capabilities(&self) -> &'static [&'static str] {
        match self {
            Self::Coordinator => &[],
            Self::Data => &[capability::CLEAN],
            Self::Analysis => &[capability::ANALYZE],
            Self::Visualization => &[capability::VISUALIZE],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coordinator => "coordinator",
            Self::Data => "data",
            Self::Analysis => "analysis",
            Self::Visualization => "visualization",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "coordinator" => Ok(Self::Coordinator),
            "data" => Ok(Self::Data),
            "analysis" => Ok(Self::Analysis),
            "visualization" | "viz" => Ok(Self::Visualization),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Static description of one agent, as declared in the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: AgentId,
    pub role: Role,
    /// Bound tool-capability names
    pub capabilities: BTreeSet<String>,
    /// Agents this one may send messages to (directed)
    pub peers: BTreeSet<AgentId>,
}

impl AgentDescriptor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: AgentId::new(id),
            role,
            capabilities: BTreeSet::new(),
            peers: BTreeSet::new(),
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peers.insert(AgentId::new(peer));
        self
    }

    pub fn holds(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn can_message(&self, peer: &AgentId) -> bool {
        self.peers.contains(peer)
    }
}
