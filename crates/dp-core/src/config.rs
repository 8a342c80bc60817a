//! Configuration management
//!
//! Configuration is read in the following order of precedence:
//! 1. Environment variables (`DATAPIP_*`)
//! 2. `datapip.toml`
//! 3. Built-in defaults
//!
//! `${VAR_NAME}` inside the TOML file is replaced by the environment value.
//! The parsed [`Config`] is turned into an immutable
//! [`Registry`](crate::registry::Registry) before anything runs.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::agents::{AgentDescriptor, AgentId, Role, capability};
use crate::error::Error;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "datapip.toml";

/// Workflow manager settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Maximum subtasks dispatched and not yet answered
    pub max_concurrency: usize,
    /// Seconds in-flight subtasks get to answer after cancellation
    pub cancel_grace_secs: u64,
    /// Parallel calls allowed per tool when `[tools.*]` says nothing (0 = unlimited)
    pub default_tool_parallelism: usize,
    /// Directory for JSONL run transcripts
    pub transcript_dir: Option<PathBuf>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            cancel_grace_secs: default_cancel_grace_secs(),
            default_tool_parallelism: 1,
            transcript_dir: None,
        }
    }
}

fn default_max_concurrency() -> usize {
    4
}

fn default_cancel_grace_secs() -> u64 {
    5
}

/// Binding of a capability name to a role and an external tool implementation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityBinding {
    pub name: String,
    pub role: Role,
    /// Name of the tool implementation registered with the tool manager
    pub tool: String,
    /// Same-stage capabilities that must complete first
    pub after: Vec<String>,
    /// Description keywords that select this capability
    pub keywords: Vec<String>,
}

impl CapabilityBinding {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        let name = name.into();
        Self {
            tool: name.clone(),
            name,
            role,
            after: vec![],
            keywords: vec![],
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = tool.into();
        self
    }

    pub fn with_after(mut self, after: Vec<String>) -> Self {
        self.after = after;
        self
    }

    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    /// Check whether a task description asks for this capability
    ///
    /// A keyword matches at the start of a word, so stems like `analy` hit
    /// "analysis" while `file` does not hit "profile". Multi-word keywords
    /// must appear as consecutive words.
    pub fn matches(&self, description: &str) -> bool {
        let tokens = words(description);
        self.keywords
            .iter()
            .chain(std::iter::once(&self.name))
            .any(|keyword| phrase_matches(&tokens, &words(keyword)))
    }
}

/// Lowercased alphanumeric words of `text`
fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Every keyword word but the last must match exactly; the last is a prefix
fn phrase_matches(words: &[String], phrase: &[String]) -> bool {
    let Some((last, head)) = phrase.split_last() else {
        return false;
    };
    words.windows(phrase.len()).any(|window| {
        window[..head.len()] == *head && window[head.len()].starts_with(last.as_str())
    })
}

/// Per-tool settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSettings {
    /// 0 = unlimited, 1 = serialized; unset follows `default_tool_parallelism`
    #[serde(default)]
    pub max_parallel: Option<usize>,
}

/// Main configuration for datapip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub workflow: WorkflowConfig,
    pub agents: Vec<AgentDescriptor>,
    pub capabilities: BTreeMap<String, CapabilityBinding>,
    #[serde(default)]
    pub tools: BTreeMap<String, ToolSettings>,
}

impl Config {
    /// Replace `${VAR_NAME}` with environment values (unset variables become empty)
    fn expand_env_vars(value: &str) -> String {
        let mut result = String::new();
        let mut chars = value.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next();

                let mut var_name = String::new();
                while let Some(c) = chars.next() {
                    if c == '}' {
                        break;
                    }
                    var_name.push(c);
                }

                if let Ok(env_value) = std::env::var(&var_name) {
                    result.push_str(&env_value);
                }
            } else {
                result.push(c);
            }
        }

        result
    }

    /// Parse configuration from TOML text (with env expansion and overrides)
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let expanded = Self::expand_env_vars(content);

        let toml_config: TomlConfig = toml::from_str(&expanded)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))?;

        let mut cfg = Self::from_toml_config(toml_config)?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        tracing::info!("Loaded config from {}", path.display());
        Self::from_toml_str(&content)
    }

    /// Load `./datapip.toml`, or fall back to the default pipeline
    pub fn load() -> crate::Result<Self> {
        if Path::new(DEFAULT_CONFIG_FILE).exists() {
            return Self::from_toml_file(DEFAULT_CONFIG_FILE);
        }

        tracing::debug!("No {} found, using default pipeline", DEFAULT_CONFIG_FILE);
        let mut cfg = Self::default_pipeline();
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// The standard four-agent pipeline: coordinator, data, analyst, viz
    pub fn default_pipeline() -> Self {
        let coordinator = AgentDescriptor::new("coordinator", Role::Coordinator)
            .with_peer("data")
            .with_peer("analyst")
            .with_peer("viz");
        let data = AgentDescriptor::new("data", Role::Data)
            .with_capability(capability::COLLECT)
            .with_capability(capability::CLEAN)
            .with_capability(capability::SAVE)
            .with_peer("coordinator");
        let analyst = AgentDescriptor::new("analyst", Role::Analysis)
            .with_capability(capability::ANALYZE)
            .with_peer("coordinator");
        let viz = AgentDescriptor::new("viz", Role::Visualization)
            .with_capability(capability::VISUALIZE)
            .with_peer("coordinator");

        let bindings = [
            CapabilityBinding::new(capability::COLLECT, Role::Data)
                .with_keywords(vec!["load".into(), "collect".into(), "csv".into(), "file".into()]),
            CapabilityBinding::new(capability::CLEAN, Role::Data)
                .with_after(vec![capability::COLLECT.into()])
                .with_keywords(vec!["clean".into(), "missing".into(), "outlier".into(), "preprocess".into()]),
            CapabilityBinding::new(capability::SAVE, Role::Data)
                .with_after(vec![capability::CLEAN.into()])
                .with_keywords(vec!["save".into(), "export".into(), "write".into()]),
            CapabilityBinding::new(capability::ANALYZE, Role::Analysis)
                .with_keywords(vec!["analy".into(), "statistic".into(), "correlat".into(), "insight".into()]),
            CapabilityBinding::new(capability::VISUALIZE, Role::Visualization)
                .with_keywords(vec!["visual".into(), "chart".into(), "plot".into(), "graph".into()]),
        ];

        Self {
            workflow: WorkflowConfig::default(),
            agents: vec![coordinator, data, analyst, viz],
            capabilities: bindings.into_iter().map(|b| (b.name.clone(), b)).collect(),
            tools: BTreeMap::new(),
        }
    }

    /// Build a Config from the TOML structure
    fn from_toml_config(toml: TomlConfig) -> crate::Result<Self> {
        let workflow = toml.workflow.unwrap_or_default();
        let workflow_config = WorkflowConfig {
            max_concurrency: workflow.max_concurrency.unwrap_or_else(default_max_concurrency),
            cancel_grace_secs: workflow.cancel_grace_secs.unwrap_or_else(default_cancel_grace_secs),
            default_tool_parallelism: workflow.default_tool_parallelism.unwrap_or(1),
            transcript_dir: workflow.transcript_dir.map(PathBuf::from),
        };

        let mut agents = Vec::new();
        for agent in toml.agents.unwrap_or_default() {
            let role = agent
                .role
                .parse::<Role>()
                .map_err(|e| Error::Config(format!("agent '{}': {}", agent.id, e)))?;
            agents.push(AgentDescriptor {
                id: AgentId::new(agent.id),
                role,
                capabilities: agent.capabilities.unwrap_or_default().into_iter().collect(),
                peers: agent
                    .peers
                    .unwrap_or_default()
                    .into_iter()
                    .map(AgentId::new)
                    .collect::<BTreeSet<_>>(),
            });
        }

        let mut capabilities = BTreeMap::new();
        for (name, cap) in toml.capabilities.unwrap_or_default() {
            let role = cap
                .role
                .parse::<Role>()
                .map_err(|e| Error::Config(format!("capability '{}': {}", name, e)))?;
            let binding = CapabilityBinding {
                tool: cap.tool.unwrap_or_else(|| name.clone()),
                name: name.clone(),
                role,
                after: cap.after.unwrap_or_default(),
                keywords: cap.keywords.unwrap_or_default(),
            };
            capabilities.insert(name, binding);
        }

        let tools = toml
            .tools
            .unwrap_or_default()
            .into_iter()
            .map(|(name, t)| (name, ToolSettings { max_parallel: t.max_parallel }))
            .collect();

        Ok(Config {
            workflow: workflow_config,
            agents,
            capabilities,
            tools,
        })
    }

    /// Override settings from environment variables
    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("DATAPIP_MAX_CONCURRENCY") {
            if let Ok(n) = value.parse() {
                self.workflow.max_concurrency = n;
            }
        }
        if let Ok(value) = std::env::var("DATAPIP_CANCEL_GRACE_SECS") {
            if let Ok(n) = value.parse() {
                self.workflow.cancel_grace_secs = n;
            }
        }
        if let Ok(value) = std::env::var("DATAPIP_TOOL_PARALLELISM") {
            if let Ok(n) = value.parse() {
                self.workflow.default_tool_parallelism = n;
            }
        }
        // Only use DATAPIP_TRANSCRIPT_DIR if explicitly set and non-empty
        if let Ok(dir) = std::env::var("DATAPIP_TRANSCRIPT_DIR") {
            if !dir.is_empty() {
                self.workflow.transcript_dir = Some(PathBuf::from(dir));
            }
        }
    }
}

// ============================================================================
// TOML structures (file parsing only)
// ============================================================================

#[derive(Debug, Deserialize)]
struct TomlConfig {
    workflow: Option<TomlWorkflowConfig>,
    agents: Option<Vec<TomlAgentConfig>>,
    capabilities: Option<BTreeMap<String, TomlCapabilityConfig>>,
    tools: Option<BTreeMap<String, TomlToolConfig>>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlWorkflowConfig {
    #[serde(default)]
    max_concurrency: Option<usize>,
    #[serde(default)]
    cancel_grace_secs: Option<u64>,
    #[serde(default)]
    default_tool_parallelism: Option<usize>,
    #[serde(default)]
    transcript_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TomlAgentConfig {
    id: String,
    role: String,
    capabilities: Option<Vec<String>>,
    peers: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TomlCapabilityConfig {
    role: String,
    tool: Option<String>,
    after: Option<Vec<String>>,
    keywords: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TomlToolConfig {
    max_parallel: Option<usize>,
}
