use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::graph::Command;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Where a skill came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillSource {
    /// Authored in the tool.
    #[default]
    Local,
    /// Imported from an external catalog or another plugin in the library.
    Registry,
}

/// Execution context an agent runs in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentContext {
    /// Isolated sub-context.
    #[default]
    Fork,
    /// Shares the caller's context.
    Main,
}

impl fmt::Display for AgentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fork => "fork",
            Self::Main => "main",
        };
        f.write_str(s)
    }
}

impl FromStr for AgentContext {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fork" => Ok(Self::Fork),
            "main" => Ok(Self::Main),
            other => Err(UnknownVariant {
                kind: "agent context",
                value: other.to_owned(),
            }),
        }
    }
}

/// What a hook does when it fires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookActionType {
    #[default]
    Bash,
    McpCall,
    Agent,
}

impl fmt::Display for HookActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bash => "bash",
            Self::McpCall => "mcp_call",
            Self::Agent => "agent",
        };
        f.write_str(s)
    }
}

impl FromStr for HookActionType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bash" => Ok(Self::Bash),
            "mcp_call" => Ok(Self::McpCall),
            "agent" => Ok(Self::Agent),
            other => Err(UnknownVariant {
                kind: "hook action type",
                value: other.to_owned(),
            }),
        }
    }
}

/// Error returned when parsing a string into one of the entity enums.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// Auxiliary file shipped alongside a skill's `SKILL.md`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SkillFile {
    /// Path relative to the skill directory.
    pub path: String,
    pub content: String,
    /// Language tag inferred from the file extension.
    pub language: String,
}

/// A reusable block of markdown knowledge an agent can load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Skill {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Markdown body of `SKILL.md`.
    pub content: String,
    pub files: Vec<SkillFile>,
    pub source: SkillSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
}

/// A sub-agent definition.
///
/// `skill_ids` and `mcp_ids` are references into the owning plugin's
/// collections; their order carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Free-form model identifier (not checked against any list).
    pub model: String,
    pub context: AgentContext,
    pub allowed_tools: Vec<String>,
    pub mcp_ids: Vec<String>,
    pub skill_ids: Vec<String>,
    pub instructions: String,
}

/// A tool exposed by an MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct McpTool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub enabled: bool,
}

impl Default for McpTool {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            input_schema: serde_json::Value::Object(Default::default()),
            enabled: true,
        }
    }
}

/// A tool-server integration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Mcp {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Source locator (repository or registry URL).
    pub source: String,
    /// Transport kinds such as `stdio`, `sse`, `http`.
    pub transport: Vec<String>,
    pub install_command: String,
    pub auth_type: Option<String>,
    pub tools: Vec<McpTool>,
    /// Environment variable name to value; values may be `${VAR}` indirections.
    pub configured_env_vars: BTreeMap<String, String>,
    pub is_configured: bool,
    pub categories: Vec<String>,
    pub is_official: bool,
}

/// The single action a hook performs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookAction {
    #[serde(rename = "type")]
    pub action_type: HookActionType,
    pub config: BTreeMap<String, String>,
}

impl HookAction {
    /// Decode an action from loosely-typed JSON.
    ///
    /// Unknown action types fall back to `bash`; non-string config values are
    /// kept in their JSON text form.
    pub fn from_value(value: &serde_json::Value) -> Self {
        let action_type = value
            .get("type")
            .and_then(|t| t.as_str())
            .and_then(|t| t.parse().ok())
            .unwrap_or_default();

        let config = value
            .get("config")
            .and_then(|c| c.as_object())
            .map(|obj| {
                obj.iter()
                    .map(|(k, v)| {
                        let text = match v {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (k.clone(), text)
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            action_type,
            config,
        }
    }
}

/// An event-triggered automation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Hook {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    /// Event name (free string, e.g. `PreToolUse`).
    pub event: String,
    /// Matcher pattern (free string, e.g. a glob).
    pub matcher: String,
    pub action: HookAction,
}

impl Default for Hook {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            enabled: true,
            event: String::new(),
            matcher: String::new(),
            action: HookAction::default(),
        }
    }
}

/// Records which skills and agents were pulled in from another plugin of the
/// user's library.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginDependency {
    pub id: String,
    pub source_plugin_id: String,
    pub source_plugin_name: String,
    pub imported_skill_ids: Vec<String>,
    pub imported_agent_ids: Vec<String>,
}

/// One version's worth of recorded changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangelogEntry {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub changes: Vec<String>,
}

// ---------------------------------------------------------------------------
// Plugin snapshot
// ---------------------------------------------------------------------------

/// Full entity snapshot of one plugin.
///
/// This is the value every analysis function takes; none of them mutate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginState {
    pub plugin_name: String,
    pub version: String,
    pub skills: Vec<Skill>,
    pub agents: Vec<Agent>,
    pub commands: Vec<Command>,
    pub hooks: Vec<Hook>,
    pub mcps: Vec<Mcp>,
    pub changelog: Vec<ChangelogEntry>,
    pub dependencies: Vec<PluginDependency>,
}

impl Default for PluginState {
    fn default() -> Self {
        Self {
            plugin_name: String::new(),
            version: PluginState::INITIAL_VERSION.to_owned(),
            skills: Vec::new(),
            agents: Vec::new(),
            commands: Vec::new(),
            hooks: Vec::new(),
            mcps: Vec::new(),
            changelog: Vec::new(),
            dependencies: Vec::new(),
        }
    }
}

impl PluginState {
    /// Version assigned to a fresh or imported plugin that carries none.
    pub const INITIAL_VERSION: &'static str = "0.1.0";

    pub fn skill(&self, id: &str) -> Option<&Skill> {
        self.skills.iter().find(|s| s.id == id)
    }

    pub fn agent(&self, id: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id == id)
    }

    pub fn mcp(&self, id: &str) -> Option<&Mcp> {
        self.mcps.iter().find(|m| m.id == id)
    }

    pub fn command(&self, id: &str) -> Option<&Command> {
        self.commands.iter().find(|c| c.id == id)
    }

    /// Find a command by name, accepting the name with or without its
    /// leading `/`.
    pub fn command_named(&self, name: &str) -> Option<&Command> {
        let wanted = name.trim_start_matches('/');
        self.commands
            .iter()
            .find(|c| c.name.trim_start_matches('/') == wanted)
    }
}
