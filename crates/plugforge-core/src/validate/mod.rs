//! Whole-plugin reference validation.
//!
//! [`validate_plugin`] walks every entity and every command graph and
//! reports dangling references, structural omissions, and unused skills.
//! All rules run on every call; none short-circuits another. The function
//! is total: absent optional fields count as absent, never as errors.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{NodeKind, PluginState};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Kind of component an issue is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Plugin,
    Skill,
    Agent,
    Mcp,
    Hook,
    Command,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Plugin => "plugin",
            Self::Skill => "skill",
            Self::Agent => "agent",
            Self::Mcp => "mcp",
            Self::Hook => "hook",
            Self::Command => "command",
        };
        f.write_str(s)
    }
}

/// A single finding. Produced fresh on every run, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub severity: Severity,
    pub component: ComponentKind,
    pub component_id: String,
    pub component_name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
}

impl ValidationIssue {
    fn new(
        severity: Severity,
        component: ComponentKind,
        id: &str,
        name: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            component,
            component_id: id.to_owned(),
            component_name: name.to_owned(),
            message: message.into(),
            fix: None,
        }
    }

    fn with_fix(mut self, fix: &str) -> Self {
        self.fix = Some(fix.to_owned());
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {:?}: {}",
            self.severity, self.component, self.component_name, self.message
        )?;
        if let Some(fix) = &self.fix {
            write!(f, " (fix: {fix})")?;
        }
        Ok(())
    }
}

/// Ordered list of issues plus the derived validity flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
    /// `true` when no issue has severity [`Severity::Error`].
    pub is_valid: bool,
}

impl ValidationReport {
    pub fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        let is_valid = !issues.iter().any(|i| i.severity == Severity::Error);
        Self { issues, is_valid }
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate the whole plugin snapshot.
pub fn validate_plugin(state: &PluginState) -> ValidationReport {
    let mut issues = Vec::new();

    check_plugin(state, &mut issues);
    check_skills(state, &mut issues);
    check_agents(state, &mut issues);
    check_commands(state, &mut issues);
    check_mcps(state, &mut issues);
    check_hooks(state, &mut issues);
    check_orphan_skills(state, &mut issues);

    ValidationReport::from_issues(issues)
}

fn check_plugin(state: &PluginState, issues: &mut Vec<ValidationIssue>) {
    if state.plugin_name.trim().is_empty() {
        issues.push(
            ValidationIssue::new(
                Severity::Error,
                ComponentKind::Plugin,
                "",
                "Plugin",
                "Plugin name is empty",
            )
            .with_fix("Set a plugin name"),
        );
    }
}

fn check_skills(state: &PluginState, issues: &mut Vec<ValidationIssue>) {
    for skill in &state.skills {
        if skill.content.trim().is_empty() {
            issues.push(
                ValidationIssue::new(
                    Severity::Warning,
                    ComponentKind::Skill,
                    &skill.id,
                    &skill.name,
                    "Skill has no content",
                )
                .with_fix("Add content or remove the skill"),
            );
        }
    }
}

fn check_agents(state: &PluginState, issues: &mut Vec<ValidationIssue>) {
    for agent in &state.agents {
        for skill_id in &agent.skill_ids {
            if state.skill(skill_id).is_none() {
                issues.push(
                    ValidationIssue::new(
                        Severity::Error,
                        ComponentKind::Agent,
                        &agent.id,
                        &agent.name,
                        format!("References missing skill: {skill_id}"),
                    )
                    .with_fix("Remove the broken reference or create the skill"),
                );
            }
        }
        for mcp_id in &agent.mcp_ids {
            if state.mcp(mcp_id).is_none() {
                issues.push(
                    ValidationIssue::new(
                        Severity::Error,
                        ComponentKind::Agent,
                        &agent.id,
                        &agent.name,
                        format!("References missing MCP: {mcp_id}"),
                    )
                    .with_fix("Remove the broken reference or add the MCP"),
                );
            }
        }
        if agent.instructions.trim().is_empty() {
            issues.push(ValidationIssue::new(
                Severity::Warning,
                ComponentKind::Agent,
                &agent.id,
                &agent.name,
                "Agent has no instructions",
            ));
        }
    }
}

fn check_commands(state: &PluginState, issues: &mut Vec<ValidationIssue>) {
    for command in &state.commands {
        let error = |message: String| {
            ValidationIssue::new(
                Severity::Error,
                ComponentKind::Command,
                &command.id,
                &command.name,
                message,
            )
        };

        if !command.has_start() {
            issues.push(error("No start node".to_owned()).with_fix("Add a start node"));
        }

        for node in &command.nodes {
            match &node.kind {
                NodeKind::Agent(data) => {
                    if let Some(id) = set(&data.agent_id).filter(|id| state.agent(id).is_none()) {
                        issues.push(error(format!("Node references missing agent: {id}")));
                    }
                }
                NodeKind::Skill(data) => {
                    if let Some(id) = set(&data.skill_id).filter(|id| state.skill(id).is_none()) {
                        issues.push(error(format!("Node references missing skill: {id}")));
                    }
                }
                NodeKind::Mcp(data) => {
                    if let Some(id) = set(&data.mcp_id).filter(|id| state.mcp(id).is_none()) {
                        issues.push(error(format!("Node references missing MCP: {id}")));
                    }
                }
                _ => {}
            }
        }

        if command.nodes.len() > 1 {
            let connected: HashSet<&str> = command
                .edges
                .iter()
                .flat_map(|e| [e.source.as_str(), e.target.as_str()])
                .collect();
            for node in &command.nodes {
                if !connected.contains(node.id.as_str()) {
                    issues.push(ValidationIssue::new(
                        Severity::Warning,
                        ComponentKind::Command,
                        &command.id,
                        &command.name,
                        format!("Node \"{}\" ({}) is disconnected", node.id, node.node_type()),
                    ));
                }
            }
        }
    }
}

fn check_mcps(state: &PluginState, issues: &mut Vec<ValidationIssue>) {
    for mcp in &state.mcps {
        if !mcp.is_configured {
            issues.push(
                ValidationIssue::new(
                    Severity::Warning,
                    ComponentKind::Mcp,
                    &mcp.id,
                    &mcp.name,
                    "MCP not fully configured",
                )
                .with_fix("Set required environment variables"),
            );
        }
    }
}

fn check_hooks(state: &PluginState, issues: &mut Vec<ValidationIssue>) {
    for hook in &state.hooks {
        if hook.event.trim().is_empty() {
            issues.push(ValidationIssue::new(
                Severity::Error,
                ComponentKind::Hook,
                &hook.id,
                &hook.name,
                "Hook has no event trigger",
            ));
        }
    }
}

fn check_orphan_skills(state: &PluginState, issues: &mut Vec<ValidationIssue>) {
    let mut used: HashSet<&str> = state
        .agents
        .iter()
        .flat_map(|a| a.skill_ids.iter().map(String::as_str))
        .collect();
    for command in &state.commands {
        for node in &command.nodes {
            if let NodeKind::Skill(data) = &node.kind {
                used.extend(set(&data.skill_id));
            }
        }
    }

    for skill in &state.skills {
        if !used.contains(skill.id.as_str()) {
            issues.push(ValidationIssue::new(
                Severity::Info,
                ComponentKind::Skill,
                &skill.id,
                &skill.name,
                "Not referenced by any agent or command",
            ));
        }
    }
}

/// A reference field counts as set only when it is present and non-empty.
pub(crate) fn set(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Agent, AgentData, Command, FlowEdge, FlowNode, Hook, Mcp, Skill, SkillData, StartData,
    };

    fn named_state() -> PluginState {
        PluginState {
            plugin_name: "x".into(),
            ..Default::default()
        }
    }

    fn start(id: &str) -> FlowNode {
        FlowNode::new(id, NodeKind::Start(StartData::default()))
    }

    #[test]
    fn empty_named_plugin_is_clean() {
        let report = validate_plugin(&named_state());
        assert!(report.issues.is_empty());
        assert!(report.is_valid);
    }

    #[test]
    fn blank_plugin_name_is_error() {
        let state = PluginState {
            plugin_name: "   ".into(),
            ..Default::default()
        };
        let report = validate_plugin(&state);
        assert!(!report.is_valid);
        assert_eq!(report.issues[0].component, ComponentKind::Plugin);
        assert_eq!(report.issues[0].message, "Plugin name is empty");
    }

    #[test]
    fn dangling_agent_skill_is_single_error() {
        let mut state = named_state();
        state.agents.push(Agent {
            id: "a1".into(),
            name: "dev".into(),
            skill_ids: vec!["s1".into()],
            instructions: "do it".into(),
            ..Default::default()
        });
        let report = validate_plugin(&state);
        let errors: Vec<_> = report.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].component, ComponentKind::Agent);
        assert_eq!(errors[0].component_id, "a1");
        assert_eq!(errors[0].message, "References missing skill: s1");
        assert!(!report.is_valid);
    }

    #[test]
    fn warnings_and_info_keep_plugin_valid() {
        let mut state = named_state();
        state.skills.push(Skill {
            id: "s1".into(),
            name: "empty".into(),
            ..Default::default()
        });
        state.mcps.push(Mcp {
            id: "m1".into(),
            name: "github".into(),
            ..Default::default()
        });
        let report = validate_plugin(&state);
        assert_eq!(report.count(Severity::Warning), 2);
        assert_eq!(report.count(Severity::Info), 1);
        assert!(report.is_valid);
    }

    #[test]
    fn command_rules() {
        let mut state = named_state();
        state.commands.push(Command {
            id: "c1".into(),
            name: "/ship".into(),
            nodes: vec![
                FlowNode::new(
                    "n1",
                    NodeKind::Agent(AgentData {
                        agent_id: Some("ghost".into()),
                        ..Default::default()
                    }),
                ),
                FlowNode::new(
                    "n2",
                    NodeKind::Skill(SkillData {
                        skill_id: Some(String::new()),
                        ..Default::default()
                    }),
                ),
                start("n3"),
            ],
            edges: vec![FlowEdge::new("e1", "n3", "n1")],
            ..Default::default()
        });

        let report = validate_plugin(&state);
        let messages: Vec<&str> = report.issues.iter().map(|i| i.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "Node references missing agent: ghost",
                "Node \"n2\" (skill) is disconnected",
            ]
        );
    }

    #[test]
    fn missing_start_node_is_error_and_single_node_is_not_orphaned() {
        let mut state = named_state();
        state.commands.push(Command {
            id: "c1".into(),
            name: "/solo".into(),
            nodes: vec![FlowNode::new(
                "only",
                NodeKind::Step(Default::default()),
            )],
            ..Default::default()
        });
        let report = validate_plugin(&state);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].message, "No start node");
        assert_eq!(report.issues[0].fix.as_deref(), Some("Add a start node"));
    }

    #[test]
    fn blank_hook_event_is_error() {
        let mut state = named_state();
        state.hooks.push(Hook {
            id: "h1".into(),
            name: "lint".into(),
            event: " ".into(),
            ..Default::default()
        });
        let report = validate_plugin(&state);
        assert_eq!(report.issues[0].message, "Hook has no event trigger");
        assert!(!report.is_valid);
    }

    #[test]
    fn skill_used_by_command_node_is_not_orphan() {
        let mut state = named_state();
        state.skills.push(Skill {
            id: "s1".into(),
            name: "arch".into(),
            content: "# Arch".into(),
            ..Default::default()
        });
        state.commands.push(Command {
            id: "c1".into(),
            name: "/x".into(),
            nodes: vec![
                start("a"),
                FlowNode::new(
                    "b",
                    NodeKind::Skill(SkillData {
                        skill_id: Some("s1".into()),
                        ..Default::default()
                    }),
                ),
            ],
            edges: vec![FlowEdge::new("e", "a", "b")],
            ..Default::default()
        });
        assert!(validate_plugin(&state).issues.is_empty());
    }

    #[test]
    fn display_includes_fix() {
        let issue = ValidationIssue::new(Severity::Error, ComponentKind::Plugin, "", "Plugin", "bad")
            .with_fix("fix it");
        assert_eq!(issue.to_string(), "[error] plugin \"Plugin\": bad (fix: fix it)");
    }
}
