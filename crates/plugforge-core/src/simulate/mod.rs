//! Dry-run of a single command.
//!
//! Nothing is executed. Each node in linearized order is resolved against
//! the plugin and turned into a [`SimulationStep`] describing what would
//! happen, with its status and any diagnostics.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::graph::linearize_detailed;
use crate::model::{Command, FlowNode, NodeKind, PluginState};
use crate::validate::set;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Warning,
    Error,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationStep {
    pub node_id: String,
    /// Serialized node type name.
    pub node_type: String,
    /// Node label, or the type name when the label is blank.
    pub node_name: String,
    pub description: String,
    pub status: StepStatus,
    pub warnings: Vec<String>,
}

impl SimulationStep {
    fn new(node: &FlowNode) -> Self {
        Self {
            node_id: node.id.clone(),
            node_type: node.node_type().as_str().to_owned(),
            node_name: node.display_name().to_owned(),
            description: String::new(),
            status: StepStatus::Success,
            warnings: Vec::new(),
        }
    }

    fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
        if self.status == StepStatus::Success {
            self.status = StepStatus::Warning;
        }
    }

    fn fail(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
        self.status = StepStatus::Error;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub steps: Vec<SimulationStep>,
    /// Warnings of every step whose status is `error`.
    pub errors: Vec<String>,
    /// Warnings of every step whose status is `warning`.
    pub warnings: Vec<String>,
    /// Ids of nodes left out of the ordering by a cycle or a dangling edge.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub omitted_node_ids: Vec<String>,
    /// `true` when `errors` is empty.
    pub is_valid: bool,
}

/// Produce a dry-run trace of `command` against `state`.
pub fn simulate_command(command: &Command, state: &PluginState) -> SimulationResult {
    let order = linearize_detailed(&command.nodes, &command.edges);
    debug!(
        command = %command.name,
        steps = order.ordered.len(),
        omitted = order.omitted.len(),
        "simulating command"
    );

    let steps: Vec<SimulationStep> = order
        .ordered
        .iter()
        .map(|node| simulate_node(node, state))
        .collect();

    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    for step in &steps {
        match step.status {
            StepStatus::Error => errors.extend(step.warnings.iter().cloned()),
            StepStatus::Warning => warnings.extend(step.warnings.iter().cloned()),
            StepStatus::Success => {}
        }
    }

    SimulationResult {
        is_valid: errors.is_empty(),
        steps,
        errors,
        warnings,
        omitted_node_ids: order.omitted.iter().map(|n| n.id.clone()).collect(),
    }
}

fn simulate_node(node: &FlowNode, state: &PluginState) -> SimulationStep {
    let step = SimulationStep::new(node);

    match &node.kind {
        NodeKind::Start(data) => step.describe(format!(
            "Command starts: {}",
            set(&data.command_name).unwrap_or("unnamed")
        )),
        NodeKind::End(_) => step.describe("Command ends"),

        NodeKind::Agent(data) => {
            let Some(agent_id) = set(&data.agent_id) else {
                let mut step = step.describe("Invoke agent (none selected)");
                step.warn("No agent selected");
                return step;
            };
            let Some(agent) = state.agent(agent_id) else {
                let mut step = step.describe("Invoke agent (MISSING)");
                step.fail(format!("Agent not found: {agent_id}"));
                return step;
            };
            let mut step = step.describe(format!("Invoke agent \"{}\" ({})", agent.name, agent.model));
            for skill_id in &agent.skill_ids {
                if state.skill(skill_id).is_none() {
                    step.warn(format!(
                        "Agent \"{}\" references missing skill: {skill_id}",
                        agent.name
                    ));
                }
            }
            for mcp_id in &agent.mcp_ids {
                if state.mcp(mcp_id).is_none() {
                    step.warn(format!(
                        "Agent \"{}\" references missing MCP: {mcp_id}",
                        agent.name
                    ));
                }
            }
            step
        }

        NodeKind::Skill(data) => {
            let Some(skill_id) = set(&data.skill_id) else {
                let mut step = step.describe("Apply skill (none selected)");
                step.warn("No skill selected");
                return step;
            };
            match state.skill(skill_id) {
                Some(skill) => step.describe(format!("Apply skill \"{}\"", skill.name)),
                None => {
                    let mut step = step.describe("Apply skill (MISSING)");
                    step.fail(format!("Skill not found: {skill_id}"));
                    step
                }
            }
        }

        NodeKind::Mcp(data) => {
            let Some(mcp_id) = set(&data.mcp_id) else {
                let mut step = step.describe("Call MCP (none selected)");
                step.warn("No MCP selected");
                return step;
            };
            let Some(mcp) = state.mcp(mcp_id) else {
                let mut step = step.describe("Call MCP (MISSING)");
                step.fail(format!("MCP not found: {mcp_id}"));
                return step;
            };
            let mut step = step.describe(format!(
                "Call MCP \"{}\" → {}",
                mcp.name,
                set(&data.tool_name).unwrap_or("?")
            ));
            if !mcp.is_configured {
                step.warn(format!("MCP \"{}\" not fully configured", mcp.name));
            }
            step
        }

        NodeKind::Step(data) | NodeKind::Shell(data) => {
            match set(&data.command) {
                Some(command) => step.describe(format!("Execute: {command}")),
                None => {
                    let mut step = step.describe("Execute: (empty command)");
                    step.warn("Empty shell command");
                    step
                }
            }
        }

        NodeKind::Condition(data) | NodeKind::Branch(data) => {
            let is_branch = matches!(node.kind, NodeKind::Branch(_));
            let what = if is_branch { "Branch on" } else { "Evaluate" };
            match set(&data.condition) {
                Some(condition) => step.describe(format!("{what}: {condition}")),
                None => {
                    let mut step = step.describe(format!("{what}: (no condition)"));
                    step.warn(if is_branch {
                        "Empty branch condition"
                    } else {
                        "Empty condition"
                    });
                    step
                }
            }
        }

        NodeKind::Loop(data) => {
            let max = set(&data.max_iterations)
                .map(|n| format!(" (max {n})"))
                .unwrap_or_default();
            match set(&data.collection) {
                Some(collection) => step.describe(format!("Loop over: {collection}{max}")),
                None => {
                    let mut step = step.describe(format!("Loop over: (no collection){max}"));
                    step.warn("Empty loop collection");
                    step
                }
            }
        }

        NodeKind::Prompt(data) => step.describe(format!(
            "Prompt: \"{}\"",
            set(&data.prompt).unwrap_or("(empty)")
        )),
        NodeKind::Variable(data) => step.describe(format!(
            "Set {} = {}",
            set(&data.key).unwrap_or("?"),
            data.value.as_deref().unwrap_or_default()
        )),
        NodeKind::Template(_) => step.describe("Render template"),
        NodeKind::Notify(data) => step.describe(format!(
            "Notify: {} \u{2014} \"{}\"",
            set(&data.channel).unwrap_or("?"),
            data.message.as_deref().unwrap_or_default()
        )),
        NodeKind::Parallel(_) => step.describe("Execute branches in parallel"),
    }
}
