//! Human-readable rendering of a command as a markdown document.

pub mod frontmatter;

use crate::graph::linearize;
use crate::model::{Command, FlowNode, NodeKind, handles};
use crate::validate::set;

pub use frontmatter::Frontmatter;

/// Render `command` as frontmatter, title, optional description, and a
/// numbered `## Pipeline` list with one entry per node in dependency order.
///
/// Nodes left out of the ordering by a cycle do not appear.
pub fn generate_command_markdown(command: &Command) -> String {
    let mut out = command_frontmatter(command).render();
    out.push('\n');
    out.push_str(&pipeline_body(command));
    out
}

pub(crate) fn command_frontmatter(command: &Command) -> Frontmatter {
    Frontmatter::new()
        .scalar("name", command.name.as_str())
        .scalar_if_set("description", &command.description)
}

/// Everything after the frontmatter: title, description, pipeline list.
pub(crate) fn pipeline_body(command: &Command) -> String {
    let mut lines: Vec<String> = vec![format!("# {}", command.name)];
    if !command.description.is_empty() {
        lines.push(String::new());
        lines.push(command.description.clone());
    }
    lines.push(String::new());
    lines.push("## Pipeline".to_owned());
    lines.push(String::new());

    for (i, node) in linearize(&command.nodes, &command.edges)
        .into_iter()
        .enumerate()
    {
        lines.push(format!("{}. {}", i + 1, describe_node(node, command)));
    }

    lines.push(String::new());
    lines.join("\n")
}

fn describe_node(node: &FlowNode, command: &Command) -> String {
    match &node.kind {
        NodeKind::Start(d) => format!("**Start**: {}", set(&d.command_name).unwrap_or("command")),
        NodeKind::End(_) => "**End**: Pipeline terminates".to_owned(),
        NodeKind::Step(d) | NodeKind::Shell(d) => {
            let cwd = set(&d.working_dir)
                .map(|dir| format!(" (cwd: {dir})"))
                .unwrap_or_default();
            format!("**Shell**: `{}`{cwd}", set(&d.command).unwrap_or("..."))
        }
        NodeKind::Agent(d) => {
            let prompt = set(&d.prompt)
                .map(|p| format!(" — \"{p}\""))
                .unwrap_or_default();
            format!("**Agent**: {}{prompt}", set(&d.agent_id).unwrap_or("unset"))
        }
        NodeKind::Branch(d) | NodeKind::Condition(d) => {
            let target = |aliases: &[&str]| {
                command
                    .edge_from_handle(&node.id, aliases)
                    .map(|e| e.target.clone())
                    .unwrap_or_else(|| "?".to_owned())
            };
            format!(
                "**Condition**: `{}`\n  - true → {}\n  - false → {}",
                set(&d.condition).unwrap_or("..."),
                target(&[handles::PASS, handles::TRUE]),
                target(&[handles::FAIL, handles::FALSE]),
            )
        }
        NodeKind::Loop(d) => {
            let max = set(&d.max_iterations)
                .map(|n| format!(" (max: {n})"))
                .unwrap_or_default();
            format!("**Loop**: over `{}`{max}", set(&d.collection).unwrap_or("..."))
        }
        NodeKind::Skill(d) => format!("**Skill**: {}", set(&d.skill_id).unwrap_or("unset")),
        NodeKind::Mcp(d) => format!(
            "**MCP**: {} → {}",
            set(&d.mcp_id).unwrap_or("unset"),
            set(&d.tool_name).unwrap_or("unset")
        ),
        NodeKind::Prompt(d) => format!("**Prompt**: \"{}\"", set(&d.prompt).unwrap_or("...")),
        NodeKind::Variable(d) => format!(
            "**Variable**: `{}` = `{}`",
            set(&d.key).unwrap_or("?"),
            d.value.as_deref().unwrap_or_default()
        ),
        NodeKind::Template(d) => {
            format!("**Template**:\n```\n{}\n```", set(&d.template).unwrap_or("..."))
        }
        NodeKind::Notify(d) => format!(
            "**Notify**: channel={}, message=\"{}\"",
            set(&d.channel).unwrap_or("?"),
            set(&d.message).unwrap_or("...")
        ),
        NodeKind::Parallel(_) => "**Parallel**: executes branches concurrently".to_owned(),
    }
}
