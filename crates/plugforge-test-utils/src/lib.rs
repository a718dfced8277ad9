//! Shared test utilities for plugforge tests.
//!
//! Two kinds of helper:
//! - **Fixtures**: entity constructors and a [`CommandBuilder`] for graphs,
//!   plus [`sample_plugin`], a small plugin that validates cleanly.
//! - **Archives**: in-memory `.zip` / `.tar.gz` builders that write entries
//!   exactly as given, so tests control root folders and odd paths
//!   independently of the exporter.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use zip::write::SimpleFileOptions;

use plugforge_core::model::{
    AgentData, ConditionData, HookAction, HookActionType, NotifyData, ShellData, StartData,
    handles,
};
use plugforge_core::{
    Agent, Command, FlowEdge, FlowNode, Hook, Mcp, NodeKind, PluginState, Skill,
};

// ---------------------------------------------------------------------------
// Entity fixtures
// ---------------------------------------------------------------------------

pub fn skill(id: &str, name: &str) -> Skill {
    Skill {
        id: id.to_owned(),
        name: name.to_owned(),
        description: format!("{name} skill"),
        content: format!("# {name}\n\nUse {name} wisely."),
        ..Default::default()
    }
}

pub fn agent(id: &str, name: &str) -> Agent {
    Agent {
        id: id.to_owned(),
        name: name.to_owned(),
        description: format!("{name} agent"),
        model: "sonnet".to_owned(),
        instructions: format!("You are {name}."),
        ..Default::default()
    }
}

pub fn mcp(id: &str, name: &str, configured: bool) -> Mcp {
    Mcp {
        id: id.to_owned(),
        name: name.to_owned(),
        transport: vec!["stdio".to_owned()],
        install_command: format!("npx -y {name}-mcp"),
        is_configured: configured,
        ..Default::default()
    }
}

pub fn hook(id: &str, name: &str, event: &str) -> Hook {
    Hook {
        id: id.to_owned(),
        name: name.to_owned(),
        event: event.to_owned(),
        matcher: "*".to_owned(),
        action: HookAction {
            action_type: HookActionType::Bash,
            config: [("command".to_owned(), "echo hook".to_owned())].into(),
        },
        ..Default::default()
    }
}

/// An empty plugin with the given name.
pub fn plugin(name: &str) -> PluginState {
    PluginState {
        plugin_name: name.to_owned(),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Command graphs
// ---------------------------------------------------------------------------

/// Builds a [`Command`] node by node. Nodes are laid out top to bottom;
/// edges get sequential `e1`, `e2`, ... ids.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    command: Command,
}

impl CommandBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            command: Command {
                id: format!("cmd-{}", name.trim_start_matches('/')),
                name: name.to_owned(),
                ..Default::default()
            },
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.command.description = description.to_owned();
        self
    }

    pub fn node(mut self, id: &str, kind: NodeKind) -> Self {
        let y = 160.0 * self.command.nodes.len() as f64;
        self.command.nodes.push(FlowNode::new(id, kind).at(250.0, y));
        self
    }

    pub fn start(self, id: &str) -> Self {
        let name = self.command.name.clone();
        self.node(
            id,
            NodeKind::Start(StartData {
                label: Some("Start".to_owned()),
                command_name: Some(name),
            }),
        )
    }

    pub fn end(self, id: &str) -> Self {
        self.node(id, NodeKind::End(Default::default()))
    }

    pub fn edge(self, source: &str, target: &str) -> Self {
        self.push_edge(source, target, None)
    }

    /// Edge leaving a multi-output node through `handle`.
    pub fn edge_via(self, source: &str, target: &str, handle: &str) -> Self {
        self.push_edge(source, target, Some(handle))
    }

    /// Connect the nodes added so far in insertion order.
    pub fn chain(mut self) -> Self {
        let ids: Vec<String> = self.command.nodes.iter().map(|n| n.id.clone()).collect();
        for pair in ids.windows(2) {
            self = self.push_edge(&pair[0], &pair[1], None);
        }
        self
    }

    fn push_edge(mut self, source: &str, target: &str, handle: Option<&str>) -> Self {
        let id = format!("e{}", self.command.edges.len() + 1);
        let mut edge = FlowEdge::new(id, source, target);
        if let Some(handle) = handle {
            edge = edge.with_handle(handle);
        }
        self.command.edges.push(edge);
        self
    }

    pub fn build(self) -> Command {
        self.command
    }
}

pub fn shell(command: &str) -> NodeKind {
    NodeKind::Shell(ShellData {
        label: Some("Run".to_owned()),
        command: Some(command.to_owned()),
        working_dir: None,
    })
}

pub fn agent_node(agent_id: &str, prompt: &str) -> NodeKind {
    NodeKind::Agent(AgentData {
        label: Some("Agent".to_owned()),
        agent_id: Some(agent_id.to_owned()),
        prompt: Some(prompt.to_owned()),
    })
}

/// A plugin that passes validation without errors: one skill, one
/// configured MCP, one agent using both, one hook, and a `/review`
/// command that branches on the agent's verdict.
pub fn sample_plugin() -> PluginState {
    let review = CommandBuilder::new("/review")
        .description("Review the current change")
        .start("start")
        .node("review", agent_node("a-reviewer", "Review the diff"))
        .node(
            "verdict",
            NodeKind::Condition(ConditionData {
                label: Some("Approved?".to_owned()),
                condition: Some("review.passed".to_owned()),
            }),
        )
        .node("merge", shell("git merge --ff-only"))
        .node(
            "ping",
            NodeKind::Notify(NotifyData {
                label: Some("Ping".to_owned()),
                channel: Some("slack".to_owned()),
                message: Some("Review failed".to_owned()),
            }),
        )
        .end("end")
        .edge("start", "review")
        .edge("review", "verdict")
        .edge_via("verdict", "merge", handles::TRUE)
        .edge_via("verdict", "ping", handles::FALSE)
        .edge("merge", "end")
        .edge("ping", "end")
        .build();

    let mut reviewer = agent("a-reviewer", "reviewer");
    reviewer.skill_ids = vec!["s-style".to_owned()];
    reviewer.mcp_ids = vec!["m-github".to_owned()];
    reviewer.allowed_tools = vec!["Read".to_owned(), "Grep".to_owned()];

    PluginState {
        plugin_name: "Review Kit".to_owned(),
        version: "1.0.0".to_owned(),
        skills: vec![skill("s-style", "style-guide")],
        agents: vec![reviewer],
        mcps: vec![mcp("m-github", "github", true)],
        hooks: vec![hook("h-fmt", "format", "PostToolUse")],
        commands: vec![review],
        ..Default::default()
    }
}

/// A plugin snapshot as the JSON document the CLI reads.
pub fn state_json(state: &PluginState) -> String {
    serde_json::to_string_pretty(state).expect("plugin state serializes")
}

// ---------------------------------------------------------------------------
// Archives
// ---------------------------------------------------------------------------

/// Zip archive with `entries` written verbatim as `(path, content)`.
pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (path, content) in entries {
        writer.start_file(*path, options).expect("zip entry starts");
        writer.write_all(content.as_bytes()).expect("zip entry writes");
    }
    writer.finish().expect("zip finishes").into_inner()
}

/// Gzip-compressed USTAR archive with `entries` written verbatim.
pub fn tar_gz_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::fast());
    let mut builder = tar::Builder::new(encoder);
    for (path, content) in entries {
        let mut header = tar::Header::new_ustar();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, path, content.as_bytes())
            .expect("tar entry appends");
    }
    builder
        .into_inner()
        .expect("tar finishes")
        .finish()
        .expect("gzip finishes")
}

/// Write `bytes` to `dir/file_name` and return the path.
pub fn write_fixture(dir: &Path, file_name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, bytes).expect("fixture writes");
    path
}
