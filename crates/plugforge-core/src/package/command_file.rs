//! `commands/<slug>.md` files.
//!
//! The file is frontmatter, then a machine-readable `nodes:` / `edges:`
//! block, then the human pipeline rendering:
//!
//! ```text
//! nodes:
//!   - id: "n1"
//!     type: agent
//!     position: {x: 250, y: 160}
//!     data: {"agentId":"a1"}
//! edges:
//!   - id: "e1"
//!     source: "n1"
//!     target: "n2"
//!     sourceHandle: "pass"
//! ```
//!
//! The block is YAML: string scalars are written double-quoted, `position`
//! is a flow mapping, and `data` is one line of JSON.

use serde_yaml::{Mapping, Value};
use tracing::warn;

use crate::markdown::frontmatter::text;
use crate::markdown::{command_frontmatter, pipeline_body};
use crate::model::{Command, FlowEdge, FlowNode, NodeKind, NodeType, Position};

const NODES: &str = "nodes:";
const EDGES: &str = "edges:";

pub(crate) fn render_command_file(command: &Command) -> String {
    let mut out = command_frontmatter(command).render();
    out.push('\n');
    out.push_str(&render_graph_block(command));
    out.push('\n');
    out.push_str(&pipeline_body(command));
    out
}

/// A double-quoted YAML scalar. JSON string escapes are valid YAML.
fn quoted(value: &str) -> String {
    serde_json::Value::String(value.to_owned()).to_string()
}

fn render_graph_block(command: &Command) -> String {
    let mut out = format!("{NODES}\n");
    for node in &command.nodes {
        out.push_str(&format!("  - id: {}\n", quoted(&node.id)));
        out.push_str(&format!("    type: {}\n", node.node_type()));
        out.push_str(&format!(
            "    position: {{x: {}, y: {}}}\n",
            node.position.x, node.position.y
        ));
        out.push_str(&format!("    data: {}\n", node.kind.data_value()));
    }
    out.push_str(&format!("{EDGES}\n"));
    for edge in &command.edges {
        out.push_str(&format!("  - id: {}\n", quoted(&edge.id)));
        out.push_str(&format!("    source: {}\n", quoted(&edge.source)));
        out.push_str(&format!("    target: {}\n", quoted(&edge.target)));
        if let Some(handle) = &edge.source_handle {
            out.push_str(&format!("    sourceHandle: {}\n", quoted(handle)));
        }
        if let Some(label) = &edge.label {
            out.push_str(&format!("    label: {}\n", quoted(label)));
        }
    }
    out
}

fn is_section(line: &str) -> bool {
    matches!(line.trim_end(), NODES | EDGES)
}

/// The lines from the first `nodes:` or `edges:` header up to the first
/// unindented line that is neither a header nor a `- ` item.
fn block_text(body: &str) -> Option<String> {
    let mut lines = body.lines().skip_while(|line| !is_section(line)).peekable();
    lines.peek()?;
    let block: Vec<&str> = lines
        .take_while(|line| {
            line.trim().is_empty()
                || line.starts_with(char::is_whitespace)
                || line.starts_with("- ")
                || is_section(line)
        })
        .collect();
    Some(block.join("\n"))
}

/// Parse the `nodes:` / `edges:` block out of a command body.
///
/// Items missing required fields, and nodes of unknown type, are skipped.
/// A block that is not valid YAML yields nothing.
pub(crate) fn parse_graph_block(body: &str) -> (Vec<FlowNode>, Vec<FlowEdge>) {
    let Some(text) = block_text(body) else {
        return (Vec::new(), Vec::new());
    };
    let block = match serde_yaml::from_str::<Mapping>(&text) {
        Ok(block) => block,
        Err(e) => {
            warn!(error = %e, "ignoring unreadable nodes/edges block");
            return (Vec::new(), Vec::new());
        }
    };

    let items = |key: &str| {
        block
            .get(key)
            .and_then(Value::as_sequence)
            .map(Vec::as_slice)
            .unwrap_or_default()
    };
    let nodes = items("nodes").iter().filter_map(node_from_item).collect();
    let edges = items("edges").iter().filter_map(edge_from_item).collect();
    (nodes, edges)
}

fn scalar(item: &Value, key: &str) -> Option<String> {
    item.get(key).and_then(text).filter(|v| !v.is_empty())
}

fn node_from_item(item: &Value) -> Option<FlowNode> {
    let id = scalar(item, "id")?;
    let type_name = scalar(item, "type")?;
    let node_type: NodeType = match type_name.parse() {
        Ok(t) => t,
        Err(e) => {
            warn!(node = %id, error = %e, "skipping node of unknown type");
            return None;
        }
    };

    let data = match item.get("data") {
        Some(value) => serde_json::to_value(value).unwrap_or_else(|e| {
            warn!(node = %id, error = %e, "node data is not JSON-shaped");
            serde_json::Value::Null
        }),
        None => serde_json::Value::Null,
    };

    Some(FlowNode {
        position: item.get("position").map(position).unwrap_or_default(),
        kind: NodeKind::from_parts(node_type, &data),
        id,
    })
}

/// Read `{x: 250, y: 160}`. Missing or non-numeric coordinates are zero.
fn position(value: &Value) -> Position {
    let coordinate = |key: &str| value.get(key).and_then(Value::as_f64).unwrap_or(0.0);
    Position {
        x: coordinate("x"),
        y: coordinate("y"),
    }
}

fn edge_from_item(item: &Value) -> Option<FlowEdge> {
    Some(FlowEdge {
        id: scalar(item, "id")?,
        source: scalar(item, "source")?,
        target: scalar(item, "target")?,
        source_handle: scalar(item, "sourceHandle"),
        label: scalar(item, "label"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AgentData, LoopData, StartData};

    fn sample() -> Command {
        Command {
            id: "c1".into(),
            name: "/review".into(),
            description: "Review: carefully".into(),
            nodes: vec![
                FlowNode::new(
                    "start",
                    NodeKind::Start(StartData {
                        command_name: Some("/review".into()),
                        ..Default::default()
                    }),
                )
                .at(250.0, 0.0),
                FlowNode::new(
                    "agent 1",
                    NodeKind::Agent(AgentData {
                        agent_id: Some("a1".into()),
                        prompt: Some("line one\nline \"two\"".into()),
                        ..Default::default()
                    }),
                )
                .at(250.5, -160.0),
                FlowNode::new(
                    "loop",
                    NodeKind::Loop(LoopData {
                        max_iterations: Some("${N}".into()),
                        ..Default::default()
                    }),
                ),
            ],
            edges: vec![
                FlowEdge::new("e1", "start", "agent 1"),
                FlowEdge::new("e2", "agent 1", "loop")
                    .with_handle("pass")
                    .with_label("- ok"),
            ],
        }
    }

    #[test]
    fn graph_block_roundtrips() {
        let command = sample();
        let file = render_command_file(&command);
        let (_, body) = crate::markdown::frontmatter::split(&file);
        let (nodes, edges) = parse_graph_block(body);
        assert_eq!(nodes, command.nodes);
        assert_eq!(edges, command.edges);
    }

    #[test]
    fn file_keeps_pipeline_section_after_block() {
        let file = render_command_file(&sample());
        let block = file.find("nodes:\n").unwrap();
        let pipeline = file.find("## Pipeline").unwrap();
        assert!(block < pipeline);
        assert!(file.starts_with("---\nname: /review\n"));
    }

    #[test]
    fn unknown_types_and_incomplete_items_are_skipped() {
        let body = "nodes:\n  - id: a\n    type: teleport\n  - id: b\n    type: end\n  - type: start\nedges:\n  - id: e\n    source: a\n";
        let (nodes, edges) = parse_graph_block(body);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id, "b");
        assert!(edges.is_empty());
    }

    #[test]
    fn malformed_data_and_position_degrade() {
        let body = "nodes:\n  - id: s\n    type: shell\n    position: {x: wide, y: 40}\n    data: [1, 2]\n  - id: a\n    type: agent\n    data: {\"agentId\": \"a1\", \"prompt\": 7}\n";
        let (nodes, _) = parse_graph_block(body);
        assert_eq!(nodes[0].position, Position { x: 0.0, y: 40.0 });
        assert_eq!(nodes[0].kind, NodeKind::Shell(Default::default()));
        assert_eq!(
            nodes[1].kind,
            NodeKind::Agent(AgentData {
                agent_id: Some("a1".into()),
                ..Default::default()
            })
        );
    }

    #[test]
    fn unreadable_block_yields_nothing() {
        let body = "nodes:\n  - id: s\n    data: {not json\n";
        let (nodes, edges) = parse_graph_block(body);
        assert!(nodes.is_empty() && edges.is_empty());
    }

    #[test]
    fn hand_written_block_with_bare_scalars() {
        let body = "# Ship\n\nnodes:\n  - id: s\n    type: start\n  - id: 2\n    type: end\n    position: {x: 10, y: 20.5}\nedges:\n  - id: e\n    source: s\n    target: 2\n    sourceHandle: pass\n\n## Pipeline\n";
        let (nodes, edges) = parse_graph_block(body);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].id, "2");
        assert_eq!(nodes[1].position, Position { x: 10.0, y: 20.5 });
        assert_eq!(edges, vec![FlowEdge::new("e", "s", "2").with_handle("pass")]);
    }

    #[test]
    fn unindented_text_closes_section() {
        let body = "nodes:\n- id: a\n  type: end\n# Title\n  - id: stray\n    type: end\n";
        let (nodes, _) = parse_graph_block(body);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id, "a");
    }

    #[test]
    fn body_without_block_yields_nothing() {
        let (nodes, edges) = parse_graph_block("# Deploy\n\nJust prose.\n");
        assert!(nodes.is_empty() && edges.is_empty());
    }
}
