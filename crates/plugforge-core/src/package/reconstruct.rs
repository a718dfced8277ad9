//! Best-effort rebuild of a command graph from free-form markdown.
//!
//! Used when a command file has no `nodes:` / `edges:` block. The body is
//! cut into [`PipelineStep`]s, each step is run through a battery of
//! [`FeatureExtractor`]s, and the resulting [`StepFeatures`] decide which
//! nodes the step becomes. Every reconstructed graph is a single chain
//! from a synthetic `start` node to a synthetic `end` node.
//!
//! The default extractors recognise specific phrasings (several of them
//! Spanish). Other phrasings can be supported by registering more
//! extractors; the stepping and assembly logic does not change. Nothing in
//! here fails: text that matches nothing becomes a plain `step` node.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::NameIndex;
use crate::model::{
    AgentData, ConditionData, EndData, FlowEdge, FlowNode, LoopData, NodeKind, PromptData,
    ShellData, StartData, generate_id,
};

const X_CENTER: f64 = 250.0;
const Y_STEP: f64 = 160.0;

static ARROW_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[├└]──▶\s*(.+)").unwrap());
static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^##\s+(.+)").unwrap());
static SKIPPED_HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(uso|usage|output|flags)").unwrap());
static FASE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)fase\s+(\d+)").unwrap());

static INVOCAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)invocar[:\s]+(\w+)\s+agent").unwrap());
static INVOKE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)invoke[:\s]+(\w+)\s+agent").unwrap());
static SKILLS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)lee\s+skills?:\s*(.+)").unwrap());
static ESPERAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?im)esperar[:\s]*["“”]?(.+?)["“”]?\s*$"#).unwrap());
static CONFIRMAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)confirmar[:\s]*(.+)").unwrap());
static PAUSE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"⏸\x{FE0F}?\s*(.+)").unwrap());
static MAX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:máximo|max|loop)\s+(\d+)").unwrap());
static SI_FAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bsi\s+(fail|hay|falla)").unwrap());
static IF_FAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bif\s+(fail|error)").unwrap());

// ---------------------------------------------------------------------------
// Steps and features
// ---------------------------------------------------------------------------

/// One detected pipeline step: a label plus the detail lines under it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStep {
    pub label: String,
    pub details: Vec<String>,
}

impl PipelineStep {
    /// Label and details, one per line.
    pub fn full_text(&self) -> String {
        std::iter::once(self.label.as_str())
            .chain(self.details.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// What the extractors found in one step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepFeatures {
    /// Name of an agent the step invokes.
    pub agent: Option<String>,
    /// Skill names the step mentions.
    pub skills: Vec<String>,
    /// Text of a wait-for-user prompt.
    pub prompt: Option<String>,
    pub max_iterations: Option<u32>,
    /// Detail line describing a failure condition.
    pub condition: Option<String>,
}

/// A pattern matcher that fills in [`StepFeatures`].
///
/// Extractors run in registration order. An extractor should leave a field
/// alone when an earlier one already set it.
pub trait FeatureExtractor: Send + Sync {
    fn name(&self) -> &str;
    fn extract(&self, step: &PipelineStep, features: &mut StepFeatures);
}

struct AgentInvocation;

impl FeatureExtractor for AgentInvocation {
    fn name(&self) -> &str {
        "agent-invocation"
    }

    fn extract(&self, step: &PipelineStep, features: &mut StepFeatures) {
        if features.agent.is_some() {
            return;
        }
        let text = step.full_text();
        features.agent = INVOCAR_RE
            .captures(&text)
            .or_else(|| INVOKE_RE.captures(&text))
            .map(|c| c[1].to_owned());
    }
}

struct SkillList;

impl FeatureExtractor for SkillList {
    fn name(&self) -> &str {
        "skill-list"
    }

    fn extract(&self, step: &PipelineStep, features: &mut StepFeatures) {
        if !features.skills.is_empty() {
            return;
        }
        let text = step.details.join("\n");
        if let Some(caps) = SKILLS_RE.captures(&text) {
            features.skills = caps[1]
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect();
        }
    }
}

struct WaitPrompt;

impl FeatureExtractor for WaitPrompt {
    fn name(&self) -> &str {
        "wait-prompt"
    }

    fn extract(&self, step: &PipelineStep, features: &mut StepFeatures) {
        if features.prompt.is_some() {
            return;
        }
        let text = step.full_text();
        features.prompt = [&*ESPERAR_RE, &*CONFIRMAR_RE, &*PAUSE_RE]
            .into_iter()
            .find_map(|re| re.captures(&text))
            .map(|c| c[1].trim().to_owned())
            .filter(|p| !p.is_empty());
    }
}

struct LoopLimit;

impl FeatureExtractor for LoopLimit {
    fn name(&self) -> &str {
        "loop-limit"
    }

    fn extract(&self, step: &PipelineStep, features: &mut StepFeatures) {
        if features.max_iterations.is_some() {
            return;
        }
        let text = step.details.join(" ");
        features.max_iterations = MAX_RE
            .captures(&text)
            .and_then(|c| c[1].parse().ok());
    }
}

struct FailureCondition;

impl FeatureExtractor for FailureCondition {
    fn name(&self) -> &str {
        "failure-condition"
    }

    fn extract(&self, step: &PipelineStep, features: &mut StepFeatures) {
        if features.condition.is_some() {
            return;
        }
        features.condition = step
            .details
            .iter()
            .find(|d| SI_FAIL_RE.is_match(d) || IF_FAIL_RE.is_match(d))
            .cloned();
    }
}

// ---------------------------------------------------------------------------
// Step detection
// ---------------------------------------------------------------------------

/// Cut a markdown body into pipeline steps.
///
/// Tries, in order: `├──▶` / `└──▶` arrow markers, `## ` headings (except
/// usage/output/flags sections), and finally a single step built from the
/// command's name and description.
pub fn split_steps(body: &str, name: Option<&str>, description: Option<&str>) -> Vec<PipelineStep> {
    let lines: Vec<&str> = body.lines().collect();

    let arrows = arrow_steps(&lines);
    if !arrows.is_empty() {
        let sections = heading_sections(&lines);
        return arrows
            .into_iter()
            .map(|step| enrich_from_section(step, &sections))
            .collect();
    }

    let headings: Vec<PipelineStep> = heading_sections(&lines)
        .into_iter()
        .filter(|(heading, _)| !SKIPPED_HEADING_RE.is_match(heading))
        .map(|(label, body)| PipelineStep {
            label,
            details: body
                .into_iter()
                .filter(|l| !l.starts_with('#'))
                .collect(),
        })
        .collect();
    if !headings.is_empty() {
        return headings;
    }

    vec![PipelineStep {
        label: name.unwrap_or("Step").to_owned(),
        details: description.map(|d| vec![d.to_owned()]).unwrap_or_default(),
    }]
}

fn arrow_steps(lines: &[&str]) -> Vec<PipelineStep> {
    let mut steps = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let Some(caps) = ARROW_RE.captures(line) else {
            continue;
        };
        let mut details = Vec::new();
        for next in &lines[i + 1..] {
            if next.trim().is_empty() || ARROW_RE.is_match(next) || next.trim() == "```" {
                break;
            }
            let cleaned = next
                .trim_start_matches(|c: char| c.is_whitespace() || c == '│')
                .trim();
            if !cleaned.is_empty() {
                details.push(cleaned.to_owned());
            }
        }
        steps.push(PipelineStep {
            label: caps[1].trim().to_owned(),
            details,
        });
    }
    steps
}

/// Every `## ` heading with its trimmed, non-empty, non-fence lines.
fn heading_sections(lines: &[&str]) -> Vec<(String, Vec<String>)> {
    let mut sections = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let Some(caps) = HEADING_RE.captures(line) else {
            continue;
        };
        let body = lines[i + 1..]
            .iter()
            .take_while(|l| !l.starts_with("## "))
            .map(|l| l.trim())
            .filter(|l| !l.is_empty() && !l.starts_with("```"))
            .map(str::to_owned)
            .collect();
        sections.push((caps[1].trim().to_owned(), body));
    }
    sections
}

/// Append the lines of the `##` section that matches an arrow step, either
/// by `FASE <n>` number or by exact (case-insensitive) heading.
fn enrich_from_section(mut step: PipelineStep, sections: &[(String, Vec<String>)]) -> PipelineStep {
    let mut by_key: HashMap<String, &Vec<String>> = HashMap::new();
    for (heading, lines) in sections {
        let heading = heading.to_lowercase();
        if let Some(caps) = FASE_RE.captures(&heading) {
            by_key.insert(format!("fase{}", &caps[1]), lines);
        }
        by_key.insert(heading, lines);
    }

    let key = match FASE_RE.captures(&step.label) {
        Some(caps) => format!("fase{}", &caps[1]),
        None => step.label.to_lowercase(),
    };
    if let Some(lines) = by_key.get(&key) {
        step.details.extend(lines.iter().cloned());
    }
    step
}

// ---------------------------------------------------------------------------
// Reconstructor
// ---------------------------------------------------------------------------

/// Registry of feature extractors plus the graph assembly that uses them.
pub struct Reconstructor {
    extractors: Vec<Box<dyn FeatureExtractor>>,
}

impl Default for Reconstructor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Reconstructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconstructor")
            .field("extractors", &self.extractor_names())
            .finish()
    }
}

impl Reconstructor {
    /// A reconstructor with the default extractor battery.
    pub fn new() -> Self {
        let mut r = Self::empty();
        r.register(AgentInvocation);
        r.register(SkillList);
        r.register(WaitPrompt);
        r.register(LoopLimit);
        r.register(FailureCondition);
        r
    }

    /// A reconstructor with no extractors: every step becomes a plain step.
    pub fn empty() -> Self {
        Self {
            extractors: Vec::new(),
        }
    }

    /// Add an extractor after the ones already registered.
    pub fn register(&mut self, extractor: impl FeatureExtractor + 'static) {
        self.extractors.push(Box::new(extractor));
    }

    pub fn extractor_names(&self) -> Vec<&str> {
        self.extractors.iter().map(|e| e.name()).collect()
    }

    pub fn features(&self, step: &PipelineStep) -> StepFeatures {
        let mut features = StepFeatures::default();
        for extractor in &self.extractors {
            extractor.extract(step, &mut features);
        }
        features
    }

    /// Build a linear start → ... → end graph from a command body.
    ///
    /// `name` and `description` come from the command's frontmatter.
    /// Agent names are resolved through `agents`; an unresolved agent
    /// leaves the node's agent unset.
    pub fn reconstruct(
        &self,
        body: &str,
        name: Option<&str>,
        description: Option<&str>,
        agents: &NameIndex,
    ) -> (Vec<FlowNode>, Vec<FlowEdge>) {
        let steps = split_steps(body, name, description);
        debug!(steps = steps.len(), "reconstructing command graph from markdown");

        let mut chain = Chain::start(StartData {
            label: Some(name.unwrap_or("Command").to_owned()),
            command_name: name.map(|n| {
                if n.starts_with('/') {
                    n.to_owned()
                } else {
                    format!("/{n}")
                }
            }),
        });

        for step in &steps {
            let features = self.features(step);
            let label = Some(step.label.clone());

            if let Some(agent_name) = &features.agent {
                let skills = if features.skills.is_empty() {
                    String::new()
                } else {
                    format!(" (skills: {})", features.skills.join(", "))
                };
                chain.push(NodeKind::Agent(AgentData {
                    label,
                    agent_id: agents.resolve(agent_name).map(str::to_owned),
                    prompt: Some(format!("Invocar {agent_name} agent{skills}")),
                }));

                if let Some(prompt) = features.prompt {
                    chain.push(NodeKind::Prompt(PromptData {
                        label: Some("Esperar aprobación".to_owned()),
                        prompt: Some(prompt),
                        placeholder: None,
                    }));
                    continue;
                }
                if let Some(condition) = features.condition {
                    chain.push(NodeKind::Condition(ConditionData {
                        label: Some("Check".to_owned()),
                        condition: Some(condition),
                    }));
                }
                if let Some(max) = features.max_iterations {
                    chain.push(NodeKind::Loop(LoopData {
                        label: Some(format!("Loop (max {max})")),
                        collection: None,
                        max_iterations: Some(max.to_string()),
                    }));
                }
                continue;
            }

            let kind = if let Some(prompt) = features.prompt {
                NodeKind::Prompt(PromptData {
                    label,
                    prompt: Some(prompt),
                    placeholder: None,
                })
            } else if let Some(max) = features.max_iterations {
                NodeKind::Loop(LoopData {
                    label,
                    collection: None,
                    max_iterations: Some(max.to_string()),
                })
            } else if let Some(condition) = features.condition {
                NodeKind::Condition(ConditionData {
                    label,
                    condition: Some(condition),
                })
            } else {
                let command = step
                    .details
                    .iter()
                    .take(3)
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join("; ");
                NodeKind::Step(ShellData {
                    label,
                    command: (!command.is_empty()).then_some(command),
                    working_dir: None,
                })
            };
            chain.push(kind);
        }

        chain.finish()
    }
}

/// Linear node chain laid out on one vertical column.
struct Chain {
    nodes: Vec<FlowNode>,
    edges: Vec<FlowEdge>,
    prev: String,
    y: f64,
}

impl Chain {
    fn start(data: StartData) -> Self {
        let id = generate_id();
        Self {
            nodes: vec![FlowNode::new(id.clone(), NodeKind::Start(data)).at(X_CENTER, 0.0)],
            edges: Vec::new(),
            prev: id,
            y: Y_STEP,
        }
    }

    fn push(&mut self, kind: NodeKind) {
        let id = generate_id();
        self.nodes
            .push(FlowNode::new(id.clone(), kind).at(X_CENTER, self.y));
        self.edges
            .push(FlowEdge::new(generate_id(), self.prev.clone(), id.clone()));
        self.prev = id;
        self.y += Y_STEP;
    }

    fn finish(mut self) -> (Vec<FlowNode>, Vec<FlowEdge>) {
        self.push(NodeKind::End(EndData::default()));
        (self.nodes, self.edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Agent, NodeType};

    fn types(nodes: &[FlowNode]) -> Vec<NodeType> {
        nodes.iter().map(FlowNode::node_type).collect()
    }

    fn no_agents() -> NameIndex {
        NameIndex::agents(&[])
    }

    #[test]
    fn plain_paragraph_becomes_single_step() {
        let (nodes, edges) = Reconstructor::new().reconstruct(
            "Just run the thing.\nNothing special here.",
            Some("deploy"),
            Some("Deploy the app"),
            &no_agents(),
        );
        assert_eq!(types(&nodes), vec![NodeType::Start, NodeType::Step, NodeType::End]);
        assert_eq!(edges.len(), 2);
        let NodeKind::Step(data) = &nodes[1].kind else {
            panic!("expected step, got {:?}", nodes[1].kind);
        };
        assert_eq!(data.label.as_deref(), Some("deploy"));
        assert_eq!(data.command.as_deref(), Some("Deploy the app"));
        let NodeKind::Start(start) = &nodes[0].kind else {
            panic!("expected start");
        };
        assert_eq!(start.command_name.as_deref(), Some("/deploy"));
    }

    #[test]
    fn layout_is_one_column() {
        let (nodes, _) =
            Reconstructor::new().reconstruct("", None, None, &no_agents());
        let ys: Vec<f64> = nodes.iter().map(|n| n.position.y).collect();
        assert_eq!(ys, vec![0.0, 160.0, 320.0]);
        assert!(nodes.iter().all(|n| n.position.x == 250.0));
    }

    #[test]
    fn edges_chain_every_node_in_order() {
        let body = "## Build\ncargo build\n## Test\ncargo test\n## Usage\n/ship [flags]\n";
        let (nodes, edges) = Reconstructor::new().reconstruct(body, None, None, &no_agents());
        assert_eq!(nodes.len(), 4, "usage heading is skipped");
        for (edge, pair) in edges.iter().zip(nodes.windows(2)) {
            assert_eq!(edge.source, pair[0].id);
            assert_eq!(edge.target, pair[1].id);
        }
        assert_eq!(nodes[1].display_name(), "Build");
        let NodeKind::Step(test) = &nodes[2].kind else {
            panic!("expected step");
        };
        assert_eq!(test.command.as_deref(), Some("cargo test"));
    }

    #[test]
    fn arrow_pipeline_with_agent_prompt_and_review() {
        let agents = vec![Agent {
            id: "a-spec".into(),
            name: "Spec".into(),
            ..Default::default()
        }];
        let body = "\
```
/feature
├──▶ FASE 1: Spec
│    Invocar: spec agent
│    Lee skills: arch, api-design
│    Esperar: \"¿Apruebas la spec?\"
├──▶ FASE 2: Review
│    Invocar review agent
│    Si FAIL → volver a FASE 1
│    Máximo 3 iteraciones
└──▶ Deploy
     npm run deploy
```
";
        let (nodes, _) = Reconstructor::new().reconstruct(
            body,
            Some("/feature"),
            None,
            &NameIndex::agents(&agents),
        );
        assert_eq!(
            types(&nodes),
            vec![
                NodeType::Start,
                NodeType::Agent,
                NodeType::Prompt,
                NodeType::Agent,
                NodeType::Condition,
                NodeType::Loop,
                NodeType::Step,
                NodeType::End,
            ]
        );

        let NodeKind::Agent(spec) = &nodes[1].kind else {
            panic!("expected agent");
        };
        assert_eq!(spec.agent_id.as_deref(), Some("a-spec"));
        assert_eq!(
            spec.prompt.as_deref(),
            Some("Invocar spec agent (skills: arch, api-design)")
        );

        let NodeKind::Prompt(wait) = &nodes[2].kind else {
            panic!("expected prompt");
        };
        assert_eq!(wait.prompt.as_deref(), Some("¿Apruebas la spec?"));

        let NodeKind::Agent(review) = &nodes[3].kind else {
            panic!("expected agent");
        };
        assert_eq!(review.agent_id, None, "unknown agent stays unset");

        let NodeKind::Loop(limit) = &nodes[5].kind else {
            panic!("expected loop");
        };
        assert_eq!(limit.max_iterations.as_deref(), Some("3"));
        assert_eq!(limit.label.as_deref(), Some("Loop (max 3)"));

        let NodeKind::Start(start) = &nodes[0].kind else {
            panic!("expected start");
        };
        assert_eq!(start.command_name.as_deref(), Some("/feature"));
    }

    #[test]
    fn arrow_steps_pick_up_matching_fase_section() {
        let body = "├──▶ FASE 2: Build\n\n## Fase 2 - Build\nInvoke builder agent\n";
        let steps = split_steps(body, None, None);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].details, vec!["Invoke builder agent"]);
    }

    #[test]
    fn registered_extractor_runs_after_defaults() {
        struct Approve;
        impl FeatureExtractor for Approve {
            fn name(&self) -> &str {
                "approve"
            }
            fn extract(&self, step: &PipelineStep, features: &mut StepFeatures) {
                if features.prompt.is_none() && step.full_text().contains("Approve?") {
                    features.prompt = Some("Approve?".into());
                }
            }
        }

        let mut r = Reconstructor::new();
        r.register(Approve);
        assert_eq!(r.extractor_names().last(), Some(&"approve"));

        let (nodes, _) = r.reconstruct("## Gate\nApprove? before merging\n", None, None, &no_agents());
        assert_eq!(nodes[1].node_type(), NodeType::Prompt);

        let (nodes, _) =
            Reconstructor::empty().reconstruct("## Gate\nEsperar: ok\n", None, None, &no_agents());
        assert_eq!(nodes[1].node_type(), NodeType::Step);
    }

    #[test]
    fn condition_requires_word_boundary() {
        let step = PipelineStep {
            label: "Analyse".into(),
            details: vec!["Farsi failures logged".into(), "if error then retry".into()],
        };
        let features = Reconstructor::new().features(&step);
        assert_eq!(features.condition.as_deref(), Some("if error then retry"));
    }
}
