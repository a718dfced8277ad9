//! Entity and graph data model.

pub mod entities;
pub mod graph;
pub mod ids;

pub use entities::{
    Agent, AgentContext, ChangelogEntry, Hook, HookAction, HookActionType, Mcp, McpTool,
    PluginDependency, PluginState, Skill, SkillFile, SkillSource,
};
pub use graph::{
    AgentData, Command, ConditionData, EndData, FlowEdge, FlowNode, LoopData, McpData, NodeKind,
    NodeType, NodeTypeParseError, NotifyData, ParallelData, Position, PromptData, ShellData,
    SkillData, StartData, TemplateData, VariableData,
};
pub use graph::handles;
pub use ids::generate_id;
