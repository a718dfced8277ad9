//! Core of plugforge: the typed command-pipeline graph, the analyses that
//! run over it, and the portable package format it is exported to and
//! imported from.
//!
//! Every analysis here is a pure function over an owned or borrowed
//! [`model::PluginState`] snapshot. Only [`package::import_archive`] touches
//! the filesystem.

pub mod graph;
pub mod markdown;
pub mod model;
pub mod package;
pub mod simulate;
pub mod store;
pub mod validate;

pub use graph::{Linearization, linearize, linearize_detailed};
pub use markdown::generate_command_markdown;
pub use model::{
    Agent, Command, FlowEdge, FlowNode, Hook, Mcp, NodeKind, NodeType, PluginState, Skill,
    generate_id,
};
pub use simulate::{SimulationResult, SimulationStep, StepStatus, simulate_command};
pub use store::PluginStore;
pub use validate::{Severity, ValidationIssue, ValidationReport, validate_plugin};
