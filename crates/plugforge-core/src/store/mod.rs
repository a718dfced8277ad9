//! Mutable owner of one plugin's entities.
//!
//! [`PluginStore`] applies edits to a [`PluginState`] and keeps its version
//! and changelog current. It never persists anything itself: callers take a
//! [`PluginStore::snapshot`] when they want to save, validate, or export.

mod version;

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::model::{
    Agent, ChangelogEntry, Command, Hook, Mcp, PluginDependency, PluginState, Skill, SkillSource,
    generate_id,
};
use crate::package::ParsedPlugin;

pub use version::{VersionBump, VersionBumpParseError, bump};

/// Changes recorded closer together than this share one changelog entry.
const COALESCE_WINDOW_SECS: i64 = 5 * 60;

// ---------------------------------------------------------------------------
// Entity access shared by the per-kind operations
// ---------------------------------------------------------------------------

trait Entity {
    const KIND: &'static str;
    fn id(&self) -> &str;
    fn name(&self) -> &str;
}

macro_rules! impl_entity {
    ($ty:ty, $kind:literal) => {
        impl Entity for $ty {
            const KIND: &'static str = $kind;
            fn id(&self) -> &str {
                &self.id
            }
            fn name(&self) -> &str {
                &self.name
            }
        }
    };
}

impl_entity!(Skill, "skill");
impl_entity!(Agent, "agent");
impl_entity!(Mcp, "MCP");
impl_entity!(Hook, "hook");
impl_entity!(Command, "command");

fn update_in<T: Entity>(items: &mut [T], id: &str, f: impl FnOnce(&mut T)) -> bool {
    match items.iter_mut().find(|item| item.id() == id) {
        Some(item) => {
            f(item);
            true
        }
        None => false,
    }
}

fn take_from<T: Entity>(items: &mut Vec<T>, id: &str) -> Option<T> {
    let pos = items.iter().position(|item| item.id() == id)?;
    Some(items.remove(pos))
}

// ---------------------------------------------------------------------------
// PluginStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginStore {
    state: PluginState,
}

impl PluginStore {
    pub fn new(plugin_name: impl Into<String>) -> Self {
        Self {
            state: PluginState {
                plugin_name: plugin_name.into(),
                ..Default::default()
            },
        }
    }

    pub fn from_state(state: PluginState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &PluginState {
        &self.state
    }

    /// Owned copy of the current entities.
    pub fn snapshot(&self) -> PluginState {
        self.state.clone()
    }

    pub fn into_state(self) -> PluginState {
        self.state
    }

    pub fn set_plugin_name(&mut self, name: impl Into<String>) {
        self.state.plugin_name = name.into();
    }

    // -- skills -------------------------------------------------------------

    /// Returns `false` without changing anything when a skill with the same
    /// name already exists.
    pub fn add_skill(&mut self, skill: Skill) -> bool {
        if self.state.skills.iter().any(|s| s.name == skill.name) {
            debug!(name = %skill.name, "skill name already taken");
            return false;
        }
        self.record_added(&skill);
        self.state.skills.push(skill);
        true
    }

    pub fn update_skill(&mut self, id: &str, f: impl FnOnce(&mut Skill)) -> bool {
        update_in(&mut self.state.skills, id, f)
    }

    pub fn remove_skill(&mut self, id: &str) -> Option<Skill> {
        let removed = take_from(&mut self.state.skills, id)?;
        self.record_removed(&removed);
        Some(removed)
    }

    // -- agents -------------------------------------------------------------

    pub fn add_agent(&mut self, agent: Agent) -> bool {
        if self.state.agents.iter().any(|a| a.name == agent.name) {
            debug!(name = %agent.name, "agent name already taken");
            return false;
        }
        self.record_added(&agent);
        self.state.agents.push(agent);
        true
    }

    pub fn update_agent(&mut self, id: &str, f: impl FnOnce(&mut Agent)) -> bool {
        update_in(&mut self.state.agents, id, f)
    }

    pub fn remove_agent(&mut self, id: &str) -> Option<Agent> {
        let removed = take_from(&mut self.state.agents, id)?;
        self.record_removed(&removed);
        Some(removed)
    }

    // -- MCPs ---------------------------------------------------------------

    pub fn add_mcp(&mut self, mcp: Mcp) {
        self.record_added(&mcp);
        self.state.mcps.push(mcp);
    }

    pub fn update_mcp(&mut self, id: &str, f: impl FnOnce(&mut Mcp)) -> bool {
        update_in(&mut self.state.mcps, id, f)
    }

    pub fn remove_mcp(&mut self, id: &str) -> Option<Mcp> {
        let removed = take_from(&mut self.state.mcps, id)?;
        self.record_removed(&removed);
        Some(removed)
    }

    // -- commands -----------------------------------------------------------

    pub fn add_command(&mut self, command: Command) -> bool {
        if self.state.commands.iter().any(|c| c.name == command.name) {
            debug!(name = %command.name, "command name already taken");
            return false;
        }
        self.record_added(&command);
        self.state.commands.push(command);
        true
    }

    pub fn update_command(&mut self, id: &str, f: impl FnOnce(&mut Command)) -> bool {
        update_in(&mut self.state.commands, id, f)
    }

    pub fn remove_command(&mut self, id: &str) -> Option<Command> {
        let removed = take_from(&mut self.state.commands, id)?;
        self.record_removed(&removed);
        Some(removed)
    }

    // -- hooks --------------------------------------------------------------

    pub fn add_hook(&mut self, hook: Hook) {
        self.record_added(&hook);
        self.state.hooks.push(hook);
    }

    pub fn update_hook(&mut self, id: &str, f: impl FnOnce(&mut Hook)) -> bool {
        update_in(&mut self.state.hooks, id, f)
    }

    pub fn remove_hook(&mut self, id: &str) -> Option<Hook> {
        let removed = take_from(&mut self.state.hooks, id)?;
        self.record_removed(&removed);
        Some(removed)
    }

    /// Flip a hook's enabled flag. Returns the new value.
    pub fn toggle_hook(&mut self, id: &str) -> Option<bool> {
        let hook = self.state.hooks.iter_mut().find(|h| h.id == id)?;
        hook.enabled = !hook.enabled;
        Some(hook.enabled)
    }

    // -- versioning ---------------------------------------------------------

    /// Bump the version explicitly. Always starts a new changelog entry.
    pub fn bump_version(&mut self, kind: VersionBump) {
        self.bump_version_at(kind, Utc::now());
    }

    fn bump_version_at(&mut self, kind: VersionBump, now: DateTime<Utc>) {
        let version = bump(&self.state.version, kind);
        self.state.changelog.insert(
            0,
            ChangelogEntry {
                version: version.clone(),
                timestamp: now,
                changes: vec![format!("Version bump: {kind}")],
            },
        );
        self.state.version = version;
    }

    fn record_added<T: Entity>(&mut self, entity: &T) {
        self.record_change(format!("Added {}: {}", T::KIND, entity.name()));
    }

    fn record_removed<T: Entity>(&mut self, entity: &T) {
        self.record_change(format!("Removed {}: {}", T::KIND, entity.name()));
    }

    fn record_change(&mut self, change: String) {
        self.record_change_at(change, Utc::now());
    }

    /// Patch-bump the version and log `change`, folding it into the newest
    /// changelog entry when that entry is recent enough.
    fn record_change_at(&mut self, change: String, now: DateTime<Utc>) {
        let version = bump(&self.state.version, VersionBump::Patch);
        let window = Duration::seconds(COALESCE_WINDOW_SECS);

        match self.state.changelog.first_mut() {
            Some(latest) if now - latest.timestamp < window => {
                latest.version = version.clone();
                latest.changes.push(change);
            }
            _ => self.state.changelog.insert(
                0,
                ChangelogEntry {
                    version: version.clone(),
                    timestamp: now,
                    changes: vec![change],
                },
            ),
        }
        self.state.version = version;
    }

    // -- bulk replacement ---------------------------------------------------

    /// Replace every collection with the contents of an imported package.
    ///
    /// The version falls back to the initial version; changelog and
    /// dependencies start empty.
    pub fn import_plugin(&mut self, parsed: ParsedPlugin) {
        self.state = parsed.into_state();
    }

    // -- dependencies -------------------------------------------------------

    /// Copy the selected skills and agents of another plugin into this one.
    ///
    /// Entities whose id is already present are skipped. Copied skills are
    /// marked as registry-sourced with a `library:<plugin name>` source URL.
    /// Returns the recorded dependency, or `None` when nothing was copied.
    pub fn import_dependency(
        &mut self,
        source_plugin_id: &str,
        source: &PluginState,
        skill_ids: &[String],
        agent_ids: &[String],
    ) -> Option<PluginDependency> {
        let mut imported_skill_ids = Vec::new();
        for skill in source.skills.iter().filter(|s| skill_ids.contains(&s.id)) {
            if self.state.skill(&skill.id).is_some() {
                debug!(skill = %skill.id, "skill already present, not re-imported");
                continue;
            }
            self.state.skills.push(Skill {
                source: SkillSource::Registry,
                source_url: Some(format!("library:{}", source.plugin_name)),
                ..skill.clone()
            });
            imported_skill_ids.push(skill.id.clone());
        }

        let mut imported_agent_ids = Vec::new();
        for agent in source.agents.iter().filter(|a| agent_ids.contains(&a.id)) {
            if self.state.agent(&agent.id).is_some() {
                debug!(agent = %agent.id, "agent already present, not re-imported");
                continue;
            }
            self.state.agents.push(agent.clone());
            imported_agent_ids.push(agent.id.clone());
        }

        if imported_skill_ids.is_empty() && imported_agent_ids.is_empty() {
            return None;
        }

        let dependency = PluginDependency {
            id: generate_id(),
            source_plugin_id: source_plugin_id.to_owned(),
            source_plugin_name: source.plugin_name.clone(),
            imported_skill_ids,
            imported_agent_ids,
        };
        self.state.dependencies.push(dependency.clone());
        Some(dependency)
    }

    /// Every skill and agent id brought in by a recorded dependency.
    pub fn already_imported_ids(&self) -> HashSet<String> {
        self.state
            .dependencies
            .iter()
            .flat_map(|d| d.imported_skill_ids.iter().chain(&d.imported_agent_ids))
            .cloned()
            .collect()
    }

    /// Drop a dependency record together with the skills and agents it
    /// imported.
    pub fn remove_dependency(&mut self, id: &str) -> bool {
        let Some(pos) = self.state.dependencies.iter().position(|d| d.id == id) else {
            return false;
        };
        let dependency = self.state.dependencies.remove(pos);
        self.state
            .skills
            .retain(|s| !dependency.imported_skill_ids.contains(&s.id));
        self.state
            .agents
            .retain(|a| !dependency.imported_agent_ids.contains(&a.id));
        true
    }
}
