use serde_json::json;
use tracing::{debug, warn};

use super::command_file::render_command_file;
use super::{ArchiveFormat, PluginFile, SlugAllocator, slugify};
use crate::markdown::Frontmatter;
use crate::model::{Agent, Hook, PluginState, Skill};

/// Expand a plugin into the files of a package.
///
/// Layout:
///
/// ```text
/// plugin.json
/// skills/<slug>/SKILL.md
/// skills/<slug>/<aux files>
/// agents/<slug>.md
/// commands/<slug>.md
/// hooks/<slug>.json
/// .claude/settings.json      (only when the plugin has MCPs)
/// ```
///
/// Agents reference skills and MCPs by name; references that do not
/// resolve are left out. The output depends only on `state`.
pub fn serialize_plugin(state: &PluginState) -> Vec<PluginFile> {
    let mut files = vec![PluginFile::new(
        "plugin.json",
        pretty(&json!({ "name": state.plugin_name, "version": state.version })),
    )];

    let mut slugs = SlugAllocator::new("skill");
    for skill in &state.skills {
        let slug = slugs.allocate(&skill.name);
        files.extend(skill_files(&slug, skill));
    }

    let mut slugs = SlugAllocator::new("agent");
    for agent in &state.agents {
        let slug = slugs.allocate(&agent.name);
        files.push(PluginFile::new(
            format!("agents/{slug}.md"),
            agent_file(agent, state),
        ));
    }

    let mut slugs = SlugAllocator::new("command");
    for command in &state.commands {
        let slug = slugs.allocate(&command.name);
        files.push(PluginFile::new(
            format!("commands/{slug}.md"),
            render_command_file(command),
        ));
    }

    let mut slugs = SlugAllocator::new("hook");
    for hook in &state.hooks {
        let slug = slugs.allocate(&hook.name);
        files.push(PluginFile::new(format!("hooks/{slug}.json"), hook_file(hook)));
    }

    if !state.mcps.is_empty() {
        files.push(PluginFile::new(".claude/settings.json", settings_file(state)));
    }

    debug!(plugin = %state.plugin_name, files = files.len(), "serialized plugin");
    files
}

/// `<slug><ext>` for the plugin, with `plugin` standing in for an empty slug.
pub fn default_archive_name(state: &PluginState, format: ArchiveFormat) -> String {
    let slug = slugify(&state.plugin_name);
    let stem = if slug.is_empty() { "plugin" } else { slug.as_str() };
    format!("{stem}{}", format.extension())
}

fn pretty(value: &serde_json::Value) -> String {
    format!("{value:#}\n")
}

fn with_body(frontmatter: Frontmatter, body: &str) -> String {
    let mut out = frontmatter.render();
    out.push('\n');
    out.push_str(body.trim_end());
    out.push('\n');
    out
}

fn skill_files(slug: &str, skill: &Skill) -> Vec<PluginFile> {
    let frontmatter = Frontmatter::new()
        .scalar("name", &skill.name)
        .scalar_if_set("description", &skill.description);

    let mut files = vec![PluginFile::new(
        format!("skills/{slug}/SKILL.md"),
        with_body(frontmatter, &skill.content),
    )];

    for aux in &skill.files {
        let path = aux.path.trim_start_matches('/');
        if path.is_empty() || path == "SKILL.md" || path.split('/').any(|part| part == "..") {
            warn!(skill = %skill.name, path = %aux.path, "skipping skill file with unusable path");
            continue;
        }
        files.push(PluginFile::new(
            format!("skills/{slug}/{path}"),
            aux.content.clone(),
        ));
    }
    files
}

fn agent_file(agent: &Agent, state: &PluginState) -> String {
    let mcps = agent
        .mcp_ids
        .iter()
        .filter_map(|id| state.mcp(id))
        .map(|m| m.name.as_str());
    let skills = agent
        .skill_ids
        .iter()
        .filter_map(|id| state.skill(id))
        .map(|s| s.name.as_str());

    let frontmatter = Frontmatter::new()
        .scalar("name", &agent.name)
        .scalar_if_set("description", &agent.description)
        .scalar_if_set("model", &agent.model)
        .scalar("context", agent.context.to_string())
        .list("allowedTools", &agent.allowed_tools)
        .list("mcps", mcps)
        .list("skills", skills);

    with_body(frontmatter, &agent.instructions)
}

fn hook_file(hook: &Hook) -> String {
    pretty(&json!({
        "event": hook.event,
        "matcher": hook.matcher,
        "enabled": hook.enabled,
        "action": {
            "type": hook.action.action_type.to_string(),
            "config": hook.action.config,
        },
    }))
}

fn settings_file(state: &PluginState) -> String {
    let mut servers = serde_json::Map::new();
    for mcp in &state.mcps {
        if servers.contains_key(&mcp.name) {
            warn!(mcp = %mcp.name, "duplicate MCP name, keeping the first server entry");
            continue;
        }
        servers.insert(
            mcp.name.clone(),
            json!({ "command": mcp.install_command, "env": mcp.configured_env_vars }),
        );
    }
    pretty(&json!({ "mcpServers": servers }))
}
