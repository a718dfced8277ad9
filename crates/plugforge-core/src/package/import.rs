use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::command_file::parse_graph_block;
use super::{
    ArchiveError, ArchiveFormat, DEFAULT_EXPANDED_LIMIT, FileMap, NameIndex, ParsedPlugin,
    Reconstructor, read_archive_limited,
};
use crate::markdown::frontmatter;
use crate::model::{
    Agent, AgentContext, Command, Hook, HookAction, Mcp, Skill, SkillFile, generate_id,
};

static README_TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#[ \t]+(.+)").unwrap());

const DEFAULT_AGENT_MODEL: &str = "sonnet";

/// Errors from [`import_archive`].
///
/// Only failures to obtain or decode the archive itself surface here.
/// Problems inside individual package files never do: the offending file
/// is skipped and logged.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("import task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Read a `.zip` / `.tar.gz` / `.tgz` package from disk and parse it.
///
/// File I/O is async; decompression and parsing run on the blocking pool.
/// When `max_bytes` is set, larger files are rejected before being read and
/// the same limit caps the decompressed contents.
pub async fn import_archive(
    path: impl AsRef<Path>,
    max_bytes: Option<u64>,
) -> Result<ParsedPlugin, ImportError> {
    let path = path.as_ref();
    let read_err = |source| ImportError::Read {
        path: path.to_path_buf(),
        source,
    };

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if ArchiveFormat::from_file_name(&file_name).is_none() {
        return Err(ArchiveError::UnsupportedFormat(file_name).into());
    }

    if let Some(limit) = max_bytes {
        let size = tokio::fs::metadata(path).await.map_err(read_err)?.len();
        if size > limit {
            return Err(ArchiveError::TooLarge { size, limit }.into());
        }
    }

    let bytes = tokio::fs::read(path).await.map_err(read_err)?;
    info!(path = %path.display(), bytes = bytes.len(), "importing plugin archive");

    let plugin = tokio::task::spawn_blocking(move || -> Result<ParsedPlugin, ArchiveError> {
        let limit = max_bytes.unwrap_or(DEFAULT_EXPANDED_LIMIT);
        let extracted = read_archive_limited(&file_name, &bytes, limit)?;
        Ok(parse_plugin(
            &extracted.files,
            extracted.root_dir.as_deref(),
            &file_name,
        ))
    })
    .await??;

    Ok(plugin)
}

/// Rebuild a plugin from extracted package files with the default
/// reconstructor. See [`parse_plugin_with`].
pub fn parse_plugin(files: &FileMap, root_dir: Option<&str>, archive_name: &str) -> ParsedPlugin {
    parse_plugin_with(files, root_dir, archive_name, &Reconstructor::new())
}

/// Rebuild a plugin from extracted package files.
///
/// Phases run in dependency order so that each one can resolve names
/// against the previous ones: name, MCPs, skills, agents, commands, hooks.
/// `root_dir` and `archive_name` are only used as fallbacks for the plugin
/// name. Never fails; unusable files are skipped.
pub fn parse_plugin_with(
    files: &FileMap,
    root_dir: Option<&str>,
    archive_name: &str,
    reconstructor: &Reconstructor,
) -> ParsedPlugin {
    let manifest = files.get("plugin.json").and_then(|c| parse_json("plugin.json", c));

    let plugin_name = json_str(manifest.as_ref(), "name")
        .or_else(|| readme_title(files))
        .or_else(|| root_dir.filter(|r| !r.is_empty()).map(str::to_owned))
        .unwrap_or_else(|| ArchiveFormat::strip_extension(archive_name).to_owned());

    let mcps = files
        .get(".claude/settings.json")
        .map(|c| parse_mcps(c))
        .unwrap_or_default();
    let skills = parse_skills(files);

    let skill_index = NameIndex::skills(&skills);
    let mcp_index = NameIndex::mcps(&mcps);
    let agents: Vec<Agent> = files_in(files, "agents/", ".md")
        .map(|(stem, content)| parse_agent(stem, content, &skill_index, &mcp_index))
        .collect();

    let agent_index = NameIndex::agents(&agents);
    let commands: Vec<Command> = files_in(files, "commands/", ".md")
        .map(|(stem, content)| parse_command(stem, content, &agent_index, reconstructor))
        .collect();

    let hooks: Vec<Hook> = files_in(files, "hooks/", ".json")
        .filter_map(|(stem, content)| parse_hook(stem, content))
        .collect();

    let plugin = ParsedPlugin {
        plugin_name,
        version: json_str(manifest.as_ref(), "version"),
        skills,
        agents,
        commands,
        hooks,
        mcps,
    };
    info!(
        plugin = %plugin.plugin_name,
        skills = plugin.skills.len(),
        agents = plugin.agents.len(),
        commands = plugin.commands.len(),
        hooks = plugin.hooks.len(),
        mcps = plugin.mcps.len(),
        "parsed plugin package"
    );
    plugin
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_json(path: &str, content: &str) -> Option<Value> {
    match serde_json::from_str(content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(file = %path, error = %e, "skipping malformed JSON");
            None
        }
    }
}

fn json_str(value: Option<&Value>, key: &str) -> Option<String> {
    value?
        .get(key)?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn readme_title(files: &FileMap) -> Option<String> {
    let readme = files.get("README.md")?;
    let caps = README_TITLE_RE.captures(readme)?;
    Some(caps[1].trim().to_owned()).filter(|t| !t.is_empty())
}

/// `(stem, content)` of every file directly inside `dir` ending in `ext`.
fn files_in<'a>(
    files: &'a FileMap,
    dir: &'a str,
    ext: &'a str,
) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
    files.iter().filter_map(move |(path, content)| {
        let stem = path.strip_prefix(dir)?.strip_suffix(ext)?;
        (!stem.is_empty() && !stem.contains('/')).then_some((stem, content.as_str()))
    })
}

/// Language tag for a skill file, from its extension.
fn language_for(path: &str) -> String {
    let file = path.rsplit('/').next().unwrap_or(path);
    let Some((_, ext)) = file.rsplit_once('.') else {
        return String::new();
    };
    let ext = ext.to_ascii_lowercase();
    let language = match ext.as_str() {
        "md" | "markdown" => "markdown",
        "py" => "python",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" | "mjs" => "javascript",
        "sh" | "bash" => "bash",
        "rs" => "rust",
        "yml" | "yaml" => "yaml",
        "txt" => "text",
        _ => return ext,
    };
    language.to_owned()
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

fn parse_mcps(content: &str) -> Vec<Mcp> {
    let Some(settings) = parse_json(".claude/settings.json", content) else {
        return Vec::new();
    };
    let Some(servers) = settings.get("mcpServers").and_then(Value::as_object) else {
        debug!("settings.json has no mcpServers");
        return Vec::new();
    };

    servers
        .iter()
        .map(|(name, config)| {
            let configured_env_vars = config
                .get("env")
                .and_then(Value::as_object)
                .map(|env| {
                    env.iter()
                        .map(|(k, v)| {
                            let v = match v {
                                Value::String(s) => s.clone(),
                                other => other.to_string(),
                            };
                            (k.clone(), v)
                        })
                        .collect()
                })
                .unwrap_or_default();
            Mcp {
                id: generate_id(),
                name: name.clone(),
                transport: vec!["stdio".to_owned()],
                install_command: config
                    .get("command")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                configured_env_vars,
                is_configured: true,
                ..Default::default()
            }
        })
        .collect()
}

fn parse_skills(files: &FileMap) -> Vec<Skill> {
    #[derive(Default)]
    struct SkillDir<'a> {
        skill_md: Option<&'a str>,
        extra: Vec<(&'a str, &'a str)>,
    }

    let mut dirs: BTreeMap<&str, SkillDir<'_>> = BTreeMap::new();
    for (path, content) in files {
        let Some((slug, rest)) = path
            .strip_prefix("skills/")
            .and_then(|p| p.split_once('/'))
        else {
            continue;
        };
        if slug.is_empty() || rest.is_empty() {
            continue;
        }
        let dir = dirs.entry(slug).or_default();
        if rest == "SKILL.md" {
            dir.skill_md = Some(content.as_str());
        } else {
            dir.extra.push((rest, content.as_str()));
        }
    }

    dirs.into_iter()
        .filter_map(|(slug, dir)| {
            let Some(skill_md) = dir.skill_md else {
                warn!(skill = %slug, "skipping skill directory without SKILL.md");
                return None;
            };
            let (fm, body) = frontmatter::split(skill_md);
            Some(Skill {
                id: generate_id(),
                name: fm.get("name").unwrap_or(slug).to_owned(),
                description: fm.get("description").unwrap_or_default().to_owned(),
                content: body.trim().to_owned(),
                files: dir
                    .extra
                    .into_iter()
                    .map(|(path, content)| SkillFile {
                        path: path.to_owned(),
                        content: content.to_owned(),
                        language: language_for(path),
                    })
                    .collect(),
                ..Default::default()
            })
        })
        .collect()
}

fn parse_agent(stem: &str, content: &str, skills: &NameIndex, mcps: &NameIndex) -> Agent {
    let (fm, body) = frontmatter::split(content);

    let context = match fm.get("context").map(str::parse::<AgentContext>) {
        Some(Ok(context)) => context,
        Some(Err(e)) => {
            warn!(agent = %stem, error = %e, "unknown agent context, using fork");
            AgentContext::Fork
        }
        None => AgentContext::Fork,
    };

    Agent {
        id: generate_id(),
        name: fm.get("name").unwrap_or(stem).to_owned(),
        description: fm.get("description").unwrap_or_default().to_owned(),
        model: fm.get("model").unwrap_or(DEFAULT_AGENT_MODEL).to_owned(),
        context,
        allowed_tools: fm.get_list("allowedTools"),
        mcp_ids: mcps.resolve_all(&fm.get_list("mcps")),
        skill_ids: skills.resolve_all(&fm.get_list("skills")),
        instructions: body.trim().to_owned(),
    }
}

fn parse_command(
    stem: &str,
    content: &str,
    agents: &NameIndex,
    reconstructor: &Reconstructor,
) -> Command {
    let (fm, body) = frontmatter::split(content);
    let name = fm.get("name");
    let description = fm.get("description");

    let (mut nodes, mut edges) = parse_graph_block(body);
    if nodes.is_empty() {
        debug!(command = %stem, "no structured graph, reconstructing from markdown");
        (nodes, edges) = reconstructor.reconstruct(body, name, description, agents);
    }

    Command {
        id: generate_id(),
        name: name.unwrap_or(stem).to_owned(),
        description: description.unwrap_or_default().to_owned(),
        nodes,
        edges,
    }
}

fn parse_hook(stem: &str, content: &str) -> Option<Hook> {
    let value = parse_json(&format!("hooks/{stem}.json"), content)?;
    let text = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned()
    };

    Some(Hook {
        id: generate_id(),
        name: stem.to_owned(),
        enabled: value.get("enabled").and_then(Value::as_bool).unwrap_or(true),
        event: text("event"),
        matcher: text("matcher"),
        action: value
            .get("action")
            .map(HookAction::from_value)
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HookActionType, NodeType};
    use crate::package::{PluginFile, write_zip};

    fn files(entries: &[(&str, &str)]) -> FileMap {
        entries
            .iter()
            .map(|(p, c)| ((*p).to_owned(), (*c).to_owned()))
            .collect()
    }

    #[test]
    fn name_prefers_manifest_then_readme_then_root_then_archive() {
        let all = files(&[
            ("plugin.json", r#"{"name": "manifest", "version": "2.0.0"}"#),
            ("README.md", "intro\n# Readme Title\n"),
        ]);
        let parsed = parse_plugin(&all, Some("root"), "pkg.zip");
        assert_eq!(parsed.plugin_name, "manifest");
        assert_eq!(parsed.version.as_deref(), Some("2.0.0"));

        let readme = files(&[("plugin.json", "{broken"), ("README.md", "intro\n# Readme Title\n")]);
        assert_eq!(parse_plugin(&readme, Some("root"), "pkg.zip").plugin_name, "Readme Title");

        let bare = files(&[("plugin.json", r#"{"name": "  "}"#)]);
        assert_eq!(parse_plugin(&bare, Some("root"), "pkg.zip").plugin_name, "root");
        assert_eq!(parse_plugin(&bare, None, "pkg.tar.gz").plugin_name, "pkg");
        assert_eq!(parse_plugin(&bare, None, "pkg.tar.gz").version, None);
    }

    #[test]
    fn skills_need_skill_md_and_keep_aux_files() {
        let parsed = parse_plugin(
            &files(&[
                ("skills/arch/SKILL.md", "---\nname: arch\ndescription: Layers\n---\n\n# Arch\n\n"),
                ("skills/arch/scripts/check.py", "print()"),
                ("skills/orphan/notes.md", "no skill md here"),
            ]),
            None,
            "p.zip",
        );
        assert_eq!(parsed.skills.len(), 1);
        let skill = &parsed.skills[0];
        assert_eq!(skill.name, "arch");
        assert_eq!(skill.description, "Layers");
        assert_eq!(skill.content, "# Arch");
        assert_eq!(skill.files.len(), 1);
        assert_eq!(skill.files[0].path, "scripts/check.py");
        assert_eq!(skill.files[0].language, "python");
    }

    #[test]
    fn agent_references_resolve_by_name_and_drop_misses() {
        let parsed = parse_plugin(
            &files(&[
                (
                    ".claude/settings.json",
                    r#"{"mcpServers": {"github": {"command": "npx gh", "env": {"TOKEN": "${GH}"}}}}"#,
                ),
                ("skills/arch/SKILL.md", "---\nname: arch\n---\nbody"),
                (
                    "agents/dev.md",
                    "---\nname: Dev\ncontext: main\nallowedTools:\n  - Read\nskills:\n  - arch\n  - ghost\nmcps: [github, GitHub]\n---\nBuild it.\n",
                ),
                ("agents/nested/skip.md", "not an agent"),
            ]),
            None,
            "p.zip",
        );
        assert_eq!(parsed.mcps.len(), 1);
        let mcp = &parsed.mcps[0];
        assert!(mcp.is_configured);
        assert_eq!(mcp.transport, vec!["stdio"]);
        assert_eq!(mcp.configured_env_vars["TOKEN"], "${GH}");

        assert_eq!(parsed.agents.len(), 1);
        let agent = &parsed.agents[0];
        assert_eq!(agent.name, "Dev");
        assert_eq!(agent.model, "sonnet");
        assert_eq!(agent.context, AgentContext::Main);
        assert_eq!(agent.allowed_tools, vec!["Read"]);
        assert_eq!(agent.skill_ids, vec![parsed.skills[0].id.clone()]);
        assert_eq!(agent.mcp_ids, vec![mcp.id.clone()], "mcp names are case-sensitive");
        assert_eq!(agent.instructions, "Build it.");
    }

    #[test]
    fn commands_use_structured_block_or_reconstruct() {
        let structured = "---\nname: /ship\n---\n\nnodes:\n  - id: s\n    type: start\n  - id: e\n    type: end\nedges:\n  - id: e1\n    source: s\n    target: e\n";
        let parsed = parse_plugin(
            &files(&[
                ("commands/ship.md", structured),
                ("commands/notes.md", "Just some prose about the command."),
            ]),
            None,
            "p.zip",
        );
        let ship = parsed.commands.iter().find(|c| c.name == "/ship").unwrap();
        assert_eq!(ship.nodes.len(), 2);
        assert_eq!(ship.edges[0].id, "e1");

        let notes = parsed.commands.iter().find(|c| c.name == "notes").unwrap();
        let types: Vec<NodeType> = notes.nodes.iter().map(|n| n.node_type()).collect();
        assert_eq!(types, vec![NodeType::Start, NodeType::Step, NodeType::End]);
    }

    #[test]
    fn malformed_hook_is_skipped() {
        let parsed = parse_plugin(
            &files(&[
                ("hooks/broken.json", "{not json"),
                (
                    "hooks/fmt.json",
                    r#"{"event": "PostToolUse", "matcher": "*.rs", "enabled": false, "action": {"type": "mcp_call", "config": {"tool": "fmt"}}}"#,
                ),
                ("hooks/bare.json", "{}"),
            ]),
            None,
            "p.zip",
        );
        assert_eq!(parsed.hooks.len(), 2);
        let bare = parsed.hooks.iter().find(|h| h.name == "bare").unwrap();
        assert!(bare.enabled);
        assert_eq!(bare.action.action_type, HookActionType::Bash);
        let fmt = parsed.hooks.iter().find(|h| h.name == "fmt").unwrap();
        assert!(!fmt.enabled);
        assert_eq!(fmt.action.action_type, HookActionType::McpCall);
        assert_eq!(fmt.action.config["tool"], "fmt");
    }

    #[test]
    fn language_tags_from_extension() {
        assert_eq!(language_for("a/b/run.sh"), "bash");
        assert_eq!(language_for("schema.JSON"), "json");
        assert_eq!(language_for("Makefile"), "");
        assert_eq!(language_for("dir.v2/README"), "");
    }

    #[tokio::test]
    async fn import_rejects_unknown_extension_and_oversize() {
        let dir = tempfile::tempdir().unwrap();
        let txt = dir.path().join("plugin.txt");
        tokio::fs::write(&txt, b"hello").await.unwrap();
        let err = import_archive(&txt, None).await.unwrap_err();
        assert!(
            matches!(err, ImportError::Archive(ArchiveError::UnsupportedFormat(_))),
            "expected unsupported format, got: {err}"
        );

        let zip = dir.path().join("plugin.zip");
        tokio::fs::write(&zip, vec![0u8; 64]).await.unwrap();
        let err = import_archive(&zip, Some(10)).await.unwrap_err();
        assert!(
            matches!(err, ImportError::Archive(ArchiveError::TooLarge { size: 64, limit: 10 })),
            "expected too large, got: {err}"
        );
    }

    #[tokio::test]
    async fn import_rejects_archive_that_expands_past_limit() {
        let dir = tempfile::tempdir().unwrap();
        let big = "a".repeat(256 * 1024);
        let bytes = write_zip(&[
            PluginFile::new("plugin.json", "{\"name\":\"bomb\"}"),
            PluginFile::new("skills/big/SKILL.md", big),
        ])
        .unwrap();
        let path = dir.path().join("bomb.zip");
        tokio::fs::write(&path, &bytes).await.unwrap();

        let err = import_archive(&path, Some(8 * 1024)).await.unwrap_err();
        assert!(
            matches!(err, ImportError::Archive(ArchiveError::ExpandedTooLarge { limit: 8192 })),
            "expected expansion limit, got: {err}"
        );
    }

    #[tokio::test]
    async fn import_reports_missing_file() {
        let err = import_archive("/definitely/not/here.zip", None).await.unwrap_err();
        assert!(matches!(err, ImportError::Read { .. }), "expected read error, got: {err}");
    }
}
