//! The portable package format.
//!
//! A package is a directory-shaped set of text files (see [`serialize_plugin`]
//! for the layout) shipped as a `.zip` or `.tar.gz`. Export turns a
//! [`PluginState`] into [`PluginFile`]s and hands them to an archiver;
//! import extracts an archive into a [`FileMap`] and rebuilds a
//! [`ParsedPlugin`] from it, best effort.

mod archive;
mod command_file;
mod export;
mod import;
mod names;
pub mod reconstruct;

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::model::{Agent, Command, Hook, Mcp, PluginState, Skill};

pub use archive::{
    ArchiveError, ArchiveFormat, DEFAULT_EXPANDED_LIMIT, ExtractedArchive, read_archive,
    read_archive_limited, read_tar_gz, read_tar_gz_limited, read_zip, read_zip_limited,
    write_archive, write_tar_gz, write_zip,
};
pub use export::{default_archive_name, serialize_plugin};
pub use import::{ImportError, import_archive, parse_plugin, parse_plugin_with};
pub use names::NameIndex;
pub use reconstruct::{FeatureExtractor, PipelineStep, Reconstructor, StepFeatures};

/// Extracted archive contents: relative path to UTF-8 text.
pub type FileMap = BTreeMap<String, String>;

/// One file of an exported package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginFile {
    /// Relative, `/`-separated path.
    pub path: String,
    pub content: String,
}

impl PluginFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Entities rebuilt from a package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParsedPlugin {
    pub plugin_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub skills: Vec<Skill>,
    pub agents: Vec<Agent>,
    pub commands: Vec<Command>,
    pub hooks: Vec<Hook>,
    pub mcps: Vec<Mcp>,
}

impl ParsedPlugin {
    /// A fresh plugin snapshot holding these entities.
    pub fn into_state(self) -> PluginState {
        PluginState {
            plugin_name: self.plugin_name,
            version: self
                .version
                .unwrap_or_else(|| PluginState::INITIAL_VERSION.to_owned()),
            skills: self.skills,
            agents: self.agents,
            commands: self.commands,
            hooks: self.hooks,
            mcps: self.mcps,
            changelog: Vec::new(),
            dependencies: Vec::new(),
        }
    }
}

/// Lowercase `name`, collapse every run of non-alphanumerics to `-`, and
/// trim `-` from both ends.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Hands out slugs that are unique within one entity kind.
#[derive(Debug)]
pub(crate) struct SlugAllocator {
    fallback: &'static str,
    taken: HashSet<String>,
}

impl SlugAllocator {
    pub(crate) fn new(fallback: &'static str) -> Self {
        Self {
            fallback,
            taken: HashSet::new(),
        }
    }

    /// Slug of `name`, or the fallback when it is empty, suffixed with
    /// `-2`, `-3`, ... on collision.
    pub(crate) fn allocate(&mut self, name: &str) -> String {
        let mut base = slugify(name);
        if base.is_empty() {
            base = self.fallback.to_owned();
        }
        let mut slug = base.clone();
        let mut n = 2;
        while !self.taken.insert(slug.clone()) {
            slug = format!("{base}-{n}");
            n += 1;
        }
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_and_trims() {
        assert_eq!(slugify("My Cool Plugin!"), "my-cool-plugin");
        assert_eq!(slugify("/deploy"), "deploy");
        assert_eq!(slugify("--API   design--"), "api-design");
        assert_eq!(slugify("Añejo"), "a-ejo");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn allocator_dedupes_and_falls_back() {
        let mut slugs = SlugAllocator::new("skill");
        assert_eq!(slugs.allocate("Arch"), "arch");
        assert_eq!(slugs.allocate("arch"), "arch-2");
        assert_eq!(slugs.allocate("ARCH!"), "arch-3");
        assert_eq!(slugs.allocate("???"), "skill");
        assert_eq!(slugs.allocate(""), "skill-2");
    }

    #[test]
    fn parsed_plugin_defaults_version() {
        let state = ParsedPlugin {
            plugin_name: "demo".into(),
            ..Default::default()
        }
        .into_state();
        assert_eq!(state.version, "0.1.0");
        assert_eq!(state.plugin_name, "demo");
    }
}
