use std::collections::HashMap;

use tracing::debug;

use crate::model::{Agent, Mcp, Skill};

/// Resolves display names to ids for one entity kind.
///
/// Packages reference entities by name; everything in memory references
/// them by id. Each import phase builds one index over the entities parsed
/// so far and resolves through it. A name that does not resolve is dropped.
/// When two entities share a name, the first one wins.
#[derive(Debug, Clone, Default)]
pub struct NameIndex {
    kind: &'static str,
    case_insensitive: bool,
    ids: HashMap<String, String>,
}

impl NameIndex {
    fn build<'a>(
        kind: &'static str,
        case_insensitive: bool,
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let mut index = Self {
            kind,
            case_insensitive,
            ids: HashMap::new(),
        };
        for (name, id) in pairs {
            let key = index.key(name);
            index.ids.entry(key).or_insert_with(|| id.to_owned());
        }
        index
    }

    /// Exact-match index over `(name, id)` pairs.
    pub fn exact<'a>(kind: &'static str, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self::build(kind, false, pairs)
    }

    /// Case-insensitive index over `(name, id)` pairs.
    pub fn case_insensitive<'a>(
        kind: &'static str,
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        Self::build(kind, true, pairs)
    }

    pub fn skills(skills: &[Skill]) -> Self {
        Self::exact("skill", skills.iter().map(|s| (s.name.as_str(), s.id.as_str())))
    }

    pub fn mcps(mcps: &[Mcp]) -> Self {
        Self::exact("MCP", mcps.iter().map(|m| (m.name.as_str(), m.id.as_str())))
    }

    /// Agents are matched case-insensitively; reconstructed commands name
    /// them in free text.
    pub fn agents(agents: &[Agent]) -> Self {
        Self::case_insensitive("agent", agents.iter().map(|a| (a.name.as_str(), a.id.as_str())))
    }

    fn key(&self, name: &str) -> String {
        if self.case_insensitive {
            name.to_lowercase()
        } else {
            name.to_owned()
        }
    }

    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.ids.get(&self.key(name)).map(String::as_str)
    }

    /// Resolve every name, silently dropping the ones that do not resolve.
    pub fn resolve_all(&self, names: &[String]) -> Vec<String> {
        names
            .iter()
            .filter_map(|name| {
                let id = self.resolve(name);
                if id.is_none() {
                    debug!(kind = self.kind, name = %name, "dropping unresolved reference");
                }
                id.map(str::to_owned)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_index_is_case_sensitive() {
        let index = NameIndex::exact("skill", [("arch", "s1"), ("API", "s2")]);
        assert_eq!(index.resolve("arch"), Some("s1"));
        assert_eq!(index.resolve("Arch"), None);
        assert_eq!(index.resolve("API"), Some("s2"));
    }

    #[test]
    fn case_insensitive_index() {
        let agents = vec![Agent {
            id: "a1".into(),
            name: "Reviewer".into(),
            ..Default::default()
        }];
        let index = NameIndex::agents(&agents);
        assert_eq!(index.resolve("reviewer"), Some("a1"));
        assert_eq!(index.resolve("REVIEWER"), Some("a1"));
    }

    #[test]
    fn first_duplicate_wins_and_misses_drop() {
        let index = NameIndex::exact("MCP", [("gh", "m1"), ("gh", "m2")]);
        let ids = index.resolve_all(&["gh".into(), "missing".into(), "gh".into()]);
        assert_eq!(ids, vec!["m1", "m1"]);
    }
}
