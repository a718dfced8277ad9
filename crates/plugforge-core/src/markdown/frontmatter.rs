//! The `---` delimited YAML header used by every markdown file in a plugin
//! package.
//!
//! Fields are read as text: strings, numbers and booleans become scalars,
//! sequences become lists of those. Nested mappings and nulls are ignored.

use serde_yaml::{Mapping, Value};
use tracing::warn;

const FENCE: &str = "---";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Scalar(String),
    List(Vec<String>),
}

/// Ordered frontmatter fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frontmatter {
    fields: Vec<(String, FieldValue)>,
}

impl Frontmatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Append a scalar field. A repeated key keeps its first position and
    /// takes the later value.
    pub fn scalar(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields
            .push((key.to_owned(), FieldValue::Scalar(value.into())));
        self
    }

    /// Append a scalar field only when `value` is non-empty.
    pub fn scalar_if_set(self, key: &str, value: &str) -> Self {
        if value.is_empty() {
            self
        } else {
            self.scalar(key, value)
        }
    }

    pub fn list<I, S>(mut self, key: &str, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items = items.into_iter().map(Into::into).collect();
        self.fields.push((key.to_owned(), FieldValue::List(items)));
        self
    }

    fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Scalar value of `key`. Blank values read as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        match self.field(key)? {
            FieldValue::Scalar(s) if !s.trim().is_empty() => Some(s.as_str()),
            _ => None,
        }
    }

    /// List value of `key`; a scalar reads as a one-item list.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        match self.field(key) {
            Some(FieldValue::List(items)) => items.clone(),
            Some(FieldValue::Scalar(s)) if !s.trim().is_empty() => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    fn to_mapping(&self) -> Mapping {
        self.fields
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    FieldValue::Scalar(s) => Value::String(s.clone()),
                    FieldValue::List(items) => {
                        Value::Sequence(items.iter().cloned().map(Value::String).collect())
                    }
                };
                (Value::String(key.clone()), value)
            })
            .collect()
    }

    /// Render as a fenced block ending in a newline.
    pub fn render(&self) -> String {
        let mut out = format!("{FENCE}\n");
        if !self.fields.is_empty() {
            match serde_yaml::to_string(&self.to_mapping()) {
                Ok(yaml) => out.push_str(&yaml),
                Err(e) => warn!(error = %e, "failed to render frontmatter"),
            }
        }
        out.push_str(FENCE);
        out.push('\n');
        out
    }
}

/// Split a document into its frontmatter and body.
///
/// A document without a leading fence, or with an unterminated one, has an
/// empty frontmatter and is returned whole as the body. A header that is
/// not a YAML mapping reads as empty frontmatter. The body has its leading
/// blank lines removed.
pub fn split(doc: &str) -> (Frontmatter, &str) {
    let doc = doc.strip_prefix('\u{feff}').unwrap_or(doc);
    let Some(rest) = strip_fence_line(doc) else {
        return (Frontmatter::default(), doc);
    };

    let mut offset = 0;
    let mut header_end = None;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == FENCE {
            header_end = Some((offset, offset + line.len()));
            break;
        }
        offset += line.len();
    }
    let Some((header_len, body_start)) = header_end else {
        return (Frontmatter::default(), doc);
    };

    let frontmatter = parse_header(&rest[..header_len]);
    let body = rest[body_start..].trim_start_matches(['\n', '\r']);
    (frontmatter, body)
}

fn strip_fence_line(doc: &str) -> Option<&str> {
    let rest = doc.strip_prefix(FENCE)?;
    rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n'))
}

fn parse_header(header: &str) -> Frontmatter {
    if header.trim().is_empty() {
        return Frontmatter::default();
    }
    let mapping = match serde_yaml::from_str::<Mapping>(header) {
        Ok(mapping) => mapping,
        Err(e) => {
            warn!(error = %e, "ignoring malformed frontmatter");
            return Frontmatter::default();
        }
    };

    let fields = mapping
        .iter()
        .filter_map(|(key, value)| {
            let key = text(key)?;
            let value = match value {
                Value::Sequence(items) => FieldValue::List(items.iter().filter_map(text).collect()),
                other => FieldValue::Scalar(text(other)?),
            };
            Some((key, value))
        })
        .collect();
    Frontmatter { fields }
}

/// A scalar YAML value as text.
pub(crate) fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
