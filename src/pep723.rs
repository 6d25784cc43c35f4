//! PEP 723 inline script metadata.
//!
//! A metadata block is a run of comment lines embedded in a Python script:
//!
//! ```python
//! # /// script
//! # requires-python = ">=3.11"
//! # dependencies = [
//! #     "numpy",
//! #     "requests>=2.28.0",
//! # ]
//! #
//! # [tool.juv]
//! # jupyter = "lab"
//! # ///
//! ```
//!
//! [`locate`] finds the block's line span, [`MetadataBlock::find`] parses it,
//! and [`MetadataBlock::serialize`] writes it back in a deterministic form.

use crate::specifier::{Requirement, SpecifierError, VersionConstraint};
use std::collections::BTreeMap;
use std::ops::Range;
use thiserror::Error;
use toml::{Table, Value};

pub const START_MARKER: &str = "# /// script";
pub const END_MARKER: &str = "# ///";
pub(crate) const TYPE_MARKER_PREFIX: &str = "# /// ";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed metadata block delimiters: {0}")]
    MalformedDelimiter(String),
    #[error("multiple `script` metadata blocks found (lines {first} and {second})")]
    DuplicateBlock { first: usize, second: usize },
    #[error("invalid TOML in metadata block: {0}")]
    InvalidSyntax(#[from] toml::de::Error),
    #[error("invalid `{key}` in metadata block: {reason}")]
    InvalidField { key: String, reason: String },
    #[error("dependency `{0}` is declared more than once")]
    DuplicateDependency(String),
    #[error("no `script` metadata block found")]
    Missing,
    #[error("unsupported notebook format version {major}.{minor} (expected 4.0 to 4.5)")]
    UnsupportedFormatVersion { major: u64, minor: u64 },
    #[error("invalid notebook: {0}")]
    InvalidSchema(String),
}

pub type Result<T> = std::result::Result<T, ParseError>;

fn content(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

fn is_comment_line(line: &str) -> bool {
    line == "#" || line.starts_with("# ")
}

/// Find the line span of the `script` block, if any.
///
/// Lines may carry their line terminators. The end marker is the last
/// `# ///` line of the comment run that follows the start marker, matching
/// the reference regular expression in PEP 723.
pub fn locate<S: AsRef<str>>(lines: &[S]) -> Result<Option<Range<usize>>> {
    let mut found: Option<Range<usize>> = None;
    let mut i = 0;

    while i < lines.len() {
        if content(lines[i].as_ref()) != START_MARKER {
            i += 1;
            continue;
        }

        let end = find_end(lines, i)?;
        if let Some(previous) = &found {
            return Err(ParseError::DuplicateBlock {
                first: previous.start + 1,
                second: i + 1,
            });
        }
        found = Some(i..end + 1);
        i = end + 1;
    }

    Ok(found)
}

fn find_end<S: AsRef<str>>(lines: &[S], start: usize) -> Result<usize> {
    let mut end = None;

    for (offset, line) in lines[start + 1..].iter().enumerate() {
        let index = start + 1 + offset;
        let line = content(line.as_ref());
        if !is_comment_line(line) {
            break;
        }
        if line == END_MARKER {
            end = Some(index);
        } else if line.starts_with(TYPE_MARKER_PREFIX) {
            // A new typed block right after a closed one ends this run.
            if end.is_some() {
                break;
            }
            return Err(ParseError::MalformedDelimiter(format!(
                "`{line}` on line {} is nested inside the block opened on line {}",
                index + 1,
                start + 1
            )));
        }
    }

    end.ok_or_else(|| {
        ParseError::MalformedDelimiter(format!(
            "block opened on line {} has no closing `{END_MARKER}`",
            start + 1
        ))
    })
}

/// Strip the comment prefix from the interior lines of a located block.
pub fn interior<S: AsRef<str>>(block_lines: &[S]) -> String {
    let inner = match block_lines.len() {
        0..=2 => &block_lines[0..0],
        n => &block_lines[1..n - 1],
    };
    inner
        .iter()
        .map(|line| {
            let line = content(line.as_ref());
            line.strip_prefix("# ")
                .or_else(|| line.strip_prefix('#'))
                .unwrap_or(line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Cheap check used before committing to a full parse.
pub fn has_script_metadata(text: &str) -> bool {
    text.lines().any(|line| line == START_MARKER)
}

/// Parsed contents of a `script` block.
///
/// Dependencies are unique by normalized package name and always iterate
/// in ascending name order. Tool tables and unknown top-level keys are kept
/// as opaque TOML values in their original key order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataBlock {
    dependencies: BTreeMap<String, Requirement>,
    requires_python: Option<VersionConstraint>,
    tool: Table,
    extra: Table,
}

impl MetadataBlock {
    /// Parse the block embedded in `text`, failing if there is none.
    pub fn parse(text: &str) -> Result<Self> {
        Self::find(text)?.ok_or(ParseError::Missing)
    }

    /// Parse the block embedded in `text`, if there is one.
    pub fn find(text: &str) -> Result<Option<Self>> {
        let lines: Vec<&str> = text.lines().collect();
        match locate(&lines)? {
            Some(span) => Self::from_toml(&interior(&lines[span])).map(Some),
            None => Ok(None),
        }
    }

    /// Build a block from the TOML document found between the markers.
    pub fn from_toml(source: &str) -> Result<Self> {
        let mut table: Table = source.parse()?;
        let mut block = Self::default();

        if let Some(value) = table.remove("requires-python") {
            let raw = value.as_str().ok_or_else(|| ParseError::InvalidField {
                key: "requires-python".into(),
                reason: "expected a string".into(),
            })?;
            let constraint = raw.parse().map_err(|e: SpecifierError| ParseError::InvalidField {
                key: "requires-python".into(),
                reason: e.to_string(),
            })?;
            block.requires_python = Some(constraint);
        }

        if let Some(value) = table.remove("dependencies") {
            let Value::Array(items) = value else {
                return Err(ParseError::InvalidField {
                    key: "dependencies".into(),
                    reason: "expected an array of strings".into(),
                });
            };
            for item in items {
                let raw = item.as_str().ok_or_else(|| ParseError::InvalidField {
                    key: "dependencies".into(),
                    reason: format!("expected a string, found `{item}`"),
                })?;
                let requirement: Requirement =
                    raw.parse().map_err(|e: SpecifierError| ParseError::InvalidField {
                        key: "dependencies".into(),
                        reason: format!("`{raw}`: {e}"),
                    })?;
                let key = requirement.normalized_name();
                if block.dependencies.contains_key(&key) {
                    return Err(ParseError::DuplicateDependency(requirement.name));
                }
                block.dependencies.insert(key, requirement);
            }
        }

        if let Some(value) = table.remove("tool") {
            let Value::Table(tool) = value else {
                return Err(ParseError::InvalidField {
                    key: "tool".into(),
                    reason: "expected a table".into(),
                });
            };
            block.tool = tool;
        }

        block.extra = table;
        Ok(block)
    }

    /// Dependencies in ascending normalized-name order.
    pub fn dependencies(&self) -> impl Iterator<Item = &Requirement> {
        self.dependencies.values()
    }

    /// Dependencies rendered as specifier strings, in serialization order.
    pub fn dependency_strings(&self) -> Vec<String> {
        self.dependencies().map(ToString::to_string).collect()
    }

    pub fn dependency(&self, name: &str) -> Option<&Requirement> {
        self.dependencies
            .get(&crate::specifier::normalize_name(name))
    }

    pub fn requires_python(&self) -> Option<&VersionConstraint> {
        self.requires_python.as_ref()
    }

    /// All `[tool.*]` tables.
    pub fn tool_tables(&self) -> &Table {
        &self.tool
    }

    /// The `[tool.<namespace>]` table, if present.
    pub fn tool(&self, namespace: &str) -> Option<&Table> {
        self.tool.get(namespace).and_then(Value::as_table)
    }

    pub(crate) fn dependencies_mut(&mut self) -> &mut BTreeMap<String, Requirement> {
        &mut self.dependencies
    }

    pub(crate) fn set_requires_python_unchecked(&mut self, constraint: Option<VersionConstraint>) {
        self.requires_python = constraint;
    }

    pub(crate) fn tool_mut(&mut self) -> &mut Table {
        &mut self.tool
    }

    /// The TOML document between the markers, without comment prefixes.
    pub fn to_toml(&self) -> String {
        let mut out = String::new();

        if let Some(constraint) = &self.requires_python {
            out.push_str(&format!(
                "requires-python = {}\n",
                Value::String(constraint.to_string())
            ));
        }

        if self.dependencies.is_empty() {
            out.push_str("dependencies = []\n");
        } else {
            out.push_str("dependencies = [\n");
            for requirement in self.dependencies.values() {
                out.push_str(&format!("    {},\n", Value::String(requirement.to_string())));
            }
            out.push_str("]\n");
        }

        let mut rest = self.extra.clone();
        if !self.tool.is_empty() {
            rest.insert("tool".into(), Value::Table(self.tool.clone()));
        }
        if !rest.is_empty() {
            // A `Table` of plain TOML values always has a document form.
            let rendered = toml::to_string(&rest).unwrap_or_default();
            if rendered.trim_start().starts_with('[') {
                out.push('\n');
            }
            out.push_str(&rendered);
        }

        out
    }

    /// The full comment block, markers included, ending with a newline.
    pub fn serialize(&self) -> String {
        let mut out = String::from(START_MARKER);
        out.push('\n');
        for line in self.to_toml().lines() {
            if line.is_empty() {
                out.push_str("#\n");
            } else {
                out.push_str("# ");
                out.push_str(line);
                out.push('\n');
            }
        }
        out.push_str(END_MARKER);
        out.push('\n');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_basic_script_metadata() {
        let script = r#"#!/usr/bin/env python3
# /// script
# requires-python = ">=3.11"
# dependencies = [
#   "requests>=2.28.0",
#   "numpy",
# ]
# ///

import requests
print("hello")
"#;

        let block = MetadataBlock::parse(script).unwrap();

        assert_eq!(
            block.requires_python().map(ToString::to_string),
            Some(">=3.11".to_string())
        );
        assert_eq!(block.dependency_strings(), vec!["numpy", "requests>=2.28.0"]);
    }

    #[test]
    fn parse_no_metadata() {
        let script = "#!/usr/bin/env python3\nprint(\"hello\")\n";

        assert!(MetadataBlock::find(script).unwrap().is_none());
        assert!(matches!(
            MetadataBlock::parse(script),
            Err(ParseError::Missing)
        ));
    }

    #[test]
    fn parse_empty_block() {
        let script = "# /// script\n# ///\nprint(\"no deps\")\n";

        let block = MetadataBlock::parse(script).unwrap();
        assert!(block.requires_python().is_none());
        assert_eq!(block.dependencies().count(), 0);
    }

    #[test]
    fn ignores_comments_after_block() {
        let script = r#"# /// script
# dependencies = ["numpy"]
# ///

# dependencies = ["should-not-parse"]
import numpy
"#;

        let block = MetadataBlock::parse(script).unwrap();
        assert_eq!(block.dependency_strings(), vec!["numpy"]);
    }

    #[test]
    fn locate_reports_half_open_span() {
        let lines = ["#!/usr/bin/env python", "# /// script", "# dependencies = []", "# ///", "x = 1"];
        assert_eq!(locate(&lines).unwrap(), Some(1..4));
    }

    #[test]
    fn locate_handles_crlf_lines() {
        let lines = ["# /// script\r\n", "# dependencies = []\r\n", "# ///\r\n"];
        assert_eq!(locate(&lines).unwrap(), Some(0..3));
    }

    #[test]
    fn end_marker_is_last_in_comment_run() {
        let script = "# /// script\n# a = 1\n# ///\n# b = 2\n# ///\n\nx = 1\n";
        let lines: Vec<&str> = script.lines().collect();
        assert_eq!(locate(&lines).unwrap(), Some(0..5));
    }

    #[test]
    fn unterminated_block_is_malformed() {
        let script = "# /// script\n# dependencies = []\nimport os\n";
        assert!(matches!(
            MetadataBlock::find(script),
            Err(ParseError::MalformedDelimiter(_))
        ));
    }

    #[test]
    fn nested_start_marker_is_malformed() {
        let script = "# /// script\n# /// script\n# ///\n";
        assert!(matches!(
            MetadataBlock::find(script),
            Err(ParseError::MalformedDelimiter(_))
        ));
    }

    #[test]
    fn second_block_is_rejected() {
        let script = "# /// script\n# ///\n\n# /// script\n# ///\n";
        assert!(matches!(
            MetadataBlock::find(script),
            Err(ParseError::DuplicateBlock { first: 1, second: 4 })
        ));
    }

    #[test]
    fn other_block_types_are_ignored() {
        let script = "# /// pyproject\n# name = \"x\"\n# ///\n";
        assert!(MetadataBlock::find(script).unwrap().is_none());
    }

    #[test]
    fn unterminated_array_is_invalid_syntax() {
        let script = "# /// script\n# dependencies = [\n#   \"numpy\",\n# ///\n";
        assert!(matches!(
            MetadataBlock::parse(script),
            Err(ParseError::InvalidSyntax(_))
        ));
    }

    #[test]
    fn duplicate_dependency_is_rejected() {
        let script = "# /// script\n# dependencies = [\"numpy==1.0\", \"NumPy>=2\"]\n# ///\n";
        assert!(matches!(
            MetadataBlock::parse(script),
            Err(ParseError::DuplicateDependency(name)) if name == "NumPy"
        ));
    }

    #[test]
    fn wrong_field_types_are_rejected() {
        let script = "# /// script\n# dependencies = \"numpy\"\n# ///\n";
        assert!(matches!(
            MetadataBlock::parse(script),
            Err(ParseError::InvalidField { key, .. }) if key == "dependencies"
        ));

        let script = "# /// script\n# requires-python = \"three\"\n# ///\n";
        assert!(matches!(
            MetadataBlock::parse(script),
            Err(ParseError::InvalidField { key, .. }) if key == "requires-python"
        ));
    }

    #[test]
    fn serialize_sorts_dependencies_and_omits_absent_python() {
        let script = "# /// script\n# dependencies = [\"pandas>=2.0\", \"Altair\", \"numpy\"]\n# ///\n";
        let block = MetadataBlock::parse(script).unwrap();

        assert_eq!(
            block.serialize(),
            "# /// script\n\
             # dependencies = [\n\
             #     \"Altair\",\n\
             #     \"numpy\",\n\
             #     \"pandas>=2.0\",\n\
             # ]\n\
             # ///\n"
        );
    }

    #[test]
    fn tool_tables_survive_round_trip() {
        let script = r#"# /// script
# requires-python = ">=3.12"
# dependencies = []
#
# [tool.uv]
# exclude-newer = "2024-10-01T00:00:00Z"
#
# [tool.juv]
# jupyter = "lab@4.2"
# ///
"#;
        let block = MetadataBlock::parse(script).unwrap();
        assert_eq!(
            block.tool("juv").and_then(|t| t.get("jupyter")).and_then(Value::as_str),
            Some("lab@4.2")
        );

        let text = block.serialize();
        let reparsed = MetadataBlock::parse(&text).unwrap();
        assert_eq!(reparsed, block);
        assert_eq!(reparsed.serialize(), text);
        let keys: Vec<&String> = reparsed.tool_tables().keys().collect();
        assert_eq!(keys, vec!["uv", "juv"]);
    }

    #[test]
    fn unknown_top_level_keys_are_kept() {
        let script = "# /// script\n# dependencies = []\n# custom = 1\n# ///\n";
        let block = MetadataBlock::parse(script).unwrap();
        assert!(block.serialize().contains("# custom = 1\n"));
    }

    #[test]
    fn has_script_metadata_checks_marker_line() {
        assert!(has_script_metadata("# /// script\n# ///"));
        assert!(!has_script_metadata("print('hello')"));
    }
}
