//! Dependency edits over [`MetadataBlock`] values.
//!
//! Every function takes the block by reference and returns a new one, so a
//! caller can preview or diff an edit before writing it into a document.
//! Fallible edits validate all of their input before touching anything.

use crate::pep723::MetadataBlock;
use crate::specifier::{
    Requirement, SpecifierError, VersionConstraint, VersionSpec, normalize_name,
};
use thiserror::Error;
use toml::{Table, Value};

#[derive(Debug, Error)]
pub enum EditError {
    #[error("invalid dependency specifier `{spec}`: {source}")]
    InvalidSpecifier {
        spec: String,
        #[source]
        source: SpecifierError,
    },
    #[error("invalid version constraint `{constraint}`: {source}")]
    InvalidConstraint {
        constraint: String,
        #[source]
        source: SpecifierError,
    },
}

pub type Result<T> = std::result::Result<T, EditError>;

fn parse_specifiers<S: AsRef<str>>(specifiers: &[S]) -> Result<Vec<Requirement>> {
    specifiers
        .iter()
        .map(|spec| {
            let spec = spec.as_ref();
            spec.parse().map_err(|source| EditError::InvalidSpecifier {
                spec: spec.to_string(),
                source,
            })
        })
        .collect()
}

/// Add or replace dependencies. An existing entry for the same package is
/// replaced (last write wins, also within `specifiers`).
pub fn add<S: AsRef<str>>(block: &MetadataBlock, specifiers: &[S]) -> Result<MetadataBlock> {
    let requirements = parse_specifiers(specifiers)?;

    let mut next = block.clone();
    let dependencies = next.dependencies_mut();
    for requirement in requirements {
        dependencies.insert(requirement.normalized_name(), requirement);
    }
    Ok(next)
}

/// Remove dependencies by package name. Unknown names are ignored.
///
/// A full specifier (`numpy>=1`) is accepted and matched by its name.
pub fn remove<S: AsRef<str>>(block: &MetadataBlock, names: &[S]) -> MetadataBlock {
    let mut next = block.clone();
    let dependencies = next.dependencies_mut();
    for name in names {
        let name = name.as_ref();
        let key = name
            .parse::<Requirement>()
            .map(|r| r.normalized_name())
            .unwrap_or_else(|_| normalize_name(name));
        dependencies.remove(&key);
    }
    next
}

/// Pin a package to an exact version, keeping the extras and marker of an
/// existing entry.
pub fn pin(block: &MetadataBlock, name: &str, version: &str) -> Result<MetadataBlock> {
    let constraint = format!("=={version}");
    let pinned: VersionConstraint =
        constraint
            .parse()
            .map_err(|source| EditError::InvalidConstraint {
                constraint: constraint.clone(),
                source,
            })?;

    let requirement = match block.dependency(name) {
        Some(existing) => Requirement {
            version: VersionSpec::Constraint(pinned),
            ..existing.clone()
        },
        None => {
            let mut parsed = parse_specifiers(&[name])?.remove(0);
            parsed.version = VersionSpec::Constraint(pinned);
            parsed
        }
    };

    let mut next = block.clone();
    next.dependencies_mut()
        .insert(requirement.normalized_name(), requirement);
    Ok(next)
}

/// Replace `requires-python`. On invalid input the caller keeps the
/// original block untouched.
pub fn set_requires_python(block: &MetadataBlock, constraint: &str) -> Result<MetadataBlock> {
    let parsed: VersionConstraint =
        constraint
            .parse()
            .map_err(|source| EditError::InvalidConstraint {
                constraint: constraint.to_string(),
                source,
            })?;

    let mut next = block.clone();
    next.set_requires_python_unchecked(Some(parsed));
    Ok(next)
}

pub fn clear_requires_python(block: &MetadataBlock) -> MetadataBlock {
    let mut next = block.clone();
    next.set_requires_python_unchecked(None);
    next
}

/// Set `[tool.<namespace>] <key> = <value>`, creating the table if needed.
pub fn set_tool_value(
    block: &MetadataBlock,
    namespace: &str,
    key: &str,
    value: Value,
) -> MetadataBlock {
    let mut next = block.clone();
    let tool = next.tool_mut();
    let entry = tool
        .entry(namespace.to_string())
        .or_insert_with(|| Value::Table(Table::new()));
    if !entry.is_table() {
        *entry = Value::Table(Table::new());
    }
    if let Value::Table(table) = entry {
        table.insert(key.to_string(), value);
    }
    next
}

/// Remove `[tool.<namespace>] <key>`, dropping the namespace table once it
/// is empty. Returns the removed value alongside the new block.
pub fn remove_tool_value(
    block: &MetadataBlock,
    namespace: &str,
    key: &str,
) -> (MetadataBlock, Option<Value>) {
    let mut next = block.clone();
    let tool = next.tool_mut();
    let mut removed = None;
    let mut now_empty = false;
    if let Some(Value::Table(table)) = tool.get_mut(namespace) {
        removed = table.remove(key);
        now_empty = table.is_empty();
    }
    if now_empty {
        tool.remove(namespace);
    }
    (next, removed)
}
