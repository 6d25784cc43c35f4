//! Dependency specifiers and version constraints.
//!
//! Covers the part of PEP 508 / PEP 440 that inline script metadata needs:
//!
//! ```text
//! name[extra1,extra2] >=1.0,<2 ; python_version < "3.12"
//! name @ https://example.com/name-1.0.tar.gz
//! ```
//!
//! Parsed values display in a canonical form (no whitespace inside the
//! version part), which is what gets written back into metadata blocks.

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?$").expect("valid name pattern")
});

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)^v?(?:[0-9]+!)?[0-9]+(?:\.[0-9]+)*",
        r"(?:[-_.]?(?:a|b|c|rc|alpha|beta|pre|preview)[-_.]?[0-9]*)?",
        r"(?:-[0-9]+|[-_.]?(?:post|rev|r)[-_.]?[0-9]*)?",
        r"(?:[-_.]?dev[-_.]?[0-9]*)?",
        r"(?:\+[a-z0-9]+(?:[-_.][a-z0-9]+)*)?$",
    ))
    .expect("valid version pattern")
});

static RELEASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[0-9]+!)?[0-9]+(?:\.[0-9]+)*$").expect("valid release pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecifierError {
    #[error("empty specifier")]
    Empty,
    #[error("invalid package name `{0}`")]
    InvalidName(String),
    #[error("invalid extra `{0}`")]
    InvalidExtra(String),
    #[error("missing closing `]` after extras")]
    UnclosedExtras,
    #[error("missing URL after `@`")]
    MissingUrl,
    #[error("empty environment marker")]
    EmptyMarker,
    #[error("invalid version clause `{0}`")]
    InvalidClause(String),
    #[error("invalid version `{0}`")]
    InvalidVersion(String),
    #[error("wildcard version `{0}` is only allowed with `==` or `!=`")]
    MisplacedWildcard(String),
    #[error("`~=` needs at least two release segments, got `{0}`")]
    CompatibleRelease(String),
}

pub type Result<T> = std::result::Result<T, SpecifierError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// ===version
    ArbitraryEqual,
    /// ==version
    Equal,
    /// !=version
    NotEqual,
    /// ~=version (compatible release)
    Compatible,
    /// <=version
    LessEqual,
    /// >=version
    GreaterEqual,
    /// <version
    Less,
    /// >version
    Greater,
}

impl Operator {
    // Longest tokens first so `===` is not read as `==` followed by `=`.
    const TOKENS: [(&'static str, Operator); 8] = [
        ("===", Operator::ArbitraryEqual),
        ("==", Operator::Equal),
        ("!=", Operator::NotEqual),
        ("~=", Operator::Compatible),
        ("<=", Operator::LessEqual),
        (">=", Operator::GreaterEqual),
        ("<", Operator::Less),
        (">", Operator::Greater),
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operator::ArbitraryEqual => "===",
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::Compatible => "~=",
            Operator::LessEqual => "<=",
            Operator::GreaterEqual => ">=",
            Operator::Less => "<",
            Operator::Greater => ">",
        }
    }

    fn split_prefix(clause: &str) -> Option<(Operator, &str)> {
        Self::TOKENS
            .iter()
            .find_map(|(token, op)| clause.strip_prefix(*token).map(|rest| (*op, rest)))
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `op version` clause.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Clause {
    pub operator: Operator,
    pub version: String,
}

impl FromStr for Clause {
    type Err = SpecifierError;

    fn from_str(s: &str) -> Result<Self> {
        let clause = s.trim();
        let (operator, rest) = Operator::split_prefix(clause)
            .ok_or_else(|| SpecifierError::InvalidClause(clause.to_string()))?;
        let version = rest.trim();
        if version.is_empty() || version.chars().any(char::is_whitespace) {
            return Err(SpecifierError::InvalidClause(clause.to_string()));
        }
        validate_version(operator, version)?;
        Ok(Self {
            operator,
            version: version.to_string(),
        })
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.operator, self.version)
    }
}

fn validate_version(operator: Operator, version: &str) -> Result<()> {
    if operator == Operator::ArbitraryEqual {
        return Ok(());
    }

    if let Some(release) = version.strip_suffix(".*") {
        if !matches!(operator, Operator::Equal | Operator::NotEqual) {
            return Err(SpecifierError::MisplacedWildcard(version.to_string()));
        }
        if !RELEASE_RE.is_match(release) {
            return Err(SpecifierError::InvalidVersion(version.to_string()));
        }
        return Ok(());
    }

    if !VERSION_RE.is_match(version) {
        return Err(SpecifierError::InvalidVersion(version.to_string()));
    }

    if operator == Operator::Compatible {
        let release = version
            .split_once('!')
            .map_or(version, |(_, rest)| rest)
            .trim_start_matches(['v', 'V']);
        let segments = release
            .split('.')
            .take_while(|segment| segment.chars().all(|c| c.is_ascii_digit()))
            .count();
        if segments < 2 {
            return Err(SpecifierError::CompatibleRelease(version.to_string()));
        }
    }

    Ok(())
}

/// A comma-separated list of clauses, e.g. `>=3.9,<3.13`.
///
/// This is also the grammar of `requires-python`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionConstraint {
    clauses: Vec<Clause>,
}

impl VersionConstraint {
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Accepts either a full constraint or a bare version (`3.12`), which
    /// is read as a lower bound the way `uv init --python` records it.
    pub fn from_python_request(request: &str) -> Result<Self> {
        let request = request.trim();
        if request.starts_with(|c: char| c.is_ascii_digit()) {
            format!(">={request}").parse()
        } else {
            request.parse()
        }
    }
}

impl FromStr for VersionConstraint {
    type Err = SpecifierError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Err(SpecifierError::Empty);
        }
        let clauses = s
            .split(',')
            .map(str::parse)
            .collect::<Result<Vec<Clause>>>()?;
        Ok(Self { clauses })
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{clause}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionSpec {
    /// No constraint at all.
    Any,
    /// One or more version clauses.
    Constraint(VersionConstraint),
    /// Direct reference (`name @ url`).
    Url(String),
}

/// A dependency specifier as it appears in the `dependencies` array.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Requirement {
    pub name: String,
    pub extras: Vec<String>,
    pub version: VersionSpec,
    pub marker: Option<String>,
}

impl Requirement {
    /// PEP 503 normalized name: lowercase, runs of `-`, `_`, `.` become `-`.
    ///
    /// Two specifiers refer to the same package exactly when their
    /// normalized names are equal.
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

/// Normalize a bare package name (see [`Requirement::normalized_name`]).
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            in_separator = true;
            continue;
        }
        if in_separator && !out.is_empty() {
            out.push('-');
        }
        in_separator = false;
        out.push(c.to_ascii_lowercase());
    }
    out
}

fn split_marker(spec: &str) -> (&str, Option<&str>) {
    let is_url = spec.split(';').next().is_some_and(|head| head.contains('@'));
    let position = spec.char_indices().find_map(|(i, c)| {
        if c != ';' {
            return None;
        }
        // After a URL the marker separator must be preceded by whitespace,
        // since `;` is a legal URL character.
        let preceded_by_space = spec[..i].ends_with(char::is_whitespace);
        (!is_url || preceded_by_space).then_some(i)
    });
    match position {
        Some(i) => (&spec[..i], Some(&spec[i + 1..])),
        None => (spec, None),
    }
}

impl FromStr for Requirement {
    type Err = SpecifierError;

    fn from_str(s: &str) -> Result<Self> {
        let spec = s.trim();
        if spec.is_empty() {
            return Err(SpecifierError::Empty);
        }

        let (head, marker) = split_marker(spec);
        let marker = match marker.map(str::trim) {
            Some("") => return Err(SpecifierError::EmptyMarker),
            Some(m) => Some(m.to_string()),
            None => None,
        };

        let head = head.trim();
        let name_end = head
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
            .unwrap_or(head.len());
        let name = &head[..name_end];
        if !NAME_RE.is_match(name) {
            let shown = if name.is_empty() { head } else { name };
            return Err(SpecifierError::InvalidName(shown.to_string()));
        }

        let mut rest = head[name_end..].trim_start();
        let mut extras = Vec::new();
        if let Some(after_bracket) = rest.strip_prefix('[') {
            let close = after_bracket
                .find(']')
                .ok_or(SpecifierError::UnclosedExtras)?;
            for extra in after_bracket[..close].split(',').map(str::trim) {
                if extra.is_empty() {
                    continue;
                }
                if !NAME_RE.is_match(extra) {
                    return Err(SpecifierError::InvalidExtra(extra.to_string()));
                }
                extras.push(extra.to_string());
            }
            rest = after_bracket[close + 1..].trim_start();
        }

        let version = if let Some(url) = rest.strip_prefix('@') {
            let url = url.trim();
            if url.is_empty() || url.chars().any(char::is_whitespace) {
                return Err(SpecifierError::MissingUrl);
            }
            VersionSpec::Url(url.to_string())
        } else {
            let rest = rest
                .strip_prefix('(')
                .and_then(|r| r.strip_suffix(')'))
                .unwrap_or(rest)
                .trim();
            if rest.is_empty() {
                VersionSpec::Any
            } else {
                VersionSpec::Constraint(rest.parse()?)
            }
        };

        Ok(Self {
            name: name.to_string(),
            extras,
            version,
            marker,
        })
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.extras.is_empty() {
            write!(f, "[{}]", self.extras.join(","))?;
        }
        match &self.version {
            VersionSpec::Any => {}
            VersionSpec::Constraint(c) => write!(f, "{c}")?,
            VersionSpec::Url(url) => write!(f, " @ {url}")?,
        }
        if let Some(marker) = &self.marker {
            if matches!(self.version, VersionSpec::Url(_)) {
                f.write_str(" ")?;
            }
            write!(f, "; {marker}")?;
        }
        Ok(())
    }
}
