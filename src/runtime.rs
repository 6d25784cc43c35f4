//! Jupyter front ends and the `uv tool run` invocation that launches them.
//!
//! The front end is chosen in this order:
//! 1. `--jupyter` on the command line
//! 2. `[tool.juv] jupyter` in the document's metadata block
//! 3. `JUV_JUPYTER` environment variable
//! 4. JupyterLab
//!
//! Environment resolution itself is left to `uv`: the plan only hands it the
//! block's dependencies and python constraint as plain strings.

use crate::pep723::MetadataBlock;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use thiserror::Error;

pub const JUPYTER_ENV: &str = "JUV_JUPYTER";
pub const UV_ENV: &str = "JUV_UV";
pub const TOOL_NAMESPACE: &str = "juv";
pub const JUPYTER_KEY: &str = "jupyter";

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(
        "invalid Jupyter front end `{0}` (expected lab, notebook or nbclassic, optionally followed by @VERSION)"
    )]
    InvalidSpecifier(String),
    #[error("`tool.juv.jupyter` must be a string")]
    InvalidPreference,
    #[error("could not find `uv` on PATH (set {UV_ENV} to its location)")]
    UvNotFound,
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    #[default]
    Lab,
    Notebook,
    Nbclassic,
}

impl RuntimeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeKind::Lab => "lab",
            RuntimeKind::Notebook => "notebook",
            RuntimeKind::Nbclassic => "nbclassic",
        }
    }

    /// The PyPI package providing this front end.
    pub fn package(self) -> &'static str {
        match self {
            RuntimeKind::Lab => "jupyterlab",
            RuntimeKind::Notebook => "notebook",
            RuntimeKind::Nbclassic => "nbclassic",
        }
    }
}

/// A front end, optionally pinned: `lab`, `notebook@7.2.2`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Runtime {
    pub kind: RuntimeKind,
    pub version: Option<String>,
}

impl Runtime {
    /// `jupyterlab` or `jupyterlab==4.2.5`.
    pub fn package_requirement(&self) -> String {
        match &self.version {
            Some(version) => format!("{}=={version}", self.kind.package()),
            None => self.kind.package().to_string(),
        }
    }
}

impl FromStr for Runtime {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || RuntimeError::InvalidSpecifier(s.to_string());
        let (kind, version) = match s.trim().split_once('@') {
            Some((kind, version)) if !version.is_empty() && !version.contains('@') => {
                (kind, Some(version.to_string()))
            }
            Some(_) => return Err(invalid()),
            None => (s.trim(), None),
        };
        let kind = match kind {
            "lab" => RuntimeKind::Lab,
            "notebook" => RuntimeKind::Notebook,
            "nbclassic" => RuntimeKind::Nbclassic,
            _ => return Err(invalid()),
        };
        Ok(Runtime { kind, version })
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{version}", self.kind.as_str()),
            None => f.write_str(self.kind.as_str()),
        }
    }
}

/// The front-end preference stored in a block, if any.
pub fn block_preference(block: &MetadataBlock) -> Result<Option<&str>> {
    match block.tool(TOOL_NAMESPACE).and_then(|table| table.get(JUPYTER_KEY)) {
        Some(value) => value
            .as_str()
            .map(Some)
            .ok_or(RuntimeError::InvalidPreference),
        None => Ok(None),
    }
}

/// Pick the front end from the command line, the block and the environment.
pub fn resolve_runtime(
    requested: Option<&str>,
    block: Option<&MetadataBlock>,
    env_default: Option<&str>,
) -> Result<Runtime> {
    if let Some(requested) = requested {
        return requested.parse();
    }
    if let Some(block) = block
        && let Some(preference) = block_preference(block)?
    {
        return preference.parse();
    }
    match env_default {
        Some(value) if !value.trim().is_empty() => value.parse(),
        _ => Ok(Runtime::default()),
    }
}

#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub python: Option<String>,
    pub with: Vec<String>,
    pub no_cache: bool,
    pub no_project: bool,
}

/// A fully built process invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaunchPlan {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl LaunchPlan {
    /// Build the `uv tool run` invocation for `target`.
    pub fn new(
        uv: PathBuf,
        target: &Path,
        runtime: &Runtime,
        block: Option<&MetadataBlock>,
        options: &LaunchOptions,
    ) -> Self {
        let extras = ["setuptools".to_string(), runtime.package_requirement()].join(",");
        let python = options.python.clone().or_else(|| {
            block
                .and_then(MetadataBlock::requires_python)
                .map(ToString::to_string)
        });

        let mut args: Vec<String> = vec!["tool".into(), "run".into(), "--isolated".into()];
        if options.no_project {
            args.push("--no-project".into());
        }
        if options.no_cache {
            args.push("--no-cache".into());
        }
        if let Some(python) = python {
            args.push(format!("--python={python}"));
        }
        args.push(format!("--with={extras}"));
        // One flag per requirement: constraints may contain commas.
        for dependency in block.map(MetadataBlock::dependency_strings).unwrap_or_default() {
            args.push(format!("--with={dependency}"));
        }
        for dependency in &options.with {
            args.push(format!("--with={dependency}"));
        }
        args.push("jupyter".into());
        args.push(runtime.kind.as_str().into());
        args.push(target.display().to_string());

        Self { program: uv, args }
    }

    /// The invocation as one line, for dry runs and logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().map(|arg| quote(arg)))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

fn quote(arg: &str) -> String {
    if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || "\"'<>|;&$".contains(c)) {
        format!("'{}'", arg.replace('\'', r"'\''"))
    } else {
        arg.to_string()
    }
}

/// Locate `uv`: an explicit path (`--uv` / `JUV_UV`) first, then `PATH`.
pub fn find_uv(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(explicit) = explicit.filter(|path| !path.as_os_str().is_empty()) {
        return Ok(explicit.to_path_buf());
    }
    which_executable("uv").ok_or(RuntimeError::UvNotFound)
}

fn which_executable(name: &str) -> Option<PathBuf> {
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths).find_map(|dir| {
            let full_path = dir.join(name);
            if full_path.is_file() {
                return Some(full_path);
            }

            #[cfg(windows)]
            {
                let with_ext = dir.join(format!("{name}.exe"));
                if with_ext.is_file() {
                    return Some(with_ext);
                }
            }

            None
        })
    })
}
