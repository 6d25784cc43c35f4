use crate::cat::{self, CatFormat};
use crate::cli::{
    AddArgs, CatArgs, Cli, Commands, ConvertArgs, InitArgs, OutputFormat, PythonArgs, RemoveArgs,
    RunArgs, StampArgs,
};
use crate::convert::LossReport;
use crate::document::{Document, DocumentError, DocumentKind, untitled_path};
use crate::editor;
use crate::notebook::{Cell, NotebookDocument};
use crate::pep723::MetadataBlock;
use crate::runtime::{
    self, JUPYTER_ENV, LaunchOptions, LaunchPlan, Runtime, TOOL_NAMESPACE as JUV_NAMESPACE,
};
use crate::schema::{Diagnostic, Event, EventCollector, EventType, JsonEnvelope, Status};
use crate::specifier::VersionConstraint;
use crate::stamp::{self, Action, StampSource};
use color_eyre::eyre::{Result, eyre};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub fn execute(cli: Cli) -> Result<()> {
    let mut collector = EventCollector::new();

    // Record command start
    collector.event(EventType::CommandStart);

    let (command, result) = match &cli.command {
        Commands::Init(args) => (
            "init",
            init_notebook(args, &mut collector).map(InitOutcome::into_detail),
        ),
        Commands::Add(args) => (
            "add",
            add_dependencies(args, &mut collector).map(AddOutcome::into_detail),
        ),
        Commands::Remove(args) => (
            "remove",
            remove_dependencies(args, &mut collector).map(RemoveOutcome::into_detail),
        ),
        Commands::Python(args) => (
            "python",
            set_python(args, &mut collector).map(PythonOutcome::into_detail),
        ),
        Commands::Run(args) => (
            "run",
            run_notebook(args, &mut collector).map(RunOutcome::into_detail),
        ),
        Commands::Convert(args) => (
            "convert",
            convert_document(args, &mut collector).map(ConvertOutcome::into_detail),
        ),
        Commands::Cat(args) => (
            "cat",
            cat_document(args, &mut collector).map(CatOutcome::into_detail),
        ),
        Commands::Stamp(args) => (
            "stamp",
            stamp_document(args, &mut collector).map(StampOutcome::into_detail),
        ),
    };

    let detail = match result {
        Ok(detail) => detail,
        Err(e) => {
            collector.error(e.to_string());
            RenderDetail::error(
                e.to_string(),
                json!({
                    "error": e.to_string(),
                }),
            )
        }
    };

    // Record command end
    collector.event(EventType::CommandEnd);

    let duration = collector.elapsed();
    let (events, diagnostics, trace_id) = collector.into_parts();

    let is_error = detail.is_error;
    let rendered = render(
        command,
        detail,
        cli.format,
        duration,
        events,
        diagnostics,
        trace_id,
    );
    println!("{rendered}");

    // Exit with error code if command failed
    if is_error {
        std::process::exit(1);
    }

    Ok(())
}

fn render(
    command: &str,
    detail: RenderDetail,
    format: OutputFormat,
    duration: Duration,
    events: Vec<Event>,
    diagnostics: Vec<Diagnostic>,
    trace_id: Option<String>,
) -> String {
    match format {
        OutputFormat::Text if detail.raw => detail.text,
        OutputFormat::Text => format!("juv {command}: {}", detail.text),
        OutputFormat::Json => {
            let status = if detail.is_error {
                Status::Error
            } else {
                Status::Ok
            };
            let mut envelope =
                JsonEnvelope::new(format!("juv {command}"), status, duration, detail.json);
            envelope.events = events;
            envelope.diagnostics = diagnostics;
            envelope.trace_id = trace_id;
            envelope.to_json()
        }
    }
}

#[derive(Debug)]
struct RenderDetail {
    text: String,
    json: Value,
    is_error: bool,
    /// Print `text` as is in text mode, without the `juv <command>:` prefix.
    raw: bool,
}

impl RenderDetail {
    fn with_json(text: impl Into<String>, json: Value) -> Self {
        Self {
            text: text.into(),
            json,
            is_error: false,
            raw: false,
        }
    }

    fn error(text: impl Into<String>, json: Value) -> Self {
        Self {
            text: text.into(),
            json,
            is_error: true,
            raw: false,
        }
    }

    fn raw(text: impl Into<String>, json: Value) -> Self {
        Self {
            text: text.into(),
            json,
            is_error: false,
            raw: true,
        }
    }
}

// ---------------------------------------------------------------------------
// shared document plumbing
// ---------------------------------------------------------------------------

fn load_document(path: &Path, collector: &mut EventCollector) -> Result<Document> {
    if !path.exists() {
        return Err(eyre!("{} not found", path.display()));
    }
    let document = Document::load(path)?;
    collector.event_with_data(
        EventType::DocumentLoad,
        json!({
            "path": path.display().to_string(),
            "kind": kind_name(document.kind()),
        }),
    );
    Ok(document)
}

fn save_document(document: &Document, path: &Path, collector: &mut EventCollector) -> Result<()> {
    document.save(path)?;
    collector.event_with_data(
        EventType::DocumentWrite,
        json!({
            "path": path.display().to_string(),
            "kind": kind_name(document.kind()),
        }),
    );
    Ok(())
}

fn kind_name(kind: DocumentKind) -> &'static str {
    match kind {
        DocumentKind::Script => "script",
        DocumentKind::Notebook => "notebook",
    }
}

/// Apply `edit` to the document's block (a default block when there is
/// none) and write the document back if anything changed.
fn edit_metadata(
    path: &Path,
    collector: &mut EventCollector,
    edit: impl FnOnce(&MetadataBlock) -> Result<MetadataBlock>,
) -> Result<(MetadataBlock, MetadataBlock)> {
    let document = load_document(path, collector)?;
    let before = document.metadata_block()?.unwrap_or_default();
    let after = edit(&before)?;

    if after != before {
        let updated = document.with_metadata_block(&after)?;
        save_document(&updated, path, collector)?;
    }
    collector.event_with_data(
        EventType::MetadataEdit,
        json!({
            "before": before.dependency_strings(),
            "after": after.dependency_strings(),
        }),
    );
    Ok((before, after))
}

fn python_constraint(request: &str) -> Result<String> {
    VersionConstraint::from_python_request(request)
        .map(|constraint| constraint.to_string())
        .map_err(|e| eyre!("invalid python request `{request}`: {e}"))
}

// ---------------------------------------------------------------------------
// juv init
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct InitOutcome {
    summary: String,
    path: PathBuf,
    dependencies: Vec<String>,
    requires_python: Option<String>,
    jupyter: Option<String>,
}

impl InitOutcome {
    fn into_detail(self) -> RenderDetail {
        RenderDetail::with_json(
            self.summary,
            json!({
                "path": self.path.display().to_string(),
                "dependencies": self.dependencies,
                "requires_python": self.requires_python,
                "jupyter": self.jupyter,
            }),
        )
    }
}

fn init_notebook(args: &InitArgs, collector: &mut EventCollector) -> Result<InitOutcome> {
    let path = match &args.path {
        Some(path) => path.clone(),
        None => untitled_path(Path::new(""))?,
    };
    if DocumentKind::from_path(&path)? != DocumentKind::Notebook {
        return Err(eyre!(
            "juv init creates notebooks; {} is not an .ipynb file",
            path.display()
        ));
    }
    if path.exists() {
        return Err(DocumentError::AlreadyExists(path).into());
    }

    let mut block = MetadataBlock::default();
    if let Some(python) = &args.python {
        block = editor::set_requires_python(&block, &python_constraint(python)?)?;
    }
    if !args.with.is_empty() {
        block = editor::add(&block, &args.with)?;
    }
    if let Some(jupyter) = &args.jupyter {
        let runtime: Runtime = jupyter.parse()?;
        block = editor::set_tool_value(
            &block,
            JUV_NAMESPACE,
            runtime::JUPYTER_KEY,
            toml::Value::String(runtime.to_string()),
        );
    }

    let mut notebook = NotebookDocument::new();
    let metadata_cell = notebook.metadata_cell(&block);
    notebook.cells.push(metadata_cell);
    notebook.push_cell(Cell::code(""));
    save_document(&Document::Notebook(notebook), &path, collector)?;
    eprintln!("info: initialized notebook at {}", path.display());

    Ok(InitOutcome {
        summary: format!("created {}", path.display()),
        dependencies: block.dependency_strings(),
        requires_python: block.requires_python().map(ToString::to_string),
        jupyter: args.jupyter.clone(),
        path,
    })
}

// ---------------------------------------------------------------------------
// juv add
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct AddOutcome {
    summary: String,
    path: PathBuf,
    added: Vec<String>,
    dependencies: Vec<String>,
}

impl AddOutcome {
    fn into_detail(self) -> RenderDetail {
        RenderDetail::with_json(
            self.summary,
            json!({
                "path": self.path.display().to_string(),
                "added": self.added,
                "dependencies": self.dependencies,
            }),
        )
    }
}

/// Requirement lines from a requirements file: comments, blank lines and
/// pip options (`-r`, `--index-url`, ...) are skipped.
fn read_requirements(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)
        .map_err(|e| eyre!("failed to read {}: {e}", path.display()))?;
    Ok(text
        .lines()
        .map(|line| line.split(" #").next().unwrap_or(line).trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('-'))
        .map(String::from)
        .collect())
}

fn add_dependencies(args: &AddArgs, collector: &mut EventCollector) -> Result<AddOutcome> {
    let mut specifiers = args.packages.clone();
    if let Some(requirements) = &args.requirements {
        specifiers.extend(read_requirements(requirements)?);
    }
    if specifiers.is_empty() {
        return Err(eyre!("no dependencies to add"));
    }

    let (_, after) = edit_metadata(&args.path, collector, |block| {
        Ok(editor::add(block, &specifiers)?)
    })?;

    let added: Vec<String> = specifiers
        .iter()
        .filter_map(|spec| after.dependency(spec_name(spec)))
        .map(ToString::to_string)
        .collect();

    Ok(AddOutcome {
        summary: format!("added {} to {}", added.join(", "), args.path.display()),
        path: args.path.clone(),
        added,
        dependencies: after.dependency_strings(),
    })
}

/// The package name at the front of a specifier.
fn spec_name(spec: &str) -> &str {
    let end = spec
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .unwrap_or(spec.len());
    &spec[..end]
}

// ---------------------------------------------------------------------------
// juv remove
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct RemoveOutcome {
    summary: String,
    path: PathBuf,
    removed: Vec<String>,
    dependencies: Vec<String>,
}

impl RemoveOutcome {
    fn into_detail(self) -> RenderDetail {
        RenderDetail::with_json(
            self.summary,
            json!({
                "path": self.path.display().to_string(),
                "removed": self.removed,
                "dependencies": self.dependencies,
            }),
        )
    }
}

fn remove_dependencies(args: &RemoveArgs, collector: &mut EventCollector) -> Result<RemoveOutcome> {
    let (before, after) = edit_metadata(&args.path, collector, |block| {
        Ok(editor::remove(block, &args.packages))
    })?;

    let removed: Vec<String> = before
        .dependencies()
        .filter(|requirement| after.dependency(&requirement.name).is_none())
        .map(|requirement| requirement.name.clone())
        .collect();
    for name in &args.packages {
        if before.dependency(spec_name(name)).is_none() {
            eprintln!("warning: {name} is not a dependency of {}", args.path.display());
            collector.diagnostic(
                Diagnostic::warning(format!("{name} is not a dependency"))
                    .with_file(args.path.display().to_string()),
            );
        }
    }

    let summary = if removed.is_empty() {
        format!("no matching dependencies in {}", args.path.display())
    } else {
        format!("removed {} from {}", removed.join(", "), args.path.display())
    };

    Ok(RemoveOutcome {
        summary,
        path: args.path.clone(),
        removed,
        dependencies: after.dependency_strings(),
    })
}

// ---------------------------------------------------------------------------
// juv python
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct PythonOutcome {
    summary: String,
    path: PathBuf,
    requires_python: String,
}

impl PythonOutcome {
    fn into_detail(self) -> RenderDetail {
        RenderDetail::with_json(
            self.summary,
            json!({
                "path": self.path.display().to_string(),
                "requires_python": self.requires_python,
            }),
        )
    }
}

fn set_python(args: &PythonArgs, collector: &mut EventCollector) -> Result<PythonOutcome> {
    let constraint = python_constraint(&args.constraint)?;
    edit_metadata(&args.path, collector, |block| {
        Ok(editor::set_requires_python(block, &constraint)?)
    })?;

    Ok(PythonOutcome {
        summary: format!(
            "set requires-python = \"{constraint}\" in {}",
            args.path.display()
        ),
        path: args.path.clone(),
        requires_python: constraint,
    })
}

// ---------------------------------------------------------------------------
// juv run
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct RunOutcome {
    summary: String,
    notebook: PathBuf,
    converted_from: Option<PathBuf>,
    runtime: Runtime,
    plan: LaunchPlan,
    dry_run: bool,
    exit_code: Option<i32>,
}

impl RunOutcome {
    fn into_detail(self) -> RenderDetail {
        let json = json!({
            "notebook": self.notebook.display().to_string(),
            "converted_from": self.converted_from.map(|path| path.display().to_string()),
            "runtime": self.runtime,
            "command": self.plan.command_line(),
            "program": self.plan.program.display().to_string(),
            "args": self.plan.args,
            "dry_run": self.dry_run,
            "exit_code": self.exit_code,
        });
        let failed = !self.dry_run && self.exit_code != Some(0);
        if failed {
            RenderDetail::error(self.summary, json)
        } else {
            RenderDetail::with_json(self.summary, json)
        }
    }
}

fn run_notebook(args: &RunArgs, collector: &mut EventCollector) -> Result<RunOutcome> {
    let document = load_document(&args.path, collector)?;

    let (notebook, target, converted_from) = match &document {
        Document::Notebook(notebook) => (notebook.clone(), args.path.clone(), None),
        Document::Script(_) => {
            collector.event(EventType::ConvertStart);
            let conversion = document.to_notebook()?;
            report_loss(&conversion.loss, &args.path, collector);
            let target = args.path.with_extension(DocumentKind::Notebook.extension());
            let notebook = conversion.document;
            save_document(&Document::Notebook(notebook.clone()), &target, collector)?;
            collector.event(EventType::ConvertComplete);
            eprintln!("info: converted script to notebook {}", target.display());
            (notebook, target, Some(args.path.clone()))
        }
    };

    let block = notebook.metadata_block()?;
    let env_default = std::env::var(JUPYTER_ENV).ok();
    let runtime =
        runtime::resolve_runtime(args.jupyter.as_deref(), block.as_ref(), env_default.as_deref())?;

    let uv = match runtime::find_uv(args.uv.as_deref()) {
        Ok(uv) => uv,
        Err(_) if args.dry_run => PathBuf::from("uv"),
        Err(e) => return Err(e.into()),
    };
    let options = LaunchOptions {
        python: args.python.clone(),
        with: args.with.clone(),
        no_cache: args.no_cache,
        no_project: args.no_project,
    };
    let plan = LaunchPlan::new(uv, &target, &runtime, block.as_ref(), &options);
    collector.event_with_data(EventType::LaunchPlan, json!(plan));

    if args.dry_run {
        return Ok(RunOutcome {
            summary: format!("would run {} (dry-run)", plan.command_line()),
            notebook: target,
            converted_from,
            runtime,
            plan,
            dry_run: true,
            exit_code: None,
        });
    }

    eprintln!(
        "info: launching Jupyter {} for {}",
        runtime,
        target.display()
    );
    collector.event(EventType::LaunchStart);
    let status = plan
        .to_command()
        .status()
        .map_err(|e| eyre!("failed to execute {}: {e}", plan.program.display()))?;
    collector.event(EventType::LaunchEnd);

    let exit_code = status.code().unwrap_or(-1);
    let summary = if status.success() {
        format!("Jupyter {} session for {} ended", runtime, target.display())
    } else {
        format!("uv exited with code {exit_code}")
    };

    Ok(RunOutcome {
        summary,
        notebook: target,
        converted_from,
        runtime,
        plan,
        dry_run: false,
        exit_code: Some(exit_code),
    })
}

// ---------------------------------------------------------------------------
// juv convert
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ConvertOutcome {
    summary: String,
    input: PathBuf,
    output: PathBuf,
    loss: LossReport,
}

impl ConvertOutcome {
    fn into_detail(self) -> RenderDetail {
        RenderDetail::with_json(
            self.summary,
            json!({
                "input": self.input.display().to_string(),
                "output": self.output.display().to_string(),
                "lossy": self.loss.is_lossy(),
                "loss": self.loss,
            }),
        )
    }
}

fn report_loss(loss: &LossReport, path: &Path, collector: &mut EventCollector) {
    if !loss.is_lossy() {
        return;
    }
    let message = format!(
        "{} has no script form; dropped {}",
        path.display(),
        loss.summary()
    );
    eprintln!("warning: {message}");
    collector.diagnostic(
        Diagnostic::warning(message)
            .with_file(path.display().to_string())
            .with_suggestion("keep the original notebook if you need outputs or metadata"),
    );
}

fn convert_document(args: &ConvertArgs, collector: &mut EventCollector) -> Result<ConvertOutcome> {
    let document = load_document(&args.path, collector)?;
    let target_kind = document.kind().other();
    let output = match &args.output {
        Some(output) => output.clone(),
        None => args.path.with_extension(target_kind.extension()),
    };
    if DocumentKind::from_path(&output)? != target_kind {
        return Err(eyre!(
            "{} must have a .{} extension",
            output.display(),
            target_kind.extension()
        ));
    }

    collector.event(EventType::ConvertStart);
    let conversion = document.convert()?;
    report_loss(&conversion.loss, &args.path, collector);
    save_document(&conversion.document, &output, collector)?;
    collector.event(EventType::ConvertComplete);

    Ok(ConvertOutcome {
        summary: format!("converted {} to {}", args.path.display(), output.display()),
        input: args.path.clone(),
        output,
        loss: conversion.loss,
    })
}

// ---------------------------------------------------------------------------
// juv cat
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct CatOutcome {
    path: PathBuf,
    format: CatFormat,
    contents: String,
}

impl CatOutcome {
    fn into_detail(self) -> RenderDetail {
        let json = json!({
            "path": self.path.display().to_string(),
            "format": self.format.as_str(),
            "contents": self.contents,
        });
        RenderDetail::raw(self.contents, json)
    }
}

fn cat_document(args: &CatArgs, collector: &mut EventCollector) -> Result<CatOutcome> {
    let document = load_document(&args.path, collector)?;
    let notebook = document.to_notebook()?.document;
    let format = if args.markdown {
        CatFormat::Markdown
    } else {
        CatFormat::Script
    };
    let contents = cat::render(&notebook, format)?;

    Ok(CatOutcome {
        path: args.path.clone(),
        format,
        contents,
    })
}

// ---------------------------------------------------------------------------
// juv stamp
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct StampOutcome {
    summary: String,
    path: PathBuf,
    action: Action,
}

impl StampOutcome {
    fn into_detail(self) -> RenderDetail {
        RenderDetail::with_json(
            self.summary,
            json!({
                "path": self.path.display().to_string(),
                "action": self.action,
            }),
        )
    }
}

fn stamp_source(args: &StampArgs) -> StampSource {
    if args.clear {
        StampSource::Clear
    } else if args.latest {
        StampSource::Latest
    } else if let Some(rev) = &args.rev {
        StampSource::Rev(rev.clone())
    } else if let Some(timestamp) = &args.timestamp {
        StampSource::Timestamp(timestamp.clone())
    } else if let Some(date) = &args.date {
        StampSource::Date(date.clone())
    } else {
        StampSource::Now
    }
}

fn stamp_document(args: &StampArgs, collector: &mut EventCollector) -> Result<StampOutcome> {
    let document = load_document(&args.path, collector)?;
    let block = document.metadata_block()?.ok_or_else(|| {
        eyre!(
            "no PEP 723 metadata block found in {} (add one with `juv add`)",
            args.path.display()
        )
    })?;

    let timestamp = stamp::resolve(&stamp_source(args))?;
    let (next, action) = stamp::apply(&block, timestamp.as_ref());
    if next != block {
        save_document(&document.with_metadata_block(&next)?, &args.path, collector)?;
    }
    collector.event_with_data(EventType::MetadataEdit, json!(action));

    Ok(StampOutcome {
        summary: format!("{} in {}", action.describe(), args.path.display()),
        path: args.path.clone(),
        action,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn spec_name_stops_at_operators() {
        assert_eq!(spec_name("numpy"), "numpy");
        assert_eq!(spec_name("pandas>=2.0"), "pandas");
        assert_eq!(spec_name("requests[socks]"), "requests");
        assert_eq!(spec_name("zope.interface ; python_version<'4'"), "zope.interface");
    }

    #[test]
    fn requirements_file_skips_noise() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("requirements.txt");
        fs::write(
            &path,
            "# pinned\nnumpy==2.1.0  # core\n\n-r other.txt\n--index-url https://x\npolars\n",
        )
        .unwrap();
        assert_eq!(read_requirements(&path).unwrap(), vec!["numpy==2.1.0", "polars"]);
    }

    #[test]
    fn python_requests_become_lower_bounds() {
        assert_eq!(python_constraint("3.12").unwrap(), ">=3.12");
        assert_eq!(python_constraint(">=3.10,<3.13").unwrap(), ">=3.10,<3.13");
        assert!(python_constraint("three").is_err());
    }

    #[test]
    fn stamp_flags_map_to_sources() {
        let args = StampArgs {
            path: PathBuf::from("nb.ipynb"),
            timestamp: None,
            date: Some("2024-01-01".into()),
            rev: None,
            latest: false,
            clear: false,
        };
        assert_eq!(stamp_source(&args), StampSource::Date("2024-01-01".into()));
        let args = StampArgs { date: None, ..args };
        assert_eq!(stamp_source(&args), StampSource::Now);
    }

    #[test]
    fn text_render_prefixes_command() {
        let detail = RenderDetail::with_json("added numpy to a.py", json!({}));
        let text = render(
            "add",
            detail,
            OutputFormat::Text,
            Duration::ZERO,
            Vec::new(),
            Vec::new(),
            None,
        );
        assert_eq!(text, "juv add: added numpy to a.py");

        let raw = RenderDetail::raw("# %%\nx = 1", json!({}));
        let text = render(
            "cat",
            raw,
            OutputFormat::Text,
            Duration::ZERO,
            Vec::new(),
            Vec::new(),
            None,
        );
        assert_eq!(text, "# %%\nx = 1");
    }
}
