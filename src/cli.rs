use clap::builder::FalseyValueParser;
use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "juv",
    about = "Create, manage and run Jupyter notebooks with inline dependency metadata",
    version,
    long_about = None
)]
pub struct Cli {
    /// Output format for machine readability.
    #[arg(long, global = true, default_value_t = OutputFormat::Text, value_enum)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a new notebook with a metadata block.
    Init(InitArgs),
    /// Add dependencies to a notebook or script.
    Add(AddArgs),
    /// Remove dependencies from a notebook or script.
    Remove(RemoveArgs),
    /// Set the `requires-python` constraint of a notebook or script.
    Python(PythonArgs),
    /// Launch a notebook or script in Jupyter via `uv tool run`.
    Run(RunArgs),
    /// Convert a script to a notebook or a notebook to a script.
    Convert(ConvertArgs),
    /// Print a notebook or script as plain text.
    Cat(CatArgs),
    /// Pin dependency resolution to a point in time (`tool.uv.exclude-newer`).
    Stamp(StampArgs),
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Notebook to create (default: the first free Untitled.ipynb).
    #[arg(value_name = "PATH")]
    pub path: Option<PathBuf>,
    /// Python version constraint (e.g. 3.12 or >=3.11).
    #[arg(long, short = 'p')]
    pub python: Option<String>,
    /// Dependencies to add right away.
    #[arg(long = "with", value_name = "DEP")]
    pub with: Vec<String>,
    /// Preferred Jupyter front end, stored in `[tool.juv]`.
    #[arg(long, value_name = "KIND[@VERSION]")]
    pub jupyter: Option<String>,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("deps").required(true).multiple(true)))]
pub struct AddArgs {
    /// Notebook or script to edit.
    #[arg(value_name = "PATH")]
    pub path: PathBuf,
    /// Dependency specifiers (e.g. numpy, "pandas>=2.0").
    #[arg(value_name = "DEP", group = "deps")]
    pub packages: Vec<String>,
    /// Read dependencies from a requirements file.
    #[arg(long, short = 'r', value_name = "FILE", group = "deps")]
    pub requirements: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Notebook or script to edit.
    #[arg(value_name = "PATH")]
    pub path: PathBuf,
    /// Package names to remove.
    #[arg(value_name = "NAME", required = true)]
    pub packages: Vec<String>,
}

#[derive(Args, Debug)]
pub struct PythonArgs {
    /// Notebook or script to edit.
    #[arg(value_name = "PATH")]
    pub path: PathBuf,
    /// Version constraint (e.g. 3.12 or ">=3.10,<3.13").
    #[arg(value_name = "CONSTRAINT")]
    pub constraint: String,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Notebook or script to launch. Scripts are converted first.
    #[arg(value_name = "PATH")]
    pub path: PathBuf,
    /// Jupyter front end: lab, notebook or nbclassic, optionally @VERSION.
    #[arg(long, value_name = "KIND[@VERSION]")]
    pub jupyter: Option<String>,
    /// Python interpreter request passed to uv.
    #[arg(long, short = 'p')]
    pub python: Option<String>,
    /// Extra packages for this session only.
    #[arg(long = "with", value_name = "DEP")]
    pub with: Vec<String>,
    /// Avoid reading from or writing to the uv cache.
    #[arg(long)]
    pub no_cache: bool,
    /// Do not discover a surrounding project.
    #[arg(long)]
    pub no_project: bool,
    /// Path to the uv executable.
    #[arg(long, env = "JUV_UV", value_name = "PATH")]
    pub uv: Option<PathBuf>,
    /// Print the launch plan instead of running it.
    #[arg(long, env = "JUV_DRY_RUN", value_parser = FalseyValueParser::new())]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Notebook or script to convert.
    #[arg(value_name = "PATH")]
    pub path: PathBuf,
    /// Where to write the result (default: same name, other extension).
    #[arg(long, short = 'o', value_name = "PATH")]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CatArgs {
    /// Notebook or script to print.
    #[arg(value_name = "PATH")]
    pub path: PathBuf,
    /// Print markdown instead of a percent-format script.
    #[arg(long)]
    pub markdown: bool,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("source").multiple(false)))]
pub struct StampArgs {
    /// Notebook or script to stamp.
    #[arg(value_name = "PATH")]
    pub path: PathBuf,
    /// An RFC 3339 timestamp (e.g. 2024-10-01T00:00:00Z).
    #[arg(long, group = "source")]
    pub timestamp: Option<String>,
    /// A date (YYYY-MM-DD); the stamp is the end of that day.
    #[arg(long, group = "source")]
    pub date: Option<String>,
    /// Use the commit time of a git revision.
    #[arg(long, group = "source")]
    pub rev: Option<String>,
    /// Use the commit time of HEAD.
    #[arg(long, group = "source")]
    pub latest: bool,
    /// Remove the stamp.
    #[arg(long, group = "source")]
    pub clear: bool,
}
