use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "bookkeeper",
    about = "Catalog and search a document library spread across nested archives"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Path to the JSON configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the catalog file
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,

    /// Override the extraction scratch directory
    #[arg(long, global = true)]
    pub scratch_dir: Option<PathBuf>,

    /// Keep extraction scratch directories for debugging
    #[arg(long, global = true)]
    pub keep_artifacts: bool,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan library roots and reconcile the catalog with them
    Scan(ScanArgs),
    /// Search extracted text; every term must match
    Search(SearchArgs),
    /// Materialize a cataloged file and print its path
    Open(OpenArgs),
    /// Copy a cataloged file out to the export directory
    Export(ExportArgs),
    /// Rename a file on disk and in the catalog
    Rename(RenameArgs),
    /// Show what the catalog knows about one path
    Info(InfoArgs),
    /// List files that failed to process
    Bad(BadArgs),
    /// List cataloged locations matching a glob pattern
    Ls(LsArgs),
    /// Show catalog statistics
    Status(StatusArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Scan --

#[derive(Debug, Parser)]
pub struct ScanArgs {
    /// Library roots; defaults to the configured libraries
    pub roots: Vec<PathBuf>,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// Search terms
    #[arg(required = true)]
    pub terms: Vec<String>,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "10")]
    pub count: usize,

    /// Return every result
    #[arg(long)]
    pub all: bool,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Open / Export --

#[derive(Debug, Parser)]
pub struct OpenArgs {
    /// Logical path of the file, archives included
    pub path: String,
}

#[derive(Debug, Parser)]
pub struct ExportArgs {
    /// Logical path of the file, archives included
    pub path: String,

    /// Destination directory; defaults to the configured export_dir
    #[arg(long)]
    pub to: Option<PathBuf>,
}

// -- Rename --

#[derive(Debug, Parser)]
pub struct RenameArgs {
    /// Current path; files inside archives cannot be renamed
    pub old: String,
    /// New path
    pub new: String,
}

// -- Info --

#[derive(Debug, Parser)]
pub struct InfoArgs {
    /// Logical path of the file, archives included
    pub path: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Bad --

#[derive(Debug, Parser)]
pub struct BadArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Ls --

#[derive(Debug, Parser)]
pub struct LsArgs {
    /// Glob pattern applied to logical paths
    pub pattern: String,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "bookkeeper",
            &mut std::io::stdout(),
        );
    }
}
