mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use output::{CollectOutput, InitOutput, OutputWriter, ReportOutput};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use unirepo_core::{Algorithm, DEFAULT_LEVEL, RepairStrategy, Repository, ZstdCompressor};

/// Default repository directory, relative to the working directory.
const DEFAULT_ROOT: &str = ".unirepo-root";

/// Environment variable holding the log filter.
const LOG_ENV: &str = "UNIREPO_LOG";

/// Unirepo - deduplicate files across directories with links into one repository
#[derive(Parser)]
#[command(name = "unirepo")]
#[command(about = "Content-addressed file store that deduplicates files across directories", long_about = None)]
#[command(version)]
struct Cli {
    /// Repository root (defaults to UNIREPO_ROOT env var or ./.unirepo-root)
    #[arg(short, long, global = true, env = "UNIREPO_ROOT")]
    repo: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Worker threads for hashing and compression (defaults to the CPU count)
    #[arg(short, long, global = true)]
    jobs: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new repository
    Init {
        /// Hash algorithm to use
        #[arg(long, default_value = "sha256")]
        algo: String,
    },

    /// Move files into the repository and replace them with links
    Store {
        /// Files or directories to store
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Remove the links of the current directory's dependencies
    Deflate,

    /// Recreate missing links for the current directory's dependencies
    Inflate,

    /// Export objects added since the last export, compressed
    Export {
        /// Output directory (defaults to ./export)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Compression level
        #[arg(short, long, default_value_t = DEFAULT_LEVEL, value_parser = clap::value_parser!(i32).range(0..=9))]
        compression: i32,
    },

    /// Verify dependencies against their registered hashes
    Check {
        /// Remove mismatched entries from the registry
        #[arg(long, conflicts_with_all = ["force_fix", "store"])]
        drop: bool,

        /// Re-link mismatched files to an existing object for their current content
        #[arg(long, conflicts_with = "store")]
        force_fix: bool,

        /// Store the current content of mismatched files and update the registry
        #[arg(long)]
        store: bool,

        /// Check every registered directory instead of the current one
        #[arg(long)]
        global: bool,
    },

    /// List the dependencies of every registered directory
    Collect,

    /// Delete objects no registered directory depends on
    Prune {
        /// Dry run - show what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output = OutputWriter::new(cli.json);
    match run(cli, &output) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output.write_error(&e, 1);
            ExitCode::from(1)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli, output: &OutputWriter) -> Result<()> {
    if let Some(jobs) = cli.jobs {
        rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build_global()
            .context("Failed to configure worker pool")?;
    }

    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    // Repository root: --repo > UNIREPO_ROOT (handled by clap) > ./.unirepo-root
    let root = cli.repo.unwrap_or_else(|| cwd.join(DEFAULT_ROOT));
    tracing::debug!(root = %root.display(), "using repository");

    match cli.command {
        Commands::Init { algo } => cmd_init(&root, &algo, output),
        Commands::Store { paths } => cmd_store(&root, &paths, output),
        Commands::Deflate => cmd_deflate(&root, &cwd, output),
        Commands::Inflate => cmd_inflate(&root, &cwd, output),
        Commands::Export {
            output: dir,
            compression,
        } => {
            let dir = dir.unwrap_or_else(|| cwd.join("export"));
            cmd_export(&root, &dir, compression, output)
        }
        Commands::Check {
            drop,
            force_fix,
            store,
            global,
        } => {
            let strategy = match (drop, force_fix, store) {
                (true, _, _) => RepairStrategy::Drop,
                (_, true, _) => RepairStrategy::ForceFix,
                (_, _, true) => RepairStrategy::Store,
                _ => RepairStrategy::None,
            };
            cmd_check(&root, &cwd, strategy, global, output)
        }
        Commands::Collect => cmd_collect(&root, output),
        Commands::Prune { dry_run } => cmd_prune(&root, dry_run, output),
    }
}

fn open(root: &Path) -> Result<Repository> {
    Repository::open(root)
        .with_context(|| format!("Failed to open repository at {}", root.display()))
}

fn cmd_init(root: &Path, algo: &str, output: &OutputWriter) -> Result<()> {
    let algorithm = Algorithm::parse(algo)?;

    let repo = Repository::init(root, algorithm)
        .with_context(|| format!("Failed to initialize repository at {}", root.display()))?;

    let data = InitOutput {
        success: true,
        result_code: 0,
        root: repo.root().display().to_string(),
        algorithm: algorithm.as_str().to_string(),
    };

    output.write(&data, || {
        format!(
            "Initialized unirepo repository at {}\nAlgorithm: {}\n",
            repo.root().display(),
            algorithm.as_str()
        )
    })
}

fn cmd_store(root: &Path, paths: &[PathBuf], output: &OutputWriter) -> Result<()> {
    let repo = Repository::open_or_init(root, Algorithm::default())
        .with_context(|| format!("Failed to open repository at {}", root.display()))?;

    let report = repo.store_all(paths);
    output.write(&ReportOutput::ok(&report), || output::store_text(&report))?;

    if !report.failures.is_empty() {
        anyhow::bail!("{} paths could not be stored", report.failures.len());
    }
    Ok(())
}

fn cmd_deflate(root: &Path, consumer: &Path, output: &OutputWriter) -> Result<()> {
    let repo = open(root)?;
    let report = repo
        .deflate(consumer)
        .with_context(|| format!("Failed to deflate {}", consumer.display()))?;
    output.write(&ReportOutput::ok(&report), || output::deflate_text(&report))
}

fn cmd_inflate(root: &Path, consumer: &Path, output: &OutputWriter) -> Result<()> {
    let repo = open(root)?;
    let report = repo
        .inflate(consumer)
        .with_context(|| format!("Failed to inflate {}", consumer.display()))?;
    output.write(&ReportOutput::ok(&report), || output::inflate_text(&report))
}

fn cmd_export(root: &Path, dir: &Path, level: i32, output: &OutputWriter) -> Result<()> {
    let repo = open(root)?;
    let report = repo
        .export(dir, &ZstdCompressor::new(level))
        .with_context(|| format!("Failed to export to {}", dir.display()))?;
    output.write(&ReportOutput::ok(&report), || output::export_text(&report))
}

fn cmd_check(
    root: &Path,
    consumer: &Path,
    strategy: RepairStrategy,
    global: bool,
    output: &OutputWriter,
) -> Result<()> {
    let repo = open(root)?;
    let report = if global {
        repo.check_global(strategy)
            .context("Failed to check registered directories")?
    } else {
        repo.check(consumer, strategy)
            .with_context(|| format!("Failed to check {}", consumer.display()))?
    };
    output.write(&ReportOutput::ok(&report), || output::check_text(&report))
}

fn cmd_collect(root: &Path, output: &OutputWriter) -> Result<()> {
    let repo = open(root)?;
    let report = repo
        .collect_usage()
        .context("Failed to collect dependencies")?;
    output.write(&CollectOutput::new(&report), || output::collect_text(&report))
}

fn cmd_prune(root: &Path, dry_run: bool, output: &OutputWriter) -> Result<()> {
    let repo = open(root)?;
    let report = repo
        .prune(dry_run)
        .context("Failed to prune unreferenced objects")?;
    output.write(&ReportOutput::ok(&report), || output::prune_text(&report))
}
