//! iatf: keeps the index of IATF documents in step with their content.
#![allow(clippy::multiple_crate_versions)]

use clap::{Parser, Subcommand};
use iatf::config::Config;
use iatf::lock::LockDir;
use iatf::rebuild::{self, RebuildEngine, RebuildReport, RebuildStatus};
use iatf::registry::{RegistryStore, WatchRegistry};
use iatf::{parser, query};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "iatf")]
#[command(about = "Self-indexing documents for machine navigation", long_about = None)]
#[command(version)]
struct Args {
    /// Directory for watch state and lock files
    #[arg(long, global = true, value_name = "DIR")]
    state_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Regenerate the index of a document
    Rebuild {
        /// Document to index
        file: PathBuf,
    },
    /// Regenerate the index of every document under a directory
    RebuildAll {
        /// Directory to scan
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// File extensions to match
        #[arg(long, short = 'e', value_name = "EXT")]
        ext: Vec<String>,
    },
    /// Watch a document, list watched documents, or run the watch loop
    Watch {
        /// Document to start watching
        #[arg(conflicts_with_all = ["list", "run"])]
        file: Option<PathBuf>,

        /// List watched documents and directories
        #[arg(long, conflicts_with = "run")]
        list: bool,

        /// Poll watched documents until none are left
        #[arg(long)]
        run: bool,

        /// Poll interval in milliseconds
        #[arg(long, value_name = "MS", requires = "run")]
        interval_ms: Option<u64>,
    },
    /// Watch every document under a directory, including ones added later
    WatchDir {
        /// Directory to watch
        dir: PathBuf,

        /// File extensions to match
        #[arg(long, short = 'e', value_name = "EXT")]
        ext: Vec<String>,
    },
    /// Stop watching a document or directory
    Unwatch {
        /// Document or directory to stop watching
        file: PathBuf,
    },
    /// Check structure, references and index freshness without writing
    Validate {
        /// Document to check
        file: PathBuf,
    },
    /// Print the stored index
    Index {
        /// Document to read
        file: PathBuf,
    },
    /// Print a section by id or title
    Read {
        /// Document to read
        file: PathBuf,

        /// Section id
        #[arg(required_unless_present = "title", conflicts_with = "title")]
        id: Option<String>,

        /// Find the section by title instead
        #[arg(long)]
        title: Option<String>,
    },
    /// Print the cross-reference graph
    Graph {
        /// Document to read
        file: PathBuf,

        /// Show which sections reference each section
        #[arg(long)]
        incoming: bool,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    let running_watch = matches!(args.command, Command::Watch { run: true, .. });
    init_tracing(args.verbose, if running_watch { "info" } else { "warn" });

    let mut cfg = Config::load();
    if let Some(dir) = args.state_dir {
        cfg.state_dir = dir.to_string_lossy().into_owned();
    }
    let engine = RebuildEngine::with_locks(LockDir::new(cfg.lock_dir()));

    match args.command {
        Command::Rebuild { file } => rebuild_command(&engine, &file),
        Command::RebuildAll { dir, ext } => {
            rebuild_all_command(&engine, &dir, &extensions(&cfg, ext))
        }
        Command::Watch {
            file: Some(file), ..
        } => watch_command(&cfg, &file),
        Command::Watch { list: true, .. } => list_command(&cfg),
        Command::Watch {
            run: true,
            interval_ms,
            ..
        } => {
            let interval = interval_ms.map_or_else(|| cfg.poll_interval(), Duration::from_millis);
            run_command(&cfg, &engine, interval)
        }
        Command::Watch { .. } => {
            eprintln!("[ERROR] Specify a file to watch, --list or --run");
            ExitCode::FAILURE
        }
        Command::WatchDir { dir, ext } => watch_dir_command(&cfg, &dir, &extensions(&cfg, ext)),
        Command::Unwatch { file } => unwatch_command(&cfg, &engine, &file),
        Command::Validate { file } => validate_command(&file),
        Command::Index { file } => index_command(&file),
        Command::Read { file, id, title } => read_command(&file, id.as_deref(), title.as_deref()),
        Command::Graph { file, incoming } => graph_command(&file, incoming),
    }
}

fn extensions(cfg: &Config, ext: Vec<String>) -> Vec<String> {
    if ext.is_empty() {
        cfg.file_extensions.clone()
    } else {
        ext
    }
}

fn init_tracing(verbose: bool, default_level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("IATF_LOG").unwrap_or_else(|_| EnvFilter::new(default_level))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_warnings(report: &RebuildReport) {
    for warning in &report.warnings {
        eprintln!("[WARN] {warning}");
    }
}

fn rebuild_command(engine: &RebuildEngine, file: &Path) -> ExitCode {
    match engine.rebuild(file) {
        Ok(report) => {
            match report.status {
                RebuildStatus::UpToDate => println!("[OK] Index up to date: {}", file.display()),
                RebuildStatus::Rebuilt => println!(
                    "[OK] Rebuilt index for {} ({} sections)",
                    file.display(),
                    report.section_count
                ),
            }
            if report.is_clean() {
                ExitCode::SUCCESS
            } else {
                print_warnings(&report);
                ExitCode::from(2)
            }
        }
        Err(e) => {
            eprintln!("[ERROR] {e}");
            ExitCode::FAILURE
        }
    }
}

fn rebuild_all_command(engine: &RebuildEngine, dir: &Path, extensions: &[String]) -> ExitCode {
    let batch = engine.rebuild_all(dir, extensions);
    if batch.results.is_empty() {
        println!("No matching files found in {}", dir.display());
        return ExitCode::SUCCESS;
    }

    for (path, result) in &batch.results {
        match result {
            Ok(report) => {
                println!("[OK] {}", path.display());
                print_warnings(report);
            }
            Err(e) => eprintln!("[ERROR] {e}"),
        }
    }
    println!(
        "\n{} succeeded, {} failed",
        batch.succeeded(),
        batch.failed()
    );

    if batch.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn open_registry(cfg: &Config) -> Result<WatchRegistry, ExitCode> {
    WatchRegistry::open(RegistryStore::in_dir(&cfg.state_dir())).map_err(|e| {
        eprintln!("[ERROR] {e}");
        ExitCode::FAILURE
    })
}

fn watch_command(cfg: &Config, file: &Path) -> ExitCode {
    let mut registry = match open_registry(cfg) {
        Ok(registry) => registry,
        Err(code) => return code,
    };
    match registry.add(file) {
        Ok(entry) => {
            println!("[OK] Watching {}", entry.path.display());
            if entry.last_digest.is_none() {
                println!("     No index yet; it will be built on the next poll");
            }
            println!("     Run 'iatf watch --run' to keep watched documents indexed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("[ERROR] {e}");
            ExitCode::FAILURE
        }
    }
}

fn watch_dir_command(cfg: &Config, dir: &Path, extensions: &[String]) -> ExitCode {
    let mut registry = match open_registry(cfg) {
        Ok(registry) => registry,
        Err(code) => return code,
    };
    match registry.add_dir(dir, extensions) {
        Ok(entries) => {
            println!(
                "[OK] Watching {} ({} document(s) found)",
                dir.display(),
                entries.len()
            );
            for entry in &entries {
                println!("     {}", entry.path.display());
            }
            println!("     Run 'iatf watch --run' to keep watched documents indexed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("[ERROR] {e}");
            ExitCode::FAILURE
        }
    }
}

fn list_command(cfg: &Config) -> ExitCode {
    let registry = match open_registry(cfg) {
        Ok(registry) => registry,
        Err(code) => return code,
    };
    if registry.is_empty() {
        println!("No files being watched");
        return ExitCode::SUCCESS;
    }

    let mut dirs = registry.list_dirs().peekable();
    if dirs.peek().is_some() {
        println!("Watched directories:");
        for dir in dirs {
            println!("  {} [{}]", dir.path.display(), dir.extensions.join(", "));
        }
    }

    println!("Watched files:");
    for entry in registry.list() {
        let last_rebuild = entry
            .last_rebuild_at
            .map_or_else(|| "never".to_string(), |at| at.to_rfc3339());
        println!(
            "  {} [{}] last rebuild: {last_rebuild}",
            entry.path.display(),
            entry.status
        );
        if let Some(error) = &entry.last_error {
            println!("    error: {error}");
        }
    }
    ExitCode::SUCCESS
}

fn run_command(cfg: &Config, engine: &RebuildEngine, interval: Duration) -> ExitCode {
    let mut registry = match open_registry(cfg) {
        Ok(registry) => registry,
        Err(code) => return code,
    };
    if registry.is_empty() {
        println!("No files being watched");
        return ExitCode::SUCCESS;
    }
    println!(
        "Watching {} file(s) every {}ms (Ctrl+C to stop)",
        registry.len(),
        interval.as_millis()
    );
    registry.run(engine, interval);
    ExitCode::SUCCESS
}

fn unwatch_command(cfg: &Config, engine: &RebuildEngine, file: &Path) -> ExitCode {
    let mut registry = match open_registry(cfg) {
        Ok(registry) => registry,
        Err(code) => return code,
    };
    let unwatched = match registry.remove(file) {
        Ok(unwatched) => unwatched,
        Err(e) => {
            eprintln!("[ERROR] {e}");
            return ExitCode::FAILURE;
        }
    };
    if unwatched.is_empty() {
        println!("[OK] Not being watched: {}", file.display());
        return ExitCode::SUCCESS;
    }

    for document in &unwatched.documents {
        if let Err(e) = engine.forget(document) {
            warn!(path = %document.display(), error = %e, "could not remove lock file");
        }
    }
    println!("[OK] Stopped watching {}", file.display());
    if unwatched.directory {
        println!("     and {} document(s) in it", unwatched.documents.len());
    }
    ExitCode::SUCCESS
}

fn validate_command(file: &Path) -> ExitCode {
    let report = match rebuild::validate(file) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("[ERROR] {e}");
            return ExitCode::FAILURE;
        }
    };
    for warning in &report.warnings {
        println!("[WARN] {warning}");
    }
    for error in &report.reference_errors {
        eprintln!("[ERROR] {error}");
    }
    if report.is_valid() {
        println!(
            "[OK] {} is valid ({} sections)",
            file.display(),
            report.section_count
        );
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn read_file(file: &Path) -> Result<String, ExitCode> {
    fs::read_to_string(file).map_err(|e| {
        eprintln!("[ERROR] {}: {e}", file.display());
        ExitCode::FAILURE
    })
}

fn print_lines(result: Result<Vec<String>, iatf::error::QueryError>) -> ExitCode {
    match result {
        Ok(lines) => {
            for line in lines {
                println!("{line}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("[ERROR] {e}");
            ExitCode::FAILURE
        }
    }
}

fn index_command(file: &Path) -> ExitCode {
    match read_file(file) {
        Ok(text) => print_lines(query::stored_index(&text)),
        Err(code) => code,
    }
}

fn read_command(file: &Path, id: Option<&str>, title: Option<&str>) -> ExitCode {
    let text = match read_file(file) {
        Ok(text) => text,
        Err(code) => return code,
    };
    let lines = match (id, title) {
        (_, Some(title)) => query::find_by_title(&text, title)
            .and_then(|id| query::read_section(&text, &id)),
        (Some(id), None) => query::read_section(&text, id),
        (None, None) => {
            eprintln!("[ERROR] Specify a section id or --title");
            return ExitCode::FAILURE;
        }
    };
    print_lines(lines)
}

fn graph_command(file: &Path, incoming: bool) -> ExitCode {
    let text = match read_file(file) {
        Ok(text) => text,
        Err(code) => return code,
    };
    match parser::parse_document(&text) {
        Ok(document) => {
            let name = file.file_name().unwrap_or(file.as_os_str());
            println!("@graph: {}\n", name.to_string_lossy());
            for line in query::graph(&document, incoming) {
                println!("{line}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("[ERROR] {e}");
            ExitCode::FAILURE
        }
    }
}
