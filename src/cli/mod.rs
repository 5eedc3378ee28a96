//! # CLI Module
//!
//! Command-line interface for the duplicate media scanner.
//!
//! ## Usage
//! ```bash
//! # Scan folders for duplicates
//! media-dedup scan ~/Pictures /Volumes/Backup
//!
//! # Skip small files and take the fast path for tiny ones
//! media-dedup scan ~/Pictures --min-size 100000 --fast
//!
//! # JSON output under a fixed session id, then reopen it later
//! media-dedup scan ~/Pictures --output json --session nightly
//! media-dedup resume --session nightly
//!
//! # Show which sources a scan would use
//! media-dedup sources ~/Pictures /Volumes/Backup
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use console::{style, Term};
use duplicate_media_scanner::core::config::{default_db_path, ScanConfig};
use duplicate_media_scanner::core::session::{ScanCheckpoint, ScanSession, SessionState, SessionSummary};
use duplicate_media_scanner::core::source::{LocalSource, MediaSource, SourceCatalog, StaticCatalog};
use duplicate_media_scanner::core::store::{MetadataStore, SqliteStore};
use duplicate_media_scanner::core::DuplicateGroup;
use duplicate_media_scanner::error::{ErrorRecord, Result, ScannerError};
use duplicate_media_scanner::events::{
    Event, EventChannel, EventReceiver, ProgressSnapshot, SnapshotChannel, SnapshotReceiver,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Duplicate Media Scanner - find identical photos and videos, safely
#[derive(Parser, Debug)]
#[command(name = "media-dedup")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan directories for duplicate media
    Scan {
        /// Directories to scan
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Metadata database path
        #[arg(long)]
        db: Option<PathBuf>,

        /// Session id (random when omitted)
        #[arg(long)]
        session: Option<String>,

        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Ignore files smaller than this many bytes
        #[arg(long)]
        min_size: Option<u64>,

        /// Ignore files larger than this many bytes
        #[arg(long)]
        max_size: Option<u64>,

        /// Partial fingerprint chunk size in bytes
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Take full hashes from the partial read when it covers the whole file
        #[arg(long)]
        fast: bool,

        /// Include hidden files
        #[arg(long)]
        include_hidden: bool,

        #[command(flatten)]
        display: DisplayArgs,
    },

    /// Continue or reopen a session stored in the database
    Resume {
        /// Session id to resume
        #[arg(long, required = true)]
        session: String,

        /// Metadata database path
        #[arg(long)]
        db: Option<PathBuf>,

        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        display: DisplayArgs,
    },

    /// List the sources a scan of these paths would use
    Sources {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "pretty")]
        output: OutputFormat,
    },
}

#[derive(clap::Args, Debug, Clone, Copy)]
struct DisplayArgs {
    /// Output format
    #[arg(short, long, default_value = "pretty")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Human-readable output with colors
    Pretty,
    /// JSON output for scripting
    Json,
    /// Minimal output (removable duplicates only)
    Minimal,
}

/// Run the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            paths,
            db,
            session,
            config,
            min_size,
            max_size,
            chunk_size,
            fast,
            include_hidden,
            display,
        } => {
            duplicate_media_scanner::init_tracing(display.verbose);
            let mut config = load_config(config.as_deref())?;
            if let Some(bytes) = min_size {
                config = config.min_size(bytes);
            }
            if let Some(bytes) = max_size {
                config = config.max_size(bytes);
            }
            if let Some(bytes) = chunk_size {
                config = config.partial_chunk_size(bytes);
            }
            if fast {
                config = config.fast_scan(true);
            }
            if include_hidden {
                config = config.include_hidden(true);
            }
            run_scan(paths, db, session, config, display)
        }
        Commands::Resume {
            session,
            db,
            config,
            display,
        } => {
            duplicate_media_scanner::init_tracing(display.verbose);
            let config = load_config(config.as_deref())?;
            run_resume(session, db, config, display)
        }
        Commands::Sources { paths, output } => {
            duplicate_media_scanner::init_tracing(false);
            list_sources(&paths, output)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<ScanConfig> {
    match path {
        Some(path) => ScanConfig::from_toml_file(path),
        None => Ok(ScanConfig::default()),
    }
}

fn open_store(db: Option<PathBuf>) -> Result<Arc<dyn MetadataStore>> {
    let path = db.unwrap_or_else(default_db_path);
    Ok(Arc::new(SqliteStore::open(&path)?))
}

fn local_sources(paths: &[PathBuf]) -> StaticCatalog {
    let mut catalog = StaticCatalog::default();
    for path in paths {
        let root = std::fs::canonicalize(path).unwrap_or_else(|_| path.clone());
        catalog.add(Arc::new(LocalSource::new(root)));
    }
    catalog
}

fn run_scan(
    paths: Vec<PathBuf>,
    db: Option<PathBuf>,
    session_id: Option<String>,
    config: ScanConfig,
    display: DisplayArgs,
) -> Result<()> {
    let term = Term::stderr();
    print_header(&term, display.output);

    let store = open_store(db)?;
    let catalog = local_sources(&paths);
    let (events, event_rx) = EventChannel::new();
    let (snapshots, snapshot_rx) = SnapshotChannel::new();

    let mut builder = ScanSession::builder(store)
        .config(config)
        .sources_from(&catalog)
        .events(events)
        .snapshots(snapshots);
    if let Some(id) = session_id {
        builder = builder.session_id(id);
    }
    let session = builder.build()?;

    session.start()?;
    let summary = follow(&session, snapshot_rx, event_rx, display);
    report(&term, &session, &summary, display);
    Ok(())
}

fn run_resume(
    session_id: String,
    db: Option<PathBuf>,
    config: ScanConfig,
    display: DisplayArgs,
) -> Result<()> {
    let term = Term::stderr();
    print_header(&term, display.output);

    let store = open_store(db)?;
    let checkpoint = ScanCheckpoint::load(store.as_ref(), &session_id)?;

    let mut catalog = StaticCatalog::default();
    for id in checkpoint.sources.keys() {
        let source = LocalSource::from_id(id).ok_or_else(|| {
            ScannerError::Config(format!(
                "source {id} is not a local directory and cannot be reopened from the command line"
            ))
        })?;
        catalog.add(Arc::new(source));
    }

    let (events, event_rx) = EventChannel::new();
    let (snapshots, snapshot_rx) = SnapshotChannel::new();
    let session = ScanSession::builder(store)
        .config(config)
        .sources_from(&catalog)
        .events(events)
        .snapshots(snapshots)
        .resume_from_checkpoint(session_id)?;

    if session.state() == SessionState::Paused {
        session.resume()?;
    }
    let summary = follow(&session, snapshot_rx, event_rx, display);
    report(&term, &session, &summary, display);
    Ok(())
}

/// Drive a progress bar from the snapshot stream until the session settles
fn follow(
    session: &ScanSession,
    snapshots: SnapshotReceiver,
    events: EventReceiver,
    display: DisplayArgs,
) -> SessionSummary {
    let progress = if display.output == OutputFormat::Pretty {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} {prefix:.bold} {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        Some(pb)
    } else {
        None
    };

    let done = Arc::new(AtomicBool::new(false));
    let ui = {
        let done = Arc::clone(&done);
        let progress = progress.clone();
        thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                if let Some(snapshot) = snapshots.recv_timeout(Duration::from_millis(100)) {
                    if let Some(ref pb) = progress {
                        render_snapshot(pb, &snapshot);
                    }
                }
                for event in events.drain() {
                    if let Some(ref pb) = progress {
                        render_event(pb, &event, display.verbose);
                    }
                }
            }
        })
    };

    let summary = session.wait();
    done.store(true, Ordering::SeqCst);
    ui.join().ok();

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    summary
}

fn render_snapshot(pb: &ProgressBar, snapshot: &ProgressSnapshot) {
    pb.set_prefix(snapshot.state.to_string());

    let found = if snapshot.media_found.is_final() {
        format!("{} media files", snapshot.media_found.value())
    } else {
        format!("{}+ media files", snapshot.media_found.value())
    };
    let work = match snapshot.phase_progress {
        Some(progress) => format!(" | {}/{} hashed", progress.completed, progress.total),
        None => String::new(),
    };
    let current = snapshot
        .current_path
        .as_deref()
        .map(|path| format!(" | {path}"))
        .unwrap_or_default();

    pb.set_message(format!(
        "{found} | {} groups | {} read{work}{current}",
        snapshot.groups_found,
        format_bytes(snapshot.bytes_hashed)
    ));
}

fn render_event(pb: &ProgressBar, event: &Event, verbose: bool) {
    match event {
        Event::GroupConfirmed(group) if verbose => {
            pb.println(format!(
                "  {} {} copies of {}",
                style("≡").yellow(),
                group.member_count(),
                format_bytes(group.size)
            ));
        }
        Event::Error(record) if verbose => {
            pb.println(format!("  {} {}", style("!").red(), record.message));
        }
        Event::SourceEnumerated {
            source_id,
            media_files,
        } => {
            pb.println(format!(
                "  {} {} ({} media files)",
                style("✓").green(),
                source_id,
                media_files
            ));
        }
        _ => {}
    }
}

fn print_header(term: &Term, output: OutputFormat) {
    if output == OutputFormat::Pretty {
        term.write_line(&format!(
            "{} {}",
            style("Duplicate Media Scanner").bold().cyan(),
            style(concat!("v", env!("CARGO_PKG_VERSION"))).dim()
        ))
        .ok();
        term.write_line("").ok();
    }
}

fn report(term: &Term, session: &ScanSession, summary: &SessionSummary, display: DisplayArgs) {
    let groups = session.groups();
    match display.output {
        OutputFormat::Pretty => {
            print_pretty_results(term, summary, &groups, &session.errors(), display.verbose)
        }
        OutputFormat::Json => print_json_results(summary, &groups, &session.errors()),
        OutputFormat::Minimal => print_minimal_results(&groups),
    }
}

fn print_pretty_results(
    term: &Term,
    summary: &SessionSummary,
    groups: &[DuplicateGroup],
    errors: &[ErrorRecord],
    verbose: bool,
) {
    let headline = match summary.state {
        SessionState::Completed => format!("{} Scan complete", style("✓").green().bold()),
        other => format!("{} Scan {}", style("‖").yellow().bold(), other),
    };
    term.write_line(&headline).ok();
    term.write_line("").ok();

    term.write_line(&format!(
        "  {} files tracked in {:.1}s (session {})",
        style(summary.records.total()).cyan(),
        summary.elapsed_ms as f64 / 1000.0,
        style(&summary.session_id).dim()
    ))
    .ok();
    term.write_line(&format!(
        "  {} duplicate groups, {} removable copies",
        style(summary.groups).cyan(),
        style(summary.duplicate_files).cyan()
    ))
    .ok();
    term.write_line(&format!(
        "  {} potential space savings",
        style(format_bytes(summary.reclaimable_bytes)).yellow()
    ))
    .ok();
    if summary.errors > 0 {
        term.write_line(&format!(
            "  {} problems logged",
            style(summary.errors).red()
        ))
        .ok();
    }
    term.write_line("").ok();

    if groups.is_empty() {
        term.write_line("  No duplicates found.").ok();
    } else {
        term.write_line(&format!("{}", style("Duplicate Groups:").bold().underlined()))
            .ok();
        term.write_line("").ok();

        for (i, group) in groups.iter().enumerate() {
            term.write_line(&format!(
                "  {} {} files of {} ({} reclaimable)",
                style(format!("Group {}:", i + 1)).bold(),
                group.member_count(),
                format_bytes(group.size),
                format_bytes(group.reclaimable_bytes())
            ))
            .ok();
            if verbose {
                term.write_line(&format!("    {}", style(group.id.as_str()).dim()))
                    .ok();
            }
            for (idx, key) in group.members.iter().enumerate() {
                let marker = if idx == 0 {
                    style("★").green().to_string()
                } else {
                    style("○").dim().to_string()
                };
                term.write_line(&format!("    {} {}", marker, display_key(key)))
                    .ok();
            }
            term.write_line("").ok();
        }
    }

    if verbose && !errors.is_empty() {
        term.write_line(&format!("{}", style("Problems:").bold().underlined()))
            .ok();
        for record in errors {
            term.write_line(&format!("  {} {}", style("!").red(), record.message))
                .ok();
        }
        term.write_line("").ok();
    }

    term.write_line(&format!(
        "{}",
        style("No files were deleted. Review carefully before taking action.").dim()
    ))
    .ok();
}

fn print_json_results(summary: &SessionSummary, groups: &[DuplicateGroup], errors: &[ErrorRecord]) {
    let output = serde_json::json!({
        "summary": summary,
        "groups": groups,
        "errors": errors,
    });

    match serde_json::to_string_pretty(&output) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("Failed to encode results: {e}"),
    }
}

/// Every member but the first of each group, one absolute path per line
fn print_minimal_results(groups: &[DuplicateGroup]) {
    for group in groups {
        for key in group.members.iter().skip(1) {
            println!("{}", display_key(key));
        }
    }
}

fn list_sources(paths: &[PathBuf], output: OutputFormat) -> Result<()> {
    let catalog = local_sources(paths);
    let descriptors = catalog.list_sources();

    match output {
        OutputFormat::Json => match serde_json::to_string_pretty(&descriptors) {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("Failed to encode sources: {e}"),
        },
        OutputFormat::Minimal => {
            for descriptor in &descriptors {
                println!("{}", descriptor.id);
            }
        }
        OutputFormat::Pretty => {
            let term = Term::stdout();
            for source in catalog.sources() {
                let descriptor = source.descriptor();
                let reachable = Path::new(&descriptor.root).is_dir();
                let marker = if reachable {
                    style("✓").green()
                } else {
                    style("✗").red()
                };
                term.write_line(&format!(
                    "  {} {} [{}] {}",
                    marker,
                    style(&descriptor.id).bold(),
                    descriptor.kind,
                    style(&descriptor.root).dim()
                ))
                .ok();
            }
        }
    }
    Ok(())
}

/// Absolute path for local members, `source:path` otherwise
fn display_key(key: &duplicate_media_scanner::core::FileKey) -> String {
    match LocalSource::from_id(&key.source_id) {
        Some(source) => {
            let full = source.root().join(&key.path);
            match dirs::home_dir().and_then(|home| full.strip_prefix(home).ok().map(Path::to_path_buf)) {
                Some(relative) => format!("~/{}", relative.display()),
                None => full.display().to_string(),
            }
        }
        None => key.to_string(),
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
