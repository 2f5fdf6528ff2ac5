use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use picfinder::data::repository;
use picfinder::logging::{self, Verbosity};
use picfinder::models::image::IndexedImage;
use picfinder::services::{folder_service, settings_service};
use picfinder::{
    Address, AppConfig, AppState, ScanFrequency, ScanProgress, ScanResult, SearchSnapshot,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file to use instead of the per-user one
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Index database, overrides the config file and PICFINDER_DB
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start watching a folder (a path or a content:// handle)
    Add { folder: String },
    /// Stop watching a folder and drop its indexed images
    Remove { folder: String },
    /// List watched folders
    Folders {
        /// Include removed folders that have not been purged yet
        #[arg(long)]
        all: bool,
    },
    /// Scan one folder, or every watched folder
    Scan {
        folder: Option<String>,
        /// Skip the full scan unless the scan frequency says one is due
        #[arg(long)]
        if_due: bool,
    },
    /// Search extracted text, file names and folder addresses
    Search {
        #[arg(required = true)]
        keywords: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Read queries from stdin, one per line, and print live results
    SearchLive,
    /// Show index statistics
    Stats,
    /// Remove every indexed image but keep the watched folders
    Clear,
    /// Show or set how often a full scan is due (daily, weekly, manual)
    Frequency { value: Option<String> },
    /// Delete removed folders for good and drop images no folder owns
    Purge,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(Verbosity::from_flags(cli.verbose, cli.quiet));

    let mut config = AppConfig::load(cli.config.as_deref()).context("loading config")?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }
    let state = AppState::new(config).context("opening index")?;

    match cli.command {
        Commands::Add { folder } => {
            let folder = folder_service::add_folder(&state.store, &resolve_folder(&folder)?)?;
            println!("Added {} ({})", folder.display_name, folder.folder_path);
        }
        Commands::Remove { folder } => {
            let removed = folder_service::remove_folder(&state.store, &resolve_folder(&folder)?)?;
            println!("Removed folder and {removed} indexed images");
        }
        Commands::Folders { all } => {
            let folders = if all {
                state.store.read(repository::list_folders)?
            } else {
                folder_service::list_active_folders(&state.store)?
            };
            for folder in folders {
                println!(
                    "{}\t{}\t{} images\t{}{}",
                    folder.display_name,
                    folder.folder_path,
                    folder.image_count,
                    format_scan_time(folder.last_scan_at),
                    if folder.is_active { "" } else { "\t(removed)" }
                );
            }
        }
        Commands::Scan { folder, if_due } => run_scan(&state, folder, if_due).await?,
        Commands::Search { keywords, json } => {
            let results = state.search.search(&keywords.join(" "))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_results(&results);
            }
        }
        Commands::SearchLive => run_live_search(&state).await?,
        Commands::Stats => {
            let stats = folder_service::index_stats(&state.store)?;
            let last = state.store.read(settings_service::last_full_scan_at)?;
            println!("Images:         {}", stats.total_images);
            println!("With text:      {}", stats.images_with_text);
            println!("Active folders: {}", stats.active_folders);
            println!("Last full scan: {}", format_scan_time(last));
        }
        Commands::Clear => {
            let removed = folder_service::clear_index(&state.store)?;
            println!("Cleared {removed} indexed images");
        }
        Commands::Frequency { value: None } => {
            let frequency = state.store.read(settings_service::scan_frequency)?;
            println!("{}", frequency.as_str());
        }
        Commands::Frequency { value: Some(value) } => {
            let frequency = ScanFrequency::parse(&value)?;
            state
                .store
                .write(|conn| settings_service::set_scan_frequency(conn, frequency))?;
            println!("Scan frequency set to {}", frequency.as_str());
        }
        Commands::Purge => {
            let folders = folder_service::purge_inactive_folders(&state.store)?;
            let images = folder_service::delete_orphan_images(&state.store)?;
            println!("Purged {folders} folders and {images} orphaned images");
        }
    }

    Ok(())
}

/// Local paths are made absolute so the same folder always maps to the same key.
fn resolve_folder(raw: &str) -> anyhow::Result<Address> {
    let address = Address::parse(raw)?;
    Ok(match address {
        Address::Direct(path) => match std::fs::canonicalize(&path) {
            Ok(absolute) => Address::Direct(absolute),
            Err(_) => Address::Direct(path),
        },
        tree => tree,
    })
}

fn format_scan_time(millis: i64) -> String {
    if millis <= 0 {
        return "never".to_string();
    }
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|at| at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn print_snapshot(snapshot: &SearchSnapshot) {
    println!("== {} ({} matches)", snapshot.query, snapshot.results.len());
    print_results(&snapshot.results);
}

fn print_results(results: &[IndexedImage]) {
    if results.is_empty() {
        println!("No matches");
        return;
    }
    for image in results {
        let preview: String = image
            .extracted_text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .chars()
            .take(80)
            .collect();
        println!("{}\t{}", image.file_path, preview);
    }
}

async fn run_scan(state: &AppState, folder: Option<String>, if_due: bool) -> anyhow::Result<()> {
    let target = folder.as_deref().map(resolve_folder).transpose()?;
    if if_due && target.is_none() {
        let now = chrono::Utc::now().timestamp_millis();
        if !state.store.read(|conn| settings_service::is_scan_due(conn, now))? {
            println!("Full scan not due yet");
            return Ok(());
        }
    }

    let scanner = state.scanner.clone();
    let mut progress = scanner.progress();
    let reporter = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let update = progress.borrow_and_update().clone();
            if update.is_terminal() {
                break;
            }
            if let ScanProgress::Scanning {
                current_item,
                processed,
                total,
            } = update
            {
                eprintln!("[{processed}/{total}] {current_item}");
            }
        }
    });

    let canceller = scanner.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling scan...");
            canceller.cancel();
        }
    });

    let result = tokio::task::spawn_blocking(move || match target {
        Some(folder) => scanner.scan_folder(&folder),
        None => scanner.scan_all_folders(),
    })
    .await?;

    interrupt.abort();
    reporter.abort();

    match result {
        ScanResult::Success { processed, new } => {
            println!("Scan complete: {processed} images processed, {new} new");
            Ok(())
        }
        ScanResult::Error { message } => bail!(message),
    }
}

async fn run_live_search(state: &AppState) -> anyhow::Result<()> {
    let live = state.search.subscribe();
    let mut results = live.results();

    let (line_tx, mut lines) = mpsc::channel::<String>(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if line_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    let mut last_query: Option<String> = None;
    let mut last_printed: Option<String> = None;
    loop {
        tokio::select! {
            line = lines.recv() => match line {
                Some(query) => {
                    live.set_query(query.clone());
                    last_query = Some(query);
                }
                None => break,
            },
            changed = results.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = results.borrow_and_update().clone();
                print_snapshot(&snapshot);
                last_printed = Some(snapshot.query);
            }
        }
    }

    // stdin closed; still answer the final query
    if let Some(query) = last_query.filter(|q| Some(q) != last_printed.as_ref()) {
        let wait = state.config.search_debounce() + Duration::from_secs(5);
        let finished = tokio::time::timeout(wait, results.wait_for(|s| s.query == query)).await;
        if let Ok(Ok(snapshot)) = finished {
            let snapshot = snapshot.clone();
            print_snapshot(&snapshot);
        }
    }
    Ok(())
}
