mod commands;
mod logging;
mod progress;

use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use ditto_core::{AppConfig, Database, ScanManager};
use dotenv::dotenv;
use progress::ScanProgressBar;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let _guard = logging::init();

    let config = match ditto_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    match args.command {
        Some(Commands::Scan) => {
            if let Err(err) = run_scan(&config) {
                error!("Error: {}", err);
                process::exit(1);
            }
        }
        Some(Commands::History { limit }) => {
            if let Err(err) = run_history(&config, limit) {
                error!("Error: {}", err);
            }
        }
        Some(Commands::Groups { limit }) => {
            if let Err(err) = run_groups(&config, limit) {
                error!("Error: {}", err);
            }
        }
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:?}", config);
        }
        None => {
            let _ = Cli::command().print_long_help();
        }
    }

    Ok(())
}

fn run_scan(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let db = Arc::new(Database::open(&config.db_path)?);
    let manager = ScanManager::new(Arc::clone(&db), config.clone())?;

    let active = manager.start("manual")?;
    info!("Scan {} started over {:?}", active.id, config.scan_paths);

    let bar = ScanProgressBar::new();
    while manager.active_scan().is_some() {
        bar.update(&active.progress.snapshot());
        std::thread::sleep(Duration::from_millis(200));
    }
    bar.finish();

    let record = db.get_scan_record(active.id)?;
    let status = match record.status.as_str() {
        "completed" => record.status.green(),
        "cancelled" => record.status.yellow(),
        _ => record.status.red(),
    };

    println!();
    info!(
        "Scan {} {} in {}s — {} files discovered, {} cache hits, {} errors",
        record.id,
        status,
        record.duration_seconds,
        record.files_discovered,
        record.cache_hits,
        record.error_count,
    );
    info!(
        "{} duplicate groups, {} files with duplicates, {} bytes reclaimable",
        format!("{}", record.duplicate_groups).red(),
        format!("{}", record.duplicate_files).red(),
        format!("{}", record.reclaimable_bytes).red(),
    );

    Ok(())
}

fn run_history(config: &AppConfig, limit: i64) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open(&config.db_path)?;

    for record in db.list_recent_scans(limit)? {
        let started = chrono::DateTime::from_timestamp(record.started_at, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "#{:<5} {:<20} {:<10} {:>6}s  {:>9} files  {:>6} groups  {:>14} bytes",
            record.id,
            started,
            record.status,
            record.duration_seconds,
            record.files_discovered,
            record.duplicate_groups,
            record.reclaimable_bytes,
        );
    }

    Ok(())
}

fn run_groups(config: &AppConfig, limit: i64) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open(&config.db_path)?;

    for group in db.top_groups(limit)? {
        let short_hash = &group.content_hash[..group.content_hash.len().min(12)];
        println!(
            "{}  {} × {} bytes  {} reclaimable  [{}]",
            short_hash.cyan(),
            group.file_count,
            group.file_size,
            format!("{}", group.reclaimable_bytes).red(),
            group.file_type,
        );
        for file in db.files_in_group(group.id)? {
            println!("    {}", file.path);
        }
    }

    Ok(())
}
