use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use dedupe_cli::commands;
use dedupe_core::config::{self, AppConfig};
use dedupe_core::consolidate::ConsolidateRequest;
use dedupe_core::models::{GroupQuery, ScanStatus};
use dedupe_core::{DedupeError, DedupeService};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const PROGRESS_POLL: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        match err.downcast_ref::<DedupeError>() {
            Some(core_err) => eprintln!("error[{}]: {err:#}", core_err.kind()),
            None => eprintln!("error: {err:#}"),
        }
        std::process::exit(1);
    }
}

#[derive(Parser)]
#[command(name = "dedupe")]
#[command(about = "Find duplicate files and consolidate them", long_about = None)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the configured roots and follow progress until done
    Scan {
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Show progress of a scan task
    Progress {
        task_id: String,
        #[arg(long)]
        json: bool,
    },
    /// List duplicate groups, largest files first
    Groups {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        page_size: u32,
        /// Only groups whose files are at least this many bytes
        #[arg(long, default_value_t = 0)]
        min_size: u64,
        /// Only files with this extension, e.g. jpg or .jpg
        #[arg(long)]
        ext: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show one catalogued file
    File {
        id: i64,
        /// Include a content preview
        #[arg(long, default_value_t = false)]
        preview: bool,
    },
    /// Replace a duplicate group with one file under the output root
    Consolidate {
        /// Comma-separated file IDs of one duplicate group
        #[arg(long)]
        ids: String,
        /// File name of the consolidated copy
        #[arg(long)]
        name: String,
        /// Directory relative to the output root
        #[arg(long, default_value = "")]
        target: String,
        #[arg(long)]
        json: bool,
    },
    /// Catalogue statistics
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Show the directory tree of the output root
    Tree {
        #[arg(long)]
        json: bool,
    },
    /// Create a directory under the output root
    Mkdir {
        /// Parent directory relative to the output root ("" for the root)
        parent: String,
        name: String,
    },
    /// List past consolidations and operation logs
    History {
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long)]
        json: bool,
    },
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = config::load(cli.config.as_deref())?;
    let service = DedupeService::open(&cfg).await?;

    match cli.command {
        Commands::Scan { json } => run_scan(&service, &cfg, json).await,
        Commands::Progress { task_id, json } => {
            let progress = service.scan_progress(&task_id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&progress)?);
            } else {
                println!("{}", commands::progress_line(&progress));
            }
            Ok(())
        }
        Commands::Groups {
            page,
            page_size,
            min_size,
            ext,
            json,
        } => {
            let query = GroupQuery {
                page,
                page_size,
                min_size,
                ext,
            };
            let result = service.duplicate_groups(&query).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!(
                    "{} duplicate groups (page {}, {} per page)",
                    result.total, result.page, result.page_size
                );
                for group in &result.groups {
                    print!("{}", commands::render_group(group));
                }
            }
            Ok(())
        }
        Commands::File { id, preview } => {
            let value = if preview {
                serde_json::to_value(service.file_preview(id).await?)?
            } else {
                serde_json::to_value(service.file_detail(id).await?)?
            };
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Commands::Consolidate {
            ids,
            name,
            target,
            json,
        } => {
            let req = ConsolidateRequest {
                file_ids: commands::parse_ids(&ids)?,
                new_file_name: name,
                target_path: target,
            };
            let outcome = service.consolidate(&req).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!(
                    "consolidated {} files into {}",
                    outcome.processed_count,
                    outcome.target_full_path.display()
                );
                for path in &outcome.failed_deletions {
                    println!("  not deleted: {path}");
                }
            }
            Ok(())
        }
        Commands::Stats { json } => {
            let stats = service.statistics().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("files:            {}", stats.total_files);
                println!("total size:       {}", commands::human_bytes(stats.total_size));
                println!("duplicate files:  {}", stats.duplicate_files);
                println!("duplicate size:   {}", commands::human_bytes(stats.duplicate_size));
                println!("reclaimable:      {}", commands::human_bytes(stats.saved_space));
            }
            Ok(())
        }
        Commands::Tree { json } => {
            let tree = service.output_tree().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tree)?);
            } else {
                print!("{}", commands::render_tree(&tree));
            }
            Ok(())
        }
        Commands::Mkdir { parent, name } => {
            let created = service.create_directory(&parent, &name).await?;
            println!("{created}");
            Ok(())
        }
        Commands::History { limit, json } => {
            let completed = service.completed_files(limit).await?;
            let logs = service.operation_logs(limit).await?;
            if json {
                let value = serde_json::json!({
                    "completed_files": completed,
                    "operation_logs": logs,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                for log in &logs {
                    println!(
                        "{} [{}] {}{}",
                        log.created_at.format("%Y-%m-%d %H:%M:%S"),
                        log.result_status,
                        log.description,
                        log.error_message
                            .as_deref()
                            .map(|e| format!(" ({e})"))
                            .unwrap_or_default()
                    );
                }
            }
            Ok(())
        }
    }
}

async fn run_scan(service: &DedupeService, cfg: &AppConfig, json: bool) -> Result<()> {
    let handle = service.start_scan().await?;
    let task_id = handle.task_id.clone();
    info!(task_id = %task_id, roots = ?cfg.paths.scan_paths, "scanning");

    let waiter = tokio::spawn(handle.wait());
    loop {
        let progress = service.scan_progress(&task_id).await?;
        if progress.status.is_terminal() {
            break;
        }
        if !json {
            eprintln!("{}", commands::progress_line(&progress));
        }
        tokio::time::sleep(PROGRESS_POLL).await;
    }
    waiter.await?;

    let task = service.scan_task(&task_id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&task)?);
    } else {
        println!("{}", commands::progress_line(&task.progress()));
    }
    if task.status == ScanStatus::Failed {
        bail!(
            "scan {} failed: {}",
            task_id,
            task.error.unwrap_or_else(|| "unknown error".into())
        );
    }
    Ok(())
}
