//! TSDB Manager CLI
//!
//! Command-line interface for index operations on one node:
//! - Register leftover index files
//! - Build index files from WAL segments
//! - Run the build scheduler
//! - Inspect an index file

use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tsdb_manager::index::{ensure_dirs, read_index, BuildScheduler, LocalPublisher, TsdbManager};
use tsdb_manager::storage::{list_wals, remove_wals, WalIdentifier};
use tsdb_manager::{generate_default_config, Config, LoggingConfig};

#[derive(Parser)]
#[command(name = "tsdb-manager")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Builds and recovers multi-tenant TSDB index files")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: standard locations, then environment)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table, global = true)]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register index files left on disk and list them
    Start,

    /// Build index files from WAL segments
    Build {
        /// Build timestamp (default: now). Supports ISO 8601 or Unix seconds
        #[arg(long)]
        ts: Option<String>,
        /// WAL segment ids in Unix seconds (default: all segments)
        #[arg(long = "wal")]
        wals: Vec<i64>,
        /// Delete the segments after a successful build
        #[arg(long)]
        remove: bool,
    },

    /// Register leftover files, then build on a schedule until Ctrl-C
    Run,

    /// Print the tenants and series of an index file
    Inspect {
        /// Path to a .tsdb file
        path: PathBuf,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        return write_default_config(output.as_deref());
    }

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_logging(&config.logging);

    match cli.command {
        Commands::Start => {
            let (manager, publisher) = open_manager(&config)?;
            let summary = manager.start()?;
            let registered = publisher.registered()?;

            match cli.format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "summary": summary,
                    "indices": registered,
                }))?,
                OutputFormat::Table => {
                    println!(
                        "{} bucket(s), {} index file(s), {} failure(s)",
                        summary.buckets, summary.indices, summary.failures
                    );
                    println!();
                    println!("{:<20} {:<9} {:<9} PATH", "BUCKET", "VERIFIED", "READONLY");
                    for index in registered {
                        println!(
                            "{:<20} {:<9} {:<9} {}",
                            index.bucket,
                            index.verified,
                            index.read_only,
                            index.path.display()
                        );
                    }
                }
            }
        }

        Commands::Build { ts, wals, remove } => {
            let (manager, _) = open_manager(&config)?;
            let ts = match ts.as_deref() {
                None | Some("now") => Utc::now(),
                Some(s) => parse_timestamp(s)?,
            };
            let ids = if wals.is_empty() {
                list_wals(manager.dir())?
            } else {
                wals.into_iter()
                    .map(|secs| {
                        Utc.timestamp_opt(secs, 0)
                            .single()
                            .map(WalIdentifier::new)
                            .with_context(|| format!("invalid WAL id {}", secs))
                    })
                    .collect::<anyhow::Result<Vec<_>>>()?
            };

            let report = manager.build_from_wals(ts, &ids)?;
            if remove {
                remove_wals(manager.dir(), &ids)?;
            }

            match cli.format {
                OutputFormat::Json => print_json(&report)?,
                OutputFormat::Table => {
                    println!(
                        "Built {} period(s) from {} WAL segment(s), {} series",
                        report.periods.len(),
                        ids.len(),
                        report.series
                    );
                    for period in &report.periods {
                        println!(
                            "  {:<20} {:>8} series  {}",
                            period.bucket,
                            period.series,
                            period.path.display()
                        );
                    }
                }
            }
        }

        Commands::Run => {
            let (manager, _) = open_manager(&config)?;
            let summary = manager.start()?;
            tracing::info!(
                buckets = summary.buckets,
                indices = summary.indices,
                failures = summary.failures,
                "manager ready"
            );

            let scheduler = Arc::new(BuildScheduler::new(
                Arc::new(manager),
                config.schedule_config(),
            ));
            let handle = scheduler.clone().start();

            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutting down...");
            scheduler.stop().await;
            handle.abort();
        }

        Commands::Inspect { path } => {
            let (header, contents) = read_index(&path)
                .with_context(|| format!("reading {}", path.display()))?;

            match cli.format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "from": header.from,
                    "through": header.through,
                    "checksum": format!("{:08x}", header.body_checksum),
                    "series": contents.series,
                }))?,
                OutputFormat::Table => {
                    println!("File:     {}", path.display());
                    println!("Range:    {} .. {}", format_ms(header.from), format_ms(header.through));
                    println!("Checksum: {:08x}", header.body_checksum);
                    println!("Series:   {}", contents.series.len());
                    for tenant in contents.tenants() {
                        println!();
                        println!("tenant {}", tenant);
                        for series in contents.series_for_tenant(tenant) {
                            println!(
                                "  {} {} ({} chunks)",
                                series.fingerprint,
                                series.labels,
                                series.chunks.len()
                            );
                        }
                    }
                }
            }
        }

        Commands::Config { .. } => unreachable!("handled before loading config"),
    }

    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tsdb_manager={}", logging.level)));
    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn open_manager(config: &Config) -> anyhow::Result<(TsdbManager, Arc<LocalPublisher>)> {
    let root = config.data_dir();
    ensure_dirs(&root).with_context(|| format!("creating directories under {}", root.display()))?;

    let publisher = Arc::new(LocalPublisher::new());
    let manager = TsdbManager::new(
        config.manager_config(),
        config.table_ranges()?,
        publisher.clone(),
    );
    Ok((manager, publisher))
}

fn parse_timestamp(s: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let secs: i64 = s
        .parse()
        .with_context(|| format!("invalid timestamp format: {}", s))?;
    Utc.timestamp_opt(secs, 0)
        .single()
        .with_context(|| format!("timestamp out of range: {}", s))
}

fn format_ms(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn write_default_config(output: Option<&Path>) -> anyhow::Result<()> {
    let content = generate_default_config();
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("writing {}", path.display()))?;
            eprintln!("Config written to {}", path.display());
        }
        None => print!("{}", content),
    }
    Ok(())
}
