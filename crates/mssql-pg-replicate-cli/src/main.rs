//! mssql-pg-replicate CLI - resumable MSSQL to PostgreSQL schema and data replication.

use clap::{Args, Parser, Subcommand, ValueEnum};
use mssql_pg_replicate::{
    Config, Orchestrator, Phase, ProgressSnapshot, ProgressStore, ReplicateError, RunCoordinator,
    RunMode, RunSummary,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "mssql-pg-replicate")]
#[command(about = "Resumable MSSQL to PostgreSQL schema and data replication")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text", value_parser = ["text", "json"])]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info", value_parser = ["debug", "info", "warn", "error"])]
    verbosity: String,

    /// Print a progress snapshot every 10 tables as a JSON line to stderr
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RunArgs {
    /// Restart at the first failed or interrupted table
    #[arg(long, conflicts_with = "start_from_table")]
    resume: bool,

    /// Restart at the named table (Name or schema.Name)
    #[arg(long, value_name = "NAME")]
    start_from_table: Option<String>,

    /// Discard recorded progress before running
    #[arg(long)]
    reset: bool,
}

impl RunArgs {
    fn mode(&self) -> RunMode {
        match (&self.start_from_table, self.resume) {
            (Some(name), _) => RunMode::StartFrom(name.clone()),
            (None, true) => RunMode::Resume,
            (None, false) => RunMode::Fresh,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PhaseArg {
    Schema,
    Data,
}

impl From<PhaseArg> for Phase {
    fn from(arg: PhaseArg) -> Self {
        match arg {
            PhaseArg::Schema => Phase::Schema,
            PhaseArg::Data => Phase::Data,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Recreate source tables in PostgreSQL
    Schema {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Copy table data into the replicated tables
    Data {
        #[command(flatten)]
        run: RunArgs,

        /// Keep existing target rows instead of truncating first
        #[arg(long)]
        no_truncate: bool,

        /// Override rows per committed batch
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        batch_size: Option<u64>,
    },

    /// Show recorded progress without connecting to any database
    Status {
        /// Phase whose progress file to read
        #[arg(long, value_enum)]
        phase: PhaseArg,

        /// Progress file to read instead of the one named in the configuration
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode, ReplicateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    match cli.command {
        Commands::Status { phase, ref file } => {
            let path = match file {
                Some(path) => path.clone(),
                None => Config::load(&cli.config)?.progress_file(phase.into()).clone(),
            };
            print_status(&ProgressStore::open(path), phase.into(), cli.output_json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Schema { ref run } => {
            let config = Config::load(&cli.config)?;
            info!("Loaded configuration from {:?}", cli.config);
            replicate(&cli, config, Phase::Schema, run).await
        }
        Commands::Data {
            ref run,
            no_truncate,
            batch_size,
        } => {
            let mut config = Config::load(&cli.config)?;
            info!("Loaded configuration from {:?}", cli.config);

            if no_truncate {
                config.replication.truncate = false;
            }
            if let Some(size) = batch_size {
                config.replication.batch_size = size as usize;
            }

            replicate(&cli, config, Phase::Data, run).await
        }
    }
}

async fn replicate(
    cli: &Cli,
    config: Config,
    phase: Phase,
    args: &RunArgs,
) -> Result<ExitCode, ReplicateError> {
    let mut progress = ProgressStore::open(config.progress_file(phase));
    let mode = args.mode();
    let mut orchestrator = Orchestrator::connect(config).await?;

    // Only discard progress once both databases are reachable.
    if args.reset {
        progress.reset()?;
    }

    let mut coordinator = RunCoordinator::new();
    if cli.progress {
        coordinator = coordinator.on_progress(print_progress);
    }

    let summary = match phase {
        Phase::Schema => {
            orchestrator
                .replicate_schema(&mut progress, &mode, &mut coordinator)
                .await?
        }
        Phase::Data => {
            orchestrator
                .sync_data(&mut progress, &mode, &mut coordinator)
                .await?
        }
    };

    if cli.output_json {
        println!("{}", summary.to_json()?);
    } else {
        print_summary(&summary, &progress);
    }

    Ok(if summary.all_completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_progress(snapshot: &ProgressSnapshot) {
    if let Ok(line) = serde_json::to_string(snapshot) {
        eprintln!("{}", line);
    }
}

fn print_summary(summary: &RunSummary, progress: &ProgressStore) {
    println!("\n{} phase finished", summary.phase);
    println!("  Duration: {:.2}s", summary.duration_seconds);
    println!("  Tables: {}", summary.tables_total);
    println!("  Succeeded: {}", summary.tables_succeeded);
    println!("  Skipped: {}", summary.tables_skipped);
    println!("  Failed: {}", summary.tables_failed);
    if summary.phase == Phase::Data {
        println!("  Rows: {}", summary.rows_synced);
        println!("  Throughput: {} rows/sec", summary.rows_per_second);
    }

    if !summary.failed_tables.is_empty() {
        println!("\nFailed tables:");
        for full_name in &summary.failed_tables {
            let name = full_name.split_once('.').map_or(full_name.as_str(), |(_, name)| name);
            let error = progress
                .record(name, summary.phase)
                .and_then(|r| r.error.as_deref())
                .unwrap_or("unknown error");
            println!("  {}: {}", full_name, error);
        }
        println!(
            "\nRe-run with `mssql-pg-replicate {} --resume` to continue from the first failed table.",
            summary.phase
        );
    }
}

fn print_status(
    progress: &ProgressStore,
    phase: Phase,
    output_json: bool,
) -> Result<(), ReplicateError> {
    let names: Vec<&str> = progress.table_names().collect();
    let recorded: Vec<(&str, &mssql_pg_replicate::state::PhaseRecord)> = names
        .iter()
        .filter_map(|name| progress.record(name, phase).map(|r| (*name, r)))
        .collect();
    let summary = progress.summary(phase, recorded.len());

    if output_json {
        let tables: Vec<serde_json::Value> = recorded
            .iter()
            .map(|(name, record)| {
                serde_json::json!({
                    "table": name,
                    "status": record.status.as_str(),
                    "rows_synced": record.rows_synced,
                    "error": record.error,
                })
            })
            .collect();
        let output = serde_json::json!({
            "phase": phase,
            "file": progress.path(),
            "summary": summary,
            "tables": tables,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Progress file: {}", progress.path().display());
    println!("Session started: {}", progress.session().session_start);
    println!("Last updated: {}\n", progress.session().last_updated);

    for (name, record) in &recorded {
        let status = record.status.as_str();
        match &record.error {
            Some(error) => {
                println!("  {:<40} {:<12} {:>10}  {}", name, status, record.rows_synced, error)
            }
            None => println!("  {:<40} {:<12} {:>10}", name, status, record.rows_synced),
        }
    }

    println!("\nTotal tables:  {}", summary.total);
    println!("Completed:     {}", summary.completed);
    println!("Failed:        {}", summary.failed);
    println!("In progress:   {}", summary.in_progress);
    println!("Remaining:     {}", summary.remaining);
    println!(
        "Progress:      {}/{} ({}%)",
        summary.completed,
        summary.total,
        summary.percent_complete()
    );
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
