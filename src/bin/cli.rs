//! Climbing area aggregator CLI
//!
//! Runs parser passes against local storage and exports the stored areas.

use std::path::PathBuf;
use std::sync::Arc;

use aggregator::{
    error::Result,
    models::{Config, parse_extended_settings},
    parsing::{CheckpointStore, ParserDeps, ParserRegistry},
    pipeline::{
        AutoResume, DriveOutcome, Driver, Pass, ResumePrompt, RunRequest, SinglePass,
        WorkerOptions,
    },
    storage::{self, LocalStorage},
    utils::{
        http,
        log::{ErrorLog, FileErrorLog},
    },
};
use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use tokio_util::sync::CancellationToken;

/// Climbing area aggregator
#[derive(Parser, Debug)]
#[command(
    name = "aggregator",
    version,
    about = "Pulls climbing areas from external sources into local storage"
)]
struct Cli {
    /// Path to storage directory containing config.toml
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse a source into storage, resuming from its checkpoint
    Parse {
        /// Source identifier: "rockclimbing.com", a .jsonl/.json path or URL
        source: String,

        /// Areas per chunk (default: ingest.chunk_size)
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Stop a pass after this many areas (default: ingest.max_results)
        #[arg(long)]
        max_results: Option<usize>,

        /// Continue automatically while passes make progress
        #[arg(long, conflicts_with = "once")]
        yes: bool,

        /// Run a single pass without prompting
        #[arg(long)]
        once: bool,

        /// Source options as `-key value` pairs, e.g. `-region europe -restart true`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        options: Vec<String>,
    },

    /// Export every stored area into one JSON document
    Dump {
        /// Output file (default: {storage_dir}/dump.json)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// List the available parsers
    Sources,

    /// Validate configuration file
    Validate,

    /// Show stored areas and saved checkpoints
    Info,
}

/// Asks the operator on the terminal.
struct TerminalPrompt;

impl ResumePrompt for TerminalPrompt {
    fn confirm_resume(&mut self, pass: &Pass) -> bool {
        let prompt = format!(
            "Finished at {}. Continue from last checkpoint?",
            pass.finished_at.format("%Y-%m-%d %H:%M:%S")
        );
        Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .unwrap_or(false)
    }
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Cancel the token on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, stopping after the current step...");
            token.cancel();
        }
    });
    cancel
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.storage_dir.join("config.toml");
    let config = if config_path.exists() {
        Config::load_or_default(&config_path)
    } else {
        Config::default()
    };
    let config = Arc::new(config);

    let storage = LocalStorage::new(&cli.storage_dir);
    let checkpoints = CheckpointStore::new(config.paths.state_dir_in(&cli.storage_dir));

    match cli.command {
        Command::Parse {
            source,
            chunk_size,
            max_results,
            yes,
            once,
            options,
        } => {
            config.validate()?;

            let deps = ParserDeps {
                config: Arc::clone(&config),
                client: http::create_client(&config.http)?,
                checkpoints,
            };
            let error_log: Arc<dyn ErrorLog> =
                Arc::new(FileErrorLog::new(config.paths.error_log_in(&cli.storage_dir)));
            let worker = WorkerOptions::from_config(&config.ingest, cancel_on_ctrl_c());

            let mut driver = Driver::new(
                ParserRegistry::new(deps),
                Arc::new(storage),
                error_log,
                worker,
            );

            let request = RunRequest {
                source,
                chunk_size,
                max_results,
                extended: parse_extended_settings(&options),
            };

            let mut prompt: Box<dyn ResumePrompt> = if once {
                Box::new(SinglePass)
            } else if yes {
                Box::new(AutoResume)
            } else {
                Box::new(TerminalPrompt)
            };

            match driver.run(request, prompt.as_mut()).await {
                DriveOutcome::Unsupported { source } => {
                    log::warn!("No parser found for '{}'.", source);
                }
                DriveOutcome::Ran { passes } => {
                    log::info!("{} pass(es), driver {}", passes.len(), driver.state());
                    if let Some(Pass { outcome: Err(e), .. }) = passes.into_iter().last() {
                        return Err(e);
                    }
                }
            }
        }

        Command::Dump { output } => {
            let output = output.unwrap_or_else(|| cli.storage_dir.join("dump.json"));
            let summary = storage::dump(&storage, &output).await?;
            log::info!(
                "Dumped {} areas with {} routes to {}",
                summary.count,
                summary.routes,
                summary.output.display()
            );
        }

        Command::Sources => {
            let registry = ParserRegistry::new(ParserDeps {
                config: Arc::clone(&config),
                client: http::create_client(&config.http)?,
                checkpoints,
            });
            for entry in registry.entries() {
                println!("{:<18} {}", entry.name, entry.description);
            }
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if config_path.exists() {
                Config::load(&config_path)?;
            } else {
                log::info!("No config.toml found, checking defaults");
            }
            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }

            log::info!("Config OK");
        }

        Command::Info => {
            log::info!("Storage directory: {}", cli.storage_dir.display());
            log::info!("Stored areas: {}", storage.count_areas().await?);
            if storage.lock_path().exists() {
                log::info!("Storage is locked by a running pass");
            }

            let names = checkpoints.list().await?;
            if names.is_empty() {
                log::info!("No checkpoints saved yet.");
            }
            for name in names {
                log::info!("Checkpoint: {}", name);
            }
        }
    }

    Ok(())
}
