use std::env;
use std::fs::File;
use std::path::Path;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use simplelog::{
    ColorChoice, CombinedLogger, Config, SharedLogger, TermLogger, TerminalMode, WriteLogger,
};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use bucket_migrator::cli::{Args, Commands};
use bucket_migrator::cloud::{build_destination_store, build_source_store};
use bucket_migrator::config::{load_config, MigrationConfig};
use bucket_migrator::migration::MigrationPipeline;
use bucket_migrator::utils::report::write_run_report;

/// Exit code for invalid configuration or setup failures
const EXIT_CONFIG_ERROR: i32 = 2;

/// Exit code for a run that did not complete cleanly
const EXIT_MIGRATION_FAILED: i32 = 1;

fn main() {
    // Parse arguments
    let args = Args::parse();

    // Initialize logging
    if let Err(e) = initialize_logging(args.verbose, args.log_file.as_deref()) {
        eprintln!("Error: {:#}", e);
        process::exit(EXIT_CONFIG_ERROR);
    }

    // Handle subcommands
    if let Some(cmd) = &args.command {
        let code = match handle_subcommand(cmd) {
            Ok(()) => 0,
            Err(e) => {
                error!("{:#}", e);
                EXIT_CONFIG_ERROR
            }
        };
        process::exit(code);
    }

    process::exit(run_migration(&args));
}

/// Initialize logging with the specified verbosity level
fn initialize_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    if let Some(path) = log_file {
        let file = File::create(path)
            .with_context(|| format!("Failed to create log file {}", path.display()))?;
        loggers.push(WriteLogger::new(log_level, Config::default(), file));
    }

    CombinedLogger::init(loggers).context("Failed to initialize logger")?;
    Ok(())
}

/// Handle subcommands (init-config)
fn handle_subcommand(cmd: &Commands) -> Result<()> {
    match cmd {
        Commands::InitConfig { path } => {
            info!("Creating default configuration file at {}", path.display());
            MigrationConfig::create_default_config_file(path)?;
            info!("Configuration created successfully");
            Ok(())
        }
    }
}

/// Load configuration, run the pipeline and return the process exit code
fn run_migration(args: &Args) -> i32 {
    let config = match load_config(args.config.as_deref(), &args.to_overrides(), |name| {
        env::var(name).ok()
    }) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {:#}", e);
            return EXIT_CONFIG_ERROR;
        }
    };

    let stores = build_source_store(&config)
        .context("Failed to set up source store")
        .and_then(|source| {
            let destination =
                build_destination_store(&config).context("Failed to set up destination store")?;
            Ok((source, destination))
        });
    let (source, destination) = match stores {
        Ok(stores) => stores,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_CONFIG_ERROR;
        }
    };

    let runtime = match Runtime::new().context("Failed to create Tokio runtime") {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_MIGRATION_FAILED;
        }
    };

    let cancel = CancellationToken::new();
    let pipeline = MigrationPipeline::new(config.clone(), source, destination);
    info!("Starting migration run {}", pipeline.run_id());

    let result = runtime.block_on(async {
        let signal_cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling migration");
                signal_cancel.cancel();
            }
        });
        pipeline.run(cancel).await
    });

    if let Some(report_path) = &config.report_path {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        match write_run_report(report_path, &hostname, &config, &result) {
            Ok(()) => info!("Run report written to {}", report_path.display()),
            Err(e) => warn!("{:#}", e),
        }
    }

    if result.is_success() {
        println!("{}", result.message());
    } else {
        eprintln!("{}", result.message());
    }
    result.exit_code()
}
