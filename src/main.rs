//! ad-job-state
//!
//! Moves an Elasticsearch anomaly detection job between clusters by
//! exporting its configuration, model snapshot and surrounding data into a
//! single archive and recreating the job from it.
//!
//! # Usage
//!
//! ```bash
//! ad-job-state --url https://localhost:9200 -u elastic export --job-id web-latency
//! ad-job-state --url https://other:9200 -u elastic import \
//!     --job-id web-latency --archive web-latency_state.tar.gz
//! ```

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use ad_job_state::backend::SearchBackend;
use ad_job_state::cli::prompt::{self, PII_WARNING, UNBOUNDED_INPUTS_WARNING};
use ad_job_state::cli::{CliInterface, Commands, ExportArgs, ImportArgs};
use ad_job_state::connection::ConnectionManager;
use ad_job_state::error::Result;
use ad_job_state::export::ExportService;
use ad_job_state::import::{ImportReport, ImportService};
use ad_job_state::utils::convert::format_bytes;
use ad_job_state::utils::time::format_duration;

/// Application entry point
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Main application logic
///
/// 1. Parse command-line arguments and load configuration
/// 2. Initialize logging
/// 3. Handle informational subcommands or run an export/import
async fn run() -> Result<()> {
    let cli = CliInterface::new()?;

    initialize_logging(&cli);

    if cli.handle_subcommand()? {
        return Ok(());
    }

    cli.config().validate()?;

    match &cli.args().command {
        Commands::Export(args) => run_export(&cli, args).await,
        Commands::Import(args) => run_import(&cli, args).await,
        _ => Ok(()),
    }
}

/// Confirm, connect and export
async fn run_export(cli: &CliInterface, args: &ExportArgs) -> Result<()> {
    if !cli.args().yes {
        if !prompt::prompt_confirmation(PII_WARNING)? {
            return Ok(());
        }
        if args.inputs_unbounded() && !prompt::prompt_confirmation(UNBOUNDED_INPUTS_WARNING)? {
            return Ok(());
        }
    }

    let backend = connect(cli).await?;
    let started = Instant::now();
    let cancel_token = CancellationToken::new();
    let ctrl_c = spawn_ctrl_c_listener(cancel_token.clone());

    let service = ExportService::new(backend, cli.config().export.clone())
        .with_progress(cli.show_progress())
        .with_cancellation(cancel_token);
    let result = service.run(&args.to_options()).await;
    ctrl_c.abort();

    let archive = result?;
    let size = std::fs::metadata(&archive).map(|m| m.len()).unwrap_or(0);
    info!(
        "Archive of {} written in {}",
        format_bytes(size),
        format_duration(started.elapsed())
    );
    println!("{}", archive.display());
    Ok(())
}

/// Connect and import
async fn run_import(cli: &CliInterface, args: &ImportArgs) -> Result<()> {
    let backend = connect(cli).await?;
    let service = ImportService::new(backend, cli.config().import.clone())
        .with_progress(cli.show_progress());
    let report = service.run(&args.to_options()).await?;
    print_import_report(&report);
    Ok(())
}

/// Build a connected client, prompting for the password when needed
async fn connect(cli: &CliInterface) -> Result<Arc<dyn SearchBackend>> {
    let connection = cli.config().connection.clone();
    let password = match (&cli.args().password, &connection.username) {
        (Some(password), _) => Some(password.clone()),
        (None, Some(_)) => Some(prompt::read_password("Enter Elasticsearch password: ")?),
        (None, None) => None,
    };

    let client = ConnectionManager::new(connection, password).connect().await?;
    Ok(Arc::new(client))
}

/// Cancel `token` on the first Ctrl+C
fn spawn_ctrl_c_listener(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, stopping after the current page");
                token.cancel();
            }
            Err(err) => {
                eprintln!("Failed to listen for Ctrl+C: {}", err);
            }
        }
    })
}

fn print_import_report(report: &ImportReport) {
    println!(
        "Job {} reverted to snapshot {}",
        report.job_id, report.snapshot_id
    );
    if let Some(index) = &report.input_index {
        println!(
            "  inputs:          {} indexed into {}, {} rejected",
            report.inputs.accepted, index, report.inputs.failed
        );
    }
    println!(
        "  state documents: {} indexed, {} rejected",
        report.state_documents.accepted, report.state_documents.failed
    );
    if let Some(annotations) = &report.annotations {
        println!(
            "  annotations:     {} indexed, {} rejected",
            annotations.accepted, annotations.failed
        );
    }
}

/// Initialize logging from `RUST_LOG`, falling back to the configured level
///
/// # Arguments
/// * `cli` - CLI interface with the effective logging configuration
fn initialize_logging(cli: &CliInterface) {
    let level = cli.config().logging.level.to_tracing_level();
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if cli.config().logging.timestamps {
        subscriber.init();
    } else {
        subscriber.without_time().init();
    }
}
