//! The `belfry` daemon and its management subcommands.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use jiff::{ToSpan as _, Zoned};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use belfry::{manage, Config, Controller, LoggingConfig, Metrics, Scheduler};

#[derive(Parser)]
#[command(
    name = "belfry",
    version,
    about = "Calendar-precise command scheduler with per-year and per-second resolution"
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run the scheduling service.
    Run,
    /// Validate the configuration and print upcoming runs per job.
    Parse,
    /// Suspend scheduling via the management interface.
    Pause,
    /// Resume previously suspended scheduling.
    Resume,
    /// Print scheduler and job state.
    Status,
    /// Gracefully stop the scheduler and make the process exit.
    Shutdown,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("error in config file {}", cli.config.display()))?;
    match cli.command {
        Cmd::Run => {
            init_tracing(&config.logging);
            run(config).await
        }
        Cmd::Parse => print_parsed_jobs(&config),
        Cmd::Pause => call_management(&config, "/pause").await,
        Cmd::Resume => call_management(&config, "/resume").await,
        Cmd::Status => call_management(&config, "/status").await,
        Cmd::Shutdown => call_management(&config, "/shutdown").await,
    }
}

fn init_tracing(logging: &LoggingConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level)),
        )
        .init();
}

/// Assemble the scheduler from config, start the service listeners, and
/// block until shutdown is requested.
async fn run(config: Config) -> anyhow::Result<()> {
    let metrics = Arc::new(Metrics::new()?);
    let cancel = CancellationToken::new();
    let (mut scheduler, handle) = Scheduler::new(Arc::clone(&metrics));
    for job_config in &config.jobs {
        let job = job_config
            .build(cancel.clone(), Arc::clone(&metrics))
            .with_context(|| format!("failure creating job `{}`", job_config.id))?;
        scheduler
            .add_job(job)
            .with_context(|| format!("failure adding job `{}`", job_config.id))?;
    }
    tokio::spawn(scheduler.run());

    let (exit_tx, mut exit_rx) = mpsc::channel(1);
    let controller = Arc::new(Controller::new(
        handle,
        cancel,
        config.management.stop_timeout(),
        config.management.termination_timeout(),
        exit_tx,
    ));

    if config.metrics.enabled {
        let metrics = Arc::clone(&metrics);
        let address = config.metrics.address.clone();
        tokio::spawn(async move {
            if let Err(e) = manage::serve_metrics(&address, metrics).await {
                error!("metrics service failed: {e}");
            }
        });
    }
    if config.management.enabled {
        let controller = Arc::clone(&controller);
        let address = config.management.address.clone();
        tokio::spawn(async move {
            if let Err(e) = manage::serve(&address, controller).await {
                error!("management service failed: {e}");
            }
        });
    }

    controller.resume();
    tokio::select! {
        _ = exit_rx.recv() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            controller.shutdown().await;
        }
    }
    // Give killed subprocesses a moment to be reaped.
    tokio::time::sleep(Duration::from_secs(1)).await;
    info!("stopped");
    Ok(())
}

/// Validate every configured job and print its next few firing times.
fn print_parsed_jobs(config: &Config) -> anyhow::Result<()> {
    const RUNS: usize = 5;
    let metrics = Arc::new(Metrics::new()?);
    let cancel = CancellationToken::new();
    println!("Jobs next {RUNS} scheduled runs:");
    for job_config in &config.jobs {
        let job = job_config
            .build(cancel.clone(), Arc::clone(&metrics))
            .with_context(|| format!("failure creating job `{}`", job_config.id))?;
        println!("\n{}", job.snapshot());
        let mut t = Zoned::now();
        for i in 1..=RUNS {
            match job.next(&t) {
                Ok(next) => {
                    println!("{i} run for the job: {next}");
                    t = next.checked_add(1.second())?;
                }
                Err(e) => {
                    println!("{e}");
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Hit a management endpoint and print whatever it answers.
async fn call_management(config: &Config, endpoint: &str) -> anyhow::Result<()> {
    anyhow::ensure!(
        config.management.enabled,
        "management is not enabled in config; scheduling control needs the scheduler started with it"
    );
    let url = format!("http://{}{}", config.management.address, endpoint);
    let body = reqwest::get(&url)
        .await
        .with_context(|| format!("failed query of management url {url}"))?
        .text()
        .await?;
    println!("{body}");
    Ok(())
}
