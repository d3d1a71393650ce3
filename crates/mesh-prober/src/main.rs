//! # mesh-prober
//!
//! Reachability matrix for multi-cluster meshes.
//!
//! ## Commands
//!
//! - `run`: Discover the clusters, run every suite and print the matrix
//! - `render`: Re-render a saved report without cluster access
//! - `validate`: Check a configuration document and its kubeconfigs
//!
//! ## Example
//!
//! ```bash
//! mesh-prober run --config test.yaml --output report.json
//! mesh-prober render report.json
//! ```

#![warn(clippy::pedantic)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::config::ConfigDocument;
use mesh_prober::engine::EngineConfig;
use mesh_prober::report::{format_test_summary, RunDocument};
use mesh_prober::runner::{Collaborators, RunOutcome, Runner};
use std::path::{Path, PathBuf};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Reachability matrix for multi-cluster meshes.
#[derive(Parser, Debug)]
#[command(name = "mesh-prober")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every suite and print the reachability matrix
    Run {
        /// Configuration document
        #[arg(long, short)]
        config: PathBuf,

        /// Write the results document to this file
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Override the number of concurrent probes
        #[arg(long)]
        workers: Option<usize>,

        /// Print one line per test before each matrix
        #[arg(long, short)]
        verbose: bool,
    },

    /// Re-render a saved results document
    Render {
        /// Results document written by `run --output`
        file: PathBuf,
    },

    /// Validate a configuration document
    Validate {
        /// Configuration document
        #[arg(long, short)]
        config: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "mesh_prober=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(path: &Path) -> Result<ConfigDocument> {
    let config = ConfigDocument::from_path(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config
        .check_kubeconfigs()
        .context("Kubeconfig check failed")?;
    Ok(config)
}

async fn run(
    config_path: &Path,
    output: Option<&Path>,
    workers: Option<usize>,
    verbose: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(workers) = workers {
        anyhow::ensure!(workers > 0, "--workers must be greater than 0");
        config.run.workers = workers;
    }
    info!(
        clusters = config.clusters.len(),
        suites = config.suites().len(),
        workers = EngineConfig::from_run(&config.run).workers,
        "Configuration loaded"
    );

    let collaborators = Collaborators::kubernetes(&config)
        .await
        .context("Failed to connect to clusters")?;

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let RunOutcome { suites, failure } = Runner::new(config, collaborators)
        .with_shutdown(shutdown)
        .run()
        .await
        .map_err(|e| {
            error!(error = %e, "Run failed");
            e
        })?;

    for outcome in &suites {
        if verbose {
            print!("{}", format_test_summary(&outcome.tests));
        }
        println!("Suite: {}", outcome.report.name);
        println!("{}", outcome.report.render());
        println!();
    }

    if let Some(path) = output {
        let document = RunDocument::new(suites.into_iter().map(|o| o.report).collect());
        document
            .write(path)
            .with_context(|| format!("Failed to write results to {}", path.display()))?;
        info!(path = %path.display(), suites = document.suites.len(), "Results written");
    }

    match failure {
        Some(e) => {
            error!(error = %e, "Run stopped early");
            Err(e.into())
        }
        None => Ok(()),
    }
}

/// Cancel `token` on SIGINT or SIGTERM so the running suite tears down.
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, tearing down the running suite..."),
            Err(e) => {
                error!("Failed to listen for SIGINT: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, tearing down the running suite...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    token.cancel();
}

fn render(path: &Path) -> Result<()> {
    let document = RunDocument::read(path)
        .with_context(|| format!("Failed to read results from {}", path.display()))?;
    info!(generated_at = %document.generated_at, suites = document.suites.len(), "Rendering saved results");
    print!("{}", document.render());
    Ok(())
}

fn validate(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let suites = config.suites();
    let resources: usize = suites.iter().map(|s| s.resources.len()).sum();
    println!(
        "{}: {} cluster(s), {} suite(s), {} resource(s)",
        path.display(),
        config.clusters.len(),
        suites.len(),
        resources
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Commands::Run {
            config,
            output,
            workers,
            verbose,
        } => run(&config, output.as_deref(), workers, verbose).await,
        Commands::Render { file } => render(&file),
        Commands::Validate { config } => validate(&config),
    }
}
