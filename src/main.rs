//! `acoustic-daq` command line.
//!
//! ```text
//! acoustic-daq run --force mux.kind=cytec mux.port=/dev/ttyUSB0
//! acoustic-daq once
//! acoustic-daq check
//! acoustic-daq stop easi_daemon
//! acoustic-daq trash 2026_10_16 17
//! acoustic-daq config notify.timeout_ms=500
//! ```
use acoustic_daq::{
    config::{Settings, DEFAULT_CONFIG_PATH},
    daemon::{self, PidFile},
    data::JsonStore,
    experiment::{expand, RunTable},
    orchestrator::{Orchestrator, RowOutcome},
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the acquisition loop until SIGINT/SIGTERM
    Run {
        /// Kill a daemon already holding the pid file
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Run a single pass and print its summary
    Once(Overrides),

    /// Load the run table and report which rows would run
    Check(Overrides),

    /// Stop the named daemons, or every daemon with a pid file
    Stop {
        /// Daemon names, optionally followed by KEY=VALUE overrides
        #[arg(value_name = "NAME")]
        args: Vec<String>,
    },

    /// Move a test's data and log entry to the trash
    Trash {
        /// Date folder, e.g. 2026_10_16
        date: String,
        /// Test id
        testid: String,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Print the effective configuration as TOML
    Config(Overrides),
}

#[derive(Debug, Args)]
struct Overrides {
    /// Configuration overrides, e.g. storage.data_dir=/srv/Data
    #[arg(value_name = "KEY=VALUE")]
    overrides: Vec<String>,
}

impl Command {
    /// Split the positional arguments into (daemon names, overrides).
    fn overrides(&self) -> (Vec<String>, Vec<String>) {
        match self {
            Command::Run { overrides, .. }
            | Command::Trash { overrides, .. }
            | Command::Once(overrides)
            | Command::Check(overrides)
            | Command::Config(overrides) => (Vec::new(), overrides.overrides.clone()),
            Command::Stop { args } => args.iter().cloned().partition(|a| !a.contains('=')),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let (names, overrides) = cli.command.overrides();
    let settings = Settings::load_with(&cli.config, &overrides)
        .with_context(|| format!("Failed to load configuration from {:?}", cli.config))?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.application.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    runtime.block_on(dispatch(cli.command, names, settings))
}

async fn dispatch(command: Command, names: Vec<String>, settings: Settings) -> Result<()> {
    match command {
        Command::Run { force, .. } => run(settings, force).await,
        Command::Once(_) => once(settings).await,
        Command::Check(_) => check(&settings),
        Command::Stop { .. } => stop(&settings, &names).await,
        Command::Trash { date, testid, .. } => {
            let store = JsonStore::new(settings.storage.data_dir.clone());
            let dest = store
                .trash_test(&date, &testid)
                .with_context(|| format!("Failed to trash test {} from {}", testid, date))?;
            println!("Moved test {} to {}", testid, dest.display());
            Ok(())
        }
        Command::Config(_) => {
            print!("{}", settings.to_toml()?);
            Ok(())
        }
    }
}

async fn run(settings: Settings, force: bool) -> Result<()> {
    let _pid_file = PidFile::acquire(&settings.daemon.pid_dir, &settings.daemon.name, force)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Signal received; finishing the current row");
        let _ = shutdown_tx.send(true);
    });

    let mut orchestrator = Orchestrator::from_settings(settings)?;
    let passes = orchestrator
        .run(shutdown_rx)
        .await
        .context("Acquisition loop stopped")?;
    info!("Exiting after {} passes", passes);
    Ok(())
}

async fn once(settings: Settings) -> Result<()> {
    let mut orchestrator = Orchestrator::from_settings(settings)?;
    let summary = orchestrator.run_pass().await?;
    for report in &summary.rows {
        let status = match &report.outcome {
            RowOutcome::Inactive => "inactive".to_string(),
            RowOutcome::Rejected { reason } => format!("rejected: {}", reason),
            RowOutcome::Acquired { written, failures } if failures.is_empty() => {
                format!("{} written", written)
            }
            RowOutcome::Acquired { written, failures } => format!(
                "{} written, {} failed: {}",
                written,
                failures.len(),
                failures.join("; ")
            ),
        };
        println!("{:>10}  {}", report.testid, status);
    }
    println!("{}", summary);
    Ok(())
}

fn check(settings: &Settings) -> Result<()> {
    let table = RunTable::load(&settings.table.path)?;
    println!(
        "{}: {} rows, loop_delay {:?}",
        settings.table.path.display(),
        table.rows.len(),
        table.loop_delay
    );
    for raw in &table.rows {
        let status = if !raw.is_active() {
            "inactive".to_string()
        } else {
            match raw.validate() {
                Ok(row) => format!(
                    "ok, {} acquisition(s) on {} into {}",
                    expand(&row.frequency, chrono::Utc::now()).len(),
                    row.channels,
                    row.test_dir(&settings.storage.data_dir).display()
                ),
                Err(e) => format!("invalid: {}", e),
            }
        };
        println!("{:>10}  {}", raw.testid(), status);
    }
    Ok(())
}

async fn stop(settings: &Settings, names: &[String]) -> Result<()> {
    let dir = &settings.daemon.pid_dir;
    if names.is_empty() {
        for (name, outcome) in daemon::stop_all(dir).await? {
            println!("{}: {:?}", name, outcome);
        }
    } else {
        for name in names {
            let outcome = daemon::stop_daemon(dir, name).await?;
            println!("{}: {:?}", name, outcome);
        }
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
