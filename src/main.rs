use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use std::path::PathBuf;
use tokio::sync::mpsc;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use relwatch::config::Config;
use relwatch::feed::FeedFetcher;
use relwatch::notify::Notifier;
use relwatch::storage::SnapshotStore;
use relwatch::watch;
use relwatch::ChangeDetector;

/// Get the config directory path (~/.config/relwatch/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("relwatch"))
}

#[derive(Parser, Debug)]
#[command(
    name = "relwatch",
    about = "Watch a release feed for new entries and announce them"
)]
struct Args {
    /// Config file (default: ~/.config/relwatch/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll on the configured interval until interrupted (default).
    /// On Unix, SIGHUP triggers an immediate check.
    Run,
    /// Check once and exit; fails if any term could not be checked
    Check {
        /// Terms to check instead of the configured ones
        terms: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));

    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    config.apply_env();

    if let Some(Command::Check { terms }) = &args.command {
        if !terms.is_empty() {
            config.terms = terms.clone();
        }
    }
    config.validate().context("Configuration rejected")?;
    tracing::debug!(config = ?config, "Effective configuration");

    let fetcher = FeedFetcher::new(
        config.endpoint()?,
        &config.user_agent,
        config.request_timeout(),
    )
    .context("Failed to build HTTP client")?;
    let store = SnapshotStore::new(config.storage_dir_or(&config_dir));
    tracing::info!(path = %store.root().display(), "Snapshot directory");

    let mut detector =
        ChangeDetector::new(fetcher, store).announce_on_first_run(config.announce_on_first_run);

    let notifier = match config.webhook_url.take() {
        Some(url) => Notifier::webhook(SecretString::from(url))
            .context("Failed to build webhook client")?,
        None => Notifier::Stdout,
    };

    match args.command.unwrap_or(Command::Run) {
        Command::Check { .. } => {
            let summary = watch::run_cycle(&mut detector, &notifier, &config.terms).await;
            if summary.failed_terms > 0 {
                anyhow::bail!(
                    "{} of {} terms could not be checked",
                    summary.failed_terms,
                    summary.terms_checked
                );
            }
        }
        Command::Run => {
            let (trigger_tx, trigger_rx) = mpsc::channel::<()>(1);
            spawn_manual_trigger(trigger_tx)?;

            println!("Running...");
            watch::run(
                &mut detector,
                &notifier,
                &config.terms,
                config.poll_interval(),
                trigger_rx,
                shutdown_signal(),
            )
            .await;
        }
    }

    Ok(())
}

/// Forward SIGHUP to the watch loop as an on-demand check.
#[cfg(unix)]
fn spawn_manual_trigger(tx: mpsc::Sender<()>) -> Result<()> {
    let mut sighup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    tokio::spawn(async move {
        while sighup.recv().await.is_some() {
            // A check already queued covers this request too
            let _ = tx.try_send(());
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_manual_trigger(tx: mpsc::Sender<()>) -> Result<()> {
    // No on-demand trigger here; the loop runs on the timer alone
    drop(tx);
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    let sigterm = async {
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        }
        _ = sigterm => {}
    }
}
