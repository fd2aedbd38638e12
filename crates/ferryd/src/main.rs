//! ferryd — one-to-one peer file synchronization daemon.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};

use ferry_core::config::{FerryConfig, Mode};
use ferryd::commands::{FileTracker, Intent, HELP};
use ferryd::connection::ActiveConnection;
use ferryd::guard::AccessGuard;
use ferryd::session::dialer::SessionDialer;
use ferryd::session::listener::SessionListener;
use ferryd::session::{self, SessionDeps};
use ferryd::suppress::SuppressionSet;
use ferryd::transfer::{RateLimiter, Reassembler};
use ferryd::watcher::FolderWatcher;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = FerryConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = FerryConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        FerryConfig::default()
    });
    tracing::info!(
        mode = ?config.mode,
        address = %config.address,
        port = config.port,
        folder = %config.folder.display(),
        "ferryd starting"
    );

    std::fs::create_dir_all(&config.folder)
        .with_context(|| format!("failed to create {}", config.folder.display()))?;

    // Shared state
    let suppress = SuppressionSet::new();
    let (watcher, change_rx) =
        FolderWatcher::spawn(&config.folder, suppress.clone()).context("watcher startup failed")?;
    let (intent_tx, intent_rx) = mpsc::channel(16);

    let deps = SessionDeps {
        active: ActiveConnection::new(),
        reassembler: Reassembler::new(config.folder.clone(), suppress),
        limiter: RateLimiter::new(),
        tracker: FileTracker::new(),
        watcher: Arc::new(watcher),
        changes: session::shared_receiver(change_rx),
        intents: session::shared_receiver(intent_rx),
        folder: config.folder.clone(),
    };

    // Shutdown channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // Operator console: parse slash commands off stdin. Intents are
    // executed by the session once a peer is connected.
    let _console = tokio::spawn(async move {
        println!("{HELP}");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match Intent::parse(&line) {
                Ok(Some(intent)) => {
                    if intent_tx.send(intent).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => println!("{e}"),
            }
        }
        tracing::debug!("stdin closed");
    });

    let link_task = match config.mode {
        Mode::Host => {
            let listener =
                SessionListener::new(&config, deps, AccessGuard::new(), shutdown_tx.subscribe());
            tokio::spawn(listener.run())
        }
        Mode::Peer => {
            let dialer = SessionDialer::new(&config, deps, shutdown_tx.subscribe());
            tokio::spawn(dialer.run())
        }
    };

    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::select! {
        _ = shutdown_rx.recv() => {
            tracing::info!("shutting down");
            Ok(())
        }
        joined = link_task => match joined {
            Ok(result) => result,
            Err(e) => anyhow::bail!("connection manager panicked: {e}"),
        },
    }
}
