use clap::Parser;
use futures::StreamExt;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ratelimit_sync::config::{LoggingConfig, SyncConfig};
use ratelimit_sync::snapshot::{DistributionCache, SnapshotCache};
use ratelimit_sync::store::MemoryRuleStore;
use ratelimit_sync::Synchronizer;

/// Publish rate limit snapshots built from a rule store.
#[derive(Debug, Parser)]
#[command(name = "ratelimit-sync", version, about)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Path to a YAML seed of callers and rules, overriding `store.seed_path`
    #[arg(short, long)]
    seed: Option<String>,

    /// Emit JSON logs
    #[arg(long)]
    log_json: bool,

    /// Publish once, print the snapshot as JSON and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = SyncConfig::load(args.config.as_deref())?;
    if let Some(seed) = args.seed {
        config.store.seed_path = Some(seed);
    }
    if args.log_json {
        config.logging.json = true;
    }

    init_tracing(&config.logging);

    info!("Starting ratelimit-sync");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        name = %config.snapshot.name,
        domain = %config.snapshot.domain,
        node_key = %config.snapshot.node_key,
        "Configuration loaded"
    );

    let store = match &config.store.seed_path {
        Some(path) => MemoryRuleStore::from_file(path)?,
        None => {
            warn!("No seed configured, starting with an empty rule store");
            MemoryRuleStore::new()
        }
    };
    let store = Arc::new(store);
    let cache = Arc::new(SnapshotCache::new());
    let sync = Synchronizer::new(store.clone(), cache.clone(), &config.snapshot);

    sync.refresh().await?;

    if args.once {
        if let Some(snapshot) = cache.snapshot(sync.node_key()) {
            println!("{}", serde_json::to_string_pretty(&*snapshot)?);
        }
        return Ok(());
    }

    // Stand-in for the discovery session layer: report what subscribers receive.
    let mut updates = cache.subscribe(sync.node_key());
    tokio::spawn(async move {
        while let Some(snapshot) = updates.next().await {
            info!(
                version = %snapshot.version(),
                sequence = snapshot.sequence(),
                resources = snapshot.resources().len(),
                "Snapshot available to subscribers"
            );
        }
    });

    serve(&sync, &store, config.store.seed_path.as_deref()).await?;

    info!("ratelimit-sync stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Wait for shutdown, re-reading the seed and refreshing on SIGHUP.
#[cfg(unix)]
async fn serve(
    sync: &Synchronizer,
    store: &MemoryRuleStore,
    seed_path: Option<&str>,
) -> anyhow::Result<()> {
    let mut hangup = signal::unix::signal(signal::unix::SignalKind::hangup())?;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => return Ok(()),
            _ = hangup.recv() => {
                info!("Received SIGHUP, reloading rule store");
                reload(sync, store, seed_path).await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn serve(
    _sync: &Synchronizer,
    _store: &MemoryRuleStore,
    _seed_path: Option<&str>,
) -> anyhow::Result<()> {
    shutdown_signal().await;
    Ok(())
}

/// Replace the store content with the seed file and publish the result.
///
/// Errors are logged; the previous snapshot stays published.
#[cfg_attr(not(unix), allow(dead_code))]
async fn reload(sync: &Synchronizer, store: &MemoryRuleStore, seed_path: Option<&str>) {
    let Some(path) = seed_path else {
        warn!("No seed configured, nothing to reload");
        return;
    };

    let loaded = std::fs::read_to_string(path)
        .map_err(anyhow::Error::from)
        .and_then(|yaml| store.reload_from_yaml(&yaml).map_err(anyhow::Error::from));
    if let Err(e) = loaded {
        error!(path = %path, error = %e, "Failed to reload rule store");
        return;
    }

    // refresh logs its own failures
    let _ = sync.refresh().await;
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
