//! # registrar
//!
//! Runs one controller per managed kind against an in-memory store.
//!
//! ## Startup
//!
//! 1. **Config** - file (if given), then `REGISTRAR_*` environment overrides
//! 2. **Stores** - seeded from a manifest file (if given)
//! 3. **Controllers** - registered against each store's watch; a failed
//!    registration aborts startup
//!
//! ## Shutdown
//!
//! Ctrl+C stops every controller. In-flight reconciles see their cancel
//! token fire and the process exits once all workers have returned.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::expect_used)]
#![forbid(clippy::panic)]

mod cli;
mod seed;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use futures::future::{join_all, select_all};
use registrar_core::CancelToken;
use registrar_reconciler::{
    Controller, ControllerConfig, LoopStats, LoopStopper, Reconcilable, ReconcileRequest,
    Reconciler,
};
use registrar_store::{InMemoryStore, WatchSource};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};
use crate::seed::Stores;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref())?;

    match cli.command {
        Commands::Run { config, manifests } => {
            run(config.as_deref(), manifests.as_deref()).await
        }
        Commands::Reconcile { config, manifests } => {
            reconcile_once(config.as_deref(), &manifests).await
        }
    }
}

/// Initialize tracing subscriber with environment filter.
///
/// `--log-level` wins over `RUST_LOG`; the fallback is `info`.
fn init_tracing(log_level: Option<&str>) -> Result<()> {
    let filter = match log_level {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("Invalid log level '{directives}'"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ControllerConfig> {
    let base = match path {
        Some(path) => ControllerConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ControllerConfig::default(),
    };
    let config = base
        .with_env_overrides(|name| std::env::var(name).ok())
        .context("Invalid environment override")?;
    config.validate().context("Invalid controller configuration")?;
    Ok(config)
}

async fn seeded_stores(manifests: Option<&Path>) -> Result<Stores> {
    let stores = Stores::new();
    if let Some(path) = manifests {
        stores.load(path).await?;
    }
    Ok(stores)
}

fn reconciler_for<K: Reconcilable>(
    store: &Arc<InMemoryStore<K>>,
    config: &ControllerConfig,
) -> Result<Arc<Reconciler<K>>> {
    let reconciler = Reconciler::<K>::builder()
        .with_store(store.clone())
        .with_config(config.reconciler_config())
        .traced()
        .build()
        .with_context(|| format!("Failed to build {} reconciler", K::KIND))?;
    Ok(Arc::new(reconciler))
}

async fn start_controller<K: Reconcilable>(
    store: &Arc<InMemoryStore<K>>,
    config: &ControllerConfig,
) -> Result<(LoopStopper, JoinHandle<LoopStats>)> {
    let reconciler = reconciler_for(store, config)?;
    let source: Arc<dyn WatchSource> = store.clone();
    let controller = Controller::register(reconciler, source, config.loop_config())
        .await
        .with_context(|| format!("Failed to register {} controller", K::KIND))?;

    let stopper = controller.stopper();
    Ok((stopper, tokio::spawn(controller.run())))
}

async fn run(config: Option<&Path>, manifests: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let stores = seeded_stores(manifests).await?;

    info!(
        workers = config.workers,
        reconcile_timeout_secs = config.reconcile_timeout.as_secs(),
        resync_secs = config.resync_period.map(|period| period.as_secs()),
        "registrar starting"
    );

    let controllers = vec![
        start_controller(&stores.students, &config).await?,
        start_controller(&stores.guestbooks, &config).await?,
    ];
    let (stoppers, handles): (Vec<_>, Vec<_>) = controllers.into_iter().unzip();

    info!("registrar is running. Press Ctrl+C to stop.");
    let self_stopped = tokio::select! {
        () = wait_for_shutdown() => false,
        () = any_stopped(&stoppers) => true,
    };
    if self_stopped {
        error!("A controller stopped on its own, shutting down the rest");
    }

    stoppers.iter().for_each(LoopStopper::stop);
    let totals = join_all(handles)
        .await
        .into_iter()
        .filter_map(|joined| match joined {
            Ok(stats) => Some(stats),
            Err(e) => {
                error!(error = %e, "Controller task failed");
                None
            }
        })
        .fold(LoopStats::default(), LoopStats::merge);

    info!(
        reconciled = totals.reconciled,
        failed = totals.failed,
        "registrar stopped gracefully"
    );
    if self_stopped {
        anyhow::bail!("a controller lost its watch and stopped");
    }
    Ok(())
}

/// Resolve once any controller has stopped.
async fn any_stopped(stoppers: &[LoopStopper]) {
    if stoppers.is_empty() {
        return std::future::pending().await;
    }
    select_all(stoppers.iter().map(|stopper| Box::pin(stopper.stopped()))).await;
}

/// Reconcile every object of kind `K` once. Returns the number of failures.
async fn reconcile_all<K: Reconcilable>(
    store: &Arc<InMemoryStore<K>>,
    config: &ControllerConfig,
) -> Result<usize> {
    let reconciler = reconciler_for(store, config)?;
    let keys = store
        .list_keys(&CancelToken::never().with_timeout(config.reconcile_timeout))
        .await
        .with_context(|| format!("Failed to list {} objects", K::KIND))?;

    let mut failures: usize = 0;
    for key in keys {
        let cancel = CancelToken::never().with_timeout(config.reconcile_timeout);
        if let Err(e) = reconciler
            .reconcile(&ReconcileRequest::new(key.clone()), &cancel)
            .await
        {
            warn!(kind = K::KIND, key = %key, error = %e, "Reconcile failed");
            failures = failures.saturating_add(1);
        }
    }
    Ok(failures)
}

async fn reconcile_once(config: Option<&Path>, manifests: &Path) -> Result<()> {
    let config = load_config(config)?;
    let stores = seeded_stores(Some(manifests)).await?;

    let failures = reconcile_all(&stores.students, &config)
        .await?
        .saturating_add(reconcile_all(&stores.guestbooks, &config).await?);

    let dumped = stores.dump().await?;
    let json = serde_json::to_string_pretty(&dumped).context("Failed to encode objects")?;
    println!("{json}");

    if failures > 0 {
        anyhow::bail!("{failures} object(s) failed to reconcile");
    }
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
