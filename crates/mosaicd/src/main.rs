mod config;
mod metrics;
mod settings;
mod sink;

use crate::config::Config;
use crate::metrics::MosaicMetrics;
use anyhow::Context;
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{fmt, EnvFilter};

use mosaic_engine::{
    AlwaysUnmetered, DisplayPublisher, HttpTileSource, RefreshScheduler, SchedulerConfig,
    SchedulerHandle,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let config = Config::parse();
    tracing::info!(config = ?config, "Starting mosaicd");

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let metrics = Arc::new(MosaicMetrics::new());

    // Metrics server
    let router = metrics.router();
    let metrics_addr: std::net::SocketAddr = config
        .metrics_listen_addr
        .parse()
        .context("Failed to parse MOSAIC_METRICS_LISTEN_ADDR")?;
    tokio::spawn(async move {
        if let Err(e) = metrics::serve(metrics_addr, router).await {
            tracing::error!(error = %e, "Metrics server failed.");
        }
    });

    let publisher = Arc::new(DisplayPublisher::new());
    let initial_grid = mosaic_engine::GridSpec::for_zoom(
        config.display_width_px,
        config.zoom,
        config.tile_width_px,
    );
    publisher.set_pan_fraction(config.pan_fraction, initial_grid.output_size_px);

    let (settings_tx, settings_rx) = watch::channel(config.initial_settings());

    // Settings file poller (the change-notification side of configuration)
    if let Some(path) = config.settings_path.clone() {
        let watcher = settings::SettingsWatcher {
            path,
            poll_interval: Duration::from_millis(config.settings_poll_ms),
            tx: settings_tx.clone(),
            publisher: publisher.clone(),
            display_width_px: config.display_width_px,
            tile_width_px: config.tile_width_px,
        };
        tokio::spawn(watcher.run(shutdown_rx.clone()));
    }

    // The refresh engine
    let source = Arc::new(
        HttpTileSource::new(&config.base_url).context("Failed to build tile source")?,
    );
    let scheduler_config = SchedulerConfig {
        base_url: config.base_url.clone(),
        tile_width_px: config.tile_width_px,
        display_width_px: config.display_width_px,
        fetch_concurrency: config.fetch_concurrency,
    };
    let (scheduler_join, scheduler_handle, mut events) = RefreshScheduler::spawn(
        scheduler_config,
        source,
        AlwaysUnmetered,
        publisher.clone(),
        settings_rx,
        shutdown_rx.clone(),
    );

    // Cycle events -> metrics
    let pump_metrics = metrics.clone();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            pump_metrics.observe(&event);
        }
    });

    // Output writer (the render surface analog)
    let visible = Arc::new(AtomicBool::new(true));
    tokio::spawn(sink::run(
        publisher.clone(),
        config.output_path.clone(),
        config.display_width_px,
        visible.clone(),
        shutdown_rx.clone(),
    ));

    #[cfg(unix)]
    spawn_visibility_handler(visible, scheduler_handle.clone());

    tracing::info!("All services started. Awaiting shutdown signal...");
    shutdown_signal().await;

    tracing::info!("Shutdown signal received. Terminating...");
    // Dropping the sender fans the shutdown out to every receiver.
    drop(shutdown_tx);

    if let Err(e) = scheduler_join.await {
        tracing::error!(error = %e, "Scheduler task failed.");
    }

    tracing::info!("mosaicd shut down gracefully.");
    Ok(())
}

/// Maps SIGUSR1/SIGUSR2 to visibility regained/lost. Regaining visibility
/// also requests an immediate refresh so the surface is never stale longer
/// than one cycle.
#[cfg(unix)]
fn spawn_visibility_handler(visible: Arc<AtomicBool>, scheduler: SchedulerHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut show =
            signal(SignalKind::user_defined1()).expect("failed to install SIGUSR1 handler");
        let mut hide =
            signal(SignalKind::user_defined2()).expect("failed to install SIGUSR2 handler");
        loop {
            tokio::select! {
                _ = show.recv() => {
                    visible.store(true, Ordering::Relaxed);
                    tracing::info!("Visibility regained; requesting refresh");
                    scheduler.refresh_now().await;
                }
                _ = hide.recv() => {
                    visible.store(false, Ordering::Relaxed);
                    tracing::info!("Surface hidden; output writes paused");
                }
            }
        }
    });
}

/// Listens for OS shutdown signals (SIGINT, SIGTERM) and resolves when one
/// is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
