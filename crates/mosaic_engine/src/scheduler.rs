use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::capture::CaptureIdentity;
use crate::compose::{CompositeRaster, DisplayRaster};
use crate::error::EngineError;
use crate::fetch::spawn_tile_fetches;
use crate::grid::{self, GridSpec};
use crate::publish::DisplayPublisher;
use crate::source::TileSource;

/// Runtime-changeable settings, snapshotted at the start of each cycle.
///
/// A zoom change takes effect on the next triggered cycle; a period change
/// affects only the next re-arm delay, never an in-flight timer.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub period: Duration,
    pub zoom: f64,
    pub wifi_only: bool,
}

impl Default for Settings {
    fn default() -> Self {
        // The capture source updates once every 10 minutes.
        Self {
            period: Duration::from_secs(600),
            zoom: 1.0,
            wifi_only: false,
        }
    }
}

/// Reports whether an unmetered network path is currently available.
pub trait Connectivity: Send + Sync + 'static {
    fn is_unmetered(&self) -> bool;
}

/// Connectivity stub for hosts without a metered/unmetered distinction.
pub struct AlwaysUnmetered;

impl Connectivity for AlwaysUnmetered {
    fn is_unmetered(&self) -> bool {
        true
    }
}

/// Fixed parameters of the scheduler, set once at startup.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub base_url: String,
    pub tile_width_px: u32,
    pub display_width_px: u32,
    pub fetch_concurrency: usize,
}

/// Observable lifecycle of refresh cycles, for metrics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleEvent {
    Started { cycle: u64, tile_count: u32 },
    Completed { cycle: u64, duration_ms: u64, tiles_fetched: u32, bytes_downloaded: u64 },
    Failed { cycle: u64, error: String },
    Cancelled { cycle: u64 },
    /// A tick gated out by the wifi-only policy; no cycle was started.
    Skipped,
}

enum Trigger {
    RefreshNow,
}

/// External control surface: lets the lifecycle side request an immediate
/// refresh (e.g. on visibility regained). Superseding any in-flight cycle.
#[derive(Clone)]
pub struct SchedulerHandle {
    trigger_tx: mpsc::Sender<Trigger>,
}

impl SchedulerHandle {
    pub async fn refresh_now(&self) {
        let _ = self.trigger_tx.send(Trigger::RefreshNow).await;
    }
}

struct Inflight {
    id: u64,
    token: CancellationToken,
}

/// Drives the periodic refresh: Idle(armed) -> Running -> (Completed |
/// Failed | Cancelled) -> Idle(armed).
///
/// At most one cycle is active at a time. Starting a new cycle cancels the
/// previous one's token, so in-flight fetch and compose work bound to the
/// superseded cycle discards its results instead of reaching the publisher.
pub struct RefreshScheduler<S, C> {
    config: SchedulerConfig,
    source: Arc<S>,
    connectivity: C,
    publisher: Arc<DisplayPublisher>,
    settings_rx: watch::Receiver<Settings>,
    trigger_rx: mpsc::Receiver<Trigger>,
    events_tx: mpsc::Sender<CycleEvent>,
    done_tx: mpsc::Sender<u64>,
    done_rx: mpsc::Receiver<u64>,
    shutdown_rx: watch::Receiver<()>,
    next_cycle_id: u64,
}

impl<S: TileSource, C: Connectivity> RefreshScheduler<S, C> {
    /// Creates the scheduler and spawns its run loop.
    pub fn spawn(
        config: SchedulerConfig,
        source: Arc<S>,
        connectivity: C,
        publisher: Arc<DisplayPublisher>,
        settings_rx: watch::Receiver<Settings>,
        shutdown_rx: watch::Receiver<()>,
    ) -> (JoinHandle<()>, SchedulerHandle, mpsc::Receiver<CycleEvent>) {
        let (trigger_tx, trigger_rx) = mpsc::channel(8);
        let (events_tx, events_rx) = mpsc::channel(64);
        let (done_tx, done_rx) = mpsc::channel(8);

        let scheduler = RefreshScheduler {
            config,
            source,
            connectivity,
            publisher,
            settings_rx,
            trigger_rx,
            events_tx,
            done_tx,
            done_rx,
            shutdown_rx,
            next_cycle_id: 1,
        };

        let join = tokio::spawn(scheduler.run());
        (join, SchedulerHandle { trigger_tx }, events_rx)
    }

    async fn run(mut self) {
        tracing::info!(config = ?self.config, "Refresh scheduler started");

        // First cycle fires immediately.
        let mut deadline = Instant::now();
        let mut inflight: Option<Inflight> = None;
        let mut restart_after_inflight = false;
        let mut settings_open = true;
        let mut triggers_open = true;

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    if let Some(cycle) = inflight.take() {
                        cycle.token.cancel();
                    }
                    break;
                }

                _ = time::sleep_until(deadline) => {
                    // A tick landing on a still-running (hung) cycle
                    // supersedes it; the new cycle owns scheduling.
                    if let Some(cycle) = inflight.take() {
                        tracing::debug!(cycle = cycle.id, "Superseding in-flight cycle");
                        cycle.token.cancel();
                    }
                    match self.start_cycle().await {
                        Some(cycle) => {
                            inflight = Some(cycle);
                            // Keep a tick armed so a hung cycle is bounded
                            // by the refresh period rather than a timeout.
                            deadline = Instant::now() + self.period();
                        }
                        None => {
                            // Gated out this tick; re-arm, produce nothing.
                            deadline = Instant::now() + self.period();
                        }
                    }
                }

                changed = self.settings_rx.changed(), if settings_open => {
                    match changed {
                        Ok(()) => {
                            tracing::info!(settings = ?*self.settings_rx.borrow(), "Settings changed");
                            if inflight.is_some() {
                                // The in-flight cycle keeps its snapshot and
                                // publishes; the new settings apply to the
                                // cycle started right after it finishes.
                                restart_after_inflight = true;
                            } else {
                                deadline = Instant::now();
                            }
                        }
                        Err(_) => settings_open = false,
                    }
                }

                trigger = self.trigger_rx.recv(), if triggers_open => {
                    match trigger {
                        Some(Trigger::RefreshNow) => deadline = Instant::now(),
                        None => triggers_open = false,
                    }
                }

                Some(finished_id) = self.done_rx.recv() => {
                    // Completions of superseded cycles carry stale ids and
                    // never re-arm; the cycle that replaced them owns the
                    // timer.
                    if inflight.as_ref().map(|c| c.id) == Some(finished_id) {
                        inflight = None;
                        deadline = if restart_after_inflight {
                            restart_after_inflight = false;
                            Instant::now()
                        } else {
                            Instant::now() + self.period()
                        };
                    }
                }
            }
        }

        tracing::info!("Refresh scheduler stopped");
    }

    fn period(&self) -> Duration {
        self.settings_rx.borrow().period
    }

    /// Starts one cycle with a snapshot of the current settings, or returns
    /// `None` when the wifi-only policy gates the cycle out.
    async fn start_cycle(&mut self) -> Option<Inflight> {
        let settings = self.settings_rx.borrow().clone();
        if settings.wifi_only && !self.connectivity.is_unmetered() {
            tracing::info!("Skipping refresh: wifi_only is set and network is metered");
            let _ = self.events_tx.send(CycleEvent::Skipped).await;
            return None;
        }

        let spec = GridSpec::for_zoom(
            self.config.display_width_px,
            settings.zoom,
            self.config.tile_width_px,
        );
        let id = self.next_cycle_id;
        self.next_cycle_id += 1;
        let token = CancellationToken::new();

        tokio::spawn(run_cycle(CycleContext {
            id,
            spec,
            base_url: self.config.base_url.clone(),
            concurrency: self.config.fetch_concurrency,
            source: self.source.clone(),
            publisher: self.publisher.clone(),
            token: token.clone(),
            events: self.events_tx.clone(),
            done: self.done_tx.clone(),
        }));

        Some(Inflight { id, token })
    }
}

struct CycleContext<S> {
    id: u64,
    spec: GridSpec,
    base_url: String,
    concurrency: usize,
    source: Arc<S>,
    publisher: Arc<DisplayPublisher>,
    token: CancellationToken,
    events: mpsc::Sender<CycleEvent>,
    done: mpsc::Sender<u64>,
}

async fn run_cycle<S: TileSource>(ctx: CycleContext<S>) {
    let started = Instant::now();
    tracing::info!(
        cycle = ctx.id,
        tile_count = ctx.spec.tile_count,
        output_px = ctx.spec.output_size_px,
        "Refresh cycle started"
    );
    let _ = ctx
        .events
        .send(CycleEvent::Started { cycle: ctx.id, tile_count: ctx.spec.tile_count })
        .await;

    let event = match assemble(&ctx).await {
        Ok(_) if ctx.token.is_cancelled() => CycleEvent::Cancelled { cycle: ctx.id },
        Ok((raster, bytes_downloaded)) => {
            ctx.publisher.publish(raster);
            let duration_ms = started.elapsed().as_millis() as u64;
            let tiles_fetched = ctx.spec.total_tiles();
            tracing::info!(cycle = ctx.id, duration_ms, bytes_downloaded, "Refresh cycle completed");
            CycleEvent::Completed { cycle: ctx.id, duration_ms, tiles_fetched, bytes_downloaded }
        }
        Err(EngineError::Cancelled) => {
            tracing::debug!(cycle = ctx.id, "Refresh cycle cancelled");
            CycleEvent::Cancelled { cycle: ctx.id }
        }
        Err(e) => {
            tracing::warn!(cycle = ctx.id, error = %e, "Refresh cycle failed; previous raster stays visible");
            CycleEvent::Failed { cycle: ctx.id, error: e.to_string() }
        }
    };

    let _ = ctx.events.send(event).await;
    let _ = ctx.done.send(ctx.id).await;
}

/// One full fetch-composite-downsample pass. Returns the finished raster
/// and the total encoded bytes pulled for it, without publishing; the
/// caller owns the publish decision.
async fn assemble<S: TileSource>(
    ctx: &CycleContext<S>,
) -> Result<(DisplayRaster, u64), EngineError> {
    let body = match ctx.token.run_until_cancelled(ctx.source.fetch_descriptor()).await {
        Some(result) => result?,
        None => return Err(EngineError::Cancelled),
    };
    let capture = CaptureIdentity::parse_descriptor(&body)?;
    let locations = grid::resolve(&ctx.base_url, &capture, &ctx.spec);

    let mut composite = CompositeRaster::new(ctx.spec);
    let mut tasks = spawn_tile_fetches(
        ctx.source.clone(),
        locations,
        ctx.concurrency,
        ctx.token.child_token(),
    );

    // All placements happen here, on this one task: tiles arrive in any
    // order from the workers, but writes into the composite are serialized.
    let mut bytes_downloaded = 0u64;
    while let Some(joined) = tasks.join_next().await {
        let tile = match joined {
            Ok(Ok((tile, transfer_bytes))) => {
                bytes_downloaded += transfer_bytes as u64;
                tile
            }
            Ok(Err(e)) => {
                // One failed tile fails the whole cycle; nothing partial is
                // ever published.
                tasks.abort_all();
                return Err(e);
            }
            Err(e) if e.is_cancelled() => return Err(EngineError::Cancelled),
            Err(e) => {
                tasks.abort_all();
                return Err(EngineError::Task(e.to_string()));
            }
        };
        composite.place(tile)?;
    }

    if ctx.token.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    debug_assert!(composite.is_complete());

    let output_size_px = ctx.spec.output_size_px;
    let pixels = tokio::task::spawn_blocking(move || composite.finish(output_size_px))
        .await
        .map_err(|e| EngineError::Task(e.to_string()))?;

    Ok((DisplayRaster { pixels, capture }, bytes_downloaded))
}
