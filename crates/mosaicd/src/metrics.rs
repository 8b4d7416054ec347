use std::net::SocketAddr;

use anyhow::Context;
use axum::{response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, Gauge, IntCounter, Registry, TextEncoder};

use mosaic_engine::CycleEvent;

pub struct MosaicMetrics {
    pub registry: Registry,
    pub cycles_completed_total: IntCounter,
    pub cycles_failed_total: IntCounter,
    pub cycles_cancelled_total: IntCounter,
    pub ticks_skipped_total: IntCounter,
    pub tiles_fetched_total: IntCounter,
    pub bytes_downloaded_total: IntCounter,
    pub last_cycle_seconds: Gauge,
    pub current_tile_count: Gauge,
}

impl MosaicMetrics {
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("mosaicd".into()), None).unwrap();

        macro_rules! reg {
            ($m:expr) => {{
                registry.register(Box::new($m.clone())).unwrap();
                $m
            }};
        }

        Self {
            cycles_completed_total: reg!(IntCounter::new(
                "cycles_completed_total",
                "Refresh cycles that published a new mosaic"
            )
            .unwrap()),
            cycles_failed_total: reg!(IntCounter::new(
                "cycles_failed_total",
                "Refresh cycles aborted by a fetch, parse, or decode failure"
            )
            .unwrap()),
            cycles_cancelled_total: reg!(IntCounter::new(
                "cycles_cancelled_total",
                "Refresh cycles superseded by a newer trigger"
            )
            .unwrap()),
            ticks_skipped_total: reg!(IntCounter::new(
                "ticks_skipped_total",
                "Timer ticks gated out by the wifi-only policy"
            )
            .unwrap()),
            tiles_fetched_total: reg!(IntCounter::new(
                "tiles_fetched_total",
                "Tiles fetched and decoded by completed cycles"
            )
            .unwrap()),
            bytes_downloaded_total: reg!(IntCounter::new(
                "bytes_downloaded_total",
                "Encoded tile bytes downloaded by completed cycles"
            )
            .unwrap()),
            last_cycle_seconds: reg!(Gauge::new(
                "last_cycle_seconds",
                "Wall time of the most recent completed cycle"
            )
            .unwrap()),
            current_tile_count: reg!(Gauge::new(
                "current_tile_count",
                "Tiles per axis of the most recently started cycle"
            )
            .unwrap()),
            registry,
        }
    }

    pub fn router(&self) -> Router {
        let reg = self.registry.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let reg = reg.clone();
                async move {
                    let mf = reg.gather();
                    let mut buf = Vec::new();
                    TextEncoder::new().encode(&mf, &mut buf).unwrap();
                    String::from_utf8(buf).unwrap().into_response()
                }
            }),
        )
    }

    pub fn observe(&self, event: &CycleEvent) {
        match event {
            CycleEvent::Started { tile_count, .. } => {
                self.current_tile_count.set(*tile_count as f64);
            }
            CycleEvent::Completed { duration_ms, tiles_fetched, bytes_downloaded, .. } => {
                self.cycles_completed_total.inc();
                self.tiles_fetched_total.inc_by(*tiles_fetched as u64);
                self.bytes_downloaded_total.inc_by(*bytes_downloaded);
                self.last_cycle_seconds.set(*duration_ms as f64 / 1000.0);
            }
            CycleEvent::Failed { .. } => self.cycles_failed_total.inc(),
            CycleEvent::Cancelled { .. } => self.cycles_cancelled_total.inc(),
            CycleEvent::Skipped => self.ticks_skipped_total.inc(),
        }
    }
}

/// Binds and serves the metrics router. Returns the bind or serve error so
/// the spawning side can log it instead of losing it with the task.
pub async fn serve(addr: SocketAddr, router: Router) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics listener on {addr}"))?;
    tracing::info!(addr = %addr, "Metrics server started");
    axum::serve(listener, router.into_make_service())
        .await
        .context("Metrics server exited")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_drive_the_counters() {
        let metrics = MosaicMetrics::new();
        metrics.observe(&CycleEvent::Started { cycle: 1, tile_count: 4 });
        metrics.observe(&CycleEvent::Completed {
            cycle: 1,
            duration_ms: 1500,
            tiles_fetched: 16,
            bytes_downloaded: 65536,
        });
        metrics.observe(&CycleEvent::Failed { cycle: 2, error: "boom".into() });
        metrics.observe(&CycleEvent::Skipped);

        assert_eq!(metrics.cycles_completed_total.get(), 1);
        assert_eq!(metrics.cycles_failed_total.get(), 1);
        assert_eq!(metrics.ticks_skipped_total.get(), 1);
        assert_eq!(metrics.tiles_fetched_total.get(), 16);
        assert_eq!(metrics.bytes_downloaded_total.get(), 65536);
        assert_eq!(metrics.current_tile_count.get(), 4.0);
        assert_eq!(metrics.last_cycle_seconds.get(), 1.5);
    }

    #[tokio::test]
    async fn serve_surfaces_bind_failures() {
        // Occupy a port, then ask the server to bind the same one.
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = occupied.local_addr().unwrap();

        let err = serve(addr, MosaicMetrics::new().router()).await.unwrap_err();
        assert!(err.to_string().contains("bind"));
    }
}
