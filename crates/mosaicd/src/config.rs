use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use mosaic_engine::Settings;

/// `mosaicd` - keeps a composited satellite mosaic fresh on disk.
///
/// On a fixed interval the daemon discovers the most recent capture from the
/// remote tile endpoint, downloads all tiles of the configured grid
/// concurrently, stitches them into one raster, rescales it for the display,
/// and atomically replaces the output image.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Base URL of the tile endpoint.
    ///
    /// The capture descriptor is read from `{base_url}/latest.json` and tile
    /// URLs are derived from the same base.
    #[arg(
        long,
        env = "MOSAIC_BASE_URL",
        default_value = "https://himawari8-dl.nict.go.jp/himawari8/img/D531106"
    )]
    pub base_url: String,

    /// Pixel width of each square tile as served by the endpoint.
    #[arg(long, env = "MOSAIC_TILE_WIDTH_PX", default_value_t = 550)]
    pub tile_width_px: u32,

    /// Width of the display the mosaic is scaled for.
    #[arg(long, env = "MOSAIC_DISPLAY_WIDTH_PX", default_value_t = 1920)]
    pub display_width_px: u32,

    /// Maximum number of concurrent tile downloads.
    #[arg(long, env = "MOSAIC_FETCH_CONCURRENCY", default_value_t = 8)]
    pub fetch_concurrency: usize,

    /// Path the current mosaic is written to after each successful cycle.
    #[arg(long, env = "MOSAIC_OUTPUT_PATH", default_value = "mosaic.png")]
    pub output_path: PathBuf,

    /// Optional JSON settings file polled for zoom/period/wifi-only changes.
    #[arg(long, env = "MOSAIC_SETTINGS_PATH")]
    pub settings_path: Option<PathBuf>,

    /// How often the settings file is polled for changes, in milliseconds.
    #[arg(long, env = "MOSAIC_SETTINGS_POLL_MS", default_value_t = 2000)]
    pub settings_poll_ms: u64,

    /// Listen address for the Prometheus metrics server.
    #[arg(long, env = "MOSAIC_METRICS_LISTEN_ADDR", default_value = "127.0.0.1:9799")]
    pub metrics_listen_addr: String,

    /// Initial refresh period, in minutes. The capture source publishes a
    /// new image every 10 minutes, so shorter periods rarely help.
    #[arg(long, env = "MOSAIC_PERIOD_MINUTES", default_value_t = 10)]
    pub period_minutes: u64,

    /// Initial zoom level, within 0.1 to 10.0.
    #[arg(long, env = "MOSAIC_ZOOM", default_value_t = 1.0)]
    pub zoom: f64,

    /// Only refresh while an unmetered network path is available.
    #[arg(long, env = "MOSAIC_WIFI_ONLY", default_value_t = false)]
    pub wifi_only: bool,

    /// Initial horizontal pan position as a scroll fraction, 0.0 to 1.0.
    /// A full scroll shifts the mosaic by a quarter of its width.
    #[arg(long, env = "MOSAIC_PAN_FRACTION", default_value_t = 0.0)]
    pub pan_fraction: f64,
}

impl Config {
    /// Settings in effect until the settings file (if any) overrides them.
    pub fn initial_settings(&self) -> Settings {
        Settings {
            period: Duration::from_secs(self.period_minutes * 60),
            zoom: self.zoom,
            wifi_only: self.wifi_only,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_capture_cadence() {
        let config = Config::parse_from(["mosaicd"]);
        let settings = config.initial_settings();
        assert_eq!(settings.period, Duration::from_secs(600));
        assert_eq!(settings.zoom, 1.0);
        assert!(!settings.wifi_only);
        assert_eq!(config.tile_width_px, 550);
        assert_eq!(config.pan_fraction, 0.0);
    }
}
