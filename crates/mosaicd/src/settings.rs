use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Deserialize;
use tokio::sync::watch;
use tokio::time::sleep;

use mosaic_engine::{DisplayPublisher, GridSpec, Settings};

/// On-disk settings shape. Missing fields keep their defaults so a file with
/// only `{"zoom": 2.0}` is valid.
#[derive(Debug, Deserialize)]
struct SettingsFile {
    #[serde(default = "default_period_minutes")]
    period_minutes: u64,
    #[serde(default = "default_zoom")]
    zoom: f64,
    #[serde(default)]
    wifi_only: bool,
    /// Horizontal scroll fraction, 0.0 to 1.0. Render positioning only;
    /// never triggers a refresh cycle.
    #[serde(default)]
    pan_fraction: f64,
}

fn default_period_minutes() -> u64 {
    10
}

fn default_zoom() -> f64 {
    1.0
}

#[derive(Debug, PartialEq)]
struct ParsedSettings {
    engine: Settings,
    pan_fraction: f64,
}

fn parse(bytes: &[u8]) -> Result<ParsedSettings, serde_json::Error> {
    let file: SettingsFile = serde_json::from_slice(bytes)?;
    Ok(ParsedSettings {
        engine: Settings {
            period: Duration::from_secs(file.period_minutes * 60),
            zoom: file.zoom,
            wifi_only: file.wifi_only,
        },
        pan_fraction: file.pan_fraction,
    })
}

/// Polls the settings file by mtime. Refresh-relevant fields go into the
/// scheduler's config channel; the pan fraction goes straight to the
/// publisher since it only repositions the rendered output. A malformed
/// file is logged and ignored; the previous settings stay in effect.
pub struct SettingsWatcher {
    pub path: PathBuf,
    pub poll_interval: Duration,
    pub tx: watch::Sender<Settings>,
    pub publisher: Arc<DisplayPublisher>,
    pub display_width_px: u32,
    pub tile_width_px: u32,
}

impl SettingsWatcher {
    pub async fn run(self, mut shutdown_rx: watch::Receiver<()>) {
        tracing::info!(path = %self.path.display(), "Watching settings file");
        let mut last_modified: Option<SystemTime> = None;

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = sleep(self.poll_interval) => {}
            }

            let modified = match tokio::fs::metadata(&self.path).await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    tracing::debug!(path = %self.path.display(), error = %e, "Settings file not readable");
                    continue;
                }
            };
            if last_modified == Some(modified) {
                continue;
            }
            last_modified = Some(modified);

            let bytes = match tokio::fs::read(&self.path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "Failed to read settings file");
                    continue;
                }
            };
            match parse(&bytes) {
                Ok(parsed) => self.apply(parsed),
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "Ignoring malformed settings file");
                }
            }
        }
    }

    fn apply(&self, parsed: ParsedSettings) {
        self.apply_pan(parsed.pan_fraction, parsed.engine.zoom);

        let updated = self.tx.send_if_modified(|current| {
            if *current != parsed.engine {
                *current = parsed.engine.clone();
                true
            } else {
                false
            }
        });
        if updated {
            tracing::info!(settings = ?parsed.engine, "Settings file changed");
        }
    }

    fn apply_pan(&self, pan_fraction: f64, zoom: f64) {
        // The offset scales with the output size the current zoom produces.
        let spec = GridSpec::for_zoom(self.display_width_px, zoom, self.tile_width_px);
        self.publisher
            .set_pan_fraction(pan_fraction, spec.output_size_px);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_settings() {
        let parsed = parse(
            br#"{"period_minutes": 30, "zoom": 2.5, "wifi_only": true, "pan_fraction": 0.5}"#,
        )
        .unwrap();
        assert_eq!(parsed.engine.period, Duration::from_secs(1800));
        assert_eq!(parsed.engine.zoom, 2.5);
        assert!(parsed.engine.wifi_only);
        assert_eq!(parsed.pan_fraction, 0.5);
    }

    #[test]
    fn missing_fields_keep_defaults() {
        let parsed = parse(br#"{"zoom": 0.5}"#).unwrap();
        assert_eq!(parsed.engine.period, Duration::from_secs(600));
        assert_eq!(parsed.engine.zoom, 0.5);
        assert!(!parsed.engine.wifi_only);
        assert_eq!(parsed.pan_fraction, 0.0);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(parse(b"period_minutes = 30").is_err());
    }

    #[test]
    fn pan_change_reaches_the_publisher() {
        let publisher = Arc::new(DisplayPublisher::new());
        let (tx, _rx) = watch::channel(Settings::default());
        let watcher = SettingsWatcher {
            path: PathBuf::from("unused"),
            poll_interval: Duration::from_millis(10),
            tx,
            publisher: publisher.clone(),
            display_width_px: 1080,
            tile_width_px: 550,
        };

        // zoom 2.0 -> output 2160; full scroll shifts a quarter of that.
        watcher.apply(parse(br#"{"zoom": 2.0, "pan_fraction": 1.0}"#).unwrap());
        assert_eq!(publisher.pan_offset_px(), -540);

        // Pan-only edits update the offset without new engine settings.
        watcher.apply(parse(br#"{"zoom": 2.0, "pan_fraction": 0.0}"#).unwrap());
        assert_eq!(publisher.pan_offset_px(), 0);
    }
}
