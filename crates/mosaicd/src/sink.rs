use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;

use mosaic_engine::{DisplayPublisher, DisplayRaster};

/// Render-surface stand-in: writes each newly published mosaic to disk.
///
/// The write goes to a temp file first and is renamed into place, so
/// consumers of the output path never see a half-written image. While the
/// surface is hidden the write is skipped; the publisher slot still updates
/// and the next write after visibility returns picks up the latest raster.
/// Each write logs where the raster would sit on the display: centered, then
/// shifted by the publisher's pan offset.
pub async fn run(
    publisher: Arc<DisplayPublisher>,
    output_path: PathBuf,
    display_width_px: u32,
    visible: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let mut slot_rx = publisher.subscribe();
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            changed = slot_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let Some(raster) = slot_rx.borrow_and_update().clone() else {
            continue;
        };
        if !visible.load(Ordering::Relaxed) {
            tracing::debug!("Surface hidden; skipping output write");
            continue;
        }
        match write_png(raster.clone(), &output_path).await {
            Ok(()) => {
                let draw_x = draw_offset_x(
                    publisher.pan_offset_px(),
                    display_width_px,
                    raster.pixels.width(),
                );
                tracing::info!(
                    path = %output_path.display(),
                    capture = %raster.capture,
                    size_px = raster.pixels.width(),
                    draw_offset_x = draw_x,
                    "Wrote mosaic"
                );
            }
            Err(e) => {
                tracing::warn!(path = %output_path.display(), error = %e, "Failed to write mosaic");
            }
        }
    }
}

/// Horizontal position the raster is drawn at: centered on the display,
/// shifted by the user's pan offset. Negative when the raster overflows
/// the display or the pan pushes it off the left edge.
fn draw_offset_x(pan_offset_px: i32, display_width_px: u32, raster_width_px: u32) -> i32 {
    pan_offset_px + (display_width_px as i32 - raster_width_px as i32) / 2
}

async fn write_png(raster: Arc<DisplayRaster>, path: &Path) -> anyhow::Result<()> {
    let path = path.to_owned();
    let tmp = path.with_extension("tmp");
    tokio::task::spawn_blocking(move || {
        raster
            .pixels
            .save_with_format(&tmp, image::ImageFormat::Png)
            .with_context(|| format!("encoding {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("renaming {} into place", tmp.display()))
    })
    .await
    .context("output write task failed")?
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use mosaic_engine::CaptureIdentity;

    #[tokio::test]
    async fn writes_a_decodable_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mosaic.png");
        let raster = Arc::new(DisplayRaster {
            pixels: RgbaImage::new(6, 6),
            capture: CaptureIdentity::parse_timestamp("2024-03-01 04:10:00").unwrap(),
        });

        write_png(raster, &path).await.unwrap();

        let reloaded = image::open(&path).unwrap();
        assert_eq!(reloaded.width(), 6);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn draw_offset_centers_then_pans() {
        // A 1080px raster on a 1920px display sits 420px in.
        assert_eq!(draw_offset_x(0, 1920, 1080), 420);
        // Panning shifts the centered position.
        assert_eq!(draw_offset_x(-120, 1920, 1080), 300);
        // A raster wider than the display hangs off both edges.
        assert_eq!(draw_offset_x(0, 1920, 3840), -960);
    }
}
