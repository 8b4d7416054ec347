use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::compose::DisplayRaster;

/// The single slot the renderer reads the current mosaic from.
///
/// `publish` replaces the slot atomically; readers never block and never
/// observe a partially written raster. No history is kept — the previous
/// raster drops once its last reader releases it. The pan offset is render
/// positioning state only and is never baked into the raster.
pub struct DisplayPublisher {
    slot: watch::Sender<Option<Arc<DisplayRaster>>>,
    pan_offset_px: AtomicI32,
}

impl DisplayPublisher {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot,
            pan_offset_px: AtomicI32::new(0),
        }
    }

    /// Atomically replaces the readable raster.
    pub fn publish(&self, raster: DisplayRaster) {
        tracing::debug!(
            capture = %raster.capture,
            size_px = raster.pixels.width(),
            "Publishing display raster"
        );
        self.slot.send_replace(Some(Arc::new(raster)));
    }

    /// The most recently published raster, if any cycle has completed yet.
    pub fn latest(&self) -> Option<Arc<DisplayRaster>> {
        self.slot.borrow().clone()
    }

    /// A receiver that observes every future publish.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<DisplayRaster>>> {
        self.slot.subscribe()
    }

    /// Sets the horizontal pan offset, in pixels, applied at render time.
    pub fn set_pan_offset_px(&self, offset: i32) {
        self.pan_offset_px.store(offset, Ordering::Relaxed);
    }

    /// Sets the pan offset from the user's horizontal scroll fraction.
    ///
    /// A full scroll across the surface shifts the image by a quarter of
    /// its width, opposite the scroll direction.
    pub fn set_pan_fraction(&self, fraction: f64, output_size_px: u32) {
        let offset = (-fraction * output_size_px as f64 / 4.0) as i32;
        self.set_pan_offset_px(offset);
    }

    pub fn pan_offset_px(&self) -> i32 {
        self.pan_offset_px.load(Ordering::Relaxed)
    }
}

impl Default for DisplayPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureIdentity;
    use image::RgbaImage;

    fn raster(size: u32, timestamp: &str) -> DisplayRaster {
        DisplayRaster {
            pixels: RgbaImage::new(size, size),
            capture: CaptureIdentity::parse_timestamp(timestamp).unwrap(),
        }
    }

    #[test]
    fn starts_empty() {
        let publisher = DisplayPublisher::new();
        assert!(publisher.latest().is_none());
    }

    #[test]
    fn publish_supersedes_previous_raster() {
        let publisher = DisplayPublisher::new();
        publisher.publish(raster(4, "2024-03-01 04:00:00"));
        publisher.publish(raster(8, "2024-03-01 04:10:00"));

        let current = publisher.latest().unwrap();
        assert_eq!(current.pixels.width(), 8);
        assert_eq!(current.capture.time_stamp(), "041000");
    }

    #[test]
    fn subscribers_observe_publishes() {
        let publisher = DisplayPublisher::new();
        let mut rx = publisher.subscribe();
        publisher.publish(raster(4, "2024-03-01 04:00:00"));
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_some());
    }

    #[test]
    fn pan_offset_is_independent_of_the_slot() {
        let publisher = DisplayPublisher::new();
        publisher.set_pan_offset_px(-120);
        assert_eq!(publisher.pan_offset_px(), -120);
        assert!(publisher.latest().is_none());
    }

    #[test]
    fn pan_fraction_maps_to_quarter_width_shift() {
        let publisher = DisplayPublisher::new();

        publisher.set_pan_fraction(1.0, 2160);
        assert_eq!(publisher.pan_offset_px(), -540);

        publisher.set_pan_fraction(0.5, 2160);
        assert_eq!(publisher.pan_offset_px(), -270);

        publisher.set_pan_fraction(0.0, 2160);
        assert_eq!(publisher.pan_offset_px(), 0);
    }
}
