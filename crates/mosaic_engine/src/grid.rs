use crate::capture::CaptureIdentity;

/// Supported zoom range. Values outside are clamped, matching the settings UI.
pub const ZOOM_MIN: f64 = 0.1;
pub const ZOOM_MAX: f64 = 10.0;

/// Tiling parameters for one refresh cycle.
///
/// Recomputed whenever the zoom level changes; immutable for the duration of
/// a cycle once the cycle has started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSpec {
    /// Tiles per axis (the composite is `tile_count` x `tile_count`).
    pub tile_count: u32,
    /// Pixel width of each square tile as served by the remote source.
    pub tile_width_px: u32,
    /// Edge length of the final downsampled display raster.
    pub output_size_px: u32,
}

impl GridSpec {
    /// Derives the grid from the display width and zoom level.
    ///
    /// `tile_count = ceil(display_width * zoom / tile_width)` and
    /// `output_size = round(display_width * zoom)`, with zoom clamped to
    /// [`ZOOM_MIN`, `ZOOM_MAX`].
    pub fn for_zoom(display_width_px: u32, zoom: f64, tile_width_px: u32) -> Self {
        let zoom = zoom.clamp(ZOOM_MIN, ZOOM_MAX);
        let scaled = display_width_px as f64 * zoom;
        let tile_count = (scaled / tile_width_px as f64).ceil().max(1.0) as u32;
        Self {
            tile_count,
            tile_width_px,
            output_size_px: scaled.round() as u32,
        }
    }

    /// Edge length of the raw composite before downsampling.
    pub fn composite_size_px(&self) -> u32 {
        self.tile_width_px * self.tile_count
    }

    /// Total number of tiles in the grid.
    pub fn total_tiles(&self) -> u32 {
        self.tile_count * self.tile_count
    }
}

/// One tile's URL and its fixed slot in the composite grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileLocation {
    pub url: String,
    pub grid_x: u32,
    pub grid_y: u32,
}

/// Enumerates the tile locations for one capture, row-major (`y` outer).
///
/// Pure and deterministic: the same identity and spec always yield the same
/// list. Order is irrelevant for correctness (each tile carries its own
/// coordinates) but fixed for testability.
pub fn resolve(base_url: &str, identity: &CaptureIdentity, spec: &GridSpec) -> Vec<TileLocation> {
    let mut locations = Vec::with_capacity(spec.total_tiles() as usize);
    for y in 0..spec.tile_count {
        for x in 0..spec.tile_count {
            let url = format!(
                "{}/{}d/{}/{}/{}_{}_{}.png",
                base_url,
                spec.tile_count,
                spec.tile_width_px,
                identity.date_path(),
                identity.time_stamp(),
                x,
                y,
            );
            locations.push(TileLocation { url, grid_x: x, grid_y: y });
        }
    }
    locations
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn identity(s: &str) -> CaptureIdentity {
        CaptureIdentity::parse_timestamp(s).unwrap()
    }

    #[test]
    fn resolve_covers_grid_exactly_once() {
        let spec = GridSpec { tile_count: 3, tile_width_px: 550, output_size_px: 1080 };
        let locations = resolve("http://example/img", &identity("2024-03-01 04:10:00"), &spec);

        assert_eq!(locations.len(), 9);
        let coords: HashSet<(u32, u32)> =
            locations.iter().map(|l| (l.grid_x, l.grid_y)).collect();
        assert_eq!(coords.len(), 9);
        for y in 0..3 {
            for x in 0..3 {
                assert!(coords.contains(&(x, y)));
            }
        }
    }

    #[test]
    fn resolve_is_deterministic() {
        let spec = GridSpec { tile_count: 2, tile_width_px: 550, output_size_px: 1100 };
        let id = identity("2024-03-01 04:10:00");
        assert_eq!(resolve("http://b", &id, &spec), resolve("http://b", &id, &spec));
    }

    #[test]
    fn resolve_matches_url_template() {
        let spec = GridSpec { tile_count: 2, tile_width_px: 550, output_size_px: 1100 };
        let locations = resolve("http://example/img", &identity("2024-03-01 04:10:00"), &spec);

        for loc in &locations {
            let expected = format!(
                "http://example/img/2d/550/2024/03/01/041000_{}_{}.png",
                loc.grid_x, loc.grid_y
            );
            assert_eq!(loc.url, expected);
        }
        // Row-major: y outer, x inner.
        let order: Vec<(u32, u32)> = locations.iter().map(|l| (l.grid_x, l.grid_y)).collect();
        assert_eq!(order, vec![(0, 0), (1, 0), (0, 1), (1, 1)]);
    }

    #[test]
    fn zoom_derives_tile_count_and_output_size() {
        let spec = GridSpec::for_zoom(1080, 2.0, 550);
        assert_eq!(spec.tile_count, 4);
        assert_eq!(spec.output_size_px, 2160);
        assert_eq!(spec.composite_size_px(), 2200);
    }

    #[test]
    fn zoom_is_clamped_to_supported_range() {
        let low = GridSpec::for_zoom(1080, 0.0001, 550);
        assert_eq!(low, GridSpec::for_zoom(1080, ZOOM_MIN, 550));

        let high = GridSpec::for_zoom(1080, 99.0, 550);
        assert_eq!(high, GridSpec::for_zoom(1080, ZOOM_MAX, 550));
    }

    #[test]
    fn tile_count_is_at_least_one() {
        let spec = GridSpec::for_zoom(100, 0.1, 550);
        assert_eq!(spec.tile_count, 1);
    }
}
