use image::{imageops, RgbaImage};

use crate::capture::CaptureIdentity;
use crate::error::EngineError;
use crate::grid::GridSpec;

/// One fetched and decoded tile, tagged with its fixed grid slot.
///
/// Created by a fetch worker and handed off exactly once to the compositor;
/// the worker keeps no reference to the pixels afterwards.
pub struct DecodedTile {
    pub pixels: RgbaImage,
    pub grid_x: u32,
    pub grid_y: u32,
}

/// The mutable full-size raster being assembled during one cycle.
///
/// Exclusively owned by that cycle. All `place` calls are made from the one
/// task draining fetch completions, so writes into the backing buffer are
/// serialized even though tiles arrive from concurrent workers — interleaved
/// unsynchronized writes into adjacent regions of the same buffer are the
/// race this layout exists to prevent.
pub struct CompositeRaster {
    spec: GridSpec,
    pixels: RgbaImage,
    placed: u32,
}

impl CompositeRaster {
    pub fn new(spec: GridSpec) -> Self {
        let size = spec.composite_size_px();
        Self {
            spec,
            pixels: RgbaImage::new(size, size),
            placed: 0,
        }
    }

    /// Writes a tile at pixel offset `(tile_width * grid_x, tile_width * grid_y)`.
    ///
    /// Placement is idempotent per slot and order-independent; tiles may
    /// arrive in any permutation.
    pub fn place(&mut self, tile: DecodedTile) -> Result<(), EngineError> {
        let (w, h) = tile.pixels.dimensions();
        if w != self.spec.tile_width_px || h != self.spec.tile_width_px {
            return Err(EngineError::Decode(format!(
                "tile ({}, {}) is {w}x{h}, expected {}x{}",
                tile.grid_x, tile.grid_y, self.spec.tile_width_px, self.spec.tile_width_px
            )));
        }
        if tile.grid_x >= self.spec.tile_count || tile.grid_y >= self.spec.tile_count {
            return Err(EngineError::Decode(format!(
                "tile coordinates ({}, {}) outside {n}x{n} grid",
                tile.grid_x,
                tile.grid_y,
                n = self.spec.tile_count
            )));
        }

        let x = (self.spec.tile_width_px * tile.grid_x) as i64;
        let y = (self.spec.tile_width_px * tile.grid_y) as i64;
        imageops::replace(&mut self.pixels, &tile.pixels, x, y);
        self.placed += 1;
        Ok(())
    }

    /// Whether all `tile_count^2` tiles have been placed.
    pub fn is_complete(&self) -> bool {
        self.placed >= self.spec.total_tiles()
    }

    /// One high-quality resize down (or up) to the display size.
    ///
    /// CPU-bound; callers run this on a blocking thread. The output size is
    /// decided here and nowhere else — zoom can both shrink and enlarge.
    pub fn finish(self, output_size_px: u32) -> RgbaImage {
        if output_size_px == self.pixels.width() {
            return self.pixels;
        }
        imageops::resize(
            &self.pixels,
            output_size_px,
            output_size_px,
            imageops::FilterType::Lanczos3,
        )
    }
}

/// The immutable result of one completed cycle, ready for rendering.
pub struct DisplayRaster {
    pub pixels: RgbaImage,
    pub capture: CaptureIdentity,
}
