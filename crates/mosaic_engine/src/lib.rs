//! Tile synchronization and compositing engine.
//!
//! Keeps a displayable mosaic of a remote tiled capture fresh: each refresh
//! cycle discovers the latest capture identity, derives one URL per grid
//! cell, fetches all tiles concurrently, composites them into a single
//! raster on one writer task, downsamples to the display size, and publishes
//! the result atomically. A newer trigger supersedes an in-flight cycle via
//! its cancellation token; a superseded cycle's output never reaches the
//! publisher.
//!
//! The render surface, preference store, and connectivity check live outside
//! this crate and plug in through [`publish::DisplayPublisher`], the
//! [`scheduler::Settings`] watch channel, and [`scheduler::Connectivity`].

pub mod capture;
pub mod compose;
pub mod error;
pub mod fetch;
pub mod grid;
pub mod publish;
pub mod scheduler;
pub mod source;

pub use capture::CaptureIdentity;
pub use compose::{CompositeRaster, DecodedTile, DisplayRaster};
pub use error::EngineError;
pub use grid::{GridSpec, TileLocation};
pub use publish::DisplayPublisher;
pub use scheduler::{
    AlwaysUnmetered, Connectivity, CycleEvent, RefreshScheduler, SchedulerConfig, SchedulerHandle,
    Settings,
};
pub use source::{HttpTileSource, TileSource};
