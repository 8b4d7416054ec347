use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::compose::DecodedTile;
use crate::error::EngineError;
use crate::grid::TileLocation;
use crate::source::TileSource;

/// Spawns one fetch+decode task per tile location.
///
/// Tasks run concurrently with no ordering guarantee on completion; the
/// semaphore bounds in-flight requests so at most `concurrency` decoded
/// rasters are being produced at once. Every task observes `token` and
/// becomes inert once the owning cycle is superseded. Each success carries
/// the encoded transfer size so the cycle can account for downloaded bytes.
pub fn spawn_tile_fetches<S: TileSource>(
    source: Arc<S>,
    locations: Vec<TileLocation>,
    concurrency: usize,
    token: CancellationToken,
) -> JoinSet<Result<(DecodedTile, usize), EngineError>> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for location in locations {
        let source = source.clone();
        let semaphore = semaphore.clone();
        let token = token.clone();

        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| EngineError::Cancelled)?;
            if token.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let bytes = match token.run_until_cancelled(source.fetch_tile(&location.url)).await {
                Some(result) => result?,
                None => return Err(EngineError::Cancelled),
            };

            let pixels = image::load_from_memory(&bytes)
                .map_err(|e| {
                    EngineError::Decode(format!(
                        "tile ({}, {}): {e}",
                        location.grid_x, location.grid_y
                    ))
                })?
                .to_rgba8();

            tracing::trace!(
                grid_x = location.grid_x,
                grid_y = location.grid_y,
                bytes = bytes.len(),
                "Tile fetched and decoded"
            );

            let tile = DecodedTile {
                pixels,
                grid_x: location.grid_x,
                grid_y: location.grid_y,
            };
            Ok((tile, bytes.len()))
        });
    }

    tasks
}
