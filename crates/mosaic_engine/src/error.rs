use thiserror::Error;

/// Failure modes of one refresh cycle.
///
/// Per-tile failures are not retried within a cycle; the next scheduled tick
/// is the retry mechanism. `Cancelled` is not user-visible as an error — it
/// marks a cycle superseded by a newer trigger.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Transport failure on the descriptor or a tile request.
    #[error("network request failed: {0}")]
    Network(String),

    /// The capture descriptor did not contain a well-formed timestamp.
    #[error("malformed capture descriptor: {0}")]
    Parse(String),

    /// Tile bytes could not be decoded into a raster.
    #[error("tile decode failed: {0}")]
    Decode(String),

    /// The cycle was superseded by a newer trigger before it finished.
    #[error("refresh cycle superseded")]
    Cancelled,

    /// A worker task panicked or the runtime refused it.
    #[error("internal task failure: {0}")]
    Task(String),
}
