//! Error types for the swarm engine.

use thiserror::Error;

/// Errors that can occur inside the swarm engine.
///
/// Only `Configuration` is recoverable by callers; the pool variants
/// indicate bugs (a correctly sized pool never fills, and a handle is
/// only invalid if the caller kept it past the element's lifetime) and
/// are treated as fatal by the simulator.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid simulation parameters, reported before the first tick
    #[error("configuration: {0}")]
    Configuration(String),

    /// `construct` was called on a pool with no free slot
    #[error("pool is full")]
    PoolFull,

    /// A handle did not name a live element of this pool
    #[error("invalid pool handle: {0}")]
    InvalidPointer(&'static str),

    /// A pool was dropped while still owning live elements
    #[error("pool dropped with {live} live elements")]
    PoolLeak {
        /// Number of elements still alive at drop
        live: usize,
    },
}

/// Convenience alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;
