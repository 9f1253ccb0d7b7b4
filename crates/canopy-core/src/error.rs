//! Crate-wide error taxonomy.
//!
//! Oversized batches are deliberately *not* represented here: routing a batch
//! to the asynchronous export channel is a normal outcome
//! ([`crate::stats::AggregationOutcome::Export`]), not a failure.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The registry table is internally inconsistent (duplicate key, unknown
    /// theme, absent build function). Fatal at load time.
    #[error("registry schema error: {0}")]
    Schema(String),

    /// The composed surface's band set does not match the registry.
    /// Only raised when surface validation is enabled.
    #[error("surface composition error: missing bands {missing:?}, unexpected bands {unexpected:?}")]
    Composition {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    /// Remote computation failed after exhausting the retry budget.
    #[error("remote computation failed after {attempts} attempt(s): {message}")]
    Remote { attempts: u32, message: String },

    /// Registry/composer drift affecting risk inputs, or an invalid request
    /// (empty batch, out-of-range threshold). Fatal for the whole batch.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    pub(crate) fn remote(attempts: u32, source: crate::backend::BackendError) -> Self {
        Error::Remote {
            attempts,
            message: source.to_string(),
        }
    }
}
