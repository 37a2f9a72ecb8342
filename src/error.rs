//! Error type shared by every fallible operation in the crate.
//!
//! Errors fall in three groups:
//!
//! - **Topology/state errors** (`InvalidTopology`, `ShapeMismatch`) abort
//!   initialization and leave the previous network state in place.
//! - **Per-step errors** (`DimensionMismatch`, `NotInitialized`) reject a single
//!   `run`/`train_step` call before any tensor is touched.
//! - **Backend errors** (`KernelCompilation`, `KernelExecution`) come from the
//!   kernel builder or a compute backend. There is no fallback path: a network
//!   whose kernels failed to build must be re-initialized.
//!
//! NaN and infinite values are not errors. They propagate through the
//! pipeline unchanged.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = NetworkError> = core::result::Result<T, E>;

/// Everything that can go wrong while building, training or persisting a network.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// A layer width was zero, or fewer than two layers were given.
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    /// Preserved parameters do not fit the requested topology.
    #[error("shape mismatch in layer {layer}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        layer: usize,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// An input or target vector has the wrong length for its layer.
    #[error("dimension mismatch for {what}: expected {expected} values, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A backend could not build a kernel.
    #[error("kernel compilation failed: {0}")]
    KernelCompilation(String),

    /// A compiled kernel failed while running on its backend.
    #[error("kernel execution failed: {0}")]
    KernelExecution(String),

    /// `run` or `train_step` was called before the network had a topology.
    #[error("network has not been initialized")]
    NotInitialized,

    /// A persisted snapshot is malformed or inconsistent.
    #[error("invalid model: {0}")]
    InvalidModel(String),

    /// Reading or writing a snapshot or config file failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A JSON configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl NetworkError {
    pub(crate) fn dimension(what: &'static str, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            what,
            expected,
            actual,
        }
    }
}
