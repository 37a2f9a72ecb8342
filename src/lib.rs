//! briny_mlp: a feedforward neural network trained with per-layer kernels.
//!
//! Every layer of a fully connected sigmoid network gets its own forward,
//! backward and update kernel, specialized on that layer's widths. Training
//! one example is three ordered passes over those kernels against a single
//! mutable [`NetworkState`](state::NetworkState).
//!
//! # Features
//!
//! - Layer widths derived from the data, or given explicitly.
//! - `rayon` kernels on the CPU, WGSL compute kernels through `wgpu` when the
//!   `wgpu` feature is enabled.
//! - Momentum gradient descent with a per-example MSE report.
//! - Parameter snapshots in the `.bpat` binary format.
//!
//! # Modules
//!
//! - [`topology`]: layer widths and how they are derived
//! - [`state`]: per-layer tensors
//! - [`kernels`]: kernel descriptors, compilation and the kernel cache
//! - [`engine`]: forward, backward and update passes
//! - [`network`]: the [`NeuralNetwork`] facade
//! - [`train`]: the iterate-until-convergence loop
//! - [`modelio`]: `.bpat` persistence
//!
//! # Example
//!
//! ```rust
//! use briny_mlp::{NetworkOptions, NeuralNetwork};
//!
//! let mut net = NeuralNetwork::new(NetworkOptions::default().with_seed(1));
//! net.initialize(2, 1, false)?;
//! let mse = net.train_step(&[0.0, 1.0], &[1.0], 0.3, 0.1)?;
//! assert!(mse >= 0.0);
//! # Ok::<(), briny_mlp::NetworkError>(())
//! ```

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod kernels;
pub mod modelio;
pub mod network;
pub mod state;
pub mod tensors;
pub mod topology;
pub mod train;

pub use backend::{Backend, get_backend, set_backend};
pub use config::{NetworkOptions, TrainingOptions};
pub use error::{NetworkError, Result};
pub use modelio::ParameterSnapshot;
pub use network::NeuralNetwork;
pub use train::{TrainingExample, TrainingStatus, train};
