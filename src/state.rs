//! Per-layer network state.
//!
//! [`NetworkState`] owns every tensor the kernels read or write. All vectors
//! are indexed by layer `0..=L`; the parameter tensors of layer 0 are empty
//! placeholders because the input layer has no incoming weights.
//!
//! | tensor    | shape of layer ℓ            | written by     | lifetime   |
//! |-----------|-----------------------------|----------------|------------|
//! | `weights` | `[sizes[ℓ], sizes[ℓ-1]]`    | update engine  | persistent |
//! | `biases`  | `[sizes[ℓ]]`                | update engine  | persistent |
//! | `changes` | `[sizes[ℓ], sizes[ℓ-1]]`    | update engine  | persistent |
//! | `outputs` | `[sizes[ℓ]]`                | forward engine | one step   |
//! | `deltas`  | `[sizes[ℓ]]`                | backward engine| one step   |
//! | `errors`  | `[sizes[ℓ]]`                | backward engine| one step   |
//!
//! Engines borrow the state mutably for the duration of their pass and
//! never keep references into it.

use rand::Rng;

use crate::error::{NetworkError, Result};
use crate::tensors::{Ten64, Tensor};
use crate::topology::Topology;

/// Initial parameters are drawn from `[-INIT_RANGE / 2, INIT_RANGE / 2)`.
const INIT_RANGE: f64 = 0.4;

fn random_parameter<R: Rng>(rng: &mut R) -> f64 {
    rng.random::<f64>() * INIT_RANGE - INIT_RANGE / 2.0
}

fn weight_shape(sizes: &[usize], layer: usize) -> Vec<usize> {
    if layer == 0 {
        vec![0, 0]
    } else {
        vec![sizes[layer], sizes[layer - 1]]
    }
}

fn bias_shape(sizes: &[usize], layer: usize) -> Vec<usize> {
    if layer == 0 { vec![0] } else { vec![sizes[layer]] }
}

/// The six per-layer tensor families of a network.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkState {
    pub(crate) weights: Vec<Ten64>,
    pub(crate) biases: Vec<Ten64>,
    pub(crate) outputs: Vec<Ten64>,
    pub(crate) deltas: Vec<Ten64>,
    pub(crate) errors: Vec<Ten64>,
    pub(crate) changes: Vec<Ten64>,
}

impl NetworkState {
    /// Allocates fresh state for `topology` with random parameters.
    pub fn allocate<R: Rng>(topology: &Topology, rng: &mut R) -> Self {
        let sizes = topology.sizes();
        let layers = 0..sizes.len();

        let weights = layers
            .clone()
            .map(|l| Tensor::from_fn(weight_shape(sizes, l), || random_parameter(rng)))
            .collect();
        let biases = layers
            .clone()
            .map(|l| Tensor::from_fn(bias_shape(sizes, l), || random_parameter(rng)))
            .collect();

        let mut state = Self {
            weights,
            biases,
            outputs: Vec::new(),
            deltas: Vec::new(),
            errors: Vec::new(),
            changes: Vec::new(),
        };
        state.reset_buffers(sizes);
        state
    }

    /// Builds state around existing parameters, e.g. from a snapshot.
    ///
    /// # Errors
    /// `ShapeMismatch` if any weight or bias tensor disagrees with `topology`.
    pub fn with_parameters(topology: &Topology, weights: Vec<Ten64>, biases: Vec<Ten64>) -> Result<Self> {
        let mut state = Self {
            weights,
            biases,
            outputs: Vec::new(),
            deltas: Vec::new(),
            errors: Vec::new(),
            changes: Vec::new(),
        };
        state.check_parameters(topology)?;
        state.reset_buffers(topology.sizes());
        Ok(state)
    }

    /// Re-initializes the state for `topology`.
    ///
    /// Outputs, deltas, errors and changes are always reallocated and zeroed.
    /// Weights and biases are redrawn unless `preserve_parameters` is set, in
    /// which case they are kept verbatim.
    ///
    /// # Errors
    /// `ShapeMismatch` if parameters are preserved but do not fit `topology`.
    /// The state is left untouched in that case.
    pub fn initialize<R: Rng>(
        &mut self,
        topology: &Topology,
        preserve_parameters: bool,
        rng: &mut R,
    ) -> Result<()> {
        if preserve_parameters {
            self.check_parameters(topology)?;
            self.reset_buffers(topology.sizes());
        } else {
            *self = Self::allocate(topology, rng);
        }
        Ok(())
    }

    /// Verifies that weights and biases match `topology` layer by layer.
    ///
    /// # Errors
    /// `ShapeMismatch` naming the first offending layer.
    pub fn check_parameters(&self, topology: &Topology) -> Result<()> {
        let sizes = topology.sizes();

        if self.weights.len() != sizes.len() || self.biases.len() != sizes.len() {
            return Err(NetworkError::ShapeMismatch {
                layer: self.weights.len().min(self.biases.len()).min(sizes.len()),
                expected: vec![sizes.len()],
                found: vec![self.weights.len(), self.biases.len()],
            });
        }

        for layer in 0..sizes.len() {
            let expected = weight_shape(sizes, layer);
            if self.weights[layer].shape != expected {
                return Err(NetworkError::ShapeMismatch {
                    layer,
                    expected,
                    found: self.weights[layer].shape.clone(),
                });
            }
            let expected = bias_shape(sizes, layer);
            if self.biases[layer].shape != expected {
                return Err(NetworkError::ShapeMismatch {
                    layer,
                    expected,
                    found: self.biases[layer].shape.clone(),
                });
            }
        }
        Ok(())
    }

    fn reset_buffers(&mut self, sizes: &[usize]) {
        let vectors = || sizes.iter().map(|&w| Tensor::zeros(vec![w])).collect::<Vec<_>>();
        self.outputs = vectors();
        self.deltas = vectors();
        self.errors = vectors();
        self.changes = (0..sizes.len())
            .map(|l| Tensor::zeros(weight_shape(sizes, l)))
            .collect();
    }

    /// Number of layers including the input layer (`L + 1`).
    pub fn layers(&self) -> usize {
        self.outputs.len()
    }

    pub fn weights(&self, layer: usize) -> &Ten64 {
        &self.weights[layer]
    }

    pub fn biases(&self, layer: usize) -> &Ten64 {
        &self.biases[layer]
    }

    pub fn outputs(&self, layer: usize) -> &Ten64 {
        &self.outputs[layer]
    }

    pub fn deltas(&self, layer: usize) -> &Ten64 {
        &self.deltas[layer]
    }

    pub fn errors(&self, layer: usize) -> &Ten64 {
        &self.errors[layer]
    }

    pub fn changes(&self, layer: usize) -> &Ten64 {
        &self.changes[layer]
    }
}
