//! The network facade.
//!
//! [`NeuralNetwork`] owns a topology, its [`NetworkState`] and the
//! [`KernelSet`] compiled for it, and exposes the operations a caller needs:
//! initialize, run, train one example, snapshot.

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::backend::{Backend, get_backend};
use crate::config::NetworkOptions;
use crate::engine;
use crate::error::{NetworkError, Result};
use crate::kernels::{KernelRegistry, KernelSet};
use crate::modelio::ParameterSnapshot;
use crate::state::NetworkState;
use crate::tensors::{Ten64, Tensor};
use crate::topology::Topology;

/// A fully connected sigmoid network trained by momentum gradient descent.
#[derive(Debug)]
pub struct NeuralNetwork {
    options: NetworkOptions,
    rng: StdRng,
    registry: KernelRegistry,
    topology: Option<Topology>,
    state: Option<NetworkState>,
    kernels: Option<KernelSet>,
}

impl NeuralNetwork {
    /// Creates an uninitialized network.
    pub fn new(options: NetworkOptions) -> Self {
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            options,
            rng,
            registry: KernelRegistry::new(),
            topology: None,
            state: None,
            kernels: None,
        }
    }

    /// Restores a network from saved parameters, ready to run or keep training.
    ///
    /// # Errors
    /// `InvalidTopology` or `InvalidModel` if the snapshot is inconsistent;
    /// `KernelCompilation` if the kernels cannot be built.
    pub fn from_snapshot(snapshot: ParameterSnapshot, options: NetworkOptions) -> Result<Self> {
        let topology = snapshot.validate()?;

        let mut weights: Vec<Ten64> = Vec::with_capacity(topology.sizes().len());
        let mut biases: Vec<Ten64> = Vec::with_capacity(topology.sizes().len());
        weights.push(Tensor::zeros(vec![0, 0]));
        biases.push(Tensor::zeros(vec![0]));
        weights.extend(snapshot.weights);
        biases.extend(snapshot.biases);

        let state = NetworkState::with_parameters(&topology, weights, biases)?;

        let mut net = Self::new(options);
        let kernels = net.registry.compile(&topology, net.backend())?;
        net.topology = Some(topology);
        net.state = Some(state);
        net.kernels = Some(kernels);
        Ok(net)
    }

    /// Sizes the network for `input_size` inputs and `output_size` outputs.
    ///
    /// Hidden widths come from [`NetworkOptions::hidden_sizes`]. With
    /// `preserve_parameters` the current weights and biases are kept and must
    /// fit the resolved topology; otherwise they are drawn afresh.
    ///
    /// # Errors
    /// - `InvalidTopology` if a width is zero
    /// - `NotInitialized` if parameters are preserved but none exist
    /// - `ShapeMismatch` if preserved parameters do not fit
    /// - `KernelCompilation` if the kernels cannot be built
    ///
    /// A failed kernel build leaves the network without kernels until the
    /// next successful call. Every other error leaves it exactly as it was.
    pub fn initialize(&mut self, input_size: usize, output_size: usize, preserve_parameters: bool) -> Result<()> {
        let topology = Topology::resolve(input_size, output_size, self.options.hidden_sizes.as_deref())?;
        self.initialize_with_topology(topology, preserve_parameters)
    }

    /// Like [`initialize`](Self::initialize) with an explicit topology.
    ///
    /// # Errors
    /// As for [`initialize`](Self::initialize), minus topology resolution.
    pub fn initialize_with_topology(&mut self, topology: Topology, preserve_parameters: bool) -> Result<()> {
        if preserve_parameters {
            self.state
                .as_ref()
                .ok_or(NetworkError::NotInitialized)?
                .check_parameters(&topology)?;
        }

        let backend = self.backend();
        let kernels = match self.registry.compile(&topology, backend) {
            Ok(kernels) => kernels,
            Err(e) => {
                self.kernels = None;
                return Err(e);
            }
        };

        match self.state.as_mut() {
            Some(state) => state.initialize(&topology, preserve_parameters, &mut self.rng)?,
            None => self.state = Some(NetworkState::allocate(&topology, &mut self.rng)),
        }
        log::debug!(
            "initialized {:?} on {backend} ({} parameters)",
            topology.sizes(),
            if preserve_parameters { "preserved" } else { "fresh" }
        );

        self.topology = Some(topology);
        self.kernels = Some(kernels);
        Ok(())
    }

    /// Computes the network's output for `input`.
    ///
    /// # Errors
    /// `NotInitialized` before [`initialize`](Self::initialize);
    /// `DimensionMismatch` if `input` has the wrong length.
    pub fn run(&mut self, input: &[f64]) -> Result<Vec<f64>> {
        let (kernels, state) = self.parts()?;
        engine::forward(kernels, state, input)?;
        Ok(state.outputs(state.layers() - 1).data.clone())
    }

    /// One forward, backward and update pass over a single example.
    ///
    /// Returns the mean squared error of the output layer for this example,
    /// measured before the update.
    ///
    /// # Errors
    /// `NotInitialized` before [`initialize`](Self::initialize);
    /// `DimensionMismatch` if either vector has the wrong length, in which
    /// case no tensor is modified.
    pub fn train_step(&mut self, input: &[f64], target: &[f64], learning_rate: f64, momentum: f64) -> Result<f64> {
        let (kernels, state) = self.parts()?;
        engine::train_step(kernels, state, input, target, learning_rate, momentum)
    }

    /// Copies out the current weights and biases.
    ///
    /// # Errors
    /// `NotInitialized` before [`initialize`](Self::initialize).
    pub fn snapshot(&self) -> Result<ParameterSnapshot> {
        let (topology, state) = self
            .topology
            .as_ref()
            .zip(self.state.as_ref())
            .ok_or(NetworkError::NotInitialized)?;

        let layers = 1..state.layers();
        Ok(ParameterSnapshot {
            sizes: topology.sizes().to_vec(),
            weights: layers.clone().map(|l| state.weights(l).clone()).collect(),
            biases: layers.map(|l| state.biases(l).clone()).collect(),
        })
    }

    fn parts(&mut self) -> Result<(&KernelSet, &mut NetworkState)> {
        match (self.kernels.as_ref(), self.state.as_mut()) {
            (Some(kernels), Some(state)) => Ok((kernels, state)),
            _ => Err(NetworkError::NotInitialized),
        }
    }

    /// The backend kernels are compiled for.
    pub fn backend(&self) -> Backend {
        self.options.backend.unwrap_or_else(get_backend)
    }

    /// Pins the backend for this network. Takes effect on the next
    /// [`initialize`](Self::initialize).
    pub fn set_backend(&mut self, backend: Backend) {
        self.options.backend = Some(backend);
    }

    pub fn options(&self) -> &NetworkOptions {
        &self.options
    }

    pub fn topology(&self) -> Option<&Topology> {
        self.topology.as_ref()
    }

    pub fn state(&self) -> Option<&NetworkState> {
        self.state.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.kernels.is_some()
    }
}
