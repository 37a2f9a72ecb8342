//! # Kernel Builder
//!
//! Kernels are built in two phases:
//!
//! 1. **Compile**: [`KernelRegistry::compile`] turns a [`Topology`] into a
//!    [`KernelSet`], building one kernel per layer and kind, each bound to
//!    that layer's fixed widths.
//! 2. **Execute**: the engines in [`crate::engine`] invoke those kernels
//!    against a [`NetworkState`](crate::state::NetworkState).
//!
//! ## Submodules
//!
//! - [`cpu`]: `rayon` kernels (default backend)
//! - [`wgpu`] *(opt-in)*: WGSL compute pipelines generated per layer
//!
//! ## Kernel kinds
//!
//! | kind             | layers  | `fan`             | invocations     |
//! |------------------|---------|-------------------|-----------------|
//! | `Forward`        | 1..=L   | `sizes[ℓ-1]`      | `sizes[ℓ]`      |
//! | `BackwardOutput` | L       | 0                 | `sizes[L]`      |
//! | `BackwardHidden` | 0..L    | `sizes[ℓ+1]`      | `sizes[ℓ]`      |
//! | `Update`         | 1..=L   | `sizes[ℓ-1]`      | `sizes[ℓ]·fan`  |
//!
//! Build failures are fatal: there is no fallback from one backend to another.

pub mod cpu;

#[cfg(feature = "wgpu")]
pub mod wgpu;

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::Backend;
use crate::error::{NetworkError, Result};
use crate::topology::Topology;

/// What a kernel computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KernelKind {
    Forward,
    BackwardOutput,
    BackwardHidden,
    Update,
}

/// Identity of a kernel: the layer it serves and the widths baked into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KernelDescriptor {
    pub layer: usize,
    pub kind: KernelKind,
    /// Width of the layer the kernel writes (`sizes[layer]`).
    pub width: usize,
    /// The other bound dimension; see the module table.
    pub fan: usize,
}

impl KernelDescriptor {
    /// Forward kernel of layer `layer` (`1..=L`).
    pub fn forward(topology: &Topology, layer: usize) -> Self {
        Self {
            layer,
            kind: KernelKind::Forward,
            width: topology.width(layer),
            fan: topology.width(layer - 1),
        }
    }

    /// Backward kernel of layer `layer` (`0..=L`); output form for `L`, hidden form otherwise.
    pub fn backward(topology: &Topology, layer: usize) -> Self {
        if layer == topology.output_layer() {
            Self {
                layer,
                kind: KernelKind::BackwardOutput,
                width: topology.width(layer),
                fan: 0,
            }
        } else {
            Self {
                layer,
                kind: KernelKind::BackwardHidden,
                width: topology.width(layer),
                fan: topology.width(layer + 1),
            }
        }
    }

    /// Update kernel of layer `layer` (`1..=L`).
    pub fn update(topology: &Topology, layer: usize) -> Self {
        Self {
            layer,
            kind: KernelKind::Update,
            width: topology.width(layer),
            fan: topology.width(layer - 1),
        }
    }

    /// Every descriptor a topology needs, forward kernels first.
    pub fn all(topology: &Topology) -> Vec<Self> {
        let last = topology.output_layer();
        (1..=last)
            .map(|l| Self::forward(topology, l))
            .chain((0..=last).rev().map(|l| Self::backward(topology, l)))
            .chain((1..=last).map(|l| Self::update(topology, l)))
            .collect()
    }

    /// Number of independent element computations per invocation.
    pub fn invocations(&self) -> usize {
        match self.kind {
            KernelKind::Update => self.width.saturating_mul(self.fan),
            _ => self.width,
        }
    }

    /// Human-readable name, used as a GPU label.
    pub fn label(&self) -> String {
        let kind = match self.kind {
            KernelKind::Forward => "forward",
            KernelKind::BackwardOutput => "backward_output",
            KernelKind::BackwardHidden => "backward_hidden",
            KernelKind::Update => "update",
        };
        format!("{kind}_l{}_{}x{}", self.layer, self.width, self.fan)
    }
}

#[derive(Debug)]
enum Executor {
    Cpu,
    #[cfg(feature = "wgpu")]
    Wgpu(wgpu::GpuKernel),
}

/// A built kernel, ready to be executed.
///
/// Slice arguments must have the lengths implied by the descriptor; the
/// engines guarantee this because they only hand over tensors of the
/// topology the kernel was compiled for.
#[derive(Debug)]
pub struct Kernel {
    descriptor: KernelDescriptor,
    executor: Executor,
}

impl Kernel {
    /// Builds the kernel for `descriptor` on `backend`.
    ///
    /// # Errors
    /// `KernelCompilation` if the dimensions overflow or the backend cannot
    /// produce the kernel.
    pub fn build(descriptor: KernelDescriptor, backend: Backend) -> Result<Self> {
        if descriptor.width.checked_mul(descriptor.fan.max(1)).is_none() {
            return Err(NetworkError::KernelCompilation(format!(
                "{}: dimension overflow",
                descriptor.label()
            )));
        }

        if !backend.is_compiled_in() {
            return Err(NetworkError::KernelCompilation(format!(
                "the {backend} backend is not compiled in; enable the `{backend}` feature"
            )));
        }

        let executor = match backend {
            Backend::Cpu => Executor::Cpu,
            #[cfg(feature = "wgpu")]
            Backend::Wgpu => Executor::Wgpu(wgpu::GpuKernel::compile(&descriptor)?),
            #[cfg(not(feature = "wgpu"))]
            Backend::Wgpu => unreachable!("rejected by is_compiled_in"),
        };

        Ok(Self {
            descriptor,
            executor,
        })
    }

    pub fn descriptor(&self) -> &KernelDescriptor {
        &self.descriptor
    }

    pub fn backend(&self) -> Backend {
        match self.executor {
            Executor::Cpu => Backend::Cpu,
            #[cfg(feature = "wgpu")]
            Executor::Wgpu(_) => Backend::Wgpu,
        }
    }

    /// `output = sigmoid(biases + weights · input)`.
    pub fn forward(&self, weights: &[f64], biases: &[f64], input: &[f64], output: &mut [f64]) -> Result<()> {
        let d = &self.descriptor;
        debug_assert_eq!(d.kind, KernelKind::Forward);
        debug_assert_eq!(input.len(), d.fan);
        debug_assert_eq!(output.len(), d.width);

        match &self.executor {
            Executor::Cpu => {
                cpu::forward(d.fan, weights, biases, input, output);
                Ok(())
            }
            #[cfg(feature = "wgpu")]
            Executor::Wgpu(k) => k.forward(weights, biases, input, output),
        }
    }

    /// Output-layer error and delta against `targets`.
    pub fn backward_output(
        &self,
        outputs: &[f64],
        targets: &[f64],
        errors: &mut [f64],
        deltas: &mut [f64],
    ) -> Result<()> {
        let d = &self.descriptor;
        debug_assert_eq!(d.kind, KernelKind::BackwardOutput);
        debug_assert_eq!(targets.len(), d.width);

        match &self.executor {
            Executor::Cpu => {
                cpu::backward_output(outputs, targets, errors, deltas);
                Ok(())
            }
            #[cfg(feature = "wgpu")]
            Executor::Wgpu(k) => k.backward_output(outputs, targets, errors, deltas),
        }
    }

    /// Hidden-layer error and delta from the next layer's deltas and weights.
    pub fn backward_hidden(
        &self,
        next_weights: &[f64],
        outputs: &[f64],
        next_deltas: &[f64],
        errors: &mut [f64],
        deltas: &mut [f64],
    ) -> Result<()> {
        let d = &self.descriptor;
        debug_assert_eq!(d.kind, KernelKind::BackwardHidden);
        debug_assert_eq!(next_deltas.len(), d.fan);
        debug_assert_eq!(next_weights.len(), d.fan * d.width);

        match &self.executor {
            Executor::Cpu => {
                cpu::backward_hidden(d.width, next_weights, outputs, next_deltas, errors, deltas);
                Ok(())
            }
            #[cfg(feature = "wgpu")]
            Executor::Wgpu(k) => k.backward_hidden(next_weights, outputs, next_deltas, errors, deltas),
        }
    }

    /// Momentum gradient step on one layer's weights, biases and changes.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &self,
        prev_outputs: &[f64],
        deltas: &[f64],
        weights: &mut [f64],
        biases: &mut [f64],
        changes: &mut [f64],
        learning_rate: f64,
        momentum: f64,
    ) -> Result<()> {
        let d = &self.descriptor;
        debug_assert_eq!(d.kind, KernelKind::Update);
        debug_assert_eq!(prev_outputs.len(), d.fan);
        debug_assert_eq!(weights.len(), d.width * d.fan);

        match &self.executor {
            Executor::Cpu => {
                cpu::update(d.fan, prev_outputs, deltas, weights, biases, changes, learning_rate, momentum);
                Ok(())
            }
            #[cfg(feature = "wgpu")]
            Executor::Wgpu(k) => {
                k.update(prev_outputs, deltas, weights, biases, changes, learning_rate, momentum)
            }
        }
    }
}

/// The full set of kernels for one topology on one backend.
///
/// Cloning is cheap: kernels are shared with the registry that built them.
#[derive(Debug, Clone)]
pub struct KernelSet {
    topology: Topology,
    backend: Backend,
    forward: Vec<Arc<Kernel>>,
    backward: Vec<Arc<Kernel>>,
    update: Vec<Arc<Kernel>>,
}

impl KernelSet {
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Forward kernel of layer `layer` (`1..=L`).
    pub fn forward(&self, layer: usize) -> &Kernel {
        &self.forward[layer - 1]
    }

    /// Backward kernel of layer `layer` (`0..=L`).
    pub fn backward(&self, layer: usize) -> &Kernel {
        &self.backward[layer]
    }

    /// Update kernel of layer `layer` (`1..=L`).
    pub fn update(&self, layer: usize) -> &Kernel {
        &self.update[layer - 1]
    }
}

/// Cache of compiled kernels keyed by [`KernelDescriptor`].
///
/// The cache is valid for exactly one (topology, backend) pair. Compiling for
/// anything else drops every cached kernel first.
#[derive(Debug, Default)]
pub struct KernelRegistry {
    key: Option<(Topology, Backend)>,
    kernels: HashMap<KernelDescriptor, Arc<Kernel>>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the kernels for `topology` on `backend`, building what is missing.
    ///
    /// # Errors
    /// `KernelCompilation` if any kernel fails to build. The registry is left
    /// empty in that case.
    pub fn compile(&mut self, topology: &Topology, backend: Backend) -> Result<KernelSet> {
        let current = self
            .key
            .as_ref()
            .is_some_and(|(t, b)| t == topology && *b == backend);

        if current {
            log::debug!("reusing {} cached kernels for {:?}", self.kernels.len(), topology.sizes());
        } else {
            self.invalidate();
            log::debug!("compiling kernels for {:?} on {backend}", topology.sizes());
        }

        match self.build_set(topology, backend) {
            Ok(set) => {
                self.key = Some((topology.clone(), backend));
                Ok(set)
            }
            Err(e) => {
                self.invalidate();
                Err(e)
            }
        }
    }

    fn build_set(&mut self, topology: &Topology, backend: Backend) -> Result<KernelSet> {
        let last = topology.output_layer();

        let mut forward = Vec::with_capacity(last);
        let mut update = Vec::with_capacity(last);
        for layer in 1..=last {
            forward.push(self.get_or_build(KernelDescriptor::forward(topology, layer), backend)?);
            update.push(self.get_or_build(KernelDescriptor::update(topology, layer), backend)?);
        }

        let mut backward = Vec::with_capacity(last + 1);
        for layer in 0..=last {
            backward.push(self.get_or_build(KernelDescriptor::backward(topology, layer), backend)?);
        }

        Ok(KernelSet {
            topology: topology.clone(),
            backend,
            forward,
            backward,
            update,
        })
    }

    fn get_or_build(&mut self, descriptor: KernelDescriptor, backend: Backend) -> Result<Arc<Kernel>> {
        if let Some(kernel) = self.get(&descriptor) {
            return Ok(Arc::clone(kernel));
        }
        let kernel = Arc::new(Kernel::build(descriptor, backend)?);
        self.kernels.insert(descriptor, Arc::clone(&kernel));
        Ok(kernel)
    }

    /// Drops every cached kernel.
    pub fn invalidate(&mut self) {
        self.key = None;
        self.kernels.clear();
    }

    /// The cached kernel for `descriptor`, if one has been built.
    pub fn get(&self, descriptor: &KernelDescriptor) -> Option<&Arc<Kernel>> {
        self.kernels.get(descriptor)
    }

    /// Number of cached kernels.
    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology() -> Topology {
        Topology::new(vec![2, 3, 1]).unwrap()
    }

    #[test]
    fn descriptors_bind_layer_widths() {
        let t = topology();
        assert_eq!(
            KernelDescriptor::forward(&t, 1),
            KernelDescriptor { layer: 1, kind: KernelKind::Forward, width: 3, fan: 2 }
        );
        assert_eq!(KernelDescriptor::backward(&t, 2).kind, KernelKind::BackwardOutput);
        assert_eq!(
            KernelDescriptor::backward(&t, 0),
            KernelDescriptor { layer: 0, kind: KernelKind::BackwardHidden, width: 2, fan: 3 }
        );
        assert_eq!(KernelDescriptor::update(&t, 2).invocations(), 3);
    }

    #[test]
    fn all_lists_every_kernel_once() {
        let all = KernelDescriptor::all(&topology());
        // 2 forward + 3 backward + 2 update
        assert_eq!(all.len(), 7);
        let unique: std::collections::HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), 7);
    }

    #[test]
    fn registry_reuses_kernels_for_same_topology() {
        let mut registry = KernelRegistry::new();
        let first = registry.compile(&topology(), Backend::Cpu).unwrap();
        assert_eq!(registry.len(), 7);

        let second = registry.compile(&topology(), Backend::Cpu).unwrap();
        assert!(Arc::ptr_eq(&first.forward[0], &second.forward[0]));
        assert_eq!(registry.len(), 7);

        let cached = registry.get(&KernelDescriptor::forward(&topology(), 1)).unwrap();
        assert!(Arc::ptr_eq(cached, &first.forward[0]));
    }

    #[test]
    fn registry_invalidates_on_topology_change() {
        let mut registry = KernelRegistry::new();
        let first = registry.compile(&topology(), Backend::Cpu).unwrap();

        let other = Topology::new(vec![2, 4, 1]).unwrap();
        let second = registry.compile(&other, Backend::Cpu).unwrap();

        assert_eq!(second.forward(1).descriptor().width, 4);
        assert!(!Arc::ptr_eq(&first.forward[1], &second.forward[1]));
        assert!(registry.get(&KernelDescriptor::forward(&topology(), 1)).is_none());
        assert_eq!(registry.len(), 7);
    }

    #[cfg(not(feature = "wgpu"))]
    #[test]
    fn wgpu_without_feature_fails_to_compile() {
        let mut registry = KernelRegistry::new();
        registry.compile(&topology(), Backend::Cpu).unwrap();

        let err = registry.compile(&topology(), Backend::Wgpu).unwrap_err();
        assert!(matches!(&err, NetworkError::KernelCompilation(msg) if msg.contains("`wgpu` feature")));
        assert!(registry.is_empty());
    }

    #[test]
    fn kernel_set_indexes_by_layer() {
        let mut registry = KernelRegistry::new();
        let set = registry.compile(&topology(), Backend::Cpu).unwrap();
        assert_eq!(set.forward(2).descriptor().layer, 2);
        assert_eq!(set.backward(0).descriptor().layer, 0);
        assert_eq!(set.update(1).descriptor().fan, 2);
        assert_eq!(set.backend(), Backend::Cpu);
        assert_eq!(set.forward(1).backend(), Backend::Cpu);
    }
}
