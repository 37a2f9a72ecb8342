//! Forward, backward and update engines.
//!
//! Each engine walks the layers of a [`KernelSet`] and invokes one kernel per
//! layer against a mutably borrowed [`NetworkState`]. Ordering is the whole
//! job here:
//!
//! - **forward** runs layers `1..=L` in increasing order; layer ℓ reads the
//!   outputs layer ℓ-1 has just finalized.
//! - **backward** runs layers `L..=0` in decreasing order; layer ℓ reads the
//!   deltas layer ℓ+1 has just finalized.
//! - **update** runs layers `1..=L`. Layers are independent at this point
//!   since outputs and deltas are final; they are visited in increasing order.
//!
//! Every kernel call returns before the next one starts, so a kernel
//! invocation is atomic with respect to the rest of the pipeline.
//!
//! Input and target lengths are checked before the first kernel runs, so a
//! rejected call leaves the state exactly as it was.

use crate::error::{NetworkError, Result};
use crate::kernels::KernelSet;
use crate::state::NetworkState;

fn check_input(kernels: &KernelSet, input: &[f64]) -> Result<()> {
    let expected = kernels.topology().input_size();
    if input.len() != expected {
        return Err(NetworkError::dimension("input", expected, input.len()));
    }
    Ok(())
}

fn check_target(kernels: &KernelSet, target: &[f64]) -> Result<()> {
    let expected = kernels.topology().output_size();
    if target.len() != expected {
        return Err(NetworkError::dimension("target", expected, target.len()));
    }
    Ok(())
}

/// Propagates `input` through every layer, filling `outputs[0..=L]`.
///
/// # Errors
/// `DimensionMismatch` if `input` does not match the input layer; any error
/// the backend raises while executing a kernel.
pub fn forward(kernels: &KernelSet, state: &mut NetworkState, input: &[f64]) -> Result<()> {
    check_input(kernels, input)?;
    debug_assert_eq!(state.layers(), kernels.topology().sizes().len());

    state.outputs[0].data.copy_from_slice(input);

    for layer in 1..=kernels.topology().output_layer() {
        let (done, rest) = state.outputs.split_at_mut(layer);
        kernels.forward(layer).forward(
            &state.weights[layer].data,
            &state.biases[layer].data,
            &done[layer - 1].data,
            &mut rest[0].data,
        )?;
    }
    Ok(())
}

/// Computes errors and deltas for every layer from the output back to the input.
///
/// Must follow a [`forward`] pass of the same example.
///
/// # Errors
/// `DimensionMismatch` if `target` does not match the output layer; any
/// error the backend raises while executing a kernel.
pub fn backward(kernels: &KernelSet, state: &mut NetworkState, target: &[f64]) -> Result<()> {
    check_target(kernels, target)?;
    let last = kernels.topology().output_layer();

    kernels.backward(last).backward_output(
        &state.outputs[last].data,
        target,
        &mut state.errors[last].data,
        &mut state.deltas[last].data,
    )?;

    for layer in (0..last).rev() {
        let (current, done) = state.deltas.split_at_mut(layer + 1);
        kernels.backward(layer).backward_hidden(
            &state.weights[layer + 1].data,
            &state.outputs[layer].data,
            &done[0].data,
            &mut state.errors[layer].data,
            &mut current[layer].data,
        )?;
    }
    Ok(())
}

/// Applies one momentum gradient step to every layer's weights and biases.
///
/// Must follow a [`backward`] pass of the same example.
///
/// # Errors
/// Any error the backend raises while executing a kernel.
pub fn update(kernels: &KernelSet, state: &mut NetworkState, learning_rate: f64, momentum: f64) -> Result<()> {
    for layer in 1..=kernels.topology().output_layer() {
        kernels.update(layer).update(
            &state.outputs[layer - 1].data,
            &state.deltas[layer].data,
            &mut state.weights[layer].data,
            &mut state.biases[layer].data,
            &mut state.changes[layer].data,
            learning_rate,
            momentum,
        )?;
    }
    Ok(())
}

/// Mean squared value of the output layer's errors.
pub fn output_mse(state: &NetworkState) -> f64 {
    let errors = &state.errors[state.layers() - 1].data;
    errors.iter().map(|e| e * e).sum::<f64>() / errors.len() as f64
}

/// One training step: forward, backward, update. Returns the output MSE.
///
/// Both vector lengths are validated before anything runs.
///
/// # Errors
/// `DimensionMismatch` if either vector has the wrong length; any error the
/// backend raises while executing a kernel.
pub fn train_step(
    kernels: &KernelSet,
    state: &mut NetworkState,
    input: &[f64],
    target: &[f64],
    learning_rate: f64,
    momentum: f64,
) -> Result<f64> {
    check_input(kernels, input)?;
    check_target(kernels, target)?;

    forward(kernels, state, input)?;
    backward(kernels, state, target)?;
    update(kernels, state, learning_rate, momentum)?;

    Ok(output_mse(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::kernels::KernelRegistry;
    use crate::kernels::cpu::sigmoid;
    use crate::tensors::Tensor;
    use crate::topology::Topology;
    use approx::assert_relative_eq;

    /// [2, 2, 1] network with hand-picked parameters.
    fn fixture() -> (KernelSet, NetworkState) {
        let topology = Topology::new(vec![2, 2, 1]).unwrap();
        let kernels = KernelRegistry::new().compile(&topology, Backend::Cpu).unwrap();
        let weights = vec![
            Tensor::zeros(vec![0, 0]),
            crate::tensor!([[0.1, 0.2], [-0.3, 0.4]]),
            crate::tensor!([[0.5, -0.6]]),
        ];
        let biases = vec![
            Tensor::zeros(vec![0]),
            crate::tensor!([0.01, -0.02]),
            crate::tensor!([0.03]),
        ];
        let state = NetworkState::with_parameters(&topology, weights, biases).unwrap();
        (kernels, state)
    }

    #[test]
    fn forward_layers_feed_each_other() {
        let (kernels, mut state) = fixture();
        forward(&kernels, &mut state, &[1.0, 0.5]).unwrap();

        let h0 = sigmoid(0.01 + 0.1 * 1.0 + 0.2 * 0.5);
        let h1 = sigmoid(-0.02 - 0.3 * 1.0 + 0.4 * 0.5);
        let o = sigmoid(0.03 + 0.5 * h0 - 0.6 * h1);

        assert_eq!(state.outputs(0).data, vec![1.0, 0.5]);
        assert_relative_eq!(state.outputs(1).data[0], h0);
        assert_relative_eq!(state.outputs(1).data[1], h1);
        assert_relative_eq!(state.outputs(2).data[0], o);
    }

    #[test]
    fn backward_chains_deltas_down_to_input() {
        let (kernels, mut state) = fixture();
        forward(&kernels, &mut state, &[1.0, 0.5]).unwrap();
        backward(&kernels, &mut state, &[1.0]).unwrap();

        let o = state.outputs(2).data[0];
        let d_out = (1.0 - o) * o * (1.0 - o);
        assert_relative_eq!(state.deltas(2).data[0], d_out);

        let h = &state.outputs(1).data;
        assert_relative_eq!(state.errors(1).data[0], d_out * 0.5);
        assert_relative_eq!(state.errors(1).data[1], d_out * -0.6);
        assert_relative_eq!(state.deltas(1).data[0], d_out * 0.5 * h[0] * (1.0 - h[0]));

        // layer 0 is computed from layer 1's deltas and weights
        let d1 = &state.deltas(1).data;
        assert_relative_eq!(state.errors(0).data[0], d1[0] * 0.1 + d1[1] * -0.3);
        assert_relative_eq!(state.errors(0).data[1], d1[0] * 0.2 + d1[1] * 0.4);
    }

    #[test]
    fn train_step_rejects_bad_lengths_before_running() {
        let (kernels, mut state) = fixture();
        let before = state.clone();

        let err = train_step(&kernels, &mut state, &[1.0, 0.0, 1.0], &[1.0], 0.3, 0.1).unwrap_err();
        assert!(matches!(
            err,
            NetworkError::DimensionMismatch { what: "input", expected: 2, actual: 3 }
        ));

        let err = train_step(&kernels, &mut state, &[1.0, 0.0], &[1.0, 0.0], 0.3, 0.1).unwrap_err();
        assert!(matches!(err, NetworkError::DimensionMismatch { what: "target", .. }));

        assert_eq!(state, before);
    }

    #[test]
    fn train_step_returns_output_mse() {
        let (kernels, mut state) = fixture();
        let mse = train_step(&kernels, &mut state, &[0.0, 1.0], &[1.0], 0.0, 0.0).unwrap();
        let e = state.errors(2).data[0];
        assert_relative_eq!(mse, e * e);
    }
}
