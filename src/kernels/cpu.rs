//! Parallel CPU kernels.
//!
//! Each function here is the body of one kernel kind. Work is split with
//! [`rayon`] so that one task computes one output element (one weight row for
//! the update kernel); no task reads anything another task of the same
//! invocation writes.
//!
//! ## Features
//!
//! - Parallel execution using [`rayon`](https://docs.rs/rayon)
//! - Optional AVX2/FMA dot products (enabled via the `simd` feature flag)
//!
//! ## Safety
//!
//! - SIMD paths use `unsafe` loads and assume the target was compiled with
//!   `avx2` and `fma` enabled

use rayon::prelude::*;

/// Logistic activation `1 / (1 + e^-x)`.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Derivative of the sigmoid, expressed through its output `y`.
#[inline]
fn sigmoid_slope(y: f64) -> f64 {
    y * (1.0 - y)
}

#[cfg(all(
    feature = "simd",
    target_arch = "x86_64",
    target_feature = "avx2",
    target_feature = "fma"
))]
#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    use std::arch::x86_64::*;

    let len = a.len().min(b.len());
    let mut idx = 0;
    let mut lanes = [0.0f64; 4];

    unsafe {
        let mut acc = _mm256_setzero_pd();
        while idx + 4 <= len {
            let x = _mm256_loadu_pd(a.as_ptr().add(idx));
            let y = _mm256_loadu_pd(b.as_ptr().add(idx));
            acc = _mm256_fmadd_pd(x, y, acc);
            idx += 4;
        }
        _mm256_storeu_pd(lanes.as_mut_ptr(), acc);
    }

    let mut sum: f64 = lanes.iter().sum();
    for i in idx..len {
        sum += a[i] * b[i];
    }
    sum
}

#[cfg(not(all(
    feature = "simd",
    target_arch = "x86_64",
    target_feature = "avx2",
    target_feature = "fma"
)))]
#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// `output[n] = sigmoid(biases[n] + weights[n] · input)`.
///
/// `weights` is `output.len()` rows of `fan` values each.
pub fn forward(fan: usize, weights: &[f64], biases: &[f64], input: &[f64], output: &mut [f64]) {
    output
        .par_iter_mut()
        .zip(weights.par_chunks(fan))
        .zip(biases.par_iter())
        .for_each(|((out, row), &bias)| {
            *out = sigmoid(bias + dot(row, input));
        });
}

/// Output layer: `error = target - output`, `delta = error * output * (1 - output)`.
pub fn backward_output(outputs: &[f64], targets: &[f64], errors: &mut [f64], deltas: &mut [f64]) {
    errors
        .par_iter_mut()
        .zip(deltas.par_iter_mut())
        .zip(outputs.par_iter().zip(targets.par_iter()))
        .for_each(|((error, delta), (&out, &target))| {
            *error = target - out;
            *delta = *error * sigmoid_slope(out);
        });
}

/// Hidden layer: `error[n] = Σ_k next_deltas[k] * next_weights[k][n]`.
///
/// `next_weights` is `next_deltas.len()` rows of `width` values each, so the
/// weights feeding node `n` form column `n`.
pub fn backward_hidden(
    width: usize,
    next_weights: &[f64],
    outputs: &[f64],
    next_deltas: &[f64],
    errors: &mut [f64],
    deltas: &mut [f64],
) {
    errors
        .par_iter_mut()
        .zip(deltas.par_iter_mut())
        .zip(outputs.par_iter())
        .enumerate()
        .for_each(|(node, ((error, delta), &out))| {
            *error = next_deltas
                .iter()
                .enumerate()
                .map(|(k, &d)| d * next_weights[k * width + node])
                .sum();
            *delta = *error * sigmoid_slope(out);
        });
}

/// Momentum gradient step for one layer.
///
/// `change = learning_rate * delta[n] * prev[k] + momentum * change`,
/// `weight += change`, `bias[n] += learning_rate * delta[n]`.
#[allow(clippy::too_many_arguments)]
pub fn update(
    fan: usize,
    prev_outputs: &[f64],
    deltas: &[f64],
    weights: &mut [f64],
    biases: &mut [f64],
    changes: &mut [f64],
    learning_rate: f64,
    momentum: f64,
) {
    weights
        .par_chunks_mut(fan)
        .zip(changes.par_chunks_mut(fan))
        .zip(biases.par_iter_mut().zip(deltas.par_iter()))
        .for_each(|((w_row, c_row), (bias, &delta))| {
            for ((w, c), &prev) in w_row.iter_mut().zip(c_row.iter_mut()).zip(prev_outputs) {
                *c = learning_rate * delta * prev + momentum * *c;
                *w += *c;
            }
            *bias += learning_rate * delta;
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn forward_matches_scalar_formula() {
        // 2 outputs, 3 inputs
        let weights = [0.1, -0.2, 0.3, 0.5, 0.5, -0.5];
        let biases = [0.05, -0.1];
        let input = [1.0, 2.0, 3.0];
        let mut out = [0.0; 2];

        forward(3, &weights, &biases, &input, &mut out);

        assert_relative_eq!(out[0], sigmoid(0.05 + 0.1 - 0.4 + 0.9));
        assert_relative_eq!(out[1], sigmoid(-0.1 + 0.5 + 1.0 - 1.5));
    }

    #[test]
    fn dot_handles_tails_longer_than_a_lane() {
        let a: Vec<f64> = (0..11).map(f64::from).collect();
        let b = vec![2.0; 11];
        assert_relative_eq!(dot(&a, &b), 110.0);
    }

    #[test]
    fn backward_output_delta() {
        let outputs = [0.25, 0.9];
        let targets = [1.0, 0.0];
        let mut errors = [0.0; 2];
        let mut deltas = [0.0; 2];

        backward_output(&outputs, &targets, &mut errors, &mut deltas);

        assert_eq!(errors, [0.75, -0.9]);
        assert_relative_eq!(deltas[0], 0.75 * 0.25 * 0.75);
        assert_relative_eq!(deltas[1], -0.9 * 0.9 * (1.0 - 0.9));
    }

    #[test]
    fn backward_hidden_reads_weight_columns() {
        // next layer: 2 nodes, this layer: 3 nodes
        let next_weights = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let next_deltas = [0.5, -1.0];
        let outputs = [0.5, 0.5, 0.5];
        let mut errors = [0.0; 3];
        let mut deltas = [0.0; 3];

        backward_hidden(3, &next_weights, &outputs, &next_deltas, &mut errors, &mut deltas);

        assert_eq!(errors, [0.5 - 4.0, 1.0 - 5.0, 1.5 - 6.0]);
        for (d, e) in deltas.iter().zip(errors) {
            assert_relative_eq!(*d, e * 0.25);
        }
    }

    #[test]
    fn update_applies_momentum() {
        let prev = [1.0, 0.5];
        let deltas = [0.2];
        let mut weights = [0.0, 0.0];
        let mut biases = [0.0];
        let mut changes = [0.1, -0.1];

        update(2, &prev, &deltas, &mut weights, &mut biases, &mut changes, 0.5, 0.9);

        assert_relative_eq!(changes[0], 0.5 * 0.2 * 1.0 + 0.9 * 0.1);
        assert_relative_eq!(changes[1], 0.5 * 0.2 * 0.5 - 0.9 * 0.1);
        assert_eq!(weights, changes);
        assert_relative_eq!(biases[0], 0.1);
    }
}
