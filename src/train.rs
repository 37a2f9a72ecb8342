//! Iterate-until-convergence training over a fixed example set.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::TrainingOptions;
use crate::error::{NetworkError, Result};
use crate::network::NeuralNetwork;

/// One input vector and the output it should produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub input: Vec<f64>,
    pub target: Vec<f64>,
}

impl TrainingExample {
    pub fn new(input: impl Into<Vec<f64>>, target: impl Into<Vec<f64>>) -> Self {
        Self {
            input: input.into(),
            target: target.into(),
        }
    }
}

/// Progress of a training run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingStatus {
    /// Mean of the per-example MSE over the last completed iteration;
    /// `f64::INFINITY` until one has completed.
    pub error: f64,
    /// Completed passes over the example set.
    pub iterations: usize,
}

/// Trains `net` on `data` until the mean error drops below
/// [`TrainingOptions::error_thresh`], [`TrainingOptions::iterations`] passes
/// have run, or the timeout elapses.
///
/// A network without a topology is sized from the first example. One that
/// has a topology keeps its parameters and must already match the example
/// widths; if its kernels are missing (after a failed build) they are
/// rebuilt with the parameters preserved.
/// `callback` receives the status every `callback_period` iterations.
///
/// # Errors
/// `InvalidTopology` for an empty example set; the first error any training
/// step returns, `DimensionMismatch` included, aborts the run.
pub fn train(
    net: &mut NeuralNetwork,
    data: &[TrainingExample],
    opts: &TrainingOptions,
    mut callback: Option<&mut dyn FnMut(&TrainingStatus)>,
) -> Result<TrainingStatus> {
    let first = data
        .first()
        .ok_or_else(|| NetworkError::InvalidTopology("training set is empty".into()))?;
    match net.topology().cloned() {
        None => net.initialize(first.input.len(), first.target.len(), false)?,
        Some(topology) if !net.is_initialized() => net.initialize_with_topology(topology, true)?,
        Some(_) => {}
    }

    let deadline = opts.timeout.map(|ms| Instant::now() + Duration::from_millis(ms));
    let mut status = TrainingStatus {
        error: f64::INFINITY,
        iterations: 0,
    };

    while status.iterations < opts.iterations && status.error > opts.error_thresh {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            log::info!("training timed out after {} iterations", status.iterations);
            break;
        }

        let mut sum = 0.0;
        for example in data {
            sum += net.train_step(&example.input, &example.target, opts.learning_rate, opts.momentum)?;
        }
        status.error = sum / data.len() as f64;
        status.iterations += 1;

        if opts.log && opts.log_period > 0 && status.iterations % opts.log_period == 0 {
            log::info!("iterations: {}, training error: {}", status.iterations, status.error);
        }
        if opts.callback_period > 0 && status.iterations % opts.callback_period == 0 {
            if let Some(cb) = callback.as_deref_mut() {
                cb(&status);
            }
        }
    }

    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::config::NetworkOptions;

    fn net() -> NeuralNetwork {
        NeuralNetwork::new(NetworkOptions::default().with_seed(5).with_backend(Backend::Cpu))
    }

    #[test]
    fn empty_set_is_rejected() {
        let err = train(&mut net(), &[], &TrainingOptions::default(), None).unwrap_err();
        assert!(matches!(err, NetworkError::InvalidTopology(_)));
    }

    #[test]
    fn stops_at_iteration_limit() {
        let data = [TrainingExample::new([0.0, 1.0], [1.0])];
        let opts = TrainingOptions {
            iterations: 7,
            error_thresh: 0.0,
            ..Default::default()
        };
        let status = train(&mut net(), &data, &opts, None).unwrap();
        assert_eq!(status.iterations, 7);
    }

    #[test]
    fn callback_fires_every_period() {
        let data = [TrainingExample::new([0.0, 1.0], [1.0])];
        let opts = TrainingOptions {
            iterations: 9,
            error_thresh: 0.0,
            callback_period: 3,
            ..Default::default()
        };
        let mut seen = Vec::new();
        let mut record = |s: &TrainingStatus| seen.push(s.iterations);
        train(&mut net(), &data, &opts, Some(&mut record)).unwrap();
        assert_eq!(seen, vec![3, 6, 9]);
    }

    #[test]
    fn mismatched_example_aborts() {
        let data = [
            TrainingExample::new([0.0, 1.0], [1.0]),
            TrainingExample::new([0.0, 1.0, 1.0], [1.0]),
        ];
        let err = train(&mut net(), &data, &TrainingOptions::default(), None).unwrap_err();
        assert!(matches!(err, NetworkError::DimensionMismatch { what: "input", .. }));
    }

    #[cfg(not(feature = "wgpu"))]
    #[test]
    fn resumes_with_parameters_after_failed_kernel_build() {
        let data = [TrainingExample::new([0.0, 1.0], [1.0])];
        let mut net = net();
        net.initialize(2, 1, false).unwrap();
        net.train_step(&[0.0, 1.0], &[1.0], 0.3, 0.1).unwrap();
        let trained = net.snapshot().unwrap();

        net.set_backend(Backend::Wgpu);
        assert!(matches!(net.initialize(2, 1, true), Err(NetworkError::KernelCompilation(_))));
        assert!(net.topology().is_some());
        assert!(!net.is_initialized());

        net.set_backend(Backend::Cpu);
        let opts = TrainingOptions {
            iterations: 1,
            learning_rate: 0.0,
            momentum: 0.0,
            ..Default::default()
        };
        let status = train(&mut net, &data, &opts, None).unwrap();

        assert_eq!(status.iterations, 1);
        assert!(net.is_initialized());
        assert_eq!(net.snapshot().unwrap(), trained);
    }

    #[test]
    fn zero_timeout_runs_nothing() {
        let data = [TrainingExample::new([0.0, 1.0], [1.0])];
        let opts = TrainingOptions {
            timeout: Some(0),
            ..Default::default()
        };
        let mut net = net();
        let status = train(&mut net, &data, &opts, None).unwrap();
        assert_eq!(status.iterations, 0);
        assert_eq!(status.error, f64::INFINITY);
        assert!(net.is_initialized());
    }

    #[test]
    fn loose_threshold_still_measures_once() {
        let data = [TrainingExample::new([0.0, 1.0], [1.0])];
        let opts = TrainingOptions {
            error_thresh: 1.0,
            ..Default::default()
        };
        let status = train(&mut net(), &data, &opts, None).unwrap();
        assert_eq!(status.iterations, 1);
        assert!(status.error < 1.0);
    }
}
