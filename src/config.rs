//! Configuration structures for networks and training.
//!
//! Both structures deserialize from JSON with every field optional; missing
//! fields take the defaults documented on each field.
//!
//! # Example
//!
//! ```json
//! {
//!   "iterations": 5000,
//!   "error_thresh": 0.01,
//!   "learning_rate": 0.5,
//!   "log": true
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::error::Result;

/// How a network is shaped and where its kernels run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkOptions {
    /// Hidden layer widths. `None` derives one layer of `max(3, inputs / 2)`.
    pub hidden_sizes: Option<Vec<usize>>,
    /// Kernel backend. `None` uses the process default at compile time.
    pub backend: Option<Backend>,
    /// Seed for parameter initialization. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl NetworkOptions {
    pub fn with_hidden_sizes(mut self, sizes: impl Into<Vec<usize>>) -> Self {
        self.hidden_sizes = Some(sizes.into());
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Parameters of the iterate-until-convergence training loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingOptions {
    /// Maximum passes over the training set (default 20000).
    pub iterations: usize,
    /// Training stops once the mean error drops below this (default 0.005).
    pub error_thresh: f64,
    /// Step size of the gradient update (default 0.3).
    pub learning_rate: f64,
    /// Fraction of the previous change carried into the next (default 0.1).
    pub momentum: f64,
    /// Log progress through the `log` facade (default false).
    pub log: bool,
    /// Iterations between progress logs (default 10).
    pub log_period: usize,
    /// Iterations between callback invocations (default 10).
    pub callback_period: usize,
    /// Wall-clock budget in milliseconds (default unlimited).
    pub timeout: Option<u64>,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            iterations: 20000,
            error_thresh: 0.005,
            learning_rate: 0.3,
            momentum: 0.1,
            log: false,
            log_period: 10,
            callback_period: 10,
            timeout: None,
        }
    }
}

impl TrainingOptions {
    /// Parses options from a JSON string.
    ///
    /// # Errors
    /// `Config` if the JSON is malformed or a field has the wrong type.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses options from a JSON file.
    ///
    /// # Errors
    /// `Io` if the file cannot be read, `Config` if it cannot be parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }
}
