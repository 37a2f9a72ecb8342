//! Saving and loading trained parameters.
//!
//! # `.bpat` Format
//!
//! ```text
//! ┌────────────┬────────────┬─────────────────────┐
//! │ Header     │ Tensor N   │ Tensor N+1 …        │
//! ├────────────┼────────────┼─────────────────────┤
//! │ "bpat"[4]  │ u64: ndim  │ u64: ndim           │
//! │ u8: count  │ [u64; ndim] shape                │
//! │            │ [f64; prod(shape)] data          │
//! └────────────┴──────────────────────────────────┘
//! ```
//!
//! All integers and floats are little-endian.
//!
//! A parameter snapshot of an `L`-layer network is stored as `1 + 2L`
//! tensors: the topology as a 1-D tensor of widths, then `weights[1..=L]`,
//! then `biases[1..=L]`. That is everything needed to resume training with
//! preserved parameters or to run inference.
//!
//! # Limitations
//! - At most 255 tensors per file, so at most 127 weighted layers
//! - Transient state (outputs, deltas, errors) and momentum are not stored
//!
//! # Example
//!
//! ```rust,no_run
//! use briny_mlp::modelio::{load_snapshot, save_snapshot};
//! # fn demo(net: &briny_mlp::network::NeuralNetwork) -> briny_mlp::error::Result<()> {
//! save_snapshot("xor.bpat", &net.snapshot()?)?;
//! let restored = load_snapshot("xor.bpat")?;
//! # Ok(())
//! # }
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{NetworkError, Result};
use crate::tensors::{Ten64, Tensor};
use crate::topology::Topology;

const BPAT_MAGIC: &[u8; 4] = b"bpat";

/// Upper bound on elements pre-allocated for one tensor while reading.
const MAX_PREALLOC: usize = 1 << 20;

fn invalid(msg: impl Into<String>) -> NetworkError {
    NetworkError::InvalidModel(msg.into())
}

/// Trained parameters of a network, detached from any runtime state.
///
/// `weights` and `biases` hold layers `1..=L` (the input layer has none).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSnapshot {
    pub sizes: Vec<usize>,
    pub weights: Vec<Ten64>,
    pub biases: Vec<Ten64>,
}

impl ParameterSnapshot {
    /// Checks internal consistency and returns the snapshot's topology.
    ///
    /// # Errors
    /// `InvalidTopology` for bad widths, `InvalidModel` if a tensor count or
    /// shape disagrees with the widths.
    pub fn validate(&self) -> Result<Topology> {
        let topology = Topology::new(self.sizes.clone())?;
        let layers = topology.output_layer();

        if self.weights.len() != layers || self.biases.len() != layers {
            return Err(invalid(format!(
                "expected {layers} weight and bias tensors, found {} and {}",
                self.weights.len(),
                self.biases.len()
            )));
        }

        for layer in 1..=layers {
            let weights = &self.weights[layer - 1];
            let biases = &self.biases[layer - 1];
            let expected = [topology.width(layer), topology.width(layer - 1)];
            if weights.shape != expected || weights.data.len() != expected[0] * expected[1] {
                return Err(invalid(format!(
                    "layer {layer} weights have shape {:?}, expected {expected:?}",
                    weights.shape
                )));
            }
            if biases.shape != [expected[0]] || biases.data.len() != expected[0] {
                return Err(invalid(format!(
                    "layer {layer} biases have shape {:?}, expected [{}]",
                    biases.shape, expected[0]
                )));
            }
        }
        Ok(topology)
    }

    fn into_tensors(self) -> Vec<Ten64> {
        let sizes = self.sizes.iter().map(|&w| w as f64).collect::<Vec<_>>();
        let mut tensors = Vec::with_capacity(1 + self.weights.len() * 2);
        tensors.push(Tensor::new(vec![sizes.len()], sizes));
        tensors.extend(self.weights);
        tensors.extend(self.biases);
        tensors
    }

    fn from_tensors(mut tensors: Vec<Ten64>) -> Result<Self> {
        if tensors.is_empty() {
            return Err(invalid("file holds no tensors"));
        }
        let header = tensors.remove(0);
        if header.shape.len() != 1 {
            return Err(invalid("topology tensor must be one-dimensional"));
        }
        let sizes = header
            .data
            .iter()
            .map(|&w| {
                if w.fract() == 0.0 && w >= 1.0 && w <= usize::MAX as f64 {
                    Ok(w as usize)
                } else {
                    Err(invalid(format!("{w} is not a valid layer width")))
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let layers = sizes.len().saturating_sub(1);
        if tensors.len() != 2 * layers {
            return Err(invalid(format!(
                "expected {} parameter tensors for {} layers, found {}",
                2 * layers,
                sizes.len(),
                tensors.len()
            )));
        }
        let biases = tensors.split_off(layers);
        let snapshot = Self {
            sizes,
            weights: tensors,
            biases,
        };
        snapshot.validate()?;
        Ok(snapshot)
    }
}

/// Writes `tensors` in `.bpat` layout.
///
/// # Errors
/// `InvalidModel` for more than 255 tensors; `Io` if writing fails.
pub fn write_tensors<W: Write>(writer: &mut W, tensors: &[Ten64]) -> Result<()> {
    let count = u8::try_from(tensors.len())
        .map_err(|_| invalid(format!("{} tensors exceed the format limit of 255", tensors.len())))?;

    writer.write_all(BPAT_MAGIC)?;
    writer.write_all(&[count])?;

    for tensor in tensors {
        writer.write_all(&(tensor.shape.len() as u64).to_le_bytes())?;
        for &dim in &tensor.shape {
            writer.write_all(&(dim as u64).to_le_bytes())?;
        }
        for &val in &tensor.data {
            writer.write_all(&val.to_le_bytes())?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Reads `.bpat` tensors.
///
/// # Errors
/// `InvalidModel` on a bad magic header; `Io` on truncated input.
pub fn read_tensors<R: Read>(reader: &mut R) -> Result<Vec<Ten64>> {
    let mut buf8 = [0u8; 8];

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != BPAT_MAGIC {
        return Err(invalid("invalid magic header"));
    }

    let mut count = [0u8; 1];
    reader.read_exact(&mut count)?;
    let count = count[0] as usize;

    let mut tensors = Vec::with_capacity(count);
    for _ in 0..count {
        reader.read_exact(&mut buf8)?;
        let ndim = u64::from_le_bytes(buf8) as usize;
        if ndim > 8 {
            return Err(invalid(format!("tensor with {ndim} dimensions")));
        }

        let mut shape = Vec::with_capacity(ndim);
        for _ in 0..ndim {
            reader.read_exact(&mut buf8)?;
            shape.push(u64::from_le_bytes(buf8) as usize);
        }

        let size = shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| invalid("tensor size overflows"))?;
        let mut data = Vec::with_capacity(size.min(MAX_PREALLOC));
        for _ in 0..size {
            reader.read_exact(&mut buf8)?;
            data.push(f64::from_le_bytes(buf8));
        }

        tensors.push(Tensor::new(shape, data));
    }

    Ok(tensors)
}

/// Saves a parameter snapshot to a `.bpat` file.
///
/// # Errors
/// `InvalidModel` if the snapshot is inconsistent; `Io` if writing fails.
pub fn save_snapshot(path: impl AsRef<Path>, snapshot: &ParameterSnapshot) -> Result<()> {
    snapshot.validate()?;
    let mut file = BufWriter::new(File::create(path)?);
    write_tensors(&mut file, &snapshot.clone().into_tensors())
}

/// Loads and validates a parameter snapshot from a `.bpat` file.
///
/// # Errors
/// `Io` if the file cannot be read; `InvalidModel` if it is not a
/// consistent snapshot.
pub fn load_snapshot(path: impl AsRef<Path>) -> Result<ParameterSnapshot> {
    let mut file = BufReader::new(File::open(path)?);
    ParameterSnapshot::from_tensors(read_tensors(&mut file)?)
}
