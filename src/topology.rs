//! Layer widths of a network.
//!
//! A [`Topology`] is the ordered list `sizes[0..=L]`: `sizes[0]` is the input
//! width, `sizes[L]` the output width, everything in between a hidden layer.
//! It is the only thing kernels are specialized on, so two networks with
//! equal topologies can share compiled kernels.

use crate::error::{NetworkError, Result};

/// Smallest width of the hidden layer derived when none is given.
pub const MIN_DERIVED_HIDDEN: usize = 3;

/// Ordered per-layer widths. Always at least two layers, every width > 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topology {
    sizes: Vec<usize>,
}

impl Topology {
    /// Validates an explicit list of widths.
    ///
    /// # Errors
    /// `InvalidTopology` if fewer than two widths are given or any width is zero.
    pub fn new(sizes: impl Into<Vec<usize>>) -> Result<Self> {
        let sizes = sizes.into();
        if sizes.len() < 2 {
            return Err(NetworkError::InvalidTopology(format!(
                "need at least an input and an output layer, got {} layer(s)",
                sizes.len()
            )));
        }
        if let Some(layer) = sizes.iter().position(|&w| w == 0) {
            return Err(NetworkError::InvalidTopology(format!(
                "layer {layer} has width 0"
            )));
        }
        Ok(Self { sizes })
    }

    /// Derives a topology from input/output lengths and optional hidden widths.
    ///
    /// Without hidden widths a single hidden layer of
    /// `max(3, input_size / 2)` nodes is used. An explicitly empty list gives
    /// a network with no hidden layer.
    ///
    /// ```
    /// use briny_mlp::topology::Topology;
    /// let t = Topology::resolve(10, 2, None).unwrap();
    /// assert_eq!(t.sizes(), &[10, 5, 2]);
    /// ```
    ///
    /// # Errors
    /// `InvalidTopology` if any length or hidden width is zero.
    pub fn resolve(input_size: usize, output_size: usize, hidden: Option<&[usize]>) -> Result<Self> {
        if input_size == 0 || output_size == 0 {
            return Err(NetworkError::InvalidTopology(format!(
                "input size {input_size} and output size {output_size} must both be positive"
            )));
        }

        let mut sizes = Vec::with_capacity(hidden.map_or(3, |h| h.len() + 2));
        sizes.push(input_size);
        match hidden {
            Some(widths) => sizes.extend_from_slice(widths),
            None => sizes.push(MIN_DERIVED_HIDDEN.max(input_size / 2)),
        }
        sizes.push(output_size);

        Self::new(sizes)
    }

    /// All widths, input first.
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// Index of the output layer (`L`).
    pub fn output_layer(&self) -> usize {
        self.sizes.len() - 1
    }

    pub fn input_size(&self) -> usize {
        self.sizes[0]
    }

    pub fn output_size(&self) -> usize {
        self.sizes[self.output_layer()]
    }

    /// Width of layer `layer`.
    ///
    /// # Panics
    /// Panics if `layer > L`.
    pub fn width(&self, layer: usize) -> usize {
        self.sizes[layer]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_single_hidden_layer() {
        assert_eq!(Topology::resolve(2, 1, None).unwrap().sizes(), &[2, 3, 1]);
        assert_eq!(Topology::resolve(9, 4, None).unwrap().sizes(), &[9, 4, 4]);
        assert_eq!(Topology::resolve(20, 1, None).unwrap().sizes(), &[20, 10, 1]);
    }

    #[test]
    fn uses_given_hidden_layers() {
        let t = Topology::resolve(4, 2, Some(&[8, 6])).unwrap();
        assert_eq!(t.sizes(), &[4, 8, 6, 2]);
        assert_eq!(t.output_layer(), 3);
        assert_eq!(t.input_size(), 4);
        assert_eq!(t.output_size(), 2);
    }

    #[test]
    fn empty_hidden_list_means_no_hidden_layer() {
        let t = Topology::resolve(3, 2, Some(&[])).unwrap();
        assert_eq!(t.sizes(), &[3, 2]);
        assert_eq!(t.output_layer(), 1);
    }

    #[test]
    fn rejects_zero_widths() {
        assert!(matches!(
            Topology::resolve(0, 1, None),
            Err(NetworkError::InvalidTopology(_))
        ));
        assert!(matches!(
            Topology::resolve(2, 0, None),
            Err(NetworkError::InvalidTopology(_))
        ));
        assert!(matches!(
            Topology::resolve(2, 1, Some(&[3, 0])),
            Err(NetworkError::InvalidTopology(_))
        ));
    }

    #[test]
    fn rejects_single_layer() {
        assert!(matches!(
            Topology::new(vec![4]),
            Err(NetworkError::InvalidTopology(_))
        ));
    }
}
