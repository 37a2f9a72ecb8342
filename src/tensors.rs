//! Core tensor data structure.
//!
//! Every piece of network state is a `Tensor<f64>` ([`Ten64`]): a runtime
//! shape plus a flat, row-major data vector. Kernels only ever see the
//! `data` slices; the shapes are what the state store checks when it
//! decides whether preserved parameters still fit a topology.
//!
//! ## Example
//!
//! ```rust
//! use briny_mlp::tensors::Tensor;
//! let t = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! assert_eq!(t.shape, vec![2, 3]);
//! assert_eq!(t.len(), 6);
//! ```

use serde::{Deserialize, Serialize};

/// Represents an N-dimensional tensor with a shape and flat row-major data.
///
/// - `shape` defines the structure, e.g. `[2, 3]` for a 2×3 matrix.
/// - `data` holds the flattened content in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor<T> {
    pub shape: Vec<usize>,
    pub data: Vec<T>,
}

/// The tensor type used for all host-side network state.
pub type Ten64 = Tensor<f64>;

impl<T> Tensor<T> {
    /// Creates a new tensor with the given shape and flat data.
    ///
    /// # Panics
    /// Panics if the number of elements in `data` does not match the shape product.
    pub fn new(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Self {
        let shape = shape.into();
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "shape {:?} is incompatible with {} data elements",
            shape,
            data.len()
        );
        Self { shape, data }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl<T: Copy + Default> Tensor<T> {
    /// Creates a tensor of the given shape filled with `T::default()`.
    pub fn zeros(shape: impl Into<Vec<usize>>) -> Self {
        let shape = shape.into();
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![T::default(); len],
        }
    }

    /// Creates a tensor whose elements are produced by `f`, in row-major order.
    pub fn from_fn(shape: impl Into<Vec<usize>>, mut f: impl FnMut() -> T) -> Self {
        let shape = shape.into();
        let len = shape.iter().product();
        let data = (0..len).map(|_| f()).collect();
        Self { shape, data }
    }
}

/// Defines a tensor from nested literal arrays.
///
/// Supports arbitrary dimensionality as long as sublists are uniform in shape.
/// Negative literals are accepted.
///
/// # Example
/// ```
/// use briny_mlp::tensor;
/// let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
/// assert_eq!(t.shape, vec![2, 2]);
/// ```
#[macro_export]
macro_rules! tensor {
    ($lit:literal) => {
        $crate::tensors::Tensor::new(Vec::<usize>::new(), vec![$lit])
    };

    ([ $( $lit:literal ),+ $(,)? ]) => {{
        let data = vec![ $( $lit ),+ ];
        $crate::tensors::Tensor::new(vec![data.len()], data)
    }};

    ([ $( [ $( $inner:tt )* ] ),+ $(,)? ]) => {{
        let children = vec![ $( $crate::tensor!([ $( $inner )* ]) ),+ ];
        let first_shape = &children[0].shape;
        assert!(children.iter().all(|c| c.shape == *first_shape),
            "ragged tensor literal (rows have mismatched shapes)");
        let mut shape = vec![children.len()];
        shape.extend_from_slice(first_shape);
        let mut data = Vec::with_capacity(children.len() * children[0].data.len());
        for c in children { data.extend(c.data); }
        $crate::tensors::Tensor::new(shape, data)
    }};
}
