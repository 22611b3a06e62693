//! Dense n-dimensional tensors.
//!
//! A `Tensor` is a contiguous row-major buffer of `f64` plus its shape. All the
//! layers in this crate read and write tensors through flat slices; the shape is
//! only consulted at API boundaries (model input, parameter updates, export).
//!
//! Storage is always `f64`. Single precision is emulated by rounding every stored
//! and computed value through `f32` (see [`Precision`]), which keeps one code path
//! for both modes and makes exported single-precision values exact.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Numeric precision of a model's parameters and intermediate values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    Double,
    Single,
}

impl Precision {
    /// Round `v` to this precision.
    #[inline]
    pub fn round(self, v: f64) -> f64 {
        match self {
            Precision::Double => v,
            Precision::Single => v as f32 as f64,
        }
    }

    #[inline]
    pub(crate) fn round_slice(self, values: &mut [f64]) {
        if self == Precision::Single {
            for v in values.iter_mut() {
                *v = *v as f32 as f64;
            }
        }
    }
}

/// Row-major n-dimensional array of `f64`.
///
/// Invariant: `data.len() == shape.iter().product()` and every dimension is > 0.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl Tensor {
    /// Build a tensor from a shape and a flat row-major buffer.
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        let expected = checked_numel(&shape)?;
        if data.len() != expected {
            return Err(Error::ShapeMismatch(format!(
                "data length {} does not match shape {:?} ({} elements)",
                data.len(),
                shape,
                expected
            )));
        }
        Ok(Self { shape, data })
    }

    /// All-zero tensor.
    ///
    /// Panics if `shape` is empty or has a zero dimension.
    pub fn zeros(shape: &[usize]) -> Self {
        assert!(
            !shape.is_empty() && !shape.contains(&0),
            "tensor shape must be non-empty with positive dims, got {shape:?}"
        );
        let n = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![0.0; n],
        }
    }

    /// 1-D tensor holding `data`.
    pub fn from_vec(data: Vec<f64>) -> Result<Self> {
        let len = data.len();
        Self::new(vec![len], data)
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Size of axis `axis`.
    ///
    /// Panics if `axis >= rank`.
    #[inline]
    pub fn dim(&self, axis: usize) -> usize {
        self.shape[axis]
    }

    /// Total number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false: tensors have positive dimensions.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    /// Element at a multi-index.
    ///
    /// Panics if the index rank or any coordinate is out of bounds.
    pub fn at(&self, index: &[usize]) -> f64 {
        assert_eq!(
            index.len(),
            self.shape.len(),
            "index rank {} does not match tensor rank {}",
            index.len(),
            self.shape.len()
        );
        let mut offset = 0;
        for (&i, &d) in index.iter().zip(&self.shape) {
            assert!(i < d, "index {index:?} out of bounds for shape {:?}", self.shape);
            offset = offset * d + i;
        }
        self.data[offset]
    }

    /// The `idx`-th slice along the leading axis, flattened.
    ///
    /// Panics if `idx >= shape[0]`.
    #[inline]
    pub fn outer(&self, idx: usize) -> &[f64] {
        let stride = self.data.len() / self.shape[0];
        &self.data[idx * stride..(idx + 1) * stride]
    }

    /// Element-wise map into a new tensor of the same shape.
    pub fn map(&self, mut f: impl FnMut(f64) -> f64) -> Self {
        Self {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    pub fn all_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// `self += delta`, element-wise.
    pub fn add_assign(&mut self, delta: &Tensor) -> Result<()> {
        if self.shape != delta.shape {
            return Err(Error::ShapeMismatch(format!(
                "cannot add tensor of shape {:?} to tensor of shape {:?}",
                delta.shape, self.shape
            )));
        }
        for (p, &d) in self.data.iter_mut().zip(&delta.data) {
            *p += d;
        }
        Ok(())
    }
}

fn checked_numel(shape: &[usize]) -> Result<usize> {
    if shape.is_empty() {
        return Err(Error::ShapeMismatch(
            "tensor shape must have at least one dimension".to_owned(),
        ));
    }
    if shape.contains(&0) {
        return Err(Error::ShapeMismatch(format!(
            "tensor dims must be > 0, got {shape:?}"
        )));
    }
    shape.iter().try_fold(1_usize, |acc, &d| {
        acc.checked_mul(d)
            .ok_or_else(|| Error::ShapeMismatch(format!("tensor shape {shape:?} overflows")))
    })
}
