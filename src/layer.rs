//! Parametrized layers: 1-D convolution and dense.
//!
//! Both layers read and write flat row-major slices for a single sample. The
//! summation order is part of the numeric contract shared with external
//! evaluators: start from the bias, then add `w * x` products in row-major order of
//! the weight tensor, using plain multiply-then-add.

use rand::Rng;
use rand::distributions::{Distribution, Uniform};

use crate::{Error, Result, Tensor};

/// 1-D convolution, stride 1, no padding.
///
/// Weight shape `(out_channels, in_channels, kernel_size)`, bias shape `(out_channels,)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Conv1d {
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    weight: Tensor,
    bias: Tensor,
}

impl Conv1d {
    /// Zero-initialized layer.
    pub fn new(in_channels: usize, out_channels: usize, kernel_size: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size,
            weight: Tensor::zeros(&[out_channels, in_channels, kernel_size]),
            bias: Tensor::zeros(&[out_channels]),
        }
    }

    /// Uniform `U(-1/sqrt(fan_in), 1/sqrt(fan_in))` initialization, `fan_in = in * k`.
    pub fn new_with_rng<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        rng: &mut R,
    ) -> Self {
        let mut layer = Self::new(in_channels, out_channels, kernel_size);
        let dist = fan_in_uniform(in_channels * kernel_size);
        fill(layer.weight.data_mut(), &dist, rng);
        fill(layer.bias.data_mut(), &dist, rng);
        layer
    }

    /// Build from existing parameters, validating shapes and finiteness.
    pub fn from_parts(weight: Tensor, bias: Tensor) -> Result<Self> {
        if weight.rank() != 3 {
            return Err(Error::ShapeMismatch(format!(
                "conv weight must be rank 3 (out, in, kernel), got shape {:?}",
                weight.shape()
            )));
        }
        let (out_channels, in_channels, kernel_size) = (weight.dim(0), weight.dim(1), weight.dim(2));
        if bias.shape() != [out_channels] {
            return Err(Error::ShapeMismatch(format!(
                "conv bias shape {:?} does not match out_channels {out_channels}",
                bias.shape()
            )));
        }
        if !(weight.all_finite() && bias.all_finite()) {
            return Err(Error::InvalidData(
                "conv parameters must be finite".to_owned(),
            ));
        }
        Ok(Self {
            in_channels,
            out_channels,
            kernel_size,
            weight,
            bias,
        })
    }

    #[inline]
    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    #[inline]
    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    #[inline]
    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    /// Output length for an input of length `len`.
    ///
    /// Panics if `len < kernel_size`.
    #[inline]
    pub fn output_len(&self, len: usize) -> usize {
        assert!(
            len >= self.kernel_size,
            "input length {len} shorter than kernel {}",
            self.kernel_size
        );
        len - self.kernel_size + 1
    }

    #[inline]
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    #[inline]
    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    #[inline]
    pub(crate) fn weight_mut(&mut self) -> &mut Tensor {
        &mut self.weight
    }

    #[inline]
    pub(crate) fn bias_mut(&mut self) -> &mut Tensor {
        &mut self.bias
    }

    /// Forward pass for a single sample.
    ///
    /// Shape contract:
    /// - `input.len() == in_channels * len`
    /// - `output.len() == out_channels * output_len(len)`
    pub fn forward(&self, input: &[f64], len: usize, output: &mut [f64]) {
        let out_len = self.output_len(len);
        debug_assert_eq!(input.len(), self.in_channels * len);
        debug_assert_eq!(output.len(), self.out_channels * out_len);

        let w = self.weight.data();
        let b = self.bias.data();
        let k = self.kernel_size;

        for o in 0..self.out_channels {
            for p in 0..out_len {
                let mut sum = b[o];
                for i in 0..self.in_channels {
                    let w_row = (o * self.in_channels + i) * k;
                    let x_row = i * len + p;
                    for j in 0..k {
                        sum += w[w_row + j] * input[x_row + j];
                    }
                }
                output[o * out_len + p] = sum;
            }
        }
    }

    /// Backward pass for a single sample (accumulate semantics).
    ///
    /// Adds this sample's contribution to `d_weight` / `d_bias`. If `d_input` is
    /// given it is overwritten with dL/d(input).
    pub fn backward(
        &self,
        input: &[f64],
        len: usize,
        d_output: &[f64],
        d_input: Option<&mut [f64]>,
        d_weight: &mut [f64],
        d_bias: &mut [f64],
    ) {
        let out_len = self.output_len(len);
        debug_assert_eq!(input.len(), self.in_channels * len);
        debug_assert_eq!(d_output.len(), self.out_channels * out_len);
        debug_assert_eq!(d_weight.len(), self.weight.len());
        debug_assert_eq!(d_bias.len(), self.out_channels);

        let w = self.weight.data();
        let k = self.kernel_size;

        for o in 0..self.out_channels {
            for p in 0..out_len {
                let g = d_output[o * out_len + p];
                d_bias[o] += g;
                for i in 0..self.in_channels {
                    let w_row = (o * self.in_channels + i) * k;
                    let x_row = i * len + p;
                    for j in 0..k {
                        d_weight[w_row + j] += g * input[x_row + j];
                    }
                }
            }
        }

        if let Some(d_input) = d_input {
            debug_assert_eq!(d_input.len(), input.len());
            d_input.fill(0.0);
            for o in 0..self.out_channels {
                for p in 0..out_len {
                    let g = d_output[o * out_len + p];
                    for i in 0..self.in_channels {
                        let w_row = (o * self.in_channels + i) * k;
                        let x_row = i * len + p;
                        for j in 0..k {
                            d_input[x_row + j] += g * w[w_row + j];
                        }
                    }
                }
            }
        }
    }
}

/// Fully connected layer.
///
/// Weight shape `(out_dim, in_dim)` (row-major), bias shape `(out_dim,)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Dense {
    in_dim: usize,
    out_dim: usize,
    weight: Tensor,
    bias: Tensor,
}

impl Dense {
    #[inline]
    pub fn new(in_dim: usize, out_dim: usize) -> Self {
        Self {
            in_dim,
            out_dim,
            weight: Tensor::zeros(&[out_dim, in_dim]),
            bias: Tensor::zeros(&[out_dim]),
        }
    }

    /// Uniform `U(-1/sqrt(in_dim), 1/sqrt(in_dim))` initialization.
    pub fn new_with_rng<R: Rng + ?Sized>(in_dim: usize, out_dim: usize, rng: &mut R) -> Self {
        let mut layer = Self::new(in_dim, out_dim);
        let dist = fan_in_uniform(in_dim);
        fill(layer.weight.data_mut(), &dist, rng);
        fill(layer.bias.data_mut(), &dist, rng);
        layer
    }

    pub fn from_parts(weight: Tensor, bias: Tensor) -> Result<Self> {
        if weight.rank() != 2 {
            return Err(Error::ShapeMismatch(format!(
                "dense weight must be rank 2 (out, in), got shape {:?}",
                weight.shape()
            )));
        }
        let (out_dim, in_dim) = (weight.dim(0), weight.dim(1));
        if bias.shape() != [out_dim] {
            return Err(Error::ShapeMismatch(format!(
                "dense bias shape {:?} does not match out_dim {out_dim}",
                bias.shape()
            )));
        }
        if !(weight.all_finite() && bias.all_finite()) {
            return Err(Error::InvalidData(
                "dense parameters must be finite".to_owned(),
            ));
        }
        Ok(Self {
            in_dim,
            out_dim,
            weight,
            bias,
        })
    }

    #[inline]
    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    #[inline]
    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    #[inline]
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    #[inline]
    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    #[inline]
    pub(crate) fn weight_mut(&mut self) -> &mut Tensor {
        &mut self.weight
    }

    #[inline]
    pub(crate) fn bias_mut(&mut self) -> &mut Tensor {
        &mut self.bias
    }

    /// `outputs = W * inputs + b` for a single sample.
    #[inline]
    pub fn forward(&self, inputs: &[f64], outputs: &mut [f64]) {
        debug_assert_eq!(inputs.len(), self.in_dim);
        debug_assert_eq!(outputs.len(), self.out_dim);

        let w = self.weight.data();
        let b = self.bias.data();
        for o in 0..self.out_dim {
            let row = &w[o * self.in_dim..(o + 1) * self.in_dim];
            let mut sum = b[o];
            for (&wi, &xi) in row.iter().zip(inputs) {
                sum += wi * xi;
            }
            outputs[o] = sum;
        }
    }

    /// Backward pass for a single sample (accumulate semantics for parameter grads).
    ///
    /// If `d_inputs` is given it is overwritten with dL/d(inputs).
    pub fn backward(
        &self,
        inputs: &[f64],
        d_outputs: &[f64],
        d_inputs: Option<&mut [f64]>,
        d_weight: &mut [f64],
        d_bias: &mut [f64],
    ) {
        debug_assert_eq!(inputs.len(), self.in_dim);
        debug_assert_eq!(d_outputs.len(), self.out_dim);
        debug_assert_eq!(d_weight.len(), self.weight.len());
        debug_assert_eq!(d_bias.len(), self.out_dim);

        for o in 0..self.out_dim {
            let g = d_outputs[o];
            d_bias[o] += g;
            let row = o * self.in_dim;
            for i in 0..self.in_dim {
                d_weight[row + i] += g * inputs[i];
            }
        }

        if let Some(d_inputs) = d_inputs {
            debug_assert_eq!(d_inputs.len(), self.in_dim);
            d_inputs.fill(0.0);
            let w = self.weight.data();
            for o in 0..self.out_dim {
                let g = d_outputs[o];
                let row = o * self.in_dim;
                for i in 0..self.in_dim {
                    d_inputs[i] += g * w[row + i];
                }
            }
        }
    }
}

fn fan_in_uniform(fan_in: usize) -> Uniform<f64> {
    let bound = 1.0 / (fan_in.max(1) as f64).sqrt();
    Uniform::new_inclusive(-bound, bound)
}

fn fill<R: Rng + ?Sized>(values: &mut [f64], dist: &Uniform<f64>, rng: &mut R) {
    for v in values.iter_mut() {
        *v = dist.sample(rng);
    }
}
