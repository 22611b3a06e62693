//! The fixed-topology 1-D CNN.
//!
//! ```text
//! input (batch, 1, L)
//!   -> conv1 (1 -> 32, k=2)  -> dropout(0.1) -> act     (32, L-1)
//!   -> conv2 (32 -> 64, k=2) -> dropout(0.2) -> act     (64, L-2)
//!   -> dropout(0.4) -> flatten (channel-major)          64 * (L-2)
//!   -> fc1 (-> 64)           -> dropout(0.5) -> act
//!   -> fc2 (64 -> 1)         -> sigmoid iff OutputMode::Probability
//! ```
//!
//! `act` is the single activation chosen at construction. Dropout is inverted
//! (kept values are scaled by `1 / (1 - p)`) and only applied by the `*_with_rng`
//! entry points while training mode is on; [`Cnn::forward`] is always deterministic.
//!
//! Like the layers, the per-sample hot path (`forward_sample`, `backward`) panics on
//! shape misuse; the batched [`Cnn::forward`] validates and returns [`Result`].

use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::activation::{Activate, sigmoid};
use crate::layer::{Conv1d, Dense};
use crate::{Activation, Error, Precision, Result, Tensor};

pub const CONV1_CHANNELS: usize = 32;
pub const CONV2_CHANNELS: usize = 64;
pub const KERNEL_SIZE: usize = 2;
pub const HIDDEN_DIM: usize = 64;
/// Smallest input length for which both convolutions produce output.
pub const MIN_INPUT_LEN: usize = 3;

/// Whether the model returns raw logits or sigmoid probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    Logits,
    Probability,
}

/// Dropout probabilities, in forward order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DropoutRates {
    /// After conv1, before the activation.
    pub conv1: f64,
    /// After conv2, before the activation.
    pub conv2: f64,
    /// On the flattened conv features.
    pub features: f64,
    /// After fc1, before the activation.
    pub fc1: f64,
}

impl Default for DropoutRates {
    fn default() -> Self {
        Self {
            conv1: 0.1,
            conv2: 0.2,
            features: 0.4,
            fc1: 0.5,
        }
    }
}

impl DropoutRates {
    /// No dropout anywhere.
    pub const NONE: DropoutRates = DropoutRates {
        conv1: 0.0,
        conv2: 0.0,
        features: 0.0,
        fc1: 0.0,
    };

    pub fn validate(&self) -> Result<()> {
        for (name, p) in [
            ("conv1", self.conv1),
            ("conv2", self.conv2),
            ("features", self.features),
            ("fc1", self.fc1),
        ] {
            if !(p.is_finite() && (0.0..1.0).contains(&p)) {
                return Err(Error::InvalidConfig(format!(
                    "dropout rate {name} must be in [0, 1), got {p}"
                )));
            }
        }
        Ok(())
    }
}

/// Everything that defines a model apart from its learned parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CnnConfig {
    pub input_len: usize,
    pub activation: Activation,
    pub precision: Precision,
    pub output: OutputMode,
    pub dropout: DropoutRates,
}

impl CnnConfig {
    pub fn validate(&self) -> Result<()> {
        if self.input_len < MIN_INPUT_LEN {
            return Err(Error::ShapeMismatch(format!(
                "input length must be >= {MIN_INPUT_LEN}, got {}",
                self.input_len
            )));
        }
        if self.input_len.checked_mul(CONV2_CHANNELS).is_none() {
            return Err(Error::ShapeMismatch(format!(
                "input length {} is too large",
                self.input_len
            )));
        }
        self.dropout.validate()
    }

    /// Number of features entering fc1: `64 * (L - 2)`.
    #[inline]
    pub fn flattened_len(&self) -> usize {
        CONV2_CHANNELS * (self.input_len - 2)
    }
}

/// Stable parameter identifiers, in forward order (weight before bias).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamId {
    Conv1Weight,
    Conv1Bias,
    Conv2Weight,
    Conv2Bias,
    Fc1Weight,
    Fc1Bias,
    Fc2Weight,
    Fc2Bias,
}

impl ParamId {
    pub const ALL: [ParamId; 8] = [
        ParamId::Conv1Weight,
        ParamId::Conv1Bias,
        ParamId::Conv2Weight,
        ParamId::Conv2Bias,
        ParamId::Fc1Weight,
        ParamId::Fc1Bias,
        ParamId::Fc2Weight,
        ParamId::Fc2Bias,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ParamId::Conv1Weight => "conv1.weight",
            ParamId::Conv1Bias => "conv1.bias",
            ParamId::Conv2Weight => "conv2.weight",
            ParamId::Conv2Bias => "conv2.bias",
            ParamId::Fc1Weight => "fc1.weight",
            ParamId::Fc1Bias => "fc1.bias",
            ParamId::Fc2Weight => "fc2.weight",
            ParamId::Fc2Bias => "fc2.bias",
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ParamId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ParamId::ALL
            .into_iter()
            .find(|id| id.name() == s)
            .ok_or_else(|| Error::UnknownParameter(s.to_owned()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cnn {
    config: CnnConfig,
    training: bool,
    conv1: Conv1d,
    conv2: Conv1d,
    fc1: Dense,
    fc2: Dense,
}

/// Per-sample intermediate values, reused across calls.
///
/// After a forward pass it holds everything [`Cnn::backward`] needs.
#[derive(Debug, Clone)]
pub struct Scratch {
    input: Vec<f64>,
    // Post-dropout pre-activations and activations, per stage.
    u1: Vec<f64>,
    a1: Vec<f64>,
    u2: Vec<f64>,
    a2: Vec<f64>,
    h: Vec<f64>,
    u3: Vec<f64>,
    a3: Vec<f64>,
    logit: f64,
    output: f64,
    // Dropout scale factors (0 or 1/(1-p)); empty when no dropout was applied.
    m1: Vec<f64>,
    m2: Vec<f64>,
    m3: Vec<f64>,
    m4: Vec<f64>,
    // Backprop buffers.
    d_a1: Vec<f64>,
    d_a2: Vec<f64>,
    d_a3: Vec<f64>,
}

/// Parameter gradients (accumulate semantics), one tensor per [`ParamId`].
#[derive(Debug, Clone, PartialEq)]
pub struct Gradients {
    tensors: [Tensor; 8],
    samples: usize,
}

impl Cnn {
    /// Build a model with freshly initialized parameters.
    pub fn new_with_rng<R: Rng + ?Sized>(config: CnnConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let conv1 = Conv1d::new_with_rng(1, CONV1_CHANNELS, KERNEL_SIZE, rng);
        let conv2 = Conv1d::new_with_rng(CONV1_CHANNELS, CONV2_CHANNELS, KERNEL_SIZE, rng);
        let fc1 = Dense::new_with_rng(config.flattened_len(), HIDDEN_DIM, rng);
        let fc2 = Dense::new_with_rng(HIDDEN_DIM, 1, rng);
        Self::from_layers(config, conv1, conv2, fc1, fc2)
    }

    pub fn new_with_seed(config: CnnConfig, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::new_with_rng(config, &mut rng)
    }

    /// Assemble a model from existing layers, checking them against the topology.
    ///
    /// Parameters are rounded to the configured precision.
    pub fn from_layers(
        config: CnnConfig,
        conv1: Conv1d,
        conv2: Conv1d,
        fc1: Dense,
        fc2: Dense,
    ) -> Result<Self> {
        config.validate()?;
        let expected = [
            (ParamId::Conv1Weight, vec![CONV1_CHANNELS, 1, KERNEL_SIZE]),
            (ParamId::Conv1Bias, vec![CONV1_CHANNELS]),
            (ParamId::Conv2Weight, vec![CONV2_CHANNELS, CONV1_CHANNELS, KERNEL_SIZE]),
            (ParamId::Conv2Bias, vec![CONV2_CHANNELS]),
            (ParamId::Fc1Weight, vec![HIDDEN_DIM, config.flattened_len()]),
            (ParamId::Fc1Bias, vec![HIDDEN_DIM]),
            (ParamId::Fc2Weight, vec![1, HIDDEN_DIM]),
            (ParamId::Fc2Bias, vec![1]),
        ];
        let mut model = Self {
            config,
            training: false,
            conv1,
            conv2,
            fc1,
            fc2,
        };
        for (id, shape) in expected {
            let got = model.param(id).shape();
            if got != shape.as_slice() {
                return Err(Error::ShapeMismatch(format!(
                    "{id} has shape {got:?}, expected {shape:?}"
                )));
            }
        }
        let precision = model.config.precision;
        for id in ParamId::ALL {
            precision.round_slice(model.param_mut(id).data_mut());
        }
        Ok(model)
    }

    #[inline]
    pub fn config(&self) -> &CnnConfig {
        &self.config
    }

    #[inline]
    pub fn input_len(&self) -> usize {
        self.config.input_len
    }

    #[inline]
    pub fn activation(&self) -> &Activation {
        &self.config.activation
    }

    #[inline]
    pub fn precision(&self) -> Precision {
        self.config.precision
    }

    #[inline]
    pub fn output_mode(&self) -> OutputMode {
        self.config.output
    }

    #[inline]
    pub fn flattened_len(&self) -> usize {
        self.config.flattened_len()
    }

    #[inline]
    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Toggle training mode (enables dropout in the `*_with_rng` entry points).
    pub fn set_training_mode(&mut self, training: bool) {
        self.training = training;
    }

    pub fn conv1(&self) -> &Conv1d {
        &self.conv1
    }

    pub fn conv2(&self) -> &Conv1d {
        &self.conv2
    }

    pub fn fc1(&self) -> &Dense {
        &self.fc1
    }

    pub fn fc2(&self) -> &Dense {
        &self.fc2
    }

    /// Total number of learned scalars.
    pub fn num_parameters(&self) -> usize {
        ParamId::ALL.iter().map(|&id| self.param(id).len()).sum()
    }

    pub fn scratch(&self) -> Scratch {
        Scratch::new(self)
    }

    pub fn gradients(&self) -> Gradients {
        Gradients::new(self)
    }

    #[inline]
    pub fn param(&self, id: ParamId) -> &Tensor {
        match id {
            ParamId::Conv1Weight => self.conv1.weight(),
            ParamId::Conv1Bias => self.conv1.bias(),
            ParamId::Conv2Weight => self.conv2.weight(),
            ParamId::Conv2Bias => self.conv2.bias(),
            ParamId::Fc1Weight => self.fc1.weight(),
            ParamId::Fc1Bias => self.fc1.bias(),
            ParamId::Fc2Weight => self.fc2.weight(),
            ParamId::Fc2Bias => self.fc2.bias(),
        }
    }

    fn param_mut(&mut self, id: ParamId) -> &mut Tensor {
        match id {
            ParamId::Conv1Weight => self.conv1.weight_mut(),
            ParamId::Conv1Bias => self.conv1.bias_mut(),
            ParamId::Conv2Weight => self.conv2.weight_mut(),
            ParamId::Conv2Bias => self.conv2.bias_mut(),
            ParamId::Fc1Weight => self.fc1.weight_mut(),
            ParamId::Fc1Bias => self.fc1.bias_mut(),
            ParamId::Fc2Weight => self.fc2.weight_mut(),
            ParamId::Fc2Bias => self.fc2.bias_mut(),
        }
    }

    /// All parameters with their stable names, in forward order.
    pub fn named_parameters(&self) -> Vec<(&'static str, &Tensor)> {
        ParamId::ALL
            .into_iter()
            .map(|id| (id.name(), self.param(id)))
            .collect()
    }

    /// Look up a parameter by its stable name.
    pub fn parameter(&self, name: &str) -> Result<&Tensor> {
        let id: ParamId = name.parse()?;
        Ok(self.param(id))
    }

    /// In-place `param += delta` for the named parameter.
    ///
    /// The result is rounded to the model precision.
    pub fn apply_update(&mut self, name: &str, delta: &Tensor) -> Result<()> {
        let id: ParamId = name.parse()?;
        let precision = self.config.precision;
        let param = self.param_mut(id);
        param.add_assign(delta)?;
        precision.round_slice(param.data_mut());
        Ok(())
    }

    /// Deterministic batched forward pass: `(batch, 1, L)` -> `(batch, 1)`.
    ///
    /// Dropout is never applied, regardless of training mode.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        self.check_input(input)?;
        let mut scratch = self.scratch();
        let outputs = (0..input.dim(0))
            .map(|i| self.run(input.outer(i), &mut scratch, None))
            .collect();
        Tensor::new(vec![input.dim(0), 1], outputs)
    }

    /// Batched forward pass that applies dropout when training mode is on.
    pub fn forward_with_rng<R: RngCore>(&self, input: &Tensor, rng: &mut R) -> Result<Tensor> {
        self.check_input(input)?;
        let mut scratch = self.scratch();
        let outputs = (0..input.dim(0))
            .map(|i| self.forward_sample_with_rng(input.outer(i), &mut scratch, rng))
            .collect();
        Tensor::new(vec![input.dim(0), 1], outputs)
    }

    /// Probabilities for each sample, applying the sigmoid if the model emits logits.
    pub fn predict_proba(&self, input: &Tensor) -> Result<Vec<f64>> {
        let out = self.forward(input)?;
        Ok(match self.config.output {
            OutputMode::Logits => out.data().iter().map(|&z| sigmoid(z)).collect(),
            OutputMode::Probability => out.into_data(),
        })
    }

    /// Deterministic forward pass for one sample of length `L`.
    ///
    /// Panics if `input.len() != L` or `scratch` was built for another model.
    pub fn forward_sample(&self, input: &[f64], scratch: &mut Scratch) -> f64 {
        self.run(input, scratch, None)
    }

    /// Forward pass for one sample; dropout is applied when training mode is on.
    pub fn forward_sample_with_rng<R: RngCore>(
        &self,
        input: &[f64],
        scratch: &mut Scratch,
        rng: &mut R,
    ) -> f64 {
        if self.training {
            self.run(input, scratch, Some(rng as &mut dyn RngCore))
        } else {
            self.run(input, scratch, None)
        }
    }

    fn check_input(&self, input: &Tensor) -> Result<()> {
        let shape = input.shape();
        if shape.len() != 3 {
            return Err(Error::ShapeMismatch(format!(
                "expected input of rank 3 (batch, 1, {}), got shape {shape:?}",
                self.config.input_len
            )));
        }
        if shape[1] != 1 {
            return Err(Error::ShapeMismatch(format!(
                "expected 1 input channel, got {}",
                shape[1]
            )));
        }
        if shape[2] != self.config.input_len {
            return Err(Error::ShapeMismatch(format!(
                "expected input length {}, got {}",
                self.config.input_len, shape[2]
            )));
        }
        Ok(())
    }

    fn run(
        &self,
        input: &[f64],
        s: &mut Scratch,
        mut rng: Option<&mut (dyn RngCore + '_)>,
    ) -> f64 {
        let len = self.config.input_len;
        assert_eq!(
            input.len(),
            len,
            "input len {} does not match model input length {len}",
            input.len()
        );
        assert_eq!(
            s.h.len(),
            self.flattened_len(),
            "scratch was built for another input length"
        );

        let act = &self.config.activation;
        let precision = self.config.precision;
        let dropout = self.config.dropout;

        s.input.copy_from_slice(input);
        precision.round_slice(&mut s.input);

        self.conv1.forward(&s.input, len, &mut s.u1);
        precision.round_slice(&mut s.u1);
        apply_dropout(&mut s.u1, &mut s.m1, dropout.conv1, rng.as_deref_mut(), precision);
        activate(act, &s.u1, &mut s.a1, precision);

        self.conv2.forward(&s.a1, len - 1, &mut s.u2);
        precision.round_slice(&mut s.u2);
        apply_dropout(&mut s.u2, &mut s.m2, dropout.conv2, rng.as_deref_mut(), precision);
        activate(act, &s.u2, &mut s.a2, precision);

        // Channel-major flatten is the identity on the (64, L-2) buffer.
        s.h.copy_from_slice(&s.a2);
        apply_dropout(&mut s.h, &mut s.m3, dropout.features, rng.as_deref_mut(), precision);

        self.fc1.forward(&s.h, &mut s.u3);
        precision.round_slice(&mut s.u3);
        apply_dropout(&mut s.u3, &mut s.m4, dropout.fc1, rng.as_deref_mut(), precision);
        activate(act, &s.u3, &mut s.a3, precision);

        let mut logit = [0.0];
        self.fc2.forward(&s.a3, &mut logit);
        s.logit = precision.round(logit[0]);
        s.output = match self.config.output {
            OutputMode::Logits => s.logit,
            OutputMode::Probability => precision.round(sigmoid(s.logit)),
        };
        s.output
    }

    /// Backward pass for the sample last run through `scratch`.
    ///
    /// `d_output` is dL/d(model output); for [`OutputMode::Probability`] that is the
    /// gradient with respect to the probability. Gradients are added to `grads`.
    pub fn backward(&self, scratch: &mut Scratch, d_output: f64, grads: &mut Gradients) {
        let len = self.config.input_len;
        let act = &self.config.activation;
        let s = scratch;

        let d_logit = match self.config.output {
            OutputMode::Logits => d_output,
            OutputMode::Probability => d_output * s.output * (1.0 - s.output),
        };

        let [c1w, c1b, c2w, c2b, f1w, f1b, f2w, f2b] = &mut grads.tensors;

        // fc2
        self.fc2.backward(
            &s.a3,
            &[d_logit],
            Some(&mut s.d_a3),
            f2w.data_mut(),
            f2b.data_mut(),
        );

        // act + dropout(fc1)
        through_activation(act, &s.u3, &s.m4, &mut s.d_a3);
        self.fc1.backward(
            &s.h,
            &s.d_a3,
            Some(&mut s.d_a2),
            f1w.data_mut(),
            f1b.data_mut(),
        );

        // dropout(features), then act + dropout(conv2)
        apply_mask(&s.m3, &mut s.d_a2);
        through_activation(act, &s.u2, &s.m2, &mut s.d_a2);
        self.conv2.backward(
            &s.a1,
            len - 1,
            &s.d_a2,
            Some(&mut s.d_a1),
            c2w.data_mut(),
            c2b.data_mut(),
        );

        through_activation(act, &s.u1, &s.m1, &mut s.d_a1);
        self.conv1
            .backward(&s.input, len, &s.d_a1, None, c1w.data_mut(), c1b.data_mut());

        grads.samples += 1;
    }
}

/// Elementwise `out = act(u)`, rounded.
fn activate(act: &Activation, u: &[f64], out: &mut [f64], precision: Precision) {
    for (o, &v) in out.iter_mut().zip(u) {
        *o = precision.round(act.eval(v));
    }
}

/// Inverted dropout in place; records the scale factors in `mask`.
fn apply_dropout(
    values: &mut [f64],
    mask: &mut Vec<f64>,
    p: f64,
    rng: Option<&mut (dyn RngCore + '_)>,
    precision: Precision,
) {
    mask.clear();
    let Some(rng) = rng else { return };
    if p == 0.0 {
        return;
    }
    let keep_scale = 1.0 / (1.0 - p);
    mask.reserve(values.len());
    for v in values.iter_mut() {
        let m = if rng.gen_bool(p) { 0.0 } else { keep_scale };
        mask.push(m);
        *v = precision.round(*v * m);
    }
}

/// `grad *= mask` when a mask was recorded.
fn apply_mask(mask: &[f64], grad: &mut [f64]) {
    if mask.is_empty() {
        return;
    }
    for (g, &m) in grad.iter_mut().zip(mask) {
        *g *= m;
    }
}

/// Turn dL/d(act output) into dL/d(pre-dropout value), in place.
fn through_activation(act: &Activation, u: &[f64], mask: &[f64], grad: &mut [f64]) {
    for (g, &v) in grad.iter_mut().zip(u) {
        *g *= act.derivative(v);
    }
    apply_mask(mask, grad);
}

impl Scratch {
    pub fn new(model: &Cnn) -> Self {
        let len = model.config.input_len;
        let c1 = CONV1_CHANNELS * (len - 1);
        let c2 = CONV2_CHANNELS * (len - 2);
        Self {
            input: vec![0.0; len],
            u1: vec![0.0; c1],
            a1: vec![0.0; c1],
            u2: vec![0.0; c2],
            a2: vec![0.0; c2],
            h: vec![0.0; c2],
            u3: vec![0.0; HIDDEN_DIM],
            a3: vec![0.0; HIDDEN_DIM],
            logit: 0.0,
            output: 0.0,
            m1: Vec::new(),
            m2: Vec::new(),
            m3: Vec::new(),
            m4: Vec::new(),
            d_a1: vec![0.0; c1],
            d_a2: vec![0.0; c2],
            d_a3: vec![0.0; HIDDEN_DIM],
        }
    }

    /// Model output of the most recent forward pass.
    #[inline]
    pub fn output(&self) -> f64 {
        self.output
    }

    /// fc2 output (before the optional sigmoid) of the most recent forward pass.
    #[inline]
    pub fn logit(&self) -> f64 {
        self.logit
    }
}

impl Gradients {
    pub fn new(model: &Cnn) -> Self {
        Self {
            tensors: std::array::from_fn(|i| Tensor::zeros(model.param(ParamId::ALL[i]).shape())),
            samples: 0,
        }
    }

    /// Reset to zero before accumulating a new batch.
    pub fn zero(&mut self) {
        for t in &mut self.tensors {
            t.data_mut().fill(0.0);
        }
        self.samples = 0;
    }

    /// Number of samples accumulated since the last [`zero`](Self::zero).
    #[inline]
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Divide every gradient by the number of accumulated samples.
    pub fn average(&mut self) {
        if self.samples > 1 {
            let inv = 1.0 / self.samples as f64;
            for t in &mut self.tensors {
                for g in t.data_mut() {
                    *g *= inv;
                }
            }
        }
    }

    #[inline]
    pub fn get(&self, id: ParamId) -> &Tensor {
        &self.tensors[id.index()]
    }

    /// Euclidean norm over all gradients.
    pub fn l2_norm(&self) -> f64 {
        self.tensors
            .iter()
            .flat_map(|t| t.data())
            .map(|g| g * g)
            .sum::<f64>()
            .sqrt()
    }
}
