//! Model builder.
//!
//! `CnnBuilder` is the recommended way to create a [`Cnn`]. The topology is fixed;
//! the builder chooses what varies between experiments: input length, activation
//! (by kind, by name, or with custom fitted coefficients), precision, output mode
//! and dropout rates.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::{CnnConfig, DropoutRates, OutputMode};
use crate::{Activation, ActivationKind, Cnn, Error, PolynomialCoefficients, Precision, Result};

/// Builder for a [`Cnn`].
///
/// Example:
///
/// ```rust
/// use he_ccfd::{ActivationKind, CnnBuilder, Tensor};
///
/// # fn main() -> he_ccfd::Result<()> {
/// let model = CnnBuilder::new(30)?
///     .activation(ActivationKind::ApproxReLU)
///     .build_with_seed(0)?;
///
/// let out = model.forward(&Tensor::zeros(&[4, 1, 30]))?;
/// assert_eq!(out.shape(), &[4, 1]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CnnBuilder {
    input_len: usize,
    activation: Activation,
    precision: Precision,
    output: OutputMode,
    dropout: DropoutRates,
}

impl CnnBuilder {
    /// Start building a model for inputs of shape `(batch, 1, input_len)`.
    ///
    /// `input_len` must be at least 3.
    pub fn new(input_len: usize) -> Result<Self> {
        let builder = Self {
            input_len,
            activation: Activation::from_kind(ActivationKind::ApproxReLU),
            precision: Precision::Double,
            output: OutputMode::Logits,
            dropout: DropoutRates::default(),
        };
        builder.config().validate()?;
        Ok(builder)
    }

    /// Use `kind`, with the built-in coefficients for approximated variants.
    pub fn activation(mut self, kind: ActivationKind) -> Self {
        self.activation = Activation::from_kind(kind);
        self
    }

    /// Select the activation by name (`"ReLU"`, `"ApproxReLU"`, `"Swish"`, ...).
    pub fn activation_name(self, name: &str) -> Result<Self> {
        let kind: ActivationKind = name.parse()?;
        Ok(self.activation(kind))
    }

    /// Use an approximated activation with caller-supplied coefficients.
    pub fn approximation(
        mut self,
        kind: ActivationKind,
        coefficients: PolynomialCoefficients,
    ) -> Result<Self> {
        self.activation = Activation::approximated(kind, coefficients)?;
        Ok(self)
    }

    pub fn precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    pub fn dropout(mut self, dropout: DropoutRates) -> Result<Self> {
        dropout.validate()?;
        self.dropout = dropout;
        Ok(self)
    }

    /// Disable dropout entirely.
    pub fn without_dropout(mut self) -> Self {
        self.dropout = DropoutRates::NONE;
        self
    }

    fn config(&self) -> CnnConfig {
        CnnConfig {
            input_len: self.input_len,
            activation: self.activation.clone(),
            precision: self.precision,
            output: self.output,
            dropout: self.dropout,
        }
    }

    /// Build using a deterministic seed.
    pub fn build_with_seed(self, seed: u64) -> Result<Cnn> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.build_with_rng(&mut rng)
    }

    /// Build using the provided RNG.
    pub fn build_with_rng<R: Rng + ?Sized>(self, rng: &mut R) -> Result<Cnn> {
        let config = self.config();
        Cnn::new_with_rng(config, rng)
    }
}

impl TryFrom<CnnConfig> for CnnBuilder {
    type Error = Error;

    fn try_from(config: CnnConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            input_len: config.input_len,
            activation: config.activation,
            precision: config.precision,
            output: config.output,
            dropout: config.dropout,
        })
    }
}
