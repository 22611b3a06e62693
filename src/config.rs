//! Experiment configuration.
//!
//! One JSON document describes the activation approximation, the model and the
//! training run. Every field has a default, so `{}` is a valid configuration:
//!
//! ```json
//! {
//!   "approximation": { "degree": 4, "domain": [-1.0, 1.0], "scale": 30.0, "source": "preset" },
//!   "model": { "input_len": 30, "activation": "ApproxReLU", "precision": "double", "output": "logits" },
//!   "training": {
//!     "epochs": 30, "lr": 0.0001, "batch_size": 32,
//!     "loss": { "kind": "bce_with_logits", "pos_weight": 2.0 }
//!   }
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::activation::{relu, swish};
use crate::fit::{PolynomialFitter, operating_range_samples};
use crate::model::{DropoutRates, OutputMode};
use crate::train::{FitConfig, Shuffle};
use crate::{
    Activation, ActivationKind, CnnBuilder, Error, Loss, Optimizer, PolynomialCoefficients,
    Precision, Result,
};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub approximation: ApproximationConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
}

/// Where the coefficients of an approximated activation come from.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoefficientSource {
    /// The built-in quartic for the chosen activation.
    #[default]
    Preset,
    /// Fit on the operating-range samples with the configured degree, domain and scale.
    Fit,
    /// Explicit normalized-domain coefficients, evaluated at the configured scale.
    Custom(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApproximationConfig {
    pub degree: usize,
    pub domain: [f64; 2],
    pub scale: f64,
    pub source: CoefficientSource,
    /// Seed for the operating-range sampler.
    pub sample_seed: u64,
}

impl Default for ApproximationConfig {
    fn default() -> Self {
        Self {
            degree: 4,
            domain: [-1.0, 1.0],
            scale: 30.0,
            source: CoefficientSource::Preset,
            sample_seed: 0,
        }
    }
}

impl ApproximationConfig {
    pub fn fitter(&self) -> Result<PolynomialFitter> {
        PolynomialFitter::new(self.degree, self.domain)?.with_scale(self.scale)
    }

    /// Fit the approximation of `kind`'s exact counterpart.
    ///
    /// Returns `InvalidActivation` for kinds that are not approximations.
    pub fn fit(&self, kind: ActivationKind) -> Result<PolynomialCoefficients> {
        let target: fn(f64) -> f64 = match kind {
            ActivationKind::ApproxReLU => relu,
            ActivationKind::ApproxSwish => swish,
            other => {
                return Err(Error::InvalidActivation(format!(
                    "{other} is not a polynomial approximation"
                )));
            }
        };
        let xs = operating_range_samples(self.domain, self.sample_seed)?;
        self.fitter()?.fit_fn(target, &xs)
    }

    /// Resolve the activation for `kind` according to [`Self::source`].
    pub fn resolve(&self, kind: ActivationKind) -> Result<Activation> {
        if !kind.is_approximated() {
            return Ok(Activation::from_kind(kind));
        }
        match &self.source {
            CoefficientSource::Preset => Ok(Activation::from_kind(kind)),
            CoefficientSource::Fit => Activation::approximated(kind, self.fit(kind)?),
            CoefficientSource::Custom(coefficients) => Activation::approximated(
                kind,
                PolynomialCoefficients::new(coefficients.clone(), self.scale)?,
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub input_len: usize,
    pub activation: ActivationKind,
    pub precision: Precision,
    pub output: OutputMode,
    pub dropout: DropoutRates,
    /// Seed for parameter initialization.
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            input_len: 30,
            activation: ActivationKind::ApproxReLU,
            precision: Precision::Double,
            output: OutputMode::Logits,
            dropout: DropoutRates::default(),
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub lr: f64,
    pub batch_size: usize,
    /// `None` keeps dataset order.
    pub shuffle_seed: Option<u64>,
    pub optimizer: Optimizer,
    pub loss: Loss,
    pub dropout_seed: u64,
    /// Share of the training data held out for model selection.
    pub validation_fraction: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        let fit = FitConfig::default();
        Self {
            epochs: fit.epochs,
            lr: fit.lr,
            batch_size: fit.batch_size,
            shuffle_seed: Some(0),
            optimizer: fit.optimizer,
            loss: fit.loss,
            dropout_seed: fit.dropout_seed,
            validation_fraction: 0.2,
        }
    }
}

impl TrainingConfig {
    pub fn fit_config(&self) -> FitConfig {
        FitConfig {
            epochs: self.epochs,
            lr: self.lr,
            batch_size: self.batch_size,
            shuffle: self.shuffle_seed.map_or(Shuffle::None, Shuffle::Seeded),
            optimizer: self.optimizer,
            loss: self.loss,
            dropout_seed: self.dropout_seed,
        }
    }
}

impl ExperimentConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(s)
            .map_err(|e| Error::InvalidConfig(format!("failed to parse config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let s = std::fs::read_to_string(p).map_err(|e| Error::io(p, e))?;
        let cfg = Self::from_json_str(&s)?;
        log::debug!("loaded config from {}", p.display());
        Ok(cfg)
    }

    /// Check everything that can be checked without data.
    pub fn validate(&self) -> Result<()> {
        self.approximation.fitter()?;
        if let CoefficientSource::Custom(c) = &self.approximation.source {
            PolynomialCoefficients::new(c.clone(), self.approximation.scale)?;
        }
        self.model.dropout.validate()?;
        let fit = self.training.fit_config();
        fit.validate()?;
        fit.loss.validate_for(self.model.output)?;
        let f = self.training.validation_fraction;
        if !(f.is_finite() && (0.0..1.0).contains(&f)) {
            return Err(Error::InvalidConfig(format!(
                "validation_fraction must be in [0, 1), got {f}"
            )));
        }
        Ok(())
    }

    /// Builder for the configured model (fits coefficients if configured to).
    pub fn builder(&self) -> Result<CnnBuilder> {
        let activation = self.approximation.resolve(self.model.activation)?;
        let builder = CnnBuilder::new(self.model.input_len)?
            .precision(self.model.precision)
            .output(self.model.output)
            .dropout(self.model.dropout)?;
        Ok(match activation.coefficients() {
            Some(coefficients) => builder.approximation(activation.kind(), coefficients.clone())?,
            None => builder.activation(activation.kind()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let cfg = ExperimentConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg, ExperimentConfig::default());
        assert_eq!(cfg.approximation.degree, 4);
        assert_eq!(cfg.approximation.domain, [-1.0, 1.0]);
        assert_eq!(cfg.approximation.scale, 30.0);
        assert_eq!(cfg.model.input_len, 30);
        assert_eq!(cfg.model.activation, ActivationKind::ApproxReLU);
        assert_eq!(cfg.training.epochs, 30);
        assert_eq!(cfg.training.lr, 1e-4);
        assert_eq!(cfg.training.batch_size, 32);
        assert_eq!(cfg.training.loss, Loss::BceWithLogits { pos_weight: 1.0 });
        assert_eq!(
            cfg.training.optimizer,
            Optimizer::Adam {
                beta1: 0.9,
                beta2: 0.999,
                eps: 1e-8
            }
        );
    }

    #[test]
    fn partial_documents_override_fields() {
        let cfg = ExperimentConfig::from_json_str(
            r#"{
                "model": {"input_len": 12, "activation": "approx_swish", "precision": "single"},
                "training": {"optimizer": {"kind": "sgd"}, "shuffle_seed": null}
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.model.input_len, 12);
        assert_eq!(cfg.model.activation, ActivationKind::ApproxSwish);
        assert_eq!(cfg.model.precision, Precision::Single);
        assert_eq!(cfg.model.output, OutputMode::Logits);
        assert_eq!(cfg.training.optimizer, Optimizer::Sgd);
        assert_eq!(cfg.training.fit_config().shuffle, Shuffle::None);
        assert_eq!(cfg.training.epochs, 30);
    }

    #[test]
    fn pos_weight_reaches_the_fit_config() {
        let cfg = ExperimentConfig::from_json_str(
            r#"{"training": {"loss": {"kind": "bce_with_logits", "pos_weight": 2.0}}}"#,
        )
        .unwrap();
        assert_eq!(
            cfg.training.fit_config().loss,
            Loss::BceWithLogits { pos_weight: 2.0 }
        );
    }

    #[test]
    fn invalid_documents_are_rejected() {
        for doc in [
            r#"{"model": {"activation": "gelu"}}"#,
            r#"{"approximation": {"degree": 0}}"#,
            r#"{"approximation": {"domain": [1.0, -1.0]}}"#,
            r#"{"training": {"batch_size": 0}}"#,
            r#"{"training": {"loss": {"kind": "bce"}}}"#,
            r#"{"training": {"loss": {"kind": "bce_with_logits", "pos_weight": -1.0}}}"#,
            r#"{"training": {"validation_fraction": 1.0}}"#,
            r#"{"approximation": {"source": {"custom": [1.0]}}}"#,
        ] {
            assert!(ExperimentConfig::from_json_str(doc).is_err(), "{doc}");
        }
    }

    #[test]
    fn builder_uses_configured_coefficients() {
        let mut cfg = ExperimentConfig::default();
        cfg.model.input_len = 5;
        cfg.approximation.source = CoefficientSource::Custom(vec![0.0, 0.5, 0.5]);
        let model = cfg.builder().unwrap().build_with_seed(0).unwrap();
        let coeffs = model.activation().coefficients().unwrap();
        assert_eq!(coeffs.coefficients(), &[0.0, 0.5, 0.5]);
        assert_eq!(coeffs.scale(), 30.0);

        cfg.model.activation = ActivationKind::Square;
        let model = cfg.builder().unwrap().build_with_seed(0).unwrap();
        assert_eq!(model.activation(), &Activation::Square);
    }

    #[test]
    fn fit_source_produces_a_usable_relu_approximation() {
        let cfg = ApproximationConfig {
            source: CoefficientSource::Fit,
            ..ApproximationConfig::default()
        };
        let act = cfg.resolve(ActivationKind::ApproxReLU).unwrap();
        let p = act.coefficients().unwrap();
        assert_eq!(p.degree(), 4);
        assert_eq!(p.scale(), 30.0);
        // Near the operating point the fit tracks ReLU at the scaled range.
        assert!((p.eval(15.0) - 15.0).abs() < 1.5);
        assert!(p.eval(-15.0).abs() < 1.5);

        assert!(cfg.fit(ActivationKind::Square).is_err());
    }
}
