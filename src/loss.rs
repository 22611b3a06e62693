//! Loss functions for binary classification.
//!
//! These are small, allocation-free helpers intended to be used like:
//!
//! - run `model.forward_sample(...)` for each sample of a batch
//! - compute `d_output` via a loss (e.g. `bce_with_logits_backward`)
//! - run `model.backward(...)` per sample
//! - update parameters with an optimizer

use serde::{Deserialize, Serialize};

use crate::activation::sigmoid;
use crate::model::OutputMode;
use crate::{Error, Result};

/// Probabilities are clamped to `[PROB_EPS, 1 - PROB_EPS]` before taking logs.
pub const PROB_EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
/// Supported loss functions.
pub enum Loss {
    /// Binary cross-entropy on raw logits. Requires [`OutputMode::Logits`].
    ///
    /// Positive targets are weighted by `pos_weight` (1 is the plain loss).
    BceWithLogits {
        #[serde(default = "unit_weight")]
        pos_weight: f64,
    },
    /// Binary cross-entropy on probabilities. Requires [`OutputMode::Probability`].
    Bce,
    /// Mean squared error on the model output.
    Mse,
}

impl Default for Loss {
    fn default() -> Self {
        Loss::BceWithLogits { pos_weight: 1.0 }
    }
}

fn unit_weight() -> f64 {
    1.0
}

impl Loss {
    pub fn validate(self) -> Result<()> {
        if let Loss::BceWithLogits { pos_weight } = self {
            if !(pos_weight.is_finite() && pos_weight > 0.0) {
                return Err(Error::InvalidConfig(format!(
                    "pos_weight must be finite and > 0, got {pos_weight}"
                )));
            }
        }
        Ok(())
    }

    /// Check that this loss is meaningful for a model emitting `output`.
    pub fn validate_for(self, output: OutputMode) -> Result<()> {
        match (self, output) {
            (Loss::BceWithLogits { .. }, OutputMode::Probability) => Err(Error::InvalidConfig(
                "bce_with_logits expects a model with logits output".to_owned(),
            )),
            (Loss::Bce, OutputMode::Logits) => Err(Error::InvalidConfig(
                "bce expects a model with probability output".to_owned(),
            )),
            _ => Ok(()),
        }
    }

    /// Compute a loss value (mean over elements).
    ///
    /// Shape contract: `pred.len() == target.len()`.
    #[inline]
    pub fn forward(self, pred: &[f64], target: &[f64]) -> f64 {
        match self {
            Loss::BceWithLogits { pos_weight } => bce_with_logits(pred, target, pos_weight),
            Loss::Bce => bce(pred, target),
            Loss::Mse => mse(pred, target),
        }
    }

    /// Compute loss + gradient w.r.t `pred`.
    ///
    /// Writes `d_pred = dL/d(pred)` into `d_pred` and returns the loss.
    #[inline]
    pub fn backward(self, pred: &[f64], target: &[f64], d_pred: &mut [f64]) -> f64 {
        match self {
            Loss::BceWithLogits { pos_weight } => {
                bce_with_logits_backward(pred, target, pos_weight, d_pred)
            }
            Loss::Bce => bce_backward(pred, target, d_pred),
            Loss::Mse => mse_backward(pred, target, d_pred),
        }
    }
}

fn check_lens(pred: &[f64], target: &[f64]) {
    assert_eq!(
        pred.len(),
        target.len(),
        "pred len {} does not match target len {}",
        pred.len(),
        target.len()
    );
}

fn check_grad_len(pred: &[f64], d_pred: &[f64]) {
    assert_eq!(
        pred.len(),
        d_pred.len(),
        "pred len {} does not match d_pred len {}",
        pred.len(),
        d_pred.len()
    );
}

/// Mean squared error (MSE) loss.
///
/// Returns `0.5 * mean((pred - target)^2)`.
#[inline]
pub fn mse(pred: &[f64], target: &[f64]) -> f64 {
    check_lens(pred, target);
    if pred.is_empty() {
        return 0.0;
    }

    let inv_n = 1.0 / pred.len() as f64;
    let mut sum_sq = 0.0;
    for (&p, &t) in pred.iter().zip(target) {
        let diff = p - t;
        sum_sq += diff * diff;
    }
    0.5 * sum_sq * inv_n
}

/// MSE loss + gradient: `d_pred[i] = (pred[i] - target[i]) / N`.
#[inline]
pub fn mse_backward(pred: &[f64], target: &[f64], d_pred: &mut [f64]) -> f64 {
    check_lens(pred, target);
    check_grad_len(pred, d_pred);
    if pred.is_empty() {
        return 0.0;
    }

    let inv_n = 1.0 / pred.len() as f64;
    let mut sum_sq = 0.0;
    for i in 0..pred.len() {
        let diff = pred[i] - target[i];
        sum_sq += diff * diff;
        d_pred[i] = diff * inv_n;
    }
    0.5 * sum_sq * inv_n
}

/// Binary cross-entropy loss with logits.
///
/// Per element (with `t` in [0,1] and `w = pos_weight`):
///
/// - `L = w * t * softplus(-x) + (1 - t) * softplus(x)`
///
/// `softplus` is evaluated as `max(x, 0) + ln(1 + exp(-|x|))`, which is stable for
/// large |x|.
#[inline]
pub fn bce_with_logits(logits: &[f64], target: &[f64], pos_weight: f64) -> f64 {
    check_lens(logits, target);
    if logits.is_empty() {
        return 0.0;
    }

    let inv_n = 1.0 / logits.len() as f64;
    let mut sum = 0.0;
    for (&x, &t) in logits.iter().zip(target) {
        sum += bce_with_logits_term(x, t, pos_weight);
    }
    sum * inv_n
}

/// BCE-with-logits loss + gradient:
/// `dL/dx = ((1 - t) * sigmoid(x) - w * t * (1 - sigmoid(x))) / N`.
///
/// With `w = 1` this is `(sigmoid(x) - t) / N`.
#[inline]
pub fn bce_with_logits_backward(
    logits: &[f64],
    target: &[f64],
    pos_weight: f64,
    d_logits: &mut [f64],
) -> f64 {
    check_lens(logits, target);
    check_grad_len(logits, d_logits);
    if logits.is_empty() {
        return 0.0;
    }

    let inv_n = 1.0 / logits.len() as f64;
    let mut sum = 0.0;
    for i in 0..logits.len() {
        let (x, t) = (logits[i], target[i]);
        sum += bce_with_logits_term(x, t, pos_weight);
        let s = sigmoid(x);
        d_logits[i] = ((1.0 - t) * s - pos_weight * t * (1.0 - s)) * inv_n;
    }
    sum * inv_n
}

#[inline]
fn softplus(x: f64) -> f64 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

#[inline]
fn bce_with_logits_term(x: f64, t: f64, pos_weight: f64) -> f64 {
    // softplus(-x) = softplus(x) - x
    let sp = softplus(x);
    pos_weight * t * (sp - x) + (1.0 - t) * sp
}

/// Binary cross-entropy on probabilities: `-(t ln p + (1 - t) ln(1 - p))`, averaged.
#[inline]
pub fn bce(probs: &[f64], target: &[f64]) -> f64 {
    check_lens(probs, target);
    if probs.is_empty() {
        return 0.0;
    }

    let inv_n = 1.0 / probs.len() as f64;
    let mut sum = 0.0;
    for (&p, &t) in probs.iter().zip(target) {
        sum += bce_term(clamp_prob(p), t);
    }
    sum * inv_n
}

/// BCE loss + gradient: `dL/dp = (p - t) / (p (1 - p)) / N` on the clamped `p`.
#[inline]
pub fn bce_backward(probs: &[f64], target: &[f64], d_probs: &mut [f64]) -> f64 {
    check_lens(probs, target);
    check_grad_len(probs, d_probs);
    if probs.is_empty() {
        return 0.0;
    }

    let inv_n = 1.0 / probs.len() as f64;
    let mut sum = 0.0;
    for i in 0..probs.len() {
        let (p, t) = (clamp_prob(probs[i]), target[i]);
        sum += bce_term(p, t);
        d_probs[i] = (p - t) / (p * (1.0 - p)) * inv_n;
    }
    sum * inv_n
}

#[inline]
fn clamp_prob(p: f64) -> f64 {
    p.clamp(PROB_EPS, 1.0 - PROB_EPS)
}

#[inline]
fn bce_term(p: f64, t: f64) -> f64 {
    -(t * p.ln() + (1.0 - t) * (1.0 - p).ln())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mse_backward_matches_expected_gradient() {
        let pred = [1.0, 3.0];
        let target = [2.0, 1.0];
        let mut d_pred = [0.0; 2];
        let loss = mse_backward(&pred, &target, &mut d_pred);

        // L = 0.5 * mean([(-1)^2, (2)^2]) = 1.25
        assert!((loss - 1.25).abs() < 1e-12);
        assert_eq!(d_pred, [-0.5, 1.0]);
        assert_eq!(mse(&pred, &pred), 0.0);
    }

    #[test]
    fn bce_with_logits_is_reasonable_for_extreme_logits() {
        let loss = bce_with_logits(&[100.0, -100.0], &[1.0, 0.0], 1.0);
        assert!(loss.is_finite());
        assert!(loss < 1e-3);

        let bad = bce_with_logits(&[-100.0], &[1.0], 1.0);
        assert!((bad - 100.0).abs() < 1e-9);
    }

    #[test]
    fn bce_with_logits_backward_matches_sigmoid_minus_target() {
        let mut d = [0.0];
        let loss = bce_with_logits_backward(&[0.0], &[1.0], 1.0, &mut d);
        assert!((loss - std::f64::consts::LN_2).abs() < 1e-12);
        assert!((d[0] - (-0.5)).abs() < 1e-12);

        let mut d = [0.0];
        bce_with_logits_backward(&[1.3], &[0.0], 1.0, &mut d);
        assert!((d[0] - sigmoid(1.3)).abs() < 1e-12);
    }

    #[test]
    fn pos_weight_scales_positive_terms() {
        use std::f64::consts::LN_2;

        // At x = 0: positive term 2 * ln 2, negative term ln 2.
        let mut d = [0.0; 2];
        let loss = bce_with_logits_backward(&[0.0, 0.0], &[1.0, 0.0], 2.0, &mut d);
        assert!((loss - 1.5 * LN_2).abs() < 1e-12);
        assert!((d[0] - (-0.5)).abs() < 1e-12);
        assert!((d[1] - 0.25).abs() < 1e-12);

        // Large logits stay finite and match the asymptote w * |x|.
        let far = bce_with_logits(&[-50.0], &[1.0], 2.0);
        assert!((far - 100.0).abs() < 1e-9);

        let loss = Loss::BceWithLogits { pos_weight: 2.0 };
        assert!((loss.forward(&[0.0], &[0.0]) - LN_2).abs() < 1e-12);
        assert!(loss.validate().is_ok());
        assert!(Loss::BceWithLogits { pos_weight: 0.0 }.validate().is_err());
        assert!(Loss::BceWithLogits { pos_weight: f64::NAN }.validate().is_err());
    }

    #[test]
    fn weighted_gradient_matches_central_difference() {
        let (x, t, w) = (0.7, 1.0, 2.0);
        let mut d = [0.0];
        bce_with_logits_backward(&[x], &[t], w, &mut d);
        let h = 1e-6;
        let numeric =
            (bce_with_logits(&[x + h], &[t], w) - bce_with_logits(&[x - h], &[t], w)) / (2.0 * h);
        assert!((d[0] - numeric).abs() < 1e-8, "{} vs {numeric}", d[0]);
    }

    #[test]
    fn loss_config_form_is_tagged() {
        let loss: Loss =
            serde_json::from_str(r#"{"kind": "bce_with_logits", "pos_weight": 2.0}"#).unwrap();
        assert_eq!(loss, Loss::BceWithLogits { pos_weight: 2.0 });
        let loss: Loss = serde_json::from_str(r#"{"kind": "bce_with_logits"}"#).unwrap();
        assert_eq!(loss, Loss::default());
        let loss: Loss = serde_json::from_str(r#"{"kind": "mse"}"#).unwrap();
        assert_eq!(loss, Loss::Mse);
    }

    #[test]
    fn bce_agrees_with_logit_form() {
        for &(x, t) in &[(0.3, 1.0), (-1.7, 0.0), (2.2, 0.0)] {
            let p = sigmoid(x);
            let a = bce(&[p], &[t]);
            let b = bce_with_logits(&[x], &[t], 1.0);
            assert!((a - b).abs() < 1e-9, "x={x} t={t}: {a} vs {b}");

            let mut d = [0.0];
            bce_backward(&[p], &[t], &mut d);
            // Chain rule through the sigmoid recovers the logit gradient.
            assert!((d[0] * p * (1.0 - p) - (p - t)).abs() < 1e-9);
        }
        assert!(bce(&[0.0], &[1.0]).is_finite());
    }

    #[test]
    fn loss_must_match_output_mode() {
        assert!(Loss::default().validate_for(OutputMode::Logits).is_ok());
        assert!(Loss::default().validate_for(OutputMode::Probability).is_err());
        assert!(Loss::Bce.validate_for(OutputMode::Logits).is_err());
        assert!(Loss::Bce.validate_for(OutputMode::Probability).is_ok());
        assert!(Loss::Mse.validate_for(OutputMode::Probability).is_ok());
    }
}
