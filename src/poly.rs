//! Polynomial coefficient vectors.
//!
//! A fitted activation polynomial is stored on the normalized domain together with
//! the scale it was fitted for. Evaluation is
//!
//! ```text
//! eval(x) = scale * p(x / scale),   p(t) = c0 + c1 t + ... + cd t^d
//! ```
//!
//! with `p` evaluated by Horner's method using plain multiply-then-add (never a
//! fused multiply-add), so any runtime following the same recipe reproduces the
//! values bit for bit. The equivalent raw-domain monomial coefficients are
//! `a_k = c_k / scale^(k-1)` (see [`PolynomialCoefficients::to_monomial`]); that is
//! the form an encrypted evaluator consumes.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Coefficients `[c0, c1, ..., cd]` of a polynomial plus its input scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolynomialCoefficients {
    coefficients: Vec<f64>,
    scale: f64,
}

impl PolynomialCoefficients {
    /// Validate and build a coefficient vector.
    ///
    /// Requires degree >= 1 (at least two coefficients), finite coefficients and a
    /// finite, positive scale.
    pub fn new(coefficients: Vec<f64>, scale: f64) -> Result<Self> {
        if coefficients.len() < 2 {
            return Err(Error::InvalidConfig(format!(
                "polynomial degree must be >= 1, got {} coefficient(s)",
                coefficients.len()
            )));
        }
        if let Some(i) = coefficients.iter().position(|c| !c.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "coefficient {i} is not finite: {}",
                coefficients[i]
            )));
        }
        if !(scale.is_finite() && scale > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "polynomial scale must be finite and > 0, got {scale}"
            )));
        }
        Ok(Self {
            coefficients,
            scale,
        })
    }

    /// Quartic ReLU approximation fitted on [-1, 1] and used at scale 30.
    pub fn relu_quartic() -> Self {
        Self {
            coefficients: vec![0.0243987, 0.49096448, 1.08571579, 0.01212056, -0.69068458],
            scale: 30.0,
        }
    }

    /// Quartic Swish approximation in raw-domain form (scale 1).
    pub fn swish_quartic() -> Self {
        Self {
            coefficients: vec![0.1198, 0.5, 0.1473, 0.0, -0.002012],
            scale: 1.0,
        }
    }

    #[inline]
    pub fn degree(&self) -> usize {
        self.coefficients.len() - 1
    }

    /// Normalized-domain coefficients, lowest order first.
    #[inline]
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    #[inline]
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Same polynomial, evaluated for a different input scale.
    pub fn with_scale(self, scale: f64) -> Result<Self> {
        Self::new(self.coefficients, scale)
    }

    /// `scale * p(x / scale)` via Horner's method.
    #[inline]
    pub fn eval(&self, x: f64) -> f64 {
        self.scale * horner(&self.coefficients, x / self.scale)
    }

    /// Derivative of [`eval`](Self::eval) with respect to `x`, i.e. `p'(x / scale)`.
    pub fn derivative(&self, x: f64) -> f64 {
        let t = x / self.scale;
        let d = self.coefficients.len() - 1;
        let mut acc = d as f64 * self.coefficients[d];
        for k in (1..d).rev() {
            acc = acc * t + k as f64 * self.coefficients[k];
        }
        acc
    }

    /// Term-by-term summation `scale * sum(c_k * t^k)`.
    ///
    /// Slower and less stable than [`eval`](Self::eval); kept as a reference.
    pub fn eval_direct(&self, x: f64) -> f64 {
        let t = x / self.scale;
        let mut sum = 0.0;
        for (k, &c) in self.coefficients.iter().enumerate() {
            sum += c * t.powi(k as i32);
        }
        self.scale * sum
    }

    /// Raw-domain monomial coefficients `a_k = c_k / scale^(k-1)`.
    pub fn to_monomial(&self) -> Vec<f64> {
        self.coefficients
            .iter()
            .enumerate()
            .map(|(k, &c)| c * self.scale.powi(1 - k as i32))
            .collect()
    }
}

/// Horner evaluation of `c0 + c1 x + ... + cd x^d`, `d` multiplications.
///
/// Panics if `coefficients` is empty.
#[inline]
pub fn horner(coefficients: &[f64], x: f64) -> f64 {
    let (&last, rest) = coefficients
        .split_last()
        .expect("polynomial must have at least one coefficient");
    rest.iter().rev().fold(last, |acc, &c| acc * x + c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_bad_inputs() {
        assert!(PolynomialCoefficients::new(vec![1.0], 1.0).is_err());
        assert!(PolynomialCoefficients::new(vec![1.0, f64::NAN], 1.0).is_err());
        assert!(PolynomialCoefficients::new(vec![1.0, 2.0], 0.0).is_err());
        assert!(PolynomialCoefficients::new(vec![1.0, 2.0], f64::INFINITY).is_err());
        assert!(PolynomialCoefficients::new(vec![1.0, 2.0], 2.0).is_ok());
    }

    #[test]
    fn horner_matches_hand_computation() {
        // 1 + 2x + 3x^2 at x = 2 -> 1 + 4 + 12
        assert_eq!(horner(&[1.0, 2.0, 3.0], 2.0), 17.0);
        assert_eq!(horner(&[5.0], 123.0), 5.0);
    }

    #[test]
    fn monomial_form_agrees_with_scaled_eval() {
        let p = PolynomialCoefficients::relu_quartic();
        let mono = p.to_monomial();
        assert_eq!(mono.len(), 5);
        // a0 = c0 * scale, a1 = c1
        assert!((mono[0] - 0.0243987 * 30.0).abs() < 1e-12);
        assert_eq!(mono[1], 0.49096448);
        for &x in &[-30.0, -7.5, 0.0, 1.0, 12.0, 29.0] {
            let a = p.eval(x);
            let b = horner(&mono, x);
            assert!((a - b).abs() < 1e-9 * a.abs().max(1.0), "x={x}: {a} vs {b}");
        }
    }

    #[test]
    fn relu_preset_tracks_relu_on_scaled_range() {
        let p = PolynomialCoefficients::relu_quartic();
        assert!((p.eval(15.0) - 15.0).abs() < 1.5);
        assert!(p.eval(-15.0).abs() < 1.5);
        assert!(p.eval(0.0).abs() < 1.0);
    }

    #[test]
    fn swish_preset_matches_raw_quartic() {
        let p = PolynomialCoefficients::swish_quartic();
        assert_eq!(p.to_monomial(), p.coefficients());
        let x: f64 = 2.0;
        let expected = 0.1198 + 0.5 * x + 0.1473 * x * x - 0.002012 * x.powi(4);
        assert!((p.eval(x) - expected).abs() < 1e-12);
    }

    #[test]
    fn derivative_matches_finite_difference() {
        let p = PolynomialCoefficients::relu_quartic();
        let h = 1e-5;
        for &x in &[-20.0, -1.0, 0.5, 10.0] {
            let numeric = (p.eval(x + h) - p.eval(x - h)) / (2.0 * h);
            assert!((p.derivative(x) - numeric).abs() < 1e-6, "x={x}");
        }
    }
}
