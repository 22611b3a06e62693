//! Activation functions.
//!
//! A layer computes a pre-activation value `z` and the model applies an activation
//! element-wise: `y = activation(z)`.
//!
//! The variant is chosen once, when a model is built, and stored as a resolved
//! [`Activation`]. Polynomial variants carry their coefficients so the exact same
//! numbers are used for training, evaluation and export.
//!
//! `ApproxReLU`, `ApproxSwish` and `Square` only use additions and multiplications
//! and are therefore evaluable under homomorphic encryption.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, PolynomialCoefficients, Result, Tensor};

/// Name of an activation variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivationKind {
    ReLU,
    ApproxReLU,
    Swish,
    ApproxSwish,
    Square,
}

impl ActivationKind {
    pub const ALL: [ActivationKind; 5] = [
        ActivationKind::ReLU,
        ActivationKind::ApproxReLU,
        ActivationKind::Swish,
        ActivationKind::ApproxSwish,
        ActivationKind::Square,
    ];

    /// Canonical name, as written in artifacts and configs.
    pub fn name(self) -> &'static str {
        match self {
            ActivationKind::ReLU => "ReLU",
            ActivationKind::ApproxReLU => "ApproxReLU",
            ActivationKind::Swish => "Swish",
            ActivationKind::ApproxSwish => "ApproxSwish",
            ActivationKind::Square => "Square",
        }
    }

    /// True for the variants backed by a fitted polynomial.
    pub fn is_approximated(self) -> bool {
        matches!(self, ActivationKind::ApproxReLU | ActivationKind::ApproxSwish)
    }
}

impl fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ActivationKind {
    type Err = Error;

    /// Case-insensitive; `_` and `-` are ignored (`approx_relu` == `ApproxReLU`).
    fn from_str(s: &str) -> Result<Self> {
        let key: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        ActivationKind::ALL
            .into_iter()
            .find(|k| k.name().to_ascii_lowercase() == key)
            .ok_or_else(|| {
                Error::InvalidActivation(format!(
                    "unknown activation {s:?}; expected one of ReLU, ApproxReLU, Swish, ApproxSwish, Square"
                ))
            })
    }
}

impl Serialize for ActivationKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for ActivationKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Element-wise evaluation capability shared by every activation variant.
pub trait Activate {
    fn eval(&self, x: f64) -> f64;

    /// `d eval / dx` at `x`.
    fn derivative(&self, x: f64) -> f64;

    fn eval_tensor(&self, t: &Tensor) -> Tensor {
        t.map(|v| self.eval(v))
    }
}

impl Activate for PolynomialCoefficients {
    #[inline]
    fn eval(&self, x: f64) -> f64 {
        PolynomialCoefficients::eval(self, x)
    }

    #[inline]
    fn derivative(&self, x: f64) -> f64 {
        PolynomialCoefficients::derivative(self, x)
    }
}

/// Resolved activation variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Activation {
    ReLU,
    ApproxReLU(PolynomialCoefficients),
    Swish,
    ApproxSwish(PolynomialCoefficients),
    Square,
}

impl Activation {
    /// Resolve a kind, using the built-in quartic coefficients for approximations.
    pub fn from_kind(kind: ActivationKind) -> Self {
        match kind {
            ActivationKind::ReLU => Activation::ReLU,
            ActivationKind::ApproxReLU => {
                Activation::ApproxReLU(PolynomialCoefficients::relu_quartic())
            }
            ActivationKind::Swish => Activation::Swish,
            ActivationKind::ApproxSwish => {
                Activation::ApproxSwish(PolynomialCoefficients::swish_quartic())
            }
            ActivationKind::Square => Activation::Square,
        }
    }

    /// An approximated variant with caller-supplied coefficients.
    pub fn approximated(kind: ActivationKind, coefficients: PolynomialCoefficients) -> Result<Self> {
        match kind {
            ActivationKind::ApproxReLU => Ok(Activation::ApproxReLU(coefficients)),
            ActivationKind::ApproxSwish => Ok(Activation::ApproxSwish(coefficients)),
            other => Err(Error::InvalidActivation(format!(
                "{other} is not a polynomial approximation and takes no coefficients"
            ))),
        }
    }

    pub fn kind(&self) -> ActivationKind {
        match self {
            Activation::ReLU => ActivationKind::ReLU,
            Activation::ApproxReLU(_) => ActivationKind::ApproxReLU,
            Activation::Swish => ActivationKind::Swish,
            Activation::ApproxSwish(_) => ActivationKind::ApproxSwish,
            Activation::Square => ActivationKind::Square,
        }
    }

    pub fn coefficients(&self) -> Option<&PolynomialCoefficients> {
        match self {
            Activation::ApproxReLU(p) | Activation::ApproxSwish(p) => Some(p),
            Activation::ReLU | Activation::Swish | Activation::Square => None,
        }
    }

    /// True if evaluation uses only additions and multiplications.
    pub fn is_he_compatible(&self) -> bool {
        !matches!(self, Activation::ReLU | Activation::Swish)
    }
}

impl From<ActivationKind> for Activation {
    fn from(kind: ActivationKind) -> Self {
        Activation::from_kind(kind)
    }
}

impl Activate for Activation {
    #[inline]
    fn eval(&self, x: f64) -> f64 {
        match self {
            Activation::ReLU => relu(x),
            Activation::ApproxReLU(p) | Activation::ApproxSwish(p) => p.eval(x),
            Activation::Swish => swish(x),
            Activation::Square => x * x,
        }
    }

    #[inline]
    fn derivative(&self, x: f64) -> f64 {
        match self {
            Activation::ReLU => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::ApproxReLU(p) | Activation::ApproxSwish(p) => p.derivative(x),
            Activation::Swish => {
                let s = sigmoid(x);
                s + x * s * (1.0 - s)
            }
            Activation::Square => 2.0 * x,
        }
    }
}

#[inline]
pub fn relu(x: f64) -> f64 {
    if x > 0.0 { x } else { 0.0 }
}

/// `x * sigmoid(x)`.
#[inline]
pub fn swish(x: f64) -> f64 {
    x * sigmoid(x)
}

#[inline]
pub fn sigmoid(x: f64) -> f64 {
    // Numerically stable sigmoid.
    if x >= 0.0 {
        let z = (-x).exp();
        1.0 / (1.0 + z)
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}
