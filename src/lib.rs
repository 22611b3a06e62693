//! HE-friendly 1-D CNN: polynomial activations, forward model and portable export.
//!
//! `he-ccfd` trains a small convolutional binary classifier whose inference is meant
//! to run later inside an encrypted-computation engine that only supports additions
//! and multiplications. Three pieces make that possible:
//!
//! - [`fit`]: least-squares fitting of low-degree polynomials to ReLU / Swish over an
//!   operating range (Chebyshev basis, converted to monomials, rescaled).
//! - [`Cnn`]: the fixed conv -> act -> conv -> act -> dense -> act -> dense network,
//!   with the activation chosen once at construction ([`Activation`]).
//! - [`serde_model`]: a versioned JSON artifact holding the activation coefficients
//!   and every parameter under a stable name, at full precision.
//!
//! # Panics vs `Result`
//!
//! - Low-level hot path (panics on misuse): [`Cnn::forward_sample`], [`Cnn::backward`],
//!   [`layer::Conv1d::forward`], [`layer::Dense::forward`]. Shape mismatches are
//!   programmer error.
//! - Everything else validates its inputs and returns [`Result`].
//!
//! # Data layout and shapes
//!
//! - Scalars are `f64`; single precision is emulated by rounding through `f32`.
//! - Model input is a [`Tensor`] of shape `(batch, 1, L)`; output is `(batch, 1)`.
//! - Conv weights are `(out_channels, in_channels, kernel)`, dense weights
//!   `(out_dim, in_dim)`, all row-major.
//!
//! # Quick start
//!
//! ```rust
//! use he_ccfd::{ActivationKind, Cnn, CnnBuilder, Tensor};
//!
//! # fn main() -> he_ccfd::Result<()> {
//! let model = CnnBuilder::new(30)?
//!     .activation(ActivationKind::ApproxReLU)
//!     .build_with_seed(0)?;
//!
//! let x = Tensor::zeros(&[4, 1, 30]);
//! let y = model.forward(&x)?;
//! assert_eq!(y.shape(), &[4, 1]);
//!
//! let json = model.to_json_string()?;
//! let restored = Cnn::from_json_str(&json)?;
//! assert_eq!(restored.forward(&x)?, y);
//! # Ok(())
//! # }
//! ```
//!
//! # Fitting an approximation
//!
//! ```rust
//! use he_ccfd::activation::relu;
//! use he_ccfd::fit::{operating_range_samples, PolynomialFitter};
//!
//! # fn main() -> he_ccfd::Result<()> {
//! let fitter = PolynomialFitter::new(4, [-1.0, 1.0])?.with_scale(30.0)?;
//! let xs = operating_range_samples([-1.0, 1.0], 0)?;
//! let p = fitter.fit_fn(relu, &xs)?;
//! assert_eq!(p.coefficients().len(), 5);
//! # Ok(())
//! # }
//! ```

pub mod activation;
pub mod builder;
pub mod config;
pub mod data;
pub mod error;
pub mod fit;
pub mod layer;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod optim;
pub mod poly;
pub mod serde_model;
pub mod snapshot;
pub mod tensor;
pub mod train;

pub use activation::{Activate, Activation, ActivationKind};
pub use builder::CnnBuilder;
pub use config::ExperimentConfig;
pub use data::Dataset;
pub use error::{Error, Result};
pub use fit::PolynomialFitter;
pub use layer::{Conv1d, Dense};
pub use loss::Loss;
pub use metrics::Confusion;
pub use model::{Cnn, CnnConfig, DropoutRates, Gradients, OutputMode, ParamId, Scratch};
pub use optim::{Optimizer, OptimizerState};
pub use poly::PolynomialCoefficients;
pub use serde_model::Artifact;
pub use snapshot::{BestSnapshot, ModelSnapshot};
pub use tensor::{Precision, Tensor};
pub use train::{EpochReport, EvalReport, FitConfig, FitReport, Shuffle};
