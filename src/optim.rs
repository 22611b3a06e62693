//! Optimizers.
//!
//! Optimizers turn averaged [`Gradients`] into per-parameter deltas and hand them to
//! the model through [`Cnn::apply_update`], the same boundary an external training
//! loop would use.
//!
//! Design notes:
//! - Optimizer *state* (momentum/Adam moments) lives outside the model.
//! - The training loop owns the optimizer state and reuses it across steps.

use serde::{Deserialize, Serialize};

use crate::model::ParamId;
use crate::{Cnn, Error, Gradients, Result, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
/// Optimizer choice for training.
pub enum Optimizer {
    /// Plain SGD.
    Sgd,
    /// SGD with momentum.
    SgdMomentum { momentum: f64 },
    /// Adam (bias-corrected).
    Adam { beta1: f64, beta2: f64, eps: f64 },
}

impl Default for Optimizer {
    fn default() -> Self {
        Optimizer::Adam {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }
}

impl Optimizer {
    /// Validate optimizer hyperparameters.
    pub fn validate(self) -> Result<()> {
        match self {
            Optimizer::Sgd => Ok(()),
            Optimizer::SgdMomentum { momentum } => {
                if !(momentum.is_finite() && (0.0..1.0).contains(&momentum)) {
                    return Err(Error::InvalidConfig(format!(
                        "momentum must be finite and in [0,1), got {momentum}"
                    )));
                }
                Ok(())
            }
            Optimizer::Adam { beta1, beta2, eps } => {
                if !(beta1.is_finite() && (0.0..1.0).contains(&beta1)) {
                    return Err(Error::InvalidConfig(format!(
                        "adam beta1 must be finite and in [0,1), got {beta1}"
                    )));
                }
                if !(beta2.is_finite() && (0.0..1.0).contains(&beta2)) {
                    return Err(Error::InvalidConfig(format!(
                        "adam beta2 must be finite and in [0,1), got {beta2}"
                    )));
                }
                if !(eps.is_finite() && eps > 0.0) {
                    return Err(Error::InvalidConfig(format!(
                        "adam eps must be finite and > 0, got {eps}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Allocate optimizer state for `model`.
    pub fn state(self, model: &Cnn) -> Result<OptimizerState> {
        self.validate()?;

        match self {
            Optimizer::Sgd => Ok(OptimizerState::Sgd),
            Optimizer::SgdMomentum { momentum } => Ok(OptimizerState::SgdMomentum {
                momentum,
                velocity: zeros_like_params(model),
            }),
            Optimizer::Adam { beta1, beta2, eps } => Ok(OptimizerState::Adam {
                beta1,
                beta2,
                eps,
                t: 0,
                beta1_pow: 1.0,
                beta2_pow: 1.0,
                m: zeros_like_params(model),
                v: zeros_like_params(model),
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
/// Owned optimizer state, one moment tensor per parameter in [`ParamId`] order.
pub enum OptimizerState {
    /// Plain SGD (no state).
    #[default]
    Sgd,
    SgdMomentum {
        momentum: f64,
        velocity: Vec<Tensor>,
    },
    Adam {
        beta1: f64,
        beta2: f64,
        eps: f64,
        t: u64,
        beta1_pow: f64,
        beta2_pow: f64,
        m: Vec<Tensor>,
        v: Vec<Tensor>,
    },
}

impl OptimizerState {
    /// Apply one optimizer step: `param -= lr * direction`.
    pub fn step(&mut self, model: &mut Cnn, grads: &Gradients, lr: f64) -> Result<()> {
        if !(lr.is_finite() && lr > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "learning rate must be finite and > 0, got {lr}"
            )));
        }

        match self {
            OptimizerState::Sgd => {
                for id in ParamId::ALL {
                    let delta = grads.get(id).map(|g| -lr * g);
                    model.apply_update(id.name(), &delta)?;
                }
            }
            OptimizerState::SgdMomentum { momentum, velocity } => {
                for id in ParamId::ALL {
                    let vel = &mut velocity[id.index()];
                    for (v, &g) in vel.data_mut().iter_mut().zip(grads.get(id).data()) {
                        *v = *momentum * *v + g;
                    }
                    let delta = vel.map(|v| -lr * v);
                    model.apply_update(id.name(), &delta)?;
                }
            }
            OptimizerState::Adam {
                beta1,
                beta2,
                eps,
                t,
                beta1_pow,
                beta2_pow,
                m,
                v,
            } => {
                *t += 1;
                *beta1_pow *= *beta1;
                *beta2_pow *= *beta2;

                let corr1 = 1.0 - *beta1_pow;
                let corr2 = 1.0 - *beta2_pow;

                for id in ParamId::ALL {
                    let g = grads.get(id);
                    let m = &mut m[id.index()];
                    let v = &mut v[id.index()];
                    let mut delta = g.clone();
                    {
                        let (md, vd) = (m.data_mut(), v.data_mut());
                        for (i, d) in delta.data_mut().iter_mut().enumerate() {
                            let gi = *d;
                            md[i] = *beta1 * md[i] + (1.0 - *beta1) * gi;
                            vd[i] = *beta2 * vd[i] + (1.0 - *beta2) * (gi * gi);

                            let m_hat = md[i] / corr1;
                            let v_hat = vd[i] / corr2;
                            *d = -lr * m_hat / (v_hat.sqrt() + *eps);
                        }
                    }
                    model.apply_update(id.name(), &delta)?;
                }
            }
        }
        Ok(())
    }
}

fn zeros_like_params(model: &Cnn) -> Vec<Tensor> {
    ParamId::ALL
        .iter()
        .map(|&id| Tensor::zeros(model.param(id).shape()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cnn, CnnBuilder};

    fn model_and_unit_grads() -> (Cnn, Gradients) {
        let model = CnnBuilder::new(3).unwrap().build_with_seed(0).unwrap();
        let mut scratch = model.scratch();
        let mut grads = model.gradients();
        model.forward_sample(&[0.0, 0.0, 0.0], &mut scratch);
        // fc2.bias receives d_output unchanged.
        model.backward(&mut scratch, 1.0, &mut grads);
        (model, grads)
    }

    #[test]
    fn optimizer_validation_rejects_bad_hyperparams() {
        assert!(Optimizer::SgdMomentum { momentum: 1.0 }.validate().is_err());
        assert!(Optimizer::SgdMomentum { momentum: -0.1 }.validate().is_err());
        assert!(
            Optimizer::Adam {
                beta1: 1.0,
                beta2: 0.999,
                eps: 1e-8
            }
            .validate()
            .is_err()
        );
        assert!(
            Optimizer::Adam {
                beta1: 0.9,
                beta2: 0.999,
                eps: 0.0
            }
            .validate()
            .is_err()
        );
        assert!(Optimizer::default().validate().is_ok());
    }

    #[test]
    fn sgd_and_momentum_agree_on_first_step() {
        let (model, grads) = model_and_unit_grads();
        let before = model.parameter("fc2.bias").unwrap().data()[0];

        let mut a = model.clone();
        Optimizer::Sgd.state(&a).unwrap().step(&mut a, &grads, 0.1).unwrap();
        let mut b = model.clone();
        Optimizer::SgdMomentum { momentum: 0.9 }
            .state(&b)
            .unwrap()
            .step(&mut b, &grads, 0.1)
            .unwrap();

        assert_eq!(a, b);
        let after = a.parameter("fc2.bias").unwrap().data()[0];
        assert!((after - (before - 0.1)).abs() < 1e-12);
    }

    #[test]
    fn adam_first_step_has_unit_magnitude() {
        let (model, grads) = model_and_unit_grads();
        let before = model.parameter("fc2.bias").unwrap().data()[0];

        let mut m = model.clone();
        let mut opt = Optimizer::Adam {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1.0,
        }
        .state(&m)
        .unwrap();
        opt.step(&mut m, &grads, 0.1).unwrap();

        // Bias-corrected first step with unit grad: 1 / (1 + eps) = 0.5.
        let after = m.parameter("fc2.bias").unwrap().data()[0];
        assert!((after - (before - 0.05)).abs() < 1e-12);
    }

    #[test]
    fn step_rejects_bad_learning_rate() {
        let (mut model, grads) = model_and_unit_grads();
        let mut opt = Optimizer::Sgd.state(&model).unwrap();
        assert!(opt.step(&mut model, &grads, 0.0).is_err());
        assert!(opt.step(&mut model, &grads, f64::NAN).is_err());
    }
}
