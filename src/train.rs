//! Mini-batch training with best-epoch selection.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::metrics::Confusion;
use crate::snapshot::{BestSnapshot, ModelSnapshot};
use crate::{Cnn, Dataset, Error, Loss, Optimizer, Result};

/// Sample order within each epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shuffle {
    /// Dataset order.
    None,
    /// Reshuffled every epoch from a seeded RNG.
    Seeded(u64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitConfig {
    pub epochs: usize,
    pub lr: f64,
    pub batch_size: usize,
    pub shuffle: Shuffle,
    pub optimizer: Optimizer,
    pub loss: Loss,
    /// Seed for dropout masks.
    pub dropout_seed: u64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            epochs: 30,
            lr: 1e-4,
            batch_size: 32,
            shuffle: Shuffle::Seeded(0),
            optimizer: Optimizer::default(),
            loss: Loss::default(),
            dropout_seed: 0,
        }
    }
}

impl FitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::InvalidConfig("epochs must be > 0".to_owned()));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "lr must be finite and > 0, got {}",
                self.lr
            )));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be > 0".to_owned()));
        }
        self.loss.validate()?;
        self.optimizer.validate()
    }
}

/// Loss and classification quality of a model on one dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EvalReport {
    pub loss: f64,
    pub confusion: Confusion,
}

impl EvalReport {
    #[inline]
    pub fn accuracy(&self) -> f64 {
        self.confusion.accuracy()
    }

    #[inline]
    pub fn f1(&self) -> f64 {
        self.confusion.f1()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EpochReport {
    pub epoch: usize,
    /// Mean batch loss seen during the epoch (dropout active).
    pub train_loss: f64,
    /// Evaluation-mode metrics on the training set.
    pub train: EvalReport,
    pub validation: Option<EvalReport>,
}

impl EpochReport {
    /// The score used for model selection: validation F1, else training F1.
    pub fn selection_score(&self) -> f64 {
        self.validation.as_ref().unwrap_or(&self.train).f1()
    }
}

#[derive(Debug, Clone)]
pub struct FitReport {
    pub epochs: Vec<EpochReport>,
    /// Tracks the model from the epoch with the best selection score.
    pub best: BestSnapshot,
}

impl FitReport {
    pub fn final_epoch(&self) -> Option<&EpochReport> {
        self.epochs.last()
    }

    pub fn best_snapshot(&self) -> Option<&ModelSnapshot> {
        self.best.best()
    }
}

impl Cnn {
    /// Train on `train`, selecting the best epoch by F1 on `validation` (or on
    /// `train` when no validation set is given).
    ///
    /// The model is left with the last epoch's parameters in evaluation mode; the
    /// best epoch's copy is in [`FitReport::best`].
    pub fn fit(
        &mut self,
        train: &Dataset,
        validation: Option<&Dataset>,
        cfg: &FitConfig,
    ) -> Result<FitReport> {
        cfg.validate()?;
        cfg.loss.validate_for(self.output_mode())?;
        self.check_dataset(train, "train")?;
        if let Some(val) = validation {
            self.check_dataset(val, "validation")?;
        }

        let mut opt = cfg.optimizer.state(self)?;
        let mut dropout_rng = StdRng::seed_from_u64(cfg.dropout_seed);
        let mut shuffle_rng = match cfg.shuffle {
            Shuffle::Seeded(seed) => Some(StdRng::seed_from_u64(seed)),
            Shuffle::None => None,
        };

        let mut scratch = self.scratch();
        let mut grads = self.gradients();
        let mut order: Vec<usize> = (0..train.len()).collect();
        let mut best = BestSnapshot::new();
        let mut epochs = Vec::with_capacity(cfg.epochs);
        let mut d_out = [0.0];

        for epoch in 0..cfg.epochs {
            if let Some(rng) = shuffle_rng.as_mut() {
                order.shuffle(rng);
            }

            self.set_training_mode(true);
            let mut loss_sum = 0.0;
            let mut batches = 0;
            for batch in order.chunks(cfg.batch_size) {
                grads.zero();
                let mut batch_loss = 0.0;
                for &idx in batch {
                    let (x, t) = train.sample(idx);
                    let y = self.forward_sample_with_rng(x, &mut scratch, &mut dropout_rng);
                    batch_loss += cfg.loss.backward(&[y], &[t], &mut d_out);
                    self.backward(&mut scratch, d_out[0], &mut grads);
                }
                grads.average();
                batch_loss /= batch.len() as f64;
                if !batch_loss.is_finite() {
                    self.set_training_mode(false);
                    return Err(Error::InvalidData(format!(
                        "training diverged at epoch {epoch} (loss {batch_loss})"
                    )));
                }
                opt.step(self, &grads, cfg.lr)?;
                loss_sum += batch_loss;
                batches += 1;
            }
            self.set_training_mode(false);

            let report = EpochReport {
                epoch,
                train_loss: loss_sum / batches as f64,
                train: self.evaluate(train, cfg.loss)?,
                validation: validation.map(|v| self.evaluate(v, cfg.loss)).transpose()?,
            };
            match &report.validation {
                Some(val) => log::info!(
                    "epoch {}/{}: train loss {:.5}, train f1 {:.4}, val loss {:.5}, val acc {:.4}, val f1 {:.4}",
                    epoch + 1,
                    cfg.epochs,
                    report.train_loss,
                    report.train.f1(),
                    val.loss,
                    val.accuracy(),
                    val.f1()
                ),
                None => log::info!(
                    "epoch {}/{}: train loss {:.5}, train acc {:.4}, train f1 {:.4}",
                    epoch + 1,
                    cfg.epochs,
                    report.train_loss,
                    report.train.accuracy(),
                    report.train.f1()
                ),
            }
            best.observe(epoch, report.selection_score(), self);
            epochs.push(report);
        }

        Ok(FitReport { epochs, best })
    }

    /// Model outputs (logits or probabilities, per the output mode) for every sample.
    pub fn predict(&self, data: &Dataset) -> Result<Vec<f64>> {
        self.check_dataset(data, "dataset")?;
        let mut scratch = self.scratch();
        Ok((0..data.len())
            .map(|i| self.forward_sample(data.features(i), &mut scratch))
            .collect())
    }

    /// Deterministic evaluation: mean loss and confusion counts.
    pub fn evaluate(&self, data: &Dataset, loss: Loss) -> Result<EvalReport> {
        let outputs = self.predict(data)?;
        Ok(EvalReport {
            loss: loss.forward(&outputs, data.labels()),
            confusion: Confusion::from_outputs(&outputs, data.labels(), self.output_mode()),
        })
    }

    fn check_dataset(&self, data: &Dataset, what: &str) -> Result<()> {
        if data.is_empty() {
            return Err(Error::InvalidData(format!("{what} must not be empty")));
        }
        if data.input_len() != self.input_len() {
            return Err(Error::ShapeMismatch(format!(
                "{what} input length {} does not match model input length {}",
                data.input_len(),
                self.input_len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OutputMode;
    use crate::{ActivationKind, CnnBuilder};

    /// Positive samples trend upwards, negatives downwards.
    fn separable(n: usize, len: usize) -> Dataset {
        let mut ds = Dataset::new(len).unwrap();
        for i in 0..n {
            let label = (i % 2) as f64;
            let sign = if label == 1.0 { 1.0 } else { -1.0 };
            let jitter = (i as f64 * 0.37).sin() * 0.05;
            let row: Vec<f64> = (0..len)
                .map(|j| sign * (j as f64 / len as f64 - 0.5) + jitter)
                .collect();
            ds.push(&row, label).unwrap();
        }
        ds
    }

    fn cfg(epochs: usize) -> FitConfig {
        FitConfig {
            epochs,
            lr: 1e-2,
            batch_size: 8,
            ..FitConfig::default()
        }
    }

    #[test]
    fn fit_learns_a_separable_problem() {
        let train = separable(64, 8);
        let val = separable(16, 8);
        let mut model = CnnBuilder::new(8)
            .unwrap()
            .activation(ActivationKind::ApproxReLU)
            .build_with_seed(0)
            .unwrap();

        let before = model.evaluate(&train, Loss::default()).unwrap().loss;
        let report = model.fit(&train, Some(&val), &cfg(15)).unwrap();
        assert_eq!(report.epochs.len(), 15);
        assert!(!model.is_training());

        let last = report.final_epoch().unwrap();
        assert!(last.train.loss < before, "{} !< {before}", last.train.loss);

        let best = report.best_snapshot().unwrap();
        assert!(best.score() >= 0.8, "best val f1 {}", best.score());
        let best_epoch = &report.epochs[best.epoch()];
        assert_eq!(best.score(), best_epoch.selection_score());
        assert!(report
            .epochs
            .iter()
            .all(|e| e.selection_score() <= best.score()));
    }

    #[test]
    fn fit_is_deterministic_for_fixed_seeds() {
        let train = separable(24, 6);
        let build = || CnnBuilder::new(6).unwrap().build_with_seed(3).unwrap();
        let mut a = build();
        let mut b = build();
        a.fit(&train, None, &cfg(2)).unwrap();
        b.fit(&train, None, &cfg(2)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fit_validates_inputs() {
        let train = separable(8, 6);
        let mut model = CnnBuilder::new(7).unwrap().build_with_seed(0).unwrap();
        assert!(matches!(
            model.fit(&train, None, &cfg(1)),
            Err(Error::ShapeMismatch(_))
        ));

        let mut model = CnnBuilder::new(6).unwrap().build_with_seed(0).unwrap();
        let bad = FitConfig {
            batch_size: 0,
            ..cfg(1)
        };
        assert!(matches!(
            model.fit(&train, None, &bad),
            Err(Error::InvalidConfig(_))
        ));

        let wrong_loss = FitConfig {
            loss: Loss::Bce,
            ..cfg(1)
        };
        assert!(matches!(
            model.fit(&train, None, &wrong_loss),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn probability_models_train_with_bce() {
        let train = separable(16, 5);
        let mut model = CnnBuilder::new(5)
            .unwrap()
            .output(OutputMode::Probability)
            .build_with_seed(1)
            .unwrap();
        let report = model
            .fit(
                &train,
                None,
                &FitConfig {
                    loss: Loss::Bce,
                    ..cfg(2)
                },
            )
            .unwrap();
        assert!(report.epochs.iter().all(|e| e.train_loss.is_finite()));
        let preds = model.predict(&train).unwrap();
        assert!(preds.iter().all(|p| (0.0..=1.0).contains(p)));
    }
}
