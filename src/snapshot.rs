//! Model snapshots for best-epoch selection.

use std::path::Path;

use crate::{Cnn, Result, Tensor};

/// A frozen copy of a model together with the epoch and score it was taken at.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSnapshot {
    model: Cnn,
    epoch: usize,
    score: f64,
}

impl ModelSnapshot {
    /// Capture `model` as it is now. The copy is always in evaluation mode.
    pub fn capture(model: &Cnn, epoch: usize, score: f64) -> Self {
        let mut model = model.clone();
        model.set_training_mode(false);
        Self {
            model,
            epoch,
            score,
        }
    }

    #[inline]
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    #[inline]
    pub fn score(&self) -> f64 {
        self.score
    }

    #[inline]
    pub fn model(&self) -> &Cnn {
        &self.model
    }

    pub fn parameters(&self) -> Vec<(&'static str, &Tensor)> {
        self.model.named_parameters()
    }
}

/// Tracks the best snapshot seen so far (higher score is better).
///
/// The snapshot is replaced only on a strictly better score, and written to disk at
/// most once.
#[derive(Debug, Clone, Default)]
pub struct BestSnapshot {
    best: Option<ModelSnapshot>,
    persisted: bool,
}

impl BestSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a candidate. Returns true if it became the new best.
    ///
    /// NaN scores are never accepted.
    pub fn observe(&mut self, epoch: usize, score: f64, model: &Cnn) -> bool {
        if score.is_nan() {
            return false;
        }
        let better = match &self.best {
            None => true,
            Some(best) => score > best.score,
        };
        if better {
            log::debug!("new best snapshot at epoch {epoch}: score {score:.6}");
            self.best = Some(ModelSnapshot::capture(model, epoch, score));
        }
        better
    }

    pub fn best(&self) -> Option<&ModelSnapshot> {
        self.best.as_ref()
    }

    #[inline]
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// Write the best model to `path` unless it was already written.
    ///
    /// Returns whether a file was written. Nothing is written when no snapshot was
    /// observed.
    pub fn persist<P: AsRef<Path>>(&mut self, path: P) -> Result<bool> {
        if self.persisted {
            return Ok(false);
        }
        let Some(best) = &self.best else {
            return Ok(false);
        };
        best.model.save_json(path)?;
        self.persisted = true;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CnnBuilder;

    fn model(seed: u64) -> Cnn {
        CnnBuilder::new(4).unwrap().build_with_seed(seed).unwrap()
    }

    #[test]
    fn replaces_only_on_strictly_better_score() {
        let mut best = BestSnapshot::new();
        assert!(best.best().is_none());

        assert!(best.observe(0, 0.5, &model(0)));
        assert!(!best.observe(1, 0.5, &model(1)));
        assert!(!best.observe(2, 0.4, &model(2)));
        assert!(!best.observe(3, f64::NAN, &model(3)));
        assert_eq!(best.best().unwrap().epoch(), 0);
        assert_eq!(best.best().unwrap().model(), &model(0));

        assert!(best.observe(4, 0.75, &model(4)));
        let snap = best.best().unwrap();
        assert_eq!(snap.epoch(), 4);
        assert_eq!(snap.score(), 0.75);
        assert_eq!(snap.parameters().len(), 8);
    }

    #[test]
    fn capture_is_in_evaluation_mode() {
        let mut m = model(0);
        m.set_training_mode(true);
        let snap = ModelSnapshot::capture(&m, 0, 1.0);
        assert!(!snap.model().is_training());
    }

    #[test]
    fn persists_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("best.json");

        let mut best = BestSnapshot::new();
        assert!(!best.persist(&path).unwrap());
        assert!(!path.exists());

        best.observe(0, 0.1, &model(0));
        assert!(best.persist(&path).unwrap());
        assert!(best.is_persisted());
        assert!(path.exists());

        best.observe(1, 0.9, &model(1));
        assert!(!best.persist(&path).unwrap());
        let on_disk = Cnn::load_json(&path).unwrap();
        assert_eq!(
            on_disk.parameter("fc2.bias").unwrap(),
            model(0).parameter("fc2.bias").unwrap()
        );
    }
}
