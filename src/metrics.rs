//! Binary classification metrics.
//!
//! Metrics are evaluation helpers (they do not participate in backprop). Undefined
//! ratios (e.g. precision with no positive predictions) are reported as 0.

use serde::Serialize;

use crate::model::OutputMode;

/// Confusion counts for a binary classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Confusion {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

impl Confusion {
    /// Count outcomes of thresholded model outputs.
    ///
    /// Outputs are thresholded at 0 for logits and 0.5 for probabilities (the same
    /// decision either way).
    pub fn from_outputs(outputs: &[f64], labels: &[f64], mode: OutputMode) -> Self {
        assert_eq!(
            outputs.len(),
            labels.len(),
            "outputs len {} does not match labels len {}",
            outputs.len(),
            labels.len()
        );
        let threshold = match mode {
            OutputMode::Logits => 0.0,
            OutputMode::Probability => 0.5,
        };
        let mut c = Self::default();
        for (&y, &t) in outputs.iter().zip(labels) {
            c.record(y > threshold, t == 1.0);
        }
        c
    }

    #[inline]
    pub fn record(&mut self, predicted: bool, actual: bool) {
        match (predicted, actual) {
            (true, true) => self.true_positives += 1,
            (true, false) => self.false_positives += 1,
            (false, false) => self.true_negatives += 1,
            (false, true) => self.false_negatives += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positives + self.true_negatives, self.total())
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    /// Harmonic mean of precision and recall.
    pub fn f1(&self) -> f64 {
        ratio(
            2 * self.true_positives,
            2 * self.true_positives + self.false_positives + self.false_negatives,
        )
    }
}

#[inline]
fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}
