//! Labelled dataset for binary classification.
//!
//! Each sample is a feature vector of fixed length `L` (seen by the model as a
//! `(1, L)` single-channel sequence) with a label in `{0, 1}`. Features are stored
//! contiguously in row-major layout:
//! - `features.len() == len * input_len`
//! - `labels.len() == len`
//!
//! Parsing raw data (CSV, undersampling, scaling) happens before this type.

use std::path::Path;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::{Error, Result, Tensor};

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    features: Vec<f64>,
    labels: Vec<f64>,
    input_len: usize,
}

/// On-disk form: one row per sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DatasetFile {
    features: Vec<Vec<f64>>,
    labels: Vec<f64>,
}

impl Dataset {
    /// Empty dataset for samples of length `input_len`.
    pub fn new(input_len: usize) -> Result<Self> {
        if input_len == 0 {
            return Err(Error::InvalidData("input_len must be > 0".to_owned()));
        }
        Ok(Self {
            features: Vec::new(),
            labels: Vec::new(),
            input_len,
        })
    }

    /// Build a dataset from a flat `(len, input_len)` feature buffer.
    pub fn from_flat(features: Vec<f64>, labels: Vec<f64>, input_len: usize) -> Result<Self> {
        if input_len == 0 {
            return Err(Error::InvalidData("input_len must be > 0".to_owned()));
        }
        if features.len() != labels.len() * input_len {
            return Err(Error::InvalidData(format!(
                "features length {} does not match len * input_len ({} * {})",
                features.len(),
                labels.len(),
                input_len
            )));
        }
        check_labels(&labels)?;
        check_features(&features)?;
        Ok(Self {
            features,
            labels,
            input_len,
        })
    }

    /// Build a dataset from per-sample rows.
    ///
    /// This is a convenience constructor (it copies into contiguous storage).
    pub fn from_rows(rows: &[Vec<f64>], labels: &[f64]) -> Result<Self> {
        if rows.len() != labels.len() {
            return Err(Error::InvalidData(format!(
                "rows/labels length mismatch: {} vs {}",
                rows.len(),
                labels.len()
            )));
        }
        let input_len = rows
            .first()
            .map(Vec::len)
            .ok_or_else(|| Error::InvalidData("rows must not be empty".to_owned()))?;

        let mut ds = Self::new(input_len)?;
        ds.features.reserve(rows.len() * input_len);
        for (row, &label) in rows.iter().zip(labels) {
            ds.push(row, label)?;
        }
        Ok(ds)
    }

    /// Read `{"features": [[...], ...], "labels": [...]}` from a JSON file.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let s = std::fs::read_to_string(p).map_err(|e| Error::io(p, e))?;
        let file: DatasetFile = serde_json::from_str(&s)
            .map_err(|e| Error::InvalidData(format!("failed to parse dataset {}: {e}", p.display())))?;
        Self::from_rows(&file.features, &file.labels)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = DatasetFile {
            features: (0..self.len()).map(|i| self.features(i).to_vec()).collect(),
            labels: self.labels.clone(),
        };
        let s = serde_json::to_string(&file)
            .map_err(|e| Error::InvalidData(format!("failed to serialize dataset: {e}")))?;
        let p = path.as_ref();
        std::fs::write(p, s).map_err(|e| Error::io(p, e))
    }

    /// Append one sample.
    pub fn push(&mut self, features: &[f64], label: f64) -> Result<()> {
        if features.len() != self.input_len {
            return Err(Error::InvalidData(format!(
                "sample {} has len {}, expected {}",
                self.len(),
                features.len(),
                self.input_len
            )));
        }
        check_labels(&[label])?;
        check_features(features)?;
        self.features.extend_from_slice(features);
        self.labels.push(label);
        Ok(())
    }

    /// Number of samples.
    #[inline]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[inline]
    pub fn input_len(&self) -> usize {
        self.input_len
    }

    /// The `idx`-th feature row.
    ///
    /// Panics if `idx >= len`.
    #[inline]
    pub fn features(&self, idx: usize) -> &[f64] {
        let start = idx * self.input_len;
        &self.features[start..start + self.input_len]
    }

    #[inline]
    pub fn labels(&self) -> &[f64] {
        &self.labels
    }

    /// `(features, label)` of sample `idx`.
    #[inline]
    pub fn sample(&self, idx: usize) -> (&[f64], f64) {
        (self.features(idx), self.labels[idx])
    }

    /// Number of samples labelled 1.
    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|&&y| y == 1.0).count()
    }

    /// Gather samples into a `(indices.len(), 1, L)` model input.
    pub fn batch_tensor(&self, indices: &[usize]) -> Result<Tensor> {
        let mut data = Vec::with_capacity(indices.len() * self.input_len);
        for &i in indices {
            if i >= self.len() {
                return Err(Error::InvalidData(format!(
                    "sample index {i} out of range for dataset of {}",
                    self.len()
                )));
            }
            data.extend_from_slice(self.features(i));
        }
        Tensor::new(vec![indices.len(), 1, self.input_len], data)
    }

    /// Shuffle with `seed` and split off `fraction` of the samples as a second set.
    ///
    /// Both sets are non-empty: the second set gets `round(len * fraction)` samples,
    /// clamped to `1..=len - 1`. Fewer than two samples cannot be split.
    pub fn split(&self, fraction: f64, seed: u64) -> Result<(Dataset, Dataset)> {
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "split fraction must be in (0, 1), got {fraction}"
            )));
        }
        if self.len() < 2 {
            return Err(Error::InvalidData(format!(
                "cannot split a dataset of {} samples",
                self.len()
            )));
        }
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));

        let n_second = ((self.len() as f64) * fraction).round() as usize;
        let n_second = n_second.clamp(1, self.len() - 1);
        let (second, first) = order.split_at(n_second);
        Ok((self.subset(first), self.subset(second)))
    }

    fn subset(&self, indices: &[usize]) -> Dataset {
        let mut features = Vec::with_capacity(indices.len() * self.input_len);
        let mut labels = Vec::with_capacity(indices.len());
        for &i in indices {
            features.extend_from_slice(self.features(i));
            labels.push(self.labels[i]);
        }
        Dataset {
            features,
            labels,
            input_len: self.input_len,
        }
    }
}

fn check_labels(labels: &[f64]) -> Result<()> {
    if let Some(y) = labels.iter().find(|&&y| y != 0.0 && y != 1.0) {
        return Err(Error::InvalidData(format!("labels must be 0 or 1, got {y}")));
    }
    Ok(())
}

fn check_features(features: &[f64]) -> Result<()> {
    if features.iter().any(|v| !v.is_finite()) {
        return Err(Error::InvalidData(
            "features must contain only finite values".to_owned(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_flat_validates_shapes_and_labels() {
        assert!(Dataset::from_flat(vec![0.0, 1.0, 2.0, 3.0], vec![0.0, 1.0], 2).is_ok());
        assert!(Dataset::from_flat(vec![0.0, 1.0, 2.0], vec![0.0], 2).is_err());
        assert!(Dataset::from_flat(vec![0.0, 1.0], vec![0.5], 2).is_err());
        assert!(Dataset::from_flat(vec![f64::NAN, 1.0], vec![1.0], 2).is_err());
    }

    #[test]
    fn from_rows_rejects_ragged_rows() {
        let rows = vec![vec![0.0, 1.0, 2.0], vec![3.0, 4.0]];
        assert!(Dataset::from_rows(&rows, &[0.0, 1.0]).is_err());
        assert!(Dataset::from_rows(&[], &[]).is_err());
    }

    #[test]
    fn batch_tensor_gathers_in_index_order() {
        let ds = Dataset::from_rows(
            &[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0], vec![7.0, 8.0, 9.0]],
            &[0.0, 1.0, 1.0],
        )
        .unwrap();
        let t = ds.batch_tensor(&[2, 0]).unwrap();
        assert_eq!(t.shape(), &[2, 1, 3]);
        assert_eq!(t.data(), &[7.0, 8.0, 9.0, 1.0, 2.0, 3.0]);
        assert!(ds.batch_tensor(&[3]).is_err());
        assert_eq!(ds.positives(), 2);
        assert_eq!(ds.sample(1), (&[4.0, 5.0, 6.0][..], 1.0));
    }

    #[test]
    fn split_partitions_all_samples() {
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64; 3]).collect();
        let labels: Vec<f64> = (0..10).map(|i| (i % 2) as f64).collect();
        let ds = Dataset::from_rows(&rows, &labels).unwrap();

        let (train, val) = ds.split(0.2, 0).unwrap();
        assert_eq!(train.len(), 8);
        assert_eq!(val.len(), 2);
        let mut seen: Vec<f64> = (0..train.len())
            .map(|i| train.features(i)[0])
            .chain((0..val.len()).map(|i| val.features(i)[0]))
            .collect();
        seen.sort_by(f64::total_cmp);
        assert_eq!(seen, (0..10).map(|i| i as f64).collect::<Vec<_>>());

        assert!(ds.split(1.0, 0).is_err());
    }

    #[test]
    fn split_never_leaves_a_side_empty() {
        let two = Dataset::from_rows(&[vec![0.0, 1.0], vec![2.0, 3.0]], &[0.0, 1.0]).unwrap();
        for fraction in [0.2, 0.5, 0.9] {
            let (train, val) = two.split(fraction, 7).unwrap();
            assert_eq!((train.len(), val.len()), (1, 1), "fraction {fraction}");
        }

        let rows: Vec<Vec<f64>> = (0..5).map(|i| vec![i as f64]).collect();
        let five = Dataset::from_rows(&rows, &[0.0; 5]).unwrap();
        assert_eq!(five.split(0.01, 0).unwrap().1.len(), 1);
        assert_eq!(five.split(0.99, 0).unwrap().0.len(), 1);

        let one = Dataset::from_rows(&[vec![0.0]], &[1.0]).unwrap();
        assert!(matches!(one.split(0.5, 0), Err(Error::InvalidData(_))));
    }

    #[test]
    fn json_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        let ds = Dataset::from_rows(&[vec![0.25, -1.0], vec![3.5, 0.0]], &[1.0, 0.0]).unwrap();
        ds.save_json(&path).unwrap();
        assert_eq!(Dataset::load_json(&path).unwrap(), ds);
    }
}
