use crate::error::{NnError, Result};
use crate::tensor::{self, Tensor};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// In-memory labelled dataset: `x` holds one sample per leading index and
/// `y` the matching integer class labels.
///
/// Loading real MNIST or CIFAR archives happens outside this crate; they
/// reach the engine as JSON files of this shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub x: Tensor,
    pub y: Vec<usize>,
}

impl Dataset {
    pub fn new(x: Tensor, y: Vec<usize>) -> Result<Self> {
        let n = x.shape.first().copied().unwrap_or(0);
        if x.ndim() < 2 || n != y.len() {
            return Err(NnError::shape(format!(
                "dataset with inputs {:?} and {} labels",
                x.shape,
                y.len()
            )));
        }
        Ok(Self { x, y })
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// Gather the samples at `indices` into one batch.
    pub fn batch(&self, indices: &[usize]) -> Result<(Tensor, Vec<usize>)> {
        let x = self.x.select_rows(indices)?;
        let y = indices.iter().map(|&i| self.y[i]).collect();
        Ok((x, y))
    }

    /// Contiguous batch `[start, end)`.
    pub fn slice(&self, start: usize, end: usize) -> Result<(Tensor, Vec<usize>)> {
        let end = end.min(self.len());
        let indices: Vec<usize> = (start.min(end)..end).collect();
        self.batch(&indices)
    }

    /// A random permutation of `0..len`.
    pub fn shuffled_indices<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<usize> {
        let mut idx: Vec<usize> = (0..self.len()).collect();
        idx.shuffle(rng);
        idx
    }

    /// One more than the largest label.
    pub fn num_classes(&self) -> usize {
        self.y.iter().max().map_or(0, |m| m + 1)
    }

    /// Convert channels-last image batches to `(N, C, H, W)`. Non-image data
    /// is returned unchanged.
    pub fn into_nchw(mut self) -> Result<Self> {
        if self.x.ndim() == 4 {
            self.x = tensor::to_nchw(&self.x)?;
        }
        Ok(self)
    }

    /// Per-channel standardization of image inputs.
    pub fn normalize(mut self, mean: &[f64], std: &[f64]) -> Result<Self> {
        self.x = tensor::normalize_nchw(&self.x, mean, std)?;
        Ok(self)
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let txt = fs::read_to_string(path)?;
        let ds: Dataset = serde_json::from_str(&txt)?;
        log::info!("loaded {} samples from {}", ds.len(), path.display());
        Self::new(ds.x, ds.y)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::rng_from_seed;

    fn toy() -> Dataset {
        Dataset::new(Tensor::from_fn(&[4, 2], |i| i as f64), vec![0, 1, 2, 1]).unwrap()
    }

    #[test]
    fn batch_gathers_rows_and_labels() {
        let (x, y) = toy().batch(&[3, 0]).unwrap();
        assert_eq!(x.data, vec![6.0, 7.0, 0.0, 1.0]);
        assert_eq!(y, vec![1, 0]);
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut idx = toy().shuffled_indices(&mut rng_from_seed(5));
        idx.sort_unstable();
        assert_eq!(idx, vec![0, 1, 2, 3]);
    }

    #[test]
    fn label_mismatch_rejected() {
        assert!(Dataset::new(Tensor::zeros(&[3, 2]), vec![0, 1]).is_err());
    }

    #[test]
    fn num_classes_from_labels() {
        assert_eq!(toy().num_classes(), 3);
    }
}
