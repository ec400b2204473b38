use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::data::batch::Batch;
use crate::error::{Error, Result};
use crate::math::tensor::{LabelMap, Tensor};

/// Source of batches for one pass over a dataset.
pub trait DataStream {
    fn num_classes(&self) -> usize;

    /// Number of batches one full pass yields.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts a fresh pass. Batches must not be mutated after being handed out.
    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<Batch>> + '_>;
}

/// One labelled image: `input` is `[1, C, H, W]`, `labels` is `[1, H, W]`.
#[derive(Debug, Clone)]
pub struct Sample {
    pub input: Tensor,
    pub labels: LabelMap,
}

/// A dataset held in memory, batched in order or reshuffled on every pass.
pub struct InMemoryStream {
    samples: Vec<Sample>,
    batch_size: usize,
    num_classes: usize,
    shuffle: Option<StdRng>,
}

impl InMemoryStream {
    pub fn new(samples: Vec<Sample>, batch_size: usize, num_classes: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::config("batch_size must be at least 1"));
        }
        if let Some(first) = samples.first() {
            let (_, c, h, w) = first.input.dims4()?;
            for s in &samples {
                let expected = [1, c, h, w];
                if s.input.shape() != expected {
                    return Err(Error::shape_mismatch(&expected, s.input.shape()));
                }
                if (s.labels.batch, s.labels.height, s.labels.width) != (1, h, w) {
                    return Err(Error::shape_mismatch(&[1, h, w], &[s.labels.batch, s.labels.height, s.labels.width]));
                }
                if let Some(&label) = s.labels.labels.iter().find(|&&l| l >= num_classes) {
                    return Err(Error::LabelOutOfRange { label, num_classes });
                }
            }
        }
        Ok(InMemoryStream { samples, batch_size, num_classes, shuffle: None })
    }

    /// Reshuffles sample order at the start of every pass.
    pub fn shuffled(mut self, seed: u64) -> Self {
        self.shuffle = Some(StdRng::seed_from_u64(seed));
        self
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    fn collate(&self, indices: &[usize]) -> Result<Batch> {
        let first = &self.samples[indices[0]];
        let (_, c, h, w) = first.input.dims4()?;
        let mut input = Vec::with_capacity(indices.len() * c * h * w);
        let mut labels = Vec::with_capacity(indices.len() * h * w);
        for &i in indices {
            input.extend_from_slice(self.samples[i].input.data());
            labels.extend_from_slice(&self.samples[i].labels.labels);
        }
        let n = indices.len();
        Batch::from_labels(
            Tensor::from_vec(&[n, c, h, w], input)?,
            LabelMap::new(n, h, w, labels)?,
            self.num_classes,
        )
    }
}

impl DataStream for InMemoryStream {
    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn len(&self) -> usize {
        self.samples.len().div_ceil(self.batch_size)
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<Batch>> + '_> {
        let mut order: Vec<usize> = (0..self.samples.len()).collect();
        if let Some(rng) = self.shuffle.as_mut() {
            order.shuffle(rng);
        }
        let this: &InMemoryStream = self;
        let chunks: Vec<Vec<usize>> = order.chunks(this.batch_size).map(<[usize]>::to_vec).collect();
        Box::new(chunks.into_iter().map(move |chunk| this.collate(&chunk)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(label: usize) -> Sample {
        Sample {
            input: Tensor::from_vec(&[1, 1, 1, 2], vec![label as f64; 2]).unwrap(),
            labels: LabelMap::new(1, 1, 2, vec![label; 2]).unwrap(),
        }
    }

    #[test]
    fn last_partial_batch_is_kept() {
        let mut s = InMemoryStream::new((0..5).map(|i| sample(i % 2)).collect(), 2, 2).unwrap();
        assert_eq!(s.len(), 3);
        let sizes: Vec<usize> = s.batches().map(|b| b.unwrap().size()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn shuffled_pass_visits_every_sample_once() {
        let mut s = InMemoryStream::new((0..6).map(|i| sample(i % 3)).collect(), 4, 3)
            .unwrap()
            .shuffled(42);
        let mut seen: Vec<usize> = s
            .batches()
            .flat_map(|b| b.unwrap().target_labels.labels)
            .collect();
        seen.sort();
        assert_eq!(seen, vec![0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2]);
    }

    #[test]
    fn labels_outside_class_range_are_rejected() {
        assert!(InMemoryStream::new(vec![sample(3)], 1, 3).is_err());
    }

    #[test]
    fn zero_batch_size_is_a_config_error() {
        assert!(matches!(InMemoryStream::new(vec![sample(0)], 0, 1), Err(Error::Config(_))));
    }
}
