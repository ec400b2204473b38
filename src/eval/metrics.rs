//! Streaming evaluation statistics.
//!
//! Each metric is a plain data structure advanced one batch at a time with
//! [`StreamingMetric::advance`] and read with [`StreamingMetric::finalize`],
//! which never mutates or re-scans anything. All running totals are additive,
//! so the order batches arrive in does not affect the final value.

use serde::{Deserialize, Serialize};

/// Hard predictions and ground truth for one batch, flattened over pixels.
///
/// Only classes `0..num_classes` are scored. Labels at or above
/// `num_classes` (the dropped background channel) select no class: a target
/// pixel with such a label is not scored, a predicted pixel with such a label
/// counts towards no class.
#[derive(Debug, Clone, Copy)]
pub struct ScoredBatch<'a> {
    pub targets: &'a [usize],
    pub predictions: &'a [usize],
    pub num_classes: usize,
}

impl<'a> ScoredBatch<'a> {
    pub fn new(targets: &'a [usize], predictions: &'a [usize], num_classes: usize) -> Self {
        debug_assert_eq!(targets.len(), predictions.len());
        ScoredBatch { targets, predictions, num_classes }
    }

    fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + 'a {
        self.targets.iter().copied().zip(self.predictions.iter().copied())
    }
}

pub trait StreamingMetric: Default + Clone {
    /// Folds one batch into the running totals.
    fn advance(self, batch: &ScoredBatch<'_>) -> Self;

    /// Current value; classes without support are left out of any mean, and
    /// an empty evaluation yields 0.
    fn finalize(&self) -> f64;
}

fn grow(v: &mut Vec<u64>, len: usize) {
    if v.len() < len {
        v.resize(len, 0);
    }
}

fn mean_of_ratios(numerators: &[u64], denominators: &[u64]) -> f64 {
    let ratios: Vec<f64> = numerators
        .iter()
        .zip(denominators)
        .filter(|(_, &d)| d > 0)
        .map(|(&n, &d)| n as f64 / d as f64)
        .collect();
    if ratios.is_empty() {
        0.0
    } else {
        ratios.iter().sum::<f64>() / ratios.len() as f64
    }
}

/// Correctly classified scored pixels over all scored pixels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelAccuracy {
    pub correct: u64,
    pub total: u64,
}

impl StreamingMetric for PixelAccuracy {
    fn advance(mut self, batch: &ScoredBatch<'_>) -> Self {
        for (t, p) in batch.pairs().filter(|&(t, _)| t < batch.num_classes) {
            self.total += 1;
            if t == p {
                self.correct += 1;
            }
        }
        self
    }

    fn finalize(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

/// Mean intersection-over-union across classes with a non-empty union.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeanIou {
    pub intersection: Vec<u64>,
    pub union: Vec<u64>,
}

impl StreamingMetric for MeanIou {
    fn advance(mut self, batch: &ScoredBatch<'_>) -> Self {
        let k = batch.num_classes;
        grow(&mut self.intersection, k);
        grow(&mut self.union, k);
        for (t, p) in batch.pairs() {
            if t == p {
                if t < k {
                    self.intersection[t] += 1;
                    self.union[t] += 1;
                }
                continue;
            }
            if t < k {
                self.union[t] += 1;
            }
            if p < k {
                self.union[p] += 1;
            }
        }
        self
    }

    fn finalize(&self) -> f64 {
        mean_of_ratios(&self.intersection, &self.union)
    }
}

/// Per-class recall averaged over classes present in the ground truth.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerClassAccuracy {
    pub correct: Vec<u64>,
    pub total: Vec<u64>,
}

impl PerClassAccuracy {
    /// Recall of each class, `None` where the class never occurred.
    pub fn per_class(&self) -> Vec<Option<f64>> {
        self.correct
            .iter()
            .zip(&self.total)
            .map(|(&c, &t)| (t > 0).then(|| c as f64 / t as f64))
            .collect()
    }
}

impl StreamingMetric for PerClassAccuracy {
    fn advance(mut self, batch: &ScoredBatch<'_>) -> Self {
        let k = batch.num_classes;
        grow(&mut self.correct, k);
        grow(&mut self.total, k);
        for (t, p) in batch.pairs().filter(|&(t, _)| t < k) {
            self.total[t] += 1;
            if t == p {
                self.correct[t] += 1;
            }
        }
        self
    }

    fn finalize(&self) -> f64 {
        mean_of_ratios(&self.correct, &self.total)
    }
}
