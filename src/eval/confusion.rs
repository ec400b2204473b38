use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// `C x C` pixel counts: `cell(pred, gt)` is the number of pixels predicted
/// as `pred` whose ground truth is `gt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    num_classes: usize,
    /// Row-major by ground truth: index `pred + num_classes * gt`.
    counts: Vec<u64>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        ConfusionMatrix { num_classes, counts: vec![0; num_classes * num_classes] }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Bin-counts the combined index `pred + C * gt` of every pixel and adds
    /// the result to the running counts.
    pub fn accumulate(&mut self, predictions: &[usize], targets: &[usize]) -> Result<()> {
        if predictions.len() != targets.len() {
            return Err(Error::shape_mismatch(&[targets.len()], &[predictions.len()]));
        }
        let c = self.num_classes;
        if let Some(&label) = predictions.iter().chain(targets).find(|&&l| l >= c) {
            return Err(Error::LabelOutOfRange { label, num_classes: c });
        }
        let mut bins = vec![0u64; c * c];
        for (&p, &t) in predictions.iter().zip(targets) {
            bins[p + c * t] += 1;
        }
        for (total, add) in self.counts.iter_mut().zip(bins) {
            *total += add;
        }
        Ok(())
    }

    pub fn cell(&self, predicted: usize, ground_truth: usize) -> u64 {
        self.counts[predicted + self.num_classes * ground_truth]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Correctly classified pixels.
    pub fn trace(&self) -> u64 {
        (0..self.num_classes).map(|k| self.cell(k, k)).sum()
    }

    pub fn pixel_accuracy(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.trace() as f64 / total as f64,
        }
    }
}

impl fmt::Display for ConfusionMatrix {
    /// One row per predicted class, one column per ground-truth class.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.counts.iter().max().map_or(1, |m| m.to_string().len()).max(4);
        write!(f, "{:>6}", "pred\\gt")?;
        for gt in 0..self.num_classes {
            write!(f, " {:>width$}", gt)?;
        }
        writeln!(f)?;
        for pred in 0..self.num_classes {
            write!(f, "{:>7}", pred)?;
            for gt in 0..self.num_classes {
                write!(f, " {:>width$}", self.cell(pred, gt))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::metrics::{PixelAccuracy, ScoredBatch, StreamingMetric};
    use approx::assert_abs_diff_eq;

    #[test]
    fn two_batch_scenario_cells() {
        let mut m = ConfusionMatrix::new(3);
        m.accumulate(&[0, 1], &[0, 1]).unwrap();
        m.accumulate(&[2, 1], &[2, 0]).unwrap();

        assert_eq!(m.cell(0, 0), 1);
        assert_eq!(m.cell(1, 1), 1);
        assert_eq!(m.cell(2, 2), 1);
        assert_eq!(m.cell(1, 0), 1);
        assert_eq!(m.total(), 4);
        assert_eq!(m.counts.iter().filter(|&&c| c == 0).count(), 5);
    }

    #[test]
    fn diagonal_matches_pixel_accuracy() {
        let batches: [(&[usize], &[usize]); 3] =
            [(&[0, 1, 2, 2], &[0, 2, 2, 1]), (&[1, 1], &[1, 0]), (&[2, 0, 0], &[2, 0, 1])];
        let mut m = ConfusionMatrix::new(3);
        let mut acc = PixelAccuracy::default();
        for (pred, gt) in batches {
            m.accumulate(pred, gt).unwrap();
            acc = acc.advance(&ScoredBatch::new(gt, pred, 3));
        }
        assert_abs_diff_eq!(m.trace() as f64, acc.finalize() * m.total() as f64, epsilon = 1e-9);
        assert_abs_diff_eq!(m.pixel_accuracy(), acc.finalize(), epsilon = 1e-12);
    }

    #[test]
    fn out_of_range_labels_leave_counts_untouched() {
        let mut m = ConfusionMatrix::new(2);
        assert!(matches!(m.accumulate(&[0, 2], &[0, 0]), Err(Error::LabelOutOfRange { label: 2, .. })));
        assert_eq!(m.total(), 0);
    }

    #[test]
    fn display_lists_every_cell() {
        let mut m = ConfusionMatrix::new(2);
        m.accumulate(&[1], &[0]).unwrap();
        let text = m.to_string();
        assert_eq!(text.lines().count(), 3);
    }
}
