use crate::error::{Error, Result};
use crate::math::tensor::{LabelMap, Tensor};

/// One mini-batch of training or validation data. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// `[N, C_in, H, W]`
    pub input: Tensor,
    /// One-hot ground truth, `[N, C, H, W]`.
    pub target_mask: Tensor,
    /// Integer ground truth, `[N, H, W]`.
    pub target_labels: LabelMap,
}

impl Batch {
    /// Builds a batch from both ground-truth views, checking that they agree
    /// wherever the mask is exactly one-hot.
    pub fn new(input: Tensor, target_mask: Tensor, target_labels: LabelMap) -> Result<Batch> {
        let (n, _, h, w) = input.dims4()?;
        let (mn, c, mh, mw) = target_mask.dims4()?;
        if (mn, mh, mw) != (n, h, w) {
            return Err(Error::shape_mismatch(&[n, c, h, w], target_mask.shape()));
        }
        if (target_labels.batch, target_labels.height, target_labels.width) != (n, h, w) {
            return Err(Error::shape_mismatch(
                &[n, h, w],
                &[target_labels.batch, target_labels.height, target_labels.width],
            ));
        }

        let plane = h * w;
        let mask = target_mask.data();
        for (i, &label) in target_labels.labels.iter().enumerate() {
            let (b, p) = (i / plane, i % plane);
            let channel = |k: usize| mask[(b * c + k) * plane + p];
            let hot: Vec<usize> = (0..c).filter(|&k| channel(k) == 1.0).collect();
            let one_hot = hot.len() == 1 && (0..c).all(|k| channel(k) == 0.0 || channel(k) == 1.0);
            if one_hot && hot[0] != label {
                return Err(Error::InconsistentBatch(format!(
                    "sample {b} pixel {p}: mask selects class {} but label map says {label}",
                    hot[0]
                )));
            }
        }
        Ok(Batch { input, target_mask, target_labels })
    }

    /// Builds a batch whose mask is the one-hot expansion of `target_labels`.
    pub fn from_labels(input: Tensor, target_labels: LabelMap, num_classes: usize) -> Result<Batch> {
        let target_mask = target_labels.one_hot(num_classes)?;
        Batch::new(input, target_mask, target_labels)
    }

    pub fn size(&self) -> usize {
        self.target_labels.batch
    }

    pub fn num_classes(&self) -> usize {
        self.target_mask.shape()[1]
    }

    /// Ground truth used for rendering and confusion matrices. The loaders
    /// this crate models hand out the label map for both purposes.
    pub fn target_visualization(&self) -> &LabelMap {
        &self.target_labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_labels_builds_consistent_mask() {
        let labels = LabelMap::new(1, 1, 3, vec![0, 1, 2]).unwrap();
        let batch = Batch::from_labels(Tensor::zeros(&[1, 3, 1, 3]), labels.clone(), 3).unwrap();
        assert_eq!(batch.target_mask.argmax_channels().unwrap(), labels);
        assert_eq!(batch.num_classes(), 3);
    }

    #[test]
    fn disagreeing_views_are_rejected() {
        let mask = LabelMap::new(1, 1, 2, vec![0, 1]).unwrap().one_hot(2).unwrap();
        let labels = LabelMap::new(1, 1, 2, vec![0, 0]).unwrap();
        let err = Batch::new(Tensor::zeros(&[1, 1, 1, 2]), mask, labels).unwrap_err();
        assert!(matches!(err, Error::InconsistentBatch(_)));
    }

    #[test]
    fn soft_mask_pixels_are_not_checked() {
        let mask = Tensor::from_vec(&[1, 2, 1, 1], vec![0.5, 0.5]).unwrap();
        let labels = LabelMap::new(1, 1, 1, vec![1]).unwrap();
        assert!(Batch::new(Tensor::zeros(&[1, 1, 1, 1]), mask, labels).is_ok());
    }

    #[test]
    fn spatial_mismatch_is_rejected() {
        let labels = LabelMap::new(1, 2, 2, vec![0; 4]).unwrap();
        assert!(Batch::from_labels(Tensor::zeros(&[1, 3, 1, 4]), labels, 2).is_err());
    }
}
