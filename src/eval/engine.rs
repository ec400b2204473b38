use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::stream::DataStream;
use crate::error::{Error, Result};
use crate::eval::confusion::ConfusionMatrix;
use crate::eval::metrics::{MeanIou, PerClassAccuracy, PixelAccuracy, ScoredBatch, StreamingMetric};
use crate::eval::render::render_batch;
use crate::network::module::{Mode, Segmenter};

/// Knobs for one pass of [`evaluate`].
#[derive(Debug, Clone, Default)]
pub struct EvalOptions {
    /// Score only the first `C - 1` classes; the last class is background.
    pub ignore_background: bool,
    /// Stop after this many batches.
    pub max_batches: Option<usize>,
    /// Render the first batch to PNGs in this directory.
    pub render_dir: Option<PathBuf>,
}

/// Finalized validation metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalReport {
    pub pixel_accuracy: f64,
    pub mean_iou: f64,
    pub per_class_accuracy: f64,
    /// Recall of every scored class, `None` where it never occurred.
    pub per_class: Vec<Option<f64>>,
    pub batches: usize,
}

/// Switches `net` to eval mode for the lifetime of the guard and restores
/// the previous mode afterwards, even on early return.
struct EvalModeGuard<'a, G: Segmenter> {
    net: &'a mut G,
    previous: Mode,
}

impl<'a, G: Segmenter> EvalModeGuard<'a, G> {
    fn new(net: &'a mut G) -> Self {
        let previous = net.mode();
        net.set_mode(Mode::Eval);
        EvalModeGuard { net, previous }
    }
}

impl<G: Segmenter> Drop for EvalModeGuard<'_, G> {
    fn drop(&mut self) {
        self.net.set_mode(self.previous);
    }
}

/// Runs `generator` over `stream` and scores its argmax predictions.
pub fn evaluate<G, S>(generator: &mut G, stream: &mut S, options: &EvalOptions) -> Result<EvalReport>
where
    G: Segmenter,
    S: DataStream + ?Sized,
{
    let num_classes = stream.num_classes();
    let scored = if options.ignore_background { num_classes.saturating_sub(1) } else { num_classes };

    let guard = EvalModeGuard::new(generator);
    let mut pixel = PixelAccuracy::default();
    let mut iou = MeanIou::default();
    let mut per_class = PerClassAccuracy::default();
    let mut render_dir = options.render_dir.clone();
    let mut batches = 0;

    for batch in stream.batches() {
        if options.max_batches.is_some_and(|max| batches >= max) {
            break;
        }
        let batch = batch?;
        let predicted = guard.net.forward(&batch.input)?.argmax_channels()?;
        let target = &batch.target_labels;
        if (predicted.batch, predicted.height, predicted.width) != (target.batch, target.height, target.width) {
            return Err(Error::shape_mismatch(
                &[target.batch, target.height, target.width],
                &[predicted.batch, predicted.height, predicted.width],
            ));
        }

        if let Some(dir) = render_dir.take() {
            let written = render_batch(&dir, &batch.input, &predicted, batch.target_visualization())?;
            debug!(count = written.len(), dir = %dir.display(), "rendered validation masks");
        }

        let view = ScoredBatch::new(&target.labels, &predicted.labels, scored);
        pixel = pixel.advance(&view);
        iou = iou.advance(&view);
        per_class = per_class.advance(&view);
        batches += 1;
    }

    Ok(EvalReport {
        pixel_accuracy: pixel.finalize(),
        mean_iou: iou.finalize(),
        per_class_accuracy: per_class.finalize(),
        per_class: per_class.per_class(),
        batches,
    })
}

/// Full `C x C` confusion matrix of `generator` over every batch of `stream`.
pub fn confusion_matrix<G, S>(generator: &mut G, stream: &mut S) -> Result<ConfusionMatrix>
where
    G: Segmenter,
    S: DataStream + ?Sized,
{
    let mut matrix = ConfusionMatrix::new(stream.num_classes());
    let guard = EvalModeGuard::new(generator);
    for batch in stream.batches() {
        let batch = batch?;
        let predicted = guard.net.forward(&batch.input)?.argmax_channels()?;
        matrix.accumulate(&predicted.labels, &batch.target_visualization().labels)?;
    }
    Ok(matrix)
}
