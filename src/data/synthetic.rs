use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::data::stream::{InMemoryStream, Sample};
use crate::error::{Error, Result};
use crate::math::tensor::{LabelMap, Tensor};

/// Procedurally generated segmentation data: axis-aligned rectangles of
/// random foreground classes over a background. The background is the last
/// class id, matching the convention that evaluation may drop the last
/// channel as background.
#[derive(Debug, Clone)]
pub struct SyntheticShapes {
    pub size: usize,
    pub num_classes: usize,
    pub max_shapes: usize,
    pub noise: f64,
}

/// Input channels of every generated image (RGB).
pub const SYNTHETIC_CHANNELS: usize = 3;

impl SyntheticShapes {
    pub fn new(size: usize, num_classes: usize) -> Result<Self> {
        if num_classes < 2 {
            return Err(Error::config("synthetic data needs a background and at least one foreground class"));
        }
        if size < 2 {
            return Err(Error::config("synthetic images must be at least 2x2"));
        }
        Ok(SyntheticShapes { size, num_classes, max_shapes: 3, noise: 0.1 })
    }

    pub fn background(&self) -> usize {
        self.num_classes - 1
    }

    /// Mean RGB value of a class; distinct for every class id.
    pub fn class_color(class: usize) -> [f64; SYNTHETIC_CHANNELS] {
        let k = class as f64 + 1.0;
        [(k * 0.37).fract(), (k * 0.61).fract(), (k * 0.83).fract()]
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Sample> {
        let s = self.size;
        let mut labels = vec![self.background(); s * s];
        let shapes = rng.gen_range(1..=self.max_shapes);
        for _ in 0..shapes {
            let class = rng.gen_range(0..self.background());
            let (y0, x0) = (rng.gen_range(0..s - 1), rng.gen_range(0..s - 1));
            let (y1, x1) = (rng.gen_range(y0 + 1..=s), rng.gen_range(x0 + 1..=s));
            for y in y0..y1 {
                for x in x0..x1 {
                    labels[y * s + x] = class;
                }
            }
        }

        let mut input = Tensor::zeros(&[1, SYNTHETIC_CHANNELS, s, s]);
        let data = input.data_mut();
        for (p, &label) in labels.iter().enumerate() {
            let color = SyntheticShapes::class_color(label);
            for (ch, mean) in color.iter().enumerate() {
                data[ch * s * s + p] = mean + self.noise * Tensor::sample_standard_normal(rng);
            }
        }
        Ok(Sample { input, labels: LabelMap::new(1, s, s, labels)? })
    }

    pub fn generate<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Result<Vec<Sample>> {
        (0..count).map(|_| self.sample(rng)).collect()
    }
}

/// Serializable recipe for the synthetic train/validation split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSpec {
    /// Including the background class.
    pub num_classes: usize,
    pub train_samples: usize,
    pub val_samples: usize,
}

impl Default for DataSpec {
    fn default() -> Self {
        DataSpec { num_classes: 4, train_samples: 64, val_samples: 16 }
    }
}

impl DataSpec {
    /// Generates both splits from `seed`. The training stream reshuffles on
    /// every pass, the validation stream keeps a fixed order.
    pub fn build(&self, image_size: usize, batch_size: usize, seed: u64) -> Result<(InMemoryStream, InMemoryStream)> {
        let shapes = SyntheticShapes::new(image_size, self.num_classes)?;
        let mut rng = StdRng::seed_from_u64(seed);
        let train = InMemoryStream::new(shapes.generate(self.train_samples, &mut rng)?, batch_size, self.num_classes)?
            .shuffled(seed.wrapping_add(1));
        let val = InMemoryStream::new(shapes.generate(self.val_samples, &mut rng)?, batch_size, self.num_classes)?;
        Ok((train, val))
    }
}
