//! PNG rendering of validation batches.
//!
//! Label maps are drawn with a fixed per-class palette; inputs are written
//! only when they have three channels and are assumed to lie in [0, 1].

use std::fs;
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};

use crate::error::Result;
use crate::math::tensor::{LabelMap, Tensor};

/// Distinct RGB color for a class id.
pub fn class_palette(class: usize) -> Rgb<u8> {
    let k = class as u32 + 1;
    Rgb([(k * 97 % 256) as u8, (k * 157 % 256) as u8, (k * 211 % 256) as u8])
}

pub fn label_map_image(labels: &LabelMap, index: usize) -> RgbImage {
    let width = labels.width as u32;
    let sample = labels.sample(index);
    RgbImage::from_fn(width, labels.height as u32, |x, y| class_palette(sample[(y * width + x) as usize]))
}

/// `None` unless `input` is `[N, 3, H, W]`.
pub fn input_image(input: &Tensor, index: usize) -> Result<Option<RgbImage>> {
    let (_, c, h, w) = input.dims4()?;
    if c != 3 {
        return Ok(None);
    }
    let plane = h * w;
    let data = &input.data()[index * c * plane..(index + 1) * c * plane];
    let to_byte = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    Ok(Some(RgbImage::from_fn(w as u32, h as u32, |x, y| {
        let p = y as usize * w + x as usize;
        Rgb([to_byte(data[p]), to_byte(data[plane + p]), to_byte(data[2 * plane + p])])
    })))
}

/// Writes `input_<i>.png`, `pred_<i>.png` and `gt_<i>.png` for every sample of
/// a batch into `dir`, creating it if needed. Returns the written paths.
pub fn render_batch(dir: &Path, input: &Tensor, predicted: &LabelMap, target: &LabelMap) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    for i in 0..predicted.batch {
        if let Some(img) = input_image(input, i)? {
            let path = dir.join(format!("input_{i}.png"));
            img.save(&path)?;
            written.push(path);
        }
        for (prefix, labels) in [("pred", predicted), ("gt", target)] {
            let path = dir.join(format!("{prefix}_{i}.png"));
            label_map_image(labels, i).save(&path)?;
            written.push(path);
        }
    }
    Ok(written)
}
