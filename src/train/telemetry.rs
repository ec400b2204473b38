use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const SEGMENTATION_LOSS: &str = "Train/SegmentationLoss";
pub const GENERATOR_LOSS: &str = "Train/GeneratorLoss";
pub const GENERATOR_GRAD_NORM: &str = "Train/GeneratorTotalGradNorm";
pub const DISCRIMINATOR_LOSS: &str = "Train/DiscriminatorLoss";
pub const DISCRIMINATOR_GRAD_NORM: &str = "Train/DiscriminatorTotalGradNorm";
pub const DISCRIMINATOR_TRUE_POSITIVE: &str = "Train/DiscriminatorTruePositive";
pub const DISCRIMINATOR_TRUE_NEGATIVE: &str = "Train/DiscriminatorTrueNegative";
pub const GAN_LOSS: &str = "Train/GanLoss";
pub const TOTAL_LOSS: &str = "Train/TotalLoss";
pub const VAL_PIXEL_ACC: &str = "Val/PixelAcc";
pub const VAL_MEAN_IOU: &str = "Val/MeanIOU";
pub const VAL_PER_CLASS_ACC: &str = "Val/PerClassAcc";

/// One logged value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarEvent {
    pub name: String,
    pub value: f64,
    pub step: u64,
}

/// Destination for named scalar metrics.
pub trait ScalarSink {
    fn log_scalar(&mut self, name: &str, value: f64, step: u64) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Appends one JSON object per line to a file.
pub struct JsonlSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlSink {
    pub const FILE_NAME: &'static str = "scalars.jsonl";

    /// Opens (or creates) `scalars.jsonl` inside `dir`, appending to any
    /// existing content so resumed runs extend the same log.
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let path = dir.as_ref().join(Self::FILE_NAME);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(JsonlSink { path, writer: BufWriter::new(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ScalarSink for JsonlSink {
    fn log_scalar(&mut self, name: &str, value: f64, step: u64) -> Result<()> {
        let event = ScalarEvent { name: name.to_owned(), value, step };
        serde_json::to_writer(&mut self.writer, &event)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub events: Vec<ScalarEvent>,
}

impl MemorySink {
    /// `(step, value)` pairs logged under `name`, in logging order.
    pub fn series(&self, name: &str) -> Vec<(u64, f64)> {
        self.events.iter().filter(|e| e.name == name).map(|e| (e.step, e.value)).collect()
    }
}

impl ScalarSink for MemorySink {
    fn log_scalar(&mut self, name: &str, value: f64, step: u64) -> Result<()> {
        self.events.push(ScalarEvent { name: name.to_owned(), value, step });
        Ok(())
    }
}

/// Forwards events to another thread. Once the receiver is gone, events are
/// silently dropped.
pub struct ChannelSink {
    tx: mpsc::Sender<ScalarEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ScalarEvent>) -> Self {
        ChannelSink { tx }
    }
}

impl ScalarSink for ChannelSink {
    fn log_scalar(&mut self, name: &str, value: f64, step: u64) -> Result<()> {
        let _ = self.tx.send(ScalarEvent { name: name.to_owned(), value, step });
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ScalarSink for NullSink {
    fn log_scalar(&mut self, _name: &str, _value: f64, _step: u64) -> Result<()> {
        Ok(())
    }
}
