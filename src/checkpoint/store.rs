use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::checkpoint::record::CheckpointRecord;
use crate::error::Result;

const EXTENSION: &str = "ckpt.json";

/// Which record of an experiment directory to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointTag {
    /// The record written at a given global iteration.
    Step(u64),
    /// The most recently written record.
    Last,
    /// The record with the highest validation score so far.
    Best,
}

impl CheckpointTag {
    pub fn file_name(&self) -> String {
        match self {
            CheckpointTag::Step(step) => format!("{step}.{EXTENSION}"),
            CheckpointTag::Last => format!("last.{EXTENSION}"),
            CheckpointTag::Best => format!("best.{EXTENSION}"),
        }
    }
}

impl fmt::Display for CheckpointTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointTag::Step(step) => write!(f, "step {step}"),
            CheckpointTag::Last => write!(f, "last"),
            CheckpointTag::Best => write!(f, "best"),
        }
    }
}

/// JSON checkpoint records inside one experiment directory.
///
/// Every write goes to a hidden temporary file in the same directory which is
/// flushed to disk and then renamed over the destination, so readers see
/// either the previous record or the complete new one.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(CheckpointStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, tag: CheckpointTag) -> PathBuf {
        self.dir.join(tag.file_name())
    }

    pub fn exists(&self, tag: CheckpointTag) -> bool {
        self.path(tag).is_file()
    }

    fn write_atomic(&self, dest: &Path, bytes: &[u8]) -> Result<()> {
        let name = dest.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let tmp = self.dir.join(format!(".{name}.tmp"));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, dest)?;
        sync_dir(&self.dir)
    }

    /// Writes `record` under `tag`, replacing any previous record there.
    /// Records holding NaN or infinite values are refused and nothing on
    /// disk changes.
    pub fn save(&self, record: &CheckpointRecord, tag: CheckpointTag) -> Result<PathBuf> {
        record.ensure_finite()?;
        let bytes = serde_json::to_vec_pretty(record)?;
        let path = self.path(tag);
        self.write_atomic(&path, &bytes)?;
        info!("=> Saved checkpoint '{}'", path.display());
        Ok(path)
    }

    /// Reads the record stored under `tag`; `Ok(None)` if there is none.
    pub fn load(&self, tag: CheckpointTag) -> Result<Option<CheckpointRecord>> {
        let path = self.path(tag);
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        let record: CheckpointRecord = serde_json::from_slice(&bytes)?;
        record.ensure_supported()?;
        Ok(Some(record))
    }

    fn copy_record(&self, from: CheckpointTag, to: CheckpointTag) -> Result<PathBuf> {
        let bytes = fs::read(self.path(from))?;
        let dest = self.path(to);
        self.write_atomic(&dest, &bytes)?;
        Ok(dest)
    }

    /// Copies the record under `tag` byte-for-byte to the best slot.
    /// Later writes to `tag` do not affect the copy.
    pub fn promote_to_best(&self, tag: CheckpointTag) -> Result<PathBuf> {
        let dest = self.copy_record(tag, CheckpointTag::Best)?;
        info!("=> Saved best checkpoint '{}'", dest.display());
        Ok(dest)
    }

    /// Copies the record under `tag` to the last slot.
    pub fn mark_last(&self, tag: CheckpointTag) -> Result<PathBuf> {
        self.copy_record(tag, CheckpointTag::Last)
    }

    /// Global iterations with a step record, ascending.
    pub fn steps(&self) -> Result<Vec<u64>> {
        let suffix = format!(".{EXTENSION}");
        let mut steps: Vec<u64> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                name.strip_suffix(&suffix)?.parse().ok()
            })
            .collect();
        steps.sort_unstable();
        Ok(steps)
    }
}

/// Flushes directory entries so a completed rename survives a crash.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    fs::File::open(dir)?.sync_all()?;
    Ok(())
}

// Directories cannot be opened as files on Windows.
#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
