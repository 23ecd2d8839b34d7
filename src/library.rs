use std::path::{Path, PathBuf};

use log::debug;

use crate::meta::{read_meta, ReplayMeta, HEADER_FILE};
use crate::{Error, Result};

/// One recording directory under a library root.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingEntry {
    /// Directory name, used as the recording's identifier.
    pub name: String,
    pub path: PathBuf,
    pub meta: ReplayMeta,
}

/// A base directory holding one subdirectory per recording. Provides
/// discovery and cleanup across recordings; the recorder and replayer
/// themselves always work on a single recording directory.
#[derive(Debug, Clone)]
pub struct RecordingLibrary {
    base_dir: PathBuf,
}

impl RecordingLibrary {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// The directory a recording of this name lives (or would live) in.
    pub fn recording_dir(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.recording_dir(name).join(HEADER_FILE).exists()
    }

    /// Lists every recording under the base directory, sorted by name.
    /// Subdirectories without a readable header are skipped: a crashed
    /// recorder may leave one behind and it should not break discovery.
    pub fn recordings(&self) -> Result<Vec<RecordingEntry>> {
        let mut entries = Vec::new();
        if !self.base_dir.exists() {
            return Ok(entries);
        }
        for entry in std::fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let path = entry.path();
            let name = match path.file_name().and_then(|name| name.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            match read_meta(&path) {
                Ok(meta) => entries.push(RecordingEntry { name, path, meta }),
                Err(err) => {
                    debug!("skipping {}: {err}", path.display());
                }
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Removes a recording directory and everything in it.
    pub fn delete(&self, name: &str) -> Result<()> {
        let dir = self.recording_dir(name);
        if !dir.join(HEADER_FILE).exists() {
            return Err(Error::NotFound(format!("recording {name}")));
        }
        std::fs::remove_dir_all(&dir)?;
        debug!("deleted recording {name}");
        Ok(())
    }

    /// Total on-disk size of all recordings, in bytes.
    pub fn total_size(&self) -> Result<u64> {
        let mut total = 0;
        for recording in self.recordings()? {
            for entry in std::fs::read_dir(&recording.path)? {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    total += entry.metadata()?.len();
                }
            }
        }
        Ok(total)
    }
}
