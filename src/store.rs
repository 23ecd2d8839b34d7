use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use log::{debug, trace};

use crate::codec::{PayloadCodec, SegmentBlock};
use crate::{Error, Result};

/// Translates segment index <-> `segment_{k}.dat` and caches decoded
/// segments. Each store instance owns its cache exclusively; there is no
/// cross-instance locking.
pub struct SegmentStore<T, C> {
    dir: PathBuf,
    codec: C,
    cache: HashMap<u64, SegmentBlock<T>>,
}

impl<T, C> SegmentStore<T, C>
where
    C: PayloadCodec<T>,
{
    pub fn new(dir: impl Into<PathBuf>, codec: C) -> Self {
        Self {
            dir: dir.into(),
            codec,
            cache: HashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn segment_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("segment_{index}.dat"))
    }

    pub fn segment_exists(&self, index: u64) -> bool {
        self.segment_path(index).exists()
    }

    /// Atomically replaces `segment_{index}.dat`: encode, write to a temp
    /// name, fsync, rename. No partial file is ever observable.
    pub fn write_segment(&mut self, index: u64, block: &SegmentBlock<T>) -> Result<()> {
        let bytes = self.codec.encode(block)?;
        let path = self.segment_path(index);
        let tmp = path.with_extension("dat.tmp");
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        std::fs::rename(tmp, path)?;
        // Any cached copy is stale now.
        self.cache.remove(&index);
        debug!(
            "wrote segment {index} ({} ticks, {} bytes)",
            block.len(),
            bytes.len()
        );
        Ok(())
    }

    /// Returns the decoded segment, reading and decoding it on first
    /// access. Missing file -> `NotFound`, undecodable file -> `Corrupt`.
    pub fn load_segment(&mut self, index: u64) -> Result<&SegmentBlock<T>> {
        if !self.cache.contains_key(&index) {
            let block = self.read_segment(index)?;
            trace!("loaded segment {index} ({} ticks)", block.len());
            self.cache.insert(index, block);
        }
        Ok(&self.cache[&index])
    }

    /// Takes the current contents of a segment, from cache or disk,
    /// yielding `None` when the file does not exist. Used by the recorder
    /// to merge new entries into a partially written bucket.
    pub(crate) fn read_existing(&mut self, index: u64) -> Result<Option<SegmentBlock<T>>> {
        if let Some(block) = self.cache.remove(&index) {
            return Ok(Some(block));
        }
        match self.read_segment(index) {
            Ok(block) => Ok(Some(block)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Loads every existing segment in the range; missing files are
    /// skipped, decode and I/O failures surface.
    pub fn preload(&mut self, segments: RangeInclusive<u64>) -> Result<()> {
        for index in segments {
            match self.load_segment(index) {
                Ok(_) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Drops cached segments whose index is more than `window` away from
    /// `center`.
    pub fn evict_far_from(&mut self, center: u64, window: u64) {
        let before = self.cache.len();
        self.cache.retain(|&index, _| index.abs_diff(center) <= window);
        let dropped = before - self.cache.len();
        if dropped > 0 {
            trace!("evicted {dropped} segments far from {center}");
        }
    }

    pub fn is_cached(&self, index: u64) -> bool {
        self.cache.contains_key(&index)
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    fn read_segment(&self, index: u64) -> Result<SegmentBlock<T>> {
        let path = self.segment_path(index);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!(
                    "segment {index} at {}",
                    path.display()
                )))
            }
            Err(err) => return Err(err.into()),
        };
        self.codec.decode(&bytes)
    }
}
