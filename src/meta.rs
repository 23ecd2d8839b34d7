use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::{Error, Result};

pub const HEADER_FILE: &str = "header.json";

/// Recording metadata, one per directory (`header.json`).
///
/// Written with `totalTicks = 0` when recording starts and finalized on
/// stop; read-only thereafter. The replayer takes `tickRate` and
/// `segmentSize` from here so the two sides never need out-of-band
/// agreement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayMeta {
    /// RFC-3339 creation timestamp.
    pub created_at: String,
    pub tick_rate: u32,
    pub segment_size: u64,
    /// Highest tick index a payload may exist for, plus one. Zero until
    /// the recording is finalized.
    pub total_ticks: u64,
    /// Total wall-clock duration in milliseconds, pauses included.
    pub total_duration: f64,
}

impl ReplayMeta {
    pub fn new(tick_rate: u32, segment_size: u64) -> Self {
        let created_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"));
        Self {
            created_at,
            tick_rate,
            segment_size,
            total_ticks: 0,
            total_duration: 0.0,
        }
    }
}

pub fn header_path(dir: &Path) -> std::path::PathBuf {
    dir.join(HEADER_FILE)
}

/// Durable overwrite: write to a temp name, fsync, rename into place.
pub fn write_meta(dir: &Path, meta: &ReplayMeta) -> Result<()> {
    let path = header_path(dir);
    let tmp = dir.join(format!("{HEADER_FILE}.tmp"));
    let data = serde_json::to_vec_pretty(meta).map_err(|err| Error::Corrupt(err.to_string()))?;
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)?;
    file.write_all(&data)?;
    file.sync_all()?;
    std::fs::rename(tmp, path)?;
    Ok(())
}

pub fn read_meta(dir: &Path) -> Result<ReplayMeta> {
    let path = header_path(dir);
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound(format!("header at {}", path.display())))
        }
        Err(err) => return Err(err.into()),
    };
    serde_json::from_slice(&bytes).map_err(|err| Error::Corrupt(err.to_string()))
}
