use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, info, trace};

use crate::clock::TickClock;
use crate::codec::{PayloadCodec, SegmentBlock};
use crate::meta::{write_meta, ReplayMeta};
use crate::store::SegmentStore;
use crate::{Error, Result};

pub const DEFAULT_TICK_RATE: u32 = 30;
pub const DEFAULT_SEGMENT_SIZE: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
    Paused,
}

impl RecorderState {
    fn name(self) -> &'static str {
        match self {
            RecorderState::Idle => "Idle",
            RecorderState::Recording => "Recording",
            RecorderState::Paused => "Paused",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RecorderConfig {
    /// Ticks per second. Fixed for the lifetime of a recording.
    pub tick_rate: u32,
    /// Ticks per segment file.
    pub segment_size: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            segment_size: DEFAULT_SEGMENT_SIZE,
        }
    }
}

/// Accepts a stream of opaque payloads and persists them as tick
/// segments.
///
/// The tick a payload lands on is derived from the monotonic clock, not
/// from caller cadence: recording twice within one tick window overwrites
/// the same key, which makes `record` idempotent per tick and drops
/// duplicates for free.
pub struct Recorder<T, C>
where
    C: PayloadCodec<T>,
{
    store: SegmentStore<T, C>,
    config: RecorderConfig,
    state: RecorderState,
    clock: Option<TickClock>,
    pending: BTreeMap<u64, T>,
    last_flush_tick: u64,
    flush_active: bool,
    meta: Option<ReplayMeta>,
}

impl<T, C> Recorder<T, C>
where
    C: PayloadCodec<T>,
{
    pub fn new(dir: impl Into<PathBuf>, codec: C, config: RecorderConfig) -> Result<Self> {
        if config.tick_rate == 0 {
            return Err(Error::InvalidArgs("tick_rate must be positive"));
        }
        if config.segment_size == 0 {
            return Err(Error::InvalidArgs("segment_size must be positive"));
        }
        Ok(Self {
            store: SegmentStore::new(dir, codec),
            config,
            state: RecorderState::Idle,
            clock: None,
            pending: BTreeMap::new(),
            last_flush_tick: 0,
            flush_active: false,
            meta: None,
        })
    }

    pub fn data_dir(&self) -> &Path {
        self.store.dir()
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// The wall-clock-derived tick while recording, `0` otherwise.
    pub fn current_tick(&self) -> u64 {
        match self.state {
            RecorderState::Recording => self.clock_tick(),
            _ => 0,
        }
    }

    /// Initializes the directory, writes the initial metadata and starts
    /// the tick clock.
    pub fn start(&mut self) -> Result<()> {
        if self.state != RecorderState::Idle {
            return Err(Error::invalid_state("start", "Idle", self.state.name()));
        }
        std::fs::create_dir_all(self.store.dir())?;
        let meta = ReplayMeta::new(self.config.tick_rate, self.config.segment_size);
        write_meta(self.store.dir(), &meta)?;
        self.meta = Some(meta);
        self.clock = Some(TickClock::start(self.config.tick_rate));
        self.pending.clear();
        self.last_flush_tick = 0;
        self.flush_active = false;
        self.state = RecorderState::Recording;
        info!(
            "recording started in {} ({} tps, {} ticks/segment)",
            self.store.dir().display(),
            self.config.tick_rate,
            self.config.segment_size
        );
        Ok(())
    }

    /// Buffers `data` under the current tick and flushes once the segment
    /// fills. I/O happens only inside the flush; a flush failure surfaces
    /// here while the buffered payloads stay pending for the next
    /// trigger.
    pub fn record(&mut self, data: T) -> Result<()> {
        if self.state != RecorderState::Recording {
            return Err(Error::invalid_state("record", "Recording", self.state.name()));
        }
        let tick = self.clock_tick();
        self.pending.insert(tick, data);
        trace!("buffered tick {tick}");

        if tick % self.config.segment_size == 0
            || tick - self.last_flush_tick >= self.config.segment_size
        {
            self.flush()?;
            self.last_flush_tick = tick;
        }
        Ok(())
    }

    /// Flushes the pending buffer and freezes the tick clock.
    pub fn pause(&mut self) -> Result<()> {
        if self.state != RecorderState::Recording {
            return Err(Error::invalid_state("pause", "Recording", self.state.name()));
        }
        self.flush()?;
        if let Some(clock) = self.clock.as_mut() {
            clock.pause();
        }
        self.state = RecorderState::Paused;
        debug!("recording paused");
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        if self.state != RecorderState::Paused {
            return Err(Error::invalid_state("resume", "Paused", self.state.name()));
        }
        if let Some(clock) = self.clock.as_mut() {
            clock.resume();
        }
        self.state = RecorderState::Recording;
        debug!("recording resumed");
        Ok(())
    }

    /// Flushes the remaining buffer, finalizes the metadata and returns
    /// it. `totalTicks` is pause-compensated; `totalDuration` is wall
    /// time with completed pauses included. Stopping while paused folds
    /// the open pause first, so neither the ticks nor the duration grow
    /// during it.
    pub fn stop(&mut self) -> Result<ReplayMeta> {
        if self.state == RecorderState::Idle {
            return Err(Error::invalid_state(
                "stop",
                "Recording or Paused",
                self.state.name(),
            ));
        }
        // Captured before the fold: stopping from Paused ends the wall
        // duration at the pause start.
        let total_duration = self
            .clock
            .as_ref()
            .map(|clock| clock.wall_elapsed().as_secs_f64() * 1000.0)
            .unwrap_or(0.0);
        if self.state == RecorderState::Paused {
            if let Some(clock) = self.clock.as_mut() {
                clock.resume();
            }
            self.state = RecorderState::Recording;
        }
        self.flush()?;

        let total_ticks = self.clock_tick();
        let mut meta = self
            .meta
            .take()
            .unwrap_or_else(|| ReplayMeta::new(self.config.tick_rate, self.config.segment_size));
        meta.total_ticks = total_ticks;
        meta.total_duration = total_duration;
        write_meta(self.store.dir(), &meta)?;

        self.clock = None;
        self.state = RecorderState::Idle;
        info!(
            "recording stopped: {} ticks over {:.0} ms",
            meta.total_ticks, meta.total_duration
        );
        Ok(meta)
    }

    fn clock_tick(&self) -> u64 {
        match self.clock.as_ref() {
            Some(clock) => clock.current_tick().max(1),
            None => 0,
        }
    }

    fn flush(&mut self) -> Result<()> {
        // A flush requested while one is active is dropped; its data
        // stays pending for the next trigger.
        if self.flush_active {
            return Ok(());
        }
        if self.pending.is_empty() {
            return Ok(());
        }
        self.flush_active = true;
        let result = self.flush_buckets();
        self.flush_active = false;
        result
    }

    /// Writes the pending buffer out one segment bucket at a time, so
    /// every key ends up in the file whose interval contains it. A bucket
    /// that was partially written by an earlier pause is merged rather
    /// than clobbered.
    fn flush_buckets(&mut self) -> Result<()> {
        let segment_size = self.config.segment_size;
        while let Some(first) = self.pending.keys().next().copied() {
            let bucket = first / segment_size;
            let lo = bucket * segment_size;
            let hi = lo + segment_size;

            let mut entries = match self.store.read_existing(bucket)? {
                Some(block) => block.data,
                None => BTreeMap::new(),
            };
            let ticks: Vec<u64> = self.pending.range(lo..hi).map(|(tick, _)| *tick).collect();
            for tick in &ticks {
                if let Some(value) = self.pending.remove(tick) {
                    entries.insert(*tick, value);
                }
            }
            let block = match SegmentBlock::from_entries(entries) {
                Some(block) => block,
                None => continue,
            };
            if let Err(err) = self.store.write_segment(bucket, &block) {
                // Return this bucket's fresh entries to the pending
                // buffer so the next trigger retries them.
                let mut data = block.data;
                for tick in ticks {
                    if let Some(value) = data.remove(&tick) {
                        self.pending.insert(tick, value);
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }
}
