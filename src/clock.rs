use std::time::Duration;

use tokio::time::Instant;

/// Position of a single tick on the recording timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickMeta {
    pub tick: u64,
    /// Milliseconds since the start of the recording: `tick * 1000 / tick_rate`.
    pub time_ms: f64,
    pub segment_index: u64,
}

impl TickMeta {
    pub fn compute(tick: u64, tick_rate: u32, segment_size: u64) -> Self {
        Self {
            tick,
            time_ms: tick_to_time_ms(tick, tick_rate),
            segment_index: segment_index(tick, segment_size),
        }
    }
}

pub fn tick_to_time_ms(tick: u64, tick_rate: u32) -> f64 {
    tick as f64 * 1000.0 / tick_rate as f64
}

pub fn time_ms_to_tick(ms: u64, tick_rate: u32) -> u64 {
    ms * tick_rate as u64 / 1000
}

pub fn segment_index(tick: u64, segment_size: u64) -> u64 {
    tick / segment_size
}

/// Pause-compensated monotonic tick clock.
///
/// Wall time spent paused does not advance the tick counter; total wall
/// elapsed time still includes it. Reads `tokio::time::Instant` so the
/// tokio test clock governs it under `start_paused`.
#[derive(Debug)]
pub struct TickClock {
    tick_rate: u32,
    started_at: Instant,
    paused_at: Option<Instant>,
    paused_total: Duration,
}

impl TickClock {
    pub fn start(tick_rate: u32) -> Self {
        Self {
            tick_rate,
            started_at: Instant::now(),
            paused_at: None,
            paused_total: Duration::ZERO,
        }
    }

    pub fn pause(&mut self) {
        if self.paused_at.is_none() {
            self.paused_at = Some(Instant::now());
        }
    }

    pub fn resume(&mut self) {
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_total += paused_at.elapsed();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Elapsed time excluding paused intervals. Frozen while paused.
    pub fn active_elapsed(&self) -> Duration {
        let now = self.paused_at.unwrap_or_else(Instant::now);
        now.saturating_duration_since(self.started_at)
            .saturating_sub(self.paused_total)
    }

    /// Elapsed wall time including completed pause intervals. While
    /// paused this is frozen at the pause start, so a recording stopped
    /// mid-pause does not count the open pause as duration.
    pub fn wall_elapsed(&self) -> Duration {
        let now = self.paused_at.unwrap_or_else(Instant::now);
        now.saturating_duration_since(self.started_at)
    }

    /// Tick index derived from the active elapsed time.
    pub fn current_tick(&self) -> u64 {
        self.active_elapsed().as_millis() as u64 * self.tick_rate as u64 / 1000
    }
}
