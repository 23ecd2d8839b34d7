use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tickdeck::meta::write_meta;
use tickdeck::{JsonCodec, ReplayMeta, ReplayerConfig, SegmentBlock, SegmentStore, TickMeta};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Writes a recording directly through the store: payload `tick * 2` for
/// every tick given, grouped into time-bucketed segment files, plus a
/// finalized header.
pub fn write_recording(
    dir: &Path,
    tick_rate: u32,
    segment_size: u64,
    ticks: impl IntoIterator<Item = u64>,
) {
    let mut by_segment: BTreeMap<u64, BTreeMap<u64, u64>> = BTreeMap::new();
    let mut max_tick = 0;
    for tick in ticks {
        by_segment
            .entry(tick / segment_size)
            .or_default()
            .insert(tick, tick * 2);
        max_tick = max_tick.max(tick);
    }

    let mut store = SegmentStore::new(dir, JsonCodec);
    for (segment, data) in by_segment {
        let block = SegmentBlock::from_entries(data).expect("non-empty segment");
        store.write_segment(segment, &block).expect("write segment");
    }

    let mut meta = ReplayMeta::new(tick_rate, segment_size);
    meta.total_ticks = max_tick + 1;
    meta.total_duration = (max_tick + 1) as f64 * 1000.0 / tick_rate as f64;
    write_meta(dir, &meta).expect("write meta");
}

/// `(tick, payload, delivery instant)` per `on_tick` call.
pub type Events = Arc<Mutex<Vec<(u64, u64, Instant)>>>;

/// A replayer config that records every delivered tick into `events` and
/// signals the returned channel on `on_end`.
pub fn capture_config(events: &Events) -> (ReplayerConfig<u64>, mpsc::UnboundedReceiver<()>) {
    let sink = Arc::clone(events);
    let (done_tx, done_rx) = mpsc::unbounded_channel();
    let config = ReplayerConfig::new(move |payload: &u64, meta: TickMeta| {
        sink.lock()
            .expect("events lock")
            .push((meta.tick, *payload, Instant::now()));
    })
    .on_end(move || {
        let _ = done_tx.send(());
    });
    (config, done_rx)
}

pub fn delivered_ticks(events: &Events) -> Vec<u64> {
    events
        .lock()
        .expect("events lock")
        .iter()
        .map(|(tick, _, _)| *tick)
        .collect()
}
