use crate::clock::{time_ms_to_tick, TickMeta};
use crate::codec::PayloadCodec;
use crate::meta::ReplayMeta;
use crate::store::SegmentStore;
use crate::{Error, Result};

/// An inclusive slice of the recording, addressed by tick or by time.
/// Exactly one of the two ranges must be supplied.
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeQuery {
    /// Inclusive millisecond interval on the recording timeline.
    pub time_range: Option<(u64, u64)>,
    /// Inclusive tick interval.
    pub tick_range: Option<(u64, u64)>,
    /// Emit `data: None` placeholders for missing ticks instead of
    /// skipping them.
    pub include_partial_ticks: bool,
    /// Advisory bound for memory-conscious scans; when set, the scan
    /// holds at most one segment in cache at a time.
    pub chunk_size: Option<usize>,
}

impl RangeQuery {
    pub fn ticks(start: u64, end: u64) -> Self {
        Self {
            tick_range: Some((start, end)),
            ..Default::default()
        }
    }

    pub fn time_ms(start: u64, end: u64) -> Self {
        Self {
            time_range: Some((start, end)),
            ..Default::default()
        }
    }

    pub fn include_partial_ticks(mut self, include: bool) -> Self {
        self.include_partial_ticks = include;
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickEntry<T> {
    /// `None` marks a placeholder for a tick with no recorded payload.
    pub data: Option<T>,
    pub meta: TickMeta,
}

/// Walks the query's tick interval segment by segment and returns the
/// ordered entries. Missing segment files contribute no entries; decode
/// and I/O failures surface.
pub(crate) fn collect_range<T, C>(
    store: &mut SegmentStore<T, C>,
    meta: &ReplayMeta,
    query: &RangeQuery,
) -> Result<Vec<TickEntry<T>>>
where
    T: Clone,
    C: PayloadCodec<T>,
{
    let (start, end) = match resolve_bounds(query, meta)? {
        Some(bounds) => bounds,
        None => return Ok(Vec::new()),
    };
    let segment_size = meta.segment_size;
    let first_segment = start / segment_size;
    let last_segment = end / segment_size;
    if query.chunk_size.is_none() {
        store.preload(first_segment..=last_segment)?;
    }

    let mut entries = Vec::new();
    for segment in first_segment..=last_segment {
        let block = match store.load_segment(segment) {
            Ok(block) => Some(block),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err),
        };
        let segment_lo = segment * segment_size;
        let segment_hi = segment_lo + segment_size - 1;
        for tick in start.max(segment_lo)..=end.min(segment_hi) {
            match block.and_then(|block| block.get(tick)) {
                Some(value) => entries.push(TickEntry {
                    data: Some(value.clone()),
                    meta: TickMeta::compute(tick, meta.tick_rate, segment_size),
                }),
                None if query.include_partial_ticks => entries.push(TickEntry {
                    data: None,
                    meta: TickMeta::compute(tick, meta.tick_rate, segment_size),
                }),
                None => {}
            }
        }
        if query.chunk_size.is_some() {
            store.evict_far_from(segment, 0);
        }
    }
    Ok(entries)
}

/// Normalizes the query to an inclusive tick interval clamped to
/// `[0, totalTicks - 1]`. `None` when the recording holds no ticks.
fn resolve_bounds(query: &RangeQuery, meta: &ReplayMeta) -> Result<Option<(u64, u64)>> {
    let (start, end) = match (query.tick_range, query.time_range) {
        (Some(_), Some(_)) | (None, None) => {
            return Err(Error::InvalidArgs(
                "supply exactly one of tick_range or time_range",
            ))
        }
        (Some((start, end)), None) => (start, end),
        (None, Some((start, end))) => (
            time_ms_to_tick(start, meta.tick_rate),
            time_ms_to_tick(end, meta.tick_rate),
        ),
    };
    if start > end {
        return Err(Error::InvalidArgs("range start exceeds range end"));
    }
    if meta.total_ticks == 0 {
        return Ok(None);
    }
    let max_tick = meta.total_ticks - 1;
    Ok(Some((start.min(max_tick), end.min(max_tick))))
}
