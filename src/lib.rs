//! Tick-indexed record/replay engine with VCR-style playback controls.
//!
//! A [`Recorder`] keys opaque payloads by a wall-clock-derived tick and
//! persists them as fixed-size segment files next to a `header.json`
//! metadata document. A [`Replayer`] plays a directory back through tick
//! callbacks at the original cadence, with play/pause/seek/step and
//! variable speed, correcting scheduling drift by catching up to the
//! wall clock.

pub mod clock;
pub mod codec;
pub mod error;
pub mod library;
pub mod meta;
pub mod range;
pub mod recorder;
pub mod replayer;
pub mod store;

pub use clock::{TickClock, TickMeta};
pub use codec::{BinaryCodec, JsonCodec, PayloadCodec, SegmentBlock};
pub use error::{Error, Result};
pub use library::{RecordingEntry, RecordingLibrary};
pub use meta::ReplayMeta;
pub use range::{RangeQuery, TickEntry};
pub use recorder::{Recorder, RecorderConfig, RecorderState};
pub use replayer::{PlayState, Replayer, ReplayerConfig};
pub use store::SegmentStore;
