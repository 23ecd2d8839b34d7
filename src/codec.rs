use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One decoded segment: a contiguous tick bucket's worth of payloads.
///
/// `data` is ordered by tick; `first_tick`/`last_tick` are the bounds of
/// the keys actually present, not of the bucket interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentBlock<T> {
    pub first_tick: u64,
    pub last_tick: u64,
    pub data: BTreeMap<u64, T>,
}

impl<T> SegmentBlock<T> {
    /// Builds a block from a non-empty tick map. Returns `None` when the
    /// map is empty (an empty segment has no bounds and is never written).
    pub fn from_entries(data: BTreeMap<u64, T>) -> Option<Self> {
        let first_tick = *data.keys().next()?;
        let last_tick = *data.keys().next_back()?;
        Some(Self {
            first_tick,
            last_tick,
            data,
        })
    }

    pub fn get(&self, tick: u64) -> Option<&T> {
        self.data.get(&tick)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Byte-level (de)serialization of segment blocks.
///
/// `decode(encode(s)) == s` for any well-formed block; tick keys are
/// preserved exactly and the logical ordering of the mapping is kept.
/// All segments in one recording directory must use the same codec.
pub trait PayloadCodec<T> {
    fn encode(&self, block: &SegmentBlock<T>) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<SegmentBlock<T>>;
}

/// The directory interchange codec: UTF-8 JSON with `firstTick`,
/// `lastTick` and a `data` object keyed by decimal tick strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> PayloadCodec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, block: &SegmentBlock<T>) -> Result<Vec<u8>> {
        serde_json::to_vec(block).map_err(|err| Error::Corrupt(err.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<SegmentBlock<T>> {
        serde_json::from_slice(bytes).map_err(|err| Error::Corrupt(err.to_string()))
    }
}

pub const SEGMENT_MAGIC: u32 = 0x544B_5347; // 'TKSG'
pub const SEGMENT_VERSION: u32 = 1;
const FRAME_LEN: usize = 12;

/// Checksummed binary codec: a fixed frame (magic, version, crc32 of the
/// body) followed by a bincode body. Decode rejects the file before
/// touching the body when the frame does not check out.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl<T> PayloadCodec<T> for BinaryCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, block: &SegmentBlock<T>) -> Result<Vec<u8>> {
        let body = bincode::serialize(block).map_err(|err| Error::Corrupt(err.to_string()))?;
        let mut out = Vec::with_capacity(FRAME_LEN + body.len());
        out.extend_from_slice(&SEGMENT_MAGIC.to_le_bytes());
        out.extend_from_slice(&SEGMENT_VERSION.to_le_bytes());
        out.extend_from_slice(&crc32(&body).to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<SegmentBlock<T>> {
        if bytes.len() < FRAME_LEN {
            return Err(Error::Corrupt("segment shorter than frame header".into()));
        }
        let magic = u32::from_le_bytes(bytes[0..4].try_into().expect("slice length"));
        let version = u32::from_le_bytes(bytes[4..8].try_into().expect("slice length"));
        let checksum = u32::from_le_bytes(bytes[8..12].try_into().expect("slice length"));
        if magic != SEGMENT_MAGIC {
            return Err(Error::Corrupt("segment magic mismatch".into()));
        }
        if version != SEGMENT_VERSION {
            return Err(Error::Corrupt(format!(
                "unsupported segment version {version}"
            )));
        }
        let body = &bytes[FRAME_LEN..];
        if crc32(body) != checksum {
            return Err(Error::Corrupt("segment crc mismatch".into()));
        }
        bincode::deserialize(body).map_err(|err| Error::Corrupt(err.to_string()))
    }
}

fn crc32(body: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(body);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> SegmentBlock<Vec<u8>> {
        let mut data = BTreeMap::new();
        data.insert(3, vec![1, 2, 3]);
        data.insert(7, vec![4]);
        data.insert(999, vec![]);
        SegmentBlock::from_entries(data).expect("non-empty")
    }

    #[test]
    fn bounds_come_from_the_keys() {
        let block = block();
        assert_eq!(block.first_tick, 3);
        assert_eq!(block.last_tick, 999);
        assert_eq!(block.len(), 3);
        assert!(SegmentBlock::<u32>::from_entries(BTreeMap::new()).is_none());
    }

    #[test]
    fn json_round_trip() {
        let block = block();
        let bytes = JsonCodec.encode(&block).expect("encode");
        let decoded: SegmentBlock<Vec<u8>> = JsonCodec.decode(&bytes).expect("decode");
        assert_eq!(decoded, block);
    }

    #[test]
    fn json_uses_interchange_keys() {
        let bytes = JsonCodec.encode(&block()).expect("encode");
        let text = String::from_utf8(bytes).expect("utf8");
        assert!(text.contains("\"firstTick\":3"));
        assert!(text.contains("\"lastTick\":999"));
        assert!(text.contains("\"data\""));
        // Tick keys serialize as decimal strings.
        assert!(text.contains("\"999\""));
    }

    #[test]
    fn binary_round_trip() {
        let block = block();
        let bytes = BinaryCodec.encode(&block).expect("encode");
        let decoded: SegmentBlock<Vec<u8>> = BinaryCodec.decode(&bytes).expect("decode");
        assert_eq!(decoded, block);
    }

    #[test]
    fn binary_rejects_corruption() {
        let mut bytes = BinaryCodec.encode(&block()).expect("encode");
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let err = <BinaryCodec as PayloadCodec<Vec<u8>>>::decode(&BinaryCodec, &bytes)
            .expect_err("crc mismatch");
        assert!(matches!(err, Error::Corrupt(_)));

        let err = <BinaryCodec as PayloadCodec<Vec<u8>>>::decode(&BinaryCodec, b"short")
            .expect_err("truncated");
        assert!(matches!(err, Error::Corrupt(_)));
    }
}
