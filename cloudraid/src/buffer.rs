//! Arena of received part bytes.
//!
//! Every accepted chunk lives in one slot addressed by a [`ChunkId`]. A
//! per-source index maps part offsets to slots so the tracker can assemble
//! any range without copying when a single chunk covers it.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use bytes::{Bytes, BytesMut};

/// Handle to one buffered chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(u64);

impl ChunkId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
struct Slot {
    source: usize,
    offset: u64,
    data: Bytes,
}

/// Owned storage for not-yet-delivered part bytes.
///
/// Segments inserted for one source must not overlap; the tracker only
/// inserts gaps it has not seen before.
#[derive(Debug)]
pub struct BufferPool {
    slots: HashMap<ChunkId, Slot>,
    index: Vec<BTreeMap<u64, ChunkId>>,
    next_id: u64,
    bytes_held: usize,
}

impl BufferPool {
    pub fn new(source_count: usize) -> Self {
        Self {
            slots: HashMap::new(),
            index: vec![BTreeMap::new(); source_count],
            next_id: 0,
            bytes_held: 0,
        }
    }

    /// Stores `data` as the bytes of `source` starting at part `offset`.
    pub fn insert(&mut self, source: usize, offset: u64, data: Bytes) -> ChunkId {
        let id = ChunkId(self.next_id);
        self.next_id += 1;
        self.bytes_held += data.len();
        self.index[source].insert(offset, id);
        self.slots.insert(
            id,
            Slot {
                source,
                offset,
                data,
            },
        );
        id
    }

    /// Bytes held by a chunk.
    pub fn get(&self, id: ChunkId) -> Option<&Bytes> {
        self.slots.get(&id).map(|slot| &slot.data)
    }

    /// Source and part offset of a chunk.
    pub fn location(&self, id: ChunkId) -> Option<(usize, u64)> {
        self.slots.get(&id).map(|slot| (slot.source, slot.offset))
    }

    /// Assembles `range` of `source`, or `None` if any byte is absent.
    pub fn read_range(&self, source: usize, range: Range<u64>) -> Option<Bytes> {
        if range.start >= range.end {
            return Some(Bytes::new());
        }
        let index = self.index.get(source)?;
        let (&first_offset, &first_id) = index.range(..=range.start).next_back()?;
        let first = &self.slots.get(&first_id)?.data;
        let first_end = first_offset + first.len() as u64;
        if first_end <= range.start {
            return None;
        }
        if first_end >= range.end {
            let from = (range.start - first_offset) as usize;
            let to = (range.end - first_offset) as usize;
            return Some(first.slice(from..to));
        }

        let mut out = BytesMut::with_capacity((range.end - range.start) as usize);
        out.extend_from_slice(&first[(range.start - first_offset) as usize..]);
        let mut cursor = first_end;
        for (&offset, id) in index.range(range.start + 1..range.end) {
            if offset != cursor {
                return None;
            }
            let data = &self.slots.get(id)?.data;
            let take = ((range.end - offset) as usize).min(data.len());
            out.extend_from_slice(&data[..take]);
            cursor = offset + take as u64;
            if cursor >= range.end {
                break;
            }
        }
        if cursor < range.end {
            return None;
        }
        Some(out.freeze())
    }

    /// Drops every byte of `source` below part offset `offset`.
    ///
    /// Returns the number of bytes released.
    pub fn release_below(&mut self, source: usize, offset: u64) -> usize {
        let Some(index) = self.index.get_mut(source) else {
            return 0;
        };
        let below: Vec<(u64, ChunkId)> = index.range(..offset).map(|(&o, &id)| (o, id)).collect();
        let mut released = 0;
        for (start, id) in below {
            let Some(slot) = self.slots.get_mut(&id) else {
                continue;
            };
            let end = start + slot.data.len() as u64;
            if end <= offset {
                released += slot.data.len();
                self.slots.remove(&id);
                index.remove(&start);
            } else {
                let cut = (offset - start) as usize;
                slot.data = slot.data.slice(cut..);
                slot.offset = offset;
                released += cut;
                index.remove(&start);
                index.insert(offset, id);
            }
        }
        self.bytes_held -= released;
        released
    }

    /// Bytes currently held.
    pub fn bytes_held(&self) -> usize {
        self.bytes_held
    }

    /// Chunks currently held.
    pub fn chunk_count(&self) -> usize {
        self.slots.len()
    }
}
