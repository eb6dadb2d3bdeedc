//! Append-only memory-mapped write segment
//!
//! A write segment maps byte strings to densely increasing ids. The backing
//! file is fixed-capacity and pre-allocated: a 4-byte magic header, framed
//! records, zero fill. Opening an existing file rebuilds the in-memory state
//! with a recovery scan that walks the records by their marker bytes.

use std::fs::OpenOptions;
use std::ops::Range;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use parking_lot::RwLock;

use crate::codec::{
    escape, fnv1a, framed_len, id_decode, is_id_byte, term_encode, unescape, MARK_ID1, MARK_ID2,
    MARK_TXT,
};
use crate::error::{Result, TermdexError};
use crate::pattern::{self, Node};

use super::types::SegmentStatus;

/// Magic header of a write-segment file.
pub const WAL_MAGIC: [u8; 4] = *b"TDW1";
const HEADER_LEN: usize = 4;

/// Bound on a hash-index probe chain before the table is extended.
const MAX_PROBE: usize = 32;
const INITIAL_SLOTS: usize = 1024;

/// Open-addressed `(hash, payload)` table for exact-match lookup.
///
/// The payload is a record position here and an id in compact segments;
/// neither is ever 0, which doubles as the empty-slot sentinel. Insertions
/// that would overflow the bounded probe chain double the table and reinsert
/// everything.
pub(crate) struct HashIndex {
    slots: Vec<(u64, u32)>,
}

impl HashIndex {
    pub(crate) fn new() -> Self {
        Self {
            slots: vec![(0, 0); INITIAL_SLOTS],
        }
    }

    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    /// Candidate payloads for a hash, in probe order.
    pub(crate) fn candidates(&self, hash: u64) -> impl Iterator<Item = u32> + '_ {
        let mask = self.mask();
        let start = (hash as usize) & mask;
        (0..MAX_PROBE)
            .map_while(move |i| {
                let (h, pos) = self.slots[(start + i) & mask];
                if pos == 0 {
                    None
                } else if h == hash {
                    Some(Some(pos))
                } else {
                    Some(None)
                }
            })
            .flatten()
    }

    pub(crate) fn insert(&mut self, hash: u64, pos: u32) {
        loop {
            let mask = self.mask();
            let start = (hash as usize) & mask;
            for i in 0..MAX_PROBE {
                let slot = &mut self.slots[(start + i) & mask];
                if slot.1 == 0 {
                    *slot = (hash, pos);
                    return;
                }
            }
            self.extend();
        }
    }

    fn extend(&mut self) {
        let mut new_cap = self.slots.len() * 2;
        'retry: loop {
            let mut new_slots = vec![(0u64, 0u32); new_cap];
            let mask = new_cap - 1;
            for &(hash, pos) in self.slots.iter().filter(|slot| slot.1 != 0) {
                let start = (hash as usize) & mask;
                let mut placed = false;
                for i in 0..MAX_PROBE {
                    let slot = &mut new_slots[(start + i) & mask];
                    if slot.1 == 0 {
                        *slot = (hash, pos);
                        placed = true;
                        break;
                    }
                }
                if !placed {
                    new_cap *= 2;
                    continue 'retry;
                }
            }
            self.slots = new_slots;
            return;
        }
    }
}

/// A record located inside the mapped region.
struct RawRecord {
    id: u64,
    text: Range<usize>,
    end: usize,
}

/// Parse the framed record starting at `start`. Escaped text never contains
/// marker bytes, so the text span is found by a plain scan.
fn parse_record(data: &[u8], start: usize) -> std::result::Result<RawRecord, String> {
    let mut pos = start;
    let id1_start = pos;
    while pos < data.len() && is_id_byte(data[pos]) {
        pos += 1;
    }
    if pos >= data.len() || data[pos] != MARK_ID1 || pos == id1_start {
        return Err(format!("missing leading id marker at offset {}", pos));
    }
    let id1 = id_decode(&data[id1_start..pos]).map_err(|e| e.to_string())?;
    pos += 1;

    let text_start = pos;
    while pos < data.len() && data[pos] != MARK_TXT {
        pos += 1;
    }
    if pos >= data.len() {
        return Err(format!("unterminated record text at offset {}", text_start));
    }
    let text_end = pos;
    pos += 1;

    let id2_start = pos;
    while pos < data.len() && is_id_byte(data[pos]) {
        pos += 1;
    }
    if pos >= data.len() || data[pos] != MARK_ID2 || pos == id2_start {
        return Err(format!("missing record terminator at offset {}", pos));
    }
    let id2 = id_decode(&data[id2_start..pos]).map_err(|e| e.to_string())?;
    if id1 != id2 {
        return Err(format!("embedded id mismatch: {} != {}", id1, id2));
    }
    Ok(RawRecord {
        id: id1,
        text: text_start..text_end,
        end: pos + 1,
    })
}

struct WalInner {
    map: Option<MmapMut>,
    write_pos: usize,
    next_id: u32,
    /// Dense `id - id_base` to record-offset table.
    offsets: Vec<u32>,
    index: HashIndex,
}

/// Durable, memory-mapped, append-only dictionary segment.
pub struct WalSegment {
    path: PathBuf,
    id_base: u32,
    capacity: usize,
    inner: RwLock<WalInner>,
    status: SegmentStatus,
}

impl WalSegment {
    /// Create a fresh segment file, pre-allocated to `capacity` bytes.
    pub fn create(path: &Path, id_base: u32, capacity: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.set_len(capacity as u64)?;
        let mut map = unsafe { MmapMut::map_mut(&file)? };
        map[..HEADER_LEN].copy_from_slice(&WAL_MAGIC);
        Ok(Self {
            path: path.to_path_buf(),
            id_base,
            capacity,
            inner: RwLock::new(WalInner {
                map: Some(map),
                write_pos: HEADER_LEN,
                next_id: id_base,
                offsets: Vec::new(),
                index: HashIndex::new(),
            }),
            status: SegmentStatus::new(),
        })
    }

    /// Open an existing segment file and rebuild state with a recovery scan.
    pub fn open(path: &Path, id_base: u32) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let capacity = file.metadata()?.len() as usize;
        let corrupt = |reason: String| TermdexError::CorruptSegment {
            path: path.to_path_buf(),
            reason,
        };
        if capacity < HEADER_LEN {
            return Err(corrupt("file shorter than header".to_string()));
        }
        let map = unsafe { MmapMut::map_mut(&file)? };
        if map[..HEADER_LEN] != WAL_MAGIC {
            return Err(corrupt("bad magic header".to_string()));
        }

        let mut pos = HEADER_LEN;
        let mut next_id = id_base;
        let mut offsets = Vec::new();
        let mut index = HashIndex::new();
        while pos < capacity && map[pos] != 0 {
            let record = parse_record(&map, pos).map_err(&corrupt)?;
            if record.id != next_id as u64 {
                return Err(corrupt(format!(
                    "expected id {}, found {}",
                    next_id, record.id
                )));
            }
            let text = &map[record.text.clone()];
            index.insert(fnv1a(text.iter().copied()), pos as u32);
            offsets.push(pos as u32);
            next_id += 1;
            pos = record.end;
        }
        if map[pos..].iter().any(|&b| b != 0) {
            return Err(corrupt(format!(
                "trailing bytes after last record at offset {}",
                pos
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            id_base,
            capacity,
            inner: RwLock::new(WalInner {
                map: Some(map),
                write_pos: pos,
                next_id,
                offsets,
                index,
            }),
            status: SegmentStatus::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn id_base(&self) -> u32 {
        self.id_base
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn word_count(&self) -> u32 {
        self.inner.read().next_id - self.id_base
    }

    pub fn data_len(&self) -> u64 {
        self.inner.read().write_pos as u64
    }

    pub fn status(&self) -> &SegmentStatus {
        &self.status
    }

    /// Return the existing id for a string, or append it and assign the next
    /// id. Re-adding an existing string never duplicates.
    pub fn add(&self, term: &[u8]) -> Result<u32> {
        let escaped = escape(term);
        let hash = fnv1a(escaped.iter().copied());
        {
            let inner = self.inner.read();
            let map = inner.map.as_ref().ok_or(TermdexError::SegmentClosed)?;
            if let Some(id) = find_existing(map, &inner.index, hash, &escaped) {
                return Ok(id);
            }
        }

        let mut inner = self.inner.write();
        let WalInner {
            map,
            write_pos,
            next_id,
            offsets,
            index,
        } = &mut *inner;
        let map = map.as_mut().ok_or(TermdexError::SegmentClosed)?;
        // A concurrent writer may have appended the same string.
        if let Some(id) = find_existing(map, index, hash, &escaped) {
            return Ok(id);
        }

        let id = *next_id;
        let needed = framed_len(escaped.len(), id as u64);
        if HEADER_LEN + needed > self.capacity {
            // Would never fit, even in an empty segment; rotation cannot help.
            return Err(TermdexError::BufferTooSmall {
                needed,
                available: self.capacity - HEADER_LEN,
            });
        }
        if *write_pos + needed > self.capacity {
            return Err(TermdexError::SegmentFull);
        }
        term_encode(&mut map[*write_pos..*write_pos + needed], &escaped, id as u64)?;
        index.insert(hash, *write_pos as u32);
        offsets.push(*write_pos as u32);
        *next_id += 1;
        *write_pos += needed;
        Ok(id)
    }

    /// Exact-match lookup.
    pub fn get_id(&self, term: &[u8]) -> Result<Option<u32>> {
        let escaped = escape(term);
        let hash = fnv1a(escaped.iter().copied());
        let inner = self.inner.read();
        let map = inner.map.as_ref().ok_or(TermdexError::SegmentClosed)?;
        Ok(find_existing(map, &inner.index, hash, &escaped))
    }

    /// Reverse lookup by id; `None` outside this segment's range.
    pub fn get_term(&self, id: u32) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.read();
        let map = inner.map.as_ref().ok_or(TermdexError::SegmentClosed)?;
        if id < self.id_base || id >= inner.next_id {
            return Ok(None);
        }
        let pos = inner.offsets[(id - self.id_base) as usize] as usize;
        let record = parse_record(map, pos).map_err(|reason| TermdexError::CorruptSegment {
            path: self.path.clone(),
            reason,
        })?;
        Ok(Some(unescape(&map[record.text])?))
    }

    /// Scan every record with a forward matcher tree.
    pub fn search(&self, node: &Node) -> Result<Vec<u32>> {
        let inner = self.inner.read();
        let map = inner.map.as_ref().ok_or(TermdexError::SegmentClosed)?;
        let mut out = Vec::new();
        for (i, &off) in inner.offsets.iter().enumerate() {
            let record =
                parse_record(map, off as usize).map_err(|reason| TermdexError::CorruptSegment {
                    path: self.path.clone(),
                    reason,
                })?;
            let term = unescape(&map[record.text])?;
            if pattern::is_match(node, &term) {
                out.push(self.id_base + i as u32);
            }
        }
        Ok(out)
    }

    /// Copy of the live record region, used for compression.
    pub fn raw_records(&self) -> Result<Vec<u8>> {
        let inner = self.inner.read();
        let map = inner.map.as_ref().ok_or(TermdexError::SegmentClosed)?;
        Ok(map[HEADER_LEN..inner.write_pos].to_vec())
    }

    /// Force the mapped region to durable storage.
    pub fn flush(&self) -> Result<()> {
        let inner = self.inner.read();
        let map = inner.map.as_ref().ok_or(TermdexError::SegmentClosed)?;
        map.flush()?;
        Ok(())
    }

    /// Flush, unmap and mark closed; all further operations fail.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(map) = inner.map.take() {
            map.flush()?;
        }
        self.status.set_closed();
        Ok(())
    }
}

fn find_existing(map: &[u8], index: &HashIndex, hash: u64, escaped: &[u8]) -> Option<u32> {
    for pos in index.candidates(hash) {
        if let Ok(record) = parse_record(map, pos as usize) {
            if &map[record.text.clone()] == escaped {
                return Some(record.id as u32);
            }
        }
    }
    None
}
