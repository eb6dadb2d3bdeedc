//! Immutable compact segment
//!
//! A compact segment is the byte-reversed record region of one or more
//! write segments, newest data first, behind a small magic header. Reversal
//! puts the most recently added records at the start of a forward scan, and
//! pattern scans run the inverted matcher tree directly over the reversed
//! bytes without restoring them.

use std::fs::File;
use std::ops::Range;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use parking_lot::RwLock;

use crate::codec::{escape, fnv1a, id_decode, is_id_byte, unescape, MARK_ID1, MARK_ID2, MARK_TXT};
use crate::error::{Result, TermdexError};
use crate::pattern::{self, Node};

use super::types::SegmentStatus;
use super::wal::HashIndex;

/// Magic header of a compact-segment file.
pub const COMPACT_MAGIC: [u8; 4] = *b"TDC1";
const HEADER_LEN: usize = 4;

/// Read-only dictionary segment over reversed record data.
pub struct CompactSegment {
    path: PathBuf,
    id_base: u32,
    word_count: u32,
    data_len: u64,
    map: RwLock<Option<Mmap>>,
    /// Reversed-text spans, indexed by `id - id_base`.
    spans: Vec<Range<usize>>,
    /// Span indices in on-disk order, newest record first.
    order: Vec<u32>,
    index: HashIndex,
    status: SegmentStatus,
}

/// Decode an id stored back-to-front inside reversed data.
fn id_decode_reversed(bytes: &[u8]) -> Result<u64> {
    let forward: Vec<u8> = bytes.iter().rev().copied().collect();
    id_decode(&forward)
}

impl CompactSegment {
    /// Map an existing file and index its records. The expected id range
    /// comes from the file name; the scan verifies the content covers it
    /// exactly.
    pub fn open(path: &Path, id_base: u32, word_count: u32) -> Result<Self> {
        let corrupt = |reason: String| TermdexError::CorruptSegment {
            path: path.to_path_buf(),
            reason,
        };
        let file = File::open(path)?;
        let map = unsafe { Mmap::map(&file)? };
        if map.len() < HEADER_LEN || map[..HEADER_LEN] != COMPACT_MAGIC {
            return Err(corrupt("bad magic header".to_string()));
        }

        let total = map.len();
        let mut spans: Vec<Option<Range<usize>>> = vec![None; word_count as usize];
        let mut order = Vec::with_capacity(word_count as usize);
        let mut index = HashIndex::new();
        let mut pos = HEADER_LEN;
        while pos < total {
            // Reversed frame: MARK_ID2 ID' MARK_TXT TEXT' MARK_ID1 ID'.
            if map[pos] != MARK_ID2 {
                return Err(corrupt(format!("missing record terminator at offset {}", pos)));
            }
            pos += 1;
            let id2_start = pos;
            while pos < total && is_id_byte(map[pos]) {
                pos += 1;
            }
            if pos >= total || map[pos] != MARK_TXT || pos == id2_start {
                return Err(corrupt(format!("missing text marker at offset {}", pos)));
            }
            let id2 = id_decode_reversed(&map[id2_start..pos])?;
            pos += 1;

            let text_start = pos;
            while pos < total && map[pos] != MARK_ID1 {
                pos += 1;
            }
            if pos >= total {
                return Err(corrupt(format!("unterminated record text at offset {}", text_start)));
            }
            let text = text_start..pos;
            pos += 1;

            let id1_start = pos;
            while pos < total && is_id_byte(map[pos]) {
                pos += 1;
            }
            if pos == id1_start {
                return Err(corrupt(format!("missing leading id at offset {}", id1_start)));
            }
            let id1 = id_decode_reversed(&map[id1_start..pos])?;
            if id1 != id2 {
                return Err(corrupt(format!("embedded id mismatch: {} != {}", id1, id2)));
            }
            if id1 < id_base as u64 || id1 >= id_base as u64 + word_count as u64 {
                return Err(corrupt(format!("id {} outside expected range", id1)));
            }
            let slot = (id1 as u32 - id_base) as usize;
            if spans[slot].is_some() {
                return Err(corrupt(format!("duplicate id {}", id1)));
            }
            // Hashing the reversed span back-to-front matches the forward hash.
            index.insert(fnv1a(map[text.clone()].iter().rev().copied()), id1 as u32);
            spans[slot] = Some(text);
            order.push(slot as u32);
        }

        let spans = spans
            .into_iter()
            .enumerate()
            .map(|(i, span)| span.ok_or_else(|| corrupt(format!("missing id {}", id_base + i as u32))))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            path: path.to_path_buf(),
            id_base,
            word_count,
            data_len: (total - HEADER_LEN) as u64,
            map: RwLock::new(Some(map)),
            spans,
            order,
            index,
            status: SegmentStatus::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn id_base(&self) -> u32 {
        self.id_base
    }

    pub fn word_count(&self) -> u32 {
        self.word_count
    }

    pub fn data_len(&self) -> u64 {
        self.data_len
    }

    pub fn status(&self) -> &SegmentStatus {
        &self.status
    }

    /// Exact-match lookup.
    pub fn get_id(&self, term: &[u8]) -> Result<Option<u32>> {
        let escaped = escape(term);
        let hash = fnv1a(escaped.iter().copied());
        let guard = self.map.read();
        let map = guard.as_ref().ok_or(TermdexError::SegmentClosed)?;
        for id in self.index.candidates(hash) {
            let span = self.spans[(id - self.id_base) as usize].clone();
            if map[span].iter().rev().eq(escaped.iter()) {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Reverse lookup by id; `None` outside this segment's range.
    pub fn get_term(&self, id: u32) -> Result<Option<Vec<u8>>> {
        if id < self.id_base || id - self.id_base >= self.word_count {
            return Ok(None);
        }
        let guard = self.map.read();
        let map = guard.as_ref().ok_or(TermdexError::SegmentClosed)?;
        let span = self.spans[(id - self.id_base) as usize].clone();
        let forward: Vec<u8> = map[span].iter().rev().copied().collect();
        Ok(Some(unescape(&forward)?))
    }

    /// Scan every record with an inverted matcher tree, newest first.
    pub fn search(&self, inverted: &Node) -> Result<Vec<u32>> {
        let guard = self.map.read();
        let map = guard.as_ref().ok_or(TermdexError::SegmentClosed)?;
        let mut out = Vec::new();
        for &slot in &self.order {
            let span = self.spans[slot as usize].clone();
            let forward = unescape(&map[span].iter().rev().copied().collect::<Vec<u8>>())?;
            let reversed: Vec<u8> = forward.iter().rev().copied().collect();
            if pattern::is_match(inverted, &reversed) {
                out.push(self.id_base + slot);
            }
        }
        Ok(out)
    }

    /// Copy of the reversed record region, used when merging.
    pub fn region(&self) -> Result<Vec<u8>> {
        let guard = self.map.read();
        let map = guard.as_ref().ok_or(TermdexError::SegmentClosed)?;
        Ok(map[HEADER_LEN..].to_vec())
    }

    /// Unmap and mark closed; all further operations fail.
    pub fn close(&self) -> Result<()> {
        self.map.write().take();
        self.status.set_closed();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::Pattern;
    use crate::segment::wal::WalSegment;
    use tempfile::TempDir;

    /// Build a compact file from write segments, newest segment first.
    fn compact_from(dir: &TempDir, name: &str, wals: &[&WalSegment]) -> PathBuf {
        let mut bytes = COMPACT_MAGIC.to_vec();
        for wal in wals {
            let mut region = wal.raw_records().unwrap();
            region.reverse();
            bytes.extend_from_slice(&region);
        }
        let path = dir.path().join(name);
        std::fs::write(&path, &bytes).unwrap();
        path
    }

    fn sample(dir: &TempDir) -> CompactSegment {
        let wal = WalSegment::create(&dir.path().join("s.wal"), 1, 4096).unwrap();
        wal.add(b"getValue").unwrap();
        wal.add(b"setValue").unwrap();
        wal.add(b"binary\x00\x01payload").unwrap();
        let path = compact_from(dir, "s.fmi", &[&wal]);
        CompactSegment::open(&path, 1, 3).unwrap()
    }

    #[test]
    fn test_open_and_lookup() {
        let dir = TempDir::new().unwrap();
        let seg = sample(&dir);
        assert_eq!(seg.word_count(), 3);
        assert_eq!(seg.get_id(b"getValue").unwrap(), Some(1));
        assert_eq!(seg.get_id(b"setValue").unwrap(), Some(2));
        assert_eq!(seg.get_id(b"missing").unwrap(), None);
        assert_eq!(
            seg.get_term(3).unwrap().as_deref(),
            Some(&b"binary\x00\x01payload"[..])
        );
        assert_eq!(seg.get_term(4).unwrap(), None);
        assert_eq!(seg.get_term(0).unwrap(), None);
    }

    #[test]
    fn test_search_uses_inverted_tree() {
        let dir = TempDir::new().unwrap();
        let seg = sample(&dir);
        let pattern = Pattern::new("Value$").unwrap();
        let mut ids = seg.search(pattern.inverted()).unwrap();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);

        let pattern = Pattern::new("^get").unwrap();
        assert_eq!(seg.search(pattern.inverted()).unwrap(), vec![1]);
    }

    #[test]
    fn test_newest_first_scan_order() {
        let dir = TempDir::new().unwrap();
        let old = WalSegment::create(&dir.path().join("old.wal"), 1, 4096).unwrap();
        old.add(b"first").unwrap();
        let new = WalSegment::create(&dir.path().join("new.wal"), 2, 4096).unwrap();
        new.add(b"second").unwrap();

        let path = compact_from(&dir, "m.fmi", &[&new, &old]);
        let seg = CompactSegment::open(&path, 1, 2).unwrap();
        let pattern = Pattern::new(".*").unwrap();
        // Newest record surfaces first in the scan.
        assert_eq!(seg.search(pattern.inverted()).unwrap(), vec![2, 1]);
    }

    #[test]
    fn test_open_rejects_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.fmi");
        std::fs::write(&path, b"XXXX").unwrap();
        assert!(matches!(
            CompactSegment::open(&path, 1, 0),
            Err(TermdexError::CorruptSegment { .. })
        ));
    }

    #[test]
    fn test_open_rejects_incomplete_coverage() {
        let dir = TempDir::new().unwrap();
        let wal = WalSegment::create(&dir.path().join("s.wal"), 1, 4096).unwrap();
        wal.add(b"only").unwrap();
        let path = compact_from(&dir, "s.fmi", &[&wal]);
        // Claims two ids but the region holds one record.
        assert!(matches!(
            CompactSegment::open(&path, 1, 2),
            Err(TermdexError::CorruptSegment { .. })
        ));
    }

    #[test]
    fn test_closed_segment_rejects_operations() {
        let dir = TempDir::new().unwrap();
        let seg = sample(&dir);
        seg.close().unwrap();
        assert!(matches!(
            seg.get_id(b"getValue"),
            Err(TermdexError::SegmentClosed)
        ));
        assert!(matches!(seg.get_term(1), Err(TermdexError::SegmentClosed)));
    }
}
