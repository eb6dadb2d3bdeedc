//! Core types shared across the segment layer

use std::cmp::Ordering;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::error::Result;
use crate::pattern::Pattern;

use super::compact::CompactSegment;
use super::wal::WalSegment;

/// First id handed out by a fresh composite index.
pub const FIRST_ID: u32 = 1;
/// Sentinel returned when an add was rejected (empty payload, archived index).
pub const NO_ID: u32 = 0;

/// Storage flavor of a segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentKind {
    Writable,
    ReadOnly,
}

/// Lifecycle state of a segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentState {
    Open,
    MarkedForRemoval(Instant),
    Closed,
}

/// Shared lifecycle-state cell embedded in both segment flavors.
#[derive(Debug)]
pub struct SegmentStatus {
    state: Mutex<SegmentState>,
}

impl SegmentStatus {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SegmentState::Open),
        }
    }

    pub fn get(&self) -> SegmentState {
        *self.state.lock()
    }

    pub fn is_open(&self) -> bool {
        !matches!(*self.state.lock(), SegmentState::Closed)
    }

    /// Mark for removal with a deadline. A later deadline never overwrites an
    /// earlier one, and a closed segment stays closed.
    pub fn mark_for_removal(&self, deadline: Instant) -> bool {
        let mut state = self.state.lock();
        match *state {
            SegmentState::Open => {
                *state = SegmentState::MarkedForRemoval(deadline);
                true
            }
            SegmentState::MarkedForRemoval(_) | SegmentState::Closed => false,
        }
    }

    pub fn can_remove(&self, now: Instant) -> bool {
        matches!(*self.state.lock(), SegmentState::MarkedForRemoval(deadline) if now >= deadline)
    }

    pub fn set_closed(&self) {
        *self.state.lock() = SegmentState::Closed;
    }
}

impl Default for SegmentStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// One physical unit of a composite index.
///
/// A tagged variant keeps the compaction engine segment-kind-agnostic where
/// possible while avoiding virtual dispatch.
#[derive(Clone)]
pub enum Segment {
    Wal(Arc<WalSegment>),
    Compact(Arc<CompactSegment>),
}

impl Segment {
    pub fn kind(&self) -> SegmentKind {
        match self {
            Segment::Wal(_) => SegmentKind::Writable,
            Segment::Compact(_) => SegmentKind::ReadOnly,
        }
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, Segment::Wal(_))
    }

    pub fn id_base(&self) -> u32 {
        match self {
            Segment::Wal(s) => s.id_base(),
            Segment::Compact(s) => s.id_base(),
        }
    }

    pub fn word_count(&self) -> u32 {
        match self {
            Segment::Wal(s) => s.word_count(),
            Segment::Compact(s) => s.word_count(),
        }
    }

    pub fn data_len(&self) -> u64 {
        match self {
            Segment::Wal(s) => s.data_len(),
            Segment::Compact(s) => s.data_len(),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Segment::Wal(s) => s.path(),
            Segment::Compact(s) => s.path(),
        }
    }

    /// The half-open id range this segment owns.
    pub fn id_range(&self) -> Range<u32> {
        let base = self.id_base();
        base..base + self.word_count()
    }

    /// Whether this segment's range fully contains another segment's range.
    pub fn covers(&self, other: &Segment) -> bool {
        let mine = self.id_range();
        let theirs = other.id_range();
        mine.start <= theirs.start && theirs.end <= mine.end
    }

    /// Identity comparison (two handles to the same physical segment).
    pub fn same_as(&self, other: &Segment) -> bool {
        match (self, other) {
            (Segment::Wal(a), Segment::Wal(b)) => Arc::ptr_eq(a, b),
            (Segment::Compact(a), Segment::Compact(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn state(&self) -> SegmentState {
        self.status().get()
    }

    pub fn is_open(&self) -> bool {
        self.status().is_open()
    }

    pub fn mark_for_removal(&self, deadline: Instant) -> bool {
        self.status().mark_for_removal(deadline)
    }

    pub fn can_remove(&self, now: Instant) -> bool {
        self.status().can_remove(now)
    }

    fn status(&self) -> &SegmentStatus {
        match self {
            Segment::Wal(s) => s.status(),
            Segment::Compact(s) => s.status(),
        }
    }

    pub fn get_id(&self, term: &[u8]) -> Result<Option<u32>> {
        match self {
            Segment::Wal(s) => s.get_id(term),
            Segment::Compact(s) => s.get_id(term),
        }
    }

    pub fn get_term(&self, id: u32) -> Result<Option<Vec<u8>>> {
        match self {
            Segment::Wal(s) => s.get_term(id),
            Segment::Compact(s) => s.get_term(id),
        }
    }

    /// Scan the segment with a pattern, returning matching ids.
    ///
    /// Write segments scan their records forward with the forward tree;
    /// compact segments scan their reversed records with the inverted tree.
    pub fn search(&self, pattern: &Pattern) -> Result<Vec<u32>> {
        match self {
            Segment::Wal(s) => s.search(pattern.forward()),
            Segment::Compact(s) => s.search(pattern.inverted()),
        }
    }

    pub fn close(&self) -> Result<()> {
        match self {
            Segment::Wal(s) => s.close(),
            Segment::Compact(s) => s.close(),
        }
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("kind", &self.kind())
            .field("id_range", &self.id_range())
            .field("path", &self.path())
            .finish()
    }
}

/// Canonical segment ordering: `id_base` ascending, ties broken by
/// `word_count` descending so the larger (superseding) range sorts first.
pub fn icmp(x: &Segment, y: &Segment) -> Ordering {
    x.id_base()
        .cmp(&y.id_base())
        .then_with(|| y.word_count().cmp(&x.word_count()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_transitions() {
        let status = SegmentStatus::new();
        assert_eq!(status.get(), SegmentState::Open);
        assert!(status.is_open());

        let deadline = Instant::now() + Duration::from_millis(10);
        assert!(status.mark_for_removal(deadline));
        assert!(!status.mark_for_removal(deadline + Duration::from_secs(1)));
        assert!(status.is_open());

        assert!(!status.can_remove(Instant::now()));
        assert!(status.can_remove(deadline + Duration::from_millis(1)));

        status.set_closed();
        assert!(!status.is_open());
        assert!(!status.mark_for_removal(deadline));
    }
}
