//! Immutable point-in-time view of a composite index
//!
//! A snapshot owns the full segment list plus two derived orderings that are
//! load-bearing for correctness: the lookup order decides which segment
//! answers a point query first, the search order decides which segments a
//! pattern scan visits. Snapshots are never mutated; the engine builds a new
//! one and swaps it in.

use std::sync::Arc;

use super::types::{icmp, Segment, FIRST_ID};
use super::wal::WalSegment;

/// Immutable segment-set view with derived orderings.
pub struct IndexSnapshot {
    /// Every live segment, sorted by `icmp`.
    all: Vec<Segment>,
    /// Point-lookup order: writables newest first, then non-overlapping
    /// read-only segments rotated so the oldest comes first.
    lookup: Vec<Segment>,
    /// Pattern-scan order: uncovered writables newest first, then read-only
    /// segments newest first.
    search: Vec<Segment>,
    /// The writable tail accepting new terms, absent when archived.
    current: Option<Arc<WalSegment>>,
}

impl IndexSnapshot {
    pub fn empty() -> Self {
        Self::build(Vec::new(), true)
    }

    /// Derive the orderings for a segment set.
    pub fn build(mut all: Vec<Segment>, archived: bool) -> Self {
        all.sort_by(icmp);

        let writables_newest_first: Vec<Segment> = all
            .iter()
            .filter(|s| s.is_writable())
            .rev()
            .cloned()
            .collect();
        let read_only_asc: Vec<Segment> = all
            .iter()
            .filter(|s| !s.is_writable())
            .cloned()
            .collect();
        let filtered = filter_overlaps(&read_only_asc);

        // Newest first, then the oldest rotated to the front: long-lived ids
        // live in the oldest segment, and point lookups hit it in one probe.
        let mut lookup_ro: Vec<Segment> = filtered.iter().rev().cloned().collect();
        if lookup_ro.len() > 1 {
            lookup_ro.rotate_right(1);
        }
        let mut lookup = writables_newest_first.clone();
        lookup.extend(lookup_ro);

        // A writable fully covered by a compact segment adds nothing to a
        // scan; its data is in the compact copy.
        let mut search: Vec<Segment> = writables_newest_first
            .iter()
            .filter(|w| !read_only_asc.iter().any(|ro| ro.covers(w)))
            .cloned()
            .collect();
        search.extend(read_only_asc.iter().rev().cloned());

        let current = if archived {
            None
        } else {
            writables_newest_first.first().and_then(|s| match s {
                Segment::Wal(wal) => Some(Arc::clone(wal)),
                Segment::Compact(_) => None,
            })
        };

        Self {
            all,
            lookup,
            search,
            current,
        }
    }

    pub fn all(&self) -> &[Segment] {
        &self.all
    }

    pub fn lookup(&self) -> &[Segment] {
        &self.lookup
    }

    pub fn search(&self) -> &[Segment] {
        &self.search
    }

    pub fn current(&self) -> Option<&Arc<WalSegment>> {
        self.current.as_ref()
    }

    /// First id not owned by any live segment.
    pub fn next_id_base(&self) -> u32 {
        self.all
            .iter()
            .map(|s| s.id_range().end)
            .max()
            .unwrap_or(FIRST_ID)
    }

    /// Total term count across non-overlapping live ranges.
    pub fn word_count(&self) -> u32 {
        self.next_id_base() - FIRST_ID
    }
}

/// Drop every segment fully contained in a segment kept before it. Input
/// must be sorted by `icmp`, which places a containing range immediately
/// ahead of the ranges it covers.
fn filter_overlaps(sorted: &[Segment]) -> Vec<Segment> {
    let mut kept: Vec<Segment> = Vec::with_capacity(sorted.len());
    for seg in sorted {
        if let Some(last) = kept.last() {
            if last.covers(seg) {
                continue;
            }
        }
        kept.push(seg.clone());
    }
    kept
}
