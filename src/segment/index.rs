//! Composite index and its compaction engine
//!
//! The composite index accumulates terms into a current write segment and
//! keeps every segment behind an immutable snapshot swapped atomically, so
//! readers never block on writers or on maintenance. A single-flight
//! maintenance cycle compresses filled write segments, merges compact
//! segments, and retires superseded files after a grace period.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::IndexOptions;
use crate::error::{Result, TermdexError};
use crate::pattern::Pattern;

use super::compact::CompactSegment;
use super::merge::find_merge_candidate;
use super::snapshot::IndexSnapshot;
use super::store::SegmentStore;
use super::types::{Segment, NO_ID};
use super::wal::WalSegment;

/// Execution context for maintenance work, supplied by the caller.
pub trait MaintenanceExecutor: Send + Sync {
    fn execute(&self, job: Box<dyn FnOnce() + Send>);
}

/// Runs maintenance on the calling thread; deterministic, used in tests and
/// by embedders that drive maintenance themselves.
pub struct InlineExecutor;

impl MaintenanceExecutor for InlineExecutor {
    fn execute(&self, job: Box<dyn FnOnce() + Send>) {
        job();
    }
}

/// Runs maintenance on a detached background thread.
pub struct ThreadExecutor;

impl MaintenanceExecutor for ThreadExecutor {
    fn execute(&self, job: Box<dyn FnOnce() + Send>) {
        std::thread::spawn(job);
    }
}

/// An embedded term dictionary built from rotating segments.
pub struct CompositeIndex {
    options: IndexOptions,
    store: SegmentStore,
    snapshot: ArcSwap<IndexSnapshot>,
    /// Serializes snapshot read-modify-write.
    publish_lock: Mutex<()>,
    /// Serializes write-segment rotation.
    rotate_lock: Mutex<()>,
    /// Serializes maintenance cycles; overlapping schedules collapse.
    maintenance_lock: Mutex<()>,
    maintenance_pending: AtomicBool,
    archived: AtomicBool,
    /// Segments dropped from the snapshot, awaiting their removal deadline.
    retired: Mutex<Vec<Segment>>,
    executor: Arc<dyn MaintenanceExecutor>,
}

impl CompositeIndex {
    /// Open the index named `name` under `dir`, with background maintenance.
    pub fn open(dir: &Path, name: &str, options: IndexOptions) -> Result<Arc<Self>> {
        Self::open_with_executor(dir, name, options, Arc::new(ThreadExecutor))
    }

    /// Open with a caller-supplied maintenance execution context.
    pub fn open_with_executor(
        dir: &Path,
        name: &str,
        options: IndexOptions,
        executor: Arc<dyn MaintenanceExecutor>,
    ) -> Result<Arc<Self>> {
        let store = SegmentStore::new(dir, name, options.wal_capacity);
        let mut all = store.list_all()?;
        let archived = options.archived;
        if !archived && !has_writable_tail(&all) {
            let next = IndexSnapshot::build(all.clone(), true).next_id_base();
            all.push(Segment::Wal(store.create_wal(next)?));
        }
        let snapshot = IndexSnapshot::build(all, archived);
        let index = Arc::new(Self {
            options,
            store,
            snapshot: ArcSwap::from_pointee(snapshot),
            publish_lock: Mutex::new(()),
            rotate_lock: Mutex::new(()),
            maintenance_lock: Mutex::new(()),
            maintenance_pending: AtomicBool::new(false),
            archived: AtomicBool::new(archived),
            retired: Mutex::new(Vec::new()),
            executor,
        });
        index.schedule_maintenance();
        Ok(index)
    }

    /// The current immutable view.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.snapshot.load_full()
    }

    pub fn is_archived(&self) -> bool {
        self.archived.load(Ordering::Acquire)
    }

    /// Total term count across live segments.
    pub fn word_count(&self) -> u32 {
        self.snapshot.load().word_count()
    }

    pub fn segment_count(&self) -> usize {
        self.snapshot.load().all().len()
    }

    /// Return the id for a term, adding it if absent. Returns [`NO_ID`] for
    /// an empty payload or when the index accepts no further writes.
    pub fn add(self: &Arc<Self>, term: &[u8]) -> Result<u32> {
        if term.is_empty() {
            warn!("rejecting empty term");
            return Ok(NO_ID);
        }
        // Idempotent across segments: a term that already has an id anywhere
        // in the index keeps it.
        if let Some(id) = self.get_id(term)? {
            return Ok(id);
        }
        loop {
            let snapshot = self.snapshot.load_full();
            let Some(current) = snapshot.current() else {
                warn!("rejecting add, index accepts no writes");
                return Ok(NO_ID);
            };
            match current.add(term) {
                Ok(id) => return Ok(id),
                Err(TermdexError::SegmentFull) => self.rotate(current)?,
                // The snapshot changed under us; retry against the new one.
                Err(TermdexError::SegmentClosed) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Exact-match lookup across the lookup ordering.
    pub fn get_id(&self, term: &[u8]) -> Result<Option<u32>> {
        let snapshot = self.snapshot.load_full();
        for seg in snapshot.lookup() {
            match seg.get_id(term) {
                Ok(Some(id)) => return Ok(Some(id)),
                Ok(None) => {}
                Err(TermdexError::SegmentClosed) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Reverse lookup by id.
    pub fn get_term(&self, id: u32) -> Result<Option<Vec<u8>>> {
        let snapshot = self.snapshot.load_full();
        for seg in snapshot.lookup() {
            match seg.get_term(id) {
                Ok(Some(term)) => return Ok(Some(term)),
                Ok(None) => {}
                Err(TermdexError::SegmentClosed) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Scan the search ordering with a pattern, returning matching ids.
    pub fn search(&self, pattern: &Pattern) -> Result<Vec<u32>> {
        let snapshot = self.snapshot.load_full();
        let mut ids = Vec::new();
        for seg in snapshot.search() {
            match seg.search(pattern) {
                Ok(found) => ids.extend(found),
                Err(TermdexError::SegmentClosed) => {}
                Err(e) => return Err(e),
            }
        }
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    /// Force the current write segment to durable storage.
    pub fn flush(&self) -> Result<()> {
        if let Some(current) = self.snapshot.load().current() {
            current.flush()?;
        }
        Ok(())
    }

    /// Stop accepting writes and let maintenance compress everything.
    pub fn archive(self: &Arc<Self>) {
        self.archived.store(true, Ordering::Release);
        // Republish so the snapshot drops its current write segment.
        self.publish(|all| all);
        self.schedule_maintenance();
    }

    /// Replace the full segment, creating the successor at the next id base.
    fn rotate(self: &Arc<Self>, full: &Arc<WalSegment>) -> Result<()> {
        let _guard = self.rotate_lock.lock();
        let snapshot = self.snapshot.load_full();
        match snapshot.current() {
            // Another writer already rotated past this segment.
            Some(current) if !Arc::ptr_eq(current, full) => return Ok(()),
            None => return Ok(()),
            Some(_) => {}
        }
        let next = snapshot.next_id_base();
        let wal = self.store.create_wal(next)?;
        debug!(id_base = next, "rotated write segment");
        self.publish(move |mut all| {
            all.push(Segment::Wal(wal));
            all
        });
        self.schedule_maintenance();
        Ok(())
    }

    /// Rebuild and swap the snapshot from a mutated segment list.
    fn publish<F>(&self, mutate: F)
    where
        F: FnOnce(Vec<Segment>) -> Vec<Segment>,
    {
        let _guard = self.publish_lock.lock();
        let all = mutate(self.snapshot.load().all().to_vec());
        self.snapshot
            .store(Arc::new(IndexSnapshot::build(all, self.is_archived())));
    }

    /// Queue a maintenance run; requests issued while one is already queued
    /// collapse into it.
    pub fn schedule_maintenance(self: &Arc<Self>) {
        if self.maintenance_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let index = Arc::clone(self);
        self.executor.execute(Box::new(move || index.run_maintenance()));
    }

    /// One full maintenance cycle: compress, merge, retire superseded
    /// compacts, retire excess write segments, garbage-collect. Steps repeat
    /// while any of them makes progress; a failing step is logged and the
    /// cycle moves on.
    pub fn run_maintenance(&self) {
        let _guard = self.maintenance_lock.lock();
        self.maintenance_pending.store(false, Ordering::Release);
        loop {
            let mut progress = false;
            let steps: [(&str, fn(&Self) -> Result<bool>); 5] = [
                ("compress", Self::step_compress),
                ("merge", Self::step_merge),
                ("retire_compacts", Self::step_retire_compacts),
                ("retire_wals", Self::step_retire_wals),
                ("gc", Self::step_gc),
            ];
            for (name, step) in steps {
                match step(self) {
                    Ok(stepped) => progress |= stepped,
                    Err(e) => warn!(step = name, error = %e, "maintenance step failed"),
                }
            }
            if !progress {
                break;
            }
        }
    }

    /// Compress every write segment that is not the current tail and is not
    /// yet covered by a compact segment. When archived the tail is included.
    fn step_compress(&self) -> Result<bool> {
        let snapshot = self.snapshot.load_full();
        let mut progress = false;
        for seg in snapshot.all() {
            let Segment::Wal(wal) = seg else { continue };
            if !seg.is_open() || wal.word_count() == 0 {
                continue;
            }
            if snapshot.current().is_some_and(|c| Arc::ptr_eq(c, wal)) {
                continue;
            }
            if snapshot
                .all()
                .iter()
                .any(|other| !other.is_writable() && other.covers(seg))
            {
                continue;
            }
            let compact = self.store.compress(wal)?;
            self.publish(move |mut all| {
                all.push(Segment::Compact(compact));
                all
            });
            progress = true;
        }
        Ok(progress)
    }

    /// Merge one candidate set of compact segments; the result replaces its
    /// inputs in the snapshot and the inputs enter the removal grace period.
    fn step_merge(&self) -> Result<bool> {
        let snapshot = self.snapshot.load_full();
        let compacts: Vec<Arc<CompactSegment>> = snapshot
            .all()
            .iter()
            .filter_map(|s| match s {
                Segment::Compact(c) => Some(Arc::clone(c)),
                Segment::Wal(_) => None,
            })
            .collect();
        let Some(inputs) = find_merge_candidate(&compacts, &self.options) else {
            return Ok(false);
        };
        let merged = self.store.merge(&inputs)?;
        let input_segs: Vec<Segment> = inputs.into_iter().map(Segment::Compact).collect();
        self.publish(|mut all| {
            all.retain(|s| !input_segs.iter().any(|input| input.same_as(s)));
            all.push(Segment::Compact(merged));
            all
        });
        self.retire(input_segs);
        Ok(true)
    }

    /// Drop compact segments fully contained in another compact segment.
    /// Normally merge already replaced them; this catches leftovers found on
    /// disk at open.
    fn step_retire_compacts(&self) -> Result<bool> {
        let snapshot = self.snapshot.load_full();
        let victims: Vec<Segment> = snapshot
            .all()
            .iter()
            .filter(|seg| !seg.is_writable())
            .filter(|seg| {
                snapshot
                    .all()
                    .iter()
                    .any(|o| !o.is_writable() && !o.same_as(seg) && o.covers(seg))
            })
            .cloned()
            .collect();
        if victims.is_empty() {
            return Ok(false);
        }
        self.publish(|mut all| {
            all.retain(|s| !victims.iter().any(|v| v.same_as(s)));
            all
        });
        self.retire(victims);
        Ok(true)
    }

    /// Drop write segments whose data lives in a compact copy. Archived
    /// indexes keep none; otherwise the newest `max_wals` stay around.
    fn step_retire_wals(&self) -> Result<bool> {
        let snapshot = self.snapshot.load_full();
        let covered: Vec<Segment> = snapshot
            .all()
            .iter()
            .filter(|seg| seg.is_writable())
            .filter(|seg| match (seg, snapshot.current()) {
                (Segment::Wal(wal), Some(current)) => !Arc::ptr_eq(wal, current),
                _ => true,
            })
            .filter(|seg| {
                snapshot
                    .all()
                    .iter()
                    .any(|o| !o.is_writable() && o.covers(seg))
            })
            .cloned()
            .collect();
        let victims: Vec<Segment> = if self.is_archived() {
            covered
        } else if covered.len() > self.options.max_wals {
            // Sorted ascending, so the front holds the oldest excess.
            covered[..covered.len() - self.options.max_wals].to_vec()
        } else {
            Vec::new()
        };
        if victims.is_empty() {
            return Ok(false);
        }
        self.publish(|mut all| {
            all.retain(|s| !victims.iter().any(|v| v.same_as(s)));
            all
        });
        self.retire(victims);
        Ok(true)
    }

    /// Physically remove retired segments whose grace period elapsed.
    fn step_gc(&self) -> Result<bool> {
        let now = Instant::now();
        let ready: Vec<Segment> = {
            let mut retired = self.retired.lock();
            let (ready, pending) = retired.drain(..).partition(|s| s.can_remove(now));
            *retired = pending;
            ready
        };
        for seg in &ready {
            if let Err(e) = self.store.remove(seg) {
                warn!(path = %seg.path().display(), error = %e, "failed to remove segment");
            }
        }
        Ok(!ready.is_empty())
    }

    fn retire(&self, victims: Vec<Segment>) {
        let deadline = Instant::now() + self.options.removal_timeout;
        let mut retired = self.retired.lock();
        for seg in victims {
            seg.mark_for_removal(deadline);
            retired.push(seg);
        }
    }

    /// Segments currently awaiting their removal deadline.
    pub fn retired_count(&self) -> usize {
        self.retired.lock().len()
    }
}

/// Whether the newest id range belongs to a writable segment.
fn has_writable_tail(all: &[Segment]) -> bool {
    let next = all.iter().map(|s| s.id_range().end).max().unwrap_or(0);
    all.iter()
        .any(|s| s.is_writable() && s.is_open() && s.id_range().end == next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn open_inline(dir: &Path, options: IndexOptions) -> Arc<CompositeIndex> {
        CompositeIndex::open_with_executor(dir, "terms", options, Arc::new(InlineExecutor))
            .unwrap()
    }

    #[test]
    fn test_add_and_lookup() {
        let dir = TempDir::new().unwrap();
        let index = open_inline(dir.path(), IndexOptions::default());

        assert_eq!(index.add(b"AAA").unwrap(), 1);
        assert_eq!(index.add(b"BBB").unwrap(), 2);
        assert_eq!(index.add(b"CCC").unwrap(), 3);
        assert_eq!(index.get_id(b"BBB").unwrap(), Some(2));
        assert_eq!(index.get_term(2).unwrap().as_deref(), Some(&b"BBB"[..]));
        assert_eq!(index.word_count(), 3);
    }

    #[test]
    fn test_empty_term_is_rejected() {
        let dir = TempDir::new().unwrap();
        let index = open_inline(dir.path(), IndexOptions::default());
        assert_eq!(index.add(b"").unwrap(), NO_ID);
        assert_eq!(index.word_count(), 0);
    }

    #[test]
    fn test_rotation_on_full_segment() {
        let dir = TempDir::new().unwrap();
        let index = open_inline(
            dir.path(),
            IndexOptions::default().with_wal_capacity(128),
        );

        let mut last_id = 0;
        for i in 0..40u32 {
            last_id = index.add(format!("term-{:04}", i).as_bytes()).unwrap();
        }
        assert!(index.segment_count() > 1);
        assert_eq!(last_id, 40);
        // Old ids survive the rotations.
        assert_eq!(index.get_id(b"term-0000").unwrap(), Some(1));
        assert_eq!(
            index.get_term(40).unwrap().as_deref(),
            Some(&b"term-0039"[..])
        );
    }

    #[test]
    fn test_archive_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let index = open_inline(
            dir.path(),
            IndexOptions::default().with_removal_timeout(Duration::ZERO),
        );
        index.add(b"A").unwrap();
        index.add(b"B").unwrap();
        index.archive();

        assert_eq!(index.add(b"C").unwrap(), NO_ID);
        assert_eq!(index.get_id(b"A").unwrap(), Some(1));
        assert_eq!(index.get_id(b"B").unwrap(), Some(2));
        // Everything was compressed and the write segments removed.
        assert!(index.snapshot().all().iter().all(|s| !s.is_writable()));
    }

    #[test]
    fn test_reopen_restores_terms() {
        let dir = TempDir::new().unwrap();
        {
            let index = open_inline(dir.path(), IndexOptions::default());
            index.add(b"persisted").unwrap();
            index.flush().unwrap();
        }
        let index = open_inline(dir.path(), IndexOptions::default());
        assert_eq!(index.get_id(b"persisted").unwrap(), Some(1));
        assert_eq!(index.add(b"fresh").unwrap(), 2);
    }
}
