//! Segment file management
//!
//! Owns the directory layout and file naming for one composite index.
//! Write segments are named `{name}-{idbase:08x}.wal`, compact segments
//! `{name}-{idbase:08x}-{wordcount:08x}.fmi`. Compact files are produced
//! under a temporary name and renamed into place so a crash never leaves a
//! half-written segment under a live name.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Result, TermdexError};

use super::compact::{CompactSegment, COMPACT_MAGIC};
use super::types::{icmp, Segment};
use super::wal::WalSegment;

const WAL_EXT: &str = "wal";
const COMPACT_EXT: &str = "fmi";

enum ParsedName {
    Wal { id_base: u32 },
    Compact { id_base: u32, word_count: u32 },
}

/// Creates, lists, rewrites and removes the segment files of one index.
pub struct SegmentStore {
    dir: PathBuf,
    name: String,
    wal_capacity: usize,
}

impl SegmentStore {
    pub fn new(dir: &Path, name: &str, wal_capacity: usize) -> Self {
        Self {
            dir: dir.to_path_buf(),
            name: name.to_string(),
            wal_capacity,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn wal_capacity(&self) -> usize {
        self.wal_capacity
    }

    fn wal_path(&self, id_base: u32) -> PathBuf {
        self.dir.join(format!("{}-{:08x}.{}", self.name, id_base, WAL_EXT))
    }

    fn compact_path(&self, id_base: u32, word_count: u32) -> PathBuf {
        self.dir.join(format!(
            "{}-{:08x}-{:08x}.{}",
            self.name, id_base, word_count, COMPACT_EXT
        ))
    }

    fn parse_name(&self, file_name: &str) -> Option<ParsedName> {
        let rest = file_name.strip_prefix(&self.name)?.strip_prefix('-')?;
        if let Some(fields) = rest.strip_suffix(&format!(".{}", WAL_EXT)) {
            let id_base = u32::from_str_radix(fields, 16).ok()?;
            return Some(ParsedName::Wal { id_base });
        }
        let fields = rest.strip_suffix(&format!(".{}", COMPACT_EXT))?;
        let (base, count) = fields.split_once('-')?;
        Some(ParsedName::Compact {
            id_base: u32::from_str_radix(base, 16).ok()?,
            word_count: u32::from_str_radix(count, 16).ok()?,
        })
    }

    /// Open every segment file belonging to this index, in canonical order.
    pub fn list_all(&self) -> Result<Vec<Segment>> {
        let mut segments = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            match self.parse_name(file_name) {
                Some(ParsedName::Wal { id_base }) => {
                    let wal = WalSegment::open(&entry.path(), id_base)?;
                    segments.push(Segment::Wal(Arc::new(wal)));
                }
                Some(ParsedName::Compact { id_base, word_count }) => {
                    let compact = CompactSegment::open(&entry.path(), id_base, word_count)?;
                    segments.push(Segment::Compact(Arc::new(compact)));
                }
                None => {}
            }
        }
        segments.sort_by(icmp);
        debug!(dir = %self.dir.display(), count = segments.len(), "listed segments");
        Ok(segments)
    }

    /// Create a fresh write segment starting at `id_base`.
    pub fn create_wal(&self, id_base: u32) -> Result<Arc<WalSegment>> {
        let path = self.wal_path(id_base);
        let wal = WalSegment::create(&path, id_base, self.wal_capacity)?;
        info!(path = %path.display(), id_base, "created write segment");
        Ok(Arc::new(wal))
    }

    /// Rewrite a write segment as a compact segment. The source file is left
    /// untouched; the caller removes it once the new segment is published.
    pub fn compress(&self, wal: &WalSegment) -> Result<Arc<CompactSegment>> {
        let mut region = wal.raw_records()?;
        region.reverse();
        let id_base = wal.id_base();
        let word_count = wal.word_count();
        let compact = self.write_compact(id_base, word_count, &[region])?;
        info!(
            path = %compact.path().display(),
            id_base,
            word_count,
            "compressed write segment"
        );
        Ok(compact)
    }

    /// Merge compact segments with adjacent id ranges into one. Regions are
    /// concatenated newest first so recent data stays at the scan front.
    pub fn merge(&self, inputs: &[Arc<CompactSegment>]) -> Result<Arc<CompactSegment>> {
        let mut sorted: Vec<&Arc<CompactSegment>> = inputs.iter().collect();
        sorted.sort_by(|a, b| b.id_base().cmp(&a.id_base()));
        let id_base = sorted
            .last()
            .map(|s| s.id_base())
            .ok_or_else(|| TermdexError::InvalidEncoding("merge of zero segments".to_string()))?;
        let word_count = sorted.iter().map(|s| s.word_count()).sum();
        let regions = sorted
            .iter()
            .map(|s| s.region())
            .collect::<Result<Vec<_>>>()?;
        let merged = self.write_compact(id_base, word_count, &regions)?;
        info!(
            path = %merged.path().display(),
            inputs = inputs.len(),
            id_base,
            word_count,
            "merged compact segments"
        );
        Ok(merged)
    }

    fn write_compact(
        &self,
        id_base: u32,
        word_count: u32,
        regions: &[Vec<u8>],
    ) -> Result<Arc<CompactSegment>> {
        let path = self.compact_path(id_base, word_count);
        let tmp = path.with_extension("tmp");
        let mut bytes =
            Vec::with_capacity(COMPACT_MAGIC.len() + regions.iter().map(Vec::len).sum::<usize>());
        bytes.extend_from_slice(&COMPACT_MAGIC);
        for region in regions {
            bytes.extend_from_slice(region);
        }
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(Arc::new(CompactSegment::open(&path, id_base, word_count)?))
    }

    /// Close a segment and delete its file.
    pub fn remove(&self, segment: &Segment) -> Result<()> {
        segment.close()?;
        fs::remove_file(segment.path())?;
        info!(path = %segment.path().display(), "removed segment");
        Ok(())
    }
}
