//! Merge candidate selection
//!
//! Two interchangeable policies decide which compact segments to fold into
//! one. The generational policy buckets segments by a log2-scaled size
//! generation and merges the newest adjacent pair sharing a bucket; the
//! coalescing policy greedily runs together adjacent small segments up to a
//! target size. Candidates are always adjacent in id space so the merged
//! segment covers a contiguous range.

use std::ops::Range;
use std::sync::Arc;

use tracing::warn;

use crate::config::IndexOptions;

use super::compact::CompactSegment;

#[derive(Clone, Copy, Debug)]
struct SegStats {
    id_base: u32,
    word_count: u32,
    data_len: u64,
}

/// Log2-scaled size bucket; anything below one base unit is generation 0.
fn generation(data_len: u64, base: u64) -> u32 {
    if base == 0 {
        return 0;
    }
    let ratio = data_len / base;
    if ratio == 0 {
        0
    } else {
        ratio.ilog2()
    }
}

fn adjacent(older: &SegStats, newer: &SegStats) -> bool {
    older.id_base + older.word_count == newer.id_base
}

/// Walk pairs from newest to oldest. Older segments normally carry equal or
/// larger generations; an equal pair merges, a pair at or above the ceiling
/// stops the whole walk. An older segment with a *smaller* generation than
/// its newer neighbor should not occur, but such a stranded pair would never
/// become mergeable on its own, so it is merged unconditionally.
fn select_generational(stats: &[SegStats], base: u64, max_gens: u32) -> Option<Range<usize>> {
    for i in (1..stats.len()).rev() {
        let newer = &stats[i];
        let older = &stats[i - 1];
        if !adjacent(older, newer) {
            continue;
        }
        let g_new = generation(newer.data_len, base);
        let g_old = generation(older.data_len, base);
        if g_new >= max_gens || g_old >= max_gens {
            return None;
        }
        if g_old < g_new {
            warn!(
                older_generation = g_old,
                newer_generation = g_new,
                id_base = older.id_base,
                "generation inversion, merging unconditionally"
            );
            return Some(i - 1..i + 1);
        }
        if g_old == g_new {
            return Some(i - 1..i + 1);
        }
        // Older is strictly bigger, keep climbing toward older pairs.
    }
    None
}

/// Walk newest to oldest, growing a run of adjacent segments each under the
/// target size. Segments keep joining while the running total is still below
/// the target; the run closes once it crosses. The first completed run of at
/// least two segments wins.
fn select_coalescing(stats: &[SegStats], max: u64) -> Option<Range<usize>> {
    let mut run: Option<Range<usize>> = None;
    let mut total = 0u64;
    for i in (0..stats.len()).rev() {
        let seg = &stats[i];
        let fits = seg.data_len < max && total < max;
        match run.clone() {
            Some(r) if fits && adjacent(seg, &stats[r.start]) => {
                total += seg.data_len;
                run = Some(i..r.end);
            }
            Some(r) if r.len() >= 2 => return Some(r),
            _ => {
                if seg.data_len < max {
                    total = seg.data_len;
                    run = Some(i..i + 1);
                } else {
                    total = 0;
                    run = None;
                }
            }
        }
    }
    run.filter(|r| r.len() >= 2)
}

/// Pick the compact segments the next merge should fold together.
///
/// `compacts` must be sorted by `id_base` ascending. Returns `None` when no
/// merge is warranted.
pub fn find_merge_candidate(
    compacts: &[Arc<CompactSegment>],
    options: &IndexOptions,
) -> Option<Vec<Arc<CompactSegment>>> {
    let stats: Vec<SegStats> = compacts
        .iter()
        .map(|s| SegStats {
            id_base: s.id_base(),
            word_count: s.word_count(),
            data_len: s.data_len(),
        })
        .collect();
    let range = if options.staged_merge {
        select_generational(&stats, options.base_size_bytes(), options.max_gens)
    } else {
        select_coalescing(&stats, options.max_size_bytes())
    }?;
    Some(compacts[range].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(cases: &[(u32, u32, u64)]) -> Vec<SegStats> {
        cases
            .iter()
            .map(|&(id_base, word_count, data_len)| SegStats {
                id_base,
                word_count,
                data_len,
            })
            .collect()
    }

    #[test]
    fn test_generation_buckets() {
        assert_eq!(generation(0, 1024), 0);
        assert_eq!(generation(1023, 1024), 0);
        assert_eq!(generation(1024, 1024), 0);
        assert_eq!(generation(2048, 1024), 1);
        assert_eq!(generation(4095, 1024), 1);
        assert_eq!(generation(4096, 1024), 2);
        assert_eq!(generation(1, 0), 0);
    }

    #[test]
    fn test_generational_merges_newest_equal_pair() {
        // Two small equal segments merge.
        let s = stats(&[(1, 10, 100), (11, 10, 100)]);
        assert_eq!(select_generational(&s, 1024, 4), Some(0..2));

        // The newest equal pair wins even with an older staircase behind it.
        let s = stats(&[(1, 40, 8192), (41, 10, 100), (51, 10, 100)]);
        assert_eq!(select_generational(&s, 1024, 4), Some(1..3));
    }

    #[test]
    fn test_generational_climbs_a_staircase() {
        // Strictly descending sizes toward the newest segment: nothing equal.
        let s = stats(&[(1, 40, 16384), (41, 20, 4096), (61, 10, 100)]);
        assert_eq!(select_generational(&s, 1024, 10), None);

        // Equal pair found mid-staircase after climbing past the newest.
        let s = stats(&[(1, 40, 4096), (41, 20, 4096), (61, 10, 100)]);
        assert_eq!(select_generational(&s, 1024, 10), Some(0..2));
    }

    #[test]
    fn test_generational_ceiling_refuses() {
        // Generation 4 at base 1 KiB needs data_len >= 16 KiB.
        let s = stats(&[(1, 40, 16 * 1024), (41, 40, 16 * 1024)]);
        assert_eq!(select_generational(&s, 1024, 4), None);
        // A higher ceiling lets the same pair merge.
        assert_eq!(select_generational(&s, 1024, 5), Some(0..2));
    }

    #[test]
    fn test_generational_inversion_merges_unconditionally() {
        // An older segment smaller than its newer neighbor is anomalous but
        // still merged so it cannot strand forever.
        let s = stats(&[(1, 10, 100), (11, 40, 8192)]);
        assert_eq!(select_generational(&s, 1024, 10), Some(0..2));
    }

    #[test]
    fn test_generational_skips_id_gaps() {
        // A hole in id space (uncompressed write segment) blocks that pair.
        let s = stats(&[(1, 10, 100), (20, 10, 100)]);
        assert_eq!(select_generational(&s, 1024, 4), None);
    }

    #[test]
    fn test_coalescing_accumulates_adjacent_small_segments() {
        let s = stats(&[(1, 10, 300), (11, 10, 300), (21, 10, 300)]);
        assert_eq!(select_coalescing(&s, 1024), Some(0..3));

        // Running total caps the run.
        let s = stats(&[(1, 10, 600), (11, 10, 600), (21, 10, 600)]);
        assert_eq!(select_coalescing(&s, 1024), Some(1..3));
    }

    #[test]
    fn test_coalescing_excludes_large_segments() {
        // The big old segment never joins; the two small ones merge.
        let s = stats(&[(1, 40, 4096), (41, 10, 200), (51, 10, 200)]);
        assert_eq!(select_coalescing(&s, 1024), Some(1..3));

        // A single qualifying segment is not worth a merge.
        let s = stats(&[(1, 40, 4096), (41, 10, 200)]);
        assert_eq!(select_coalescing(&s, 1024), None);
    }

    #[test]
    fn test_coalescing_respects_id_gaps() {
        let s = stats(&[(1, 10, 200), (30, 10, 200), (40, 10, 200)]);
        assert_eq!(select_coalescing(&s, 1024), Some(1..3));
    }

    #[test]
    fn test_no_candidate_for_short_lists() {
        assert_eq!(select_generational(&stats(&[]), 1024, 4), None);
        assert_eq!(select_generational(&stats(&[(1, 10, 100)]), 1024, 4), None);
        assert_eq!(select_coalescing(&stats(&[(1, 10, 100)]), 1024), None);
    }
}
