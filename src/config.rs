use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, TermdexError};

/// Options for one composite index.
///
/// These map one-to-one onto the key/value property surface a caller hands
/// us (`archived`, `rotation.removal_timeout`, `rotation.max_wals`,
/// `rotation.base_size`, `rotation.staged_merge`, `rotation.max_gens`,
/// `rotation.max_size`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexOptions {
    /// The index will receive no further writes; maintenance compresses and
    /// retires every write segment, including the current tail.
    pub archived: bool,
    /// Grace period between marking a segment for removal and physically
    /// deleting it. Must outlive the longest in-flight reader.
    pub removal_timeout: Duration,
    /// Number of compressed-over write segments kept around before the
    /// oldest excess is retired.
    pub max_wals: usize,
    /// Generation unit in KiB: a compact segment's generation is
    /// `floor(log2(data_len / base_size))`.
    pub base_size: u64,
    /// `true` selects the generational merge policy, `false` the coalescing
    /// one.
    pub staged_merge: bool,
    /// Generation ceiling; segments at or above it never merge further.
    pub max_gens: u32,
    /// Coalescing target size in KiB.
    pub max_size: u64,
    /// Fixed capacity of each write-segment file in bytes.
    pub wal_capacity: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            archived: false,
            removal_timeout: Duration::from_secs(60),
            max_wals: 2,
            base_size: 64,
            staged_merge: true,
            max_gens: 10,
            max_size: 16 * 1024,
            wal_capacity: 1024 * 1024,
        }
    }
}

impl IndexOptions {
    /// Parse options from collaborator-supplied key/value properties.
    ///
    /// Unrecognized keys are ignored with a warning; malformed values fail.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self> {
        let mut options = Self::default();
        for (key, value) in props {
            match key.as_str() {
                "archived" => options.archived = parse(key, value)?,
                "rotation.removal_timeout" => {
                    options.removal_timeout = Duration::from_millis(parse(key, value)?)
                }
                "rotation.max_wals" => options.max_wals = parse(key, value)?,
                "rotation.base_size" => options.base_size = parse(key, value)?,
                "rotation.staged_merge" => options.staged_merge = parse(key, value)?,
                "rotation.max_gens" => options.max_gens = parse(key, value)?,
                "rotation.max_size" => options.max_size = parse(key, value)?,
                "rotation.wal_capacity" => options.wal_capacity = parse(key, value)?,
                _ => warn!(key = %key, "ignoring unrecognized index option"),
            }
        }
        Ok(options)
    }

    pub fn with_archived(mut self, archived: bool) -> Self {
        self.archived = archived;
        self
    }

    pub fn with_removal_timeout(mut self, timeout: Duration) -> Self {
        self.removal_timeout = timeout;
        self
    }

    pub fn with_max_wals(mut self, max_wals: usize) -> Self {
        self.max_wals = max_wals;
        self
    }

    pub fn with_base_size(mut self, base_size_kb: u64) -> Self {
        self.base_size = base_size_kb;
        self
    }

    pub fn with_staged_merge(mut self, staged: bool) -> Self {
        self.staged_merge = staged;
        self
    }

    pub fn with_max_gens(mut self, max_gens: u32) -> Self {
        self.max_gens = max_gens;
        self
    }

    pub fn with_max_size(mut self, max_size_kb: u64) -> Self {
        self.max_size = max_size_kb;
        self
    }

    pub fn with_wal_capacity(mut self, capacity: usize) -> Self {
        self.wal_capacity = capacity;
        self
    }

    /// Generation unit in bytes.
    pub fn base_size_bytes(&self) -> u64 {
        self.base_size * 1024
    }

    /// Coalescing target size in bytes.
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size * 1024
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| TermdexError::InvalidOption {
        key: key.to_string(),
        value: value.to_string(),
    })
}
