//! termdex: an embedded, append-friendly term dictionary
//!
//! Short byte strings go in, dense integer ids come out. Writes land in
//! memory-mapped append-only segments; a background compaction engine
//! compresses them into read-only compact segments and merges those
//! generationally, while lookups and pattern searches run against immutable
//! snapshots and never block.
//!
//! ```no_run
//! use termdex::config::IndexOptions;
//! use termdex::pattern::Pattern;
//! use termdex::segment::CompositeIndex;
//!
//! # fn main() -> termdex::error::Result<()> {
//! let index = CompositeIndex::open("data".as_ref(), "terms", IndexOptions::default())?;
//! let id = index.add(b"getValue")?;
//! assert_eq!(index.get_id(b"getValue")?, Some(id));
//!
//! let pattern = Pattern::new("^get")?;
//! let ids = index.search(&pattern)?;
//! assert!(ids.contains(&id));
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod pattern;
pub mod segment;

pub use config::IndexOptions;
pub use error::{Result, TermdexError};
pub use pattern::Pattern;
pub use segment::{CompositeIndex, Segment, FIRST_ID, NO_ID};

/// Crate version, for embedders that report it.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
