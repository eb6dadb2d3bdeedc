//! Segment storage: write-ahead segments, compact segments, and the
//! composite index that rotates, compresses, merges and retires them.

pub mod compact;
pub mod index;
pub mod merge;
pub mod snapshot;
pub mod store;
pub mod types;
pub mod wal;

pub use compact::CompactSegment;
pub use index::{CompositeIndex, InlineExecutor, MaintenanceExecutor, ThreadExecutor};
pub use snapshot::IndexSnapshot;
pub use store::SegmentStore;
pub use types::{icmp, Segment, SegmentKind, SegmentState, SegmentStatus, FIRST_ID, NO_ID};
pub use wal::WalSegment;
