pub mod manager;
pub mod segment;

pub use manager::SegmentCache;
pub use segment::{Segment, SegmentEvent, SegmentState, SegmentSummary};
