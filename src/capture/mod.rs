pub mod playback;
pub mod selector;

pub use playback::{live_capture, CaptureStream, PlaybackElement};
pub use selector::{Backend, ExtractedSegment, ExtractionSelector};
