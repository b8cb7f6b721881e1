//! Pitch curves for audio and video files.
//!
//! Short files are analyzed in one pass. Long files go through a
//! [`SegmentCache`] that processes fixed-length segments on demand and
//! evicts the ones far from the viewed range. Very long media can be read
//! through an [`ExtractionSelector`], which captures audio from a playback
//! element once positions get too deep to decode directly.

pub mod audio;
pub mod cache;
pub mod capture;
pub mod config;
pub mod error;

pub use audio::decode::{AudioData, AudioDecoder, SymphoniaDecoder};
pub use audio::estimator::{McLeodEstimator, PitchEstimate, PitchEstimator};
pub use audio::features::PitchData;
pub use cache::{SegmentCache, SegmentState};
pub use capture::{ExtractionSelector, PlaybackElement};
pub use config::Config;
pub use error::{Error, Result};
