use std::path::PathBuf;

use symphonia::core::errors::Error as SymphoniaError;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the pitch-curve pipeline.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open media file {path}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Decode(#[from] SymphoniaError),

    #[error("no audio track found in {0}")]
    NoAudioTrack(PathBuf),

    #[error("unknown sample rate in {0}")]
    UnknownSampleRate(PathBuf),

    #[error("could not determine duration of {0}")]
    UnknownDuration(PathBuf),

    #[error("pitch estimation failed: {0}")]
    Estimator(String),

    #[error("no media has been initialized")]
    NotInitialized,

    #[error("segment {index} does not exist ({count} segments)")]
    SegmentOutOfRange { index: usize, count: usize },

    #[error("segment {0} failed to process")]
    SegmentFailed(usize),

    #[error("live capture failed: {0}")]
    Capture(String),

    #[error("live capture produced no audio within {0:.1}s")]
    CaptureTimeout(f64),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
