use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::playback::{live_capture, PlaybackElement};
use crate::audio::analysis::analyze;
use crate::audio::decode::{AudioData, AudioDecoder, SymphoniaDecoder};
use crate::audio::estimator::{McLeodEstimator, PitchEstimator};
use crate::audio::features::PitchData;
use crate::config::{Config, LongMediaConfig, PipelineConfig};
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    RangeDecode,
    LiveCapture,
}

/// One extracted window. `data` times start at 0; `start_time` and
/// `end_time` place it in the file.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExtractedSegment {
    pub start_time: f64,
    pub end_time: f64,
    pub backend: Backend,
    pub data: PitchData,
}

/// Extracts fixed-length windows of very long media.
///
/// Windows are decoded straight from the file, except in long media past
/// `direct_decode_limit`, where they are captured from a playback element.
/// Seeking a decoder that deep into some containers means reading
/// everything before the target.
pub struct ExtractionSelector {
    decoder: Arc<dyn AudioDecoder>,
    estimator: Arc<dyn PitchEstimator>,
    playback: Option<Arc<dyn PlaybackElement>>,
    pipeline: PipelineConfig,
    config: LongMediaConfig,
    source: Option<PathBuf>,
    total_duration: f64,
    current: Option<ExtractedSegment>,
}

impl ExtractionSelector {
    pub fn new(
        decoder: Arc<dyn AudioDecoder>,
        estimator: Arc<dyn PitchEstimator>,
        pipeline: PipelineConfig,
        mut config: LongMediaConfig,
    ) -> Self {
        if !(config.extraction_window > 0.0 && config.extraction_window.is_finite()) {
            log::warn!(
                "Invalid extraction window {}, using {}s",
                config.extraction_window,
                LongMediaConfig::default().extraction_window
            );
            config.extraction_window = LongMediaConfig::default().extraction_window;
        }
        if !(config.capture_timeout > 0.0 && config.capture_timeout.is_finite()) {
            config.capture_timeout = config.extraction_window + 5.0;
        }

        Self {
            decoder,
            estimator,
            playback: None,
            pipeline,
            config,
            source: None,
            total_duration: 0.0,
            current: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(SymphoniaDecoder),
            Arc::new(McLeodEstimator::new(config.pipeline.power_threshold)),
            config.pipeline.clone(),
            config.long_media.clone(),
        )
    }

    pub fn with_playback(mut self, element: Arc<dyn PlaybackElement>) -> Self {
        self.playback = Some(element);
        self
    }

    /// Probe `path` and forget any previous window. Returns the duration.
    pub async fn open(&mut self, path: impl AsRef<Path>) -> Result<f64> {
        let path = path.as_ref().to_path_buf();
        let decoder = Arc::clone(&self.decoder);
        let probe_path = path.clone();
        let duration = tokio::task::spawn_blocking(move || decoder.probe_duration(&probe_path)).await??;

        self.source = Some(path);
        self.total_duration = duration;
        self.current = None;
        Ok(duration)
    }

    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }

    pub fn is_long_media_file(&self) -> bool {
        self.total_duration > self.config.long_file_threshold
    }

    /// Whether `position` is too deep into long media to decode directly.
    fn beyond_decode_limit(&self, position: f64) -> bool {
        self.is_long_media_file() && position >= self.config.direct_decode_limit
    }

    /// Backend `extract_segment` will use for `position`. Live capture is
    /// only used for long media.
    pub fn backend_for(&self, position: f64) -> Backend {
        if self.beyond_decode_limit(position) && self.playback.is_some() {
            Backend::LiveCapture
        } else {
            Backend::RangeDecode
        }
    }

    /// Window starting at `position`, clamped to the file. A position at or
    /// past the end yields the last full window.
    fn window(&self, position: f64) -> (f64, f64) {
        let total = self.total_duration;
        let mut start = position.clamp(0.0, total);
        if start >= total {
            start = (total - self.config.extraction_window).max(0.0);
        }
        (start, (start + self.config.extraction_window).min(total))
    }

    /// Extract, analyze and store the window starting at `position`.
    pub async fn extract_segment(&mut self, position: f64) -> Result<&ExtractedSegment> {
        let path = self.source.clone().ok_or(Error::NotInitialized)?;
        let (start, end) = self.window(position);
        let backend = self.backend_for(start);

        if self.beyond_decode_limit(start) && self.playback.is_none() {
            log::warn!(
                "No playback element attached, decoding {:.1}s directly from the file",
                start
            );
        }
        log::info!("Extracting [{:.1}s, {:.1}s) via {:?}", start, end, backend);

        let audio = match (backend, &self.playback) {
            (Backend::LiveCapture, Some(element)) => {
                let timeout = Duration::from_secs_f64(self.config.capture_timeout);
                live_capture(element.as_ref(), start, end - start, timeout).await?
            }
            _ => self.decode_window(path, start, end - start).await?,
        };

        let estimator = Arc::clone(&self.estimator);
        let pipeline = self.pipeline.clone();
        let data = tokio::task::spawn_blocking(move || {
            analyze(&audio, 0.0, &pipeline, estimator.as_ref())
        })
        .await?;

        log::debug!("Window at {:.1}s has {} samples", start, data.len());
        Ok(self.current.insert(ExtractedSegment {
            start_time: start,
            end_time: end,
            backend,
            data,
        }))
    }

    async fn decode_window(&self, path: PathBuf, start: f64, duration: f64) -> Result<AudioData> {
        let decoder = Arc::clone(&self.decoder);
        tokio::task::spawn_blocking(move || decoder.decode_range(&path, start, duration)).await?
    }

    pub fn current_segment(&self) -> Option<&ExtractedSegment> {
        self.current.as_ref()
    }
}
