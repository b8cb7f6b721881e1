use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub long_media: LongMediaConfig,
}

/// Gating and smoothing parameters for pitch extraction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Lowest admissible pitch in Hz.
    #[serde(default = "default_min_pitch")]
    pub min_pitch: f32,
    /// Highest admissible pitch in Hz.
    #[serde(default = "default_max_pitch")]
    pub max_pitch: f32,
    /// Estimates with a lower clarity become gaps.
    #[serde(default = "default_clarity_threshold")]
    pub clarity_threshold: f32,
    /// Smoothing window, in pitch samples.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Frames quieter than this are not analyzed by the McLeod estimator.
    #[serde(default)]
    pub power_threshold: f32,
}

/// Segmentation and memory budget of the pitch cache.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Files up to this many seconds are processed in one piece.
    #[serde(default = "default_threshold_duration")]
    pub threshold_duration: f64,
    #[serde(default = "default_segment_duration")]
    pub segment_duration: f64,
    /// Segments processed past the end of each requested range.
    #[serde(default = "default_preload_segments")]
    pub preload_segments: usize,
    /// Most processed segments kept after eviction.
    #[serde(default = "default_max_cached_segments")]
    pub max_cached_segments: usize,
}

/// Backend selection for very long media.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LongMediaConfig {
    /// Media longer than this many seconds counts as long.
    #[serde(default = "default_long_file_threshold")]
    pub long_file_threshold: f64,
    /// Positions before this offset are decoded from the file; later ones
    /// are captured from the playback element.
    #[serde(default = "default_direct_decode_limit")]
    pub direct_decode_limit: f64,
    /// Seconds of audio per extracted window.
    #[serde(default = "default_extraction_window")]
    pub extraction_window: f64,
    /// Upper bound on a live capture, in seconds.
    #[serde(default = "default_capture_timeout")]
    pub capture_timeout: f64,
}

impl PipelineConfig {
    /// The estimate as a pitch value if it passes the band and clarity gate.
    pub fn admit(&self, frequency: f32, clarity: f32) -> Option<f32> {
        let in_band = frequency >= self.min_pitch && frequency <= self.max_pitch;
        (frequency.is_finite() && in_band && clarity >= self.clarity_threshold).then_some(frequency)
    }
}

impl CacheConfig {
    pub fn segment_index(&self, time: f64) -> usize {
        (time.max(0.0) / self.segment_duration).floor() as usize
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_pitch: default_min_pitch(),
            max_pitch: default_max_pitch(),
            clarity_threshold: default_clarity_threshold(),
            window_size: default_window_size(),
            power_threshold: 0.0,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            threshold_duration: default_threshold_duration(),
            segment_duration: default_segment_duration(),
            preload_segments: default_preload_segments(),
            max_cached_segments: default_max_cached_segments(),
        }
    }
}

impl Default for LongMediaConfig {
    fn default() -> Self {
        Self {
            long_file_threshold: default_long_file_threshold(),
            direct_decode_limit: default_direct_decode_limit(),
            extraction_window: default_extraction_window(),
            capture_timeout: default_capture_timeout(),
        }
    }
}

fn default_min_pitch() -> f32 { 60.0 }
fn default_max_pitch() -> f32 { 500.0 }
fn default_clarity_threshold() -> f32 { 0.7 }
fn default_window_size() -> usize { 25 }
fn default_threshold_duration() -> f64 { 30.0 }
fn default_segment_duration() -> f64 { 10.0 }
fn default_preload_segments() -> usize { 1 }
fn default_max_cached_segments() -> usize { 6 }
fn default_long_file_threshold() -> f64 { 1800.0 }
fn default_direct_decode_limit() -> f64 { 1800.0 }
fn default_extraction_window() -> f64 { 30.0 }
fn default_capture_timeout() -> f64 { 35.0 }

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.cache.segment_duration, 10.0);
        assert_eq!(cfg.pipeline.window_size, 25);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [pipeline]
            max_pitch = 800.0

            [cache]
            max_cached_segments = 4
            "#,
        )
        .unwrap();
        assert_eq!(cfg.pipeline.max_pitch, 800.0);
        assert_eq!(cfg.pipeline.min_pitch, 60.0);
        assert_eq!(cfg.cache.max_cached_segments, 4);
        assert_eq!(cfg.cache.threshold_duration, 30.0);
        assert_eq!(cfg.long_media, LongMediaConfig::default());
    }

    #[test]
    fn gate_bounds_are_inclusive() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.admit(60.0, 0.7), Some(60.0));
        assert_eq!(cfg.admit(500.0, 0.9), Some(500.0));
        assert_eq!(cfg.admit(59.9, 0.9), None);
        assert_eq!(cfg.admit(200.0, 0.69), None);
        assert_eq!(cfg.admit(f32::NAN, 1.0), None);
    }

    #[test]
    fn segment_index_floors() {
        let cfg = CacheConfig::default();
        assert_eq!(cfg.segment_index(0.0), 0);
        assert_eq!(cfg.segment_index(9.99), 0);
        assert_eq!(cfg.segment_index(10.0), 1);
        assert_eq!(cfg.segment_index(-3.0), 0);
    }

    #[test]
    fn load_reports_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pitchcurve.toml");
        std::fs::write(&path, "[cache]\nsegment_duration = \"ten\"").unwrap();
        assert!(matches!(load_config(&path), Err(crate::Error::Config(_))));
    }
}
