use pitch_detection::detector::mcleod::McLeodDetector;
use pitch_detection::detector::PitchDetector;

use crate::error::{Error, Result};

/// One pitch estimate for a frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PitchEstimate {
    /// Estimated fundamental frequency in Hz.
    pub frequency: f32,
    /// Reliability of the estimate, 0.0-1.0.
    pub clarity: f32,
}

/// Pitch estimation capability. Called once per frame, possibly from
/// several threads at once.
pub trait PitchEstimator: Send + Sync {
    fn estimate(&self, frame: &[f32], sample_rate: u32) -> Result<PitchEstimate>;
}

impl<F> PitchEstimator for F
where
    F: Fn(&[f32], u32) -> Result<PitchEstimate> + Send + Sync,
{
    fn estimate(&self, frame: &[f32], sample_rate: u32) -> Result<PitchEstimate> {
        self(frame, sample_rate)
    }
}

const UNVOICED: PitchEstimate = PitchEstimate {
    frequency: 0.0,
    clarity: 0.0,
};

/// McLeod pitch method via the `pitch-detection` crate.
///
/// The detector's own clarity threshold is left at zero so that every
/// estimate carries its clarity back to the gate, which applies the
/// configured threshold itself.
#[derive(Clone, Debug)]
pub struct McLeodEstimator {
    pub power_threshold: f32,
}

impl Default for McLeodEstimator {
    fn default() -> Self {
        Self { power_threshold: 0.0 }
    }
}

impl McLeodEstimator {
    pub fn new(power_threshold: f32) -> Self {
        Self { power_threshold }
    }
}

impl PitchEstimator for McLeodEstimator {
    fn estimate(&self, frame: &[f32], sample_rate: u32) -> Result<PitchEstimate> {
        if frame.is_empty() {
            return Err(Error::Estimator("empty frame".into()));
        }
        if frame.iter().any(|s| !s.is_finite()) {
            return Err(Error::Estimator("frame contains non-finite samples".into()));
        }
        if frame.iter().all(|s| s.abs() <= f32::EPSILON) {
            return Ok(UNVOICED);
        }

        // Detectors keep scratch buffers sized to the frame, so one is
        // built per call to stay shareable across rayon workers.
        let mut detector = McLeodDetector::new(frame.len(), frame.len() / 2);
        let pitch = detector.get_pitch(frame, sample_rate as usize, self.power_threshold, 0.0);

        Ok(match pitch {
            Some(p) if p.frequency.is_finite() && p.clarity.is_finite() => PitchEstimate {
                frequency: p.frequency,
                clarity: p.clarity,
            },
            _ => UNVOICED,
        })
    }
}
