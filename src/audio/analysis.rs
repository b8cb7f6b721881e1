use std::borrow::Cow;

use rayon::prelude::*;

use super::decode::AudioData;
use super::estimator::PitchEstimator;
use super::features::PitchData;
use super::smoothing::smooth;
use crate::config::PipelineConfig;

/// Samples per analysis frame.
pub const WINDOW_SIZE: usize = 2048;
/// Samples between consecutive frame starts.
pub const HOP_SIZE: usize = 256;

/// Seconds between consecutive pitch samples at `sample_rate`.
pub fn hop_seconds(sample_rate: u32) -> f64 {
    HOP_SIZE as f64 / sample_rate as f64
}

/// The `WINDOW_SIZE` frame starting at `position`.
///
/// Frames that run past the end of the buffer are padded with the last
/// available sample (silence for an empty buffer) instead of being dropped,
/// so the tail of a recording still gets pitch samples.
pub fn frame_at(samples: &[f32], position: usize) -> Cow<'_, [f32]> {
    let end = position.saturating_add(WINDOW_SIZE);
    if end <= samples.len() {
        return Cow::Borrowed(&samples[position..end]);
    }

    let available = samples.get(position..).unwrap_or(&[]);
    let fill = samples.last().copied().unwrap_or(0.0);
    let mut frame = Vec::with_capacity(WINDOW_SIZE);
    frame.extend_from_slice(available);
    frame.resize(WINDOW_SIZE, fill);
    Cow::Owned(frame)
}

/// Run the estimator over `samples[start_sample..end_sample)` at `HOP_SIZE`
/// spacing and gate each estimate.
///
/// A value is kept only when it lies within `[min_pitch, max_pitch]` and its
/// clarity reaches `clarity_threshold`; anything else, including estimator
/// errors, becomes a gap. Every frame gets a timestamp, `time_offset +
/// position / sample_rate`, whether or not its value survives.
pub fn extract_pitch(
    samples: &[f32],
    sample_rate: u32,
    start_sample: usize,
    end_sample: usize,
    time_offset: f64,
    config: &PipelineConfig,
    estimator: &dyn PitchEstimator,
) -> PitchData {
    if sample_rate == 0 || start_sample >= end_sample {
        return PitchData::default();
    }

    let positions: Vec<usize> = (start_sample..end_sample).step_by(HOP_SIZE).collect();

    let times: Vec<f64> = positions
        .iter()
        .map(|&pos| time_offset + pos as f64 / sample_rate as f64)
        .collect();

    let pitches: Vec<Option<f32>> = positions
        .par_iter()
        .map(|&pos| {
            let frame = frame_at(samples, pos);
            match estimator.estimate(&frame, sample_rate) {
                Ok(est) => config.admit(est.frequency, est.clarity),
                Err(err) => {
                    log::trace!("Estimator failed at sample {}: {}", pos, err);
                    None
                }
            }
        })
        .collect();

    PitchData::new(times, pitches)
}

/// Gate and smooth a whole buffer, with timestamps starting at `time_offset`.
pub fn analyze(
    audio: &AudioData,
    time_offset: f64,
    config: &PipelineConfig,
    estimator: &dyn PitchEstimator,
) -> PitchData {
    analyze_span(audio, 0, audio.samples.len(), time_offset, config, estimator)
}

/// Gate and smooth frames starting in `[start_sample, end_sample)`. Samples
/// past `end_sample` are still read as frame context.
pub fn analyze_span(
    audio: &AudioData,
    start_sample: usize,
    end_sample: usize,
    time_offset: f64,
    config: &PipelineConfig,
    estimator: &dyn PitchEstimator,
) -> PitchData {
    let mut data = extract_pitch(
        &audio.samples,
        audio.sample_rate,
        start_sample,
        end_sample,
        time_offset,
        config,
        estimator,
    );

    let voiced = data.pitches.iter().filter(|p| p.is_some()).count();
    log::debug!(
        "Extracted {} frames ({} voiced), smoothing with window {}",
        data.len(),
        voiced,
        config.window_size
    );

    data.pitches = smooth(&data.pitches, config.window_size);
    data
}
