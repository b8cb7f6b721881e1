use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Highest value `suggested_axis_max` will return, in Hz.
const AXIS_CEILING: f32 = 1000.0;
/// Axis maximum used when there is no voiced data.
const AXIS_DEFAULT: f32 = 500.0;
/// Axis maxima are rounded up to a multiple of this step.
const AXIS_STEP: f32 = 50.0;

/// A pitch curve: parallel arrays of timestamps (seconds) and pitches (Hz).
/// `None` marks a frame that was unvoiced or rejected by the gate.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PitchData {
    pub times: Vec<f64>,
    pub pitches: Vec<Option<f32>>,
}

impl PitchData {
    pub fn new(times: Vec<f64>, pitches: Vec<Option<f32>>) -> Self {
        debug_assert_eq!(times.len(), pitches.len());
        Self { times, pitches }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Timestamp of the last sample, or 0 for an empty curve.
    pub fn duration(&self) -> f64 {
        self.times.last().copied().unwrap_or(0.0)
    }

    /// Samples with `start <= time <= end`, assuming ascending times.
    pub fn slice_time_range(&self, start: f64, end: f64) -> PitchData {
        let first = self.times.partition_point(|&t| t < start);
        let last = self.times.partition_point(|&t| t <= end).max(first);
        PitchData {
            times: self.times[first..last].to_vec(),
            pitches: self.pitches[first..last].to_vec(),
        }
    }

    pub fn append(&mut self, other: PitchData) {
        self.times.extend(other.times);
        self.pitches.extend(other.pitches);
    }

    /// Index ranges of consecutive voiced samples. Single isolated points
    /// are left out since they cannot be drawn as a line.
    pub fn voiced_runs(&self) -> Vec<Range<usize>> {
        let mut runs = Vec::new();
        let mut run_start: Option<usize> = None;

        for (i, pitch) in self.pitches.iter().enumerate() {
            match (pitch.is_some(), run_start) {
                (true, None) => run_start = Some(i),
                (false, Some(start)) => {
                    if i - start > 1 {
                        runs.push(start..i);
                    }
                    run_start = None;
                }
                _ => {}
            }
        }
        if let Some(start) = run_start {
            if self.pitches.len() - start > 1 {
                runs.push(start..self.pitches.len());
            }
        }

        runs
    }

    /// Upper bound for a pitch axis: the highest voiced pitch rounded up to
    /// the next 50 Hz, clamped to 1..=1000 Hz.
    pub fn suggested_axis_max(&self) -> f32 {
        let peak = self
            .pitches
            .iter()
            .flatten()
            .copied()
            .fold(None, |acc: Option<f32>, p| Some(acc.map_or(p, |a| a.max(p))));

        match peak {
            Some(peak) => ((peak / AXIS_STEP).ceil() * AXIS_STEP).clamp(1.0, AXIS_CEILING),
            None => AXIS_DEFAULT,
        }
    }
}
