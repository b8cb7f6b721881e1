use serde::Serialize;

use crate::audio::features::PitchData;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentState {
    /// Never processed, or evicted.
    Unprocessed,
    Processed,
    /// Processing failed; holds no data and is not retried until the
    /// cache is re-initialized.
    Failed,
}

/// A fixed-duration slice of a file's pitch curve.
#[derive(Clone, Debug)]
pub struct Segment {
    pub index: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub data: PitchData,
    pub state: SegmentState,
}

impl Segment {
    pub fn unprocessed(index: usize, start_time: f64, end_time: f64) -> Self {
        Self {
            index,
            start_time,
            end_time,
            data: PitchData::default(),
            state: SegmentState::Unprocessed,
        }
    }

    /// Same bounds, new contents.
    pub fn with_result(&self, data: PitchData, state: SegmentState) -> Self {
        Self {
            index: self.index,
            start_time: self.start_time,
            end_time: self.end_time,
            data,
            state,
        }
    }

    /// Same bounds, arrays dropped.
    pub fn evicted(&self) -> Self {
        Self::unprocessed(self.index, self.start_time, self.end_time)
    }

    pub fn overlaps(&self, start: f64, end: f64) -> bool {
        self.start_time <= end && self.end_time >= start
    }

    pub fn summary(&self) -> SegmentSummary {
        SegmentSummary {
            index: self.index,
            start_time: self.start_time,
            end_time: self.end_time,
            state: self.state,
            samples: self.data.len(),
        }
    }
}

/// Lightweight view of a segment for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SegmentSummary {
    pub index: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub state: SegmentState,
    pub samples: usize,
}

/// Emitted after every segment state transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentEvent {
    pub index: usize,
    pub state: SegmentState,
}

/// Contiguous `Unprocessed` segments covering `[0, total_duration)`; the
/// last one is cut short at `total_duration`.
pub fn build_segments(total_duration: f64, segment_duration: f64) -> Vec<Segment> {
    if total_duration <= 0.0 || segment_duration <= 0.0 {
        return Vec::new();
    }

    let count = (total_duration / segment_duration).ceil() as usize;
    (0..count)
        .map(|i| {
            let start = i as f64 * segment_duration;
            let end = ((i + 1) as f64 * segment_duration).min(total_duration);
            Segment::unprocessed(i, start, end)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_contiguous_segments() {
        let segments = build_segments(45.0, 10.0);
        assert_eq!(segments.len(), 5);
        for pair in segments.windows(2) {
            assert_eq!(pair[0].end_time, pair[1].start_time);
        }
        assert_eq!(segments[0].start_time, 0.0);
        assert_eq!(segments[4].start_time, 40.0);
        assert_eq!(segments[4].end_time, 45.0);
        assert!(segments.iter().all(|s| s.state == SegmentState::Unprocessed));
    }

    #[test]
    fn exact_multiple_has_no_empty_tail() {
        let segments = build_segments(40.0, 10.0);
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[3].end_time, 40.0);
    }

    #[test]
    fn degenerate_inputs_build_nothing() {
        assert!(build_segments(0.0, 10.0).is_empty());
        assert!(build_segments(10.0, 0.0).is_empty());
    }

    #[test]
    fn eviction_keeps_bounds() {
        let seg = Segment::unprocessed(3, 30.0, 40.0).with_result(
            PitchData::new(vec![30.0, 30.1], vec![Some(100.0), None]),
            SegmentState::Processed,
        );
        let evicted = seg.evicted();
        assert_eq!(evicted.state, SegmentState::Unprocessed);
        assert!(evicted.data.is_empty());
        assert_eq!((evicted.start_time, evicted.end_time), (30.0, 40.0));
    }

    #[test]
    fn overlap_is_inclusive() {
        let seg = Segment::unprocessed(1, 10.0, 20.0);
        assert!(seg.overlaps(20.0, 25.0));
        assert!(seg.overlaps(5.0, 10.0));
        assert!(!seg.overlaps(20.5, 25.0));
    }
}
