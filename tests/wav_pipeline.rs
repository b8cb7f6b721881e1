use std::f32::consts::PI;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use pitchcurve::audio::decode::{AudioData, AudioDecoder, SymphoniaDecoder};
use pitchcurve::audio::estimator::{McLeodEstimator, PitchEstimate, PitchEstimator};
use pitchcurve::config::{CacheConfig, PipelineConfig};
use pitchcurve::{Error, Result, SegmentCache, SegmentState};
use tempfile::TempDir;

fn write_sine(dir: &TempDir, name: &str, seconds: f32, freq: f32, sample_rate: u32) -> PathBuf {
    let path = dir.path().join(name);
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    let total = (seconds * sample_rate as f32) as usize;
    for i in 0..total {
        let t = i as f32 / sample_rate as f32;
        let value = 0.5 * (2.0 * PI * freq * t).sin();
        writer.write_sample((value * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();
    path
}

fn fixed_estimator() -> Arc<dyn PitchEstimator> {
    Arc::new(|_: &[f32], _: u32| -> Result<PitchEstimate> {
        Ok(PitchEstimate {
            frequency: 150.0,
            clarity: 0.9,
        })
    })
}

/// Symphonia decoder that records every range it is asked for and can be
/// told to fail for some of them.
#[derive(Default)]
struct RecordingDecoder {
    ranges: Mutex<Vec<f64>>,
    fail_from: Option<f64>,
    fail_until: Option<f64>,
    decodes: AtomicUsize,
}

impl AudioDecoder for RecordingDecoder {
    fn probe_duration(&self, path: &Path) -> Result<f64> {
        SymphoniaDecoder.probe_duration(path)
    }

    fn decode(&self, path: &Path) -> Result<AudioData> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        SymphoniaDecoder.decode(path)
    }

    fn decode_range(&self, path: &Path, start: f64, duration: f64) -> Result<AudioData> {
        self.ranges.lock().push(start);
        if let (Some(from), Some(until)) = (self.fail_from, self.fail_until) {
            if start >= from && start < until {
                return Err(Error::Capture(format!("unreadable block at {start}")));
            }
        }
        SymphoniaDecoder.decode_range(path, start, duration)
    }
}

impl RecordingDecoder {
    fn calls_at(&self, start: f64) -> usize {
        self.ranges.lock().iter().filter(|&&s| s == start).count()
    }
}

#[test]
fn probe_and_range_decode_wav() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_sine(&dir, "tone.wav", 3.0, 220.0, 16000);

    let duration = SymphoniaDecoder.probe_duration(&path).unwrap();
    assert!((duration - 3.0).abs() < 1e-3);

    let full = SymphoniaDecoder.decode(&path).unwrap();
    assert_eq!(full.sample_rate, 16000);
    assert_eq!(full.samples.len(), 48000);

    let window = SymphoniaDecoder.decode_range(&path, 1.0, 0.5).unwrap();
    assert_eq!(window.samples.len(), 8000);
    for (i, sample) in window.samples.iter().take(200).enumerate() {
        assert!((sample - full.samples[16000 + i]).abs() < 1e-3);
    }

    let tail = SymphoniaDecoder.decode_range(&path, 2.8, 1.0).unwrap();
    assert!(tail.samples.len() <= 3200);
}

#[tokio::test]
async fn short_file_yields_steady_pitch() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_sine(&dir, "a3.wav", 4.0, 220.0, 16000);

    let cache = SegmentCache::new(
        Arc::new(SymphoniaDecoder),
        Arc::new(McLeodEstimator::default()),
        PipelineConfig::default(),
        CacheConfig::default(),
    );
    cache.initialize(&path).await.unwrap();
    assert!(!cache.is_progressive());

    let data = cache.get_pitch_data_for_time_range(0.5, 3.5);
    let voiced: Vec<f32> = data.pitches.iter().flatten().copied().collect();
    assert!(voiced.len() > data.len() / 2);
    for pitch in voiced {
        assert!((pitch - 220.0).abs() < 5.0, "pitch {pitch}");
    }
    assert_eq!(data.suggested_axis_max(), 250.0);
}

#[tokio::test]
async fn progressive_segments_are_contiguous_on_disk_audio() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_sine(&dir, "long.wav", 45.0, 150.0, 8000);

    let cache = SegmentCache::new(
        Arc::new(SymphoniaDecoder),
        fixed_estimator(),
        PipelineConfig::default(),
        CacheConfig::default(),
    );
    cache.initialize(&path).await.unwrap();
    assert!(cache.is_progressive());
    assert_eq!(cache.segment_count(), 5);

    cache.load_segments_for_time_range(12.0, 18.0).await;
    let data = cache.get_pitch_data_for_time_range(5.0, 25.0);
    // Hops are exact inside a segment; the first frame of each segment
    // sits on its start time, so the step across a boundary is never longer.
    let hop = 256.0 / 8000.0;
    for pair in data.times.windows(2) {
        let step = pair[1] - pair[0];
        assert!(step > 0.0 && step <= hop + 1e-9, "step {:?}", pair);
    }
    assert!(data.times.iter().any(|&t| t == 10.0));
    assert!(data.times.iter().any(|&t| t == 20.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_decode_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_sine(&dir, "long.wav", 45.0, 150.0, 8000);

    let decoder = Arc::new(RecordingDecoder::default());
    let cache = SegmentCache::new(
        decoder.clone(),
        fixed_estimator(),
        PipelineConfig::default(),
        CacheConfig::default(),
    );
    cache.initialize(&path).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move { cache.process_segment(3).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(decoder.calls_at(30.0), 1);
    assert_eq!(cache.segment_summaries()[3].state, SegmentState::Processed);
}

#[tokio::test]
async fn failed_segment_is_reported_and_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_sine(&dir, "long.wav", 45.0, 150.0, 8000);

    let decoder = Arc::new(RecordingDecoder {
        fail_from: Some(20.0),
        fail_until: Some(30.0),
        ..RecordingDecoder::default()
    });
    let cache = SegmentCache::new(
        decoder.clone(),
        fixed_estimator(),
        PipelineConfig::default(),
        CacheConfig::default(),
    );
    cache.initialize(&path).await.unwrap();
    let mut events = cache.subscribe();

    cache.load_segments_for_time_range(20.0, 25.0).await;
    cache.load_segments_for_time_range(20.0, 25.0).await;

    let summaries = cache.segment_summaries();
    assert_eq!(summaries[2].state, SegmentState::Failed);
    assert_eq!(summaries[2].samples, 0);
    assert_eq!(summaries[3].state, SegmentState::Processed);
    assert_eq!(decoder.calls_at(20.0), 1);
    assert!(cache.get_pitch_data_for_time_range(20.0, 29.0).is_empty());

    let mut failed = false;
    while let Ok(event) = events.try_recv() {
        failed |= event.index == 2 && event.state == SegmentState::Failed;
    }
    assert!(failed);

    cache.initialize(&path).await.unwrap();
    assert_eq!(cache.segment_summaries()[2].state, SegmentState::Unprocessed);
}

#[tokio::test]
async fn missing_file_fails_initialize() {
    let cache = SegmentCache::new(
        Arc::new(SymphoniaDecoder),
        fixed_estimator(),
        PipelineConfig::default(),
        CacheConfig::default(),
    );
    let err = cache.initialize("/nonexistent/take.wav").await.unwrap_err();
    assert!(matches!(err, Error::Open { .. }));
    assert_eq!(cache.segment_count(), 0);
}
