use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;

use super::segment::{build_segments, Segment, SegmentEvent, SegmentState, SegmentSummary};
use crate::audio::analysis::{analyze, analyze_span};
use crate::audio::decode::{AudioDecoder, SymphoniaDecoder};
use crate::audio::estimator::{McLeodEstimator, PitchEstimator};
use crate::audio::features::PitchData;
use crate::config::{CacheConfig, Config, PipelineConfig};
use crate::error::{Error, Result};

/// Extra audio decoded past a segment's end so that its last frames read
/// real samples from the next segment instead of padding. Covers one
/// analysis window at sample rates down to 4096 Hz.
const FRAME_CONTEXT_SECONDS: f64 = 0.5;

const EVENT_CAPACITY: usize = 64;

/// In-flight markers are keyed by generation so work for a previous file
/// never blocks the current one.
type FlightKey = (u64, usize);

/// Segmented pitch-curve cache for one media file at a time.
///
/// Short files are processed in one piece on `initialize`. Files longer
/// than `CacheConfig::threshold_duration` are split into segments that are
/// processed on demand and evicted when far from the viewed range.
///
/// Cloning is cheap; clones share the same cache.
#[derive(Clone)]
pub struct SegmentCache {
    inner: Arc<Inner>,
}

struct Inner {
    decoder: Arc<dyn AudioDecoder>,
    estimator: Arc<dyn PitchEstimator>,
    pipeline: PipelineConfig,
    config: CacheConfig,
    state: RwLock<CacheState>,
    in_flight: Mutex<HashMap<FlightKey, watch::Receiver<bool>>>,
    events: broadcast::Sender<SegmentEvent>,
}

#[derive(Default)]
struct CacheState {
    /// Bumped on every `initialize`.
    generation: u64,
    source: Option<PathBuf>,
    total_duration: f64,
    progressive: bool,
    segments: Vec<Segment>,
}

enum Claim {
    Done,
    Owner(watch::Sender<bool>, SegmentJob),
    Waiter(u64, watch::Receiver<bool>),
}

struct SegmentJob {
    generation: u64,
    path: PathBuf,
    start_time: f64,
    end_time: f64,
    progressive: bool,
}

impl SegmentCache {
    pub fn new(
        decoder: Arc<dyn AudioDecoder>,
        estimator: Arc<dyn PitchEstimator>,
        pipeline: PipelineConfig,
        mut config: CacheConfig,
    ) -> Self {
        if !(config.segment_duration > 0.0 && config.segment_duration.is_finite()) {
            log::warn!(
                "Invalid segment duration {}, using {}s",
                config.segment_duration,
                CacheConfig::default().segment_duration
            );
            config.segment_duration = CacheConfig::default().segment_duration;
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                decoder,
                estimator,
                pipeline,
                config,
                state: RwLock::new(CacheState::default()),
                in_flight: Mutex::new(HashMap::new()),
                events,
            }),
        }
    }

    /// Cache using symphonia decoding and the McLeod estimator.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(SymphoniaDecoder),
            Arc::new(McLeodEstimator::new(config.pipeline.power_threshold)),
            config.pipeline.clone(),
            config.cache.clone(),
        )
    }

    pub fn pipeline_config(&self) -> &PipelineConfig {
        &self.inner.pipeline
    }

    pub fn cache_config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Reset the cache and load `path`.
    ///
    /// Probes the duration and picks the mode once for this file. In
    /// whole-file mode the single segment is processed before returning and
    /// its failure is returned. In progressive mode the first segment and
    /// its preload segments are processed; their failures are only recorded
    /// on the segments.
    pub async fn initialize(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();

        let generation = {
            let mut state = self.inner.state.write();
            let generation = state.generation + 1;
            *state = CacheState {
                generation,
                ..CacheState::default()
            };
            generation
        };
        self.inner
            .in_flight
            .lock()
            .retain(|(g, _), _| *g == generation);

        let decoder = Arc::clone(&self.inner.decoder);
        let probe_path = path.clone();
        let total_duration =
            tokio::task::spawn_blocking(move || decoder.probe_duration(&probe_path)).await??;

        let progressive = total_duration > self.inner.config.threshold_duration;
        let segments = if progressive {
            build_segments(total_duration, self.inner.config.segment_duration)
        } else {
            vec![Segment::unprocessed(0, 0.0, total_duration)]
        };

        {
            let mut state = self.inner.state.write();
            if state.generation != generation {
                log::debug!("Initialization of {} superseded", path.display());
                return Ok(());
            }
            state.source = Some(path.clone());
            state.total_duration = total_duration;
            state.progressive = progressive;
            state.segments = segments;
        }

        if progressive {
            log::info!(
                "{}: {:.1}s, progressive mode with {} segments of {:.0}s",
                path.display(),
                total_duration,
                self.segment_count(),
                self.inner.config.segment_duration
            );
            self.load_segments_for_time_range(0.0, 0.0).await;
            Ok(())
        } else {
            log::info!("{}: {:.1}s, whole-file mode", path.display(), total_duration);
            self.process_segment(0).await
        }
    }

    /// Process segment `index` if it is still `Unprocessed`.
    ///
    /// Concurrent calls for the same index share one computation: later
    /// callers wait for the first to finish. A failure marks the segment
    /// `Failed`; the caller that did the work gets the underlying error and
    /// the waiting callers get `Error::SegmentFailed`.
    pub async fn process_segment(&self, index: usize) -> Result<()> {
        let claim = {
            let mut in_flight = self.inner.in_flight.lock();
            let state = self.inner.state.read();
            let path = state.source.clone().ok_or(Error::NotInitialized)?;
            let segment = state.segments.get(index).ok_or(Error::SegmentOutOfRange {
                index,
                count: state.segments.len(),
            })?;
            let key = (state.generation, index);

            if segment.state != SegmentState::Unprocessed {
                Claim::Done
            } else if let Some(rx) = in_flight.get(&key) {
                Claim::Waiter(state.generation, rx.clone())
            } else {
                let (tx, rx) = watch::channel(false);
                in_flight.insert(key, rx);
                Claim::Owner(
                    tx,
                    SegmentJob {
                        generation: state.generation,
                        path,
                        start_time: segment.start_time,
                        end_time: segment.end_time,
                        progressive: state.progressive,
                    },
                )
            }
        };

        match claim {
            Claim::Done => Ok(()),
            Claim::Waiter(generation, mut rx) => {
                // A dropped sender means the owner is gone; either way the
                // segment is settled.
                let _ = rx.wait_for(|done| *done).await;
                let state = self.inner.state.read();
                match state.segments.get(index) {
                    Some(segment)
                        if state.generation == generation && segment.state == SegmentState::Failed =>
                    {
                        Err(Error::SegmentFailed(index))
                    }
                    _ => Ok(()),
                }
            }
            Claim::Owner(done, job) => self.run_job(index, job, done).await,
        }
    }

    async fn run_job(&self, index: usize, job: SegmentJob, done: watch::Sender<bool>) -> Result<()> {
        log::debug!(
            "Processing segment {} [{:.1}s, {:.1}s)",
            index,
            job.start_time,
            job.end_time
        );

        let inner = Arc::clone(&self.inner);
        let path = job.path.clone();
        let (start_time, end_time, progressive) = (job.start_time, job.end_time, job.progressive);
        let computed = tokio::task::spawn_blocking(move || {
            inner.compute_segment(&path, start_time, end_time, progressive)
        })
        .await
        .map_err(Error::from)
        .and_then(|r| r);

        let (data, state, outcome) = match computed {
            Ok(data) => (data, SegmentState::Processed, Ok(())),
            Err(err) => {
                log::warn!("Segment {} of {} failed: {}", index, job.path.display(), err);
                (PitchData::default(), SegmentState::Failed, Err(err))
            }
        };
        let samples = data.len();

        let applied = {
            let mut cache = self.inner.state.write();
            if cache.generation != job.generation {
                false
            } else if let Some(segment) = cache.segments.get_mut(index) {
                *segment = segment.with_result(data, state);
                true
            } else {
                false
            }
        };

        self.inner.in_flight.lock().remove(&(job.generation, index));
        let _ = done.send(true);

        if applied {
            log::debug!("Segment {} {:?} with {} samples", index, state, samples);
            let _ = self.inner.events.send(SegmentEvent { index, state });
        } else {
            log::debug!("Discarding segment {} from a previous file", index);
        }

        outcome
    }

    /// Make sure every segment intersecting `[start, end]`, the segment
    /// after it, and `preload_segments` beyond that are processed. Segments far from
    /// `start` are evicted first. No-op in whole-file mode.
    ///
    /// Loads stop at the edge of the eviction window around `start`, so at
    /// most `max_cached_segments` segments are ever processed. Wider ranges
    /// have to be walked in steps.
    pub async fn load_segments_for_time_range(&self, start: f64, end: f64) {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        let config = &self.inner.config;
        let first = config.segment_index(start);

        let pending: Vec<usize> = {
            let state = self.inner.state.read();
            if !state.progressive || state.segments.is_empty() {
                return;
            }
            // A range ending inside a segment also pulls in the next one.
            let end_segment = (end.max(0.0) / config.segment_duration).ceil() as usize;
            let wanted = (end_segment + config.preload_segments).min(state.segments.len() - 1);
            let (_, keep_end) = keep_window(first, config.max_cached_segments);
            let last = wanted.min(keep_end.saturating_sub(1));
            if first > last {
                return;
            }
            if wanted > last {
                log::warn!(
                    "Range [{:.1}s, {:.1}s] spans more than the cache budget of {} segments, loading {}..={} only",
                    start,
                    end,
                    config.max_cached_segments,
                    first,
                    last
                );
            }
            (first..=last)
                .filter(|&i| state.segments[i].state == SegmentState::Unprocessed)
                .collect()
        };

        self.cleanup_old_segments(first);

        if pending.is_empty() {
            return;
        }

        let mut tasks = JoinSet::new();
        for index in pending {
            let cache = self.clone();
            tasks.spawn(async move { (index, cache.process_segment(index).await) });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Err(err))) => log::debug!("Segment {} left without data: {}", index, err),
                Ok(_) => {}
                Err(err) => log::error!("Segment task panicked: {}", err),
            }
        }
    }

    /// Evict processed segments outside the `max_cached_segments` window
    /// centered on `current`. Evicted segments keep their bounds so they
    /// can be processed again later. No-op in whole-file mode.
    pub fn cleanup_old_segments(&self, current: usize) {
        let (keep_start, keep_end) = keep_window(current, self.inner.config.max_cached_segments);

        let mut evicted = Vec::new();
        {
            let mut state = self.inner.state.write();
            if !state.progressive {
                return;
            }
            for segment in state.segments.iter_mut() {
                let i = segment.index;
                if segment.state == SegmentState::Processed && (i < keep_start || i >= keep_end) {
                    *segment = segment.evicted();
                    evicted.push(segment.index);
                }
            }
        }

        if !evicted.is_empty() {
            log::debug!("Evicted segments {:?} (keeping around {})", evicted, current);
        }
        for index in evicted {
            let _ = self.inner.events.send(SegmentEvent {
                index,
                state: SegmentState::Unprocessed,
            });
        }
    }

    /// Pitch samples with `start <= time <= end` from the segments that are
    /// currently processed, in time order. Missing segments leave holes.
    pub fn get_pitch_data_for_time_range(&self, start: f64, end: f64) -> PitchData {
        let state = self.inner.state.read();
        let mut result = PitchData::default();
        for segment in &state.segments {
            if segment.state == SegmentState::Processed && segment.overlaps(start, end) {
                result.append(segment.data.slice_time_range(start, end));
            }
        }
        result
    }

    /// Seconds, or 0 before a file has been initialized.
    pub fn total_duration(&self) -> f64 {
        self.inner.state.read().total_duration
    }

    pub fn is_progressive(&self) -> bool {
        self.inner.state.read().progressive
    }

    pub fn segment_count(&self) -> usize {
        self.inner.state.read().segments.len()
    }

    pub fn source(&self) -> Option<PathBuf> {
        self.inner.state.read().source.clone()
    }

    pub fn segment_summaries(&self) -> Vec<SegmentSummary> {
        self.inner
            .state
            .read()
            .segments
            .iter()
            .map(Segment::summary)
            .collect()
    }

    /// Receive an event after every segment state change.
    pub fn subscribe(&self) -> broadcast::Receiver<SegmentEvent> {
        self.inner.events.subscribe()
    }
}

/// Segment indices `[start, end)` that survive eviction around `current`.
fn keep_window(current: usize, budget: usize) -> (usize, usize) {
    let start = current.saturating_sub(budget / 2);
    (start, current + budget - budget / 2)
}

impl Inner {
    fn compute_segment(
        &self,
        path: &Path,
        start_time: f64,
        end_time: f64,
        progressive: bool,
    ) -> Result<PitchData> {
        let estimator = self.estimator.as_ref();

        if !progressive {
            let audio = self.decoder.decode(path)?;
            return Ok(analyze(&audio, 0.0, &self.pipeline, estimator));
        }

        let span = end_time - start_time;
        let audio = self
            .decoder
            .decode_range(path, start_time, span + FRAME_CONTEXT_SECONDS)?;
        let end_sample = ((span * audio.sample_rate as f64).round() as usize).min(audio.samples.len());

        Ok(analyze_span(&audio, 0, end_sample, start_time, &self.pipeline, estimator))
    }
}
