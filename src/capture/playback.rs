use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

use crate::audio::decode::AudioData;
use crate::error::{Error, Result};

/// Audio tapped from a playing media element.
pub struct CaptureStream {
    pub sample_rate: u32,
    /// Mono sample blocks in playback order. Closed when playback stops.
    pub blocks: mpsc::Receiver<Vec<f32>>,
}

/// A media element that already has the file loaded and can play it.
///
/// Live capture takes over the element for the duration of the capture and
/// puts position, mute and play/pause state back afterwards.
pub trait PlaybackElement: Send + Sync {
    fn position(&self) -> f64;
    fn is_paused(&self) -> bool;
    fn is_muted(&self) -> bool;

    fn seek(&self, position: f64) -> Result<()>;
    fn set_muted(&self, muted: bool);
    fn play(&self) -> Result<()>;
    fn pause(&self);

    /// Start delivering the element's output audio.
    fn attach_analyzer(&self) -> Result<CaptureStream>;
    fn detach_analyzer(&self);
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct PlaybackSnapshot {
    position: f64,
    muted: bool,
    paused: bool,
}

impl PlaybackSnapshot {
    fn take(element: &dyn PlaybackElement) -> Self {
        Self {
            position: element.position(),
            muted: element.is_muted(),
            paused: element.is_paused(),
        }
    }

    fn restore(&self, element: &dyn PlaybackElement) {
        if self.paused {
            element.pause();
        }
        if let Err(err) = element.seek(self.position) {
            log::warn!("Could not restore playback position {:.2}s: {}", self.position, err);
        }
        element.set_muted(self.muted);
        if !self.paused {
            if let Err(err) = element.play() {
                log::warn!("Could not resume playback: {}", err);
            }
        }
    }
}

/// Capture `duration` seconds of audio from `element` starting at `start`.
///
/// Output is muted while capturing. Capture stops once enough samples have
/// arrived, when the stream closes, or after `timeout`; a timeout with some
/// audio returns what was captured. The element's previous state is restored
/// in every case.
pub async fn live_capture(
    element: &dyn PlaybackElement,
    start: f64,
    duration: f64,
    timeout: Duration,
) -> Result<AudioData> {
    let snapshot = PlaybackSnapshot::take(element);

    let result = capture_window(element, start, duration, timeout).await;

    element.detach_analyzer();
    snapshot.restore(element);

    if let Err(err) = &result {
        log::warn!("Live capture at {:.1}s failed: {}", start, err);
    }
    result
}

async fn capture_window(
    element: &dyn PlaybackElement,
    start: f64,
    duration: f64,
    timeout: Duration,
) -> Result<AudioData> {
    element.set_muted(true);
    element.seek(start)?;
    let mut stream = element.attach_analyzer()?;
    element.play()?;

    let wanted = (duration.max(0.0) * stream.sample_rate as f64).ceil() as usize;
    let mut samples: Vec<f32> = Vec::with_capacity(wanted);
    let deadline = Instant::now() + timeout;

    while samples.len() < wanted {
        match timeout_at(deadline, stream.blocks.recv()).await {
            Ok(Some(block)) => samples.extend_from_slice(&block),
            Ok(None) => {
                log::debug!("Capture stream closed after {} samples", samples.len());
                break;
            }
            Err(_) if samples.is_empty() => {
                return Err(Error::CaptureTimeout(timeout.as_secs_f64()));
            }
            Err(_) => {
                log::warn!(
                    "Capture timed out with {:.1}s of {:.1}s",
                    samples.len() as f64 / stream.sample_rate as f64,
                    duration
                );
                break;
            }
        }
    }

    if samples.is_empty() {
        return Err(Error::Capture("playback produced no audio".into()));
    }
    samples.truncate(wanted);

    Ok(AudioData {
        samples,
        sample_rate: stream.sample_rate,
    })
}
