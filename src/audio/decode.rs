use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use crate::error::{Error, Result};

/// Mono PCM audio with its sample rate.
#[derive(Clone, Debug, Default)]
pub struct AudioData {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioData {
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decoding capability consumed by the cache and the extraction selector.
pub trait AudioDecoder: Send + Sync {
    /// Total duration of the media in seconds, without decoding it.
    fn probe_duration(&self, path: &Path) -> Result<f64>;

    /// Decode the whole file.
    fn decode(&self, path: &Path) -> Result<AudioData>;

    /// Decode `duration` seconds starting at `start`. The returned buffer
    /// begins at `start`; it is shorter than requested near the end of file.
    fn decode_range(&self, path: &Path, start: f64, duration: f64) -> Result<AudioData> {
        let full = self.decode(path)?;
        let sr = full.sample_rate as f64;
        let first = ((start.max(0.0) * sr) as usize).min(full.samples.len());
        let last = (((start + duration).max(0.0) * sr).ceil() as usize).min(full.samples.len());
        Ok(AudioData {
            samples: full.samples[first..last.max(first)].to_vec(),
            sample_rate: full.sample_rate,
        })
    }
}

/// Decoder backed by symphonia. Multi-channel input is downmixed to mono.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaDecoder;

struct OpenedTrack {
    format: Box<dyn FormatReader>,
    track_id: u32,
    channels: usize,
    sample_rate: u32,
    n_frames: Option<u64>,
    time_base: Option<TimeBase>,
    codec_params: symphonia::core::codecs::CodecParameters,
}

fn open_track(path: &Path) -> Result<OpenedTrack> {
    let file = File::open(path).map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::NoAudioTrack(path.to_path_buf()))?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| Error::UnknownSampleRate(path.to_path_buf()))?;

    Ok(OpenedTrack {
        track_id: track.id,
        channels: track.codec_params.channels.map_or(1, |c| c.count()),
        sample_rate,
        n_frames: track.codec_params.n_frames,
        time_base: track.codec_params.time_base,
        codec_params: track.codec_params.clone(),
        format,
    })
}

fn ts_to_seconds(ts: u64, time_base: Option<TimeBase>, sample_rate: u32) -> f64 {
    match time_base {
        Some(tb) => {
            let t = tb.calc_time(ts);
            t.seconds as f64 + t.frac
        }
        None => ts as f64 / sample_rate as f64,
    }
}

fn downmix(samples: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels <= 1 {
        out.extend_from_slice(samples);
    } else {
        for frame_samples in samples.chunks(channels) {
            out.push(frame_samples.iter().sum::<f32>() / channels as f32);
        }
    }
}

/// Decode packets of `track` into mono samples. When `window` is set, only
/// samples in `[start, start + duration)` are kept and decoding stops once
/// the window is full.
fn decode_packets(
    path: &Path,
    mut track: OpenedTrack,
    window: Option<(f64, f64)>,
) -> Result<AudioData> {
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())?;

    let sr = track.sample_rate;
    let wanted = window.map(|(_, duration)| (duration.max(0.0) * sr as f64).ceil() as usize);
    let mut all_samples: Vec<f32> = Vec::with_capacity(wanted.unwrap_or(0));
    let mut mono: Vec<f32> = Vec::new();

    loop {
        if let Some(wanted) = wanted {
            if all_samples.len() >= wanted {
                all_samples.truncate(wanted);
                break;
            }
        }

        let packet = match track.format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                log::debug!("Decoder reset required in {}", path.display());
                decoder.reset();
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track.track_id {
            continue;
        }

        let packet_start = ts_to_seconds(packet.ts(), track.time_base, sr);

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(msg)) => {
                log::debug!("Skipping undecodable packet: {}", msg);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        let num_frames = decoded.frames();
        if num_frames == 0 {
            continue;
        }

        let mut sample_buf = SampleBuffer::<f32>::new(num_frames as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        mono.clear();
        downmix(sample_buf.samples(), track.channels, &mut mono);

        match window {
            Some((start, _)) => {
                let skip = ((start - packet_start) * sr as f64).round();
                let skip = if skip > 0.0 { skip as usize } else { 0 };
                if skip < mono.len() {
                    all_samples.extend_from_slice(&mono[skip..]);
                }
            }
            None => all_samples.extend_from_slice(&mono),
        }
    }

    log::debug!(
        "Decoded {} samples ({:.2}s) from {}",
        all_samples.len(),
        all_samples.len() as f64 / sr as f64,
        path.display()
    );

    Ok(AudioData {
        samples: all_samples,
        sample_rate: sr,
    })
}

impl AudioDecoder for SymphoniaDecoder {
    fn probe_duration(&self, path: &Path) -> Result<f64> {
        let track = open_track(path)?;
        if let Some(n_frames) = track.n_frames {
            return Ok(n_frames as f64 / track.sample_rate as f64);
        }

        log::warn!(
            "{} does not declare its length, decoding it to measure duration",
            path.display()
        );
        let audio = decode_packets(path, track, None)?;
        if audio.samples.is_empty() {
            return Err(Error::UnknownDuration(PathBuf::from(path)));
        }
        Ok(audio.duration())
    }

    fn decode(&self, path: &Path) -> Result<AudioData> {
        let track = open_track(path)?;
        let audio = decode_packets(path, track, None)?;

        log::info!(
            "Decoded audio: {} samples, {}Hz, {:.1}s",
            audio.samples.len(),
            audio.sample_rate,
            audio.duration()
        );

        Ok(audio)
    }

    fn decode_range(&self, path: &Path, start: f64, duration: f64) -> Result<AudioData> {
        let mut track = open_track(path)?;
        let start = start.max(0.0);

        if start > 0.0 {
            let seek = track.format.seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::from(start),
                    track_id: Some(track.track_id),
                },
            );
            if let Err(e) = seek {
                // Packets before `start` are discarded by timestamp, so
                // reading from the top is still correct, only slower.
                log::debug!("Seek to {:.2}s failed ({}), decoding from start", start, e);
                track = open_track(path)?;
            }
        }

        decode_packets(path, track, Some((start, duration)))
    }
}
