mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use cli::{Cli, OutputFormat};
use pitchcurve::cache::SegmentSummary;
use pitchcurve::capture::Backend;
use pitchcurve::config::{self, Config, PipelineConfig};
use pitchcurve::{ExtractionSelector, PitchData, SegmentCache};

#[derive(Serialize)]
struct Report {
    source: PathBuf,
    duration: f64,
    progressive: bool,
    start: f64,
    end: f64,
    axis_max: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    backend: Option<Backend>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    segments: Vec<SegmentSummary>,
    #[serde(flatten)]
    curve: PitchData,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    if !cli.input.exists() {
        anyhow::bail!("Input file not found: {}", cli.input.display());
    }
    log::info!("Input: {}", cli.input.display());
    log::info!(
        "Pitch band {:.0}-{:.0} Hz, clarity >= {:.2}, smoothing window {}",
        config.pipeline.min_pitch,
        config.pipeline.max_pitch,
        config.pipeline.clarity_threshold,
        config.pipeline.window_size
    );

    let report = if let Some(position) = cli.position {
        extract_window(&cli.input, &config, position).await?
    } else if cli.all {
        whole_curve(&cli.input, &config).await?
    } else {
        range_curve(&cli.input, &config, cli.start, cli.end).await?
    };

    let voiced = report.curve.pitches.iter().filter(|p| p.is_some()).count();
    log::info!(
        "{} samples, {} voiced, {} drawable runs",
        report.curve.len(),
        voiced,
        report.curve.voiced_runs().len()
    );

    write_report(&report, cli.format, cli.output.as_deref())
}

/// Config file lookup: explicit --config, then pitchcurve.toml in the
/// working directory, then the user config directories.
fn find_config(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from("pitchcurve.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("pitchcurve").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("pitchcurve").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}

fn resolve_config(cli: &Cli) -> Result<Config> {
    let mut cfg = match find_config(cli.config.as_deref()) {
        Some(path) => {
            let cfg = config::load_config(&path)
                .with_context(|| format!("Failed to load config {}", path.display()))?;
            log::info!("Loaded config from {}", path.display());
            cfg
        }
        None => Config::default(),
    };

    // Flags left at their defaults don't override the file
    let defaults = PipelineConfig::default();
    if cli.min_pitch != defaults.min_pitch { cfg.pipeline.min_pitch = cli.min_pitch; }
    if cli.max_pitch != defaults.max_pitch { cfg.pipeline.max_pitch = cli.max_pitch; }
    if cli.clarity != defaults.clarity_threshold { cfg.pipeline.clarity_threshold = cli.clarity; }
    if cli.window != defaults.window_size { cfg.pipeline.window_size = cli.window; }

    if cfg.pipeline.min_pitch >= cfg.pipeline.max_pitch {
        anyhow::bail!(
            "min pitch ({} Hz) must be below max pitch ({} Hz)",
            cfg.pipeline.min_pitch,
            cfg.pipeline.max_pitch
        );
    }
    Ok(cfg)
}

async fn range_curve(input: &Path, config: &Config, start: f64, end: Option<f64>) -> Result<Report> {
    let cache = SegmentCache::from_config(config);
    cache
        .initialize(input)
        .await
        .with_context(|| format!("Failed to analyze {}", input.display()))?;

    let duration = cache.total_duration();
    let end = end.unwrap_or(duration).min(duration);
    let start = start.clamp(0.0, end);
    let curve = collect_range(&cache, start, end, None).await;

    Ok(report(input, &cache, start, end, curve))
}

async fn whole_curve(input: &Path, config: &Config) -> Result<Report> {
    let cache = SegmentCache::from_config(config);
    cache
        .initialize(input)
        .await
        .with_context(|| format!("Failed to analyze {}", input.display()))?;
    let duration = cache.total_duration();

    let pb = ProgressBar::new(cache.segment_count() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} segments ({eta} remaining)")
            .context("Invalid progress bar template")?
            .progress_chars("=>-"),
    );
    let curve = collect_range(&cache, 0.0, duration, Some(&pb)).await;
    pb.finish_with_message("done");

    Ok(report(input, &cache, 0.0, duration, curve))
}

/// Pitch samples in `[start, end]`, processing one segment at a time and
/// evicting behind it so the cache never holds more than its budget.
async fn collect_range(cache: &SegmentCache, start: f64, end: f64, pb: Option<&ProgressBar>) -> PitchData {
    if !cache.is_progressive() {
        return cache.get_pitch_data_for_time_range(start, end);
    }

    let mut curve = PitchData::default();
    for segment in cache.segment_summaries() {
        if segment.end_time < start || segment.start_time > end {
            continue;
        }
        cache.cleanup_old_segments(segment.index);
        if let Err(err) = cache.process_segment(segment.index).await {
            let msg = format!("segment {} skipped: {}", segment.index, err);
            match pb {
                Some(pb) => pb.println(msg),
                None => log::warn!("{}", msg),
            }
        }
        // Range queries are inclusive; the next segment's first sample
        // sits exactly on end_time.
        let mut part = cache.get_pitch_data_for_time_range(start.max(segment.start_time), end.min(segment.end_time));
        let keep = part.times.partition_point(|&t| t < segment.end_time);
        part.times.truncate(keep);
        part.pitches.truncate(keep);
        curve.append(part);
        if let Some(pb) = pb {
            pb.inc(1);
        }
    }
    curve
}

fn report(input: &Path, cache: &SegmentCache, start: f64, end: f64, curve: PitchData) -> Report {
    Report {
        source: input.to_path_buf(),
        duration: cache.total_duration(),
        progressive: cache.is_progressive(),
        start,
        end,
        axis_max: curve.suggested_axis_max(),
        backend: None,
        segments: if cache.is_progressive() { cache.segment_summaries() } else { Vec::new() },
        curve,
    }
}

async fn extract_window(input: &Path, config: &Config, position: f64) -> Result<Report> {
    let mut selector = ExtractionSelector::from_config(config);
    let duration = selector
        .open(input)
        .await
        .with_context(|| format!("Failed to probe {}", input.display()))?;
    if !selector.is_long_media_file() {
        log::info!("{:.0}s is below the long-media threshold, decoding directly", duration);
    }

    let segment = selector
        .extract_segment(position)
        .await
        .with_context(|| format!("Failed to extract window at {:.1}s", position))?;

    Ok(Report {
        source: input.to_path_buf(),
        duration,
        progressive: false,
        start: segment.start_time,
        end: segment.end_time,
        axis_max: segment.data.suggested_axis_max(),
        backend: Some(segment.backend),
        segments: Vec::new(),
        curve: segment.data.clone(),
    })
}

fn write_report(report: &Report, format: OutputFormat, output: Option<&Path>) -> Result<()> {
    let sink: Box<dyn Write> = match output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    let mut out = BufWriter::new(sink);

    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut out, report).context("Failed to write JSON")?;
            writeln!(out)?;
        }
        OutputFormat::Csv => {
            writeln!(out, "time,pitch")?;
            for (time, pitch) in report.curve.times.iter().zip(&report.curve.pitches) {
                match pitch {
                    Some(hz) => writeln!(out, "{:.4},{:.2}", time, hz)?,
                    None => writeln!(out, "{:.4},", time)?,
                }
            }
        }
    }

    out.flush()?;
    if let Some(path) = output {
        log::info!("Wrote {}", path.display());
    }
    Ok(())
}
