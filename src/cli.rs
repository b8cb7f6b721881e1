use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pitchcurve", about = "Extract smoothed pitch curves from audio and video files")]
pub struct Cli {
    /// Input media file (WAV, MP3, FLAC, OGG, MP4/M4A)
    pub input: PathBuf,

    /// Start of the requested range in seconds
    #[arg(short, long, default_value_t = 0.0)]
    pub start: f64,

    /// End of the requested range in seconds (defaults to the end of the file)
    #[arg(short, long)]
    pub end: Option<f64>,

    /// Process every segment and emit the whole curve
    #[arg(long, conflicts_with_all = ["end", "position"])]
    pub all: bool,

    /// Extract one long-media window starting at this position
    #[arg(short, long)]
    pub position: Option<f64>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Output file (stdout when omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Config file (TOML). Auto-detects pitchcurve.toml or ~/.config/pitchcurve/config.toml
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Lowest accepted pitch in Hz
    #[arg(long, default_value_t = 60.0)]
    pub min_pitch: f32,

    /// Highest accepted pitch in Hz
    #[arg(long, default_value_t = 500.0)]
    pub max_pitch: f32,

    /// Minimum estimator clarity (0.0-1.0)
    #[arg(long, default_value_t = 0.7)]
    pub clarity: f32,

    /// Smoothing window in pitch samples (1 disables smoothing)
    #[arg(long, default_value_t = 25)]
    pub window: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Csv,
}
