//! marker-track CLI: run the tracker over an image sequence and print poses.

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;
#[cfg(not(feature = "tracing"))]
use marker_track::init_with_level;
use marker_track::{
    builtins, ArucoTracker, FrameSample, TrackerConfig, TrackerError, VideoSource,
};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "marker-track")]
#[command(about = "Track rigid bodies carrying ArUco markers, frame by frame")]
#[command(version)]
struct Cli {
    /// Log level for stderr output.
    #[arg(long, global = true, default_value = "info")]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track poses and print one JSON line per frame.
    Track(TrackArgs),

    /// Write a configuration file with every key at its default.
    InitConfig {
        /// Output path.
        #[arg(long)]
        out: PathBuf,
    },

    /// List the embedded marker dictionaries.
    Dictionaries,
}

#[derive(Debug, Clone, Args)]
struct TrackArgs {
    /// Tracker configuration (JSON).
    #[arg(long)]
    config: PathBuf,

    /// Image file or directory overriding the configured video source.
    #[arg(long)]
    source: Option<PathBuf>,

    /// Stop after this many frames.
    #[arg(long)]
    frames: Option<u64>,
}

#[derive(Serialize)]
struct SampleJson<'a> {
    name: &'a str,
    timestamp: f64,
    frame_index: u64,
    quality: f64,
    /// Row-major rotation matrix.
    rotation: Option<[[f64; 3]; 3]>,
    translation: Option<[f64; 3]>,
    /// `[w, x, y, z]`.
    quaternion: Option<[f64; 4]>,
}

impl<'a> From<&'a FrameSample> for SampleJson<'a> {
    fn from(s: &'a FrameSample) -> Self {
        let rotation = s
            .pose
            .map(|p| std::array::from_fn(|r| std::array::from_fn(|c| p.rotation[(r, c)])));
        let translation = s.pose.map(|p| [p.translation.x, p.translation.y, p.translation.z]);
        let quaternion = s.pose.map(|p| {
            let q = p.quaternion();
            [q.w, q.i, q.j, q.k]
        });
        Self {
            name: &s.name,
            timestamp: s.timestamp,
            frame_index: s.frame_index,
            quality: s.quality,
            rotation,
            translation,
            quaternion,
        }
    }
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level)?;

    match cli.command {
        Commands::Track(args) => run_track(&args),
        Commands::InitConfig { out } => {
            TrackerConfig::default().write_json(&out)?;
            log::info!("default configuration written to {}", out.display());
            Ok(())
        }
        Commands::Dictionaries => {
            for dict in builtins::BUILTIN_DICTIONARIES {
                println!(
                    "{:<16} {}x{} bits, {} markers",
                    dict.name,
                    dict.marker_size,
                    dict.marker_size,
                    dict.len()
                );
            }
            Ok(())
        }
    }
}

/// `RUST_LOG` takes precedence over `--log-level` when built with `tracing`.
fn init_logging(level: LevelFilter) -> CliResult<()> {
    #[cfg(feature = "tracing")]
    {
        let _ = tracing_log::LogTracer::init();
        marker_track::init_tracing(level, false);
        Ok(())
    }
    #[cfg(not(feature = "tracing"))]
    {
        init_with_level(level)?;
        Ok(())
    }
}

fn run_track(args: &TrackArgs) -> CliResult<()> {
    let mut config = TrackerConfig::load_json(&args.config)?;
    if let Some(source) = &args.source {
        config.video_source = VideoSource::Path(source.clone());
    }
    if config.video_source == VideoSource::External {
        return Err("the CLI needs a video source; set `video_source` or pass --source".into());
    }

    let mut tracker = ArucoTracker::new(&config)?;
    tracker.start_tracking()?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut processed = 0u64;
    while args.frames.map_or(true, |n| processed < n) {
        let samples = match tracker.get_frame(None) {
            Ok(samples) => samples,
            Err(TrackerError::EndOfStream) => break,
            Err(e) => return Err(e.into()),
        };
        let rows: Vec<SampleJson<'_>> = samples.iter().map(SampleJson::from).collect();
        serde_json::to_writer(&mut out, &rows)?;
        writeln!(out)?;
        processed += 1;
    }

    tracker.stop_tracking()?;
    tracker.close();
    log::info!("processed {processed} frames");
    Ok(())
}
