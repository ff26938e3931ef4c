//! Stderr logging for the tracker crates.
//!
//! Records from the `marker_track*` crates pass at the requested level;
//! everything else (image decoders and the like) is held to `warn` so that
//! per-frame debug output stays readable.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

const OWN_PREFIX: &str = "marker_track";

struct TrackLogger {
    own: LevelFilter,
    foreign: LevelFilter,
    epoch: Instant,
}

impl TrackLogger {
    fn threshold(&self, target: &str) -> LevelFilter {
        if target.starts_with(OWN_PREFIX) {
            self.own
        } else {
            self.foreign
        }
    }
}

/// `marker_track::tracker` -> `tracker`, `marker_track_aruco::detector` -> `aruco::detector`.
fn short_target(target: &str) -> &str {
    target
        .strip_prefix(OWN_PREFIX)
        .map_or(target, |rest| rest.trim_start_matches(['_', ':']))
}

impl Log for TrackLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.threshold(metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let tag = match record.level() {
            Level::Error => "E",
            Level::Warn => "W",
            Level::Info => "I",
            Level::Debug => "D",
            Level::Trace => "T",
        };
        let mut err = std::io::stderr().lock();
        let _ = writeln!(
            err,
            "{tag} {:>9.3} {}: {}",
            self.epoch.elapsed().as_secs_f64(),
            short_target(record.target()),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static TRACK_LOGGER: OnceLock<TrackLogger> = OnceLock::new();

/// Install the stderr logger. Later calls keep the first configuration.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if TRACK_LOGGER.get().is_some() {
        return Ok(());
    }
    let foreign = level.min(LevelFilter::Warn);
    let logger = TRACK_LOGGER.get_or_init(|| TrackLogger {
        own: level,
        foreign,
        epoch: Instant::now(),
    });
    log::set_logger(logger)?;
    log::set_max_level(level);
    Ok(())
}

/// Install a `tracing` subscriber on stderr.
///
/// `RUST_LOG` wins when set; otherwise the tracker crates log at `level` and
/// the rest at `warn`. Spans report their duration on close.
#[cfg(feature = "tracing")]
pub fn init_tracing(level: LevelFilter, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let own = level.as_str().to_ascii_lowercase();
        EnvFilter::new(format!(
            "warn,marker_track={own},marker_track_aruco={own},marker_track_core={own}"
        ))
    });
    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::CLOSE);
    let _ = if json {
        builder.json().flatten_event(true).finish().try_init()
    } else {
        builder
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init()
    };
}
