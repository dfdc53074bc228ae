mod replay;

use std::path::{Path, PathBuf};

use beatpilot_core::{timeline, AppConfig, Timeline};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::replay::ReplayOptions;

fn main() -> beatpilot_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { timeline, events } => run_inspect(&timeline, events),
        Commands::Replay {
            timeline,
            detections,
            config,
            record,
            tick_ms,
            start_at_ms,
        } => {
            let config = match config {
                Some(path) => AppConfig::load(path)?,
                None => AppConfig::default(),
            };
            let summary = replay::run(ReplayOptions {
                timeline_path: timeline,
                detections_path: detections,
                record_path: record,
                tick_ms,
                start_at_ms,
                config,
            })?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
    }
}

#[derive(Debug, Serialize)]
struct TimelineSummary {
    events: usize,
    taps: usize,
    trajectories: usize,
    holds: usize,
    tempo_markers: usize,
    distance_scale: f64,
    overall_difficulty: f64,
    approach_rate: Option<f64>,
    lead_in_ms: f64,
    perfect_hit_window_ms: f64,
    first_event_ms: Option<f64>,
    last_event_end_ms: Option<f64>,
}

#[derive(Debug, Serialize)]
struct EventLine {
    index: usize,
    kind: &'static str,
    time_ms: f64,
    end_ms: f64,
    x: f64,
    y: f64,
}

fn run_inspect(path: &Path, list_events: bool) -> beatpilot_core::Result<()> {
    tracing::info!(?path, "inspecting timeline");

    let loaded = Timeline::load(path)?;
    let (taps, trajectories, holds) = loaded.count_by_kind();
    let summary = TimelineSummary {
        events: loaded.len(),
        taps,
        trajectories,
        holds,
        tempo_markers: loaded.tempo_markers.len(),
        distance_scale: loaded.distance_scale,
        overall_difficulty: loaded.overall_difficulty,
        approach_rate: loaded.approach_rate,
        lead_in_ms: loaded.lead_in_ms,
        perfect_hit_window_ms: loaded.perfect_hit_window_ms(),
        first_event_ms: loaded.events.first().map(|event| event.time()),
        last_event_end_ms: loaded
            .events
            .iter()
            .map(|event| event.end_time())
            .reduce(f64::max),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if list_events {
        for (index, event) in loaded.events.iter().enumerate() {
            let position = event.position();
            let line = EventLine {
                index,
                kind: event.kind_name(),
                time_ms: event.time(),
                end_ms: event.end_time(),
                x: position.x,
                y: position.y,
            };
            println!("{}", serde_json::to_string(&line)?);
        }
    }

    if loaded.approach_rate.is_none() {
        tracing::debug!(
            fallback_lead_in_ms = timeline::lead_in_ms(loaded.overall_difficulty),
            "no approach rate; lead-in derived from overall difficulty"
        );
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Timeline-driven pointer automation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse a timeline file and print what it contains.
    Inspect {
        /// Path to the timeline file.
        timeline: PathBuf,
        /// Also print one JSON line per event.
        #[arg(long)]
        events: bool,
    },
    /// Drive a session from recorded detector output against a simulated clock.
    Replay {
        /// Path to the timeline file.
        timeline: PathBuf,
        /// JSON array of frames with their predictions.
        detections: PathBuf,
        /// Optional JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Write the committed events back out as a timeline.
        #[arg(short, long)]
        record: Option<PathBuf>,
        /// Simulated time between control loop ticks.
        #[arg(long, default_value_t = 10.0)]
        tick_ms: f64,
        /// Capture time of the operator start; earlier frames are only ingested.
        #[arg(long, default_value_t = 0.0)]
        start_at_ms: f64,
    },
}
