//! `marker-track`: render markers, write configs and track image sequences.

use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use marker_track::codes::{render_qr_target, render_square};
use marker_track::{FrameReport, TrackerConfig, TrackingReport};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Emit JSON log lines (with the `tracing` feature).
    #[arg(long, global = true)]
    json_log: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a printable marker as PNG.
    Generate {
        #[command(subcommand)]
        target: Target,
    },
    /// Write a default tracker config.
    InitConfig {
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Track the configured markers over a sequence of images.
    Track {
        #[arg(short, long)]
        config: PathBuf,
        /// Frame rate used to timestamp the images.
        #[arg(long, default_value_t = 30.0)]
        fps: f64,
        #[arg(short, long)]
        out: PathBuf,
        /// Skip the tracked update for markers the scan misses.
        #[arg(long)]
        scan_only: bool,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum Target {
    /// Square grid code.
    Square {
        #[arg(long)]
        id: u32,
        /// Cell size in pixels.
        #[arg(long, default_value_t = 40)]
        cell: u32,
        #[arg(short, long)]
        out: PathBuf,
    },
    /// QR-style target.
    Qr {
        /// Module size in pixels.
        #[arg(long, default_value_t = 8)]
        module: u32,
        #[arg(short, long)]
        out: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.json_log);

    match cli.command {
        Command::Generate { target } => match target {
            Target::Square { id, cell, out } => {
                render_square(id, cell)?.save(&out)?;
                log::info!("wrote square {id} to {}", out.display());
            }
            Target::Qr { module, out } => {
                render_qr_target(module)?.save(&out)?;
                log::info!("wrote QR target to {}", out.display());
            }
        },
        Command::InitConfig { out } => {
            TrackerConfig::default().write_json(&out)?;
            log::info!("wrote config to {}", out.display());
        }
        Command::Track {
            config,
            fps,
            out,
            scan_only,
            images,
        } => {
            let report = track(&config, fps, !scan_only, &images)?;
            report.write_json(&out)?;
            if let Some(err) = &report.error {
                return Err(err.clone().into());
            }
        }
    }
    Ok(())
}

fn track(
    config_path: &Path,
    fps: f64,
    search_undetected: bool,
    images: &[PathBuf],
) -> Result<TrackingReport, Box<dyn Error>> {
    if fps.is_nan() || fps <= 0.0 {
        return Err(format!("fps must be positive, got {fps}").into());
    }
    let cfg = TrackerConfig::load_json(config_path)?;
    let mut detector = cfg.build_detector()?;
    let mut report = TrackingReport::new(config_path);

    for (i, path) in images.iter().enumerate() {
        let timestamp = i as f64 / fps;
        let mut frame = FrameReport {
            timestamp,
            image_path: Some(path.to_string_lossy().into_owned()),
            markers: Vec::new(),
            error: None,
        };
        let img = match image::open(path) {
            Ok(img) => img,
            Err(e) => {
                log::warn!("{}: {e}", path.display());
                frame.error = Some(e.to_string());
                report.frames.push(frame);
                continue;
            }
        };
        match detector.find_markers_in_image(&img, timestamp, search_undetected) {
            Ok(found) => {
                log::info!("{}: {} markers", path.display(), found.len());
                frame.markers = found;
            }
            Err(e) => {
                report.set_error(&e);
                report.frames.push(frame);
                break;
            }
        }
        report.frames.push(frame);
    }
    Ok(report)
}

#[cfg(feature = "tracing")]
fn init_logging(json: bool) {
    marker_track::core::init_tracing(json);
}

/// Stderr logger at the level named by `RUST_LOG` (default `info`).
#[cfg(not(feature = "tracing"))]
fn init_logging(_json: bool) {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|v| v.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);
    if let Err(e) = marker_track::core::init_with_level(level) {
        eprintln!("logger not installed: {e}");
    }
}
