use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rollcall_core::{Gallery, OnnxEngine};
use rollcall_hw::{FlashNotifier, FlashTrigger, FrameSource, HttpCamera, HttpFlash};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod attendance;
mod config;
mod display;
mod ledger;
mod overlay;
mod pipeline;
mod sheets;

use attendance::Attendance;
use config::Config;
use display::{Display, Headless, WindowDisplay};
use ledger::Ledger;
use overlay::Overlay;
use pipeline::Pipeline;
use sheets::{GoogleSheet, RowSink};

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance from a network camera")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the camera and record attendance (default)
    Run,
    /// Load the reference gallery and list the identities found
    Gallery {
        /// Print the load report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Fetch one frame from the camera
    Probe {
        /// Write the decoded frame to this path
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Fire the flash once
    Flash,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&config),
        Commands::Gallery { json } => list_gallery(&config, json),
        Commands::Probe { save } => probe(&config, save),
        Commands::Flash => fire_flash(&config),
    }
}

fn load_gallery(config: &Config) -> Result<(OnnxEngine, Gallery, rollcall_core::LoadReport)> {
    let mut engine = OnnxEngine::load(&config.model_dir)
        .with_context(|| format!("loading face models from {}", config.model_dir.display()))?;
    let (gallery, report) = Gallery::load(&config.gallery_dir, &mut engine)
        .with_context(|| format!("loading gallery from {}", config.gallery_dir.display()))?;
    tracing::info!(
        identities = gallery.len(),
        no_face = report.skipped_no_face.len(),
        undecodable = report.skipped_undecodable.len(),
        duplicate = report.skipped_duplicate.len(),
        failed = report.skipped_failed.len(),
        "gallery loaded"
    );
    Ok((engine, gallery, report))
}

/// The spreadsheet mirror, if configured and reachable.
fn connect_mirror(config: &Config) -> Option<Box<dyn RowSink>> {
    let sheet_id = config.sheet_id.as_deref()?;
    match GoogleSheet::connect(
        &config.sheet_credentials,
        sheet_id,
        &config.sheet_worksheet,
        config.fetch_timeout(),
    ) {
        Ok(sheet) => Some(Box::new(sheet)),
        Err(e) => {
            tracing::warn!(error = %e, "spreadsheet mirror unavailable, recording locally only");
            None
        }
    }
}

fn run(config: &Config) -> Result<()> {
    tracing::info!(camera = %config.camera_url, "rollcall starting");

    let offset = config.utc_offset()?;
    let (engine, gallery, _) = load_gallery(config)?;
    if gallery.is_empty() {
        tracing::warn!(dir = %config.gallery_dir.display(), "gallery is empty, nobody can be recognized");
    }

    let started = Utc::now().with_timezone(&offset);
    let ledger = Ledger::create(&config.attendance_dir, &started)
        .with_context(|| format!("creating attendance ledger in {}", config.attendance_dir.display()))?;
    let attendance = Attendance::new(ledger, connect_mirror(config), offset);

    let camera = HttpCamera::new(&config.camera_url, config.fetch_timeout());
    let flash = FlashNotifier::new(
        HttpFlash::new(&config.flash_url, config.flash_timeout()),
        config.flash_debounce(),
    );
    let overlay = Overlay::load(&config.font_path);

    let mut pipeline = Pipeline::new(camera, engine, gallery, attendance, flash, overlay)
        .with_tolerance(config.match_tolerance)
        .with_downscale(config.downscale);

    let mut display: Box<dyn Display> = if config.headless {
        Box::new(Headless)
    } else {
        Box::new(WindowDisplay::new())
    };

    let summary = pipeline::run(&mut pipeline, display.as_mut(), config.retry_delay())
        .context("attendance loop stopped")?;
    tracing::info!(
        frames = summary.frames,
        dropped = summary.dropped,
        recorded = summary.recorded,
        present = pipeline.attendance().ledger().len(),
        ledger = %pipeline.attendance().ledger().path().display(),
        "rollcall stopped"
    );
    Ok(())
}

fn list_gallery(config: &Config, json: bool) -> Result<()> {
    let (_, gallery, report) = load_gallery(config)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for identity in gallery.identities() {
        println!(
            "{}\t{}-d\t{}",
            identity.attendance_name(),
            identity.embedding.dim(),
            identity.embedding.model_version.as_deref().unwrap_or("unknown model"),
        );
    }
    for file in &report.skipped_no_face {
        println!("skipped (no face): {file}");
    }
    for file in &report.skipped_duplicate {
        println!("skipped (duplicate): {file}");
    }
    for file in &report.skipped_failed {
        println!("skipped (engine error): {file}");
    }
    println!("{} identities", gallery.len());
    Ok(())
}

fn probe(config: &Config, save: Option<PathBuf>) -> Result<()> {
    let mut camera = HttpCamera::new(&config.camera_url, config.fetch_timeout());
    let frame = camera
        .next_frame()
        .with_context(|| format!("fetching a frame from {}", camera.url()))?;
    println!("{}: {}x{}", camera.url(), frame.width(), frame.height());

    if let Some(path) = save {
        frame
            .image
            .save(&path)
            .with_context(|| format!("saving frame to {}", path.display()))?;
        println!("saved {}", path.display());
    }
    Ok(())
}

fn fire_flash(config: &Config) -> Result<()> {
    let flash = HttpFlash::new(&config.flash_url, config.flash_timeout());
    flash
        .fire()
        .with_context(|| format!("triggering flash at {}", flash.url()))?;
    println!("flash triggered");
    Ok(())
}
