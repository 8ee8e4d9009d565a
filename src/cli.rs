// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! This module provides command-line functionality for:
//! - Live detection with the camera and IR LED
//! - Offline differencing of two stills
//! - Replay of recorded frames and runs against the synthetic rig
//! - Listing cameras and LEDs, and showing the configuration

use image::RgbImage;
use retroflash::backends::camera::file_source::load_image_as_frame;
use retroflash::backends::camera::{
    CaptureLoopController, FileSequence, LoopAction, SyntheticCamera, SyntheticScene,
    SyntheticTarget, V4l2Camera, enumerate_cameras,
};
use retroflash::flash::{self, NoLed, SysfsLed};
use retroflash::imaging::{Rect, find_blobs};
use retroflash::pipelines::highlighter::compose_difference;
use retroflash::pipelines::{Detection, GoalDetector, HighlighterParams, RunSummary, Rig, annotate};
use retroflash::storage::FrameSaver;
use retroflash::timing::{Clock, ManualClock, SystemClock};
use retroflash::{AppError, AppResult, Config, HighlighterMode};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn load_config(path: Option<PathBuf>) -> AppResult<Config> {
    match path {
        Some(path) => Config::load(&path),
        None => Config::load_default(),
    }
}

fn print_detection(detection: &Detection, json: bool) {
    if json {
        match serde_json::to_string(detection) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!(error = %e, "Failed to serialize detection"),
        }
        return;
    }

    let blobs: Vec<String> = detection
        .blobs
        .iter()
        .map(|b| {
            let (x, y) = b.centroid();
            format!("{} ({} px, centre {},{})", b.rect, b.pixels, x, y)
        })
        .collect();
    println!(
        "#{:<5} {:>6.1} fps  {} goal(s)  {}",
        detection.sequence,
        detection.fps,
        detection.blobs.len(),
        blobs.join("  ")
    );
}

/// Print each detection and optionally save it annotated
fn output_sink(json: bool, saver: Option<FrameSaver>) -> impl FnMut(&Detection, &RgbImage) + Send + 'static {
    move |detection, image| {
        print_detection(detection, json);
        if let Some(saver) = &saver {
            if let Err(e) = saver.save(detection.sequence, image, &detection.blobs) {
                warn!(error = %e, "Failed to save detection frame");
            }
        }
    }
}

/// Run a detector on the capture thread until it stops or Ctrl-C is pressed
fn run_detector<I>(init: I, frames: Option<u64>, mut sink: impl FnMut(&Detection, &RgbImage) + Send + 'static) -> CliResult
where
    I: FnOnce() -> AppResult<GoalDetector> + Send + 'static,
{
    let outcome: Arc<Mutex<Option<AppResult<RunSummary>>>> = Arc::new(Mutex::new(None));
    let outcome_clone = Arc::clone(&outcome);

    // Ctrl-C ends the run through the detector so the summary is still reported
    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_clone = Arc::clone(&interrupted);
    if let Err(e) = ctrlc::set_handler(move || interrupted_clone.store(true, Ordering::SeqCst)) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }

    let mut controller = CaptureLoopController::start_with_init(
        "goal-detector",
        move || {
            let mut detector = init().map_err(|e| e.to_string())?;
            detector.set_frame_limit(frames);
            Ok(detector)
        },
        move |detector: &mut GoalDetector| {
            let action = if interrupted.load(Ordering::SeqCst) {
                info!("Interrupted");
                LoopAction::Stop
            } else {
                detector.iterate(&mut sink)
            };
            if action == LoopAction::Stop {
                let result = detector.conclude(&mut sink);
                if let Ok(mut slot) = outcome_clone.lock() {
                    *slot = Some(result);
                }
            }
            action
        },
    )?;

    controller.join()?;

    let result = outcome.lock().ok().and_then(|mut slot| slot.take());
    match result {
        Some(Ok(summary)) => {
            eprintln!(
                "{} frame(s), {} with goals, {} error(s), {:.1} fps",
                summary.frames, summary.frames_with_goals, summary.errors, summary.average_fps
            );
            Ok(())
        }
        Some(Err(e)) => Err(e.into()),
        None => Err("detection loop ended without a result".into()),
    }
}

/// Live detection with the configured camera and IR LED
pub fn detect(
    config_path: Option<PathBuf>,
    device: Option<String>,
    mode: Option<HighlighterMode>,
    frames: Option<u64>,
    json: bool,
    save_dir: Option<PathBuf>,
) -> CliResult {
    let mut config = load_config(config_path)?;
    if let Some(device) = device {
        config.camera.device = device;
    }
    if let Some(mode) = mode {
        config.highlighter.mode = mode;
    }
    if let Some(dir) = save_dir {
        config.detector.save_dir = Some(dir);
    }
    config.validate()?;

    let saver = config
        .detector
        .save_dir
        .as_deref()
        .map(FrameSaver::new)
        .transpose()?;

    info!(
        device = %config.camera.device,
        led = %config.led.name,
        mode = %config.highlighter.mode,
        "Starting live detection"
    );

    run_detector(
        move || {
            let camera = V4l2Camera::open(&config.camera, &config.sensor)?;
            let led = SysfsLed::open(&config.led.name, config.led.active_low)?;
            let clock: Arc<dyn Clock> = Arc::new(SystemClock);
            let rig = Rig::new(Box::new(camera), Box::new(led), Arc::clone(&clock));
            Ok(GoalDetector::new(rig, &config, clock))
        },
        frames,
        output_sink(json, saver),
    )
}

/// Difference two stills and detect goals in the result
pub fn diff(config_path: Option<PathBuf>, unlit: &Path, lit: &Path, output: Option<PathBuf>, json: bool) -> CliResult {
    let config = load_config(config_path)?;
    let unlit_img = load_image_as_frame(unlit)?;
    let lit_img = load_image_as_frame(lit)?;

    let params = HighlighterParams::from(&config.highlighter);
    let highlight = compose_difference(&lit_img, &unlit_img, &params)?;
    let blobs = find_blobs(
        &highlight,
        &config.blobs.goal_thresholds,
        &config.blobs.options(highlight.height()),
    );

    let detection = Detection {
        sequence: 1,
        timestamp: chrono::Local::now().to_rfc3339(),
        fps: 0.0,
        width: highlight.width(),
        height: highlight.height(),
        blobs,
    };
    print_detection(&detection, json);

    if let Some(path) = output {
        annotate(&highlight, &detection.blobs)
            .save(&path)
            .map_err(AppError::from)?;
        info!(path = %path.display(), "Saved annotated highlight");
    }
    Ok(())
}

/// Run the detector over recorded frames.
///
/// Frames are consumed in the order the highlighter takes snapshots, e.g.
/// lit then unlit for the two-frame mode. Hold-ups run on simulated time.
pub fn replay(config_path: Option<PathBuf>, dir: &Path, mode: Option<HighlighterMode>, frames: Option<u64>, json: bool) -> CliResult {
    let mut config = load_config(config_path)?;
    if let Some(mode) = mode {
        config.highlighter.mode = mode;
    }
    config.validate()?;

    let sequence = FileSequence::open(dir, false)?;
    info!(frames = sequence.len(), mode = %config.highlighter.mode, "Replaying recorded frames");

    let saver = config
        .detector
        .save_dir
        .as_deref()
        .map(FrameSaver::new)
        .transpose()?;

    run_detector(
        move || {
            let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
            let rig = Rig::new(Box::new(sequence), Box::new(NoLed::new()), Arc::clone(&clock));
            Ok(GoalDetector::new(rig, &config, clock))
        },
        frames,
        output_sink(json, saver),
    )
}

/// Run the detector against the synthetic camera and LED
pub fn simulate(config_path: Option<PathBuf>, frames: u64, mode: Option<HighlighterMode>, json: bool) -> CliResult {
    let mut config = load_config(config_path)?;
    if let Some(mode) = mode {
        config.highlighter.mode = mode;
    }
    config.validate()?;

    let (width, height) = config.camera.frame_dimensions();
    let scene = SyntheticScene::goal_field(width, height).with_target(SyntheticTarget::blinker(
        Rect::new(width / 10, height / 2, (width / 12).max(6), (height / 12).max(6)),
    ));
    info!(width, height, targets = scene.targets.len(), "Simulating goal field");

    run_detector(
        move || {
            let clock = Arc::new(ManualClock::new());
            let (camera, led) = SyntheticCamera::with_led(scene, clock.clone());
            let rig = Rig::new(Box::new(camera), Box::new(led), clock.clone());
            Ok(GoalDetector::new(rig, &config, clock))
        },
        Some(frames),
        output_sink(json, None),
    )
}

/// List all V4L2 capture devices
pub fn list_cameras() -> CliResult {
    let cameras = enumerate_cameras();

    if cameras.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Available cameras:");
    println!();
    for camera in &cameras {
        println!("  {}  {}", camera.info.path, camera.info.card);
        println!("      Driver: {} ({})", camera.info.driver, camera.info.bus);
        if !camera.fourccs.is_empty() {
            let marker = if camera.is_supported() { "" } else { "  (none supported)" };
            println!("      Formats: {}{}", camera.fourccs.join(", "), marker);
        }
        println!();
    }

    Ok(())
}

/// List LED class devices and whether they can be driven
pub fn list_leds() -> CliResult {
    let leds = flash::discover();

    if leds.is_empty() {
        println!("No LEDs found.");
        return Ok(());
    }

    println!("Available LEDs:");
    println!();
    for led in &leds {
        let access = if led.writable { "writable" } else { "read-only" };
        println!("  {:<24} max {:<5} {}", led.name, led.max_brightness, access);
    }

    if let Some(led) = leds.iter().find(|led| !led.writable) {
        println!();
        println!("{}", flash::permission_hint(&led.path.join("brightness")));
    }

    Ok(())
}

/// Print the effective configuration, optionally writing it out
pub fn show_config(config_path: Option<PathBuf>, write: bool) -> CliResult {
    let config = load_config(config_path.clone())?;
    println!("{}", serde_json::to_string_pretty(&config)?);

    if write {
        let path = config_path
            .or_else(Config::default_path)
            .ok_or_else(|| AppError::Config("no configuration directory".into()))?;
        config.save(&path)?;
        eprintln!("Wrote {}", path.display());
    }
    Ok(())
}
