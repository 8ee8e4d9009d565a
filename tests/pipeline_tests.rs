// SPDX-License-Identifier: MPL-2.0

//! Integration tests for the highlighter and detection loop

use image::{Rgb, RgbImage};
use retroflash::backends::camera::{
    BackendError, BackendResult, FileSequence, FrameSource, LoopAction, SyntheticCamera,
    SyntheticScene, SyntheticTarget,
};
use retroflash::flash::{Illuminator, NoLed};
use retroflash::imaging::Rect;
use retroflash::pipelines::{Highlighter, HighlighterParams};
use retroflash::timing::{Clock, ManualClock};
use retroflash::{Config, Detection, GoalDetector, HighlighterMode, Rig};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const WIDTH: u32 = 240;
const HEIGHT: u32 = 160;
const WHITE: [u8; 3] = [255, 255, 255];

fn config(mode: HighlighterMode) -> Config {
    let mut config = Config::default();
    config.highlighter.mode = mode;
    config
}

fn synthetic_rig(scene: SyntheticScene) -> (Rig, Arc<dyn Clock>) {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
    let (camera, led) = SyntheticCamera::with_led(scene, Arc::clone(&clock));
    let rig = Rig::new(Box::new(camera), Box::new(led), Arc::clone(&clock));
    (rig, clock)
}

fn detector(scene: SyntheticScene, config: &Config) -> GoalDetector {
    let (rig, clock) = synthetic_rig(scene);
    GoalDetector::new(rig, config, clock)
}

fn run_collect(detector: &mut GoalDetector, frames: u64) -> Vec<Detection> {
    let mut detections = Vec::new();
    let stop = AtomicBool::new(false);
    detector
        .run(&stop, Some(frames), |detection, _| detections.push(detection.clone()))
        .unwrap();
    detections
}

#[test]
fn test_every_mode_finds_both_goals() {
    for mode in HighlighterMode::ALL {
        let mut detector = detector(SyntheticScene::goal_field(WIDTH, HEIGHT), &config(mode));
        let detections = run_collect(&mut detector, 3);

        assert_eq!(detections.len(), 3, "{} should report every frame", mode);
        for detection in &detections {
            assert_eq!(detection.blobs.len(), 2, "{} frame {}", mode, detection.sequence);
            let top = detection.blobs.iter().filter(|b| b.cy < HEIGHT as f32 / 2.0).count();
            assert_eq!(top, 1, "{} should see the goal near the top", mode);
        }
    }
}

#[test]
fn test_short_settle_misses_top_rows() {
    // The rolling shutter exposes the top rows before the LED change lands
    let mut config = config(HighlighterMode::TwoStep);
    config.highlighter.settle_us = Some(3_000);

    let mut detector = detector(SyntheticScene::goal_field(WIDTH, HEIGHT), &config);
    let detections = run_collect(&mut detector, 2);

    for detection in &detections {
        assert_eq!(detection.blobs.len(), 1);
        assert!(detection.blobs[0].cy > HEIGHT as f32 / 2.0);
    }
}

#[test]
fn test_motion_mask_suppresses_blinking_patch() {
    let blinker = Rect::new(24, 80, 20, 12);
    let centre = (blinker.x + blinker.w / 2, blinker.y + blinker.h / 2);
    let scene = SyntheticScene::goal_field(WIDTH, HEIGHT).with_target(SyntheticTarget::blinker(blinker));

    let (mut rig, _clock) = synthetic_rig(scene.clone());
    let mut two_frame = Highlighter::new(HighlighterParams::from(&config(HighlighterMode::TwoFrame).highlighter));
    let unmasked = two_frame.highlight(&mut rig).unwrap();
    assert!(unmasked.motion_mask.is_none());
    assert_ne!(unmasked.image.get_pixel(centre.0, centre.1).0, WHITE);

    let (mut rig, _clock) = synthetic_rig(scene);
    let mut masked = Highlighter::new(HighlighterParams::from(&config(HighlighterMode::MotionMasked).highlighter));
    let highlight = masked.highlight(&mut rig).unwrap();
    let motion = highlight.motion_mask.unwrap();
    assert_eq!(motion.get_pixel(centre.0, centre.1).0, [255]);
    assert_eq!(highlight.image.get_pixel(centre.0, centre.1).0, WHITE);
}

#[test]
fn test_pipelined_detection_lags_one_frame() {
    let mut config = config(HighlighterMode::TwoStep);
    config.detector.pipelined = true;
    let mut detector = detector(SyntheticScene::goal_field(WIDTH, HEIGHT), &config);

    assert!(detector.step().unwrap().is_none());

    let (first, _) = detector.step().unwrap().unwrap();
    assert_eq!(first.sequence, 1);
    assert_eq!(first.blobs.len(), 2);

    let (last, _) = detector.flush().unwrap();
    assert_eq!(last.sequence, 2);
    assert!(detector.flush().is_none());
}

#[test]
fn test_run_stops_at_frame_limit_and_switches_led_off() {
    let mut detector = detector(
        SyntheticScene::goal_field(WIDTH, HEIGHT),
        &config(HighlighterMode::TwoFrame),
    );
    let detections = run_collect(&mut detector, 4);

    let sequences: Vec<u64> = detections.iter().map(|d| d.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);
    assert_eq!(detector.summary().frames, 4);
    assert_eq!(detector.summary().frames_with_goals, 4);
    assert!(!detector.rig().led.is_on(), "LED should be off after the run");
}

/// Goal in the recorded frames
const REPLAY_GOAL: Rect = Rect {
    x: 10,
    y: 10,
    w: 12,
    h: 8,
};

/// Record two two-step highlights (unlit then lit, twice) into `name`
fn record_frames(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("retroflash-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();

    let goal = REPLAY_GOAL;
    let unlit = RgbImage::from_pixel(64, 48, Rgb([60, 60, 60]));
    let mut lit = RgbImage::from_pixel(64, 48, Rgb([63, 63, 63]));
    for y in goal.y..goal.bottom() {
        for x in goal.x..goal.right() {
            lit.put_pixel(x, y, Rgb([185, 205, 255]));
        }
    }
    for (i, frame) in [&unlit, &lit, &unlit, &lit].into_iter().enumerate() {
        frame.save(dir.join(format!("frame_{:02}.png", i))).unwrap();
    }
    dir
}

fn replay_detector(dir: &std::path::Path, config: &Config) -> GoalDetector {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
    let source = FileSequence::open(dir, false).unwrap();
    let rig = Rig::new(Box::new(source), Box::new(NoLed::new()), Arc::clone(&clock));
    GoalDetector::new(rig, config, clock)
}

#[test]
fn test_replay_stops_at_end_of_sequence() {
    let dir = record_frames("replay");
    let mut detector = replay_detector(&dir, &config(HighlighterMode::TwoStep));

    let mut detections = Vec::new();
    let summary = detector
        .run(&AtomicBool::new(false), None, |d, _| detections.push(d.clone()))
        .unwrap();

    assert_eq!(summary.frames, 2);
    assert_eq!(summary.errors, 0);
    for detection in &detections {
        assert_eq!(detection.blobs.len(), 1);
        assert_eq!(detection.blobs[0].rect, REPLAY_GOAL);
        assert_eq!(detection.blobs[0].pixels, 96);
    }

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_pipelined_replay_reports_last_highlight() {
    // The source runs out during the iteration that searches the last highlight
    let dir = record_frames("pipelined-replay");
    let mut config = config(HighlighterMode::TwoStep);
    config.detector.pipelined = true;
    let mut detector = replay_detector(&dir, &config);

    let mut detections = Vec::new();
    let summary = detector
        .run(&AtomicBool::new(false), None, |d, _| detections.push(d.clone()))
        .unwrap();

    let sequences: Vec<u64> = detections.iter().map(|d| d.sequence).collect();
    assert_eq!(sequences, vec![1, 2]);
    assert_eq!(summary.frames, 2);
    assert_eq!(summary.errors, 0);
    for detection in &detections {
        assert_eq!(detection.blobs.len(), 1);
        assert_eq!(detection.blobs[0].rect, REPLAY_GOAL);
    }

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_interrupted_pipelined_run_reports_pending_detection() {
    let mut config = config(HighlighterMode::TwoStep);
    config.detector.pipelined = true;
    let mut detector = detector(SyntheticScene::goal_field(WIDTH, HEIGHT), &config);

    let mut sequences = Vec::new();
    let mut sink = |d: &Detection, _: &RgbImage| sequences.push(d.sequence);
    while detector.summary().frames == 0 {
        assert_eq!(detector.iterate(&mut sink), LoopAction::Continue);
    }
    // Interrupted here: the second highlight is still waiting for its search
    let summary = detector.conclude(&mut sink).unwrap();

    assert_eq!(sequences, vec![1, 2]);
    assert_eq!(summary.frames, 2);
    assert_eq!(summary.frames_with_goals, 2);
    assert!(!detector.rig().led.is_on(), "LED should be off after the run");
}

#[test]
fn test_run_stopped_by_flag_flushes_pending_detection() {
    let mut config = config(HighlighterMode::TwoStep);
    config.detector.pipelined = true;
    let mut detector = detector(SyntheticScene::goal_field(WIDTH, HEIGHT), &config);

    let stop = AtomicBool::new(false);
    let mut sequences = Vec::new();
    let summary = detector
        .run(&stop, None, |d, _| {
            sequences.push(d.sequence);
            stop.store(true, Ordering::SeqCst);
        })
        .unwrap();

    assert_eq!(sequences, vec![1, 2]);
    assert_eq!(summary.frames, 2);
}

/// Synthetic camera whose `fail_at`-th snapshot times out
struct FlakyCamera {
    inner: SyntheticCamera,
    snapshots: u32,
    fail_at: u32,
}

impl FrameSource for FlakyCamera {
    fn name(&self) -> &str {
        "flaky"
    }

    fn resolution(&self) -> (u32, u32) {
        self.inner.resolution()
    }

    fn snapshot(&mut self) -> BackendResult<RgbImage> {
        self.snapshots += 1;
        if self.snapshots == self.fail_at {
            return Err(BackendError::CaptureFailed("sensor timeout".into()));
        }
        self.inner.snapshot()
    }
}

#[test]
fn test_pipelined_capture_error_keeps_finished_detection() {
    let mut config = config(HighlighterMode::TwoStep);
    config.detector.pipelined = true;

    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
    let (camera, led) = SyntheticCamera::with_led(SyntheticScene::goal_field(WIDTH, HEIGHT), Arc::clone(&clock));
    // Two snapshots per highlight: the third highlight fails on its first
    let camera = FlakyCamera {
        inner: camera,
        snapshots: 0,
        fail_at: 5,
    };
    let rig = Rig::new(Box::new(camera), Box::new(led), Arc::clone(&clock));
    let mut detector = GoalDetector::new(rig, &config, clock);

    let mut detections = Vec::new();
    let summary = detector
        .run(&AtomicBool::new(false), Some(3), |d, _| detections.push(d.clone()))
        .unwrap();

    let sequences: Vec<u64> = detections.iter().map(|d| d.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 4]);
    assert_eq!(summary.errors, 1);
    for detection in &detections {
        assert_eq!(detection.blobs.len(), 2, "frame {}", detection.sequence);
    }
}

struct BrokenCamera;

impl FrameSource for BrokenCamera {
    fn name(&self) -> &str {
        "broken"
    }

    fn resolution(&self) -> (u32, u32) {
        (32, 32)
    }

    fn snapshot(&mut self) -> BackendResult<RgbImage> {
        Err(BackendError::CaptureFailed("sensor timeout".into()))
    }
}

#[test]
fn test_repeated_errors_end_the_run() {
    let mut config = config(HighlighterMode::TwoStep);
    config.detector.max_consecutive_errors = 3;

    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
    let rig = Rig::new(Box::new(BrokenCamera), Box::new(NoLed::new()), Arc::clone(&clock));
    let mut detector = GoalDetector::new(rig, &config, clock);

    let result = detector.run(&AtomicBool::new(false), None, |_, _| {});
    assert!(result.is_err());
    assert_eq!(detector.summary().errors, 3);
    assert_eq!(detector.summary().frames, 0);
}
