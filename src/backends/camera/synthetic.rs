// SPDX-License-Identifier: GPL-3.0-only

//! Simulated camera and IR LED
//!
//! A [`SyntheticCamera`] renders a flat background with rectangular patches.
//! Retro-reflective patches brighten while the paired [`SyntheticLed`] is on;
//! a blinking patch changes on every frame regardless of the LED, standing
//! in for a moving object. Both halves share one LED timeline and one clock,
//! so the highlighter sequence runs on simulated time.
//!
//! The sensor is modelled as a rolling shutter. A frame returned at time `t`
//! finished reading its bottom row at `t`; row `r` was exposed around
//! `t - exposure / 2 - (height - 1 - r) * row_time`. A row sees the LED state
//! at that instant, so a snapshot taken too soon after a toggle has its top
//! rows still in the old state.

use super::FrameSource;
use super::types::BackendResult;
use crate::errors::IlluminatorError;
use crate::flash::Illuminator;
use crate::imaging::Rect;
use crate::timing::Clock;
use image::{Rgb, RgbImage};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::trace;

/// LED toggles kept for rolling-shutter look-back
const TIMELINE_DEPTH: usize = 16;

/// A rectangular patch of the synthetic scene
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticTarget {
    pub rect: Rect,
    /// Colour with the LED off
    pub unlit: [u8; 3],
    /// Brightness added while the LED is on (retro-reflection)
    pub reflection: [u8; 3],
    /// Alternate between `unlit` and `unlit + reflection` on every frame,
    /// independent of the LED
    pub blinking: bool,
}

impl SyntheticTarget {
    /// A retro-reflective goal marker
    pub fn reflector(rect: Rect) -> Self {
        Self {
            rect,
            unlit: [40, 40, 40],
            reflection: [125, 145, 195],
            blinking: false,
        }
    }

    /// A patch that changes on its own, like something moving through view
    pub fn blinker(rect: Rect) -> Self {
        Self {
            blinking: true,
            ..Self::reflector(rect)
        }
    }
}

/// What the synthetic camera sees
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticScene {
    pub width: u32,
    pub height: u32,
    pub background: [u8; 3],
    /// Brightness the background picks up from the LED
    pub ambient_reflection: [u8; 3],
    pub targets: Vec<SyntheticTarget>,
    pub exposure: Duration,
    /// Time between the readout of two consecutive rows
    pub row_time: Duration,
}

impl SyntheticScene {
    /// Empty scene with a 2 ms exposure and a 6 ms frame readout
    pub fn new(width: u32, height: u32) -> Self {
        let readout = Duration::from_micros(6_000);
        Self {
            width,
            height,
            background: [60, 60, 60],
            ambient_reflection: [3, 3, 3],
            targets: Vec::new(),
            exposure: Duration::from_micros(2_000),
            row_time: readout / height.max(1),
        }
    }

    /// Two goal markers, one near the top and one near the bottom
    pub fn goal_field(width: u32, height: u32) -> Self {
        let tw = (width / 10).max(6);
        let th = (height / 10).max(6);
        let mut scene = Self::new(width, height);
        scene.targets = vec![
            SyntheticTarget::reflector(Rect::new(width / 4, height / 8, tw, th)),
            SyntheticTarget::reflector(Rect::new(width * 5 / 8, height * 3 / 4 - th, tw, th)),
        ];
        scene
    }

    pub fn with_target(mut self, target: SyntheticTarget) -> Self {
        self.targets.push(target);
        self
    }

    /// Time for the rolling shutter to sweep the whole frame
    pub fn readout(&self) -> Duration {
        self.row_time * self.height.saturating_sub(1)
    }

    /// Instant at which `row` of a frame finished at `frame_end` was exposed
    fn row_exposure_time(&self, frame_end: Instant, row: u32) -> Instant {
        let lag = self.exposure / 2 + self.row_time * (self.height - 1 - row);
        frame_end.checked_sub(lag).unwrap_or(frame_end)
    }

    fn render(&self, frame_end: Instant, frame_index: u64, led: &LedTimeline) -> RgbImage {
        let blink_on = frame_index % 2 == 0;
        let mut img = RgbImage::new(self.width, self.height);

        for y in 0..self.height {
            let lit = led.state_at(self.row_exposure_time(frame_end, y));
            for x in 0..self.width {
                let mut pixel = self.background;
                if lit {
                    pixel = add(pixel, self.ambient_reflection);
                }
                // Later targets are drawn on top
                if let Some(target) = self.targets.iter().rev().find(|t| t.rect.contains_point(x, y)) {
                    let shines = if target.blinking { blink_on } else { lit };
                    pixel = if shines {
                        add(target.unlit, target.reflection)
                    } else {
                        target.unlit
                    };
                }
                img.put_pixel(x, y, Rgb(pixel));
            }
        }
        img
    }
}

fn add(a: [u8; 3], b: [u8; 3]) -> [u8; 3] {
    [
        a[0].saturating_add(b[0]),
        a[1].saturating_add(b[1]),
        a[2].saturating_add(b[2]),
    ]
}

/// History of LED state changes
#[derive(Debug, Default)]
struct LedTimeline {
    on: bool,
    changes: Vec<(Instant, bool)>,
}

impl LedTimeline {
    fn set(&mut self, at: Instant, on: bool) {
        if on == self.on {
            return;
        }
        self.on = on;
        self.changes.push((at, on));
        if self.changes.len() > TIMELINE_DEPTH {
            self.changes.remove(0);
        }
    }

    fn state_at(&self, at: Instant) -> bool {
        match self.changes.iter().rev().find(|(when, _)| *when <= at) {
            Some(&(_, on)) => on,
            // Before the oldest recorded change the LED had the opposite state
            None => self.changes.first().map(|&(_, on)| !on).unwrap_or(self.on),
        }
    }
}

/// Frame source rendering a [`SyntheticScene`]
pub struct SyntheticCamera {
    scene: SyntheticScene,
    led: Arc<Mutex<LedTimeline>>,
    clock: Arc<dyn Clock>,
    frames: u64,
}

impl SyntheticCamera {
    /// Create a camera and the LED that illuminates its scene
    pub fn with_led(scene: SyntheticScene, clock: Arc<dyn Clock>) -> (SyntheticCamera, SyntheticLed) {
        let led = Arc::new(Mutex::new(LedTimeline::default()));
        let camera = SyntheticCamera {
            scene,
            led: Arc::clone(&led),
            clock: Arc::clone(&clock),
            frames: 0,
        };
        let led = SyntheticLed {
            timeline: led,
            clock,
        };
        (camera, led)
    }

    pub fn scene(&self) -> &SyntheticScene {
        &self.scene
    }

    /// Number of snapshots taken so far
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl FrameSource for SyntheticCamera {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn resolution(&self) -> (u32, u32) {
        (self.scene.width, self.scene.height)
    }

    fn snapshot(&mut self) -> BackendResult<RgbImage> {
        let now = self.clock.now();
        let img = {
            let timeline = self.led.lock().unwrap_or_else(|e| e.into_inner());
            self.scene.render(now, self.frames, &timeline)
        };
        trace!(frame = self.frames, "Rendered synthetic frame");
        self.frames += 1;
        Ok(img)
    }
}

/// LED paired with a [`SyntheticCamera`]
pub struct SyntheticLed {
    timeline: Arc<Mutex<LedTimeline>>,
    clock: Arc<dyn Clock>,
}

impl Illuminator for SyntheticLed {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn set(&mut self, on: bool) -> Result<(), IlluminatorError> {
        let now = self.clock.now();
        self.timeline
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .set(now, on);
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.timeline.lock().map(|t| t.on).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::ManualClock;

    fn rig(scene: SyntheticScene) -> (Arc<ManualClock>, SyntheticCamera, SyntheticLed) {
        let clock = Arc::new(ManualClock::new());
        let (camera, led) = SyntheticCamera::with_led(scene, clock.clone());
        (clock, camera, led)
    }

    fn patch_scene() -> SyntheticScene {
        SyntheticScene::new(40, 40).with_target(SyntheticTarget::reflector(Rect::new(0, 0, 40, 40)))
    }

    #[test]
    fn test_reflector_brightens_once_settled() {
        let (clock, mut camera, mut led) = rig(patch_scene());

        let dark = camera.snapshot().unwrap();
        led.set(true).unwrap();
        clock.advance(Duration::from_millis(20));
        let lit = camera.snapshot().unwrap();

        assert_eq!(dark.get_pixel(5, 5).0, [40, 40, 40]);
        assert_eq!(lit.get_pixel(5, 5).0, [165, 185, 235]);
        assert_eq!(lit.get_pixel(5, 39).0, [165, 185, 235]);
    }

    #[test]
    fn test_rolling_shutter_leaves_top_rows_dark() {
        let (clock, mut camera, mut led) = rig(patch_scene());
        clock.advance(Duration::from_millis(50));

        led.set(true).unwrap();
        // Past half the exposure, but not past the full readout
        clock.advance(camera.scene().exposure / 2 + camera.scene().readout() / 2);
        let partial = camera.snapshot().unwrap();

        assert_eq!(partial.get_pixel(0, 0).0, [40, 40, 40]);
        assert_eq!(partial.get_pixel(0, 39).0, [165, 185, 235]);
    }

    #[test]
    fn test_blinker_alternates_without_led() {
        let scene =
            SyntheticScene::new(20, 20).with_target(SyntheticTarget::blinker(Rect::new(0, 0, 20, 20)));
        let (_clock, mut camera, _led) = rig(scene);

        let a = camera.snapshot().unwrap();
        let b = camera.snapshot().unwrap();
        assert_ne!(a.get_pixel(3, 3), b.get_pixel(3, 3));
        assert_eq!(camera.frames(), 2);
    }

    #[test]
    fn test_led_state_is_shared() {
        let (_clock, _camera, mut led) = rig(patch_scene());
        assert!(!led.is_on());
        led.set(true).unwrap();
        assert!(led.is_on());
    }
}
