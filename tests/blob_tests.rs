// SPDX-License-Identifier: MPL-2.0

//! Integration tests for blob detection with the default goal thresholds

use image::{Rgb, RgbImage};
use retroflash::Config;
use retroflash::imaging::{Rect, find_blobs};

/// Negated highlight colour of a retro-reflective goal
const GOAL: [u8; 3] = [130, 110, 60];
/// Negated highlight colour of the unlit background
const BACKGROUND: [u8; 3] = [252, 252, 252];

fn frame(width: u32, height: u32, goals: &[Rect]) -> RgbImage {
    let mut img = RgbImage::from_pixel(width, height, Rgb(BACKGROUND));
    for rect in goals {
        for y in rect.y..rect.bottom() {
            for x in rect.x..rect.right() {
                img.put_pixel(x, y, Rgb(GOAL));
            }
        }
    }
    img
}

#[test]
fn test_goal_colour_matches_default_thresholds() {
    let config = Config::default();
    let goal = Rect::new(30, 40, 10, 6);
    let img = frame(240, 160, &[goal]);

    let blobs = find_blobs(&img, &config.blobs.goal_thresholds, &config.blobs.options(160));
    assert_eq!(blobs.len(), 1);
    assert_eq!(blobs[0].rect, goal);
    assert_eq!(blobs[0].pixels, 60);
    assert_eq!(blobs[0].centroid(), (35, 43));
}

#[test]
fn test_background_and_noise_are_ignored() {
    let config = Config::default();
    let mut img = frame(240, 160, &[]);
    // A few stray goal-coloured pixels stay below the pixel threshold
    for x in [10, 50, 90] {
        img.put_pixel(x, 10, Rgb(GOAL));
    }

    let blobs = find_blobs(&img, &config.blobs.goal_thresholds, &config.blobs.options(160));
    assert!(blobs.is_empty());
}

#[test]
fn test_split_goal_is_merged_back() {
    // A goal cut in two by a thin dark line is reported once
    let config = Config::default();
    let left = Rect::new(100, 60, 8, 10);
    let right = Rect::new(110, 60, 8, 10);
    let img = frame(240, 160, &[left, right]);

    let blobs = find_blobs(&img, &config.blobs.goal_thresholds, &config.blobs.options(160));
    assert_eq!(blobs.len(), 1);
    assert_eq!(blobs[0].rect, left.union(&right));
    assert_eq!(blobs[0].pixels, 160);
    assert_eq!(blobs[0].count, 2);

    let mut unmerged = config.blobs.clone();
    unmerged.merge = false;
    let blobs = find_blobs(&img, &unmerged.goal_thresholds, &unmerged.options(160));
    assert_eq!(blobs.len(), 2);
}

#[test]
fn test_largest_goal_first() {
    let config = Config::default();
    let small = Rect::new(20, 20, 6, 6);
    let large = Rect::new(150, 100, 20, 12);
    let img = frame(240, 160, &[small, large]);

    let blobs = find_blobs(&img, &config.blobs.goal_thresholds, &config.blobs.options(160));
    assert_eq!(blobs.len(), 2);
    assert_eq!(blobs[0].rect, large);
    assert_eq!(blobs[1].rect, small);
}
