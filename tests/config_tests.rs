// SPDX-License-Identifier: MPL-2.0

//! Integration tests for configuration module

use retroflash::config::RegisterProfile;
use retroflash::{Config, Framesize, HighlighterMode};
use std::path::PathBuf;

fn temp_config_path(name: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("retroflash-config-{}-{}", name, std::process::id()))
        .join("config.json")
}

#[test]
fn test_config_default() {
    // Test that default config can be created and is valid
    let config = Config::default();
    assert!(config.validate().is_ok());

    // Check sensible defaults
    assert_eq!(config.camera.framesize, Framesize::Hqvga);
    assert_eq!(config.highlighter.mode, HighlighterMode::TwoFrame);
    assert!(config.highlighter.negate, "Highlights should be negated by default");
    assert_eq!(config.sensor.profile, RegisterProfile::None);
    assert!(!config.detector.pipelined);
}

#[test]
fn test_missing_file_yields_defaults() {
    let path = temp_config_path("missing");
    let _ = std::fs::remove_file(&path);

    let config = Config::load(&path).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_partial_file_fills_defaults() {
    let path = temp_config_path("partial");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(
        &path,
        r#"{ "highlighter": { "mode": "super-slow" }, "camera": { "framesize": "QVGA" } }"#,
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.highlighter.mode, HighlighterMode::SuperSlow);
    assert_eq!(config.camera.frame_dimensions(), (320, 240));
    assert_eq!(config.blobs, Config::default().blobs);

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn test_unknown_key_is_rejected() {
    let path = temp_config_path("unknown");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, r#"{ "highlighter": { "mdoe": "two-step" } }"#).unwrap();

    assert!(Config::load(&path).is_err(), "Typos should not fall back to defaults");

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn test_save_and_reload() {
    let path = temp_config_path("roundtrip");
    let mut config = Config::default();
    config.highlighter.mode = HighlighterMode::MotionMasked;
    config.sensor.brightness = Some(-2);
    config.sensor.profile = RegisterProfile::Gc2145Goal;
    config.detector.max_consecutive_errors = 4;

    config.save(&path).unwrap();
    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded, config);

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn test_sensor_levels_are_bounded() {
    let mut config = Config::default();
    config.sensor.contrast = Some(4);
    assert!(config.validate().is_err());

    config.sensor.contrast = Some(-3);
    assert!(config.validate().is_ok());
}

#[test]
fn test_empty_thresholds_are_rejected() {
    let mut config = Config::default();
    config.blobs.goal_thresholds.clear();
    assert!(config.validate().is_err());
}
