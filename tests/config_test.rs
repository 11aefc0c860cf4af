//! Configuration loading and saving.

use dropconvert::config::{
    load_config, load_config_or_default, persist::save_config, CollisionPolicy, Config,
    HardwareAccelerator, VideoQuality,
};
use dropconvert::queue::QueueOptions;
use serial_test::serial;
use std::fs;
use tempfile::tempdir;

const FULL_CONFIG: &str = r#"
[queue]
concurrency_limit = 3
reject_duplicates = false
max_completed = 50

[tools]
ffmpeg_path = "/opt/ffmpeg/bin/ffmpeg"

[conversion]
max_size = 1280
hardware_accelerator = "nvidia"
video_quality = "medium"
ffmpeg_custom_args = "-movflags +faststart"
collision = "error"
default_dest_dir = "/srv/converted"
exclude_patterns = ["Downloads"]

[thumbnails]
concurrency = 2
size = 160
"#;

#[test]
fn full_config_parses() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("dropconvert.toml");
    fs::write(&path, FULL_CONFIG).unwrap();

    let config = load_config(&path).unwrap();
    assert_eq!(config.queue.concurrency_limit, 3);
    assert!(!config.queue.reject_duplicates);
    assert_eq!(config.conversion.max_size, 1280);
    assert_eq!(config.conversion.accelerator(), HardwareAccelerator::Nvidia);
    assert_eq!(config.conversion.video_quality, VideoQuality::Medium);
    assert_eq!(config.conversion.collision, CollisionPolicy::Error);
    assert_eq!(config.conversion.exclude_patterns, vec!["Downloads"]);
    assert_eq!(config.thumbnails.size, 160);

    let options = QueueOptions::from_config(&config);
    assert_eq!(options.concurrency_limit, 3);
    assert_eq!(options.max_completed, 50);
    assert_eq!(options.thumbnail_concurrency, 2);
}

#[test]
fn unknown_accelerator_is_only_a_warning() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    fs::write(&path, "[conversion]\nhardware_accelerator = \"quantum\"\n").unwrap();

    let config = load_config(&path).unwrap();
    assert_eq!(config.conversion.accelerator(), HardwareAccelerator::None);
    assert!(config
        .validate()
        .iter()
        .any(|w| w.contains("hardware_accelerator")));
}

#[test]
fn zero_thumbnail_concurrency_is_rejected() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    fs::write(&path, "[thumbnails]\nconcurrency = 0\n").unwrap();

    assert!(load_config(&path).is_err());
}

#[test]
fn explicit_path_must_exist() {
    let temp = tempdir().unwrap();
    let missing = temp.path().join("nope.toml");
    assert!(load_config_or_default(Some(&missing)).is_err());
}

#[test]
#[serial]
fn default_lookup_uses_working_directory() {
    let temp = tempdir().unwrap();
    fs::write(
        temp.path().join("dropconvert.toml"),
        "[queue]\nconcurrency_limit = 7\n",
    )
    .unwrap();

    let previous = std::env::current_dir().unwrap();
    std::env::set_current_dir(temp.path()).unwrap();
    let config = load_config_or_default(None);
    std::env::set_current_dir(previous).unwrap();

    assert_eq!(config.unwrap().queue.concurrency_limit, 7);
}

#[test]
fn saved_config_loads_back() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");

    let mut config = Config::default();
    config.conversion.video_quality = VideoQuality::Low;
    config.conversion.collision = CollisionPolicy::Overwrite;
    config.conversion.default_dest_dir = temp.path().join("out");
    config.queue.max_completed = 10;
    save_config(&path, &config).unwrap();

    let loaded = load_config(&path).unwrap();
    assert_eq!(loaded, config);
}
