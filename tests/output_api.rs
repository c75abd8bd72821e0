//! Integration tests for the producer-facing output API
//!
//! Covers events, configuration persistence, format negotiation and the
//! start/stop lifecycle.

#![cfg(feature = "sim")]

use approx::assert_relative_eq;
use spatial_sink::backend::sim::{SimConfig, SimulatedBackend};
use spatial_sink::backend::DeviceInfo;
use spatial_sink::format::BackendFormat;
use spatial_sink::timing::ManualCounter;
use spatial_sink::{
    AudioBlock, AudioFormat, ChannelMask, OutputConfig, OutputEvent, SampleFormat, SpatialError,
    SpatialOutput,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn fast_config() -> OutputConfig {
    OutputConfig {
        wait_timeout_ms: 5,
        stop_wait: 0,
        ..OutputConfig::default()
    }
}

fn two_devices() -> SimulatedBackend {
    SimulatedBackend::with_config(SimConfig {
        devices: vec![
            DeviceInfo {
                id: "sim-0".into(),
                name: "Speakers".into(),
            },
            DeviceInfo {
                id: "sim-1".into(),
                name: "Headphones".into(),
            },
        ],
        ..SimConfig::default()
    })
}

#[test]
fn test_open_reports_devices_and_settings() {
    let backend = two_devices();
    let output = SpatialOutput::open(Arc::new(backend), OutputConfig::default()).unwrap();

    let events: Vec<OutputEvent> = output.events().try_iter().collect();
    assert_eq!(events.len(), 5);
    assert!(matches!(&events[0], OutputEvent::DeviceAdded(d) if d.id == "sim-0"));
    assert!(matches!(&events[1], OutputEvent::DeviceAdded(d) if d.id == "sim-1"));
    assert_eq!(events[2], OutputEvent::VolumeChanged(0.5));
    assert_eq!(events[3], OutputEvent::MuteChanged(false));
    assert_eq!(events[4], OutputEvent::DeviceChanged(String::new()));
}

#[test]
fn test_invalid_config_rejected_at_open() {
    let config = OutputConfig {
        wait_timeout_ms: 0,
        ..OutputConfig::default()
    };
    let result = SpatialOutput::open(Arc::new(SimulatedBackend::new()), config);
    assert!(matches!(result, Err(SpatialError::ConfigError(_))));
}

#[test]
fn test_volume_stored_without_stream() {
    let mut output =
        SpatialOutput::open(Arc::new(SimulatedBackend::new()), fast_config()).unwrap();
    let events = output.events();
    let _: Vec<_> = events.try_iter().collect();

    assert!(matches!(output.volume_set(1.5), Err(SpatialError::NotRunning)));
    assert_relative_eq!(output.volume(), 1.0);
    assert!(matches!(output.mute_set(true), Err(SpatialError::NotRunning)));
    assert!(output.is_muted());

    let events: Vec<OutputEvent> = events.try_iter().collect();
    assert_eq!(
        events,
        vec![OutputEvent::VolumeChanged(1.0), OutputEvent::MuteChanged(true)]
    );
}

#[test]
fn test_volume_saved_to_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spatial.json");
    OutputConfig {
        volume_save: true,
        ..fast_config()
    }
    .save(&path)
    .unwrap();

    let mut output =
        SpatialOutput::open_with_config_file(Arc::new(SimulatedBackend::new()), &path).unwrap();
    let _ = output.volume_set(0.2);
    let _ = output.mute_set(true);

    let saved = OutputConfig::load(&path).unwrap();
    assert_relative_eq!(saved.volume, 0.2);
    assert!(saved.mute);
}

#[test]
fn test_volume_not_saved_without_flag() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spatial.json");
    fast_config().save(&path).unwrap();

    let mut output =
        SpatialOutput::open_with_config_file(Arc::new(SimulatedBackend::new()), &path).unwrap();
    let _ = output.volume_set(0.9);

    assert_relative_eq!(OutputConfig::load(&path).unwrap().volume, 0.5);
}

#[test]
fn test_start_twice_rejected() {
    let mut output =
        SpatialOutput::open(Arc::new(SimulatedBackend::new()), fast_config()).unwrap();
    let format = AudioFormat::float(48_000, ChannelMask::STEREO);
    output.start(format).unwrap();
    assert!(matches!(output.start(format), Err(SpatialError::AlreadyRunning)));
}

#[test]
fn test_integer_input_rejected() {
    let mut output =
        SpatialOutput::open(Arc::new(SimulatedBackend::new()), fast_config()).unwrap();
    let format = AudioFormat {
        sample_format: SampleFormat::S16,
        sample_rate: 48_000,
        channels: ChannelMask::STEREO,
    };
    assert!(matches!(
        output.start(format),
        Err(SpatialError::FormatRejected(_))
    ));
    assert!(!output.is_running());
}

#[test]
fn test_device_rate_wins() {
    let backend = SimulatedBackend::with_config(SimConfig {
        formats: vec![BackendFormat::float_mono(44_100)],
        ..SimConfig::default()
    });
    let mut output = SpatialOutput::open(Arc::new(backend), fast_config()).unwrap();

    let format = output
        .start(AudioFormat::float(48_000, ChannelMask::SURROUND_7_1 | ChannelMask::REAR_CENTER))
        .unwrap();
    assert_eq!(format.sample_rate, 44_100);
    assert_eq!(format.channels, ChannelMask::SURROUND_7_1);
    assert_eq!(output.format(), Some(format));
    assert_eq!(output.positions().len(), 8);
}

#[test]
fn test_play_checks_stream_shape() {
    let mut output =
        SpatialOutput::open(Arc::new(SimulatedBackend::new()), fast_config()).unwrap();
    let stereo = AudioBlock::silence(16, 2).unwrap();
    assert!(matches!(
        output.play(stereo.clone()),
        Err(SpatialError::NotRunning)
    ));

    output
        .start(AudioFormat::float(48_000, ChannelMask::SURROUND_5_1))
        .unwrap();
    assert!(matches!(
        output.play(stereo),
        Err(SpatialError::InvalidBlock(_))
    ));
    output.play(AudioBlock::silence(16, 6).unwrap()).unwrap();
    assert_eq!(output.counters().queued_frames, 16);
}

#[test]
fn test_device_select() {
    let backend = two_devices();
    let mut output = SpatialOutput::open(Arc::new(backend), fast_config()).unwrap();
    let events = output.events();
    let _: Vec<_> = events.try_iter().collect();

    assert!(matches!(
        output.device_select("sim-9"),
        Err(SpatialError::ConfigError(_))
    ));
    output.device_select("sim-1").unwrap();
    assert_eq!(output.device_id(), "sim-1");

    let events: Vec<OutputEvent> = events.try_iter().collect();
    assert_eq!(
        events,
        vec![
            OutputEvent::DeviceChanged("sim-1".into()),
            OutputEvent::RestartRequested
        ]
    );

    output
        .start(AudioFormat::float(48_000, ChannelMask::STEREO))
        .unwrap();
    assert!(output.is_running());
}

#[test]
fn test_stop_discards_queue_and_allows_restart() {
    let backend = SimulatedBackend::new();
    let mut output = SpatialOutput::open(Arc::new(backend.clone()), fast_config()).unwrap();
    let format = AudioFormat::float(48_000, ChannelMask::STEREO);

    output.start(format).unwrap();
    output.play(AudioBlock::silence(960, 2).unwrap()).unwrap();
    output.stop().unwrap();

    assert_eq!(output.counters().queued_frames, 0);
    assert!(!output.is_running());
    assert!(matches!(output.stop(), Err(SpatialError::NotRunning)));

    let sim = backend.stats();
    assert!(!sim.started);
    assert_eq!(sim.live_objects, 0);

    output.start(format).unwrap();
    assert_eq!(backend.stats().sessions_opened, 2);
}

#[test]
fn test_flush_with_wait_sleeps_for_delay() {
    let counter = Arc::new(ManualCounter::new(1_000_000));
    let backend = SimulatedBackend::new().with_counter(counter);
    let mut output = SpatialOutput::open(Arc::new(backend.clone()), fast_config()).unwrap();
    output
        .start(AudioFormat::float(48_000, ChannelMask::STEREO))
        .unwrap();

    // 960 frames queued, nothing consumed: 20 ms of delay
    output.play(AudioBlock::silence(960, 2).unwrap()).unwrap();
    assert_eq!(output.time_get().unwrap(), 20_000);

    let started = Instant::now();
    output.flush(true).unwrap();
    assert!(started.elapsed() >= Duration::from_millis(20));

    // the queue is left alone
    assert_eq!(output.counters().queued_frames, 960);
    assert_eq!(backend.stats().resets, 0);
}

#[test]
fn test_drop_stops_worker() {
    let backend = SimulatedBackend::new();
    let mut output = SpatialOutput::open(Arc::new(backend.clone()), fast_config()).unwrap();
    output
        .start(AudioFormat::float(48_000, ChannelMask::SURROUND_5_1))
        .unwrap();
    assert_eq!(backend.stats().live_objects, 6);

    drop(output);
    let sim = backend.stats();
    assert!(!sim.started);
    assert_eq!(sim.live_objects, 0);
}
