//! Integration tests for configuration files and the receiver registry

mod common;

use common::builders::DeviceBuilder;
use rxchain::config::{ProfileConfig, ReceiverConfig};
use rxchain::device::{CommandSpec, CommandTemplate, SourceState};
use rxchain::{ChannelConfig, Receiver};
use tempfile::TempDir;

const SAMPLE: &str = r#"
[logging]
level = "rxchain=debug"

[[devices]]
id = "rtl"
name = "RTL-SDR"
always_on = false
format = "complex_short"
live_keys = ["rf_gain"]
command = [
    { program = "rtl_sdr", args = [{ option = "-f", key = "tuner_freq" }, { option = "-g", key = "rf_gain" }, "-"] },
    { program = "nmux", args = ["--port", "{port}"] },
]

[devices.properties]
ppm = 1

[[devices.profiles]]
id = "2m"
name = "2m band"
center_freq = 145000000
samp_rate = 2400000
rf_gain = 30

[[devices.profiles]]
id = "70cm"
name = "70cm band"
center_freq = 435000000
samp_rate = 2400000
start_freq = 439000000
"#;

#[test]
fn test_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("receiver.toml");

    let mut config = ReceiverConfig::default();
    config.devices.push(
        DeviceBuilder::new("airspy")
            .profile("fm", 98_000_000, 2_500_000)
            .always_on()
            .build(),
    );
    config.devices[0].profiles[0] = config.devices[0].profiles[0].clone().with_extra("lfo_offset", -250);
    config.save(&path).unwrap();

    let loaded = ReceiverConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_load_sample_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("receiver.toml");
    std::fs::write(&path, SAMPLE).unwrap();

    let config = ReceiverConfig::load(&path).unwrap();
    let device = config.device("rtl").unwrap();
    assert_eq!(device.command.commands().len(), 2);
    assert_eq!(device.profiles[0].rf_gain, Some(serde_json::Value::from(30)));

    let warnings = config.validate();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("70cm"));
    assert!(warnings[0].contains("out of range"));
}

#[test]
fn test_load_or_default_on_missing_file() {
    let dir = TempDir::new().unwrap();
    let config = ReceiverConfig::load_or_default(dir.path().join("missing.toml"));
    assert!(config.devices.is_empty());
}

#[test]
fn test_load_reports_parse_errors() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[[devices]]\nname = 3\n").unwrap();
    assert!(ReceiverConfig::load(&path).is_err());
}

#[test]
fn test_registry_sessions_render_commands() {
    let config = ReceiverConfig::parse(SAMPLE).unwrap();
    let receiver = Receiver::new(config).unwrap();
    let session = receiver.session("rtl").unwrap();

    let command = CommandTemplate::single(CommandSpec::new("rtl_sdr").option("-f", "tuner_freq"))
        .render(&session.command_values())
        .unwrap();
    assert_eq!(command.to_string(), "rtl_sdr -f 145000000");
    assert_eq!(session.props().get_u64("ppm"), Some(1));
    assert_eq!(session.props().get_u64("rf_gain"), Some(30));

    assert!(session.activate_profile("70cm"));
    assert_eq!(session.center_freq(), Some(435_000_000));
    assert!(!session.props().contains("rf_gain"));
    assert_eq!(receiver.status()[0].profile.as_deref(), Some("70cm"));
}

#[test]
fn test_channel_follows_device() {
    let mut config = ReceiverConfig::default();
    let mut device = DeviceBuilder::new("rtl")
        .profile("2m", 145_000_000, 2_400_000)
        .profile("70cm", 435_000_000, 1_200_000)
        .build();
    // keep the device down so opening a channel spawns nothing
    device.enabled = false;
    device.profiles.push(ProfileConfig::new("empty", "Empty"));
    config.devices.push(device);
    let receiver = Receiver::new(config).unwrap();

    let channel = receiver
        .open_channel("rtl", ChannelConfig::new("nfm", 12_000).with_dial_frequency(145_500_000))
        .unwrap();
    assert_eq!(channel.selector().frequency_offset(), 500_000.0);
    assert_eq!(channel.selector().plan().decimation, 200);

    let session = receiver.session("rtl").unwrap();
    session.activate_profile("70cm");
    assert_eq!(channel.selector().input_rate(), 1_200_000);
    assert_eq!(channel.selector().plan().decimation, 100);

    channel.set_dial_frequency(434_900_000);
    assert_eq!(channel.selector().frequency_offset(), -100_000.0);
    assert_eq!(session.state(), SourceState::Stopped);

    drop(channel);
    assert_eq!(session.client_count(), 0);
    receiver.shutdown();
}
