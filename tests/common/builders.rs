//! Test data builders for devices and pipeline stages

use rxchain::config::{DeviceConfig, ProfileConfig, RetryConfig, StartupConfig};
use rxchain::device::{CommandSpec, CommandTemplate};
use rxchain::pipeline::{Processor, Stage, StageKind};
use rxchain::types::{Block, Format};

/// Builder for device configurations with fast retry and probe timings
pub struct DeviceBuilder {
    config: DeviceConfig,
}

impl DeviceBuilder {
    pub fn new(id: &str) -> Self {
        let mut config = DeviceConfig::new(id, CommandTemplate::single(CommandSpec::new("sleep").arg("30")));
        config.retry = RetryConfig {
            max_attempts: 3,
            delay_ms: 20,
        };
        config.startup = StartupConfig {
            probe_attempts: 10,
            probe_interval_ms: 10,
            connect_timeout_ms: 50,
            stop_grace_secs: 2,
        };
        Self { config }
    }

    pub fn command(mut self, program: &str, args: &[&str]) -> Self {
        let mut spec = CommandSpec::new(program);
        for arg in args {
            spec = spec.arg(*arg);
        }
        self.config.command = CommandTemplate::single(spec);
        self
    }

    pub fn retries(mut self, max_attempts: u32) -> Self {
        self.config.retry.max_attempts = max_attempts;
        self
    }

    pub fn profile(mut self, id: &str, center_freq: u64, samp_rate: u32) -> Self {
        self.config.profiles.push(
            ProfileConfig::new(id, id.to_uppercase())
                .with_center_freq(center_freq)
                .with_samp_rate(samp_rate),
        );
        self
    }

    pub fn always_on(mut self) -> Self {
        self.config.always_on = true;
        self
    }

    pub fn build(self) -> DeviceConfig {
        self.config
    }
}

/// Float stage adding a constant to every sample
pub struct Offset(pub f32);

impl Processor for Offset {
    fn name(&self) -> &str {
        "offset"
    }

    fn kind(&self) -> StageKind {
        StageKind::Custom("offset")
    }

    fn input_format(&self) -> Format {
        Format::Float
    }

    fn output_format(&self) -> Format {
        Format::Float
    }

    fn process(&mut self, input: Block) -> Option<Block> {
        let Block::Float(samples) = input else {
            return None;
        };
        Some(Block::Float(samples.into_iter().map(|s| s + self.0).collect()))
    }
}

pub fn offset(value: f32) -> Stage {
    Stage::plugin(Box::new(Offset(value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_builder() {
        let device = DeviceBuilder::new("rtl").retries(5).profile("2m", 145_000_000, 2_400_000).build();

        assert_eq!(device.id, "rtl");
        assert_eq!(device.retry.max_attempts, 5);
        assert_eq!(device.profiles[0].name, "2M");
    }
}
