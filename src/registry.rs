//! Receiver registry
//!
//! [`Receiver`] is the service object owning one [`DeviceSession`] per
//! configured device. It is constructed explicitly from a [`ReceiverConfig`];
//! nothing starts until [`Receiver::start`] is called.

use crate::channel::{Channel, ChannelConfig};
use crate::config::{DeviceConfig, ReceiverConfig};
use crate::device::{BusyState, DeviceSession, SessionOptions, SessionReport, SourceState};
use crate::error::{Result, ResultExt, RxError};
use crossbeam_channel::Sender;
use serde::Serialize;
use std::sync::Arc;

/// One line of `status` output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub id: String,
    pub name: String,
    pub state: SourceState,
    pub busy: BusyState,
    pub enabled: bool,
    pub always_on: bool,
    pub failed: bool,
    pub profile: Option<String>,
    pub center_freq: Option<u64>,
    pub sample_rate: Option<u64>,
    pub clients: usize,
}

impl DeviceStatus {
    fn of(session: &DeviceSession) -> Self {
        Self {
            id: session.id().to_string(),
            name: session.name().to_string(),
            state: session.display_state(),
            busy: session.busy_state(),
            enabled: session.is_enabled(),
            always_on: session.is_always_on(),
            failed: session.is_failed(),
            profile: session.profile_id(),
            center_freq: session.center_freq(),
            sample_rate: session.sample_rate(),
            clients: session.client_count(),
        }
    }
}

pub struct Receiver {
    sessions: Vec<Arc<DeviceSession>>,
}

impl Receiver {
    pub fn new(config: ReceiverConfig) -> Result<Self> {
        Self::build(config, |device| Ok(SessionOptions::for_config(device)))
    }

    /// Build the registry with every session publishing to `reports`.
    pub fn with_reports(config: ReceiverConfig, reports: Sender<SessionReport>) -> Result<Self> {
        Self::build(config, |device| {
            Ok(SessionOptions::for_config(device).with_reports(reports.clone()))
        })
    }

    /// Build with per-device session options
    pub fn build<F>(config: ReceiverConfig, mut options: F) -> Result<Self>
    where
        F: FnMut(&DeviceConfig) -> Result<SessionOptions>,
    {
        let mut sessions: Vec<Arc<DeviceSession>> = Vec::with_capacity(config.devices.len());
        for device in config.devices {
            if sessions.iter().any(|s| s.id() == device.id) {
                tracing::warn!(device = %device.id, "Skipping duplicate device");
                continue;
            }
            let id = device.id.clone();
            let device_options = options(&device)?;
            let session = DeviceSession::with_options(device, device_options)
                .with_context(|| format!("creating session for device {}", id))?;
            sessions.push(session);
        }
        tracing::info!("Receiver configured with {} devices", sessions.len());
        Ok(Self { sessions })
    }

    /// Start every enabled always-on device. Returns how many are running.
    pub fn start(&self) -> usize {
        let mut running = 0;
        for session in &self.sessions {
            if session.is_always_on() && session.is_enabled() && session.start() {
                running += 1;
            }
        }
        running
    }

    pub fn session(&self, id: &str) -> Option<Arc<DeviceSession>> {
        self.sessions.iter().find(|s| s.id() == id).cloned()
    }

    pub fn sessions(&self) -> &[Arc<DeviceSession>] {
        &self.sessions
    }

    /// Open a receiver channel on device `id`
    pub fn open_channel(&self, id: &str, config: ChannelConfig) -> Result<Channel> {
        let session = self
            .session(id)
            .ok_or_else(|| RxError::device(id, "no such device"))?;
        Channel::open(session, config)
    }

    pub fn status(&self) -> Vec<DeviceStatus> {
        self.sessions.iter().map(|s| DeviceStatus::of(s)).collect()
    }

    /// Stop every device and notify its clients
    pub fn shutdown(&self) {
        for session in &self.sessions {
            session.shutdown();
        }
    }
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("devices", &self.sessions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProfileConfig;
    use crate::device::{CommandSpec, CommandTemplate};

    fn device(id: &str) -> DeviceConfig {
        DeviceConfig::new(id, CommandTemplate::single(CommandSpec::new("true")))
            .with_profile(ProfileConfig::new("default", "Default").with_center_freq(100_000_000))
    }

    fn config(devices: Vec<DeviceConfig>) -> ReceiverConfig {
        ReceiverConfig {
            devices,
            ..Default::default()
        }
    }

    #[test]
    fn test_lookup_and_duplicates() {
        let receiver = Receiver::new(config(vec![device("a"), device("b"), device("a")])).unwrap();
        assert_eq!(receiver.sessions().len(), 2);
        assert!(receiver.session("b").is_some());
        assert!(receiver.session("c").is_none());
    }

    #[test]
    fn test_start_skips_on_demand_devices() {
        let receiver = Receiver::new(config(vec![device("a")])).unwrap();
        assert_eq!(receiver.start(), 0);
        assert_eq!(receiver.session("a").unwrap().state(), SourceState::Stopped);
    }

    #[test]
    fn test_status() {
        let receiver = Receiver::new(config(vec![device("a")])).unwrap();
        let status = receiver.status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].id, "a");
        assert_eq!(status[0].profile.as_deref(), Some("default"));
        assert_eq!(status[0].center_freq, Some(100_000_000));
        assert_eq!(status[0].state, SourceState::Stopped);
        assert!(status[0].enabled);
    }

    #[test]
    fn test_open_channel_unknown_device() {
        let receiver = Receiver::new(config(vec![device("a")])).unwrap();
        assert!(receiver.open_channel("zzz", ChannelConfig::new("fm", 12_000)).is_err());
    }
}
