//! Receiver channel
//!
//! A [`Channel`] picks one frequency out of a device's wideband stream: it
//! feeds the session's capture data through a [`Selector`] and keeps the
//! selector tuned as the device changes center frequency or sample rate.
//! Decoder stages appended to the channel run behind the selector.
//!
//! ```text
//! DeviceSession ──► SourceHub ──► [Convert] ──► Selector stages ──► decoders ──► output
//!       │                                           ▲
//!       └── center_freq / samp_rate changes ────────┘
//! ```

use crate::config::{value_as_u64, ConfigChanges, SubscriptionId};
use crate::device::{ClientClass, DeviceSession, SessionClient};
use crate::error::Result;
use crate::pipeline::conduit::lock;
use crate::pipeline::stages::{ConvertStage, LineParser, ParserControl};
use crate::pipeline::{ConduitId, Stage, DEFAULT_CONDUIT_CAPACITY};
use crate::selector::Selector;
use crate::types::{Block, Format};
use crossbeam_channel::Receiver;
use std::sync::{Arc, Mutex, Weak};

/// Channel parameters
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub name: String,
    pub output_rate: u32,
    /// Absolute frequency to listen on; `None` stays on the center frequency
    pub dial_frequency: Option<u64>,
    pub squelch: bool,
    pub bandpass: Option<(f64, f64)>,
    /// Demand the channel puts on its device
    pub class: ClientClass,
}

impl ChannelConfig {
    pub fn new(name: impl Into<String>, output_rate: u32) -> Self {
        Self {
            name: name.into(),
            output_rate,
            dial_frequency: None,
            squelch: false,
            bandpass: None,
            class: ClientClass::User,
        }
    }

    pub fn with_dial_frequency(mut self, frequency: u64) -> Self {
        self.dial_frequency = Some(frequency);
        self
    }

    pub fn with_squelch(mut self) -> Self {
        self.squelch = true;
        self
    }

    pub fn with_bandpass(mut self, low: f64, high: f64) -> Self {
        self.bandpass = Some((low, high));
        self
    }

    pub fn with_class(mut self, class: ClientClass) -> Self {
        self.class = class;
        self
    }
}

#[derive(Debug, Default)]
struct Tuning {
    center: u64,
    dial: Option<u64>,
    parsers: Vec<ParserControl>,
}

/// Offset of `dial` from `center` in Hz
pub fn dial_offset(dial: Option<u64>, center: u64) -> f64 {
    dial.map_or(0.0, |dial| dial as f64 - center as f64)
}

struct ChannelClient(ClientClass);

impl SessionClient for ChannelClient {
    fn client_class(&self) -> ClientClass {
        self.0
    }
}

pub struct Channel {
    name: String,
    session: Arc<DeviceSession>,
    selector: Arc<Selector>,
    tuning: Arc<Mutex<Tuning>>,
    subscription: SubscriptionId,
    conduit: ConduitId,
    client: Arc<dyn SessionClient>,
}

impl Channel {
    /// Build the selector, connect it to the session's capture data and attach
    /// to the session. Attaching a demanding channel starts the device.
    pub fn open(session: Arc<DeviceSession>, config: ChannelConfig) -> Result<Self> {
        let center = session.center_freq().unwrap_or(0);
        let input_rate = session
            .sample_rate()
            .and_then(|rate| u32::try_from(rate).ok())
            .unwrap_or(config.output_rate);

        let selector = Arc::new(Selector::new(
            input_rate,
            config.output_rate,
            dial_offset(config.dial_frequency, center),
            config.squelch,
        )?);
        if config.bandpass.is_some() {
            selector.set_bandpass(config.bandpass)?;
        }

        let format = session.hub().format();
        if format != Format::ComplexFloat {
            let convert = ConvertStage::new(format, Format::ComplexFloat)?;
            selector.pipeline().insert(0, Stage::new(convert))?;
        }
        let (conduit, rx) = session.subscribe_data(DEFAULT_CONDUIT_CAPACITY);
        selector.pipeline().set_input(rx, format)?;

        let tuning = Arc::new(Mutex::new(Tuning {
            center,
            dial: config.dial_frequency,
            parsers: Vec::new(),
        }));
        let subscription = session.subscribe(follow_device(Arc::downgrade(&selector), tuning.clone()));

        let client: Arc<dyn SessionClient> = Arc::new(ChannelClient(config.class));
        session.add_client(client.clone());

        tracing::info!(
            device = session.id(),
            channel = %config.name,
            "Channel open at {} Hz, offset {} Hz",
            config.output_rate,
            selector.frequency_offset()
        );

        Ok(Self {
            name: config.name,
            session,
            selector,
            tuning,
            subscription,
            conduit,
            client,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn dial_frequency(&self) -> Option<u64> {
        lock(&self.tuning).dial
    }

    /// Listen on an absolute frequency
    pub fn set_dial_frequency(&self, frequency: u64) {
        let mut tuning = lock(&self.tuning);
        tuning.dial = Some(frequency);
        let offset = dial_offset(tuning.dial, tuning.center);
        warn_out_of_band(&self.selector, offset);
        self.selector.set_frequency_offset(offset);
        for parser in &tuning.parsers {
            parser.set_dial_frequency(Some(frequency));
        }
    }

    pub fn set_output_rate(&self, output_rate: u32) -> Result<()> {
        Ok(self.selector.set_output_rate(output_rate)?)
    }

    pub fn set_bandpass(&self, band: Option<(f64, f64)>) -> Result<()> {
        Ok(self.selector.set_bandpass(band)?)
    }

    pub fn set_squelch_level(&self, level_db: Option<f64>) {
        self.selector.set_squelch_level(level_db);
    }

    /// Append a decoder stage behind the selector
    pub fn add_stage(&self, stage: Stage) -> Result<()> {
        Ok(self.selector.pipeline().append(stage)?)
    }

    /// Append a line parser; it is kept informed of the dial frequency.
    pub fn add_parser(&self, parser: LineParser) -> Result<()> {
        let control = parser.control();
        self.add_stage(Stage::new(parser))?;
        let mut tuning = lock(&self.tuning);
        control.set_dial_frequency(tuning.dial.or(Some(tuning.center).filter(|c| *c != 0)));
        tuning.parsers.push(control);
        Ok(())
    }

    /// Receive the channel's final output
    pub fn output(&self, capacity: usize) -> Result<Receiver<Block>> {
        Ok(self.selector.pipeline().connect_output(capacity)?)
    }
}

fn follow_device(selector: Weak<Selector>, tuning: Arc<Mutex<Tuning>>) -> impl Fn(&ConfigChanges) + Send + Sync + 'static {
    move |changes: &ConfigChanges| {
        let Some(selector) = selector.upgrade() else {
            return;
        };
        if let Some(Some(rate)) = changes.get("samp_rate") {
            match value_as_u64(rate).and_then(|r| u32::try_from(r).ok()) {
                Some(rate) => {
                    if let Err(e) = selector.set_input_rate(rate) {
                        tracing::warn!("Cannot follow sample rate {}: {}", rate, e);
                    }
                }
                None => tracing::warn!("Ignoring sample rate {}", rate),
            }
        }
        if let Some(Some(center)) = changes.get("center_freq") {
            if let Some(center) = value_as_u64(center) {
                let mut tuning = lock(&tuning);
                tuning.center = center;
                if tuning.dial.is_some() {
                    let offset = dial_offset(tuning.dial, center);
                    warn_out_of_band(&selector, offset);
                    selector.set_frequency_offset(offset);
                }
            }
        }
    }
}

fn warn_out_of_band(selector: &Selector, offset: f64) {
    let half = selector.input_rate() as f64 / 2.0;
    if offset.abs() > half {
        tracing::warn!("Offset {} Hz is outside the captured band of ±{} Hz", offset, half);
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.session.props().unsubscribe(self.subscription);
        self.session.hub().unsubscribe(self.conduit);
        self.session.remove_client(&self.client);
        self.selector.stop();
        tracing::debug!(device = self.session.id(), channel = %self.name, "Channel closed");
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("device", &self.session.id())
            .field("dial_frequency", &self.dial_frequency())
            .finish()
    }
}
