//! # rxchain: receiver signal chains
//!
//! Building blocks of a multi-mode radio receiver backend: capture devices
//! running as supervised child processes, DSP pipelines that can be rewired
//! while samples flow, and the frequency selector that turns a wideband
//! capture into one channel.
//!
//! ## Architecture
//!
//! - **Device**: one [`DeviceSession`] per capture device. Clients create
//!   demand; the session starts, probes, retries and stops the capture
//!   process, and publishes its layered properties.
//! - **Pipeline**: ordered [`Stage`]s joined by bounded conduits. Stages can be
//!   inserted, removed or replaced at runtime without losing queued data.
//! - **Selector**: a pipeline specialization (shift, decimate, resample,
//!   bandpass, squelch) driven by exact decimation math.
//! - **Channel**: a selector fed from a device and kept tuned as the device
//!   changes frequency.
//! - **Communication**: crossbeam channels for sample conduits, exit
//!   notifications and restart timers.
//!
//! ## Configuration
//!
//! Devices are described in a TOML file, by default
//! `<config dir>/rxchain/receiver.toml`:
//!
//! - **Linux**: `~/.config/rxchain/receiver.toml`
//! - **macOS**: `~/Library/Application Support/rxchain/receiver.toml`
//!
//! ## Example
//!
//! ```ignore
//! use rxchain::{ChannelConfig, Receiver, ReceiverConfig};
//!
//! fn main() -> rxchain::Result<()> {
//!     let config = ReceiverConfig::load("receiver.toml")?;
//!     let receiver = Receiver::new(config)?;
//!     receiver.start();
//!
//!     let channel = receiver.open_channel(
//!         "rtlsdr",
//!         ChannelConfig::new("nfm", 12_000).with_dial_frequency(145_500_000),
//!     )?;
//!     let audio = channel.output(64)?;
//!     while let Ok(block) = audio.recv() {
//!         println!("{} samples", block.len());
//!     }
//!     receiver.shutdown();
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod device;
pub mod dsp;
pub mod error;
pub mod pipeline;
pub mod process;
pub mod registry;
pub mod selector;
pub mod types;

// Re-export commonly used types
pub use channel::{Channel, ChannelConfig};
pub use config::{DeviceConfig, ProfileConfig, PropertyStore, ReceiverConfig};
pub use device::{BusyState, ClientClass, DeviceSession, SessionClient, SourceState};
pub use error::{Result, RxError};
pub use pipeline::{Pipeline, PipelineError, Stage};
pub use registry::{DeviceStatus, Receiver};
pub use selector::{DecimationPlan, SecondarySelector, Selector};
pub use types::{Block, Format};
