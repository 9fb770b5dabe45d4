//! Capture devices
//!
//! Everything needed to run one receiver device: the session state machine
//! ([`DeviceSession`]), its attached clients, the command template rendered
//! into the capture process's command line, readiness probing, delayed
//! restarts, the profile carousel and the fan-out of captured samples.

pub mod client;
pub mod command;
pub mod port;
pub mod probe;
pub mod profile;
pub mod restart;
pub mod session;
pub mod source;
pub mod state;

pub use client::{DemandClient, LoggingClient, SessionClient};
pub use command::{ArgSpec, CommandSpec, CommandTemplate};
pub use probe::{ProbeOutcome, ProbeSchedule, ReadinessProbe, TcpProbe};
pub use profile::{ProfileCarousel, PROFILE_ID_KEY};
pub use restart::DelayedTask;
pub use session::{DeviceSession, NoHooks, SessionHooks, SessionOptions, SessionReport};
pub use source::SourceHub;
pub use state::{BusyState, ClientClass, SourceState};
