//! Session state vocabulary

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a capture device session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SourceState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    /// Reserved for in-place retuning; no transition enters it yet
    Tuning,
}

impl SourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceState::Stopped => "Stopped",
            SourceState::Starting => "Starting",
            SourceState::Running => "Running",
            SourceState::Stopping => "Stopping",
            SourceState::Tuning => "Tuning",
        }
    }
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether interactive users are holding the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BusyState {
    #[default]
    Idle,
    Busy,
}

impl fmt::Display for BusyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusyState::Idle => write!(f, "Idle"),
            BusyState::Busy => write!(f, "Busy"),
        }
    }
}

/// Demand category of a session client
///
/// `User` clients start the device and mark it busy, `Background` clients
/// only keep it running, `Inactive` clients merely observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum ClientClass {
    #[default]
    Inactive,
    Background,
    User,
}

impl ClientClass {
    pub fn creates_demand(&self) -> bool {
        matches!(self, ClientClass::Background | ClientClass::User)
    }
}

impl fmt::Display for ClientClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientClass::Inactive => write!(f, "inactive"),
            ClientClass::Background => write!(f, "background"),
            ClientClass::User => write!(f, "user"),
        }
    }
}
