//! Per-pipeline hook deciding how two adjacent stages are connected.

use crate::pipeline::conduit::DEFAULT_CONDUIT_CAPACITY;
use crate::pipeline::stage::{StageInfo, StageKind};
use crate::types::Block;
use crossbeam_channel::Sender;

/// Shape of the conduit placed between two stages.
#[derive(Debug, Clone)]
pub struct Connection {
    /// Blocks buffered before the upstream stage is blocked
    pub capacity: usize,
    /// Extra observer fed with a copy of every block crossing this connection
    pub tap: Option<Sender<Block>>,
}

impl Default for Connection {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CONDUIT_CAPACITY,
            tap: None,
        }
    }
}

/// Override point for conduit sizing and tapping between two named stages.
pub trait ConnectionPolicy: Send + Sync {
    fn connect(&self, upstream: &StageInfo, downstream: &StageInfo) -> Connection;
}

/// Every connection gets a conduit of the same capacity.
#[derive(Debug, Clone, Copy)]
pub struct DefaultConnection {
    pub capacity: usize,
}

impl Default for DefaultConnection {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CONDUIT_CAPACITY,
        }
    }
}

impl ConnectionPolicy for DefaultConnection {
    fn connect(&self, _upstream: &StageInfo, _downstream: &StageInfo) -> Connection {
        Connection {
            capacity: self.capacity,
            tap: None,
        }
    }
}

/// Larger conduits after stages that emit bursty output (external tools, parsers).
#[derive(Debug, Clone, Copy)]
pub struct BurstyConnection {
    pub capacity: usize,
    pub burst_capacity: usize,
}

impl Default for BurstyConnection {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CONDUIT_CAPACITY,
            burst_capacity: DEFAULT_CONDUIT_CAPACITY * 8,
        }
    }
}

impl ConnectionPolicy for BurstyConnection {
    fn connect(&self, upstream: &StageInfo, _downstream: &StageInfo) -> Connection {
        let capacity = match upstream.kind {
            StageKind::Exec | StageKind::Parser => self.burst_capacity,
            _ => self.capacity,
        };
        Connection { capacity, tap: None }
    }
}

impl<F> ConnectionPolicy for F
where
    F: Fn(&StageInfo, &StageInfo) -> Connection + Send + Sync,
{
    fn connect(&self, upstream: &StageInfo, downstream: &StageInfo) -> Connection {
        self(upstream, downstream)
    }
}
