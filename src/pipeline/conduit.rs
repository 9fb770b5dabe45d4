//! Conduits and the stage-side endpoints they plug into.
//!
//! A [`Conduit`] is a bounded single-producer/single-consumer channel of
//! [`Block`]s. Stages never hold conduits directly; each stage owns an
//! [`Inlet`] and an [`Outlet`] whose backing channel can be swapped by the
//! pipeline while the stage thread keeps running.
//!
//! # Rewiring rules
//!
//! - [`Inlet::replace`] discards whatever was queued for the stage.
//! - [`Inlet::push`] queues a new channel behind the current one; the stage
//!   keeps draining the old channel until its producer disconnects, so blocks
//!   already in flight ahead of a cut point are preserved.
//! - [`Outlet::set_primary`] swaps the downstream channel; a send blocked on a
//!   full conduit re-reads the primary on every backpressure timeout.
//! - Taps are extra conduits fed with a copy of every block. A slow tap drops
//!   blocks instead of stalling the primary path.

use crate::pipeline::id::ConduitId;
use crate::types::{Block, Format};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Default number of blocks a conduit buffers before applying backpressure.
pub const DEFAULT_CONDUIT_CAPACITY: usize = 64;

/// How long a blocked send waits before re-checking wiring and stop flags.
const SEND_POLL: Duration = Duration::from_millis(50);

/// Sleep used by an inlet that currently has no upstream attached.
const IDLE_POLL: Duration = Duration::from_millis(20);

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Identity and shape of a conduit, as recorded by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConduitInfo {
    pub id: ConduitId,
    pub format: Format,
    pub capacity: usize,
}

/// A freshly created conduit, split into its two ends by the pipeline.
pub struct Conduit {
    info: ConduitInfo,
    tx: Sender<Block>,
    rx: Receiver<Block>,
}

impl Conduit {
    pub fn new(format: Format, capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            info: ConduitInfo {
                id: ConduitId::next(),
                format,
                capacity: capacity.max(1),
            },
            tx,
            rx,
        }
    }

    pub fn id(&self) -> ConduitId {
        self.info.id
    }

    pub fn info(&self) -> ConduitInfo {
        self.info
    }

    pub fn split(self) -> (ConduitInfo, Sender<Block>, Receiver<Block>) {
        (self.info, self.tx, self.rx)
    }
}

// ── Inlet ──

/// Consumer endpoint of a stage.
#[derive(Clone, Default)]
pub struct Inlet {
    queue: Arc<Mutex<VecDeque<Receiver<Block>>>>,
}

impl Inlet {
    pub fn new(rx: Receiver<Block>) -> Self {
        let inlet = Self::default();
        inlet.replace(Some(rx));
        inlet
    }

    /// Detached inlet for stages that are pure sources.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Swap the upstream channel, discarding anything still queued.
    pub fn replace(&self, rx: Option<Receiver<Block>>) {
        let mut queue = lock(&self.queue);
        queue.clear();
        queue.extend(rx);
    }

    /// Queue a channel to be read once the current one is drained and closed.
    pub fn push(&self, rx: Receiver<Block>) {
        lock(&self.queue).push_back(rx);
    }

    pub fn is_attached(&self) -> bool {
        !lock(&self.queue).is_empty()
    }

    /// Receive the next block, waiting at most `timeout`.
    ///
    /// Returns `None` on timeout or while no upstream is attached.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Block> {
        let front = lock(&self.queue).front().cloned();
        let Some(rx) = front else {
            std::thread::sleep(timeout.min(IDLE_POLL));
            return None;
        };

        match rx.recv_timeout(timeout) {
            Ok(block) => Some(block),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                let mut queue = lock(&self.queue);
                if queue.front().is_some_and(|current| current.same_channel(&rx)) {
                    queue.pop_front();
                }
                None
            }
        }
    }
}

// ── Outlet ──

struct TapEntry {
    id: ConduitId,
    tx: Sender<Block>,
}

#[derive(Default)]
struct OutletState {
    primary: Option<Sender<Block>>,
    taps: Vec<TapEntry>,
}

/// Producer endpoint of a stage.
#[derive(Clone, Default)]
pub struct Outlet {
    state: Arc<Mutex<OutletState>>,
}

/// Tap channel detached from one outlet so it can be attached to another.
pub struct TapHandle {
    id: ConduitId,
    tx: Sender<Block>,
}

impl Outlet {
    pub fn new(tx: Option<Sender<Block>>) -> Self {
        let outlet = Self::default();
        outlet.set_primary(tx);
        outlet
    }

    /// Swap the downstream channel, returning the previous one.
    pub fn set_primary(&self, tx: Option<Sender<Block>>) -> Option<Sender<Block>> {
        std::mem::replace(&mut lock(&self.state).primary, tx)
    }

    pub fn has_primary(&self) -> bool {
        lock(&self.state).primary.is_some()
    }

    pub fn add_tap(&self, id: ConduitId, tx: Sender<Block>) {
        lock(&self.state).taps.push(TapEntry { id, tx });
    }

    pub fn remove_tap(&self, id: ConduitId) -> bool {
        let mut state = lock(&self.state);
        let before = state.taps.len();
        state.taps.retain(|tap| tap.id != id);
        state.taps.len() != before
    }

    pub fn take_taps(&self) -> Vec<TapHandle> {
        lock(&self.state)
            .taps
            .drain(..)
            .map(|tap| TapHandle { id: tap.id, tx: tap.tx })
            .collect()
    }

    pub fn restore_taps(&self, taps: Vec<TapHandle>) {
        let mut state = lock(&self.state);
        state
            .taps
            .extend(taps.into_iter().map(|tap| TapEntry { id: tap.id, tx: tap.tx }));
    }

    pub fn tap_count(&self) -> usize {
        lock(&self.state).taps.len()
    }

    /// Drop every channel held by this outlet so consumers observe end of stream.
    pub fn close(&self) {
        let mut state = lock(&self.state);
        state.primary = None;
        state.taps.clear();
    }

    /// Send a block downstream, blocking while the primary conduit is full.
    ///
    /// Returns `false` if `stop` was raised while waiting.
    pub fn send(&self, block: Block, stop: &AtomicBool) -> bool {
        self.feed_taps(&block);

        let mut block = block;
        loop {
            let primary = lock(&self.state).primary.clone();
            let Some(tx) = primary else {
                return true;
            };

            match tx.send_timeout(block, SEND_POLL) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(b)) => {
                    if stop.load(Ordering::Relaxed) {
                        return false;
                    }
                    block = b;
                }
                Err(SendTimeoutError::Disconnected(b)) => {
                    let rewired = lock(&self.state)
                        .primary
                        .as_ref()
                        .is_some_and(|current| !current.same_channel(&tx));
                    if !rewired {
                        tracing::trace!("Downstream conduit closed, dropping block of {}", b.len());
                        return true;
                    }
                    block = b;
                }
            }
        }
    }

    fn feed_taps(&self, block: &Block) {
        let mut state = lock(&self.state);
        if state.taps.is_empty() {
            return;
        }
        state.taps.retain(|tap| match tap.tx.try_send(block.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::debug!("Tap {} is full, dropping block", tap.id);
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("Tap {} disconnected, removing", tap.id);
                false
            }
        });
    }
}
