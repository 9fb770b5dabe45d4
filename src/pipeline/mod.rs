//! Runtime-mutable processing chains.
//!
//! Data flows through an ordered list of stages connected by bounded
//! conduits. Each stage runs on its own worker thread (or as an external
//! process fed through stdin/stdout), and the chain can be edited while it is
//! running: insert, remove and replace only touch the conduits adjacent to the
//! edited position.
//!
//! # Architecture
//!
//! ```text
//! <input> ──► [Shift] ──► [FirDecimate] ──► [Bandpass] ──► [Squelch] ──► <output>
//!                                                  └──► tap
//! ```
//!
//! # Design
//!
//! - **Enum dispatch on hot path**: `BuiltinProcessor` for the builtin DSP
//!   primitives, `Processor` trait for plugins.
//! - **Stable identity**: stages and conduits carry ids that only change for
//!   the positions a mutation touches.
//! - **Typed edges**: every conduit carries one [`Format`](crate::types::Format);
//!   mismatches are rejected before anything is rewired.

pub mod conduit;
pub mod connection;
pub mod error;
pub mod executor;
pub mod id;
pub mod stage;
pub mod stages;

pub use conduit::{Conduit, ConduitInfo, DEFAULT_CONDUIT_CAPACITY};
pub use connection::{BurstyConnection, Connection, ConnectionPolicy, DefaultConnection};
pub use error::{PipelineError, PipelineResult};
pub use executor::Pipeline;
pub use id::{ConduitId, StageId};
pub use stage::{AnyProcessor, BuiltinProcessor, Processor, Stage, StageHandle, StageInfo, StageKind};
