//! Stage abstraction for the pipeline.
//!
//! Two-layer design, as for processors:
//! - **`Processor` trait** for user-supplied in-process stages.
//! - **`BuiltinProcessor` enum** for the builtin DSP primitives and parsers,
//!   dispatched with a `match` on the hot path.
//!
//! `AnyProcessor` wraps either variant. A [`Stage`] is either a processor or an
//! external process ([`ExecStage`]); once started it becomes a [`StageHandle`]
//! owning its worker threads.

use crate::pipeline::conduit::{Inlet, Outlet};
use crate::pipeline::error::PipelineResult;
use crate::pipeline::id::StageId;
use crate::pipeline::stages::{
    BandpassStage, ConvertStage, ExecRuntime, ExecStage, FirDecimator, FractionalDecimator,
    LineParser, ShiftStage, SquelchStage,
};
use crate::types::{Block, Format};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Poll interval of stage worker loops
pub(crate) const RECV_POLL: Duration = Duration::from_millis(50);

/// Classification tag carried by every stage.
///
/// `Pipeline::index_of` scans these tags instead of inspecting stage objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Shift,
    FirDecimate,
    FractionalDecimator,
    Bandpass,
    Squelch,
    Convert,
    Exec,
    Parser,
    Custom(&'static str),
}

/// Snapshot of a stage as seen by `Pipeline::index_of` and friends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInfo {
    pub id: StageId,
    pub name: String,
    pub kind: StageKind,
    pub input: Format,
    pub output: Format,
}

/// Trait for pluggable in-process stages.
pub trait Processor: Send {
    /// Human-readable name of this stage.
    fn name(&self) -> &str;

    fn kind(&self) -> StageKind;

    fn input_format(&self) -> Format;

    fn output_format(&self) -> Format;

    /// Transform one input block. `None` means nothing to emit yet.
    fn process(&mut self, input: Block) -> Option<Block>;
}

/// Enum dispatch for builtin processors.
pub enum BuiltinProcessor {
    Shift(ShiftStage),
    FirDecimate(FirDecimator),
    Fractional(FractionalDecimator),
    Bandpass(BandpassStage),
    Squelch(SquelchStage),
    Convert(ConvertStage),
    Parser(LineParser),
}

impl BuiltinProcessor {
    pub fn name(&self) -> &str {
        match self {
            BuiltinProcessor::Shift(p) => p.name(),
            BuiltinProcessor::FirDecimate(p) => p.name(),
            BuiltinProcessor::Fractional(p) => p.name(),
            BuiltinProcessor::Bandpass(p) => p.name(),
            BuiltinProcessor::Squelch(p) => p.name(),
            BuiltinProcessor::Convert(p) => p.name(),
            BuiltinProcessor::Parser(p) => p.name(),
        }
    }

    pub fn kind(&self) -> StageKind {
        match self {
            BuiltinProcessor::Shift(p) => p.kind(),
            BuiltinProcessor::FirDecimate(p) => p.kind(),
            BuiltinProcessor::Fractional(p) => p.kind(),
            BuiltinProcessor::Bandpass(p) => p.kind(),
            BuiltinProcessor::Squelch(p) => p.kind(),
            BuiltinProcessor::Convert(p) => p.kind(),
            BuiltinProcessor::Parser(p) => p.kind(),
        }
    }

    pub fn input_format(&self) -> Format {
        match self {
            BuiltinProcessor::Shift(p) => p.input_format(),
            BuiltinProcessor::FirDecimate(p) => p.input_format(),
            BuiltinProcessor::Fractional(p) => p.input_format(),
            BuiltinProcessor::Bandpass(p) => p.input_format(),
            BuiltinProcessor::Squelch(p) => p.input_format(),
            BuiltinProcessor::Convert(p) => p.input_format(),
            BuiltinProcessor::Parser(p) => p.input_format(),
        }
    }

    pub fn output_format(&self) -> Format {
        match self {
            BuiltinProcessor::Shift(p) => p.output_format(),
            BuiltinProcessor::FirDecimate(p) => p.output_format(),
            BuiltinProcessor::Fractional(p) => p.output_format(),
            BuiltinProcessor::Bandpass(p) => p.output_format(),
            BuiltinProcessor::Squelch(p) => p.output_format(),
            BuiltinProcessor::Convert(p) => p.output_format(),
            BuiltinProcessor::Parser(p) => p.output_format(),
        }
    }

    pub fn process(&mut self, input: Block) -> Option<Block> {
        match self {
            BuiltinProcessor::Shift(p) => p.process(input),
            BuiltinProcessor::FirDecimate(p) => p.process(input),
            BuiltinProcessor::Fractional(p) => p.process(input),
            BuiltinProcessor::Bandpass(p) => p.process(input),
            BuiltinProcessor::Squelch(p) => p.process(input),
            BuiltinProcessor::Convert(p) => p.process(input),
            BuiltinProcessor::Parser(p) => p.process(input),
        }
    }
}

macro_rules! impl_from_builtin {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for BuiltinProcessor {
                fn from(p: $ty) -> Self {
                    BuiltinProcessor::$variant(p)
                }
            }
        )*
    };
}

impl_from_builtin! {
    Shift => ShiftStage,
    FirDecimate => FirDecimator,
    Fractional => FractionalDecimator,
    Bandpass => BandpassStage,
    Squelch => SquelchStage,
    Convert => ConvertStage,
    Parser => LineParser,
}

/// Wrapper that holds either a builtin processor or a plugin.
pub enum AnyProcessor {
    Builtin(BuiltinProcessor),
    Plugin(Box<dyn Processor>),
}

impl AnyProcessor {
    pub fn name(&self) -> &str {
        match self {
            AnyProcessor::Builtin(p) => p.name(),
            AnyProcessor::Plugin(p) => p.name(),
        }
    }

    pub fn kind(&self) -> StageKind {
        match self {
            AnyProcessor::Builtin(p) => p.kind(),
            AnyProcessor::Plugin(p) => p.kind(),
        }
    }

    pub fn input_format(&self) -> Format {
        match self {
            AnyProcessor::Builtin(p) => p.input_format(),
            AnyProcessor::Plugin(p) => p.input_format(),
        }
    }

    pub fn output_format(&self) -> Format {
        match self {
            AnyProcessor::Builtin(p) => p.output_format(),
            AnyProcessor::Plugin(p) => p.output_format(),
        }
    }

    pub fn process(&mut self, input: Block) -> Option<Block> {
        match self {
            AnyProcessor::Builtin(p) => p.process(input),
            AnyProcessor::Plugin(p) => p.process(input),
        }
    }
}

enum StageBody {
    Processor(AnyProcessor),
    Exec(ExecStage),
}

/// A stage that has not been wired into a pipeline yet.
pub struct Stage {
    name: String,
    kind: StageKind,
    input: Format,
    output: Format,
    body: StageBody,
}

impl Stage {
    /// Wrap a builtin processor.
    pub fn new(processor: impl Into<BuiltinProcessor>) -> Self {
        Self::from_processor(AnyProcessor::Builtin(processor.into()))
    }

    /// Wrap a user-supplied processor.
    pub fn plugin(processor: Box<dyn Processor>) -> Self {
        Self::from_processor(AnyProcessor::Plugin(processor))
    }

    /// Wrap an external process.
    pub fn exec(exec: ExecStage) -> Self {
        Self {
            name: exec.name().to_string(),
            kind: StageKind::Exec,
            input: exec.input_format(),
            output: exec.output_format(),
            body: StageBody::Exec(exec),
        }
    }

    fn from_processor(processor: AnyProcessor) -> Self {
        Self {
            name: processor.name().to_string(),
            kind: processor.kind(),
            input: processor.input_format(),
            output: processor.output_format(),
            body: StageBody::Processor(processor),
        }
    }

    /// Override the display name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn input_format(&self) -> Format {
        self.input
    }

    pub fn output_format(&self) -> Format {
        self.output
    }

    pub fn info(&self, id: StageId) -> StageInfo {
        StageInfo {
            id,
            name: self.name.clone(),
            kind: self.kind,
            input: self.input,
            output: self.output,
        }
    }

    /// Spawn the stage's worker threads.
    pub(crate) fn start(self, id: StageId, inlet: Inlet, outlet: Outlet) -> PipelineResult<StageHandle> {
        let info = self.info(id);
        let stop = Arc::new(AtomicBool::new(false));

        let (threads, exec) = match self.body {
            StageBody::Processor(processor) => {
                let handle = spawn_processor(&info, processor, inlet.clone(), outlet.clone(), stop.clone())?;
                (vec![handle], None)
            }
            StageBody::Exec(exec) => {
                let (runtime, threads) = exec.launch(&info, inlet.clone(), outlet.clone(), stop.clone())?;
                (threads, Some(runtime))
            }
        };

        tracing::debug!("Started stage '{}' ({:?})", info.name, id);
        Ok(StageHandle {
            info,
            inlet,
            outlet,
            stop,
            threads,
            exec,
        })
    }
}

fn spawn_processor(
    info: &StageInfo,
    mut processor: AnyProcessor,
    inlet: Inlet,
    outlet: Outlet,
    stop: Arc<AtomicBool>,
) -> PipelineResult<JoinHandle<()>> {
    let name = info.name.clone();
    let input = info.input;
    let handle = std::thread::Builder::new()
        .name(format!("stage-{}", name))
        .spawn(move || {
            let mut mismatches = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let Some(block) = inlet.recv_timeout(RECV_POLL) else {
                    continue;
                };
                if block.format() != input {
                    mismatches += 1;
                    if mismatches == 1 {
                        tracing::warn!(
                            "Stage '{}' expected {} but received {}, dropping",
                            name,
                            input,
                            block.format()
                        );
                    }
                    continue;
                }
                if let Some(out) = processor.process(block) {
                    if !out.is_empty() && !outlet.send(out, &stop) {
                        break;
                    }
                }
            }
            tracing::trace!("Stage '{}' worker exiting", name);
        })?;
    Ok(handle)
}

/// A running stage owned by a pipeline.
pub struct StageHandle {
    info: StageInfo,
    inlet: Inlet,
    outlet: Outlet,
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    exec: Option<ExecRuntime>,
}

impl StageHandle {
    pub fn info(&self) -> &StageInfo {
        &self.info
    }

    pub fn inlet(&self) -> &Inlet {
        &self.inlet
    }

    pub fn outlet(&self) -> &Outlet {
        &self.outlet
    }

    /// Ask the worker threads to stop without waiting for them.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Stop the stage, terminate its process if any, and release its conduits.
    pub fn shutdown(mut self) {
        if let Some(exec) = self.exec.as_mut() {
            exec.shutdown(&self.stop);
        }
        self.request_stop();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Stage '{}' worker panicked", self.info.name);
            }
        }
        self.inlet.replace(None);
        self.outlet.close();
        tracing::debug!("Stopped stage '{}' ({:?})", self.info.name, self.info.id);
    }
}
