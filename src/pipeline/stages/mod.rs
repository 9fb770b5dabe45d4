//! Builtin stages.
//!
//! - **DSP**: shift, FIR decimation, fractional resampling, FFT bandpass,
//!   squelch, format conversion.
//! - **Exec**: external tool fed through stdin/stdout.
//! - **Parser**: line-oriented text to structured events.

pub mod bandpass;
pub mod convert;
pub mod decimate;
pub mod exec;
pub mod parser;
pub mod shift;
pub mod squelch;

pub use bandpass::{BandpassControl, BandpassStage};
pub use convert::ConvertStage;
pub use decimate::{FirDecimator, FractionalDecimator};
pub use exec::{ExecOptions, ExecStage};
pub(crate) use exec::ExecRuntime;
pub use parser::{JsonLineDecoder, LineDecoder, LineParser, ParserControl};
pub use shift::{ShiftControl, ShiftStage};
pub use squelch::{SquelchControl, SquelchParams, SquelchStage};
