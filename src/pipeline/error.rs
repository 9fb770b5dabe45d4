//! Pipeline-specific error types.

use crate::pipeline::id::StageId;
use crate::types::Format;
use thiserror::Error;

/// Errors that can occur within the pipeline system.
///
/// Every mutation error is returned before any conduit is rewired, so the
/// pipeline is left in its prior valid state.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Format mismatch between '{upstream}' ({output}) and '{downstream}' ({input})")]
    FormatMismatch {
        upstream: String,
        output: Format,
        downstream: String,
        input: Format,
    },

    #[error("No conversion from {from} to {to}")]
    UnsupportedConversion { from: Format, to: Format },

    #[error("Stage index {index} out of range (pipeline length {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Stage {stage_id:?} error: {message}")]
    Stage { stage_id: StageId, message: String },

    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Pipeline is empty")]
    Empty,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pipeline stopped")]
    Stopped,
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
