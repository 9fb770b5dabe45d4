//! Sample format conversion

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::stage::{Processor, StageKind};
use crate::types::{Block, Complex32, ComplexShort, Format};

const SHORT_SCALE: f32 = 32767.0;

fn to_short(x: f32) -> i16 {
    (x * SHORT_SCALE).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

fn from_short(x: i16) -> f32 {
    x as f32 / SHORT_SCALE
}

/// Converts between float and 16-bit integer samples (real or complex)
pub struct ConvertStage {
    from: Format,
    to: Format,
}

impl ConvertStage {
    pub fn new(from: Format, to: Format) -> PipelineResult<Self> {
        if Self::supports(from, to) {
            Ok(Self { from, to })
        } else {
            Err(PipelineError::UnsupportedConversion { from, to })
        }
    }

    pub fn supports(from: Format, to: Format) -> bool {
        matches!(
            (from, to),
            (Format::ComplexFloat, Format::ComplexShort)
                | (Format::ComplexShort, Format::ComplexFloat)
                | (Format::Float, Format::Short)
                | (Format::Short, Format::Float)
        )
    }
}

impl Processor for ConvertStage {
    fn name(&self) -> &str {
        "convert"
    }

    fn kind(&self) -> StageKind {
        StageKind::Convert
    }

    fn input_format(&self) -> Format {
        self.from
    }

    fn output_format(&self) -> Format {
        self.to
    }

    fn process(&mut self, input: Block) -> Option<Block> {
        let out = match input {
            Block::ComplexFloat(v) if self.to == Format::ComplexShort => Block::ComplexShort(
                v.into_iter()
                    .map(|c| ComplexShort::new(to_short(c.re), to_short(c.im)))
                    .collect(),
            ),
            Block::ComplexShort(v) if self.to == Format::ComplexFloat => Block::ComplexFloat(
                v.into_iter()
                    .map(|c| Complex32::new(from_short(c.re), from_short(c.im)))
                    .collect(),
            ),
            Block::Float(v) if self.to == Format::Short => {
                Block::Short(v.into_iter().map(to_short).collect())
            }
            Block::Short(v) if self.to == Format::Float => {
                Block::Float(v.into_iter().map(from_short).collect())
            }
            _ => return None,
        };
        Some(out)
    }
}
