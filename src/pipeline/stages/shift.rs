//! Frequency shift (complex rotator)

use crate::pipeline::stage::{Processor, StageKind};
use crate::types::{Block, Complex32, Format};
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Live handle to a shift stage's rotation rate
#[derive(Debug, Clone, Default)]
pub struct ShiftControl {
    rate: Arc<AtomicU64>,
}

impl ShiftControl {
    /// Rotation in cycles per sample (normalized to the stage's sample rate)
    pub fn set_rate(&self, rate: f64) {
        self.rate.store(rate.to_bits(), Ordering::Relaxed);
    }

    pub fn rate(&self) -> f64 {
        f64::from_bits(self.rate.load(Ordering::Relaxed))
    }
}

/// Multiplies a complex stream by `e^(j·2π·rate·n)`
pub struct ShiftStage {
    control: ShiftControl,
    phase: f64,
}

impl ShiftStage {
    pub fn new(rate: f64) -> Self {
        let control = ShiftControl::default();
        control.set_rate(rate);
        Self { control, phase: 0.0 }
    }

    pub fn control(&self) -> ShiftControl {
        self.control.clone()
    }

    fn rotate(&mut self, samples: &mut [Complex32]) {
        let rate = self.control.rate();
        if rate == 0.0 {
            return;
        }
        for sample in samples.iter_mut() {
            let (sin, cos) = (TAU * self.phase).sin_cos();
            *sample *= Complex32::new(cos as f32, sin as f32);
            self.phase += rate;
            self.phase -= self.phase.floor();
        }
    }
}

impl Processor for ShiftStage {
    fn name(&self) -> &str {
        "shift"
    }

    fn kind(&self) -> StageKind {
        StageKind::Shift
    }

    fn input_format(&self) -> Format {
        Format::ComplexFloat
    }

    fn output_format(&self) -> Format {
        Format::ComplexFloat
    }

    fn process(&mut self, input: Block) -> Option<Block> {
        let Block::ComplexFloat(mut samples) = input else {
            return None;
        };
        self.rotate(&mut samples);
        Some(Block::ComplexFloat(samples))
    }
}
