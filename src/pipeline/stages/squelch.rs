//! Block-power squelch with hang time, flush and power reports

use crate::pipeline::stage::{Processor, StageKind};
use crate::types::{Block, Complex32, Format};
use crossbeam_channel::{Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Squelch parameters, all lengths in samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SquelchParams {
    pub length: usize,
    pub decimation: usize,
    pub hang_length: usize,
    pub flush_length: usize,
    /// Power is reported once every `report_interval` blocks
    pub report_interval: usize,
}

/// Live handle to a squelch stage's level and power reporting
#[derive(Clone, Default)]
pub struct SquelchControl {
    level: Arc<AtomicU64>,
    power_writer: Arc<Mutex<Option<Sender<f32>>>>,
}

impl SquelchControl {
    /// Linear power threshold. `0.0` keeps the squelch open.
    pub fn set_level(&self, level: f64) {
        self.level.store(level.to_bits(), Ordering::Relaxed);
    }

    pub fn level(&self) -> f64 {
        f64::from_bits(self.level.load(Ordering::Relaxed))
    }

    /// Destination for periodic linear power readings
    pub fn set_power_writer(&self, writer: Option<Sender<f32>>) {
        *crate::pipeline::conduit::lock(&self.power_writer) = writer;
    }

    fn report(&self, power: f32) {
        let mut writer = crate::pipeline::conduit::lock(&self.power_writer);
        if let Some(tx) = writer.as_ref() {
            if let Err(TrySendError::Disconnected(_)) = tx.try_send(power) {
                *writer = None;
            }
        }
    }
}

impl std::fmt::Debug for SquelchControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SquelchControl")
            .field("level", &self.level())
            .finish()
    }
}

pub struct SquelchStage {
    params: SquelchParams,
    control: SquelchControl,
    pending: Vec<Complex32>,
    hang_remaining: usize,
    flush_remaining: usize,
    blocks_since_report: usize,
}

impl SquelchStage {
    pub fn new(params: SquelchParams) -> Self {
        let params = SquelchParams {
            length: params.length.max(1),
            decimation: params.decimation.max(1),
            report_interval: params.report_interval.max(1),
            ..params
        };
        Self {
            params,
            control: SquelchControl::default(),
            pending: Vec::new(),
            hang_remaining: 0,
            flush_remaining: 0,
            blocks_since_report: 0,
        }
    }

    pub fn params(&self) -> SquelchParams {
        self.params
    }

    pub fn control(&self) -> SquelchControl {
        self.control.clone()
    }

    fn block_power(&self, block: &[Complex32]) -> f32 {
        let mut sum = 0.0f32;
        let mut count = 0usize;
        for sample in block.iter().step_by(self.params.decimation) {
            sum += sample.norm_sqr();
            count += 1;
        }
        if count == 0 {
            0.0
        } else {
            sum / count as f32
        }
    }

    fn gate(&mut self, input: Vec<Complex32>) -> Vec<Complex32> {
        self.pending.extend(input);
        let length = self.params.length;
        let mut out = Vec::new();
        let mut consumed = 0;

        while self.pending.len() - consumed >= length {
            let block = &self.pending[consumed..consumed + length];
            consumed += length;

            let power = self.block_power(block);
            self.blocks_since_report += 1;
            if self.blocks_since_report >= self.params.report_interval {
                self.blocks_since_report = 0;
                self.control.report(power);
            }

            let level = self.control.level();
            if level <= 0.0 || power as f64 >= level {
                self.hang_remaining = self.params.hang_length;
                self.flush_remaining = self.params.flush_length;
                out.extend_from_slice(block);
            } else if self.hang_remaining > 0 {
                self.hang_remaining = self.hang_remaining.saturating_sub(length);
                out.extend_from_slice(block);
            } else if self.flush_remaining > 0 {
                let n = self.flush_remaining.min(length);
                self.flush_remaining -= n;
                out.extend(std::iter::repeat(Complex32::new(0.0, 0.0)).take(n));
            }
        }

        self.pending.drain(..consumed);
        out
    }
}

impl Processor for SquelchStage {
    fn name(&self) -> &str {
        "squelch"
    }

    fn kind(&self) -> StageKind {
        StageKind::Squelch
    }

    fn input_format(&self) -> Format {
        Format::ComplexFloat
    }

    fn output_format(&self) -> Format {
        Format::ComplexFloat
    }

    fn process(&mut self, input: Block) -> Option<Block> {
        let Block::ComplexFloat(samples) = input else {
            return None;
        };
        let out = self.gate(samples);
        (!out.is_empty()).then_some(Block::ComplexFloat(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    fn params() -> SquelchParams {
        SquelchParams {
            length: 10,
            decimation: 5,
            hang_length: 20,
            flush_length: 50,
            report_interval: 4,
        }
    }

    fn signal(amplitude: f32, n: usize) -> Vec<Complex32> {
        vec![Complex32::new(amplitude, 0.0); n]
    }

    #[test]
    fn test_open_when_level_is_zero() {
        let mut squelch = SquelchStage::new(params());
        assert_eq!(squelch.gate(signal(0.001, 25)).len(), 20);
        assert_eq!(squelch.gate(signal(0.001, 5)).len(), 10);
    }

    #[test]
    fn test_hang_then_flush_then_silence() {
        let mut squelch = SquelchStage::new(params());
        squelch.control().set_level(0.5);

        assert_eq!(squelch.gate(signal(1.0, 10)).len(), 10);
        // Two blocks of hang pass the signal through unchanged
        let hang = squelch.gate(signal(0.1, 20));
        assert_eq!(hang, signal(0.1, 20));
        // Flush emits 50 zeros, then nothing
        let flush = squelch.gate(signal(0.1, 100));
        assert_eq!(flush, signal(0.0, 50));
        assert!(squelch.gate(signal(0.1, 100)).is_empty());
    }

    #[test]
    fn test_power_reports() {
        let (tx, rx) = bounded(16);
        let mut squelch = SquelchStage::new(params());
        squelch.control().set_power_writer(Some(tx));
        squelch.gate(signal(2.0, 80));
        let readings: Vec<f32> = rx.try_iter().collect();
        assert_eq!(readings, vec![4.0, 4.0]);
    }
}
