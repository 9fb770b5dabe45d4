//! Complex bandpass using FFT overlap-add convolution

use crate::dsp::{bandpass, estimate_taps, WindowFunction};
use crate::pipeline::stage::{Processor, StageKind};
use crate::types::{Block, Complex32, Format};
use rustfft::{Fft, FftPlanner};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const MIN_FFT_SIZE: usize = 1024;

/// Live handle to a bandpass stage's cut-off frequencies
#[derive(Debug, Clone, Default)]
pub struct BandpassControl {
    low: Arc<AtomicU64>,
    high: Arc<AtomicU64>,
    generation: Arc<AtomicU64>,
}

impl BandpassControl {
    /// Cut-offs are normalized to the stage's sample rate
    pub fn set_bandpass(&self, low: f64, high: f64) {
        self.low.store(low.to_bits(), Ordering::Relaxed);
        self.high.store(high.to_bits(), Ordering::Relaxed);
        self.generation.fetch_add(1, Ordering::Release);
    }

    pub fn cutoffs(&self) -> (f64, f64) {
        (
            f64::from_bits(self.low.load(Ordering::Relaxed)),
            f64::from_bits(self.high.load(Ordering::Relaxed)),
        )
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

pub struct BandpassStage {
    control: BandpassControl,
    seen_generation: u64,
    transition: f64,
    fft_size: usize,
    block_len: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    response: Vec<Complex32>,
    pending: Vec<Complex32>,
    overlap: Vec<Complex32>,
}

impl BandpassStage {
    pub fn new(low: f64, high: f64, transition: f64) -> Self {
        let taps_len = estimate_taps(transition);
        let fft_size = (2 * taps_len).next_power_of_two().max(MIN_FFT_SIZE);
        let mut planner = FftPlanner::new();
        let control = BandpassControl::default();
        control.set_bandpass(low, high);

        let mut stage = Self {
            seen_generation: control.generation(),
            control,
            transition,
            fft_size,
            block_len: fft_size - taps_len + 1,
            forward: planner.plan_fft_forward(fft_size),
            inverse: planner.plan_fft_inverse(fft_size),
            response: Vec::new(),
            pending: Vec::new(),
            overlap: vec![Complex32::new(0.0, 0.0); taps_len - 1],
        };
        stage.design();
        stage
    }

    pub fn control(&self) -> BandpassControl {
        self.control.clone()
    }

    pub fn transition(&self) -> f64 {
        self.transition
    }

    fn design(&mut self) {
        let (low, high) = self.control.cutoffs();
        let taps = bandpass(low, high, self.transition, WindowFunction::Hamming);
        let mut response = vec![Complex32::new(0.0, 0.0); self.fft_size];
        response[..taps.len()].copy_from_slice(&taps);
        self.forward.process(&mut response);
        self.response = response;
    }

    fn filter(&mut self, input: Vec<Complex32>) -> Vec<Complex32> {
        let generation = self.control.generation();
        if generation != self.seen_generation {
            self.seen_generation = generation;
            self.design();
        }

        self.pending.extend(input);
        let scale = 1.0 / self.fft_size as f32;
        let mut out = Vec::with_capacity(self.pending.len());
        let mut consumed = 0;

        while self.pending.len() - consumed >= self.block_len {
            let mut buffer = vec![Complex32::new(0.0, 0.0); self.fft_size];
            buffer[..self.block_len].copy_from_slice(&self.pending[consumed..consumed + self.block_len]);
            consumed += self.block_len;

            self.forward.process(&mut buffer);
            for (bin, h) in buffer.iter_mut().zip(&self.response) {
                *bin *= *h * scale;
            }
            self.inverse.process(&mut buffer);

            for (sample, tail) in buffer.iter_mut().zip(&self.overlap) {
                *sample += *tail;
            }
            out.extend_from_slice(&buffer[..self.block_len]);
            self.overlap.copy_from_slice(&buffer[self.block_len..]);
        }

        self.pending.drain(..consumed);
        out
    }
}

impl Processor for BandpassStage {
    fn name(&self) -> &str {
        "bandpass"
    }

    fn kind(&self) -> StageKind {
        StageKind::Bandpass
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
        let out = self.filter(samples);
        (!out.is_empty()).then_some(Block::ComplexFloat(out))
    }
}
