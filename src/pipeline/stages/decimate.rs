//! Integer FIR decimation and fractional resampling

use crate::dsp::{lowpass, WindowFunction};
use crate::pipeline::stage::{Processor, StageKind};
use crate::types::{Block, Complex32, Format};

/// Lowpass FIR filter that keeps every `decimation`-th output
pub struct FirDecimator {
    decimation: usize,
    transition: f64,
    cutoff: f64,
    taps: Vec<f32>,
    history: Vec<Complex32>,
    /// Offset into `history` of the next output window
    next: usize,
}

impl FirDecimator {
    /// `transition` is relative to the input rate; `cutoff` is relative to the
    /// output rate (0.5 = output Nyquist).
    pub fn new(decimation: usize, transition: f64, cutoff: f64) -> Self {
        let decimation = decimation.max(1);
        let taps = lowpass(cutoff / decimation as f64, transition, WindowFunction::Hamming);
        Self {
            decimation,
            transition,
            cutoff,
            taps,
            history: Vec::new(),
            next: 0,
        }
    }

    pub fn decimation(&self) -> usize {
        self.decimation
    }

    pub fn transition(&self) -> f64 {
        self.transition
    }

    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    pub fn taps(&self) -> &[f32] {
        &self.taps
    }

    fn decimate(&mut self, input: Vec<Complex32>) -> Vec<Complex32> {
        let mut buffer = std::mem::take(&mut self.history);
        buffer.extend(input);

        let n = self.taps.len();
        let mut out = Vec::with_capacity(buffer.len() / self.decimation + 1);
        let mut pos = self.next;
        while pos + n <= buffer.len() {
            let window = &buffer[pos..pos + n];
            let acc = window
                .iter()
                .zip(&self.taps)
                .fold(Complex32::new(0.0, 0.0), |acc, (s, &t)| acc + *s * t);
            out.push(acc);
            pos += self.decimation;
        }

        let keep_from = pos.min(buffer.len());
        self.next = pos - keep_from;
        buffer.drain(..keep_from);
        self.history = buffer;
        out
    }
}

impl Processor for FirDecimator {
    fn name(&self) -> &str {
        "fir_decimate"
    }

    fn kind(&self) -> StageKind {
        StageKind::FirDecimate
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
        let out = self.decimate(samples);
        (!out.is_empty()).then_some(Block::ComplexFloat(out))
    }
}

/// Resamples by a non-integer ratio using linear interpolation
///
/// The input is expected to be band-limited already (the preceding FIR
/// decimator's cutoff is lowered accordingly).
pub struct FractionalDecimator {
    ratio: f64,
    position: f64,
    last: Option<Complex32>,
}

impl FractionalDecimator {
    /// `ratio` is input rate over output rate, `>= 1.0`
    pub fn new(ratio: f64) -> Self {
        Self {
            ratio: ratio.max(1.0),
            position: 0.0,
            last: None,
        }
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    fn resample(&mut self, input: Vec<Complex32>) -> Vec<Complex32> {
        let mut buffer = Vec::with_capacity(input.len() + 1);
        buffer.extend(self.last);
        buffer.extend(input);
        if buffer.len() < 2 {
            self.last = buffer.last().copied();
            return Vec::new();
        }

        let end = (buffer.len() - 1) as f64;
        let mut out = Vec::with_capacity((end / self.ratio) as usize + 1);
        while self.position < end {
            let index = self.position.floor() as usize;
            let frac = (self.position - index as f64) as f32;
            out.push(buffer[index] * (1.0 - frac) + buffer[index + 1] * frac);
            self.position += self.ratio;
        }

        self.position -= end;
        self.last = buffer.last().copied();
        out
    }
}

impl Processor for FractionalDecimator {
    fn name(&self) -> &str {
        "fractional_decimator"
    }

    fn kind(&self) -> StageKind {
        StageKind::FractionalDecimator
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
        let out = self.resample(samples);
        (!out.is_empty()).then_some(Block::ComplexFloat(out))
    }
}
