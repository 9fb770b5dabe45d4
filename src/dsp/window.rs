//! Window functions used for FIR filter design

use std::f64::consts::PI;

/// Taper applied to an ideal (sinc) impulse response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowFunction {
    Rectangular,
    Hann,
    /// Decimation and bandpass stages design with this one
    #[default]
    Hamming,
    Blackman,
}

impl WindowFunction {
    /// Symmetric taper at tap `i` of an `n`-tap filter
    pub fn coefficient(&self, i: usize, n: usize) -> f64 {
        if n <= 1 {
            return 1.0;
        }
        let phase = 2.0 * PI * i as f64 / (n - 1) as f64;

        match self {
            WindowFunction::Rectangular => 1.0,
            WindowFunction::Hann => 0.5 - 0.5 * phase.cos(),
            WindowFunction::Hamming => 0.54 - 0.46 * phase.cos(),
            // Rounds to -ε at the endpoints without the clamp
            WindowFunction::Blackman => (0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos()).max(0.0),
        }
    }

    /// Multiply `taps` in place by the window
    pub fn apply(&self, taps: &mut [f64]) {
        let n = taps.len();
        for (i, tap) in taps.iter_mut().enumerate() {
            *tap *= self.coefficient(i, n);
        }
    }
}
