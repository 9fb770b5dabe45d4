//! Windowed-sinc filter design
//!
//! All frequencies are normalized to the sample rate the filter runs at
//! (`0.5` is Nyquist). Transition widths use the same normalization.

use crate::dsp::window::WindowFunction;
use crate::types::Complex32;
use std::f64::consts::PI;

/// Upper bound on designed filter length
pub const MAX_TAPS: usize = 16_383;

/// Number of taps needed for a given normalized transition width (always odd)
pub fn estimate_taps(transition: f64) -> usize {
    if !transition.is_finite() || transition <= 0.0 {
        return MAX_TAPS;
    }
    let taps = ((4.0 / transition).ceil() as usize).clamp(1, MAX_TAPS);
    if taps % 2 == 0 {
        taps + 1
    } else {
        taps
    }
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Real lowpass with unity DC gain
pub fn lowpass(cutoff: f64, transition: f64, window: WindowFunction) -> Vec<f32> {
    let n = estimate_taps(transition);
    let middle = (n / 2) as f64;
    let raw: Vec<f64> = (0..n)
        .map(|i| {
            let t = i as f64 - middle;
            2.0 * cutoff * sinc(2.0 * cutoff * t) * window.coefficient(i, n)
        })
        .collect();

    let gain: f64 = raw.iter().sum();
    let gain = if gain.abs() > 1e-12 { gain } else { 1.0 };
    raw.iter().map(|&c| (c / gain) as f32).collect()
}

/// Complex bandpass passing `low..high` (may be asymmetric or negative)
pub fn bandpass(low: f64, high: f64, transition: f64, window: WindowFunction) -> Vec<Complex32> {
    let (low, high) = if low <= high { (low, high) } else { (high, low) };
    let half_width = (high - low) / 2.0;
    let center = (high + low) / 2.0;

    let prototype = lowpass(half_width, transition, window);
    let middle = (prototype.len() / 2) as f64;
    prototype
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let phase = 2.0 * PI * center * (i as f64 - middle);
            Complex32::new(c * phase.cos() as f32, c * phase.sin() as f32)
        })
        .collect()
}
