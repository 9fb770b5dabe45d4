//! Numeric helpers for the builtin DSP stages
//!
//! - Window functions ([`WindowFunction`])
//! - Windowed-sinc lowpass / complex bandpass design

pub mod filter;
pub mod window;

pub use filter::{bandpass, estimate_taps, lowpass, MAX_TAPS};
pub use window::WindowFunction;

/// Convert a level in dB to a linear power ratio
pub fn db_to_power(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

/// Convert a linear power ratio to dB, flooring at -150 dB
pub fn power_to_db(power: f64) -> f64 {
    if power <= 0.0 {
        return -150.0;
    }
    (10.0 * power.log10()).max(-150.0)
}
