//! Parameter derivation for the frequency selector.
//!
//! Every derived value is a pure function of the selector's rates and band
//! edges; the selector recomputes a whole plan on every change and never
//! patches one incrementally.

use crate::pipeline::stages::SquelchParams;

/// Squelch power measurements per second of output
pub const MEASUREMENTS_PER_SEC: u32 = 16;
/// Squelch level reports per second
pub const READINGS_PER_SEC: u32 = 4;
/// Sample decimation used inside the squelch power estimate
pub const SQUELCH_DECIMATION: usize = 5;
/// Bandpass transition width in Hz at the output rate
pub const BANDPASS_TRANSITION_HZ: f64 = 320.0;

/// Integer + fractional decimation from `input_rate` down to `output_rate`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecimationPlan {
    pub input_rate: u32,
    pub output_rate: u32,
    /// Integer factor applied by the FIR stage
    pub decimation: usize,
    /// Residual ratio applied by the fractional stage (1.0 = none)
    pub ratio: f64,
    /// FIR transition width, relative to the input rate
    pub transition: f64,
    /// FIR cutoff, relative to the FIR stage's output rate
    pub cutoff: f64,
    /// The requested output rate was out of range and has been clamped
    pub clamped: bool,
}

impl DecimationPlan {
    pub fn derive(input_rate: u32, output_rate: u32) -> Self {
        let mut output = output_rate;
        let mut clamped = false;
        if output == 0 || output > input_rate {
            tracing::error!(
                "Decimation output rate {} is not within (0, {}], clamping to input rate",
                output_rate,
                input_rate
            );
            output = input_rate;
            clamped = true;
        }

        if input_rate == 0 {
            return Self {
                input_rate,
                output_rate: output,
                decimation: 1,
                ratio: 1.0,
                transition: 0.15,
                cutoff: 0.5,
                clamped,
            };
        }

        let input = input_rate as f64;
        let out = output as f64;
        let decimation = ((input / out).floor() as usize).max(1);
        let ratio = (input / decimation as f64) / out;
        Self {
            input_rate,
            output_rate: output,
            decimation,
            ratio,
            transition: 0.15 * (out / input),
            cutoff: 0.5 * decimation as f64 / (input / out),
            clamped,
        }
    }

    /// Rate between the FIR stage and the fractional stage
    pub fn intermediate_rate(&self) -> f64 {
        self.input_rate as f64 / self.decimation as f64
    }

    pub fn has_fractional(&self) -> bool {
        self.ratio != 1.0
    }
}

/// Block sizing of the squelch stage for a given output rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SquelchPlan {
    pub length: usize,
    pub decimation: usize,
    pub hang_length: usize,
    pub flush_length: usize,
    pub report_interval: usize,
}

impl SquelchPlan {
    pub fn derive(output_rate: u32) -> Self {
        let length = ((output_rate / MEASUREMENTS_PER_SEC) as usize).max(1);
        Self {
            length,
            decimation: SQUELCH_DECIMATION,
            hang_length: 2 * length,
            flush_length: 5 * length,
            report_interval: (MEASUREMENTS_PER_SEC / READINGS_PER_SEC) as usize,
        }
    }

    pub fn params(&self) -> SquelchParams {
        SquelchParams {
            length: self.length,
            decimation: self.decimation,
            hang_length: self.hang_length,
            flush_length: self.flush_length,
            report_interval: self.report_interval,
        }
    }
}

/// Normalized bandpass edges for a channel at `output_rate`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandpassPlan {
    pub low: f64,
    pub high: f64,
    pub transition: f64,
}

impl BandpassPlan {
    /// `low_cut`/`high_cut` are in Hz relative to the channel center.
    pub fn derive(low_cut: f64, high_cut: f64, output_rate: u32) -> Self {
        let rate = output_rate.max(1) as f64;
        Self {
            low: low_cut / rate,
            high: high_cut / rate,
            transition: BANDPASS_TRANSITION_HZ / rate,
        }
    }
}

/// Rotation rate of the shift stage, in cycles per input sample
pub fn shift_rate(frequency_offset: f64, input_rate: u32) -> f64 {
    if input_rate == 0 {
        return 0.0;
    }
    -frequency_offset / input_rate as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_integer_decimation() {
        let plan = DecimationPlan::derive(2_400_000, 12_000);
        assert_eq!(plan.decimation, 200);
        assert_eq!(plan.ratio, 1.0);
        assert!(!plan.has_fractional());
        assert!((plan.transition - 0.00075).abs() < 1e-12);
        assert!((plan.cutoff - 0.5).abs() < 1e-12);
        assert!(!plan.clamped);
    }

    #[test]
    fn test_fractional_decimation() {
        let plan = DecimationPlan::derive(2_400_000, 48_000 - 1_000);
        assert_eq!(plan.decimation, 51);
        assert!(plan.has_fractional());
        assert!((plan.ratio - (2_400_000.0 / 51.0) / 47_000.0).abs() < 1e-12);
        // Cutoff sits below the FIR stage's Nyquist so the fractional stage needs no filter
        assert!(plan.cutoff < 0.5);
    }

    #[test]
    fn test_output_above_input_is_clamped() {
        let plan = DecimationPlan::derive(48_000, 96_000);
        assert!(plan.clamped);
        assert_eq!(plan.output_rate, 48_000);
        assert_eq!(plan.decimation, 1);
        assert_eq!(plan.ratio, 1.0);
        assert!(!plan.has_fractional());
    }

    #[test]
    fn test_zero_output_is_clamped() {
        let plan = DecimationPlan::derive(48_000, 0);
        assert!(plan.clamped);
        assert_eq!(plan.decimation, 1);
    }

    #[test]
    fn test_squelch_plan() {
        let plan = SquelchPlan::derive(12_000);
        assert_eq!(plan.length, 750);
        assert_eq!(plan.decimation, 5);
        assert_eq!(plan.hang_length, 1500);
        assert_eq!(plan.flush_length, 3750);
        assert_eq!(plan.report_interval, 4);
    }

    #[test]
    fn test_bandpass_plan() {
        let plan = BandpassPlan::derive(-4000.0, 4000.0, 16_000);
        assert_eq!(plan.low, -0.25);
        assert_eq!(plan.high, 0.25);
        assert_eq!(plan.transition, 0.02);
    }

    #[test]
    fn test_shift_rate() {
        assert_eq!(shift_rate(100_000.0, 1_000_000), -0.1);
        assert_eq!(shift_rate(-250_000.0, 1_000_000), 0.25);
        assert_eq!(shift_rate(1.0, 0), 0.0);
    }

    proptest! {
        #[test]
        fn prop_decimation_bounds(input in 1_000u32..20_000_000, divisor in 1u32..2_000) {
            let output = (input / divisor).max(1);
            let plan = DecimationPlan::derive(input, output);
            let d = plan.decimation as f64;
            prop_assert!(!plan.clamped);
            prop_assert!((d * plan.intermediate_rate() - input as f64).abs() < 1e-6 * input as f64);
            prop_assert!(plan.ratio >= 1.0);
            prop_assert!(plan.ratio < (plan.decimation + 1) as f64 / plan.decimation as f64 + 1e-9);
        }

        #[test]
        fn prop_derivation_is_idempotent(input in 1_000u32..20_000_000, output in 1u32..20_000_000) {
            let first = DecimationPlan::derive(input, output);
            let again = DecimationPlan::derive(first.input_rate, first.output_rate);
            prop_assert_eq!(first.decimation, again.decimation);
            prop_assert_eq!(first.ratio, again.ratio);
            prop_assert_eq!(first.transition, again.transition);
            prop_assert_eq!(first.cutoff, again.cutoff);
            prop_assert!(!again.clamped);
        }

        #[test]
        fn prop_clamp_never_decimates(input in 1u32..10_000_000, extra in 1u32..10_000_000) {
            let plan = DecimationPlan::derive(input, input.saturating_add(extra));
            prop_assert!(plan.clamped);
            prop_assert_eq!(plan.decimation, 1);
            prop_assert_eq!(plan.ratio, 1.0);
        }
    }
}
