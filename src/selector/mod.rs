//! Frequency selector: shift, decimate, band-limit and squelch a wideband
//! complex stream down to one channel.
//!
//! ```text
//! [Shift] ──► [FirDecimate] ──► ([Fractional]) ──► ([Bandpass]) ──► ([Squelch])
//! ```
//!
//! Rate changes go through [`Pipeline::replace`]/[`Pipeline::insert`]/
//! [`Pipeline::remove`]; the frequency offset only touches the shift stage's
//! rotation rate.

pub mod plan;

pub use plan::{shift_rate, BandpassPlan, DecimationPlan, SquelchPlan};

use crate::dsp::db_to_power;
use crate::pipeline::stages::{
    BandpassControl, BandpassStage, FirDecimator, FractionalDecimator, ShiftControl, ShiftStage,
    SquelchControl, SquelchStage,
};
use crate::pipeline::{Pipeline, PipelineResult, Stage, StageKind};
use crate::pipeline::conduit::lock;
use crossbeam_channel::Sender;
use std::sync::Mutex;

struct SelectorState {
    plan: DecimationPlan,
    /// Output rate as last requested; the plan holds the clamped one
    requested_output_rate: u32,
    frequency_offset: f64,
    bandpass: Option<(f64, f64)>,
    bandpass_control: Option<BandpassControl>,
    squelch: Option<SquelchControl>,
    squelch_level: Option<f64>,
    power_writer: Option<Sender<f32>>,
}

/// Pipeline specialization selecting one channel from a wideband stream.
pub struct Selector {
    pipeline: Pipeline,
    shift: ShiftControl,
    state: Mutex<SelectorState>,
}

impl Selector {
    pub fn new(input_rate: u32, output_rate: u32, frequency_offset: f64, with_squelch: bool) -> PipelineResult<Self> {
        let plan = DecimationPlan::derive(input_rate, output_rate);
        let shift = ShiftStage::new(shift_rate(frequency_offset, input_rate));
        let shift_control = shift.control();

        let mut stages = vec![Stage::new(shift), fir_stage(&plan)];
        if plan.has_fractional() {
            stages.push(Stage::new(FractionalDecimator::new(plan.ratio)));
        }
        let mut squelch = None;
        if with_squelch {
            let stage = SquelchStage::new(SquelchPlan::derive(plan.output_rate).params());
            squelch = Some(stage.control());
            stages.push(Stage::new(stage));
        }

        let pipeline = Pipeline::build("selector", stages)?;
        tracing::debug!(
            "Selector {} -> {} Hz: decimation {}, ratio {}",
            plan.input_rate,
            plan.output_rate,
            plan.decimation,
            plan.ratio
        );
        Ok(Self {
            pipeline,
            shift: shift_control,
            state: Mutex::new(SelectorState {
                plan,
                requested_output_rate: output_rate,
                frequency_offset,
                bandpass: None,
                bandpass_control: None,
                squelch,
                squelch_level: None,
                power_writer: None,
            }),
        })
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn plan(&self) -> DecimationPlan {
        lock(&self.state).plan
    }

    pub fn input_rate(&self) -> u32 {
        lock(&self.state).plan.input_rate
    }

    pub fn output_rate(&self) -> u32 {
        lock(&self.state).plan.output_rate
    }

    pub fn frequency_offset(&self) -> f64 {
        lock(&self.state).frequency_offset
    }

    pub fn bandpass(&self) -> Option<(f64, f64)> {
        lock(&self.state).bandpass
    }

    pub fn squelch_level(&self) -> Option<f64> {
        lock(&self.state).squelch_level
    }

    // ── Live reconfiguration ──

    pub fn set_frequency_offset(&self, frequency_offset: f64) {
        let mut state = lock(&self.state);
        state.frequency_offset = frequency_offset;
        self.shift
            .set_rate(shift_rate(frequency_offset, state.plan.input_rate));
    }

    pub fn set_input_rate(&self, input_rate: u32) -> PipelineResult<()> {
        let mut state = lock(&self.state);
        if state.plan.input_rate == input_rate {
            return Ok(());
        }
        let previous_output = state.plan.output_rate;
        let plan = DecimationPlan::derive(input_rate, state.requested_output_rate);
        self.apply_decimation(&mut state, plan)?;
        self.shift
            .set_rate(shift_rate(state.frequency_offset, input_rate));
        if plan.output_rate != previous_output {
            self.rebuild_output_stages(&mut state, plan.output_rate)?;
        }
        Ok(())
    }

    pub fn set_output_rate(&self, output_rate: u32) -> PipelineResult<()> {
        let mut state = lock(&self.state);
        if state.requested_output_rate == output_rate {
            return Ok(());
        }
        state.requested_output_rate = output_rate;
        let previous_output = state.plan.output_rate;
        let plan = DecimationPlan::derive(state.plan.input_rate, output_rate);
        if plan.output_rate == previous_output {
            return Ok(());
        }
        self.apply_decimation(&mut state, plan)?;
        self.rebuild_output_stages(&mut state, plan.output_rate)
    }

    /// Rebuild the bandpass and squelch stages, if present, for a new output rate.
    fn rebuild_output_stages(&self, state: &mut SelectorState, output_rate: u32) -> PipelineResult<()> {
        if let Some((low, high)) = state.bandpass {
            if let Some(index) = self.pipeline.index_of_kind(StageKind::Bandpass) {
                let (stage, control) = bandpass_stage(low, high, output_rate);
                self.pipeline.replace(index, stage)?;
                state.bandpass_control = Some(control);
            }
        }

        if let Some(index) = self.pipeline.index_of_kind(StageKind::Squelch) {
            let stage = SquelchStage::new(SquelchPlan::derive(output_rate).params());
            let control = stage.control();
            if let Some(db) = state.squelch_level {
                control.set_level(db_to_power(db));
            }
            control.set_power_writer(state.power_writer.clone());
            self.pipeline.replace(index, Stage::new(stage))?;
            state.squelch = Some(control);
        }
        Ok(())
    }

    /// Band-limit the channel to `low..high` Hz around its center, or remove the
    /// bandpass with `None`.
    pub fn set_bandpass(&self, band: Option<(f64, f64)>) -> PipelineResult<()> {
        let mut state = lock(&self.state);
        let existing = self.pipeline.index_of_kind(StageKind::Bandpass);
        match (band, existing) {
            (Some((low, high)), Some(_)) => {
                let plan = BandpassPlan::derive(low, high, state.plan.output_rate);
                if let Some(control) = &state.bandpass_control {
                    control.set_bandpass(plan.low, plan.high);
                }
            }
            (Some((low, high)), None) => {
                let index = self.decimation_end();
                let (stage, control) = bandpass_stage(low, high, state.plan.output_rate);
                self.pipeline.insert(index, stage)?;
                state.bandpass_control = Some(control);
            }
            (None, Some(index)) => {
                self.pipeline.remove(index)?;
                state.bandpass_control = None;
            }
            (None, None) => {}
        }
        state.bandpass = band;
        Ok(())
    }

    /// Squelch threshold in dB, `None` to open the squelch.
    pub fn set_squelch_level(&self, level_db: Option<f64>) {
        let mut state = lock(&self.state);
        state.squelch_level = level_db;
        match &state.squelch {
            Some(control) => control.set_level(level_db.map(db_to_power).unwrap_or(0.0)),
            None => tracing::debug!("Selector has no squelch, level {:?} stored only", level_db),
        }
    }

    /// Receive the squelch's linear power readings.
    pub fn set_power_writer(&self, writer: Option<Sender<f32>>) {
        let mut state = lock(&self.state);
        if let Some(control) = &state.squelch {
            control.set_power_writer(writer.clone());
        }
        state.power_writer = writer;
    }

    pub fn stop(&self) {
        self.pipeline.stop();
    }

    /// Position just past the FIR and fractional stages
    fn decimation_end(&self) -> usize {
        let fir = self.pipeline.index_of_kind(StageKind::FirDecimate).unwrap_or(1);
        match self.pipeline.index_of_kind(StageKind::FractionalDecimator) {
            Some(fractional) => fractional + 1,
            None => fir + 1,
        }
    }

    fn apply_decimation(&self, state: &mut SelectorState, plan: DecimationPlan) -> PipelineResult<()> {
        let fir = self.pipeline.index_of_kind(StageKind::FirDecimate).unwrap_or(1);
        self.pipeline.replace(fir, fir_stage(&plan))?;

        let fractional = self.pipeline.index_of_kind(StageKind::FractionalDecimator);
        match (plan.has_fractional(), fractional) {
            (true, Some(index)) => self
                .pipeline
                .replace(index, Stage::new(FractionalDecimator::new(plan.ratio)))?,
            (true, None) => self
                .pipeline
                .insert(fir + 1, Stage::new(FractionalDecimator::new(plan.ratio)))?,
            (false, Some(index)) => self.pipeline.remove(index)?,
            (false, None) => {}
        }

        tracing::debug!(
            "Selector {} -> {} Hz: decimation {}, ratio {}",
            plan.input_rate,
            plan.output_rate,
            plan.decimation,
            plan.ratio
        );
        state.plan = plan;
        Ok(())
    }
}

fn fir_stage(plan: &DecimationPlan) -> Stage {
    Stage::new(FirDecimator::new(plan.decimation, plan.transition, plan.cutoff))
}

fn bandpass_stage(low: f64, high: f64, output_rate: u32) -> (Stage, BandpassControl) {
    let plan = BandpassPlan::derive(low, high, output_rate);
    let stage = BandpassStage::new(plan.low, plan.high, plan.transition);
    let control = stage.control();
    (Stage::new(stage), control)
}

/// Fixed-rate selector for secondary decoders: a shift followed by a
/// symmetric bandpass of `bandwidth` Hz.
pub struct SecondarySelector {
    pipeline: Pipeline,
    shift: ShiftControl,
    sample_rate: u32,
    bandwidth: f64,
}

impl SecondarySelector {
    pub fn new(sample_rate: u32, bandwidth: f64) -> PipelineResult<Self> {
        let rate = sample_rate.max(1) as f64;
        let shift = ShiftStage::new(0.0);
        let control = shift.control();
        let edge = bandwidth / rate;
        let pipeline = Pipeline::build(
            "secondary-selector",
            vec![Stage::new(shift), Stage::new(BandpassStage::new(-edge, edge, edge))],
        )?;
        Ok(Self {
            pipeline,
            shift: control,
            sample_rate,
            bandwidth,
        })
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    /// `None` keeps the current shift.
    pub fn set_frequency_offset(&self, offset: Option<f64>) {
        let Some(offset) = offset else {
            return;
        };
        self.shift.set_rate(shift_rate(offset, self.sample_rate));
    }

    pub fn stop(&self) {
        self.pipeline.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StageId;
    use crate::types::{Block, Complex32};
    use std::time::Duration;

    fn stage_id(selector: &Selector, kind: StageKind) -> Option<StageId> {
        let infos = selector.pipeline().stage_infos();
        infos.iter().find(|s| s.kind == kind).map(|s| s.id)
    }

    fn kinds(selector: &Selector) -> Vec<StageKind> {
        selector
            .pipeline()
            .stage_infos()
            .iter()
            .map(|s| s.kind)
            .collect()
    }

    #[test]
    fn test_wideband_to_channel() {
        let selector = Selector::new(2_400_000, 12_000, 0.0, false).unwrap();
        let plan = selector.plan();
        assert_eq!(plan.decimation, 200);
        assert_eq!(plan.ratio, 1.0);
        assert_eq!(kinds(&selector), vec![StageKind::Shift, StageKind::FirDecimate]);

        let shift = stage_id(&selector, StageKind::Shift);
        let fir = stage_id(&selector, StageKind::FirDecimate);
        selector.set_output_rate(8_000).unwrap();

        assert_eq!(selector.plan().decimation, 300);
        assert_eq!(kinds(&selector), vec![StageKind::Shift, StageKind::FirDecimate]);
        assert_eq!(stage_id(&selector, StageKind::Shift), shift);
        assert_ne!(stage_id(&selector, StageKind::FirDecimate), fir);
    }

    #[test]
    fn test_fractional_stage_follows_ratio() {
        let selector = Selector::new(2_400_000, 12_000, 0.0, true).unwrap();
        selector.set_output_rate(44_100).unwrap();
        assert!(selector.plan().has_fractional());
        assert_eq!(
            kinds(&selector),
            vec![
                StageKind::Shift,
                StageKind::FirDecimate,
                StageKind::FractionalDecimator,
                StageKind::Squelch
            ]
        );

        selector.set_output_rate(48_000).unwrap();
        assert!(!selector.plan().has_fractional());
        assert_eq!(
            kinds(&selector),
            vec![StageKind::Shift, StageKind::FirDecimate, StageKind::Squelch]
        );
    }

    #[test]
    fn test_clamped_output_rate() {
        let selector = Selector::new(48_000, 96_000, 0.0, false).unwrap();
        assert_eq!(selector.output_rate(), 48_000);
        assert_eq!(selector.plan().decimation, 1);
        assert_eq!(selector.pipeline().index_of_kind(StageKind::FractionalDecimator), None);
    }

    #[test]
    fn test_requested_output_rate_survives_clamp() {
        let selector = Selector::new(48_000, 12_000, 0.0, false).unwrap();
        selector.set_output_rate(96_000).unwrap();
        assert_eq!(selector.output_rate(), 48_000);
        assert_eq!(selector.plan().decimation, 1);

        selector.set_input_rate(2_400_000).unwrap();
        assert_eq!(selector.output_rate(), 96_000);
        assert_eq!(selector.plan().decimation, 25);
        assert!(!selector.plan().clamped);
    }

    #[test]
    fn test_input_rate_clamp_rebuilds_output_stages() {
        let selector = Selector::new(2_400_000, 48_000, 0.0, true).unwrap();
        selector.set_bandpass(Some((-3000.0, 3000.0))).unwrap();
        let bandpass = stage_id(&selector, StageKind::Bandpass);
        let squelch = stage_id(&selector, StageKind::Squelch);

        selector.set_input_rate(24_000).unwrap();
        assert_eq!(selector.output_rate(), 24_000);
        assert_ne!(stage_id(&selector, StageKind::Bandpass), bandpass);
        assert_ne!(stage_id(&selector, StageKind::Squelch), squelch);

        let state = lock(&selector.state);
        let control = state.bandpass_control.as_ref().unwrap();
        let expected = BandpassPlan::derive(-3000.0, 3000.0, 24_000);
        assert_eq!(control.cutoffs(), (expected.low, expected.high));
    }

    #[test]
    fn test_offset_only_touches_shift() {
        let selector = Selector::new(1_000_000, 50_000, 0.0, true).unwrap();
        let ids = selector.pipeline().conduit_ids();
        selector.set_frequency_offset(100_000.0);
        assert_eq!(selector.pipeline().conduit_ids(), ids);
        assert_eq!(selector.shift.rate(), -0.1);

        selector.set_input_rate(2_000_000).unwrap();
        assert_eq!(selector.shift.rate(), -0.05);
        assert_eq!(selector.plan().decimation, 40);
    }

    #[test]
    fn test_bandpass_toggle() {
        let selector = Selector::new(2_400_000, 12_000, 0.0, true).unwrap();
        let len = selector.pipeline().len();

        selector.set_bandpass(Some((-3000.0, 3000.0))).unwrap();
        assert_eq!(selector.pipeline().index_of_kind(StageKind::Bandpass), Some(2));
        assert_eq!(selector.pipeline().index_of_kind(StageKind::Squelch), Some(3));

        selector.set_bandpass(Some((-1000.0, 1000.0))).unwrap();
        assert_eq!(selector.pipeline().len(), len + 1);

        selector.set_output_rate(24_000).unwrap();
        assert_eq!(selector.pipeline().index_of_kind(StageKind::Bandpass), Some(2));

        selector.set_bandpass(None).unwrap();
        assert_eq!(selector.pipeline().index_of_kind(StageKind::Bandpass), None);
        assert_eq!(selector.pipeline().len(), len);
    }

    #[test]
    fn test_squelch_level_survives_rebuild() {
        let selector = Selector::new(240_000, 12_000, 0.0, true).unwrap();
        selector.set_squelch_level(Some(-30.0));
        selector.set_output_rate(24_000).unwrap();

        let state = lock(&selector.state);
        let control = state.squelch.as_ref().unwrap();
        assert!((control.level() - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_samples_flow_through_selector() {
        let selector = Selector::new(48_000, 12_000, 0.0, false).unwrap();
        let tx = selector.pipeline().connect_input(8).unwrap();
        let rx = selector.pipeline().connect_output(8).unwrap();

        let taps = 4096;
        tx.send(Block::ComplexFloat(vec![Complex32::new(1.0, 0.0); taps * 2]))
            .unwrap();
        let out = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!out.is_empty());
        let Block::ComplexFloat(samples) = out else {
            panic!("wrong format");
        };
        // DC passes the lowpass at unity gain
        assert!((samples[samples.len() - 1].re - 1.0).abs() < 0.05);
    }

    #[test]
    fn test_secondary_selector() {
        let secondary = SecondarySelector::new(12_000, 1_500.0).unwrap();
        assert_eq!(secondary.pipeline().len(), 2);
        secondary.set_frequency_offset(Some(1_200.0));
        assert_eq!(secondary.shift.rate(), -0.1);
        secondary.set_frequency_offset(None);
        assert_eq!(secondary.shift.rate(), -0.1);
        secondary.set_frequency_offset(Some(0.0));
        assert_eq!(secondary.shift.rate(), 0.0);
    }
}
