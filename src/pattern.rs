//! Pattern Gate
//!
//! A pattern module owns no processing unit. When connected it remembers the
//! value its target parameter held at connection time and then writes an
//! on/off value curve straight onto that parameter's automation timeline:
//! the base value for `onTime` seconds, zero for `offTime` seconds, `repeat`
//! times. In looping mode the sequence re-arms itself through a context
//! timer after `(onTime + offTime) * repeat + gap` seconds.
//!
//! Each gate only ever touches the parameters it was connected to, so
//! stopping one gate never disturbs another gate's schedule.

use crate::context::{AudioContext, TimerId, UnitId};
use crate::error::ContextError;
use crate::patch::ModuleConfig;
use serde::Serialize;
use tracing::{debug, trace};

/// Timing of one pattern sequence
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PatternParams {
    pub on_time: f64,
    pub off_time: f64,
    pub repeat: u32,
}

impl Default for PatternParams {
    fn default() -> Self {
        Self {
            on_time: 0.2,
            off_time: 0.1,
            repeat: 3,
        }
    }
}

impl PatternParams {
    pub fn new(on_time: f64, off_time: f64, repeat: u32) -> Self {
        Self {
            on_time: sanitize_duration(on_time),
            off_time: sanitize_duration(off_time),
            repeat,
        }
    }

    /// Read timing from a pattern module configuration
    pub fn from_module(module: &ModuleConfig) -> Self {
        let defaults = Self::default();
        let repeat = module
            .number("repeat")
            .filter(|r| r.is_finite())
            .map_or(defaults.repeat, |r| r.round().max(0.0) as u32);
        Self::new(
            module.number("onTime").unwrap_or(defaults.on_time),
            module.number("offTime").unwrap_or(defaults.off_time),
            repeat,
        )
    }

    /// Length of one full sequence
    pub fn sequence_length(&self) -> f64 {
        (self.on_time + self.off_time) * self.repeat as f64
    }

    /// Update one timing field by its catalog parameter name
    pub fn set(&mut self, name: &str, value: f64) -> bool {
        match name {
            "onTime" => self.on_time = sanitize_duration(value),
            "offTime" => self.off_time = sanitize_duration(value),
            "repeat" if value.is_finite() => self.repeat = value.round().max(0.0) as u32,
            _ => return false,
        }
        true
    }
}

fn sanitize_duration(seconds: f64) -> f64 {
    if seconds.is_finite() {
        seconds.max(0.0)
    } else {
        0.0
    }
}

/// Lifecycle of a pattern gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PatternState {
    /// No target parameter yet
    Idle,
    /// Has targets, nothing scheduled
    Connected,
    /// Sequence scheduled on the targets
    Running,
    /// Stopped; targets held at zero
    Stopped,
    /// Targets restored and released; the gate cannot be reused
    Destroyed,
}

/// A parameter a pattern gate drives
#[derive(Debug, Clone, PartialEq)]
pub struct PatternTarget {
    pub unit: UnitId,
    pub param: &'static str,
    /// Value of the parameter when the gate was connected
    pub base_value: f64,
}

/// Scheduler that gates parameters on and off
#[derive(Debug, Clone)]
pub struct PatternGate {
    params: PatternParams,
    targets: Vec<PatternTarget>,
    state: PatternState,
    looping: bool,
    start_offset: f64,
    loop_gap: f64,
    rearm: Option<TimerId>,
}

impl PatternGate {
    pub const DEFAULT_START_OFFSET: f64 = 0.01;
    pub const DEFAULT_LOOP_GAP: f64 = 0.5;
    /// Shortest interval between two re-arms
    const MIN_LOOP_PERIOD: f64 = 1e-3;

    pub fn new(params: PatternParams) -> Self {
        Self {
            params,
            targets: Vec::new(),
            state: PatternState::Idle,
            looping: false,
            start_offset: Self::DEFAULT_START_OFFSET,
            loop_gap: Self::DEFAULT_LOOP_GAP,
            rearm: None,
        }
    }

    /// Re-arm after every completed sequence until stopped
    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn with_start_offset(mut self, seconds: f64) -> Self {
        self.start_offset = sanitize_duration(seconds);
        self
    }

    pub fn with_loop_gap(mut self, seconds: f64) -> Self {
        self.loop_gap = sanitize_duration(seconds);
        self
    }

    pub fn params(&self) -> PatternParams {
        self.params
    }

    /// New timing takes effect the next time a sequence is scheduled
    pub fn set_params(&mut self, params: PatternParams) {
        self.params = params;
    }

    pub fn params_mut(&mut self) -> &mut PatternParams {
        &mut self.params
    }

    pub fn state(&self) -> PatternState {
        self.state
    }

    pub fn targets(&self) -> &[PatternTarget] {
        &self.targets
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    /// Attach the gate to a unit parameter, recording its current value
    pub fn connect(
        &mut self,
        ctx: &AudioContext,
        unit: UnitId,
        param: &'static str,
    ) -> Result<(), ContextError> {
        if self.state == PatternState::Destroyed {
            return Ok(());
        }
        let base_value = ctx.param(unit, param)?.value();
        self.targets.retain(|t| !(t.unit == unit && t.param == param));
        self.targets.push(PatternTarget {
            unit,
            param,
            base_value,
        });
        if self.state == PatternState::Idle {
            self.state = PatternState::Connected;
        }
        debug!(param, base_value, "pattern connected");
        Ok(())
    }

    /// Schedule a sequence starting shortly after the current time.
    ///
    /// Restarting a running gate replaces its schedule.
    pub fn start(&mut self, ctx: &mut AudioContext) {
        if self.targets.is_empty() || self.state == PatternState::Destroyed {
            return;
        }
        let now = ctx.current_time();
        self.cancel_rearm(ctx);
        for target in &self.targets {
            if let Ok(param) = ctx.param_mut(target.unit, target.param) {
                param.cancel_scheduled_values(now);
                param.set_value_at_time(0.0, now);
            }
        }
        self.schedule_sequence(ctx, now + self.start_offset);
        self.state = PatternState::Running;
    }

    /// Cancel future values and hold the targets at zero
    pub fn stop(&mut self, ctx: &mut AudioContext) {
        if matches!(self.state, PatternState::Idle | PatternState::Destroyed) {
            return;
        }
        self.cancel_rearm(ctx);
        self.hold_targets(ctx, |_| 0.0);
        self.state = PatternState::Stopped;
    }

    /// Stop and forget every target
    pub fn disconnect(&mut self, ctx: &mut AudioContext) {
        self.stop(ctx);
        self.targets.clear();
        if self.state != PatternState::Destroyed {
            self.state = PatternState::Idle;
        }
    }

    /// Cancel everything and restore each target to its recorded base value
    pub fn destroy(&mut self, ctx: &mut AudioContext) {
        if self.state == PatternState::Destroyed {
            return;
        }
        self.cancel_rearm(ctx);
        self.hold_targets(ctx, |target| target.base_value);
        self.targets.clear();
        self.state = PatternState::Destroyed;
    }

    /// Re-arm a looping gate when its timer fires. Returns false if the
    /// timer does not belong to this gate.
    pub fn handle_timer(&mut self, ctx: &mut AudioContext, timer: TimerId, at: f64) -> bool {
        if self.rearm != Some(timer) {
            return false;
        }
        self.rearm = None;
        if self.state == PatternState::Running {
            trace!(at, "pattern re-armed");
            self.schedule_sequence(ctx, at.max(ctx.current_time()));
        }
        true
    }

    fn schedule_sequence(&mut self, ctx: &mut AudioContext, start: f64) {
        let PatternParams {
            on_time,
            off_time,
            repeat,
        } = self.params;
        for target in &self.targets {
            let Ok(param) = ctx.param_mut(target.unit, target.param) else {
                continue;
            };
            let mut t = start;
            for _ in 0..repeat {
                param.set_value_at_time(target.base_value, t);
                t += on_time;
                param.set_value_at_time(0.0, t);
                t += off_time;
            }
            trace!(
                param = target.param,
                start,
                end = t,
                "scheduled pattern sequence"
            );
        }
        if self.looping {
            let period = (self.params.sequence_length() + self.loop_gap).max(Self::MIN_LOOP_PERIOD);
            self.rearm = Some(ctx.schedule_timer(start + period));
        }
    }

    fn hold_targets(&self, ctx: &mut AudioContext, value: impl Fn(&PatternTarget) -> f64) {
        for target in &self.targets {
            if let Ok(param) = ctx.param_mut(target.unit, target.param) {
                param.cancel_all();
                param.set_value(value(target));
            }
        }
    }

    fn cancel_rearm(&mut self, ctx: &mut AudioContext) {
        if let Some(timer) = self.rearm.take() {
            ctx.cancel_timer(timer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModuleType;
    use crate::context::EdgeTarget;
    use crate::param::AutomationEvent;
    use crate::units::{GainUnit, OscillatorUnit, Waveform};
    use approx::assert_relative_eq;

    const SR: f64 = 1000.0;

    /// Context with a square oscillator at DC-like low frequency through a
    /// gain at 0.5
    fn gated_context() -> (AudioContext, UnitId) {
        let mut ctx = AudioContext::new(SR);
        let osc = ctx.add_unit(OscillatorUnit::new(SR, Waveform::Square));
        ctx.param_mut(osc, "frequency").unwrap().set_value(0.01);
        ctx.start(osc, 0.0).unwrap();
        let gain = ctx.add_unit(GainUnit::new());
        ctx.param_mut(gain, "gain").unwrap().set_value(0.5);
        ctx.connect(osc, EdgeTarget::Input(gain)).unwrap();
        ctx.connect(gain, EdgeTarget::Destination).unwrap();
        (ctx, gain)
    }

    /// Lengths of consecutive runs of equal "on" state, in frames
    fn runs(samples: &[f64]) -> Vec<(bool, usize)> {
        let mut runs: Vec<(bool, usize)> = Vec::new();
        for &s in samples {
            let on = s.abs() > 1e-9;
            match runs.last_mut() {
                Some((state, len)) if *state == on => *len += 1,
                _ => runs.push((on, 1)),
            }
        }
        runs
    }

    #[test]
    fn test_three_pulses_then_restore() {
        let (mut ctx, gain) = gated_context();
        let mut gate = PatternGate::new(PatternParams::new(0.2, 0.1, 3));
        gate.connect(&ctx, gain, "gain").unwrap();
        assert_eq!(gate.targets()[0].base_value, 0.5);
        gate.start(&mut ctx);
        assert_eq!(gate.state(), PatternState::Running);

        let events = ctx.param(gain, "gain").unwrap().scheduled_events().to_vec();
        assert_eq!(events.len(), 7);
        let ons: Vec<f64> = events
            .iter()
            .filter(|e| matches!(e, AutomationEvent::SetValue { value, .. } if *value > 0.0))
            .map(|e| e.time())
            .collect();
        assert_eq!(ons.len(), 3);
        assert_relative_eq!(ons[0], 0.01, epsilon = 1e-12);
        assert_relative_eq!(ons[1], 0.31, epsilon = 1e-12);
        assert_relative_eq!(ons[2], 0.61, epsilon = 1e-12);

        let out = ctx.render(1000);
        let pulses: Vec<usize> = runs(&out)
            .into_iter()
            .filter(|(on, _)| *on)
            .map(|(_, len)| len)
            .collect();
        assert_eq!(pulses.len(), 3);
        for len in &pulses {
            assert!((199..=201).contains(len), "pulse length {}", len);
        }
        let gaps: Vec<usize> = runs(&out)
            .windows(3)
            .filter(|w| w[0].0 && !w[1].0 && w[2].0)
            .map(|w| w[1].1)
            .collect();
        assert_eq!(gaps.len(), 2);
        for len in &gaps {
            assert!((99..=101).contains(len), "gap length {}", len);
        }
        assert_eq!(*out.last().unwrap(), 0.0);

        gate.destroy(&mut ctx);
        assert_eq!(gate.state(), PatternState::Destroyed);
        let after = ctx.render(10);
        assert!(after.iter().all(|&s| (s.abs() - 0.5).abs() < 1e-9));
        assert_eq!(ctx.param(gain, "gain").unwrap().value(), 0.5);
    }

    #[test]
    fn test_stop_holds_zero() {
        let (mut ctx, gain) = gated_context();
        let mut gate = PatternGate::new(PatternParams::new(0.2, 0.1, 3));
        gate.connect(&ctx, gain, "gain").unwrap();
        gate.start(&mut ctx);
        ctx.render(50);
        gate.stop(&mut ctx);
        assert_eq!(gate.state(), PatternState::Stopped);
        assert!(!ctx.param(gain, "gain").unwrap().has_scheduled_events());
        assert!(ctx.render(500).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_disconnect_returns_to_idle() {
        let (mut ctx, gain) = gated_context();
        let mut gate = PatternGate::new(PatternParams::default());
        gate.connect(&ctx, gain, "gain").unwrap();
        gate.start(&mut ctx);
        gate.disconnect(&mut ctx);
        assert_eq!(gate.state(), PatternState::Idle);
        assert!(gate.targets().is_empty());
        assert_eq!(ctx.param(gain, "gain").unwrap().value(), 0.0);
    }

    #[test]
    fn test_looping_rearms() {
        let (mut ctx, gain) = gated_context();
        let mut gate = PatternGate::new(PatternParams::new(0.1, 0.1, 2))
            .with_looping(true)
            .with_loop_gap(0.1);
        gate.connect(&ctx, gain, "gain").unwrap();
        gate.start(&mut ctx);
        assert_eq!(ctx.pending_timers(), 1);

        let frames = ctx.frames_until_next_timer().unwrap();
        assert_eq!(frames, 510);
        ctx.render(frames as usize);
        let fired = ctx.take_fired_timers();
        assert_eq!(fired.len(), 1);
        assert!(gate.handle_timer(&mut ctx, fired[0].0, fired[0].1));
        assert_eq!(ctx.pending_timers(), 1);
        assert_eq!(ctx.param(gain, "gain").unwrap().scheduled_events().len(), 4);

        gate.stop(&mut ctx);
        assert_eq!(ctx.pending_timers(), 0);
    }

    #[test]
    fn test_foreign_timer_ignored() {
        let (mut ctx, gain) = gated_context();
        let mut gate = PatternGate::new(PatternParams::default()).with_looping(true);
        gate.connect(&ctx, gain, "gain").unwrap();
        gate.start(&mut ctx);
        let other = ctx.schedule_timer(0.0);
        assert!(!gate.handle_timer(&mut ctx, other, 0.0));
    }

    #[test]
    fn test_independent_gates() {
        let (mut ctx, gain) = gated_context();
        let other_gain = ctx.add_unit(GainUnit::new());
        ctx.param_mut(other_gain, "gain").unwrap().set_value(0.8);

        let mut a = PatternGate::new(PatternParams::default());
        let mut b = PatternGate::new(PatternParams::default());
        a.connect(&ctx, gain, "gain").unwrap();
        b.connect(&ctx, other_gain, "gain").unwrap();
        a.start(&mut ctx);
        b.start(&mut ctx);

        a.stop(&mut ctx);
        assert!(!ctx.param(gain, "gain").unwrap().has_scheduled_events());
        assert_eq!(
            ctx.param(other_gain, "gain")
                .unwrap()
                .scheduled_events()
                .len(),
            7
        );
    }

    #[test]
    fn test_params_from_module() {
        let module = ModuleConfig::new(ModuleType::Pattern)
            .with("onTime", 0.15)
            .with("offTime", 0.1)
            .with("repeat", 2.0);
        let params = PatternParams::from_module(&module);
        assert_eq!(params, PatternParams::new(0.15, 0.1, 2));
        assert_relative_eq!(params.sequence_length(), 0.5);

        let mut params = params;
        assert!(params.set("repeat", 4.4));
        assert_eq!(params.repeat, 4);
        assert!(!params.set("gain", 1.0));
    }

    #[test]
    fn test_start_without_target_is_noop() {
        let (mut ctx, _) = gated_context();
        let mut gate = PatternGate::new(PatternParams::default());
        gate.start(&mut ctx);
        assert_eq!(gate.state(), PatternState::Idle);
    }
}
