//! Audio Context
//!
//! The shared rendering engine every signal graph is built into. Units live
//! in a slotmap and are wired with edges that either feed a unit's audio
//! input, add into one of its parameters, or reach the destination (the
//! speakers). The context owns the sample clock: [`AudioContext::tick`]
//! renders one mono sample and advances time by one frame.
//!
//! Execution order is a topological sort of the edge graph. Edges into a
//! unit that [breaks feedback](crate::units::Unit::breaks_feedback) do not
//! count as dependencies; such a unit reads its input from the previous
//! frame, which lets delay lines close feedback loops.
//!
//! The context also keeps one-shot timers on its clock. Timers do not run
//! code; callers poll [`AudioContext::take_fired_timers`] and dispatch on the
//! returned ids.

use crate::error::ContextError;
use crate::param::AudioParam;
use crate::units::{TickContext, Unit};
use slotmap::{new_key_type, SecondaryMap, SlotMap};
use std::collections::VecDeque;
use tracing::{trace, warn};

new_key_type! {
    /// Identifier of a unit in the context
    pub struct UnitId;
    /// Identifier of an edge in the context
    pub struct EdgeId;
    /// Identifier of a pending timer
    pub struct TimerId;
}

/// Where an edge delivers its signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeTarget {
    /// Audio input of a unit
    Input(UnitId),
    /// Added into a unit parameter, by declaration index
    Param { unit: UnitId, index: usize },
    /// The context destination
    Destination,
}

impl EdgeTarget {
    pub fn unit(&self) -> Option<UnitId> {
        match *self {
            EdgeTarget::Input(unit) | EdgeTarget::Param { unit, .. } => Some(unit),
            EdgeTarget::Destination => None,
        }
    }
}

/// A directed connection between a unit output and a target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub from: UnitId,
    pub to: EdgeTarget,
}

struct UnitSlot {
    unit: Box<dyn Unit>,
    params: Vec<AudioParam>,
    start_at: Option<f64>,
    stop_at: Option<f64>,
}

impl UnitSlot {
    fn is_active(&self, time: f64) -> bool {
        if !self.unit.is_source() {
            return true;
        }
        self.start_at.is_some_and(|start| time >= start)
            && self.stop_at.map_or(true, |stop| time < stop)
    }
}

#[derive(Debug, Clone, Default)]
struct Incoming {
    audio: Vec<UnitId>,
    params: Vec<(usize, UnitId)>,
}

#[derive(Debug, Clone, Default)]
struct Schedule {
    order: Vec<UnitId>,
    incoming: SecondaryMap<UnitId, Incoming>,
    sinks: Vec<UnitId>,
    /// Units that read their input from the previous frame
    delayed: Vec<UnitId>,
}

/// Mono offline rendering context
pub struct AudioContext {
    sample_rate: f64,
    frame: u64,
    units: SlotMap<UnitId, UnitSlot>,
    edges: SlotMap<EdgeId, Edge>,
    timers: SlotMap<TimerId, f64>,

    // Execution state
    schedule: Schedule,
    dirty: bool,
    outputs: SecondaryMap<UnitId, f64>,
    delayed_inputs: SecondaryMap<UnitId, f64>,
    param_scratch: Vec<f64>,
}

impl AudioContext {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            frame: 0,
            units: SlotMap::with_key(),
            edges: SlotMap::with_key(),
            timers: SlotMap::with_key(),
            schedule: Schedule::default(),
            dirty: true,
            outputs: SecondaryMap::new(),
            delayed_inputs: SecondaryMap::new(),
            param_scratch: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Number of frames rendered so far
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Context time in seconds
    pub fn current_time(&self) -> f64 {
        self.frame as f64 / self.sample_rate
    }

    /// Add a unit to the context
    pub fn add_unit<U: Unit + 'static>(&mut self, unit: U) -> UnitId {
        self.add_boxed(Box::new(unit))
    }

    /// Add a boxed unit to the context
    pub fn add_boxed(&mut self, mut unit: Box<dyn Unit>) -> UnitId {
        unit.set_sample_rate(self.sample_rate);
        let params = unit
            .params()
            .iter()
            .map(|p| AudioParam::new(p.default))
            .collect();
        let id = self.units.insert(UnitSlot {
            unit,
            params,
            start_at: None,
            stop_at: None,
        });
        self.outputs.insert(id, 0.0);
        self.invalidate();
        id
    }

    /// Remove a unit and every edge touching it
    pub fn remove_unit(&mut self, id: UnitId) -> Result<(), ContextError> {
        self.units.remove(id).ok_or(ContextError::UnknownUnit)?;
        self.edges
            .retain(|_, edge| edge.from != id && edge.to.unit() != Some(id));
        self.outputs.remove(id);
        self.delayed_inputs.remove(id);
        self.invalidate();
        Ok(())
    }

    /// Connect a unit output to a target
    pub fn connect(&mut self, from: UnitId, to: EdgeTarget) -> Result<EdgeId, ContextError> {
        if !self.units.contains_key(from) {
            return Err(ContextError::UnknownUnit);
        }
        match to {
            EdgeTarget::Input(unit) => {
                let slot = self.units.get(unit).ok_or(ContextError::UnknownUnit)?;
                if !slot.unit.has_input() {
                    return Err(ContextError::NoInput {
                        unit_type: slot.unit.type_id(),
                    });
                }
            }
            EdgeTarget::Param { unit, index } => {
                let slot = self.units.get(unit).ok_or(ContextError::UnknownUnit)?;
                if index >= slot.params.len() {
                    return Err(ContextError::UnknownParam {
                        unit_type: slot.unit.type_id(),
                        param: index.to_string(),
                    });
                }
            }
            EdgeTarget::Destination => {}
        }
        let id = self.edges.insert(Edge { from, to });
        self.invalidate();
        Ok(id)
    }

    /// Connect a unit output into a named parameter of another unit
    pub fn connect_param(
        &mut self,
        from: UnitId,
        unit: UnitId,
        param: &str,
    ) -> Result<EdgeId, ContextError> {
        let index = self.param_index(unit, param)?;
        self.connect(from, EdgeTarget::Param { unit, index })
    }

    pub fn disconnect(&mut self, edge: EdgeId) -> Result<(), ContextError> {
        self.edges.remove(edge).ok_or(ContextError::UnknownEdge)?;
        self.invalidate();
        Ok(())
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains_unit(&self, id: UnitId) -> bool {
        self.units.contains_key(id)
    }

    pub fn contains_edge(&self, id: EdgeId) -> bool {
        self.edges.contains_key(id)
    }

    pub fn edge(&self, id: EdgeId) -> Option<Edge> {
        self.edges.get(id).copied()
    }

    pub fn unit(&self, id: UnitId) -> Option<&dyn Unit> {
        self.units.get(id).map(|slot| slot.unit.as_ref())
    }

    /// Output of a unit at the last rendered frame
    pub fn unit_output(&self, id: UnitId) -> Option<f64> {
        self.outputs.get(id).copied()
    }

    /// Declaration index of a named unit parameter
    pub fn param_index(&self, unit: UnitId, name: &str) -> Result<usize, ContextError> {
        let slot = self.units.get(unit).ok_or(ContextError::UnknownUnit)?;
        slot.unit
            .params()
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| ContextError::UnknownParam {
                unit_type: slot.unit.type_id(),
                param: name.to_string(),
            })
    }

    pub fn param(&self, unit: UnitId, name: &str) -> Result<&AudioParam, ContextError> {
        let index = self.param_index(unit, name)?;
        self.units
            .get(unit)
            .and_then(|slot| slot.params.get(index))
            .ok_or(ContextError::UnknownUnit)
    }

    pub fn param_mut(&mut self, unit: UnitId, name: &str) -> Result<&mut AudioParam, ContextError> {
        let index = self.param_index(unit, name)?;
        self.units
            .get_mut(unit)
            .and_then(|slot| slot.params.get_mut(index))
            .ok_or(ContextError::UnknownUnit)
    }

    /// Select a unit's waveform or response type
    pub fn set_mode(&mut self, unit: UnitId, mode: &str) -> Result<bool, ContextError> {
        let slot = self.units.get_mut(unit).ok_or(ContextError::UnknownUnit)?;
        Ok(slot.unit.set_mode(mode))
    }

    /// Start a source unit at context time `when`
    pub fn start(&mut self, unit: UnitId, when: f64) -> Result<(), ContextError> {
        let slot = self.units.get_mut(unit).ok_or(ContextError::UnknownUnit)?;
        if !slot.unit.is_source() {
            return Err(ContextError::NotASource {
                unit_type: slot.unit.type_id(),
            });
        }
        if slot.start_at.is_some() {
            return Err(ContextError::AlreadyStarted);
        }
        slot.start_at = Some(when);
        Ok(())
    }

    /// Stop a source unit at context time `when`
    pub fn stop(&mut self, unit: UnitId, when: f64) -> Result<(), ContextError> {
        let slot = self.units.get_mut(unit).ok_or(ContextError::UnknownUnit)?;
        if !slot.unit.is_source() {
            return Err(ContextError::NotASource {
                unit_type: slot.unit.type_id(),
            });
        }
        slot.stop_at = Some(slot.stop_at.map_or(when, |prev| prev.min(when)));
        Ok(())
    }

    /// Whether a source unit is producing sound at the current time
    pub fn is_playing(&self, unit: UnitId) -> bool {
        let time = self.current_time();
        self.units
            .get(unit)
            .is_some_and(|slot| slot.unit.is_source() && slot.is_active(time))
    }

    /// Schedule a one-shot timer at context time `at`
    pub fn schedule_timer(&mut self, at: f64) -> TimerId {
        self.timers.insert(at)
    }

    /// Cancel a pending timer. Returns false if it already fired or never existed.
    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        self.timers.remove(id).is_some()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Remove and return every timer that is due, ordered by due time
    pub fn take_fired_timers(&mut self) -> Vec<(TimerId, f64)> {
        let now = self.current_time();
        let mut fired: Vec<(TimerId, f64)> = self
            .timers
            .iter()
            .filter(|(_, &at)| at <= now + Self::TIME_EPSILON)
            .map(|(id, &at)| (id, at))
            .collect();
        fired.sort_by(|a, b| a.1.total_cmp(&b.1));
        for (id, _) in &fired {
            self.timers.remove(*id);
        }
        fired
    }

    /// Frames to render before the earliest pending timer is due
    pub fn frames_until_next_timer(&self) -> Option<u64> {
        self.timers
            .values()
            .copied()
            .min_by(f64::total_cmp)
            .map(|at| {
                let due = (at * self.sample_rate - Self::TIME_EPSILON).ceil();
                if due <= self.frame as f64 {
                    0
                } else {
                    due as u64 - self.frame
                }
            })
    }

    const TIME_EPSILON: f64 = 1e-9;

    fn invalidate(&mut self) {
        self.dirty = true;
    }

    /// Rebuild execution order and incoming edge lists
    fn compile(&mut self) {
        let mut schedule = Schedule::default();
        for id in self.units.keys() {
            schedule.incoming.insert(id, Incoming::default());
        }

        let mut in_degree: SecondaryMap<UnitId, usize> =
            self.units.keys().map(|id| (id, 0)).collect();
        let mut successors: SecondaryMap<UnitId, Vec<UnitId>> =
            self.units.keys().map(|id| (id, Vec::new())).collect();

        for edge in self.edges.values() {
            let (target, counts) = match edge.to {
                EdgeTarget::Destination => {
                    schedule.sinks.push(edge.from);
                    continue;
                }
                EdgeTarget::Input(unit) => {
                    if let Some(incoming) = schedule.incoming.get_mut(unit) {
                        incoming.audio.push(edge.from);
                    }
                    let breaks = self
                        .units
                        .get(unit)
                        .is_some_and(|slot| slot.unit.breaks_feedback());
                    (unit, !breaks)
                }
                EdgeTarget::Param { unit, index } => {
                    if let Some(incoming) = schedule.incoming.get_mut(unit) {
                        incoming.params.push((index, edge.from));
                    }
                    (unit, true)
                }
            };
            if counts {
                if let Some(deg) = in_degree.get_mut(target) {
                    *deg += 1;
                }
                if let Some(succ) = successors.get_mut(edge.from) {
                    succ.push(target);
                }
            }
        }

        // Kahn's algorithm
        let mut queue: VecDeque<UnitId> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(id, _)| id)
            .collect();
        let mut order = Vec::with_capacity(self.units.len());
        while let Some(id) = queue.pop_front() {
            order.push(id);
            if let Some(succ) = successors.get(id) {
                for &next in succ {
                    if let Some(deg) = in_degree.get_mut(next) {
                        *deg -= 1;
                        if *deg == 0 {
                            queue.push_back(next);
                        }
                    }
                }
            }
        }

        if order.len() != self.units.len() {
            let stuck: Vec<UnitId> = in_degree
                .iter()
                .filter(|(_, &deg)| deg > 0)
                .map(|(id, _)| id)
                .collect();
            warn!(
                units = stuck.len(),
                "cycle without a delay line; those units read last frame's values"
            );
            order.extend(stuck);
        }

        schedule.delayed = order
            .iter()
            .copied()
            .filter(|&id| {
                self.units
                    .get(id)
                    .is_some_and(|slot| slot.unit.breaks_feedback())
            })
            .collect();
        schedule.order = order;

        trace!(
            units = self.units.len(),
            edges = self.edges.len(),
            "compiled execution order"
        );
        self.schedule = schedule;
        self.dirty = false;
    }

    /// Render one sample and advance the clock by one frame
    pub fn tick(&mut self) -> f64 {
        if self.dirty {
            self.compile();
        }
        let time = self.current_time();

        for &id in &self.schedule.delayed {
            let sum = self
                .schedule
                .incoming
                .get(id)
                .map_or(0.0, |inc| sum_outputs(&self.outputs, &inc.audio));
            self.delayed_inputs.insert(id, sum);
        }

        for &id in &self.schedule.order {
            let Some(slot) = self.units.get_mut(id) else {
                continue;
            };
            let incoming = self.schedule.incoming.get(id);

            let input = if slot.unit.breaks_feedback() {
                self.delayed_inputs.get(id).copied().unwrap_or(0.0)
            } else {
                incoming.map_or(0.0, |inc| sum_outputs(&self.outputs, &inc.audio))
            };

            self.param_scratch.clear();
            self.param_scratch
                .extend(slot.params.iter_mut().map(|p| p.advance(time)));
            if let Some(inc) = incoming {
                for &(index, source) in &inc.params {
                    if let Some(value) = self.param_scratch.get_mut(index) {
                        *value += self.outputs.get(source).copied().unwrap_or(0.0);
                    }
                }
            }

            let out = if slot.is_active(time) {
                let out = slot.unit.tick(&TickContext {
                    time,
                    input,
                    params: &self.param_scratch,
                });
                if out.is_finite() {
                    out
                } else {
                    0.0
                }
            } else {
                0.0
            };
            self.outputs.insert(id, out);
        }

        let out = sum_outputs(&self.outputs, &self.schedule.sinks);
        self.frame += 1;
        out
    }

    /// Render `frames` samples
    pub fn render(&mut self, frames: usize) -> Vec<f64> {
        let mut out = Vec::with_capacity(frames);
        self.render_into(frames, &mut out);
        out
    }

    /// Render `frames` samples, appending them to `out`
    pub fn render_into(&mut self, frames: usize, out: &mut Vec<f64>) {
        out.reserve(frames);
        for _ in 0..frames {
            let sample = self.tick();
            out.push(sample);
        }
    }
}

#[inline]
fn sum_outputs(outputs: &SecondaryMap<UnitId, f64>, sources: &[UnitId]) -> f64 {
    sources
        .iter()
        .map(|&id| outputs.get(id).copied().unwrap_or(0.0))
        .sum()
}

impl std::fmt::Debug for AudioContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioContext")
            .field("sample_rate", &self.sample_rate)
            .field("frame", &self.frame)
            .field("units", &self.units.len())
            .field("edges", &self.edges.len())
            .field("timers", &self.timers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::{DelayLineUnit, GainUnit, OscillatorUnit, UnitParam, Waveform};
    use approx::assert_relative_eq;

    /// Source that outputs a constant value once started
    struct Constant(f64);

    impl Unit for Constant {
        fn type_id(&self) -> &'static str {
            "constant"
        }

        fn params(&self) -> &'static [UnitParam] {
            &[]
        }

        fn has_input(&self) -> bool {
            false
        }

        fn is_source(&self) -> bool {
            true
        }

        fn tick(&mut self, _: &TickContext<'_>) -> f64 {
            self.0
        }

        fn reset(&mut self) {}

        fn set_sample_rate(&mut self, _: f64) {}
    }

    fn started_constant(ctx: &mut AudioContext, value: f64) -> UnitId {
        let id = ctx.add_unit(Constant(value));
        ctx.start(id, 0.0).unwrap();
        id
    }

    #[test]
    fn test_chain_renders_through_gain() {
        let mut ctx = AudioContext::new(1000.0);
        let src = started_constant(&mut ctx, 1.0);
        let gain = ctx.add_unit(GainUnit::new());
        ctx.param_mut(gain, "gain").unwrap().set_value(0.25);
        ctx.connect(src, EdgeTarget::Input(gain)).unwrap();
        ctx.connect(gain, EdgeTarget::Destination).unwrap();
        assert_eq!(ctx.render(3), vec![0.25, 0.25, 0.25]);
        assert_eq!(ctx.frame(), 3);
    }

    #[test]
    fn test_sources_silent_until_started() {
        let mut ctx = AudioContext::new(1000.0);
        let src = ctx.add_unit(Constant(1.0));
        ctx.connect(src, EdgeTarget::Destination).unwrap();
        ctx.start(src, 0.002).unwrap();
        ctx.stop(src, 0.004).unwrap();
        assert_eq!(ctx.render(6), vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0]);
        assert_eq!(ctx.start(src, 0.0), Err(ContextError::AlreadyStarted));
    }

    #[test]
    fn test_param_edges_add_to_automation() {
        let mut ctx = AudioContext::new(1000.0);
        let src = started_constant(&mut ctx, 1.0);
        let modulator = started_constant(&mut ctx, 0.5);
        let gain = ctx.add_unit(GainUnit::new());
        ctx.param_mut(gain, "gain").unwrap().set_value(0.25);
        ctx.connect(src, EdgeTarget::Input(gain)).unwrap();
        ctx.connect_param(modulator, gain, "gain").unwrap();
        ctx.connect(gain, EdgeTarget::Destination).unwrap();
        assert_relative_eq!(ctx.tick(), 0.75);
    }

    #[test]
    fn test_automation_follows_clock() {
        let mut ctx = AudioContext::new(1000.0);
        let src = started_constant(&mut ctx, 1.0);
        let gain = ctx.add_unit(GainUnit::new());
        ctx.param_mut(gain, "gain")
            .unwrap()
            .set_value_at_time(0.0, 0.002);
        ctx.connect(src, EdgeTarget::Input(gain)).unwrap();
        ctx.connect(gain, EdgeTarget::Destination).unwrap();
        assert_eq!(ctx.render(4), vec![1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_feedback_through_delay_line() {
        let sr = 1024.0;
        let mut ctx = AudioContext::new(sr);
        let src = ctx.add_unit(Constant(1.0));
        ctx.start(src, 0.0).unwrap();
        ctx.stop(src, 1.0 / sr).unwrap();
        let delay = ctx.add_unit(DelayLineUnit::new(sr, 1.0));
        ctx.param_mut(delay, "delayTime").unwrap().set_value(2.0 / sr);
        let feedback = ctx.add_unit(GainUnit::new());
        ctx.param_mut(feedback, "gain").unwrap().set_value(0.5);

        ctx.connect(src, EdgeTarget::Input(delay)).unwrap();
        ctx.connect(delay, EdgeTarget::Input(feedback)).unwrap();
        ctx.connect(feedback, EdgeTarget::Input(delay)).unwrap();
        ctx.connect(delay, EdgeTarget::Destination).unwrap();

        let out = ctx.render(8);
        assert_eq!(out, vec![0.0, 0.0, 1.0, 0.0, 0.5, 0.0, 0.25, 0.0]);
    }

    #[test]
    fn test_cycle_without_delay_still_renders() {
        let mut ctx = AudioContext::new(1000.0);
        let a = ctx.add_unit(GainUnit::new());
        let b = ctx.add_unit(GainUnit::new());
        ctx.connect(a, EdgeTarget::Input(b)).unwrap();
        ctx.connect(b, EdgeTarget::Input(a)).unwrap();
        ctx.connect(b, EdgeTarget::Destination).unwrap();
        assert_eq!(ctx.render(4), vec![0.0; 4]);
    }

    #[test]
    fn test_remove_unit_drops_edges() {
        let mut ctx = AudioContext::new(1000.0);
        let osc = ctx.add_unit(OscillatorUnit::new(1000.0, Waveform::Sine));
        let gain = ctx.add_unit(GainUnit::new());
        ctx.connect(osc, EdgeTarget::Input(gain)).unwrap();
        ctx.connect(gain, EdgeTarget::Destination).unwrap();
        assert_eq!(ctx.edge_count(), 2);

        ctx.remove_unit(gain).unwrap();
        assert_eq!(ctx.unit_count(), 1);
        assert_eq!(ctx.edge_count(), 0);
        assert_eq!(ctx.remove_unit(gain), Err(ContextError::UnknownUnit));
    }

    #[test]
    fn test_connect_validation() {
        let mut ctx = AudioContext::new(1000.0);
        let osc = ctx.add_unit(OscillatorUnit::new(1000.0, Waveform::Sine));
        let gain = ctx.add_unit(GainUnit::new());
        assert_eq!(
            ctx.connect(gain, EdgeTarget::Input(osc)),
            Err(ContextError::NoInput {
                unit_type: "oscillator"
            })
        );
        assert!(matches!(
            ctx.connect_param(gain, osc, "resonance"),
            Err(ContextError::UnknownParam { .. })
        ));
        assert!(ctx.connect_param(gain, osc, "detune").is_ok());
        assert_eq!(
            ctx.start(gain, 0.0),
            Err(ContextError::NotASource { unit_type: "gain" })
        );
    }

    #[test]
    fn test_disconnect() {
        let mut ctx = AudioContext::new(1000.0);
        let src = started_constant(&mut ctx, 1.0);
        let edge = ctx.connect(src, EdgeTarget::Destination).unwrap();
        assert_eq!(ctx.tick(), 1.0);
        ctx.disconnect(edge).unwrap();
        assert_eq!(ctx.tick(), 0.0);
        assert_eq!(ctx.disconnect(edge), Err(ContextError::UnknownEdge));
    }

    #[test]
    fn test_timers() {
        let mut ctx = AudioContext::new(100.0);
        let late = ctx.schedule_timer(0.05);
        let early = ctx.schedule_timer(0.02);
        let cancelled = ctx.schedule_timer(0.03);
        assert!(ctx.cancel_timer(cancelled));
        assert_eq!(ctx.frames_until_next_timer(), Some(2));

        ctx.render(2);
        let fired = ctx.take_fired_timers();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].0, early);

        assert_eq!(ctx.frames_until_next_timer(), Some(3));
        ctx.render(10);
        let fired = ctx.take_fired_timers();
        assert_eq!(fired, vec![(late, 0.05)]);
        assert_eq!(ctx.pending_timers(), 0);
        assert!(!ctx.cancel_timer(late));
        assert_eq!(ctx.frames_until_next_timer(), None);
    }
}
