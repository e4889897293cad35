//! Signal Graph Builder
//!
//! Realizes a [`Patch`] as processing units inside a shared
//! [`AudioContext`]. Every module gets its own small internal topology
//! (a delay is a delay line looped through a feedback gain, a reverb is a
//! dry/wet split around a convolver) and exposes one audio input, one
//! output and a set of parameter bindings. Connections are then applied in
//! patch order, choosing the wiring strategy from their [`ConnectionKind`]:
//!
//! - `Audio`: source output into the target's input, or the destination
//! - `ContinuousParam`: source output summed into a bound unit parameter
//! - `ScheduledParam`: no edge; the source's [`PatternGate`] writes
//!   automation onto the bound parameter
//!
//! A bad connection never aborts the build. It is logged, recorded in
//! [`GraphHandle::warnings`] and skipped.
//!
//! The returned [`GraphHandle`] owns exactly the units and edges it created,
//! so tearing one graph down leaves every other graph in the context intact.

use crate::catalog::{ModuleType, ParamValue};
use crate::chime::Chime;
use crate::context::{AudioContext, EdgeId, EdgeTarget, TimerId, UnitId};
use crate::error::{ContextError, PatchError};
use crate::impulse::{synthesize_impulse, DEFAULT_DECAY};
use crate::patch::{ConnectionKind, ConnectionTarget, ModuleConfig, Patch, ResolvedConnection};
use crate::pattern::{PatternGate, PatternParams};
use crate::units::{
    BiquadUnit, ConvolverUnit, DelayLineUnit, FilterResponse, GainUnit, OscillatorUnit, Waveform,
};
use serde::Serialize;
use tracing::{debug, warn};

/// A module parameter realized as a unit parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamBinding {
    pub unit: UnitId,
    pub param: &'static str,
}

/// Units realizing one module
#[derive(Debug)]
pub struct ModuleNodes {
    module_type: ModuleType,
    input: Option<UnitId>,
    output: Option<UnitId>,
    bindings: Vec<(&'static str, ParamBinding)>,
    /// Unit whose waveform or response follows the module's `type`
    mode_unit: Option<UnitId>,
    units: Vec<UnitId>,
    sources: Vec<UnitId>,
    pattern: Option<PatternGate>,
    reverb: Option<ReverbNodes>,
}

/// Internal units of a reverb that parameter updates rewire
#[derive(Debug, Clone, Copy)]
struct ReverbNodes {
    splitter: UnitId,
    dry: UnitId,
    convolver: UnitId,
    wet: UnitId,
    time: f64,
    decay: f64,
}

impl ModuleNodes {
    fn new(module_type: ModuleType) -> Self {
        Self {
            module_type,
            input: None,
            output: None,
            bindings: Vec::new(),
            mode_unit: None,
            units: Vec::new(),
            sources: Vec::new(),
            pattern: None,
            reverb: None,
        }
    }

    pub fn module_type(&self) -> ModuleType {
        self.module_type
    }

    /// Unit receiving the module's audio input
    pub fn input(&self) -> Option<UnitId> {
        self.input
    }

    /// Unit carrying the module's output signal
    pub fn output(&self) -> Option<UnitId> {
        self.output
    }

    pub fn binding(&self, param: &str) -> Option<ParamBinding> {
        self.bindings
            .iter()
            .find(|(name, _)| *name == param)
            .map(|(_, binding)| *binding)
    }

    pub fn units(&self) -> &[UnitId] {
        &self.units
    }

    pub fn pattern(&self) -> Option<&PatternGate> {
        self.pattern.as_ref()
    }

    fn bind(&mut self, module_param: &'static str, unit: UnitId, unit_param: &'static str) {
        self.bindings.push((
            module_param,
            ParamBinding {
                unit,
                param: unit_param,
            },
        ));
    }
}

/// Options applied to every graph a builder creates
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GraphBuilder {
    /// Longest delay a delay module can reach, in seconds
    pub max_delay: f64,
    /// Decay exponent for reverbs without a `decay` parameter
    pub reverb_decay: f64,
    pub pattern_start_offset: f64,
    pub pattern_loop_gap: f64,
    /// Whether pattern gates re-arm after each sequence
    pub loop_patterns: bool,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self {
            max_delay: 2.0,
            reverb_decay: DEFAULT_DECAY,
            pattern_start_offset: PatternGate::DEFAULT_START_OFFSET,
            pattern_loop_gap: PatternGate::DEFAULT_LOOP_GAP,
            loop_patterns: true,
        }
    }
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loop_patterns(mut self, looping: bool) -> Self {
        self.loop_patterns = looping;
        self
    }

    pub fn with_reverb_decay(mut self, decay: f64) -> Self {
        self.reverb_decay = decay;
        self
    }

    pub fn with_pattern_timing(mut self, start_offset: f64, loop_gap: f64) -> Self {
        self.pattern_start_offset = start_offset;
        self.pattern_loop_gap = loop_gap;
        self
    }

    /// Instantiate every module of `patch` and apply its connections.
    ///
    /// Nothing sounds until [`GraphHandle::start`] is called.
    pub fn build(&self, ctx: &mut AudioContext, patch: &Patch) -> GraphHandle {
        let mut handle = GraphHandle {
            modules: Vec::with_capacity(patch.len()),
            edges: Vec::new(),
            warnings: Vec::new(),
            started: false,
            torn_down: false,
        };

        for module in &patch.modules {
            let nodes = self.instantiate(ctx, module, &mut handle.edges);
            handle.modules.push(nodes);
        }

        let (resolved, errors) = patch.resolve_connections();
        for error in errors {
            warn!(%error, "skipping connection");
            handle.warnings.push(error);
        }
        for connection in &resolved {
            if let Err(error) = handle.wire(ctx, connection) {
                warn!(
                    %error,
                    source = connection.source,
                    target = %connection.target,
                    "skipping connection"
                );
                handle.warnings.push(error);
            }
        }

        debug!(
            modules = handle.modules.len(),
            units = handle.unit_count(),
            edges = handle.edges.len(),
            warnings = handle.warnings.len(),
            "built signal graph"
        );
        handle
    }

    fn instantiate(
        &self,
        ctx: &mut AudioContext,
        module: &ModuleConfig,
        edges: &mut Vec<EdgeId>,
    ) -> ModuleNodes {
        let sample_rate = ctx.sample_rate();
        let mut nodes = ModuleNodes::new(module.module_type);
        let number = |name: &str| {
            module
                .param_or_default(name)
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0)
        };
        let mut wire = |ctx: &mut AudioContext, from: UnitId, to: UnitId| {
            if let Ok(edge) = ctx.connect(from, EdgeTarget::Input(to)) {
                edges.push(edge);
            }
        };

        match module.module_type {
            ModuleType::Oscillator | ModuleType::Lfo => {
                let waveform = module
                    .text("type")
                    .and_then(|t| Waveform::parse(&t))
                    .unwrap_or(Waveform::Sine);
                let osc = ctx.add_unit(OscillatorUnit::new(sample_rate, waveform));
                nodes.units.push(osc);
                nodes.sources.push(osc);
                nodes.mode_unit = Some(osc);
                nodes.bind("frequency", osc, "frequency");

                if module.module_type == ModuleType::Lfo {
                    let amount = ctx.add_unit(GainUnit::new());
                    nodes.units.push(amount);
                    wire(ctx, osc, amount);
                    nodes.bind("amount", amount, "gain");
                    nodes.output = Some(amount);
                } else {
                    nodes.bind("detune", osc, "detune");
                    nodes.output = Some(osc);
                }
            }
            ModuleType::Filter => {
                let response = module
                    .text("type")
                    .and_then(|t| FilterResponse::parse(&t))
                    .unwrap_or(FilterResponse::Lowpass);
                let biquad = ctx.add_unit(BiquadUnit::new(sample_rate, response));
                nodes.units.push(biquad);
                nodes.mode_unit = Some(biquad);
                nodes.bind("frequency", biquad, "frequency");
                nodes.bind("q", biquad, "Q");
                nodes.input = Some(biquad);
                nodes.output = Some(biquad);
            }
            ModuleType::Gain => {
                let gain = ctx.add_unit(GainUnit::new());
                nodes.units.push(gain);
                nodes.bind("gain", gain, "gain");
                nodes.input = Some(gain);
                nodes.output = Some(gain);
            }
            ModuleType::Delay => {
                let delay = ctx.add_unit(DelayLineUnit::new(sample_rate, self.max_delay));
                let feedback = ctx.add_unit(GainUnit::new());
                nodes.units.extend([delay, feedback]);
                wire(ctx, delay, feedback);
                wire(ctx, feedback, delay);
                nodes.bind("delayTime", delay, "delayTime");
                nodes.bind("feedback", feedback, "gain");
                nodes.input = Some(delay);
                nodes.output = Some(delay);
            }
            ModuleType::Reverb => {
                let time = number("time");
                let decay = module.number("decay").unwrap_or(self.reverb_decay);
                let splitter = ctx.add_unit(GainUnit::new());
                let dry = ctx.add_unit(GainUnit::new());
                let convolver = ctx.add_unit(impulse_convolver(sample_rate, time, decay));
                let wet = ctx.add_unit(GainUnit::new());
                let mix = ctx.add_unit(GainUnit::new());
                nodes.units.extend([splitter, dry, convolver, wet, mix]);
                wire(ctx, splitter, dry);
                wire(ctx, splitter, convolver);
                wire(ctx, convolver, wet);
                wire(ctx, dry, mix);
                wire(ctx, wet, mix);
                nodes.bind("mix", wet, "gain");
                nodes.input = Some(splitter);
                nodes.output = Some(mix);
                nodes.reverb = Some(ReverbNodes {
                    splitter,
                    dry,
                    convolver,
                    wet,
                    time,
                    decay,
                });
            }
            ModuleType::Pattern => {
                nodes.pattern = Some(
                    PatternGate::new(PatternParams::from_module(module))
                        .with_looping(self.loop_patterns)
                        .with_start_offset(self.pattern_start_offset)
                        .with_loop_gap(self.pattern_loop_gap),
                );
            }
            ModuleType::Output => {}
        }

        for &(name, binding) in &nodes.bindings {
            if let Ok(param) = ctx.param_mut(binding.unit, binding.param) {
                param.set_value(number(name));
            }
        }
        if let Some(reverb) = nodes.reverb {
            let mix = number("mix");
            if let Ok(param) = ctx.param_mut(reverb.dry, "gain") {
                param.set_value(1.0 - mix);
            }
        }
        nodes
    }
}

fn impulse_convolver(sample_rate: f64, time: f64, decay: f64) -> ConvolverUnit {
    ConvolverUnit::new(&synthesize_impulse(sample_rate, time, decay).mid())
}

/// Build `patch` into `ctx` with default options
pub fn build_graph(ctx: &mut AudioContext, patch: &Patch) -> GraphHandle {
    GraphBuilder::default().build(ctx, patch)
}

/// A built signal graph and everything it owns in the context
#[derive(Debug)]
pub struct GraphHandle {
    modules: Vec<ModuleNodes>,
    /// Edges created by this graph, internal ones included
    edges: Vec<EdgeId>,
    warnings: Vec<PatchError>,
    started: bool,
    torn_down: bool,
}

impl GraphHandle {
    pub fn module(&self, index: usize) -> Option<&ModuleNodes> {
        self.modules.get(index)
    }

    pub fn modules(&self) -> &[ModuleNodes] {
        &self.modules
    }

    /// Connections skipped while building
    pub fn warnings(&self) -> &[PatchError] {
        &self.warnings
    }

    pub fn unit_count(&self) -> usize {
        self.modules.iter().map(|m| m.units.len()).sum()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    fn wire(
        &mut self,
        ctx: &mut AudioContext,
        connection: &ResolvedConnection,
    ) -> Result<(), PatchError> {
        let len = self.modules.len();
        let out_of_range = |index: usize| PatchError::ModuleIndexOutOfRange { index, len };
        let source_type = self
            .modules
            .get(connection.source)
            .ok_or(out_of_range(connection.source))?
            .module_type;
        let unwired = |reason: &'static str| PatchError::ForbiddenConnection {
            source_type,
            target: connection.target.to_string(),
            reason,
        };

        let binding = |modules: &[ModuleNodes], index: usize| -> Result<ParamBinding, PatchError> {
            let nodes = modules.get(index).ok_or(out_of_range(index))?;
            let param = connection.param.as_deref().unwrap_or_default();
            nodes
                .binding(param)
                .ok_or_else(|| PatchError::NotModulatable {
                    module_type: nodes.module_type,
                    param: param.to_string(),
                })
        };

        match connection.kind {
            ConnectionKind::Audio => {
                let from = self.modules[connection.source]
                    .output
                    .ok_or_else(|| unwired("source has no output unit"))?;
                let to = match connection.target {
                    ConnectionTarget::Output => EdgeTarget::Destination,
                    ConnectionTarget::Module(index) => {
                        let input = self
                            .modules
                            .get(index)
                            .ok_or(out_of_range(index))?
                            .input
                            .ok_or_else(|| unwired("target has no input unit"))?;
                        EdgeTarget::Input(input)
                    }
                };
                let edge = ctx
                    .connect(from, to)
                    .map_err(|_| unwired("context refused the edge"))?;
                self.edges.push(edge);
            }
            ConnectionKind::ContinuousParam => {
                let ConnectionTarget::Module(index) = connection.target else {
                    return Err(unwired("the system output has no parameters"));
                };
                let from = self.modules[connection.source]
                    .output
                    .ok_or_else(|| unwired("source has no output unit"))?;
                let target = binding(&self.modules, index)?;
                let edge = ctx
                    .connect_param(from, target.unit, target.param)
                    .map_err(|_| unwired("context refused the edge"))?;
                self.edges.push(edge);
            }
            ConnectionKind::ScheduledParam => {
                let ConnectionTarget::Module(index) = connection.target else {
                    return Err(unwired("the system output has no parameters"));
                };
                let target = binding(&self.modules, index)?;
                let gate = self.modules[connection.source]
                    .pattern
                    .as_mut()
                    .ok_or_else(|| unwired("source does not schedule values"))?;
                gate.connect(ctx, target.unit, target.param)
                    .map_err(|_| unwired("target parameter is gone"))?;
            }
        }
        Ok(())
    }

    /// Start every oscillator now and kick off every connected pattern
    pub fn start(&mut self, ctx: &mut AudioContext) {
        if self.started || self.torn_down {
            return;
        }
        let now = ctx.current_time();
        for nodes in &mut self.modules {
            for &source in &nodes.sources {
                if let Err(error) = ctx.start(source, now) {
                    warn!(%error, "could not start oscillator");
                }
            }
            if let Some(gate) = nodes.pattern.as_mut() {
                gate.start(ctx);
            }
        }
        self.started = true;
    }

    /// Play the graph as one struck note at context time `at`: oscillators
    /// sound `frequency` for `chime.note_length` seconds and every gain
    /// module follows the chime's attack/decay envelope up to its own level
    pub fn strike(&mut self, ctx: &mut AudioContext, at: f64, frequency: f64, chime: &Chime) {
        if self.started || self.torn_down {
            return;
        }
        for nodes in &self.modules {
            match nodes.module_type {
                ModuleType::Oscillator => {
                    if let Some(binding) = nodes.binding("frequency") {
                        if let Ok(param) = ctx.param_mut(binding.unit, binding.param) {
                            param.set_value(frequency);
                        }
                    }
                }
                ModuleType::Gain => {
                    if let Some(binding) = nodes.binding("gain") {
                        if let Ok(param) = ctx.param_mut(binding.unit, binding.param) {
                            let level = param.value();
                            param.set_value(0.0);
                            param.set_value_at_time(0.0, at);
                            param.linear_ramp_to_value_at_time(level, at + chime.attack);
                            param.set_target_at_time(
                                0.0,
                                at + chime.attack,
                                chime.decay_time_constant,
                            );
                        }
                    }
                }
                _ => {}
            }
            for &source in &nodes.sources {
                if let Err(error) = ctx.start(source, at) {
                    warn!(%error, "could not start oscillator");
                }
                let _ = ctx.stop(source, at + chime.note_length);
            }
        }
        self.started = true;
    }

    /// Route a fired context timer to the pattern that scheduled it
    pub fn handle_timer(&mut self, ctx: &mut AudioContext, timer: TimerId, at: f64) -> bool {
        self.modules
            .iter_mut()
            .filter_map(|nodes| nodes.pattern.as_mut())
            .any(|gate| gate.handle_timer(ctx, timer, at))
    }

    /// Push an edited module parameter into the running graph.
    ///
    /// Returns `Ok(false)` when the parameter has no live counterpart.
    pub fn apply_param(
        &mut self,
        ctx: &mut AudioContext,
        module_index: usize,
        name: &str,
        value: &ParamValue,
    ) -> Result<bool, ContextError> {
        let Some(nodes) = self.modules.get_mut(module_index) else {
            return Ok(false);
        };

        if let ParamValue::Text(mode) = value {
            return match (name, nodes.mode_unit) {
                ("type", Some(unit)) => ctx.set_mode(unit, mode),
                _ => Ok(false),
            };
        }
        let Some(number) = value.as_f64() else {
            return Ok(false);
        };

        if let Some(gate) = nodes.pattern.as_mut() {
            return Ok(gate.params_mut().set(name, number));
        }

        if let Some(reverb) = nodes.reverb.as_mut() {
            match name {
                "mix" => {
                    ctx.param_mut(reverb.wet, "gain")?.set_value(number);
                    ctx.param_mut(reverb.dry, "gain")?.set_value(1.0 - number);
                    return Ok(true);
                }
                "time" | "decay" => {
                    if name == "time" {
                        reverb.time = number;
                    } else {
                        reverb.decay = number;
                    }
                    let reverb = *reverb;
                    self.rebuild_convolver(ctx, module_index, reverb)?;
                    return Ok(true);
                }
                _ => return Ok(false),
            }
        }

        match nodes.binding(name) {
            Some(binding) => {
                ctx.param_mut(binding.unit, binding.param)?.set_value(number);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Swap a reverb's convolver for one built from its current time and decay
    fn rebuild_convolver(
        &mut self,
        ctx: &mut AudioContext,
        module_index: usize,
        reverb: ReverbNodes,
    ) -> Result<(), ContextError> {
        let sample_rate = ctx.sample_rate();
        let convolver = ctx.add_unit(impulse_convolver(sample_rate, reverb.time, reverb.decay));
        let feed = ctx.connect(reverb.splitter, EdgeTarget::Input(convolver))?;
        let out = ctx.connect(convolver, EdgeTarget::Input(reverb.wet))?;
        ctx.remove_unit(reverb.convolver)?;
        self.edges.retain(|&edge| ctx.contains_edge(edge));
        self.edges.extend([feed, out]);

        if let Some(nodes) = self.modules.get_mut(module_index) {
            nodes.units.retain(|&unit| unit != reverb.convolver);
            nodes.units.push(convolver);
            if let Some(r) = nodes.reverb.as_mut() {
                r.convolver = convolver;
            }
        }
        Ok(())
    }

    /// Stop every oscillator at context time `when`
    pub fn stop(&mut self, ctx: &mut AudioContext, when: f64) {
        for nodes in &self.modules {
            for &source in &nodes.sources {
                let _ = ctx.stop(source, when);
            }
        }
    }

    /// Destroy patterns, stop oscillators and remove every owned unit and
    /// edge. Safe to call more than once.
    pub fn teardown(&mut self, ctx: &mut AudioContext) {
        if self.torn_down {
            return;
        }
        let now = ctx.current_time();
        for nodes in &mut self.modules {
            if let Some(gate) = nodes.pattern.as_mut() {
                gate.destroy(ctx);
            }
        }
        self.stop(ctx, now);
        for edge in self.edges.drain(..) {
            // Edges touching removed units are already gone
            let _ = ctx.disconnect(edge);
        }
        let mut removed = 0;
        for nodes in &mut self.modules {
            for unit in nodes.units.drain(..) {
                if ctx.remove_unit(unit).is_ok() {
                    removed += 1;
                }
            }
            nodes.sources.clear();
            nodes.bindings.clear();
            nodes.input = None;
            nodes.output = None;
            nodes.mode_unit = None;
            nodes.reverb = None;
        }
        self.torn_down = true;
        debug!(units = removed, "tore down signal graph");
    }
}
