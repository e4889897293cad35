//! Patch Generator
//!
//! Produces the hidden target patch for a round. In random mode the patch is
//! assembled from the module catalog under probabilistic inclusion rules; in
//! preset mode a curated scenario is looked up by key and returned as is.
//!
//! Random patches always read as one chain in canonical order
//! (oscillator → filter → gain → delay → reverb → output), optionally with one
//! LFO or pattern module driving a parameter of a chain module.

use crate::catalog::{schema_for, ModuleType, ParamKind, ParamValue, Sampling};
use crate::chime::Playback;
use crate::error::ScenarioError;
use crate::patch::{Connection, ModuleConfig, Patch};
use crate::presets::ScenarioLibrary;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How a target patch is produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerateMode {
    /// Random patch from the catalog
    Random,
    /// Curated scenario, keyed by scenario identifier
    Preset(String),
}

impl GenerateMode {
    pub fn preset(key: impl Into<String>) -> Self {
        GenerateMode::Preset(key.into())
    }
}

/// Probabilities used by random generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub filter_probability: f64,
    pub delay_probability: f64,
    pub reverb_probability: f64,
    /// Chance of adding one modulation module
    pub modulation_probability: f64,
    /// Share of modulation modules that are LFOs rather than patterns
    pub lfo_share: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            filter_probability: 0.7,
            delay_probability: 0.7,
            reverb_probability: 0.6,
            modulation_probability: 0.5,
            lfo_share: 0.8,
        }
    }
}

impl GeneratorConfig {
    /// Configuration that never adds optional modules or modulation
    pub fn minimal() -> Self {
        Self {
            filter_probability: 0.0,
            delay_probability: 0.0,
            reverb_probability: 0.0,
            modulation_probability: 0.0,
            lfo_share: 0.8,
        }
    }

    pub fn with_modulation_probability(mut self, p: f64) -> Self {
        self.modulation_probability = p;
        self
    }

    pub fn with_lfo_share(mut self, share: f64) -> Self {
        self.lfo_share = share;
        self
    }

    /// Clamp every probability into [0, 1]
    pub fn sanitized(mut self) -> Self {
        for p in [
            &mut self.filter_probability,
            &mut self.delay_probability,
            &mut self.reverb_probability,
            &mut self.modulation_probability,
            &mut self.lfo_share,
        ] {
            *p = if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 };
        }
        self
    }
}

/// Target patch generator
#[derive(Debug, Clone, Default)]
pub struct PatchGenerator {
    config: GeneratorConfig,
    scenarios: ScenarioLibrary,
}

impl PatchGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self {
            config: config.sanitized(),
            scenarios: ScenarioLibrary::new(),
        }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Produce a target patch for the given mode
    pub fn generate<R: Rng + ?Sized>(
        &self,
        mode: &GenerateMode,
        rng: &mut R,
    ) -> Result<Patch, ScenarioError> {
        match mode {
            GenerateMode::Random => Ok(self.generate_random(rng)),
            GenerateMode::Preset(key) => self.scenarios.patch(key),
        }
    }

    /// How targets produced for `mode` are auditioned
    pub fn playback(&self, mode: &GenerateMode) -> Playback {
        match mode {
            GenerateMode::Random => Playback::Continuous,
            GenerateMode::Preset(key) => self.scenarios.playback(key),
        }
    }

    /// Produce a random target patch. Never fails.
    pub fn generate_random<R: Rng + ?Sized>(&self, rng: &mut R) -> Patch {
        let mut chain = vec![ModuleType::Oscillator];
        if rng.gen_bool(self.config.filter_probability) {
            chain.push(ModuleType::Filter);
        }
        chain.push(ModuleType::Gain);
        if rng.gen_bool(self.config.delay_probability) {
            chain.push(ModuleType::Delay);
        }
        if rng.gen_bool(self.config.reverb_probability) {
            chain.push(ModuleType::Reverb);
        }

        let mut patch = Patch::new();
        for &module_type in &chain {
            patch.add_module(random_module(module_type, rng));
        }

        if rng.gen_bool(self.config.modulation_probability) {
            let modulator = if rng.gen_bool(self.config.lfo_share) {
                ModuleType::Lfo
            } else {
                ModuleType::Pattern
            };
            match pick_modulation_target(&patch, modulator, rng) {
                Some((index, param)) => {
                    debug!(%modulator, target = index, param, "adding modulation");
                    patch.add_module(
                        random_module(modulator, rng).with_modulation_target(index, param),
                    );
                }
                None => debug!(%modulator, "no eligible modulation target, omitting"),
            }
        }

        patch.connections = derive_connections(&patch);
        debug!(
            modules = patch.len(),
            connections = patch.connections.len(),
            "generated random target patch"
        );
        patch
    }
}

/// Create a module of the given type with every sampled parameter drawn
/// uniformly from its generation range
pub fn random_module<R: Rng + ?Sized>(module_type: ModuleType, rng: &mut R) -> ModuleConfig {
    let mut module = ModuleConfig::new(module_type);
    for spec in schema_for(module_type).params {
        let value = match spec.kind {
            ParamKind::Choice { options, default } => {
                ParamValue::from(*options.choose(rng).unwrap_or(&default))
            }
            ParamKind::Number {
                sampling: Some(sampling),
                ..
            } => ParamValue::Number(sample_number(sampling, rng)),
            ParamKind::Number { .. } => continue,
        };
        module.params.insert(spec.name.to_string(), value);
    }
    module
}

fn sample_number<R: Rng + ?Sized>(sampling: Sampling, rng: &mut R) -> f64 {
    let Sampling { min, max, decimals } = sampling;
    if decimals == 0 {
        let lo = min.ceil() as i64;
        let hi = max.floor() as i64;
        return rng.gen_range(lo..=hi) as f64;
    }
    let raw = rng.gen_range(min..max);
    let scale = 10f64.powi(decimals as i32);
    ((raw * scale).round() / scale).clamp(min, max)
}

/// Choose which chain module parameter a new modulator drives
fn pick_modulation_target<R: Rng + ?Sized>(
    patch: &Patch,
    modulator: ModuleType,
    rng: &mut R,
) -> Option<(usize, &'static str)> {
    let eligible: Vec<(usize, &'static str)> = patch
        .modules
        .iter()
        .enumerate()
        .filter(|(_, m)| !m.module_type.is_modulator())
        .filter_map(|(i, m)| {
            let param = m.module_type.primary_modulation_param()?;
            let spec = schema_for(m.module_type).param(param)?;
            let suitable = match modulator {
                ModuleType::Pattern => spec.gateable,
                _ => spec.modulatable,
            };
            suitable.then_some((i, param))
        })
        .collect();
    eligible.choose(rng).copied()
}

/// Derive the connection list of a generated patch: the audio chain in module
/// order ending at the output, then one edge per modulation target.
pub fn derive_connections(patch: &Patch) -> Vec<Connection> {
    let chain: Vec<usize> = patch
        .modules
        .iter()
        .enumerate()
        .filter(|(_, m)| !m.module_type.is_modulator() && m.module_type != ModuleType::Output)
        .map(|(i, _)| i)
        .collect();

    let mut connections: Vec<Connection> = chain
        .windows(2)
        .map(|pair| Connection::audio(pair[0], pair[1]))
        .collect();
    if let Some(&last) = chain.last() {
        connections.push(Connection::to_output(last));
    }

    for (i, module) in patch.modules.iter().enumerate() {
        if !module.module_type.is_modulator() {
            continue;
        }
        if let Some(target) = &module.modulation_target {
            connections.push(Connection::modulation(
                i,
                target.module_index,
                target.param_name.clone(),
            ));
        }
    }
    connections
}

/// Generate a target patch with default probabilities and the thread-local
/// random generator
pub fn generate_patch(mode: &GenerateMode) -> Result<Patch, ScenarioError> {
    PatchGenerator::default().generate(mode, &mut rand::thread_rng())
}
