//! Scenario Library
//!
//! Curated target patches for the challenge rounds. Each scenario imitates an
//! everyday sound with the same modules the player has on the workbench, so a
//! perfect reconstruction is always possible.
//!
//! # Example
//!
//! ```ignore
//! use patchmatch::prelude::*;
//!
//! let library = ScenarioLibrary::new();
//! for scenario in library.list() {
//!     println!("{}: {}", scenario.key, scenario.description);
//! }
//!
//! let siren = library.patch("siren")?;
//! ```

use crate::catalog::ModuleType;
use crate::chime::{Chime, Playback};
use crate::error::ScenarioError;
use crate::patch::{Connection, ModuleConfig, Patch};
use serde::Serialize;

/// Scenario category for organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScenarioCategory {
    /// Sirens, alarms and other attention signals
    Alert,
    /// Appliances and household chimes
    Household,
    /// Telephone tones
    Telephone,
    /// Vehicles
    Vehicle,
    /// Animals and outdoor sounds
    Nature,
}

/// Scenario metadata
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioInfo {
    /// Lookup key
    pub key: String,
    /// Display title
    pub title: String,
    pub category: ScenarioCategory,
    pub description: String,
    /// Tags for searching
    pub tags: Vec<String>,
    /// How the target is auditioned
    pub playback: Playback,
}

impl ScenarioInfo {
    pub fn new(key: impl Into<String>, title: impl Into<String>, category: ScenarioCategory) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            category,
            description: String::new(),
            tags: Vec::new(),
            playback: Playback::Continuous,
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_playback(mut self, playback: Playback) -> Self {
        self.playback = playback;
        self
    }
}

/// A scenario ready to be used as a round target
#[derive(Debug, Clone, Serialize)]
pub struct Scenario {
    pub info: ScenarioInfo,
    pub patch: Patch,
}

/// Library of curated scenarios
#[derive(Debug, Clone, Default)]
pub struct ScenarioLibrary {
    _private: (),
}

impl ScenarioLibrary {
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// Get a scenario with its metadata
    pub fn get(&self, key: &str) -> Option<Scenario> {
        let info = Self::all_scenarios().into_iter().find(|s| s.key == key)?;
        let patch = Self::load(key)?;
        Some(Scenario { info, patch })
    }

    /// Target patch of a scenario
    pub fn patch(&self, key: &str) -> Result<Patch, ScenarioError> {
        Self::load(key).ok_or_else(|| ScenarioError::NotFound(key.to_string()))
    }

    /// How a scenario's target is auditioned; unknown keys play continuously
    pub fn playback(&self, key: &str) -> Playback {
        Self::all_scenarios()
            .into_iter()
            .find(|s| s.key == key)
            .map_or(Playback::Continuous, |s| s.playback)
    }

    /// Search scenarios by multiple tags (matches any)
    pub fn search_tags(&self, tags: &[&str]) -> Vec<ScenarioInfo> {
        Self::all_scenarios()
            .into_iter()
            .filter(|s| {
                tags.iter().any(|search_tag| {
                    let search_lower = search_tag.to_lowercase();
                    s.tags.iter().any(|t| t.to_lowercase().contains(&search_lower))
                })
            })
            .collect()
    }

    /// All scenario infos
    pub fn list(&self) -> Vec<ScenarioInfo> {
        Self::all_scenarios()
    }

    /// Scenario keys in library order
    pub fn keys(&self) -> Vec<String> {
        Self::all_scenarios().into_iter().map(|s| s.key).collect()
    }

    pub fn by_category(&self, category: ScenarioCategory) -> Vec<ScenarioInfo> {
        Self::all_scenarios()
            .into_iter()
            .filter(|s| s.category == category)
            .collect()
    }

    fn all_scenarios() -> Vec<ScenarioInfo> {
        vec![
            ScenarioInfo::new("siren", "Ambulance Siren", ScenarioCategory::Alert)
                .with_description("Sine tone swept between two pitches by a square LFO")
                .with_tag("lfo")
                .with_tag("pitch"),
            ScenarioInfo::new("cicada", "Cicada", ScenarioCategory::Nature)
                .with_description("Band-passed sawtooth with fast pitch modulation")
                .with_tag("lfo")
                .with_tag("filter")
                .with_tag("pitch"),
            ScenarioInfo::new("doorbell", "Doorbell", ScenarioCategory::Household)
                .with_description("Soft triangle chime in a small room")
                .with_tag("reverb")
                .with_tag("filter")
                .with_playback(Playback::Chime(Chime::DOORBELL)),
            ScenarioInfo::new("horn", "Car Horn", ScenarioCategory::Vehicle)
                .with_description("Two square waves gated into a double honk")
                .with_tag("pattern")
                .with_tag("filter")
                .with_tag("chord"),
            ScenarioInfo::new("microwave", "Microwave Done", ScenarioCategory::Household)
                .with_description("1 kHz beeps chopped by a square LFO on the level")
                .with_tag("lfo")
                .with_tag("level"),
            ScenarioInfo::new("alarm", "Alarm Clock", ScenarioCategory::Alert)
                .with_description("Fast square-wave beeping")
                .with_tag("lfo")
                .with_tag("level")
                .with_tag("filter"),
            ScenarioInfo::new("blinker", "Turn Signal", ScenarioCategory::Vehicle)
                .with_description("Slow clicking from a high-passed square wave")
                .with_tag("lfo")
                .with_tag("level")
                .with_tag("filter"),
            ScenarioInfo::new("dial", "Dial Tone", ScenarioCategory::Telephone)
                .with_description("Two steady sine tones mixed together")
                .with_tag("chord"),
            ScenarioInfo::new("startup", "Computer Startup", ScenarioCategory::Household)
                .with_description("Slowly rising and falling sine tone")
                .with_tag("lfo")
                .with_tag("pitch")
                .with_tag("filter"),
            ScenarioInfo::new("phone", "Phone Ring", ScenarioCategory::Telephone)
                .with_description("Octave sine pair switched on and off")
                .with_tag("lfo")
                .with_tag("level")
                .with_tag("chord"),
        ]
    }

    /// Load a scenario patch by key
    pub fn load(key: &str) -> Option<Patch> {
        match key {
            "siren" => Some(ChallengeScenarios::siren()),
            "cicada" => Some(ChallengeScenarios::cicada()),
            "doorbell" => Some(ChallengeScenarios::doorbell()),
            "horn" => Some(ChallengeScenarios::horn()),
            "microwave" => Some(ChallengeScenarios::microwave()),
            "alarm" => Some(ChallengeScenarios::alarm()),
            "blinker" => Some(ChallengeScenarios::blinker()),
            "dial" => Some(ChallengeScenarios::dial()),
            "startup" => Some(ChallengeScenarios::startup()),
            "phone" => Some(ChallengeScenarios::phone()),
            _ => None,
        }
    }
}

fn oscillator(waveform: &str, frequency: f64) -> ModuleConfig {
    ModuleConfig::new(ModuleType::Oscillator)
        .with("type", waveform)
        .with("frequency", frequency)
        .with("detune", 0.0)
}

fn filter(response: &str, frequency: f64, q: f64) -> ModuleConfig {
    ModuleConfig::new(ModuleType::Filter)
        .with("type", response)
        .with("frequency", frequency)
        .with("q", q)
}

fn gain(level: f64) -> ModuleConfig {
    ModuleConfig::new(ModuleType::Gain).with("gain", level)
}

fn lfo(waveform: &str, frequency: f64, amount: f64) -> ModuleConfig {
    ModuleConfig::new(ModuleType::Lfo)
        .with("type", waveform)
        .with("frequency", frequency)
        .with("amount", amount)
}

/// Challenge round targets
pub struct ChallengeScenarios;

impl ChallengeScenarios {
    pub fn siren() -> Patch {
        Patch::new()
            .with_module(oscillator("sine", 865.0))
            .with_module(gain(0.3))
            .with_module(lfo("square", 0.83, 95.0).with_modulation_target(0, "frequency"))
            .with_connection(Connection::audio(0, 1))
            .with_connection(Connection::modulation(2, 0, "frequency"))
            .with_connection(Connection::to_output(1))
    }

    pub fn cicada() -> Patch {
        Patch::new()
            .with_module(oscillator("sawtooth", 3500.0))
            .with_module(filter("bandpass", 4200.0, 8.0))
            .with_module(gain(0.25))
            .with_module(lfo("square", 12.0, 800.0).with_modulation_target(0, "frequency"))
            .with_connection(Connection::audio(0, 1))
            .with_connection(Connection::audio(1, 2))
            .with_connection(Connection::modulation(3, 0, "frequency"))
            .with_connection(Connection::to_output(2))
    }

    /// Previewed as a struck two-note chime, see [`Chime::DOORBELL`]
    pub fn doorbell() -> Patch {
        Patch::new()
            .with_module(oscillator("triangle", 783.99))
            .with_module(filter("lowpass", 1200.0, 1.0))
            .with_module(gain(0.4))
            .with_module(
                ModuleConfig::new(ModuleType::Reverb)
                    .with("mix", 0.4)
                    .with("time", 1.8)
                    .with("decay", 2.0),
            )
            .with_connection(Connection::audio(0, 1))
            .with_connection(Connection::audio(1, 2))
            .with_connection(Connection::audio(2, 3))
            .with_connection(Connection::to_output(3))
    }

    pub fn horn() -> Patch {
        Patch::new()
            .with_module(oscillator("square", 440.0))
            .with_module(oscillator("square", 554.0))
            .with_module(filter("lowpass", 1200.0, 1.5))
            .with_module(gain(0.5))
            .with_module(
                ModuleConfig::new(ModuleType::Pattern)
                    .with("onTime", 0.15)
                    .with("offTime", 0.1)
                    .with("repeat", 2.0),
            )
            .with_connection(Connection::audio(0, 2))
            .with_connection(Connection::audio(1, 2))
            .with_connection(Connection::audio(2, 3))
            .with_connection(Connection::modulation(4, 3, "gain"))
            .with_connection(Connection::to_output(3))
    }

    pub fn microwave() -> Patch {
        Patch::new()
            .with_module(oscillator("sine", 1000.0))
            .with_module(gain(0.6))
            .with_module(lfo("square", 2.5, 1000.0).with_modulation_target(1, "gain"))
            .with_connection(Connection::audio(0, 1))
            .with_connection(Connection::modulation(2, 1, "gain"))
            .with_connection(Connection::to_output(1))
    }

    pub fn alarm() -> Patch {
        Self::gated_beep("square", 880.0, filter("lowpass", 2000.0, 1.0), 0.5, 4.0, 0.5)
    }

    pub fn blinker() -> Patch {
        Self::gated_beep("square", 800.0, filter("highpass", 200.0, 1.0), 0.3, 1.33, 0.3)
    }

    pub fn dial() -> Patch {
        Patch::new()
            .with_module(oscillator("sine", 350.0))
            .with_module(oscillator("sine", 440.0))
            .with_module(gain(0.3))
            .with_connection(Connection::audio(0, 2))
            .with_connection(Connection::audio(1, 2))
            .with_connection(Connection::to_output(2))
    }

    pub fn startup() -> Patch {
        Patch::new()
            .with_module(oscillator("sine", 262.0))
            .with_module(filter("lowpass", 2000.0, 1.0))
            .with_module(gain(0.4))
            .with_module(lfo("sine", 0.8, 130.0).with_modulation_target(0, "frequency"))
            .with_connection(Connection::audio(0, 1))
            .with_connection(Connection::audio(1, 2))
            .with_connection(Connection::modulation(3, 0, "frequency"))
            .with_connection(Connection::to_output(2))
    }

    pub fn phone() -> Patch {
        Patch::new()
            .with_module(oscillator("sine", 440.0))
            .with_module(oscillator("sine", 880.0))
            .with_module(gain(0.4))
            .with_module(lfo("square", 0.33, 0.4).with_modulation_target(2, "gain"))
            .with_connection(Connection::audio(0, 2))
            .with_connection(Connection::audio(1, 2))
            .with_connection(Connection::modulation(3, 2, "gain"))
            .with_connection(Connection::to_output(2))
    }

    /// Oscillator → filter → gain with a square LFO on the level
    fn gated_beep(
        waveform: &str,
        frequency: f64,
        tone: ModuleConfig,
        level: f64,
        rate: f64,
        depth: f64,
    ) -> Patch {
        Patch::new()
            .with_module(oscillator(waveform, frequency))
            .with_module(tone)
            .with_module(gain(level))
            .with_module(lfo("square", rate, depth).with_modulation_target(2, "gain"))
            .with_connection(Connection::audio(0, 1))
            .with_connection(Connection::audio(1, 2))
            .with_connection(Connection::modulation(3, 2, "gain"))
            .with_connection(Connection::to_output(2))
    }
}
