//! # Patchmatch: Guess-the-Sound Synthesizer Game Core
//!
//! `patchmatch` is the engine behind a "guess the sound" game. A hidden target
//! synthesizer patch is generated, the player rebuilds it from the same
//! modules (oscillator, filter, gain, delay, reverb, LFO, pattern gate), and
//! the two patches are compared with a bounded, explainable score.
//!
//! ## Architecture
//!
//! - **Catalog & Patch** - Module types, parameter schemas and the patch
//!   description shared by every other part
//! - **Generator** - Random target patches and curated scenarios
//! - **Signal Graph** - An in-process audio context, processing units, the
//!   graph builder and the pattern gate that automates parameters directly
//! - **Scorer** - Greedy module matching, tolerant parameter comparison and
//!   connection checks
//! - **Session** - One player's game: target preview, workbench, live graph
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use patchmatch::prelude::*;
//!
//! let mut session = SessionState::new(GameConfig::default()).unwrap();
//! session.new_round(&GenerateMode::Random).unwrap();
//! session.play_target().unwrap();
//! let audio = session.advance(44100);
//!
//! let osc = session.add_module(ModuleType::Oscillator);
//! let gain = session.add_module(ModuleType::Gain);
//! session.connect(Connection::audio(osc, gain)).unwrap();
//! session.connect(Connection::to_output(gain)).unwrap();
//!
//! let result = session.score().unwrap();
//! println!("{}", result.report());
//! ```

pub mod builder;
pub mod catalog;
pub mod chime;
pub mod config;
pub mod context;
pub mod error;
pub mod generator;
pub mod impulse;
pub mod param;
pub mod patch;
pub mod pattern;
pub mod presets;
pub mod scoring;
pub mod session;
pub mod units;

#[cfg(feature = "wasm")]
pub mod wasm;

/// Prelude module for convenient imports
pub mod prelude {
    // Catalog & patch model
    pub use crate::catalog::{
        all_schemas, schema_for, Capabilities, ModuleType, OutputSignal, ParamKind, ParamSchema,
        ParamSpec, ParamValue, ToleranceBasis,
    };
    pub use crate::patch::{
        Connection, ConnectionKind, ConnectionTarget, ModulationTarget, ModuleConfig, Patch,
        ResolvedConnection,
    };

    // Generation
    pub use crate::generator::{generate_patch, GenerateMode, GeneratorConfig, PatchGenerator};
    pub use crate::presets::{
        ChallengeScenarios, Scenario, ScenarioCategory, ScenarioInfo, ScenarioLibrary,
    };

    // Signal graph
    pub use crate::builder::{build_graph, GraphBuilder, GraphHandle, ModuleNodes, ParamBinding};
    pub use crate::chime::{strike_chime, Chime, Playback};
    pub use crate::context::{AudioContext, Edge, EdgeId, EdgeTarget, TimerId, UnitId};
    pub use crate::impulse::{synthesize_impulse, synthesize_impulse_with, StereoBuffer};
    pub use crate::param::{AudioParam, AutomationEvent};
    pub use crate::pattern::{PatternGate, PatternParams, PatternState, PatternTarget};
    pub use crate::units::{
        BiquadUnit, ConvolverUnit, DelayLineUnit, FilterResponse, GainUnit, OscillatorUnit,
        TickContext, Unit, UnitParam, Waveform,
    };

    // Scoring
    pub use crate::scoring::{
        hint_module_count, hint_module_types, score, ExplanationLine, ModuleVerdict, ScoreResult,
        Scorer, ScoringConfig,
    };

    // Session
    pub use crate::config::GameConfig;
    pub use crate::error::{ConfigError, ContextError, PatchError, ScenarioError, SessionError};
    pub use crate::session::{ParamOwnership, SessionState};
}

// Re-export key types at crate root for convenience
pub use prelude::*;
