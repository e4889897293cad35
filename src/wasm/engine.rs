//! GameEngine - Main WASM interface for the game core

use super::error::{js_err, GameError};
use crate::catalog::{all_schemas, ModuleType, ParamValue};
use crate::config::GameConfig;
use crate::generator::GenerateMode;
use crate::patch::{Connection, ConnectionTarget};
use crate::presets::ScenarioLibrary;
use crate::session::SessionState;
use serde::Serialize;
use wasm_bindgen::prelude::*;

/// Main WASM interface for one game
#[wasm_bindgen]
pub struct GameEngine {
    session: SessionState,
    scenarios: ScenarioLibrary,
}

#[wasm_bindgen]
impl GameEngine {
    /// Create a game with default settings at the page's sample rate
    #[wasm_bindgen(constructor)]
    pub fn new(sample_rate: f64) -> Result<GameEngine, JsValue> {
        // Initialize panic hook for better error messages
        console_error_panic_hook::set_once();
        Self::with_config(GameConfig::default().with_sample_rate(sample_rate))
    }

    /// Create a game from a JSON configuration
    pub fn from_config(config_json: &str) -> Result<GameEngine, JsValue> {
        console_error_panic_hook::set_once();
        let config = GameConfig::from_json(config_json).map_err(js_err)?;
        Self::with_config(config)
    }

    /// Get the sample rate
    #[wasm_bindgen(getter)]
    pub fn sample_rate(&self) -> f64 {
        self.session.context().sample_rate()
    }

    // =========================================================================
    // Catalog API
    // =========================================================================

    /// Parameter schemas of every module type
    pub fn get_schemas(&self) -> Result<JsValue, JsValue> {
        to_js(&all_schemas())
    }

    /// Parameter schema of one module type
    pub fn get_schema(&self, module_type: &str) -> Result<JsValue, JsValue> {
        to_js(&parse_module_type(module_type)?.schema())
    }

    /// Curated scenarios available for challenge rounds
    pub fn list_scenarios(&self) -> Result<JsValue, JsValue> {
        to_js(&self.scenarios.list())
    }

    // =========================================================================
    // Rounds
    // =========================================================================

    /// Start a round with a random target, or a curated one when a scenario
    /// key is given
    pub fn new_round(&mut self, scenario: Option<String>) -> Result<(), JsValue> {
        let mode = scenario.map_or(GenerateMode::Random, GenerateMode::Preset);
        self.session.new_round(&mode).map_err(js_err)?;
        Ok(())
    }

    /// The target patch, for showing the answer after scoring
    pub fn reveal_target(&self) -> Result<JsValue, JsValue> {
        match self.session.target() {
            Some(target) => to_js(target),
            None => Err(js_err(crate::error::SessionError::NoTargetPatch)),
        }
    }

    /// Play the target for the configured playback window. Chime targets
    /// are struck instead of held.
    pub fn play_target(&mut self) -> Result<(), JsValue> {
        self.session.play_target().map_err(js_err)
    }

    pub fn stop_preview(&mut self) {
        self.session.stop_preview();
    }

    #[wasm_bindgen(getter)]
    pub fn previewing(&self) -> bool {
        self.session.is_previewing()
    }

    // =========================================================================
    // Workbench
    // =========================================================================

    /// Add a module with default parameters and return its index
    pub fn add_module(&mut self, module_type: &str) -> Result<usize, JsValue> {
        Ok(self.session.add_module(parse_module_type(module_type)?))
    }

    pub fn remove_module(&mut self, index: usize) -> Result<(), JsValue> {
        self.session.remove_module(index).map_err(js_err)?;
        Ok(())
    }

    /// Set a parameter to a number or a string. Numbers are clamped into
    /// the parameter's range.
    pub fn set_param(&mut self, index: usize, name: &str, value: JsValue) -> Result<(), JsValue> {
        let value: ParamValue = serde_wasm_bindgen::from_value(value).map_err(js_err)?;
        self.session.set_param(index, name, value).map_err(js_err)
    }

    /// Whether a parameter is currently driven by a pattern module
    pub fn get_ownership(&self, index: usize, name: &str) -> Result<JsValue, JsValue> {
        to_js(&self.session.ownership(index, name))
    }

    /// Connect two modules, or a module parameter when `param` is given.
    /// Returns the connection kind.
    pub fn connect(
        &mut self,
        source: usize,
        target: usize,
        param: Option<String>,
    ) -> Result<JsValue, JsValue> {
        let connection = Connection {
            source,
            target: ConnectionTarget::Module(target),
            param,
        };
        let kind = self.session.connect(connection).map_err(js_err)?;
        to_js(&kind)
    }

    /// Connect a module to the speakers
    pub fn connect_to_output(&mut self, source: usize) -> Result<(), JsValue> {
        self.session
            .connect(Connection::to_output(source))
            .map_err(js_err)?;
        Ok(())
    }

    /// Remove a connection. A missing `target` means the speakers.
    pub fn disconnect(
        &mut self,
        source: usize,
        target: Option<usize>,
        param: Option<String>,
    ) -> Result<(), JsValue> {
        let target = target.map_or(ConnectionTarget::Output, ConnectionTarget::Module);
        self.session
            .disconnect(source, target, param.as_deref())
            .map_err(js_err)?;
        Ok(())
    }

    /// The player's patch
    pub fn get_user_patch(&self) -> Result<JsValue, JsValue> {
        to_js(self.session.user_patch())
    }

    /// Start hearing the player's patch
    pub fn start_live(&mut self) {
        self.session.start_live();
    }

    pub fn stop_live(&mut self) {
        self.session.stop_live();
    }

    // =========================================================================
    // Audio Processing
    // =========================================================================

    /// Render a block of mono samples
    ///
    /// Output is clamped to ±1 so a runaway feedback loop cannot reach the
    /// speakers at full scale.
    pub fn process_block(&mut self, num_samples: usize) -> js_sys::Float32Array {
        const SAFETY_LIMIT: f64 = 1.0;

        let samples = self.session.advance(num_samples);
        let output = js_sys::Float32Array::new_with_length(samples.len() as u32);
        for (i, sample) in samples.iter().enumerate() {
            output.set_index(i as u32, sample.clamp(-SAFETY_LIMIT, SAFETY_LIMIT) as f32);
        }
        output
    }

    // =========================================================================
    // Scoring and hints
    // =========================================================================

    /// Score the player's patch; returns the full result
    pub fn score(&self) -> Result<JsValue, JsValue> {
        let result = self.session.score().map_err(js_err)?;
        to_js(&result)
    }

    /// Score the player's patch; returns the text report
    pub fn score_report(&self) -> Result<String, JsValue> {
        Ok(self.session.score().map_err(js_err)?.report())
    }

    pub fn hint_module_count(&self) -> Result<usize, JsValue> {
        self.session.hint_module_count().map_err(js_err)
    }

    pub fn hint_module_types(&mut self) -> Result<JsValue, JsValue> {
        let types = self.session.hint_module_types().map_err(js_err)?;
        to_js(&types)
    }
}

impl GameEngine {
    fn with_config(config: GameConfig) -> Result<Self, JsValue> {
        Ok(Self {
            session: SessionState::new(config).map_err(js_err)?,
            scenarios: ScenarioLibrary::new(),
        })
    }
}

// Helper functions

fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(value).map_err(js_err)
}

fn parse_module_type(s: &str) -> Result<ModuleType, JsValue> {
    s.parse::<ModuleType>()
        .map_err(|_| GameError::from(format!("Unknown module type: {}", s).as_str()).into_js())
}
