//! WASM bindings for Patchmatch
//!
//! This module provides the JavaScript-facing API the game page uses: round
//! setup, target preview, the player's workbench, rendering and scoring.

mod engine;
mod error;

pub use engine::GameEngine;
pub use error::GameError;

// Re-export wasm_bindgen for convenience
pub use wasm_bindgen::prelude::*;
