//! Error types for WASM bindings

use crate::error::{ConfigError, SessionError};
use wasm_bindgen::prelude::*;

/// Error type for WASM bindings
#[wasm_bindgen]
pub struct GameError {
    message: String,
}

#[wasm_bindgen]
impl GameError {
    /// Get the error message
    #[wasm_bindgen(getter)]
    pub fn message(&self) -> String {
        self.message.clone()
    }
}

impl From<SessionError> for GameError {
    fn from(e: SessionError) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

impl From<ConfigError> for GameError {
    fn from(e: ConfigError) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

impl From<serde_wasm_bindgen::Error> for GameError {
    fn from(e: serde_wasm_bindgen::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

impl From<&str> for GameError {
    fn from(message: &str) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl GameError {
    /// Convert to JsValue for use as error return
    pub fn into_js(self) -> JsValue {
        JsValue::from_str(&self.message)
    }
}

/// Map any bindable error to a JavaScript error value
pub(crate) fn js_err(e: impl Into<GameError>) -> JsValue {
    e.into().into_js()
}
