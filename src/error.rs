//! Error Types
//!
//! Failures are grouped by where they surface. None of them is fatal: the
//! graph builder logs and skips malformed edges, the generator degrades to a
//! patch without modulation, and session operations refuse with a message the
//! page can show to the player.

use crate::catalog::ModuleType;
use thiserror::Error;

/// A patch reference that does not resolve against the module catalog
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PatchError {
    #[error("module index {index} is out of range (patch has {len} modules)")]
    ModuleIndexOutOfRange { index: usize, len: usize },

    #[error("{module_type} has no parameter named `{param}`")]
    UnknownParam { module_type: ModuleType, param: String },

    #[error("parameter `{param}` of {module_type} cannot be modulated")]
    NotModulatable { module_type: ModuleType, param: String },

    #[error("cannot connect {source_type} to {target}: {reason}")]
    ForbiddenConnection {
        source_type: ModuleType,
        target: String,
        reason: &'static str,
    },

    #[error("invalid value for `{param}` of {module_type}: {reason}")]
    InvalidValue {
        module_type: ModuleType,
        param: String,
        reason: String,
    },
}

/// Errors raised by the audio context when a unit or edge reference is stale
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("unit does not exist")]
    UnknownUnit,

    #[error("connection does not exist")]
    UnknownEdge,

    #[error("{unit_type} unit has no audio input")]
    NoInput { unit_type: &'static str },

    #[error("{unit_type} unit has no parameter `{param}`")]
    UnknownParam {
        unit_type: &'static str,
        param: String,
    },

    #[error("{unit_type} unit is not a source and cannot be started")]
    NotASource { unit_type: &'static str },

    #[error("unit has already been started")]
    AlreadyStarted,
}

/// Errors raised by session-level operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    /// No target patch has been generated for this round
    #[error("No target sound is loaded. Start audio or reset the round first.")]
    NoTargetPatch,

    #[error("no module at index {0}")]
    UnknownModule(usize),

    #[error("no matching connection from module {from} to {to}")]
    UnknownConnection { from: usize, to: String },

    #[error("parameter `{param}` of module {module} is driven by module {driver}")]
    ParamExternallyDriven {
        module: usize,
        param: String,
        driver: usize,
    },

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Scenario(#[from] ScenarioError),
}

/// Errors raised when looking up curated scenarios
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScenarioError {
    #[error("scenario not found: {0}")]
    NotFound(String),
}

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_target_message_is_user_facing() {
        let msg = SessionError::NoTargetPatch.to_string();
        assert!(msg.contains("Start audio"));
        assert!(msg.contains("reset"));
    }

    #[test]
    fn test_patch_error_display() {
        let err = PatchError::NotModulatable {
            module_type: ModuleType::Oscillator,
            param: "type".into(),
        };
        assert_eq!(
            err.to_string(),
            "parameter `type` of oscillator cannot be modulated"
        );
    }

    #[test]
    fn test_session_error_from_patch_error() {
        let err: SessionError = PatchError::ModuleIndexOutOfRange { index: 4, len: 2 }.into();
        assert!(matches!(err, SessionError::Patch(_)));
        assert!(err.to_string().contains("out of range"));
    }
}
