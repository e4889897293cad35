//! Patch Data Model
//!
//! A [`Patch`] is an ordered list of module configurations plus a connection
//! list. A module's position in the list is its identity: connections refer to
//! modules by index, never by any runtime instance id.
//!
//! Connections come in two flavours. Without a `param` they carry audio from
//! the source's output into the target's input (or to the speakers when the
//! target is `"output"`). With a `param` they drive the named parameter of the
//! target. Which wiring strategy applies is decided once, from the catalog, as
//! a [`ConnectionKind`].

use crate::catalog::{schema_for, ModuleType, OutputSignal, ParamValue};
use crate::error::PatchError;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Which module parameter a modulator drives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModulationTarget {
    pub module_index: usize,
    pub param_name: String,
}

impl ModulationTarget {
    pub fn new(module_index: usize, param_name: impl Into<String>) -> Self {
        Self {
            module_index,
            param_name: param_name.into(),
        }
    }
}

/// One module instance in a patch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleConfig {
    #[serde(rename = "type")]
    pub module_type: ModuleType,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modulation_target: Option<ModulationTarget>,
}

impl ModuleConfig {
    /// Create a module with every schema parameter at its default
    pub fn new(module_type: ModuleType) -> Self {
        let params = schema_for(module_type)
            .params
            .iter()
            .map(|p| (p.name.to_string(), p.default_value()))
            .collect();
        Self {
            module_type,
            params,
            modulation_target: None,
        }
    }

    /// Set a parameter value (builder style)
    pub fn with(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    pub fn with_modulation_target(mut self, module_index: usize, param: &str) -> Self {
        self.modulation_target = Some(ModulationTarget::new(module_index, param));
        self
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    /// Parameter value, falling back to the schema default when unset
    pub fn param_or_default(&self, name: &str) -> Option<ParamValue> {
        self.params.get(name).cloned().or_else(|| {
            schema_for(self.module_type)
                .param(name)
                .map(|p| p.default_value())
        })
    }

    /// Numeric parameter value, falling back to the schema default
    pub fn number(&self, name: &str) -> Option<f64> {
        self.param_or_default(name).and_then(|v| v.as_f64())
    }

    /// Text parameter value, falling back to the schema default
    pub fn text(&self, name: &str) -> Option<String> {
        match self.param_or_default(name) {
            Some(ParamValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// Set a parameter after checking it against the schema
    pub fn set_param(&mut self, name: &str, value: ParamValue) -> Result<(), PatchError> {
        let spec = schema_for(self.module_type)
            .param(name)
            .ok_or_else(|| PatchError::UnknownParam {
                module_type: self.module_type,
                param: name.to_string(),
            })?;
        spec.accepts(&value)
            .map_err(|reason| PatchError::InvalidValue {
                module_type: self.module_type,
                param: name.to_string(),
                reason,
            })?;
        self.params.insert(name.to_string(), value);
        Ok(())
    }

    /// Set a parameter from a player edit: checked like [`set_param`],
    /// with numbers clamped into the editable range. Returns the value
    /// actually stored.
    ///
    /// [`set_param`]: ModuleConfig::set_param
    pub fn edit_param(&mut self, name: &str, value: ParamValue) -> Result<ParamValue, PatchError> {
        let value = match (schema_for(self.module_type).param(name), value) {
            (Some(spec), ParamValue::Number(v)) if v.is_finite() => {
                ParamValue::Number(spec.clamp(v))
            }
            (_, value) => value,
        };
        self.set_param(name, value.clone())?;
        Ok(value)
    }
}

/// Where a connection ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionTarget {
    Module(usize),
    /// The system output (speakers)
    Output,
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionTarget::Module(i) => write!(f, "{}", i),
            ConnectionTarget::Output => f.write_str("output"),
        }
    }
}

impl From<usize> for ConnectionTarget {
    fn from(index: usize) -> Self {
        ConnectionTarget::Module(index)
    }
}

impl Serialize for ConnectionTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ConnectionTarget::Module(i) => serializer.serialize_u64(*i as u64),
            ConnectionTarget::Output => serializer.serialize_str("output"),
        }
    }
}

impl<'de> Deserialize<'de> for ConnectionTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TargetVisitor;

        impl<'de> Visitor<'de> for TargetVisitor {
            type Value = ConnectionTarget;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a module index or the string \"output\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(ConnectionTarget::Module(v as usize))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                usize::try_from(v)
                    .map(ConnectionTarget::Module)
                    .map_err(|_| E::custom("module index must not be negative"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                if v == "output" {
                    Ok(ConnectionTarget::Output)
                } else {
                    Err(E::invalid_value(de::Unexpected::Str(v), &self))
                }
            }
        }

        deserializer.deserialize_any(TargetVisitor)
    }
}

/// A connection record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub source: usize,
    pub target: ConnectionTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
}

impl Connection {
    /// Audio connection between two modules
    pub fn audio(source: usize, target: usize) -> Self {
        Self {
            source,
            target: ConnectionTarget::Module(target),
            param: None,
        }
    }

    /// Audio connection from a module to the system output
    pub fn to_output(source: usize) -> Self {
        Self {
            source,
            target: ConnectionTarget::Output,
            param: None,
        }
    }

    /// Parameter modulation connection
    pub fn modulation(source: usize, target: usize, param: impl Into<String>) -> Self {
        Self {
            source,
            target: ConnectionTarget::Module(target),
            param: Some(param.into()),
        }
    }

    pub fn is_audio(&self) -> bool {
        self.param.is_none()
    }
}

/// Wiring strategy for a connection, decided from the module catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionKind {
    /// Source audio output feeds the target's audio input or the sink
    Audio,
    /// Source signal is added into a parameter of the target
    ContinuousParam,
    /// Source schedules a value curve directly on a parameter of the target
    ScheduledParam,
}

/// A connection whose kind and endpoints have been checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConnection {
    pub source: usize,
    pub target: ConnectionTarget,
    pub param: Option<String>,
    pub kind: ConnectionKind,
}

/// A synthesizer patch: modules plus connections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub modules: Vec<ModuleConfig>,
    pub connections: Vec<Connection>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a module and return its index
    pub fn add_module(&mut self, module: ModuleConfig) -> usize {
        self.modules.push(module);
        self.modules.len() - 1
    }

    /// Append a connection without checking it
    pub fn add_connection(&mut self, connection: Connection) {
        self.connections.push(connection);
    }

    /// Builder-style module append
    pub fn with_module(mut self, module: ModuleConfig) -> Self {
        self.add_module(module);
        self
    }

    /// Builder-style connection append
    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.add_connection(connection);
        self
    }

    pub fn module(&self, index: usize) -> Option<&ModuleConfig> {
        self.modules.get(index)
    }

    pub fn module_mut(&mut self, index: usize) -> Option<&mut ModuleConfig> {
        self.modules.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Number of modules of a given type
    pub fn count_of(&self, module_type: ModuleType) -> usize {
        self.modules
            .iter()
            .filter(|m| m.module_type == module_type)
            .count()
    }

    /// Connections without a `param`
    pub fn audio_connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter().filter(|c| c.is_audio())
    }

    /// Connections with a `param`
    pub fn modulation_connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter().filter(|c| !c.is_audio())
    }

    /// Treat a connection into an explicit `output` module as a connection to
    /// the system output.
    pub fn effective_target(&self, target: ConnectionTarget) -> ConnectionTarget {
        match target {
            ConnectionTarget::Module(i)
                if self
                    .modules
                    .get(i)
                    .is_some_and(|m| m.module_type == ModuleType::Output) =>
            {
                ConnectionTarget::Output
            }
            other => other,
        }
    }

    /// Decide the wiring strategy for a connection, checking its endpoints
    /// against the module catalog.
    pub fn connection_kind(&self, connection: &Connection) -> Result<ConnectionKind, PatchError> {
        let len = self.modules.len();
        let source = self
            .modules
            .get(connection.source)
            .ok_or(PatchError::ModuleIndexOutOfRange {
                index: connection.source,
                len,
            })?;
        let source_type = source.module_type;
        let target = self.effective_target(connection.target);

        let forbidden = |target: String, reason: &'static str| PatchError::ForbiddenConnection {
            source_type,
            target,
            reason,
        };

        let source_signal = source_type
            .capabilities()
            .output
            .ok_or_else(|| forbidden(target.to_string(), "source has no output"))?;

        match (&connection.param, target) {
            (None, ConnectionTarget::Output) => {
                if source_signal == OutputSignal::Audio {
                    Ok(ConnectionKind::Audio)
                } else {
                    Err(forbidden("output".into(), "source does not produce audio"))
                }
            }
            (None, ConnectionTarget::Module(index)) => {
                let target_module = self
                    .modules
                    .get(index)
                    .ok_or(PatchError::ModuleIndexOutOfRange { index, len })?;
                if source_signal != OutputSignal::Audio {
                    return Err(forbidden(
                        target_module.module_type.to_string(),
                        "source does not produce audio",
                    ));
                }
                if !target_module.module_type.has_audio_input() {
                    return Err(forbidden(
                        target_module.module_type.to_string(),
                        "target has no audio input",
                    ));
                }
                Ok(ConnectionKind::Audio)
            }
            (Some(_), ConnectionTarget::Output) => Err(forbidden(
                "output".into(),
                "the system output has no parameters",
            )),
            (Some(param), ConnectionTarget::Module(index)) => {
                let target_module = self
                    .modules
                    .get(index)
                    .ok_or(PatchError::ModuleIndexOutOfRange { index, len })?;
                let target_type = target_module.module_type;
                if !target_type.accepts_modulation() {
                    return Err(forbidden(
                        target_type.to_string(),
                        "target cannot be modulated",
                    ));
                }
                let spec = schema_for(target_type).param(param).ok_or_else(|| {
                    PatchError::UnknownParam {
                        module_type: target_type,
                        param: param.clone(),
                    }
                })?;
                if !spec.modulatable {
                    return Err(PatchError::NotModulatable {
                        module_type: target_type,
                        param: param.clone(),
                    });
                }
                match source_signal {
                    OutputSignal::Schedule => {
                        if !spec.gateable {
                            return Err(forbidden(
                                format!("{}.{}", target_type, param),
                                "patterns can only gate levels",
                            ));
                        }
                        Ok(ConnectionKind::ScheduledParam)
                    }
                    OutputSignal::Modulation | OutputSignal::Audio => {
                        Ok(ConnectionKind::ContinuousParam)
                    }
                }
            }
        }
    }

    /// Resolve every connection, splitting them into usable connections and
    /// the errors of the ones that must be skipped. Order is preserved.
    pub fn resolve_connections(&self) -> (Vec<ResolvedConnection>, Vec<PatchError>) {
        let mut resolved = Vec::with_capacity(self.connections.len());
        let mut errors = Vec::new();
        for connection in &self.connections {
            match self.connection_kind(connection) {
                Ok(kind) => resolved.push(ResolvedConnection {
                    source: connection.source,
                    target: self.effective_target(connection.target),
                    param: connection.param.clone(),
                    kind,
                }),
                Err(e) => errors.push(e),
            }
        }
        (resolved, errors)
    }

    /// Check every module and connection against the catalog
    pub fn validate(&self) -> Vec<PatchError> {
        let mut errors = Vec::new();
        for module in &self.modules {
            let schema = schema_for(module.module_type);
            for (name, value) in &module.params {
                match schema.param(name) {
                    Some(spec) => {
                        if let Err(reason) = spec.accepts(value) {
                            errors.push(PatchError::InvalidValue {
                                module_type: module.module_type,
                                param: name.clone(),
                                reason,
                            });
                        }
                    }
                    None => errors.push(PatchError::UnknownParam {
                        module_type: module.module_type,
                        param: name.clone(),
                    }),
                }
            }
            if let Some(target) = &module.modulation_target {
                let connection =
                    Connection::modulation(0, target.module_index, target.param_name.clone());
                if let Err(e) = self.check_param_target(&connection) {
                    errors.push(e);
                }
            }
        }
        errors.extend(self.resolve_connections().1);
        errors
    }

    fn check_param_target(&self, connection: &Connection) -> Result<(), PatchError> {
        let ConnectionTarget::Module(index) = connection.target else {
            return Ok(());
        };
        let target = self
            .modules
            .get(index)
            .ok_or(PatchError::ModuleIndexOutOfRange {
                index,
                len: self.modules.len(),
            })?;
        let Some(param) = &connection.param else {
            return Ok(());
        };
        match schema_for(target.module_type).param(param) {
            Some(spec) if spec.modulatable => Ok(()),
            Some(_) => Err(PatchError::NotModulatable {
                module_type: target.module_type,
                param: param.clone(),
            }),
            None => Err(PatchError::UnknownParam {
                module_type: target.module_type,
                param: param.clone(),
            }),
        }
    }

    /// Remove a module, dropping its connections and shifting later indices
    /// down by one. Modulation targets pointing at the removed module are
    /// cleared.
    pub fn remove_module(&mut self, index: usize) -> Option<ModuleConfig> {
        if index >= self.modules.len() {
            return None;
        }
        let removed = self.modules.remove(index);
        let shift = |i: usize| if i > index { i - 1 } else { i };

        self.connections.retain(|c| {
            c.source != index && c.target != ConnectionTarget::Module(index)
        });
        for c in &mut self.connections {
            c.source = shift(c.source);
            if let ConnectionTarget::Module(t) = c.target {
                c.target = ConnectionTarget::Module(shift(t));
            }
        }
        for m in &mut self.modules {
            if m
                .modulation_target
                .as_ref()
                .is_some_and(|t| t.module_index == index)
            {
                m.modulation_target = None;
            }
            if let Some(t) = &mut m.modulation_target {
                t.module_index = shift(t.module_index);
            }
        }
        Some(removed)
    }

    /// Serialize to a JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from a JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
