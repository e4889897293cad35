//! Module Catalog
//!
//! Static description of every module type the game knows about: which
//! parameters it has, their defaults and editable ranges, how the generator
//! samples them, how the scorer tolerates differences, and which of them may
//! be driven by another module. The catalog is pure data and has no state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Oscillator and LFO waveforms
pub const WAVEFORMS: &[&str] = &["sine", "square", "sawtooth", "triangle"];

/// Filter response types
pub const FILTER_TYPES: &[&str] = &["lowpass", "highpass", "bandpass", "notch", "peaking"];

/// The kinds of module a patch can contain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
    Oscillator,
    Filter,
    Gain,
    Delay,
    Reverb,
    Lfo,
    Pattern,
    Output,
}

impl ModuleType {
    pub const ALL: [ModuleType; 8] = [
        ModuleType::Oscillator,
        ModuleType::Filter,
        ModuleType::Gain,
        ModuleType::Delay,
        ModuleType::Reverb,
        ModuleType::Lfo,
        ModuleType::Pattern,
        ModuleType::Output,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleType::Oscillator => "oscillator",
            ModuleType::Filter => "filter",
            ModuleType::Gain => "gain",
            ModuleType::Delay => "delay",
            ModuleType::Reverb => "reverb",
            ModuleType::Lfo => "lfo",
            ModuleType::Pattern => "pattern",
            ModuleType::Output => "output",
        }
    }

    /// Static I/O capabilities of this module type
    pub fn capabilities(&self) -> Capabilities {
        match self {
            ModuleType::Oscillator => Capabilities {
                has_audio_input: false,
                output: Some(OutputSignal::Audio),
            },
            ModuleType::Filter | ModuleType::Gain | ModuleType::Delay | ModuleType::Reverb => {
                Capabilities {
                    has_audio_input: true,
                    output: Some(OutputSignal::Audio),
                }
            }
            ModuleType::Lfo => Capabilities {
                has_audio_input: false,
                output: Some(OutputSignal::Modulation),
            },
            ModuleType::Pattern => Capabilities {
                has_audio_input: false,
                output: Some(OutputSignal::Schedule),
            },
            ModuleType::Output => Capabilities {
                has_audio_input: true,
                output: None,
            },
        }
    }

    pub fn has_audio_input(&self) -> bool {
        self.capabilities().has_audio_input
    }

    pub fn has_audio_output(&self) -> bool {
        self.capabilities().output == Some(OutputSignal::Audio)
    }

    /// LFO and pattern modules exist only to drive other modules' parameters
    pub fn is_modulator(&self) -> bool {
        matches!(self, ModuleType::Lfo | ModuleType::Pattern)
    }

    /// Whether another module may drive one of this module's parameters
    pub fn accepts_modulation(&self) -> bool {
        !self.is_modulator() && *self != ModuleType::Output
    }

    /// Parameter schema for this module type
    pub fn schema(&self) -> ParamSchema {
        schema_for(*self)
    }

    /// Names of the parameters that may be driven by another module
    pub fn modulatable_params(&self) -> impl Iterator<Item = &'static str> {
        let params = self.schema().params;
        params
            .iter()
            .filter(|p| p.modulatable)
            .map(|p| p.name)
    }

    /// The parameter a randomly generated modulator drives on this module
    pub fn primary_modulation_param(&self) -> Option<&'static str> {
        match self {
            ModuleType::Oscillator | ModuleType::Filter => Some("frequency"),
            ModuleType::Gain => Some("gain"),
            ModuleType::Delay => Some("delayTime"),
            _ => None,
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModuleType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown module type: {}", s))
    }
}

/// What a module's output carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutputSignal {
    /// Audio-rate signal that can feed another module or the speakers
    Audio,
    /// Audio-rate signal added into a parameter of another module
    Modulation,
    /// No signal at all: values are scheduled directly on the target parameter
    Schedule,
}

/// I/O capability record for a module type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub has_audio_input: bool,
    pub output: Option<OutputSignal>,
}

/// How the scorer decides whether two numeric values are close enough
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ToleranceBasis {
    /// Tolerance proportional to the target value
    Relative,
    /// Flat tolerance independent of the target value
    Absolute,
}

/// How the generator samples a numeric parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sampling {
    pub min: f64,
    pub max: f64,
    /// Number of decimal places kept; 0 samples whole numbers inclusively
    pub decimals: u32,
}

/// Value domain of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum ParamKind {
    Choice {
        options: &'static [&'static str],
        default: &'static str,
    },
    Number {
        min: f64,
        max: f64,
        default: f64,
        unit: &'static str,
        sampling: Option<Sampling>,
        tolerance: ToleranceBasis,
    },
}

/// Definition of a single module parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    /// May be driven by an LFO or pattern module
    pub modulatable: bool,
    /// May be gated by a pattern module
    pub gateable: bool,
}

impl ParamSpec {
    const fn choice(
        name: &'static str,
        options: &'static [&'static str],
        default: &'static str,
    ) -> Self {
        Self {
            name,
            kind: ParamKind::Choice { options, default },
            modulatable: false,
            gateable: false,
        }
    }

    const fn number(name: &'static str, min: f64, max: f64, default: f64, unit: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Number {
                min,
                max,
                default,
                unit,
                sampling: None,
                tolerance: ToleranceBasis::Absolute,
            },
            modulatable: false,
            gateable: false,
        }
    }

    const fn sampled(self, lo: f64, hi: f64, decimals: u32) -> Self {
        match self.kind {
            ParamKind::Number {
                min,
                max,
                default,
                unit,
                tolerance,
                ..
            } => Self {
                kind: ParamKind::Number {
                    min,
                    max,
                    default,
                    unit,
                    sampling: Some(Sampling {
                        min: lo,
                        max: hi,
                        decimals,
                    }),
                    tolerance,
                },
                ..self
            },
            ParamKind::Choice { .. } => self,
        }
    }

    const fn relative(self) -> Self {
        match self.kind {
            ParamKind::Number {
                min,
                max,
                default,
                unit,
                sampling,
                ..
            } => Self {
                kind: ParamKind::Number {
                    min,
                    max,
                    default,
                    unit,
                    sampling,
                    tolerance: ToleranceBasis::Relative,
                },
                ..self
            },
            ParamKind::Choice { .. } => self,
        }
    }

    const fn modulatable(mut self) -> Self {
        self.modulatable = true;
        self
    }

    const fn gateable(mut self) -> Self {
        self.gateable = true;
        self
    }

    /// Default value as a [`ParamValue`]
    pub fn default_value(&self) -> ParamValue {
        match self.kind {
            ParamKind::Choice { default, .. } => ParamValue::Text(default.to_string()),
            ParamKind::Number { default, .. } => ParamValue::Number(default),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.kind, ParamKind::Number { .. })
    }

    /// Check a value against this parameter's domain.
    ///
    /// Numbers are checked for kind and finiteness only. Player edits go
    /// through [`ModuleConfig::edit_param`](crate::patch::ModuleConfig::edit_param),
    /// which also clamps them into the editable range.
    pub fn accepts(&self, value: &ParamValue) -> Result<(), String> {
        match (&self.kind, value) {
            (ParamKind::Choice { options, .. }, ParamValue::Text(s)) => {
                if options.contains(&s.as_str()) {
                    Ok(())
                } else {
                    Err(format!("`{}` is not one of {:?}", s, options))
                }
            }
            (ParamKind::Number { .. }, ParamValue::Number(v)) => {
                if v.is_finite() {
                    Ok(())
                } else {
                    Err("value is not finite".into())
                }
            }
            (ParamKind::Choice { .. }, ParamValue::Number(_)) => Err("expected text".into()),
            (ParamKind::Number { .. }, ParamValue::Text(_)) => Err("expected a number".into()),
        }
    }

    /// Clamp a numeric value into the editable range
    pub fn clamp(&self, value: f64) -> f64 {
        match self.kind {
            ParamKind::Number { min, max, .. } => value.clamp(min, max),
            ParamKind::Choice { .. } => value,
        }
    }
}

/// Full parameter schema of a module type
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParamSchema {
    pub module_type: ModuleType,
    pub params: &'static [ParamSpec],
}

impl ParamSchema {
    pub fn param(&self, name: &str) -> Option<&'static ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn is_modulatable(&self, name: &str) -> bool {
        self.param(name).is_some_and(|p| p.modulatable)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// A parameter value: numeric or categorical
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Number(v) => Some(*v),
            ParamValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            ParamValue::Number(_) => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Number(v) => write!(f, "{}", v),
            ParamValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Number(v)
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Text(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Text(s)
    }
}

static OSCILLATOR_PARAMS: [ParamSpec; 3] = [
    ParamSpec::choice("type", WAVEFORMS, "sine"),
    ParamSpec::number("frequency", 20.0, 2000.0, 440.0, "Hz")
        .sampled(80.0, 1200.0, 0)
        .relative()
        .modulatable(),
    ParamSpec::number("detune", -100.0, 100.0, 0.0, "cents")
        .sampled(-100.0, 100.0, 0)
        .relative()
        .modulatable(),
];

static FILTER_PARAMS: [ParamSpec; 3] = [
    ParamSpec::choice("type", FILTER_TYPES, "lowpass"),
    ParamSpec::number("frequency", 20.0, 10000.0, 350.0, "Hz")
        .sampled(150.0, 7000.0, 0)
        .relative()
        .modulatable(),
    ParamSpec::number("q", 0.0001, 20.0, 1.0, "")
        .sampled(0.2, 10.0, 2)
        .relative()
        .modulatable(),
];

static GAIN_PARAMS: [ParamSpec; 1] = [ParamSpec::number("gain", 0.0, 1.0, 0.5, "")
    .sampled(0.1, 0.4, 2)
    .modulatable()
    .gateable()];

static DELAY_PARAMS: [ParamSpec; 2] = [
    ParamSpec::number("delayTime", 0.0, 2.0, 0.3, "s")
        .sampled(0.05, 0.9, 3)
        .modulatable(),
    ParamSpec::number("feedback", 0.0, 1.0, 0.4, "")
        .sampled(0.05, 0.75, 2)
        .modulatable(),
];

static REVERB_PARAMS: [ParamSpec; 3] = [
    ParamSpec::number("mix", 0.0, 1.0, 0.3, "")
        .sampled(0.1, 0.6, 2)
        .modulatable(),
    ParamSpec::number("time", 0.1, 5.0, 2.0, "s").sampled(0.5, 3.0, 2),
    ParamSpec::number("decay", 0.5, 10.0, 2.0, ""),
];

static LFO_PARAMS: [ParamSpec; 3] = [
    ParamSpec::choice("type", WAVEFORMS, "sine"),
    ParamSpec::number("frequency", 0.1, 20.0, 5.0, "Hz")
        .sampled(0.5, 10.0, 1)
        .relative(),
    ParamSpec::number("amount", 0.0, 1000.0, 100.0, "")
        .sampled(50.0, 800.0, 0)
        .relative(),
];

static PATTERN_PARAMS: [ParamSpec; 3] = [
    ParamSpec::number("onTime", 0.01, 2.0, 0.2, "s").sampled(0.05, 0.5, 2),
    ParamSpec::number("offTime", 0.01, 2.0, 0.1, "s").sampled(0.05, 0.3, 2),
    ParamSpec::number("repeat", 1.0, 16.0, 3.0, "")
        .sampled(2.0, 6.0, 0)
        .relative(),
];

/// Look up the parameter schema of a module type.
///
/// The returned schema points at static tables, so repeated calls return
/// identical data.
pub fn schema_for(module_type: ModuleType) -> ParamSchema {
    let params: &'static [ParamSpec] = match module_type {
        ModuleType::Oscillator => &OSCILLATOR_PARAMS,
        ModuleType::Filter => &FILTER_PARAMS,
        ModuleType::Gain => &GAIN_PARAMS,
        ModuleType::Delay => &DELAY_PARAMS,
        ModuleType::Reverb => &REVERB_PARAMS,
        ModuleType::Lfo => &LFO_PARAMS,
        ModuleType::Pattern => &PATTERN_PARAMS,
        ModuleType::Output => &[],
    };
    ParamSchema {
        module_type,
        params,
    }
}

/// Schemas of every module type, in catalog order
pub fn all_schemas() -> Vec<ParamSchema> {
    ModuleType::ALL.iter().map(|&t| schema_for(t)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_lookup_is_stable() {
        for t in ModuleType::ALL {
            let a = schema_for(t);
            let b = schema_for(t);
            assert_eq!(a, b);
            assert!(core::ptr::eq(a.params, b.params));
        }
    }

    #[test]
    fn test_module_type_round_trip_str() {
        for t in ModuleType::ALL {
            assert_eq!(t.as_str().parse::<ModuleType>(), Ok(t));
        }
        assert!("theremin".parse::<ModuleType>().is_err());
    }

    #[test]
    fn test_module_type_serde_lowercase() {
        let json = serde_json::to_string(&ModuleType::Lfo).unwrap();
        assert_eq!(json, "\"lfo\"");
        let t: ModuleType = serde_json::from_str("\"reverb\"").unwrap();
        assert_eq!(t, ModuleType::Reverb);
    }

    #[test]
    fn test_capabilities() {
        assert!(!ModuleType::Oscillator.has_audio_input());
        assert!(ModuleType::Oscillator.has_audio_output());
        assert!(!ModuleType::Lfo.has_audio_input());
        assert!(!ModuleType::Lfo.has_audio_output());
        assert!(!ModuleType::Pattern.has_audio_input());
        assert_eq!(
            ModuleType::Pattern.capabilities().output,
            Some(OutputSignal::Schedule)
        );
        assert!(ModuleType::Output.has_audio_input());
        assert!(!ModuleType::Output.has_audio_output());
    }

    #[test]
    fn test_primary_modulation_params_are_modulatable() {
        for t in ModuleType::ALL {
            if let Some(param) = t.primary_modulation_param() {
                assert!(t.schema().is_modulatable(param), "{}.{}", t, param);
            }
        }
    }

    #[test]
    fn test_modulators_expose_nothing_modulatable() {
        assert_eq!(ModuleType::Lfo.modulatable_params().count(), 0);
        assert_eq!(ModuleType::Pattern.modulatable_params().count(), 0);
        assert!(ModuleType::Output.schema().is_empty());
    }

    #[test]
    fn test_only_gain_is_gateable() {
        for t in ModuleType::ALL {
            for p in t.schema().params {
                assert_eq!(p.gateable, t == ModuleType::Gain && p.name == "gain");
            }
        }
    }

    #[test]
    fn test_sampling_within_editable_range() {
        for schema in all_schemas() {
            for p in schema.params {
                if let ParamKind::Number {
                    min,
                    max,
                    default,
                    sampling,
                    ..
                } = p.kind
                {
                    assert!(default >= min && default <= max, "{}", p.name);
                    if let Some(s) = sampling {
                        assert!(s.min >= min && s.max <= max, "{}", p.name);
                    }
                }
            }
        }
    }

    #[test]
    fn test_param_accepts() {
        let osc = schema_for(ModuleType::Oscillator);
        let wave = osc.param("type").unwrap();
        assert!(wave.accepts(&"square".into()).is_ok());
        assert!(wave.accepts(&"noise".into()).is_err());
        assert!(wave.accepts(&ParamValue::Number(1.0)).is_err());

        let freq = osc.param("frequency").unwrap();
        assert!(freq.accepts(&ParamValue::Number(3500.0)).is_ok());
        assert!(freq.accepts(&ParamValue::Number(f64::NAN)).is_err());
        assert_eq!(freq.clamp(3500.0), 2000.0);
    }

    #[test]
    fn test_param_value_untagged_serde() {
        let n: ParamValue = serde_json::from_str("0.25").unwrap();
        assert_eq!(n, ParamValue::Number(0.25));
        let s: ParamValue = serde_json::from_str("\"sine\"").unwrap();
        assert_eq!(s.as_str(), Some("sine"));
    }
}
