//! Game Configuration
//!
//! Everything tunable about a round, loadable from JSON. Missing fields take
//! their defaults, so a configuration file only needs to name what it
//! changes.

use crate::builder::GraphBuilder;
use crate::error::ConfigError;
use crate::generator::GeneratorConfig;
use crate::impulse::DEFAULT_DECAY;
use crate::pattern::PatternGate;
use crate::scoring::ScoringConfig;
use serde::{Deserialize, Serialize};

/// Session-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Sample rate of the shared audio context (typically 44100 or 48000)
    pub sample_rate: f64,
    /// Seconds the target preview plays before it is torn down
    pub playback_window: f64,
    /// Delay before a pattern's first pulse, in seconds
    pub pattern_start_offset: f64,
    /// Silence between looping pattern sequences, in seconds
    pub pattern_loop_gap: f64,
    /// Decay exponent for reverbs without a `decay` parameter
    pub reverb_decay: f64,
    /// Longest delay a delay module can reach, in seconds
    pub max_delay: f64,
    pub generator: GeneratorConfig,
    pub scoring: ScoringConfig,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100.0,
            playback_window: 2.0,
            pattern_start_offset: PatternGate::DEFAULT_START_OFFSET,
            pattern_loop_gap: PatternGate::DEFAULT_LOOP_GAP,
            reverb_decay: DEFAULT_DECAY,
            max_delay: 2.0,
            generator: GeneratorConfig::default(),
            scoring: ScoringConfig::default(),
        }
    }
}

impl GameConfig {
    /// Parse a configuration, filling omitted fields with defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "sample_rate must be positive, got {}",
                self.sample_rate
            )));
        }
        let durations = [
            ("playback_window", self.playback_window),
            ("pattern_start_offset", self.pattern_start_offset),
            ("pattern_loop_gap", self.pattern_loop_gap),
            ("max_delay", self.max_delay),
        ];
        for (name, value) in durations {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be a non-negative number of seconds, got {}",
                    name, value
                )));
            }
        }
        if self.scoring.max_score <= 0.0 {
            return Err(ConfigError::Invalid("scoring.max_score must be positive".into()));
        }
        Ok(())
    }

    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_playback_window(mut self, seconds: f64) -> Self {
        self.playback_window = seconds;
        self
    }

    pub fn with_generator(mut self, generator: GeneratorConfig) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_scoring(mut self, scoring: ScoringConfig) -> Self {
        self.scoring = scoring;
        self
    }

    /// Graph builder carrying this configuration's timing and reverb options
    pub fn graph_builder(&self) -> GraphBuilder {
        GraphBuilder {
            max_delay: self.max_delay,
            reverb_decay: self.reverb_decay,
            pattern_start_offset: self.pattern_start_offset,
            pattern_loop_gap: self.pattern_loop_gap,
            loop_patterns: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GameConfig::default();
        assert_eq!(config.sample_rate, 44100.0);
        assert_eq!(config.playback_window, 2.0);
        assert_eq!(config.scoring.type_match_bonus, 10.0);
        assert_eq!(config.generator.lfo_share, 0.8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = GameConfig::from_json(
            r#"{ "sample_rate": 48000, "scoring": { "connection_bonus": 20 } }"#,
        )
        .unwrap();
        assert_eq!(config.sample_rate, 48000.0);
        assert_eq!(config.scoring.connection_bonus, 20.0);
        assert_eq!(config.scoring.param_match_bonus, 5.0);
        assert_eq!(config.generator, GeneratorConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            GameConfig::from_json(r#"{ "sample_rate": 0 }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            GameConfig::from_json(r#"{ "playback_window": -1 }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            GameConfig::from_json("not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let config = GameConfig::default().with_playback_window(3.5);
        let json = config.to_json().unwrap();
        assert_eq!(GameConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_graph_builder_follows_config() {
        let mut config = GameConfig::default();
        config.pattern_loop_gap = 0.25;
        config.reverb_decay = 3.0;
        let builder = config.graph_builder();
        assert_eq!(builder.pattern_loop_gap, 0.25);
        assert_eq!(builder.reverb_decay, 3.0);
        assert!(builder.loop_patterns);
    }
}
