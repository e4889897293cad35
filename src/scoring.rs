//! Matcher and Scorer
//!
//! Compares a player's patch against the round's target and produces a
//! bounded score together with one explanation line per contribution.
//!
//! Matching is greedy: each user module, in creation order, takes the first
//! unmatched target module of the same type. This is not an optimal
//! assignment. When a patch holds several modules of one type, the order in
//! which the player created them decides which target each is judged
//! against, and scores depend on that.

use crate::catalog::{schema_for, ModuleType, ParamKind, ParamValue, ToleranceBasis};
use crate::patch::{ConnectionTarget, ModuleConfig, Patch};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

/// Weights and tolerances used by the scorer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub type_match_bonus: f64,
    pub param_match_bonus: f64,
    /// Awarded once per matched module whose parameters all match
    pub full_match_bonus: f64,
    /// Deducted for every extra and every missing module
    pub module_presence_penalty: f64,
    pub connection_bonus: f64,
    pub extra_connection_penalty: f64,
    pub max_score: f64,
    /// Numeric parameters always match within this distance
    pub min_tolerance: f64,
    /// Fraction of the target value for relative-tolerance parameters
    pub relative_tolerance: f64,
    pub absolute_tolerance: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            type_match_bonus: 10.0,
            param_match_bonus: 5.0,
            full_match_bonus: 5.0,
            module_presence_penalty: 15.0,
            connection_bonus: 10.0,
            extra_connection_penalty: 5.0,
            max_score: 100.0,
            min_tolerance: 2.0,
            relative_tolerance: 0.1,
            absolute_tolerance: 0.1,
        }
    }
}

impl ScoringConfig {
    /// Allowed distance from `target` for a parameter of `module_type`
    pub fn tolerance(&self, module_type: ModuleType, param: &str, target: f64) -> f64 {
        let basis = schema_for(module_type)
            .param(param)
            .and_then(|spec| match spec.kind {
                ParamKind::Number { tolerance, .. } => Some(tolerance),
                ParamKind::Choice { .. } => None,
            })
            .unwrap_or(ToleranceBasis::Absolute);
        let tolerance = match basis {
            ToleranceBasis::Relative => (target * self.relative_tolerance).abs(),
            ToleranceBasis::Absolute => self.absolute_tolerance,
        };
        tolerance.max(self.min_tolerance)
    }
}

/// How a user module fared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ModuleVerdict {
    /// Matched a target module and every parameter agreed
    Exact,
    /// Matched a target module, some parameters differ
    Partial,
    /// No target module left to match
    Extra,
}

/// One scored contribution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExplanationLine {
    Matched {
        module: usize,
        module_type: ModuleType,
        points: f64,
    },
    ParamMatched {
        param: String,
        points: f64,
    },
    ParamMismatched {
        param: String,
        expected: ParamValue,
        actual: Option<ParamValue>,
    },
    FullMatch {
        module_type: ModuleType,
        points: f64,
    },
    ExtraModule {
        module: usize,
        module_type: ModuleType,
        points: f64,
    },
    MissingModule {
        module_type: ModuleType,
        points: f64,
    },
    ConnectionFound {
        from: ModuleType,
        to: String,
        points: f64,
    },
    ConnectionMissing {
        from: ModuleType,
        to: String,
    },
    ExtraConnections {
        count: usize,
        points: f64,
    },
}

impl ExplanationLine {
    /// Points this line contributed
    pub fn points(&self) -> f64 {
        match self {
            ExplanationLine::Matched { points, .. }
            | ExplanationLine::ParamMatched { points, .. }
            | ExplanationLine::FullMatch { points, .. }
            | ExplanationLine::ExtraModule { points, .. }
            | ExplanationLine::MissingModule { points, .. }
            | ExplanationLine::ConnectionFound { points, .. }
            | ExplanationLine::ExtraConnections { points, .. } => *points,
            ExplanationLine::ParamMismatched { .. } | ExplanationLine::ConnectionMissing { .. } => {
                0.0
            }
        }
    }
}

impl fmt::Display for ExplanationLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExplanationLine::Matched {
                module,
                module_type,
                points,
            } => write!(f, "[match] module {} ({}) ({:+})", module, module_type, points),
            ExplanationLine::ParamMatched { param, points } => {
                write!(f, "  - {}: match ({:+})", param, points)
            }
            ExplanationLine::ParamMismatched {
                param,
                expected,
                actual,
            } => match actual {
                Some(actual) => write!(
                    f,
                    "  - {}: mismatch (expected: {}, yours: {})",
                    param, expected, actual
                ),
                None => write!(f, "  - {}: mismatch (expected: {}, yours: none)", param, expected),
            },
            ExplanationLine::FullMatch {
                module_type,
                points,
            } => write!(f, "  all {} parameters match ({:+})", module_type, points),
            ExplanationLine::ExtraModule {
                module,
                module_type,
                points,
            } => write!(f, "[extra] module {} ({}) ({:+})", module, module_type, points),
            ExplanationLine::MissingModule {
                module_type,
                points,
            } => write!(f, "[missing] the target's {} is absent ({:+})", module_type, points),
            ExplanationLine::ConnectionFound { from, to, points } => {
                write!(f, "[connection ok] {} -> {} ({:+})", from, to, points)
            }
            ExplanationLine::ConnectionMissing { from, to } => {
                write!(f, "[connection missing] the target's {} -> {} is not connected", from, to)
            }
            ExplanationLine::ExtraConnections { count, points } => {
                write!(f, "[extra connections] {} unneeded connection(s) ({:+})", count, points)
            }
        }
    }
}

/// Outcome of comparing a user patch with a target
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreResult {
    /// Final score, clamped to `0..=max_score`
    pub value: f64,
    /// Sum of every contribution before clamping
    pub raw: f64,
    pub max_score: f64,
    pub explanation: Vec<ExplanationLine>,
    /// Verdict per user module index; `None` for output modules
    pub verdicts: Vec<Option<ModuleVerdict>>,
    /// Target module indices nothing matched
    pub missing: Vec<usize>,
    /// For each target module, the user module matched to it
    pub assignment: Vec<Option<usize>>,
}

impl ScoreResult {
    /// Explanation rendered line by line
    pub fn lines(&self) -> Vec<String> {
        self.explanation.iter().map(ToString::to_string).collect()
    }

    /// Text shown to the player after submitting
    pub fn report(&self) -> String {
        let mut out = format!(
            "Score: {} / {}\n\n--- Details ---\n",
            self.value.round(),
            self.max_score
        );
        for line in &self.explanation {
            out.push_str(&line.to_string());
            out.push('\n');
        }
        out
    }
}

/// Scores user patches against a target
#[derive(Debug, Clone, Default)]
pub struct Scorer {
    config: ScoringConfig,
}

impl Scorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn score(&self, user: &Patch, target: &Patch) -> ScoreResult {
        let cfg = &self.config;
        let mut explanation = Vec::new();
        let mut raw = 0.0;
        let mut push = |line: ExplanationLine, explanation: &mut Vec<ExplanationLine>| {
            raw += line.points();
            explanation.push(line);
        };

        // Greedy type matching
        let mut assignment: Vec<Option<usize>> = vec![None; target.len()];
        let mut user_to_target: Vec<Option<usize>> = vec![None; user.len()];
        for (u, module) in user.modules.iter().enumerate() {
            if module.module_type == ModuleType::Output {
                continue;
            }
            let found = target.modules.iter().enumerate().position(|(t, candidate)| {
                assignment[t].is_none()
                    && candidate.module_type != ModuleType::Output
                    && candidate.module_type == module.module_type
            });
            if let Some(t) = found {
                assignment[t] = Some(u);
                user_to_target[u] = Some(t);
            }
        }

        // Modules and parameters
        let mut verdicts = vec![None; user.len()];
        for (u, module) in user.modules.iter().enumerate() {
            if module.module_type == ModuleType::Output {
                continue;
            }
            let Some(t) = user_to_target[u] else {
                verdicts[u] = Some(ModuleVerdict::Extra);
                push(
                    ExplanationLine::ExtraModule {
                        module: u,
                        module_type: module.module_type,
                        points: -cfg.module_presence_penalty,
                    },
                    &mut explanation,
                );
                continue;
            };
            push(
                ExplanationLine::Matched {
                    module: u,
                    module_type: module.module_type,
                    points: cfg.type_match_bonus,
                },
                &mut explanation,
            );
            let mut all_match = true;
            for (name, expected) in &target.modules[t].params {
                let actual = module.param_or_default(name);
                if self.param_matches(&target.modules[t], name, expected, actual.as_ref()) {
                    push(
                        ExplanationLine::ParamMatched {
                            param: name.clone(),
                            points: cfg.param_match_bonus,
                        },
                        &mut explanation,
                    );
                } else {
                    all_match = false;
                    push(
                        ExplanationLine::ParamMismatched {
                            param: name.clone(),
                            expected: expected.clone(),
                            actual,
                        },
                        &mut explanation,
                    );
                }
            }
            if all_match {
                push(
                    ExplanationLine::FullMatch {
                        module_type: module.module_type,
                        points: cfg.full_match_bonus,
                    },
                    &mut explanation,
                );
            }
            verdicts[u] = Some(if all_match {
                ModuleVerdict::Exact
            } else {
                ModuleVerdict::Partial
            });
        }

        // Output modules stand for the speakers and are never scored
        let missing: Vec<usize> = assignment
            .iter()
            .enumerate()
            .filter(|&(t, user)| {
                user.is_none() && target.modules[t].module_type != ModuleType::Output
            })
            .map(|(t, _)| t)
            .collect();
        for &t in &missing {
            push(
                ExplanationLine::MissingModule {
                    module_type: target.modules[t].module_type,
                    points: -cfg.module_presence_penalty,
                },
                &mut explanation,
            );
        }

        // Connections
        let mut matched_connections = BTreeSet::new();
        for connection in &target.connections {
            let Some(source) = target.module(connection.source) else {
                continue;
            };
            let target_end = target.effective_target(connection.target);
            let to = match target_end {
                ConnectionTarget::Output => "output".to_string(),
                ConnectionTarget::Module(i) => target
                    .module(i)
                    .map_or_else(|| i.to_string(), |m| m.module_type.to_string()),
            };

            let user_source = assignment.get(connection.source).copied().flatten();
            let user_target = match target_end {
                ConnectionTarget::Output => Some(ConnectionTarget::Output),
                ConnectionTarget::Module(i) => assignment
                    .get(i)
                    .copied()
                    .flatten()
                    .map(ConnectionTarget::Module),
            };

            let found = match (user_source, user_target) {
                (Some(s), Some(t)) => user.connections.iter().position(|c| {
                    c.source == s && c.param == connection.param && user.effective_target(c.target) == t
                }),
                _ => None,
            };

            match found {
                Some(index) => {
                    matched_connections.insert(index);
                    push(
                        ExplanationLine::ConnectionFound {
                            from: source.module_type,
                            to,
                            points: cfg.connection_bonus,
                        },
                        &mut explanation,
                    );
                }
                None => push(
                    ExplanationLine::ConnectionMissing {
                        from: source.module_type,
                        to,
                    },
                    &mut explanation,
                ),
            }
        }

        let extra = user.connections.len() - matched_connections.len();
        if extra > 0 {
            push(
                ExplanationLine::ExtraConnections {
                    count: extra,
                    points: -(extra as f64) * cfg.extra_connection_penalty,
                },
                &mut explanation,
            );
        }

        let value = raw.clamp(0.0, cfg.max_score.max(0.0));
        debug!(raw, value, lines = explanation.len(), "scored patch");
        ScoreResult {
            value,
            raw,
            max_score: cfg.max_score,
            explanation,
            verdicts,
            missing,
            assignment,
        }
    }

    fn param_matches(
        &self,
        target_module: &ModuleConfig,
        name: &str,
        expected: &ParamValue,
        actual: Option<&ParamValue>,
    ) -> bool {
        match (expected, actual) {
            (ParamValue::Text(expected), Some(ParamValue::Text(actual))) => expected == actual,
            (ParamValue::Number(expected), Some(ParamValue::Number(actual))) => {
                let tolerance = self
                    .config
                    .tolerance(target_module.module_type, name, *expected);
                (actual - expected).abs() <= tolerance
            }
            _ => false,
        }
    }
}

/// Score with the default weights
pub fn score(user: &Patch, target: &Patch) -> ScoreResult {
    Scorer::default().score(user, target)
}

/// Number of modules in the target, not counting output modules
pub fn hint_module_count(target: &Patch) -> usize {
    scored_modules(target).count()
}

/// Module types of the target in random order
pub fn hint_module_types<R: Rng + ?Sized>(target: &Patch, rng: &mut R) -> Vec<ModuleType> {
    let mut types: Vec<ModuleType> = scored_modules(target).map(|m| m.module_type).collect();
    types.shuffle(rng);
    types
}

fn scored_modules(patch: &Patch) -> impl Iterator<Item = &ModuleConfig> {
    patch
        .modules
        .iter()
        .filter(|m| m.module_type != ModuleType::Output)
}
