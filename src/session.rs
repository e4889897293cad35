//! Game Session
//!
//! [`SessionState`] holds everything one player's game needs: the shared
//! audio context, the round's target patch, the player's working patch and
//! the graphs currently realized from them. The target preview and the
//! player's live graph share one context and are built and torn down
//! independently.
//!
//! Deferred work (ending the preview, re-arming looping patterns) is
//! expressed as context timers. [`SessionState::advance`] renders audio and
//! dispatches each timer at the exact frame it falls due.

use crate::builder::{GraphBuilder, GraphHandle};
use crate::catalog::{ModuleType, ParamValue};
use crate::chime::{strike_chime, Playback};
use crate::config::GameConfig;
use crate::context::{AudioContext, TimerId};
use crate::error::{ConfigError, SessionError};
use crate::generator::{GenerateMode, PatchGenerator};
use crate::patch::{Connection, ConnectionKind, ConnectionTarget, ModuleConfig, Patch};
use crate::scoring::{hint_module_count, hint_module_types, ScoreResult, Scorer};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

/// Who may write a parameter of the player's patch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParamOwnership {
    /// The player edits the value directly
    UserControlled,
    /// A pattern module schedules the value; direct edits are refused
    ExternallyDriven { source: usize },
}

/// Target preview and the timer that ends it. A struck chime has one graph
/// per note.
#[derive(Debug)]
struct Preview {
    graphs: Vec<GraphHandle>,
    cleanup: TimerId,
}

impl Preview {
    fn teardown(mut self, ctx: &mut AudioContext) {
        for graph in &mut self.graphs {
            graph.teardown(ctx);
        }
    }
}

/// State of one game
#[derive(Debug)]
pub struct SessionState {
    config: GameConfig,
    ctx: AudioContext,
    generator: PatchGenerator,
    scorer: Scorer,
    builder: GraphBuilder,
    rng: StdRng,
    target: Option<Patch>,
    playback: Playback,
    user: Patch,
    preview: Option<Preview>,
    live: Option<GraphHandle>,
}

impl SessionState {
    /// Start a session; the configuration is validated first
    pub fn new(config: GameConfig) -> Result<Self, ConfigError> {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Session whose random choices are reproducible
    pub fn with_seed(config: GameConfig, seed: u64) -> Result<Self, ConfigError> {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: GameConfig, rng: StdRng) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            ctx: AudioContext::new(config.sample_rate),
            generator: PatchGenerator::new(config.generator.clone()),
            scorer: Scorer::new(config.scoring.clone()),
            builder: config.graph_builder(),
            rng,
            target: None,
            playback: Playback::Continuous,
            user: Patch::new(),
            preview: None,
            live: None,
            config,
        })
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn context(&self) -> &AudioContext {
        &self.ctx
    }

    pub fn target(&self) -> Option<&Patch> {
        self.target.as_ref()
    }

    pub fn user_patch(&self) -> &Patch {
        &self.user
    }

    /// How the current target is auditioned
    pub fn playback(&self) -> Playback {
        self.playback
    }

    // ------------------------------------------------------------------
    // Rounds
    // ------------------------------------------------------------------

    /// Start a new round: silence everything, clear the player's patch and
    /// produce a fresh target
    pub fn new_round(&mut self, mode: &GenerateMode) -> Result<&Patch, SessionError> {
        let patch = self.generator.generate(mode, &mut self.rng)?;
        self.reset();
        self.playback = self.generator.playback(mode);
        info!(modules = patch.len(), ?mode, "new round");
        Ok(self.target.insert(patch))
    }

    /// Use a patch supplied by the caller as the target
    pub fn set_target(&mut self, patch: Patch) {
        self.set_target_with_playback(patch, Playback::Continuous);
    }

    pub fn set_target_with_playback(&mut self, patch: Patch, playback: Playback) {
        self.stop_preview();
        self.target = Some(patch);
        self.playback = playback;
    }

    /// Silence every graph and forget the target and the player's patch
    pub fn reset(&mut self) {
        self.stop_preview();
        self.stop_live();
        self.target = None;
        self.playback = Playback::Continuous;
        self.user = Patch::new();
    }

    // ------------------------------------------------------------------
    // Target preview
    // ------------------------------------------------------------------

    /// Play the target for the configured playback window. A struck target
    /// is held at least until its last note ends.
    pub fn play_target(&mut self) -> Result<(), SessionError> {
        self.stop_preview();
        let Some(target) = self.target.as_ref() else {
            warn!("preview requested without a target patch");
            return Err(SessionError::NoTargetPatch);
        };

        let (graphs, window) = match self.playback {
            Playback::Continuous => {
                let mut graph = self.builder.build(&mut self.ctx, target);
                graph.start(&mut self.ctx);
                (vec![graph], self.config.playback_window)
            }
            Playback::Chime(chime) => (
                strike_chime(&self.builder, &mut self.ctx, target, &chime),
                self.config.playback_window.max(chime.duration()),
            ),
        };
        let cleanup = self.ctx.schedule_timer(self.ctx.current_time() + window);
        debug!(
            units = graphs.iter().map(GraphHandle::unit_count).sum::<usize>(),
            window,
            "playing target"
        );
        self.preview = Some(Preview { graphs, cleanup });
        Ok(())
    }

    /// End the preview now
    pub fn stop_preview(&mut self) {
        if let Some(preview) = self.preview.take() {
            self.ctx.cancel_timer(preview.cleanup);
            preview.teardown(&mut self.ctx);
        }
    }

    pub fn is_previewing(&self) -> bool {
        self.preview.is_some()
    }

    // ------------------------------------------------------------------
    // Player workbench
    // ------------------------------------------------------------------

    /// Add a module with default parameters and return its index
    pub fn add_module(&mut self, module_type: ModuleType) -> usize {
        self.add_module_config(ModuleConfig::new(module_type))
    }

    pub fn add_module_config(&mut self, module: ModuleConfig) -> usize {
        let index = self.user.add_module(module);
        self.refresh_live();
        index
    }

    /// Remove a module with its connections. Later modules shift down by one.
    pub fn remove_module(&mut self, index: usize) -> Result<ModuleConfig, SessionError> {
        let removed = self
            .user
            .remove_module(index)
            .ok_or(SessionError::UnknownModule(index))?;
        self.refresh_live();
        Ok(removed)
    }

    /// Ownership of a parameter of the player's patch
    pub fn ownership(&self, module: usize, param: &str) -> ParamOwnership {
        self.user
            .connections
            .iter()
            .filter(|c| c.target == ConnectionTarget::Module(module))
            .filter(|c| c.param.as_deref() == Some(param))
            .find(|c| self.user.connection_kind(c) == Ok(ConnectionKind::ScheduledParam))
            .map_or(ParamOwnership::UserControlled, |c| {
                ParamOwnership::ExternallyDriven { source: c.source }
            })
    }

    /// Edit a parameter of the player's patch, refusing parameters a pattern
    /// currently drives. Numbers are clamped into the parameter's range.
    pub fn set_param(
        &mut self,
        module: usize,
        param: &str,
        value: ParamValue,
    ) -> Result<(), SessionError> {
        if module >= self.user.len() {
            return Err(SessionError::UnknownModule(module));
        }
        if let ParamOwnership::ExternallyDriven { source } = self.ownership(module, param) {
            return Err(SessionError::ParamExternallyDriven {
                module,
                param: param.to_string(),
                driver: source,
            });
        }
        let config = self
            .user
            .module_mut(module)
            .ok_or(SessionError::UnknownModule(module))?;
        let value = config.edit_param(param, value)?;

        if let Some(live) = self.live.as_mut() {
            if let Err(error) = live.apply_param(&mut self.ctx, module, param, &value) {
                warn!(%error, module, param, "could not update live graph");
            }
        }
        Ok(())
    }

    /// Add a connection to the player's patch after checking it against the
    /// catalog
    pub fn connect(&mut self, connection: Connection) -> Result<ConnectionKind, SessionError> {
        let kind = self.user.connection_kind(&connection)?;
        if !self.user.connections.contains(&connection) {
            self.user.add_connection(connection);
            self.refresh_live();
        }
        Ok(kind)
    }

    /// Remove a connection from the player's patch
    pub fn disconnect(
        &mut self,
        source: usize,
        target: ConnectionTarget,
        param: Option<&str>,
    ) -> Result<Connection, SessionError> {
        let index = self
            .user
            .connections
            .iter()
            .position(|c| c.source == source && c.target == target && c.param.as_deref() == param)
            .ok_or_else(|| SessionError::UnknownConnection {
                from: source,
                to: target.to_string(),
            })?;
        let removed = self.user.connections.remove(index);
        self.refresh_live();
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Player's live graph
    // ------------------------------------------------------------------

    /// Realize and start the player's patch
    pub fn start_live(&mut self) {
        self.stop_live();
        let mut graph = self.builder.build(&mut self.ctx, &self.user);
        graph.start(&mut self.ctx);
        self.live = Some(graph);
    }

    pub fn stop_live(&mut self) {
        if let Some(mut graph) = self.live.take() {
            graph.teardown(&mut self.ctx);
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    /// Warnings from the last live build
    pub fn live_warnings(&self) -> Vec<String> {
        self.live
            .as_ref()
            .map(|g| g.warnings().iter().map(ToString::to_string).collect())
            .unwrap_or_default()
    }

    fn refresh_live(&mut self) {
        if self.live.is_some() {
            self.start_live();
        }
    }

    // ------------------------------------------------------------------
    // Clock
    // ------------------------------------------------------------------

    /// Render `frames` samples, handling every timer at the frame it is due
    pub fn advance(&mut self, frames: usize) -> Vec<f64> {
        let mut out = Vec::with_capacity(frames);
        let mut remaining = frames;
        loop {
            self.dispatch_timers();
            if remaining == 0 {
                break;
            }
            let step = self
                .ctx
                .frames_until_next_timer()
                .map_or(remaining, |due| (due as usize).clamp(1, remaining));
            self.ctx.render_into(step, &mut out);
            remaining -= step;
        }
        out
    }

    fn dispatch_timers(&mut self) {
        for (timer, at) in self.ctx.take_fired_timers() {
            if self.preview.as_ref().is_some_and(|p| p.cleanup == timer) {
                debug!(at, "playback window elapsed");
                if let Some(preview) = self.preview.take() {
                    preview.teardown(&mut self.ctx);
                }
                continue;
            }
            let handled = self
                .preview
                .as_mut()
                .is_some_and(|p| {
                    p.graphs
                        .iter_mut()
                        .any(|g| g.handle_timer(&mut self.ctx, timer, at))
                })
                || self
                    .live
                    .as_mut()
                    .is_some_and(|g| g.handle_timer(&mut self.ctx, timer, at));
            if !handled {
                trace!(at, "timer owned by a torn down graph");
            }
        }
    }

    // ------------------------------------------------------------------
    // Scoring and hints
    // ------------------------------------------------------------------

    /// Score the player's patch against the target
    pub fn score(&self) -> Result<ScoreResult, SessionError> {
        let target = self.target.as_ref().ok_or(SessionError::NoTargetPatch)?;
        Ok(self.scorer.score(&self.user, target))
    }

    pub fn hint_module_count(&self) -> Result<usize, SessionError> {
        self.target
            .as_ref()
            .map(hint_module_count)
            .ok_or(SessionError::NoTargetPatch)
    }

    pub fn hint_module_types(&mut self) -> Result<Vec<ModuleType>, SessionError> {
        let target = self.target.as_ref().ok_or(SessionError::NoTargetPatch)?;
        Ok(hint_module_types(target, &mut self.rng))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chime::Chime;

    fn session() -> SessionState {
        let config = GameConfig::default()
            .with_sample_rate(8000.0)
            .with_playback_window(0.25);
        SessionState::with_seed(config, 7).unwrap()
    }

    fn osc_gain_target() -> Patch {
        Patch::new()
            .with_module(
                ModuleConfig::new(ModuleType::Oscillator)
                    .with("type", "sine")
                    .with("frequency", 440.0),
            )
            .with_module(ModuleConfig::new(ModuleType::Gain).with("gain", 0.3))
            .with_connection(Connection::audio(0, 1))
            .with_connection(Connection::to_output(1))
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let zero_rate = GameConfig::default().with_sample_rate(0.0);
        assert!(matches!(
            SessionState::new(zero_rate),
            Err(ConfigError::Invalid(_))
        ));
        let negative_window = GameConfig::default().with_playback_window(-1.0);
        assert!(SessionState::with_seed(negative_window, 1).is_err());
    }

    #[test]
    fn test_preview_requires_target() {
        let mut session = session();
        assert_eq!(session.play_target(), Err(SessionError::NoTargetPatch));
        assert!(matches!(session.score(), Err(SessionError::NoTargetPatch)));
        assert_eq!(session.hint_module_count(), Err(SessionError::NoTargetPatch));
    }

    #[test]
    fn test_preview_plays_then_cleans_up() {
        let mut session = session();
        session.new_round(&GenerateMode::preset("siren")).unwrap();
        session.play_target().unwrap();
        assert!(session.is_previewing());
        assert!(session.context().unit_count() > 0);

        let out = session.advance(1000);
        assert!(out.iter().any(|s| s.abs() > 0.01));
        assert!(session.is_previewing());

        // 0.25 s at 8 kHz
        session.advance(1000);
        assert!(!session.is_previewing());
        assert_eq!(session.context().unit_count(), 0);
        assert_eq!(session.context().edge_count(), 0);
        assert!(session.advance(100).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_doorbell_preview_is_struck() {
        let mut session = session();
        session.new_round(&GenerateMode::preset("doorbell")).unwrap();
        assert_eq!(session.playback(), Playback::Chime(Chime::DOORBELL));
        session.play_target().unwrap();
        let single = {
            let mut ctx = AudioContext::new(8000.0);
            GraphBuilder::new()
                .build(&mut ctx, session.target().unwrap())
                .unit_count()
        };
        // One graph per note
        assert_eq!(session.context().unit_count(), 2 * single);

        // Held past the 0.25 s window until the second note ends
        let out = session.advance(4000);
        assert!(out.iter().any(|s| s.abs() > 0.01));
        assert!(session.is_previewing());
        session.advance(6000);
        assert!(!session.is_previewing());
        assert_eq!(session.context().unit_count(), 0);
        assert_eq!(session.context().edge_count(), 0);

        session.new_round(&GenerateMode::preset("siren")).unwrap();
        assert_eq!(session.playback(), Playback::Continuous);
    }

    #[test]
    fn test_replaying_replaces_preview() {
        let mut session = session();
        session.set_target(osc_gain_target());
        session.play_target().unwrap();
        let units = session.context().unit_count();
        session.play_target().unwrap();
        assert_eq!(session.context().unit_count(), units);
        assert_eq!(session.context().pending_timers(), 1);
        session.stop_preview();
        assert_eq!(session.context().pending_timers(), 0);
    }

    #[test]
    fn test_workbench_scoring() {
        let mut session = session();
        session.set_target(osc_gain_target());
        let osc = session.add_module(ModuleType::Oscillator);
        let gain = session.add_module(ModuleType::Gain);
        session
            .set_param(gain, "gain", ParamValue::Number(0.3))
            .unwrap();
        session.connect(Connection::audio(osc, gain)).unwrap();
        session.connect(Connection::to_output(gain)).unwrap();
        assert_eq!(session.score().unwrap().value, 70.0);

        assert!(matches!(
            session.connect(Connection::audio(gain, osc)),
            Err(SessionError::Patch(_))
        ));
        session
            .disconnect(gain, ConnectionTarget::Output, None)
            .unwrap();
        assert_eq!(session.score().unwrap().value, 60.0);
        assert!(matches!(
            session.disconnect(gain, ConnectionTarget::Output, None),
            Err(SessionError::UnknownConnection { .. })
        ));
    }

    #[test]
    fn test_pattern_owns_its_target() {
        let mut session = session();
        let osc = session.add_module(ModuleType::Oscillator);
        let gain = session.add_module(ModuleType::Gain);
        let pattern = session.add_module(ModuleType::Pattern);
        session.connect(Connection::audio(osc, gain)).unwrap();
        let kind = session
            .connect(Connection::modulation(pattern, gain, "gain"))
            .unwrap();
        assert_eq!(kind, ConnectionKind::ScheduledParam);
        assert_eq!(
            session.ownership(gain, "gain"),
            ParamOwnership::ExternallyDriven { source: pattern }
        );
        assert_eq!(
            session.set_param(gain, "gain", ParamValue::Number(0.2)),
            Err(SessionError::ParamExternallyDriven {
                module: gain,
                param: "gain".into(),
                driver: pattern,
            })
        );

        session
            .disconnect(pattern, ConnectionTarget::Module(gain), Some("gain"))
            .unwrap();
        assert_eq!(session.ownership(gain, "gain"), ParamOwnership::UserControlled);
        assert!(session
            .set_param(gain, "gain", ParamValue::Number(0.2))
            .is_ok());
    }

    #[test]
    fn test_param_edits_are_clamped() {
        let mut session = session();
        let osc = session.add_module(ModuleType::Oscillator);
        let gain = session.add_module(ModuleType::Gain);
        let pattern = session.add_module(ModuleType::Pattern);
        let reverb = session.add_module(ModuleType::Reverb);
        session.connect(Connection::audio(osc, gain)).unwrap();
        session.connect(Connection::audio(gain, reverb)).unwrap();
        session.connect(Connection::to_output(reverb)).unwrap();
        session
            .connect(Connection::modulation(pattern, gain, "gain"))
            .unwrap();
        session.start_live();

        session
            .set_param(pattern, "repeat", ParamValue::Number(1e9))
            .unwrap();
        session
            .set_param(reverb, "time", ParamValue::Number(1e5))
            .unwrap();
        session
            .set_param(osc, "frequency", ParamValue::Number(-50.0))
            .unwrap();
        let patch = session.user_patch();
        assert_eq!(patch.modules[pattern].number("repeat"), Some(16.0));
        assert_eq!(patch.modules[reverb].number("time"), Some(5.0));
        assert_eq!(patch.modules[osc].number("frequency"), Some(20.0));

        // The live graph sees the clamped values too
        assert!(session.advance(100).iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_lfo_does_not_take_ownership() {
        let mut session = session();
        let osc = session.add_module(ModuleType::Oscillator);
        let lfo = session.add_module(ModuleType::Lfo);
        session
            .connect(Connection::modulation(lfo, osc, "frequency"))
            .unwrap();
        assert_eq!(
            session.ownership(osc, "frequency"),
            ParamOwnership::UserControlled
        );
    }

    #[test]
    fn test_remove_module_reindexes() {
        let mut session = session();
        let osc = session.add_module(ModuleType::Oscillator);
        let filter = session.add_module(ModuleType::Filter);
        let gain = session.add_module(ModuleType::Gain);
        session.connect(Connection::audio(osc, filter)).unwrap();
        session.connect(Connection::audio(filter, gain)).unwrap();
        session.connect(Connection::to_output(gain)).unwrap();

        session.remove_module(filter).unwrap();
        assert_eq!(session.user_patch().len(), 2);
        assert_eq!(session.user_patch().connections, vec![Connection::to_output(1)]);
        assert_eq!(
            session.remove_module(5),
            Err(SessionError::UnknownModule(5))
        );
    }

    #[test]
    fn test_live_graph_survives_preview_teardown() {
        let mut session = session();
        session.set_target(osc_gain_target());
        let osc = session.add_module(ModuleType::Oscillator);
        let gain = session.add_module(ModuleType::Gain);
        session.connect(Connection::audio(osc, gain)).unwrap();
        session.connect(Connection::to_output(gain)).unwrap();
        session.start_live();
        let (units, edges) = (
            session.context().unit_count(),
            session.context().edge_count(),
        );

        session.play_target().unwrap();
        session.advance(4000);
        assert!(!session.is_previewing());
        assert_eq!(session.context().unit_count(), units);
        assert_eq!(session.context().edge_count(), edges);
        assert!(session.advance(100).iter().any(|&s| s != 0.0));
    }

    #[test]
    fn test_live_graph_follows_edits() {
        let mut session = session();
        let osc = session.add_module(ModuleType::Oscillator);
        session.connect(Connection::to_output(osc)).unwrap();
        session.start_live();
        assert!(session.is_live());
        let before = session.context().unit_count();

        let gain = session.add_module(ModuleType::Gain);
        assert_eq!(session.context().unit_count(), before + 1);
        session
            .set_param(osc, "type", ParamValue::Text("square".into()))
            .unwrap();
        assert!(session
            .set_param(gain, "gain", ParamValue::Text("loud".into()))
            .is_err());

        session.stop_live();
        assert_eq!(session.context().unit_count(), 0);
    }

    #[test]
    fn test_new_round_resets_workbench() {
        let mut session = session();
        session.add_module(ModuleType::Oscillator);
        let target = session.new_round(&GenerateMode::Random).unwrap();
        assert_eq!(target.count_of(ModuleType::Oscillator), 1);
        assert!(session.user_patch().is_empty());
        assert!(matches!(
            session.new_round(&GenerateMode::preset("kazoo")),
            Err(SessionError::Scenario(_))
        ));
        assert!(session.target().is_some());
        assert_eq!(
            session.hint_module_count().unwrap(),
            session.target().unwrap().len()
        );
        assert_eq!(
            session.hint_module_types().unwrap().len(),
            session.target().unwrap().len()
        );
    }
}
