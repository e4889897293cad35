//! Struck Playback
//!
//! Most targets are auditioned by letting every oscillator run for the
//! playback window. A chime is struck instead: the target patch is built once
//! per note, each note starts at its own offset with the gain stage shaped by
//! a short linear attack and an exponential decay, and its oscillators stop
//! after `note_length`. Any reverb in the patch keeps ringing after that.

use crate::builder::{GraphBuilder, GraphHandle};
use crate::catalog::ModuleType;
use crate::context::AudioContext;
use crate::patch::Patch;
use serde::Serialize;
use tracing::debug;

/// How a target is auditioned
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub enum Playback {
    /// Every source runs until the playback window ends
    #[default]
    Continuous,
    /// A sequence of struck notes
    Chime(Chime),
}

/// Envelope and timing of a two-note chime
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Chime {
    /// Pitch of the second note; the first keeps the oscillator's frequency
    pub second_frequency: f64,
    /// Seconds between the two strikes
    pub note_spacing: f64,
    /// Linear rise to the gain module's level, in seconds
    pub attack: f64,
    /// Time constant of the exponential fall toward silence
    pub decay_time_constant: f64,
    /// Seconds after its strike that a note's oscillators stop
    pub note_length: f64,
}

impl Chime {
    /// Pin-pon door chime: G5 falling to E5
    pub const DOORBELL: Chime = Chime {
        second_frequency: 659.25,
        note_spacing: 0.25,
        attack: 0.01,
        decay_time_constant: 0.2,
        note_length: 1.0,
    };

    /// `(offset, frequency)` of each note
    pub fn notes(&self, first_frequency: f64) -> [(f64, f64); 2] {
        [
            (0.0, first_frequency),
            (self.note_spacing, self.second_frequency),
        ]
    }

    /// Seconds from the first strike until the last note's oscillators stop
    pub fn duration(&self) -> f64 {
        self.note_spacing + self.note_length
    }
}

/// Build one graph per note of `chime` and strike each at its offset from
/// now. The graphs are returned started; tear each down when done.
pub fn strike_chime(
    builder: &GraphBuilder,
    ctx: &mut AudioContext,
    patch: &Patch,
    chime: &Chime,
) -> Vec<GraphHandle> {
    let first_frequency = patch
        .modules
        .iter()
        .find(|m| m.module_type == ModuleType::Oscillator)
        .and_then(|m| m.number("frequency"))
        .unwrap_or(chime.second_frequency);
    let now = ctx.current_time();

    let graphs: Vec<GraphHandle> = chime
        .notes(first_frequency)
        .into_iter()
        .map(|(offset, frequency)| {
            let mut graph = builder.build(ctx, patch);
            graph.strike(ctx, now + offset, frequency, chime);
            graph
        })
        .collect();
    debug!(notes = graphs.len(), at = now, "struck chime");
    graphs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::Connection;
    use crate::presets::ChallengeScenarios;

    const SR: f64 = 8000.0;

    fn peak(samples: &[f64]) -> f64 {
        samples.iter().fold(0.0f64, |acc, s| acc.max(s.abs()))
    }

    #[test]
    fn test_doorbell_notes() {
        let notes = Chime::DOORBELL.notes(783.99);
        assert_eq!(notes, [(0.0, 783.99), (0.25, 659.25)]);
        assert_eq!(Chime::DOORBELL.duration(), 1.25);
    }

    #[test]
    fn test_chime_builds_one_graph_per_note() {
        let mut ctx = AudioContext::new(SR);
        let patch = ChallengeScenarios::doorbell();
        let mut graphs = strike_chime(&GraphBuilder::new(), &mut ctx, &patch, &Chime::DOORBELL);
        assert_eq!(graphs.len(), 2);
        assert!(graphs.iter().all(|g| g.is_started()));

        let first = graphs[0].module(0).unwrap().binding("frequency").unwrap();
        let second = graphs[1].module(0).unwrap().binding("frequency").unwrap();
        assert_eq!(ctx.param(first.unit, "frequency").unwrap().value(), 783.99);
        assert_eq!(ctx.param(second.unit, "frequency").unwrap().value(), 659.25);

        for graph in &mut graphs {
            graph.teardown(&mut ctx);
        }
        assert_eq!(ctx.unit_count(), 0);
        assert_eq!(ctx.edge_count(), 0);
    }

    #[test]
    fn test_chime_envelope_decays() {
        // Dry signal only, so the envelope is not smeared by the reverb
        let patch = ChallengeScenarios::doorbell();
        let dry = Patch {
            modules: patch.modules[..3].to_vec(),
            connections: vec![
                patch.connections[0].clone(),
                patch.connections[1].clone(),
                Connection::to_output(2),
            ],
        };
        let mut ctx = AudioContext::new(SR);
        let mut graphs = strike_chime(&GraphBuilder::new(), &mut ctx, &dry, &Chime::DOORBELL);
        let out = ctx.render((1.5 * SR) as usize);
        let window = |from: f64, to: f64| &out[(from * SR) as usize..(to * SR) as usize];

        // Attack reaches audible level quickly, then falls off
        let early = peak(window(0.01, 0.06));
        let late = peak(window(0.18, 0.24));
        assert!(early > 0.05, "early peak {}", early);
        assert!(late < early * 0.6, "late {} early {}", late, early);

        // Second strike brings the level back up
        let second = peak(window(0.26, 0.31));
        assert!(second > late, "second {} late {}", second, late);

        // Every oscillator has stopped by the end
        assert!(peak(window(1.3, 1.5)) < 1e-9);

        for graph in &mut graphs {
            graph.teardown(&mut ctx);
        }
    }
}
