//! Reverb Impulse Synthesis
//!
//! Builds the synthetic room response used by reverb modules: decaying
//! white noise, independently drawn per channel.

use rand::Rng;
use serde::Serialize;

/// Decay exponent used when a reverb does not specify one
pub const DEFAULT_DECAY: f64 = 2.0;

/// Two-channel sample buffer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StereoBuffer {
    pub sample_rate: f64,
    pub left: Vec<f64>,
    pub right: Vec<f64>,
}

impl StereoBuffer {
    /// Frames per channel
    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    pub fn duration(&self) -> f64 {
        self.len() as f64 / self.sample_rate
    }

    /// Average of both channels
    pub fn mid(&self) -> Vec<f64> {
        self.left
            .iter()
            .zip(&self.right)
            .map(|(l, r)| (l + r) * 0.5)
            .collect()
    }
}

/// Number of frames an impulse of `duration` seconds occupies, never fewer
/// than one
pub fn impulse_length(sample_rate: f64, duration: f64) -> usize {
    let frames = (sample_rate * duration).round();
    if frames.is_finite() && frames >= 1.0 {
        frames as usize
    } else {
        1
    }
}

/// Synthesize a decaying noise impulse with the thread-local generator
pub fn synthesize_impulse(sample_rate: f64, duration: f64, decay: f64) -> StereoBuffer {
    synthesize_impulse_with(&mut rand::thread_rng(), sample_rate, duration, decay)
}

/// Synthesize a decaying noise impulse.
///
/// Sample `i` of a buffer of length `L` is `u * ((L - i) / L)^decay` with `u`
/// uniform in [-1, 1), so the envelope starts at full scale and reaches
/// zero at the end.
pub fn synthesize_impulse_with<R: Rng + ?Sized>(
    rng: &mut R,
    sample_rate: f64,
    duration: f64,
    decay: f64,
) -> StereoBuffer {
    let len = impulse_length(sample_rate, duration);
    let decay = if decay.is_finite() { decay } else { DEFAULT_DECAY };
    let channel = |rng: &mut R| -> Vec<f64> {
        (0..len)
            .map(|i| {
                let envelope = ((len - i) as f64 / len as f64).powf(decay);
                rng.gen_range(-1.0..1.0) * envelope
            })
            .collect()
    };
    let left = channel(&mut *rng);
    let right = channel(&mut *rng);
    StereoBuffer {
        sample_rate,
        left,
        right,
    }
}
