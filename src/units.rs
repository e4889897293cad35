//! Processing Units
//!
//! The primitive signal processors an [`AudioContext`](crate::context::AudioContext)
//! schedules: oscillators, biquad filters, gains, delay lines and a
//! convolver. Every unit is mono, produces one sample per tick, and exposes
//! its automatable parameters by name so the context can drive them from
//! automation timelines and connected signals.

use crate::catalog::{FILTER_TYPES, WAVEFORMS};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f64::consts::{PI, TAU};
use std::sync::Arc;

/// Declaration of an automatable unit parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitParam {
    pub name: &'static str,
    pub default: f64,
}

impl UnitParam {
    pub const fn new(name: &'static str, default: f64) -> Self {
        Self { name, default }
    }
}

/// Everything a unit sees for one sample
#[derive(Debug, Clone, Copy)]
pub struct TickContext<'a> {
    /// Context time of this sample in seconds
    pub time: f64,
    /// Sum of every audio connection into the unit
    pub input: f64,
    /// Effective parameter values, in declaration order
    pub params: &'a [f64],
}

impl TickContext<'_> {
    #[inline]
    pub fn param(&self, index: usize) -> f64 {
        self.params.get(index).copied().unwrap_or(0.0)
    }
}

/// A mono signal processor scheduled by the audio context
pub trait Unit: Send {
    /// Stable identifier used in logs and graph dumps
    fn type_id(&self) -> &'static str;

    /// Automatable parameters in the order they appear in [`TickContext::params`]
    fn params(&self) -> &'static [UnitParam];

    /// Whether audio can be connected into this unit
    fn has_input(&self) -> bool {
        true
    }

    /// Sources stay silent until started and after they are stopped
    fn is_source(&self) -> bool {
        false
    }

    /// Whether the unit only reads its input from earlier samples, which
    /// makes it safe to close a feedback loop through it
    fn breaks_feedback(&self) -> bool {
        false
    }

    fn tick(&mut self, ctx: &TickContext<'_>) -> f64;

    fn reset(&mut self);

    fn set_sample_rate(&mut self, sample_rate: f64);

    /// Select a waveform or response type; returns false if unsupported
    fn set_mode(&mut self, _mode: &str) -> bool {
        false
    }

    fn mode(&self) -> Option<&'static str> {
        None
    }
}

/// Periodic waveform shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl Waveform {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "sine" => Some(Waveform::Sine),
            "square" => Some(Waveform::Square),
            "sawtooth" => Some(Waveform::Sawtooth),
            "triangle" => Some(Waveform::Triangle),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Waveform::Sine => WAVEFORMS[0],
            Waveform::Square => WAVEFORMS[1],
            Waveform::Sawtooth => WAVEFORMS[2],
            Waveform::Triangle => WAVEFORMS[3],
        }
    }

    /// Value at `phase` in [0, 1), in the range ±1
    #[inline]
    pub fn sample(&self, phase: f64) -> f64 {
        match self {
            Waveform::Sine => (phase * TAU).sin(),
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => 2.0 * phase - 1.0,
            Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        }
    }
}

/// Periodic oscillator
///
/// Runs at `frequency * 2^(detune / 1200)` and outputs ±1.
pub struct OscillatorUnit {
    waveform: Waveform,
    phase: f64,
    sample_rate: f64,
}

impl OscillatorUnit {
    pub const FREQUENCY: usize = 0;
    pub const DETUNE: usize = 1;

    pub fn new(sample_rate: f64, waveform: Waveform) -> Self {
        Self {
            waveform,
            phase: 0.0,
            sample_rate,
        }
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }
}

static OSCILLATOR_UNIT_PARAMS: [UnitParam; 2] = [
    UnitParam::new("frequency", 440.0),
    UnitParam::new("detune", 0.0),
];

impl Unit for OscillatorUnit {
    fn type_id(&self) -> &'static str {
        "oscillator"
    }

    fn params(&self) -> &'static [UnitParam] {
        &OSCILLATOR_UNIT_PARAMS
    }

    fn has_input(&self) -> bool {
        false
    }

    fn is_source(&self) -> bool {
        true
    }

    fn tick(&mut self, ctx: &TickContext<'_>) -> f64 {
        let freq = ctx.param(Self::FREQUENCY) * 2.0_f64.powf(ctx.param(Self::DETUNE) / 1200.0);
        let out = self.waveform.sample(self.phase);
        self.phase = (self.phase + freq / self.sample_rate).rem_euclid(1.0);
        out
    }

    fn reset(&mut self) {
        self.phase = 0.0;
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    fn set_mode(&mut self, mode: &str) -> bool {
        match Waveform::parse(mode) {
            Some(waveform) => {
                self.waveform = waveform;
                true
            }
            None => false,
        }
    }

    fn mode(&self) -> Option<&'static str> {
        Some(self.waveform.as_str())
    }
}

/// Biquad response types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterResponse {
    Lowpass,
    Highpass,
    Bandpass,
    Notch,
    Peaking,
}

impl FilterResponse {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "lowpass" => Some(FilterResponse::Lowpass),
            "highpass" => Some(FilterResponse::Highpass),
            "bandpass" => Some(FilterResponse::Bandpass),
            "notch" => Some(FilterResponse::Notch),
            "peaking" => Some(FilterResponse::Peaking),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterResponse::Lowpass => FILTER_TYPES[0],
            FilterResponse::Highpass => FILTER_TYPES[1],
            FilterResponse::Bandpass => FILTER_TYPES[2],
            FilterResponse::Notch => FILTER_TYPES[3],
            FilterResponse::Peaking => FILTER_TYPES[4],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct BiquadCoefficients {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

/// Second-order IIR filter using the RBJ cookbook responses
pub struct BiquadUnit {
    response: FilterResponse,
    sample_rate: f64,
    coeffs: BiquadCoefficients,
    /// Parameters the coefficients were computed for
    cached: Option<(f64, f64, f64)>,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl BiquadUnit {
    pub const FREQUENCY: usize = 0;
    pub const Q: usize = 1;
    pub const GAIN: usize = 2;

    pub fn new(sample_rate: f64, response: FilterResponse) -> Self {
        Self {
            response,
            sample_rate,
            coeffs: BiquadCoefficients::default(),
            cached: None,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    pub fn response(&self) -> FilterResponse {
        self.response
    }

    fn update_coefficients(&mut self, frequency: f64, q: f64, gain_db: f64) {
        if self.cached == Some((frequency, q, gain_db)) {
            return;
        }
        self.cached = Some((frequency, q, gain_db));

        let nyquist = self.sample_rate * 0.5;
        let f0 = frequency.clamp(1.0, nyquist * 0.999);
        let q = q.max(1e-4);
        let w0 = 2.0 * PI * f0 / self.sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);
        let a = 10.0_f64.powf(gain_db / 40.0);

        let (b0, b1, b2, a0, a1, a2) = match self.response {
            FilterResponse::Lowpass => (
                (1.0 - cos_w0) / 2.0,
                1.0 - cos_w0,
                (1.0 - cos_w0) / 2.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            FilterResponse::Highpass => (
                (1.0 + cos_w0) / 2.0,
                -(1.0 + cos_w0),
                (1.0 + cos_w0) / 2.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            FilterResponse::Bandpass => (
                alpha,
                0.0,
                -alpha,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            FilterResponse::Notch => (
                1.0,
                -2.0 * cos_w0,
                1.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            FilterResponse::Peaking => (
                1.0 + alpha * a,
                -2.0 * cos_w0,
                1.0 - alpha * a,
                1.0 + alpha / a,
                -2.0 * cos_w0,
                1.0 - alpha / a,
            ),
        };

        self.coeffs = BiquadCoefficients {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        };
    }
}

static BIQUAD_UNIT_PARAMS: [UnitParam; 3] = [
    UnitParam::new("frequency", 350.0),
    UnitParam::new("Q", 1.0),
    UnitParam::new("gain", 0.0),
];

impl Unit for BiquadUnit {
    fn type_id(&self) -> &'static str {
        "biquad"
    }

    fn params(&self) -> &'static [UnitParam] {
        &BIQUAD_UNIT_PARAMS
    }

    fn tick(&mut self, ctx: &TickContext<'_>) -> f64 {
        self.update_coefficients(
            ctx.param(Self::FREQUENCY),
            ctx.param(Self::Q),
            ctx.param(Self::GAIN),
        );
        let c = self.coeffs;
        let x = ctx.input;
        let y = c.b0 * x + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        // Flush denormals and runaway states
        self.y1 = if y.is_finite() && y.abs() > 1e-30 { y } else { 0.0 };
        self.y1
    }

    fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.cached = None;
    }

    fn set_mode(&mut self, mode: &str) -> bool {
        match FilterResponse::parse(mode) {
            Some(response) => {
                self.response = response;
                self.cached = None;
                true
            }
            None => false,
        }
    }

    fn mode(&self) -> Option<&'static str> {
        Some(self.response.as_str())
    }
}

/// Multiplies its input by the `gain` parameter
#[derive(Debug, Clone, Copy, Default)]
pub struct GainUnit;

impl GainUnit {
    pub const GAIN: usize = 0;

    pub fn new() -> Self {
        Self
    }
}

static GAIN_UNIT_PARAMS: [UnitParam; 1] = [UnitParam::new("gain", 1.0)];

impl Unit for GainUnit {
    fn type_id(&self) -> &'static str {
        "gain"
    }

    fn params(&self) -> &'static [UnitParam] {
        &GAIN_UNIT_PARAMS
    }

    #[inline]
    fn tick(&mut self, ctx: &TickContext<'_>) -> f64 {
        ctx.input * ctx.param(Self::GAIN)
    }

    fn reset(&mut self) {}

    fn set_sample_rate(&mut self, _: f64) {}
}

/// Variable delay line with linear interpolation
///
/// The delay is at least one sample, so a feedback loop may be closed
/// through this unit.
pub struct DelayLineUnit {
    buffer: Vec<f64>,
    write_pos: usize,
    max_delay: f64,
    sample_rate: f64,
}

impl DelayLineUnit {
    pub const DELAY_TIME: usize = 0;

    pub fn new(sample_rate: f64, max_delay: f64) -> Self {
        let max_delay = max_delay.max(0.0);
        Self {
            buffer: vec![0.0; Self::buffer_len(sample_rate, max_delay)],
            write_pos: 0,
            max_delay,
            sample_rate,
        }
    }

    pub fn max_delay(&self) -> f64 {
        self.max_delay
    }

    fn buffer_len(sample_rate: f64, max_delay: f64) -> usize {
        (max_delay * sample_rate).ceil() as usize + 2
    }
}

static DELAY_UNIT_PARAMS: [UnitParam; 1] = [UnitParam::new("delayTime", 0.0)];

impl Unit for DelayLineUnit {
    fn type_id(&self) -> &'static str {
        "delay"
    }

    fn params(&self) -> &'static [UnitParam] {
        &DELAY_UNIT_PARAMS
    }

    fn breaks_feedback(&self) -> bool {
        true
    }

    fn tick(&mut self, ctx: &TickContext<'_>) -> f64 {
        let len = self.buffer.len();
        self.buffer[self.write_pos] = ctx.input;

        let delay_samples = (ctx.param(Self::DELAY_TIME).clamp(0.0, self.max_delay)
            * self.sample_rate)
            .clamp(1.0, (len - 1) as f64);
        // The input already arrives one sample late, so read one sample closer
        let offset = delay_samples - 1.0;
        let whole = offset.floor() as usize;
        let frac = offset - whole as f64;

        let a = self.buffer[(self.write_pos + len - whole) % len];
        let b = self.buffer[(self.write_pos + len - whole - 1) % len];
        self.write_pos = (self.write_pos + 1) % len;
        a + (b - a) * frac
    }

    fn reset(&mut self) {
        self.buffer.iter_mut().for_each(|s| *s = 0.0);
        self.write_pos = 0;
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.buffer = vec![0.0; Self::buffer_len(sample_rate, self.max_delay)];
        self.write_pos = 0;
    }
}

/// Block size of the partitioned convolver
pub const CONVOLVER_BLOCK: usize = 256;

/// Convolution with a fixed impulse response
///
/// Uses uniformly partitioned overlap-save convolution, so output lags the
/// input by [`CONVOLVER_BLOCK`] samples.
pub struct ConvolverUnit {
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
    /// Spectra of the impulse response partitions
    partitions: Vec<Vec<Complex<f64>>>,
    /// Spectra of recent input windows, newest at `fdl_head`
    fdl: Vec<Vec<Complex<f64>>>,
    fdl_head: usize,
    /// Previous and current input block
    window: Vec<f64>,
    output: Vec<f64>,
    pos: usize,
    scratch: Vec<Complex<f64>>,
    accum: Vec<Complex<f64>>,
    impulse_len: usize,
}

impl ConvolverUnit {
    pub fn new(impulse: &[f64]) -> Self {
        let block = CONVOLVER_BLOCK;
        let size = block * 2;
        let mut planner = FftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);

        let partitions: Vec<Vec<Complex<f64>>> = impulse
            .chunks(block)
            .map(|chunk| {
                let mut spectrum = vec![Complex::new(0.0, 0.0); size];
                for (slot, &h) in spectrum.iter_mut().zip(chunk) {
                    *slot = Complex::new(h, 0.0);
                }
                forward.process(&mut spectrum);
                spectrum
            })
            .collect();
        let fdl = vec![vec![Complex::new(0.0, 0.0); size]; partitions.len().max(1)];

        Self {
            forward,
            inverse,
            partitions,
            fdl,
            fdl_head: 0,
            window: vec![0.0; size],
            output: vec![0.0; block],
            pos: 0,
            scratch: vec![Complex::new(0.0, 0.0); size],
            accum: vec![Complex::new(0.0, 0.0); size],
            impulse_len: impulse.len(),
        }
    }

    pub fn impulse_len(&self) -> usize {
        self.impulse_len
    }

    fn process_block(&mut self) {
        let block = CONVOLVER_BLOCK;
        let size = block * 2;

        for (slot, &x) in self.scratch.iter_mut().zip(&self.window) {
            *slot = Complex::new(x, 0.0);
        }
        self.forward.process(&mut self.scratch);

        let slots = self.fdl.len();
        self.fdl_head = (self.fdl_head + 1) % slots;
        self.fdl[self.fdl_head].copy_from_slice(&self.scratch);

        self.accum.iter_mut().for_each(|c| *c = Complex::new(0.0, 0.0));
        for (k, partition) in self.partitions.iter().enumerate() {
            let spectrum = &self.fdl[(self.fdl_head + slots - k) % slots];
            for ((acc, x), h) in self.accum.iter_mut().zip(spectrum).zip(partition) {
                *acc += x * h;
            }
        }
        self.inverse.process(&mut self.accum);

        let scale = 1.0 / size as f64;
        for (out, y) in self.output.iter_mut().zip(&self.accum[block..]) {
            *out = y.re * scale;
        }

        self.window.copy_within(block.., 0);
    }
}

impl Unit for ConvolverUnit {
    fn type_id(&self) -> &'static str {
        "convolver"
    }

    fn params(&self) -> &'static [UnitParam] {
        &[]
    }

    fn tick(&mut self, ctx: &TickContext<'_>) -> f64 {
        let out = self.output[self.pos];
        self.window[CONVOLVER_BLOCK + self.pos] = ctx.input;
        self.pos += 1;
        if self.pos == CONVOLVER_BLOCK {
            self.pos = 0;
            if !self.partitions.is_empty() {
                self.process_block();
            }
        }
        out
    }

    fn reset(&mut self) {
        for spectrum in &mut self.fdl {
            spectrum.iter_mut().for_each(|c| *c = Complex::new(0.0, 0.0));
        }
        self.window.iter_mut().for_each(|s| *s = 0.0);
        self.output.iter_mut().for_each(|s| *s = 0.0);
        self.pos = 0;
    }

    fn set_sample_rate(&mut self, _: f64) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn run(unit: &mut dyn Unit, input: &[f64], params: &[f64]) -> Vec<f64> {
        input
            .iter()
            .enumerate()
            .map(|(i, &x)| {
                unit.tick(&TickContext {
                    time: i as f64 / 44100.0,
                    input: x,
                    params,
                })
            })
            .collect()
    }

    #[test]
    fn test_oscillator_frequency() {
        let mut osc = OscillatorUnit::new(44100.0, Waveform::Sawtooth);
        let samples = run(&mut osc, &vec![0.0; 44100], &[441.0, 0.0]);
        let crossings = samples
            .windows(2)
            .filter(|w| w[0] > 0.5 && w[1] < -0.5)
            .count();
        assert!((439..=441).contains(&crossings), "{}", crossings);
    }

    #[test]
    fn test_oscillator_detune_octave() {
        let mut a = OscillatorUnit::new(1000.0, Waveform::Sawtooth);
        let mut b = OscillatorUnit::new(1000.0, Waveform::Sawtooth);
        let up = run(&mut a, &[0.0; 3], &[100.0, 1200.0]);
        let plain = run(&mut b, &[0.0; 3], &[200.0, 0.0]);
        for (x, y) in up.iter().zip(&plain) {
            assert_relative_eq!(*x, *y, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_waveform_ranges() {
        for name in WAVEFORMS {
            let waveform = Waveform::parse(name).unwrap();
            assert_eq!(waveform.as_str(), *name);
            for i in 0..100 {
                let v = waveform.sample(i as f64 / 100.0);
                assert!((-1.0..=1.0).contains(&v));
            }
        }
        assert_eq!(Waveform::Square.sample(0.25), 1.0);
        assert_eq!(Waveform::Square.sample(0.75), -1.0);
    }

    #[test]
    fn test_oscillator_set_mode() {
        let mut osc = OscillatorUnit::new(44100.0, Waveform::Sine);
        assert!(osc.set_mode("triangle"));
        assert_eq!(osc.mode(), Some("triangle"));
        assert!(!osc.set_mode("noise"));
        assert_eq!(osc.waveform(), Waveform::Triangle);
    }

    #[test]
    fn test_lowpass_passes_dc() {
        let mut filter = BiquadUnit::new(44100.0, FilterResponse::Lowpass);
        let out = run(&mut filter, &vec![1.0; 4000], &[1000.0, 0.707, 0.0]);
        assert_relative_eq!(*out.last().unwrap(), 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_highpass_blocks_dc() {
        let mut filter = BiquadUnit::new(44100.0, FilterResponse::Highpass);
        let out = run(&mut filter, &vec![1.0; 4000], &[1000.0, 0.707, 0.0]);
        assert!(out.last().unwrap().abs() < 1e-3);
    }

    #[test]
    fn test_filter_modes() {
        let mut filter = BiquadUnit::new(44100.0, FilterResponse::Lowpass);
        for name in FILTER_TYPES {
            assert!(filter.set_mode(name));
            assert_eq!(filter.mode(), Some(*name));
            let out = run(&mut filter, &[1.0, 0.0, 0.0, 0.0], &[800.0, 1.0, 3.0]);
            assert!(out.iter().all(|v| v.is_finite()));
        }
        assert!(!filter.set_mode("comb"));
    }

    #[test]
    fn test_gain_unit() {
        let mut gain = GainUnit::new();
        assert_eq!(run(&mut gain, &[0.5, -1.0], &[0.5]), vec![0.25, -0.5]);
    }

    #[test]
    fn test_delay_line_latency() {
        let mut delay = DelayLineUnit::new(1000.0, 1.0);
        let mut input = vec![0.0; 20];
        input[0] = 1.0;
        let out = run(&mut delay, &input, &[0.005]);
        let peak = out.iter().position(|&v| v == 1.0).unwrap();
        assert_eq!(peak, 4);
        assert!(delay.breaks_feedback());
    }

    #[test]
    fn test_delay_line_clamps_to_max() {
        let mut delay = DelayLineUnit::new(100.0, 0.1);
        let mut input = vec![0.0; 40];
        input[0] = 1.0;
        let out = run(&mut delay, &input, &[5.0]);
        assert_eq!(out.iter().position(|&v| v == 1.0), Some(9));
    }

    #[test]
    fn test_convolver_reproduces_impulse() {
        let impulse: Vec<f64> = (0..600).map(|i| 1.0 / (i as f64 + 1.0)).collect();
        let mut conv = ConvolverUnit::new(&impulse);
        let mut input = vec![0.0; CONVOLVER_BLOCK + impulse.len() + 10];
        input[0] = 1.0;
        let out = run(&mut conv, &input, &[]);
        for (i, h) in impulse.iter().enumerate() {
            assert_relative_eq!(out[CONVOLVER_BLOCK + i], *h, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_convolver_empty_impulse_is_silent() {
        let mut conv = ConvolverUnit::new(&[]);
        let out = run(&mut conv, &vec![1.0; 600], &[]);
        assert!(out.iter().all(|&v| v == 0.0));
    }
}
