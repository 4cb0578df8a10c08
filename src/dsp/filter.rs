//! Zero-phase band-pass + notch filtering of whole windows.
//!
//! Both stages are cascades of biquads run forward and then backward over an
//! odd-extended copy of the buffer, with each section's state primed to the
//! steady-state response of the first sample. The band-pass is a Butterworth
//! high-pass/low-pass pair; the notch is the classic second-order IIR notch.
//!
//! The first and last few samples of every buffer still carry filter
//! transients. Feature extraction works on overlapping windows, so these
//! edges average out downstream rather than being trimmed here.
use std::f64::consts::PI;

use crate::config::PipelineSettings;
use crate::dsp::PipelineError;

#[derive(Clone, Copy, Debug, PartialEq)]
struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}
impl BiquadCoeffs {
    /// Gain at DC.
    fn dc_gain(&self) -> f64 {
        (self.b0 + self.b1 + self.b2) / (1.0 + self.a1 + self.a2)
    }
}
#[derive(Clone, Copy, Debug, Default)]
struct BiquadState {
    z1: f64,
    z2: f64,
}
impl BiquadState {
    /// State a section settles into after a long run of `level` at its input.
    fn steady(coeffs: &BiquadCoeffs, level: f64) -> Self {
        let g = coeffs.dc_gain();
        Self {
            z1: (g - coeffs.b0) * level,
            z2: (coeffs.b2 - coeffs.a2 * g) * level,
        }
    }
    fn process(&mut self, c: &BiquadCoeffs, input: f64) -> f64 {
        // Transposed direct form II
        let y = c.b0 * input + self.z1;
        self.z1 = c.b1 * input - c.a1 * y + self.z2;
        self.z2 = c.b2 * input - c.a2 * y;
        y
    }
}

/// A biquad cascade applied forward and backward.
#[derive(Clone, Debug)]
pub struct ZeroPhaseFilter {
    sections: Vec<BiquadCoeffs>,
}
impl ZeroPhaseFilter {
    /// Butterworth band-pass of the given (even) order: `order / 2` high-pass
    /// sections at `low_hz` followed by `order / 2` low-pass sections at `high_hz`.
    pub fn butterworth_bandpass(sample_rate_hz: f64, low_hz: f64, high_hz: f64, order: usize) -> Self {
        let qs = butterworth_qs(order);
        let mut sections: Vec<BiquadCoeffs> = qs
            .iter()
            .map(|&q| highpass(low_hz, sample_rate_hz, q))
            .collect();
        sections.extend(qs.iter().map(|&q| lowpass(high_hz, sample_rate_hz, q)));
        Self { sections }
    }
    pub fn notch(sample_rate_hz: f64, freq_hz: f64, q: f64) -> Self {
        Self {
            sections: vec![notch(freq_hz, sample_rate_hz, q)],
        }
    }
    pub fn order(&self) -> usize {
        self.sections.len() * 2
    }
    /// Samples of odd extension on each side; buffers must be strictly longer.
    pub fn pad_len(&self) -> usize {
        3 * (self.order() + 1)
    }
    pub fn apply(&self, data: &[f64]) -> Result<Vec<f64>, PipelineError> {
        let pad = self.pad_len();
        if data.len() <= pad {
            return Err(PipelineError::InsufficientData {
                required: pad,
                actual: data.len(),
            });
        }
        let extended = odd_extend(data, pad);
        let mut forward = self.run(&extended);
        forward.reverse();
        let mut backward = self.run(&forward);
        backward.reverse();
        Ok(backward[pad..pad + data.len()].to_vec())
    }
    fn run(&self, input: &[f64]) -> Vec<f64> {
        let first = input.first().copied().unwrap_or(0.0);
        let mut level = first;
        let mut states: Vec<BiquadState> = self
            .sections
            .iter()
            .map(|c| {
                let state = BiquadState::steady(c, level);
                level *= c.dc_gain();
                state
            })
            .collect();
        input
            .iter()
            .map(|&x| {
                self.sections
                    .iter()
                    .zip(states.iter_mut())
                    .fold(x, |value, (c, state)| state.process(c, value))
            })
            .collect()
    }
}

/// Band-pass followed by mains notch.
#[derive(Clone, Debug)]
pub struct FilterChain {
    bandpass: ZeroPhaseFilter,
    notch: ZeroPhaseFilter,
}
impl FilterChain {
    pub fn from_settings(settings: &PipelineSettings) -> Result<Self, PipelineError> {
        settings.validate()?;
        Ok(Self {
            bandpass: ZeroPhaseFilter::butterworth_bandpass(
                settings.sample_rate_hz,
                settings.lowcut_hz,
                settings.highcut_hz,
                settings.bandpass_order,
            ),
            notch: ZeroPhaseFilter::notch(settings.sample_rate_hz, settings.notch_hz, settings.notch_q),
        })
    }
    /// Shortest buffer [`FilterChain::apply`] accepts.
    pub fn min_len(&self) -> usize {
        self.bandpass.pad_len().max(self.notch.pad_len()) + 1
    }
    pub fn apply(&self, data: &[f64]) -> Result<Vec<f64>, PipelineError> {
        let passed = self.bandpass.apply(data)?;
        self.notch.apply(&passed)
    }
}

fn odd_extend(data: &[f64], pad: usize) -> Vec<f64> {
    let n = data.len();
    let (first, last) = (data[0], data[n - 1]);
    let mut out = Vec::with_capacity(n + 2 * pad);
    out.extend((1..=pad).rev().map(|i| 2.0 * first - data[i]));
    out.extend_from_slice(data);
    out.extend((1..=pad).map(|i| 2.0 * last - data[n - 1 - i]));
    out
}
fn butterworth_qs(order: usize) -> Vec<f64> {
    let pairs = order / 2;
    (0..pairs)
        .map(|k| {
            let theta = PI * (2 * k + 1) as f64 / (2 * order) as f64;
            1.0 / (2.0 * theta.cos())
        })
        .collect()
}
fn lowpass(freq_hz: f64, sample_rate_hz: f64, q: f64) -> BiquadCoeffs {
    let w0 = 2.0 * PI * freq_hz / sample_rate_hz;
    let alpha = w0.sin() / (2.0 * q);
    let cos_w0 = w0.cos();
    let b0 = (1.0 - cos_w0) * 0.5;
    let b1 = 1.0 - cos_w0;
    let b2 = b0;
    let a0 = 1.0 + alpha;
    let a1 = -2.0 * cos_w0;
    let a2 = 1.0 - alpha;
    normalize(b0, b1, b2, a0, a1, a2)
}
fn highpass(freq_hz: f64, sample_rate_hz: f64, q: f64) -> BiquadCoeffs {
    let w0 = 2.0 * PI * freq_hz / sample_rate_hz;
    let alpha = w0.sin() / (2.0 * q);
    let cos_w0 = w0.cos();
    let b0 = (1.0 + cos_w0) * 0.5;
    let b1 = -(1.0 + cos_w0);
    let b2 = b0;
    let a0 = 1.0 + alpha;
    let a1 = -2.0 * cos_w0;
    let a2 = 1.0 - alpha;
    normalize(b0, b1, b2, a0, a1, a2)
}
/// Notch with -3 dB bandwidth `freq_hz / q`.
fn notch(center_hz: f64, sample_rate_hz: f64, q: f64) -> BiquadCoeffs {
    let w0 = 2.0 * PI * center_hz / sample_rate_hz;
    let bandwidth = w0 / q;
    let gain = 1.0 / (1.0 + (bandwidth / 2.0).tan());
    let cos_w0 = w0.cos();
    BiquadCoeffs {
        b0: gain,
        b1: -2.0 * gain * cos_w0,
        b2: gain,
        a1: -2.0 * gain * cos_w0,
        a2: 2.0 * gain - 1.0,
    }
}
fn normalize(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> BiquadCoeffs {
    let a0_inv = 1.0 / a0;
    BiquadCoeffs {
        b0: b0 * a0_inv,
        b1: b1 * a0_inv,
        b2: b2 * a0_inv,
        a1: a1 * a0_inv,
        a2: a2 * a0_inv,
    }
}
