use std::f64::consts::PI;

use rustfft::{num_complex::Complex64, FftPlanner};

use crate::dsp::PipelineError;

/// One-sided power spectral density.
#[derive(Clone, Debug)]
pub struct PowerSpectrum {
    pub frequencies_hz: Vec<f64>,
    /// Power per Hz at each frequency.
    pub density: Vec<f64>,
}
impl PowerSpectrum {
    /// Trapezoidal integral of the density over bins with `low <= f <= high`.
    pub fn band_power(&self, (low_hz, high_hz): (f64, f64)) -> f64 {
        let points: Vec<(f64, f64)> = self
            .frequencies_hz
            .iter()
            .zip(&self.density)
            .filter(|(f, _)| **f >= low_hz && **f <= high_hz)
            .map(|(f, p)| (*f, *p))
            .collect();
        points
            .windows(2)
            .map(|pair| (pair[1].0 - pair[0].0) * (pair[0].1 + pair[1].1) * 0.5)
            .sum()
    }
}

/// Welch estimator: Hann-windowed, half-overlapping segments with the mean
/// removed from each, averaged periodograms scaled to a density.
pub struct WelchEstimator {
    sample_rate_hz: f64,
    segment_len: usize,
    planner: FftPlanner<f64>,
}
impl WelchEstimator {
    pub fn new(sample_rate_hz: f64, segment_len: usize) -> Self {
        Self {
            sample_rate_hz,
            segment_len,
            planner: FftPlanner::new(),
        }
    }
    /// Segment length actually used for `len` samples.
    pub fn effective_segment(&self, len: usize) -> usize {
        self.segment_len.min(len)
    }
    pub fn estimate(&mut self, data: &[f64]) -> Result<PowerSpectrum, PipelineError> {
        let nperseg = self.effective_segment(data.len());
        if nperseg < 2 {
            return Err(PipelineError::InsufficientData {
                required: 1,
                actual: data.len(),
            });
        }
        let step = nperseg - nperseg / 2;
        let window = hann_periodic(nperseg);
        let scale = 1.0 / (self.sample_rate_hz * window.iter().map(|w| w * w).sum::<f64>());
        let fft = self.planner.plan_fft_forward(nperseg);
        let bins = nperseg / 2 + 1;
        let mut density = vec![0.0; bins];
        let mut buffer = vec![Complex64::new(0.0, 0.0); nperseg];
        let mut segments = 0usize;
        let mut start = 0;
        while start + nperseg <= data.len() {
            let segment = &data[start..start + nperseg];
            let mean = segment.iter().sum::<f64>() / nperseg as f64;
            for ((slot, &x), &w) in buffer.iter_mut().zip(segment).zip(&window) {
                *slot = Complex64::new((x - mean) * w, 0.0);
            }
            fft.process(&mut buffer);
            for (acc, c) in density.iter_mut().zip(&buffer) {
                *acc += c.norm_sqr() * scale;
            }
            segments += 1;
            start += step;
        }
        let last_doubled = if nperseg % 2 == 0 { bins - 1 } else { bins };
        for (k, p) in density.iter_mut().enumerate() {
            *p /= segments as f64;
            if k > 0 && k < last_doubled {
                *p *= 2.0;
            }
        }
        let frequencies_hz = (0..bins)
            .map(|k| k as f64 * self.sample_rate_hz / nperseg as f64)
            .collect();
        Ok(PowerSpectrum {
            frequencies_hz,
            density,
        })
    }
}

fn hann_periodic(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / size as f64).cos())
        .collect()
}
#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn flat_alpha_density_integrates_to_band_width() {
        let frequencies_hz: Vec<f64> = (0..=500).map(|k| k as f64 * 0.25).collect();
        let density = frequencies_hz
            .iter()
            .map(|f| if (8.0..=13.0).contains(f) { 1.0 } else { 0.0 })
            .collect();
        let psd = PowerSpectrum {
            frequencies_hz,
            density,
        };
        assert!((psd.band_power((8.0, 13.0)) - 5.0).abs() < 1e-9);
        assert!(psd.band_power((14.0, 30.0)).abs() < 1e-12);
    }
    #[test]
    fn sine_power_lands_in_its_band() {
        let data: Vec<f64> = (0..500)
            .map(|i| (2.0 * PI * 10.0 * i as f64 / 250.0).sin())
            .collect();
        let psd = WelchEstimator::new(250.0, 256).estimate(&data).unwrap();
        assert_eq!(psd.density.len(), 129);
        assert!((psd.frequencies_hz[1] - 250.0 / 256.0).abs() < 1e-12);
        let total = psd.band_power((0.0, 125.0));
        assert!((total - 0.5).abs() < 0.05, "total power {total}");
        let alpha = psd.band_power((8.0, 13.0));
        let beta = psd.band_power((13.0, 30.0));
        assert!(alpha > 0.4, "alpha {alpha}");
        assert!(beta < 0.05 * alpha, "beta {beta}");
    }
    #[test]
    fn white_noise_density_integrates_to_its_variance() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};
        let mut rng = StdRng::seed_from_u64(7);
        let data: Vec<f64> = (0..5000).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let psd = WelchEstimator::new(250.0, 256).estimate(&data).unwrap();
        // Uniform on [-1, 1] has variance 1/3.
        let total = psd.band_power((0.0, 125.0));
        assert!((total - 1.0 / 3.0).abs() < 0.1 / 3.0, "total power {total}");
    }
    #[test]
    fn segment_is_capped_at_input_length() {
        let mut welch = WelchEstimator::new(250.0, 512);
        let psd = welch.estimate(&vec![0.0; 500]).unwrap();
        assert_eq!(welch.effective_segment(500), 500);
        assert_eq!(psd.frequencies_hz.len(), 251);
        assert!(psd.density.iter().all(|p| *p == 0.0));
    }
    #[test]
    fn rejects_single_sample() {
        assert!(WelchEstimator::new(250.0, 256).estimate(&[1.0]).is_err());
    }
}
