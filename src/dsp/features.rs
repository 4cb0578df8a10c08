use serde::{Deserialize, Serialize};

use crate::config::PipelineSettings;
use crate::dsp::filter::FilterChain;
use crate::dsp::spectrum::{PowerSpectrum, WelchEstimator};
use crate::dsp::PipelineError;

/// Per-window band powers and the calmness ratio.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub alpha_power: f64,
    pub beta_power: f64,
    pub ratio: f64,
}
impl FeatureVector {
    pub const DIM: usize = 3;
    /// Fails with [`PipelineError::DegenerateFeature`] when beta power is zero
    /// (or not a number), so no infinite or NaN ratio ever leaves this type.
    pub fn from_powers(alpha_power: f64, beta_power: f64) -> Result<Self, PipelineError> {
        if !(beta_power > 0.0) || !alpha_power.is_finite() {
            return Err(PipelineError::DegenerateFeature);
        }
        let ratio = alpha_power / beta_power;
        if !ratio.is_finite() {
            return Err(PipelineError::DegenerateFeature);
        }
        Ok(Self {
            alpha_power,
            beta_power,
            ratio,
        })
    }
    /// Model input order: alpha, beta, ratio.
    pub fn as_array(&self) -> [f64; 3] {
        [self.alpha_power, self.beta_power, self.ratio]
    }
}

/// Filter chain + Welch PSD + band integration for one window at a time.
pub struct FeatureExtractor {
    filters: FilterChain,
    welch: WelchEstimator,
    alpha_band: (f64, f64),
    beta_band: (f64, f64),
}
impl FeatureExtractor {
    pub fn from_settings(settings: &PipelineSettings) -> Result<Self, PipelineError> {
        Ok(Self {
            filters: FilterChain::from_settings(settings)?,
            welch: WelchEstimator::new(settings.sample_rate_hz, settings.welch_segment),
            alpha_band: settings.alpha_band,
            beta_band: settings.beta_band,
        })
    }
    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }
    /// Band powers of an already filtered buffer.
    pub fn band_powers(&mut self, filtered: &[f64]) -> Result<(f64, f64), PipelineError> {
        let psd = self.spectrum(filtered)?;
        Ok((psd.band_power(self.alpha_band), psd.band_power(self.beta_band)))
    }
    pub fn spectrum(&mut self, filtered: &[f64]) -> Result<PowerSpectrum, PipelineError> {
        self.welch.estimate(filtered)
    }
    /// Features of an already filtered buffer.
    pub fn features_of_filtered(&mut self, filtered: &[f64]) -> Result<FeatureVector, PipelineError> {
        let (alpha, beta) = self.band_powers(filtered)?;
        FeatureVector::from_powers(alpha, beta)
    }
    /// Filters a raw voltage window, then extracts its features.
    pub fn extract(&mut self, voltages: &[f64]) -> Result<FeatureVector, PipelineError> {
        let filtered = self.filters.apply(voltages)?;
        self.features_of_filtered(&filtered)
    }
}
