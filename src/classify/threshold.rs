use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::classify::{CalmState, Classification, StateClassifier};
use crate::dsp::{FeatureVector, PipelineError};

/// Mean and population standard deviation of the calmness ratio over the
/// first windows of a relaxed reference session.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBaseline {
    pub mean: f64,
    pub std_dev: f64,
    /// Number of windows the statistics were taken over.
    pub windows: usize,
}
impl CalibrationBaseline {
    /// Uses the first `baseline_windows` ratios (fewer if the session is shorter).
    pub fn from_ratios(ratios: &[f64], baseline_windows: usize) -> Result<Self, PipelineError> {
        let take = baseline_windows.min(ratios.len());
        if take == 0 {
            return Err(PipelineError::InsufficientData {
                required: 1,
                actual: 0,
            });
        }
        let head = &ratios[..take];
        let mean = head.iter().sum::<f64>() / take as f64;
        let variance = head.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / take as f64;
        Ok(Self {
            mean,
            std_dev: variance.sqrt(),
            windows: take,
        })
    }
    pub fn from_features(features: &[FeatureVector], baseline_windows: usize) -> Result<Self, PipelineError> {
        let ratios: Vec<f64> = features.iter().map(|f| f.ratio).collect();
        Self::from_ratios(&ratios, baseline_windows)
    }
    /// Lower edge of the neutral band.
    pub fn lower_threshold(&self) -> f64 {
        self.mean - self.std_dev
    }
    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| PipelineError::persistence(path, e))?;
        fs::write(path, json).map_err(|e| PipelineError::persistence(path, e))
    }
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            PipelineError::ModelUnavailable(format!("baseline {}: {e}", path.display()))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            PipelineError::ModelUnavailable(format!("baseline {}: {e}", path.display()))
        })
    }
    pub fn describe(&self) -> String {
        format!(
            "CALMNESS THRESHOLDS\n\
             ------------------\n\
             Baseline N  : {}\n\
             Mean (mu)   : {:.6}\n\
             Std (sigma) : {:.6}\n\
             Calm        : CI >= {:.6}\n\
             Neutral     : {:.6} <= CI < {:.6}\n\
             Not Calm    : CI < {:.6}\n",
            self.windows,
            self.mean,
            self.std_dev,
            self.mean,
            self.lower_threshold(),
            self.mean,
            self.lower_threshold(),
        )
    }
}

/// Three-band rule around a [`CalibrationBaseline`]:
/// `ratio >= mean` is calm, `mean - std <= ratio < mean` neutral, below that not calm.
/// With `std == 0` the neutral band is empty.
#[derive(Clone, Copy, Debug)]
pub struct ThresholdClassifier {
    baseline: CalibrationBaseline,
}
impl ThresholdClassifier {
    pub fn new(baseline: CalibrationBaseline) -> Self {
        Self { baseline }
    }
    pub fn state_for_ratio(&self, ratio: f64) -> CalmState {
        if ratio >= self.baseline.mean {
            CalmState::Calm
        } else if ratio >= self.baseline.lower_threshold() {
            CalmState::Neutral
        } else {
            CalmState::NotCalm
        }
    }
}
impl StateClassifier for ThresholdClassifier {
    fn classify(&self, features: &FeatureVector) -> Result<Classification, PipelineError> {
        if !features.ratio.is_finite() {
            return Err(PipelineError::DegenerateFeature);
        }
        // The rule is deterministic; it carries no probability of its own.
        Ok(Classification {
            state: self.state_for_ratio(features.ratio),
            confidence: 1.0,
        })
    }
    fn name(&self) -> &'static str {
        "threshold"
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn baseline_uses_first_n_ratios() {
        let mut ratios = vec![1.0, 3.0];
        ratios.extend(std::iter::repeat(100.0).take(20));
        let b = CalibrationBaseline::from_ratios(&ratios, 2).unwrap();
        assert_eq!(b.mean, 2.0);
        assert_eq!(b.std_dev, 1.0);
        assert_eq!(b.windows, 2);
    }
    #[test]
    fn three_bands() {
        let classifier = ThresholdClassifier::new(CalibrationBaseline {
            mean: 2.0,
            std_dev: 0.5,
            windows: 10,
        });
        assert_eq!(classifier.state_for_ratio(2.0), CalmState::Calm);
        assert_eq!(classifier.state_for_ratio(2.7), CalmState::Calm);
        assert_eq!(classifier.state_for_ratio(1.99), CalmState::Neutral);
        assert_eq!(classifier.state_for_ratio(1.5), CalmState::Neutral);
        assert_eq!(classifier.state_for_ratio(1.49), CalmState::NotCalm);
    }
    #[test]
    fn zero_spread_baseline_has_no_neutral_band() {
        let baseline = CalibrationBaseline::from_ratios(&[1.0; 10], 10).unwrap();
        assert_eq!(baseline.mean, 1.0);
        assert_eq!(baseline.std_dev, 0.0);
        let classifier = ThresholdClassifier::new(baseline);
        assert_eq!(classifier.state_for_ratio(1.0), CalmState::Calm);
        assert_eq!(classifier.state_for_ratio(1.5), CalmState::Calm);
        assert_eq!(
            classifier.state_for_ratio(1.0 - f64::EPSILON),
            CalmState::NotCalm
        );
    }
    #[test]
    fn empty_session_cannot_calibrate() {
        assert!(matches!(
            CalibrationBaseline::from_ratios(&[], 10),
            Err(PipelineError::InsufficientData { .. })
        ));
    }
    #[test]
    fn classify_goes_through_the_trait() {
        let classifier: Box<dyn StateClassifier> =
            Box::new(ThresholdClassifier::new(CalibrationBaseline {
                mean: 1.0,
                std_dev: 0.2,
                windows: 10,
            }));
        let features = FeatureVector::from_powers(0.9, 1.0).unwrap();
        let out = classifier.classify(&features).unwrap();
        assert_eq!(out.state, CalmState::Neutral);
        assert_eq!(out.confidence, 1.0);
        assert_eq!(classifier.name(), "threshold");
    }
    #[test]
    fn save_and_load_baseline() {
        let dir = std::env::temp_dir().join(format!("calmwave-baseline-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("baseline.json");
        let b = CalibrationBaseline {
            mean: 1.25,
            std_dev: 0.125,
            windows: 10,
        };
        b.save(&path).unwrap();
        assert_eq!(CalibrationBaseline::load(&path).unwrap(), b);
        assert!(matches!(
            CalibrationBaseline::load(&dir.join("missing.json")),
            Err(PipelineError::ModelUnavailable(_))
        ));
        fs::remove_dir_all(&dir).ok();
    }
}
