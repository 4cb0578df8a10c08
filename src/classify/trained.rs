use std::fs;
use std::path::Path;

use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::classify::{CalmState, Classification, StateClassifier};
use crate::dsp::{FeatureVector, PipelineError};

/// Per-feature affine map to zero mean and unit variance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}
impl StandardScaler {
    /// Fits on the rows of `x`; constant columns get scale 1.
    pub fn fit(x: &Array2<f64>) -> Self {
        let mean = x
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(x.ncols()));
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 0.0 { s } else { 1.0 });
        Self {
            mean: mean.to_vec(),
            scale: scale.to_vec(),
        }
    }
    pub fn dim(&self) -> usize {
        self.mean.len()
    }
    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        let mean = ArrayView1::from(&self.mean[..]);
        let scale = ArrayView1::from(&self.scale[..]);
        (x - &mean) / &scale
    }
    pub fn transform_row(&self, row: &[f64]) -> Result<Vec<f64>, PipelineError> {
        if row.len() != self.dim() || self.scale.len() != self.dim() {
            return Err(PipelineError::ModelUnavailable(format!(
                "scaler expects {} features, got {}",
                self.dim(),
                row.len()
            )));
        }
        Ok(row
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| (v - m) / s)
            .collect())
    }
}

/// Binary logistic regression; the positive class is [`CalmState::Calm`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    /// `[negative, positive]`.
    pub classes: [CalmState; 2],
    pub feature_names: Vec<String>,
}
impl LogisticModel {
    pub fn dim(&self) -> usize {
        self.coefficients.len()
    }
    pub fn decision(&self, scaled: &[f64]) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(scaled)
                .map(|(w, x)| w * x)
                .sum::<f64>()
    }
    /// Probability of the positive class.
    pub fn probability(&self, scaled: &[f64]) -> f64 {
        sigmoid(self.decision(scaled))
    }
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Scaler + model pair, loaded read-only for inference.
#[derive(Clone, Debug)]
pub struct TrainedClassifier {
    scaler: StandardScaler,
    model: LogisticModel,
}
impl TrainedClassifier {
    pub fn new(scaler: StandardScaler, model: LogisticModel) -> Result<Self, PipelineError> {
        if scaler.dim() != model.dim() || scaler.scale.len() != scaler.dim() {
            return Err(PipelineError::ModelUnavailable(format!(
                "scaler has {} features but model has {}",
                scaler.dim(),
                model.dim()
            )));
        }
        if scaler.scale.iter().any(|s| !(*s > 0.0)) {
            return Err(PipelineError::ModelUnavailable(
                "scaler contains non-positive scale".into(),
            ));
        }
        Ok(Self { scaler, model })
    }
    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }
    pub fn model(&self) -> &LogisticModel {
        &self.model
    }
    pub fn load(model_path: &Path, scaler_path: &Path) -> Result<Self, PipelineError> {
        let model: LogisticModel = read_artifact(model_path)?;
        let scaler: StandardScaler = read_artifact(scaler_path)?;
        Self::new(scaler, model)
    }
    pub fn save(&self, model_path: &Path, scaler_path: &Path) -> Result<(), PipelineError> {
        write_artifact(model_path, &self.model)?;
        write_artifact(scaler_path, &self.scaler)
    }
    /// `(state, confidence)` for a raw feature row.
    pub fn predict_row(&self, row: &[f64]) -> Result<Classification, PipelineError> {
        let scaled = self.scaler.transform_row(row)?;
        let p_positive = self.model.probability(&scaled);
        let [negative, positive] = self.model.classes;
        Ok(if p_positive >= 0.5 {
            Classification {
                state: positive,
                confidence: p_positive,
            }
        } else {
            Classification {
                state: negative,
                confidence: 1.0 - p_positive,
            }
        })
    }
}
impl StateClassifier for TrainedClassifier {
    fn classify(&self, features: &FeatureVector) -> Result<Classification, PipelineError> {
        self.predict_row(&features.as_array())
    }
    fn name(&self) -> &'static str {
        "trained"
    }
}

fn read_artifact<T: DeserializeOwned>(path: &Path) -> Result<T, PipelineError> {
    let contents = fs::read_to_string(path).map_err(|e| {
        PipelineError::ModelUnavailable(format!("cannot read {}: {e}", path.display()))
    })?;
    serde_json::from_str(&contents).map_err(|e| {
        PipelineError::ModelUnavailable(format!("cannot parse {}: {e}", path.display()))
    })
}
fn write_artifact<T: Serialize>(path: &Path, value: &T) -> Result<(), PipelineError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| PipelineError::persistence(path, e))?;
    fs::write(path, json).map_err(|e| PipelineError::persistence(path, e))
}
#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    fn model(coefficients: Vec<f64>) -> LogisticModel {
        LogisticModel {
            coefficients,
            intercept: 0.0,
            classes: [CalmState::NotCalm, CalmState::Calm],
            feature_names: vec!["Alpha".into(), "Beta".into(), "AlphaBetaRatio".into()],
        }
    }
    fn identity_scaler(dim: usize) -> StandardScaler {
        StandardScaler {
            mean: vec![0.0; dim],
            scale: vec![1.0; dim],
        }
    }
    #[test]
    fn scaler_standardises_columns() {
        let x = array![[1.0, 10.0, 5.0], [3.0, 10.0, 7.0]];
        let scaler = StandardScaler::fit(&x);
        assert_eq!(scaler.mean, vec![2.0, 10.0, 6.0]);
        assert_eq!(scaler.scale, vec![1.0, 1.0, 1.0]);
        let t = scaler.transform(&x);
        assert_eq!(t, array![[-1.0, 0.0, -1.0], [1.0, 0.0, 1.0]]);
        assert_eq!(scaler.transform_row(&[3.0, 10.0, 5.0]).unwrap(), vec![1.0, 0.0, -1.0]);
    }
    #[test]
    fn confidence_is_probability_of_predicted_class() {
        let clf = TrainedClassifier::new(identity_scaler(3), model(vec![0.0, 0.0, 2.0])).unwrap();
        let calm = clf.predict_row(&[0.0, 0.0, 1.0]).unwrap();
        assert_eq!(calm.state, CalmState::Calm);
        assert!((calm.confidence - sigmoid(2.0)).abs() < 1e-12);
        let not_calm = clf.predict_row(&[0.0, 0.0, -1.0]).unwrap();
        assert_eq!(not_calm.state, CalmState::NotCalm);
        assert!((not_calm.confidence - sigmoid(2.0)).abs() < 1e-12);
        assert!(not_calm.confidence >= 0.5 && not_calm.confidence <= 1.0);
    }
    #[test]
    fn dimension_mismatch_is_model_unavailable() {
        assert!(matches!(
            TrainedClassifier::new(identity_scaler(2), model(vec![1.0, 1.0, 1.0])),
            Err(PipelineError::ModelUnavailable(_))
        ));
        let two_feature = TrainedClassifier::new(identity_scaler(2), model(vec![1.0, 1.0])).unwrap();
        let features = FeatureVector::from_powers(1.0, 2.0).unwrap();
        assert!(matches!(
            two_feature.classify(&features),
            Err(PipelineError::ModelUnavailable(_))
        ));
    }
    #[test]
    fn missing_artifacts_fail_explicitly() {
        let dir = std::env::temp_dir().join(format!("calmwave-missing-{}", std::process::id()));
        let err = TrainedClassifier::load(&dir.join("model.json"), &dir.join("scaler.json"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::ModelUnavailable(_)));
    }
    #[test]
    fn artifacts_round_trip_through_disk() {
        let dir = std::env::temp_dir().join(format!("calmwave-artifacts-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let clf = TrainedClassifier::new(
            StandardScaler {
                mean: vec![1.0, 2.0, 0.5],
                scale: vec![0.5, 0.25, 2.0],
            },
            model(vec![0.3, -0.7, 1.1]),
        )
        .unwrap();
        clf.save(&dir.join("model.json"), &dir.join("scaler.json")).unwrap();
        let loaded = TrainedClassifier::load(&dir.join("model.json"), &dir.join("scaler.json")).unwrap();
        assert_eq!(loaded.model(), clf.model());
        assert_eq!(loaded.scaler(), clf.scaler());
        fs::remove_dir_all(&dir).ok();
    }
}
