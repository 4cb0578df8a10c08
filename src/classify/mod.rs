//! Decision strategies mapping a [`FeatureVector`] to a calmness state.
pub mod threshold;
pub mod trained;
pub mod training;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dsp::{FeatureVector, PipelineError};

pub use threshold::{CalibrationBaseline, ThresholdClassifier};
pub use trained::TrainedClassifier;
pub use training::{TrainingReport, TrainingSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CalmState {
    Calm,
    Neutral,
    #[serde(rename = "Not Calm")]
    NotCalm,
}
impl CalmState {
    pub fn label(&self) -> &'static str {
        match self {
            CalmState::Calm => "Calm",
            CalmState::Neutral => "Neutral",
            CalmState::NotCalm => "Not Calm",
        }
    }
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "Calm" | "calm" => Some(CalmState::Calm),
            "Neutral" | "neutral" => Some(CalmState::Neutral),
            "Not Calm" | "not_calm" | "NotCalm" => Some(CalmState::NotCalm),
            _ => None,
        }
    }
}
impl fmt::Display for CalmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Classification {
    pub state: CalmState,
    /// Probability of `state`, in [0, 1].
    pub confidence: f64,
}

/// Shared interface of the threshold rule and the trained model.
pub trait StateClassifier: Send {
    fn classify(&self, features: &FeatureVector) -> Result<Classification, PipelineError>;
    fn name(&self) -> &'static str;
}
#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn labels_round_trip_through_text_and_serde() {
        for state in [CalmState::Calm, CalmState::Neutral, CalmState::NotCalm] {
            assert_eq!(CalmState::from_label(state.label()), Some(state));
        }
        assert_eq!(
            serde_json::to_string(&CalmState::NotCalm).unwrap(),
            "\"Not Calm\""
        );
        assert_eq!(CalmState::from_label("not_calm"), Some(CalmState::NotCalm));
        assert_eq!(CalmState::from_label("sleepy"), None);
    }
}
