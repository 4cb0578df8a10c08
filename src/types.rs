// src/types.rs
use serde::{Deserialize, Serialize};

use crate::dsp::PredictionEvent;

/// Which reference session a recording belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SessionLabel {
    Calm,
    NotCalm,
}
impl SessionLabel {
    /// File-name stem: `calm` or `not_calm`.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionLabel::Calm => "calm",
            SessionLabel::NotCalm => "not_calm",
        }
    }
}

// Control surface -> engine
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Connect { port: String },
    ConnectSimulated,
    Disconnect,
    StartRecording(SessionLabel),
    StopRecording,
    TrainModel,
    BuildBaseline,
    StartPrediction,
    StopPrediction,
    GetStatus,
    /// Flips the simulated signal between calm and alert.
    SetSimulatedAlert(bool),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    pub message: String,
}
impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub connected: bool,
    pub port: Option<String>,
    pub recording: bool,
    pub recording_mode: Option<SessionLabel>,
    pub predicting: bool,
    pub strategy: String,
    pub has_model: bool,
    pub has_baseline: bool,
    pub has_calm_data: bool,
    pub has_not_calm_data: bool,
    pub dropped_frames: u64,
    pub skipped_windows: u64,
}

// Engine -> control surface
#[derive(Clone, Debug)]
pub enum EngineEvent {
    Response(CommandResponse),
    /// Normalised voltage, while recording or predicting.
    Sample { timestamp: f64, voltage: f64 },
    Prediction(PredictionEvent),
    Status(StatusSnapshot),
    Log(String),
}
