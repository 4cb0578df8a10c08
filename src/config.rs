use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::dsp::PipelineError;

/// What to do with ADC codes outside `[0, adc_max]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutOfRangePolicy {
    /// Reject the reading; the streaming loop skips it like a malformed line.
    Drop,
    /// Saturate to the nearest valid code.
    Clamp,
}

/// Decision strategy used by the streaming loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Trained,
    Threshold,
}
impl Strategy {
    pub fn label(&self) -> &'static str {
        match self {
            Strategy::Trained => "trained",
            Strategy::Threshold => "threshold",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
}
impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "COM6".into(),
            baud_rate: 115_200,
            read_timeout_ms: 50,
        }
    }
}

/// Every constant the processing chain depends on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub sample_rate_hz: f64,
    pub adc_max: u32,
    pub vref: f64,
    pub out_of_range: OutOfRangePolicy,
    pub window_seconds: f64,
    pub step_seconds: f64,
    pub lowcut_hz: f64,
    pub highcut_hz: f64,
    pub bandpass_order: usize,
    pub notch_hz: f64,
    pub notch_q: f64,
    pub welch_segment: usize,
    pub alpha_band: (f64, f64),
    pub beta_band: (f64, f64),
    pub max_backlog_windows: usize,
}
impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            sample_rate_hz: 250.0,
            adc_max: 4095,
            vref: 3.3,
            out_of_range: OutOfRangePolicy::Drop,
            window_seconds: 2.0,
            step_seconds: 0.5,
            lowcut_hz: 0.5,
            highcut_hz: 40.0,
            bandpass_order: 4,
            notch_hz: 50.0,
            notch_q: 30.0,
            welch_segment: 256,
            alpha_band: (8.0, 13.0),
            beta_band: (13.0, 30.0),
            max_backlog_windows: 8,
        }
    }
}
impl PipelineSettings {
    pub fn window_len(&self) -> usize {
        (self.window_seconds * self.sample_rate_hz).round() as usize
    }
    pub fn step_len(&self) -> usize {
        (self.step_seconds * self.sample_rate_hz).round() as usize
    }
    pub fn nyquist_hz(&self) -> f64 {
        self.sample_rate_hz * 0.5
    }
    pub fn validate(&self) -> Result<(), PipelineError> {
        let fail = |msg: String| Err(PipelineError::InvalidSettings(msg));
        if !(self.sample_rate_hz > 0.0) {
            return fail(format!("sample rate must be positive, got {}", self.sample_rate_hz));
        }
        if self.adc_max == 0 || !(self.vref > 0.0) {
            return fail("adc_max and vref must be positive".into());
        }
        let (window, step) = (self.window_len(), self.step_len());
        if step == 0 || window == 0 {
            return fail("window and step must cover at least one sample".into());
        }
        if step > window {
            return fail(format!("step ({step} samples) exceeds window ({window} samples)"));
        }
        let nyquist = self.nyquist_hz();
        if !(0.0 < self.lowcut_hz && self.lowcut_hz < self.highcut_hz && self.highcut_hz < nyquist) {
            return fail(format!(
                "pass-band [{}, {}] Hz must sit inside (0, {nyquist}) Hz",
                self.lowcut_hz, self.highcut_hz
            ));
        }
        if self.bandpass_order == 0 || self.bandpass_order % 2 != 0 {
            return fail(format!(
                "band-pass order must be even and non-zero, got {}",
                self.bandpass_order
            ));
        }
        if !(0.0 < self.notch_hz && self.notch_hz < nyquist) || !(self.notch_q > 0.0) {
            return fail(format!("notch at {} Hz (Q {}) is not realisable", self.notch_hz, self.notch_q));
        }
        if self.welch_segment < 2 {
            return fail("Welch segment must hold at least two samples".into());
        }
        for (name, (lo, hi)) in [("alpha", self.alpha_band), ("beta", self.beta_band)] {
            if !(0.0 <= lo && lo < hi && hi <= nyquist) {
                return fail(format!("{name} band [{lo}, {hi}] Hz is not valid"));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    pub baseline_windows: usize,
}
impl Default for CalibrationSettings {
    fn default() -> Self {
        Self { baseline_windows: 10 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    pub test_fraction: f64,
    pub seed: u64,
    pub max_iter: usize,
    pub regularization_c: f64,
}
impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            test_fraction: 0.3,
            seed: 42,
            max_iter: 1000,
            regularization_c: 1.0,
        }
    }
}

/// On-disk layout shared by recording, training and prediction.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DataPaths {
    pub data_dir: PathBuf,
}
impl Default for DataPaths {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}
impl DataPaths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }
    pub fn calibration_dir(&self) -> PathBuf {
        self.data_dir.join("calibration")
    }
    pub fn pipeline_dir(&self) -> PathBuf {
        self.data_dir.join("pipeline_output")
    }
    pub fn model_dir(&self) -> PathBuf {
        self.data_dir.join("models")
    }
    pub fn results_dir(&self) -> PathBuf {
        self.data_dir.join("results")
    }
    pub fn raw_recording(&self, label: &str) -> PathBuf {
        self.calibration_dir().join(format!("{label}_raw.csv"))
    }
    pub fn filtered_recording(&self, label: &str) -> PathBuf {
        self.pipeline_dir().join(format!("{label}_filtered.csv"))
    }
    pub fn features(&self, label: &str) -> PathBuf {
        self.pipeline_dir().join(format!("{label}_features.csv"))
    }
    pub fn training_set(&self) -> PathBuf {
        self.pipeline_dir().join("features_labels.csv")
    }
    pub fn model(&self) -> PathBuf {
        self.model_dir().join("model.json")
    }
    pub fn scaler(&self) -> PathBuf {
        self.model_dir().join("scaler.json")
    }
    pub fn training_report(&self) -> PathBuf {
        self.model_dir().join("training_report.txt")
    }
    pub fn baseline(&self) -> PathBuf {
        self.model_dir().join("baseline.json")
    }
    pub fn thresholds(&self) -> PathBuf {
        self.model_dir().join("thresholds.txt")
    }
    pub fn prediction_log(&self) -> PathBuf {
        self.results_dir().join("realtime_log.csv")
    }
    pub fn calmness_timeline(&self) -> PathBuf {
        self.results_dir().join("calmness_timeline.csv")
    }
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.calibration_dir(),
            self.pipeline_dir(),
            self.model_dir(),
            self.results_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub serial: SerialSettings,
    pub pipeline: PipelineSettings,
    pub calibration: CalibrationSettings,
    pub training: TrainingSettings,
    pub strategy: Strategy,
    pub paths: DataPaths,
}
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            serial: SerialSettings::default(),
            pipeline: PipelineSettings::default(),
            calibration: CalibrationSettings::default(),
            training: TrainingSettings::default(),
            strategy: Strategy::Trained,
            paths: DataPaths::default(),
        }
    }
}
impl AppConfig {
    /// Reads a JSON config; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.pipeline.validate()?;
        Ok(config)
    }
    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("failed to write config to {}", path.display()))
    }
}
