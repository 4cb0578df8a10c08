use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::classify::{
    CalibrationBaseline, CalmState, StateClassifier, ThresholdClassifier, TrainedClassifier,
};
use crate::config::{DataPaths, PipelineSettings, Strategy};
use crate::dataset::RawRow;
use crate::dsp::features::{FeatureExtractor, FeatureVector};
use crate::dsp::normalize::VoltageNormalizer;
use crate::dsp::source::decode_line;
use crate::dsp::window::{Sample, Window, WindowEngine};
use crate::dsp::PipelineError;

/// One classified window.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionEvent {
    /// Timestamp of the window's last sample.
    pub timestamp: f64,
    pub alpha: f64,
    pub beta: f64,
    pub ratio: f64,
    pub state: CalmState,
    pub confidence: f64,
}

/// What one input line turned into.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LineOutcome {
    /// The accepted sample; `None` when the line was skipped.
    pub sample: Option<Sample>,
    pub events: Vec<PredictionEvent>,
}

/// Counters exposed to status queries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    pub samples: u64,
    /// Lines that could not be decoded or were out of range.
    pub rejected_lines: u64,
    /// Windows with no usable features.
    pub skipped_windows: u64,
    /// Windows discarded unprocessed because processing fell behind the stream.
    pub dropped_windows: u64,
    pub predictions: u64,
}

/// Builds the decision strategy selected in config from its on-disk artifacts.
pub fn classifier_for(
    strategy: Strategy,
    paths: &DataPaths,
) -> Result<Box<dyn StateClassifier>, PipelineError> {
    Ok(match strategy {
        Strategy::Trained => Box::new(TrainedClassifier::load(&paths.model(), &paths.scaler())?),
        Strategy::Threshold => Box::new(ThresholdClassifier::new(CalibrationBaseline::load(
            &paths.baseline(),
        )?)),
    })
}

/// Normaliser, window engine, feature extractor and classifier driven one
/// line at a time.
pub struct StreamingPredictor {
    normalizer: VoltageNormalizer,
    windows: WindowEngine,
    extractor: FeatureExtractor,
    classifier: Box<dyn StateClassifier>,
    sample_rate_hz: f64,
    stats: StreamStats,
}
impl StreamingPredictor {
    pub fn new(
        settings: &PipelineSettings,
        classifier: Box<dyn StateClassifier>,
    ) -> Result<Self, PipelineError> {
        settings.validate()?;
        let extractor = FeatureExtractor::from_settings(settings)?;
        let min_len = extractor.filters().min_len();
        if settings.window_len() < min_len {
            return Err(PipelineError::InvalidSettings(format!(
                "window of {} samples is shorter than the {min_len} the filters need",
                settings.window_len()
            )));
        }
        let step_period = Duration::from_secs_f64(settings.step_len() as f64 / settings.sample_rate_hz);
        Ok(Self {
            normalizer: VoltageNormalizer::from_settings(settings),
            windows: WindowEngine::from_settings(settings)?.paced(step_period),
            extractor,
            classifier,
            sample_rate_hz: settings.sample_rate_hz,
            stats: StreamStats::default(),
        })
    }
    pub fn classifier_name(&self) -> &'static str {
        self.classifier.name()
    }
    pub fn stats(&self) -> StreamStats {
        StreamStats {
            dropped_windows: self.windows.dropped(),
            ..self.stats
        }
    }
    /// Decodes one raw line; bad lines are counted and skipped.
    pub fn process_line(&mut self, line: &str) -> Result<LineOutcome, PipelineError> {
        let voltage = match decode_line(line).and_then(|code| self.normalizer.normalize(code)) {
            Ok(v) => v,
            Err(err) if err.is_recoverable() => {
                self.stats.rejected_lines += 1;
                log::debug!("skipping line: {err}");
                return Ok(LineOutcome::default());
            }
            Err(err) => return Err(err),
        };
        let sample = self.next_sample(voltage);
        let events = self.push_sample(sample)?;
        Ok(LineOutcome {
            sample: Some(sample),
            events,
        })
    }
    /// Counts a line the source discarded before decoding.
    pub fn reject_line(&mut self) {
        self.stats.rejected_lines += 1;
    }
    fn next_sample(&self, voltage: f64) -> Sample {
        Sample {
            timestamp: self.stats.samples as f64 / self.sample_rate_hz,
            voltage,
        }
    }
    fn push_sample(&mut self, sample: Sample) -> Result<Vec<PredictionEvent>, PipelineError> {
        self.stats.samples += 1;
        self.windows.push(sample);
        let mut events = Vec::new();
        while let Some(window) = self.windows.try_emit_window() {
            let started = Instant::now();
            let outcome = self.predict_window(&window);
            self.windows.record_processing(started.elapsed());
            match outcome {
                Ok(event) => {
                    self.stats.predictions += 1;
                    log::debug!(
                        "t={:.2}s alpha={:.3e} beta={:.3e} ratio={:.3} -> {} ({:.2})",
                        event.timestamp,
                        event.alpha,
                        event.beta,
                        event.ratio,
                        event.state,
                        event.confidence
                    );
                    events.push(event);
                }
                Err(err) if err.is_recoverable() => {
                    self.stats.skipped_windows += 1;
                    log::warn!("window {} skipped: {err}", window.index);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(events)
    }
    fn predict_window(&mut self, window: &Window) -> Result<PredictionEvent, PipelineError> {
        let features = self.extractor.extract(&window.voltages())?;
        let out = self.classifier.classify(&features)?;
        Ok(PredictionEvent {
            timestamp: window.end_timestamp(),
            alpha: features.alpha_power,
            beta: features.beta_power,
            ratio: features.ratio,
            state: out.state,
            confidence: out.confidence,
        })
    }
}

/// Result of processing a whole recording at once.
#[derive(Clone, Debug, Default)]
pub struct OfflineOutput {
    pub times: Vec<f64>,
    pub filtered: Vec<f64>,
    /// `(window id, features)`; ids count from 1 over kept windows only.
    pub features: Vec<(u64, FeatureVector)>,
    pub rejected_rows: usize,
    pub skipped_windows: usize,
}

/// Filters a full raw recording in one pass, then windows the filtered
/// signal and extracts features per window.
pub fn process_recording(
    settings: &PipelineSettings,
    rows: &[RawRow],
) -> Result<OfflineOutput, PipelineError> {
    settings.validate()?;
    let normalizer = VoltageNormalizer::from_settings(settings);
    let mut extractor = FeatureExtractor::from_settings(settings)?;
    let mut out = OfflineOutput::default();
    let mut voltages = Vec::with_capacity(rows.len());
    for row in rows {
        match normalizer.normalize(row.adc) {
            Ok(v) => {
                out.times.push(row.time);
                voltages.push(v);
            }
            Err(err) if err.is_recoverable() => out.rejected_rows += 1,
            Err(err) => return Err(err),
        }
    }
    if out.rejected_rows > 0 {
        log::warn!("dropped {} out-of-range rows", out.rejected_rows);
    }
    out.filtered = extractor.filters().apply(&voltages)?;

    // Drained after every push, so the backlog bound never triggers here.
    let mut windows = WindowEngine::from_settings(settings)?;
    let mut next_id = 1u64;
    for (t, v) in out.times.iter().zip(&out.filtered) {
        windows.push(Sample {
            timestamp: *t,
            voltage: *v,
        });
        while let Some(window) = windows.try_emit_window() {
            match extractor.features_of_filtered(&window.voltages()) {
                Ok(features) => {
                    out.features.push((next_id, features));
                    next_id += 1;
                }
                Err(err) if err.is_recoverable() => out.skipped_windows += 1,
                Err(err) => return Err(err),
            }
        }
    }
    log::info!(
        "processed {} samples into {} windows ({} skipped)",
        out.filtered.len(),
        out.features.len(),
        out.skipped_windows
    );
    Ok(out)
}
