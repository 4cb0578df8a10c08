//! File-level steps shared by the engine and the CLI: process a recording,
//! assemble the training set, train, calibrate and analyse.
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::analysis::{ResultsSummary, SignalStats};
use crate::classify::training::train;
use crate::classify::{CalibrationBaseline, ThresholdClassifier, TrainingReport, TrainingSet};
use crate::config::{AppConfig, PipelineSettings};
use crate::dataset;
use crate::dsp::plot::{render_ratio_png, render_state_timeline_png, write_png, PlotStyle};
use crate::dsp::{process_recording, VoltageNormalizer};
use crate::types::SessionLabel;

pub const MISSING_CALIBRATION: &str =
    "Missing calibration data. Please collect both calm and not calm sessions first.";

/// Raw CSV to filtered CSV and features CSV; returns the number of kept windows.
pub fn process_file(
    settings: &PipelineSettings,
    input: &Path,
    filtered_out: &Path,
    features_out: &Path,
) -> Result<usize> {
    let rows = dataset::read_raw_recording(input)?;
    let out = process_recording(settings, &rows)
        .with_context(|| format!("failed to process {}", input.display()))?;
    dataset::write_filtered(filtered_out, &out.times, &out.filtered)?;
    dataset::write_features(features_out, &out.features)?;
    Ok(out.features.len())
}

pub fn process_session(config: &AppConfig, label: SessionLabel) -> Result<usize> {
    let paths = &config.paths;
    paths.ensure_dirs()?;
    let name = label.as_str();
    process_file(
        &config.pipeline,
        &paths.raw_recording(name),
        &paths.filtered_recording(name),
        &paths.features(name),
    )
}

/// Combines both sessions' features into a labelled, shuffled training set
/// and writes it next to them.
pub fn assemble_training_set(config: &AppConfig) -> Result<TrainingSet> {
    let paths = &config.paths;
    let calm_path = paths.features(SessionLabel::Calm.as_str());
    let not_calm_path = paths.features(SessionLabel::NotCalm.as_str());
    if !calm_path.exists() || !not_calm_path.exists() {
        bail!(MISSING_CALIBRATION);
    }
    let calm = dataset::read_features(&calm_path)?;
    let not_calm = dataset::read_features(&not_calm_path)?;
    let set = TrainingSet::from_sessions(&calm, &not_calm, config.training.seed);
    dataset::write_training_set(&paths.training_set(), &set)?;
    log::info!(
        "training set: {} calm + {} not calm windows",
        calm.len(),
        not_calm.len()
    );
    Ok(set)
}

/// Trains on both sessions and saves model, scaler and report.
pub fn train_model(config: &AppConfig) -> Result<TrainingReport> {
    config.paths.ensure_dirs()?;
    let set = assemble_training_set(config)?;
    let (classifier, report) = train(&set, &config.training)?;
    classifier.save(&config.paths.model(), &config.paths.scaler())?;
    let report_path = config.paths.training_report();
    fs::write(&report_path, report.render())
        .with_context(|| format!("failed to write {}", report_path.display()))?;
    log::info!("model trained, test accuracy {:.2}%", report.accuracy * 100.0);
    Ok(report)
}

/// Calibrates the threshold rule on a relaxed session's features (the calm
/// session by default) and classifies every window of it.
pub fn build_baseline(config: &AppConfig, features: Option<&Path>) -> Result<CalibrationBaseline> {
    let paths = &config.paths;
    paths.ensure_dirs()?;
    let default_features = paths.features(SessionLabel::Calm.as_str());
    let source = features.unwrap_or(default_features.as_path());
    if !source.exists() {
        bail!("no features at {}; record a calm session first", source.display());
    }
    let windows = dataset::read_features(source)?;
    let baseline =
        CalibrationBaseline::from_features(&windows, config.calibration.baseline_windows)?;
    baseline.save(&paths.baseline())?;
    fs::write(paths.thresholds(), baseline.describe())
        .with_context(|| format!("failed to write {}", paths.thresholds().display()))?;

    let rule = ThresholdClassifier::new(baseline);
    let timeline: Vec<_> = windows
        .iter()
        .enumerate()
        .map(|(i, f)| (i as u64 + 1, *f, rule.state_for_ratio(f.ratio)))
        .collect();
    dataset::write_timeline(&paths.calmness_timeline(), &timeline)?;
    log::info!(
        "baseline over {} windows: mean {:.4}, std {:.4}",
        baseline.windows,
        baseline.mean,
        baseline.std_dev
    );
    Ok(baseline)
}

/// Summary text and plots for a prediction log, written into the results directory.
pub fn analyze_results(config: &AppConfig, log_path: Option<&Path>) -> Result<ResultsSummary> {
    let paths = &config.paths;
    paths.ensure_dirs()?;
    let default_log = paths.prediction_log();
    let log_path = log_path.unwrap_or(default_log.as_path());
    let events = dataset::read_prediction_log(log_path)?;
    if events.is_empty() {
        bail!("{} holds no predictions", log_path.display());
    }
    let summary = ResultsSummary::from_events(&events);
    let out_dir = paths.results_dir();
    fs::write(out_dir.join("results_summary.txt"), summary.render())
        .context("failed to write results summary")?;

    let style = PlotStyle::default();
    let thresholds = CalibrationBaseline::load(&paths.baseline())
        .ok()
        .map(|b| (b.mean, b.lower_threshold()));
    let ratio: Vec<(f64, f64)> = events.iter().map(|e| (e.timestamp, e.ratio)).collect();
    write_png(
        &out_dir.join("ratio_vs_time.png"),
        &render_ratio_png(&ratio, thresholds, &style)?,
    )?;
    let states: Vec<_> = events.iter().map(|e| (e.timestamp, e.state)).collect();
    write_png(
        &out_dir.join("state_timeline.png"),
        &render_state_timeline_png(&states, &style)?,
    )?;
    Ok(summary)
}

/// Voltage statistics of a raw recording.
pub fn recording_stats(settings: &PipelineSettings, input: &Path) -> Result<SignalStats> {
    let normalizer = VoltageNormalizer::from_settings(settings);
    let voltages: Vec<f64> = dataset::read_raw_recording(input)?
        .iter()
        .filter_map(|row| normalizer.normalize(row.adc).ok())
        .collect();
    SignalStats::from_voltages(&voltages)
        .with_context(|| format!("{} holds no valid samples", input.display()))
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataPaths;
    use crate::dataset::RawRow;
    use crate::dsp::{SimProfile, SimulatedSource};

    fn scratch_config(name: &str) -> AppConfig {
        let dir = std::env::temp_dir().join(format!("calmwave-workflow-{}-{name}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        AppConfig {
            paths: DataPaths::new(dir),
            ..AppConfig::default()
        }
    }
    fn record(config: &AppConfig, label: SessionLabel, profile: SimProfile, seconds: usize) {
        config.paths.ensure_dirs().unwrap();
        let mut sim = SimulatedSource::new(250.0, 4095, 3.3, 5).with_profile(profile);
        let rows: Vec<RawRow> = (0..seconds * 250)
            .map(|i| RawRow {
                time: i as f64 / 250.0,
                adc: sim.next_code(),
            })
            .collect();
        dataset::write_raw_recording(&config.paths.raw_recording(label.as_str()), &rows).unwrap();
    }
    #[test]
    fn training_needs_both_sessions() {
        let config = scratch_config("missing");
        config.paths.ensure_dirs().unwrap();
        let err = train_model(&config).unwrap_err();
        assert!(err.to_string().starts_with("Missing calibration data"));
        fs::remove_dir_all(&config.paths.data_dir).ok();
    }
    #[test]
    fn record_process_train_calibrate() {
        let config = scratch_config("full");
        record(&config, SessionLabel::Calm, SimProfile::Calm, 10);
        record(&config, SessionLabel::NotCalm, SimProfile::Alert, 10);
        // floor((2500 - 500) / 125) + 1
        assert_eq!(process_session(&config, SessionLabel::Calm).unwrap(), 17);
        assert_eq!(process_session(&config, SessionLabel::NotCalm).unwrap(), 17);

        let report = train_model(&config).unwrap();
        assert_eq!(report.total_samples, 34);
        assert!(report.accuracy > 0.9);
        assert!(config.paths.model().exists());
        assert!(config.paths.scaler().exists());
        assert!(config.paths.training_report().exists());
        assert_eq!(dataset::read_training_set(&config.paths.training_set()).unwrap().len(), 34);

        let baseline = build_baseline(&config, None).unwrap();
        assert_eq!(baseline.windows, 10);
        assert!(baseline.mean > 1.0);
        assert!(config.paths.thresholds().exists());
        let timeline = fs::read_to_string(config.paths.calmness_timeline()).unwrap();
        assert_eq!(timeline.lines().count(), 18);
        fs::remove_dir_all(&config.paths.data_dir).ok();
    }
    #[test]
    fn stats_of_a_recording() {
        let config = scratch_config("stats");
        record(&config, SessionLabel::Calm, SimProfile::Calm, 2);
        let stats = recording_stats(&config.pipeline, &config.paths.raw_recording("calm")).unwrap();
        assert_eq!(stats.samples, 500);
        assert!((stats.mean - 1.65).abs() < 0.01);
        assert!(stats.peak_to_peak() > 0.1);
        fs::remove_dir_all(&config.paths.data_dir).ok();
    }
    #[test]
    fn analysis_of_an_empty_log_fails() {
        let config = scratch_config("empty-log");
        config.paths.ensure_dirs().unwrap();
        let log = crate::recorder::PredictionLog::create(&config.paths.prediction_log()).unwrap();
        drop(log);
        assert!(analyze_results(&config, None).is_err());
        fs::remove_dir_all(&config.paths.data_dir).ok();
    }
}
