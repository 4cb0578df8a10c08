//! Comma-separated files exchanged between recording, processing, training
//! and analysis.
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use crate::classify::{CalmState, TrainingSet};
use crate::dsp::{FeatureVector, PipelineError, PredictionEvent};

pub const RAW_HEADER: [&str; 2] = ["Time(s)", "ADC"];
pub const FILTERED_HEADER: [&str; 2] = ["Time(s)", "Filtered_Voltage"];
pub const FEATURES_HEADER: [&str; 4] = ["Window", "Alpha", "Beta", "AlphaBetaRatio"];
pub const TRAINING_HEADER: [&str; 4] = ["Alpha", "Beta", "AlphaBetaRatio", "Label"];
pub const TIMELINE_HEADER: [&str; 5] = ["Window", "Alpha", "Beta", "Calmness_Index", "State"];
pub const PREDICTION_HEADER: [&str; 6] = ["Time(s)", "Alpha", "Beta", "AlphaBetaRatio", "State", "Confidence"];

/// One row of a raw recording.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawRow {
    pub time: f64,
    pub adc: i64,
}

pub fn read_raw_recording(path: &Path) -> Result<Vec<RawRow>, PipelineError> {
    read_table(path, &RAW_HEADER)?
        .into_iter()
        .map(|(line, cells)| {
            Ok(RawRow {
                time: parse_cell(path, line, &cells[0])?,
                adc: parse_cell(path, line, &cells[1])?,
            })
        })
        .collect()
}
#[cfg(test)]
pub fn write_raw_recording(path: &Path, rows: &[RawRow]) -> Result<(), PipelineError> {
    write_table(path, &RAW_HEADER, rows.iter().map(|r| format!("{:.4},{}", r.time, r.adc)))
}
pub fn write_filtered(path: &Path, times: &[f64], values: &[f64]) -> Result<(), PipelineError> {
    write_table(
        path,
        &FILTERED_HEADER,
        times.iter().zip(values).map(|(t, v)| format!("{t:.4},{v}")),
    )
}
/// Rows are `(window id, features)`.
pub fn write_features(path: &Path, rows: &[(u64, FeatureVector)]) -> Result<(), PipelineError> {
    write_table(
        path,
        &FEATURES_HEADER,
        rows.iter().map(|(id, f)| {
            format!("{id},{},{},{}", f.alpha_power, f.beta_power, f.ratio)
        }),
    )
}
pub fn read_features(path: &Path) -> Result<Vec<FeatureVector>, PipelineError> {
    read_table(path, &FEATURES_HEADER)?
        .into_iter()
        .map(|(line, cells)| {
            let alpha = parse_cell(path, line, &cells[1])?;
            let beta = parse_cell(path, line, &cells[2])?;
            FeatureVector::from_powers(alpha, beta)
        })
        .collect()
}
pub fn write_training_set(path: &Path, set: &TrainingSet) -> Result<(), PipelineError> {
    write_table(
        path,
        &TRAINING_HEADER,
        set.rows.iter().map(|(f, label)| {
            format!("{},{},{},{}", f.alpha_power, f.beta_power, f.ratio, label.label())
        }),
    )
}
#[cfg(test)]
pub fn read_training_set(path: &Path) -> Result<TrainingSet, PipelineError> {
    let rows = read_table(path, &TRAINING_HEADER)?
        .into_iter()
        .map(|(line, cells)| {
            let features = FeatureVector::from_powers(
                parse_cell(path, line, &cells[0])?,
                parse_cell(path, line, &cells[1])?,
            )?;
            let label = CalmState::from_label(&cells[3]).ok_or_else(|| {
                PipelineError::persistence(path, format!("line {line}: unknown label {:?}", cells[3]))
            })?;
            Ok((features, label))
        })
        .collect::<Result<Vec<_>, PipelineError>>()?;
    Ok(TrainingSet { rows })
}
pub fn write_timeline(path: &Path, rows: &[(u64, FeatureVector, CalmState)]) -> Result<(), PipelineError> {
    write_table(
        path,
        &TIMELINE_HEADER,
        rows.iter().map(|(id, f, state)| {
            format!("{id},{},{},{},{}", f.alpha_power, f.beta_power, f.ratio, state.label())
        }),
    )
}
pub fn prediction_row(event: &PredictionEvent) -> String {
    format!(
        "{:.2},{},{},{},{},{:.4}",
        event.timestamp,
        event.alpha,
        event.beta,
        event.ratio,
        event.state.label(),
        event.confidence
    )
}
pub fn read_prediction_log(path: &Path) -> Result<Vec<PredictionEvent>, PipelineError> {
    read_table(path, &PREDICTION_HEADER)?
        .into_iter()
        .map(|(line, cells)| {
            let state = CalmState::from_label(&cells[4]).ok_or_else(|| {
                PipelineError::persistence(path, format!("line {line}: unknown state {:?}", cells[4]))
            })?;
            Ok(PredictionEvent {
                timestamp: parse_cell(path, line, &cells[0])?,
                alpha: parse_cell(path, line, &cells[1])?,
                beta: parse_cell(path, line, &cells[2])?,
                ratio: parse_cell(path, line, &cells[3])?,
                state,
                confidence: parse_cell(path, line, &cells[5])?,
            })
        })
        .collect()
}

pub(crate) fn write_header(w: &mut impl Write, header: &[&str]) -> std::io::Result<()> {
    writeln!(w, "{}", header.join(","))
}
fn write_table(path: &Path, header: &[&str], rows: impl Iterator<Item = String>) -> Result<(), PipelineError> {
    let file = File::create(path).map_err(|e| PipelineError::persistence(path, e))?;
    let mut w = BufWriter::new(file);
    write_header(&mut w, header).map_err(|e| PipelineError::persistence(path, e))?;
    for row in rows {
        writeln!(w, "{row}").map_err(|e| PipelineError::persistence(path, e))?;
    }
    w.flush().map_err(|e| PipelineError::persistence(path, e))
}
/// Data rows as `(1-based line number, trimmed cells)`; the header must match
/// `header` up to surrounding whitespace.
fn read_table(path: &Path, header: &[&str]) -> Result<Vec<(usize, Vec<String>)>, PipelineError> {
    let contents = fs::read_to_string(path).map_err(|e| PipelineError::persistence(path, e))?;
    let mut lines = contents.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());
    let found: Vec<&str> = match lines.next() {
        Some((_, l)) => l.split(',').map(str::trim).collect(),
        None => Vec::new(),
    };
    if found != header {
        return Err(PipelineError::persistence(
            path,
            format!("expected header {:?}, found {:?}", header.join(","), found.join(",")),
        ));
    }
    lines
        .map(|(i, l)| {
            let cells: Vec<String> = l.split(',').map(|c| c.trim().to_string()).collect();
            if cells.len() != header.len() {
                return Err(PipelineError::persistence(
                    path,
                    format!("line {}: expected {} columns, found {}", i + 1, header.len(), cells.len()),
                ));
            }
            Ok((i + 1, cells))
        })
        .collect()
}
fn parse_cell<T: FromStr>(path: &Path, line: usize, cell: &str) -> Result<T, PipelineError> {
    cell.parse::<T>()
        .map_err(|_| PipelineError::persistence(path, format!("line {line}: cannot parse {cell:?}")))
}
#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("calmwave-dataset-{}-{name}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }
    #[test]
    fn raw_header_tolerates_spaces() {
        let dir = scratch("raw");
        let path = dir.join("calm_raw.csv");
        fs::write(&path, "Time(s), ADC\n0.0040, 2048\n0.0080,2050\n\n").unwrap();
        let rows = read_raw_recording(&path).unwrap();
        assert_eq!(
            rows,
            vec![
                RawRow { time: 0.004, adc: 2048 },
                RawRow { time: 0.008, adc: 2050 }
            ]
        );
        fs::remove_dir_all(&dir).ok();
    }
    #[test]
    fn wrong_header_is_a_persistence_error() {
        let dir = scratch("header");
        let path = dir.join("bad.csv");
        fs::write(&path, "Time (s),Voltage (V)\n0.1,1.2\n").unwrap();
        assert!(matches!(
            read_raw_recording(&path),
            Err(PipelineError::Persistence { .. })
        ));
        fs::remove_dir_all(&dir).ok();
    }
    #[test]
    fn features_and_training_set_files() {
        let dir = scratch("features");
        let f1 = FeatureVector::from_powers(0.5, 0.25).unwrap();
        let f2 = FeatureVector::from_powers(0.1, 0.4).unwrap();
        let path = dir.join("calm_features.csv");
        write_features(&path, &[(1, f1), (2, f2)]).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Window,Alpha,Beta,AlphaBetaRatio\n1,0.5,0.25,2\n"));
        assert_eq!(read_features(&path).unwrap(), vec![f1, f2]);

        let set = TrainingSet {
            rows: vec![(f1, CalmState::Calm), (f2, CalmState::NotCalm)],
        };
        let path = dir.join("features_labels.csv");
        write_training_set(&path, &set).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains(",Not Calm\n"));
        let back = read_training_set(&path).unwrap();
        assert_eq!(back.rows, set.rows);
        fs::remove_dir_all(&dir).ok();
    }
    #[test]
    fn prediction_log_rows_parse_back() {
        let dir = scratch("log");
        let path = dir.join("realtime_log.csv");
        let event = PredictionEvent {
            timestamp: 2.5,
            alpha: 0.004,
            beta: 0.002,
            ratio: 2.0,
            state: CalmState::Calm,
            confidence: 0.875,
        };
        write_table(&path, &PREDICTION_HEADER, std::iter::once(prediction_row(&event))).unwrap();
        assert_eq!(read_prediction_log(&path).unwrap(), vec![event]);
        fs::remove_dir_all(&dir).ok();
    }
}
