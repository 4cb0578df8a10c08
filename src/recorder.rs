use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::dataset::{prediction_row, write_header, PREDICTION_HEADER, RAW_HEADER};
use crate::dsp::{PipelineError, PredictionEvent};

/// What a finished recording left on disk.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordingSummary {
    pub path: PathBuf,
    pub rows: usize,
    pub seconds: f64,
}

/// Streams `Time(s),ADC` rows of one session to disk.
pub struct DataRecorder {
    writer: Option<BufWriter<File>>,
    path: PathBuf,
    start_time: Instant,
    rows: usize,
}

impl DataRecorder {
    pub fn new() -> Self {
        Self {
            writer: None,
            path: PathBuf::new(),
            start_time: Instant::now(),
            rows: 0,
        }
    }

    pub fn start(&mut self, path: &Path) -> Result<(), PipelineError> {
        let file = File::create(path).map_err(|e| PipelineError::persistence(path, e))?;
        let mut w = BufWriter::new(file);
        write_header(&mut w, &RAW_HEADER).map_err(|e| PipelineError::persistence(path, e))?;
        self.writer = Some(w);
        self.path = path.to_path_buf();
        self.start_time = Instant::now();
        self.rows = 0;
        log::info!("recording to {}", path.display());
        Ok(())
    }

    /// Flushes and closes the session; `None` if nothing was recording.
    pub fn stop(&mut self) -> Result<Option<RecordingSummary>, PipelineError> {
        let Some(mut w) = self.writer.take() else {
            return Ok(None);
        };
        w.flush().map_err(|e| PipelineError::persistence(&self.path, e))?;
        let summary = RecordingSummary {
            path: self.path.clone(),
            rows: self.rows,
            seconds: self.elapsed(),
        };
        log::info!(
            "saved {} samples ({:.1} s) to {}",
            summary.rows,
            summary.seconds,
            summary.path.display()
        );
        Ok(Some(summary))
    }

    /// Stamps `adc` with the wall-clock time since `start`.
    pub fn write_record(&mut self, adc: i64) -> Result<(), PipelineError> {
        let t = self.elapsed();
        self.write_row(t, adc)
    }

    pub fn write_row(&mut self, time: f64, adc: i64) -> Result<(), PipelineError> {
        if let Some(w) = &mut self.writer {
            writeln!(w, "{time:.4},{adc}").map_err(|e| PipelineError::persistence(&self.path, e))?;
            self.rows += 1;
        }
        Ok(())
    }

    pub fn elapsed(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

}

impl Default for DataRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Append-only log of prediction events.
pub struct PredictionLog {
    writer: BufWriter<File>,
    path: PathBuf,
}
impl PredictionLog {
    pub fn create(path: &Path) -> Result<Self, PipelineError> {
        let file = File::create(path).map_err(|e| PipelineError::persistence(path, e))?;
        let mut writer = BufWriter::new(file);
        write_header(&mut writer, &PREDICTION_HEADER).map_err(|e| PipelineError::persistence(path, e))?;
        Ok(Self {
            writer,
            path: path.to_path_buf(),
        })
    }
    pub fn append(&mut self, event: &PredictionEvent) -> Result<(), PipelineError> {
        writeln!(self.writer, "{}", prediction_row(event))
            .and_then(|_| self.writer.flush())
            .map_err(|e| PipelineError::persistence(&self.path, e))
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::CalmState;
    use crate::dataset::{read_prediction_log, read_raw_recording, RawRow};

    #[test]
    fn recording_writes_raw_rows() {
        let dir = std::env::temp_dir().join(format!("calmwave-recorder-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("calm_raw.csv");
        let mut rec = DataRecorder::new();
        assert!(rec.stop().unwrap().is_none());
        rec.start(&path).unwrap();
        rec.write_row(0.004, 2048).unwrap();
        rec.write_row(0.008, 2051).unwrap();
        let summary = rec.stop().unwrap().unwrap();
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.path, path);
        assert_eq!(
            read_raw_recording(&path).unwrap(),
            vec![
                RawRow { time: 0.004, adc: 2048 },
                RawRow { time: 0.008, adc: 2051 }
            ]
        );
        // Writes after stop are ignored.
        rec.write_row(1.0, 1).unwrap();
        assert_eq!(rec.rows(), 2);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn unwritable_path_is_a_persistence_error() {
        let mut rec = DataRecorder::new();
        let path = std::env::temp_dir().join("calmwave-no-such-dir").join("x").join("raw.csv");
        assert!(matches!(rec.start(&path), Err(PipelineError::Persistence { .. })));
        assert_eq!(rec.rows(), 0);
    }

    #[test]
    fn prediction_log_appends_events() {
        let dir = std::env::temp_dir().join(format!("calmwave-predlog-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("realtime_log.csv");
        let mut log = PredictionLog::create(&path).unwrap();
        let event = PredictionEvent {
            timestamp: 1.99,
            alpha: 3.0e-4,
            beta: 1.0e-4,
            ratio: 3.0,
            state: CalmState::Calm,
            confidence: 0.5,
        };
        log.append(&event).unwrap();
        log.append(&PredictionEvent {
            state: CalmState::NotCalm,
            ..event
        })
        .unwrap();
        let back = read_prediction_log(log.path()).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[1].state, CalmState::NotCalm);
        std::fs::remove_dir_all(&dir).ok();
    }
}
