use std::collections::VecDeque;
use std::time::Duration;

use crate::config::PipelineSettings;
use crate::dsp::PipelineError;

/// One normalised reading.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    /// Seconds since stream start.
    pub timestamp: f64,
    pub voltage: f64,
}

/// Fixed-length run of consecutive samples.
#[derive(Clone, Debug)]
pub struct Window {
    /// Sequence number of this window since the engine was created.
    pub index: u64,
    /// Absolute index of the first sample in the stream.
    pub start_sample: u64,
    pub samples: Vec<Sample>,
}
impl Window {
    pub fn voltages(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.voltage).collect()
    }
    pub fn end_timestamp(&self) -> f64 {
        self.samples.last().map(|s| s.timestamp).unwrap_or(0.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowState {
    Filling,
    Ready,
}

/// Sliding buffer emitting overlapping windows every `step_len` samples.
///
/// The buffer always starts at the next window's first sample, so history is
/// released only after a window has been emitted. It is bounded at
/// `window_len + step_len * max_backlog` samples: past that, the oldest
/// pending window is dropped instead of queueing without limit.
///
/// A paced engine also tracks how far processing lags behind the stream.
/// Each window's processing time counts against one step period, and while
/// the accumulated lag covers a whole step the oldest pending window is
/// dropped rather than processed.
pub struct WindowEngine {
    buffer: VecDeque<Sample>,
    window_len: usize,
    step_len: usize,
    capacity: usize,
    /// Absolute index of `buffer[0]`.
    base: u64,
    emitted: u64,
    dropped: u64,
    step_period: Option<Duration>,
    lag: Duration,
}
impl WindowEngine {
    pub fn new(window_len: usize, step_len: usize, max_backlog: usize) -> Result<Self, PipelineError> {
        if window_len == 0 || step_len == 0 || step_len > window_len {
            return Err(PipelineError::InvalidSettings(format!(
                "window {window_len} / step {step_len} samples"
            )));
        }
        let capacity = window_len + step_len * max_backlog.max(1);
        Ok(Self {
            buffer: VecDeque::with_capacity(capacity),
            window_len,
            step_len,
            capacity,
            base: 0,
            emitted: 0,
            dropped: 0,
            step_period: None,
            lag: Duration::ZERO,
        })
    }
    pub fn from_settings(settings: &PipelineSettings) -> Result<Self, PipelineError> {
        Self::new(
            settings.window_len(),
            settings.step_len(),
            settings.max_backlog_windows,
        )
    }
    /// Enables lag-based dropping for a live stream advancing one step every `step_period`.
    pub fn paced(mut self, step_period: Duration) -> Self {
        self.step_period = Some(step_period).filter(|p| !p.is_zero());
        self
    }
    /// Reports how long the last emitted window took to process.
    pub fn record_processing(&mut self, took: Duration) {
        if let Some(period) = self.step_period {
            self.lag = (self.lag + took).saturating_sub(period);
        }
    }
    pub fn lag(&self) -> Duration {
        self.lag
    }
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
    /// Windows discarded by the backlog bound.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
    pub fn state(&self) -> WindowState {
        if self.buffer.len() >= self.window_len {
            WindowState::Ready
        } else {
            WindowState::Filling
        }
    }
    pub fn push(&mut self, sample: Sample) {
        self.buffer.push_back(sample);
        if self.buffer.len() > self.capacity {
            self.drop_oldest("window backlog full");
        }
    }
    /// Returns the next window once enough samples are buffered; `None` while filling.
    pub fn try_emit_window(&mut self) -> Option<Window> {
        if let Some(period) = self.step_period {
            while self.lag >= period && self.state() == WindowState::Ready {
                self.lag -= period;
                self.drop_oldest("processing is behind the stream");
            }
        }
        if self.state() == WindowState::Filling {
            return None;
        }
        let window = Window {
            index: self.emitted + self.dropped,
            start_sample: self.base,
            samples: self.buffer.iter().take(self.window_len).copied().collect(),
        };
        self.advance();
        self.emitted += 1;
        Some(window)
    }
    fn drop_oldest(&mut self, reason: &str) {
        let start = self.base;
        self.advance();
        self.dropped += 1;
        log::warn!("{reason}, dropped pending window starting at sample {start}");
    }
    fn advance(&mut self) {
        let n = self.step_len.min(self.buffer.len());
        self.buffer.drain(..n);
        self.base += n as u64;
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    fn sample(i: usize) -> Sample {
        Sample {
            timestamp: i as f64 / 250.0,
            voltage: i as f64,
        }
    }
    fn expected_windows(n: usize, window: usize, step: usize) -> usize {
        if n < window {
            0
        } else {
            (n - window) / step + 1
        }
    }
    #[test]
    fn emits_expected_count_when_drained_per_sample() {
        for n in [0, 1, 499, 500, 501, 624, 625, 626, 2500] {
            let mut engine = WindowEngine::new(500, 125, 8).unwrap();
            let mut count = 0;
            for i in 0..n {
                engine.push(sample(i));
                while engine.try_emit_window().is_some() {
                    count += 1;
                }
            }
            assert_eq!(count, expected_windows(n, 500, 125), "n = {n}");
        }
    }
    #[test]
    fn windows_advance_by_exactly_one_step() {
        let mut engine = WindowEngine::new(500, 125, 8).unwrap();
        let mut starts = Vec::new();
        for i in 0..2000 {
            engine.push(sample(i));
            if let Some(w) = engine.try_emit_window() {
                assert_eq!(w.samples.len(), 500);
                assert_eq!(w.samples[0].voltage, w.start_sample as f64);
                starts.push(w.start_sample);
            }
        }
        assert!(starts.windows(2).all(|p| p[1] - p[0] == 125));
        assert_eq!(starts[0], 0);
    }
    #[test]
    fn filling_until_a_full_window_is_buffered() {
        let mut engine = WindowEngine::new(10, 5, 4).unwrap();
        for i in 0..9 {
            engine.push(sample(i));
            assert_eq!(engine.state(), WindowState::Filling);
            assert!(engine.try_emit_window().is_none());
        }
        engine.push(sample(9));
        assert_eq!(engine.state(), WindowState::Ready);
        let w = engine.try_emit_window().unwrap();
        assert_eq!(w.index, 0);
        assert_eq!(engine.buffered(), 5);
        assert_eq!(engine.state(), WindowState::Filling);
    }
    #[test]
    fn backlog_drops_oldest_pending_window() {
        let mut engine = WindowEngine::new(10, 5, 2).unwrap();
        // capacity 20: the 21st sample forces a drop of the window at 0.
        for i in 0..21 {
            engine.push(sample(i));
        }
        assert_eq!(engine.dropped(), 1);
        let w = engine.try_emit_window().unwrap();
        assert_eq!(w.start_sample, 5);
        assert_eq!(w.index, 1);
        assert!(engine.buffered() <= 20);
    }
    #[test]
    fn slow_processing_drops_the_stale_window() {
        let period = Duration::from_millis(100);
        let mut engine = WindowEngine::new(10, 5, 4).unwrap().paced(period);
        for i in 0..10 {
            engine.push(sample(i));
        }
        assert!(engine.try_emit_window().is_some());
        engine.record_processing(Duration::from_millis(250));
        assert_eq!(engine.lag(), Duration::from_millis(150));
        for i in 10..15 {
            engine.push(sample(i));
        }
        // The window at sample 5 is already stale.
        assert!(engine.try_emit_window().is_none());
        assert_eq!(engine.dropped(), 1);
        assert_eq!(engine.lag(), Duration::from_millis(50));
        for i in 15..20 {
            engine.push(sample(i));
        }
        let w = engine.try_emit_window().unwrap();
        assert_eq!(w.start_sample, 10);
        assert_eq!(w.index, 2);
        // Fast windows pay the lag back.
        engine.record_processing(Duration::from_millis(10));
        assert_eq!(engine.lag(), Duration::ZERO);
    }
    #[test]
    fn unpaced_engine_never_drops_for_lag() {
        let mut engine = WindowEngine::new(10, 5, 4).unwrap();
        let mut emitted = 0;
        for i in 0..100 {
            engine.push(sample(i));
            while engine.try_emit_window().is_some() {
                engine.record_processing(Duration::from_secs(1));
                emitted += 1;
            }
        }
        assert_eq!(emitted, expected_windows(100, 10, 5));
        assert_eq!(engine.dropped(), 0);
    }
    #[test]
    fn rejects_step_longer_than_window() {
        assert!(WindowEngine::new(10, 11, 1).is_err());
        assert!(WindowEngine::new(10, 0, 1).is_err());
    }
}
