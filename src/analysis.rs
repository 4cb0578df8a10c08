//! Summaries of recordings and prediction logs.
use std::fmt::Write;

use crate::classify::CalmState;
use crate::dsp::PredictionEvent;

/// Amplitude statistics of a voltage trace.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SignalStats {
    pub samples: usize,
    pub mean: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}
impl SignalStats {
    pub fn from_voltages(voltages: &[f64]) -> Option<Self> {
        if voltages.is_empty() {
            return None;
        }
        let n = voltages.len() as f64;
        let mean = voltages.iter().sum::<f64>() / n;
        let variance = voltages.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let (min, max) = voltages
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        Some(Self {
            samples: voltages.len(),
            mean,
            std_dev: variance.sqrt(),
            min,
            max,
        })
    }
    pub fn peak_to_peak(&self) -> f64 {
        self.max - self.min
    }
    pub fn render(&self, sample_rate_hz: f64) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "SIGNAL STATISTICS");
        let _ = writeln!(out, "-----------------");
        let _ = writeln!(out, "Samples         : {}", self.samples);
        let _ = writeln!(out, "Duration        : {:.1} seconds", self.samples as f64 / sample_rate_hz);
        let _ = writeln!(out, "Mean Voltage    : {:.6} V", self.mean);
        let _ = writeln!(out, "Std Deviation   : {:.6} V", self.std_dev);
        let _ = writeln!(out, "Min Voltage     : {:.6} V", self.min);
        let _ = writeln!(out, "Max Voltage     : {:.6} V", self.max);
        let _ = writeln!(out, "Peak-to-Peak    : {:.6} V", self.peak_to_peak());
        out
    }
}

/// State counts over a prediction log.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ResultsSummary {
    pub total: usize,
    pub calm: usize,
    pub neutral: usize,
    pub not_calm: usize,
    pub mean_ratio: f64,
    pub mean_confidence: f64,
    pub duration_seconds: f64,
}
impl ResultsSummary {
    pub fn from_events(events: &[PredictionEvent]) -> Self {
        let mut summary = Self {
            total: events.len(),
            ..Self::default()
        };
        for e in events {
            match e.state {
                CalmState::Calm => summary.calm += 1,
                CalmState::Neutral => summary.neutral += 1,
                CalmState::NotCalm => summary.not_calm += 1,
            }
        }
        if !events.is_empty() {
            let n = events.len() as f64;
            summary.mean_ratio = events.iter().map(|e| e.ratio).sum::<f64>() / n;
            summary.mean_confidence = events.iter().map(|e| e.confidence).sum::<f64>() / n;
            let first = events.iter().map(|e| e.timestamp).fold(f64::INFINITY, f64::min);
            let last = events.iter().map(|e| e.timestamp).fold(f64::NEG_INFINITY, f64::max);
            summary.duration_seconds = last - first;
        }
        summary
    }
    pub fn fraction(&self, state: CalmState) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let count = match state {
            CalmState::Calm => self.calm,
            CalmState::Neutral => self.neutral,
            CalmState::NotCalm => self.not_calm,
        };
        count as f64 / self.total as f64
    }
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "FINAL RESULTS SUMMARY");
        let _ = writeln!(out, "---------------------");
        let _ = writeln!(out, "Total windows analyzed : {}", self.total);
        let _ = writeln!(
            out,
            "Calm windows           : {} ({:.1}%)",
            self.calm,
            self.fraction(CalmState::Calm) * 100.0
        );
        if self.neutral > 0 {
            let _ = writeln!(
                out,
                "Neutral windows        : {} ({:.1}%)",
                self.neutral,
                self.fraction(CalmState::Neutral) * 100.0
            );
        }
        let _ = writeln!(
            out,
            "Not Calm windows       : {} ({:.1}%)",
            self.not_calm,
            self.fraction(CalmState::NotCalm) * 100.0
        );
        let _ = writeln!(out, "Mean alpha/beta ratio  : {:.4}", self.mean_ratio);
        let _ = writeln!(out, "Mean confidence        : {:.4}", self.mean_confidence);
        let _ = writeln!(out, "Session span           : {:.1} s", self.duration_seconds);
        out
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn stats_of_a_known_trace() {
        let s = SignalStats::from_voltages(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(s.mean, 2.5);
        assert!((s.std_dev - 1.25f64.sqrt()).abs() < 1e-12);
        assert_eq!(s.peak_to_peak(), 3.0);
        assert!(s.render(250.0).contains("Peak-to-Peak"));
        assert!(SignalStats::from_voltages(&[]).is_none());
    }
    #[test]
    fn counts_states_in_a_log() {
        let event = |t: f64, state| PredictionEvent {
            timestamp: t,
            alpha: 1.0,
            beta: 1.0,
            ratio: 1.0,
            state,
            confidence: 0.8,
        };
        let events = vec![
            event(2.0, CalmState::Calm),
            event(2.5, CalmState::Calm),
            event(3.0, CalmState::NotCalm),
            event(3.5, CalmState::Calm),
        ];
        let summary = ResultsSummary::from_events(&events);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.calm, 3);
        assert_eq!(summary.not_calm, 1);
        assert_eq!(summary.fraction(CalmState::Calm), 0.75);
        assert_eq!(summary.duration_seconds, 1.5);
        let text = summary.render();
        assert!(text.contains("Calm windows           : 3"));
        assert!(!text.contains("Neutral"));
    }
}
