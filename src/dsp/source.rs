use std::collections::VecDeque;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dsp::PipelineError;

/// What a source yielded on one poll.
#[derive(Clone, Debug, PartialEq)]
pub enum Reading {
    /// One line of text from the device, newline stripped.
    Line(String),
    /// Nothing arrived before the read timeout.
    Idle,
    /// A line ran past the length limit and was thrown away.
    Overrun,
}

/// Something that yields newline-delimited ADC readings on demand.
///
/// `Ok(None)` means the stream has ended; `Err` is an unrecoverable I/O failure.
pub trait SampleSource: Send {
    fn next_reading(&mut self) -> Result<Option<Reading>, PipelineError>;
    fn describe(&self) -> String;
}

/// Parses one ASCII-decimal line into an ADC code.
pub fn decode_line(line: &str) -> Result<i64, PipelineError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit() || b == b'-') {
        return Err(PipelineError::Decode {
            line: line.to_string(),
        });
    }
    trimmed.parse::<i64>().map_err(|_| PipelineError::Decode {
        line: line.to_string(),
    })
}

/// In-memory source useful for tests and deterministic playback.
pub struct ManualSource {
    queue: VecDeque<String>,
}
impl ManualSource {
    pub fn new(lines: impl IntoIterator<Item = String>) -> Self {
        Self {
            queue: lines.into_iter().collect(),
        }
    }
    pub fn from_codes(codes: impl IntoIterator<Item = i64>) -> Self {
        Self::new(codes.into_iter().map(|c| c.to_string()))
    }
}
impl SampleSource for ManualSource {
    fn next_reading(&mut self) -> Result<Option<Reading>, PipelineError> {
        Ok(self.queue.pop_front().map(Reading::Line))
    }
    fn describe(&self) -> String {
        "manual".into()
    }
}

/// Spectral profile of the simulated signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimProfile {
    /// Strong 10 Hz rhythm over weak 20 Hz activity.
    Calm,
    /// Strong 20 Hz activity over a weak 10 Hz rhythm.
    Alert,
}
impl SimProfile {
    fn amplitudes(self) -> (f64, f64) {
        match self {
            SimProfile::Calm => (0.08, 0.01),
            SimProfile::Alert => (0.01, 0.08),
        }
    }
}

/// Synthetic single-channel EEG around mid-scale, paced to the sample rate
/// when `realtime` is set.
pub struct SimulatedSource {
    sample_rate_hz: f64,
    adc_max: u32,
    vref: f64,
    profile: SimProfile,
    /// Shared switch so a GUI can flip the profile while the engine owns the source.
    alert: Arc<AtomicBool>,
    rng: StdRng,
    index: u64,
    started: Instant,
    realtime: bool,
}
impl SimulatedSource {
    pub fn new(sample_rate_hz: f64, adc_max: u32, vref: f64, seed: u64) -> Self {
        Self {
            sample_rate_hz,
            adc_max,
            vref,
            profile: SimProfile::Calm,
            alert: Arc::new(AtomicBool::new(false)),
            rng: StdRng::seed_from_u64(seed),
            index: 0,
            started: Instant::now(),
            realtime: false,
        }
    }
    pub fn realtime(mut self) -> Self {
        self.realtime = true;
        self
    }
    pub fn with_profile(mut self, profile: SimProfile) -> Self {
        self.alert
            .store(profile == SimProfile::Alert, Ordering::Relaxed);
        self.profile = profile;
        self
    }
    pub fn profile_switch(&self) -> Arc<AtomicBool> {
        self.alert.clone()
    }
    /// Next ADC code of the synthetic signal.
    pub fn next_code(&mut self) -> i64 {
        self.profile = if self.alert.load(Ordering::Relaxed) {
            SimProfile::Alert
        } else {
            SimProfile::Calm
        };
        let (alpha_amp, beta_amp) = self.profile.amplitudes();
        let t = self.index as f64 / self.sample_rate_hz;
        let noise: f64 = self.rng.gen_range(-0.002..0.002);
        let volts = self.vref * 0.5
            + alpha_amp * (2.0 * PI * 10.0 * t).sin()
            + beta_amp * (2.0 * PI * 20.0 * t).sin()
            + noise;
        self.index += 1;
        let code = (volts / self.vref * self.adc_max as f64).round() as i64;
        code.clamp(0, i64::from(self.adc_max))
    }
}
impl SampleSource for SimulatedSource {
    fn next_reading(&mut self) -> Result<Option<Reading>, PipelineError> {
        if self.realtime {
            let due = Duration::from_secs_f64(self.index as f64 / self.sample_rate_hz);
            let elapsed = self.started.elapsed();
            if elapsed < due {
                std::thread::sleep(due - elapsed);
            }
        }
        Ok(Some(Reading::Line(self.next_code().to_string())))
    }
    fn describe(&self) -> String {
        format!("simulated {:?}", self.profile)
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn decodes_digits_and_rejects_noise() {
        assert_eq!(decode_line("2048\r").unwrap(), 2048);
        assert_eq!(decode_line(" 17 ").unwrap(), 17);
        assert_eq!(decode_line("-3").unwrap(), -3);
        for bad in ["", "abc", "12a", "1.5", "--", "\u{fffd}12"] {
            assert!(
                matches!(decode_line(bad), Err(PipelineError::Decode { .. })),
                "{bad:?}"
            );
        }
    }
    #[test]
    fn manual_source_ends_when_drained() {
        let mut src = ManualSource::from_codes([1, 2]);
        assert_eq!(src.next_reading().unwrap(), Some(Reading::Line("1".into())));
        assert_eq!(src.next_reading().unwrap(), Some(Reading::Line("2".into())));
        assert_eq!(src.next_reading().unwrap(), None);
    }
    #[test]
    fn simulated_codes_stay_in_range() {
        let mut sim = SimulatedSource::new(250.0, 4095, 3.3, 7).with_profile(SimProfile::Alert);
        for _ in 0..1000 {
            let code = sim.next_code();
            assert!((0..=4095).contains(&code));
        }
        let switch = sim.profile_switch();
        switch.store(false, Ordering::Relaxed);
        sim.next_code();
        assert!(sim.describe().contains("Calm"));
    }
}
