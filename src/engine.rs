// src/engine.rs
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TryRecvError, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::config::AppConfig;
use crate::dsp::{
    classifier_for, decode_line, Reading, SampleSource, SimulatedSource,
    StreamStats, StreamingPredictor, VoltageNormalizer,
};
use crate::recorder::{DataRecorder, PredictionLog};
use crate::serial;
use crate::types::*;
use crate::workflow;

const IDLE_POLL: Duration = Duration::from_millis(50);
/// Readings handled between two command checks.
const PUMP_BATCH: usize = 32;
/// Events buffered for the control surface; about 16 s of samples at 250 Hz.
pub const EVENT_QUEUE: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Idle,
    Recording(SessionLabel),
    Predicting,
}

/// Everything the ingestion loop owns. Only the engine thread touches it;
/// the control surface talks to it through [`EngineHandle`].
pub struct EngineContext {
    config: AppConfig,
    events: SyncSender<EngineEvent>,
    /// Events thrown away because the control surface stopped reading.
    dropped_events: Cell<u64>,
    source: Option<Box<dyn SampleSource>>,
    port: Option<String>,
    sim_alert: Option<Arc<AtomicBool>>,
    mode: Mode,
    normalizer: VoltageNormalizer,
    recorder: DataRecorder,
    predictor: Option<StreamingPredictor>,
    prediction_log: Option<PredictionLog>,
    last_stats: StreamStats,
}

impl EngineContext {
    pub fn new(config: AppConfig, events: SyncSender<EngineEvent>) -> Self {
        Self {
            normalizer: VoltageNormalizer::from_settings(&config.pipeline),
            config,
            events,
            dropped_events: Cell::new(0),
            source: None,
            port: None,
            sim_alert: None,
            mode: Mode::Idle,
            recorder: DataRecorder::new(),
            predictor: None,
            prediction_log: None,
            last_stats: StreamStats::default(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.source.is_some()
    }

    /// Responses always get through; anything else is dropped while the queue is full.
    fn emit(&self, event: EngineEvent) {
        if let EngineEvent::Response(_) = event {
            self.events.send(event).ok();
            return;
        }
        if let Err(TrySendError::Full(_)) = self.events.try_send(event) {
            let dropped = self.dropped_events.get() + 1;
            self.dropped_events.set(dropped);
            if dropped.is_power_of_two() {
                log::warn!("event queue full, {dropped} events dropped so far");
            }
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.get()
    }

    fn log(&self, line: impl Into<String>) {
        let line = line.into();
        log::info!("{line}");
        self.emit(EngineEvent::Log(line));
    }

    /// Replaces the current connection (closing any running session).
    pub fn attach_source(&mut self, source: Box<dyn SampleSource>, name: impl Into<String>) {
        if self.is_connected() {
            self.close_sessions();
        }
        self.source = Some(source);
        self.port = Some(name.into());
        self.sim_alert = None;
    }

    pub fn status(&self) -> StatusSnapshot {
        let paths = &self.config.paths;
        let stats = self.stream_stats();
        StatusSnapshot {
            connected: self.is_connected(),
            port: self.port.clone(),
            recording: matches!(self.mode, Mode::Recording(_)),
            recording_mode: match self.mode {
                Mode::Recording(label) => Some(label),
                _ => None,
            },
            predicting: self.mode == Mode::Predicting,
            strategy: self.config.strategy.label().to_string(),
            has_model: paths.model().exists() && paths.scaler().exists(),
            has_baseline: paths.baseline().exists(),
            has_calm_data: paths.raw_recording(SessionLabel::Calm.as_str()).exists(),
            has_not_calm_data: paths.raw_recording(SessionLabel::NotCalm.as_str()).exists(),
            dropped_frames: stats.dropped_windows,
            skipped_windows: stats.skipped_windows,
        }
    }

    fn stream_stats(&self) -> StreamStats {
        self.predictor
            .as_ref()
            .map(|p| p.stats())
            .unwrap_or(self.last_stats)
    }

    /// Applies one command; every command yields exactly one response.
    pub fn handle_command(&mut self, cmd: Command) -> CommandResponse {
        let response = match cmd {
            Command::Connect { port } => match serial::open(&port, &self.config.serial) {
                Ok(source) => {
                    self.attach_source(Box::new(source), port.clone());
                    CommandResponse::ok(format!("Connected to {port}"))
                }
                Err(e) => CommandResponse::rejected(e.to_string()),
            },
            Command::ConnectSimulated => {
                let p = &self.config.pipeline;
                let sim = SimulatedSource::new(p.sample_rate_hz, p.adc_max, p.vref, self.config.training.seed)
                    .realtime();
                let alert = sim.profile_switch();
                self.attach_source(Box::new(sim), "simulated");
                self.sim_alert = Some(alert);
                CommandResponse::ok("Connected to simulated source")
            }
            Command::Disconnect => {
                self.close_sessions();
                self.source = None;
                self.port = None;
                self.sim_alert = None;
                CommandResponse::ok("Disconnected")
            }
            Command::StartRecording(label) => self.start_recording(label),
            Command::StopRecording => self.stop_recording(),
            Command::TrainModel => match workflow::train_model(&self.config) {
                Ok(report) => CommandResponse::ok(format!(
                    "Model trained successfully! Accuracy: {:.2}%",
                    report.accuracy * 100.0
                )),
                Err(e) => CommandResponse::rejected(format!("{e:#}")),
            },
            Command::BuildBaseline => match workflow::build_baseline(&self.config, None) {
                Ok(b) => CommandResponse::ok(format!(
                    "Baseline from {} windows: calm >= {:.4}, not calm < {:.4}",
                    b.windows,
                    b.mean,
                    b.lower_threshold()
                )),
                Err(e) => CommandResponse::rejected(format!("{e:#}")),
            },
            Command::StartPrediction => self.start_prediction(),
            Command::StopPrediction => self.stop_prediction(),
            Command::GetStatus => match serde_json::to_string(&self.status()) {
                Ok(json) => CommandResponse::ok(json),
                Err(e) => CommandResponse::rejected(e.to_string()),
            },
            Command::SetSimulatedAlert(alert) => match &self.sim_alert {
                Some(switch) => {
                    switch.store(alert, Ordering::Relaxed);
                    CommandResponse::ok(if alert {
                        "Simulated profile: alert"
                    } else {
                        "Simulated profile: calm"
                    })
                }
                None => CommandResponse::rejected("Not connected to a simulated source"),
            },
        };
        if response.success {
            log::info!("{}", response.message);
        } else {
            log::warn!("{}", response.message);
        }
        response
    }

    fn check_can_start(&self) -> Option<CommandResponse> {
        if !self.is_connected() {
            return Some(CommandResponse::rejected("Not connected to serial port"));
        }
        if self.mode != Mode::Idle {
            return Some(CommandResponse::rejected("Already recording or predicting"));
        }
        None
    }

    fn start_recording(&mut self, label: SessionLabel) -> CommandResponse {
        if let Some(rejected) = self.check_can_start() {
            return rejected;
        }
        let path = self.config.paths.raw_recording(label.as_str());
        let started = self
            .config
            .paths
            .ensure_dirs()
            .and_then(|_| Ok(self.recorder.start(&path)?));
        match started {
            Ok(()) => {
                self.mode = Mode::Recording(label);
                CommandResponse::ok(format!("Recording {} session started", label.as_str()))
            }
            Err(e) => CommandResponse::rejected(format!("{e:#}")),
        }
    }

    fn stop_recording(&mut self) -> CommandResponse {
        let Mode::Recording(label) = self.mode else {
            return CommandResponse::rejected("Not currently recording");
        };
        self.mode = Mode::Idle;
        let saved = match self.recorder.stop() {
            Ok(Some(summary)) => summary.rows,
            Ok(None) => 0,
            Err(e) => return CommandResponse::rejected(e.to_string()),
        };
        match workflow::process_session(&self.config, label) {
            Ok(windows) => {
                CommandResponse::ok(format!("Saved {saved} samples, extracted {windows} windows"))
            }
            Err(e) => CommandResponse::rejected(format!("Error processing data: {e:#}")),
        }
    }

    fn start_prediction(&mut self) -> CommandResponse {
        if let Some(rejected) = self.check_can_start() {
            return rejected;
        }
        let setup = (|| -> Result<(StreamingPredictor, PredictionLog)> {
            let classifier = classifier_for(self.config.strategy, &self.config.paths)?;
            let predictor = StreamingPredictor::new(&self.config.pipeline, classifier)?;
            self.config.paths.ensure_dirs()?;
            let log = PredictionLog::create(&self.config.paths.prediction_log())?;
            Ok((predictor, log))
        })();
        match setup {
            Ok((predictor, log)) => {
                log::info!("logging predictions to {}", log.path().display());
                let name = predictor.classifier_name();
                self.predictor = Some(predictor);
                self.prediction_log = Some(log);
                self.mode = Mode::Predicting;
                CommandResponse::ok(format!(
                    "Prediction started ({name}) - collecting data for first window ({} seconds)...",
                    self.config.pipeline.window_seconds
                ))
            }
            Err(e) => CommandResponse::rejected(format!("{e:#}")),
        }
    }

    fn stop_prediction(&mut self) -> CommandResponse {
        if self.mode != Mode::Predicting {
            return CommandResponse::rejected("Not currently predicting");
        }
        self.finish_prediction();
        CommandResponse::ok("Prediction stopped")
    }

    fn finish_prediction(&mut self) {
        self.mode = Mode::Idle;
        self.prediction_log = None;
        if let Some(predictor) = self.predictor.take() {
            self.last_stats = predictor.stats();
            let s = self.last_stats;
            log::info!(
                "prediction session: {} samples, {} predictions, {} rejected lines, {} skipped / {} dropped windows",
                s.samples,
                s.predictions,
                s.rejected_lines,
                s.skipped_windows,
                s.dropped_windows
            );
        }
    }

    /// Ends any running session without post-processing.
    fn close_sessions(&mut self) {
        match self.mode {
            Mode::Recording(_) => {
                self.mode = Mode::Idle;
                if let Err(e) = self.recorder.stop() {
                    self.log(format!("Recording could not be saved: {e}"));
                }
            }
            Mode::Predicting => self.finish_prediction(),
            Mode::Idle => {}
        }
    }

    fn drop_connection(&mut self, reason: String) {
        log::error!("{reason}");
        self.close_sessions();
        self.source = None;
        self.port = None;
        self.sim_alert = None;
        self.emit(EngineEvent::Log(reason));
        self.emit(EngineEvent::Status(self.status()));
    }

    /// Reads one reading from the source. Returns `false` when nothing was read.
    pub fn pump_once(&mut self) -> bool {
        let Some(source) = self.source.as_mut() else {
            return false;
        };
        match source.next_reading() {
            Ok(Some(Reading::Line(line))) => {
                self.on_line(&line);
                true
            }
            Ok(Some(Reading::Overrun)) => {
                if let Some(predictor) = self.predictor.as_mut() {
                    predictor.reject_line();
                }
                true
            }
            Ok(Some(Reading::Idle)) => false,
            Ok(None) => {
                let name = source.describe();
                self.drop_connection(format!("{name}: stream ended"));
                false
            }
            Err(e) => {
                self.drop_connection(format!("Connection lost: {e}"));
                false
            }
        }
    }

    fn on_line(&mut self, line: &str) {
        match self.mode {
            Mode::Idle => {}
            Mode::Recording(_) => self.record_line(line),
            Mode::Predicting => self.predict_line(line),
        }
    }

    fn record_line(&mut self, line: &str) {
        let decoded = decode_line(line).and_then(|code| Ok((code, self.normalizer.normalize(code)?)));
        let (code, voltage) = match decoded {
            Ok(v) => v,
            Err(e) => {
                log::debug!("skipping line: {e}");
                return;
            }
        };
        if let Err(e) = self.recorder.write_record(code) {
            self.mode = Mode::Idle;
            self.recorder.stop().ok();
            self.log(format!("Recording aborted: {e}"));
            self.emit(EngineEvent::Status(self.status()));
            return;
        }
        let index = self.recorder.rows().saturating_sub(1);
        let timestamp = index as f64 / self.config.pipeline.sample_rate_hz;
        self.emit(EngineEvent::Sample { timestamp, voltage });
    }

    fn predict_line(&mut self, line: &str) {
        let Some(predictor) = self.predictor.as_mut() else {
            return;
        };
        let outcome = match predictor.process_line(line) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.finish_prediction();
                self.log(format!("Prediction stopped: {e}"));
                self.emit(EngineEvent::Status(self.status()));
                return;
            }
        };
        if let Some(sample) = outcome.sample {
            self.emit(EngineEvent::Sample {
                timestamp: sample.timestamp,
                voltage: sample.voltage,
            });
        }
        for event in outcome.events {
            if let Some(log) = self.prediction_log.as_mut() {
                if let Err(e) = log.append(&event) {
                    self.prediction_log = None;
                    self.log(format!("Prediction log disabled: {e}"));
                }
            }
            self.emit(EngineEvent::Prediction(event));
        }
    }
}

enum Control {
    Command(Command),
    Shutdown,
}

/// Control-surface side of the engine thread.
pub struct EngineHandle {
    commands: Sender<Control>,
    events: Receiver<EngineEvent>,
    join: Option<JoinHandle<()>>,
}

impl EngineHandle {
    /// Fire-and-forget; the response arrives as [`EngineEvent::Response`].
    pub fn send(&self, cmd: Command) {
        self.commands.send(Control::Command(cmd)).ok();
    }

    pub fn events(&self) -> &Receiver<EngineEvent> {
        &self.events
    }

    /// Sends `cmd` and waits for its response; other events received meanwhile are dropped.
    pub fn request(&self, cmd: Command, timeout: Duration) -> Result<CommandResponse> {
        self.commands
            .send(Control::Command(cmd))
            .map_err(|_| anyhow!("engine thread has stopped"))?;
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(EngineEvent::Response(response)) => return Ok(response),
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => return Err(anyhow!("engine did not answer in {timeout:?}")),
                Err(RecvTimeoutError::Disconnected) => return Err(anyhow!("engine thread has stopped")),
            }
        }
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.commands.send(Control::Shutdown).ok();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("engine thread panicked");
            }
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Starts the ingestion thread.
pub fn spawn(config: AppConfig) -> EngineHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel();
    let (evt_tx, evt_rx) = mpsc::sync_channel(EVENT_QUEUE);
    let join = thread::spawn(move || run(EngineContext::new(config, evt_tx), cmd_rx));
    EngineHandle {
        commands: cmd_tx,
        events: evt_rx,
        join: Some(join),
    }
}

fn run(mut ctx: EngineContext, commands: Receiver<Control>) {
    ctx.log("Engine ready.");
    loop {
        // Commands are only handled between readings, so a window in flight always completes.
        loop {
            let next = if ctx.is_connected() {
                match commands.try_recv() {
                    Ok(msg) => Some(msg),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => Some(Control::Shutdown),
                }
            } else {
                match commands.recv_timeout(IDLE_POLL) {
                    Ok(msg) => Some(msg),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => Some(Control::Shutdown),
                }
            };
            match next {
                Some(Control::Command(cmd)) => {
                    let response = ctx.handle_command(cmd);
                    ctx.emit(EngineEvent::Response(response));
                    ctx.emit(EngineEvent::Status(ctx.status()));
                }
                Some(Control::Shutdown) => {
                    ctx.close_sessions();
                    log::info!("engine stopped");
                    return;
                }
                None => break,
            }
        }
        for _ in 0..PUMP_BATCH {
            if !ctx.pump_once() {
                break;
            }
        }
    }
}
