// src/gui.rs
use std::collections::VecDeque;

use eframe::egui;
use egui::{Color32, RichText};
use egui_plot::{HLine, Line, Plot, PlotPoints};

use crate::classify::CalmState;
use crate::config::AppConfig;
use crate::dsp::PredictionEvent;
use crate::engine::{self, EngineHandle};
use crate::serial;
use crate::types::*;

const WAVE_POINTS: usize = 1000;
const RATIO_POINTS: usize = 50;
const LOG_LINES: usize = 12;
/// Events handled per frame so a burst cannot stall the UI.
const EVENTS_PER_FRAME: usize = 2000;

pub struct CalmwaveApp {
    engine: EngineHandle,
    status: StatusSnapshot,

    ports: Vec<String>,
    selected_port: String,
    simulate: bool,
    sim_alert: bool,

    wave: VecDeque<[f64; 2]>,
    ratios: VecDeque<[f64; 2]>,
    latest: Option<PredictionEvent>,

    log_messages: VecDeque<String>,
}

impl CalmwaveApp {
    pub fn new(config: AppConfig) -> Self {
        let ports = serial::available_ports().unwrap_or_else(|e| {
            log::warn!("{e:#}");
            Vec::new()
        });
        let selected_port = if config.serial.port.is_empty() {
            ports.first().cloned().unwrap_or_default()
        } else {
            config.serial.port.clone()
        };
        let engine = engine::spawn(config);
        engine.send(Command::GetStatus);
        Self {
            engine,
            status: StatusSnapshot::default(),
            simulate: ports.is_empty(),
            ports,
            selected_port,
            sim_alert: false,
            wave: VecDeque::with_capacity(WAVE_POINTS),
            ratios: VecDeque::with_capacity(RATIO_POINTS),
            latest: None,
            log_messages: VecDeque::from(vec!["calmwave ready.".to_owned()]),
        }
    }

    fn log(&mut self, msg: &str) {
        self.log_messages.push_back(format!("> {msg}"));
        while self.log_messages.len() > LOG_LINES {
            self.log_messages.pop_front();
        }
    }

    fn drain_events(&mut self) {
        let events: Vec<EngineEvent> = self.engine.events().try_iter().take(EVENTS_PER_FRAME).collect();
        for event in events {
            match event {
                EngineEvent::Response(r) => {
                    // GetStatus answers are JSON for the CLI; the Status event follows anyway.
                    if !r.message.starts_with('{') {
                        let mark = if r.success { "" } else { "[!] " };
                        self.log(&format!("{mark}{}", r.message));
                    }
                }
                EngineEvent::Status(s) => {
                    if !s.connected {
                        self.sim_alert = false;
                    }
                    self.status = s;
                }
                EngineEvent::Log(line) => self.log(&line),
                EngineEvent::Sample { timestamp, voltage } => {
                    // Timestamps restart with each session.
                    if self.wave.back().is_some_and(|p| p[0] > timestamp) {
                        self.wave.clear();
                    }
                    push_bounded(&mut self.wave, [timestamp, voltage], WAVE_POINTS);
                }
                EngineEvent::Prediction(p) => {
                    if self.ratios.back().is_some_and(|r| r[0] > p.timestamp) {
                        self.ratios.clear();
                    }
                    push_bounded(&mut self.ratios, [p.timestamp, p.ratio], RATIO_POINTS);
                    self.latest = Some(p);
                }
            }
        }
    }

    fn connection_panel(&mut self, ui: &mut egui::Ui) {
        ui.label("CONNECTION");
        ui.horizontal(|ui| {
            ui.selectable_value(&mut self.simulate, false, "SERIAL");
            ui.selectable_value(&mut self.simulate, true, "SIM");
        });
        if !self.simulate {
            ui.horizontal(|ui| {
                egui::ComboBox::from_id_source("port")
                    .selected_text(if self.selected_port.is_empty() {
                        "(no port)"
                    } else {
                        self.selected_port.as_str()
                    })
                    .show_ui(ui, |ui| {
                        for port in &self.ports {
                            ui.selectable_value(&mut self.selected_port, port.clone(), port);
                        }
                    });
                if ui.small_button("refresh").clicked() {
                    match serial::available_ports() {
                        Ok(ports) => self.ports = ports,
                        Err(e) => self.log(&format!("{e:#}")),
                    }
                }
            });
        }
        let connected = self.status.connected;
        if ui.button(if connected { "DISCONNECT" } else { "CONNECT" }).clicked() {
            let cmd = if connected {
                Command::Disconnect
            } else if self.simulate {
                Command::ConnectSimulated
            } else {
                Command::Connect {
                    port: self.selected_port.clone(),
                }
            };
            self.engine.send(cmd);
        }
        if connected {
            ui.label(
                RichText::new(format!("on {}", self.status.port.as_deref().unwrap_or("?")))
                    .color(Color32::GREEN)
                    .small(),
            );
        }
        if connected && self.status.port.as_deref() == Some("simulated")
            && ui.checkbox(&mut self.sim_alert, "alert profile").changed()
        {
            self.engine.send(Command::SetSimulatedAlert(self.sim_alert));
        }
    }

    fn session_panel(&mut self, ui: &mut egui::Ui) {
        let s = self.status.clone();
        let idle = s.connected && !s.recording && !s.predicting;

        ui.label("CALIBRATION SESSIONS");
        for label in [SessionLabel::Calm, SessionLabel::NotCalm] {
            let have = match label {
                SessionLabel::Calm => s.has_calm_data,
                SessionLabel::NotCalm => s.has_not_calm_data,
            };
            ui.horizontal(|ui| {
                let active = s.recording_mode == Some(label);
                let text = if active {
                    format!("⏹ STOP {}", label.as_str())
                } else {
                    format!("🔴 RECORD {}", label.as_str())
                };
                let fill = if active { Color32::RED } else { Color32::DARK_GRAY };
                let button = egui::Button::new(RichText::new(text).color(Color32::WHITE)).fill(fill);
                if ui.add_enabled(idle || active, button).clicked() {
                    self.engine.send(if active {
                        Command::StopRecording
                    } else {
                        Command::StartRecording(label)
                    });
                }
                ui.label(if have { "✔" } else { "-" });
            });
        }

        ui.add_space(10.0);
        ui.label("MODEL");
        ui.horizontal(|ui| {
            let have_both = s.has_calm_data && s.has_not_calm_data;
            if ui.add_enabled(have_both && !s.recording, egui::Button::new("TRAIN")).clicked() {
                self.engine.send(Command::TrainModel);
            }
            if ui.add_enabled(s.has_calm_data && !s.recording, egui::Button::new("BASELINE")).clicked() {
                self.engine.send(Command::BuildBaseline);
            }
        });
        ui.label(
            RichText::new(format!(
                "strategy: {} | model {} | baseline {}",
                s.strategy,
                if s.has_model { "✔" } else { "-" },
                if s.has_baseline { "✔" } else { "-" }
            ))
            .small(),
        );

        ui.add_space(10.0);
        ui.label("PREDICTION");
        let (text, cmd, enabled) = if s.predicting {
            ("⏹ STOP PREDICTION", Command::StopPrediction, true)
        } else {
            ("▶ START PREDICTION", Command::StartPrediction, idle)
        };
        if ui.add_enabled(enabled, egui::Button::new(text)).clicked() {
            self.engine.send(cmd);
        }
        if s.dropped_frames > 0 || s.skipped_windows > 0 {
            ui.label(
                RichText::new(format!(
                    "{} windows dropped, {} skipped",
                    s.dropped_frames, s.skipped_windows
                ))
                .color(Color32::YELLOW)
                .small(),
            );
        }
    }

    fn state_banner(&self, ui: &mut egui::Ui) {
        let Some(p) = self.latest else {
            ui.heading(if self.status.predicting {
                "Collecting first window..."
            } else {
                "No prediction yet"
            });
            return;
        };
        ui.horizontal(|ui| {
            ui.heading(RichText::new(p.state.label()).color(state_color(p.state)).strong());
            ui.label(format!(
                "confidence {:.0}%   alpha/beta {:.3}   at {:.1}s",
                p.confidence * 100.0,
                p.ratio,
                p.timestamp
            ));
        });
    }
}

fn push_bounded(buf: &mut VecDeque<[f64; 2]>, point: [f64; 2], cap: usize) {
    if buf.len() == cap {
        buf.pop_front();
    }
    buf.push_back(point);
}

fn state_color(state: CalmState) -> Color32 {
    match state {
        CalmState::Calm => Color32::from_rgb(0, 200, 120),
        CalmState::Neutral => Color32::YELLOW,
        CalmState::NotCalm => Color32::from_rgb(230, 60, 60),
    }
}

impl eframe::App for CalmwaveApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_events();
        if self.status.connected {
            ctx.request_repaint();
        } else {
            ctx.request_repaint_after(std::time::Duration::from_millis(250));
        }

        let mut visuals = egui::Visuals::dark();
        visuals.widgets.noninteractive.bg_fill = Color32::from_rgb(10, 10, 15);
        ctx.set_visuals(visuals);

        egui::SidePanel::left("controls").min_width(280.0).show(ctx, |ui| {
            ui.add_space(10.0);
            ui.heading("calmwave");
            ui.label("EEG calmness monitor");
            ui.separator();
            self.connection_panel(ui);
            ui.separator();
            self.session_panel(ui);
            ui.separator();
            egui::ScrollArea::vertical().max_height(180.0).stick_to_bottom(true).show(ui, |ui| {
                for m in &self.log_messages {
                    ui.monospace(m);
                }
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.state_banner(ui);
            ui.separator();
            ui.label("alpha/beta ratio");
            let ratio = self.ratios.iter().copied().collect::<Vec<_>>();
            Plot::new("ratio_plot")
                .height(ui.available_height() * 0.5)
                .include_y(0.0)
                .auto_bounds_x()
                .show(ui, |plot_ui| {
                    if !ratio.is_empty() {
                        plot_ui.line(
                            Line::new(PlotPoints::new(ratio))
                                .name("ratio")
                                .color(Color32::from_rgb(0, 255, 255)),
                        );
                    }
                    plot_ui.hline(HLine::new(1.0).color(Color32::DARK_GRAY).name("1.0"));
                });
            ui.label("raw voltage");
            let wave = self.wave.iter().copied().collect::<Vec<_>>();
            Plot::new("wave_plot").auto_bounds_x().show(ui, |plot_ui| {
                if !wave.is_empty() {
                    plot_ui.line(Line::new(PlotPoints::new(wave)).name("V").color(Color32::YELLOW));
                }
            });
        });
    }
}
