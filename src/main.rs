// src/main.rs
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]
mod analysis;
mod classify;
mod config;
mod dataset;
mod dsp;
mod engine;
mod gui;
mod recorder;
mod serial;
mod types;
mod workflow;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use eframe::egui;

use crate::config::{AppConfig, DataPaths, Strategy};
use crate::types::{Command, EngineEvent, SessionLabel};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "calmwave", version, about = "Single-channel EEG calmness monitor")]
struct Cli {
    /// JSON config file; missing keys fall back to defaults
    #[arg(long, global = true, default_value = "calmwave.json")]
    config: PathBuf,
    /// Override the data directory from the config
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Open the live monitor (default)
    Gui,
    /// List serial ports
    Ports,
    /// Record one labelled calibration session, then process it
    Record {
        #[arg(long, value_enum)]
        label: SessionLabel,
        #[arg(long)]
        port: Option<String>,
        /// Use the synthetic signal instead of a serial port
        #[arg(long)]
        simulate: bool,
        #[arg(long, default_value_t = 300)]
        seconds: u64,
    },
    /// Filter a raw recording and extract per-window features
    Process {
        #[arg(long, value_enum, conflicts_with = "input")]
        label: Option<SessionLabel>,
        #[arg(long, requires_all = ["filtered", "features"])]
        input: Option<PathBuf>,
        #[arg(long)]
        filtered: Option<PathBuf>,
        #[arg(long)]
        features: Option<PathBuf>,
    },
    /// Combine both sessions' features into the labelled training set
    Dataset,
    /// Train the logistic model on the calibration sessions
    Train,
    /// Calibrate the threshold rule on a relaxed session's features
    Baseline {
        #[arg(long)]
        features: Option<PathBuf>,
    },
    /// Stream predictions to stdout as JSON lines
    Predict {
        #[arg(long)]
        port: Option<String>,
        #[arg(long)]
        simulate: bool,
        #[arg(long, value_enum)]
        strategy: Option<Strategy>,
        /// Stop after this many seconds; runs until the source ends otherwise
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Summarise a prediction log and render its plots
    Analyze {
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Voltage statistics of a raw recording
    Stats {
        #[arg(long)]
        input: PathBuf,
    },
    /// Write the effective config to the config path
    InitConfig,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::load(&cli.config)?;
    if let Some(dir) = cli.data_dir {
        config.paths = DataPaths::new(dir);
    }

    match cli.command.unwrap_or(Commands::Gui) {
        Commands::Gui => run_gui(config),
        Commands::Ports => {
            let ports = serial::available_ports()?;
            if ports.is_empty() {
                println!("No serial ports found");
            }
            for port in ports {
                println!("{port}");
            }
            Ok(())
        }
        Commands::Record {
            label,
            port,
            simulate,
            seconds,
        } => run_record(config, label, port, simulate, seconds),
        Commands::Process {
            label,
            input,
            filtered,
            features,
        } => {
            let windows = match (label, input, filtered, features) {
                (Some(label), None, _, _) => workflow::process_session(&config, label)?,
                (None, Some(input), Some(filtered), Some(features)) => {
                    workflow::process_file(&config.pipeline, &input, &filtered, &features)?
                }
                _ => bail!("pass either --label or --input with --filtered and --features"),
            };
            println!("extracted {windows} windows");
            Ok(())
        }
        Commands::Dataset => {
            let set = workflow::assemble_training_set(&config)?;
            println!(
                "{} rows written to {}",
                set.len(),
                config.paths.training_set().display()
            );
            Ok(())
        }
        Commands::Train => {
            let report = workflow::train_model(&config)?;
            print!("{}", report.render());
            Ok(())
        }
        Commands::Baseline { features } => {
            let baseline = workflow::build_baseline(&config, features.as_deref())?;
            print!("{}", baseline.describe());
            Ok(())
        }
        Commands::Predict {
            port,
            simulate,
            strategy,
            seconds,
        } => {
            if let Some(strategy) = strategy {
                config.strategy = strategy;
            }
            run_predict(config, port, simulate, seconds)
        }
        Commands::Analyze { log } => {
            let summary = workflow::analyze_results(&config, log.as_deref())?;
            print!("{}", summary.render());
            println!("plots written to {}", config.paths.results_dir().display());
            Ok(())
        }
        Commands::Stats { input } => {
            let stats = workflow::recording_stats(&config.pipeline, &input)?;
            print!("{}", stats.render(config.pipeline.sample_rate_hz));
            Ok(())
        }
        Commands::InitConfig => {
            config.save(&cli.config)?;
            println!("wrote {}", cli.config.display());
            Ok(())
        }
    }
}

fn connect_command(config: &AppConfig, port: Option<String>, simulate: bool) -> Command {
    if simulate {
        Command::ConnectSimulated
    } else {
        Command::Connect {
            port: port.unwrap_or_else(|| config.serial.port.clone()),
        }
    }
}

fn expect_ok(handle: &engine::EngineHandle, cmd: Command) -> Result<String> {
    let response = handle.request(cmd, REQUEST_TIMEOUT)?;
    if !response.success {
        bail!(response.message);
    }
    Ok(response.message)
}

fn run_record(
    config: AppConfig,
    label: SessionLabel,
    port: Option<String>,
    simulate: bool,
    seconds: u64,
) -> Result<()> {
    let connect = connect_command(&config, port, simulate);
    let handle = engine::spawn(config);
    println!("{}", expect_ok(&handle, connect)?);
    println!("{}", expect_ok(&handle, Command::StartRecording(label))?);
    let deadline = Instant::now() + Duration::from_secs(seconds);
    // Sample events are not needed here; keep the channel drained.
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match handle.events().recv_timeout(remaining.min(Duration::from_secs(1))) {
            Ok(EngineEvent::Status(s)) if !s.recording => bail!("recording ended early"),
            Ok(EngineEvent::Log(line)) => eprintln!("{line}"),
            Ok(_) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => bail!("engine stopped"),
        }
    }
    println!("{}", expect_ok(&handle, Command::StopRecording)?);
    handle.shutdown();
    Ok(())
}

fn run_predict(
    config: AppConfig,
    port: Option<String>,
    simulate: bool,
    seconds: Option<u64>,
) -> Result<()> {
    let connect = connect_command(&config, port, simulate);
    let handle = engine::spawn(config);
    eprintln!("{}", expect_ok(&handle, connect)?);
    eprintln!("{}", expect_ok(&handle, Command::StartPrediction)?);
    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));
    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        match handle.events().recv_timeout(Duration::from_millis(200)) {
            Ok(EngineEvent::Prediction(event)) => {
                println!("{}", serde_json::to_string(&event).context("failed to encode event")?);
            }
            Ok(EngineEvent::Log(line)) => eprintln!("{line}"),
            Ok(EngineEvent::Status(s)) if !s.predicting => break,
            Ok(_) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => bail!("engine stopped"),
        }
    }
    // A source that ended already closed the session.
    if let Ok(r) = handle.request(Command::StopPrediction, REQUEST_TIMEOUT) {
        eprintln!("{}", r.message);
    }
    handle.shutdown();
    Ok(())
}

fn run_gui(config: AppConfig) -> Result<()> {
    let viewport = egui::ViewportBuilder::default()
        .with_inner_size([1200.0, 760.0])
        .with_min_inner_size([900.0, 600.0])
        .with_title("calmwave");
    let options = eframe::NativeOptions {
        viewport,
        ..Default::default()
    };
    eframe::run_native(
        "calmwave",
        options,
        Box::new(move |_cc| Box::new(gui::CalmwaveApp::new(config))),
    )
    .map_err(|e| anyhow::anyhow!("GUI failed: {e}"))
}
