// src/dsp/mod.rs
pub mod error;
pub mod features;
pub mod filter;
pub mod normalize;
pub mod pipeline;
pub mod plot;
pub mod source;
pub mod spectrum;
pub mod window;

pub use error::PipelineError;
pub use features::{FeatureExtractor, FeatureVector};
pub use filter::{FilterChain, ZeroPhaseFilter};
pub use normalize::VoltageNormalizer;
pub use pipeline::{
    classifier_for, process_recording, LineOutcome, OfflineOutput, PredictionEvent, StreamStats,
    StreamingPredictor,
};
pub use plot::{render_ratio_png, render_state_timeline_png, PlotStyle};
pub use source::{decode_line, ManualSource, Reading, SampleSource, SimProfile, SimulatedSource};
pub use spectrum::{PowerSpectrum, WelchEstimator};
pub use window::{Sample, Window, WindowEngine, WindowState};
