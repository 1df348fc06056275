//! Core library for the Beat Pulse video generator.
//!
//! Turns a still image and an audio track into a video whose brightness and
//! contrast pulse with the music. Each module owns one stage of the pipeline:
//! decoding and beat detection, modulation, frame synthesis, parallel frame
//! sequencing and final assembly, with [`VideoPipeline`] tying them together.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod modulation;
pub mod pipeline;
pub mod record;
pub mod render;
pub mod sequence;
pub mod timeline;

pub use analysis::{AnalysisSummary, BeatAnalysis, BeatDetector};
pub use audio::AudioSignal;
pub use config::{AnalysisConfig, AppConfig, EncoderConfig, VideoConfig};
pub use error::{PulseError, Result};
pub use modulation::{ModulationFactors, ModulationModel};
pub use pipeline::VideoPipeline;
pub use record::{RecordingSettings, VideoAssembler};
pub use render::{synthesize, SourceImage};
pub use sequence::{Frame, FrameInstant, FrameSequencer};
pub use timeline::{BeatTimeline, VideoSpec};
