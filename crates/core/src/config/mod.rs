use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{PulseError, Result};

/// Top-level configuration structure for the application.
///
/// Passed explicitly into [`crate::VideoPipeline`]; nothing in the crate reads
/// process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub output_file_name: String,
    pub analysis: AnalysisConfig,
    pub video: VideoConfig,
    pub encoder: EncoderConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            output_dir: PathBuf::from("output"),
            output_file_name: "output_video.mp4".to_string(),
            analysis: AnalysisConfig::default(),
            video: VideoConfig::default(),
            encoder: EncoderConfig::default(),
        }
    }
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing fields fall back to defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Default location of the finished video.
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.output_file_name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.output_file_name.trim().is_empty() {
            return Err(PulseError::Config("output_file_name must not be empty".into()));
        }
        if self.video.fps == 0 {
            return Err(PulseError::Config("video.fps must be positive".into()));
        }
        if self.video.downscale == 0 {
            return Err(PulseError::Config("video.downscale must be at least 1".into()));
        }
        self.analysis.validate()
    }
}

/// Parameters for decoding and beat tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Rate the audio is resampled to before analysis.
    pub sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    /// Centre of the tempo prior, in beats per minute.
    pub start_bpm: f64,
    /// Penalty for beat intervals that deviate from the global tempo.
    pub tightness: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22_050,
            n_fft: 2048,
            hop_length: 512,
            start_bpm: 120.0,
            tightness: 100.0,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(PulseError::Config("analysis.sample_rate must be positive".into()));
        }
        if self.n_fft < 2 {
            return Err(PulseError::Config("analysis.n_fft must be at least 2".into()));
        }
        if self.hop_length == 0 {
            return Err(PulseError::Config("analysis.hop_length must be positive".into()));
        }
        if !(self.start_bpm.is_finite() && self.start_bpm > 0.0) {
            return Err(PulseError::Config("analysis.start_bpm must be positive".into()));
        }
        Ok(())
    }
}

/// Frame generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub fps: u32,
    /// Integer divisor applied to the source image's width and height.
    pub downscale: u32,
    /// Worker threads for frame synthesis; `0` picks one per CPU.
    pub workers: usize,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            fps: 24,
            downscale: 2,
            workers: 0,
        }
    }
}

/// Options handed to the external `ffmpeg` encoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub video_codec: String,
    pub audio_codec: String,
    pub pixel_format: String,
    pub container: String,
    pub bitrate_kbps: Option<u32>,
    pub crf: Option<u32>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            pixel_format: "yuv420p".to_string(),
            container: "mp4".to_string(),
            bitrate_kbps: None,
            crf: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_standard_layout() {
        let config = AppConfig::default();
        assert_eq!(config.video.fps, 24);
        assert_eq!(config.video.downscale, 2);
        assert_eq!(config.output_path(), PathBuf::from("output/output_video.mp4"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "video": { "workers": 3 }, "output_dir": "renders" }"#).unwrap();

        let config = AppConfig::from_json_file(&path).unwrap();
        assert_eq!(config.video.workers, 3);
        assert_eq!(config.video.fps, 24);
        assert_eq!(config.output_dir, PathBuf::from("renders"));
        assert_eq!(config.encoder.video_codec, "libx264");
    }

    #[test]
    fn rejects_zero_fps() {
        let mut config = AppConfig::default();
        config.video.fps = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, PulseError::Config(_)));
    }

    #[test]
    fn rejects_zero_sample_rate() {
        let mut config = AppConfig::default();
        config.analysis.sample_rate = 0;
        assert!(config.validate().is_err());
    }
}
