use std::{
    path::Path,
    process::{Command, Stdio},
};

use crate::{PulseError, Result};

/// Decoded, mono audio ready for analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSignal {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioSignal {
    /// Wraps an already mono sample buffer.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Length of the signal in seconds: `sample_count / sample_rate`.
    /// Returns `0.0` for a zero sample rate.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Builds the ffmpeg arguments that decode `path` to mono little-endian
/// `f32` PCM on stdout.
pub fn build_decode_args(path: &Path, sample_rate: u32) -> Vec<String> {
    vec![
        "-nostdin".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        path.to_string_lossy().to_string(),
        "-f".to_string(),
        "f32le".to_string(),
        "-acodec".to_string(),
        "pcm_f32le".to_string(),
        "-ac".to_string(),
        "1".to_string(),
        "-ar".to_string(),
        sample_rate.to_string(),
        "pipe:1".to_string(),
    ]
}

/// Decodes any audio file ffmpeg understands into a mono [`AudioSignal`]
/// resampled to `sample_rate`.
pub fn decode_file(ffmpeg: &str, path: &Path, sample_rate: u32) -> Result<AudioSignal> {
    if sample_rate == 0 {
        return Err(PulseError::Decode("sample rate must be positive".into()));
    }
    if !path.is_file() {
        return Err(PulseError::Decode(format!(
            "audio file `{}` does not exist",
            path.display()
        )));
    }

    let args = build_decode_args(path, sample_rate);
    tracing::debug!(ffmpeg, ?args, "decoding audio");

    let output = Command::new(ffmpeg)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| PulseError::Decode(format!("failed to execute {ffmpeg}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PulseError::Decode(format!(
            "{ffmpeg} exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let samples = pcm_f32le_to_samples(&output.stdout)?;
    Ok(AudioSignal::new(samples, sample_rate))
}

fn pcm_f32le_to_samples(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(PulseError::Decode(format!(
            "decoder output length {} is not a multiple of 4 bytes",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_is_sample_count_over_rate() {
        let signal = AudioSignal::new(vec![0.0; 55_125], 22_050);
        assert_eq!(signal.duration(), 2.5);

        let signal = AudioSignal::new(vec![0.0; 7], 3);
        assert_eq!(signal.duration(), 7.0 / 3.0);
    }

    #[test]
    fn zero_rate_has_zero_duration() {
        let signal = AudioSignal::new(vec![0.5; 10], 0);
        assert_eq!(signal.duration(), 0.0);
    }

    #[test]
    fn decode_args_request_mono_float_pcm() {
        let args = build_decode_args(Path::new("song.mp3"), 22_050);
        let joined = args.join(" ");
        assert!(joined.contains("-i song.mp3"));
        assert!(joined.contains("-ac 1"));
        assert!(joined.contains("-ar 22050"));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn pcm_bytes_are_little_endian_floats() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0.25_f32.to_le_bytes());
        bytes.extend_from_slice(&(-1.0_f32).to_le_bytes());
        assert_eq!(pcm_f32le_to_samples(&bytes).unwrap(), vec![0.25, -1.0]);
        assert!(pcm_f32le_to_samples(&bytes[..5]).is_err());
    }

    #[test]
    fn missing_file_is_a_decode_error() {
        let err = decode_file("ffmpeg", Path::new("/definitely/not/here.wav"), 22_050).unwrap_err();
        assert!(matches!(err, PulseError::Decode(_)));
    }
}
