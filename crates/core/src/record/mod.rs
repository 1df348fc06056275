use std::{
    io::{Read, Write},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
};

use serde::{Deserialize, Serialize};

use crate::{EncoderConfig, Frame, PulseError, Result};

const FULL_CHROMA_PIXEL_FORMAT: &str = "yuv444p";

/// Per-video options for the recording subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSettings {
    pub output_path: PathBuf,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

/// Pipes rendered frames into ffmpeg together with the original audio track.
#[derive(Debug, Clone)]
pub struct VideoAssembler {
    encoder: EncoderConfig,
}

impl VideoAssembler {
    pub fn new(encoder: EncoderConfig) -> Self {
        Self { encoder }
    }

    pub fn encoder(&self) -> &EncoderConfig {
        &self.encoder
    }

    /// Encodes `frames` at `fps`, muxes `audio_path` in and writes the result
    /// to `output_path`.
    ///
    /// The container is written to a hidden partial file first and renamed on
    /// success, so a failed attempt never leaves a video at `output_path`.
    pub fn assemble(
        &self,
        frames: &[Frame],
        fps: u32,
        audio_path: &Path,
        output_path: &Path,
    ) -> Result<PathBuf> {
        let settings = self.validate(frames, fps, audio_path, output_path)?;
        let partial = partial_path(output_path);

        match self.encode(frames, &settings, audio_path, &partial) {
            Ok(()) => {
                std::fs::rename(&partial, output_path).map_err(|e| {
                    let _ = std::fs::remove_file(&partial);
                    PulseError::assembly(format!(
                        "could not move video into `{}`: {e}",
                        output_path.display()
                    ))
                })?;
                tracing::info!(
                    output = %output_path.display(),
                    frames = frames.len(),
                    fps,
                    "video written"
                );
                Ok(output_path.to_path_buf())
            }
            Err(err) => {
                let _ = std::fs::remove_file(&partial);
                Err(err)
            }
        }
    }

    /// Checks everything that can be checked before ffmpeg is started.
    fn validate(
        &self,
        frames: &[Frame],
        fps: u32,
        audio_path: &Path,
        output_path: &Path,
    ) -> Result<RecordingSettings> {
        if fps == 0 {
            return Err(PulseError::assembly("frame rate must be positive"));
        }
        let first = frames
            .first()
            .ok_or_else(|| PulseError::assembly("no frames to encode"))?;
        let (width, height) = first.pixels.dimensions();
        if width == 0 || height == 0 {
            return Err(PulseError::assembly("frames have no pixels"));
        }

        for (position, frame) in frames.iter().enumerate() {
            if frame.index != position {
                return Err(PulseError::assembly(format!(
                    "frame at position {position} carries index {}",
                    frame.index
                )));
            }
            if frame.pixels.dimensions() != (width, height) {
                let (w, h) = frame.pixels.dimensions();
                return Err(PulseError::assembly(format!(
                    "frame {position} is {w}x{h}, expected {width}x{height}"
                )));
            }
        }

        std::fs::File::open(audio_path).map_err(|e| {
            PulseError::assembly(format!("audio `{}` is not readable: {e}", audio_path.display()))
        })?;

        match output_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() && !parent.is_dir() => {
                return Err(PulseError::assembly(format!(
                    "output directory `{}` does not exist",
                    parent.display()
                )));
            }
            _ => {}
        }

        Ok(RecordingSettings {
            output_path: output_path.to_path_buf(),
            fps,
            width,
            height,
        })
    }

    fn encode(
        &self,
        frames: &[Frame],
        settings: &RecordingSettings,
        audio_path: &Path,
        target: &Path,
    ) -> Result<()> {
        let pixel_format = output_pixel_format(&self.encoder, settings.width, settings.height);
        if pixel_format != self.encoder.pixel_format {
            tracing::info!(
                width = settings.width,
                height = settings.height,
                configured = %self.encoder.pixel_format,
                pixel_format,
                "odd frame size, encoding without chroma subsampling"
            );
        }
        let args = build_ffmpeg_args(&self.encoder, settings, audio_path, target);
        tracing::debug!(ffmpeg = %self.encoder.ffmpeg_path, ?args, "starting encoder");

        let mut child = Command::new(&self.encoder.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                PulseError::assembly(format!("failed to execute {}: {e}", self.encoder.ffmpeg_path))
            })?;

        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| PulseError::assembly("failed to capture encoder stderr"))?;
        let stderr_reader = thread::spawn(move || {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text);
            text
        });

        let write_result = match child.stdin.take() {
            Some(mut stdin) => frames
                .iter()
                .try_for_each(|frame| stdin.write_all(frame.pixels.as_raw()))
                .and_then(|()| stdin.flush()),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "encoder stdin is closed",
            )),
        };

        let status = child
            .wait()
            .map_err(|e| PulseError::assembly(format!("failed to wait for encoder: {e}")))?;
        let stderr = stderr_reader.join().unwrap_or_default();

        if !status.success() {
            return Err(PulseError::assembly(format!(
                "{} exited with {status}: {}",
                self.encoder.ffmpeg_path,
                stderr.trim()
            )));
        }
        write_result
            .map_err(|e| PulseError::assembly(format!("failed to stream frames to encoder: {e}")))
    }

    /// Decodes the video stream of `path` and returns how many frames it holds.
    pub fn count_frames(&self, path: &Path) -> Result<usize> {
        let output = Command::new(&self.encoder.ffprobe_path)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-count_frames",
                "-show_entries",
                "stream=nb_read_frames",
                "-of",
                "default=nokey=1:noprint_wrappers=1",
            ])
            .arg(path)
            .output()
            .map_err(|e| {
                PulseError::assembly(format!(
                    "failed to execute {}: {e}",
                    self.encoder.ffprobe_path
                ))
            })?;

        if !output.status.success() {
            return Err(PulseError::assembly(format!(
                "{} exited with {}: {}",
                self.encoder.ffprobe_path,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        text.trim()
            .parse()
            .map_err(|_| PulseError::assembly(format!("unexpected frame count `{}`", text.trim())))
    }
}

/// Builds the encoder command line: raw RGB frames on stdin as input 0, the
/// audio file as input 1. No `-shortest`, so the full audio track is kept.
pub fn build_ffmpeg_args(
    encoder: &EncoderConfig,
    settings: &RecordingSettings,
    audio_path: &Path,
    target: &Path,
) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgb24".to_string(),
        "-s".to_string(),
        format!("{}x{}", settings.width, settings.height),
        "-r".to_string(),
        settings.fps.to_string(),
        "-i".to_string(),
        "-".to_string(),
        "-i".to_string(),
        audio_path.to_string_lossy().to_string(),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-map".to_string(),
        "1:a:0".to_string(),
        "-c:v".to_string(),
        encoder.video_codec.clone(),
        "-pix_fmt".to_string(),
        output_pixel_format(encoder, settings.width, settings.height).to_string(),
    ];

    if let Some(bitrate) = encoder.bitrate_kbps {
        args.push("-b:v".to_string());
        args.push(format!("{bitrate}k"));
    }
    if let Some(crf) = encoder.crf {
        args.push("-crf".to_string());
        args.push(crf.to_string());
    }

    args.extend([
        "-c:a".to_string(),
        encoder.audio_codec.clone(),
        "-f".to_string(),
        encoder.container.clone(),
        target.to_string_lossy().to_string(),
    ]);
    args
}

/// Hidden sibling of `output` that receives the container while encoding.
pub fn partial_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "video".to_string());
    output.with_file_name(format!(".{name}.partial"))
}

/// Pixel format the encoder is asked for. 4:2:0 formats need even sides, so
/// odd-sized frames fall back to full-resolution chroma at the same size.
pub fn output_pixel_format(encoder: &EncoderConfig, width: u32, height: u32) -> &str {
    if chroma_subsampled(&encoder.pixel_format) && (width % 2 != 0 || height % 2 != 0) {
        FULL_CHROMA_PIXEL_FORMAT
    } else {
        &encoder.pixel_format
    }
}

fn chroma_subsampled(pixel_format: &str) -> bool {
    ["yuv420", "yuvj420", "nv12", "nv21"]
        .iter()
        .any(|prefix| pixel_format.starts_with(prefix))
}

/// Stand-in encoder for tests: records its arguments and the number of bytes
/// read from stdin next to itself, then writes a placeholder container to its
/// last argument.
#[cfg(all(test, unix))]
pub(crate) fn stub_encoder(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    const SCRIPT: &str = r#"#!/bin/sh
dir=$(dirname "$0")
for arg in "$@"; do printf '%s\n' "$arg"; done > "$dir/args.txt"
wc -c > "$dir/stdin_bytes.txt"
for last in "$@"; do :; done
printf 'stub video' > "$last"
"#;

    let path = dir.join("stub-ffmpeg");
    std::fs::write(&path, SCRIPT).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
