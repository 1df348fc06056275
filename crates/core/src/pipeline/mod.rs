use std::path::{Path, PathBuf};

use image::RgbImage;

use crate::{
    analysis::duration, audio, render::synthesize, AppConfig, AudioSignal, BeatDetector,
    FrameInstant, FrameSequencer, ModulationFactors, Result, SourceImage, VideoAssembler,
    VideoSpec,
};

/// End-to-end video creation: decode, detect beats, synthesise frames,
/// assemble.
///
/// Every stage runs to completion before the next one starts. The first
/// failing stage ends the attempt; the error is logged and returned.
#[derive(Debug)]
pub struct VideoPipeline {
    config: AppConfig,
    sequencer: FrameSequencer,
    assembler: VideoAssembler,
}

impl VideoPipeline {
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let sequencer = FrameSequencer::new(config.video.workers)?;
        let assembler = VideoAssembler::new(config.encoder.clone());
        Ok(Self {
            config,
            sequencer,
            assembler,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn assembler(&self) -> &VideoAssembler {
        &self.assembler
    }

    /// Creates the upload and output directories if they are missing.
    pub fn prepare_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.config.upload_dir)?;
        std::fs::create_dir_all(&self.config.output_dir)?;
        Ok(())
    }

    /// Renders a video into the configured output location.
    pub fn create_video(&self, image_path: &Path, audio_path: &Path) -> Result<PathBuf> {
        self.create_video_at(image_path, audio_path, &self.config.output_path())
    }

    /// Renders a video into `output_path`.
    pub fn create_video_at(
        &self,
        image_path: &Path,
        audio_path: &Path,
        output_path: &Path,
    ) -> Result<PathBuf> {
        tracing::info!(
            image = %image_path.display(),
            audio = %audio_path.display(),
            "starting video creation"
        );
        let result = self.clear_stale_output(output_path).and_then(|()| {
            let signal = audio::decode_file(
                &self.config.encoder.ffmpeg_path,
                audio_path,
                self.config.analysis.sample_rate,
            )?;
            self.run_stages(&signal, image_path, audio_path, output_path, |image, factors, _| {
                synthesize(image, factors)
            })
        });
        log_outcome(result)
    }

    /// Renders a video from an already decoded signal. `audio_path` is only
    /// used for muxing the original track into the container.
    pub fn render_signal(
        &self,
        signal: &AudioSignal,
        image_path: &Path,
        audio_path: &Path,
        output_path: &Path,
    ) -> Result<PathBuf> {
        self.render_signal_with(signal, image_path, audio_path, output_path, |image, factors, _| {
            synthesize(image, factors)
        })
    }

    /// Like [`VideoPipeline::render_signal`] with a caller-supplied frame
    /// renderer.
    pub fn render_signal_with<R>(
        &self,
        signal: &AudioSignal,
        image_path: &Path,
        audio_path: &Path,
        output_path: &Path,
        render: R,
    ) -> Result<PathBuf>
    where
        R: Fn(&SourceImage, ModulationFactors, FrameInstant) -> Result<RgbImage> + Sync,
    {
        let result = self
            .clear_stale_output(output_path)
            .and_then(|()| self.run_stages(signal, image_path, audio_path, output_path, render));
        log_outcome(result)
    }

    fn run_stages<R>(
        &self,
        signal: &AudioSignal,
        image_path: &Path,
        audio_path: &Path,
        output_path: &Path,
        render: R,
    ) -> Result<PathBuf>
    where
        R: Fn(&SourceImage, ModulationFactors, FrameInstant) -> Result<RgbImage> + Sync,
    {
        let analysis = BeatDetector::new(self.config.analysis.clone()).analyze(signal)?;
        let spec = VideoSpec::new(duration(signal), self.config.video.fps);
        tracing::info!(
            beats = analysis.beats.len(),
            tempo_bpm = ?analysis.summary.tempo_bpm,
            duration = spec.duration_seconds,
            total_frames = spec.total_frames,
            "audio analysed"
        );

        let image = SourceImage::open(image_path, self.config.video.downscale)?;
        let (width, height) = image.dimensions();
        tracing::info!(width, height, workers = self.sequencer.workers(), "synthesising frames");

        let frames = self.sequencer.sequence_with(
            &image,
            &analysis.beats,
            spec.total_frames,
            spec.fps,
            render,
        )?;

        tracing::info!(frames = frames.len(), "frames created, starting video compilation");
        self.assembler
            .assemble(&frames, spec.fps, audio_path, output_path)
    }

    /// A previous run's video must not be mistaken for this run's result.
    fn clear_stale_output(&self, output_path: &Path) -> Result<()> {
        if output_path.is_file() {
            tracing::debug!(output = %output_path.display(), "removing previous output");
            std::fs::remove_file(output_path)?;
        }
        Ok(())
    }
}

fn log_outcome(result: Result<PathBuf>) -> Result<PathBuf> {
    match &result {
        Ok(path) => tracing::info!(output = %path.display(), "video created successfully"),
        Err(err) => {
            tracing::error!(stage = err.stage(), error = %err, "error during video creation")
        }
    }
    result
}
