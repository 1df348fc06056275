use image::RgbImage;
use rayon::{prelude::*, ThreadPool, ThreadPoolBuilder};

use crate::{
    render::synthesize, timeline::frame_time, BeatTimeline, ModulationFactors, ModulationModel,
    PulseError, Result, SourceImage,
};

/// One synthesised video frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub index: usize,
    /// Instant the frame represents, `index / fps`.
    pub time: f64,
    pub pixels: RgbImage,
}

/// Position of a frame in the output stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInstant {
    pub index: usize,
    pub time: f64,
}

/// Fans per-frame work out over a worker pool and collects the results back
/// in index order.
pub struct FrameSequencer {
    pool: ThreadPool,
}

impl FrameSequencer {
    /// Creates a sequencer backed by `workers` threads; `0` sizes the pool to
    /// the number of available CPUs.
    pub fn new(workers: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("frame-worker-{index}"))
            .build()?;
        Ok(Self { pool })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Synthesises frames `0..total_frames` for `image` modulated by `beats`.
    pub fn sequence(
        &self,
        image: &SourceImage,
        beats: &BeatTimeline,
        total_frames: usize,
        fps: u32,
    ) -> Result<Vec<Frame>> {
        self.sequence_with(image, beats, total_frames, fps, |image, factors, _| {
            synthesize(image, factors)
        })
    }

    /// Like [`FrameSequencer::sequence`] with a caller-supplied renderer.
    pub fn sequence_with<R>(
        &self,
        image: &SourceImage,
        beats: &BeatTimeline,
        total_frames: usize,
        fps: u32,
        render: R,
    ) -> Result<Vec<Frame>>
    where
        R: Fn(&SourceImage, ModulationFactors, FrameInstant) -> Result<RgbImage> + Sync,
    {
        let model = ModulationModel::new(beats);
        self.map_frames(total_frames, fps, |instant| {
            let pixels = render(image, model.factors(instant.time), instant)?;
            Ok(Frame {
                index: instant.index,
                time: instant.time,
                pixels,
            })
        })
    }

    /// Runs `render` for every frame instant in parallel. The output vector is
    /// ordered by frame index regardless of completion order. The first
    /// failure observed aborts the batch and is reported as
    /// [`PulseError::FrameSynthesis`] for its index.
    pub fn map_frames<T, F>(&self, total_frames: usize, fps: u32, render: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(FrameInstant) -> Result<T> + Sync,
    {
        if fps == 0 {
            return Err(PulseError::Config("frame rate must be positive".into()));
        }

        self.pool.install(|| {
            (0..total_frames)
                .into_par_iter()
                .map(|index| {
                    let instant = FrameInstant {
                        index,
                        time: frame_time(index, fps),
                    };
                    render(instant).map_err(|err| match err {
                        PulseError::FrameSynthesis { .. } => err,
                        other => PulseError::frame(index, other.to_string()),
                    })
                })
                .collect()
        })
    }
}

impl std::fmt::Debug for FrameSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSequencer")
            .field("workers", &self.workers())
            .finish()
    }
}
