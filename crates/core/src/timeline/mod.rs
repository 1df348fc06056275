use serde::{Deserialize, Serialize};

use crate::{PulseError, Result};

/// Ordered beat timestamps, in seconds.
///
/// Timestamps are non-decreasing; duplicates are kept. The timeline is built
/// once per video and only read afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct BeatTimeline {
    beats: Vec<f64>,
}

impl BeatTimeline {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a timeline, rejecting timestamps that are non-finite or out of
    /// order.
    pub fn new(beats: Vec<f64>) -> Result<Self> {
        if let Some(bad) = beats.iter().find(|b| !b.is_finite()) {
            return Err(PulseError::analysis(format!(
                "beat timestamp {bad} is not finite"
            )));
        }
        if let Some(pair) = beats.windows(2).find(|pair| pair[0] > pair[1]) {
            return Err(PulseError::analysis(format!(
                "beat timestamps out of order: {} > {}",
                pair[0], pair[1]
            )));
        }
        Ok(Self { beats })
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.beats
    }

    pub fn len(&self) -> usize {
        self.beats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beats.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.beats.iter().copied()
    }
}

impl TryFrom<Vec<f64>> for BeatTimeline {
    type Error = PulseError;

    fn try_from(beats: Vec<f64>) -> Result<Self> {
        Self::new(beats)
    }
}

impl From<BeatTimeline> for Vec<f64> {
    fn from(timeline: BeatTimeline) -> Self {
        timeline.beats
    }
}

/// Frame rate and length of the video being produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoSpec {
    pub fps: u32,
    pub duration_seconds: f64,
    pub total_frames: usize,
}

impl VideoSpec {
    pub const DEFAULT_FPS: u32 = 24;

    /// `total_frames = floor(duration * fps)`. Negative or non-finite
    /// durations produce zero frames.
    pub fn new(duration_seconds: f64, fps: u32) -> Self {
        let frames = duration_seconds * f64::from(fps);
        let total_frames = if frames.is_finite() && frames > 0.0 {
            frames.floor() as usize
        } else {
            0
        };
        Self {
            fps,
            duration_seconds,
            total_frames,
        }
    }

    /// Instant of frame `index`: `index / fps`.
    pub fn time_of(&self, index: usize) -> f64 {
        frame_time(index, self.fps)
    }

    /// Playable length of the encoded video stream.
    pub fn video_seconds(&self) -> f64 {
        if self.fps == 0 {
            return 0.0;
        }
        self.total_frames as f64 / f64::from(self.fps)
    }
}

pub(crate) fn frame_time(index: usize, fps: u32) -> f64 {
    if fps == 0 {
        return 0.0;
    }
    index as f64 / f64::from(fps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_frames_floors_duration_times_fps() {
        assert_eq!(VideoSpec::new(2.5, 24).total_frames, 60);
        assert_eq!(VideoSpec::new(2.51, 24).total_frames, 60);
        assert_eq!(VideoSpec::new(0.04, 24).total_frames, 0);
        assert_eq!(VideoSpec::new(-1.0, 24).total_frames, 0);
        assert_eq!(VideoSpec::new(f64::NAN, 24).total_frames, 0);
    }

    #[test]
    fn frame_times_step_by_one_over_fps() {
        let spec = VideoSpec::new(2.5, 24);
        assert_eq!(spec.time_of(0), 0.0);
        assert_eq!(spec.time_of(12), 0.5);
        assert_eq!(spec.video_seconds(), 2.5);
    }

    #[test]
    fn timeline_keeps_duplicates_and_rejects_disorder() {
        let beats = BeatTimeline::new(vec![0.5, 0.5, 1.0]).unwrap();
        assert_eq!(beats.len(), 3);

        assert!(BeatTimeline::new(vec![1.0, 0.5]).is_err());
        assert!(BeatTimeline::new(vec![f64::NAN]).is_err());
    }

    #[test]
    fn timeline_serialises_as_plain_array() {
        let beats = BeatTimeline::new(vec![0.25, 0.75]).unwrap();
        let json = serde_json::to_string(&beats).unwrap();
        assert_eq!(json, "[0.25,0.75]");

        let back: BeatTimeline = serde_json::from_str(&json).unwrap();
        assert_eq!(back, beats);
        assert!(serde_json::from_str::<BeatTimeline>("[2.0,1.0]").is_err());
    }
}
