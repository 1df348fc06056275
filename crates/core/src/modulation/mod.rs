use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};

use crate::BeatTimeline;

/// Amplitude applied to the summed oscillation of every beat.
pub const MODULATION_DEPTH: f64 = 0.5;

/// Brightness and contrast multipliers for a single instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModulationFactors {
    pub brightness: f64,
    pub contrast: f64,
}

impl ModulationFactors {
    /// Factors that leave an image untouched.
    pub const IDENTITY: Self = Self {
        brightness: 1.0,
        contrast: 1.0,
    };

    pub fn is_finite(&self) -> bool {
        self.brightness.is_finite() && self.contrast.is_finite()
    }
}

/// Maps a beat timeline to per-instant enhancement factors.
///
/// Every beat timestamp `b` contributes `sin(2πbt)` to brightness and
/// `cos(2πbt)` to contrast; the contributions of all beats are summed, so the
/// pulse grows denser as more beats are detected. Factors are not clamped.
#[derive(Debug, Clone, Copy)]
pub struct ModulationModel<'a> {
    beats: &'a BeatTimeline,
}

impl<'a> ModulationModel<'a> {
    pub fn new(beats: &'a BeatTimeline) -> Self {
        Self { beats }
    }

    pub fn brightness(&self, t: f64) -> f64 {
        brightness(t, self.beats)
    }

    pub fn contrast(&self, t: f64) -> f64 {
        contrast(t, self.beats)
    }

    /// Both factors at `t`, sharing one pass over the timeline.
    pub fn factors(&self, t: f64) -> ModulationFactors {
        let (sin_sum, cos_sum) = self.beats.iter().fold((0.0, 0.0), |(s, c), beat| {
            let (sin, cos) = (TAU * beat * t).sin_cos();
            (s + sin, c + cos)
        });
        ModulationFactors {
            brightness: 1.0 + MODULATION_DEPTH * sin_sum,
            contrast: 1.0 + MODULATION_DEPTH * cos_sum,
        }
    }
}

/// `1 + 0.5 * Σ sin(2π·b·t)` over every beat `b`.
pub fn brightness(t: f64, beats: &BeatTimeline) -> f64 {
    1.0 + MODULATION_DEPTH * beats.iter().map(|beat| (TAU * beat * t).sin()).sum::<f64>()
}

/// `1 + 0.5 * Σ cos(2π·b·t)` over every beat `b`.
pub fn contrast(t: f64, beats: &BeatTimeline) -> f64 {
    1.0 + MODULATION_DEPTH * beats.iter().map(|beat| (TAU * beat * t).cos()).sum::<f64>()
}
