use std::{f32::consts::PI, fmt};

use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};

use crate::{AnalysisConfig, AudioSignal, BeatTimeline, PulseError, Result};

/// Gain applied before log compression of spectral magnitudes.
const ONSET_LOG_GAIN: f32 = 1000.0;
const MAX_AUTOCORRELATION_SECONDS: f64 = 8.0;
const MIN_BPM: f64 = 30.0;
const MAX_BPM: f64 = 300.0;
/// Spread of the log-normal tempo prior, in octaves.
const TEMPO_PRIOR_OCTAVES: f64 = 1.0;
/// Fraction of the strongest local score below which leading frames cannot
/// start a beat chain.
const FIRST_BEAT_FLOOR: f64 = 0.01;

/// Summary of the analysis metadata for one signal.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnalysisSummary {
    pub sample_rate: u32,
    pub tempo_bpm: Option<f64>,
    pub duration_seconds: f64,
    pub beat_count: usize,
}

/// Beat timeline together with the metadata gathered while computing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeatAnalysis {
    pub summary: AnalysisSummary,
    pub beats: BeatTimeline,
}

/// Length of `signal` in seconds, independent of whether beats can be found.
pub fn duration(signal: &AudioSignal) -> f64 {
    signal.duration()
}

/// Offline beat tracker.
///
/// Builds an onset-strength envelope from a short-time spectrum, estimates a
/// global tempo from its autocorrelation and then picks the chain of onsets
/// that best fits that tempo with dynamic programming.
pub struct BeatDetector {
    config: AnalysisConfig,
    fft_planner: RealFftPlanner<f32>,
}

impl BeatDetector {
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            fft_planner: RealFftPlanner::new(),
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Returns the beat timestamps of `signal` in ascending order.
    pub fn detect(&mut self, signal: &AudioSignal) -> Result<BeatTimeline> {
        Ok(self.analyze(signal)?.beats)
    }

    /// Runs beat detection and reports the tempo estimate alongside the beats.
    pub fn analyze(&mut self, signal: &AudioSignal) -> Result<BeatAnalysis> {
        validate_signal(signal)?;
        self.config
            .validate()
            .map_err(|err| PulseError::analysis(err.to_string()))?;

        let sample_rate = signal.sample_rate();
        let hop = self.config.hop_length;
        let frame_rate = f64::from(sample_rate) / hop as f64;

        let envelope = self.onset_envelope(signal.samples())?;
        let tempo_bpm = estimate_tempo(&envelope, frame_rate, self.config.start_bpm);

        let frames = match tempo_bpm {
            Some(bpm) => track_beats(&envelope, frame_rate, bpm, self.config.tightness),
            None => Vec::new(),
        };

        let timestamps = frames
            .iter()
            .map(|&frame| (frame * hop) as f64 / f64::from(sample_rate))
            .collect();
        let beats = BeatTimeline::new(timestamps)?;

        if beats.is_empty() {
            tracing::warn!(samples = signal.len(), "no beats detected in audio signal");
        }

        Ok(BeatAnalysis {
            summary: AnalysisSummary {
                sample_rate,
                tempo_bpm,
                duration_seconds: signal.duration(),
                beat_count: beats.len(),
            },
            beats,
        })
    }

    /// Positive spectral flux of log-compressed magnitudes, one value per hop.
    fn onset_envelope(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let pad = n_fft / 2;

        let mut padded = vec![0.0_f32; samples.len() + 2 * pad];
        padded[pad..pad + samples.len()].copy_from_slice(samples);
        if padded.len() < n_fft {
            return Ok(Vec::new());
        }
        let frame_count = 1 + (padded.len() - n_fft) / hop;

        let plan = self.fft_planner.plan_fft_forward(n_fft);
        let mut input = plan.make_input_vec();
        let mut spectrum = plan.make_output_vec();
        let mut scratch = plan.make_scratch_vec();
        let window: Vec<f32> = (0..n_fft).map(|i| hann_value(i, n_fft)).collect();

        let bins = spectrum.len();
        let mut current = vec![0.0_f32; bins];
        let mut previous = vec![0.0_f32; bins];
        let mut envelope = Vec::with_capacity(frame_count);

        for frame in 0..frame_count {
            let start = frame * hop;
            for ((slot, sample), weight) in input
                .iter_mut()
                .zip(&padded[start..start + n_fft])
                .zip(&window)
            {
                *slot = sample * weight;
            }

            plan.process_with_scratch(&mut input, &mut spectrum, &mut scratch)
                .map_err(|e| PulseError::analysis(format!("spectrum computation failed: {e}")))?;

            for (value, bin) in current.iter_mut().zip(&spectrum) {
                *value = (1.0 + ONSET_LOG_GAIN * bin.norm()).ln();
            }

            let strength = if frame == 0 {
                0.0
            } else {
                current
                    .iter()
                    .zip(&previous)
                    .map(|(now, before)| (now - before).max(0.0))
                    .sum::<f32>()
                    / bins as f32
            };
            envelope.push(strength);
            std::mem::swap(&mut current, &mut previous);
        }

        Ok(envelope)
    }
}

impl fmt::Debug for BeatDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeatDetector")
            .field("config", &self.config)
            .finish()
    }
}

fn validate_signal(signal: &AudioSignal) -> Result<()> {
    if signal.sample_rate() == 0 {
        return Err(PulseError::analysis("sample rate must be positive"));
    }
    if signal.is_empty() {
        return Err(PulseError::analysis("audio signal contains no samples"));
    }
    if let Some(index) = signal.samples().iter().position(|s| !s.is_finite()) {
        return Err(PulseError::analysis(format!(
            "sample {index} is not a finite number"
        )));
    }
    Ok(())
}

/// Picks the lag with the strongest mean-removed autocorrelation, weighted by
/// a log-normal prior around `start_bpm`.
fn estimate_tempo(envelope: &[f32], frame_rate: f64, start_bpm: f64) -> Option<f64> {
    if envelope.len() < 2 {
        return None;
    }

    let mean = envelope.iter().map(|&v| f64::from(v)).sum::<f64>() / envelope.len() as f64;
    let centred: Vec<f64> = envelope.iter().map(|&v| f64::from(v) - mean).collect();

    let min_lag = ((60.0 * frame_rate / MAX_BPM).floor() as usize).max(1);
    let max_lag = ((MAX_AUTOCORRELATION_SECONDS * frame_rate).round() as usize)
        .min((60.0 * frame_rate / MIN_BPM).ceil() as usize)
        .min(centred.len() - 1);
    if max_lag < min_lag {
        return None;
    }

    let mut best: Option<(usize, f64)> = None;
    for lag in min_lag..=max_lag {
        let correlation: f64 = centred[lag..]
            .iter()
            .zip(&centred)
            .map(|(a, b)| a * b)
            .sum();
        let bpm = 60.0 * frame_rate / lag as f64;
        let octaves = (bpm.log2() - start_bpm.log2()) / TEMPO_PRIOR_OCTAVES;
        let score = correlation * (-0.5 * octaves * octaves).exp();

        if score > 0.0 && best.map_or(true, |(_, top)| score > top) {
            best = Some((lag, score));
        }
    }

    best.map(|(lag, _)| 60.0 * frame_rate / lag as f64)
}

/// Dynamic-programming beat tracker. Returns ascending onset frame indices.
fn track_beats(envelope: &[f32], frame_rate: f64, bpm: f64, tightness: f64) -> Vec<usize> {
    let normalised = match normalise_by_std(envelope) {
        Some(values) => values,
        None => return Vec::new(),
    };

    let period = (60.0 * frame_rate / bpm).round().max(1.0);
    let radius = period as usize;
    let kernel: Vec<f64> = (0..=2 * radius)
        .map(|k| {
            let offset = k as f64 - period;
            (-0.5 * (offset * 32.0 / period).powi(2)).exp()
        })
        .collect();
    let local_score = convolve_same(&normalised, &kernel);

    let (cumulative, backlink) = accumulate_scores(&local_score, period, tightness);

    let Some(tail) = last_beat(&cumulative) else {
        return Vec::new();
    };

    let mut beats = vec![tail];
    let mut cursor = tail;
    while let Some(previous) = backlink[cursor] {
        beats.push(previous);
        cursor = previous;
    }
    beats.reverse();

    trim_weak_beats(&local_score, beats)
}

fn normalise_by_std(envelope: &[f32]) -> Option<Vec<f64>> {
    if envelope.len() < 2 {
        return None;
    }
    let n = envelope.len() as f64;
    let mean = envelope.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    let variance = envelope
        .iter()
        .map(|&v| (f64::from(v) - mean).powi(2))
        .sum::<f64>()
        / (n - 1.0);
    let std = variance.sqrt();
    if std <= f64::EPSILON {
        return None;
    }
    Some(envelope.iter().map(|&v| f64::from(v) / std).collect())
}

/// Cumulative beat score and the best predecessor of every frame.
fn accumulate_scores(
    local_score: &[f64],
    period: f64,
    tightness: f64,
) -> (Vec<f64>, Vec<Option<usize>>) {
    let len = local_score.len();
    let max_back = (2.0 * period).round() as usize;
    let min_back = ((period / 2.0).round() as usize).max(1);
    let floor = FIRST_BEAT_FLOOR * local_score.iter().copied().fold(f64::MIN, f64::max);

    let mut cumulative = vec![0.0; len];
    let mut backlink = vec![None; len];
    let mut first_beat = true;

    for i in 0..len {
        let mut best: Option<(usize, f64)> = None;
        if i >= min_back {
            let earliest = i.saturating_sub(max_back);
            for j in earliest..=i - min_back {
                let interval = (i - j) as f64 / period;
                let candidate = cumulative[j] - tightness * interval.ln().powi(2);
                if best.map_or(true, |(_, top)| candidate > top) {
                    best = Some((j, candidate));
                }
            }
        }

        cumulative[i] = local_score[i] + best.map_or(0.0, |(_, score)| score);

        if first_beat && local_score[i] < floor {
            backlink[i] = None;
        } else {
            backlink[i] = best.map(|(j, _)| j);
            first_beat = false;
        }
    }

    (cumulative, backlink)
}

/// Last local maximum of the cumulative score that clears half the median of
/// all local maxima.
fn last_beat(cumulative: &[f64]) -> Option<usize> {
    let len = cumulative.len();
    let is_peak = |i: usize| {
        let left = if i == 0 { cumulative[0] } else { cumulative[i - 1] };
        let right = if i + 1 == len { cumulative[i] } else { cumulative[i + 1] };
        cumulative[i] > left && cumulative[i] >= right
    };

    let mut peaks: Vec<f64> = (0..len).filter(|&i| is_peak(i)).map(|i| cumulative[i]).collect();
    if peaks.is_empty() {
        return None;
    }
    peaks.sort_by(|a, b| a.total_cmp(b));
    let median = if peaks.len() % 2 == 1 {
        peaks[peaks.len() / 2]
    } else {
        0.5 * (peaks[peaks.len() / 2 - 1] + peaks[peaks.len() / 2])
    };

    (0..len).rev().find(|&i| is_peak(i) && 2.0 * cumulative[i] > median)
}

/// Drops leading and trailing beats that sit in low-energy regions.
fn trim_weak_beats(local_score: &[f64], beats: Vec<usize>) -> Vec<usize> {
    if beats.is_empty() {
        return beats;
    }

    let beat_scores: Vec<f64> = beats.iter().map(|&b| local_score[b]).collect();
    let smoothed = convolve_same(&beat_scores, &[0.0, 0.5, 1.0, 0.5, 0.0]);
    let rms = (smoothed.iter().map(|v| v * v).sum::<f64>() / smoothed.len() as f64).sqrt();
    let threshold = 0.5 * rms;

    let start = local_score
        .iter()
        .position(|&v| v > threshold)
        .unwrap_or(local_score.len());
    let end = local_score.iter().rposition(|&v| v > threshold);

    beats
        .into_iter()
        .filter(|&b| b >= start && end.map_or(false, |end| b <= end))
        .collect()
}

/// Centred convolution that keeps the input length. `kernel` must have odd
/// length.
fn convolve_same(signal: &[f64], kernel: &[f64]) -> Vec<f64> {
    let half = kernel.len() / 2;
    (0..signal.len())
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .filter_map(|(k, weight)| {
                    let index = (i + k).checked_sub(half)?;
                    signal.get(index).map(|value| value * weight)
                })
                .sum()
        })
        .collect()
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 22_050;

    fn detector() -> BeatDetector {
        BeatDetector::new(AnalysisConfig::default())
    }

    /// Short decaying 1 kHz bursts every `interval` seconds.
    fn click_track(seconds: f64, interval: f64) -> AudioSignal {
        let total = (seconds * f64::from(RATE)) as usize;
        let burst = (0.05 * f64::from(RATE)) as usize;
        let mut samples = vec![0.0_f32; total];
        let mut onset = 0.25;
        while onset < seconds {
            let start = (onset * f64::from(RATE)) as usize;
            for n in 0..burst {
                if let Some(sample) = samples.get_mut(start + n) {
                    let t = n as f32 / RATE as f32;
                    *sample = (2.0 * PI * 1000.0 * t).sin() * (-t * 60.0).exp();
                }
            }
            onset += interval;
        }
        AudioSignal::new(samples, RATE)
    }

    #[test]
    fn empty_signal_is_an_analysis_error() {
        let err = detector().detect(&AudioSignal::new(Vec::new(), RATE)).unwrap_err();
        assert!(matches!(err, PulseError::Analysis(_)));
    }

    #[test]
    fn zero_sample_rate_is_an_analysis_error() {
        let err = detector().detect(&AudioSignal::new(vec![0.1; 100], 0)).unwrap_err();
        assert!(matches!(err, PulseError::Analysis(_)));
    }

    #[test]
    fn non_finite_samples_are_rejected() {
        let err = detector()
            .detect(&AudioSignal::new(vec![0.0, f32::NAN, 0.0], RATE))
            .unwrap_err();
        assert!(format!("{err}").contains("sample 1"));
    }

    #[test]
    fn silence_yields_no_beats() {
        let analysis = detector()
            .analyze(&AudioSignal::new(vec![0.0; RATE as usize * 2], RATE))
            .unwrap();
        assert!(analysis.beats.is_empty());
        assert_eq!(analysis.summary.beat_count, 0);
        assert_eq!(analysis.summary.duration_seconds, 2.0);
    }

    #[test]
    fn click_track_near_120_bpm_is_tracked() {
        // 22 analysis hops per click, roughly 117 BPM.
        let interval = 22.0 * 512.0 / f64::from(RATE);
        let analysis = detector().analyze(&click_track(10.0, interval)).unwrap();

        let tempo = analysis.summary.tempo_bpm.expect("tempo should be detected");
        assert!((tempo - 120.0).abs() < 12.0, "tempo {tempo}");

        let beats = analysis.beats.as_slice();
        assert!(beats.len() >= 8, "only {} beats", beats.len());

        let mut intervals: Vec<f64> = beats.windows(2).map(|pair| pair[1] - pair[0]).collect();
        intervals.sort_by(|a, b| a.total_cmp(b));
        let median = intervals[intervals.len() / 2];
        assert!((median - interval).abs() < 0.05, "median interval {median}");
    }

    #[test]
    fn beats_are_non_decreasing() {
        // Deterministic noise layered over an irregular click pattern.
        let mut state: u32 = 0x1234_5678;
        let mut signal = click_track(6.0, 0.37);
        let noisy: Vec<f32> = signal
            .samples()
            .iter()
            .map(|s| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                s + ((state >> 8) as f32 / (1u32 << 24) as f32 - 0.5) * 0.05
            })
            .collect();
        signal = AudioSignal::new(noisy, RATE);

        let beats = detector().detect(&signal).unwrap();
        assert!(beats.as_slice().windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(beats.iter().all(|b| b >= 0.0 && b <= signal.duration()));
    }

    #[test]
    fn short_signal_does_not_panic() {
        let beats = detector().detect(&AudioSignal::new(vec![0.5; 10], RATE)).unwrap();
        assert!(beats.is_empty());
    }

    #[test]
    fn duration_matches_signal() {
        let signal = AudioSignal::new(vec![0.0; 441], 44_100);
        assert_eq!(duration(&signal), 0.01);
    }

    #[test]
    fn convolution_keeps_length_and_centres_kernel() {
        let out = convolve_same(&[0.0, 1.0, 0.0, 0.0], &[0.5, 1.0, 0.25]);
        assert_eq!(out, vec![0.25, 1.0, 0.5, 0.0]);
    }
}
