// src/correlation.rs
//! Direct matcher: normalised cross-correlation of raw PCM.
//!
//! Slower and less tolerant of re-encoding than fingerprint matching, but it
//! needs no index and works on clips too short to fingerprint well. The long
//! signal is processed in overlapping chunks; each chunk is correlated with the
//! clip through the FFT.

use rayon::prelude::*;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use tracing::debug;

use crate::config::CorrelationConfig;
use crate::error::{FingerprintError, Result};
use crate::signal::AudioSignal;

/// Start times (seconds) where `clip` occurs inside `long`, merged and sorted.
pub fn find_matches(long: &AudioSignal, clip: &AudioSignal, config: &CorrelationConfig) -> Result<Vec<f64>> {
    config.validate()?;
    long.validate()?;
    clip.validate()?;
    if long.sample_rate() != clip.sample_rate() {
        return Err(FingerprintError::SampleRateMismatch {
            expected: long.sample_rate(),
            actual: clip.sample_rate(),
        });
    }

    let clip_len = clip.len();
    if long.len() < clip_len {
        return Ok(Vec::new());
    }
    let sample_rate = long.sample_rate() as f64;

    let chunk_size = ((clip_len as f64 * 1.5).max(config.min_chunk_seconds * sample_rate) as usize)
        .min(config.max_chunk_samples)
        .max(clip_len);
    // Consecutive chunks overlap by clip_len - 1 samples, so every start
    // position is scored by exactly one chunk.
    let step = chunk_size - clip_len + 1;
    let fft_len = (chunk_size + clip_len - 1).next_power_of_two();

    let mut planner = FftPlanner::<f32>::new();
    let forward = planner.plan_fft_forward(fft_len);
    let inverse = planner.plan_fft_inverse(fft_len);

    // Convolving with the reversed clip is correlating with the clip.
    let mut clip_spectrum = vec![Complex::new(0.0f32, 0.0); fft_len];
    for (slot, &s) in clip_spectrum.iter_mut().zip(clip.samples().iter().rev()) {
        *slot = Complex::new(s, 0.0);
    }
    forward.process(&mut clip_spectrum);
    let clip_energy: f64 = clip.samples().iter().map(|&s| s as f64 * s as f64).sum();

    let correlator = ChunkCorrelator {
        forward,
        inverse,
        clip_spectrum,
        clip_energy,
        clip_len,
        threshold: config.threshold,
    };

    let starts: Vec<usize> = (0..=long.len() - clip_len).step_by(step).collect();
    let hits: Vec<usize> = starts
        .par_iter()
        .map_init(
            || correlator.workspace(),
            |workspace, &start| {
                let end = (start + chunk_size).min(long.len());
                correlator.hits(&long.samples()[start..end], workspace)
                    .into_iter()
                    .map(move |offset| start + offset)
                    .collect::<Vec<_>>()
            },
        )
        .flatten()
        .collect();

    let mut times: Vec<f64> = hits.iter().map(|&s| s as f64 / sample_rate).collect();
    times.sort_by(f64::total_cmp);
    let merged = merge_hits(&times, config.merge_window_seconds);
    debug!(
        chunks = starts.len(),
        chunk_size,
        raw_hits = times.len(),
        matches = merged.len(),
        "correlation scan finished"
    );
    Ok(merged)
}

struct ChunkCorrelator {
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    clip_spectrum: Vec<Complex<f32>>,
    clip_energy: f64,
    clip_len: usize,
    threshold: f32,
}

struct CorrelationWorkspace {
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl ChunkCorrelator {
    fn workspace(&self) -> CorrelationWorkspace {
        let scratch_len = self
            .forward
            .get_inplace_scratch_len()
            .max(self.inverse.get_inplace_scratch_len());
        CorrelationWorkspace {
            buffer: vec![Complex::new(0.0, 0.0); self.clip_spectrum.len()],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
        }
    }

    /// Sample offsets inside `chunk` where the clip starts with a normalised
    /// correlation above the threshold.
    fn hits(&self, chunk: &[f32], ws: &mut CorrelationWorkspace) -> Vec<usize> {
        if chunk.len() < self.clip_len {
            return Vec::new();
        }
        let chunk_energy: f64 = chunk.iter().map(|&s| s as f64 * s as f64).sum();
        let norm = (chunk_energy * self.clip_energy).sqrt();
        if norm <= 0.0 {
            return Vec::new();
        }

        ws.buffer.fill(Complex::new(0.0, 0.0));
        for (slot, &s) in ws.buffer.iter_mut().zip(chunk) {
            *slot = Complex::new(s, 0.0);
        }
        self.forward.process_with_scratch(&mut ws.buffer, &mut ws.scratch);
        for (x, c) in ws.buffer.iter_mut().zip(&self.clip_spectrum) {
            *x *= *c;
        }
        self.inverse.process_with_scratch(&mut ws.buffer, &mut ws.scratch);

        let scale = 1.0 / (ws.buffer.len() as f64 * norm);
        // Lag k of the full correlation puts the clip start at k - (clip_len - 1).
        let first = self.clip_len - 1;
        let last = chunk.len() - 1;
        (first..=last)
            .filter(|&k| (ws.buffer[k].re as f64 * scale) as f32 > self.threshold)
            .map(|k| k - first)
            .collect()
    }
}

/// Rounds to centiseconds and drops hits within `window` of the last kept one.
fn merge_hits(sorted_times: &[f64], window: f64) -> Vec<f64> {
    let mut merged: Vec<f64> = Vec::new();
    for &t in sorted_times {
        let t = (t * 100.0).round() / 100.0;
        match merged.last() {
            Some(&last) if t - last <= window => {}
            _ => merged.push(t),
        }
    }
    merged
}
