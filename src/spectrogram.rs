// src/spectrogram.rs
//! Short-time magnitude spectra.
//!
//! The signal is zero-padded to a whole number of windows, cut into
//! Hann-windowed frames with 50% overlap and transformed frame by frame.
//! Two interchangeable [`Transform`] implementations exist; which one runs is
//! chosen by [`TransformBackend`] in the extractor config.

use rayon::prelude::*;
use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;
use tracing::debug;

use crate::config::TransformBackend;
use crate::error::{FingerprintError, Result};

fn hann_window(window_size: usize) -> Vec<f32> {
    let mut window = Vec::with_capacity(window_size);
    if window_size == 0 {
        return window;
    }
    if window_size == 1 {
        window.push(1.0);
        return window;
    }
    for i in 0..window_size {
        window.push(0.5 * (1.0 - (2.0 * PI * i as f32 / (window_size - 1) as f32).cos()));
    }
    window
}

/// Turns one windowed frame into `len / 2 + 1` bin magnitudes.
///
/// Each worker thread owns a `Workspace`; it is created per extraction call
/// and dropped with it, so no buffers outlive the call.
pub trait Transform: Send + Sync {
    type Workspace: Send;

    fn len(&self) -> usize;

    fn workspace(&self) -> Self::Workspace;

    fn magnitudes(&self, frame: &[f32], workspace: &mut Self::Workspace, out: &mut [f32]) -> Result<()>;

    fn num_bins(&self) -> usize {
        self.len() / 2 + 1
    }
}

/// rustfft complex transform fed with a zero-imaginary buffer.
pub struct ComplexTransform {
    fft: Arc<dyn Fft<f32>>,
    len: usize,
}

impl ComplexTransform {
    pub fn new(len: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        Self {
            fft: planner.plan_fft_forward(len),
            len,
        }
    }
}

pub struct ComplexWorkspace {
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl Transform for ComplexTransform {
    type Workspace = ComplexWorkspace;

    fn len(&self) -> usize {
        self.len
    }

    fn workspace(&self) -> ComplexWorkspace {
        ComplexWorkspace {
            buffer: vec![Complex::new(0.0, 0.0); self.len],
            scratch: vec![Complex::new(0.0, 0.0); self.fft.get_inplace_scratch_len()],
        }
    }

    fn magnitudes(&self, frame: &[f32], ws: &mut ComplexWorkspace, out: &mut [f32]) -> Result<()> {
        for (slot, &sample) in ws.buffer.iter_mut().zip(frame) {
            *slot = Complex::new(sample, 0.0);
        }
        self.fft.process_with_scratch(&mut ws.buffer, &mut ws.scratch);
        for (m, c) in out.iter_mut().zip(&ws.buffer) {
            *m = c.norm();
        }
        Ok(())
    }
}

/// realfft real-to-complex transform.
pub struct RealTransform {
    r2c: Arc<dyn RealToComplex<f32>>,
    len: usize,
}

impl RealTransform {
    pub fn new(len: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        Self {
            r2c: planner.plan_fft_forward(len),
            len,
        }
    }
}

pub struct RealWorkspace {
    input: Vec<f32>,
    output: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl Transform for RealTransform {
    type Workspace = RealWorkspace;

    fn len(&self) -> usize {
        self.len
    }

    fn workspace(&self) -> RealWorkspace {
        RealWorkspace {
            input: self.r2c.make_input_vec(),
            output: self.r2c.make_output_vec(),
            scratch: self.r2c.make_scratch_vec(),
        }
    }

    fn magnitudes(&self, frame: &[f32], ws: &mut RealWorkspace, out: &mut [f32]) -> Result<()> {
        // realfft uses the input as scratch space, so it is refilled every frame.
        ws.input.copy_from_slice(frame);
        self.r2c
            .process_with_scratch(&mut ws.input, &mut ws.output, &mut ws.scratch)
            .map_err(|e| FingerprintError::Transform(e.to_string()))?;
        for (m, c) in out.iter_mut().zip(&ws.output) {
            *m = c.norm();
        }
        Ok(())
    }
}

/// Magnitude spectra of one signal, frame-major.
#[derive(Debug, Clone)]
pub struct Spectrogram {
    pub frames: Vec<Vec<f32>>,
    pub sample_rate: u32,
    pub window_length: usize,
    pub hop_length: usize,
}

impl Spectrogram {
    /// Width of one frequency bin in Hz.
    pub fn bin_hz(&self) -> f32 {
        (self.sample_rate as f32 / 2.0) / (self.window_length as f32 / 2.0)
    }
}

/// Number of frames after padding `num_samples` to a multiple of `window_size`.
pub fn frame_count(num_samples: usize, window_size: usize, hop_size: usize) -> usize {
    if num_samples == 0 || window_size == 0 || hop_size == 0 {
        return 0;
    }
    let padded = num_samples.div_ceil(window_size) * window_size;
    (padded - window_size) / hop_size + 1
}

pub fn create_spectrogram(
    samples: &[f32],
    sample_rate: u32,
    window_size: usize,
    hop_size: usize,
    backend: TransformBackend,
) -> Result<Spectrogram> {
    let frames = match backend {
        TransformBackend::Complex => run_transform(&ComplexTransform::new(window_size), samples, hop_size)?,
        TransformBackend::Real => run_transform(&RealTransform::new(window_size), samples, hop_size)?,
    };
    debug!(
        samples = samples.len(),
        window = window_size,
        hop = hop_size,
        frames = frames.len(),
        ?backend,
        "spectrogram computed"
    );
    Ok(Spectrogram {
        frames,
        sample_rate,
        window_length: window_size,
        hop_length: hop_size,
    })
}

fn run_transform<T: Transform>(transform: &T, samples: &[f32], hop_size: usize) -> Result<Vec<Vec<f32>>> {
    let window_size = transform.len();
    let num_frames = frame_count(samples.len(), window_size, hop_size);
    let window_values = hann_window(window_size);
    // Scale so a full-scale sine peaks near 0.5 whatever the window length.
    let scale = 1.0 / window_values.iter().sum::<f32>().max(f32::EPSILON);
    let num_bins = transform.num_bins();

    (0..num_frames)
        .into_par_iter()
        .map_init(
            || (transform.workspace(), vec![0.0f32; window_size]),
            |(workspace, chunk), i| {
                let start = i * hop_size;
                let end = (start + window_size).min(samples.len());
                chunk.fill(0.0);
                if start < end {
                    for (j, sample) in samples[start..end].iter().enumerate() {
                        chunk[j] = sample * window_values[j];
                    }
                }

                let mut magnitudes = vec![0.0f32; num_bins];
                transform.magnitudes(&chunk[..], workspace, &mut magnitudes)?;
                for m in magnitudes.iter_mut() {
                    *m *= scale;
                }
                Ok::<_, FingerprintError>(magnitudes)
            },
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, seconds: f32, sample_rate: u32) -> Vec<f32> {
        let n = (seconds * sample_rate as f32) as usize;
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn hann_window_edges_and_centre() {
        let w = hann_window(5);
        assert_eq!(w.len(), 5);
        assert!(w[0].abs() < 1e-6);
        assert!(w[4].abs() < 1e-6);
        assert!((w[2] - 1.0).abs() < 1e-6);
        assert_eq!(hann_window(1), vec![1.0]);
        assert!(hann_window(0).is_empty());
    }

    #[test]
    fn frame_count_pads_to_whole_windows() {
        assert_eq!(frame_count(0, 8, 4), 0);
        // Shorter than a window: padded to one window, one frame.
        assert_eq!(frame_count(3, 8, 4), 1);
        assert_eq!(frame_count(8, 8, 4), 1);
        // 9 samples pad to 16: frames start at 0, 4, 8.
        assert_eq!(frame_count(9, 8, 4), 3);
    }

    #[test]
    fn sine_peaks_at_its_bin() {
        let sr = 8000;
        let samples = sine(1000.0, 1.0, sr);
        let spec = create_spectrogram(&samples, sr, 800, 400, TransformBackend::Complex).unwrap();
        assert_eq!(spec.frames.len(), frame_count(samples.len(), 800, 400));
        let frame = &spec.frames[2];
        let (best, &mag) = frame
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap();
        assert_eq!(best as f32 * spec.bin_hz(), 1000.0);
        assert!(mag > 0.4 && mag < 0.6, "magnitude {mag}");
    }

    #[test]
    fn backends_agree_within_tolerance() {
        let sr = 22050;
        let mut samples = sine(440.0, 2.0, sr);
        for (i, s) in samples.iter_mut().enumerate() {
            *s = 0.5 * *s + 0.3 * (2.0 * PI * 3150.0 * i as f32 / sr as f32).sin();
        }
        let a = create_spectrogram(&samples, sr, 11026, 5513, TransformBackend::Complex).unwrap();
        let b = create_spectrogram(&samples, sr, 11026, 5513, TransformBackend::Real).unwrap();
        assert_eq!(a.frames.len(), b.frames.len());
        for (fa, fb) in a.frames.iter().zip(&b.frames) {
            assert_eq!(fa.len(), fb.len());
            for (x, y) in fa.iter().zip(fb) {
                assert!((x - y).abs() < 1e-4, "{x} vs {y}");
            }
        }
    }

    #[test]
    fn silence_is_all_zero() {
        let spec = create_spectrogram(&[0.0; 5000], 8000, 1024, 512, TransformBackend::Real).unwrap();
        assert!(spec.frames.iter().flatten().all(|&m| m == 0.0));
    }
}
