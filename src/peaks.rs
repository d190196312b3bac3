// src/peaks.rs
//! Constellation extraction: per-frame spectral peak picking.

use rayon::prelude::*;
use tracing::debug;

use crate::config::ExtractorConfig;
use crate::error::Result;
use crate::signal::AudioSignal;
use crate::spectrogram::create_spectrogram;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstellationPoint {
    pub frame_index: usize,
    pub frequency_hz: f32,
    pub magnitude: f32,
}

/// Peaks of one signal in ascending frame order, with the framing they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Constellation {
    pub points: Vec<ConstellationPoint>,
    pub sample_rate: u32,
    pub window_length: usize,
    pub hop_length: usize,
}

impl Constellation {
    /// Start time of `frame_index` in seconds.
    pub fn frame_time(&self, frame_index: usize) -> f64 {
        frame_index as f64 * self.hop_length as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }
}

/// Runs the spectrogram and peak picking over `signal`.
pub fn extract_constellation(signal: &AudioSignal, config: &ExtractorConfig) -> Result<Constellation> {
    config.validate()?;
    signal.validate()?;

    let sample_rate = signal.sample_rate();
    let window_length = config.window_length(sample_rate);
    let hop_length = config.hop_length(sample_rate);
    let spectrogram = create_spectrogram(signal.samples(), sample_rate, window_length, hop_length, config.transform)?;
    let bin_hz = spectrogram.bin_hz();

    let points: Vec<ConstellationPoint> = spectrogram
        .frames
        .par_iter()
        .enumerate()
        .flat_map_iter(|(frame_index, spectrum)| {
            find_peaks(
                spectrum,
                config.min_prominence,
                config.min_peak_spacing_bins,
                config.peaks_per_frame,
            )
            .into_iter()
            .map(move |peak| ConstellationPoint {
                frame_index,
                frequency_hz: peak.bin as f32 * bin_hz,
                magnitude: peak.magnitude,
            })
        })
        .collect();

    debug!(
        frames = spectrogram.frames.len(),
        points = points.len(),
        "constellation extracted"
    );
    Ok(Constellation {
        points,
        sample_rate,
        window_length,
        hop_length,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub bin: usize,
    pub magnitude: f32,
    pub prominence: f32,
}

/// Picks up to `max_peaks` local maxima of one spectrum.
///
/// Maxima closer than `min_spacing` bins to a larger maximum are dropped,
/// then maxima whose prominence does not exceed `min_prominence`. The
/// survivors are ranked by magnitude and returned in ascending bin order.
pub fn find_peaks(spectrum: &[f32], min_prominence: f32, min_spacing: usize, max_peaks: usize) -> Vec<Peak> {
    let maxima = local_maxima(spectrum);
    if maxima.is_empty() || max_peaks == 0 {
        return Vec::new();
    }

    let spaced = enforce_spacing(spectrum, &maxima, min_spacing);

    let mut peaks: Vec<Peak> = spaced
        .into_iter()
        .map(|bin| Peak {
            bin,
            magnitude: spectrum[bin],
            prominence: prominence(spectrum, bin),
        })
        .filter(|p| p.prominence > min_prominence)
        .collect();

    peaks.sort_by(|a, b| b.magnitude.total_cmp(&a.magnitude).then(a.bin.cmp(&b.bin)));
    peaks.truncate(max_peaks);
    peaks.sort_by_key(|p| p.bin);
    peaks
}

/// Interior local maxima; a flat top resolves to its middle sample.
fn local_maxima(x: &[f32]) -> Vec<usize> {
    let mut maxima = Vec::new();
    if x.len() < 3 {
        return maxima;
    }
    let last = x.len() - 1;
    let mut i = 1;
    while i < last {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < last && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                maxima.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    maxima
}

/// Keeps maxima at least `min_spacing` bins apart, larger ones first.
fn enforce_spacing(x: &[f32], maxima: &[usize], min_spacing: usize) -> Vec<usize> {
    if min_spacing <= 1 {
        return maxima.to_vec();
    }
    let mut order: Vec<usize> = (0..maxima.len()).collect();
    order.sort_by(|&a, &b| x[maxima[b]].total_cmp(&x[maxima[a]]).then(a.cmp(&b)));

    let mut keep = vec![true; maxima.len()];
    for &j in &order {
        if !keep[j] {
            continue;
        }
        for k in (0..j).rev() {
            if maxima[j] - maxima[k] >= min_spacing {
                break;
            }
            keep[k] = false;
        }
        for k in j + 1..maxima.len() {
            if maxima[k] - maxima[j] >= min_spacing {
                break;
            }
            keep[k] = false;
        }
    }
    maxima
        .iter()
        .zip(keep)
        .filter_map(|(&bin, kept)| kept.then_some(bin))
        .collect()
}

/// Height of a peak above the higher of its two surrounding minima.
fn prominence(x: &[f32], peak: usize) -> f32 {
    let height = x[peak];
    let left_min = x[..=peak]
        .iter()
        .rev()
        .take_while(|&&v| v <= height)
        .fold(height, |acc, &v| acc.min(v));
    let right_min = x[peak..]
        .iter()
        .take_while(|&&v| v <= height)
        .fold(height, |acc, &v| acc.min(v));
    height - left_min.max(right_min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransformBackend;
    use std::f64::consts::PI;

    fn tone(freqs: &[f32], seconds: f32, sample_rate: u32, amplitude: f32) -> AudioSignal {
        let n = (seconds * sample_rate as f32) as usize;
        let samples: Vec<f32> = (0..n)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                freqs
                    .iter()
                    .map(|&f| amplitude * (2.0 * PI * f as f64 * t).sin() as f32)
                    .sum::<f32>()
            })
            .collect();
        AudioSignal::new(samples, sample_rate)
    }

    #[test]
    fn local_maxima_handles_plateaus_and_edges() {
        assert_eq!(local_maxima(&[0.0, 1.0, 0.0, 2.0, 2.0, 2.0, 0.0]), vec![1, 4]);
        // Edges never count, nor do plateaus that keep rising.
        assert_eq!(local_maxima(&[3.0, 1.0, 2.0, 2.0, 5.0]), Vec::<usize>::new());
        assert!(local_maxima(&[1.0, 2.0]).is_empty());
    }

    #[test]
    fn prominence_uses_higher_base() {
        let x = [0.0, 0.2, 1.0, 0.5, 3.0, 0.1];
        // Peak at 2: the right side climbs past it at index 4, so its base is 0.5.
        assert!((prominence(&x, 2) - 0.5).abs() < 1e-6);
        assert!((prominence(&x, 4) - 2.9).abs() < 1e-6);
    }

    #[test]
    fn spacing_prefers_larger_peaks() {
        let mut x = vec![0.0f32; 30];
        x[5] = 1.0;
        x[8] = 2.0;
        x[20] = 0.5;
        let peaks = find_peaks(&x, 0.01, 5, 10);
        let bins: Vec<usize> = peaks.iter().map(|p| p.bin).collect();
        assert_eq!(bins, vec![8, 20]);
    }

    #[test]
    fn ranks_by_magnitude_and_truncates() {
        let mut x = vec![0.0f32; 20];
        for (bin, mag) in [(2, 0.3), (6, 0.9), (10, 0.1), (14, 0.6)] {
            x[bin] = mag;
        }
        let peaks = find_peaks(&x, 0.01, 1, 2);
        let bins: Vec<usize> = peaks.iter().map(|p| p.bin).collect();
        assert_eq!(bins, vec![6, 14]);
    }

    #[test]
    fn low_prominence_dropped() {
        let mut x = vec![0.0f32; 10];
        x[3] = 0.005;
        x[7] = 0.5;
        let peaks = find_peaks(&x, 0.01, 1, 10);
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].bin, 7);
    }

    #[test]
    fn silent_signal_has_no_points() {
        let signal = AudioSignal::new(vec![0.0; 22050 * 3], 22050);
        let constellation = extract_constellation(&signal, &ExtractorConfig::default()).unwrap();
        assert!(constellation.is_empty());
        assert_eq!(constellation.hop_length, 5513);
    }

    #[test]
    fn short_signal_is_padded_not_rejected() {
        let signal = tone(&[1000.0], 0.2, 22050, 1.0);
        let constellation = extract_constellation(&signal, &ExtractorConfig::default()).unwrap();
        assert!(!constellation.is_empty());
        assert!(constellation.points.iter().all(|p| p.frame_index == 0));
    }

    #[test]
    fn sine_440_peaks_every_frame_at_440() {
        let signal = tone(&[440.0], 10.0, 22050, 1.0);
        let config = ExtractorConfig::default();
        let constellation = extract_constellation(&signal, &config).unwrap();
        let bin_hz = 22050.0 / config.window_length(22050) as f32;
        let frames = crate::spectrogram::frame_count(signal.len(), 11026, 5513);

        for frame in 0..frames {
            assert!(
                constellation.points.iter().any(|p| p.frame_index == frame),
                "frame {frame} has no peak"
            );
        }
        for p in &constellation.points {
            assert!(
                (p.frequency_hz - 440.0).abs() <= bin_hz,
                "peak at {} Hz in frame {}",
                p.frequency_hz,
                p.frame_index
            );
        }
    }

    #[test]
    fn extraction_is_deterministic_and_ordered() {
        let signal = tone(&[700.0, 2500.0], 4.0, 22050, 0.4);
        let config = ExtractorConfig::default();
        let a = extract_constellation(&signal, &config).unwrap();
        let b = extract_constellation(&signal, &config).unwrap();
        assert_eq!(a, b);
        assert!(a.points.windows(2).all(|w| {
            (w[0].frame_index, w[0].frequency_hz) <= (w[1].frame_index, w[1].frequency_hz)
        }));
    }

    #[test]
    fn transforms_give_equal_constellations() {
        let signal = tone(&[523.0, 1760.0, 4100.0], 3.0, 22050, 0.3);
        let complex = ExtractorConfig::default();
        let real = ExtractorConfig {
            transform: TransformBackend::Real,
            ..ExtractorConfig::default()
        };
        let a = extract_constellation(&signal, &complex).unwrap();
        let b = extract_constellation(&signal, &real).unwrap();
        assert_eq!(a.len(), b.len());
        for (pa, pb) in a.points.iter().zip(&b.points) {
            assert_eq!(pa.frame_index, pb.frame_index);
            assert!((pa.frequency_hz - pb.frequency_hz).abs() < 1e-3);
            assert!((pa.magnitude - pb.magnitude).abs() < 1e-4);
        }
    }
}
