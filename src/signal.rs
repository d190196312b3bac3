// src/signal.rs
use crate::error::{FingerprintError, Result};

/// Mono PCM normalised to [-1, 1] at a fixed sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSignal {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioSignal {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
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

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Rejects empty signals and NaN/inf samples.
    pub fn validate(&self) -> Result<()> {
        if self.samples.is_empty() {
            return Err(FingerprintError::EmptySignal);
        }
        if let Some(index) = self.samples.iter().position(|s| !s.is_finite()) {
            return Err(FingerprintError::NonFiniteSample { index });
        }
        Ok(())
    }
}

/// Scales samples so the loudest one sits at magnitude 1.0.
/// Silent input is returned unchanged.
pub fn normalize_peak(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak > 0.0 {
        for s in samples.iter_mut() {
            *s /= peak;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_non_finite() {
        assert!(matches!(
            AudioSignal::new(vec![], 22050).validate(),
            Err(FingerprintError::EmptySignal)
        ));
        assert!(matches!(
            AudioSignal::new(vec![0.0, f32::NAN, 0.1], 22050).validate(),
            Err(FingerprintError::NonFiniteSample { index: 1 })
        ));
        AudioSignal::new(vec![0.0; 4], 22050).validate().unwrap();
    }

    #[test]
    fn duration_follows_rate() {
        let signal = AudioSignal::new((0..100).map(|i| i as f32 / 100.0).collect(), 10);
        assert!((signal.duration_seconds() - 10.0).abs() < 1e-9);
        assert_eq!(AudioSignal::new(vec![0.0; 5], 0).duration_seconds(), 0.0);
    }

    #[test]
    fn normalize_scales_to_unit_peak() {
        let mut samples = vec![0.25, -0.5, 0.1];
        normalize_peak(&mut samples);
        assert_eq!(samples, vec![0.5, -1.0, 0.2]);

        let mut silent = vec![0.0; 3];
        normalize_peak(&mut silent);
        assert_eq!(silent, vec![0.0; 3]);
    }
}
