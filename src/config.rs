// src/config.rs
//! Tunables for extraction, hashing and matching.
//!
//! A [`FingerprintConfig`] is built once and passed by reference through
//! build and match calls. Every field has a default, so a JSON config file
//! only needs the values it overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{FingerprintError, Result};

pub const DEFAULT_SAMPLE_RATE: u32 = 22050;

/// Which FFT implementation turns frames into magnitude spectra.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformBackend {
    /// Complex FFT over a real-valued buffer (rustfft).
    #[default]
    Complex,
    /// Real-to-complex FFT (realfft), half the work of `Complex`.
    Real,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub window_seconds: f32,
    pub peaks_per_frame: usize,
    pub min_prominence: f32,
    pub min_peak_spacing_bins: usize,
    pub transform: TransformBackend,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            window_seconds: 0.5,
            peaks_per_frame: 10,
            min_prominence: 0.01,
            min_peak_spacing_bins: 200,
            transform: TransformBackend::Complex,
        }
    }
}

impl ExtractorConfig {
    /// Window length in samples at `sample_rate`, rounded up to an even count.
    pub fn window_length(&self, sample_rate: u32) -> usize {
        let samples = (self.window_seconds as f64 * sample_rate as f64) as usize;
        samples + samples % 2
    }

    /// Hop length in samples (50% overlap).
    pub fn hop_length(&self, sample_rate: u32) -> usize {
        self.window_length(sample_rate) / 2
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.window_seconds.is_finite() && self.window_seconds > 0.0) {
            return Err(FingerprintError::InvalidConfig(format!(
                "window_seconds must be positive, got {}",
                self.window_seconds
            )));
        }
        if self.peaks_per_frame == 0 {
            return Err(FingerprintError::InvalidConfig(
                "peaks_per_frame must be at least 1".to_string(),
            ));
        }
        if !(self.min_prominence.is_finite() && self.min_prominence >= 0.0) {
            return Err(FingerprintError::InvalidConfig(format!(
                "min_prominence must be non-negative, got {}",
                self.min_prominence
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashConfig {
    /// How many subsequent points each anchor is paired with.
    pub target_zone: usize,
    /// Inclusive frame-delta bounds for a pair.
    pub min_delta: usize,
    pub max_delta: usize,
    /// Frequencies are quantised linearly over [0, max_frequency_hz).
    pub max_frequency_hz: f32,
    pub frequency_bits: u32,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            target_zone: 100,
            min_delta: 2,
            max_delta: 10,
            max_frequency_hz: 23000.0,
            frequency_bits: 10,
        }
    }
}

impl HashConfig {
    /// Bits needed to store `max_delta`.
    pub fn delta_bits(&self) -> u32 {
        usize::BITS - self.max_delta.leading_zeros()
    }

    /// Total hash width in bits.
    pub fn hash_bits(&self) -> u32 {
        2 * self.frequency_bits + self.delta_bits()
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_zone == 0 {
            return Err(FingerprintError::InvalidConfig(
                "target_zone must be at least 1".to_string(),
            ));
        }
        if self.min_delta == 0 {
            return Err(FingerprintError::InvalidConfig(
                "min_delta must be at least 1 frame".to_string(),
            ));
        }
        if self.min_delta >= self.max_delta {
            return Err(FingerprintError::InvalidConfig(format!(
                "min_delta ({}) must be below max_delta ({})",
                self.min_delta, self.max_delta
            )));
        }
        if self.frequency_bits == 0 {
            return Err(FingerprintError::InvalidConfig(
                "frequency_bits must be at least 1".to_string(),
            ));
        }
        // Hashes are stored as SQLite INTEGER (i64), so the sign bit stays clear.
        if self.hash_bits() > 63 {
            return Err(FingerprintError::InvalidConfig(format!(
                "hash needs {} bits (2 x {} frequency + {} delta), limit is 63",
                self.hash_bits(),
                self.frequency_bits,
                self.delta_bits()
            )));
        }
        if !(self.max_frequency_hz.is_finite() && self.max_frequency_hz > 0.0) {
            return Err(FingerprintError::InvalidConfig(format!(
                "max_frequency_hz must be positive, got {}",
                self.max_frequency_hz
            )));
        }
        Ok(())
    }

    /// The frequency ceiling has to cover everything the extractor can emit.
    pub fn check_nyquist(&self, sample_rate: u32) -> Result<()> {
        let nyquist = sample_rate as f32 / 2.0;
        if nyquist > self.max_frequency_hz {
            return Err(FingerprintError::InvalidConfig(format!(
                "Nyquist frequency {} Hz exceeds max_frequency_hz {}",
                nyquist, self.max_frequency_hz
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// A source is reported when its best offset collects more votes than this.
    pub score_threshold: u32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self { score_threshold: 50 }
    }
}

/// Settings for the raw cross-correlation matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Normalised correlation a match has to exceed.
    pub threshold: f32,
    /// Hits closer than this to the previous kept hit are merged into it.
    pub merge_window_seconds: f64,
    pub min_chunk_seconds: f64,
    pub max_chunk_samples: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            threshold: 0.55,
            merge_window_seconds: 0.5,
            min_chunk_seconds: 10.0,
            max_chunk_samples: 5_000_000,
        }
    }
}

impl CorrelationConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() {
            return Err(FingerprintError::InvalidConfig(
                "correlation threshold must be finite".to_string(),
            ));
        }
        if self.max_chunk_samples == 0 {
            return Err(FingerprintError::InvalidConfig(
                "max_chunk_samples must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    pub sample_rate: u32,
    pub extractor: ExtractorConfig,
    pub hashing: HashConfig,
    pub matching: MatchConfig,
    pub correlation: CorrelationConfig,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            extractor: ExtractorConfig::default(),
            hashing: HashConfig::default(),
            matching: MatchConfig::default(),
            correlation: CorrelationConfig::default(),
        }
    }
}

impl FingerprintConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: FingerprintConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn hop_length(&self) -> usize {
        self.extractor.hop_length(self.sample_rate)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(FingerprintError::InvalidConfig(
                "sample_rate must be positive".to_string(),
            ));
        }
        self.extractor.validate()?;
        if self.hop_length() == 0 {
            return Err(FingerprintError::InvalidConfig(format!(
                "window of {}s is shorter than two samples at {} Hz",
                self.extractor.window_seconds, self.sample_rate
            )));
        }
        self.hashing.validate()?;
        self.hashing.check_nyquist(self.sample_rate)?;
        self.correlation.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = FingerprintConfig::default();
        config.validate().unwrap();
        assert_eq!(config.extractor.window_length(22050), 11026);
        assert_eq!(config.hop_length(), 5513);
        assert_eq!(config.hashing.hash_bits(), 24);
    }

    #[test]
    fn inverted_delta_bounds_rejected() {
        let mut config = FingerprintConfig::default();
        config.hashing.min_delta = 10;
        config.hashing.max_delta = 10;
        assert!(matches!(
            config.validate(),
            Err(FingerprintError::InvalidConfig(_))
        ));
    }

    #[test]
    fn oversized_bit_budget_rejected() {
        let mut config = FingerprintConfig::default();
        config.hashing.frequency_bits = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn ceiling_below_nyquist_rejected() {
        let mut config = FingerprintConfig::default();
        config.sample_rate = 48000;
        assert!(config.validate().is_err());
        config.hashing.max_frequency_hz = 24000.0;
        config.validate().unwrap();
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: FingerprintConfig =
            serde_json::from_str(r#"{"matching": {"score_threshold": 12}, "extractor": {"transform": "real"}}"#)
                .unwrap();
        assert_eq!(config.matching.score_threshold, 12);
        assert_eq!(config.extractor.transform, TransformBackend::Real);
        assert_eq!(config.extractor.peaks_per_frame, 10);
        assert_eq!(config.sample_rate, DEFAULT_SAMPLE_RATE);
    }
}
