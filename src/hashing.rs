// src/hashing.rs
use tracing::debug;

use crate::config::HashConfig;
use crate::error::Result;
use crate::index::{Posting, SourceId};
use crate::peaks::Constellation;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fingerprint {
    pub hash: u64,
    pub anchor_frame: usize,
    /// Anchor start time in seconds.
    pub anchor_time: f64,
}

/// Fingerprints of one clip, tagged with the framing they were computed at.
#[derive(Debug, Clone, PartialEq)]
pub struct Hashes {
    pub fingerprints: Vec<Fingerprint>,
    pub sample_rate: u32,
    pub hop_length: usize,
}

impl Hashes {
    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    /// `(hash, posting)` pairs ready to append to an index.
    pub fn postings(&self, source_id: SourceId) -> impl Iterator<Item = (u64, Posting)> + '_ {
        self.fingerprints.iter().map(move |fp| {
            (
                fp.hash,
                Posting {
                    anchor_time: fp.anchor_time,
                    source_id,
                },
            )
        })
    }
}

/// Linear frequency bin, clamped into `frequency_bits`.
pub fn quantize_frequency(frequency_hz: f32, config: &HashConfig) -> u64 {
    let levels = 1u64 << config.frequency_bits;
    let bin = (frequency_hz.max(0.0) as f64 / config.max_frequency_hz as f64 * levels as f64) as u64;
    bin.min(levels - 1)
}

pub fn pack_hash(bin1: u64, bin2: u64, delta: u64, frequency_bits: u32) -> u64 {
    bin1 | (bin2 << frequency_bits) | (delta << (2 * frequency_bits))
}

/// Inverse of [`pack_hash`]: `(bin1, bin2, delta)`.
pub fn decode_hash(hash: u64, frequency_bits: u32) -> (u64, u64, u64) {
    let mask = (1u64 << frequency_bits) - 1;
    (
        hash & mask,
        (hash >> frequency_bits) & mask,
        hash >> (2 * frequency_bits),
    )
}

/// Pairs every point with the following `target_zone` points and hashes the
/// pairs whose frame delta lies in `[min_delta, max_delta]`.
///
/// Identical hashes from different anchors are all kept.
pub fn create_hashes(constellation: &Constellation, config: &HashConfig) -> Result<Hashes> {
    config.validate()?;
    config.check_nyquist(constellation.sample_rate)?;

    let points = &constellation.points;
    let mut fingerprints = Vec::new();

    for (i, anchor) in points.iter().enumerate() {
        let zone_end = (i + 1 + config.target_zone).min(points.len());
        for target in &points[i + 1..zone_end] {
            // Points are frame-ordered, so this only underflows on unsorted input.
            let Some(delta) = target.frame_index.checked_sub(anchor.frame_index) else {
                continue;
            };
            if delta < config.min_delta || delta > config.max_delta {
                continue;
            }

            let bin1 = quantize_frequency(anchor.frequency_hz, config);
            let bin2 = quantize_frequency(target.frequency_hz, config);
            fingerprints.push(Fingerprint {
                hash: pack_hash(bin1, bin2, delta as u64, config.frequency_bits),
                anchor_frame: anchor.frame_index,
                anchor_time: constellation.frame_time(anchor.frame_index),
            });
        }
    }

    debug!(
        points = points.len(),
        fingerprints = fingerprints.len(),
        zone = config.target_zone,
        "hashes generated"
    );
    Ok(Hashes {
        fingerprints,
        sample_rate: constellation.sample_rate,
        hop_length: constellation.hop_length,
    })
}
