// src/matcher.rs
//! Offset-histogram matching of query fingerprints against an index.

use std::cmp::Reverse;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::{FingerprintConfig, MatchConfig};
use crate::error::{FingerprintError, Result};
use crate::hashing::Hashes;
use crate::index::{FingerprintIndex, SourceId, SourceTable, fingerprint_signal};
use crate::signal::AudioSignal;

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub source_id: SourceId,
    pub source_name: String,
    /// Where the source starts inside the query clip, in seconds.
    pub offset_seconds: f64,
    pub score: u32,
}

/// Per-source vote counts keyed by offset bucket (offset / hop length).
type OffsetHistograms = HashMap<SourceId, HashMap<i64, u32>>;

/// Votes every query fingerprint against the index and reports each source
/// whose best-aligned offset collects more than `score_threshold` votes.
///
/// Only offsets within `[0, clip_duration]` count. Results are ordered by
/// descending score, then ascending source id.
pub fn match_clip(
    query: &Hashes,
    clip_duration: f64,
    index: &FingerprintIndex,
    sources: &SourceTable,
    config: &MatchConfig,
) -> Result<Vec<Detection>> {
    check_framing(query, index)?;
    if query.is_empty() {
        debug!("query has no fingerprints");
        return Ok(Vec::new());
    }

    let hop_seconds = index.hop_seconds();
    let histograms = offset_histograms(query, clip_duration, index);

    let mut detections = Vec::new();
    for (&source_id, histogram) in &histograms {
        let Some((bucket, score)) = best_offset(histogram) else {
            continue;
        };
        debug!(source = %source_id, offset_bucket = bucket, score, "best offset");
        if score <= config.score_threshold {
            continue;
        }
        let Some(source) = sources.get(source_id) else {
            warn!(source = %source_id, "posting refers to an unregistered source");
            continue;
        };
        detections.push(Detection {
            source_id,
            source_name: source.name.clone(),
            offset_seconds: bucket as f64 * hop_seconds,
            score,
        });
    }

    detections.sort_by_key(|d| (Reverse(d.score), d.source_id));
    debug!(
        fingerprints = query.len(),
        candidates = histograms.len(),
        detections = detections.len(),
        "query matched"
    );
    Ok(detections)
}

/// Extracts, hashes and matches `signal` in one call.
pub fn identify(
    signal: &AudioSignal,
    index: &FingerprintIndex,
    sources: &SourceTable,
    config: &FingerprintConfig,
) -> Result<Vec<Detection>> {
    if signal.sample_rate() != index.sample_rate() {
        return Err(FingerprintError::SampleRateMismatch {
            expected: index.sample_rate(),
            actual: signal.sample_rate(),
        });
    }
    let hashes = fingerprint_signal(signal, config)?;
    match_clip(&hashes, signal.duration_seconds(), index, sources, &config.matching)
}

fn check_framing(query: &Hashes, index: &FingerprintIndex) -> Result<()> {
    if query.sample_rate != index.sample_rate() {
        return Err(FingerprintError::SampleRateMismatch {
            expected: index.sample_rate(),
            actual: query.sample_rate,
        });
    }
    if query.hop_length != index.hop_length() {
        return Err(FingerprintError::HopLengthMismatch {
            expected: index.hop_length(),
            actual: query.hop_length,
        });
    }
    Ok(())
}

fn offset_histograms(query: &Hashes, clip_duration: f64, index: &FingerprintIndex) -> OffsetHistograms {
    let hop_seconds = index.hop_seconds();
    let mut histograms: OffsetHistograms = HashMap::new();

    for fp in &query.fingerprints {
        for posting in index.lookup(fp.hash) {
            let offset = fp.anchor_time - posting.anchor_time;
            if !(0.0..=clip_duration).contains(&offset) {
                continue;
            }
            // Anchor times are whole hops, so rounding recovers the exact frame offset.
            let bucket = (offset / hop_seconds).round() as i64;
            *histograms
                .entry(posting.source_id)
                .or_default()
                .entry(bucket)
                .or_insert(0) += 1;
        }
    }
    histograms
}

/// Highest count; ties go to the earliest offset.
fn best_offset(histogram: &HashMap<i64, u32>) -> Option<(i64, u32)> {
    histogram
        .iter()
        .max_by_key(|&(&bucket, &count)| (count, Reverse(bucket)))
        .map(|(&bucket, &count)| (bucket, count))
}
