// src/index.rs
//! Inverted fingerprint index: hash -> postings.
//!
//! An index is built once from a set of sources and is read-only afterwards.
//! Rebuilding produces a new [`FingerprintIndex`]; [`IndexHandle`] swaps it in
//! while readers holding the previous snapshot keep using it until they drop
//! their `Arc`.

use parking_lot::RwLock;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::FingerprintConfig;
use crate::error::{FingerprintError, Result};
use crate::hashing::{Hashes, create_hashes};
use crate::peaks::extract_constellation;
use crate::signal::AudioSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u32);

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Posting {
    /// Anchor time inside the source, in seconds.
    pub anchor_time: f64,
    pub source_id: SourceId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub id: SourceId,
    pub name: String,
    pub duration_seconds: f64,
}

/// Registered sources, indexed by their dense ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceTable {
    sources: Vec<Source>,
}

impl SourceTable {
    pub fn get(&self, id: SourceId) -> Option<&Source> {
        self.sources.get(id.0 as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Source> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Registers a source under the next id.
    pub(crate) fn register(&mut self, name: String, duration_seconds: f64) -> SourceId {
        let id = SourceId(self.sources.len() as u32);
        self.sources.push(Source {
            id,
            name,
            duration_seconds,
        });
        id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintIndex {
    postings: HashMap<u64, Vec<Posting>>,
    sample_rate: u32,
    hop_length: usize,
}

/// A source that was skipped during a build, with the reason.
#[derive(Debug)]
pub struct RejectedSource {
    pub name: String,
    pub error: FingerprintError,
}

/// Result of [`FingerprintIndex::build`].
#[derive(Debug)]
pub struct BuiltIndex {
    pub index: FingerprintIndex,
    pub sources: SourceTable,
    pub rejected: Vec<RejectedSource>,
}

impl FingerprintIndex {
    /// An index with no postings; every lookup returns an empty slice.
    pub fn empty(sample_rate: u32, hop_length: usize) -> Self {
        Self {
            postings: HashMap::new(),
            sample_rate,
            hop_length,
        }
    }

    /// Fingerprints every source and merges the postings into one index.
    ///
    /// Sources that are malformed or recorded at a different sample rate are
    /// reported in [`BuiltIndex::rejected`] and do not receive an id. An
    /// invalid configuration fails the whole build.
    pub fn build<'a, S, I>(sources: I, config: &FingerprintConfig) -> Result<BuiltIndex>
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, &'a AudioSignal)>,
    {
        config.validate()?;

        let inputs: Vec<(String, &AudioSignal)> = sources
            .into_iter()
            .map(|(name, signal)| (name.into(), signal))
            .collect();

        let fingerprinted: Vec<Result<Hashes>> = inputs
            .par_iter()
            .map(|(_, signal)| fingerprint_signal(signal, config))
            .collect();

        let mut index = FingerprintIndex::empty(config.sample_rate, config.hop_length());
        let mut table = SourceTable::default();
        let mut rejected = Vec::new();

        for ((name, signal), outcome) in inputs.into_iter().zip(fingerprinted) {
            match outcome {
                Ok(hashes) => {
                    let id = table.register(name, signal.duration_seconds());
                    for (hash, posting) in hashes.postings(id) {
                        index.append(hash, posting);
                    }
                    debug!(source = %id, fingerprints = hashes.len(), "source indexed");
                }
                Err(error) if !error.is_input_local() => return Err(error),
                Err(error) => {
                    warn!(source = %name, %error, "source rejected");
                    rejected.push(RejectedSource { name, error });
                }
            }
        }

        info!(
            sources = table.len(),
            rejected = rejected.len(),
            hashes = index.len(),
            postings = index.posting_count(),
            "index built"
        );
        Ok(BuiltIndex {
            index,
            sources: table,
            rejected,
        })
    }

    /// Postings for `hash` in insertion order; empty when the hash is unknown.
    pub fn lookup(&self, hash: u64) -> &[Posting] {
        self.postings.get(&hash).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of distinct hashes.
    pub fn len(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    pub fn posting_count(&self) -> usize {
        self.postings.values().map(Vec::len).sum()
    }

    pub fn hashes(&self) -> impl Iterator<Item = u64> + '_ {
        self.postings.keys().copied()
    }

    /// Every hash with its postings, in no particular hash order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &[Posting])> + '_ {
        self.postings.iter().map(|(&hash, list)| (hash, list.as_slice()))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn hop_length(&self) -> usize {
        self.hop_length
    }

    pub fn hop_seconds(&self) -> f64 {
        self.hop_length as f64 / self.sample_rate as f64
    }

    /// Only used while an index is being assembled (build or reload).
    pub(crate) fn append(&mut self, hash: u64, posting: Posting) {
        self.postings.entry(hash).or_default().push(posting);
    }
}

/// Extracts and hashes one signal at the configured sample rate.
pub fn fingerprint_signal(signal: &AudioSignal, config: &FingerprintConfig) -> Result<Hashes> {
    if signal.sample_rate() != config.sample_rate {
        return Err(FingerprintError::SampleRateMismatch {
            expected: config.sample_rate,
            actual: signal.sample_rate(),
        });
    }
    let constellation = extract_constellation(signal, &config.extractor)?;
    create_hashes(&constellation, &config.hashing)
}

/// An index together with the table that names its sources.
#[derive(Debug)]
pub struct IndexSnapshot {
    pub index: FingerprintIndex,
    pub sources: SourceTable,
    pub generation: u64,
}

/// Shared, swappable reference to the current index.
#[derive(Debug)]
pub struct IndexHandle {
    current: RwLock<Arc<IndexSnapshot>>,
}

impl IndexHandle {
    pub fn new(index: FingerprintIndex, sources: SourceTable) -> Self {
        Self {
            current: RwLock::new(Arc::new(IndexSnapshot {
                index,
                sources,
                generation: 0,
            })),
        }
    }

    /// The snapshot current at the time of the call.
    pub fn load(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Installs a rebuilt index and returns its generation.
    pub fn replace(&self, index: FingerprintIndex, sources: SourceTable) -> u64 {
        let mut current = self.current.write();
        let generation = current.generation + 1;
        *current = Arc::new(IndexSnapshot {
            index,
            sources,
            generation,
        });
        generation
    }
}
