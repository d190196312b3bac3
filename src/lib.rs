// src/lib.rs
//! Constellation fingerprinting for locating short clips (ads, jingles) inside
//! long recordings.
//!
//! The pipeline runs in four stages:
//!
//! 1. [`peaks::extract_constellation`] turns PCM into spectral peaks.
//! 2. [`hashing::create_hashes`] pairs nearby peaks into 64-bit hashes.
//! 3. [`FingerprintIndex::build`] maps hashes to where they occur in each source.
//! 4. [`matcher::match_clip`] votes query hashes into per-source offset
//!    histograms and reports sources whose best offset clears a threshold.
//!
//! [`correlation::find_matches`] is a slower index-free alternative that
//! correlates raw samples directly.

pub mod audio_loader;
pub mod config;
pub mod correlation;
pub mod database;
pub mod error;
pub mod hashing;
pub mod index;
pub mod matcher;
pub mod peaks;
pub mod report;
pub mod signal;
pub mod spectrogram;

pub use audio_loader::load_audio_file;
pub use config::{CorrelationConfig, ExtractorConfig, FingerprintConfig, HashConfig, MatchConfig, TransformBackend};
pub use database::IndexStore;
pub use error::{FingerprintError, Result};
pub use hashing::{Fingerprint, Hashes, create_hashes};
pub use index::{
    BuiltIndex, FingerprintIndex, IndexHandle, IndexSnapshot, Posting, RejectedSource, Source, SourceId, SourceTable,
    fingerprint_signal,
};
pub use matcher::{Detection, identify, match_clip};
pub use peaks::{Constellation, ConstellationPoint, extract_constellation};
pub use signal::AudioSignal;
