// tests/pipeline.rs
//! End-to-end: build an index from synthetic sources and find them again.

use adsift::{AudioSignal, Detection, FingerprintConfig, FingerprintIndex, IndexStore, SourceId, identify};
use std::f64::consts::PI;

const SR: u32 = 22050;

fn tones(freqs: &[f64], seconds: f64, amplitude: f64) -> Vec<f32> {
    (0..(seconds * SR as f64) as usize)
        .map(|i| {
            let t = i as f64 / SR as f64;
            freqs.iter().map(|f| amplitude * (2.0 * PI * f * t).sin()).sum::<f64>() as f32
        })
        .collect()
}

/// One tone pair per second so the hashes change over time.
fn melody() -> AudioSignal {
    let steps: [[f64; 2]; 8] = [
        [700.0, 3100.0],
        [950.0, 4400.0],
        [1300.0, 2900.0],
        [520.0, 5600.0],
        [1800.0, 6900.0],
        [880.0, 3700.0],
        [1100.0, 8200.0],
        [640.0, 2200.0],
    ];
    let samples = steps
        .iter()
        .flat_map(|pair| tones(pair, 1.0, 0.3))
        .collect();
    AudioSignal::new(samples, SR)
}

fn tiny_noise(samples: &mut [f32]) {
    let mut state = 0x2545_f491_4f6c_dd1du64;
    for sample in samples.iter_mut() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        *sample += ((state >> 40) as f32 / (1u64 << 24) as f32 - 0.5) * 1e-4;
    }
}

#[test]
fn source_matches_itself_at_offset_zero() {
    let config = FingerprintConfig::default();
    let ad = melody();
    let built = FingerprintIndex::build([("melody", &ad)], &config).unwrap();
    assert!(built.rejected.is_empty());

    let detections = identify(&ad, &built.index, &built.sources, &config).unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].source_id, SourceId(0));
    assert_eq!(detections[0].offset_seconds, 0.0);
    assert!(detections[0].score > config.matching.score_threshold);
}

#[test]
fn injected_clip_found_at_its_offset() {
    let config = FingerprintConfig::default();
    let hop_seconds = config.hop_length() as f64 / SR as f64;

    let burst_freqs = [1500.0, 4200.0];
    let burst = AudioSignal::new(tones(&burst_freqs, 3.0, 0.3), SR);
    let decoy = AudioSignal::new(tones(&[800.0, 3300.0], 3.0, 0.3), SR);
    let built = FingerprintIndex::build([("burst", &burst), ("decoy", &decoy)], &config).unwrap();

    let mut carrier = tones(&[600.0, 2600.0], 300.0, 0.15);
    tiny_noise(&mut carrier);
    let start = (45.0 * SR as f64) as usize;
    let end = start + burst.len();
    for (dst, src) in carrier[start..end].iter_mut().zip(burst.samples()) {
        *dst += src;
    }
    let broadcast = AudioSignal::new(carrier, SR);

    let detections = identify(&broadcast, &built.index, &built.sources, &config).unwrap();
    assert_eq!(detections.len(), 1, "{detections:?}");
    let hit = &detections[0];
    assert_eq!(hit.source_name, "burst");
    assert!(
        (hit.offset_seconds - 45.0).abs() <= hop_seconds + 1e-6,
        "offset {}",
        hit.offset_seconds
    );
    assert!(hit.score > config.matching.score_threshold);
}

#[test]
fn reloaded_index_gives_same_detections() {
    let config = FingerprintConfig::default();
    let ad = melody();
    let other = AudioSignal::new(tones(&[1250.0, 4750.0], 4.0, 0.3), SR);
    let built = FingerprintIndex::build([("melody", &ad), ("other", &other)], &config).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ads.sqlite");
    {
        let mut store = IndexStore::open(&path).unwrap();
        store.save(&built.index, &built.sources).unwrap();
    }
    let (index, sources) = IndexStore::open(&path).unwrap().load().unwrap();
    assert_eq!(index, built.index);
    assert_eq!(sources, built.sources);

    let mut query = vec![0.0f32; 2 * SR as usize];
    query.extend_from_slice(ad.samples());
    query.extend(std::iter::repeat_n(0.0f32, SR as usize));
    let query = AudioSignal::new(query, SR);

    let expected: Vec<Detection> = identify(&query, &built.index, &built.sources, &config).unwrap();
    let reloaded = identify(&query, &index, &sources, &config).unwrap();
    assert_eq!(reloaded, expected);
    assert_eq!(expected[0].source_name, "melody");
}
