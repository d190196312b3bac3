// src/audio_loader.rs
//! Decoding collaborator: file -> mono, resampled, peak-normalised PCM.

use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};

use crate::error::{FingerprintError, Result};
use crate::signal::{AudioSignal, normalize_peak};

/// File extensions the batch commands pick up from a directory.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "ogg", "m4a", "aac"];

pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| AUDIO_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Decodes `file_path`, down-mixes to mono, resamples to `target_sample_rate`
/// and scales the result into [-1, 1].
pub fn load_audio_file(file_path: &Path, target_sample_rate: u32) -> Result<AudioSignal> {
    let (mono, original_sample_rate) = decode_mono(file_path)?;
    let mut samples = resample(mono, original_sample_rate, target_sample_rate)?;
    normalize_peak(&mut samples);
    debug!(
        path = %file_path.display(),
        samples = samples.len(),
        sample_rate = target_sample_rate,
        "audio loaded"
    );
    Ok(AudioSignal::new(samples, target_sample_rate))
}

fn decode_mono(file_path: &Path) -> Result<(Vec<f32>, u32)> {
    let src = File::open(file_path)?;
    let mss = MediaSourceStream::new(Box::new(src), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = file_path.extension().and_then(|s| s.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| FingerprintError::Decode(format!("unsupported format: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some())
        .ok_or_else(|| FingerprintError::Decode("no compatible audio track".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| FingerprintError::Decode(format!("failed to make decoder: {}", e)))?;
    let track_id = track.id;

    let mut mono: Vec<f32> = Vec::new();
    let mut input_sample_rate: Option<u32> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => {
                return Err(FingerprintError::Decode(
                    "stream parameters changed mid-file (reset required)".to_string(),
                ));
            }
            Err(err) => return Err(FingerprintError::Decode(format!("reading packet: {}", err))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                match input_sample_rate {
                    None => input_sample_rate = Some(spec.rate),
                    Some(rate) if rate != spec.rate => {
                        return Err(FingerprintError::Decode(format!(
                            "sample rate changed mid-stream from {} to {}",
                            rate, spec.rate
                        )));
                    }
                    Some(_) => {}
                }

                let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                sample_buf.copy_interleaved_ref(decoded);
                let channels = spec.channels.count().max(1);
                for frame in sample_buf.samples().chunks_exact(channels) {
                    mono.push(frame.iter().sum::<f32>() / channels as f32);
                }
            }
            Err(SymphoniaError::DecodeError(err)) => {
                warn!(path = %file_path.display(), "skipping undecodable packet: {}", err);
            }
            Err(err) => return Err(FingerprintError::Decode(format!("fatal decoding error: {}", err))),
        }
    }

    if mono.is_empty() {
        return Err(FingerprintError::Decode("no audio samples decoded".to_string()));
    }
    let rate = input_sample_rate
        .ok_or_else(|| FingerprintError::Decode("could not determine sample rate".to_string()))?;
    Ok((mono, rate))
}

fn resample(mono: Vec<f32>, from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate {
        return Ok(mono);
    }
    debug!(from_rate, to_rate, "resampling");

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };
    let input_len = mono.len();
    let mut resampler = SincFixedIn::<f32>::new(to_rate as f64 / from_rate as f64, 2.0, params, input_len, 1)
        .map_err(|e| FingerprintError::Decode(format!("failed to create resampler: {:?}", e)))?;

    let waves_out = resampler
        .process(&[mono], None)
        .map_err(|e| FingerprintError::Decode(format!("resampling failed: {:?}", e)))?;
    let resampled = waves_out
        .into_iter()
        .next()
        .ok_or_else(|| FingerprintError::Decode("resampler produced no output".to_string()))?;
    debug!(input = input_len, output = resampled.len(), "resampled");
    Ok(resampled)
}
