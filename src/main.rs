// src/main.rs

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use adsift::audio_loader::{is_audio_file, load_audio_file};
use adsift::correlation::find_matches;
use adsift::report::{CsvReport, ReportRow, rows_for_clip};
use adsift::{AudioSignal, FingerprintConfig, FingerprintIndex, IndexHandle, IndexStore, identify};

#[derive(Parser)]
#[command(name = "adsift", version, about = "Find known ad clips inside broadcast recordings")]
struct Cli {
    /// JSON file overriding the default fingerprint settings.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Rate every file is resampled to before fingerprinting.
    #[arg(long, global = true)]
    sample_rate: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fingerprint every ad in a directory and save the index.
    Enroll {
        #[arg(long)]
        ads: PathBuf,
        #[arg(long)]
        db: PathBuf,
    },
    /// Match broadcast clips against a saved index.
    Scan {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        broadcasts: PathBuf,
        #[arg(long, default_value = "results.csv")]
        out: PathBuf,
    },
    /// Cross-correlate every ad with every broadcast clip (no index).
    Correlate {
        #[arg(long)]
        ads: PathBuf,
        #[arg(long)]
        broadcasts: PathBuf,
        #[arg(long, default_value = "results.csv")]
        out: PathBuf,
        #[arg(long, default_value_t = 0.45)]
        threshold: f32,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.sample_rate)?;
    let started = Instant::now();

    match cli.command {
        Command::Enroll { ads, db } => enroll(&ads, &db, &config)?,
        Command::Scan { db, broadcasts, out } => scan(&db, &broadcasts, &out, &config)?,
        Command::Correlate {
            ads,
            broadcasts,
            out,
            threshold,
        } => {
            let mut config = config;
            config.correlation.threshold = threshold;
            correlate(&ads, &broadcasts, &out, &config)?
        }
    }

    info!(elapsed = ?started.elapsed(), "done");
    Ok(())
}

fn load_config(path: Option<&Path>, sample_rate: Option<u32>) -> Result<FingerprintConfig> {
    let mut config = match path {
        Some(path) => FingerprintConfig::from_json_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => FingerprintConfig::default(),
    };
    if let Some(rate) = sample_rate {
        config.sample_rate = rate;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn list_audio_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && is_audio_file(&path) {
            files.push(path);
        }
    }
    files.sort();
    if files.is_empty() {
        warn!(dir = %dir.display(), "no audio files found");
    }
    Ok(files)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Decodes every file in parallel; failures are logged and left out.
fn load_all(files: &[PathBuf], sample_rate: u32) -> Vec<(String, AudioSignal)> {
    files
        .par_iter()
        .filter_map(|path| match load_audio_file(path, sample_rate) {
            Ok(signal) => Some((file_label(path), signal)),
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping file");
                None
            }
        })
        .collect()
}

fn enroll(ads_dir: &Path, db_path: &Path, config: &FingerprintConfig) -> Result<()> {
    let files = list_audio_files(ads_dir)?;
    info!(count = files.len(), dir = %ads_dir.display(), "enrolling ads");
    let ads = load_all(&files, config.sample_rate);

    let built = FingerprintIndex::build(ads.iter().map(|(name, signal)| (name.as_str(), signal)), config)
        .context("building index")?;
    for rejected in &built.rejected {
        warn!(ad = %rejected.name, error = %rejected.error, "ad not enrolled");
    }

    let mut store = IndexStore::open(db_path).with_context(|| format!("opening {}", db_path.display()))?;
    store.save(&built.index, &built.sources).context("saving index")?;
    info!(
        enrolled = built.sources.len(),
        skipped = files.len() - built.sources.len(),
        db = %db_path.display(),
        "enrolment finished"
    );
    Ok(())
}

fn scan(db_path: &Path, broadcasts_dir: &Path, out: &Path, config: &FingerprintConfig) -> Result<()> {
    let store = IndexStore::open(db_path).with_context(|| format!("opening {}", db_path.display()))?;
    let (index, sources) = store.load().context("loading index")?;
    if index.sample_rate() != config.sample_rate || index.hop_length() != config.hop_length() {
        bail!(
            "index was built at {} Hz / hop {}, configuration asks for {} Hz / hop {}",
            index.sample_rate(),
            index.hop_length(),
            config.sample_rate,
            config.hop_length()
        );
    }
    let handle = IndexHandle::new(index, sources);

    let files = list_audio_files(broadcasts_dir)?;
    info!(count = files.len(), "scanning broadcast clips");
    let rows: Vec<ReportRow> = files
        .par_iter()
        .flat_map_iter(|path| {
            let snapshot = handle.load();
            let label = file_label(path);
            let outcome = load_audio_file(path, config.sample_rate)
                .and_then(|signal| identify(&signal, &snapshot.index, &snapshot.sources, config));
            match outcome {
                Ok(detections) => {
                    info!(clip = %label, detections = detections.len(), "clip scanned");
                    rows_for_clip(&label, &detections, &snapshot.sources)
                }
                Err(error) => {
                    warn!(clip = %label, %error, "skipping clip");
                    Vec::new()
                }
            }
        })
        .collect();

    write_report(out, &rows)
}

fn correlate(ads_dir: &Path, broadcasts_dir: &Path, out: &Path, config: &FingerprintConfig) -> Result<()> {
    let ads = load_all(&list_audio_files(ads_dir)?, config.sample_rate);
    let files = list_audio_files(broadcasts_dir)?;
    info!(ads = ads.len(), clips = files.len(), "correlating");

    let mut rows = Vec::new();
    for path in &files {
        let label = file_label(path);
        let broadcast = match load_audio_file(path, config.sample_rate) {
            Ok(signal) => signal,
            Err(error) => {
                warn!(clip = %label, %error, "skipping clip");
                continue;
            }
        };
        let clip_rows: Vec<ReportRow> = ads
            .par_iter()
            .map(|(ad_name, ad)| {
                let starts = find_matches(&broadcast, ad, &config.correlation).unwrap_or_else(|error| {
                    warn!(clip = %label, ad = %ad_name, %error, "correlation failed");
                    Vec::new()
                });
                ReportRow::new(label.as_str(), ad_name.as_str(), &starts, ad.duration_seconds())
            })
            .collect();
        info!(clip = %label, "clip correlated");
        rows.extend(clip_rows);
    }

    write_report(out, &rows)
}

fn write_report(out: &Path, rows: &[ReportRow]) -> Result<()> {
    let file = File::create(out).with_context(|| format!("creating {}", out.display()))?;
    let mut report = CsvReport::new(BufWriter::new(file))?;
    for row in rows {
        report.write_row(row)?;
    }
    report.finish()?;
    info!(rows = rows.len(), out = %out.display(), "report written");
    Ok(())
}
