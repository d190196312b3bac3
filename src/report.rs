// src/report.rs
//! Turns detections into human-readable windows and CSV rows.

use std::io::Write;

use crate::error::Result;
use crate::index::SourceTable;
use crate::matcher::Detection;

pub const CSV_HEADER: [&str; 3] = ["tv_clip", "ad", "found"];
pub const NO_MATCH: &str = "No match";

/// `MM:SS.ss`; minutes are not wrapped into hours.
pub fn format_time(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let minutes = (seconds / 60.0).floor() as u64;
    let secs = seconds.rem_euclid(60.0);
    format!("{:02}:{:05.2}", minutes, secs)
}

/// `MM:SS.ss - MM:SS.ss` for a clip starting at `start` and lasting `duration`.
pub fn format_window(start: f64, duration: f64) -> String {
    format!("{} - {}", format_time(start), format_time(start + duration))
}

/// One CSV line: a broadcast clip, an ad, and every window the ad was found in.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub tv_clip: String,
    pub ad: String,
    pub windows: Vec<String>,
}

impl ReportRow {
    pub fn new(tv_clip: impl Into<String>, ad: impl Into<String>, starts: &[f64], ad_duration: f64) -> Self {
        Self {
            tv_clip: tv_clip.into(),
            ad: ad.into(),
            windows: starts.iter().map(|&s| format_window(s, ad_duration)).collect(),
        }
    }

    pub fn found(&self) -> String {
        if self.windows.is_empty() {
            NO_MATCH.to_string()
        } else {
            self.windows.join(", ")
        }
    }
}

/// A row for every registered source, in id order, so misses show up as
/// `No match` instead of disappearing from the report.
pub fn rows_for_clip(tv_clip: &str, detections: &[Detection], sources: &SourceTable) -> Vec<ReportRow> {
    sources
        .iter()
        .map(|source| {
            let starts: Vec<f64> = detections
                .iter()
                .filter(|d| d.source_id == source.id)
                .map(|d| d.offset_seconds)
                .collect();
            ReportRow::new(tv_clip, source.name.as_str(), &starts, source.duration_seconds)
        })
        .collect()
}

/// Minimal RFC 4180 writer for the three-column report.
pub struct CsvReport<W: Write> {
    out: W,
}

impl<W: Write> CsvReport<W> {
    /// Writes the header line immediately.
    pub fn new(mut out: W) -> Result<Self> {
        write_record(&mut out, &CSV_HEADER)?;
        Ok(Self { out })
    }

    pub fn write_row(&mut self, row: &ReportRow) -> Result<()> {
        let found = row.found();
        write_record(&mut self.out, &[row.tv_clip.as_str(), row.ad.as_str(), found.as_str()])
    }

    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

fn write_record<W: Write>(out: &mut W, fields: &[&str]) -> Result<()> {
    let line: Vec<String> = fields.iter().map(|f| escape_field(f)).collect();
    write!(out, "{}\r\n", line.join(","))?;
    Ok(())
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
