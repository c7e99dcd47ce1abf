//! CLI output formatting.
//!
//! Output is **information-centric**: each image leads with its positional
//! index and name, with the source path, dimensions and result shown as
//! indented context lines.
//!
//! # Output Format
//!
//! ## Crop
//!
//! ```text
//! Crop 10% (3 images)
//! 001 dawn
//!     Source: photos/dawn.jpg
//!     4032x3024 → 820x614
//!     Output: out/dawn-cropped.png
//! 002 (IMG_0042.HEIC)
//!     Source: photos/IMG_0042.HEIC
//!     Error: Invalid source image: no decodable raster
//!
//! Cache: 2 processed
//! Cropped 1 image, 1 failed
//! ```
//!
//! ## Preview
//!
//! ```text
//! dawn 4032x3024 → 533x400 (cover 400x400)
//!     Output: out/dawn-preview.png
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. The crop report
//! also serializes to JSON for `--json`.

use crate::cache::CacheStats;
use serde::Serialize;
use std::collections::HashMap;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn size(dims: (u32, u32)) -> String {
    format!("{}x{}", dims.0, dims.1)
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

/// Named images show the name, unnamed ones the file name in parens.
///
/// ```text
/// 001 dawn              // named
/// 001 (IMG_0042.HEIC)   // unnamed: file name is the identity
/// ```
fn image_line(index: usize, name: Option<&str>, filename: &str) -> String {
    match name {
        Some(n) if !n.is_empty() => format!("{} {}", format_index(index), n),
        _ => format!("{} ({})", format_index(index), filename),
    }
}

// ============================================================================
// Crop report
// ============================================================================

/// Outcome for one input file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CropEntry {
    pub name: Option<String>,
    pub source: String,
    pub original: Option<(u32, u32)>,
    pub cropped: Option<(u32, u32)>,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl CropEntry {
    fn filename(&self) -> &str {
        self.source
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.source)
    }
}

/// Output file names for a batch, in input order.
///
/// A stem shared by several inputs gets the input's positional index as a
/// prefix on every occurrence, so no two inputs write the same file:
///
/// ```text
/// dawn-cropped.png
/// 002-dusk-cropped.png   // trips/dusk.jpg
/// 003-dusk-cropped.png   // home/dusk.jpg
/// ```
pub fn cropped_file_names(stems: &[&str]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for stem in stems {
        *counts.entry(*stem).or_default() += 1;
    }
    stems
        .iter()
        .enumerate()
        .map(|(i, stem)| {
            if counts[stem] > 1 {
                format!("{}-{}-cropped.png", format_index(i + 1), stem)
            } else {
                format!("{stem}-cropped.png")
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CropReport {
    pub crop_percentage: f64,
    pub entries: Vec<CropEntry>,
    pub cache: CacheStats,
}

impl CropReport {
    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|e| e.error.is_none()).count()
    }

    pub fn failed(&self) -> usize {
        self.entries.len() - self.succeeded()
    }
}

pub fn format_crop_report(report: &CropReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Crop {}% ({})",
        report.crop_percentage,
        plural(report.entries.len(), "image")
    )];

    for (i, entry) in report.entries.iter().enumerate() {
        lines.push(image_line(i + 1, entry.name.as_deref(), entry.filename()));
        lines.push(format!("{}Source: {}", indent(1), entry.source));
        match (&entry.error, entry.original, entry.cropped) {
            (Some(err), _, _) => lines.push(format!("{}Error: {}", indent(1), err)),
            (None, Some(original), Some(cropped)) => {
                lines.push(format!(
                    "{}{} \u{2192} {}",
                    indent(1),
                    size(original),
                    size(cropped)
                ));
            }
            _ => {}
        }
        if let Some(output) = &entry.output {
            lines.push(format!("{}Output: {}", indent(1), output));
        }
    }

    lines.push(String::new());
    lines.push(format!("Cache: {}", report.cache));
    let failed = report.failed();
    if failed > 0 {
        lines.push(format!(
            "Cropped {}, {} failed",
            plural(report.succeeded(), "image"),
            failed
        ));
    } else {
        lines.push(format!("Cropped {}", plural(report.succeeded(), "image")));
    }
    lines
}

pub fn print_crop_report(report: &CropReport) {
    for line in format_crop_report(report) {
        println!("{}", line);
    }
}

/// Pretty JSON rendering of the report.
pub fn crop_report_json(report: &CropReport) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

// ============================================================================
// Preview
// ============================================================================

pub fn format_preview(
    name: &str,
    original: (u32, u32),
    target: (u32, u32),
    result: (u32, u32),
    output: &str,
) -> Vec<String> {
    vec![
        format!(
            "{} {} \u{2192} {} (cover {})",
            name,
            size(original),
            size(result),
            size(target)
        ),
        format!("{}Output: {}", indent(1), output),
    ]
}

pub fn print_preview(
    name: &str,
    original: (u32, u32),
    target: (u32, u32),
    result: (u32, u32),
    output: &str,
) {
    for line in format_preview(name, original, target, result, output) {
        println!("{}", line);
    }
}
