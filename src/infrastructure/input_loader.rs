//! Input loading: CSV or plain-text company lists into [`CompanyTarget`]s
//!
//! A cell holding an `http(s)://` URL is used as the review URL and its last
//! path segment (minus `-reviews`) becomes the slug. Any other value is a
//! company name and is slugified.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::CompanyTarget;

/// Header names tried in order when no column is given
pub const COLUMN_CANDIDATES: &[&str] = &[
    "url",
    "company_url",
    "link",
    "website",
    "review_url",
    "firm_name",
    "company_name",
    "name",
];

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://[^\s,]+").expect("static pattern"));
static SLUG_STRIP: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9-]").expect("static pattern"));

#[derive(Error, Debug)]
pub enum InputError {
    #[error("Failed to read input {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed CSV in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Column '{column}' not found, available: {available:?}")]
    MissingColumn { column: String, available: Vec<String> },

    #[error("Input {0} has no header row")]
    NoHeader(PathBuf),
}

/// Loads targets from `path`. `.txt` and `.list` files are read one entry
/// per line, anything else as CSV with a header row.
pub fn load_targets(path: &Path, column: Option<&str>) -> Result<Vec<CompanyTarget>, InputError> {
    let is_text = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("txt") || e.eq_ignore_ascii_case("list"));

    let targets = if is_text {
        let raw = std::fs::read_to_string(path).map_err(|source| InputError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        parse_text_list(&raw)
    } else {
        let file = std::fs::File::open(path).map_err(|source| InputError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        parse_csv(file, column).map_err(|e| match e {
            InputError::Csv { source, .. } => InputError::Csv {
                path: path.to_path_buf(),
                source,
            },
            InputError::NoHeader(_) => InputError::NoHeader(path.to_path_buf()),
            other => other,
        })?
    };

    info!(path = %path.display(), companies = targets.len(), "📥 loaded input companies");
    Ok(targets)
}

/// One entry per line. Blank lines and `#` comments are skipped.
pub fn parse_text_list(raw: &str) -> Vec<CompanyTarget> {
    collect_unique(
        raw.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#')),
    )
}

pub fn parse_csv<R: std::io::Read>(reader: R, column: Option<&str>) -> Result<Vec<CompanyTarget>, InputError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let csv_error = |source| InputError::Csv {
        path: PathBuf::new(),
        source,
    };

    let headers: Vec<String> = rdr
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(str::to_string)
        .collect();
    if headers.is_empty() {
        return Err(InputError::NoHeader(PathBuf::new()));
    }

    let index = select_column(&headers, column)?;
    debug!(column = %headers[index], "using input column");

    let mut cells = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(csv_error)?;
        if let Some(cell) = record.get(index) {
            cells.push(cell.trim().to_string());
        }
    }

    Ok(collect_unique(cells.iter().map(String::as_str).filter(|c| !c.is_empty())))
}

fn select_column(headers: &[String], column: Option<&str>) -> Result<usize, InputError> {
    if let Some(wanted) = column {
        return headers
            .iter()
            .position(|h| h == wanted)
            .or_else(|| headers.iter().position(|h| h.eq_ignore_ascii_case(wanted)))
            .ok_or_else(|| InputError::MissingColumn {
                column: wanted.to_string(),
                available: headers.to_vec(),
            });
    }

    Ok(COLUMN_CANDIDATES
        .iter()
        .find_map(|candidate| headers.iter().position(|h| h.eq_ignore_ascii_case(candidate)))
        .unwrap_or(0))
}

fn collect_unique<'a>(entries: impl Iterator<Item = &'a str>) -> Vec<CompanyTarget> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    for entry in entries {
        let Some(target) = target_from_cell(entry) else {
            warn!(entry, "⚠️ could not derive a company slug, skipping");
            continue;
        };
        if seen.insert(target.id.clone()) {
            targets.push(target);
        } else {
            debug!(company = %target.id, "duplicate input entry collapsed");
        }
    }
    targets
}

/// Turns one input cell into a target, `None` when no slug can be derived
pub fn target_from_cell(cell: &str) -> Option<CompanyTarget> {
    let cell = cell.trim();
    if let Some(found) = URL_PATTERN.find(cell) {
        let url = found.as_str();
        let slug = slug_from_url(url)?;
        return Some(CompanyTarget::new(slug.clone(), slug, url));
    }

    let slug = slugify(cell);
    if slug.is_empty() {
        return None;
    }
    Some(CompanyTarget::new(
        slug.clone(),
        cell,
        format!("https://www.ambitionbox.com/reviews/{slug}-reviews"),
    ))
}

/// Last path segment of a review URL, without the `-reviews` suffix
pub fn slug_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.rev().find(|s| !s.is_empty())?;
    let slug = last.strip_suffix("-reviews").unwrap_or(last);
    (!slug.is_empty()).then(|| slug.to_string())
}

/// Lowercase, spaces and underscores to `-`, everything else outside
/// `[a-z0-9-]` dropped
pub fn slugify(name: &str) -> String {
    let lowered = name.trim().to_lowercase().replace([' ', '_'], "-");
    SLUG_STRIP.replace_all(&lowered, "").into_owned()
}
