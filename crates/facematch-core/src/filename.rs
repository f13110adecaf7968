//! Identity parsing for inbox filenames.
//!
//! Expected shapes:
//! - `Bob Marley.jpg` → name `Bob Marley`, no tag
//! - `Park Jeonghwa [exid].jpg` → name `Park Jeonghwa`, tag `exid`
//! - `Park Jeonghwa [exid].1.jpg` → same, the `.1` copy counter is dropped

use std::path::Path;

use thiserror::Error;

const SUPPORTED_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilenameError {
    #[error("invalid filename (empty name): {0}")]
    EmptyName(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub name: String,
    /// Disambiguation tag; empty when the filename has none.
    pub tag: String,
}

pub fn parse_inbox_filename(filename: &str) -> Result<ParsedName, FilenameError> {
    let (base, _) = split_extension(filename);

    // Duplicate downloads come out as "name.1.jpg", "name.2.jpg", ...
    let (stem, counter) = split_extension(base);
    let base = if counter.parse::<f64>().is_ok() { stem } else { base };

    let bracketed = match (base.rfind('['), base.rfind(']')) {
        (Some(open), Some(close)) if close == base.len() - 1 && open < close => Some((open, close)),
        _ => None,
    };

    let (name, tag) = match bracketed {
        Some((open, close)) => (base[..open].trim(), base[open + 1..close].trim()),
        None => (base.trim(), ""),
    };

    if name.is_empty() {
        return Err(FilenameError::EmptyName(filename.to_string()));
    }

    Ok(ParsedName {
        name: name.to_string(),
        tag: tag.to_string(),
    })
}

/// Whether `path` has an image extension the pipeline accepts.
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.iter().any(|s| e.eq_ignore_ascii_case(s)))
        .unwrap_or(false)
}

/// Split at the last '.', keeping the dot with the extension.
/// Returns `(s, "")` when there is no dot.
fn split_extension(s: &str) -> (&str, &str) {
    match s.rfind('.') {
        Some(i) => s.split_at(i),
        None => (s, ""),
    }
}
