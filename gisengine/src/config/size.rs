//! Human-readable size parsing (e.g., "256MB", "2GB").

use thiserror::Error;

/// Error parsing a size string.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid size '{input}' - expected format like '2GB', '256MB', or '1024KB'")]
pub struct SizeParseError {
    input: String,
}

impl SizeParseError {
    fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

const KB: usize = 1024;
const MB: usize = 1024 * KB;
const GB: usize = 1024 * MB;

/// Parse a human-readable size string into bytes.
///
/// Accepts bare numbers (bytes) and `K`/`KB`, `M`/`MB`, `G`/`GB` suffixes
/// (powers of 1024), case-insensitive and whitespace tolerant.
///
/// # Examples
///
/// ```
/// use gisengine::config::parse_size;
///
/// assert_eq!(parse_size("1024").unwrap(), 1024);
/// assert_eq!(parse_size("1 KB").unwrap(), 1024);
/// assert_eq!(parse_size("256mb").unwrap(), 256 * 1024 * 1024);
/// ```
pub fn parse_size(s: &str) -> Result<usize, SizeParseError> {
    let trimmed = s.trim();
    let upper = trimmed.to_uppercase();
    let (number, multiplier) = [("GB", GB), ("G", GB), ("MB", MB), ("M", MB), ("KB", KB), ("K", KB)]
        .iter()
        .find_map(|(suffix, mult)| upper.strip_suffix(suffix).map(|n| (n.trim().to_string(), *mult)))
        .unwrap_or_else(|| (upper.clone(), 1));
    if number.is_empty() {
        return Err(SizeParseError::new(s));
    }
    let number: usize = number.parse().map_err(|_| SizeParseError::new(s))?;
    number
        .checked_mul(multiplier)
        .ok_or_else(|| SizeParseError::new(s))
}

/// Format a byte count with the largest exact suffix.
///
/// ```
/// use gisengine::config::format_size;
///
/// assert_eq!(format_size(256 * 1024 * 1024), "256MB");
/// assert_eq!(format_size(1500), "1500");
/// ```
pub fn format_size(bytes: usize) -> String {
    if bytes >= GB && bytes % GB == 0 {
        format!("{}GB", bytes / GB)
    } else if bytes >= MB && bytes % MB == 0 {
        format!("{}MB", bytes / MB)
    } else if bytes >= KB && bytes % KB == 0 {
        format!("{}KB", bytes / KB)
    } else {
        bytes.to_string()
    }
}
