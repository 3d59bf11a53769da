// Artifact naming - the embedded timestamp is what Tier-2 retention relies on

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;

/// Layout of the timestamp embedded in artifact names
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Suffix appended to compressed artifacts
pub const GZIP_SUFFIX: &str = ".gz";

lazy_static! {
    // `_YYYYMMDD_HHMMSS` directly followed by the extension (or the end of the name)
    static ref TIMESTAMP_PATTERN: Regex =
        Regex::new(r"_(\d{8})_(\d{6})(?:\.|$)").expect("timestamp pattern is valid");
}

/// Why an artifact name yields no creation instant
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilenameError {
    /// No `_YYYYMMDD_HHMMSS` group in the name
    #[error("no timestamp found in {0}")]
    MissingTimestamp(String),
    /// The group is present but is not a real date and time
    #[error("invalid timestamp {stamp} in {filename}")]
    InvalidTimestamp {
        /// Name being parsed
        filename: String,
        /// The offending `YYYYMMDD_HHMMSS` text
        stamp: String,
    },
}

/// Dump file extension for a database type
pub fn extension_for(kind: &str) -> &'static str {
    match kind {
        "mysql" => ".sql",
        "postgresql" => ".dump",
        "mongodb" => ".archive",
        _ => ".backup",
    }
}

/// `<name>_<kind>_<YYYYMMDD>_<HHMMSS>.<ext>`, seconds precision
pub fn make_filename(name: &str, kind: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}_{}_{}{}",
        name,
        kind,
        at.trunc_subsecs(0).format(TIMESTAMP_FORMAT),
        extension_for(kind)
    )
}

/// Name of the gzip output for `filename`
pub fn compressed_filename(filename: &str) -> String {
    format!("{}{}", filename, GZIP_SUFFIX)
}

/// Recover the creation instant from an artifact name.
///
/// The last `_YYYYMMDD_HHMMSS` group wins so database names that happen to contain
/// digits do not shadow the real timestamp.
pub fn extract_timestamp(filename: &str) -> Result<DateTime<Utc>, FilenameError> {
    let captures = TIMESTAMP_PATTERN
        .captures_iter(filename)
        .last()
        .ok_or_else(|| FilenameError::MissingTimestamp(filename.to_string()))?;

    let stamp = format!("{}_{}", &captures[1], &captures[2]);
    NaiveDateTime::parse_from_str(&stamp, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| FilenameError::InvalidTimestamp {
            filename: filename.to_string(),
            stamp,
        })
}

/// Tier-2 discovery: names whose embedded timestamp is strictly before `cutoff`.
///
/// Names without a parseable timestamp are kept and reported as warnings.
pub fn expired_by_name(names: &[String], cutoff: DateTime<Utc>) -> Vec<String> {
    names
        .iter()
        .filter(|name| match extract_timestamp(name) {
            Ok(created) => created < cutoff,
            Err(e) => {
                warn!(file = %name, error = %e, "Skipping file without parseable timestamp");
                false
            }
        })
        .cloned()
        .collect()
}
